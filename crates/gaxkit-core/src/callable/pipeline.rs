//! The resolved decorator stack for one call.
//!
//! Stages are listed innermost first and always appear in this order:
//! ```text
//! [Retry] → Timeout → [PageStream]
//! ```
//! Retry sits inside timeout injection so every attempt receives the full
//! timeout, and inside page streaming so a failed page fetch retries only
//! that page.

use std::time::Duration;

use futures::stream::BoxStream;

use crate::callable::call::ApiCall;
use crate::callable::page::{PageDescriptor, PageRequest, PageResponse, PageStreamer};
use crate::callable::retry::Retrying;
use crate::callable::timeout::WithTimeout;
use crate::error::{CallError, ConfigError};

/// One decorator applied around the raw call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    Retry { max_attempts: u32 },
    Timeout { timeout: Duration },
    PageStream { descriptor: PageDescriptor },
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Retry { max_attempts } => write!(f, "retry(max_attempts={max_attempts})"),
            Self::Timeout { timeout } => write!(f, "timeout({timeout:?})"),
            Self::PageStream { descriptor } => {
                write!(f, "page_stream({})", descriptor.resource_field)
            }
        }
    }
}

/// Ordered stages built by [`CallSettings::pipeline`](crate::callable::CallSettings::pipeline).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    pub(crate) fn new(stages: Vec<Stage>) -> Self {
        Self { stages }
    }

    /// Stages, innermost first.
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn max_attempts(&self) -> Option<u32> {
        self.stages.iter().find_map(|s| match s {
            Stage::Retry { max_attempts } => Some(*max_attempts),
            _ => None,
        })
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.stages.iter().find_map(|s| match s {
            Stage::Timeout { timeout } => Some(*timeout),
            _ => None,
        })
    }

    pub fn page_descriptor(&self) -> Option<&PageDescriptor> {
        self.stages.iter().find_map(|s| match s {
            Stage::PageStream { descriptor } => Some(descriptor),
            _ => None,
        })
    }

    /// Run a unary call through the retry and timeout stages.
    pub async fn invoke<C, Req>(
        &self,
        call: &C,
        request: Req,
    ) -> Result<C::Response, CallError<C::Error>>
    where
        C: ApiCall<Req>,
        Req: Clone + Send + 'static,
    {
        if self.page_descriptor().is_some() {
            return Err(ConfigError::PageStreamingEnabled.into());
        }
        let timeout = self.timeout().ok_or(ConfigError::MissingTimeout)?;
        let result = match self.max_attempts() {
            Some(n) => WithTimeout::new(Retrying::new(call, n), timeout).invoke(request).await,
            None => WithTimeout::new(call, timeout).invoke(request).await,
        };
        result.map_err(CallError::Rpc)
    }

    /// Run a page-streaming call through every stage.
    pub fn stream<'a, C, Req, Resp>(
        &self,
        call: &'a C,
        request: Req,
    ) -> Result<BoxStream<'a, Result<Resp::Resource, CallError<C::Error>>>, ConfigError>
    where
        C: ApiCall<Req, Response = Resp>,
        Req: PageRequest<Resp::Token> + Clone + Send + 'static,
        Resp: PageResponse + Send + 'a,
    {
        let descriptor = self
            .page_descriptor()
            .cloned()
            .ok_or(ConfigError::PageStreamingDisabled)?;
        let timeout = self.timeout().ok_or(ConfigError::MissingTimeout)?;
        let stream = match self.max_attempts() {
            Some(n) => PageStreamer::new(WithTimeout::new(Retrying::new(call, n), timeout), descriptor)
                .stream(request),
            None => PageStreamer::new(WithTimeout::new(call, timeout), descriptor).stream(request),
        };
        Ok(stream)
    }
}

impl std::fmt::Display for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, stage) in self.stages.iter().enumerate() {
            if i > 0 {
                f.write_str(" → ")?;
            }
            write!(f, "{stage}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callable::settings::CallSettings;

    #[test]
    fn unary_order() {
        let settings = CallSettings {
            timeout: Some(Duration::from_secs(5)),
            is_retrying: true,
            max_attempts: Some(3),
            ..Default::default()
        };
        let pipeline = settings.pipeline().unwrap();
        assert_eq!(
            pipeline.stages(),
            &[
                Stage::Retry { max_attempts: 3 },
                Stage::Timeout {
                    timeout: Duration::from_secs(5)
                },
            ]
        );
        assert_eq!(pipeline.to_string(), "retry(max_attempts=3) → timeout(5s)");
    }

    #[test]
    fn paged_order() {
        let descriptor = PageDescriptor::new("page_token", "next_page_token", "books");
        let settings = CallSettings {
            timeout: Some(Duration::from_secs(5)),
            page_descriptor: Some(descriptor.clone()),
            ..Default::default()
        };
        let pipeline = settings.pipeline().unwrap();
        assert_eq!(
            pipeline.stages(),
            &[
                Stage::Timeout {
                    timeout: Duration::from_secs(5)
                },
                Stage::PageStream { descriptor },
            ]
        );
        assert_eq!(pipeline.max_attempts(), None);
    }
}
