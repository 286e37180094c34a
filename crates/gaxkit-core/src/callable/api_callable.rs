//! `ApiCallable`: a raw call plus the settings that decorate it.

use futures::stream::BoxStream;

use crate::callable::call::ApiCall;
use crate::callable::page::{PageRequest, PageResponse};
use crate::callable::pipeline::Pipeline;
use crate::callable::settings::{CallDefaults, CallSettings};
use crate::error::{CallError, ConfigError};

/// A raw API call decorated with timeout, retry and page streaming.
///
/// Settings are resolved each time the callable is used, so a callable can be
/// built before every setting it needs is known.
pub struct ApiCallable<C> {
    call: C,
    settings: CallSettings,
}

impl<C> ApiCallable<C> {
    pub fn new(call: C, settings: CallSettings) -> Self {
        Self { call, settings }
    }

    /// A callable for an idempotent method.
    ///
    /// Retry follows `is_retrying` if given, else the idempotent retry policy
    /// of `settings.defaults`. The flag already in `settings` is replaced.
    pub fn idempotent(
        call: C,
        is_retrying: Option<bool>,
        mut settings: CallSettings,
    ) -> Result<Self, ConfigError> {
        settings.is_retrying =
            CallSettings::idempotent(is_retrying, settings.defaults.clone())?.is_retrying;
        Ok(Self::new(call, settings))
    }

    pub fn settings(&self) -> &CallSettings {
        &self.settings
    }

    /// The stages that will wrap the next invocation.
    pub fn pipeline(&self) -> Result<Pipeline, ConfigError> {
        self.settings.pipeline()
    }

    /// Issue a unary call.
    ///
    /// Errors with [`ConfigError::PageStreamingEnabled`] when the settings
    /// carry a page descriptor.
    pub async fn call<Req>(&self, request: Req) -> Result<C::Response, CallError<C::Error>>
    where
        C: ApiCall<Req>,
        Req: Clone + Send + 'static,
    {
        let pipeline = self.pipeline()?;
        pipeline.invoke(&self.call, request).await
    }

    /// Stream the resources of a paginated call, fetching pages on demand.
    ///
    /// Errors with [`ConfigError::PageStreamingDisabled`] when the settings
    /// carry no page descriptor.
    pub fn stream<Req, Resp>(
        &self,
        request: Req,
    ) -> Result<BoxStream<'_, Result<Resp::Resource, CallError<C::Error>>>, ConfigError>
    where
        C: ApiCall<Req, Response = Resp>,
        Req: PageRequest<Resp::Token> + Clone + Send + 'static,
        Resp: PageResponse + Send + 'static,
    {
        let pipeline = self.pipeline()?;
        let stream = pipeline.stream(&self.call, request)?;
        tracing::debug!(%pipeline, "streaming pages");
        Ok(stream)
    }
}
