//! Immediate retry of transient call failures.
//!
//! No delay is applied between attempts. Backoff belongs to the transport or
//! to the polling loop of a [`PollingFuture`](crate::future::PollingFuture).

use std::time::Duration;

use async_trait::async_trait;

use crate::callable::call::ApiCall;
use crate::status::RpcError;

/// Retries the inner call on [`RpcError::is_retryable`] errors.
///
/// `max_attempts` counts the first attempt, so `1` never retries. Once the
/// budget is spent the error from the final attempt is returned as-is.
/// Non-retryable errors are returned on first occurrence.
#[derive(Debug, Clone, Copy)]
pub struct Retrying<C> {
    inner: C,
    max_attempts: u32,
}

impl<C> Retrying<C> {
    pub fn new(inner: C, max_attempts: u32) -> Self {
        Self {
            inner,
            max_attempts,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

#[async_trait]
impl<Req, C> ApiCall<Req> for Retrying<C>
where
    C: ApiCall<Req>,
    Req: Clone + Send + 'static,
{
    type Response = C::Response;
    type Error = C::Error;

    async fn call(&self, request: Req, timeout: Duration) -> Result<Self::Response, Self::Error> {
        let mut attempt_count = 0u32;
        loop {
            match self.inner.call(request.clone(), timeout).await {
                Ok(resp) => return Ok(resp),
                Err(e) if e.is_retryable() => {
                    attempt_count += 1;
                    if attempt_count < self.max_attempts {
                        tracing::debug!(
                            attempt = attempt_count,
                            max_attempts = self.max_attempts,
                            code = %e.code(),
                            error = %e,
                            "retrying call"
                        );
                        continue;
                    }
                    tracing::warn!(
                        attempts = attempt_count,
                        code = %e.code(),
                        error = %e,
                        "max attempts exceeded"
                    );
                    return Err(e);
                }
                Err(e) => return Err(e),
            }
        }
    }
}
