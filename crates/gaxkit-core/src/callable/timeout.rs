//! Timeout injection: binds a fixed timeout as the trailing call argument.

use std::time::Duration;

use crate::callable::call::ApiCall;

/// A call with its timeout already bound.
///
/// Every invocation passes the same full timeout, so each retry attempt and
/// each page fetch gets its own budget rather than sharing one.
#[derive(Debug, Clone, Copy)]
pub struct WithTimeout<C> {
    inner: C,
    timeout: Duration,
}

impl<C> WithTimeout<C> {
    pub fn new(inner: C, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Call the inner function with `request` and the bound timeout.
    pub async fn invoke<Req>(&self, request: Req) -> Result<C::Response, C::Error>
    where
        C: ApiCall<Req>,
        Req: Send + 'static,
    {
        self.inner.call(request, self.timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callable::call::from_fn;
    use crate::status::Status;

    #[tokio::test]
    async fn appends_timeout() {
        let echo = from_fn(|req: u32, timeout: Duration| async move {
            Ok::<_, Status>((req, timeout))
        });
        let timed = WithTimeout::new(&echo, Duration::from_secs(7));

        assert_eq!(timed.invoke(3).await.unwrap(), (3, Duration::from_secs(7)));
        assert_eq!(timed.invoke(4).await.unwrap(), (4, Duration::from_secs(7)));
    }
}
