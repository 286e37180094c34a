//! The `ApiCall` trait: one raw network request with a trailing timeout.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::status::RpcError;

/// A raw RPC: issues exactly one request and honours the given timeout.
///
/// This is what the transport collaborator hands to [`ApiCallable`]; the
/// decorators in this module never look inside it.
///
/// [`ApiCallable`]: crate::callable::ApiCallable
#[async_trait]
pub trait ApiCall<Req>: Send + Sync
where
    Req: Send + 'static,
{
    type Response: Send;
    type Error: RpcError;

    /// Send `request`, giving the transport `timeout` to complete it.
    async fn call(&self, request: Req, timeout: Duration) -> Result<Self::Response, Self::Error>;
}

#[async_trait]
impl<'a, Req, C> ApiCall<Req> for &'a C
where
    C: ApiCall<Req> + ?Sized,
    Req: Send + 'static,
{
    type Response = C::Response;
    type Error = C::Error;

    async fn call(&self, request: Req, timeout: Duration) -> Result<Self::Response, Self::Error> {
        (**self).call(request, timeout).await
    }
}

#[async_trait]
impl<Req, C> ApiCall<Req> for Arc<C>
where
    C: ApiCall<Req> + ?Sized,
    Req: Send + 'static,
{
    type Response = C::Response;
    type Error = C::Error;

    async fn call(&self, request: Req, timeout: Duration) -> Result<Self::Response, Self::Error> {
        (**self).call(request, timeout).await
    }
}

/// Adapter turning an async closure into an [`ApiCall`].
pub struct FnCall<F, Req> {
    f: F,
    _request: PhantomData<fn(Req)>,
}

/// Wrap `f(request, timeout)` as an [`ApiCall`].
pub fn from_fn<F, Req, Fut, Resp, E>(f: F) -> FnCall<F, Req>
where
    F: Fn(Req, Duration) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Resp, E>> + Send + 'static,
{
    FnCall {
        f,
        _request: PhantomData,
    }
}

#[async_trait]
impl<F, Req, Fut, Resp, E> ApiCall<Req> for FnCall<F, Req>
where
    F: Fn(Req, Duration) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Resp, E>> + Send + 'static,
    Req: Send + 'static,
    Resp: Send + 'static,
    E: RpcError,
{
    type Response = Resp;
    type Error = E;

    async fn call(&self, request: Req, timeout: Duration) -> Result<Resp, E> {
        (self.f)(request, timeout).await
    }
}
