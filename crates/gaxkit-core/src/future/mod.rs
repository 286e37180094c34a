//! Polling futures for operations that finish outside the client.

pub mod backoff;
pub mod polling;

use async_trait::async_trait;

use crate::status::RpcError;

pub use backoff::PollBackoff;
pub use polling::{DoneCallback, PollingFuture, Poller};

/// Cancellation and status queries a concrete future variant supports.
///
/// What cancelling means is up to the variant; a [`PollingFuture`] only
/// guarantees the result, exception and callback contract once done.
#[async_trait]
pub trait OperationControl: Send + Sync {
    type Error: RpcError;

    /// Request cancellation. Returns `false` if the operation already finished.
    async fn cancel(&self) -> Result<bool, Self::Error>;

    async fn cancelled(&self) -> Result<bool, Self::Error>;

    async fn done(&self) -> Result<bool, Self::Error>;

    async fn running(&self) -> Result<bool, Self::Error> {
        Ok(!self.done().await?)
    }
}
