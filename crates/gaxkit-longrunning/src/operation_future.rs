//! `OperationFuture`: a polling future backed by the operations service.

use std::marker::PhantomData;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use gaxkit_core::{
    Code, FutureError, OperationControl, PollBackoff, Poller, PollingFuture, Status,
};

use crate::operation::{Operation, OperationResult, OperationsClient};

/// Refreshes the cached operation and completes the future when it finishes.
struct OperationPoller<T> {
    operation: Mutex<Operation>,
    client: Arc<dyn OperationsClient>,
    _result: PhantomData<fn() -> T>,
}

impl<T> OperationPoller<T>
where
    T: DeserializeOwned + Clone + Send + 'static,
{
    fn snapshot(&self) -> Operation {
        self.operation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Latest operation state. Finished operations are never re-fetched.
    async fn refresh(
        &self,
        future: &PollingFuture<T, Status>,
        timeout: Option<Duration>,
    ) -> Result<Operation, Status> {
        let current = self.snapshot();
        if current.done {
            return Ok(current);
        }

        let latest = self.client.get_operation(&current.name, timeout).await?;
        *self.operation.lock().unwrap_or_else(PoisonError::into_inner) = latest.clone();
        complete_from(future, &latest);
        Ok(latest)
    }
}

/// Set the future's outcome from a finished operation, once.
fn complete_from<T>(future: &PollingFuture<T, Status>, operation: &Operation)
where
    T: DeserializeOwned + Clone + Send + 'static,
{
    if !operation.done || future.done() {
        return;
    }

    let completed = match &operation.result {
        Some(OperationResult::Response(value)) => match serde_json::from_value::<T>(value.clone()) {
            Ok(result) => future.set_result(result),
            Err(e) => future.set_exception(Status::new(
                Code::Internal,
                format!("could not decode operation response: {e}"),
            )),
        },
        Some(OperationResult::Error(status)) => future.set_exception(status.clone()),
        None => future.set_exception(Status::new(Code::Unknown, "Unknown operation error")),
    };

    match completed {
        Ok(()) => tracing::debug!(operation = %operation.name, "operation finished"),
        Err(_) => tracing::debug!(
            operation = %operation.name,
            "operation future was completed concurrently"
        ),
    }
}

#[async_trait]
impl<T> Poller<T, Status> for OperationPoller<T>
where
    T: DeserializeOwned + Clone + Send + 'static,
{
    async fn poll_once(
        &self,
        future: &PollingFuture<T, Status>,
        timeout: Option<Duration>,
    ) -> Result<(), Status> {
        let operation = self.refresh(future, timeout).await?;
        if !operation.done {
            return Err(Status::new(Code::DeadlineExceeded, "Operation not complete"));
        }
        Ok(())
    }

    fn poll_retry_codes(&self) -> &[Code] {
        &[Code::DeadlineExceeded]
    }
}

/// A future for a server-side long-running operation.
///
/// The response is decoded into `T` once the operation finishes; an
/// operation error becomes the future's exception.
pub struct OperationFuture<T> {
    poller: Arc<OperationPoller<T>>,
    future: PollingFuture<T, Status>,
}

impl<T> OperationFuture<T>
where
    T: DeserializeOwned + Clone + Send + 'static,
{
    pub fn new(operation: Operation, client: Arc<dyn OperationsClient>) -> Self {
        Self::with_backoff(operation, client, PollBackoff::default())
    }

    pub fn with_backoff(
        operation: Operation,
        client: Arc<dyn OperationsClient>,
        backoff: PollBackoff,
    ) -> Self {
        let poller = Arc::new(OperationPoller {
            operation: Mutex::new(operation.clone()),
            client,
            _result: PhantomData,
        });
        let shared: Arc<dyn Poller<T, Status>> = poller.clone();
        let future = PollingFuture::with_backoff(shared, backoff);
        complete_from(&future, &operation);
        Self { poller, future }
    }

    /// The most recently fetched operation.
    pub fn operation(&self) -> Operation {
        self.poller.snapshot()
    }

    /// Decode the current operation metadata, if any.
    pub fn metadata<M: DeserializeOwned>(&self) -> Result<Option<M>, serde_json::Error> {
        self.poller
            .snapshot()
            .metadata
            .map(serde_json::from_value)
            .transpose()
    }

    /// The underlying polling future.
    pub fn polling_future(&self) -> &PollingFuture<T, Status> {
        &self.future
    }

    pub async fn result(&self, timeout: Option<Duration>) -> Result<T, FutureError<Status>> {
        self.future.result(timeout).await
    }

    pub async fn exception(
        &self,
        timeout: Option<Duration>,
    ) -> Result<Option<Status>, FutureError<Status>> {
        self.future.exception(timeout).await
    }

    /// See [`PollingFuture::add_done_callback`].
    pub fn add_done_callback<F>(&self, callback: F)
    where
        F: FnOnce(&PollingFuture<T, Status>) + Send + 'static,
    {
        self.future.add_done_callback(callback);
    }
}

#[async_trait]
impl<T> OperationControl for OperationFuture<T>
where
    T: DeserializeOwned + Clone + Send + 'static,
{
    type Error = Status;

    async fn cancel(&self) -> Result<bool, Status> {
        if OperationControl::done(self).await? {
            return Ok(false);
        }
        let name = self.poller.snapshot().name;
        self.poller.client.cancel_operation(&name).await?;
        tracing::info!(operation = %name, "requested operation cancellation");
        Ok(true)
    }

    async fn cancelled(&self) -> Result<bool, Status> {
        let operation = self.poller.refresh(&self.future, None).await?;
        Ok(operation
            .error()
            .is_some_and(|status| status.code == Code::Cancelled))
    }

    /// Refreshes the operation from the server unless it already finished.
    async fn done(&self) -> Result<bool, Status> {
        Ok(self.poller.refresh(&self.future, None).await?.done)
    }
}

impl<T> std::fmt::Debug for OperationFuture<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationFuture")
            .field("future", &self.future)
            .finish_non_exhaustive()
    }
}
