//! A future whose completion is discovered by polling.
//!
//! State machine:
//! - `Pending` → `Done`: exactly once, via [`PollingFuture::set_result`] or
//!   [`PollingFuture::set_exception`] (called by a producer or by the poller)
//!
//! Waiting with [`PollingFuture::result`] polls directly in the calling task.
//! Registering a callback while pending starts one background task that polls
//! until the future is done. The task runs on the Tokio runtime the future was
//! created in, so callbacks may be registered from any thread.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::{FutureError, InvalidStateError};
use crate::future::backoff::PollBackoff;
use crate::status::{Code, RpcError};

/// The status check a concrete future variant performs.
#[async_trait]
pub trait Poller<T, E>: Send + Sync + 'static {
    /// Check the operation once.
    ///
    /// When the operation has finished, call [`PollingFuture::set_result`] or
    /// [`PollingFuture::set_exception`] on `future`. While it has not, return
    /// an error whose code is in [`Poller::poll_retry_codes`]. Any other error
    /// aborts the current wait and leaves the future pending.
    ///
    /// `timeout` is the time left before the caller stops waiting, if bounded.
    async fn poll_once(
        &self,
        future: &PollingFuture<T, E>,
        timeout: Option<Duration>,
    ) -> Result<(), E>;

    /// Codes meaning "not finished yet, poll again later".
    fn poll_retry_codes(&self) -> &[Code];
}

/// Listener called once with the future when it becomes done.
pub type DoneCallback<T, E> = Box<dyn FnOnce(&PollingFuture<T, E>) + Send + 'static>;

enum Outcome<T, E> {
    Result(T),
    Exception(E),
}

struct State<T, E> {
    outcome: Option<Outcome<T, E>>,
    callbacks: Vec<DoneCallback<T, E>>,
    polling_task: Option<JoinHandle<()>>,
}

struct Shared<T, E> {
    state: Mutex<State<T, E>>,
    done_tx: watch::Sender<bool>,
    poller: Arc<dyn Poller<T, E>>,
    backoff: PollBackoff,
    runtime: Option<Handle>,
}

/// Handle to a polled operation. Clones share the same state.
pub struct PollingFuture<T, E> {
    shared: Arc<Shared<T, E>>,
}

impl<T, E> Clone for PollingFuture<T, E> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T, E> std::fmt::Debug for PollingFuture<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("PollingFuture")
            .field("done", &state.outcome.is_some())
            .field("callbacks", &state.callbacks.len())
            .finish_non_exhaustive()
    }
}

impl<T, E> PollingFuture<T, E> {
    fn lock(&self) -> MutexGuard<'_, State<T, E>> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns `true` once a result or exception has been set.
    pub fn done(&self) -> bool {
        self.lock().outcome.is_some()
    }

    pub fn running(&self) -> bool {
        !self.done()
    }

    /// Returns `true` while a background polling task is alive.
    pub fn is_polling(&self) -> bool {
        self.lock()
            .polling_task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }
}

impl<T, E> PollingFuture<T, E>
where
    T: Clone + Send + 'static,
    E: RpcError + Clone,
{
    pub fn new(poller: Arc<dyn Poller<T, E>>) -> Self {
        Self::with_backoff(poller, PollBackoff::default())
    }

    pub fn with_backoff(poller: Arc<dyn Poller<T, E>>, backoff: PollBackoff) -> Self {
        let (done_tx, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    outcome: None,
                    callbacks: Vec::new(),
                    polling_task: None,
                }),
                done_tx,
                poller,
                backoff,
                runtime: Handle::try_current().ok(),
            }),
        }
    }

    /// Complete the future with a value.
    pub fn set_result(&self, value: T) -> Result<(), InvalidStateError> {
        self.complete(Outcome::Result(value))
    }

    /// Complete the future with an error.
    pub fn set_exception(&self, error: E) -> Result<(), InvalidStateError> {
        self.complete(Outcome::Exception(error))
    }

    fn complete(&self, outcome: Outcome<T, E>) -> Result<(), InvalidStateError> {
        let callbacks = {
            let mut state = self.lock();
            if state.outcome.is_some() {
                return Err(InvalidStateError);
            }
            state.outcome = Some(outcome);
            std::mem::take(&mut state.callbacks)
        };
        self.shared.done_tx.send_replace(true);
        tracing::debug!(callbacks = callbacks.len(), "future done");

        for callback in callbacks {
            invoke_callback(callback, self);
        }
        Ok(())
    }

    /// Call `callback` with this future once it is done.
    ///
    /// A done future runs the callback before this returns. A pending future
    /// queues it and makes sure a background task is polling. The task is
    /// spawned on the runtime captured at construction, else on the caller's.
    /// With neither, the callback waits for an explicit `set_result` or
    /// `set_exception`.
    pub fn add_done_callback<F>(&self, callback: F)
    where
        F: FnOnce(&PollingFuture<T, E>) + Send + 'static,
    {
        {
            let mut state = self.lock();
            if state.outcome.is_none() {
                self.ensure_polling_task(&mut state);
                state.callbacks.push(Box::new(callback));
                return;
            }
        }
        invoke_callback(Box::new(callback), self);
    }

    fn ensure_polling_task(&self, state: &mut State<T, E>) {
        if let Some(task) = &state.polling_task {
            if !task.is_finished() {
                return;
            }
        }
        let Some(runtime) = self
            .shared
            .runtime
            .clone()
            .or_else(|| Handle::try_current().ok())
        else {
            tracing::warn!("no Tokio runtime available, background polling not started");
            return;
        };
        let future = self.clone();
        state.polling_task = Some(runtime.spawn(async move {
            if let Err(e) = future.poll_until_done(None).await {
                tracing::warn!(code = %e.code(), error = %e, "background polling stopped");
            }
        }));
        tracing::debug!("started background polling");
    }

    /// The outcome, if the future is done. Never polls.
    pub fn try_result(&self) -> Option<Result<T, E>> {
        match &self.lock().outcome {
            None => None,
            Some(Outcome::Result(value)) => Some(Ok(value.clone())),
            Some(Outcome::Exception(error)) => Some(Err(error.clone())),
        }
    }

    /// Wait for the result, polling as needed.
    ///
    /// A stored exception is returned as [`FutureError::Failed`].
    pub async fn result(&self, timeout: Option<Duration>) -> Result<T, FutureError<E>> {
        self.wait(timeout).await?.map_err(FutureError::Failed)
    }

    /// Wait for completion and return the exception, if any.
    pub async fn exception(&self, timeout: Option<Duration>) -> Result<Option<E>, FutureError<E>> {
        Ok(self.wait(timeout).await?.err())
    }

    async fn wait(&self, timeout: Option<Duration>) -> Result<Result<T, E>, FutureError<E>> {
        if let Some(outcome) = self.try_result() {
            return Ok(outcome);
        }
        let polled = match timeout {
            Some(limit) => {
                let deadline = Instant::now() + limit;
                tokio::time::timeout(limit, self.poll_until_done(Some(deadline)))
                    .await
                    .map_err(|_| FutureError::Timeout { waited: limit })?
            }
            None => self.poll_until_done(None).await,
        };
        polled.map_err(FutureError::Poll)
    }

    async fn poll_until_done(&self, deadline: Option<Instant>) -> Result<Result<T, E>, E> {
        let mut done_rx = self.shared.done_tx.subscribe();
        let mut attempt = 0u32;
        loop {
            if let Some(outcome) = self.try_result() {
                return Ok(outcome);
            }

            attempt += 1;
            let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
            let polled = self.shared.poller.poll_once(self, remaining).await;
            if let Some(outcome) = self.try_result() {
                return Ok(outcome);
            }

            match polled {
                Ok(()) => tracing::debug!(attempt, "poll returned without completing the future"),
                Err(e) if self.shared.poller.poll_retry_codes().contains(&e.code()) => {
                    tracing::trace!(attempt, code = %e.code(), "operation not complete");
                }
                Err(e) => return Err(e),
            }

            let delay = self.shared.backoff.delay(attempt);
            tracing::trace!(attempt, delay_ms = delay.as_millis() as u64, "waiting before next poll");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = done_rx.changed() => {}
            }
        }
    }
}

fn invoke_callback<T, E>(callback: DoneCallback<T, E>, future: &PollingFuture<T, E>) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| callback(future))) {
        tracing::error!(
            panic = panic_message(payload.as_ref()),
            "error while executing future callback"
        );
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        *s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
