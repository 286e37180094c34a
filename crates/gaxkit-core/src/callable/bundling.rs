//! Request bundling: batches many small requests into one call.
//!
//! Requests that share a [`BundleId`] are collected into a pending bundle.
//! Each one contributes the value of its `bundled_field`; when the bundle is
//! flushed those values are sent together as an array in that field of the
//! first request. A bundle is flushed when it reaches the message count or
//! byte size threshold, or when its delay timer fires.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::callable::call::ApiCall;
use crate::callable::timeout::WithTimeout;
use crate::error::FieldError;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// When a pending bundle is sent. A zero threshold is disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BundleOptions {
    /// Send once this many messages are pending.
    pub message_count_threshold: usize,
    /// Send once the pending messages reach this many bytes.
    pub message_bytesize_threshold: usize,
    /// Send this long after the first message of a bundle arrives.
    pub delay_threshold: Duration,
}

impl BundleOptions {
    /// Count threshold actually applied. With every threshold disabled each
    /// message is sent on its own.
    pub fn effective_count_threshold(&self) -> usize {
        if self.message_count_threshold == 0
            && self.message_bytesize_threshold == 0
            && self.delay_threshold.is_zero()
        {
            1
        } else {
            self.message_count_threshold
        }
    }
}

/// Identifies the bundle a request belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BundleId(pub Vec<Option<String>>);

impl From<&str> for BundleId {
    fn from(id: &str) -> Self {
        Self(vec![Some(id.to_string())])
    }
}

impl fmt::Display for BundleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<&str> = self
            .0
            .iter()
            .map(|part| part.as_deref().unwrap_or("null"))
            .collect();
        write!(f, "({})", parts.join(", "))
    }
}

/// Compute a bundle id from the discriminator fields of `request`.
///
/// Fields may be dotted paths into nested objects. Each element of the id is
/// the field's value as a string, or `None` for JSON `null`.
pub fn compute_bundle_id(request: &Value, fields: &[&str]) -> Result<BundleId, FieldError> {
    fields
        .iter()
        .map(|path| -> Result<Option<String>, FieldError> {
            let mut value = request;
            for part in path.split('.') {
                let obj = value.as_object().ok_or_else(|| FieldError::NotAnObject {
                    field: path.to_string(),
                })?;
                value = obj.get(part).ok_or_else(|| FieldError::Missing {
                    field: path.to_string(),
                })?;
            }
            Ok(match value {
                Value::Null => None,
                Value::String(s) => Some(s.clone()),
                other => Some(other.to_string()),
            })
        })
        .collect::<Result<_, _>>()
        .map(BundleId)
}

type Outcome<C> = Result<<C as ApiCall<Value>>::Response, <C as ApiCall<Value>>::Error>;
type Inbox = Arc<Mutex<Vec<(u64, Value)>>>;

/// One pending bundle.
pub struct Task<C: ApiCall<Value>> {
    call: WithTimeout<C>,
    bundle_id: BundleId,
    bundled_field: String,
    request: Value,
    inbox: Inbox,
    next_id: u64,
    outcome: watch::Sender<Option<Outcome<C>>>,
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

impl<C: ApiCall<Value>> Task<C> {
    /// A bundle sent as `request`, with the collected messages in `bundled_field`.
    pub fn new(
        call: WithTimeout<C>,
        bundle_id: BundleId,
        bundled_field: impl Into<String>,
        request: Value,
    ) -> Self {
        let (outcome, _) = watch::channel(None);
        Self {
            call,
            bundle_id,
            bundled_field: bundled_field.into(),
            request,
            inbox: Arc::default(),
            next_id: 0,
            outcome,
            generation: 0,
            timer: None,
        }
    }

    pub fn bundle_id(&self) -> &BundleId {
        &self.bundle_id
    }

    pub fn message_count(&self) -> usize {
        lock(&self.inbox).len()
    }

    /// Total size of the pending messages. Strings count their UTF-8 length,
    /// other values the length of their JSON text.
    pub fn message_bytesize(&self) -> usize {
        lock(&self.inbox)
            .iter()
            .map(|(_, msg)| match msg {
                Value::String(s) => s.len(),
                other => other.to_string().len(),
            })
            .sum()
    }

    /// Add `message` to the bundle and return its id within the bundle.
    pub fn append(&mut self, message: Value) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        lock(&self.inbox).push((id, message));
        id
    }

    /// A handle that withdraws message `id` while the bundle is still pending.
    pub fn canceller_for(&self, id: u64) -> Canceller {
        Canceller {
            inbox: Arc::clone(&self.inbox),
            id,
        }
    }

    /// A handle to the outcome of the bundled call.
    pub fn subscribe(&self) -> BundleHandle<C::Response, C::Error> {
        BundleHandle {
            rx: self.outcome.subscribe(),
        }
    }

    /// Send the pending messages as one call. An empty bundle sends nothing.
    pub async fn run(self) {
        let messages: Vec<Value> = std::mem::take(&mut *lock(&self.inbox))
            .into_iter()
            .map(|(_, msg)| msg)
            .collect();
        if messages.is_empty() {
            tracing::debug!(bundle_id = %self.bundle_id, "bundle emptied before sending");
            return;
        }

        let count = messages.len();
        let mut request = self.request;
        if let Some(obj) = request.as_object_mut() {
            obj.insert(self.bundled_field.clone(), Value::Array(messages));
        }
        tracing::debug!(bundle_id = %self.bundle_id, messages = count, "sending bundle");

        let outcome = self.call.invoke(request).await;
        if let Err(e) = &outcome {
            tracing::warn!(bundle_id = %self.bundle_id, error = %e, "bundled call failed");
        }
        self.outcome.send_replace(Some(outcome));
    }
}

/// Withdraws one message from a pending bundle.
#[derive(Clone)]
pub struct Canceller {
    inbox: Inbox,
    id: u64,
}

impl Canceller {
    /// Returns `true` if the message was removed, `false` if it was already
    /// sent or withdrawn.
    pub fn cancel(&self) -> bool {
        let mut inbox = lock(&self.inbox);
        match inbox.iter().position(|(id, _)| *id == self.id) {
            Some(pos) => {
                inbox.remove(pos);
                true
            }
            None => false,
        }
    }
}

/// Receives the outcome of the call a message was bundled into.
pub struct BundleHandle<R, E> {
    rx: watch::Receiver<Option<Result<R, E>>>,
}

impl<R: Clone, E: Clone> BundleHandle<R, E> {
    /// The outcome, if the bundle has been sent.
    pub fn try_outcome(&self) -> Option<Result<R, E>> {
        self.rx.borrow().clone()
    }

    /// Wait for the bundle to be sent. Returns `None` if it was dropped
    /// without sending, e.g. because every message was cancelled.
    pub async fn wait(mut self) -> Option<Result<R, E>> {
        self.rx
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|outcome| outcome.clone())
    }
}

/// Groups scheduled requests into bundles and sends them.
pub struct Executor<C: ApiCall<Value>> {
    options: BundleOptions,
    tasks: Arc<Mutex<HashMap<BundleId, Task<C>>>>,
    generations: AtomicU64,
}

impl<C> Executor<C>
where
    C: ApiCall<Value> + 'static,
    C::Response: Clone + Sync + 'static,
    C::Error: Clone,
{
    pub fn new(options: BundleOptions) -> Self {
        Self {
            options,
            tasks: Arc::default(),
            generations: AtomicU64::new(0),
        }
    }

    pub fn options(&self) -> &BundleOptions {
        &self.options
    }

    /// Number of bundles waiting to be sent.
    pub fn pending_bundles(&self) -> usize {
        lock(&self.tasks).len()
    }

    /// Add the `bundled_field` value of `request` to the bundle `bundle_id`.
    ///
    /// If this message fills the bundle it is sent before returning and no
    /// canceller is given. Otherwise the canceller can withdraw the message
    /// until the bundle goes out.
    pub async fn schedule(
        &self,
        call: WithTimeout<C>,
        bundle_id: BundleId,
        bundled_field: &str,
        request: Value,
    ) -> Result<(BundleHandle<C::Response, C::Error>, Option<Canceller>), FieldError> {
        let message = request
            .as_object()
            .ok_or_else(|| FieldError::NotAnObject {
                field: bundled_field.to_string(),
            })?
            .get(bundled_field)
            .cloned()
            .ok_or_else(|| FieldError::Missing {
                field: bundled_field.to_string(),
            })?;

        let (handle, full, canceller) = {
            let mut tasks = lock(&self.tasks);
            let task = tasks
                .entry(bundle_id.clone())
                .or_insert_with(|| self.start_task(call, bundle_id.clone(), bundled_field, request));
            let id = task.append(message);
            let handle = task.subscribe();

            if self.is_full(task) {
                let mut task = tasks.remove(&bundle_id);
                if let Some(timer) = task.as_mut().and_then(|t| t.timer.take()) {
                    timer.abort();
                }
                (handle, task, None)
            } else {
                (handle, None, Some(task.canceller_for(id)))
            }
        };

        if let Some(task) = full {
            task.run().await;
        }
        Ok((handle, canceller))
    }

    fn is_full(&self, task: &Task<C>) -> bool {
        let count = self.options.effective_count_threshold();
        let bytes = self.options.message_bytesize_threshold;
        (count > 0 && task.message_count() >= count)
            || (bytes > 0 && task.message_bytesize() >= bytes)
    }

    fn start_task(
        &self,
        call: WithTimeout<C>,
        bundle_id: BundleId,
        bundled_field: &str,
        request: Value,
    ) -> Task<C> {
        let mut task = Task::new(call, bundle_id, bundled_field, request);
        task.generation = self.generations.fetch_add(1, Ordering::Relaxed);

        let delay = self.options.delay_threshold;
        if !delay.is_zero() {
            let tasks = Arc::clone(&self.tasks);
            let bundle_id = task.bundle_id.clone();
            let generation = task.generation;
            task.timer = Some(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                // A bundle flushed early may have been replaced under the same id.
                let due = {
                    let mut tasks = lock(&tasks);
                    if tasks.get(&bundle_id).map(|t| t.generation) == Some(generation) {
                        tasks.remove(&bundle_id)
                    } else {
                        None
                    }
                };
                if let Some(task) = due {
                    tracing::trace!(%bundle_id, "bundle delay elapsed");
                    task.run().await;
                }
            }));
        }
        task
    }
}
