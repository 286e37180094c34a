//! Integration tests for `OperationFuture` against a scripted operations service.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use gaxkit_core::{Code, FutureError, OperationControl, Status};
use gaxkit_longrunning::{Operation, OperationFuture, OperationResult, OperationsClient};

// ─── Helpers ──────────────────────────────────────────────────────────────────

const NAME: &str = "operations/7";

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct Bucket {
    name: String,
    size: u64,
}

#[derive(Debug, Deserialize)]
struct Progress {
    percent: u32,
}

/// Replays scripted operation states. The last state repeats forever.
#[derive(Default)]
struct ScriptedClient {
    states: Mutex<VecDeque<Operation>>,
    fetches: Mutex<u32>,
    cancelled: Mutex<Vec<String>>,
}

impl ScriptedClient {
    fn new(states: impl IntoIterator<Item = Operation>) -> Arc<Self> {
        Arc::new(Self {
            states: Mutex::new(states.into_iter().collect()),
            ..Default::default()
        })
    }

    fn empty() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn fetches(&self) -> u32 {
        *self.fetches.lock().unwrap()
    }
}

#[async_trait]
impl OperationsClient for ScriptedClient {
    async fn get_operation(
        &self,
        name: &str,
        _timeout: Option<Duration>,
    ) -> Result<Operation, Status> {
        *self.fetches.lock().unwrap() += 1;
        let mut states = self.states.lock().unwrap();
        let next = if states.len() > 1 {
            states.pop_front()
        } else {
            states.front().cloned()
        };
        next.ok_or_else(|| Status::new(Code::NotFound, format!("no such operation {name}")))
    }

    async fn cancel_operation(&self, name: &str) -> Result<(), Status> {
        self.cancelled.lock().unwrap().push(name.to_owned());
        Ok(())
    }
}

fn succeeded(response: Value) -> Operation {
    Operation {
        name: NAME.into(),
        done: true,
        metadata: None,
        result: Some(OperationResult::Response(response)),
    }
}

fn failed(code: Code, message: &str) -> Operation {
    Operation {
        name: NAME.into(),
        done: true,
        metadata: None,
        result: Some(OperationResult::Error(Status::new(code, message))),
    }
}

fn bucket() -> Bucket {
    Bucket {
        name: "photos".into(),
        size: 12,
    }
}

// ─── Construction and status ──────────────────────────────────────────────────

#[tokio::test]
async fn construction_does_not_contact_the_service() {
    let client = ScriptedClient::new([Operation::pending(NAME)]);
    let future = OperationFuture::<Bucket>::new(Operation::pending(NAME), client.clone());

    assert!(!future.polling_future().done());
    assert_eq!(client.fetches(), 0);

    assert!(future.running().await.unwrap());
    assert_eq!(client.fetches(), 1);
}

#[tokio::test]
async fn initially_finished_operation_needs_no_rpc() {
    let client = ScriptedClient::empty();
    let done = succeeded(json!({ "name": "photos", "size": 12 }));
    let future = OperationFuture::<Bucket>::new(done, client.clone());

    assert!(future.polling_future().done());
    assert_eq!(future.result(None).await.unwrap(), bucket());
    assert!(OperationControl::done(&future).await.unwrap());
    assert!(!future.cancel().await.unwrap());
    assert_eq!(client.fetches(), 0);
    assert!(client.cancelled.lock().unwrap().is_empty());
}

#[tokio::test]
async fn metadata_is_decoded_on_demand() {
    let mut op = Operation::pending(NAME);
    op.metadata = Some(json!({ "percent": 40 }));
    let future = OperationFuture::<Bucket>::new(op, ScriptedClient::empty());

    let progress: Progress = future.metadata().unwrap().unwrap();
    assert_eq!(progress.percent, 40);

    let bare = OperationFuture::<Bucket>::new(Operation::pending(NAME), ScriptedClient::empty());
    assert!(bare.metadata::<Progress>().unwrap().is_none());
}

// ─── Waiting for the outcome ──────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn result_polls_until_the_operation_finishes() {
    let client = ScriptedClient::new([
        Operation::pending(NAME),
        Operation::pending(NAME),
        succeeded(json!({ "name": "photos", "size": 12 })),
    ]);
    let future = OperationFuture::<Bucket>::new(Operation::pending(NAME), client.clone());

    assert_eq!(future.result(None).await.unwrap(), bucket());
    assert_eq!(client.fetches(), 3);
    assert!(future.operation().done);

    // Finished operations are served from the cache.
    assert_eq!(future.result(None).await.unwrap(), bucket());
    assert_eq!(client.fetches(), 3);
}

#[tokio::test]
async fn operation_error_becomes_the_exception() {
    let client = ScriptedClient::new([failed(Code::ResourceExhausted, "quota")]);
    let future = OperationFuture::<Bucket>::new(Operation::pending(NAME), client);

    let exception = future.exception(None).await.unwrap();
    assert_eq!(exception, Some(Status::new(Code::ResourceExhausted, "quota")));
    assert!(matches!(
        future.result(None).await,
        Err(FutureError::Failed(status)) if status.code == Code::ResourceExhausted
    ));
}

#[tokio::test]
async fn finished_operation_without_result_is_unknown_error() {
    let done = Operation {
        name: NAME.into(),
        done: true,
        ..Default::default()
    };
    let future = OperationFuture::<Bucket>::new(done, ScriptedClient::empty());

    let exception = future.exception(None).await.unwrap().unwrap();
    assert_eq!(exception.code, Code::Unknown);
    assert_eq!(exception.message, "Unknown operation error");
}

#[tokio::test]
async fn undecodable_response_is_internal_error() {
    let client = ScriptedClient::new([succeeded(json!({ "name": 3 }))]);
    let future = OperationFuture::<Bucket>::new(Operation::pending(NAME), client);

    let exception = future.exception(None).await.unwrap().unwrap();
    assert_eq!(exception.code, Code::Internal);
}

#[tokio::test]
async fn service_failure_aborts_the_wait() {
    let future = OperationFuture::<Bucket>::new(Operation::pending(NAME), ScriptedClient::empty());

    let err = future.result(None).await.unwrap_err();
    assert!(matches!(err, FutureError::Poll(ref status) if status.code == Code::NotFound));
    assert!(!future.polling_future().done());
}

#[tokio::test(start_paused = true)]
async fn bounded_wait_times_out() {
    let client = ScriptedClient::new([Operation::pending(NAME)]);
    let future = OperationFuture::<Bucket>::new(Operation::pending(NAME), client.clone());

    let err = future.result(Some(Duration::from_secs(5))).await.unwrap_err();
    assert!(err.is_timeout());
    assert!(client.fetches() > 1);
    assert!(!future.polling_future().done());
}

#[tokio::test(start_paused = true)]
async fn done_callback_fires_from_background_polling() {
    let client = ScriptedClient::new([
        Operation::pending(NAME),
        succeeded(json!({ "name": "photos", "size": 12 })),
    ]);
    let future = OperationFuture::<Bucket>::new(Operation::pending(NAME), client.clone());

    let (tx, rx) = tokio::sync::oneshot::channel();
    future.add_done_callback(move |f| {
        let _ = tx.send(f.try_result());
    });

    assert_eq!(rx.await.unwrap(), Some(Ok(bucket())));
    assert_eq!(client.fetches(), 2);
}

// ─── Cancellation ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn cancellation_round_trip() {
    let client = ScriptedClient::new([
        Operation::pending(NAME),
        failed(Code::Cancelled, "cancelled by user"),
    ]);
    let future = OperationFuture::<Bucket>::new(Operation::pending(NAME), client.clone());

    assert!(future.cancel().await.unwrap());
    assert_eq!(*client.cancelled.lock().unwrap(), vec![NAME.to_owned()]);

    assert!(future.cancelled().await.unwrap());
    assert!(future.polling_future().done());

    assert!(!future.cancel().await.unwrap());
    assert_eq!(client.cancelled.lock().unwrap().len(), 1);
    assert_eq!(client.fetches(), 2);
}
