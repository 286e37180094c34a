//! Long-running operation messages and the client that refreshes them.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use gaxkit_core::Status;

/// Server-side state of a long-running operation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Operation {
    /// Server-assigned name, unique within the service.
    pub name: String,
    /// `true` once the operation has finished, successfully or not.
    #[serde(default)]
    pub done: bool,
    /// Service-specific progress information.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(flatten)]
    pub result: Option<OperationResult>,
}

/// How a finished operation ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationResult {
    Response(Value),
    Error(Status),
}

impl Operation {
    pub fn pending(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn error(&self) -> Option<&Status> {
        match &self.result {
            Some(OperationResult::Error(status)) => Some(status),
            _ => None,
        }
    }
}

/// Client for the operations service.
#[async_trait]
pub trait OperationsClient: Send + Sync + 'static {
    /// Fetch the latest state of operation `name`.
    async fn get_operation(&self, name: &str, timeout: Option<Duration>)
        -> Result<Operation, Status>;

    /// Ask the server to cancel operation `name`.
    async fn cancel_operation(&self, name: &str) -> Result<(), Status>;
}

#[cfg(test)]
mod tests {
    use gaxkit_core::Code;
    use serde_json::json;

    use super::*;

    #[test]
    fn decodes_finished_operation() {
        let op: Operation = serde_json::from_value(json!({
            "name": "operations/42",
            "done": true,
            "response": { "size": 3 }
        }))
        .unwrap();
        assert!(op.done);
        assert_eq!(op.result, Some(OperationResult::Response(json!({ "size": 3 }))));
    }

    #[test]
    fn decodes_failed_operation() {
        let op: Operation = serde_json::from_value(json!({
            "name": "operations/42",
            "done": true,
            "error": { "code": "CANCELLED", "message": "stopped" }
        }))
        .unwrap();
        assert_eq!(op.error(), Some(&Status::new(Code::Cancelled, "stopped")));
    }

    #[test]
    fn pending_operation_omits_result() {
        let json = serde_json::to_value(Operation::pending("operations/1")).unwrap();
        assert_eq!(json, json!({ "name": "operations/1", "done": false }));
    }
}
