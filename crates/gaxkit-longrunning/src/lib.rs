//! gaxkit-longrunning: futures for server-side long-running operations.
//!
//! An RPC that starts a long-running operation returns an [`Operation`].
//! Wrap it in an [`OperationFuture`] to wait for the decoded response,
//! register done callbacks, read progress metadata, or request
//! cancellation through an [`OperationsClient`].

pub mod operation;
pub mod operation_future;

pub use operation::{Operation, OperationResult, OperationsClient};
pub use operation_future::OperationFuture;
