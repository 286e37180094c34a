//! gaxkit-core: call decorators and polling futures for RPC clients.
//!
//! # Overview
//!
//! Building blocks for generated API clients:
//!
//! - [`callable`]: wraps a raw RPC with timeout injection, retry of
//!   transient errors and lazy page streaming, composed by [`ApiCallable`],
//!   plus request bundling through [`Executor`]
//! - [`future`]: [`PollingFuture`], a future completed by repeatedly
//!   polling an external operation, with done callbacks and a background
//!   polling task
//! - [`path_template`]: [`PathTemplate`], parsing, matching and
//!   instantiation of resource name templates
//!
//! Calls and futures speak the shared [`Code`] / [`RpcError`] vocabulary in [`status`].

pub mod callable;
pub mod error;
pub mod future;
pub mod path_template;
pub mod status;

pub use callable::{
    ApiCall, ApiCallable, BundleOptions, CallDefaults, CallSettings, Executor, PageDescriptor,
};
pub use error::{
    CallError, ConfigError, FieldError, FutureError, InvalidStateError, TemplateError,
};
pub use future::{OperationControl, PollBackoff, Poller, PollingFuture};
pub use path_template::PathTemplate;
pub use status::{Code, RpcError, Status};
