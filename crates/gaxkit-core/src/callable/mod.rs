//! Call decorators: composable middleware around a single RPC.
//!
//! ```text
//! raw call → [Retrying] → WithTimeout → [PageStreamer]
//! ```
//!
//! [`bundling`] groups small requests sharing a bundle id into one call.

pub mod api_callable;
pub mod bundling;
pub mod call;
pub mod page;
pub mod pipeline;
pub mod retry;
pub mod settings;
pub mod timeout;

pub use api_callable::ApiCallable;
pub use bundling::{compute_bundle_id, BundleHandle, BundleId, BundleOptions, Canceller, Executor};
pub use call::{from_fn, ApiCall, FnCall};
pub use page::{PageDescriptor, PageRequest, PageResponse, PageStreamer, PageToken};
pub use pipeline::{Pipeline, Stage};
pub use retry::Retrying;
pub use settings::{CallDefaults, CallSettings};
pub use timeout::WithTimeout;
