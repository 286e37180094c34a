//! Error types for call decorators and polling futures.

use std::time::Duration;

use thiserror::Error;

use crate::status::RpcError;

/// A callable's settings could not be resolved at call time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Neither the settings nor their defaults carry a timeout.
    #[error("no timeout configured and no defaults to fall back on")]
    MissingTimeout,

    /// A retrying call has no attempt budget, explicit or default.
    #[error("retrying call has no max_attempts and no defaults to fall back on")]
    MissingMaxAttempts,

    /// The resolved timeout is zero.
    #[error("timeout must be greater than zero")]
    InvalidTimeout,

    /// The resolved attempt budget is zero.
    #[error("max_attempts must be at least 1")]
    InvalidMaxAttempts,

    /// `idempotent` was given neither an explicit retry flag nor defaults.
    #[error("cannot decide whether to retry: no explicit flag and no defaults")]
    MissingRetryPolicy,

    /// `call` was used on a callable that has a page descriptor.
    #[error("callable is configured for page streaming; use `stream`")]
    PageStreamingEnabled,

    /// `stream` was used on a callable without a page descriptor.
    #[error("callable has no page descriptor; use `call`")]
    PageStreamingDisabled,
}

/// A message did not expose a named field as expected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldError {
    /// The message (or an intermediate value on a dotted path) is not an object.
    #[error("cannot access field `{field}`: message is not an object")]
    NotAnObject { field: String },

    /// A required field is absent.
    #[error("message has no field `{field}`")]
    Missing { field: String },

    /// The field exists but holds a value of another shape.
    #[error("field `{field}` has the wrong type, expected {expected}")]
    WrongType {
        field: String,
        expected: &'static str,
    },
}

/// Errors returned by a decorated call.
#[derive(Debug, Error)]
pub enum CallError<E: RpcError> {
    /// Settings could not be resolved.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A page-streaming field was missing or malformed.
    #[error(transparent)]
    Field(#[from] FieldError),

    /// The transport error of the final attempt, unchanged.
    #[error(transparent)]
    Rpc(E),
}

impl<E: RpcError> CallError<E> {
    /// The transport error, if this is one.
    pub fn into_rpc(self) -> Option<E> {
        match self {
            Self::Rpc(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_rpc(&self) -> Option<&E> {
        match self {
            Self::Rpc(e) => Some(e),
            _ => None,
        }
    }
}

/// `set_result` or `set_exception` was called on a future that is already done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("future is already done")]
pub struct InvalidStateError;

/// Errors returned while waiting on a polling future.
#[derive(Debug, Clone, Error)]
pub enum FutureError<E: RpcError> {
    /// The operation completed with this exception.
    #[error("operation failed: {0}")]
    Failed(E),

    /// A poll attempt failed with an error outside the poll retry codes.
    /// The future is still pending.
    #[error("polling failed: {0}")]
    Poll(E),

    /// The caller's wait bound elapsed first. The future is still pending.
    #[error("operation did not complete within {waited:?}")]
    Timeout { waited: Duration },
}

impl<E: RpcError> FutureError<E> {
    /// Returns `true` if this error reports the operation's own outcome.
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// A path template could not be parsed or instantiated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    /// The template has no segments.
    #[error("template cannot be empty")]
    Empty,

    /// A `{` opened inside another binding.
    #[error("parse error: nested binding in '{template}'")]
    NestedBinding { template: String },

    /// A binding is neither `{name}` nor `{name=pattern}`.
    #[error("parse error: invalid binding syntax in '{template}'")]
    InvalidBinding { template: String },

    /// Two consecutive slashes outside a binding.
    #[error("parse error: empty segment not allowed in '{template}'")]
    EmptySegment { template: String },

    /// More than one `**` in the template.
    #[error("parse error: pattern must not contain more than one path wildcard ('**') in '{template}'")]
    MultiplePathWildcards { template: String },

    /// The same variable is bound twice.
    #[error("duplicate binding '{name}'")]
    DuplicateBinding { name: String },

    /// Instantiation found no value for a variable.
    #[error("unbound variable '{name}'")]
    UnboundVariable { name: String },
}
