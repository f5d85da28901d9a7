//! Error types for building calls and talking to the transport.
//!
//! # Design
//! Only request validation is reported to the caller as an error. Transport
//! failures are absorbed by the retrying fetcher, and failures inside hooks
//! and listeners are isolated and logged, so those concerns get boxed error
//! aliases instead of dedicated enums.

use thiserror::Error;

/// Errors returned while turning call arguments into an `HttpRequest`.
///
/// All variants are raised before any I/O happens and none of them are
/// retryable: the call site has to change.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// The endpoint has no host configured.
    #[error("host is not set")]
    HostNotSet,

    /// The parameter was fixed by a partial binding and cannot be supplied again.
    #[error("param {name} has been fixed")]
    AlreadyBound { name: String },

    /// A required parameter was not supplied and has no default.
    #[error("param {name} is required")]
    MissingParam { name: String },

    /// A placeholder of the path template has no value.
    #[error("URL param {name} is required")]
    MissingPathParam { name: String },

    /// The parameter is neither declared nor a path placeholder.
    #[error("{name} is not a valid param")]
    UnknownParam { name: String },

    /// The value could not be converted to the declared type.
    #[error("{value} cannot be converted to {target}")]
    Coercion { value: String, target: String },

    /// The value is not one of the declared choices.
    #[error("{value} is not a valid value for {name}")]
    InvalidChoice { name: String, value: String },
}

/// Failure reported by an injected transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The connection could not be established.
    #[error("connection failed: {0}")]
    Connect(String),

    /// The request was sent but no response was received.
    #[error("request failed: {0}")]
    Request(String),

    /// The peer closed the stream.
    #[error("stream closed")]
    Closed,

    #[error("{0}")]
    Other(String),
}

/// A declarative endpoint table could not be loaded.
#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("invalid endpoint definition {name}: {source}")]
    Invalid {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    /// A table loaded but rejected its fixed bindings.
    #[error("endpoint {name} rejected its bindings: {source}")]
    Binding {
        name: String,
        #[source]
        source: ValidationError,
    },
}

/// Error returned by a post-response hook.
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// Error returned by an event listener.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;
