//! Declarative HTTP endpoints and a resilient event stream for the Slack API.
//!
//! # Overview
//! Endpoints are described as data (`EndpointDefinition`) and turned into
//! reusable `BoundCall`s that validate arguments, build an `HttpRequest`,
//! fetch it with bounded retries, optionally memoize the result, and run a
//! post-response pipeline. The real-time side keeps one websocket-style
//! stream connected, reconnecting on `goodbye`, and dispatches decoded
//! events to a listener registry.
//!
//! # Design
//! - The library never does network I/O itself: `HttpTransport`,
//!   `StreamConnector` and `StreamUrlProvider` are injected.
//! - Validation is the only error surfaced to callers. Transport failures
//!   are absorbed by the fetcher; hook and listener failures are isolated.
//! - `SlackApi` wires the endpoint tables to a token; `Directory` keeps
//!   name/id lookups fresh.

pub mod api;
pub mod cache;
pub mod call;
pub mod directory;
pub mod endpoint;
pub mod error;
pub mod extension;
pub mod fetch;
pub mod hooks;
pub mod http;
pub mod isolate;
pub mod listener;
pub mod request;
pub mod response;
pub mod stream;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use api::{RtmConnect, SlackApi};
pub use call::{BoundCall, CacheDirective, CallOptions, PendingCall};
pub use directory::Directory;
pub use endpoint::{BodyEncoding, EndpointDefinition, ParamSpec, ParamType, Protocol};
pub use error::{DefinitionError, HookError, ListenerError, TransportError, ValidationError};
pub use extension::{Mention, MentionExtension};
pub use fetch::{fetch_with_retries, RetryPolicy};
pub use hooks::{JsonBodyHook, PostResponseHook};
pub use http::{BasicAuth, HttpMethod, HttpRequest, HttpResponse};
pub use listener::{Category, Listener, ListenerId, ListenerRegistry};
pub use request::{build_request, Params};
pub use response::{ApiResponse, ResponseData};
pub use stream::{ConnectionState, EventStream, StreamConfig};
pub use transport::{HttpTransport, MessageStream, StreamConnector, StreamUrlProvider};
