//! Seams to the injected network collaborators.
//!
//! # Design
//! The library never opens a socket. An `HttpTransport` executes one
//! `HttpRequest`; a `StreamConnector` opens a persistent message stream at a
//! URL; a `StreamUrlProvider` hands out a fresh stream URL for every connect
//! attempt. Test doubles and real clients implement the same traits.

use async_trait::async_trait;

use crate::error::TransportError;
use crate::http::{HttpRequest, HttpResponse};

/// Executes a single HTTP round-trip.
///
/// Non-2xx statuses are responses, not errors. An `Err` means no response
/// was received at all.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Opens a persistent message stream.
#[async_trait]
pub trait StreamConnector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn MessageStream>, TransportError>;
}

/// Read side of an open stream.
#[async_trait]
pub trait MessageStream: Send {
    /// Next text message, or `None` once the peer has closed the stream.
    async fn next_message(&mut self) -> Option<Result<String, TransportError>>;
}

/// Produces the URL to connect the event stream to.
#[async_trait]
pub trait StreamUrlProvider: Send + Sync {
    async fn stream_url(&self) -> Result<String, TransportError>;
}
