//! In-memory transport doubles shared by unit tests.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::TransportError;
use crate::http::{HttpRequest, HttpResponse};
use crate::transport::{HttpTransport, MessageStream, StreamConnector, StreamUrlProvider};

/// Replays queued outcomes; answers 200 `{"ok":true}` once the script runs out.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    script: Arc<Mutex<VecDeque<Result<HttpResponse, TransportError>>>>,
    sent: Arc<Mutex<Vec<HttpRequest>>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_status(&self, status: u16, body: &str) {
        self.script.lock().push_back(Ok(HttpResponse::new(status, body)));
    }

    pub fn push_error(&self, err: TransportError) {
        self.script.lock().push_back(Err(err));
    }

    pub fn calls(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn sent(&self) -> Vec<HttpRequest> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        self.sent.lock().push(request.clone());
        let next = self.script.lock().pop_front();
        next.unwrap_or_else(|| Ok(HttpResponse::new(200, r#"{"ok":true}"#)))
    }
}

/// A stream that yields a fixed list of messages, then ends.
pub struct ScriptedStream {
    messages: VecDeque<Result<String, TransportError>>,
}

#[async_trait]
impl MessageStream for ScriptedStream {
    async fn next_message(&mut self) -> Option<Result<String, TransportError>> {
        self.messages.pop_front()
    }
}

/// Hands out one scripted stream per successful connect; `None` entries are
/// refused connections.
#[derive(Clone, Default)]
pub struct ScriptedConnector {
    connections: Arc<Mutex<VecDeque<Option<Vec<String>>>>>,
    urls: Arc<Mutex<Vec<String>>>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_connection<I, S>(&self, messages: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let messages = messages.into_iter().map(Into::into).collect();
        self.connections.lock().push_back(Some(messages));
    }

    pub fn push_refusal(&self) {
        self.connections.lock().push_back(None);
    }

    pub fn connected_urls(&self) -> Vec<String> {
        self.urls.lock().clone()
    }
}

#[async_trait]
impl StreamConnector for ScriptedConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn MessageStream>, TransportError> {
        let next = self.connections.lock().pop_front().flatten();
        match next {
            Some(messages) => {
                self.urls.lock().push(url.to_string());
                Ok(Box::new(ScriptedStream {
                    messages: messages.into_iter().map(Ok).collect(),
                }))
            }
            None => Err(TransportError::Connect(format!("refused: {url}"))),
        }
    }
}

/// Numbers each URL it hands out so tests can tell connections apart.
#[derive(Default)]
pub struct CountingUrls {
    issued: Mutex<u32>,
}

#[async_trait]
impl StreamUrlProvider for CountingUrls {
    async fn stream_url(&self) -> Result<String, TransportError> {
        let mut issued = self.issued.lock();
        *issued += 1;
        Ok(format!("ws://events.local/{}", *issued))
    }
}
