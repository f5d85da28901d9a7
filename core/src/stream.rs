//! Reconnecting event stream.
//!
//! # Design
//! `EventStream::run` drives the connection state machine:
//!
//! ```text
//! Disconnected/Failed ─run─▶ Connecting ──ok──▶ Connected ──goodbye/closed──▶ Reconnecting
//!                                │                  ▲                             │
//!                                └──exhausted──▶ Failed ◀──────exhausted──────────┤
//!                                                   └──────────────ok─────────────┘
//! ```
//!
//! Every connect, initial or not, asks the URL provider for a fresh URL and
//! gives up after `connect_attempts` tries. Messages are read and dispatched
//! one at a time in arrival order. The current state is published on a
//! `watch` channel; `Failed` ends the run and a new `run` starts over.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::error::ListenerError;
use crate::listener::{Category, ListenerId, ListenerRegistry};
use crate::transport::{MessageStream, StreamConnector, StreamUrlProvider};

/// Event type the server sends before it drops the connection.
pub const GOODBYE: &str = "goodbye";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Connect attempts per (re)connection before entering `Failed`.
    pub connect_attempts: u32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            connect_attempts: 3,
        }
    }
}

pub struct EventStream {
    urls: Arc<dyn StreamUrlProvider>,
    connector: Arc<dyn StreamConnector>,
    registry: Arc<ListenerRegistry>,
    config: StreamConfig,
    state: watch::Sender<ConnectionState>,
    running: Mutex<()>,
}

impl EventStream {
    pub fn new(urls: Arc<dyn StreamUrlProvider>, connector: Arc<dyn StreamConnector>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            urls,
            connector,
            registry: Arc::new(ListenerRegistry::new()),
            config: StreamConfig::default(),
            state,
            running: Mutex::new(()),
        }
    }

    pub fn with_config(mut self, config: StreamConfig) -> Self {
        self.config = config;
        self
    }

    /// Dispatch into an existing registry instead of a private one.
    pub fn with_registry(mut self, registry: Arc<ListenerRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn registry(&self) -> &Arc<ListenerRegistry> {
        &self.registry
    }

    pub fn on<F>(&self, category: impl Into<Category>, f: F) -> ListenerId
    where
        F: Fn(&Value) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.registry.on(category, f)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        debug!(from = ?previous, to = ?next, "stream state");
    }

    /// Connect and consume events until reconnecting is exhausted.
    ///
    /// Returns the terminal state, which is always `Failed`. Concurrent calls
    /// wait for the running one to finish.
    pub async fn run(&self) -> ConnectionState {
        let _running = self.running.lock().await;

        self.set_state(ConnectionState::Connecting);
        let Some(mut stream) = self.connect().await else {
            self.set_state(ConnectionState::Failed);
            return ConnectionState::Failed;
        };
        self.set_state(ConnectionState::Connected);

        loop {
            let reconnect = match stream.next_message().await {
                Some(Ok(text)) => self.handle_message(&text),
                Some(Err(err)) => {
                    warn!(error = %err, "stream read failed");
                    true
                }
                None => {
                    info!("stream closed by peer");
                    true
                }
            };
            if !reconnect {
                continue;
            }

            self.set_state(ConnectionState::Reconnecting);
            drop(stream);
            stream = match self.connect().await {
                Some(next) => next,
                None => {
                    self.set_state(ConnectionState::Failed);
                    return ConnectionState::Failed;
                }
            };
            self.set_state(ConnectionState::Connected);
        }
    }

    /// Decode and dispatch one message. Returns true if the server said
    /// goodbye.
    fn handle_message(&self, text: &str) -> bool {
        let event: Value = match serde_json::from_str(text) {
            Ok(event) => event,
            Err(err) => {
                warn!(error = %err, "dropping undecodable message");
                return false;
            }
        };
        self.registry.dispatch(&event);

        let goodbye = event.get("type").and_then(Value::as_str) == Some(GOODBYE);
        if goodbye {
            info!("server said goodbye, reconnecting");
        }
        goodbye
    }

    async fn connect(&self) -> Option<Box<dyn MessageStream>> {
        let attempts = self.config.connect_attempts.max(1);
        for attempt in 1..=attempts {
            let url = match self.urls.stream_url().await {
                Ok(url) => url,
                Err(err) => {
                    warn!(attempt, attempts, error = %err, "could not obtain stream url");
                    continue;
                }
            };
            match self.connector.connect(&url).await {
                Ok(stream) => {
                    info!(%url, attempt, "stream connected");
                    return Some(stream);
                }
                Err(err) => warn!(%url, attempt, attempts, error = %err, "stream connect failed"),
            }
        }
        error!(attempts, "giving up on stream connection");
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{CountingUrls, ScriptedConnector};
    use parking_lot::Mutex as SyncMutex;

    fn stream(connector: &ScriptedConnector) -> EventStream {
        EventStream::new(Arc::new(CountingUrls::default()), Arc::new(connector.clone()))
    }

    fn record(stream: &EventStream, category: impl Into<Category>) -> Arc<SyncMutex<Vec<Value>>> {
        let seen = Arc::new(SyncMutex::new(Vec::new()));
        let sink = seen.clone();
        stream.on(category, move |event| {
            sink.lock().push(event.clone());
            Ok(())
        });
        seen
    }

    #[tokio::test]
    async fn goodbye_reconnects_and_keeps_dispatching() {
        let connector = ScriptedConnector::new();
        connector.push_connection([r#"{"type":"hello"}"#, r#"{"type":"goodbye"}"#]);
        connector.push_connection([r#"{"type":"message","text":"after"}"#]);
        let stream = stream(&connector);
        let all = record(&stream, Category::All);
        let goodbyes = record(&stream, GOODBYE);
        let messages = record(&stream, "message");

        assert_eq!(stream.run().await, ConnectionState::Failed);

        let types: Vec<_> = all.lock().iter().map(|e| e["type"].clone()).collect();
        assert_eq!(types, ["hello", "goodbye", "message"]);
        assert_eq!(goodbyes.lock().len(), 1);
        assert_eq!(messages.lock()[0]["text"], "after");
        assert_eq!(
            connector.connected_urls(),
            ["ws://events.local/1", "ws://events.local/2"]
        );
    }

    #[tokio::test]
    async fn undecodable_messages_are_dropped() {
        let connector = ScriptedConnector::new();
        connector.push_connection(["not json", r#"{"type":"message"}"#, "{"]);
        let stream = stream(&connector);
        let all = record(&stream, Category::All);

        stream.run().await;
        assert_eq!(all.lock().len(), 1);
    }

    #[tokio::test]
    async fn initial_connect_retries_within_the_bound() {
        let connector = ScriptedConnector::new();
        connector.push_refusal();
        connector.push_refusal();
        connector.push_connection([r#"{"type":"hello"}"#]);
        let stream = stream(&connector);
        let all = record(&stream, Category::All);

        stream.run().await;
        assert_eq!(all.lock().len(), 1);
        assert_eq!(connector.connected_urls(), ["ws://events.local/3"]);
    }

    #[tokio::test]
    async fn exhausted_connect_fails_and_can_be_restarted() {
        let connector = ScriptedConnector::new();
        for _ in 0..3 {
            connector.push_refusal();
        }
        connector.push_connection([r#"{"type":"hello"}"#]);
        let stream = stream(&connector);
        let all = record(&stream, Category::All);

        assert_eq!(stream.run().await, ConnectionState::Failed);
        assert_eq!(stream.state(), ConnectionState::Failed);
        assert!(all.lock().is_empty());

        stream.run().await;
        assert_eq!(all.lock().len(), 1);
    }

    #[tokio::test]
    async fn listeners_observe_connected_state() {
        let connector = ScriptedConnector::new();
        connector.push_connection([r#"{"type":"hello"}"#, r#"{"type":"message"}"#]);
        let stream = stream(&connector);
        let states = Arc::new(SyncMutex::new(Vec::new()));
        let rx = stream.subscribe();
        let sink = states.clone();
        stream.on(Category::All, move |_| {
            sink.lock().push(*rx.borrow());
            Ok(())
        });

        assert_eq!(stream.state(), ConnectionState::Disconnected);
        stream.run().await;
        assert_eq!(
            *states.lock(),
            [ConnectionState::Connected, ConnectionState::Connected]
        );
    }

    /// Hands out numbered URLs and records the stream state at each request.
    #[derive(Default)]
    struct StateWatchingUrls {
        state: SyncMutex<Option<watch::Receiver<ConnectionState>>>,
        seen: SyncMutex<Vec<ConnectionState>>,
    }

    #[async_trait::async_trait]
    impl StreamUrlProvider for StateWatchingUrls {
        async fn stream_url(&self) -> Result<String, crate::error::TransportError> {
            let current = self.state.lock().as_ref().map(|rx| *rx.borrow());
            let mut seen = self.seen.lock();
            seen.extend(current);
            Ok(format!("ws://events.local/{}", seen.len()))
        }
    }

    #[tokio::test]
    async fn connects_are_made_while_connecting_or_reconnecting() {
        let connector = ScriptedConnector::new();
        connector.push_connection([r#"{"type":"hello"}"#, r#"{"type":"goodbye"}"#]);
        connector.push_connection([r#"{"type":"message"}"#]);
        let urls = Arc::new(StateWatchingUrls::default());
        let stream = EventStream::new(urls.clone(), Arc::new(connector.clone()));
        *urls.state.lock() = Some(stream.subscribe());

        assert_eq!(stream.run().await, ConnectionState::Failed);
        // first connect, the reconnect after goodbye, then three refused
        // attempts after the second connection closes
        assert_eq!(
            *urls.seen.lock(),
            [
                ConnectionState::Connecting,
                ConnectionState::Reconnecting,
                ConnectionState::Reconnecting,
                ConnectionState::Reconnecting,
                ConnectionState::Reconnecting,
            ]
        );
    }

    #[tokio::test]
    async fn connect_attempts_are_configurable() {
        let connector = ScriptedConnector::new();
        connector.push_refusal();
        connector.push_connection([r#"{"type":"hello"}"#]);
        let stream = stream(&connector).with_config(StreamConfig {
            connect_attempts: 1,
        });
        let all = record(&stream, Category::All);

        assert_eq!(stream.run().await, ConnectionState::Failed);
        assert!(all.lock().is_empty());
    }

    #[test]
    fn config_defaults_to_three_attempts() {
        let config: StreamConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.connect_attempts, 3);
    }
}
