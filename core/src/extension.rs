//! Pattern-matching extensions layered on the listener registry.
//!
//! An extension is registered on the registry like any other listener. It
//! inspects each event and, on a match, fires its own listeners with a derived
//! event. Its listeners are isolated the same way registry listeners are.

use std::sync::Arc;

use regex::Regex;
use serde_json::Value;

use crate::error::ListenerError;
use crate::listener::{Listener, ListenerId, ListenerSet};

/// A `<@USER>` mention found in a message.
#[derive(Debug, Clone, PartialEq)]
pub struct Mention {
    /// Author of the message.
    pub user_id: Option<String>,
    pub channel_id: Option<String>,
    /// The mentioned user.
    pub mention_user_id: String,
    /// Byte range of the mention within `text`.
    pub start: usize,
    pub end: usize,
    /// The original event.
    pub event: Value,
}

/// Fires its listeners whenever an event's `text` mentions `user_id`.
pub struct MentionExtension {
    user_id: String,
    pattern: Regex,
    listeners: ListenerSet<Mention>,
}

impl MentionExtension {
    pub fn new(user_id: impl Into<String>) -> Result<Self, regex::Error> {
        let user_id = user_id.into();
        let pattern = Regex::new(&format!("<@{}>", regex::escape(&user_id)))?;
        Ok(Self {
            user_id,
            pattern,
            listeners: ListenerSet::new(),
        })
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn add_listener(&self, listener: Arc<dyn Listener<Mention>>, id: Option<ListenerId>) -> ListenerId {
        self.listeners.add(listener, id)
    }

    /// Register a closure under a generated id.
    pub fn on<F>(&self, f: F) -> ListenerId
    where
        F: Fn(&Mention) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.listeners.add(Arc::new(f), None)
    }

    pub fn remove_listener(&self, id: &ListenerId) -> Option<Arc<dyn Listener<Mention>>> {
        self.listeners.remove(id)
    }

    /// The mention in `event`, if any.
    pub fn detect(&self, event: &Value) -> Option<Mention> {
        let text = event.get("text")?.as_str()?;
        let found = self.pattern.find(text)?;
        let field = |name: &str| event.get(name).and_then(Value::as_str).map(str::to_string);
        Some(Mention {
            user_id: field("user"),
            channel_id: field("channel"),
            mention_user_id: self.user_id.clone(),
            start: found.start(),
            end: found.end(),
            event: event.clone(),
        })
    }
}

impl Listener<Value> for MentionExtension {
    fn handle(&self, event: &Value) -> Result<(), ListenerError> {
        if let Some(mention) = self.detect(event) {
            self.listeners.fire(&mention);
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "mention_extension"
    }
}
