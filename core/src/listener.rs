//! Listener registry for stream events.
//!
//! # Design
//! Listeners are grouped by `Category`: either a concrete event type or the
//! wildcard `All`. Within a category listeners keep registration order and
//! are addressed by a `ListenerId`. Firing snapshots the listeners first and
//! invokes them without holding any lock, so a listener may add or remove
//! listeners while it runs. Each invocation goes through `run_isolated`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use uuid::Uuid;

use crate::error::ListenerError;
use crate::isolate::run_isolated;

/// Handles events of type `E`.
pub trait Listener<E>: Send + Sync {
    fn handle(&self, event: &E) -> Result<(), ListenerError>;

    /// Name used when logging failures.
    fn name(&self) -> &str {
        "listener"
    }
}

impl<E, F> Listener<E> for F
where
    F: Fn(&E) -> Result<(), ListenerError> + Send + Sync,
{
    fn handle(&self, event: &E) -> Result<(), ListenerError> {
        self(event)
    }
}

/// Which events a listener receives.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Category {
    /// Every event.
    All,
    /// Events whose `type` equals the string.
    Event(String),
}

impl Category {
    pub fn event(name: impl Into<String>) -> Self {
        Category::Event(name.into())
    }

    /// Category of an event from its `type` field.
    pub fn of(event: &Value) -> Option<Self> {
        event.get("type").and_then(Value::as_str).map(Category::event)
    }
}

impl From<&str> for Category {
    fn from(name: &str) -> Self {
        Category::event(name)
    }
}

/// Identifier of a registered listener, unique within its category.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListenerId(String);

impl ListenerId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ListenerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ListenerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ordered set of listeners for one kind of event.
pub struct ListenerSet<E> {
    listeners: Mutex<Vec<(ListenerId, Arc<dyn Listener<E>>)>>,
}

impl<E> Default for ListenerSet<E> {
    fn default() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
        }
    }
}

impl<E> ListenerSet<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener`. Without an id a fresh one is generated; an id that
    /// is already present has its listener replaced in place.
    pub fn add(&self, listener: Arc<dyn Listener<E>>, id: Option<ListenerId>) -> ListenerId {
        let id = id.unwrap_or_else(ListenerId::generate);
        let mut listeners = self.listeners.lock();
        match listeners.iter_mut().find(|(existing, _)| *existing == id) {
            Some(slot) => slot.1 = listener,
            None => listeners.push((id.clone(), listener)),
        }
        id
    }

    /// Remove a listener. Removing an unknown id is a no-op.
    pub fn remove(&self, id: &ListenerId) -> Option<Arc<dyn Listener<E>>> {
        let mut listeners = self.listeners.lock();
        let index = listeners.iter().position(|(existing, _)| existing == id)?;
        Some(listeners.remove(index).1)
    }

    /// Invoke every listener with `event`. Returns how many succeeded.
    pub fn fire(&self, event: &E) -> usize {
        let snapshot: Vec<_> = self.listeners.lock().clone();
        snapshot
            .iter()
            .filter(|(id, listener)| {
                run_isolated(listener.name(), id.as_str(), || listener.handle(event))
            })
            .count()
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Category → listeners map for JSON events.
#[derive(Default)]
pub struct ListenerRegistry {
    categories: Mutex<HashMap<Category, Arc<ListenerSet<Value>>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(
        &self,
        category: impl Into<Category>,
        listener: Arc<dyn Listener<Value>>,
        id: Option<ListenerId>,
    ) -> ListenerId {
        // held across the add so a concurrent remove cannot drop the set
        let mut categories = self.categories.lock();
        categories.entry(category.into()).or_default().add(listener, id)
    }

    /// Register a closure under a generated id.
    pub fn on<F>(&self, category: impl Into<Category>, f: F) -> ListenerId
    where
        F: Fn(&Value) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.add_listener(category, Arc::new(f), None)
    }

    pub fn remove_listener(
        &self,
        category: &Category,
        id: &ListenerId,
    ) -> Option<Arc<dyn Listener<Value>>> {
        let mut categories = self.categories.lock();
        let removed = categories.get(category)?.remove(id);
        if categories.get(category).is_some_and(|set| set.is_empty()) {
            categories.remove(category);
        }
        removed
    }

    /// Invoke the listeners of one category. Returns how many succeeded.
    pub fn fire(&self, category: &Category, event: &Value) -> usize {
        let set = self.categories.lock().get(category).cloned();
        set.map_or(0, |set| set.fire(event))
    }

    /// Fire `event` at the wildcard listeners, then at the listeners of its
    /// `type`. Events without a string `type` only reach the wildcard.
    pub fn dispatch(&self, event: &Value) -> usize {
        let mut handled = self.fire(&Category::All, event);
        if let Some(category) = Category::of(event) {
            handled += self.fire(&category, event);
        }
        handled
    }

    pub fn listener_count(&self, category: &Category) -> usize {
        self.categories
            .lock()
            .get(category)
            .map_or(0, |set| set.len())
    }
}
