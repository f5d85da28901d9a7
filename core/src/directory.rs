//! Name/id lookups for channels and users, refreshed from the Web API.
//!
//! A reload replaces a whole table at once and only when the API answered
//! with status 200 and `ok`; a failed reload keeps the previous contents.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use parking_lot::RwLock;
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::SlackApi;
use crate::call::BoundCall;
use crate::request::Params;

#[derive(Debug, Default)]
struct NameIndex {
    id_by_name: HashMap<String, String>,
    name_by_id: HashMap<String, String>,
}

impl NameIndex {
    fn insert(&mut self, name: &str, id: &str) {
        self.id_by_name.insert(name.to_string(), id.to_string());
        self.name_by_id.insert(id.to_string(), name.to_string());
    }
}

/// Channel names and the bot's memberships, replaced together.
#[derive(Debug, Default)]
struct ChannelTable {
    index: NameIndex,
    member_of: HashSet<String>,
}

pub struct Directory {
    api: SlackApi,
    channels: RwLock<ChannelTable>,
    users: RwLock<NameIndex>,
}

impl Directory {
    pub fn new(api: SlackApi) -> Self {
        Self {
            api,
            channels: RwLock::default(),
            users: RwLock::default(),
        }
    }

    pub fn channel_id(&self, name: &str) -> Option<String> {
        self.channels.read().index.id_by_name.get(name).cloned()
    }

    pub fn channel_name(&self, id: &str) -> Option<String> {
        self.channels.read().index.name_by_id.get(id).cloned()
    }

    pub fn user_id(&self, name: &str) -> Option<String> {
        self.users.read().id_by_name.get(name).cloned()
    }

    pub fn user_name(&self, id: &str) -> Option<String> {
        self.users.read().name_by_id.get(id).cloned()
    }

    /// Whether the bot is a member of the channel.
    pub fn is_member(&self, channel_id: &str) -> bool {
        self.channels.read().member_of.contains(channel_id)
    }

    /// Channel ids the bot is a member of.
    pub fn member_channels(&self) -> Vec<String> {
        self.channels.read().member_of.iter().cloned().collect()
    }

    /// Reload channels. Returns whether the table was replaced.
    pub async fn reload_channels(&self) -> bool {
        let channels = fetch_list(&self.api.channels.list, ("exclude_members", true), "channels");
        let Some(channels) = channels.await else {
            return false;
        };

        let mut index = NameIndex::default();
        let mut member_of = HashSet::new();
        for channel in &channels {
            let Some((id, name)) = id_and_name(channel) else {
                continue;
            };
            index.insert(name, id);
            if channel.get("is_member").and_then(Value::as_bool) == Some(true) {
                member_of.insert(id.to_string());
            }
        }
        info!(channels = index.id_by_name.len(), member_of = member_of.len(), "channels reloaded");
        *self.channels.write() = ChannelTable { index, member_of };
        true
    }

    /// Reload users. Returns whether the table was replaced.
    pub async fn reload_users(&self) -> bool {
        let Some(members) = fetch_list(&self.api.users.list, ("presence", false), "members").await else {
            return false;
        };

        let mut index = NameIndex::default();
        for (id, name) in members.iter().filter_map(id_and_name) {
            index.insert(name, id);
        }
        info!(users = index.id_by_name.len(), "users reloaded");
        *self.users.write() = index;
        true
    }

    /// Reload users, then channels.
    pub async fn fetch_all(&self) {
        self.reload_users().await;
        self.reload_channels().await;
    }

    /// Run `fetch_all` every `every` until `cancel` fires. Cancellation is
    /// noticed at the next `poll` tick. An interval past the clock's range
    /// never fetches.
    pub async fn autofetch(&self, every: Duration, poll: Duration, cancel: CancellationToken) {
        let poll = poll.max(Duration::from_millis(1));
        let mut next_fetch = Instant::now().checked_add(every);
        while !cancel.is_cancelled() {
            if next_fetch.is_some_and(|at| Instant::now() >= at) {
                self.fetch_all().await;
                next_fetch = Instant::now().checked_add(every);
            }
            tokio::time::sleep(poll).await;
        }
        debug!("autofetch stopped");
    }
}

/// Invoke a list endpoint with one flag set and return the extracted array.
async fn fetch_list(call: &BoundCall, flag: (&str, bool), field: &str) -> Option<Vec<Value>> {
    let mut args = Params::new();
    args.insert(flag.0.to_string(), Value::Bool(flag.1));
    let pending = match call.invoke(args) {
        Ok(pending) => pending,
        Err(err) => {
            warn!(error = %err, field, "directory reload rejected");
            return None;
        }
    };
    let response = pending.await;
    if !response.is_ok() {
        warn!(status = ?response.status(), field, "directory reload failed");
        return None;
    }
    response.field(field).and_then(Value::as_array).cloned()
}

fn id_and_name(entry: &Value) -> Option<(&str, &str)> {
    let id = entry.get("id")?.as_str()?;
    let name = entry.get("name")?.as_str()?;
    Some((id, name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedTransport;
    use std::sync::Arc;

    const CHANNELS: &str = r#"{"ok":true,"channels":[
        {"id":"C1","name":"general","is_member":true},
        {"id":"C2","name":"random","is_member":false},
        {"name":"broken"}
    ]}"#;
    const USERS: &str = r#"{"ok":true,"members":[
        {"id":"U1","name":"alice"},
        {"id":"U2","name":"bob"}
    ]}"#;

    fn directory(transport: &ScriptedTransport) -> Directory {
        Directory::new(SlackApi::new("abc", Arc::new(transport.clone())).unwrap())
    }

    #[tokio::test]
    async fn reload_channels_builds_both_directions() {
        let transport = ScriptedTransport::new();
        transport.push_status(200, CHANNELS);
        let dir = directory(&transport);

        assert!(dir.reload_channels().await);
        assert_eq!(dir.channel_id("general").as_deref(), Some("C1"));
        assert_eq!(dir.channel_name("C2").as_deref(), Some("random"));
        assert!(dir.channel_id("broken").is_none());
        assert!(dir.is_member("C1"));
        assert!(!dir.is_member("C2"));
        assert_eq!(dir.member_channels(), ["C1"]);
        assert!(transport.sent()[0].url.ends_with("?token=abc&exclude_members=true"));
    }

    #[tokio::test]
    async fn failed_reload_keeps_previous_tables() {
        let transport = ScriptedTransport::new();
        transport.push_status(200, USERS);
        transport.push_status(200, r#"{"ok":false,"error":"ratelimited"}"#);
        let dir = directory(&transport);

        assert!(dir.reload_users().await);
        assert!(!dir.reload_users().await);
        assert_eq!(dir.user_id("alice").as_deref(), Some("U1"));
        assert_eq!(dir.user_name("U2").as_deref(), Some("bob"));
    }

    #[tokio::test]
    async fn fetch_all_loads_users_then_channels() {
        let transport = ScriptedTransport::new();
        transport.push_status(200, USERS);
        transport.push_status(200, CHANNELS);
        let dir = directory(&transport);

        dir.fetch_all().await;
        let urls: Vec<_> = transport.sent().into_iter().map(|r| r.url).collect();
        assert_eq!(
            urls,
            [
                "https://slack.com/api/users.list?token=abc&presence=false",
                "https://slack.com/api/channels.list?token=abc&exclude_members=true",
            ]
        );
        assert_eq!(dir.user_id("bob").as_deref(), Some("U2"));
        assert_eq!(dir.channel_id("general").as_deref(), Some("C1"));
    }

    #[tokio::test(start_paused = true)]
    async fn autofetch_runs_every_interval_until_cancelled() {
        let transport = ScriptedTransport::new();
        let dir = directory(&transport);
        let cancel = CancellationToken::new();
        let stop = async {
            tokio::time::sleep(Duration::from_secs(150)).await;
            cancel.cancel();
        };

        tokio::join!(
            dir.autofetch(Duration::from_secs(60), Duration::from_secs(10), cancel.clone()),
            stop
        );
        // fetch_all at 60s and 120s, two requests each
        assert_eq!(transport.calls(), 4);
    }

    #[tokio::test]
    async fn channel_reload_replaces_names_and_memberships_together() {
        let transport = ScriptedTransport::new();
        transport.push_status(200, CHANNELS);
        transport.push_status(
            200,
            r#"{"ok":true,"channels":[{"id":"C9","name":"ops","is_member":true}]}"#,
        );
        let dir = directory(&transport);

        assert!(dir.reload_channels().await);
        assert!(dir.reload_channels().await);
        assert!(dir.channel_id("general").is_none());
        assert!(!dir.is_member("C1"));
        assert_eq!(dir.member_channels(), ["C9"]);
        assert_eq!(dir.channel_name("C9").as_deref(), Some("ops"));
    }

    #[tokio::test(start_paused = true)]
    async fn autofetch_with_unbounded_interval_never_fetches() {
        let transport = ScriptedTransport::new();
        let dir = directory(&transport);
        let cancel = CancellationToken::new();
        let stop = async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            cancel.cancel();
        };

        tokio::join!(
            dir.autofetch(Duration::MAX, Duration::from_secs(60), cancel.clone()),
            stop
        );
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_autofetch_never_fetches() {
        let transport = ScriptedTransport::new();
        let dir = directory(&transport);
        let cancel = CancellationToken::new();
        cancel.cancel();

        dir.autofetch(Duration::ZERO, Duration::from_secs(1), cancel).await;
        assert_eq!(transport.calls(), 0);
    }
}
