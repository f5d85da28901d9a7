//! Slack Web API endpoints as bound calls.
//!
//! Each endpoint is declared as a JSON table and loaded through
//! `EndpointDefinition::from_json`, then bound with the bot token. The
//! tables target `https://slack.com` unless `SlackApi::with_host` points
//! them elsewhere.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::call::BoundCall;
use crate::endpoint::{EndpointDefinition, Protocol};
use crate::error::{DefinitionError, TransportError};
use crate::fetch::RetryPolicy;
use crate::request::Params;
use crate::stream::EventStream;
use crate::transport::{HttpTransport, StreamConnector, StreamUrlProvider};

const AUTH_TEST: &str = r#"{
    "host": "slack.com",
    "protocol": "https",
    "url": "/api/auth.test",
    "method": "GET",
    "params": {
        "token": { "type": "string", "is_required": true }
    },
    "extract": ["url", "team", "user", "team_id", "user_id"]
}"#;

const CHANNELS_LIST: &str = r#"{
    "host": "slack.com",
    "protocol": "https",
    "url": "/api/channels.list",
    "method": "GET",
    "params": {
        "token": { "type": "string", "is_required": true },
        "exclude_archived": { "type": "bool_string" },
        "exclude_members": { "type": "bool_string" }
    },
    "extract": ["channels"]
}"#;

const CHANNELS_HISTORY: &str = r#"{
    "host": "slack.com",
    "protocol": "https",
    "url": "/api/channels.history",
    "method": "GET",
    "params": {
        "token": { "type": "string", "is_required": true },
        "channel": { "type": "string", "is_required": true },
        "latest": { "type": "float" },
        "oldest": { "type": "float" },
        "inclusive": { "type": "bool_string" },
        "count": { "type": "int" },
        "unreads": { "type": "bool_string" }
    }
}"#;

const CHAT_POST_MESSAGE: &str = r#"{
    "host": "slack.com",
    "protocol": "https",
    "url": "/api/chat.postMessage",
    "method": "POST",
    "params": {
        "token": { "type": "string", "is_required": true },
        "channel": { "type": "string", "is_required": true },
        "text": { "type": "string" },
        "attachments": { "type": "list" },
        "as_user": { "type": "bool" },
        "thread_ts": { "type": "float" },
        "parse": { "type": "string" }
    },
    "extract": ["url", "team", "self"]
}"#;

const USERS_LIST: &str = r#"{
    "host": "slack.com",
    "protocol": "https",
    "url": "/api/users.list",
    "method": "GET",
    "params": {
        "token": { "type": "string", "is_required": true },
        "presence": { "type": "bool_string" }
    },
    "extract": ["members"]
}"#;

const RTM_CONNECT: &str = r#"{
    "host": "slack.com",
    "protocol": "https",
    "url": "/api/rtm.connect",
    "method": "POST",
    "params": {
        "token": { "type": "string", "is_required": true }
    },
    "extract": ["url", "team", "self"]
}"#;

fn bind(
    name: &str,
    table: &str,
    token: &str,
    transport: &Arc<dyn HttpTransport>,
) -> Result<BoundCall, DefinitionError> {
    let definition = EndpointDefinition::from_json(name, table)?;
    let mut bindings = Params::new();
    bindings.insert("token".to_string(), Value::from(token));
    BoundCall::new(definition, transport.clone())
        .partial(bindings)
        .map_err(|source| DefinitionError::Binding {
            name: name.to_string(),
            source,
        })
}

#[derive(Debug, Clone)]
pub struct AuthApi {
    pub test: BoundCall,
}

#[derive(Debug, Clone)]
pub struct ChannelsApi {
    pub list: BoundCall,
    pub history: BoundCall,
}

#[derive(Debug, Clone)]
pub struct ChatApi {
    pub post_message: BoundCall,
}

#[derive(Debug, Clone)]
pub struct UsersApi {
    pub list: BoundCall,
}

#[derive(Debug, Clone)]
pub struct RtmApi {
    pub connect: BoundCall,
}

/// Every supported endpoint, bound to one token and transport.
#[derive(Debug, Clone)]
pub struct SlackApi {
    pub auth: AuthApi,
    pub channels: ChannelsApi,
    pub chat: ChatApi,
    pub users: UsersApi,
    pub rtm: RtmApi,
}

impl SlackApi {
    pub fn new(token: &str, transport: Arc<dyn HttpTransport>) -> Result<Self, DefinitionError> {
        Ok(Self {
            auth: AuthApi {
                test: bind("auth.test", AUTH_TEST, token, &transport)?,
            },
            channels: ChannelsApi {
                list: bind("channels.list", CHANNELS_LIST, token, &transport)?,
                history: bind("channels.history", CHANNELS_HISTORY, token, &transport)?,
            },
            chat: ChatApi {
                post_message: bind("chat.postMessage", CHAT_POST_MESSAGE, token, &transport)?,
            },
            users: UsersApi {
                list: bind("users.list", USERS_LIST, token, &transport)?,
            },
            rtm: RtmApi {
                connect: bind("rtm.connect", RTM_CONNECT, token, &transport)?,
            },
        })
    }

    fn map(&self, f: impl Fn(&BoundCall) -> BoundCall) -> Self {
        Self {
            auth: AuthApi {
                test: f(&self.auth.test),
            },
            channels: ChannelsApi {
                list: f(&self.channels.list),
                history: f(&self.channels.history),
            },
            chat: ChatApi {
                post_message: f(&self.chat.post_message),
            },
            users: UsersApi {
                list: f(&self.users.list),
            },
            rtm: RtmApi {
                connect: f(&self.rtm.connect),
            },
        }
    }

    /// The same endpoints served from `host`.
    pub fn with_host(&self, host: &str, protocol: Protocol) -> Self {
        self.map(|call| call.with_host(host).with_protocol(protocol))
    }

    pub fn with_retry_policy(&self, policy: RetryPolicy) -> Self {
        self.map(|call| call.with_retry_policy(policy.clone()))
    }

    pub fn rtm_urls(&self) -> RtmConnect {
        RtmConnect::new(self.rtm.connect.clone())
    }

    /// A real-time event stream whose URLs come from `rtm.connect`.
    pub fn event_stream(&self, connector: Arc<dyn StreamConnector>) -> EventStream {
        EventStream::new(Arc::new(self.rtm_urls()), connector)
    }
}

/// Asks `rtm.connect` for a fresh websocket URL on every connect.
#[derive(Debug, Clone)]
pub struct RtmConnect {
    call: BoundCall,
}

impl RtmConnect {
    pub fn new(call: BoundCall) -> Self {
        Self { call }
    }
}

#[async_trait]
impl StreamUrlProvider for RtmConnect {
    async fn stream_url(&self) -> Result<String, TransportError> {
        let pending = self
            .call
            .invoke(Params::new())
            .map_err(|err| TransportError::Other(err.to_string()))?;
        let response = pending.await;
        if !response.is_ok() {
            let reason = response
                .data
                .as_ref()
                .and_then(|data| data.error.clone())
                .unwrap_or_else(|| match response.status() {
                    Some(status) => format!("status {status}"),
                    None => "no response".to_string(),
                });
            return Err(TransportError::Request(format!("rtm.connect: {reason}")));
        }
        response
            .field("url")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| TransportError::Other("rtm.connect returned no url".to_string()))
    }
}
