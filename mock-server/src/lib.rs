use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        FromRequest, Query, Request, State,
    },
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde_json::{json, Map, Value};
use tokio::{
    net::TcpListener,
    sync::{Mutex, RwLock},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// The only token the server accepts.
pub const TOKEN: &str = "xoxb-test";

pub const BOT_USER_ID: &str = "U0BOT";

/// Knobs for a server instance.
#[derive(Clone, Debug, Default)]
pub struct MockConfig {
    /// How many times `/api/flaky` answers 503 before it succeeds.
    pub flaky_failures: u32,
    /// Events replayed on successive `/rtm` connections, one list per
    /// connection. Once exhausted, further upgrades are refused with 503.
    pub sessions: Vec<Vec<Value>>,
}

impl MockConfig {
    /// The configuration the binary runs with.
    pub fn demo() -> Self {
        Self {
            flaky_failures: 2,
            sessions: vec![vec![
                json!({
                    "type": "message",
                    "channel": "C01",
                    "user": "U01",
                    "text": format!("hello <@{BOT_USER_ID}>"),
                    "ts": "1500000000.000001"
                }),
                json!({"type": "goodbye"}),
            ]],
        }
    }
}

struct Inner {
    flaky_remaining: Mutex<u32>,
    flaky_attempts: Mutex<u32>,
    sessions: Mutex<VecDeque<Vec<Value>>>,
    history: RwLock<HashMap<String, Vec<Value>>>,
    next_ts: Mutex<u64>,
}

/// Shared server state. Clones share the same data.
#[derive(Clone)]
pub struct MockState(Arc<Inner>);

impl MockState {
    pub fn new(config: MockConfig) -> Self {
        Self(Arc::new(Inner {
            flaky_remaining: Mutex::new(config.flaky_failures),
            flaky_attempts: Mutex::new(0),
            sessions: Mutex::new(config.sessions.into()),
            history: RwLock::new(HashMap::new()),
            next_ts: Mutex::new(0),
        }))
    }

    /// Queue events for one more `/rtm` connection.
    pub async fn push_session(&self, events: Vec<Value>) {
        self.0.sessions.lock().await.push_back(events);
    }

    /// Messages posted to `channel`, oldest first.
    pub async fn history(&self, channel: &str) -> Vec<Value> {
        self.0
            .history
            .read()
            .await
            .get(channel)
            .cloned()
            .unwrap_or_default()
    }

    /// Requests `/api/flaky` has seen.
    pub async fn flaky_attempts(&self) -> u32 {
        *self.0.flaky_attempts.lock().await
    }

    async fn next_session(&self) -> Option<Vec<Value>> {
        self.0.sessions.lock().await.pop_front()
    }

    async fn next_ts(&self) -> String {
        let mut next = self.0.next_ts.lock().await;
        *next += 1;
        format!("1500000000.{:06}", *next)
    }
}

pub fn app() -> Router {
    app_with(MockState::new(MockConfig::default()))
}

pub fn app_with(state: MockState) -> Router {
    Router::new()
        .route("/api/auth.test", get(auth_test).post(auth_test))
        .route("/api/channels.list", get(channels_list))
        .route("/api/channels.history", get(channels_history))
        .route("/api/users.list", get(users_list))
        .route("/api/chat.postMessage", post(post_message))
        .route("/api/rtm.connect", post(rtm_connect).get(rtm_connect))
        .route("/api/flaky", get(flaky))
        .route("/rtm", get(rtm))
        .with_state(state)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    run_with(listener, MockState::new(MockConfig::default())).await
}

pub async fn run_with(listener: TcpListener, state: MockState) -> Result<(), std::io::Error> {
    axum::serve(listener, app_with(state)).await
}

fn channels() -> Vec<Value> {
    vec![
        json!({"id": "C01", "name": "general", "is_archived": false, "is_member": true}),
        json!({"id": "C02", "name": "random", "is_archived": false, "is_member": false}),
        json!({"id": "C03", "name": "old-news", "is_archived": true, "is_member": false}),
    ]
}

fn users() -> Vec<Value> {
    vec![
        json!({"id": BOT_USER_ID, "name": "slacktor"}),
        json!({"id": "U01", "name": "alice"}),
        json!({"id": "U02", "name": "bob"}),
    ]
}

fn api_error(error: &str) -> Json<Value> {
    Json(json!({"ok": false, "error": error}))
}

/// Query string plus, for POST, a form or JSON body. JSON scalars other
/// than strings are kept as their JSON text.
pub struct ApiParams(pub HashMap<String, String>);

impl ApiParams {
    fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    fn flag(&self, name: &str) -> bool {
        self.get(name) == Some("true")
    }

    fn authorize(&self) -> Result<(), Json<Value>> {
        match self.get("token") {
            None => Err(api_error("not_authed")),
            Some(TOKEN) => Ok(()),
            Some(_) => Err(api_error("invalid_auth")),
        }
    }
}

impl<S: Send + Sync> FromRequest<S> for ApiParams {
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Query(mut params) = Query::<HashMap<String, String>>::try_from_uri(req.uri())
            .map_err(IntoResponse::into_response)?;
        if req.method() != Method::POST {
            return Ok(ApiParams(params));
        }

        let content_type = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if content_type.starts_with("application/json") {
            let Json(body) = Json::<Map<String, Value>>::from_request(req, state)
                .await
                .map_err(IntoResponse::into_response)?;
            params.extend(body.into_iter().map(|(k, v)| match v {
                Value::String(s) => (k, s),
                other => (k, other.to_string()),
            }));
        } else if content_type.starts_with("application/x-www-form-urlencoded") {
            let Form(body) = Form::<HashMap<String, String>>::from_request(req, state)
                .await
                .map_err(IntoResponse::into_response)?;
            params.extend(body);
        }
        Ok(ApiParams(params))
    }
}

async fn auth_test(params: ApiParams) -> Json<Value> {
    if let Err(denied) = params.authorize() {
        return denied;
    }
    Json(json!({
        "ok": true,
        "url": "https://mock.slack.com/",
        "team": "Mock",
        "user": "slacktor",
        "team_id": "T01",
        "user_id": BOT_USER_ID
    }))
}

async fn channels_list(params: ApiParams) -> Json<Value> {
    if let Err(denied) = params.authorize() {
        return denied;
    }
    let exclude_archived = params.flag("exclude_archived");
    let exclude_members = params.flag("exclude_members");
    let listed: Vec<Value> = channels()
        .into_iter()
        .filter(|c| !(exclude_archived && c["is_archived"] == true))
        .map(|mut c| {
            if !exclude_members {
                let members = if c["is_member"] == true {
                    json!([BOT_USER_ID, "U01"])
                } else {
                    json!(["U01", "U02"])
                };
                c["members"] = members;
            }
            c
        })
        .collect();
    Json(json!({"ok": true, "channels": listed}))
}

async fn channels_history(State(state): State<MockState>, params: ApiParams) -> Json<Value> {
    if let Err(denied) = params.authorize() {
        return denied;
    }
    let Some(channel) = params.get("channel") else {
        return api_error("channel_not_found");
    };
    if !channels().iter().any(|c| c["id"] == channel) {
        return api_error("channel_not_found");
    }
    let count = match params.get("count").map(str::parse::<usize>) {
        None => 100,
        Some(Ok(count)) => count,
        Some(Err(_)) => return api_error("invalid_arg_name"),
    };

    let mut messages = state.history(channel).await;
    messages.reverse();
    let has_more = messages.len() > count;
    messages.truncate(count);
    Json(json!({"ok": true, "messages": messages, "has_more": has_more}))
}

async fn users_list(params: ApiParams) -> Json<Value> {
    if let Err(denied) = params.authorize() {
        return denied;
    }
    let presence = params.flag("presence");
    let members: Vec<Value> = users()
        .into_iter()
        .map(|mut u| {
            if presence {
                u["presence"] = json!("active");
            }
            u
        })
        .collect();
    Json(json!({"ok": true, "members": members}))
}

async fn post_message(State(state): State<MockState>, params: ApiParams) -> Json<Value> {
    if let Err(denied) = params.authorize() {
        return denied;
    }
    let Some(channel) = params.get("channel").map(str::to_string) else {
        return api_error("channel_not_found");
    };
    if !channels().iter().any(|c| c["id"] == channel) {
        return api_error("channel_not_found");
    }
    let text = params.get("text").unwrap_or_default();
    let attachments = match params.get("attachments").map(serde_json::from_str::<Value>) {
        None => None,
        Some(Ok(attachments)) => Some(attachments),
        Some(Err(_)) => return api_error("invalid_attachments"),
    };
    if text.is_empty() && attachments.is_none() {
        return api_error("no_text");
    }

    let ts = state.next_ts().await;
    let mut message = json!({
        "type": "message",
        "user": BOT_USER_ID,
        "text": text,
        "ts": ts
    });
    if let Some(attachments) = attachments {
        message["attachments"] = attachments;
    }
    if let Some(thread_ts) = params.get("thread_ts") {
        message["thread_ts"] = json!(thread_ts);
    }
    info!(%channel, %ts, "message posted");
    state
        .0
        .history
        .write()
        .await
        .entry(channel.clone())
        .or_default()
        .push(message.clone());
    Json(json!({"ok": true, "channel": channel, "ts": ts, "message": message}))
}

async fn rtm_connect(headers: axum::http::HeaderMap, params: ApiParams) -> Json<Value> {
    if let Err(denied) = params.authorize() {
        return denied;
    }
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("127.0.0.1");
    let session = Uuid::new_v4();
    Json(json!({
        "ok": true,
        "url": format!("ws://{host}/rtm?session={session}"),
        "team": {"id": "T01", "name": "Mock", "domain": "mock"},
        "self": {"id": BOT_USER_ID, "name": "slacktor"}
    }))
}

async fn flaky(State(state): State<MockState>) -> (StatusCode, Json<Value>) {
    let attempt = {
        let mut attempts = state.0.flaky_attempts.lock().await;
        *attempts += 1;
        *attempts
    };
    let mut remaining = state.0.flaky_remaining.lock().await;
    if *remaining > 0 {
        *remaining -= 1;
        debug!(attempt, remaining = *remaining, "flaky endpoint failing");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"ok": false, "error": "service_unavailable"})),
        );
    }
    (StatusCode::OK, Json(json!({"ok": true, "attempts": attempt})))
}

async fn rtm(State(state): State<MockState>, ws: WebSocketUpgrade) -> Response {
    match state.next_session().await {
        Some(events) => ws.on_upgrade(move |socket| replay(socket, events)),
        None => {
            warn!("rtm connection refused, no sessions left");
            (StatusCode::SERVICE_UNAVAILABLE, "no sessions left").into_response()
        }
    }
}

/// Send `hello`, then the session's events. A `goodbye` ends the session.
async fn replay(mut socket: WebSocket, events: Vec<Value>) {
    let hello = json!({"type": "hello"});
    for event in std::iter::once(hello).chain(events) {
        let goodbye = event["type"] == "goodbye";
        if let Err(e) = socket.send(Message::Text(event.to_string().into())).await {
            warn!(error = %e, "rtm send failed");
            return;
        }
        if goodbye {
            info!("rtm session said goodbye");
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    }
    // Nothing left to replay; hold the connection until the client leaves.
    while let Some(Ok(msg)) = socket.recv().await {
        if matches!(msg, Message::Close(_)) {
            break;
        }
    }
}
