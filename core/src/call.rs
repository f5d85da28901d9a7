//! Bound calls: an endpoint definition wired to a transport.
//!
//! # Design
//! A `BoundCall` is an immutable descriptor. Every `with_*` / `partial`
//! step returns a new descriptor and leaves the original untouched, so one
//! definition can be specialised several ways (different partial bindings,
//! hosts, or retry policies) without the variants affecting each other.
//! Cloning a `BoundCall` shares its response cache; deriving a new one via a
//! `with_*` step starts with an empty cache.
//!
//! `call` validates synchronously and hands back an un-awaited future, so
//! callers can start several calls and await them together.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::cache::ResponseCache;
use crate::endpoint::{EndpointDefinition, Protocol};
use crate::error::ValidationError;
use crate::fetch::{fetch_with_retries, RetryPolicy};
use crate::hooks::{run_hooks, JsonBodyHook, PostResponseHook};
use crate::http::{HttpRequest, HttpResponse};
use crate::request::{build_request, Params};
use crate::response::ApiResponse;
use crate::transport::HttpTransport;

/// Future returned by `BoundCall::call`.
pub type PendingCall = BoxFuture<'static, Arc<ApiResponse>>;

/// Memoize the result under `name` for `ttl_minutes`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CacheDirective {
    pub name: String,
    pub ttl_minutes: u64,
}

impl CacheDirective {
    pub fn new(name: impl Into<String>, ttl_minutes: u64) -> Self {
        Self {
            name: name.into(),
            ttl_minutes,
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_minutes.saturating_mul(60))
    }
}

/// Per-call control arguments. Unset fields fall back to the bound call's
/// retry policy; no cache directive means a live fetch.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub retry_statuses: Option<BTreeSet<u16>>,
    pub max_tries: Option<u32>,
    pub cache: Option<CacheDirective>,
}

impl CallOptions {
    pub fn retry_statuses<I: IntoIterator<Item = u16>>(mut self, statuses: I) -> Self {
        self.retry_statuses = Some(statuses.into_iter().collect());
        self
    }

    pub fn max_tries(mut self, max_tries: u32) -> Self {
        self.max_tries = Some(max_tries);
        self
    }

    pub fn cached(mut self, name: impl Into<String>, ttl_minutes: u64) -> Self {
        self.cache = Some(CacheDirective::new(name, ttl_minutes));
        self
    }
}

/// A reusable, validated, retrying invocation of one endpoint.
#[derive(Clone)]
pub struct BoundCall {
    definition: Arc<EndpointDefinition>,
    defaults: Arc<Params>,
    partial: Arc<Params>,
    hooks: Vec<Arc<dyn PostResponseHook>>,
    transport: Arc<dyn HttpTransport>,
    policy: RetryPolicy,
    cache: Arc<ResponseCache<ApiResponse>>,
}

impl std::fmt::Debug for BoundCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundCall")
            .field("method", &self.definition.method())
            .field("path", &self.definition.path())
            .field("partial", &self.partial.keys().collect::<Vec<_>>())
            .field("hooks", &self.hooks.len())
            .field("policy", &self.policy)
            .finish()
    }
}

impl BoundCall {
    /// Bind `definition` to `transport`. Declared defaults apply, and a
    /// `JsonBodyHook` is installed when the definition declares fields to
    /// extract.
    pub fn new(definition: EndpointDefinition, transport: Arc<dyn HttpTransport>) -> Self {
        let mut hooks: Vec<Arc<dyn PostResponseHook>> = Vec::new();
        if let Some(fields) = definition.extract() {
            hooks.push(Arc::new(JsonBodyHook::extracting(fields.iter().cloned())));
        }
        Self {
            defaults: Arc::new(definition.defaults()),
            definition: Arc::new(definition),
            partial: Arc::new(Params::new()),
            hooks,
            transport,
            policy: RetryPolicy::default(),
            cache: Arc::new(ResponseCache::new()),
        }
    }

    pub fn definition(&self) -> &EndpointDefinition {
        &self.definition
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn partial_bindings(&self) -> &Params {
        &self.partial
    }

    fn derive(&self) -> Self {
        Self {
            cache: Arc::new(ResponseCache::new()),
            ..self.clone()
        }
    }

    fn with_definition(&self, f: impl FnOnce(EndpointDefinition) -> EndpointDefinition) -> Self {
        let mut next = self.derive();
        next.definition = Arc::new(f((*self.definition).clone()));
        next
    }

    pub fn with_host(&self, host: impl Into<String>) -> Self {
        let host = host.into();
        self.with_definition(|def| def.with_host(host))
    }

    pub fn with_protocol(&self, protocol: Protocol) -> Self {
        self.with_definition(|def| def.with_protocol(protocol))
    }

    pub fn with_auth(&self, username: impl Into<String>, password: impl Into<String>) -> Self {
        let (username, password) = (username.into(), password.into());
        self.with_definition(|def| def.with_auth(username, password))
    }

    pub fn with_headers<I, K, V>(&self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let headers: Vec<(String, String)> = headers
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self.with_definition(|def| {
            headers
                .into_iter()
                .fold(def, |def, (k, v)| def.with_header(k, v))
        })
    }

    pub fn with_transport(&self, transport: Arc<dyn HttpTransport>) -> Self {
        let mut next = self.derive();
        next.transport = transport;
        next
    }

    pub fn with_hook(&self, hook: Arc<dyn PostResponseHook>) -> Self {
        let mut next = self.derive();
        next.hooks.push(hook);
        next
    }

    pub fn with_retry_policy(&self, policy: RetryPolicy) -> Self {
        let mut next = self.derive();
        next.policy = policy;
        next
    }

    /// Override default values. Names must be declared parameters or path
    /// placeholders.
    pub fn with_defaults(&self, defaults: Params) -> Result<Self, ValidationError> {
        self.check_names(&defaults)?;
        let mut merged = (*self.defaults).clone();
        merged.extend(defaults);
        let mut next = self.derive();
        next.defaults = Arc::new(merged);
        Ok(next)
    }

    /// Fix parameter values for every future call. A fixed name can be
    /// neither supplied at call time nor bound a second time.
    pub fn partial(&self, bindings: Params) -> Result<Self, ValidationError> {
        self.check_names(&bindings)?;
        if let Some(name) = bindings.keys().find(|name| self.partial.contains_key(*name)) {
            return Err(ValidationError::AlreadyBound { name: name.clone() });
        }
        let mut merged = (*self.partial).clone();
        merged.extend(bindings);
        let mut next = self.derive();
        next.partial = Arc::new(merged);
        Ok(next)
    }

    fn check_names(&self, params: &Params) -> Result<(), ValidationError> {
        match params.keys().find(|name| !self.definition.accepts(name)) {
            Some(name) => Err(ValidationError::UnknownParam { name: name.clone() }),
            None => Ok(()),
        }
    }

    /// Build the request this call would send, without sending it.
    pub fn request(&self, args: Params) -> Result<HttpRequest, ValidationError> {
        build_request(&self.definition, &self.defaults, &self.partial, args)
    }

    /// Validate `args` now and return the fetch as a future.
    pub fn call(&self, args: Params, options: CallOptions) -> Result<PendingCall, ValidationError> {
        let request = self.request(args)?;
        let mut policy = self.policy.clone();
        if let Some(statuses) = options.retry_statuses {
            policy.retry_statuses = statuses;
        }
        if let Some(max_tries) = options.max_tries {
            policy.max_tries = max_tries;
        }
        let this = self.clone();
        Ok(Box::pin(async move {
            this.execute(request, policy, options.cache).await
        }))
    }

    /// `call` with default options.
    pub fn invoke(&self, args: Params) -> Result<PendingCall, ValidationError> {
        self.call(args, CallOptions::default())
    }

    async fn execute(
        self,
        request: HttpRequest,
        policy: RetryPolicy,
        cache: Option<CacheDirective>,
    ) -> Arc<ApiResponse> {
        if let Some(directive) = &cache {
            if let Some(hit) = self.cache.get(&directive.name) {
                debug!(cache = %directive.name, url = %request.url, "cache hit");
                return hit;
            }
        }

        let http = fetch_with_retries(self.transport.as_ref(), &request, &policy).await;
        log_failure(&request, http.as_ref());

        let mut response = ApiResponse::new(request, http);
        run_hooks(&self.hooks, &mut response);
        let response = Arc::new(response);

        if let Some(directive) = cache {
            let ttl = directive.ttl();
            self.cache.put(directive.name, response.clone(), ttl);
        }
        response
    }
}

fn log_failure(request: &HttpRequest, response: Option<&HttpResponse>) {
    match response {
        Some(r) if r.status == 200 => {}
        Some(r) => warn!(
            method = %request.method,
            url = %request.url,
            status = r.status,
            body = %r.body,
            "request error"
        ),
        None => warn!(method = %request.method, url = %request.url, "no response"),
    }
}
