//! Post-response pipeline.
//!
//! Hooks run after every fetch, whatever the status, in registration order.
//! Each one runs inside `run_isolated`, so a failing hook is logged and the
//! remaining hooks still see the response.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use crate::error::HookError;
use crate::isolate::run_isolated;
use crate::response::{ApiResponse, ResponseData};

/// Processes a response before it reaches the caller.
pub trait PostResponseHook: Send + Sync {
    fn process(&self, response: &mut ApiResponse) -> Result<(), HookError>;

    /// Name used when logging failures.
    fn name(&self) -> &str {
        "post_response"
    }
}

impl<F> PostResponseHook for F
where
    F: Fn(&mut ApiResponse) -> Result<(), HookError> + Send + Sync,
{
    fn process(&self, response: &mut ApiResponse) -> Result<(), HookError> {
        self(response)
    }
}

/// Run every hook over `response`, isolating failures.
pub fn run_hooks(hooks: &[Arc<dyn PostResponseHook>], response: &mut ApiResponse) {
    for hook in hooks {
        run_isolated("hook", hook.name(), || hook.process(response));
    }
}

/// Parses the body as JSON and builds `ResponseData` from it.
///
/// With `extract` configured, the body must carry a boolean `ok`; when it is
/// true each declared field is copied (missing fields become `None`). Parse
/// failures are recorded in `parse_error` and logged rather than returned.
#[derive(Debug, Clone, Default)]
pub struct JsonBodyHook {
    extract: Option<Vec<String>>,
    only_status: Option<BTreeSet<u16>>,
}

impl JsonBodyHook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extracting<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            extract: Some(fields.into_iter().map(Into::into).collect()),
            only_status: None,
        }
    }

    /// Parse only responses whose status is in `statuses`; others get no
    /// `json_body`.
    pub fn only_status<I: IntoIterator<Item = u16>>(mut self, statuses: I) -> Self {
        self.only_status = Some(statuses.into_iter().collect());
        self
    }

    fn fail(response: &mut ApiResponse, reason: String) {
        warn!(url = %response.request.url, status = ?response.status(), %reason, "unparseable response body");
        response.json_body = None;
        response.data = None;
        response.parse_error = Some(reason);
    }
}

impl PostResponseHook for JsonBodyHook {
    fn process(&self, response: &mut ApiResponse) -> Result<(), HookError> {
        let Some(http) = &response.http else {
            Self::fail(response, "no response received".to_string());
            return Ok(());
        };

        if let Some(statuses) = &self.only_status {
            if !statuses.contains(&http.status) {
                response.json_body = None;
                return Ok(());
            }
        }

        let body: Value = match serde_json::from_str(&http.body) {
            Ok(body) => body,
            Err(err) => {
                Self::fail(response, err.to_string());
                return Ok(());
            }
        };

        if let Some(fields) = &self.extract {
            let Some(ok) = body.get("ok").and_then(Value::as_bool) else {
                Self::fail(response, "body has no boolean `ok`".to_string());
                return Ok(());
            };
            let error = if ok {
                None
            } else {
                body.get("error").and_then(Value::as_str).map(str::to_string)
            };
            let fields = if ok {
                fields
                    .iter()
                    .map(|field| (field.clone(), body.get(field).cloned()))
                    .collect()
            } else {
                Default::default()
            };
            response.data = Some(ResponseData { ok, error, fields });
        }

        response.json_body = Some(body);
        response.parse_error = None;
        Ok(())
    }

    fn name(&self) -> &str {
        "json_body"
    }
}
