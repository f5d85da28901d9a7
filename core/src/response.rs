//! Typed result of a bound call.
//!
//! # Design
//! `ApiResponse` is the object the post-response pipeline mutates and the
//! cache shares. Its shape does not depend on which fields an endpoint
//! extracts: extracted fields live in `ResponseData::fields`, each optional.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::http::{HttpRequest, HttpResponse};

/// Structured view of a `{"ok": ..., "error": ...}` response body.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResponseData {
    pub ok: bool,
    /// Set when `ok` is false and the body carried an `error` string.
    pub error: Option<String>,
    /// Declared fields; absent in the body maps to `None`. Empty unless `ok`.
    pub fields: BTreeMap<String, Option<Value>>,
}

impl ResponseData {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field).and_then(Option::as_ref)
    }
}

/// Outcome of one bound call after the post-response pipeline has run.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub request: HttpRequest,
    /// `None` when the final attempt received no response.
    pub http: Option<HttpResponse>,
    pub json_body: Option<Value>,
    pub data: Option<ResponseData>,
    /// Why the body could not be turned into `json_body` / `data`.
    pub parse_error: Option<String>,
}

impl ApiResponse {
    pub fn new(request: HttpRequest, http: Option<HttpResponse>) -> Self {
        Self {
            request,
            http,
            json_body: None,
            data: None,
            parse_error: None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        self.http.as_ref().map(|r| r.status)
    }

    pub fn body(&self) -> Option<&str> {
        self.http.as_ref().map(|r| r.body.as_str())
    }

    /// HTTP 200 and a parsed body reporting `ok: true`.
    pub fn is_ok(&self) -> bool {
        self.status() == Some(200) && self.data.as_ref().is_some_and(|d| d.ok)
    }

    /// An extracted field, if present.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.data.as_ref().and_then(|d| d.get(name))
    }
}
