//! Declarative endpoint definitions.
//!
//! # Design
//! An `EndpointDefinition` is static data: where the endpoint lives, how its
//! parameters are typed, and how they are encoded. It can be assembled with
//! the `with_*` builder methods or deserialized from a JSON table of the form
//!
//! ```json
//! {
//!   "protocol": "https",
//!   "host": "slack.com",
//!   "url": "/api/users/{id}",
//!   "method": "GET",
//!   "params": { "token": { "type": "string", "is_required": true } },
//!   "extract": ["user"]
//! }
//! ```
//!
//! Parameter declaration order is preserved and is the order in which
//! parameters are encoded. Note that `serde_json::Value` objects are sorted
//! by key, so deserialize from text (`from_json`) when order matters.

use std::{collections::BTreeMap, fmt, sync::Arc};

use serde::{
    de::{MapAccess, Visitor},
    Deserialize, Deserializer,
};
use serde_json::Value;

use crate::error::DefinitionError;
use crate::http::{BasicAuth, HttpMethod};

/// Custom coercion applied to a parameter value. The `Err` message is reported
/// as the coercion target.
pub type Coercer = Arc<dyn Fn(&Value) -> Result<Value, String> + Send + Sync>;

/// URL scheme of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Http,
    Https,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Http => f.write_str("http"),
            Protocol::Https => f.write_str("https"),
        }
    }
}

/// How POST/PUT parameters are encoded into the body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyEncoding {
    #[default]
    Form,
    Json,
}

/// Semantic type of a parameter.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    String,
    Int,
    Float,
    Dict,
    List,
    Bool,
    /// A list joined with `,`, or a string passed through.
    CommaString,
    /// A boolean rendered as the literal `"true"` / `"false"`.
    BoolString,
    #[serde(skip)]
    Custom(Coercer),
}

impl ParamType {
    /// Wrap a coercion function.
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        ParamType::Custom(Arc::new(f))
    }

    pub fn name(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Int => "int",
            ParamType::Float => "float",
            ParamType::Dict => "dict",
            ParamType::List => "list",
            ParamType::Bool => "bool",
            ParamType::CommaString => "comma_string",
            ParamType::BoolString => "bool_string",
            ParamType::Custom(_) => "custom",
        }
    }
}

impl fmt::Debug for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Declaration of one parameter.
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: String,
    /// `None` accepts any value unchanged.
    pub ty: Option<ParamType>,
    pub required: bool,
    pub default: Option<Value>,
    pub choices: Option<Vec<Value>>,
}

impl ParamSpec {
    pub fn new(name: impl Into<String>, ty: ParamType) -> Self {
        Self {
            name: name.into(),
            ty: Some(ty),
            required: false,
            default: None,
            choices: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn choices<I, V>(mut self, choices: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.choices = Some(choices.into_iter().map(Into::into).collect());
        self
    }
}

/// Collect the names between `{` and `}` in a path template.
fn scan_placeholders(path: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut rest = path;
    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            break;
        };
        names.push(after[..close].to_string());
        rest = &after[close + 1..];
    }
    names
}

#[derive(Deserialize)]
struct ParamConfig {
    #[serde(rename = "type", default)]
    ty: Option<ParamType>,
    #[serde(default)]
    is_required: bool,
    #[serde(default)]
    default: Option<Value>,
    #[serde(default)]
    choices: Option<Vec<Value>>,
}

fn params_in_order<'de, D>(deserializer: D) -> Result<Vec<ParamSpec>, D::Error>
where
    D: Deserializer<'de>,
{
    struct ParamsVisitor;

    impl<'de> Visitor<'de> for ParamsVisitor {
        type Value = Vec<ParamSpec>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a map of parameter name to parameter spec")
        }

        fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
            let mut params = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some((name, config)) = map.next_entry::<String, ParamConfig>()? {
                params.push(ParamSpec {
                    name,
                    ty: config.ty,
                    required: config.is_required,
                    default: config.default,
                    choices: config.choices,
                });
            }
            Ok(params)
        }
    }

    deserializer.deserialize_map(ParamsVisitor)
}

#[derive(Deserialize)]
struct RawDefinition {
    #[serde(default)]
    protocol: Protocol,
    #[serde(default)]
    host: Option<String>,
    url: String,
    #[serde(default)]
    method: HttpMethod,
    #[serde(default)]
    request_body_type: BodyEncoding,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(default, deserialize_with = "params_in_order")]
    params: Vec<ParamSpec>,
    #[serde(default)]
    extract: Option<Vec<String>>,
    #[serde(default)]
    auth: Option<BasicAuth>,
}

impl From<RawDefinition> for EndpointDefinition {
    fn from(raw: RawDefinition) -> Self {
        let mut def = EndpointDefinition::new(raw.method, raw.url)
            .with_protocol(raw.protocol)
            .with_body_encoding(raw.request_body_type);
        def.host = raw.host;
        def.headers = raw.headers.into_iter().collect();
        def.params = raw.params;
        def.extract = raw.extract;
        def.auth = raw.auth;
        def
    }
}

/// Static description of one remote operation.
#[derive(Debug, Clone, Deserialize)]
#[serde(from = "RawDefinition")]
pub struct EndpointDefinition {
    protocol: Protocol,
    host: Option<String>,
    path: String,
    method: HttpMethod,
    body_encoding: BodyEncoding,
    headers: Vec<(String, String)>,
    params: Vec<ParamSpec>,
    placeholders: Vec<String>,
    extract: Option<Vec<String>>,
    auth: Option<BasicAuth>,
}

impl EndpointDefinition {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        let path = path.into();
        let placeholders = scan_placeholders(&path);
        Self {
            protocol: Protocol::default(),
            host: None,
            path,
            method,
            body_encoding: BodyEncoding::default(),
            headers: Vec::new(),
            params: Vec::new(),
            placeholders,
            extract: None,
            auth: None,
        }
    }

    /// Parse a JSON table, keeping parameter declaration order.
    pub fn from_json(name: &str, json: &str) -> Result<Self, DefinitionError> {
        serde_json::from_str(json).map_err(|source| DefinitionError::Invalid {
            name: name.to_string(),
            source,
        })
    }

    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn with_body_encoding(mut self, encoding: BodyEncoding) -> Self {
        self.body_encoding = encoding;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_param(mut self, param: ParamSpec) -> Self {
        self.params.retain(|p| p.name != param.name);
        self.params.push(param);
        self
    }

    pub fn with_extract<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extract = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.auth = Some(BasicAuth {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    /// Body encoding, or `None` for methods that do not send a body.
    pub fn body_encoding(&self) -> Option<BodyEncoding> {
        self.method.has_body().then_some(self.body_encoding)
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    pub fn param(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Names of the `{name}` placeholders in the path template, in order.
    pub fn placeholders(&self) -> &[String] {
        &self.placeholders
    }

    pub fn is_placeholder(&self, name: &str) -> bool {
        self.placeholders.iter().any(|p| p == name)
    }

    /// True if `name` may be supplied at all.
    pub fn accepts(&self, name: &str) -> bool {
        self.param(name).is_some() || self.is_placeholder(name)
    }

    pub fn extract(&self) -> Option<&[String]> {
        self.extract.as_deref()
    }

    pub fn auth(&self) -> Option<&BasicAuth> {
        self.auth.as_ref()
    }

    /// Declared defaults, keyed by parameter name.
    pub fn defaults(&self) -> BTreeMap<String, Value> {
        self.params
            .iter()
            .filter_map(|p| p.default.clone().map(|v| (p.name.clone(), v)))
            .collect()
    }
}
