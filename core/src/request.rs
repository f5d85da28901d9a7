//! Request builder: endpoint definition + call arguments → `HttpRequest`.
//!
//! # Design
//! Building is a pure function. Values are merged in the order
//! defaults → call arguments → partial bindings, validated and coerced
//! against the declared parameters, and then split between the path template
//! and the query string or body. Nothing here performs I/O, so every
//! validation failure surfaces synchronously at the call site.

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use url::form_urlencoded;

use crate::endpoint::{BodyEncoding, EndpointDefinition, ParamSpec, ParamType};
use crate::error::ValidationError;
use crate::http::HttpRequest;

/// Named call arguments.
pub type Params = BTreeMap<String, Value>;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
const JSON_CONTENT_TYPE: &str = "application/json";

/// Build a transport-ready request.
///
/// `partial` values always win over `args`, and supplying a partially bound
/// name in `args` is an error rather than an override.
pub fn build_request(
    definition: &EndpointDefinition,
    defaults: &Params,
    partial: &Params,
    args: Params,
) -> Result<HttpRequest, ValidationError> {
    let host = definition.host().ok_or(ValidationError::HostNotSet)?;

    if let Some(name) = args.keys().find(|name| partial.contains_key(*name)) {
        return Err(ValidationError::AlreadyBound { name: name.clone() });
    }

    let mut merged = defaults.clone();
    merged.extend(args);
    merged.extend(partial.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged.retain(|_, value| !value.is_null());

    // Placeholders are implicitly required; report them before anything else
    // about the arguments.
    if let Some(name) = definition
        .placeholders()
        .iter()
        .find(|name| !merged.contains_key(*name))
    {
        return Err(ValidationError::MissingPathParam { name: name.clone() });
    }

    for spec in definition.params() {
        match merged.remove(&spec.name) {
            Some(value) => {
                let value = coerce(spec, value)?;
                merged.insert(spec.name.clone(), value);
            }
            None if spec.required => {
                return Err(ValidationError::MissingParam {
                    name: spec.name.clone(),
                })
            }
            None => {}
        }
    }

    if let Some(name) = merged.keys().find(|name| !definition.accepts(name)) {
        return Err(ValidationError::UnknownParam { name: name.clone() });
    }

    let path = substitute_path(definition, &mut merged)?;

    let remaining: Vec<(&str, &Value)> = definition
        .params()
        .iter()
        .filter_map(|spec| merged.get(&spec.name).map(|v| (spec.name.as_str(), v)))
        .collect();

    let mut headers = definition.headers().to_vec();
    let mut url = format!("{}://{}{}", definition.protocol(), host, path);
    let mut body = None;

    match definition.body_encoding() {
        None => {
            if !remaining.is_empty() {
                let query = encode_pairs(&remaining);
                url.push(if url.contains('?') { '&' } else { '?' });
                url.push_str(&query);
            }
        }
        Some(BodyEncoding::Form) => {
            headers.push(("content-type".to_string(), FORM_CONTENT_TYPE.to_string()));
            body = Some(encode_pairs(&remaining));
        }
        Some(BodyEncoding::Json) => {
            let object: Map<String, Value> = remaining
                .into_iter()
                .map(|(name, value)| (name.to_string(), value.clone()))
                .collect();
            headers.push(("content-type".to_string(), JSON_CONTENT_TYPE.to_string()));
            body = Some(Value::Object(object).to_string());
        }
    }

    Ok(HttpRequest {
        method: definition.method(),
        url,
        headers,
        body,
        auth: definition.auth().cloned(),
    })
}

/// Substitute placeholder values into the path template in one pass over the
/// template, then remove them from `merged`. Substituted text is never
/// scanned again.
fn substitute_path(
    definition: &EndpointDefinition,
    merged: &mut Params,
) -> Result<String, ValidationError> {
    let template = definition.path();
    let mut path = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            break;
        };
        let name = &after[..close];
        let value = merged
            .get(name)
            .ok_or_else(|| ValidationError::MissingPathParam {
                name: name.to_string(),
            })?;
        path.push_str(&rest[..open]);
        path.push_str(&render(value));
        rest = &after[close + 1..];
    }
    path.push_str(rest);

    for name in definition.placeholders() {
        merged.remove(name);
    }
    Ok(path)
}

fn encode_pairs(pairs: &[(&str, &Value)]) -> String {
    form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs.iter().map(|(name, value)| (*name, render(value))))
        .finish()
}

/// Text form of a value for paths, queries, and form bodies.
fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Validate and convert one parameter value against its declaration.
pub fn coerce(spec: &ParamSpec, value: Value) -> Result<Value, ValidationError> {
    let value = match &spec.ty {
        Some(ty) => coerce_type(ty, value)?,
        None => value,
    };

    if let Some(choices) = &spec.choices {
        if !choices.contains(&value) {
            return Err(ValidationError::InvalidChoice {
                name: spec.name.clone(),
                value: render(&value),
            });
        }
    }
    Ok(value)
}

fn coerce_type(ty: &ParamType, value: Value) -> Result<Value, ValidationError> {
    let fail = |value: &Value, target: &str| ValidationError::Coercion {
        value: value.to_string(),
        target: target.to_string(),
    };

    match ty {
        ParamType::String => match value {
            Value::String(_) => Ok(value),
            Value::Number(n) => Ok(Value::String(n.to_string())),
            Value::Bool(b) => Ok(Value::String(b.to_string())),
            other => Err(fail(&other, "a string")),
        },
        ParamType::Int => match &value {
            Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value.clone()),
            Value::Number(n) => n
                .as_f64()
                .filter(|f| f.is_finite())
                .map(|f| Value::from(f.trunc() as i64))
                .ok_or_else(|| fail(&value, "an int")),
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| fail(&value, "an int")),
            Value::Bool(b) => Ok(Value::from(i64::from(*b))),
            _ => Err(fail(&value, "an int")),
        },
        ParamType::Float => {
            let parsed = match &value {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse::<f64>().ok(),
                Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
                _ => None,
            };
            parsed
                .filter(|f| f.is_finite())
                .map(Value::from)
                .ok_or_else(|| fail(&value, "a float"))
        }
        ParamType::Dict if value.is_object() => Ok(value),
        ParamType::Dict => Err(fail(&value, "a dictionary")),
        ParamType::List if value.is_array() => Ok(value),
        ParamType::List => Err(fail(&value, "a list")),
        ParamType::Bool if value.is_boolean() => Ok(value),
        ParamType::Bool => Err(fail(&value, "a boolean")),
        ParamType::CommaString => match value {
            Value::String(_) => Ok(value),
            Value::Array(items) => match items.iter().map(Value::as_str).collect::<Option<Vec<_>>>() {
                Some(parts) => Ok(Value::String(parts.join(","))),
                None => Err(fail(&Value::Array(items.clone()), "a comma separated string")),
            },
            other => Err(fail(&other, "a comma separated string")),
        },
        ParamType::BoolString => match &value {
            Value::Bool(b) => Ok(Value::String(b.to_string())),
            Value::String(s) => {
                let lowered = s.to_ascii_lowercase();
                if lowered == "true" || lowered == "false" {
                    Ok(Value::String(lowered))
                } else {
                    Err(fail(&value, "a bool_string"))
                }
            }
            _ => Err(fail(&value, "a bool_string")),
        },
        ParamType::Custom(f) => (**f)(&value).map_err(|target| fail(&value, &target)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::Protocol;
    use crate::http::HttpMethod;
    use serde_json::json;

    fn params(value: Value) -> Params {
        match value {
            Value::Object(map) => map.into_iter().collect(),
            _ => panic!("params must be an object"),
        }
    }

    fn channels_list() -> EndpointDefinition {
        EndpointDefinition::from_json(
            "channels.list",
            r#"{
                "host": "slack.com",
                "protocol": "https",
                "url": "/api/channels.list",
                "method": "GET",
                "params": {
                    "token": { "type": "string", "is_required": true },
                    "exclude_archived": { "type": "bool_string" }
                }
            }"#,
        )
        .unwrap()
    }

    fn spec(ty: ParamType) -> ParamSpec {
        ParamSpec::new("p", ty)
    }

    #[test]
    fn substituted_values_are_not_rescanned() {
        let def = EndpointDefinition::from_json("nested", r#"{ "host": "h", "url": "/a/{x}/{y}" }"#)
            .unwrap();
        let req = build_request(
            &def,
            &Params::new(),
            &Params::new(),
            params(json!({"x": "{y}", "y": "1"})),
        )
        .unwrap();
        assert_eq!(req.url, "http://h/a/{y}/1");
    }

    #[test]
    fn get_parameters_land_in_query_in_declaration_order() {
        let req = build_request(
            &channels_list(),
            &Params::new(),
            &Params::new(),
            params(json!({"exclude_archived": true, "token": "abc"})),
        )
        .unwrap();
        assert_eq!(req.method, HttpMethod::Get);
        assert!(req.url.contains("token=abc&exclude_archived=true"), "{}", req.url);
        assert!(req.url.starts_with("https://slack.com/api/channels.list?"));
        assert!(req.body.is_none());
    }

    #[test]
    fn missing_host_fails_before_anything_else() {
        let def = EndpointDefinition::new(HttpMethod::Get, "/x/{id}");
        let err = build_request(&def, &Params::new(), &Params::new(), Params::new()).unwrap_err();
        assert_eq!(err, ValidationError::HostNotSet);
    }

    #[test]
    fn missing_path_placeholder_is_reported() {
        let def = EndpointDefinition::new(HttpMethod::Get, "/api/users/{id}").with_host("h");
        let err = build_request(
            &def,
            &Params::new(),
            &Params::new(),
            params(json!({"other": 1})),
        )
        .unwrap_err();
        assert_eq!(err, ValidationError::MissingPathParam { name: "id".into() });
    }

    #[test]
    fn path_placeholders_are_substituted_and_not_repeated() {
        let def = EndpointDefinition::new(HttpMethod::Delete, "/teams/{team}/users/{id}")
            .with_host("api.local")
            .with_param(ParamSpec::new("id", ParamType::Int))
            .with_param(ParamSpec::new("hard", ParamType::BoolString));
        let req = build_request(
            &def,
            &Params::new(),
            &Params::new(),
            params(json!({"team": "T1", "id": "42", "hard": "TRUE"})),
        )
        .unwrap();
        assert_eq!(req.url, "http://api.local/teams/T1/users/42?hard=true");
    }

    #[test]
    fn partial_binding_cannot_be_supplied_again() {
        let partial = params(json!({"token": "xoxb"}));
        let err = build_request(
            &channels_list(),
            &Params::new(),
            &partial,
            params(json!({"token": "other"})),
        )
        .unwrap_err();
        assert_eq!(err, ValidationError::AlreadyBound { name: "token".into() });
    }

    #[test]
    fn defaults_are_overridden_by_call_args() {
        let defaults = params(json!({"exclude_archived": false, "token": "default"}));
        let req = build_request(
            &channels_list(),
            &defaults,
            &Params::new(),
            params(json!({"exclude_archived": true})),
        )
        .unwrap();
        assert!(req.url.ends_with("?token=default&exclude_archived=true"));
    }

    #[test]
    fn required_and_unknown_params_are_rejected() {
        let err = build_request(&channels_list(), &Params::new(), &Params::new(), Params::new())
            .unwrap_err();
        assert_eq!(err, ValidationError::MissingParam { name: "token".into() });

        let err = build_request(
            &channels_list(),
            &Params::new(),
            &Params::new(),
            params(json!({"token": "a", "limit": 3})),
        )
        .unwrap_err();
        assert_eq!(err, ValidationError::UnknownParam { name: "limit".into() });
    }

    #[test]
    fn null_counts_as_absent() {
        let err = build_request(
            &channels_list(),
            &Params::new(),
            &Params::new(),
            params(json!({"token": null})),
        )
        .unwrap_err();
        assert_eq!(err, ValidationError::MissingParam { name: "token".into() });
    }

    #[test]
    fn post_form_body() {
        let def = EndpointDefinition::new(HttpMethod::Post, "/api/chat.postMessage")
            .with_host("slack.com")
            .with_protocol(Protocol::Https)
            .with_param(ParamSpec::new("channel", ParamType::String).required())
            .with_param(ParamSpec::new("text", ParamType::String));
        let req = build_request(
            &def,
            &Params::new(),
            &Params::new(),
            params(json!({"channel": "C1", "text": "hi there"})),
        )
        .unwrap();
        assert_eq!(req.url, "https://slack.com/api/chat.postMessage");
        assert_eq!(req.body.as_deref(), Some("channel=C1&text=hi+there"));
        assert_eq!(req.header("content-type"), Some(FORM_CONTENT_TYPE));
    }

    #[test]
    fn post_json_body() {
        let def = EndpointDefinition::new(HttpMethod::Put, "/items/{id}")
            .with_host("h")
            .with_body_encoding(BodyEncoding::Json)
            .with_header("x-trace", "1")
            .with_param(ParamSpec::new("tags", ParamType::List))
            .with_param(ParamSpec::new("count", ParamType::Int));
        let req = build_request(
            &def,
            &Params::new(),
            &Params::new(),
            params(json!({"id": 7, "tags": ["a", "b"], "count": "3"})),
        )
        .unwrap();
        assert_eq!(req.url, "http://h/items/7");
        let body: Value = serde_json::from_str(req.body.as_deref().unwrap()).unwrap();
        assert_eq!(body, json!({"tags": ["a", "b"], "count": 3}));
        assert_eq!(req.header("content-type"), Some(JSON_CONTENT_TYPE));
        assert_eq!(req.header("x-trace"), Some("1"));
    }

    #[test]
    fn auth_pair_is_carried_on_the_request() {
        let def = EndpointDefinition::new(HttpMethod::Get, "/").with_host("h").with_auth("u", "p");
        let req = build_request(&def, &Params::new(), &Params::new(), Params::new()).unwrap();
        assert_eq!(req.auth.unwrap().username, "u");
    }

    #[test]
    fn scalar_coercions() {
        assert_eq!(coerce(&spec(ParamType::String), json!(12)).unwrap(), json!("12"));
        assert!(coerce(&spec(ParamType::String), json!([1])).is_err());
        assert_eq!(coerce(&spec(ParamType::Int), json!(" 12 ")).unwrap(), json!(12));
        assert_eq!(coerce(&spec(ParamType::Int), json!(3.9)).unwrap(), json!(3));
        assert_eq!(coerce(&spec(ParamType::Float), json!("1.5")).unwrap(), json!(1.5));

        let err = coerce(&spec(ParamType::Int), json!("abc")).unwrap_err();
        assert_eq!(
            err,
            ValidationError::Coercion {
                value: "\"abc\"".into(),
                target: "an int".into()
            }
        );
    }

    #[test]
    fn shape_coercions_require_the_shape() {
        assert!(coerce(&spec(ParamType::Dict), json!({"a": 1})).is_ok());
        assert!(coerce(&spec(ParamType::Dict), json!([1])).is_err());
        assert!(coerce(&spec(ParamType::List), json!([1])).is_ok());
        assert!(coerce(&spec(ParamType::List), json!("1,2")).is_err());
        assert!(coerce(&spec(ParamType::Bool), json!(false)).is_ok());
        assert!(coerce(&spec(ParamType::Bool), json!("false")).is_err());
    }

    #[test]
    fn comma_string_joins_lists() {
        let ty = ParamType::CommaString;
        assert_eq!(coerce(&spec(ty.clone()), json!(["a", "b"])).unwrap(), json!("a,b"));
        assert_eq!(coerce(&spec(ty.clone()), json!("a,b")).unwrap(), json!("a,b"));
        assert!(coerce(&spec(ty.clone()), json!([1, 2])).is_err());
        assert!(coerce(&spec(ty), json!(1)).is_err());
    }

    #[test]
    fn bool_string_normalizes() {
        let ty = ParamType::BoolString;
        assert_eq!(coerce(&spec(ty.clone()), json!(true)).unwrap(), json!("true"));
        assert_eq!(coerce(&spec(ty.clone()), json!("FaLsE")).unwrap(), json!("false"));
        assert!(coerce(&spec(ty.clone()), json!("yes")).is_err());
        assert!(coerce(&spec(ty), json!(1)).is_err());
    }

    #[test]
    fn custom_coercion_replaces_the_value() {
        let upper = ParamType::custom(|v| {
            v.as_str()
                .map(|s| Value::String(s.to_uppercase()))
                .ok_or_else(|| "an uppercase string".to_string())
        });
        assert_eq!(coerce(&spec(upper.clone()), json!("abc")).unwrap(), json!("ABC"));
        let err = coerce(&spec(upper), json!(1)).unwrap_err();
        assert!(matches!(err, ValidationError::Coercion { target, .. } if target == "an uppercase string"));
    }

    #[test]
    fn choices_are_checked_after_coercion() {
        let spec = ParamSpec::new("count", ParamType::Int).choices([10, 20]);
        assert_eq!(coerce(&spec, json!("20")).unwrap(), json!(20));
        let err = coerce(&spec, json!(30)).unwrap_err();
        assert_eq!(
            err,
            ValidationError::InvalidChoice {
                name: "count".into(),
                value: "30".into()
            }
        );
    }
}
