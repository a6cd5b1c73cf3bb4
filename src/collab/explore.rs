//! Code-exploration queries for `<query>` blocks.
//!
//! The service takes `POST {url}/api/{endpoint}` with a JSON body of
//! parameters and answers:
//!
//! ```json
//! {"success": true, "data": "markdown or JSON text" | {"content": "..."}, "error": null}
//! ```

use reqwest::{Url, blocking::Client};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::time::Duration;

/// Body of a successful query.
#[derive(Debug, Clone, PartialEq)]
pub enum ExploreResponse {
    Json(Value),
    Text(String),
}

impl ExploreResponse {
    /// Text content is parsed as JSON when it looks like JSON.
    fn from_text(text: String) -> Self {
        let trimmed = text.trim_start();
        if (trimmed.starts_with('{') || trimmed.starts_with('['))
            && let Ok(value) = serde_json::from_str(trimmed)
        {
            return Self::Json(value);
        }
        Self::Text(text)
    }
}

pub trait Explorer: Send + Sync {
    fn query(&self, endpoint: &str, params: &[(String, String)]) -> Result<ExploreResponse, String>;

    fn health(&self) -> Result<(), String>;
}

#[derive(Deserialize)]
struct Reply {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    error: Option<String>,
}

/// Turn block attributes into the JSON request body.
///
/// `keywords` is split on commas, `true`/`false` become booleans, `limit`
/// and `arity` become integers, and `format` defaults to `json`.
pub fn build_params(params: &[(String, String)]) -> Map<String, Value> {
    let mut body = Map::new();
    for (key, raw) in params {
        let value = match (key.as_str(), raw.as_str()) {
            ("keywords", _) => Value::Array(
                raw.split(',')
                    .map(str::trim)
                    .filter(|k| !k.is_empty())
                    .map(|k| Value::String(k.to_owned()))
                    .collect(),
            ),
            (_, "true") => Value::Bool(true),
            (_, "false") => Value::Bool(false),
            ("limit" | "arity", _) => raw
                .trim()
                .parse::<i64>()
                .map_or_else(|_| Value::String(raw.clone()), Value::from),
            _ => Value::String(raw.clone()),
        };
        body.insert(key.clone(), value);
    }
    body.entry("format")
        .or_insert_with(|| Value::String("json".into()));
    body
}

/// HTTP implementation of [`Explorer`].
pub struct HttpExplorer {
    base: Url,
    client: Client,
}

impl HttpExplorer {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, String> {
        let base = Url::parse(url).map_err(|e| format!("{url}: {e}"))?;
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("codebook/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| e.to_string())?;
        Ok(Self { base, client })
    }

    fn endpoint(&self, name: &str) -> Result<Url, String> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| format!("{} cannot be a base URL", self.base))?
            .pop_if_empty()
            .extend(["api", name]);
        Ok(url)
    }
}

impl Explorer for HttpExplorer {
    fn query(&self, endpoint: &str, params: &[(String, String)]) -> Result<ExploreResponse, String> {
        let url = self.endpoint(endpoint)?;
        let response = self
            .client
            .post(url)
            .json(&build_params(params))
            .send()
            .map_err(|e| format!("request failed: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("HTTP {}", status.as_u16()));
        }

        let reply: Reply = response
            .json()
            .map_err(|e| format!("malformed response: {e}"))?;
        if !reply.success {
            return Err(reply.error.unwrap_or_else(|| "query failed".into()));
        }

        Ok(match reply.data {
            Value::Null => ExploreResponse::Text(String::new()),
            Value::String(text) => ExploreResponse::from_text(text),
            Value::Object(mut map) => match map.remove("content") {
                Some(Value::String(text)) => ExploreResponse::from_text(text),
                Some(other) => {
                    map.insert("content".into(), other);
                    ExploreResponse::Json(Value::Object(map))
                }
                None => ExploreResponse::Json(Value::Object(map)),
            },
            other => ExploreResponse::Json(other),
        })
    }

    fn health(&self) -> Result<(), String> {
        let url = self.endpoint("health")?;
        let response = self.client.get(url).send().map_err(|e| e.to_string())?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(format!("HTTP {}", response.status().as_u16()))
        }
    }
}
