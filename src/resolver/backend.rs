//! Value backend client.
//!
//! ```text
//! GET  /resolve/{template}                      -> {"value": string}
//! POST /resolve/batch {"templates": [string]}   -> {"values": {template: value}}
//! GET  /health                                  -> 200
//! ```

use reqwest::{Url, blocking::Client};
use rustc_hash::FxHashMap;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    /// Connection refused, DNS failure, timeout.
    #[error("backend unreachable: {0}")]
    Transport(String),

    #[error("backend returned status {0}")]
    Status(u16),

    #[error("malformed backend response: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            Self::Status(status.as_u16())
        } else if err.is_decode() || err.is_body() {
            Self::Malformed(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// Source of remote template values.
pub trait Backend: Send + Sync {
    fn resolve(&self, template: &str) -> Result<String, BackendError>;

    /// Resolve several templates in one request. Templates the backend does
    /// not know are simply absent from the returned map.
    fn resolve_batch(&self, templates: &[String])
    -> Result<FxHashMap<String, String>, BackendError>;

    fn health(&self) -> Result<(), BackendError>;

    /// Where the backend lives, for log messages.
    fn describe(&self) -> String;
}

#[derive(Deserialize)]
struct SingleReply {
    value: Value,
}

#[derive(Deserialize)]
struct BatchReply {
    values: FxHashMap<String, Value>,
}

/// Render a JSON scalar as display text. `null` and containers are rejected.
fn scalar_text(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// HTTP implementation of [`Backend`].
pub struct HttpBackend {
    base: Url,
    client: Client,
}

impl HttpBackend {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, BackendError> {
        let base = Url::parse(url).map_err(|e| BackendError::Transport(format!("{url}: {e}")))?;
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .user_agent(concat!("codebook/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { base, client })
    }

    /// Base URL with `segments` appended as path segments.
    fn endpoint<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Result<Url, BackendError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| BackendError::Transport(format!("{} cannot be a base URL", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

impl Backend for HttpBackend {
    fn resolve(&self, template: &str) -> Result<String, BackendError> {
        let url = self.endpoint(["resolve", template])?;
        let reply: SingleReply = self.client.get(url).send()?.error_for_status()?.json()?;
        scalar_text(reply.value)
            .ok_or_else(|| BackendError::Malformed(format!("non-scalar value for `{template}`")))
    }

    fn resolve_batch(
        &self,
        templates: &[String],
    ) -> Result<FxHashMap<String, String>, BackendError> {
        let url = self.endpoint(["resolve", "batch"])?;
        let reply: BatchReply = self
            .client
            .post(url)
            .json(&json!({ "templates": templates }))
            .send()?
            .error_for_status()?
            .json()?;

        Ok(reply
            .values
            .into_iter()
            .filter_map(|(name, value)| scalar_text(value).map(|v| (name, v)))
            .collect())
    }

    fn health(&self) -> Result<(), BackendError> {
        let url = self.endpoint(["health"])?;
        self.client.get(url).send()?.error_for_status()?;
        Ok(())
    }

    fn describe(&self) -> String {
        self.base.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockServer, unreachable_url};

    fn backend(url: &str) -> HttpBackend {
        HttpBackend::new(url, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_resolve_single() {
        let server = MockServer::start(|req| match req.url.as_str() {
            "/resolve/a.b" => (200, r#"{"value": "7"}"#.into()),
            "/resolve/n" => (200, r#"{"value": 42}"#.into()),
            _ => (404, "{}".into()),
        });
        let backend = backend(&server.url);

        assert_eq!(backend.resolve("a.b").unwrap(), "7");
        assert_eq!(backend.resolve("n").unwrap(), "42");
        assert!(matches!(
            backend.resolve("missing"),
            Err(BackendError::Status(404))
        ));
    }

    #[test]
    fn test_resolve_batch() {
        let server = MockServer::start(|req| {
            assert_eq!(req.method, "POST");
            assert_eq!(req.url, "/resolve/batch");
            let body: Value = serde_json::from_str(&req.body).unwrap();
            assert_eq!(body["templates"], json!(["t1", "t2", "t3"]));
            (200, r#"{"values": {"t1": "one", "t2": "two"}}"#.into())
        });
        let backend = backend(&server.url);

        let values = backend
            .resolve_batch(&["t1".into(), "t2".into(), "t3".into()])
            .unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(values["t1"], "one");
        assert!(!values.contains_key("t3"));
    }

    #[test]
    fn test_malformed_body() {
        let server = MockServer::start(|_| (200, "not json".into()));
        let backend = backend(&server.url);

        assert!(matches!(
            backend.resolve("a"),
            Err(BackendError::Malformed(_))
        ));
        assert!(matches!(
            backend.resolve_batch(&["a".into()]),
            Err(BackendError::Malformed(_))
        ));
    }

    #[test]
    fn test_null_value_is_malformed() {
        let server = MockServer::start(|_| (200, r#"{"value": null}"#.into()));
        assert!(matches!(
            backend(&server.url).resolve("a"),
            Err(BackendError::Malformed(_))
        ));
    }

    #[test]
    fn test_unreachable_is_transport_error() {
        let backend = backend(&unreachable_url());
        let err = backend.resolve("a").unwrap_err();
        assert!(matches!(err, BackendError::Transport(_)), "{err:?}");
        assert!(matches!(backend.health(), Err(BackendError::Transport(_))));
    }

    #[test]
    fn test_health() {
        let server = MockServer::start(|req| match req.url.as_str() {
            "/health" => (200, "{}".into()),
            _ => (500, "{}".into()),
        });
        assert!(backend(&server.url).health().is_ok());
    }

    #[test]
    fn test_base_url_with_path() {
        let server = MockServer::start(|req| match req.url.as_str() {
            "/api/resolve/x" => (200, r#"{"value": "ok"}"#.into()),
            _ => (404, "{}".into()),
        });
        let backend = backend(&format!("{}/api/", server.url));
        assert_eq!(backend.resolve("x").unwrap(), "ok");
    }
}
