//! # Messaging API Capability
//!
//! The narrow interface the engine needs from whatever actually talks to the
//! messaging API. A bot framework wrapper and a raw HTTP client both
//! implement [`Deliverable`]; the caller picks one at construction.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// One fully-shaped API invocation
#[derive(Debug, Clone, PartialEq)]
pub struct ApiCall {
    /// API method name (`sendMessage`, `copyMessage`, ...)
    pub method: &'static str,
    /// Arguments in the order the router produced them
    pub arguments: Vec<(String, Value)>,
}

impl ApiCall {
    pub fn new(method: &'static str) -> Self {
        Self {
            method,
            arguments: Vec::new(),
        }
    }

    pub fn arg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.arguments.push((name.into(), value.into()));
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.arguments
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    pub fn argument_names(&self) -> Vec<&str> {
        self.arguments.iter().map(|(key, _)| key.as_str()).collect()
    }

    /// JSON object body; later duplicates overwrite earlier ones
    pub fn to_json(&self) -> Value {
        let mut body = Map::new();
        for (key, value) in &self.arguments {
            body.insert(key.clone(), value.clone());
        }
        Value::Object(body)
    }
}

/// Successful API result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApiResponse(pub Value);

impl ApiResponse {
    pub fn into_value(self) -> Value {
        self.0
    }
}

/// How an API call failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiErrorKind {
    /// The API answered with an error
    Api,
    /// The request never got a usable answer
    Network,
    /// The call exceeded the configured timeout
    Timeout,
}

/// Error returned by the messaging API, `{code, description}` plus hints.
///
/// Renders as `code: description`, the shape the failure formatter parses.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{}", self.render())]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub code: Option<i64>,
    pub description: String,
    /// Upstream flood-control hint
    pub retry_after: Option<Duration>,
}

impl ApiError {
    pub fn api(code: i64, description: impl Into<String>) -> Self {
        Self {
            kind: ApiErrorKind::Api,
            code: Some(code),
            description: description.into(),
            retry_after: None,
        }
    }

    /// API error without an error code
    pub fn uncoded(description: impl Into<String>) -> Self {
        Self {
            kind: ApiErrorKind::Api,
            code: None,
            description: description.into(),
            retry_after: None,
        }
    }

    pub fn network(description: impl Into<String>) -> Self {
        Self {
            kind: ApiErrorKind::Network,
            code: None,
            description: description.into(),
            retry_after: None,
        }
    }

    pub fn timeout(after: Duration) -> Self {
        Self {
            kind: ApiErrorKind::Timeout,
            code: None,
            description: format!("request timed out after {}ms", after.as_millis()),
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    fn render(&self) -> String {
        match self.code {
            Some(code) => format!("{code}: {}", self.description),
            None => self.description.clone(),
        }
    }
}

/// Performs exactly one outbound API call per invocation
#[async_trait]
pub trait Deliverable: Send + Sync + 'static {
    async fn call_api(&self, call: &ApiCall) -> Result<ApiResponse, ApiError>;

    /// Client name for logging
    fn client_name(&self) -> &'static str {
        "deliverable"
    }
}

#[async_trait]
impl<T: Deliverable + ?Sized> Deliverable for Arc<T> {
    async fn call_api(&self, call: &ApiCall) -> Result<ApiResponse, ApiError> {
        (**self).call_api(call).await
    }

    fn client_name(&self) -> &'static str {
        (**self).client_name()
    }
}
