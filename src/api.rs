use anyhow::Result;
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::config::Config;
use crate::http_client::http_client;

/// Everything that can go wrong talking to the CRCON backend.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(String),
    #[error("http {status}: {body}")]
    Http { status: u16, body: String },
    #[error("{command} failed: {message}")]
    Failed { command: String, message: String },
    #[error("invalid response: {0}")]
    Decode(String),
}

impl ApiError {
    /// Logical failures came back as a 200 with `failed: true`.
    pub fn is_logical(&self) -> bool {
        matches!(self, ApiError::Failed { .. })
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        ApiError::Transport(err.to_string())
    }
}

/// The HTTP+JSON boundary. Reads take query pairs, writes take a JSON body;
/// both return the envelope's `result` once `failed` has been checked.
pub trait AdminApi: Send + Sync {
    fn get(&self, endpoint: &str, query: &[(String, String)]) -> Result<Value, ApiError>;
    fn post(&self, endpoint: &str, body: &Value) -> Result<Value, ApiError>;
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    failed: bool,
    #[serde(default)]
    error: Option<Value>,
}

/// Validates a response body for `endpoint` and unwraps `result`.
pub fn parse_envelope(endpoint: &str, status: u16, body: &str) -> Result<Value, ApiError> {
    if !(200..300).contains(&status) {
        return Err(ApiError::Http {
            status,
            body: truncate(body, 200),
        });
    }
    let trimmed = body.trim();
    if trimmed.is_empty() || trimmed == "null" {
        return Ok(Value::Null);
    }
    let envelope: Envelope =
        serde_json::from_str(trimmed).map_err(|err| ApiError::Decode(err.to_string()))?;
    if envelope.failed {
        let command = envelope
            .command
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| endpoint.to_string());
        return Err(ApiError::Failed {
            command,
            message: failure_message(envelope.error.as_ref(), &envelope.result),
        });
    }
    Ok(envelope.result)
}

fn failure_message(error: Option<&Value>, result: &Value) -> String {
    match error {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(Value::Null) | None => match result {
            Value::Null => "no details".to_string(),
            Value::String(s) => s.clone(),
            other => truncate(&other.to_string(), 200),
        },
        Some(other) => truncate(&other.to_string(), 200),
    }
}

fn truncate(raw: &str, max: usize) -> String {
    if raw.chars().count() <= max {
        return raw.to_string();
    }
    let mut out: String = raw.chars().take(max).collect();
    out.push('…');
    out
}

/// Blocking reqwest implementation against `{base_url}/api/{endpoint}`.
pub struct RconApi {
    client: &'static Client,
    config: Config,
}

impl RconApi {
    pub fn new(config: Config) -> Result<Self> {
        let client = http_client(config.request_timeout)?;
        Ok(Self { client, config })
    }

    fn finish(
        &self,
        endpoint: &str,
        req: reqwest::blocking::RequestBuilder,
    ) -> Result<Value, ApiError> {
        let req = match self.config.api_key.as_deref() {
            Some(key) => req.bearer_auth(key),
            None => req,
        };
        let resp = req.send()?;
        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ApiError::Http {
                status: status.as_u16(),
                body: "not authorized (check CRCON_API_KEY)".to_string(),
            });
        }
        let body = resp.text()?;
        parse_envelope(endpoint, status.as_u16(), &body)
    }
}

impl AdminApi for RconApi {
    fn get(&self, endpoint: &str, query: &[(String, String)]) -> Result<Value, ApiError> {
        let url = self.config.api_url(endpoint);
        let req = self.client.get(url).query(query);
        self.finish(endpoint, req)
    }

    fn post(&self, endpoint: &str, body: &Value) -> Result<Value, ApiError> {
        let url = self.config.api_url(endpoint);
        let req = self.client.post(url).json(body);
        self.finish(endpoint, req)
    }
}
