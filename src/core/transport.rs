use async_trait::async_trait;
use reqwest::Method;
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;

/// One API attempt against one candidate base URL. Immutable per attempt.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub api_url: String,
    pub path: String,
    pub method: Method,
    pub token: Option<String>,
    pub body: Option<Value>,
}

impl RequestDescriptor {
    pub fn endpoint(&self) -> String {
        format!("{}{}", self.api_url, self.path)
    }
}

/// Classified outcome of a single attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportResult {
    Success(Value),
    HttpFailure { status: u16, message: String },
    /// The request never produced an HTTP response.
    NetworkFailure(String),
    /// 2xx with a body that claimed to be JSON but was not. Treated as a
    /// `null` payload by callers, not as a hard failure.
    ParseFailure,
}

fn error_message(payload: Option<&Value>, fallback: String) -> String {
    if let Some(payload) = payload {
        for key in ["error", "message"] {
            if let Some(text) = payload.get(key).and_then(Value::as_str) {
                return text.to_string();
            }
        }
    }
    fallback
}

/// Shared classification for the direct and tab-proxied paths: both produce
/// a status, a content type and a raw body text.
pub fn classify_response(
    status: u16,
    content_type: &str,
    text: &str,
    endpoint: &str,
) -> TransportResult {
    let is_json = content_type.contains("application/json");
    let payload = if is_json {
        serde_json::from_str::<Value>(if text.is_empty() { "{}" } else { text }).ok()
    } else {
        None
    };

    if !(200..300).contains(&status) {
        let base = error_message(payload.as_ref(), format!("Request failed ({})", status));
        return TransportResult::HttpFailure {
            status,
            message: format!("{} [{}]", base, endpoint),
        };
    }

    match payload {
        Some(value) => TransportResult::Success(value),
        None if is_json => TransportResult::ParseFailure,
        None => TransportResult::Success(Value::Null),
    }
}

/// Seam for issuing one direct HTTP attempt. The production implementation
/// is `DirectTransport`; tests script outcomes behind this trait.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, request: &RequestDescriptor) -> TransportResult;
}

pub struct DirectTransport {
    client: reqwest::Client,
}

impl DirectTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for DirectTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpTransport for DirectTransport {
    async fn execute(&self, request: &RequestDescriptor) -> TransportResult {
        let mut builder = self
            .client
            .request(request.method.clone(), request.endpoint())
            .header(CONTENT_TYPE, "application/json");
        if let Some(token) = &request.token {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => return TransportResult::NetworkFailure(e.to_string()),
        };

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let text = match response.text().await {
            Ok(text) => text,
            Err(e) => return TransportResult::NetworkFailure(e.to_string()),
        };

        classify_response(status, &content_type, &text, &request.endpoint())
    }
}
