use reqwest::Method;
use serde_json::{Value, json};
use tracing::debug;

use super::error::BridgeError;
use super::tabs::TabHost;
use super::transport::{HttpTransport, RequestDescriptor, TransportResult};
use super::urls::{normalize_app_url, origin_of};

/// Payload of the first candidate that succeeded, paired with which
/// candidate it was. Callers persist the URL as the new working API base.
#[derive(Debug)]
pub struct FallbackResponse {
    pub payload: Value,
    pub api_url: String,
}

/// API client: one direct transport plus the tab-proxy fallback, composed
/// into single-candidate and multi-candidate request paths.
pub struct ApiClient<T, H> {
    transport: T,
    tabs: H,
}

impl<T: HttpTransport, H: TabHost> ApiClient<T, H> {
    pub fn new(transport: T, tabs: H) -> Self {
        Self { transport, tabs }
    }

    pub fn tabs(&self) -> &H {
        &self.tabs
    }

    #[cfg(test)]
    pub(crate) fn transport(&self) -> &T {
        &self.transport
    }

    /// Re-run the request from inside an app tab's page context. Used when
    /// the direct path failed at the network level: deployments that scope
    /// CORS to the web origin reject extension-originated calls, while the
    /// same fetch from a tab already on that origin goes through.
    async fn request_via_tab(
        &self,
        app_url: &str,
        request: &RequestDescriptor,
    ) -> Result<Value, BridgeError> {
        let app_url = normalize_app_url(app_url);
        let origin = origin_of(&app_url)
            .ok_or_else(|| BridgeError::TabUnavailable(format!("Invalid app URL: {}", app_url)))?;

        let found = self
            .tabs
            .find_tab(&origin)
            .await
            .map_err(|e| BridgeError::TabUnavailable(e.to_string()))?;
        let tab = match found {
            Some(tab) => Some(tab),
            None => self
                .tabs
                .open_tab(&origin)
                .await
                .map_err(|e| BridgeError::TabUnavailable(e.to_string()))?,
        };
        let Some(tab) = tab else {
            return Err(BridgeError::TabUnavailable(format!(
                "No TAAS tab available at {}.",
                app_url
            )));
        };

        let outcome = self.tabs.execute_fetch(tab, request).await.map_err(|_| {
            BridgeError::TabUnavailable("Failed to execute API request in TAAS tab.".to_string())
        })?;

        if let Some(message) = outcome.network_error {
            return Err(BridgeError::Network(format!(
                "Cannot reach API from TAAS tab. {}",
                message
            )));
        }

        match super::transport::classify_response(
            outcome.status,
            &outcome.content_type,
            &outcome.text,
            &request.endpoint(),
        ) {
            TransportResult::Success(payload) => Ok(payload),
            TransportResult::ParseFailure => Ok(Value::Null),
            TransportResult::HttpFailure { status, message } => {
                Err(BridgeError::Http { status, message })
            }
            TransportResult::NetworkFailure(message) => Err(BridgeError::Network(message)),
        }
    }

    /// One attempt against one candidate: direct first, tab proxy on
    /// network-level failure.
    pub async fn request(
        &self,
        app_url: Option<&str>,
        request: &RequestDescriptor,
    ) -> Result<Value, BridgeError> {
        match self.transport.execute(request).await {
            TransportResult::Success(payload) => Ok(payload),
            TransportResult::ParseFailure => Ok(Value::Null),
            TransportResult::HttpFailure { status, message } => {
                Err(BridgeError::Http { status, message })
            }
            TransportResult::NetworkFailure(message) => {
                let Some(app_url) = app_url.filter(|s| !s.trim().is_empty()) else {
                    return Err(BridgeError::Network(format!(
                        "Cannot reach API at {}. {}. Check API URL, server status, and CORS deployment.",
                        request.api_url, message
                    )));
                };
                match self.request_via_tab(app_url, request).await {
                    Ok(payload) => Ok(payload),
                    Err(fallback) => Err(BridgeError::Network(format!(
                        "Cannot reach API at {}. {}. Also failed via TAAS tab: {}",
                        request.api_url, message, fallback
                    ))),
                }
            }
        }
    }

    /// Try each candidate in order, returning the first success. Only the
    /// last candidate's failure is surfaced when every candidate fails;
    /// earlier failures are logged but not aggregated (known information
    /// loss, kept to match the contract the popup expects).
    pub async fn request_with_fallback(
        &self,
        candidates: &[String],
        app_url: Option<&str>,
        token: Option<&str>,
        path: &str,
        method: Method,
        body: Option<Value>,
    ) -> Result<FallbackResponse, BridgeError> {
        if candidates.is_empty() {
            return Err(BridgeError::Config);
        }

        let mut last_error: Option<BridgeError> = None;
        for candidate in candidates {
            let request = RequestDescriptor {
                api_url: candidate.clone(),
                path: path.to_string(),
                method: method.clone(),
                token: token.map(str::to_string),
                body: body.clone(),
            };
            match self.request(app_url, &request).await {
                Ok(payload) => {
                    return Ok(FallbackResponse {
                        payload,
                        api_url: candidate.clone(),
                    });
                }
                Err(e) => {
                    debug!(candidate = %candidate, path = %path, error = %e, "candidate failed");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| BridgeError::Network("Request failed".to_string())))
    }

    /// Make sure the server-side job-tracker plugin is on before dependent
    /// calls go out. Returns the API URL the status check succeeded
    /// against, which callers promote to the primary candidate.
    pub async fn ensure_job_tracker_enabled(
        &self,
        candidates: &[String],
        token: Option<&str>,
        app_url: Option<&str>,
    ) -> Result<String, BridgeError> {
        let status = self
            .request_with_fallback(
                candidates,
                app_url,
                token,
                "/plugins/job-tracker/status",
                Method::GET,
                None,
            )
            .await?;

        let enabled = status
            .payload
            .pointer("/data/enabled")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if !enabled {
            self.request_with_fallback(
                candidates,
                app_url,
                token,
                "/plugins/job-tracker/enable",
                Method::POST,
                Some(json!({ "settings": {} })),
            )
            .await?;
        }

        Ok(status.api_url)
    }
}
