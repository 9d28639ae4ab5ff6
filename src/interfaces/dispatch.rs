use anyhow::{Result, anyhow, bail};
use reqwest::Method;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::core::api::ApiClient;
use crate::core::candidates::resolve_candidates;
use crate::core::error::BridgeError;
use crate::core::jobs;
use crate::core::session::{SessionStore, StatePatch};
use crate::core::tabs::TabHost;
use crate::core::transport::HttpTransport;
use crate::core::urls::{normalize_api_url, normalize_app_url, origin_of};

use super::messages::{Request, Response};

/// One handler per message type. Every error is converted to
/// `{ok: false, error}` here; nothing throws across the message boundary.
pub struct Bridge<T, H> {
    store: SessionStore,
    client: ApiClient<T, H>,
}

impl<T: HttpTransport, H: TabHost> Bridge<T, H> {
    pub fn new(store: SessionStore, transport: T, tabs: H) -> Self {
        Self {
            store,
            client: ApiClient::new(transport, tabs),
        }
    }

    pub async fn handle(&self, request: Request) -> Response {
        match self.dispatch(request).await {
            Ok(data) => Response::success(data),
            Err(e) => {
                if let Some(BridgeError::Http { status, .. }) = e.downcast_ref::<BridgeError>() {
                    warn!(status = *status, "request rejected by the server");
                }
                Response::failure(e.to_string())
            }
        }
    }

    async fn dispatch(&self, request: Request) -> Result<Value> {
        match request {
            Request::GetStatus => self.get_status().await,
            Request::SaveSettings { api_url, app_url } => {
                self.save_settings(api_url, app_url).await
            }
            Request::Login {
                app_url,
                api_url,
                email,
                password,
            } => self.login(app_url, api_url, email, password).await,
            Request::Logout => {
                self.store.merge(StatePatch::clear_auth()).await?;
                Ok(Value::Null)
            }
            Request::ImportSession { app_url, api_url } => {
                self.import_session(app_url, api_url).await
            }
            Request::SaveJobFromLinkedin { payload } => {
                let report = jobs::save_job(&self.client, &self.store, &payload).await?;
                Ok(serde_json::to_value(report)?)
            }
        }
    }

    async fn get_status(&self) -> Result<Value> {
        let state = self.store.get().await;
        Ok(json!({
            "isLoggedIn": state.token.is_some(),
            "apiUrl": state.api_url,
            "appUrl": state.app_url,
            "user": state.user,
        }))
    }

    async fn save_settings(
        &self,
        api_url: Option<String>,
        app_url: Option<String>,
    ) -> Result<Value> {
        let next = self
            .store
            .merge(StatePatch {
                api_url: Some(api_url.unwrap_or_default()),
                app_url: Some(app_url.unwrap_or_default()),
                ..StatePatch::default()
            })
            .await?;
        Ok(serde_json::to_value(next)?)
    }

    async fn login(
        &self,
        app_url_input: Option<String>,
        api_url_input: Option<String>,
        email: Option<String>,
        password: Option<String>,
    ) -> Result<Value> {
        let email = email.unwrap_or_default();
        let password = password.unwrap_or_default();
        if email.is_empty() || password.is_empty() {
            bail!("Email and password are required.");
        }

        let raw_app_url = app_url_input.unwrap_or_default();
        let app_url = normalize_app_url(&raw_app_url);
        let candidates = resolve_candidates(api_url_input.as_deref(), &raw_app_url);

        let mut last_error = anyhow!("Login failed.");
        for candidate in &candidates {
            let attempt = self
                .client
                .request_with_fallback(
                    std::slice::from_ref(candidate),
                    Some(&app_url),
                    None,
                    "/auth/email-login",
                    Method::POST,
                    Some(json!({ "email": email, "password": password })),
                )
                .await;

            match attempt {
                Ok(response) => {
                    let token = response
                        .payload
                        .pointer("/data/token")
                        .and_then(Value::as_str)
                        .map(str::to_string);
                    let Some(token) = token else {
                        last_error = anyhow!("Login succeeded but no token was returned.");
                        continue;
                    };
                    let user = response
                        .payload
                        .pointer("/data/user")
                        .filter(|v| !v.is_null())
                        .cloned();
                    let working_api_url = response.api_url;

                    self.store
                        .merge(StatePatch {
                            api_url: Some(working_api_url.clone()),
                            app_url: Some(app_url.clone()),
                            token: Some(Some(token)),
                            user: Some(user.clone()),
                        })
                        .await?;
                    info!(api_url = %working_api_url, "login succeeded");

                    return Ok(json!({
                        "apiUrl": working_api_url,
                        "appUrl": app_url,
                        "user": user,
                    }));
                }
                Err(e) => last_error = anyhow!("{}", e),
            }
        }

        Err(last_error)
    }

    /// Adopt the session of an already-open app tab instead of prompting
    /// for credentials: read its localStorage token and validate it.
    async fn import_session(
        &self,
        app_url_input: Option<String>,
        api_url_input: Option<String>,
    ) -> Result<Value> {
        let app_url = normalize_app_url(&app_url_input.unwrap_or_default());
        let api_url = normalize_api_url(&api_url_input.unwrap_or_default());
        let origin =
            origin_of(&app_url).ok_or_else(|| anyhow!("Invalid app URL: {}", app_url))?;

        let tab = self.client.tabs().find_tab(&origin).await?;
        let Some(tab) = tab else {
            bail!(
                "Open {} in a tab and log in there first, then click \"Use Current TAAS Session\" again.",
                origin
            );
        };

        let token = self
            .client
            .tabs()
            .read_local_storage(tab, "token")
            .await?
            .filter(|t| !t.trim().is_empty());
        let Some(token) = token else {
            bail!("No TAAS token found in that tab. Please log in on the TAAS app tab first.");
        };

        let me = self
            .client
            .request_with_fallback(
                &[api_url.clone()],
                Some(&app_url),
                Some(&token),
                "/auth/me",
                Method::GET,
                None,
            )
            .await?;
        let user = me.payload.get("data").filter(|v| !v.is_null()).cloned();
        let working_api_url = me.api_url;

        self.store
            .merge(StatePatch {
                api_url: Some(working_api_url.clone()),
                app_url: Some(app_url.clone()),
                token: Some(Some(token)),
                user: Some(user.clone()),
            })
            .await?;

        Ok(json!({
            "apiUrl": working_api_url,
            "appUrl": app_url,
            "user": user,
        }))
    }
}
