use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use tokio::fs;
use tokio::sync::Mutex;

use super::urls::{normalize_api_url, normalize_app_url};

/// Persisted bridge session. One record, one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub api_url: String,
    pub app_url: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub user: Option<Value>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            api_url: normalize_api_url(""),
            app_url: normalize_app_url(""),
            token: None,
            user: None,
        }
    }
}

/// Partial update merged into the current state. `token`/`user` use a
/// double `Option` so "set to none" (logout) is distinct from "leave
/// untouched".
#[derive(Debug, Default, Clone)]
pub struct StatePatch {
    pub api_url: Option<String>,
    pub app_url: Option<String>,
    pub token: Option<Option<String>>,
    pub user: Option<Option<Value>>,
}

impl StatePatch {
    pub fn clear_auth() -> Self {
        Self {
            token: Some(None),
            user: Some(None),
            ..Self::default()
        }
    }
}

/// File-backed session store. The mutex is held across the whole
/// read-modify-write-persist cycle, so concurrent `merge` calls cannot lose
/// updates.
pub struct SessionStore {
    path: PathBuf,
    state: Mutex<Option<SessionState>>,
}

impl SessionStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            state: Mutex::new(None),
        }
    }

    async fn load_locked(&self, slot: &mut Option<SessionState>) -> SessionState {
        if let Some(state) = slot.as_ref() {
            return state.clone();
        }

        // Created lazily with defaults on first read; unreadable or
        // malformed files fall back to defaults rather than failing.
        let mut state = match fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
            Err(_) => SessionState::default(),
        };
        state.api_url = normalize_api_url(&state.api_url);
        state.app_url = normalize_app_url(&state.app_url);
        *slot = Some(state.clone());
        state
    }

    pub async fn get(&self) -> SessionState {
        let mut slot = self.state.lock().await;
        self.load_locked(&mut slot).await
    }

    pub async fn merge(&self, patch: StatePatch) -> Result<SessionState> {
        let mut slot = self.state.lock().await;
        let mut next = self.load_locked(&mut slot).await;

        if let Some(api_url) = patch.api_url {
            next.api_url = normalize_api_url(&api_url);
        }
        if let Some(app_url) = patch.app_url {
            next.app_url = normalize_app_url(&app_url);
        }
        if let Some(token) = patch.token {
            next.token = token;
        }
        if let Some(user) = patch.user {
            next.user = user;
        }

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let bytes = serde_json::to_vec_pretty(&next)?;
        fs::write(&self.path, bytes)
            .await
            .with_context(|| format!("writing {}", self.path.display()))?;

        *slot = Some(next.clone());
        Ok(next)
    }
}
