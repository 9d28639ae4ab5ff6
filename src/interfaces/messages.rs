use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::jobs::JobSeed;

/// Inbound message contract. A closed union: adding a message type means
/// adding a variant here and an arm in the dispatcher, both checked at
/// compile time.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Request {
    GetStatus,
    #[serde(rename_all = "camelCase")]
    SaveSettings {
        #[serde(default)]
        api_url: Option<String>,
        #[serde(default)]
        app_url: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Login {
        #[serde(default)]
        app_url: Option<String>,
        #[serde(default)]
        api_url: Option<String>,
        #[serde(default)]
        email: Option<String>,
        #[serde(default)]
        password: Option<String>,
    },
    Logout,
    #[serde(rename_all = "camelCase")]
    ImportSession {
        #[serde(default)]
        app_url: Option<String>,
        #[serde(default)]
        api_url: Option<String>,
    },
    SaveJobFromLinkedin {
        #[serde(default)]
        payload: JobSeed,
    },
}

pub const KNOWN_TYPES: &[&str] = &[
    "GET_STATUS",
    "SAVE_SETTINGS",
    "LOGIN",
    "LOGOUT",
    "IMPORT_SESSION",
    "SAVE_JOB_FROM_LINKEDIN",
];

/// Outbound envelope. Errors never cross this boundary as anything but a
/// single descriptive string.
#[derive(Debug, Serialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn success(data: Value) -> Self {
        Self {
            ok: true,
            data: if data.is_null() { None } else { Some(data) },
            error: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
        }
    }
}
