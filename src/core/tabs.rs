use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::transport::RequestDescriptor;

pub type TabId = i64;

/// Serialized result of a fetch executed inside an app tab's page context.
/// This is the exact shape the injected page function returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageFetchOutcome {
    pub ok: bool,
    pub status: u16,
    #[serde(default)]
    pub content_type: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub network_error: Option<String>,
}

/// Host-platform seam for browser tab access. The bridge core only ever
/// talks to tabs through this trait; the native-messaging host relays each
/// call to the extension (see `interfaces::native`), and tests use scripted
/// fakes.
#[async_trait]
pub trait TabHost: Send + Sync {
    /// First open tab whose URL matches `origin/*`, if any.
    async fn find_tab(&self, origin: &str) -> Result<Option<TabId>>;

    /// Open a new background tab at `origin`.
    async fn open_tab(&self, origin: &str) -> Result<Option<TabId>>;

    /// Run the request as a fetch in the tab's top-level page context, so
    /// the page's own origin and CORS rules apply instead of the
    /// extension's.
    async fn execute_fetch(
        &self,
        tab: TabId,
        request: &RequestDescriptor,
    ) -> Result<PageFetchOutcome>;

    /// Read one localStorage key from the tab's page context.
    async fn read_local_storage(&self, tab: TabId, key: &str) -> Result<Option<String>>;
}
