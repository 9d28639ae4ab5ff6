//! Native-messaging host surface: length-prefixed JSON frames over stdio.
//!
//! Inbound frames are either popup/content-script requests (see
//! `messages::Request`) or `TAB_RESULT` replies to a tab command this host
//! issued. Outbound frames are request responses or `TAB_*` commands. The
//! extension side processes one request at a time, so a tab command issued
//! mid-request is always answered before the next request arrives.

use anyhow::{Context, Result, anyhow, bail};
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, Stdin, Stdout};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::core::session::SessionStore;
use crate::core::tabs::{PageFetchOutcome, TabHost, TabId};
use crate::core::transport::{DirectTransport, HttpTransport, RequestDescriptor};

use super::dispatch::Bridge;
use super::messages::{KNOWN_TYPES, Request, Response};

/// Chrome caps messages to a native host at 64 MB.
const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

const TAB_RESULT_TYPE: &str = "TAB_RESULT";

/// Framed duplex channel. Both halves sit behind mutexes so the serve loop
/// and an in-flight tab command can share the single stdio pair.
pub struct Link<R, W> {
    reader: Mutex<R>,
    writer: Mutex<W>,
}

impl<R, W> Link<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
        }
    }

    /// Next frame, or `None` on clean end-of-stream.
    pub async fn read(&self) -> Result<Option<Value>> {
        let mut reader = self.reader.lock().await;
        let mut len_buf = [0u8; 4];
        match reader.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let len = u32::from_le_bytes(len_buf) as usize;
        if len > MAX_FRAME_BYTES {
            bail!("inbound frame of {} bytes exceeds the {} byte limit", len, MAX_FRAME_BYTES);
        }
        let mut buf = vec![0u8; len];
        reader.read_exact(&mut buf).await.context("reading frame body")?;
        Ok(Some(serde_json::from_slice(&buf).context("parsing frame")?))
    }

    pub async fn write(&self, value: &Value) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        let mut writer = self.writer.lock().await;
        writer.write_all(&(bytes.len() as u32).to_le_bytes()).await?;
        writer.write_all(&bytes).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Send a tab command and wait for its `TAB_RESULT` reply. Request
    /// handling is sequential, so the next inbound frame must be the reply.
    async fn call(&self, command: Value) -> Result<Value> {
        self.write(&command).await?;
        let Some(reply) = self.read().await? else {
            bail!("connection closed while awaiting a tab result");
        };
        let kind = reply.get("type").and_then(Value::as_str).unwrap_or("(untyped)");
        if kind != TAB_RESULT_TYPE {
            bail!("unexpected {} frame while awaiting a tab result", kind);
        }
        if let Some(error) = reply.get("error").and_then(Value::as_str) {
            return Err(anyhow!("{}", error));
        }
        Ok(reply.get("data").cloned().unwrap_or(Value::Null))
    }
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
enum TabCommand<'a> {
    TabQuery {
        origin: &'a str,
    },
    TabOpen {
        origin: &'a str,
    },
    #[serde(rename_all = "camelCase")]
    TabFetch {
        tab_id: TabId,
        api_url: &'a str,
        path: &'a str,
        method: &'a str,
        token: Option<&'a str>,
        body: Option<&'a Value>,
    },
    #[serde(rename_all = "camelCase")]
    TabReadStorage {
        tab_id: TabId,
        key: &'a str,
    },
}

/// `TabHost` that relays every tab operation to the extension over the
/// native-messaging link. The extension owns the `chrome.tabs` and
/// `chrome.scripting` calls; this side only speaks the framed protocol.
pub struct NativeTabHost<R, W> {
    link: Arc<Link<R, W>>,
}

impl<R, W> NativeTabHost<R, W> {
    pub fn new(link: Arc<Link<R, W>>) -> Self {
        Self { link }
    }
}

#[async_trait::async_trait]
impl<R, W> TabHost for NativeTabHost<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn find_tab(&self, origin: &str) -> Result<Option<TabId>> {
        let data = self
            .link
            .call(serde_json::to_value(TabCommand::TabQuery { origin })?)
            .await?;
        Ok(data.get("tabId").and_then(Value::as_i64))
    }

    async fn open_tab(&self, origin: &str) -> Result<Option<TabId>> {
        let data = self
            .link
            .call(serde_json::to_value(TabCommand::TabOpen { origin })?)
            .await?;
        Ok(data.get("tabId").and_then(Value::as_i64))
    }

    async fn execute_fetch(
        &self,
        tab: TabId,
        request: &RequestDescriptor,
    ) -> Result<PageFetchOutcome> {
        let data = self
            .link
            .call(serde_json::to_value(TabCommand::TabFetch {
                tab_id: tab,
                api_url: &request.api_url,
                path: &request.path,
                method: request.method.as_str(),
                token: request.token.as_deref(),
                body: request.body.as_ref(),
            })?)
            .await?;
        serde_json::from_value(data).context("malformed page fetch result")
    }

    async fn read_local_storage(&self, tab: TabId, key: &str) -> Result<Option<String>> {
        let data = self
            .link
            .call(serde_json::to_value(TabCommand::TabReadStorage { tab_id: tab, key })?)
            .await?;
        Ok(data
            .get("value")
            .and_then(Value::as_str)
            .map(str::to_string))
    }
}

async fn route<T: HttpTransport, H: TabHost>(bridge: &Bridge<T, H>, frame: Value) -> Response {
    let Some(kind) = frame
        .get("type")
        .and_then(Value::as_str)
        .map(str::to_string)
    else {
        return Response::failure("Invalid message type.");
    };

    match serde_json::from_value::<Request>(frame) {
        Ok(request) => bridge.handle(request).await,
        Err(e) if KNOWN_TYPES.contains(&kind.as_str()) => {
            Response::failure(format!("Malformed {} message: {}", kind, e))
        }
        Err(_) => Response::failure(format!("Unsupported message type: {}", kind)),
    }
}

/// Serve requests until the extension closes the channel.
pub async fn serve<T, H, R, W>(bridge: &Bridge<T, H>, link: &Link<R, W>) -> Result<()>
where
    T: HttpTransport,
    H: TabHost,
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    loop {
        let Some(frame) = link.read().await? else {
            info!("channel closed, shutting down");
            return Ok(());
        };
        debug!(frame = %frame, "inbound frame");
        let response = route(bridge, frame).await;
        link.write(&serde_json::to_value(response)?).await?;
    }
}

fn state_path() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".taas-bridge"))
        .unwrap_or_else(|| PathBuf::from(".taas-bridge"))
        .join("taas_extension_auth.json")
}

/// Wire the bridge to stdin/stdout and serve.
pub async fn run() -> Result<()> {
    let link: Arc<Link<BufReader<Stdin>, Stdout>> = Arc::new(Link::new(
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
    ));
    let store = SessionStore::new(state_path());
    let bridge = Bridge::new(
        store,
        DirectTransport::new(),
        NativeTabHost::new(link.clone()),
    );
    serve(&bridge, &link).await
}
