//! Minimal Telegram Bot API client: long-polled updates in, messages out.
//!
//! The bridge needs exactly two endpoints (`getUpdates`, `sendMessage`),
//! so this speaks the Bot API directly over `reqwest` rather than pulling
//! in a full bot framework. Send failures are surfaced as transport
//! errors; callers decide whether they are fatal (they are not, for the
//! output path).

use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;

use crate::error::BridgeError;
use crate::error::Result;

/// Telegram's hard ceiling on message length, in code points.
pub const MESSAGE_CEILING: usize = 4096;

/// Long-poll window for `getUpdates`.
const POLL_TIMEOUT: Duration = Duration::from_secs(50);
/// Per-request ceiling for `sendMessage`.
const SEND_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<InboundMessage>,
}

impl Update {
    /// Sender chat id and text, when this update carries a text message.
    pub fn text_message(&self) -> Option<(i64, &str)> {
        let message = self.message.as_ref()?;
        let text = message.text.as_deref()?;
        Some((message.chat.id, text))
    }
}

#[derive(Debug, Deserialize)]
pub struct InboundMessage {
    pub chat: Chat,
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

/// Seam between the router and the concrete transport; lets the output
/// pipeline be exercised without the network.
pub trait MessageSink: Send + 'static {
    fn send(&self, text: String) -> impl Future<Output = Result<()>> + Send;
}

pub struct TelegramClient {
    http: reqwest::Client,
    base: String,
    offset: AtomicI64,
}

impl TelegramClient {
    pub fn new(token: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|err| BridgeError::transport(format!("building HTTP client: {err}")))?;
        Ok(Self {
            http,
            base: format!("https://api.telegram.org/bot{token}"),
            offset: AtomicI64::new(0),
        })
    }

    /// Sends a message with lightweight markup enabled.
    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<()> {
        self.send_inner(chat_id, text, Some("Markdown")).await
    }

    /// Sends a message verbatim, with no markup interpretation. Used for
    /// the `/help` reply so key tokens render as written.
    pub async fn send_plain(&self, chat_id: i64, text: &str) -> Result<()> {
        self.send_inner(chat_id, text, None).await
    }

    async fn send_inner(&self, chat_id: i64, text: &str, parse_mode: Option<&str>) -> Result<()> {
        let mut body = json!({ "chat_id": chat_id, "text": text });
        if let Some(mode) = parse_mode {
            body["parse_mode"] = json!(mode);
        }
        let response = self
            .http
            .post(format!("{}/sendMessage", self.base))
            .timeout(SEND_TIMEOUT)
            .json(&body)
            .send()
            .await
            .map_err(|err| BridgeError::transport(format!("sendMessage: {err}")))?;
        let payload: ApiResponse<serde_json::Value> = response
            .json()
            .await
            .map_err(|err| BridgeError::transport(format!("sendMessage decode: {err}")))?;
        if !payload.ok {
            return Err(BridgeError::transport(format!(
                "sendMessage rejected: {}",
                payload.description.unwrap_or_else(|| "unknown".to_string())
            )));
        }
        Ok(())
    }

    /// Long-polls for new updates, advancing the acknowledged offset so
    /// each update is delivered once.
    pub async fn poll_updates(&self) -> Result<Vec<Update>> {
        let offset = self.offset.load(Ordering::SeqCst);
        let body = json!({
            "offset": offset,
            "timeout": POLL_TIMEOUT.as_secs(),
            "allowed_updates": ["message"],
        });
        let response = self
            .http
            .post(format!("{}/getUpdates", self.base))
            .timeout(POLL_TIMEOUT + Duration::from_secs(10))
            .json(&body)
            .send()
            .await
            .map_err(|err| BridgeError::transport(format!("getUpdates: {err}")))?;
        let payload: ApiResponse<Vec<Update>> = response
            .json()
            .await
            .map_err(|err| BridgeError::transport(format!("getUpdates decode: {err}")))?;
        if !payload.ok {
            return Err(BridgeError::transport(format!(
                "getUpdates rejected: {}",
                payload.description.unwrap_or_else(|| "unknown".to_string())
            )));
        }
        let updates = payload.result.unwrap_or_default();
        if let Some(last) = updates.last() {
            self.offset.store(last.update_id + 1, Ordering::SeqCst);
        }
        Ok(updates)
    }
}

/// A client bound to the single authorized peer.
pub struct TelegramClientWithPeer {
    pub client: TelegramClient,
    pub chat_id: i64,
}

impl MessageSink for std::sync::Arc<TelegramClientWithPeer> {
    fn send(&self, text: String) -> impl Future<Output = Result<()>> + Send {
        let this = std::sync::Arc::clone(self);
        async move { this.client.send_message(this.chat_id, &text).await }
    }
}
