//! Best-effort Telegram notifications.
//!
//! Every send is fire-and-forget: failures are logged at warn level
//! and swallowed. A notification failure must never alter the
//! worker's control flow, so nothing in this crate returns an error.

use reqwest::multipart::{Form, Part};
use reqwest::Client;
use tracing::{debug, warn};

/// Telegram notifier bound to one bot token and chat.
#[derive(Debug, Clone)]
pub struct TelegramNotifier {
    client: Client,
    api_base: String,
    token: Option<String>,
    chat_id: String,
}

impl TelegramNotifier {
    /// Create a notifier. Pass `token: None` to disable sending
    /// entirely (messages are logged at debug and dropped).
    pub fn new(token: Option<String>, chat_id: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_base: "https://api.telegram.org".to_string(),
            token,
            chat_id: chat_id.into(),
        }
    }

    /// Create from `TELEGRAM_BOT_TOKEN` / `TELEGRAM_CHAT_ID`. Either
    /// variable missing yields a disabled notifier.
    pub fn from_env() -> Self {
        let token = std::env::var("TELEGRAM_BOT_TOKEN").ok();
        let chat_id = std::env::var("TELEGRAM_CHAT_ID").unwrap_or_default();
        if token.is_none() || chat_id.is_empty() {
            warn!("Telegram notifier disabled (TELEGRAM_BOT_TOKEN/TELEGRAM_CHAT_ID not set)");
            return Self::new(None, chat_id);
        }
        Self::new(token, chat_id)
    }

    /// Override the API base URL (tests).
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    /// Send a plain text message.
    pub async fn send_message(&self, text: &str) {
        let Some(token) = &self.token else {
            debug!("Notifier disabled, dropping message: {text}");
            return;
        };
        let url = format!("{}/bot{}/sendMessage", self.api_base, token);
        let result = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "chat_id": self.chat_id,
                "text": text,
            }))
            .send()
            .await;
        match result {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => {
                warn!(status = %response.status(), "Telegram sendMessage rejected");
            }
            Err(e) => warn!("Telegram sendMessage failed: {e}"),
        }
    }

    /// Send a PNG screenshot with a caption.
    pub async fn send_photo(&self, png_bytes: Vec<u8>, caption: &str) {
        let Some(token) = &self.token else {
            debug!("Notifier disabled, dropping photo: {caption}");
            return;
        };
        let url = format!("{}/bot{}/sendPhoto", self.api_base, token);
        let part = Part::bytes(png_bytes)
            .file_name("screenshot.png")
            .mime_str("image/png")
            .unwrap_or_else(|_| Part::bytes(Vec::new()));
        let form = Form::new()
            .text("chat_id", self.chat_id.clone())
            .text("caption", caption.to_string())
            .part("photo", part);
        let result = self.client.post(&url).multipart(form).send().await;
        match result {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => {
                warn!(status = %response.status(), "Telegram sendPhoto rejected");
            }
            Err(e) => warn!("Telegram sendPhoto failed: {e}"),
        }
    }
}
