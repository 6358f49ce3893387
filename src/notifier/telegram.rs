use super::Notify;
use crate::models::SignalNotification;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";
const SEND_TIMEOUT_SECS: u64 = 10;

/// Broadcasts formatted signal lines to a set of registered chats.
/// Delivery is fire-and-forget: failures are logged and dropped.
#[derive(Clone)]
pub struct TelegramNotifier {
    client: Client,
    base_url: String,
    token: String,
    chat_ids: Vec<i64>,
}

impl TelegramNotifier {
    pub fn new(token: String, chat_ids: Vec<i64>) -> Self {
        Self::with_base_url(token, chat_ids, TELEGRAM_API_BASE.to_string())
    }

    /// Base URL override for tests against a local mock server
    pub fn with_base_url(token: String, chat_ids: Vec<i64>, base_url: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(SEND_TIMEOUT_SECS))
            .build()
            .expect("reqwest client");
        Self {
            client,
            base_url,
            token,
            chat_ids,
        }
    }

    async fn send(&self, chat_id: i64, text: &str) -> crate::Result<()> {
        let url = format!("{}/bot{}/sendMessage", self.base_url, self.token);
        let response = self
            .client
            .post(&url)
            .json(&json!({ "chat_id": chat_id, "text": text }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(format!("Telegram API error: {}", response.status()).into());
        }
        Ok(())
    }
}

impl Notify for TelegramNotifier {
    async fn notify(&self, notification: &SignalNotification) {
        let text = format_signal(notification);
        for &chat_id in &self.chat_ids {
            if let Err(e) = self.send(chat_id, &text).await {
                tracing::warn!("Failed to notify chat {}: {}", chat_id, e);
            }
        }
    }
}

fn format_signal(n: &SignalNotification) -> String {
    let tag = if n.is_exit { "Exit" } else { "Signal" };
    format!(
        "{}: {} {} {} | Entry: {:.2} | SL: {:.2} | TP1: {:.2} | TP2: {:.2} | R:R {} | Conf: {} | Reason: {}",
        tag,
        n.symbol,
        n.timeframe,
        n.direction.as_str(),
        n.entry,
        n.stop,
        n.tp1,
        n.tp2,
        n.risk_reward,
        n.confidence,
        n.reason,
    )
}
