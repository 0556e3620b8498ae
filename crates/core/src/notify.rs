use crate::document::grammar::format_signed;
use crate::domain::event::EventSlot;
use crate::domain::record::{DocumentKey, PriceEvent};
use anyhow::Context;
use serde::Serialize;
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub date: DocumentKey,
    pub slot: EventSlot,
    pub text: String,
}

impl Notification {
    pub fn event_recorded(date: DocumentKey, slot: EventSlot, price: &PriceEvent) -> Self {
        let text = format!(
            "[{date}] {} recorded: {:.2} ({})",
            slot.as_str().replace('_', " "),
            price.index,
            format_signed(price.change)
        );
        Self { date, slot, text }
    }
}

#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()>;
}

/// Posts `{"text": ...}` to a chat incoming-webhook URL.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    http: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .context("failed to build webhook http client")?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }
}

#[async_trait::async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        let res = self
            .http
            .post(&self.url)
            .json(&serde_json::json!({ "text": notification.text }))
            .send()
            .await
            .context("chat webhook request failed")?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            anyhow::bail!("chat webhook HTTP {status}: {body}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn formats_event_text() {
        let date = NaiveDate::from_ymd_opt(2026, 1, 27).unwrap();
        let price = PriceEvent::new(1281.04, -1.5).unwrap();
        let n = Notification::event_recorded(date, EventSlot::MorningClose, &price);
        assert_eq!(n.text, "[2026-01-27] morning close recorded: 1281.04 (-1.50)");
    }
}
