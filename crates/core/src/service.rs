use crate::cache::DocumentCache;
use crate::config::Settings;
use crate::document::encode_document;
use crate::domain::event::{EventSlot, EventSubmission};
use crate::domain::record::{DocumentKey, PriceEvent, TradingDayRecord};
use crate::error::Error;
use crate::llm::anthropic::AnthropicNarrator;
use crate::llm::error::NarrativeError;
use crate::llm::template::TemplateNarrator;
use crate::llm::{NarrativeContext, NarrativeGenerator};
use crate::merge;
use crate::notify::{Notification, Notifier, WebhookNotifier};
use crate::storage::metadata::{self, TradingDaySummary};
use crate::storage::{DocumentLocks, DocumentStore, FsDocumentStore};
use std::sync::Arc;
use std::time::Duration;

/// Owns the write path for trading-day documents:
/// lock key, load, check ordering, generate narrative, merge, encode, overwrite, refresh cache.
pub struct TradingDayService {
    store: Arc<dyn DocumentStore>,
    cache: DocumentCache,
    locks: DocumentLocks,
    narrator: Arc<dyn NarrativeGenerator>,
    metadata: Option<sqlx::PgPool>,
    notifier: Option<Arc<dyn Notifier>>,
}

impl TradingDayService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        cache_ttl: Duration,
        narrator: Arc<dyn NarrativeGenerator>,
    ) -> Self {
        Self {
            cache: DocumentCache::new(store.clone(), cache_ttl),
            store,
            locks: DocumentLocks::new(),
            narrator,
            metadata: None,
            notifier: None,
        }
    }

    pub fn from_settings(settings: &Settings, pool: Option<sqlx::PgPool>) -> anyhow::Result<Self> {
        let store: Arc<dyn DocumentStore> = Arc::new(FsDocumentStore::new(&settings.documents_dir));

        let narrator: Arc<dyn NarrativeGenerator> = if settings.anthropic_api_key.is_some() {
            Arc::new(AnthropicNarrator::from_settings(settings)?)
        } else {
            tracing::warn!("ANTHROPIC_API_KEY missing; using template narrative");
            Arc::new(TemplateNarrator)
        };

        let mut service = Self::new(store, settings.cache_ttl(), narrator);
        if let Some(pool) = pool {
            service = service.with_metadata(pool);
        }
        if let Some(url) = &settings.chat_webhook_url {
            service = service.with_notifier(Arc::new(WebhookNotifier::new(url.clone())?));
        }

        tracing::info!(
            documents_dir = %settings.documents_dir,
            cache_ttl_secs = settings.cache_ttl_secs,
            narrator = %service.narrator.provider(),
            metadata = service.metadata.is_some(),
            notifier = service.notifier.is_some(),
            "trading-day service configured"
        );
        Ok(service)
    }

    pub fn with_metadata(mut self, pool: sqlx::PgPool) -> Self {
        self.metadata = Some(pool);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn cache(&self) -> &DocumentCache {
        &self.cache
    }

    pub fn metadata_pool(&self) -> Option<&sqlx::PgPool> {
        self.metadata.as_ref()
    }

    pub async fn get(&self, date: DocumentKey) -> crate::Result<TradingDayRecord> {
        self.cache.get_or_decode(date).await
    }

    /// Canonical text of the stored document.
    pub async fn document_text(&self, date: DocumentKey) -> crate::Result<String> {
        Ok(encode_document(&self.get(date).await?))
    }

    /// For writers outside this service (manual edits, deletions).
    pub async fn invalidate(&self, date: DocumentKey) {
        self.cache.invalidate(date).await;
    }

    /// Merges one event into the day's document and returns the updated record.
    ///
    /// Close events without a stored open fail with [`Error::MissingOpenData`] before any
    /// narrative is generated or anything is written.
    pub async fn submit(
        &self,
        date: DocumentKey,
        submission: EventSubmission,
    ) -> anyhow::Result<TradingDayRecord> {
        let _guard = self.locks.lock(date).await;

        let slot = submission.slot;
        let (next, price) = self.prepare(date, submission).await?;
        let text = encode_document(&next);

        if let Err(err) = self.store.write_document(date, &text).await {
            // The write may or may not have landed; drop whatever is cached.
            self.cache.invalidate(date).await;
            return Err(anyhow::Error::new(err).context(format!(
                "write trading-day document failed (date={date}, slot={slot})"
            )));
        }
        self.cache.put(date, next.clone()).await;

        tracing::info!(%date, %slot, bytes = text.len(), "trading-day document updated");

        self.sync_metadata(date, slot, &next, &price).await;
        self.send_notification(Notification::event_recorded(date, slot, &price))
            .await;
        Ok(next)
    }

    /// Same pipeline as [`submit`](Self::submit) without writing; returns the text that
    /// would be stored.
    pub async fn preview(
        &self,
        date: DocumentKey,
        submission: EventSubmission,
    ) -> anyhow::Result<String> {
        let (next, _) = self.prepare(date, submission).await?;
        Ok(encode_document(&next))
    }

    async fn load_or_new(&self, date: DocumentKey) -> anyhow::Result<TradingDayRecord> {
        match self.cache.get_or_decode(date).await {
            Ok(record) => Ok(record),
            Err(Error::NotFound(_)) => Ok(TradingDayRecord::new(date)),
            Err(err) => Err(anyhow::Error::new(err)
                .context(format!("load trading-day document failed (date={date})"))),
        }
    }

    async fn prepare(
        &self,
        date: DocumentKey,
        submission: EventSubmission,
    ) -> anyhow::Result<(TradingDayRecord, PriceEvent)> {
        let price = submission.validate()?;
        let current = self.load_or_new(date).await?;
        merge::check_event_order(&current, submission.slot)?;

        let ctx = NarrativeContext {
            date,
            slot: submission.slot,
            price,
            highlights: submission.highlights.clone(),
            record: current.clone(),
        };

        let narrative = match self.narrator.event_narrative(&ctx).await {
            Ok(html) => html,
            Err(err) => {
                if let Some(diag) = err.downcast_ref::<NarrativeError>() {
                    tracing::warn!(
                        %date,
                        slot = %ctx.slot,
                        stage = %diag.stage,
                        raw_output_len = diag.raw_output.as_ref().map_or(0, String::len),
                        "provider output rejected"
                    );
                }
                return Err(err.context(format!(
                    "narrative generation failed (date={date}, slot={})",
                    ctx.slot
                )));
            }
        };

        let key_takeaways = if ctx.slot == EventSlot::AfternoonClose {
            match self.narrator.key_takeaways(&ctx).await {
                Ok(items) => Some(items),
                Err(err) => {
                    tracing::warn!(%date, error = %err, "key takeaways generation failed; keeping previous takeaways");
                    None
                }
            }
        } else {
            None
        };

        let update = submission.into_update(narrative, key_takeaways)?;
        let next = merge::apply_event(&current, &update)?;
        Ok((next, price))
    }

    async fn sync_metadata(
        &self,
        date: DocumentKey,
        slot: EventSlot,
        record: &TradingDayRecord,
        price: &PriceEvent,
    ) {
        let Some(pool) = &self.metadata else {
            return;
        };

        let summary = TradingDaySummary::from_record(date, slot, record, chrono::Utc::now());
        let res = async {
            metadata::record_event(pool, date, slot, price.index, price.change).await?;
            metadata::upsert_trading_day(pool, &summary).await
        }
        .await;

        // The document is already the source of truth; a stale index row is repaired by
        // the next successful write for the date.
        if let Err(err) = res {
            tracing::error!(%date, %slot, error = %format!("{err:#}"), "metadata sync failed");
        }
    }

    async fn send_notification(&self, notification: Notification) {
        let Some(notifier) = &self.notifier else {
            return;
        };
        if let Err(err) = notifier.notify(&notification).await {
            tracing::warn!(
                date = %notification.date,
                slot = %notification.slot,
                error = %err,
                "chat notification failed"
            );
        }
    }
}
