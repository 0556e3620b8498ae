use chrono::NaiveDate;
use marketlog_core::document::{decode_document, encode_document};
use marketlog_core::domain::event::{EventSlot, EventSubmission};
use marketlog_core::domain::record::RenderedHtml;
use marketlog_core::llm::template::TemplateNarrator;
use marketlog_core::llm::{NarrativeContext, NarrativeGenerator, Provider};
use marketlog_core::notify::{Notification, Notifier};
use marketlog_core::service::TradingDayService;
use marketlog_core::storage::{DocumentStore, MemoryDocumentStore};
use marketlog_core::Error;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 1, 27).unwrap()
}

fn event(slot: EventSlot, index: f64, change: f64, highlights: Option<&str>) -> EventSubmission {
    EventSubmission {
        slot,
        index,
        change,
        highlights: highlights.map(str::to_string),
    }
}

fn service(store: Arc<MemoryDocumentStore>) -> TradingDayService {
    TradingDayService::new(store, Duration::from_secs(300), Arc::new(TemplateNarrator))
}

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

#[async_trait::async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

struct BrokenTakeaways;

#[async_trait::async_trait]
impl NarrativeGenerator for BrokenTakeaways {
    fn provider(&self) -> Provider {
        Provider::Template
    }

    async fn event_narrative(&self, _ctx: &NarrativeContext) -> anyhow::Result<RenderedHtml> {
        Ok(RenderedHtml::new("<p>ok</p>"))
    }

    async fn key_takeaways(&self, _ctx: &NarrativeContext) -> anyhow::Result<Vec<String>> {
        anyhow::bail!("model returned no takeaways")
    }
}

struct Unavailable;

#[async_trait::async_trait]
impl NarrativeGenerator for Unavailable {
    fn provider(&self) -> Provider {
        Provider::Anthropic
    }

    async fn event_narrative(&self, _ctx: &NarrativeContext) -> anyhow::Result<RenderedHtml> {
        anyhow::bail!("upstream 529")
    }

    async fn key_takeaways(&self, _ctx: &NarrativeContext) -> anyhow::Result<Vec<String>> {
        anyhow::bail!("upstream 529")
    }
}

#[tokio::test]
async fn full_trading_day_builds_one_document() {
    let store = Arc::new(MemoryDocumentStore::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let svc = service(store.clone()).with_notifier(notifier.clone());

    svc.submit(day(), event(EventSlot::MorningOpen, 1287.01, 4.47, Some("Banking\nChips")))
        .await
        .unwrap();
    svc.submit(day(), event(EventSlot::MorningClose, 1281.04, -1.5, None))
        .await
        .unwrap();
    svc.submit(day(), event(EventSlot::AfternoonOpen, 1282.2, 1.16, Some("Autos")))
        .await
        .unwrap();
    let record = svc
        .submit(day(), event(EventSlot::AfternoonClose, 1290.55, 8.35, None))
        .await
        .unwrap();

    assert_eq!(store.write_count(), 4);
    assert_eq!(record.morning.open.as_ref().unwrap().highlights, "Banking\nChips");
    assert_eq!(record.afternoon.close.as_ref().unwrap().price.index, 1290.55);
    assert_eq!(
        record.key_takeaways,
        vec![
            "Morning session closed at 1281.04 (-1.50)",
            "Market closed the day at 1290.55 (+8.35)",
        ]
    );

    let text = store.read_document(day()).await.unwrap();
    assert!(text.starts_with("# Trading Day: 2026-01-27\n\n## Morning Session\n"));
    assert!(text.contains("* Open Index: 1287.01 (+4.47)"));
    assert!(text.contains("* Highlights: Banking<br>Chips"));
    assert!(text.contains("* Close Index: 1290.55 (+8.35)"));
    assert_eq!(text.matches("\n---\n").count(), 1);
    assert!(text.contains("## Key Takeaways\n- Morning session closed at 1281.04 (-1.50)"));

    assert_eq!(decode_document(&text).unwrap(), record);
    assert_eq!(encode_document(&record), text);

    let sent = notifier.sent.lock().unwrap();
    assert_eq!(sent.len(), 4);
    assert_eq!(sent[3].text, "[2026-01-27] afternoon close recorded: 1290.55 (+8.35)");
}

#[tokio::test]
async fn close_without_open_is_rejected_before_any_write() {
    let store = Arc::new(MemoryDocumentStore::new());
    let svc = service(store.clone());

    let err = svc
        .submit(day(), event(EventSlot::AfternoonClose, 1290.55, 8.35, None))
        .await
        .unwrap_err();

    assert!(matches!(
        err.downcast_ref::<Error>(),
        Some(Error::MissingOpenData { .. })
    ));
    assert!(err.to_string().contains("submit the opening event first"));
    assert_eq!(store.write_count(), 0);
    assert!(store.read_document(day()).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn afternoon_close_needs_afternoon_open_even_with_morning_data() {
    let store = Arc::new(MemoryDocumentStore::new());
    let svc = service(store.clone());

    svc.submit(day(), event(EventSlot::MorningOpen, 1287.01, 4.47, None))
        .await
        .unwrap();
    let before = store.read_document(day()).await.unwrap();

    let err = svc
        .submit(day(), event(EventSlot::AfternoonClose, 1290.55, 8.35, None))
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<Error>(),
        Some(Error::MissingOpenData { .. })
    ));
    assert_eq!(store.read_document(day()).await.unwrap(), before);
}

#[tokio::test]
async fn reads_after_submit_see_the_new_record() {
    let store = Arc::new(MemoryDocumentStore::new());
    let svc = service(store.clone());

    svc.submit(day(), event(EventSlot::MorningOpen, 1287.01, 4.47, None))
        .await
        .unwrap();
    let reads = store.read_count();

    let record = svc.get(day()).await.unwrap();
    assert!(record.morning.open.is_some());
    // Served from the refreshed cache entry.
    assert_eq!(store.read_count(), reads);

    let text = svc.document_text(day()).await.unwrap();
    assert_eq!(text, store.read_document(day()).await.unwrap());
}

#[tokio::test]
async fn external_edit_is_visible_after_invalidate() {
    let store = Arc::new(MemoryDocumentStore::new());
    let svc = service(store.clone());

    svc.submit(day(), event(EventSlot::MorningOpen, 1287.01, 4.47, None))
        .await
        .unwrap();
    store
        .insert(
            day(),
            "# Trading Day: 2026-01-27\n\n## Morning Session\n\n### Open Set\n* Open Index: 1300.00 (+17.46)\n",
        )
        .await;

    assert_eq!(svc.get(day()).await.unwrap().morning.open.unwrap().price.index, 1287.01);
    svc.invalidate(day()).await;
    assert_eq!(svc.get(day()).await.unwrap().morning.open.unwrap().price.index, 1300.0);
}

#[tokio::test]
async fn preview_does_not_write() {
    let store = Arc::new(MemoryDocumentStore::new());
    let svc = service(store.clone());

    let text = svc
        .preview(day(), event(EventSlot::MorningOpen, 1287.01, 4.47, Some("Banking")))
        .await
        .unwrap();

    assert!(text.contains("* Open Index: 1287.01 (+4.47)"));
    assert_eq!(store.write_count(), 0);
    assert!(svc.get(day()).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn narrative_failure_leaves_document_untouched() {
    let store = Arc::new(MemoryDocumentStore::new());
    let svc = TradingDayService::new(store.clone(), Duration::from_secs(300), Arc::new(Unavailable));

    let err = svc
        .submit(day(), event(EventSlot::MorningOpen, 1287.01, 4.47, None))
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("upstream 529"));
    assert_eq!(store.write_count(), 0);
}

#[tokio::test]
async fn takeaway_failure_keeps_the_close() {
    let store = Arc::new(MemoryDocumentStore::new());
    let svc = TradingDayService::new(store.clone(), Duration::from_secs(300), Arc::new(BrokenTakeaways));

    svc.submit(day(), event(EventSlot::AfternoonOpen, 1282.2, 1.16, None))
        .await
        .unwrap();
    let record = svc
        .submit(day(), event(EventSlot::AfternoonClose, 1290.55, 8.35, None))
        .await
        .unwrap();

    assert!(record.afternoon.close.is_some());
    assert!(record.key_takeaways.is_empty());
}

#[tokio::test]
async fn highlights_on_close_are_rejected() {
    let store = Arc::new(MemoryDocumentStore::new());
    let svc = service(store.clone());

    svc.submit(day(), event(EventSlot::MorningOpen, 1287.01, 4.47, None))
        .await
        .unwrap();
    let err = svc
        .submit(day(), event(EventSlot::MorningClose, 1281.04, -1.5, Some("late news")))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("highlights are only accepted with open events"));
    assert_eq!(store.write_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_submits_for_one_day_do_not_lose_updates() {
    let store = Arc::new(MemoryDocumentStore::new());
    let svc = Arc::new(service(store.clone()));

    svc.submit(day(), event(EventSlot::MorningOpen, 1287.01, 4.47, None))
        .await
        .unwrap();

    let a = {
        let svc = svc.clone();
        tokio::spawn(async move {
            svc.submit(day(), event(EventSlot::MorningClose, 1281.04, -1.5, None))
                .await
        })
    };
    let b = {
        let svc = svc.clone();
        tokio::spawn(async move {
            svc.submit(day(), event(EventSlot::AfternoonOpen, 1282.2, 1.16, None))
                .await
        })
    };
    a.await.unwrap().unwrap();
    b.await.unwrap().unwrap();

    svc.invalidate(day()).await;
    let stored = svc.get(day()).await.unwrap();
    assert!(stored.morning.close.is_some());
    assert!(stored.afternoon.open.is_some());
    assert_eq!(store.write_count(), 3);
}

#[tokio::test]
async fn disabled_cache_reads_storage_every_time() {
    let store = Arc::new(MemoryDocumentStore::new());
    let svc = TradingDayService::new(store.clone(), Duration::ZERO, Arc::new(TemplateNarrator));

    svc.submit(day(), event(EventSlot::MorningOpen, 1287.01, 4.47, None))
        .await
        .unwrap();
    let reads = store.read_count();

    svc.get(day()).await.unwrap();
    svc.get(day()).await.unwrap();
    assert_eq!(store.read_count(), reads + 2);
}
