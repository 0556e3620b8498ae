use crate::domain::event::EventSlot;
use crate::domain::record::{PriceEvent, RenderedHtml, TradingDayRecord};
use serde_json::json;
use std::fmt;

pub mod anthropic;
pub mod error;
pub mod json;
pub mod template;

/// What the generator sees for one submitted event.
#[derive(Debug, Clone)]
pub struct NarrativeContext {
    pub date: chrono::NaiveDate,
    pub slot: EventSlot,
    pub price: PriceEvent,
    pub highlights: Option<String>,
    /// The record as stored before this event is merged.
    pub record: TradingDayRecord,
}

impl NarrativeContext {
    /// Numbers-only view of the day so far, for prompts. Earlier narrative is left out.
    pub fn facts_json(&self) -> serde_json::Value {
        let session = |s: &crate::domain::record::SessionRecord| {
            json!({
                "open": s.open.as_ref().map(|o| json!({
                    "index": o.price.index,
                    "change": o.price.change,
                    "highlights": o.highlights,
                })),
                "close": s.close.as_ref().map(|c| json!({
                    "index": c.price.index,
                    "change": c.price.change,
                })),
            })
        };

        json!({
            "date": self.date,
            "event": {
                "slot": self.slot,
                "index": self.price.index,
                "change": self.price.change,
                "highlights": self.highlights,
            },
            "morning": session(&self.record.morning),
            "afternoon": session(&self.record.afternoon),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Anthropic,
    Template,
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::Anthropic => f.write_str("anthropic"),
            Provider::Template => f.write_str("template"),
        }
    }
}

#[async_trait::async_trait]
pub trait NarrativeGenerator: Send + Sync {
    fn provider(&self) -> Provider;

    /// Open analysis for open slots, close summary for close slots.
    async fn event_narrative(&self, ctx: &NarrativeContext) -> anyhow::Result<RenderedHtml>;

    /// Generated once per day, with the afternoon close.
    async fn key_takeaways(&self, ctx: &NarrativeContext) -> anyhow::Result<Vec<String>>;
}
