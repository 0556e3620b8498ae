use crate::domain::record::{CloseEntry, OpenEntry, PriceEvent, RenderedHtml, Session};
use crate::error::Error;
use anyhow::bail;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSlot {
    MorningOpen,
    MorningClose,
    AfternoonOpen,
    AfternoonClose,
}

impl EventSlot {
    pub fn session(self) -> Session {
        match self {
            EventSlot::MorningOpen | EventSlot::MorningClose => Session::Morning,
            EventSlot::AfternoonOpen | EventSlot::AfternoonClose => Session::Afternoon,
        }
    }

    pub fn is_close(self) -> bool {
        matches!(self, EventSlot::MorningClose | EventSlot::AfternoonClose)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventSlot::MorningOpen => "morning_open",
            EventSlot::MorningClose => "morning_close",
            EventSlot::AfternoonOpen => "afternoon_open",
            EventSlot::AfternoonClose => "afternoon_close",
        }
    }
}

impl fmt::Display for EventSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventSlot {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "morning_open" => Ok(EventSlot::MorningOpen),
            "morning_close" => Ok(EventSlot::MorningClose),
            "afternoon_open" => Ok(EventSlot::AfternoonOpen),
            "afternoon_close" => Ok(EventSlot::AfternoonClose),
            other => bail!("unknown event slot: {other}"),
        }
    }
}

/// Exactly one event for one half of one session. Narrative text is already attached.
#[derive(Debug, Clone, PartialEq)]
pub enum PartialUpdate {
    MorningOpen(OpenEntry),
    MorningClose(CloseEntry),
    AfternoonOpen(OpenEntry),
    AfternoonClose {
        close: CloseEntry,
        /// Generated once per day; `None` keeps whatever the record already has.
        key_takeaways: Option<Vec<String>>,
    },
}

impl PartialUpdate {
    pub fn slot(&self) -> EventSlot {
        match self {
            PartialUpdate::MorningOpen(_) => EventSlot::MorningOpen,
            PartialUpdate::MorningClose(_) => EventSlot::MorningClose,
            PartialUpdate::AfternoonOpen(_) => EventSlot::AfternoonOpen,
            PartialUpdate::AfternoonClose { .. } => EventSlot::AfternoonClose,
        }
    }
}

/// Event data as an operator submits it, before narrative generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSubmission {
    pub slot: EventSlot,
    pub index: f64,
    pub change: f64,
    #[serde(default)]
    pub highlights: Option<String>,
}

impl EventSubmission {
    pub fn price(&self) -> anyhow::Result<PriceEvent> {
        Ok(PriceEvent::new(self.index, self.change)?)
    }

    pub fn validate(&self) -> anyhow::Result<PriceEvent> {
        if self.slot.is_close() {
            let has_highlights = self
                .highlights
                .as_deref()
                .is_some_and(|h| !h.trim().is_empty());
            if has_highlights {
                return Err(Error::InvalidSubmission(format!(
                    "highlights are only accepted with open events (slot={})",
                    self.slot
                ))
                .into());
            }
        }
        self.price()
    }

    pub fn into_update(
        self,
        narrative: RenderedHtml,
        key_takeaways: Option<Vec<String>>,
    ) -> anyhow::Result<PartialUpdate> {
        let price = self.validate()?;
        if key_takeaways.is_some() && self.slot != EventSlot::AfternoonClose {
            return Err(Error::InvalidSubmission(format!(
                "key takeaways are only accepted with the afternoon close (slot={})",
                self.slot
            ))
            .into());
        }

        let highlights = self.highlights.as_deref().unwrap_or_default();
        let update = match self.slot {
            EventSlot::MorningOpen => {
                PartialUpdate::MorningOpen(OpenEntry::new(price, highlights, narrative))
            }
            EventSlot::AfternoonOpen => {
                PartialUpdate::AfternoonOpen(OpenEntry::new(price, highlights, narrative))
            }
            EventSlot::MorningClose => PartialUpdate::MorningClose(CloseEntry::new(price, narrative)),
            EventSlot::AfternoonClose => PartialUpdate::AfternoonClose {
                close: CloseEntry::new(price, narrative),
                key_takeaways: key_takeaways.map(normalize_takeaways),
            },
        };
        Ok(update)
    }
}

/// One takeaway per document line: internal line breaks are folded, blanks dropped.
pub fn normalize_takeaways(items: Vec<String>) -> Vec<String> {
    items
        .into_iter()
        .map(|item| item.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|item| !item.is_empty())
        .collect()
}
