use crate::document::grammar;
use crate::error::{Error, Result};
use anyhow::Context;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One document per trading date; the date is both the cache key and the storage key.
pub type DocumentKey = NaiveDate;

pub fn parse_document_key(s: &str) -> anyhow::Result<DocumentKey> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .with_context(|| format!("document key must be YYYY-MM-DD (got {s:?})"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Session {
    Morning,
    Afternoon,
}

impl Session {
    pub const ALL: [Session; 2] = [Session::Morning, Session::Afternoon];

    pub fn as_str(self) -> &'static str {
        match self {
            Session::Morning => "morning",
            Session::Afternoon => "afternoon",
        }
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Narrative markup produced by the generator. Stored and re-emitted verbatim, never
/// interpreted as markdown.
///
/// Construction normalizes line endings to `\n` and trims surrounding whitespace; that is
/// the only transformation the content ever sees.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RenderedHtml(String);

impl RenderedHtml {
    pub fn new(html: impl Into<String>) -> Self {
        let html: String = html.into();
        Self(html.replace("\r\n", "\n").trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for RenderedHtml {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceEvent {
    pub index: f64,
    pub change: f64,
}

impl PriceEvent {
    /// Values are kept at cent precision so the two-decimal document encoding is lossless.
    pub fn new(index: f64, change: f64) -> Result<Self> {
        if !index.is_finite() || !change.is_finite() {
            return Err(Error::InvalidPrice(format!(
                "index and change must be finite (got {index}, {change})"
            )));
        }
        if index < 0.0 {
            return Err(Error::InvalidPrice(format!(
                "index must be >= 0 (got {index})"
            )));
        }
        let (index, change) = (round_cents(index), round_cents(change));
        // Scaling to cents overflows to infinity near f64::MAX.
        if !index.is_finite() || !change.is_finite() {
            return Err(Error::InvalidPrice(format!(
                "index and change are out of range (got {index}, {change})"
            )));
        }
        Ok(Self { index, change })
    }
}

pub(crate) fn round_cents(v: f64) -> f64 {
    let rounded = (v * 100.0).round() / 100.0;
    // Collapse -0.0 so a flat change always re-encodes as "+0.00".
    if rounded == 0.0 {
        0.0
    } else {
        rounded
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OpenEntry {
    pub price: PriceEvent,
    /// May span several lines; the document stores line breaks as an inline `<br>` marker.
    pub highlights: String,
    pub analysis: RenderedHtml,
}

impl OpenEntry {
    pub fn new(price: PriceEvent, highlights: &str, analysis: RenderedHtml) -> Self {
        Self {
            price,
            highlights: grammar::normalize_highlights(highlights),
            analysis,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CloseEntry {
    pub price: PriceEvent,
    pub summary: RenderedHtml,
}

impl CloseEntry {
    pub fn new(price: PriceEvent, summary: RenderedHtml) -> Self {
        Self { price, summary }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub open: Option<OpenEntry>,
    pub close: Option<CloseEntry>,
}

impl SessionRecord {
    pub fn is_empty(&self) -> bool {
        self.open.is_none() && self.close.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TradingDayRecord {
    /// `None` only for a record decoded from a document without a title line.
    pub date: Option<NaiveDate>,
    pub morning: SessionRecord,
    pub afternoon: SessionRecord,
    pub key_takeaways: Vec<String>,
}

impl TradingDayRecord {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date: Some(date),
            ..Default::default()
        }
    }

    pub fn session(&self, session: Session) -> &SessionRecord {
        match session {
            Session::Morning => &self.morning,
            Session::Afternoon => &self.afternoon,
        }
    }

    pub fn session_mut(&mut self, session: Session) -> &mut SessionRecord {
        match session {
            Session::Morning => &mut self.morning,
            Session::Afternoon => &mut self.afternoon,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.morning.is_empty() && self.afternoon.is_empty() && self.key_takeaways.is_empty()
    }

    /// A close without an open in the same session is a data-integrity error.
    pub fn validate(&self) -> Result<()> {
        for session in Session::ALL {
            let s = self.session(session);
            if s.close.is_some() && s.open.is_none() {
                return Err(Error::CloseWithoutOpen { session });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn price_event_rounds_to_cents() {
        let p = PriceEvent::new(1287.0149, 4.466).unwrap();
        assert_eq!(p.index, 1287.01);
        assert_eq!(p.change, 4.47);
    }

    #[test]
    fn price_event_collapses_negative_zero() {
        let p = PriceEvent::new(10.0, -0.001).unwrap();
        assert!(p.change.is_sign_positive());
    }

    #[test]
    fn price_event_rejects_negative_index_and_nan() {
        assert!(matches!(
            PriceEvent::new(-1.0, 0.0),
            Err(Error::InvalidPrice(_))
        ));
        assert!(PriceEvent::new(f64::NAN, 0.0).is_err());
        assert!(PriceEvent::new(1.0, f64::INFINITY).is_err());
        assert!(matches!(
            PriceEvent::new(1e307, 0.0),
            Err(Error::InvalidPrice(_))
        ));
        assert!(matches!(
            PriceEvent::new(1.0, -1e307),
            Err(Error::InvalidPrice(_))
        ));
    }

    #[test]
    fn rendered_html_normalizes_line_endings_and_trims() {
        let html = RenderedHtml::new("\r\n  <p>a</p>\r\n<p>b</p>\r\n\r\n");
        assert_eq!(html.as_str(), "<p>a</p>\n<p>b</p>");
    }

    #[test]
    fn validate_rejects_close_without_open() {
        let mut record = TradingDayRecord::new(NaiveDate::from_ymd_opt(2026, 1, 27).unwrap());
        record.afternoon.close = Some(CloseEntry::default());
        assert!(matches!(
            record.validate(),
            Err(Error::CloseWithoutOpen {
                session: Session::Afternoon
            })
        ));
    }

    #[test]
    fn parses_document_key() {
        assert_eq!(
            parse_document_key(" 2026-01-27 ").unwrap(),
            NaiveDate::from_ymd_opt(2026, 1, 27).unwrap()
        );
        assert!(parse_document_key("27/01/2026").is_err());
    }
}
