//! Literal headings and line shapes of the trading-day document.
//!
//! ```text
//! # Trading Day: 2026-01-27
//!
//! ## Morning Session
//!
//! ### Open Set
//! * Open Index: 1287.01 (+4.47)
//! * Highlights: Banking +4.2%
//!
//! ### Open Analysis
//! <p>...</p>
//!
//! ### Close Set
//! * Close Index: 1281.04 (-1.50)
//!
//! ### Close Summary
//! <p>...</p>
//!
//! ---
//!
//! ## Afternoon Session
//! ...
//!
//! ## Key Takeaways
//! - ...
//! ```

use crate::domain::record::{round_cents, PriceEvent, Session};
use once_cell::sync::Lazy;
use regex::Regex;

pub const TITLE_PREFIX: &str = "# Trading Day:";
pub const MORNING_HEADING: &str = "## Morning Session";
pub const AFTERNOON_HEADING: &str = "## Afternoon Session";
pub const TAKEAWAYS_HEADING: &str = "## Key Takeaways";
pub const OPEN_SET_HEADING: &str = "### Open Set";
pub const OPEN_ANALYSIS_HEADING: &str = "### Open Analysis";
pub const CLOSE_SET_HEADING: &str = "### Close Set";
pub const CLOSE_SUMMARY_HEADING: &str = "### Close Summary";
pub const SESSION_SEPARATOR: &str = "---";

pub const OPEN_INDEX_LABEL: &str = "Open Index";
pub const CLOSE_INDEX_LABEL: &str = "Close Index";
pub const HIGHLIGHTS_PREFIX: &str = "* Highlights:";
pub const LINE_BREAK_MARKER: &str = "<br>";

static NUMERIC_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\*\s*(?P<label>Open Index|Close Index)\s*:\s*(?P<index>\d[\d,]*(?:\.\d+)?)\s*\(\s*(?P<change>[+-]?\d[\d,]*(?:\.\d+)?)\s*%?\s*\)\s*$",
    )
    .expect("numeric line regex must compile")
});

static LINE_BREAK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<br\s*/?>").expect("line break regex must compile"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    None,
    Session(Session),
    Takeaways,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subsection {
    None,
    Open,
    OpenAnalysis,
    Close,
    CloseSummary,
}

pub fn session_heading(session: Session) -> &'static str {
    match session {
        Session::Morning => MORNING_HEADING,
        Session::Afternoon => AFTERNOON_HEADING,
    }
}

/// `## ...` headings. Unrecognised text maps to `Section::None`.
pub fn classify_section(line: &str) -> Section {
    if line.starts_with(MORNING_HEADING) {
        Section::Session(Session::Morning)
    } else if line.starts_with(AFTERNOON_HEADING) {
        Section::Session(Session::Afternoon)
    } else if line.starts_with(TAKEAWAYS_HEADING) {
        Section::Takeaways
    } else {
        Section::None
    }
}

/// `### ...` headings. Unrecognised text maps to `Subsection::None`.
pub fn classify_subsection(line: &str) -> Subsection {
    if line.starts_with(OPEN_SET_HEADING) {
        Subsection::Open
    } else if line.starts_with(OPEN_ANALYSIS_HEADING) {
        Subsection::OpenAnalysis
    } else if line.starts_with(CLOSE_SET_HEADING) {
        Subsection::Close
    } else if line.starts_with(CLOSE_SUMMARY_HEADING) {
        Subsection::CloseSummary
    } else {
        Subsection::None
    }
}

/// True for any line that claims to carry `label`'s numbers, well-formed or not.
pub fn is_numeric_line(line: &str, label: &str) -> bool {
    line.trim_start()
        .strip_prefix('*')
        .map(str::trim_start)
        .is_some_and(|rest| rest.starts_with(label))
}

/// Parses `* <label>: <index> (<signed change>)`. `None` when the line does not match.
pub fn parse_numeric_line(line: &str, label: &str) -> Option<PriceEvent> {
    let caps = NUMERIC_LINE.captures(line.trim())?;
    if &caps["label"] != label {
        return None;
    }
    let index = parse_number(&caps["index"])?;
    let change = parse_number(&caps["change"])?;
    Some(PriceEvent {
        index: round_cents(index),
        change: round_cents(change),
    })
}

fn parse_number(s: &str) -> Option<f64> {
    s.replace(',', "").parse::<f64>().ok().filter(|v| v.is_finite())
}

pub fn format_numeric_line(label: &str, price: &PriceEvent) -> String {
    format!(
        "* {label}: {:.2} ({})",
        price.index,
        format_signed(price.change)
    )
}

/// `+4.47`, `-1.50`, `+0.00`.
pub fn format_signed(value: f64) -> String {
    let rounded = round_cents(value);
    let sign = if rounded < 0.0 { '-' } else { '+' };
    format!("{sign}{:.2}", rounded.abs())
}

/// In-memory form: real line breaks, no inline break tags.
pub fn normalize_highlights(raw: &str) -> String {
    let unified = raw.replace("\r\n", "\n");
    LINE_BREAK.replace_all(&unified, "\n").trim().to_string()
}

/// Document form: a single line with inline break tags.
pub fn encode_highlights(highlights: &str) -> String {
    highlights.replace('\n', LINE_BREAK_MARKER)
}

pub fn takeaway_item(line: &str) -> Option<String> {
    let trimmed = line.trim();
    trimmed
        .strip_prefix('-')
        .or_else(|| trimmed.strip_prefix('*'))
        .map(|rest| rest.trim().to_string())
}
