use crate::document::grammar::{self, Section, Subsection};
use crate::domain::record::{RenderedHtml, Session, SessionRecord, TradingDayRecord};
use crate::error::Result;
use chrono::NaiveDate;

/// Parses document text into a record.
///
/// Numeric lines that do not match `<label>: <number> (<signed number>)` are skipped with a
/// warning and leave the value at zero; the rest of the document still decodes. Narrative
/// blocks are copied through verbatim. When a subsection appears more than once the last
/// occurrence wins.
///
/// The only failure is a decoded session holding close data without open data.
pub fn decode_document(text: &str) -> Result<TradingDayRecord> {
    let mut decoder = Decoder::default();
    for (idx, line) in text.lines().enumerate() {
        decoder.line(idx + 1, line);
    }
    let record = decoder.finish();
    record.validate()?;
    Ok(record)
}

struct Decoder {
    record: TradingDayRecord,
    section: Section,
    subsection: Subsection,
    block: Vec<String>,
}

impl Default for Decoder {
    fn default() -> Self {
        Self {
            record: TradingDayRecord::default(),
            section: Section::None,
            subsection: Subsection::None,
            block: Vec::new(),
        }
    }
}

impl Decoder {
    fn line(&mut self, line_no: usize, line: &str) {
        if line.starts_with("### ") {
            self.flush_block(false);
            self.enter_subsection(grammar::classify_subsection(line));
            return;
        }
        if line.starts_with("## ") {
            let next = grammar::classify_section(line);
            // The encoder writes `---` only between the two sessions.
            let at_separator = self.section == Section::Session(Session::Morning)
                && next == Section::Session(Session::Afternoon);
            self.flush_block(at_separator);
            self.section = next;
            self.subsection = Subsection::None;
            return;
        }
        if self.section == Section::None && line.starts_with(grammar::TITLE_PREFIX) {
            self.record.date = parse_title(line_no, line);
            return;
        }

        match (self.section, self.subsection) {
            (Section::Session(_), Subsection::Open) => self.open_set_line(line_no, line),
            (Section::Session(_), Subsection::Close) => self.close_set_line(line_no, line),
            (Section::Session(_), Subsection::OpenAnalysis | Subsection::CloseSummary) => {
                self.block.push(line.to_string());
            }
            (Section::Takeaways, _) => {
                if let Some(item) = grammar::takeaway_item(line) {
                    self.record.key_takeaways.push(item);
                }
            }
            _ => {}
        }
    }

    fn current_session(&mut self) -> Option<&mut SessionRecord> {
        match self.section {
            Section::Session(session) => Some(self.record.session_mut(session)),
            Section::None | Section::Takeaways => None,
        }
    }

    fn enter_subsection(&mut self, subsection: Subsection) {
        let Some(session) = self.current_session() else {
            self.subsection = Subsection::None;
            return;
        };
        match subsection {
            Subsection::Open | Subsection::OpenAnalysis => {
                session.open.get_or_insert_with(Default::default);
            }
            Subsection::Close | Subsection::CloseSummary => {
                session.close.get_or_insert_with(Default::default);
            }
            Subsection::None => {}
        }
        self.subsection = subsection;
    }

    fn open_set_line(&mut self, line_no: usize, line: &str) {
        let Some(open) = self.current_session().and_then(|s| s.open.as_mut()) else {
            return;
        };
        if let Some(rest) = line.trim_start().strip_prefix(grammar::HIGHLIGHTS_PREFIX) {
            open.highlights = grammar::normalize_highlights(rest);
        } else if grammar::is_numeric_line(line, grammar::OPEN_INDEX_LABEL) {
            match grammar::parse_numeric_line(line, grammar::OPEN_INDEX_LABEL) {
                Some(price) => open.price = price,
                None => warn_malformed(line_no, line),
            }
        }
    }

    fn close_set_line(&mut self, line_no: usize, line: &str) {
        let Some(close) = self.current_session().and_then(|s| s.close.as_mut()) else {
            return;
        };
        if grammar::is_numeric_line(line, grammar::CLOSE_INDEX_LABEL) {
            match grammar::parse_numeric_line(line, grammar::CLOSE_INDEX_LABEL) {
                Some(price) => close.price = price,
                None => warn_malformed(line_no, line),
            }
        }
    }

    /// Moves the collected narrative lines into the current entry. With `strip_separator`
    /// one trailing `---` (the session separator) is dropped as well.
    fn flush_block(&mut self, strip_separator: bool) {
        let mut lines = std::mem::take(&mut self.block);
        let subsection = self.subsection;
        if !matches!(
            subsection,
            Subsection::OpenAnalysis | Subsection::CloseSummary
        ) {
            return;
        }

        trim_trailing_blank(&mut lines);
        if strip_separator
            && lines
                .last()
                .is_some_and(|l| l.trim() == grammar::SESSION_SEPARATOR)
        {
            lines.pop();
            trim_trailing_blank(&mut lines);
        }
        let html = RenderedHtml::new(lines.join("\n"));

        let Some(session) = self.current_session() else {
            return;
        };
        match subsection {
            Subsection::OpenAnalysis => {
                if let Some(open) = session.open.as_mut() {
                    open.analysis = html;
                }
            }
            Subsection::CloseSummary => {
                if let Some(close) = session.close.as_mut() {
                    close.summary = html;
                }
            }
            _ => {}
        }
    }

    fn finish(mut self) -> TradingDayRecord {
        self.flush_block(false);
        self.record
    }
}

fn trim_trailing_blank(lines: &mut Vec<String>) {
    while lines.last().is_some_and(|l| l.trim().is_empty()) {
        lines.pop();
    }
}

fn parse_title(line_no: usize, line: &str) -> Option<NaiveDate> {
    let raw = line.strip_prefix(grammar::TITLE_PREFIX)?.trim();
    match NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        Ok(date) => Some(date),
        Err(err) => {
            tracing::warn!(line_no, title = raw, error = %err, "unparsable title date; ignoring");
            None
        }
    }
}

fn warn_malformed(line_no: usize, line: &str) {
    tracing::warn!(line_no, line, "malformed numeric line; leaving value at zero");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::record::{PriceEvent, Session};
    use crate::error::Error;

    #[test]
    fn decodes_morning_open_scenario() {
        let text = "## Morning Session\n### Open Set\n* Open Index: 1287.01 (+4.47)\n* Highlights: Banking +4.2%\n";
        let record = decode_document(text).unwrap();

        let open = record.morning.open.as_ref().unwrap();
        assert_eq!(open.price, PriceEvent { index: 1287.01, change: 4.47 });
        assert_eq!(open.highlights, "Banking +4.2%");
        assert!(open.analysis.is_empty());
        assert!(record.morning.close.is_none());
        assert!(record.afternoon.is_empty());
        assert!(record.key_takeaways.is_empty());
        assert_eq!(record.date, None);
    }

    #[test]
    fn empty_source_is_zero_value_record() {
        assert_eq!(decode_document("").unwrap(), TradingDayRecord::default());
        assert_eq!(decode_document("\n\n").unwrap(), TradingDayRecord::default());
    }

    #[test]
    fn malformed_numeric_line_is_tolerated() {
        let text = "# Trading Day: 2026-01-27\n\
## Morning Session\n\
### Open Set\n\
* Open Index: not-a-number (??)\n\
* Highlights: Autos weak\n\
### Close Set\n\
* Close Index: 1281.04 (-1.50)\n";
        let record = decode_document(text).unwrap();

        let open = record.morning.open.as_ref().unwrap();
        assert_eq!(open.price.index, 0.0);
        assert_eq!(open.price.change, 0.0);
        assert_eq!(open.highlights, "Autos weak");
        let close = record.morning.close.as_ref().unwrap();
        assert_eq!(close.price, PriceEvent { index: 1281.04, change: -1.5 });
        assert_eq!(record.date, NaiveDate::from_ymd_opt(2026, 1, 27));
    }

    #[test]
    fn narrative_blocks_are_stored_verbatim() {
        let text = [
            "## Morning Session",
            "### Open Set",
            "* Open Index: 1.00 (+0.00)",
            "### Open Analysis",
            "<p>Foreign buyers <strong>returned</strong>.</p>",
            "",
            "  <ul><li>**not markdown**</li></ul>",
            "",
            "---",
            "",
            "## Afternoon Session",
        ]
        .join("\n");
        let record = decode_document(&text).unwrap();
        let open = record.morning.open.unwrap();
        assert_eq!(
            open.analysis.as_str(),
            "<p>Foreign buyers <strong>returned</strong>.</p>\n\n  <ul><li>**not markdown**</li></ul>"
        );
    }

    #[test]
    fn rule_before_takeaways_stays_in_summary() {
        let text = [
            "## Morning Session",
            "### Open Set",
            "* Open Index: 1.00 (+0.00)",
            "### Close Set",
            "* Close Index: 2.00 (+1.00)",
            "### Close Summary",
            "<p>a</p>",
            "---",
            "",
            "## Key Takeaways",
            "- k",
        ]
        .join("\n");
        let record = decode_document(&text).unwrap();
        assert_eq!(record.morning.close.unwrap().summary.as_str(), "<p>a</p>\n---");
        assert_eq!(record.key_takeaways, vec!["k"]);
    }

    #[test]
    fn highlight_break_marker_becomes_newline() {
        let text = "## Afternoon Session\n### Open Set\n* Highlights: Chips<br>Autos\n";
        let record = decode_document(text).unwrap();
        assert_eq!(record.afternoon.open.unwrap().highlights, "Chips\nAutos");
    }

    #[test]
    fn takeaways_accept_dash_and_star() {
        let text = "## Key Takeaways\n- Banks led\n* Chips lagged\nnot an item\n";
        let record = decode_document(text).unwrap();
        assert_eq!(record.key_takeaways, vec!["Banks led", "Chips lagged"]);
    }

    #[test]
    fn unknown_headings_are_ignored() {
        let text = "## Morning Session\n### Notes\n* Open Index: 9.00 (+1.00)\n## Market Recap\n- not a takeaway\n";
        let record = decode_document(text).unwrap();
        assert!(record.morning.is_empty());
        assert!(record.key_takeaways.is_empty());
    }

    #[test]
    fn close_without_open_is_integrity_error() {
        let text = "## Afternoon Session\n### Close Set\n* Close Index: 10.00 (+1.00)\n";
        assert!(matches!(
            decode_document(text),
            Err(Error::CloseWithoutOpen {
                session: Session::Afternoon
            })
        ));
    }

    #[test]
    fn duplicated_subsection_collapses_to_last() {
        let text = "## Morning Session\n\
### Open Set\n\
* Open Index: 1.00 (+1.00)\n\
### Open Set\n\
* Open Index: 2.00 (+2.00)\n";
        let record = decode_document(text).unwrap();
        assert_eq!(record.morning.open.unwrap().price.index, 2.0);
    }
}
