use crate::document::grammar;
use crate::domain::record::{Session, SessionRecord, TradingDayRecord};

/// Serializes a record into canonical document text.
///
/// Output is a pure function of the record: title, Morning Session, separator, Afternoon
/// Session, Key Takeaways. Unset halves and empty narrative blocks are omitted entirely.
pub fn encode_document(record: &TradingDayRecord) -> String {
    let mut blocks: Vec<String> = Vec::new();

    if let Some(date) = record.date {
        blocks.push(format!("{} {date}", grammar::TITLE_PREFIX));
    }

    let mut wrote_session = false;
    for session in Session::ALL {
        let s = record.session(session);
        if s.is_empty() {
            continue;
        }
        if wrote_session {
            blocks.push(grammar::SESSION_SEPARATOR.to_string());
        }
        push_session(&mut blocks, session, s);
        wrote_session = true;
    }

    if !record.key_takeaways.is_empty() {
        let mut block = String::from(grammar::TAKEAWAYS_HEADING);
        for item in &record.key_takeaways {
            block.push_str("\n- ");
            block.push_str(item);
        }
        blocks.push(block);
    }

    if blocks.is_empty() {
        return String::new();
    }
    let mut out = blocks.join("\n\n");
    out.push('\n');
    out
}

fn push_session(blocks: &mut Vec<String>, session: Session, s: &SessionRecord) {
    blocks.push(grammar::session_heading(session).to_string());

    if let Some(open) = &s.open {
        let mut set = format!(
            "{}\n{}",
            grammar::OPEN_SET_HEADING,
            grammar::format_numeric_line(grammar::OPEN_INDEX_LABEL, &open.price)
        );
        if !open.highlights.is_empty() {
            set.push('\n');
            set.push_str(grammar::HIGHLIGHTS_PREFIX);
            set.push(' ');
            set.push_str(&grammar::encode_highlights(&open.highlights));
        }
        blocks.push(set);

        if !open.analysis.is_empty() {
            blocks.push(format!(
                "{}\n{}",
                grammar::OPEN_ANALYSIS_HEADING,
                open.analysis
            ));
        }
    }

    if let Some(close) = &s.close {
        blocks.push(format!(
            "{}\n{}",
            grammar::CLOSE_SET_HEADING,
            grammar::format_numeric_line(grammar::CLOSE_INDEX_LABEL, &close.price)
        ));

        if !close.summary.is_empty() {
            blocks.push(format!(
                "{}\n{}",
                grammar::CLOSE_SUMMARY_HEADING,
                close.summary
            ));
        }
    }
}
