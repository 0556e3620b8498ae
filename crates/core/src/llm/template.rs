use crate::document::grammar::format_signed;
use crate::domain::record::{RenderedHtml, Session};
use crate::llm::{NarrativeContext, NarrativeGenerator, Provider};

/// Offline generator: fixed sentences built from the submitted numbers.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateNarrator;

fn session_label(session: Session) -> &'static str {
    match session {
        Session::Morning => "Morning",
        Session::Afternoon => "Afternoon",
    }
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

impl TemplateNarrator {
    fn open_html(ctx: &NarrativeContext) -> String {
        let session = ctx.slot.session();
        let mut html = format!(
            "<p>{} session opened at <strong>{:.2}</strong> ({}).</p>",
            session_label(session),
            ctx.price.index,
            format_signed(ctx.price.change)
        );
        if let Some(highlights) = ctx.highlights.as_deref().filter(|h| !h.trim().is_empty()) {
            let lines: Vec<String> = highlights.trim().lines().map(escape_html).collect();
            html.push_str(&format!("\n<p>Highlights: {}</p>", lines.join("<br>")));
        }
        html
    }

    fn close_html(ctx: &NarrativeContext) -> String {
        let session = ctx.slot.session();
        let mut html = format!(
            "<p>{} session closed at <strong>{:.2}</strong> ({}).</p>",
            session_label(session),
            ctx.price.index,
            format_signed(ctx.price.change)
        );
        if let Some(open) = &ctx.record.session(session).open {
            let move_from_open = ctx.price.index - open.price.index;
            html.push_str(&format!(
                "\n<p>That is {} points from the session open at {:.2}.</p>",
                format_signed(move_from_open),
                open.price.index
            ));
        }
        html
    }
}

#[async_trait::async_trait]
impl NarrativeGenerator for TemplateNarrator {
    fn provider(&self) -> Provider {
        Provider::Template
    }

    async fn event_narrative(&self, ctx: &NarrativeContext) -> anyhow::Result<RenderedHtml> {
        let html = if ctx.slot.is_close() {
            Self::close_html(ctx)
        } else {
            Self::open_html(ctx)
        };
        Ok(RenderedHtml::new(html))
    }

    async fn key_takeaways(&self, ctx: &NarrativeContext) -> anyhow::Result<Vec<String>> {
        let mut items = Vec::new();
        if let Some(close) = &ctx.record.morning.close {
            items.push(format!(
                "Morning session closed at {:.2} ({})",
                close.price.index,
                format_signed(close.price.change)
            ));
        }
        items.push(format!(
            "Market closed the day at {:.2} ({})",
            ctx.price.index,
            format_signed(ctx.price.change)
        ));
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::event::EventSlot;
    use crate::domain::record::{OpenEntry, PriceEvent, TradingDayRecord};
    use chrono::NaiveDate;

    fn ctx(slot: EventSlot, highlights: Option<&str>) -> NarrativeContext {
        let date = NaiveDate::from_ymd_opt(2026, 1, 27).unwrap();
        let mut record = TradingDayRecord::new(date);
        record.morning.open = Some(OpenEntry::new(
            PriceEvent::new(1287.01, 4.47).unwrap(),
            "Banking",
            RenderedHtml::default(),
        ));
        NarrativeContext {
            date,
            slot,
            price: PriceEvent::new(1281.04, -1.5).unwrap(),
            highlights: highlights.map(str::to_string),
            record,
        }
    }

    #[tokio::test]
    async fn open_narrative_escapes_highlights() {
        let html = TemplateNarrator
            .event_narrative(&ctx(EventSlot::AfternoonOpen, Some("Chips <up>\nAutos & co")))
            .await
            .unwrap();
        assert_eq!(
            html.as_str(),
            "<p>Afternoon session opened at <strong>1281.04</strong> (-1.50).</p>\n\
<p>Highlights: Chips &lt;up&gt;<br>Autos &amp; co</p>"
        );
    }

    #[tokio::test]
    async fn close_narrative_references_open() {
        let html = TemplateNarrator
            .event_narrative(&ctx(EventSlot::MorningClose, None))
            .await
            .unwrap();
        assert!(html.as_str().contains("-5.97 points from the session open at 1287.01"));
    }

    #[tokio::test]
    async fn takeaways_are_non_empty() {
        let items = TemplateNarrator
            .key_takeaways(&ctx(EventSlot::AfternoonClose, None))
            .await
            .unwrap();
        assert_eq!(items, vec!["Market closed the day at 1281.04 (-1.50)"]);
    }
}
