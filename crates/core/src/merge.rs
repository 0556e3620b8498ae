use crate::domain::event::{normalize_takeaways, EventSlot, PartialUpdate};
use crate::domain::record::{Session, TradingDayRecord};
use crate::error::{Error, Result};

/// Fails with `MissingOpenData` when `slot` is a close and its session has no open yet.
pub fn check_event_order(record: &TradingDayRecord, slot: EventSlot) -> Result<()> {
    let session = slot.session();
    if slot.is_close() && record.session(session).open.is_none() {
        return Err(Error::MissingOpenData { session });
    }
    Ok(())
}

/// Returns a copy of `existing` with exactly the half targeted by `event` replaced.
///
/// Every field the event does not target is carried over untouched. Key takeaways are only
/// written by an afternoon close that carries them, folded to one line each so every item
/// survives the document encoding. `existing` is never modified, so a rejected event leaves
/// the caller's record as it was.
pub fn apply_event(existing: &TradingDayRecord, event: &PartialUpdate) -> Result<TradingDayRecord> {
    check_event_order(existing, event.slot())?;

    let mut next = existing.clone();
    match event {
        PartialUpdate::MorningOpen(open) => {
            next.session_mut(Session::Morning).open = Some(open.clone());
        }
        PartialUpdate::AfternoonOpen(open) => {
            next.session_mut(Session::Afternoon).open = Some(open.clone());
        }
        PartialUpdate::MorningClose(close) => {
            next.session_mut(Session::Morning).close = Some(close.clone());
        }
        PartialUpdate::AfternoonClose {
            close,
            key_takeaways,
        } => {
            next.session_mut(Session::Afternoon).close = Some(close.clone());
            if let Some(items) = key_takeaways {
                next.key_takeaways = normalize_takeaways(items.clone());
            }
        }
    }

    tracing::debug!(
        date = ?next.date,
        slot = %event.slot(),
        "applied event to trading-day record"
    );
    Ok(next)
}
