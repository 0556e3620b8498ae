//! Relational index of trading days, used for listing and lookup only. Document content
//! lives in the [`DocumentStore`](crate::storage::DocumentStore); this table is synced after
//! each successful write.

use crate::domain::event::EventSlot;
use crate::domain::record::{DocumentKey, Session, TradingDayRecord};
use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradingDaySummary {
    pub trading_date: NaiveDate,
    pub last_slot: String,
    pub morning_open_index: Option<f64>,
    pub morning_close_index: Option<f64>,
    pub afternoon_open_index: Option<f64>,
    pub afternoon_close_index: Option<f64>,
    pub day_change: Option<f64>,
    pub has_takeaways: bool,
    pub updated_at: DateTime<Utc>,
}

impl TradingDaySummary {
    pub fn from_record(
        date: DocumentKey,
        last_slot: EventSlot,
        record: &TradingDayRecord,
        updated_at: DateTime<Utc>,
    ) -> Self {
        let open_index = |s: Session| record.session(s).open.as_ref().map(|o| o.price.index);
        let close_index = |s: Session| record.session(s).close.as_ref().map(|c| c.price.index);

        Self {
            trading_date: date,
            last_slot: last_slot.to_string(),
            morning_open_index: open_index(Session::Morning),
            morning_close_index: close_index(Session::Morning),
            afternoon_open_index: open_index(Session::Afternoon),
            afternoon_close_index: close_index(Session::Afternoon),
            day_change: record
                .afternoon
                .close
                .as_ref()
                .map(|c| c.price.change),
            has_takeaways: !record.key_takeaways.is_empty(),
            updated_at,
        }
    }
}

type SummaryRow = (
    NaiveDate,
    String,
    Option<f64>,
    Option<f64>,
    Option<f64>,
    Option<f64>,
    Option<f64>,
    bool,
    DateTime<Utc>,
);

fn from_row(row: SummaryRow) -> TradingDaySummary {
    let (
        trading_date,
        last_slot,
        morning_open_index,
        morning_close_index,
        afternoon_open_index,
        afternoon_close_index,
        day_change,
        has_takeaways,
        updated_at,
    ) = row;
    TradingDaySummary {
        trading_date,
        last_slot,
        morning_open_index,
        morning_close_index,
        afternoon_open_index,
        afternoon_close_index,
        day_change,
        has_takeaways,
        updated_at,
    }
}

pub async fn upsert_trading_day(
    pool: &sqlx::PgPool,
    summary: &TradingDaySummary,
) -> anyhow::Result<()> {
    sqlx::query(
        "INSERT INTO trading_days (trading_date, last_slot, morning_open_index, morning_close_index, \
         afternoon_open_index, afternoon_close_index, day_change, has_takeaways, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
         ON CONFLICT (trading_date) DO UPDATE \
           SET last_slot = EXCLUDED.last_slot, \
               morning_open_index = EXCLUDED.morning_open_index, \
               morning_close_index = EXCLUDED.morning_close_index, \
               afternoon_open_index = EXCLUDED.afternoon_open_index, \
               afternoon_close_index = EXCLUDED.afternoon_close_index, \
               day_change = EXCLUDED.day_change, \
               has_takeaways = EXCLUDED.has_takeaways, \
               updated_at = EXCLUDED.updated_at",
    )
    .persistent(false)
    .bind(summary.trading_date)
    .bind(&summary.last_slot)
    .bind(summary.morning_open_index)
    .bind(summary.morning_close_index)
    .bind(summary.afternoon_open_index)
    .bind(summary.afternoon_close_index)
    .bind(summary.day_change)
    .bind(summary.has_takeaways)
    .bind(summary.updated_at)
    .execute(pool)
    .await
    .context("upsert trading_days failed")?;
    Ok(())
}

pub async fn record_event(
    pool: &sqlx::PgPool,
    date: DocumentKey,
    slot: EventSlot,
    index: f64,
    change: f64,
) -> anyhow::Result<Uuid> {
    let id = Uuid::new_v4();
    let submitted_at: DateTime<Utc> = Utc::now();

    sqlx::query(
        "INSERT INTO trading_day_events (id, trading_date, slot, index_value, change_value, submitted_at) \
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .persistent(false)
    .bind(id)
    .bind(date)
    .bind(slot.as_str())
    .bind(index)
    .bind(change)
    .bind(submitted_at)
    .execute(pool)
    .await
    .context("insert trading_day_events failed")?;

    Ok(id)
}

pub async fn list_trading_days(
    pool: &sqlx::PgPool,
    limit: i64,
) -> anyhow::Result<Vec<TradingDaySummary>> {
    anyhow::ensure!((1..=1000).contains(&limit), "limit must be 1..=1000 (got {limit})");

    let rows = sqlx::query_as::<_, SummaryRow>(
        "SELECT trading_date, last_slot, morning_open_index, morning_close_index, \
         afternoon_open_index, afternoon_close_index, day_change, has_takeaways, updated_at \
         FROM trading_days \
         ORDER BY trading_date DESC \
         LIMIT $1",
    )
    .persistent(false)
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("select trading_days failed")?;

    Ok(rows.into_iter().map(from_row).collect())
}

pub async fn fetch_trading_day(
    pool: &sqlx::PgPool,
    date: DocumentKey,
) -> anyhow::Result<Option<TradingDaySummary>> {
    let row = sqlx::query_as::<_, SummaryRow>(
        "SELECT trading_date, last_slot, morning_open_index, morning_close_index, \
         afternoon_open_index, afternoon_close_index, day_change, has_takeaways, updated_at \
         FROM trading_days \
         WHERE trading_date = $1",
    )
    .persistent(false)
    .bind(date)
    .fetch_optional(pool)
    .await
    .context("select trading_days by date failed")?;

    Ok(row.map(from_row))
}
