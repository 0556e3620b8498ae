use anyhow::Context;
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use std::collections::HashSet;

const KST_OFFSET_SECS: i32 = 9 * 3600;

/// Trading date an event belongs to.
///
/// An explicit `YYYY-MM-DD` wins. Otherwise it is today's KST date, rolled back to the
/// previous business day on weekends and configured holidays.
pub fn resolve_trading_date(
    date_arg: Option<&str>,
    now_utc: DateTime<Utc>,
) -> anyhow::Result<NaiveDate> {
    if let Some(s) = date_arg {
        return NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .with_context(|| format!("trading date must be YYYY-MM-DD (got {s:?})"));
    }

    let kst = chrono::FixedOffset::east_opt(KST_OFFSET_SECS).context("invalid KST offset")?;
    let mut date = now_utc.with_timezone(&kst).date_naive();

    let holidays = configured_holidays();
    while !is_business_day(date, &holidays) {
        date = date - Duration::days(1);
    }

    Ok(date)
}

pub fn is_business_day(date: NaiveDate, holidays: &HashSet<NaiveDate>) -> bool {
    !is_weekend(date) && !holidays.contains(&date)
}

fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), chrono::Weekday::Sat | chrono::Weekday::Sun)
}

pub fn configured_holidays() -> HashSet<NaiveDate> {
    // Fixed-date KRX closures only. Lunar holidays vary by year; list them in
    // KR_MARKET_HOLIDAYS="YYYY-MM-DD,YYYY-MM-DD".
    let mut out = HashSet::new();
    for y in 2024..=2030 {
        for (m, d) in [(1, 1), (3, 1), (5, 5), (8, 15), (10, 3), (10, 9), (12, 25), (12, 31)] {
            if let Some(date) = NaiveDate::from_ymd_opt(y, m, d) {
                out.insert(date);
            }
        }
    }

    if let Ok(s) = std::env::var("KR_MARKET_HOLIDAYS") {
        for part in s.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            match NaiveDate::parse_from_str(part, "%Y-%m-%d") {
                Ok(d) => {
                    out.insert(d);
                }
                Err(err) => tracing::warn!(value = part, error = %err, "ignoring invalid KR_MARKET_HOLIDAYS entry"),
            }
        }
    }

    out
}
