use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};

const IST_OFFSET_SECS: i32 = 5 * 3600 + 30 * 60;

// An explicit `YYYY-MM-DD` argument wins; otherwise the current calendar
// date in IST. Rearing cycles run on calendar days, so there is no weekend
// or holiday rollback.
pub fn resolve_as_of_date(
    as_of_date_arg: Option<&str>,
    now_utc: DateTime<Utc>,
) -> anyhow::Result<NaiveDate> {
    if let Some(s) = as_of_date_arg {
        return Ok(NaiveDate::parse_from_str(s, "%Y-%m-%d")?);
    }

    let ist = chrono::FixedOffset::east_opt(IST_OFFSET_SECS).context("invalid IST offset")?;
    Ok(now_utc.with_timezone(&ist).date_naive())
}
