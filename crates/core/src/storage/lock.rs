use crate::domain::location::Location;
use anyhow::Context;
use chrono::{Datelike, NaiveDate};

// Advisory locks are scoped to the Postgres session. This is used as a
// best-effort guard against concurrent batch runs for the same location and
// as-of date.
const LOCK_NAMESPACE: i64 = 0x434F_434F_4F4E; // "COCOON" as hex-ish namespace.

fn lock_key(location: Location, as_of_date: NaiveDate) -> i64 {
    // Location bits sit well above the day-count range, so distinct
    // locations never collide on the same date.
    let location_bits = ((location as i64) + 1) << 40;
    LOCK_NAMESPACE ^ location_bits ^ (as_of_date.num_days_from_ce() as i64)
}

pub async fn try_acquire_run_lock(
    pool: &sqlx::PgPool,
    location: Location,
    as_of_date: NaiveDate,
) -> anyhow::Result<bool> {
    let key = lock_key(location, as_of_date);
    let acquired: (bool,) = sqlx::query_as("SELECT pg_try_advisory_lock($1)")
        .persistent(false)
        .bind(key)
        .fetch_one(pool)
        .await
        .with_context(|| format!("failed to acquire advisory lock (key={key})"))?;
    Ok(acquired.0)
}

pub async fn release_run_lock(
    pool: &sqlx::PgPool,
    location: Location,
    as_of_date: NaiveDate,
) -> anyhow::Result<()> {
    let key = lock_key(location, as_of_date);
    sqlx::query("SELECT pg_advisory_unlock($1)")
        .persistent(false)
        .bind(key)
        .execute(pool)
        .await
        .with_context(|| format!("failed to release advisory lock (key={key})"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_stable_and_distinct() {
        let date = NaiveDate::from_ymd_opt(2025, 7, 14).unwrap();
        let next = NaiveDate::from_ymd_opt(2025, 7, 15).unwrap();

        assert_eq!(
            lock_key(Location::Ramanagar, date),
            lock_key(Location::Ramanagar, date)
        );
        assert_ne!(
            lock_key(Location::Ramanagar, date),
            lock_key(Location::Bengaluru, date)
        );
        assert_ne!(
            lock_key(Location::Ramanagar, date),
            lock_key(Location::Ramanagar, next)
        );
    }
}
