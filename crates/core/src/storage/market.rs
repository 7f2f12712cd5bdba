use crate::domain::recommendation::MarketObservation;
use anyhow::Context;
use chrono::{DateTime, Utc};
use uuid::Uuid;

// Transactional batched upsert keyed on `(location, observed_on)`.
// Re-ingesting a ledger overwrites earlier values for the same day.
pub async fn upsert_observations(
    pool: &sqlx::PgPool,
    observations: &[MarketObservation],
) -> anyhow::Result<u64> {
    anyhow::ensure!(!observations.is_empty(), "observations must be non-empty");

    let mut tx = pool.begin().await.context("begin transaction failed")?;

    let chunk_size: usize = std::env::var("MARKET_UPSERT_BATCH")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(200);
    anyhow::ensure!(chunk_size >= 1, "MARKET_UPSERT_BATCH must be >= 1");

    let mut affected: u64 = 0;
    let mut batch_idx: usize = 0;
    for chunk in observations.chunks(chunk_size) {
        batch_idx += 1;
        let t0 = std::time::Instant::now();
        let mut qb = sqlx::QueryBuilder::new(
            "INSERT INTO market_observations \
               (location, observed_on, market_price, avg_temp_c, max_temp_c, humidity_pct, rainfall_mm) ",
        );
        qb.push_values(chunk, |mut b, obs| {
            b.push_bind(obs.location.name())
                .push_bind(obs.observed_on)
                .push_bind(obs.market_price)
                .push_bind(obs.avg_temp_c)
                .push_bind(obs.max_temp_c)
                .push_bind(obs.humidity_pct)
                .push_bind(obs.rainfall_mm);
        });
        qb.push(
            " ON CONFLICT (location, observed_on) DO UPDATE \
               SET market_price = EXCLUDED.market_price, \
                   avg_temp_c = EXCLUDED.avg_temp_c, \
                   max_temp_c = EXCLUDED.max_temp_c, \
                   humidity_pct = EXCLUDED.humidity_pct, \
                   rainfall_mm = EXCLUDED.rainfall_mm",
        );

        let res = qb
            .build()
            .persistent(false)
            .execute(&mut *tx)
            .await
            .context("batch upsert market_observations failed")?;
        affected += res.rows_affected();

        tracing::debug!(
            batch_idx,
            batch_size = chunk.len(),
            elapsed_ms = t0.elapsed().as_millis(),
            "market_observations batch upsert"
        );
    }

    tx.commit().await.context("commit transaction failed")?;
    Ok(affected)
}

pub async fn record_ingest_run(
    pool: &sqlx::PgPool,
    source: &str,
    status: &str,
    rows_affected: Option<i64>,
    error: Option<&str>,
) -> anyhow::Result<Uuid> {
    let id = Uuid::new_v4();
    let ingested_at: DateTime<Utc> = Utc::now();

    sqlx::query(
        "INSERT INTO market_ingest_runs (id, ingested_at, source, status, rows_affected, error) \
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .persistent(false)
    .bind(id)
    .bind(ingested_at)
    .bind(source)
    .bind(status)
    .bind(rows_affected)
    .bind(error)
    .execute(pool)
    .await
    .context("insert market_ingest_runs failed")?;

    Ok(id)
}
