use crate::domain::location::Location;
use crate::domain::recommendation::{PredictionCandidate, Recommendation, RecommendationRecord};
use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

// Persists one recommendation plus its full horizon, atomically. Worker
// batch runs pass `user_id = None`; history queries are user-scoped and
// never see those rows.
pub async fn save(
    pool: &sqlx::PgPool,
    user_id: Option<&str>,
    recommendation: &Recommendation,
) -> anyhow::Result<Uuid> {
    anyhow::ensure!(
        !recommendation.horizon.is_empty(),
        "recommendation must carry at least one horizon day"
    );
    anyhow::ensure!(
        recommendation.best_index < recommendation.horizon.len(),
        "best_index {} out of range for horizon of {}",
        recommendation.best_index,
        recommendation.horizon.len()
    );

    let mut tx = pool.begin().await.context("begin transaction failed")?;

    let recommendation_id: Uuid = sqlx::query_scalar(
        "INSERT INTO recommendations \
           (user_id, location, generated_at, start_date, end_date, predicted_price_at_end, best_index, degraded) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
         RETURNING id",
    )
    .bind(user_id)
    .bind(recommendation.location.name())
    .bind(recommendation.generated_at)
    .bind(recommendation.start_date)
    .bind(recommendation.end_date)
    .bind(recommendation.predicted_price_at_end)
    .bind(recommendation.best_index as i32)
    .bind(recommendation.degraded)
    .fetch_one(&mut *tx)
    .await
    .context("insert recommendations failed")?;

    for candidate in &recommendation.horizon {
        insert_horizon_day(&mut tx, recommendation_id, candidate).await?;
    }

    tx.commit().await.context("commit transaction failed")?;
    Ok(recommendation_id)
}

async fn insert_horizon_day(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    recommendation_id: Uuid,
    candidate: &PredictionCandidate,
) -> anyhow::Result<()> {
    sqlx::query(
        "INSERT INTO recommendation_days \
           (recommendation_id, date, predicted_price, avg_temp_c, max_temp_c, humidity_pct, rainfall_mm, viable, adjusted_duration_days) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
    )
    .bind(recommendation_id)
    .bind(candidate.date)
    .bind(candidate.predicted_price)
    .bind(candidate.weather.avg_temp_c)
    .bind(candidate.weather.max_temp_c)
    .bind(candidate.weather.humidity_pct)
    .bind(candidate.weather.rainfall_mm)
    .bind(candidate.viable)
    .bind(candidate.adjusted_duration_days)
    .execute(&mut **tx)
    .await
    .context("insert recommendation_days failed")?;

    Ok(())
}

pub async fn list_recent(
    pool: &sqlx::PgPool,
    user_id: &str,
    limit: i64,
) -> anyhow::Result<Vec<RecommendationRecord>> {
    let rows: Vec<(Uuid, String, DateTime<Utc>, NaiveDate, NaiveDate, f64, bool)> =
        sqlx::query_as(
            "SELECT id, location, generated_at, start_date, end_date, predicted_price_at_end, degraded \
             FROM recommendations \
             WHERE user_id = $1 \
             ORDER BY generated_at DESC \
             LIMIT $2",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(pool)
        .await
        .context("list recommendations failed")?;

    let mut records = Vec::with_capacity(rows.len());
    for (id, location, generated_at, start_date, end_date, predicted_price_at_end, degraded) in rows
    {
        let location: Location = location
            .parse()
            .context("recommendation row has an unknown location")?;
        records.push(RecommendationRecord {
            id,
            location,
            generated_at,
            start_date,
            end_date,
            predicted_price_at_end,
            degraded,
        });
    }
    Ok(records)
}
