use crate::domain::context::MarketContext;
use crate::domain::location::{Location, SeasonTable};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use sqlx::PgPool;

// Price signal backed by the `market_observations` ledger. The season table
// is injected so the fallback window agrees with the rule engine's
// boundaries.
pub struct MarketSignal {
    pool: PgPool,
    seasons: SeasonTable,
}

impl MarketSignal {
    pub fn new(pool: PgPool, seasons: SeasonTable) -> Self {
        Self { pool, seasons }
    }

    // Latest observed price on or before the date, else the seasonal mean
    // over the location's ledger, else no signal.
    pub async fn price_signal(
        &self,
        location: Location,
        date: NaiveDate,
    ) -> Result<Option<MarketContext>> {
        if let Some(price_signal) = self.latest_on_or_before(location, date).await? {
            return Ok(Some(MarketContext {
                date,
                location,
                price_signal,
            }));
        }
        Ok(self
            .seasonal_mean(location, date)
            .await?
            .map(|price_signal| MarketContext {
                date,
                location,
                price_signal,
            }))
    }

    async fn latest_on_or_before(
        &self,
        location: Location,
        date: NaiveDate,
    ) -> Result<Option<f64>> {
        let row: Option<(f64,)> = sqlx::query_as(
            r#"
            SELECT market_price
            FROM market_observations
            WHERE location = $1 AND observed_on <= $2
            ORDER BY observed_on DESC
            LIMIT 1
            "#,
        )
        .bind(location.name())
        .bind(date)
        .fetch_optional(&self.pool)
        .await
        .context("querying latest market observation")?;
        Ok(row.map(|(price,)| price))
    }

    async fn seasonal_mean(&self, location: Location, date: NaiveDate) -> Result<Option<f64>> {
        let months: Vec<i32> = self
            .seasons
            .months_in(self.seasons.season_for(date))
            .into_iter()
            .map(|month| month as i32)
            .collect();
        let row: (Option<f64>,) = sqlx::query_as(
            r#"
            SELECT AVG(market_price)
            FROM market_observations
            WHERE location = $1 AND EXTRACT(MONTH FROM observed_on)::int = ANY($2)
            "#,
        )
        .bind(location.name())
        .bind(months)
        .fetch_one(&self.pool)
        .await
        .context("querying seasonal mean market price")?;
        Ok(row.0)
    }
}
