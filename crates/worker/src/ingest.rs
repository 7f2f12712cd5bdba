use anyhow::Context;
use cocoon_core::config::Settings;
use cocoon_core::domain::recommendation::MarketObservation;
use std::path::Path;

// The whole payload is validated before anything touches the database; a
// partially valid file is rejected as a unit.
pub async fn ingest_market_file(settings: &Settings, file: &Path) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("reading observations file {}", file.display()))?;
    let observations = parse_observations(&raw)
        .with_context(|| format!("invalid observations file {}", file.display()))?;

    let db_url = settings.require_database_url()?;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await
        .context("connect DATABASE_URL failed")?;

    cocoon_core::storage::migrate(&pool).await?;

    let source = file
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("unnamed");

    match cocoon_core::storage::market::upsert_observations(&pool, &observations).await {
        Ok(rows) => {
            cocoon_core::storage::market::record_ingest_run(
                &pool,
                source,
                "success",
                Some(rows as i64),
                None,
            )
            .await?;
            tracing::info!(rows, source, "market observations ingested");
            Ok(())
        }
        Err(err) => {
            sentry_anyhow::capture_anyhow(&err);
            let _ = cocoon_core::storage::market::record_ingest_run(
                &pool,
                source,
                "error",
                None,
                Some(&format!("{err:#}")),
            )
            .await;
            Err(err)
        }
    }
}

fn parse_observations(raw: &str) -> anyhow::Result<Vec<MarketObservation>> {
    let observations: Vec<MarketObservation> =
        serde_json::from_str(raw).context("payload is not a JSON array of market observations")?;
    anyhow::ensure!(!observations.is_empty(), "payload contains no observations");
    for (idx, obs) in observations.iter().enumerate() {
        obs.validate()
            .with_context(|| format!("observation {idx} is invalid"))?;
    }
    Ok(observations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use cocoon_core::domain::location::Location;

    #[test]
    fn parses_a_valid_payload() {
        let raw = r#"[
            {"location": "Ramanagar", "observed_on": "2025-07-14", "market_price": 512.0,
             "avg_temp_c": 24.1, "max_temp_c": 29.0, "humidity_pct": 71.0, "rainfall_mm": 3.2},
            {"location": "Bengaluru", "observed_on": "2025-07-14", "market_price": 498.5}
        ]"#;

        let observations = parse_observations(raw).unwrap();

        assert_eq!(observations.len(), 2);
        assert_eq!(observations[0].location, Location::Ramanagar);
        assert_eq!(
            observations[0].observed_on,
            NaiveDate::from_ymd_opt(2025, 7, 14).unwrap()
        );
        // Ledgers without weather columns leave the optional fields out.
        assert_eq!(observations[1].avg_temp_c, None);
        assert_eq!(observations[1].rainfall_mm, None);
    }

    #[test]
    fn rejects_an_invalid_row_by_index() {
        let raw = r#"[
            {"location": "Ramanagar", "observed_on": "2025-07-14", "market_price": 512.0},
            {"location": "Ramanagar", "observed_on": "2025-07-15", "market_price": -3.0}
        ]"#;

        let err = parse_observations(raw).unwrap_err();
        assert!(format!("{err:#}").contains("observation 1"));
    }

    #[test]
    fn rejects_non_array_payloads() {
        assert!(parse_observations(r#"{"location": "Ramanagar"}"#).is_err());
    }

    #[test]
    fn rejects_empty_payloads() {
        assert!(parse_observations("[]").is_err());
    }
}
