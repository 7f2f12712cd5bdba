use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cocoon_core::config::Settings;
use cocoon_core::domain::location::Location;
use cocoon_core::engine::{RecommendationEngine, RuleConstraintSet};
use cocoon_core::model::GbtPricePredictor;
use cocoon_core::provider::{LiveContextProvider, MarketSignal, OpenMeteoClient};

mod ingest;

#[derive(Debug, Parser)]
#[command(name = "cocoon_worker")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Compute and persist a recommendation for each requested location.
    Run {
        /// As-of date (YYYY-MM-DD). Defaults to today's IST date.
        #[arg(long)]
        as_of_date: Option<String>,

        /// Restrict the run to one location. Defaults to every supported one.
        #[arg(long)]
        location: Option<String>,

        /// Run the pipeline and log the outcome without writing.
        #[arg(long)]
        dry_run: bool,
    },
    /// Load a JSON array of market observations into the ledger.
    IngestMarket {
        /// Path to the observations file.
        #[arg(long)]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();

    match args.command {
        Command::Run {
            as_of_date,
            location,
            dry_run,
        } => {
            run(
                &settings,
                as_of_date.as_deref(),
                location.as_deref(),
                dry_run,
            )
            .await
        }
        Command::IngestMarket { file } => ingest::ingest_market_file(&settings, &file).await,
    }
}

async fn run(
    settings: &Settings,
    as_of_date_arg: Option<&str>,
    location_arg: Option<&str>,
    dry_run: bool,
) -> anyhow::Result<()> {
    let as_of_date = cocoon_core::time::ist::resolve_as_of_date(as_of_date_arg, chrono::Utc::now())?;
    let locations: Vec<Location> = match location_arg {
        Some(name) => vec![name.parse()?],
        None => Location::ALL.to_vec(),
    };

    let db_url = settings.require_database_url()?;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await
        .context("connect DATABASE_URL failed")?;

    cocoon_core::storage::migrate(&pool).await?;

    let predictor = Arc::new(GbtPricePredictor::load(settings.model_path())?);
    let constraints = RuleConstraintSet::from_env()?;
    let weather = OpenMeteoClient::from_settings(settings)?;
    let market = MarketSignal::new(pool.clone(), constraints.seasons.clone());
    let provider = LiveContextProvider::new(weather, market);
    let engine = RecommendationEngine::new(Arc::new(provider), predictor, constraints)?;

    let mut failures = 0usize;
    for location in locations {
        // A dry run writes nothing, so it does not contend for the lock.
        if !dry_run {
            let acquired =
                cocoon_core::storage::lock::try_acquire_run_lock(&pool, location, as_of_date)
                    .await?;
            if !acquired {
                tracing::warn!(%location, %as_of_date, "run lock not acquired; another run in progress");
                continue;
            }
        }

        if !run_one(&engine, &pool, location, as_of_date, dry_run).await {
            failures += 1;
        }

        if !dry_run {
            let _ =
                cocoon_core::storage::lock::release_run_lock(&pool, location, as_of_date).await;
        }
    }

    anyhow::ensure!(failures == 0, "{failures} location run(s) failed");
    Ok(())
}

async fn run_one(
    engine: &RecommendationEngine,
    pool: &sqlx::PgPool,
    location: Location,
    as_of_date: NaiveDate,
    dry_run: bool,
) -> bool {
    let recommendation = match engine.recommend(location, as_of_date).await {
        Ok(recommendation) => recommendation,
        Err(err) => {
            let err = anyhow::Error::new(err);
            sentry_anyhow::capture_anyhow(&err);
            tracing::error!(%location, %as_of_date, error = %err, "recommendation run failed");
            return false;
        }
    };

    if dry_run {
        tracing::info!(
            %location,
            %as_of_date,
            start_date = %recommendation.start_date,
            end_date = %recommendation.end_date,
            predicted_price_at_end = recommendation.predicted_price_at_end,
            degraded = recommendation.degraded,
            dry_run = true,
            "recommendation computed (not persisted)"
        );
        return true;
    }

    match cocoon_core::storage::recommendations::save(pool, None, &recommendation).await {
        Ok(recommendation_id) => {
            tracing::info!(
                %location,
                %as_of_date,
                %recommendation_id,
                start_date = %recommendation.start_date,
                degraded = recommendation.degraded,
                "persisted recommendation"
            );
            true
        }
        Err(err) => {
            sentry_anyhow::capture_anyhow(&err);
            tracing::error!(%location, %as_of_date, error = %err, "failed to persist recommendation");
            false
        }
    }
}

fn init_sentry(settings: &Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
