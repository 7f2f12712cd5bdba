use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use cocoon_core::domain::location::Location;
use cocoon_core::domain::recommendation::{Recommendation, RecommendationRecord};
use cocoon_core::engine::{EngineError, RecommendationEngine, RuleConstraintSet};
use cocoon_core::model::{GbtPricePredictor, PricePredictor};
use cocoon_core::provider::{LiveContextProvider, MarketSignal, OpenMeteoClient};

const DEFAULT_HISTORY_LIMIT: i64 = 10;
const MAX_HISTORY_LIMIT: i64 = 100;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = cocoon_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    // A process that cannot score prices has nothing to serve.
    let predictor = Arc::new(GbtPricePredictor::load(settings.model_path())?);
    let constraints = RuleConstraintSet::from_env()?;

    let pool: Option<PgPool> = match settings.require_database_url() {
        Ok(db_url) => match sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await
        {
            Ok(pool) => match cocoon_core::storage::migrate(&pool).await {
                Ok(()) => Some(pool),
                Err(e) => {
                    sentry_anyhow::capture_anyhow(&e);
                    tracing::error!(error = %e, "db migrations failed; starting API in degraded mode");
                    None
                }
            },
            Err(e) => {
                let err = anyhow::Error::new(e);
                sentry_anyhow::capture_anyhow(&err);
                tracing::error!(error = %err, "db connect failed; starting API in degraded mode");
                None
            }
        },
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            tracing::error!(error = %e, "DATABASE_URL missing; starting API in degraded mode");
            None
        }
    };

    // The market signal lives in Postgres, so without a pool there is no
    // engine and recommendation routes answer 503.
    let engine = match &pool {
        Some(pool) => {
            let weather = OpenMeteoClient::from_settings(&settings)?;
            let market = MarketSignal::new(pool.clone(), constraints.seasons.clone());
            let provider = LiveContextProvider::new(weather, market);
            Some(Arc::new(RecommendationEngine::new(
                Arc::new(provider),
                predictor.clone(),
                constraints,
            )?))
        }
        None => None,
    };

    let state = AppState {
        pool,
        engine,
        model_name: predictor.model_name().to_string(),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/api/recommendations", post(create_recommendation))
        .route("/api/recommendations/forecast/:location", get(get_forecast))
        .route("/api/recommendations/history", get(get_history))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn healthz(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "model": state.model_name,
        "database": state.pool.is_some(),
        "engine": state.engine.is_some(),
    }))
}

#[derive(Clone)]
struct AppState {
    pool: Option<PgPool>,
    engine: Option<Arc<RecommendationEngine>>,
    model_name: String,
}

#[derive(Debug, Deserialize)]
struct RecommendRequest {
    location: String,
    #[serde(default)]
    durable: bool,
}

#[derive(Debug, Serialize)]
struct ApiRecommendation {
    // `None` when the recommendation was computed but could not be persisted
    // and the request did not ask for durability.
    recommendation_id: Option<Uuid>,
    recommendation: Recommendation,
}

#[derive(Debug, Deserialize)]
struct HistoryParams {
    limit: Option<i64>,
}

async fn create_recommendation(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<RecommendRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ApiRecommendation>), StatusCode> {
    let user_id = require_user_id(&headers)?;
    let Ok(Json(req)) = body else {
        return Err(StatusCode::BAD_REQUEST);
    };
    let location: Location = req.location.parse().map_err(|e| {
        tracing::warn!(error = %e, "rejected recommendation request");
        StatusCode::BAD_REQUEST
    })?;

    let (Some(pool), Some(engine)) = (&state.pool, &state.engine) else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };

    let as_of = today_ist()?;
    let recommendation = engine
        .recommend(location, as_of)
        .await
        .map_err(engine_error_status)?;

    let recommendation_id =
        match cocoon_core::storage::recommendations::save(pool, Some(&user_id), &recommendation)
            .await
        {
            Ok(id) => Some(id),
            Err(e) => {
                sentry_anyhow::capture_anyhow(&e);
                if req.durable {
                    tracing::error!(error = %e, "failed to persist durable recommendation");
                    return Err(StatusCode::INTERNAL_SERVER_ERROR);
                }
                tracing::warn!(error = %e, "failed to persist recommendation; returning it anyway");
                None
            }
        };

    Ok((
        StatusCode::CREATED,
        Json(ApiRecommendation {
            recommendation_id,
            recommendation,
        }),
    ))
}

async fn get_forecast(
    State(state): State<AppState>,
    Path(location): Path<String>,
) -> Result<Json<Recommendation>, StatusCode> {
    let location: Location = location.parse().map_err(|e| {
        tracing::warn!(error = %e, "rejected forecast request");
        StatusCode::BAD_REQUEST
    })?;
    let Some(engine) = &state.engine else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };

    let as_of = today_ist()?;
    let recommendation = engine
        .recommend(location, as_of)
        .await
        .map_err(engine_error_status)?;

    Ok(Json(recommendation))
}

async fn get_history(
    State(state): State<AppState>,
    headers: HeaderMap,
    params: Result<Query<HistoryParams>, QueryRejection>,
) -> Result<Json<Vec<RecommendationRecord>>, StatusCode> {
    let user_id = require_user_id(&headers)?;
    let Ok(Query(params)) = params else {
        return Err(StatusCode::BAD_REQUEST);
    };
    let Some(pool) = &state.pool else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };

    let limit = params
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);

    let records = cocoon_core::storage::recommendations::list_recent(pool, &user_id, limit)
        .await
        .map_err(|e| {
            sentry_anyhow::capture_anyhow(&e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok(Json(records))
}

fn require_user_id(headers: &HeaderMap) -> Result<String, StatusCode> {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .ok_or(StatusCode::UNAUTHORIZED)
}

fn today_ist() -> Result<chrono::NaiveDate, StatusCode> {
    cocoon_core::time::ist::resolve_as_of_date(None, Utc::now()).map_err(|e| {
        sentry_anyhow::capture_anyhow(&e);
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

fn engine_error_status(err: EngineError) -> StatusCode {
    match err {
        EngineError::NoViableContext { .. } | EngineError::EndDateContext { .. } => {
            tracing::warn!(error = %err, "recommendation unavailable");
            StatusCode::BAD_GATEWAY
        }
        EngineError::Internal(inner) => {
            sentry_anyhow::capture_anyhow(&inner);
            tracing::error!(error = %inner, "recommendation engine failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn init_sentry(settings: &cocoon_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
