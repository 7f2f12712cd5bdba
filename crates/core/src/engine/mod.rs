use crate::domain::location::Location;
use crate::domain::recommendation::{PredictionCandidate, Recommendation};
use crate::features::FeatureEncoder;
use crate::model::PricePredictor;
use crate::provider::ContextProvider;
use chrono::{NaiveDate, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub mod horizon;
pub mod rules;
pub mod selector;

pub use rules::{RuleConstraintSet, RuleVerdict, SeasonalAdjustment};
pub use selector::Selection;

const DEFAULT_HORIZON_DAYS: u32 = 10;
// Sized to cover the weather client's full retry ladder (3 attempts of 10 s
// plus backoff, behind a shared per-location fetch); a smaller budget cancels
// that ladder mid-retry.
const DEFAULT_LOOKUP_TIMEOUT_SECS: u64 = 45;

#[derive(Debug)]
pub enum EngineError {
    // Not a single horizon day could be resolved and scored.
    NoViableContext { location: Location },
    // A start day was chosen but the projected harvest date could not be
    // priced.
    EndDateContext {
        location: Location,
        end_date: NaiveDate,
    },
    Internal(anyhow::Error),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::NoViableContext { location } => {
                write!(f, "no usable context for {location} in the recommendation horizon")
            }
            EngineError::EndDateContext { location, end_date } => {
                write!(
                    f,
                    "context unavailable for projected harvest date {end_date} ({location})"
                )
            }
            EngineError::Internal(err) => write!(f, "recommendation engine failure: {err}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Internal(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        EngineError::Internal(err)
    }
}

// Pure over its inputs apart from `generated_at`; persistence belongs to
// the caller.
pub struct RecommendationEngine {
    provider: Arc<dyn ContextProvider>,
    predictor: Arc<dyn PricePredictor>,
    encoder: FeatureEncoder,
    constraints: RuleConstraintSet,
    horizon_days: u32,
    lookup_timeout: Duration,
}

impl RecommendationEngine {
    pub fn new(
        provider: Arc<dyn ContextProvider>,
        predictor: Arc<dyn PricePredictor>,
        constraints: RuleConstraintSet,
    ) -> anyhow::Result<Self> {
        let encoder = FeatureEncoder::new(predictor.schema().clone())?;

        let horizon_days = std::env::var("HORIZON_DAYS")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(DEFAULT_HORIZON_DAYS);

        let lookup_timeout_secs = std::env::var("CONTEXT_LOOKUP_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_LOOKUP_TIMEOUT_SECS);

        Ok(Self {
            provider,
            predictor,
            encoder,
            constraints,
            horizon_days,
            lookup_timeout: Duration::from_secs(lookup_timeout_secs),
        })
    }

    pub async fn recommend(
        &self,
        location: Location,
        as_of: NaiveDate,
    ) -> Result<Recommendation, EngineError> {
        let context = horizon::resolve(
            &self.provider,
            location,
            as_of,
            self.horizon_days,
            self.lookup_timeout,
        )
        .await;
        for skip in &context.skipped {
            tracing::warn!(%location, date = %skip.date, reason = %skip.reason, "horizon day skipped");
        }

        let mut candidates = Vec::with_capacity(context.days.len());
        for day in &context.days {
            let season = self.constraints.seasons.season_for(day.date);
            let features = self
                .encoder
                .encode(location, day.date, &day.weather, &day.market, season)
                .map_err(EngineError::Internal)?;
            let predicted_price = match self.predictor.predict(&features) {
                Ok(price) => price,
                Err(err) => {
                    // A day the model cannot score is treated exactly like a
                    // day without context.
                    tracing::warn!(%location, date = %day.date, error = %err, "predictor failed for horizon day; skipping");
                    continue;
                }
            };
            let verdict = rules::evaluate(day.date, &day.weather, &self.constraints);
            candidates.push(PredictionCandidate {
                date: day.date,
                location,
                predicted_price,
                weather: day.weather,
                viable: verdict.viable,
                adjusted_duration_days: verdict.adjusted_duration_days,
            });
        }

        let Some(selection) = selector::select(&candidates) else {
            return Err(EngineError::NoViableContext { location });
        };

        let best = &candidates[selection.best_index];
        let start_date = best.date;
        let end_date = start_date + chrono::Duration::days(i64::from(best.adjusted_duration_days));
        let predicted_price_at_end = self.price_at(location, end_date).await?;

        tracing::info!(
            %location,
            %start_date,
            %end_date,
            degraded = selection.degraded,
            candidates = candidates.len(),
            "recommendation selected"
        );

        Ok(Recommendation {
            location,
            generated_at: Utc::now(),
            start_date,
            end_date,
            predicted_price_at_end,
            horizon: candidates,
            best_index: selection.best_index,
            degraded: selection.degraded,
        })
    }

    // Same encode+predict path the horizon uses. The harvest date typically
    // sits beyond the forecast window and is answered from climatological
    // normals.
    async fn price_at(&self, location: Location, end_date: NaiveDate) -> Result<f64, EngineError> {
        let end_failure = || EngineError::EndDateContext { location, end_date };

        let weather = match self.provider.weather(location, end_date).await {
            Ok(Some(weather)) => weather,
            Ok(None) => {
                tracing::warn!(%location, %end_date, "no weather context for harvest date");
                return Err(end_failure());
            }
            Err(err) => {
                tracing::warn!(%location, %end_date, error = %err, "weather lookup failed for harvest date");
                return Err(end_failure());
            }
        };
        let market = match self.provider.market(location, end_date).await {
            Ok(Some(market)) => market,
            Ok(None) => {
                tracing::warn!(%location, %end_date, "no market signal for harvest date");
                return Err(end_failure());
            }
            Err(err) => {
                tracing::warn!(%location, %end_date, error = %err, "market lookup failed for harvest date");
                return Err(end_failure());
            }
        };

        let season = self.constraints.seasons.season_for(end_date);
        let features = self
            .encoder
            .encode(location, end_date, &weather, &market, season)
            .map_err(EngineError::Internal)?;
        match self.predictor.predict(&features) {
            Ok(price) => Ok(price),
            Err(err) => {
                tracing::warn!(%location, %end_date, error = %err, "predictor failed for harvest date");
                Err(end_failure())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::context::{MarketContext, WeatherContext};
    use crate::features::{FeatureSchema, FeatureVector};
    use anyhow::Result;
    use std::collections::{HashMap, HashSet};

    #[derive(Default)]
    struct FakeProvider {
        temps: HashMap<NaiveDate, f64>,
        signals: HashMap<NaiveDate, f64>,
        missing_weather: HashSet<NaiveDate>,
        failing_weather: HashSet<NaiveDate>,
        default_temp: f64,
        default_signal: f64,
    }

    impl FakeProvider {
        fn healthy() -> Self {
            Self {
                default_temp: 24.0,
                default_signal: 100.0,
                ..Default::default()
            }
        }
    }

    #[async_trait::async_trait]
    impl ContextProvider for FakeProvider {
        fn provider_name(&self) -> &'static str {
            "fake"
        }

        async fn weather(
            &self,
            _location: Location,
            date: NaiveDate,
        ) -> Result<Option<WeatherContext>> {
            if self.failing_weather.contains(&date) {
                anyhow::bail!("synthetic weather outage");
            }
            if self.missing_weather.contains(&date) {
                return Ok(None);
            }
            let avg_temp_c = self.temps.get(&date).copied().unwrap_or(self.default_temp);
            Ok(Some(WeatherContext {
                date,
                avg_temp_c,
                max_temp_c: avg_temp_c + 5.0,
                humidity_pct: 70.0,
                rainfall_mm: 0.0,
            }))
        }

        async fn market(
            &self,
            location: Location,
            date: NaiveDate,
        ) -> Result<Option<MarketContext>> {
            let price_signal = self
                .signals
                .get(&date)
                .copied()
                .unwrap_or(self.default_signal);
            Ok(Some(MarketContext {
                date,
                location,
                price_signal,
            }))
        }
    }

    // Scripts prices by the market signal the encoder feeds through, so the
    // real encoder and real feature order stay on the tested path.
    struct FakePredictor {
        schema: FeatureSchema,
        by_signal: HashMap<i64, f64>,
        default_price: f64,
        failing_signals: HashSet<i64>,
    }

    impl FakePredictor {
        fn new() -> Self {
            Self {
                schema: test_schema(),
                by_signal: HashMap::new(),
                default_price: 530.0,
                failing_signals: HashSet::new(),
            }
        }

        fn price_for(mut self, signal: i64, price: f64) -> Self {
            self.by_signal.insert(signal, price);
            self
        }
    }

    impl PricePredictor for FakePredictor {
        fn predict(&self, features: &FeatureVector) -> Result<f64> {
            let idx = self
                .schema
                .feature_names
                .iter()
                .position(|name| name == "price_signal")
                .unwrap();
            let signal = features.values[idx].round() as i64;
            if self.failing_signals.contains(&signal) {
                anyhow::bail!("synthetic predictor failure");
            }
            Ok(self
                .by_signal
                .get(&signal)
                .copied()
                .unwrap_or(self.default_price))
        }

        fn schema(&self) -> &FeatureSchema {
            &self.schema
        }

        fn model_name(&self) -> &str {
            "fake_gbt"
        }
    }

    fn test_schema() -> FeatureSchema {
        FeatureSchema {
            feature_names: [
                "city",
                "month",
                "season",
                "avg_temp",
                "max_temp",
                "avg_humidity",
                "rainfall",
                "price_signal",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            city_labels: ["Bengaluru", "Ramanagar", "Siddlaghatta"]
                .into_iter()
                .map(String::from)
                .collect(),
            season_labels: ["Monsoon", "PostMonsoon", "Summer", "Winter"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }

    fn engine(
        provider: FakeProvider,
        predictor: FakePredictor,
        horizon_days: u32,
    ) -> RecommendationEngine {
        let encoder = FeatureEncoder::new(predictor.schema().clone()).unwrap();
        RecommendationEngine {
            provider: Arc::new(provider),
            predictor: Arc::new(predictor),
            encoder,
            constraints: RuleConstraintSet::default(),
            horizon_days,
            lookup_timeout: Duration::from_secs(5),
        }
    }

    fn day(offset: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 7, 14).unwrap() + chrono::Duration::days(i64::from(offset))
    }

    fn three_day_fixture() -> (FakeProvider, FakePredictor) {
        let mut provider = FakeProvider::healthy();
        provider.signals.insert(day(0), 101.0);
        provider.signals.insert(day(1), 102.0);
        provider.signals.insert(day(2), 103.0);
        let predictor = FakePredictor::new()
            .price_for(101, 480.0)
            .price_for(102, 521.0)
            .price_for(103, 499.0);
        (provider, predictor)
    }

    #[tokio::test]
    async fn picks_the_best_viable_day_and_prices_the_harvest() {
        let (provider, predictor) = three_day_fixture();
        let engine = engine(provider, predictor, 3);

        let rec = engine.recommend(Location::Ramanagar, day(0)).await.unwrap();

        assert_eq!(rec.best_index, 1);
        assert!(!rec.degraded);
        assert_eq!(rec.start_date, day(1));
        assert_eq!(rec.best().predicted_price, 521.0);
        assert_eq!(rec.horizon.len(), 3);
        // July is monsoon: 28 - 1 = 27 day cycle.
        assert_eq!(rec.best().adjusted_duration_days, 27);
        assert_eq!(rec.end_date, day(1) + chrono::Duration::days(27));
        assert_eq!(rec.predicted_price_at_end, 530.0);
    }

    #[tokio::test]
    async fn no_viable_day_still_recommends_but_degraded() {
        let (mut provider, predictor) = three_day_fixture();
        provider.temps.insert(day(0), 30.0);
        provider.temps.insert(day(1), 31.0);
        provider.temps.insert(day(2), 29.0);
        let engine = engine(provider, predictor, 3);

        let rec = engine.recommend(Location::Ramanagar, day(0)).await.unwrap();

        assert_eq!(rec.best_index, 1);
        assert!(rec.degraded);
        assert_eq!(rec.start_date, day(1));
        assert!(rec.horizon.iter().all(|candidate| !candidate.viable));
    }

    #[tokio::test]
    async fn partial_context_shrinks_the_horizon() {
        let mut provider = FakeProvider::healthy();
        provider
            .missing_weather
            .extend([day(2), day(3), day(5), day(7)]);
        let engine = engine(provider, FakePredictor::new(), 10);

        let rec = engine.recommend(Location::Bengaluru, day(0)).await.unwrap();

        assert_eq!(rec.horizon.len(), 6);
        let dates: Vec<NaiveDate> = rec.horizon.iter().map(|c| c.date).collect();
        assert_eq!(
            dates,
            vec![day(0), day(1), day(4), day(6), day(8), day(9)]
        );
    }

    #[tokio::test]
    async fn nothing_resolvable_is_no_viable_context() {
        let mut provider = FakeProvider::healthy();
        provider.missing_weather.extend((0..3).map(day));
        let engine = engine(provider, FakePredictor::new(), 3);

        let err = engine
            .recommend(Location::Siddlaghatta, day(0))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NoViableContext { .. }));
    }

    #[tokio::test]
    async fn unpriceable_harvest_date_fails_the_request() {
        let (mut provider, predictor) = three_day_fixture();
        // Best candidate is day(1) with a 27-day cycle.
        let harvest = day(1) + chrono::Duration::days(27);
        provider.failing_weather.insert(harvest);
        let engine = engine(provider, predictor, 3);

        let err = engine
            .recommend(Location::Ramanagar, day(0))
            .await
            .unwrap_err();
        match err {
            EngineError::EndDateContext { end_date, .. } => assert_eq!(end_date, harvest),
            other => panic!("expected EndDateContext, got {other}"),
        }
    }

    #[tokio::test]
    async fn predictor_failure_drops_only_that_day() {
        let (provider, predictor) = three_day_fixture();
        let mut predictor = predictor;
        predictor.failing_signals.insert(102);
        let engine = engine(provider, predictor, 3);

        let rec = engine.recommend(Location::Ramanagar, day(0)).await.unwrap();

        assert_eq!(rec.horizon.len(), 2);
        // With 521 unscoreable, 499 on day(2) wins.
        assert_eq!(rec.start_date, day(2));
        assert_eq!(rec.best().predicted_price, 499.0);
    }

    #[tokio::test]
    async fn identical_inputs_give_identical_recommendations() {
        let (provider, predictor) = three_day_fixture();
        let engine = engine(provider, predictor, 3);

        let first = engine.recommend(Location::Ramanagar, day(0)).await.unwrap();
        let second = engine.recommend(Location::Ramanagar, day(0)).await.unwrap();

        assert_eq!(first.start_date, second.start_date);
        assert_eq!(first.end_date, second.end_date);
        assert_eq!(first.best_index, second.best_index);
        assert_eq!(first.degraded, second.degraded);
        assert_eq!(first.predicted_price_at_end, second.predicted_price_at_end);
        assert_eq!(first.horizon, second.horizon);
    }

    #[tokio::test]
    async fn start_and_end_invariants_hold() {
        let (provider, predictor) = three_day_fixture();
        let engine = engine(provider, predictor, 3);

        let rec = engine.recommend(Location::Ramanagar, day(0)).await.unwrap();

        assert_eq!(rec.start_date, rec.horizon[rec.best_index].date);
        assert_eq!(
            rec.end_date,
            rec.start_date
                + chrono::Duration::days(i64::from(rec.best().adjusted_duration_days))
        );
    }
}
