use crate::domain::context::{MarketContext, WeatherContext};
use crate::domain::location::Location;
use anyhow::Result;
use chrono::NaiveDate;

pub mod market;
pub mod open_meteo;

pub use market::MarketSignal;
pub use open_meteo::OpenMeteoClient;

// `Ok(None)` means the provider answered but has no data for that
// location/date; `Err` means the lookup itself failed. The engine treats
// both as a skipped day.
#[async_trait::async_trait]
pub trait ContextProvider: Send + Sync {
    fn provider_name(&self) -> &'static str;

    async fn weather(&self, location: Location, date: NaiveDate)
        -> Result<Option<WeatherContext>>;

    async fn market(&self, location: Location, date: NaiveDate)
        -> Result<Option<MarketContext>>;
}

// Production wiring: Open-Meteo for weather, the observation ledger in
// Postgres for the market signal.
pub struct LiveContextProvider {
    weather: OpenMeteoClient,
    market: MarketSignal,
}

impl LiveContextProvider {
    pub fn new(weather: OpenMeteoClient, market: MarketSignal) -> Self {
        Self { weather, market }
    }
}

#[async_trait::async_trait]
impl ContextProvider for LiveContextProvider {
    fn provider_name(&self) -> &'static str {
        "open_meteo+market_observations"
    }

    async fn weather(
        &self,
        location: Location,
        date: NaiveDate,
    ) -> Result<Option<WeatherContext>> {
        self.weather.daily(location, date).await
    }

    async fn market(
        &self,
        location: Location,
        date: NaiveDate,
    ) -> Result<Option<MarketContext>> {
        self.market.price_signal(location, date).await
    }
}
