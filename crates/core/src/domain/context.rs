use crate::domain::location::Location;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// Daily weather summary. Snapshots are taken once per engine run and never
// refreshed mid-request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeatherContext {
    pub date: NaiveDate,
    pub avg_temp_c: f64,
    pub max_temp_c: f64,
    pub humidity_pct: f64,
    pub rainfall_mm: f64,
}

// Most recent price signal known for a location on or before the date.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarketContext {
    pub date: NaiveDate,
    pub location: Location,
    pub price_signal: f64,
}
