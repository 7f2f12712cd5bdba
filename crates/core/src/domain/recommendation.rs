use crate::domain::context::WeatherContext;
use crate::domain::location::Location;
use anyhow::ensure;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// Built once per request and read-only afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionCandidate {
    pub date: NaiveDate,
    pub location: Location,
    pub predicted_price: f64,
    pub weather: WeatherContext,
    pub viable: bool,
    pub adjusted_duration_days: i32,
}

// `start_date` always equals `horizon[best_index].date`; `end_date` is the
// start date plus that candidate's adjusted duration; `degraded` marks a
// selection made with no rule-viable candidate available.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub location: Location,
    pub generated_at: DateTime<Utc>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub predicted_price_at_end: f64,
    pub horizon: Vec<PredictionCandidate>,
    pub best_index: usize,
    pub degraded: bool,
}

impl Recommendation {
    pub fn best(&self) -> &PredictionCandidate {
        &self.horizon[self.best_index]
    }
}

// History listing row. The per-day horizon rows live in their own table and
// are not loaded for list views.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationRecord {
    pub id: Uuid,
    pub location: Location,
    pub generated_at: DateTime<Utc>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub predicted_price_at_end: f64,
    pub degraded: bool,
}

// Operator-supplied ground truth. Weather fields are optional; older ledgers
// only recorded the price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketObservation {
    pub location: Location,
    pub observed_on: NaiveDate,
    pub market_price: f64,
    pub avg_temp_c: Option<f64>,
    pub max_temp_c: Option<f64>,
    pub humidity_pct: Option<f64>,
    pub rainfall_mm: Option<f64>,
}

impl MarketObservation {
    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(
            self.market_price.is_finite() && self.market_price > 0.0,
            "market_price must be a positive number (got {} for {} on {})",
            self.market_price,
            self.location,
            self.observed_on
        );
        if let Some(humidity) = self.humidity_pct {
            ensure!(
                (0.0..=100.0).contains(&humidity),
                "humidity_pct must be within 0..=100 (got {humidity})"
            );
        }
        if let Some(rainfall) = self.rainfall_mm {
            ensure!(
                rainfall >= 0.0,
                "rainfall_mm must be non-negative (got {rainfall})"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observation() -> MarketObservation {
        MarketObservation {
            location: Location::Ramanagar,
            observed_on: NaiveDate::from_ymd_opt(2025, 7, 14).unwrap(),
            market_price: 512.0,
            avg_temp_c: Some(24.1),
            max_temp_c: Some(29.0),
            humidity_pct: Some(71.0),
            rainfall_mm: Some(3.2),
        }
    }

    #[test]
    fn accepts_valid_observation() {
        observation().validate().unwrap();
    }

    #[test]
    fn rejects_non_positive_price() {
        let mut obs = observation();
        obs.market_price = 0.0;
        assert!(obs.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_humidity() {
        let mut obs = observation();
        obs.humidity_pct = Some(140.0);
        assert!(obs.validate().is_err());
    }

    #[test]
    fn best_points_at_selected_candidate() {
        let weather = WeatherContext {
            date: NaiveDate::from_ymd_opt(2025, 7, 14).unwrap(),
            avg_temp_c: 24.0,
            max_temp_c: 29.0,
            humidity_pct: 70.0,
            rainfall_mm: 0.0,
        };
        let candidate = |day: u32, price: f64| PredictionCandidate {
            date: NaiveDate::from_ymd_opt(2025, 7, day).unwrap(),
            location: Location::Bengaluru,
            predicted_price: price,
            weather,
            viable: true,
            adjusted_duration_days: 27,
        };
        let rec = Recommendation {
            location: Location::Bengaluru,
            generated_at: Utc::now(),
            start_date: NaiveDate::from_ymd_opt(2025, 7, 15).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2025, 8, 11).unwrap(),
            predicted_price_at_end: 530.0,
            horizon: vec![candidate(14, 480.0), candidate(15, 521.0)],
            best_index: 1,
            degraded: false,
        };
        assert_eq!(rec.best().predicted_price, 521.0);
        assert_eq!(rec.best().date, rec.start_date);
    }
}
