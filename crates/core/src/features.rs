use crate::domain::context::{MarketContext, WeatherContext};
use crate::domain::location::{Location, Season, UnsupportedLocation};
use anyhow::{bail, ensure};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

// Ships inside the model artifact, as emitted by the training pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub feature_names: Vec<String>,
    pub city_labels: Vec<String>,
    pub season_labels: Vec<String>,
}

// Model input in schema order. Derived per candidate date, never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    pub values: Vec<f64>,
}

impl FeatureVector {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    City,
    Month,
    Season,
    AvgTemp,
    MaxTemp,
    AvgHumidity,
    Rainfall,
    PriceSignal,
}

impl Field {
    fn for_name(name: &str) -> Option<Field> {
        Some(match name {
            "city" => Field::City,
            "month" => Field::Month,
            "season" => Field::Season,
            "avg_temp" => Field::AvgTemp,
            "max_temp" => Field::MaxTemp,
            "avg_humidity" => Field::AvgHumidity,
            "rainfall" => Field::Rainfall,
            "price_signal" => Field::PriceSignal,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone)]
pub struct FeatureEncoder {
    schema: FeatureSchema,
    plan: Vec<Field>,
}

impl FeatureEncoder {
    pub fn new(schema: FeatureSchema) -> anyhow::Result<Self> {
        ensure!(
            !schema.feature_names.is_empty(),
            "feature schema names no features"
        );
        let mut plan = Vec::with_capacity(schema.feature_names.len());
        for name in &schema.feature_names {
            match Field::for_name(name) {
                Some(field) => plan.push(field),
                None => bail!("feature schema names unknown feature {name:?}"),
            }
        }
        // Both enums are closed, so a missing label is an artifact defect,
        // not a bad request.
        for location in Location::ALL {
            ensure!(
                schema.city_labels.iter().any(|l| l == location.name()),
                "model vocabulary is missing city {:?}",
                location.name()
            );
        }
        for season in Season::ALL {
            ensure!(
                schema.season_labels.iter().any(|l| l == season.label()),
                "model vocabulary is missing season {:?}",
                season.label()
            );
        }
        Ok(Self { schema, plan })
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn encode(
        &self,
        location: Location,
        date: NaiveDate,
        weather: &WeatherContext,
        market: &MarketContext,
        season: Season,
    ) -> anyhow::Result<FeatureVector> {
        let city_code = self.city_code(location)?;
        let season_code = self.season_code(season)?;

        let mut values = Vec::with_capacity(self.plan.len());
        for field in &self.plan {
            values.push(match field {
                Field::City => city_code,
                Field::Month => f64::from(date.month()),
                Field::Season => season_code,
                Field::AvgTemp => weather.avg_temp_c,
                Field::MaxTemp => weather.max_temp_c,
                Field::AvgHumidity => weather.humidity_pct,
                Field::Rainfall => weather.rainfall_mm,
                Field::PriceSignal => market.price_signal,
            });
        }
        Ok(FeatureVector { values })
    }

    // Label code = position in the artifact's vocabulary, exactly as the
    // training pipeline assigned it.
    fn city_code(&self, location: Location) -> anyhow::Result<f64> {
        match label_code(&self.schema.city_labels, location.name()) {
            Some(code) => Ok(code),
            None => Err(UnsupportedLocation {
                requested: location.name().to_string(),
            }
            .into()),
        }
    }

    fn season_code(&self, season: Season) -> anyhow::Result<f64> {
        match label_code(&self.schema.season_labels, season.label()) {
            Some(code) => Ok(code),
            None => bail!("season {:?} missing from model vocabulary", season.label()),
        }
    }
}

fn label_code(labels: &[String], wanted: &str) -> Option<f64> {
    labels
        .iter()
        .position(|label| label == wanted)
        .map(|idx| idx as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference_schema() -> FeatureSchema {
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

    fn snapshot(date: NaiveDate, location: Location) -> (WeatherContext, MarketContext) {
        (
            WeatherContext {
                date,
                avg_temp_c: 24.5,
                max_temp_c: 30.1,
                humidity_pct: 68.0,
                rainfall_mm: 1.4,
            },
            MarketContext {
                date,
                location,
                price_signal: 498.0,
            },
        )
    }

    #[test]
    fn encodes_in_schema_order() {
        let encoder = FeatureEncoder::new(reference_schema()).unwrap();
        let date = NaiveDate::from_ymd_opt(2025, 7, 14).unwrap();
        let (weather, market) = snapshot(date, Location::Ramanagar);

        let vector = encoder
            .encode(Location::Ramanagar, date, &weather, &market, Season::Monsoon)
            .unwrap();

        assert_eq!(
            vector.values,
            vec![1.0, 7.0, 0.0, 24.5, 30.1, 68.0, 1.4, 498.0]
        );
    }

    #[test]
    fn encoding_is_deterministic() {
        let encoder = FeatureEncoder::new(reference_schema()).unwrap();
        let date = NaiveDate::from_ymd_opt(2025, 12, 2).unwrap();
        let (weather, market) = snapshot(date, Location::Bengaluru);

        let first = encoder
            .encode(Location::Bengaluru, date, &weather, &market, Season::Winter)
            .unwrap();
        let second = encoder
            .encode(Location::Bengaluru, date, &weather, &market, Season::Winter)
            .unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn follows_schema_feature_order_not_a_fixed_one() {
        let mut schema = reference_schema();
        schema.feature_names = vec!["price_signal".into(), "city".into()];
        let encoder = FeatureEncoder::new(schema).unwrap();
        let date = NaiveDate::from_ymd_opt(2025, 4, 8).unwrap();
        let (weather, market) = snapshot(date, Location::Siddlaghatta);

        let vector = encoder
            .encode(Location::Siddlaghatta, date, &weather, &market, Season::Summer)
            .unwrap();
        assert_eq!(vector.values, vec![498.0, 2.0]);
    }

    #[test]
    fn rejects_unknown_feature_name_at_construction() {
        let mut schema = reference_schema();
        schema.feature_names.push("moon_phase".into());
        let err = FeatureEncoder::new(schema).unwrap_err();
        assert!(err.to_string().contains("moon_phase"));
    }

    #[test]
    fn incomplete_vocabulary_is_rejected_at_construction() {
        let mut schema = reference_schema();
        schema.city_labels = vec!["Bengaluru".into()];
        let err = FeatureEncoder::new(schema).unwrap_err();
        assert!(err.to_string().contains("Ramanagar"));

        let mut schema = reference_schema();
        schema.season_labels.retain(|label| label != "Winter");
        let err = FeatureEncoder::new(schema).unwrap_err();
        assert!(err.to_string().contains("Winter"));
    }

    #[test]
    fn city_missing_from_vocabulary_is_an_unsupported_location() {
        // Built by hand to reach the lookup branch `new` normally rules out.
        let mut schema = reference_schema();
        schema.city_labels = vec!["Bengaluru".into()];
        let encoder = FeatureEncoder {
            plan: vec![Field::City],
            schema,
        };
        let date = NaiveDate::from_ymd_opt(2025, 7, 14).unwrap();
        let (weather, market) = snapshot(date, Location::Ramanagar);

        let err = encoder
            .encode(Location::Ramanagar, date, &weather, &market, Season::Monsoon)
            .unwrap_err();
        assert!(err.downcast_ref::<UnsupportedLocation>().is_some());
    }
}
