use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// Market towns the deployment supports. The price model is trained per
// city, so the set is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Location {
    Bengaluru,
    Ramanagar,
    Siddlaghatta,
}

impl Location {
    pub const ALL: [Location; 3] = [
        Location::Bengaluru,
        Location::Ramanagar,
        Location::Siddlaghatta,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Location::Bengaluru => "Bengaluru",
            Location::Ramanagar => "Ramanagar",
            Location::Siddlaghatta => "Siddlaghatta",
        }
    }

    // (latitude, longitude) in degrees.
    pub fn coordinates(&self) -> (f64, f64) {
        match self {
            Location::Bengaluru => (12.9716, 77.5946),
            Location::Ramanagar => (12.7209, 77.2799),
            Location::Siddlaghatta => (13.3867, 77.8631),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// The single entry point for untrusted location input; anything outside the
// supported set fails here, before any external call is made.
impl FromStr for Location {
    type Err = UnsupportedLocation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim();
        for location in Location::ALL {
            if location.name().eq_ignore_ascii_case(normalized) {
                return Ok(location);
            }
        }
        Err(UnsupportedLocation {
            requested: normalized.to_string(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct UnsupportedLocation {
    pub requested: String,
}

impl fmt::Display for UnsupportedLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unsupported location {:?} (supported: Bengaluru, Ramanagar, Siddlaghatta)",
            self.requested
        )
    }
}

impl std::error::Error for UnsupportedLocation {}

// Labels match the training vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Season {
    Winter,
    Summer,
    Monsoon,
    PostMonsoon,
}

impl Season {
    pub const ALL: [Season; 4] = [
        Season::Winter,
        Season::Summer,
        Season::Monsoon,
        Season::PostMonsoon,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Season::Winter => "Winter",
            Season::Summer => "Summer",
            Season::Monsoon => "Monsoon",
            Season::PostMonsoon => "PostMonsoon",
        }
    }
}

impl fmt::Display for Season {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// One entry per calendar month. A single instance, owned by the rule
// constraints, is shared by everything that buckets dates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeasonTable {
    by_month: [Season; 12],
}

impl SeasonTable {
    pub fn new(by_month: [Season; 12]) -> Self {
        Self { by_month }
    }

    pub fn season_for_month(&self, month: u32) -> Season {
        debug_assert!((1..=12).contains(&month));
        self.by_month[(month as usize - 1) % 12]
    }

    pub fn season_for(&self, date: NaiveDate) -> Season {
        self.season_for_month(date.month())
    }

    pub fn months_in(&self, season: Season) -> Vec<u32> {
        (1..=12u32)
            .filter(|m| self.by_month[*m as usize - 1] == season)
            .collect()
    }
}

impl Default for SeasonTable {
    // Southern-Karnataka boundaries used by the training data: Dec-Feb
    // Winter, Mar-May Summer, Jun-Sep Monsoon, Oct-Nov PostMonsoon.
    fn default() -> Self {
        use Season::*;
        Self::new([
            Winter,      // Jan
            Winter,      // Feb
            Summer,      // Mar
            Summer,      // Apr
            Summer,      // May
            Monsoon,     // Jun
            Monsoon,     // Jul
            Monsoon,     // Aug
            Monsoon,     // Sep
            PostMonsoon, // Oct
            PostMonsoon, // Nov
            Winter,      // Dec
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_supported_locations_case_insensitively() {
        assert_eq!("Bengaluru".parse::<Location>().unwrap(), Location::Bengaluru);
        assert_eq!("ramanagar".parse::<Location>().unwrap(), Location::Ramanagar);
        assert_eq!(
            "  SIDDLAGHATTA ".parse::<Location>().unwrap(),
            Location::Siddlaghatta
        );
    }

    #[test]
    fn rejects_unknown_location() {
        let err = "Mysuru".parse::<Location>().unwrap_err();
        assert_eq!(err.requested, "Mysuru");
        assert!(err.to_string().contains("unsupported location"));
    }

    #[test]
    fn default_season_boundaries() {
        let table = SeasonTable::default();
        let season_of = |y: i32, m: u32, d: u32| {
            table.season_for(NaiveDate::from_ymd_opt(y, m, d).unwrap())
        };
        assert_eq!(season_of(2025, 1, 15), Season::Winter);
        assert_eq!(season_of(2025, 2, 28), Season::Winter);
        assert_eq!(season_of(2025, 3, 1), Season::Summer);
        assert_eq!(season_of(2025, 5, 31), Season::Summer);
        assert_eq!(season_of(2025, 6, 1), Season::Monsoon);
        assert_eq!(season_of(2025, 9, 30), Season::Monsoon);
        assert_eq!(season_of(2025, 10, 1), Season::PostMonsoon);
        assert_eq!(season_of(2025, 11, 30), Season::PostMonsoon);
        assert_eq!(season_of(2025, 12, 1), Season::Winter);
    }

    #[test]
    fn months_in_covers_every_month_once() {
        let table = SeasonTable::default();
        let mut all: Vec<u32> = Season::ALL
            .into_iter()
            .flat_map(|s| table.months_in(s))
            .collect();
        all.sort_unstable();
        assert_eq!(all, (1..=12).collect::<Vec<_>>());
    }
}
