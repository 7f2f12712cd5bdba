use crate::domain::context::WeatherContext;
use crate::domain::location::{Season, SeasonTable};
use chrono::NaiveDate;

const DEFAULT_MIN_TEMP_C: f64 = 20.0;
const DEFAULT_MAX_TEMP_C: f64 = 28.0;
const DEFAULT_MIN_DURATION_DAYS: i32 = 25;
const DEFAULT_MAX_DURATION_DAYS: i32 = 30;
const DEFAULT_BASE_DURATION_DAYS: i32 = 28;

// Loaded once at startup; immutable for the process lifetime.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleConstraintSet {
    pub min_temp_c: f64,
    pub max_temp_c: f64,
    pub min_duration_days: i32,
    pub max_duration_days: i32,
    pub base_duration_days: i32,
    pub seasonal_adjustment: SeasonalAdjustment,
    pub seasons: SeasonTable,
}

// Day offsets relative to the base cycle length. Cool months slow larval
// growth; heat and monsoon humidity speed spinning up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeasonalAdjustment {
    pub winter: i32,
    pub summer: i32,
    pub monsoon: i32,
    pub post_monsoon: i32,
}

impl SeasonalAdjustment {
    pub fn days_for(&self, season: Season) -> i32 {
        match season {
            Season::Winter => self.winter,
            Season::Summer => self.summer,
            Season::Monsoon => self.monsoon,
            Season::PostMonsoon => self.post_monsoon,
        }
    }
}

impl Default for SeasonalAdjustment {
    fn default() -> Self {
        Self {
            winter: 2,
            summer: -3,
            monsoon: -1,
            post_monsoon: 0,
        }
    }
}

impl Default for RuleConstraintSet {
    fn default() -> Self {
        Self {
            min_temp_c: DEFAULT_MIN_TEMP_C,
            max_temp_c: DEFAULT_MAX_TEMP_C,
            min_duration_days: DEFAULT_MIN_DURATION_DAYS,
            max_duration_days: DEFAULT_MAX_DURATION_DAYS,
            base_duration_days: DEFAULT_BASE_DURATION_DAYS,
            seasonal_adjustment: SeasonalAdjustment::default(),
            seasons: SeasonTable::default(),
        }
    }
}

impl RuleConstraintSet {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();
        let constraints = Self {
            min_temp_c: env_f64("RULES_MIN_TEMP_C", defaults.min_temp_c),
            max_temp_c: env_f64("RULES_MAX_TEMP_C", defaults.max_temp_c),
            min_duration_days: env_i32("RULES_MIN_DURATION_DAYS", defaults.min_duration_days),
            max_duration_days: env_i32("RULES_MAX_DURATION_DAYS", defaults.max_duration_days),
            base_duration_days: env_i32("RULES_BASE_DURATION_DAYS", defaults.base_duration_days),
            seasonal_adjustment: SeasonalAdjustment {
                winter: env_i32(
                    "RULES_ADJUST_WINTER_DAYS",
                    defaults.seasonal_adjustment.winter,
                ),
                summer: env_i32(
                    "RULES_ADJUST_SUMMER_DAYS",
                    defaults.seasonal_adjustment.summer,
                ),
                monsoon: env_i32(
                    "RULES_ADJUST_MONSOON_DAYS",
                    defaults.seasonal_adjustment.monsoon,
                ),
                post_monsoon: env_i32(
                    "RULES_ADJUST_POST_MONSOON_DAYS",
                    defaults.seasonal_adjustment.post_monsoon,
                ),
            },
            seasons: defaults.seasons,
        };
        constraints.validate()?;
        Ok(constraints)
    }

    // Misordered duration bounds panic inside `clamp` at evaluation time.
    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.min_temp_c <= self.max_temp_c,
            "RULES_MIN_TEMP_C ({}) must not exceed RULES_MAX_TEMP_C ({})",
            self.min_temp_c,
            self.max_temp_c
        );
        anyhow::ensure!(
            self.min_duration_days >= 1,
            "RULES_MIN_DURATION_DAYS must be >= 1, got {}",
            self.min_duration_days
        );
        anyhow::ensure!(
            self.min_duration_days <= self.max_duration_days,
            "RULES_MIN_DURATION_DAYS ({}) must not exceed RULES_MAX_DURATION_DAYS ({})",
            self.min_duration_days,
            self.max_duration_days
        );
        Ok(())
    }
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(default)
}

fn env_i32(key: &str, default: i32) -> i32 {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse::<i32>().ok())
        .unwrap_or(default)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleVerdict {
    pub viable: bool,
    pub adjusted_duration_days: i32,
}

// Viability is the average-temperature band, inclusive at both edges.
// Price never enters here.
pub fn evaluate(
    date: NaiveDate,
    weather: &WeatherContext,
    constraints: &RuleConstraintSet,
) -> RuleVerdict {
    let viable = weather.avg_temp_c >= constraints.min_temp_c
        && weather.avg_temp_c <= constraints.max_temp_c;

    let season = constraints.seasons.season_for(date);
    let adjusted_duration_days = (constraints.base_duration_days
        + constraints.seasonal_adjustment.days_for(season))
    .clamp(
        constraints.min_duration_days,
        constraints.max_duration_days,
    );

    RuleVerdict {
        viable,
        adjusted_duration_days,
    }
}
