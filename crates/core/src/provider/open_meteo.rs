use crate::config::Settings;
use crate::domain::context::WeatherContext;
use crate::domain::location::Location;
use anyhow::{Context, Result};
use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const DEFAULT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_RETRIES: u32 = 3;
const DEFAULT_CACHE_TTL_SECS: u64 = 600;
const FORECAST_PATH: &str = "/v1/forecast";
const HOURLY_VARIABLES: &str = "temperature_2m,relative_humidity_2m,rain";

// Upstream hard limit on the forecast window.
const FORECAST_DAYS: u32 = 16;

// One upstream call returns the whole 16-day hourly window for a location,
// so responses are cached briefly per location. Dates beyond the window are
// answered from monthly climatological normals (harvest-date pricing reaches
// 25-30 days out).
pub struct OpenMeteoClient {
    http: reqwest::Client,
    base_url: String,
    retries: u32,
    cache_ttl: Duration,
    cache: Mutex<HashMap<Location, CachedForecast>>,
}

struct CachedForecast {
    fetched_at: Instant,
    days: BTreeMap<NaiveDate, DailyWeather>,
}

impl CachedForecast {
    fn is_stale(&self, ttl: Duration) -> bool {
        self.fetched_at.elapsed() > ttl
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DailyWeather {
    pub avg_temp_c: f64,
    pub max_temp_c: f64,
    pub humidity_pct: f64,
    pub rainfall_mm: f64,
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    hourly: HourlySeries,
}

#[derive(Debug, Deserialize)]
struct HourlySeries {
    time: Vec<String>,
    temperature_2m: Vec<Option<f64>>,
    relative_humidity_2m: Vec<Option<f64>>,
    rain: Vec<Option<f64>>,
}

impl OpenMeteoClient {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let base_url = settings.open_meteo_base_url().to_string();

        let timeout_secs = std::env::var("OPEN_METEO_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let retries = std::env::var("OPEN_METEO_RETRIES")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(DEFAULT_RETRIES);

        let cache_ttl_secs = std::env::var("OPEN_METEO_CACHE_TTL_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_CACHE_TTL_SECS);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build Open-Meteo http client")?;

        Ok(Self {
            http,
            base_url,
            retries,
            cache_ttl: Duration::from_secs(cache_ttl_secs),
            cache: Mutex::new(HashMap::new()),
        })
    }

    // `Ok(None)` means the date sits inside the forecast window but the
    // upstream response had no usable hours for it.
    pub async fn daily(
        &self,
        location: Location,
        date: NaiveDate,
    ) -> Result<Option<WeatherContext>> {
        let days = self.forecast(location).await?;
        Ok(resolve_daily(&days, date).map(|day| WeatherContext {
            date,
            avg_temp_c: day.avg_temp_c,
            max_temp_c: day.max_temp_c,
            humidity_pct: day.humidity_pct,
            rainfall_mm: day.rainfall_mm,
        }))
    }

    // The lock is held across the refresh so concurrent callers share one
    // upstream request per location.
    async fn forecast(&self, location: Location) -> Result<BTreeMap<NaiveDate, DailyWeather>> {
        let mut cache = self.cache.lock().await;
        if let Some(entry) = cache.get(&location) {
            if !entry.is_stale(self.cache_ttl) {
                return Ok(entry.days.clone());
            }
        }

        let days = self.fetch_with_retry(location).await?;
        cache.insert(
            location,
            CachedForecast {
                fetched_at: Instant::now(),
                days: days.clone(),
            },
        );
        Ok(days)
    }

    async fn fetch_with_retry(
        &self,
        location: Location,
    ) -> Result<BTreeMap<NaiveDate, DailyWeather>> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.fetch_once(location).await {
                Ok(days) => return Ok(days),
                Err(err) => {
                    if attempt >= self.retries {
                        return Err(err);
                    }
                    let backoff = Duration::from_secs(1 << (attempt - 1));
                    tracing::warn!(%location, attempt, ?backoff, error = %err, "Open-Meteo fetch failed; retrying");
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    async fn fetch_once(&self, location: Location) -> Result<BTreeMap<NaiveDate, DailyWeather>> {
        let (latitude, longitude) = location.coordinates();
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), FORECAST_PATH);

        let res = self
            .http
            .get(url)
            .query(&[
                ("latitude", latitude.to_string()),
                ("longitude", longitude.to_string()),
                ("hourly", HOURLY_VARIABLES.to_string()),
                ("forecast_days", FORECAST_DAYS.to_string()),
                ("timezone", "Asia/Kolkata".to_string()),
            ])
            .send()
            .await
            .context("Open-Meteo request failed")?;

        let status = res.status();
        let text = res
            .text()
            .await
            .context("failed to read Open-Meteo response")?;
        if !status.is_success() {
            anyhow::bail!("Open-Meteo HTTP {status}: {text}");
        }

        let parsed = serde_json::from_str::<ForecastResponse>(&text)
            .with_context(|| format!("failed to parse Open-Meteo response: {text}"))?;
        aggregate_daily(&parsed.hourly)
    }
}

#[derive(Default)]
struct DayAccumulator {
    temp_sum: f64,
    temp_count: u32,
    max_temp: f64,
    humidity_sum: f64,
    humidity_count: u32,
    rain_sum: f64,
}

// Null hours are skipped; a day with no usable temperature or humidity
// readings is dropped entirely.
fn aggregate_daily(hourly: &HourlySeries) -> Result<BTreeMap<NaiveDate, DailyWeather>> {
    let n = hourly.time.len();
    anyhow::ensure!(
        hourly.temperature_2m.len() == n
            && hourly.relative_humidity_2m.len() == n
            && hourly.rain.len() == n,
        "Open-Meteo hourly arrays disagree on length (time={}, temp={}, humidity={}, rain={})",
        n,
        hourly.temperature_2m.len(),
        hourly.relative_humidity_2m.len(),
        hourly.rain.len()
    );

    let mut per_day: BTreeMap<NaiveDate, DayAccumulator> = BTreeMap::new();
    for i in 0..n {
        let stamp = NaiveDateTime::parse_from_str(&hourly.time[i], "%Y-%m-%dT%H:%M")
            .with_context(|| format!("bad Open-Meteo timestamp {:?}", hourly.time[i]))?;
        let acc = per_day.entry(stamp.date()).or_default();
        if let Some(temp) = hourly.temperature_2m[i] {
            if acc.temp_count == 0 || temp > acc.max_temp {
                acc.max_temp = temp;
            }
            acc.temp_sum += temp;
            acc.temp_count += 1;
        }
        if let Some(humidity) = hourly.relative_humidity_2m[i] {
            acc.humidity_sum += humidity;
            acc.humidity_count += 1;
        }
        if let Some(rain) = hourly.rain[i] {
            acc.rain_sum += rain;
        }
    }

    let mut days = BTreeMap::new();
    for (date, acc) in per_day {
        if acc.temp_count == 0 || acc.humidity_count == 0 {
            tracing::warn!(%date, "Open-Meteo day has no usable readings; dropping");
            continue;
        }
        days.insert(
            date,
            DailyWeather {
                avg_temp_c: acc.temp_sum / f64::from(acc.temp_count),
                max_temp_c: acc.max_temp,
                humidity_pct: acc.humidity_sum / f64::from(acc.humidity_count),
                rainfall_mm: acc.rain_sum,
            },
        );
    }
    Ok(days)
}

// In-window dates come from the forecast, beyond-window dates from monthly
// normals. A date inside the window that the forecast skipped stays
// unanswered.
fn resolve_daily(days: &BTreeMap<NaiveDate, DailyWeather>, date: NaiveDate) -> Option<DailyWeather> {
    if let Some(day) = days.get(&date) {
        return Some(*day);
    }
    match days.keys().next_back() {
        Some(last) if date > *last => Some(climatological_normal(date.month())),
        _ => None,
    }
}

// Monthly normals for the southern-Karnataka mulberry belt. The three
// supported towns sit within one agro-climatic zone, so one regional table
// serves them all.
fn climatological_normal(month: u32) -> DailyWeather {
    const NORMALS: [(f64, f64, f64, f64); 12] = [
        (21.0, 27.5, 61.0, 0.1), // Jan
        (23.0, 30.0, 55.0, 0.2), // Feb
        (25.5, 32.5, 50.0, 0.6), // Mar
        (27.0, 33.5, 56.0, 1.5), // Apr
        (26.5, 32.5, 64.0, 3.6), // May
        (24.5, 29.5, 74.0, 2.9), // Jun
        (23.5, 28.0, 79.0, 3.4), // Jul
        (23.5, 28.0, 80.0, 4.3), // Aug
        (23.5, 28.5, 78.0, 5.6), // Sep
        (23.0, 28.5, 76.0, 5.1), // Oct
        (22.0, 27.5, 70.0, 2.0), // Nov
        (21.0, 26.5, 65.0, 0.5), // Dec
    ];
    let (avg_temp_c, max_temp_c, humidity_pct, rainfall_mm) =
        NORMALS[(month as usize - 1) % 12];
    DailyWeather {
        avg_temp_c,
        max_temp_c,
        humidity_pct,
        rainfall_mm,
    }
}
