use crate::domain::context::{MarketContext, WeatherContext};
use crate::domain::location::Location;
use crate::provider::ContextProvider;
use chrono::NaiveDate;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

// Both context halves present.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedDay {
    pub date: NaiveDate,
    pub weather: WeatherContext,
    pub market: MarketContext,
}

#[derive(Debug, Clone)]
pub struct SkippedDay {
    pub date: NaiveDate,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct HorizonContext {
    pub days: Vec<ResolvedDay>,
    pub skipped: Vec<SkippedDay>,
}

enum DayOutcome {
    Resolved(WeatherContext, MarketContext),
    Missing(&'static str),
}

// One provider lookup per date, all in flight at once, each bounded by
// `lookup_timeout`. A timed-out, failed, or unanswered date is skipped,
// never fatal. Days come back in date order regardless of completion order.
pub async fn resolve(
    provider: &Arc<dyn ContextProvider>,
    location: Location,
    start: NaiveDate,
    horizon_days: u32,
    lookup_timeout: Duration,
) -> HorizonContext {
    let mut tasks: JoinSet<(u32, Result<DayOutcome, String>)> = JoinSet::new();
    for offset in 0..horizon_days {
        let date = start + chrono::Duration::days(i64::from(offset));
        let provider = Arc::clone(provider);
        tasks.spawn(async move {
            let outcome =
                tokio::time::timeout(lookup_timeout, resolve_one(provider.as_ref(), location, date))
                    .await;
            let result = match outcome {
                Ok(Ok(day)) => Ok(day),
                Ok(Err(err)) => Err(format!("context lookup failed: {err:#}")),
                Err(_) => Err(format!("context lookup timed out after {lookup_timeout:?}")),
            };
            (offset, result)
        });
    }

    let mut slots: Vec<Option<ResolvedDay>> = (0..horizon_days).map(|_| None).collect();
    let mut skipped = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        let (offset, result) = match joined {
            Ok(task_output) => task_output,
            Err(err) => {
                tracing::error!(%location, error = %err, "horizon lookup task failed");
                continue;
            }
        };
        let date = start + chrono::Duration::days(i64::from(offset));
        match result {
            Ok(DayOutcome::Resolved(weather, market)) => {
                slots[offset as usize] = Some(ResolvedDay {
                    date,
                    weather,
                    market,
                });
            }
            Ok(DayOutcome::Missing(what)) => skipped.push(SkippedDay {
                date,
                reason: format!("{what} not available"),
            }),
            Err(reason) => skipped.push(SkippedDay { date, reason }),
        }
    }

    skipped.sort_by_key(|skip| skip.date);
    HorizonContext {
        days: slots.into_iter().flatten().collect(),
        skipped,
    }
}

async fn resolve_one(
    provider: &dyn ContextProvider,
    location: Location,
    date: NaiveDate,
) -> anyhow::Result<DayOutcome> {
    let Some(weather) = provider.weather(location, date).await? else {
        return Ok(DayOutcome::Missing("weather"));
    };
    let Some(market) = provider.market(location, date).await? else {
        return Ok(DayOutcome::Missing("market signal"));
    };
    Ok(DayOutcome::Resolved(weather, market))
}
