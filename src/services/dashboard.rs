//! Dashboard snapshot: five independent sub-queries fanned out concurrently.
//!
//! A failing sub-query is reported under its own key and never fails the
//! snapshot. The combined snapshot is cached per (date, window) for a short
//! TTL; concurrent requests for the same view share one fan-out.

use chrono::NaiveDate;
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use utoipa::ToSchema;

use crate::errors::AppError;
use crate::helpers::days_before;
use crate::services::cache::TtlCache;
use crate::services::performance::PmcService;
use crate::services::records::{resolve_weight, WeightReading, WeightSource};
use crate::services::references::{resolve_latest, ReferenceMetric};
use crate::services::store::LoadStore;
use crate::services::workout_index::{ColdPolicy, WorkoutIndex, WorkoutQuery};

/// Most recent workouts listed on the dashboard.
const RECENT_WORKOUTS_LIMIT: usize = 10;

/// How far back a manual weight entry still counts.
const MANUAL_WEIGHT_LOOKBACK_DAYS: i64 = 365;

/// Result of one sub-query: `{"ok": ...}` or `{"error": "..."}`.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Section {
    Ok(serde_json::Value),
    Error(String),
}

impl Section {
    #[cfg(test)]
    pub fn is_ok(&self) -> bool {
        matches!(self, Section::Ok(_))
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DashboardSnapshot {
    pub date: NaiveDate,
    pub window_days: i64,
    /// Keyed by sub-query: health, pmc, workouts, calories, weight
    #[schema(value_type = Object)]
    pub sections: BTreeMap<String, Section>,
}

type SubQuery<'a> = BoxFuture<'a, Result<serde_json::Value, AppError>>;

fn to_json<T: Serialize>(value: T) -> Result<serde_json::Value, AppError> {
    serde_json::to_value(value).map_err(|e| AppError::InternalError(e.to_string()))
}

pub struct DashboardAggregator {
    store: Arc<dyn LoadStore>,
    pmc: Arc<PmcService>,
    index: WorkoutIndex,
    cache: TtlCache<(NaiveDate, i64), Arc<DashboardSnapshot>>,
}

impl DashboardAggregator {
    pub fn new(
        store: Arc<dyn LoadStore>,
        pmc: Arc<PmcService>,
        index: WorkoutIndex,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            store,
            pmc,
            index,
            cache: TtlCache::new(cache_ttl),
        }
    }

    pub async fn invalidate(&self) {
        self.cache.invalidate_all().await;
    }

    pub async fn cached_snapshots(&self) -> usize {
        self.cache.len().await
    }

    pub async fn snapshot(
        &self,
        date: NaiveDate,
        window_days: i64,
    ) -> Result<Arc<DashboardSnapshot>, AppError> {
        self.cache
            .get_or_try_insert_with((date, window_days), || async move {
                Ok::<_, AppError>(Arc::new(self.fan_out(date, window_days).await))
            })
            .await
    }

    async fn fan_out(&self, date: NaiveDate, window_days: i64) -> DashboardSnapshot {
        let queries: Vec<(&'static str, SubQuery<'_>)> = vec![
            ("health", self.health(date).boxed()),
            ("pmc", self.pmc(date, window_days).boxed()),
            ("workouts", self.workouts(date, window_days).boxed()),
            ("calories", self.calories(date).boxed()),
            ("weight", self.weight(date).boxed()),
        ];
        let (keys, futures): (Vec<_>, Vec<_>) = queries.into_iter().unzip();
        let results = join_all(futures).await;

        let mut sections = BTreeMap::new();
        for (key, result) in keys.into_iter().zip(results) {
            let section = match result {
                Ok(value) => Section::Ok(value),
                Err(e) => {
                    tracing::warn!("Dashboard {} for {}: {} failed: {}", date, window_days, key, e);
                    Section::Error(e.to_string())
                }
            };
            sections.insert(key.to_string(), section);
        }

        DashboardSnapshot {
            date,
            window_days,
            sections,
        }
    }

    async fn health(&self, date: NaiveDate) -> Result<serde_json::Value, AppError> {
        to_json(self.store.daily_health(date).await?)
    }

    async fn pmc(&self, date: NaiveDate, window_days: i64) -> Result<serde_json::Value, AppError> {
        let report = self.pmc.report(date, window_days).await?;
        to_json(report.as_ref())
    }

    async fn workouts(&self, date: NaiveDate, window_days: i64) -> Result<serde_json::Value, AppError> {
        let query = WorkoutQuery {
            before: Some(date),
            limit: Some(RECENT_WORKOUTS_LIMIT),
            ..WorkoutQuery::default()
        };
        let earliest = days_before(date, window_days - 1)?;
        let mut recent = self.index.get(&query, ColdPolicy::DirectQuery).await?;
        recent.retain(|w| w.date >= earliest);
        to_json(recent)
    }

    async fn calories(&self, date: NaiveDate) -> Result<serde_json::Value, AppError> {
        to_json(self.store.daily_calories(date).await?)
    }

    async fn weight(&self, date: NaiveDate) -> Result<serde_json::Value, AppError> {
        let since = days_before(date, MANUAL_WEIGHT_LOOKBACK_DAYS)?;
        let (references, measured) = futures::try_join!(
            self.store.reference_values(Some(since)),
            self.store.latest_weight(date),
        )?;

        let manual = resolve_latest(&references)
            .into_iter()
            .filter(|r| r.metric == ReferenceMetric::Weight && r.date <= date)
            .max_by_key(|r| r.date)
            .map(|r| WeightReading {
                date: r.date,
                kg: r.value,
                source: WeightSource::Manual,
            });

        to_json(resolve_weight(manual, measured))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::effort::EffortChain;
    use crate::services::performance::PmcServiceConfig;
    use crate::services::records::tests::workout;
    use crate::services::records::DailyHealth;
    use crate::services::references::ReferenceValue;
    use crate::services::store::fake::FakeStore;
    use crate::services::workout_index::WorkoutIndexConfig;
    use chrono::Utc;

    fn today() -> NaiveDate {
        Utc::now().date_naive()
    }

    fn aggregator(store: Arc<FakeStore>) -> DashboardAggregator {
        let pmc = Arc::new(PmcService::new(
            store.clone(),
            EffortChain::default(),
            PmcServiceConfig::default(),
        ));
        let index = WorkoutIndex::new(store.clone(), WorkoutIndexConfig::default());
        DashboardAggregator::new(store, pmc, index, Duration::from_secs(30))
    }

    fn seeded_store() -> Arc<FakeStore> {
        let mut run = workout(&today().to_string(), "run");
        run.effort_score = Some(70.0);
        let store = Arc::new(FakeStore::with_workouts(vec![run]));
        store.health.lock().unwrap().insert(
            today(),
            DailyHealth {
                date: today(),
                sleep_hours: Some(7.5),
                hrv: Some(62.0),
                resting_hr: Some(51.0),
                steps: Some(9000),
                recovery_score: None,
            },
        );
        store
    }

    #[tokio::test]
    async fn test_all_sections_present() {
        let dash = aggregator(seeded_store());
        let snap = dash.snapshot(today(), 7).await.unwrap();

        let keys: Vec<&str> = snap.sections.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["calories", "health", "pmc", "weight", "workouts"]);
        assert!(snap.sections.values().all(Section::is_ok));
        assert_eq!(
            snap.sections["health"],
            Section::Ok(serde_json::json!({
                "date": today(),
                "sleep_hours": 7.5,
                "hrv": 62.0,
                "resting_hr": 51.0,
                "steps": 9000,
                "recovery_score": null
            }))
        );
        // No calorie row for the day is data, not an error.
        assert_eq!(snap.sections["calories"], Section::Ok(serde_json::Value::Null));
    }

    #[tokio::test]
    async fn test_one_failing_sub_query_is_isolated() {
        let store = seeded_store();
        store.fail("daily_health");
        let dash = aggregator(store);

        let snap = dash.snapshot(today(), 7).await.unwrap();
        assert!(matches!(snap.sections["health"], Section::Error(_)));
        for key in ["pmc", "workouts", "calories", "weight"] {
            assert!(snap.sections[key].is_ok(), "{} should succeed", key);
        }

        let json = serde_json::to_value(snap.as_ref()).unwrap();
        assert!(json["sections"]["health"]["error"].is_string());
        assert!(json["sections"]["workouts"]["ok"].is_array());
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_collapses_to_one_fan_out() {
        let store = seeded_store();
        store.set_latency("daily_health", Duration::from_millis(500));
        let dash = Arc::new(aggregator(store.clone()));

        let requests: Vec<_> = (0..5)
            .map(|_| {
                let dash = dash.clone();
                tokio::spawn(async move { dash.snapshot(today(), 7).await })
            })
            .collect();
        for r in join_all(requests).await {
            assert!(r.unwrap().is_ok());
        }
        assert_eq!(store.calls("daily_health"), 1);

        tokio::time::advance(Duration::from_secs(31)).await;
        dash.snapshot(today(), 7).await.unwrap();
        assert_eq!(store.calls("daily_health"), 2);
    }

    #[tokio::test]
    async fn test_manual_weight_wins_same_day() {
        let store = seeded_store();
        store.weights.lock().unwrap().push(WeightReading {
            date: today(),
            kg: 72.4,
            source: WeightSource::Measured,
        });
        store
            .references
            .lock()
            .unwrap()
            .push(ReferenceValue::new(today(), ReferenceMetric::Weight, 71.0));
        let dash = aggregator(store);

        let snap = dash.snapshot(today(), 7).await.unwrap();
        let Section::Ok(weight) = &snap.sections["weight"] else {
            panic!("weight section failed");
        };
        assert_eq!(weight["kg"], 71.0);
        assert_eq!(weight["source"], "manual");
    }

    #[tokio::test]
    async fn test_invalidate_forces_new_fan_out() {
        let store = seeded_store();
        let dash = aggregator(store.clone());
        dash.snapshot(today(), 7).await.unwrap();
        assert_eq!(dash.cached_snapshots().await, 1);

        dash.invalidate().await;
        assert_eq!(dash.cached_snapshots().await, 0);
        dash.snapshot(today(), 7).await.unwrap();
        assert_eq!(store.calls("daily_calories"), 2);
    }
}
