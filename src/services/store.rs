//! Load Store adapter: the read/write contract the analytics core needs from
//! the time-series store, and its Postgres implementation.
//!
//! Every call is a single attempt. Retrying and masking failures is left to
//! the callers (which do neither).

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::PgPool;

use crate::db::queries::{self, InsertWorkoutParams};
use crate::helpers::{f64_to_decimal, opt_dec_to_f64, opt_f64_to_decimal};
use crate::services::records::{
    DailyCalories, DailyHealth, WeightReading, WeightSource, WorkoutRecord,
};
use crate::services::references::ReferenceValue;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(sqlx::Error),

    #[error("malformed stored value: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StoreError::Unavailable(err.to_string())
            }
            other => StoreError::Database(other),
        }
    }
}

#[async_trait]
pub trait LoadStore: Send + Sync {
    /// Per-activity records dated `start..=end`, possibly with duplicates.
    async fn workouts_between(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<WorkoutRecord>, StoreError>;

    async fn insert_workout(&self, workout: &WorkoutRecord) -> Result<(), StoreError>;

    /// Every appended reference row (tombstones included), optionally only
    /// those dated on or after `since`.
    async fn reference_values(
        &self,
        since: Option<NaiveDate>,
    ) -> Result<Vec<ReferenceValue>, StoreError>;

    async fn append_reference_value(&self, value: &ReferenceValue) -> Result<(), StoreError>;

    async fn daily_health(&self, date: NaiveDate) -> Result<Option<DailyHealth>, StoreError>;

    /// One entry per recorded day in `start..=end`, oldest first.
    async fn daily_health_between(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyHealth>, StoreError>;

    async fn daily_calories(&self, date: NaiveDate) -> Result<Option<DailyCalories>, StoreError>;

    /// Latest measured body weight on or before a date.
    async fn latest_weight(
        &self,
        on_or_before: NaiveDate,
    ) -> Result<Option<WeightReading>, StoreError>;

    async fn load_calibration_blob(&self) -> Result<Option<serde_json::Value>, StoreError>;

    async fn save_calibration_blob(&self, blob: &serde_json::Value) -> Result<(), StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

pub struct PgLoadStore {
    pool: PgPool,
}

impl PgLoadStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LoadStore for PgLoadStore {
    async fn workouts_between(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<WorkoutRecord>, StoreError> {
        let rows = queries::get_workouts_between(&self.pool, start, end).await?;
        Ok(rows.into_iter().map(WorkoutRecord::from).collect())
    }

    async fn insert_workout(&self, workout: &WorkoutRecord) -> Result<(), StoreError> {
        let params = InsertWorkoutParams {
            external_id: workout.external_id.clone(),
            date: workout.date,
            start_time: workout.start_time,
            name: workout.name.clone(),
            workout_type: workout.workout_type.clone(),
            source: workout.source.clone(),
            duration_minutes: opt_f64_to_decimal(workout.duration_minutes),
            avg_hr: opt_f64_to_decimal(workout.avg_hr),
            max_hr: opt_f64_to_decimal(workout.max_hr),
            calories: workout.calories,
            distance_m: opt_f64_to_decimal(workout.distance_m),
            elevation_gain_m: opt_f64_to_decimal(workout.elevation_gain_m),
            effort_score: opt_f64_to_decimal(workout.effort_score),
        };
        queries::insert_workout(&self.pool, params).await?;
        Ok(())
    }

    async fn reference_values(
        &self,
        since: Option<NaiveDate>,
    ) -> Result<Vec<ReferenceValue>, StoreError> {
        let rows = queries::get_reference_values(&self.pool, since).await?;
        let mut values = Vec::with_capacity(rows.len());
        for row in rows {
            match ReferenceValue::try_from(row) {
                Ok(value) => values.push(value),
                Err(e) => tracing::warn!("Skipping stored reference value: {}", e),
            }
        }
        Ok(values)
    }

    async fn append_reference_value(&self, value: &ReferenceValue) -> Result<(), StoreError> {
        queries::insert_reference_value(
            &self.pool,
            value.date,
            value.metric.as_str(),
            value.value.map(f64_to_decimal),
            value.deleted,
            value.recorded_at,
        )
        .await?;
        Ok(())
    }

    async fn daily_health(&self, date: NaiveDate) -> Result<Option<DailyHealth>, StoreError> {
        let row = queries::get_daily_health(&self.pool, date).await?;
        Ok(row.as_ref().map(DailyHealth::from))
    }

    async fn daily_health_between(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyHealth>, StoreError> {
        let rows = queries::get_daily_health_between(&self.pool, start, end).await?;
        Ok(rows.iter().map(DailyHealth::from).collect())
    }

    async fn daily_calories(&self, date: NaiveDate) -> Result<Option<DailyCalories>, StoreError> {
        let row = queries::get_daily_health(&self.pool, date).await?;
        Ok(row.as_ref().and_then(DailyCalories::from_row))
    }

    async fn latest_weight(
        &self,
        on_or_before: NaiveDate,
    ) -> Result<Option<WeightReading>, StoreError> {
        let row = queries::get_latest_weight(&self.pool, on_or_before).await?;
        Ok(row.and_then(|r| {
            opt_dec_to_f64(r.weight_kg).map(|kg| WeightReading {
                date: r.date,
                kg,
                source: WeightSource::Measured,
            })
        }))
    }

    async fn load_calibration_blob(&self) -> Result<Option<serde_json::Value>, StoreError> {
        Ok(queries::get_calibration_params(&self.pool)
            .await?
            .map(|row| row.params))
    }

    async fn save_calibration_blob(&self, blob: &serde_json::Value) -> Result<(), StoreError> {
        queries::upsert_calibration_params(&self.pool, blob).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        queries::ping(&self.pool).await?;
        Ok(())
    }
}

/// In-memory store for tests, with per-operation call counters, latency and
/// failure injection.
#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    pub(crate) struct FakeStore {
        pub workouts: Mutex<Vec<WorkoutRecord>>,
        pub references: Mutex<Vec<ReferenceValue>>,
        pub health: Mutex<HashMap<NaiveDate, DailyHealth>>,
        pub calories: Mutex<HashMap<NaiveDate, DailyCalories>>,
        pub weights: Mutex<Vec<WeightReading>>,
        pub blob: Mutex<Option<serde_json::Value>>,
        calls: Mutex<HashMap<&'static str, usize>>,
        latency: Mutex<HashMap<&'static str, Duration>>,
        failing: Mutex<HashSet<&'static str>>,
    }

    impl FakeStore {
        pub(crate) fn with_workouts(workouts: Vec<WorkoutRecord>) -> Self {
            let store = Self::default();
            *store.workouts.lock().unwrap() = workouts;
            store
        }

        pub(crate) fn calls(&self, op: &'static str) -> usize {
            self.calls.lock().unwrap().get(op).copied().unwrap_or(0)
        }

        pub(crate) fn set_latency(&self, op: &'static str, latency: Duration) {
            self.latency.lock().unwrap().insert(op, latency);
        }

        pub(crate) fn fail(&self, op: &'static str) {
            self.failing.lock().unwrap().insert(op);
        }

        pub(crate) fn recover(&self, op: &'static str) {
            self.failing.lock().unwrap().remove(op);
        }

        async fn enter(&self, op: &'static str) -> Result<(), StoreError> {
            *self.calls.lock().unwrap().entry(op).or_insert(0) += 1;
            let latency = self.latency.lock().unwrap().get(op).copied();
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }
            if self.failing.lock().unwrap().contains(op) {
                return Err(StoreError::Unavailable(format!("{} failed", op)));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl LoadStore for FakeStore {
        async fn workouts_between(
            &self,
            start: NaiveDate,
            end: NaiveDate,
        ) -> Result<Vec<WorkoutRecord>, StoreError> {
            self.enter("workouts_between").await?;
            Ok(self
                .workouts
                .lock()
                .unwrap()
                .iter()
                .filter(|w| w.date >= start && w.date <= end)
                .cloned()
                .collect())
        }

        async fn insert_workout(&self, workout: &WorkoutRecord) -> Result<(), StoreError> {
            self.enter("insert_workout").await?;
            self.workouts.lock().unwrap().push(workout.clone());
            Ok(())
        }

        async fn reference_values(
            &self,
            since: Option<NaiveDate>,
        ) -> Result<Vec<ReferenceValue>, StoreError> {
            self.enter("reference_values").await?;
            Ok(self
                .references
                .lock()
                .unwrap()
                .iter()
                .filter(|r| since.map_or(true, |s| r.date >= s))
                .cloned()
                .collect())
        }

        async fn append_reference_value(&self, value: &ReferenceValue) -> Result<(), StoreError> {
            self.enter("append_reference_value").await?;
            self.references.lock().unwrap().push(value.clone());
            Ok(())
        }

        async fn daily_health(&self, date: NaiveDate) -> Result<Option<DailyHealth>, StoreError> {
            self.enter("daily_health").await?;
            Ok(self.health.lock().unwrap().get(&date).cloned())
        }

        async fn daily_health_between(
            &self,
            start: NaiveDate,
            end: NaiveDate,
        ) -> Result<Vec<DailyHealth>, StoreError> {
            self.enter("daily_health_between").await?;
            let mut days: Vec<DailyHealth> = self
                .health
                .lock()
                .unwrap()
                .values()
                .filter(|h| h.date >= start && h.date <= end)
                .cloned()
                .collect();
            days.sort_by_key(|h| h.date);
            Ok(days)
        }

        async fn daily_calories(
            &self,
            date: NaiveDate,
        ) -> Result<Option<DailyCalories>, StoreError> {
            self.enter("daily_calories").await?;
            Ok(self.calories.lock().unwrap().get(&date).cloned())
        }

        async fn latest_weight(
            &self,
            on_or_before: NaiveDate,
        ) -> Result<Option<WeightReading>, StoreError> {
            self.enter("latest_weight").await?;
            Ok(self
                .weights
                .lock()
                .unwrap()
                .iter()
                .filter(|w| w.date <= on_or_before)
                .max_by_key(|w| w.date)
                .cloned())
        }

        async fn load_calibration_blob(&self) -> Result<Option<serde_json::Value>, StoreError> {
            self.enter("load_calibration_blob").await?;
            Ok(self.blob.lock().unwrap().clone())
        }

        async fn save_calibration_blob(
            &self,
            blob: &serde_json::Value,
        ) -> Result<(), StoreError> {
            self.enter("save_calibration_blob").await?;
            *self.blob.lock().unwrap() = Some(blob.clone());
            Ok(())
        }

        async fn ping(&self) -> Result<(), StoreError> {
            self.enter("ping").await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeStore;
    use super::*;
    use crate::services::records::tests::workout;

    #[test]
    fn test_pool_timeout_maps_to_unavailable() {
        let err: StoreError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, StoreError::Unavailable(_)));

        let err: StoreError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, StoreError::Database(_)));
    }

    #[tokio::test]
    async fn test_fake_store_counts_and_fails() {
        let store = FakeStore::with_workouts(vec![
            workout("2024-01-01", "a"),
            workout("2024-02-01", "b"),
        ]);
        let start: NaiveDate = "2024-01-15".parse().unwrap();
        let end: NaiveDate = "2024-03-01".parse().unwrap();

        let found = store.workouts_between(start, end).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(store.calls("workouts_between"), 1);

        store.fail("workouts_between");
        assert!(store.workouts_between(start, end).await.is_err());
        assert_eq!(store.calls("workouts_between"), 2);
    }
}
