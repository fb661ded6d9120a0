//! Composition root for the analytics core.
//!
//! Owns the store handle and every cache in front of it. All mutations go
//! through here so that each one clears exactly the caches derived from the
//! data it changed.

use chrono::NaiveDate;
use std::sync::Arc;
use std::time::Duration;

use crate::errors::AppError;
use crate::helpers::check_date;
use crate::services::calibration::{CalibrationOutcome, CalibrationParameters};
use crate::services::dashboard::{DashboardAggregator, DashboardSnapshot};
use crate::services::effort::EffortChain;
use crate::services::performance::{PmcReport, PmcService, PmcServiceConfig};
use crate::services::records::WorkoutRecord;
use crate::services::references::{
    resolve_latest, ReferenceMetric, ReferenceValue, ResolvedReference,
};
use crate::services::store::LoadStore;
use crate::services::wellness::{HealthHistory, HealthTrends, Recommendation, WellnessService};
use crate::services::workout_index::{
    ColdPolicy, IndexStatus, WorkoutIndex, WorkoutIndexConfig, WorkoutQuery,
};

#[derive(Debug, Clone)]
pub struct AnalyticsConfig {
    pub index: WorkoutIndexConfig,
    pub pmc: PmcServiceConfig,
    pub dashboard_ttl: Duration,
    pub health_ttl: Duration,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            index: WorkoutIndexConfig::default(),
            pmc: PmcServiceConfig::default(),
            dashboard_ttl: Duration::from_secs(30),
            health_ttl: Duration::from_secs(300),
        }
    }
}

pub struct Analytics {
    store: Arc<dyn LoadStore>,
    index: WorkoutIndex,
    pmc: Arc<PmcService>,
    dashboard: DashboardAggregator,
    wellness: WellnessService,
}

/// Shared handle used as axum state.
pub type SharedAnalytics = Arc<Analytics>;

impl Analytics {
    pub fn new(store: Arc<dyn LoadStore>, config: AnalyticsConfig) -> Self {
        let index = WorkoutIndex::new(store.clone(), config.index);
        let pmc = Arc::new(PmcService::new(
            store.clone(),
            EffortChain::default(),
            config.pmc,
        ));
        let dashboard = DashboardAggregator::new(
            store.clone(),
            pmc.clone(),
            index.clone(),
            config.dashboard_ttl,
        );
        let wellness = WellnessService::new(store.clone(), pmc.clone(), config.health_ttl);
        Self {
            store,
            index,
            pmc,
            dashboard,
            wellness,
        }
    }

    /// Load persisted parameters and start populating the workout index.
    pub async fn start(&self) -> Result<(), AppError> {
        self.index.prefetch().await;
        self.pmc.load_parameters().await
    }

    pub async fn store_reachable(&self) -> bool {
        self.store.ping().await.is_ok()
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub async fn pmc(&self, date: NaiveDate, window_days: i64) -> Result<Arc<PmcReport>, AppError> {
        self.pmc.report(date, window_days).await
    }

    pub async fn workouts(
        &self,
        query: &WorkoutQuery,
        policy: ColdPolicy,
    ) -> Result<Vec<WorkoutRecord>, AppError> {
        self.index.get(query, policy).await
    }

    pub async fn dashboard(
        &self,
        date: NaiveDate,
        window_days: i64,
    ) -> Result<Arc<DashboardSnapshot>, AppError> {
        self.dashboard.snapshot(date, window_days).await
    }

    pub async fn health_history(
        &self,
        date: NaiveDate,
        days: i64,
    ) -> Result<Arc<HealthHistory>, AppError> {
        self.wellness.history(date, days).await
    }

    pub async fn health_trends(&self, date: NaiveDate, days: i64) -> Result<HealthTrends, AppError> {
        self.wellness.trends(date, days).await
    }

    pub async fn recommendation(&self, date: NaiveDate) -> Result<Recommendation, AppError> {
        self.wellness.recommendation(date).await
    }

    pub async fn calibration_parameters(&self) -> Arc<CalibrationParameters> {
        self.pmc.parameters().await
    }

    /// Live reference values, optionally for one date only.
    pub async fn reference_values(
        &self,
        date: Option<NaiveDate>,
    ) -> Result<Vec<ResolvedReference>, AppError> {
        let values = self.store.reference_values(date).await?;
        Ok(resolve_latest(&values)
            .into_iter()
            .filter(|r| date.map_or(true, |d| r.date == d))
            .collect())
    }

    pub async fn index_status(&self) -> IndexStatus {
        self.index.status().await
    }

    pub async fn cache_sizes(&self) -> (usize, usize) {
        (
            self.pmc.cached_reports().await,
            self.dashboard.cached_snapshots().await,
        )
    }

    pub async fn cached_health_histories(&self) -> usize {
        self.wellness.cached_histories().await
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    pub async fn record_workout(&self, workout: WorkoutRecord) -> Result<(), AppError> {
        validate_workout(&workout)?;
        self.store.insert_workout(&workout).await?;
        tracing::info!("Recorded workout '{}' on {}", workout.name, workout.date);
        self.clear_caches().await;
        Ok(())
    }

    pub async fn write_reference_value(
        &self,
        date: NaiveDate,
        metric: ReferenceMetric,
        value: f64,
    ) -> Result<ResolvedReference, AppError> {
        check_date(date)?;
        validate_reference(metric, value)?;
        let stored = ReferenceValue::new(date, metric, value);
        self.store.append_reference_value(&stored).await?;
        tracing::info!("Reference value {} on {} set to {}", metric, date, value);
        self.clear_caches().await;
        Ok(ResolvedReference {
            date,
            metric,
            value,
            recorded_at: stored.recorded_at,
        })
    }

    /// Append a tombstone; the value disappears from every read.
    pub async fn delete_reference_value(
        &self,
        date: NaiveDate,
        metric: ReferenceMetric,
    ) -> Result<(), AppError> {
        self.store
            .append_reference_value(&ReferenceValue::tombstone(date, metric))
            .await?;
        tracing::info!("Reference value {} on {} deleted", metric, date);
        self.clear_caches().await;
        Ok(())
    }

    pub async fn run_calibration(&self) -> Result<CalibrationOutcome, AppError> {
        let outcome = self.pmc.run_calibration().await?;
        self.dashboard.invalidate().await;
        Ok(outcome)
    }

    /// Drop every cache and the workout index; the next reads repopulate.
    pub async fn clear_caches(&self) {
        self.pmc.invalidate().await;
        self.dashboard.invalidate().await;
        self.wellness.invalidate().await;
        self.index.invalidate().await;
    }
}

fn validate_workout(workout: &WorkoutRecord) -> Result<(), AppError> {
    check_date(workout.date)?;
    let non_negative = [
        ("duration_minutes", workout.duration_minutes),
        ("avg_hr", workout.avg_hr),
        ("max_hr", workout.max_hr),
        ("distance_m", workout.distance_m),
        ("effort_score", workout.effort_score),
    ];
    for (field, value) in non_negative {
        if let Some(v) = value {
            if !v.is_finite() || v < 0.0 {
                return Err(AppError::BadRequest(format!(
                    "{} must be a non-negative number",
                    field
                )));
            }
        }
    }
    Ok(())
}

fn validate_reference(metric: ReferenceMetric, value: f64) -> Result<(), AppError> {
    let valid = match metric {
        ReferenceMetric::Ctl | ReferenceMetric::Atl => value.is_finite() && value >= 0.0,
        ReferenceMetric::Weight => value.is_finite() && value > 0.0,
    };
    if valid {
        Ok(())
    } else {
        Err(AppError::BadRequest(format!(
            "invalid {} value {}",
            metric, value
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::calibration::CalibrationStatus;
    use crate::services::records::tests::workout;
    use crate::services::store::fake::FakeStore;
    use crate::services::workout_index::IndexPhase;
    use chrono::Utc;
    use tokio_test::assert_ok;

    fn today() -> NaiveDate {
        Utc::now().date_naive()
    }

    fn analytics(store: Arc<FakeStore>) -> Analytics {
        Analytics::new(
            store,
            AnalyticsConfig {
                dashboard_ttl: Duration::from_secs(30),
                ..AnalyticsConfig::default()
            },
        )
    }

    #[tokio::test]
    async fn test_recording_a_workout_invalidates_every_cache() {
        let store = Arc::new(FakeStore::with_workouts(vec![workout(
            &today().to_string(),
            "run",
        )]));
        let core = analytics(store.clone());

        assert_ok!(core.dashboard(today(), 7).await);
        assert_eq!(core.cache_sizes().await, (1, 1));
        assert_eq!(core.index_status().await.phase, IndexPhase::Ready);

        let mut ride = workout(&today().to_string(), "ride");
        ride.effort_score = Some(55.0);
        assert_ok!(core.record_workout(ride).await);

        assert_eq!(core.cache_sizes().await, (0, 0));
        assert_eq!(core.index_status().await.phase, IndexPhase::Empty);
        let listed = assert_ok!(
            core.workouts(&WorkoutQuery::default(), ColdPolicy::DirectQuery)
                .await
        );
        assert_eq!(listed.len(), 2);
    }

    #[tokio::test]
    async fn test_clearing_caches_drops_health_history() {
        let core = analytics(Arc::new(FakeStore::default()));
        assert_ok!(core.health_trends(today(), 30).await);
        assert_eq!(core.cached_health_histories().await, 1);

        core.clear_caches().await;
        assert_eq!(core.cached_health_histories().await, 0);
    }

    #[tokio::test]
    async fn test_reference_write_read_delete() {
        let store = Arc::new(FakeStore::default());
        let core = analytics(store.clone());
        let date = today();

        assert_ok!(core.write_reference_value(date, ReferenceMetric::Ctl, 48.0).await);
        assert_ok!(core.write_reference_value(date, ReferenceMetric::Weight, 70.5).await);
        assert_eq!(assert_ok!(core.reference_values(Some(date)).await).len(), 2);

        assert_ok!(core.delete_reference_value(date, ReferenceMetric::Ctl).await);
        let live = assert_ok!(core.reference_values(None).await);
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].metric, ReferenceMetric::Weight);
        // Nothing is physically removed.
        assert_eq!(store.references.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_invalid_inputs_rejected() {
        let core = analytics(Arc::new(FakeStore::default()));
        assert!(matches!(
            core.write_reference_value(today(), ReferenceMetric::Weight, 0.0).await,
            Err(AppError::BadRequest(_))
        ));
        let mut bad = workout(&today().to_string(), "run");
        bad.duration_minutes = Some(-5.0);
        assert!(matches!(
            core.record_workout(bad).await,
            Err(AppError::BadRequest(_))
        ));
        let far_future = WorkoutRecord {
            date: NaiveDate::MAX,
            ..workout(&today().to_string(), "run")
        };
        assert!(matches!(
            core.record_workout(far_future).await,
            Err(AppError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_every_completed_calibration_clears_caches() {
        let store = Arc::new(FakeStore::with_workouts(vec![workout(
            &today().to_string(),
            "run",
        )]));
        let core = analytics(store.clone());
        assert_ok!(core.dashboard(today(), 7).await);

        let outcome = assert_ok!(core.run_calibration().await);
        assert_eq!(outcome.status, CalibrationStatus::InsufficientReferences);
        assert_eq!(core.cache_sizes().await, (0, 0));
        assert_eq!(core.calibration_parameters().await.reference_count, 0);
        // The workout index holds raw records, not derived values.
        assert_eq!(core.index_status().await.phase, IndexPhase::Ready);
    }
}
