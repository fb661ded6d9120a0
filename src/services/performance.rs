//! PMC reports and calibration runs on top of the load store.
//!
//! Reports are cached per (date, window). Every completed calibration run
//! clears that cache; callers that record new data clear it through
//! [`PmcService::invalidate`].

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use utoipa::ToSchema;

use crate::errors::AppError;
use crate::helpers::{days_before, round_1dp};
use crate::services::cache::TtlCache;
use crate::services::calibration::{
    calibrate, CalibrationConfig, CalibrationOutcome, CalibrationParameters, CalibrationStatus,
    ParamsHandle,
};
use crate::services::effort::EffortChain;
use crate::services::pmc::{
    compute_series, form_description, lookback_days, PmcParams, SeriesSeed, TsbStatus,
    DEFAULT_MIN_LOOKBACK_DAYS,
};
use crate::services::records::dedupe;
use crate::services::references::{reference_points, resolve_latest};
use crate::services::store::LoadStore;

/// Longest reporting window accepted, in days.
pub const MAX_WINDOW_DAYS: i64 = 3650;

#[derive(Debug, Clone)]
pub struct PmcServiceConfig {
    pub cache_ttl: Duration,
    pub min_lookback_days: i64,
    pub seed: SeriesSeed,
    pub calibration: CalibrationConfig,
}

impl Default for PmcServiceConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(300),
            min_lookback_days: DEFAULT_MIN_LOOKBACK_DAYS,
            seed: SeriesSeed::default(),
            calibration: CalibrationConfig::default(),
        }
    }
}

/// Chart series, one entry per day of the window, parallel arrays.
#[derive(Debug, Clone, Default, Serialize, ToSchema)]
pub struct PmcChart {
    pub dates: Vec<NaiveDate>,
    pub load: Vec<f64>,
    pub ctl: Vec<f64>,
    pub atl: Vec<f64>,
    pub tsb: Vec<f64>,
}

/// PMC as of one date. All numbers are rounded to one decimal place.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PmcReport {
    pub date: NaiveDate,
    pub window_days: i64,
    pub ctl: f64,
    pub atl: f64,
    pub tsb: f64,
    pub status: TsbStatus,
    /// Human-readable status tier
    pub status_label: String,
    /// Finer-grained description of form
    pub description: String,
    pub chart: PmcChart,
    /// Days with recorded load inside the window
    pub days_tracked: usize,
    /// Parameters the report was computed with
    pub parameters: CalibrationParameters,
}

pub struct PmcService {
    store: Arc<dyn LoadStore>,
    effort: EffortChain,
    params: ParamsHandle,
    cache: TtlCache<(NaiveDate, i64), Arc<PmcReport>>,
    config: PmcServiceConfig,
    /// Serialises calibration runs: one writer for the parameters.
    calibrating: Mutex<()>,
}

impl PmcService {
    pub fn new(store: Arc<dyn LoadStore>, effort: EffortChain, config: PmcServiceConfig) -> Self {
        Self {
            store,
            effort,
            params: ParamsHandle::default(),
            cache: TtlCache::new(config.cache_ttl),
            config,
            calibrating: Mutex::new(()),
        }
    }

    pub async fn parameters(&self) -> Arc<CalibrationParameters> {
        self.params.current().await
    }

    /// Load persisted parameters, merging defaults into a partial blob. A
    /// malformed blob is logged and ignored.
    pub async fn load_parameters(&self) -> Result<(), AppError> {
        let Some(blob) = self.store.load_calibration_blob().await? else {
            tracing::info!("No stored calibration parameters, using defaults");
            return Ok(());
        };
        match CalibrationParameters::from_json(blob) {
            Ok(params) => {
                tracing::info!(
                    "Loaded calibration parameters: ctl={} atl={} scale={}",
                    params.ctl_time_constant_days,
                    params.atl_time_constant_days,
                    params.load_scale_factor
                );
                self.params.replace(params).await;
            }
            Err(e) => tracing::warn!("Stored calibration parameters unreadable, using defaults: {}", e),
        }
        Ok(())
    }

    pub async fn invalidate(&self) {
        self.cache.invalidate_all().await;
    }

    pub async fn cached_reports(&self) -> usize {
        self.cache.len().await
    }

    /// PMC as of `date` over the last `window_days` days (cached).
    pub async fn report(&self, date: NaiveDate, window_days: i64) -> Result<Arc<PmcReport>, AppError> {
        if !(1..=MAX_WINDOW_DAYS).contains(&window_days) {
            return Err(AppError::BadRequest(format!(
                "days must be between 1 and {}",
                MAX_WINDOW_DAYS
            )));
        }
        self.cache
            .get_or_try_insert_with((date, window_days), || async move {
                self.build_report(date, window_days).await.map(Arc::new)
            })
            .await
    }

    async fn daily_loads(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<BTreeMap<NaiveDate, f64>, AppError> {
        let workouts = dedupe(self.store.workouts_between(start, end).await?);
        Ok(self.effort.daily_loads(&workouts))
    }

    async fn build_report(&self, date: NaiveDate, window_days: i64) -> Result<PmcReport, AppError> {
        let params = self.params.current().await;
        let lookback = lookback_days(
            window_days,
            params.ctl_time_constant_days,
            self.config.min_lookback_days,
        );
        let loads = self
            .daily_loads(days_before(date, lookback)?, date)
            .await?;

        let pmc_params = PmcParams::from_calibration(&params, self.config.seed);
        let series = compute_series(&loads, &pmc_params, Some(date));
        let window_start = days_before(date, window_days - 1)?;

        let mut chart = PmcChart::default();
        for point in series.iter().filter(|p| p.date >= window_start) {
            chart.dates.push(point.date);
            chart.load.push(round_1dp(point.load));
            chart.ctl.push(round_1dp(point.ctl));
            chart.atl.push(round_1dp(point.atl));
            chart.tsb.push(round_1dp(point.tsb));
        }

        let days_tracked = loads.range(window_start..=date).count();
        let latest = series.last().filter(|p| p.date == date);
        tracing::debug!(
            "PMC report for {} over {} days: {} days of load in {} day lookback",
            date,
            window_days,
            loads.len(),
            lookback
        );

        let (ctl, atl, tsb, status) = match latest {
            Some(p) => (p.ctl, p.atl, p.tsb, TsbStatus::from_tsb(p.tsb)),
            None => (0.0, 0.0, 0.0, TsbStatus::NoData),
        };

        Ok(PmcReport {
            date,
            window_days,
            ctl: round_1dp(ctl),
            atl: round_1dp(atl),
            tsb: round_1dp(tsb),
            status,
            status_label: status.label().to_string(),
            description: match status {
                TsbStatus::NoData => "No training data recorded yet".to_string(),
                _ => form_description(tsb).to_string(),
            },
            chart,
            days_tracked,
            parameters: params.as_ref().clone(),
        })
    }

    /// Fit parameters to the stored reference values. An accepted result is
    /// persisted before it becomes visible to readers.
    pub async fn run_calibration(&self) -> Result<CalibrationOutcome, AppError> {
        let _guard = self.calibrating.lock().await;
        let cal = &self.config.calibration;
        let current = self.params.current().await;

        let today = Utc::now().date_naive();
        let since = days_before(today, cal.lookback_days)?;
        let warm_up = lookback_days(
            cal.lookback_days,
            cal.search.ctl.max,
            self.config.min_lookback_days,
        );

        let references = reference_points(&resolve_latest(
            &self.store.reference_values(Some(since)).await?,
        ));
        let loads = self
            .daily_loads(days_before(today, warm_up)?, today)
            .await?;

        let outcome = calibrate(&loads, &references, &current, cal, Utc::now());
        match outcome.status {
            CalibrationStatus::Updated => {
                let blob = serde_json::to_value(&outcome.parameters)
                    .map_err(|e| AppError::InternalError(e.to_string()))?;
                self.store.save_calibration_blob(&blob).await?;
                self.params.replace(outcome.parameters.clone()).await;
                tracing::info!(
                    "Calibration updated parameters: ctl={} atl={} scale={} (error {:.2} -> {:.2}, {} references)",
                    outcome.parameters.ctl_time_constant_days,
                    outcome.parameters.atl_time_constant_days,
                    outcome.parameters.load_scale_factor,
                    outcome.error_before.unwrap_or_default(),
                    outcome.error_after.unwrap_or_default(),
                    outcome.reference_count
                );
            }
            CalibrationStatus::Unchanged => {
                tracing::info!(
                    "Calibration kept current parameters ({} references)",
                    outcome.reference_count
                );
            }
            CalibrationStatus::InsufficientReferences => {
                tracing::info!(
                    "Calibration skipped: {} usable references, need {}",
                    outcome.reference_count,
                    cal.min_reference_points
                );
            }
        }
        self.cache.invalidate_all().await;
        Ok(outcome)
    }
}
