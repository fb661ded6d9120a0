//! Calibration of the PMC model against manually entered reference points.
//!
//! `calibrate` is a pure local grid search over an explicit [`SearchSpace`].
//! Persisting an accepted result and pushing it to readers is the caller's
//! job; [`ParamsHandle`] is the shared, atomically swapped copy readers use.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use utoipa::ToSchema;

use crate::services::pmc::{compute_series, PmcParams, SeriesSeed};

/// Manually entered ground truth for one date.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReferencePoint {
    pub date: NaiveDate,
    pub ctl: Option<f64>,
    pub atl: Option<f64>,
}

impl ReferencePoint {
    pub fn is_usable(&self) -> bool {
        self.ctl.is_some() || self.atl.is_some()
    }
}

/// Current model parameters. Missing fields in a stored blob take the defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct CalibrationParameters {
    /// CTL time constant (days)
    pub ctl_time_constant_days: f64,
    /// ATL time constant (days)
    pub atl_time_constant_days: f64,
    /// Multiplier applied to raw daily load
    pub load_scale_factor: f64,
    /// When a calibration run last changed these values
    pub last_updated: Option<DateTime<Utc>>,
    /// Reference points used by that run
    pub reference_count: u32,
}

impl Default for CalibrationParameters {
    fn default() -> Self {
        Self {
            ctl_time_constant_days: 42.0,
            atl_time_constant_days: 7.0,
            load_scale_factor: 1.0,
            last_updated: None,
            reference_count: 0,
        }
    }
}

impl CalibrationParameters {
    /// Parse a stored blob, filling absent fields with defaults.
    pub fn from_json(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }
}

/// Candidate values for one parameter: `centre ± radius_steps × step`,
/// clipped to `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbourhood {
    pub radius_steps: i32,
    pub step: f64,
    pub min: f64,
    pub max: f64,
}

impl Neighbourhood {
    pub fn candidates(&self, centre: f64) -> Vec<f64> {
        const EPS: f64 = 1e-9;
        (-self.radius_steps..=self.radius_steps)
            .map(|i| round_3dp(centre + f64::from(i) * self.step))
            .filter(|v| *v >= self.min - EPS && *v <= self.max + EPS)
            .collect()
    }
}

fn round_3dp(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchSpace {
    pub ctl: Neighbourhood,
    pub atl: Neighbourhood,
    pub scale: Neighbourhood,
}

impl Default for SearchSpace {
    fn default() -> Self {
        Self {
            ctl: Neighbourhood {
                radius_steps: 5,
                step: 1.0,
                min: 30.0,
                max: 50.0,
            },
            atl: Neighbourhood {
                radius_steps: 2,
                step: 1.0,
                min: 4.0,
                max: 10.0,
            },
            scale: Neighbourhood {
                radius_steps: 4,
                step: 0.05,
                min: 0.8,
                max: 1.8,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct CalibrationConfig {
    pub search: SearchSpace,
    pub min_reference_points: usize,
    pub min_ctl_change: f64,
    pub min_atl_change: f64,
    pub min_scale_change: f64,
    /// Days of load history and references considered by a run.
    pub lookback_days: i64,
    pub seed: SeriesSeed,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            search: SearchSpace::default(),
            min_reference_points: 2,
            min_ctl_change: 1.0,
            min_atl_change: 1.0,
            min_scale_change: 0.02,
            lookback_days: 365,
            seed: SeriesSeed::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationStatus {
    Updated,
    Unchanged,
    InsufficientReferences,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct CalibrationOutcome {
    pub parameters: CalibrationParameters,
    pub status: CalibrationStatus,
    /// Usable reference points seen by the run
    pub reference_count: usize,
    /// Squared error of the parameters the run started from
    pub error_before: Option<f64>,
    /// Squared error of the best candidate found
    pub error_after: Option<f64>,
}

/// Σ squared CTL/ATL deviations over `references`. The model runs from the
/// earliest load through each reference date; dates before any load see a
/// zero state.
pub fn squared_error(
    loads: &BTreeMap<NaiveDate, f64>,
    references: &[ReferencePoint],
    params: &PmcParams,
) -> f64 {
    let Some(last_ref) = references.iter().map(|r| r.date).max() else {
        return 0.0;
    };
    let by_date: BTreeMap<NaiveDate, (f64, f64)> = compute_series(loads, params, Some(last_ref))
        .into_iter()
        .map(|p| (p.date, (p.ctl, p.atl)))
        .collect();

    references
        .iter()
        .map(|r| {
            let (ctl, atl) = by_date.get(&r.date).copied().unwrap_or((0.0, 0.0));
            let ctl_err = r.ctl.map(|c| (ctl - c).powi(2)).unwrap_or(0.0);
            let atl_err = r.atl.map(|a| (atl - a).powi(2)).unwrap_or(0.0);
            ctl_err + atl_err
        })
        .sum()
}

fn exceeds_threshold(
    current: &CalibrationParameters,
    candidate: &CalibrationParameters,
    config: &CalibrationConfig,
) -> bool {
    (candidate.ctl_time_constant_days - current.ctl_time_constant_days).abs() >= config.min_ctl_change
        || (candidate.atl_time_constant_days - current.atl_time_constant_days).abs()
            >= config.min_atl_change
        || (candidate.load_scale_factor - current.load_scale_factor).abs()
            >= config.min_scale_change
}

/// Search the neighbourhood of `current` for the parameters that best fit
/// `references`. Returns `current` untouched unless a strictly better
/// candidate moves at least one parameter past its change threshold.
pub fn calibrate(
    loads: &BTreeMap<NaiveDate, f64>,
    references: &[ReferencePoint],
    current: &CalibrationParameters,
    config: &CalibrationConfig,
    now: DateTime<Utc>,
) -> CalibrationOutcome {
    let usable: Vec<ReferencePoint> = references.iter().copied().filter(|r| r.is_usable()).collect();

    if usable.len() < config.min_reference_points {
        return CalibrationOutcome {
            parameters: current.clone(),
            status: CalibrationStatus::InsufficientReferences,
            reference_count: usable.len(),
            error_before: None,
            error_after: None,
        };
    }

    let error_of = |ctl: f64, atl: f64, scale: f64| {
        let params = PmcParams {
            ctl_time_constant: ctl,
            atl_time_constant: atl,
            load_scale: scale,
            seed: config.seed,
        };
        squared_error(loads, &usable, &params)
    };

    let error_before = error_of(
        current.ctl_time_constant_days,
        current.atl_time_constant_days,
        current.load_scale_factor,
    );

    let mut best = (
        current.ctl_time_constant_days,
        current.atl_time_constant_days,
        current.load_scale_factor,
    );
    let mut best_error = error_before;

    let space = &config.search;
    let scales = space.scale.candidates(current.load_scale_factor);
    let atls = space.atl.candidates(current.atl_time_constant_days);
    for ctl in space.ctl.candidates(current.ctl_time_constant_days) {
        for &atl in &atls {
            for &scale in &scales {
                let err = error_of(ctl, atl, scale);
                if err < best_error {
                    best_error = err;
                    best = (ctl, atl, scale);
                }
            }
        }
    }

    let candidate = CalibrationParameters {
        ctl_time_constant_days: best.0,
        atl_time_constant_days: best.1,
        load_scale_factor: best.2,
        last_updated: Some(now),
        reference_count: u32::try_from(usable.len()).unwrap_or(u32::MAX),
    };

    let accepted = best_error < error_before && exceeds_threshold(current, &candidate, config);
    CalibrationOutcome {
        parameters: if accepted { candidate } else { current.clone() },
        status: if accepted {
            CalibrationStatus::Updated
        } else {
            CalibrationStatus::Unchanged
        },
        reference_count: usable.len(),
        error_before: Some(error_before),
        error_after: Some(best_error),
    }
}

/// Shared parameters. Readers clone the `Arc`; a reload swaps it whole.
#[derive(Debug, Default)]
pub struct ParamsHandle {
    inner: RwLock<Arc<CalibrationParameters>>,
}

impl ParamsHandle {
    pub fn new(params: CalibrationParameters) -> Self {
        Self {
            inner: RwLock::new(Arc::new(params)),
        }
    }

    pub async fn current(&self) -> Arc<CalibrationParameters> {
        self.inner.read().await.clone()
    }

    pub async fn replace(&self, params: CalibrationParameters) {
        *self.inner.write().await = Arc::new(params);
    }
}
