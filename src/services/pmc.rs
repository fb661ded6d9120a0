//! Performance Management Chart engine.
//!
//! Turns a sparse `date -> load` map into a continuous per-day series of
//! {load, CTL, ATL, TSB}. Everything here is pure: no I/O, no shared state.
//!
//! The recurrence has no memory of anything before the first supplied day, so
//! early values are suppressed unless the caller hands in enough warm-up
//! history. [`lookback_days`] gives the history a report needs; callers must
//! fetch at least that much.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;

use crate::services::calibration::CalibrationParameters;

/// Default minimum history fetched for a PMC report, in days.
pub const DEFAULT_MIN_LOOKBACK_DAYS: i64 = 120;

/// How the recurrence state is initialised on the first day of a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SeriesSeed {
    /// The first day's scaled load becomes the initial CTL and ATL.
    #[default]
    FirstLoad,
    /// CTL and ATL start at zero and the first day runs through the recurrence.
    Zero,
}

impl FromStr for SeriesSeed {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "first_load" => Ok(SeriesSeed::FirstLoad),
            "zero" => Ok(SeriesSeed::Zero),
            other => Err(format!("unknown series seed '{}'", other)),
        }
    }
}

/// Model parameters for one run of the engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PmcParams {
    pub ctl_time_constant: f64,
    pub atl_time_constant: f64,
    pub load_scale: f64,
    pub seed: SeriesSeed,
}

impl PmcParams {
    pub fn from_calibration(params: &CalibrationParameters, seed: SeriesSeed) -> Self {
        Self {
            ctl_time_constant: params.ctl_time_constant_days,
            atl_time_constant: params.atl_time_constant_days,
            load_scale: params.load_scale_factor,
            seed,
        }
    }
}

/// One day of the continuous load series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DailyLoad {
    pub date: NaiveDate,
    pub load: f64,
}

/// One day of model output. `load` is the scaled load.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, ToSchema)]
pub struct PmcPoint {
    pub date: NaiveDate,
    pub load: f64,
    pub ctl: f64,
    pub atl: f64,
    pub tsb: f64,
}

/// EWMA coefficient for a time constant: k = 1 - e^(-1/τ).
pub fn smoothing_coefficient(time_constant: f64) -> f64 {
    if time_constant <= 0.0 || !time_constant.is_finite() {
        return 1.0;
    }
    1.0 - (-1.0 / time_constant).exp()
}

/// History (in days) to fetch so a `requested_days` window is warmed up.
pub fn lookback_days(requested_days: i64, ctl_time_constant: f64, floor: i64) -> i64 {
    let warm_up = ctl_time_constant.max(0.0).ceil() as i64;
    (requested_days.max(0) + warm_up).max(floor)
}

/// Gap-fill `daily` from its first date through `end` (or its last date).
/// Missing days get load 0; negative and non-finite samples are clamped to 0.
pub fn continuous_loads(daily: &BTreeMap<NaiveDate, f64>, end: Option<NaiveDate>) -> Vec<DailyLoad> {
    let (Some((&first, _)), Some((&last, _))) = (daily.first_key_value(), daily.last_key_value())
    else {
        return Vec::new();
    };
    let end = end.unwrap_or(last);
    if end < first {
        return Vec::new();
    }

    let days = (end - first).num_days() + 1;
    let mut out = Vec::with_capacity(days as usize);
    let mut date = first;
    while date <= end {
        let load = daily
            .get(&date)
            .copied()
            .filter(|l| l.is_finite() && *l > 0.0)
            .unwrap_or(0.0);
        out.push(DailyLoad { date, load });
        date += Duration::days(1);
    }
    out
}

fn run_recurrence(loads: &[DailyLoad], params: &PmcParams) -> Vec<PmcPoint> {
    let k_ctl = smoothing_coefficient(params.ctl_time_constant);
    let k_atl = smoothing_coefficient(params.atl_time_constant);

    let mut ctl = 0.0;
    let mut atl = 0.0;
    let mut out = Vec::with_capacity(loads.len());

    for (i, day) in loads.iter().enumerate() {
        let scaled = day.load * params.load_scale;
        if i == 0 && params.seed == SeriesSeed::FirstLoad {
            ctl = scaled;
            atl = scaled;
        } else {
            ctl += k_ctl * (scaled - ctl);
            atl += k_atl * (scaled - atl);
        }
        out.push(PmcPoint {
            date: day.date,
            load: scaled,
            ctl,
            atl,
            tsb: ctl - atl,
        });
    }
    out
}

/// Continuous series from the first sample through `through`, or through the
/// last sample when `None`. Samples after `through` are ignored; rest days
/// after the last sample decay CTL and ATL.
pub fn compute_series(
    daily: &BTreeMap<NaiveDate, f64>,
    params: &PmcParams,
    through: Option<NaiveDate>,
) -> Vec<PmcPoint> {
    run_recurrence(&continuous_loads(daily, through), params)
}

/// Model state as of `date`, or `None` when `date` precedes all samples.
#[cfg(test)]
pub(crate) fn pmc_on(daily: &BTreeMap<NaiveDate, f64>, params: &PmcParams, date: NaiveDate) -> Option<PmcPoint> {
    compute_series(daily, params, Some(date))
        .last()
        .copied()
        .filter(|p| p.date == date)
}

/// Coarse form tier derived from TSB. Bands sit at +10, -10 and -30.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TsbStatus {
    /// Recovering or resting
    Fresh,
    /// Productive training
    Productive,
    /// Accumulating fatigue
    Fatigued,
    /// Going too hard
    Overreaching,
    NoData,
}

impl TsbStatus {
    pub fn from_tsb(tsb: f64) -> Self {
        if !tsb.is_finite() {
            TsbStatus::NoData
        } else if tsb > 10.0 {
            TsbStatus::Fresh
        } else if tsb > -10.0 {
            TsbStatus::Productive
        } else if tsb > -30.0 {
            TsbStatus::Fatigued
        } else {
            TsbStatus::Overreaching
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TsbStatus::Fresh => "Fresh - recovering/resting",
            TsbStatus::Productive => "Productive training",
            TsbStatus::Fatigued => "Fatigued - building load",
            TsbStatus::Overreaching => "Overreaching - going too hard",
            TsbStatus::NoData => "No data",
        }
    }
}

impl fmt::Display for TsbStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Finer-grained human description of form.
pub fn form_description(tsb: f64) -> &'static str {
    if tsb > 20.0 {
        "Peak form, well rested and ready to race"
    } else if tsb > 10.0 {
        "Fresh, good day for a hard effort"
    } else if tsb > 0.0 {
        "Prepared, balanced load and recovery"
    } else if tsb > -10.0 {
        "Moderately tired, normal training fatigue"
    } else if tsb > -25.0 {
        "Fatigued, consider an easier day"
    } else {
        "Overreaching, recovery strongly recommended"
    }
}
