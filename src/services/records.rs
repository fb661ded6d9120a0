//! Strongly-typed per-day records served by the core.
//!
//! Activities arrive from several importers and can overlap. Identity is the
//! `DedupKey`: the importer's external id when present, otherwise
//! (date, start_time, name, type). Overlapping rows are merged with
//! `WorkoutRecord::fill_missing_from`, never by ad hoc field checks.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use utoipa::ToSchema;

use crate::db::models::{DailyHealthRow, WorkoutRow};
use crate::helpers::opt_dec_to_f64;

/// A single recorded activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct WorkoutRecord {
    /// Calendar day the activity counts towards
    pub date: NaiveDate,
    /// Start time, when the source provides one
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    /// Activity title
    #[serde(default)]
    pub name: String,
    /// Sport / activity type (e.g. "Run", "Ride")
    #[serde(rename = "type", default = "default_workout_type")]
    pub workout_type: String,
    /// Importer that produced the record
    #[serde(default = "default_source")]
    pub source: String,
    /// Moving duration in minutes
    #[serde(default)]
    pub duration_minutes: Option<f64>,
    /// Average heart rate (bpm)
    #[serde(default)]
    pub avg_hr: Option<f64>,
    /// Maximum heart rate (bpm)
    #[serde(default)]
    pub max_hr: Option<f64>,
    /// Energy expenditure (kcal)
    #[serde(default)]
    pub calories: Option<i32>,
    /// Distance in metres
    #[serde(default)]
    pub distance_m: Option<f64>,
    /// Elevation gain in metres
    #[serde(default)]
    pub elevation_gain_m: Option<f64>,
    /// Primary effort metric (relative effort score)
    #[serde(default)]
    pub effort_score: Option<f64>,
    /// Identifier assigned by the originating platform
    #[serde(default)]
    pub external_id: Option<String>,
}

fn default_workout_type() -> String {
    "Workout".to_string()
}

fn default_source() -> String {
    "manual".to_string()
}

/// Identity of an activity across importers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DedupKey {
    External(String),
    Composite {
        date: NaiveDate,
        start_time: Option<DateTime<Utc>>,
        name: String,
        workout_type: String,
    },
}

impl WorkoutRecord {
    pub fn dedup_key(&self) -> DedupKey {
        match self.external_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => DedupKey::External(id.to_string()),
            _ => DedupKey::Composite {
                date: self.date,
                start_time: self.start_time,
                name: self.name.clone(),
                workout_type: self.workout_type.clone(),
            },
        }
    }

    /// Fill every absent measurement from `other`. Present values are kept.
    pub fn fill_missing_from(&mut self, other: &WorkoutRecord) {
        fn fill<T: Clone>(slot: &mut Option<T>, from: &Option<T>) {
            if slot.is_none() {
                slot.clone_from(from);
            }
        }

        fill(&mut self.start_time, &other.start_time);
        fill(&mut self.duration_minutes, &other.duration_minutes);
        fill(&mut self.avg_hr, &other.avg_hr);
        fill(&mut self.max_hr, &other.max_hr);
        fill(&mut self.calories, &other.calories);
        fill(&mut self.distance_m, &other.distance_m);
        fill(&mut self.elevation_gain_m, &other.elevation_gain_m);
        fill(&mut self.effort_score, &other.effort_score);
        fill(&mut self.external_id, &other.external_id);
        if self.name.is_empty() {
            self.name.clone_from(&other.name);
        }
    }
}

/// Collapse duplicates, keeping the first occurrence of each key and filling
/// its gaps from later occurrences. Relative order of survivors is preserved.
pub fn dedupe(records: Vec<WorkoutRecord>) -> Vec<WorkoutRecord> {
    let mut positions: HashMap<DedupKey, usize> = HashMap::with_capacity(records.len());
    let mut out: Vec<WorkoutRecord> = Vec::with_capacity(records.len());

    for record in records {
        match positions.get(&record.dedup_key()) {
            Some(&idx) => out[idx].fill_missing_from(&record),
            None => {
                positions.insert(record.dedup_key(), out.len());
                out.push(record);
            }
        }
    }

    out
}

/// Most recent first; same-day activities ordered by start time, latest first.
pub fn sort_recent_first(records: &mut [WorkoutRecord]) {
    records.sort_by(|a, b| {
        b.date
            .cmp(&a.date)
            .then_with(|| b.start_time.cmp(&a.start_time))
    });
}

impl From<WorkoutRow> for WorkoutRecord {
    fn from(row: WorkoutRow) -> Self {
        Self {
            date: row.date,
            start_time: row.start_time,
            name: row.name,
            workout_type: row.workout_type,
            source: row.source,
            duration_minutes: opt_dec_to_f64(row.duration_minutes),
            avg_hr: opt_dec_to_f64(row.avg_hr),
            max_hr: opt_dec_to_f64(row.max_hr),
            calories: row.calories,
            distance_m: opt_dec_to_f64(row.distance_m),
            elevation_gain_m: opt_dec_to_f64(row.elevation_gain_m),
            effort_score: opt_dec_to_f64(row.effort_score),
            external_id: row.external_id,
        }
    }
}

/// Recovery-related daily metrics.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct DailyHealth {
    pub date: NaiveDate,
    pub sleep_hours: Option<f64>,
    pub hrv: Option<f64>,
    pub resting_hr: Option<f64>,
    pub steps: Option<i32>,
    pub recovery_score: Option<f64>,
}

impl From<&DailyHealthRow> for DailyHealth {
    fn from(row: &DailyHealthRow) -> Self {
        Self {
            date: row.date,
            sleep_hours: opt_dec_to_f64(row.sleep_hours),
            hrv: opt_dec_to_f64(row.hrv),
            resting_hr: opt_dec_to_f64(row.resting_hr),
            steps: row.steps,
            recovery_score: opt_dec_to_f64(row.recovery_score),
        }
    }
}

/// Energy expenditure for one day (kcal).
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct DailyCalories {
    pub date: NaiveDate,
    pub active: Option<f64>,
    pub basal: Option<f64>,
    /// Stored total, or active + basal when only the parts are known
    pub total: Option<f64>,
}

impl DailyCalories {
    pub fn from_row(row: &DailyHealthRow) -> Option<Self> {
        let active = opt_dec_to_f64(row.active_calories);
        let basal = opt_dec_to_f64(row.basal_calories);
        let total = opt_dec_to_f64(row.total_calories).or(match (active, basal) {
            (Some(a), Some(b)) => Some(a + b),
            _ => None,
        });
        if active.is_none() && basal.is_none() && total.is_none() {
            return None;
        }
        Some(Self {
            date: row.date,
            active,
            basal,
            total,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum WeightSource {
    Manual,
    Measured,
}

/// Body weight reading with its provenance.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct WeightReading {
    pub date: NaiveDate,
    pub kg: f64,
    pub source: WeightSource,
}

/// Pick the weight to display: the most recent reading wins, and a manual
/// override wins over a measurement from the same day.
pub fn resolve_weight(
    manual: Option<WeightReading>,
    measured: Option<WeightReading>,
) -> Option<WeightReading> {
    match (manual, measured) {
        (Some(m), Some(s)) => {
            if s.date > m.date {
                Some(s)
            } else {
                Some(m)
            }
        }
        (m, s) => m.or(s),
    }
}
