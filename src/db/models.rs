use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::FromRow;
use uuid::Uuid;

/// One stored activity. Several rows may describe the same activity when it
/// was imported from more than one source; they are deduplicated on read.
#[derive(Debug, Clone, FromRow)]
#[allow(dead_code)] // All fields populated by FromRow; ids and audit timestamps are not read back
pub struct WorkoutRow {
    pub id: Uuid,
    pub external_id: Option<String>,
    pub date: NaiveDate,
    pub start_time: Option<DateTime<Utc>>,
    pub name: String,
    pub workout_type: String,
    pub source: String,
    pub duration_minutes: Option<Decimal>,
    pub avg_hr: Option<Decimal>,
    pub max_hr: Option<Decimal>,
    pub calories: Option<i32>,
    pub distance_m: Option<Decimal>,
    pub elevation_gain_m: Option<Decimal>,
    pub effort_score: Option<Decimal>,
    pub created_at: DateTime<Utc>,
}

/// Daily health snapshot (sleep, HRV, weight, calories).
#[derive(Debug, Clone, FromRow)]
#[allow(dead_code)] // All fields populated by FromRow; ids and audit timestamps are not read back
pub struct DailyHealthRow {
    pub id: Uuid,
    pub date: NaiveDate,
    pub sleep_hours: Option<Decimal>,
    pub hrv: Option<Decimal>,
    pub resting_hr: Option<Decimal>,
    pub steps: Option<i32>,
    pub recovery_score: Option<Decimal>,
    pub weight_kg: Option<Decimal>,
    pub active_calories: Option<Decimal>,
    pub basal_calories: Option<Decimal>,
    pub total_calories: Option<Decimal>,
    pub recorded_at: DateTime<Utc>,
}

/// A manual reference/override value. `deleted = true` rows are tombstones.
#[derive(Debug, Clone, FromRow)]
#[allow(dead_code)] // All fields populated by FromRow; ids and audit timestamps are not read back
pub struct ReferenceValueRow {
    pub id: Uuid,
    pub date: NaiveDate,
    pub metric: String,
    pub value: Option<Decimal>,
    pub deleted: bool,
    pub recorded_at: DateTime<Utc>,
}

/// The single persisted calibration parameter blob.
#[derive(Debug, Clone, FromRow)]
#[allow(dead_code)] // All fields populated by FromRow; ids and audit timestamps are not read back
pub struct CalibrationParamsRow {
    pub params: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}
