use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use super::models::{CalibrationParamsRow, DailyHealthRow, ReferenceValueRow, WorkoutRow};

/// Parameters for inserting a new workout record.
pub struct InsertWorkoutParams {
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
}

/// Workouts with `start <= date <= end`, oldest first, in insertion order
/// within a day so that the first import of an activity wins deduplication.
pub async fn get_workouts_between(
    pool: &PgPool,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<WorkoutRow>, sqlx::Error> {
    sqlx::query_as::<_, WorkoutRow>(
        "SELECT id, external_id, date, start_time, name, workout_type, source,
                duration_minutes, avg_hr, max_hr, calories, distance_m,
                elevation_gain_m, effort_score, created_at
         FROM workouts
         WHERE date >= $1 AND date <= $2
         ORDER BY date, created_at",
    )
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await
}

/// Insert a new workout record (append-only).
pub async fn insert_workout(
    pool: &PgPool,
    params: InsertWorkoutParams,
) -> Result<WorkoutRow, sqlx::Error> {
    sqlx::query_as::<_, WorkoutRow>(
        "INSERT INTO workouts (
            id, external_id, date, start_time, name, workout_type, source,
            duration_minutes, avg_hr, max_hr, calories, distance_m,
            elevation_gain_m, effort_score, created_at
        ) VALUES (
            $1, $2, $3, $4, $5, $6, $7,
            $8, $9, $10, $11, $12, $13, $14, NOW()
        )
        RETURNING id, external_id, date, start_time, name, workout_type, source,
                  duration_minutes, avg_hr, max_hr, calories, distance_m,
                  elevation_gain_m, effort_score, created_at",
    )
    .bind(Uuid::new_v4())
    .bind(&params.external_id)
    .bind(params.date)
    .bind(params.start_time)
    .bind(&params.name)
    .bind(&params.workout_type)
    .bind(&params.source)
    .bind(params.duration_minutes)
    .bind(params.avg_hr)
    .bind(params.max_hr)
    .bind(params.calories)
    .bind(params.distance_m)
    .bind(params.elevation_gain_m)
    .bind(params.effort_score)
    .fetch_one(pool)
    .await
}

/// Latest health snapshot row for a date.
pub async fn get_daily_health(
    pool: &PgPool,
    date: NaiveDate,
) -> Result<Option<DailyHealthRow>, sqlx::Error> {
    sqlx::query_as::<_, DailyHealthRow>(
        "SELECT id, date, sleep_hours, hrv, resting_hr, steps, recovery_score,
                weight_kg, active_calories, basal_calories, total_calories, recorded_at
         FROM daily_health
         WHERE date = $1
         ORDER BY recorded_at DESC
         LIMIT 1",
    )
    .bind(date)
    .fetch_optional(pool)
    .await
}

/// Latest row per date for `start..=end`, oldest first.
pub async fn get_daily_health_between(
    pool: &PgPool,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<DailyHealthRow>, sqlx::Error> {
    sqlx::query_as::<_, DailyHealthRow>(
        "SELECT DISTINCT ON (date)
                id, date, sleep_hours, hrv, resting_hr, steps, recovery_score,
                weight_kg, active_calories, basal_calories, total_calories, recorded_at
         FROM daily_health
         WHERE date BETWEEN $1 AND $2
         ORDER BY date, recorded_at DESC",
    )
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await
}

/// Most recent health row on or before `date` that carries a weight.
pub async fn get_latest_weight(
    pool: &PgPool,
    on_or_before: NaiveDate,
) -> Result<Option<DailyHealthRow>, sqlx::Error> {
    sqlx::query_as::<_, DailyHealthRow>(
        "SELECT id, date, sleep_hours, hrv, resting_hr, steps, recovery_score,
                weight_kg, active_calories, basal_calories, total_calories, recorded_at
         FROM daily_health
         WHERE date <= $1 AND weight_kg IS NOT NULL
         ORDER BY date DESC, recorded_at DESC
         LIMIT 1",
    )
    .bind(on_or_before)
    .fetch_optional(pool)
    .await
}

/// All reference rows (including tombstones), optionally only those dated on
/// or after `since`.
pub async fn get_reference_values(
    pool: &PgPool,
    since: Option<NaiveDate>,
) -> Result<Vec<ReferenceValueRow>, sqlx::Error> {
    sqlx::query_as::<_, ReferenceValueRow>(
        "SELECT id, date, metric, value, deleted, recorded_at
         FROM reference_values
         WHERE $1::date IS NULL OR date >= $1
         ORDER BY date, metric, recorded_at",
    )
    .bind(since)
    .fetch_all(pool)
    .await
}

/// Append a reference value or tombstone.
pub async fn insert_reference_value(
    pool: &PgPool,
    date: NaiveDate,
    metric: &str,
    value: Option<Decimal>,
    deleted: bool,
    recorded_at: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO reference_values (id, date, metric, value, deleted, recorded_at)
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(Uuid::new_v4())
    .bind(date)
    .bind(metric)
    .bind(value)
    .bind(deleted)
    .bind(recorded_at)
    .execute(pool)
    .await?;
    Ok(())
}

/// The persisted calibration parameter blob, if one was ever saved.
pub async fn get_calibration_params(
    pool: &PgPool,
) -> Result<Option<CalibrationParamsRow>, sqlx::Error> {
    sqlx::query_as::<_, CalibrationParamsRow>(
        "SELECT params, updated_at FROM calibration_params WHERE id = 1",
    )
    .fetch_optional(pool)
    .await
}

/// Write the single calibration parameter blob.
pub async fn upsert_calibration_params(
    pool: &PgPool,
    params: &serde_json::Value,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO calibration_params (id, params, updated_at)
         VALUES (1, $1, NOW())
         ON CONFLICT (id) DO UPDATE SET params = EXCLUDED.params, updated_at = NOW()",
    )
    .bind(params)
    .execute(pool)
    .await?;
    Ok(())
}

/// Connectivity check.
pub async fn ping(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}
