//! Recovery metrics over time: the per-day health series, its trends, and the
//! daily training recommendation derived from recovery and training load.
//!
//! The series is read with one range query and cached per (date, days) for a
//! TTL. Trends are computed from the cached series.

use chrono::NaiveDate;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use utoipa::ToSchema;

use crate::errors::AppError;
use crate::helpers::{days_before, round_1dp};
use crate::services::cache::TtlCache;
use crate::services::performance::PmcService;
use crate::services::records::DailyHealth;
use crate::services::store::LoadStore;

/// Trailing values averaged for the weekly figures.
const WEEK: usize = 7;

/// Weekly average HRV above which the athlete is considered ready to build.
const BUILD_HRV_THRESHOLD: f64 = 35.0;

/// PMC window used for the ATL/CTL ratio behind a recommendation.
const RECOMMENDATION_PMC_WINDOW_DAYS: i64 = 42;

/// Per-day recovery metrics, one entry per recorded day, oldest first.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct HealthHistory {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub dates: Vec<NaiveDate>,
    pub hrv: Vec<Option<f64>>,
    pub resting_hr: Vec<Option<f64>>,
    pub sleep_hours: Vec<Option<f64>>,
    pub recovery_score: Vec<Option<f64>>,
}

impl HealthHistory {
    fn from_days(start: NaiveDate, end: NaiveDate, days: &[DailyHealth]) -> Self {
        Self {
            start,
            end,
            dates: days.iter().map(|d| d.date).collect(),
            hrv: days.iter().map(|d| d.hrv).collect(),
            resting_hr: days.iter().map(|d| d.resting_hr).collect(),
            sleep_hours: days.iter().map(|d| d.sleep_hours).collect(),
            recovery_score: days.iter().map(|d| d.recovery_score).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Up,
    Down,
    Flat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TrainingStatus {
    Build,
    Recovery,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct HealthTrends {
    pub date: NaiveDate,
    pub days: i64,
    /// First versus last recorded HRV; absent with fewer than two readings
    pub hrv_trend: Option<Direction>,
    pub resting_hr_trend: Option<Direction>,
    /// Mean of the last seven readings; absent with fewer than seven
    pub weekly_avg_hrv: Option<f64>,
    pub weekly_avg_sleep: Option<f64>,
    pub training_status: TrainingStatus,
}

impl HealthTrends {
    pub fn from_history(date: NaiveDate, days: i64, history: &HealthHistory) -> Self {
        let weekly_avg_hrv = weekly_average(&history.hrv);
        let training_status = match weekly_avg_hrv {
            Some(hrv) if hrv > BUILD_HRV_THRESHOLD => TrainingStatus::Build,
            _ => TrainingStatus::Recovery,
        };
        Self {
            date,
            days,
            hrv_trend: direction(&history.hrv),
            resting_hr_trend: direction(&history.resting_hr),
            weekly_avg_hrv,
            weekly_avg_sleep: weekly_average(&history.sleep_hours),
            training_status,
        }
    }
}

fn direction(values: &[Option<f64>]) -> Option<Direction> {
    let mut present = values.iter().flatten();
    let first = *present.next()?;
    let last = *present.last()?;
    Some(if last > first {
        Direction::Up
    } else if last < first {
        Direction::Down
    } else {
        Direction::Flat
    })
}

fn weekly_average(values: &[Option<f64>]) -> Option<f64> {
    let present: Vec<f64> = values.iter().flatten().copied().collect();
    if present.len() < WEEK {
        return None;
    }
    let week = &present[present.len() - WEEK..];
    Some(round_1dp(week.iter().sum::<f64>() / WEEK as f64))
}

/// Training intensity tier for the day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Intensity {
    High,
    Moderate,
    Easy,
    Rest,
}

impl Intensity {
    pub fn from_recovery(score: u8) -> Self {
        match score {
            85.. => Intensity::High,
            70..=84 => Intensity::Moderate,
            50..=69 => Intensity::Easy,
            _ => Intensity::Rest,
        }
    }

    fn message(self) -> &'static str {
        match self {
            Intensity::High => "Recovery is complete. A good day for hard efforts.",
            Intensity::Moderate => "Good to train, but keep it aerobic.",
            Intensity::Easy => "Recovery needed. Easy movement only.",
            Intensity::Rest => "Full rest day.",
        }
    }

    fn session(self) -> Option<Session> {
        let (duration_minutes, zone) = match self {
            Intensity::High => (45, "3-4"),
            Intensity::Moderate => (40, "2"),
            Intensity::Easy => (20, "1"),
            Intensity::Rest => return None,
        };
        Some(Session {
            duration_minutes,
            zone: zone.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct Session {
    pub duration_minutes: u32,
    /// Heart-rate zone range
    pub zone: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct Recommendation {
    pub date: NaiveDate,
    /// 0-100
    pub recovery: u8,
    pub intensity: Intensity,
    pub message: String,
    pub session: Option<Session>,
    /// ATL / CTL; absent while CTL is zero
    pub load_ratio: Option<f64>,
    /// Whether a health record existed for the date
    pub health_recorded: bool,
}

/// Weighted recovery score, 0-100. Missing inputs fall back to neutral
/// values: HRV 40, sleep 7 h, resting HR 60, load ratio 1.0.
pub fn recovery_score(health: Option<&DailyHealth>, load_ratio: Option<f64>) -> u8 {
    let hrv = health.and_then(|h| h.hrv).unwrap_or(40.0);
    let sleep = health.and_then(|h| h.sleep_hours).unwrap_or(7.0);
    let resting_hr = health.and_then(|h| h.resting_hr).unwrap_or(60.0);
    let load = load_ratio.filter(|r| r.is_finite()).unwrap_or(1.0);

    let points = at_least(hrv, &[(55.0, 100), (45.0, 80), (35.0, 60), (25.0, 40)], 20) * 35
        + at_least(sleep, &[(8.0, 100), (7.0, 85), (6.0, 60), (5.0, 40)], 20) * 30
        + at_most(resting_hr, &[(50.0, 100), (55.0, 85), (60.0, 70), (70.0, 50)], 30) * 20
        + at_most(load, &[(0.8, 100), (1.0, 80), (1.2, 60), (1.5, 40)], 20) * 15;
    // Weights sum to 100, so this is the truncated weighted mean.
    (points / 100).min(100) as u8
}

fn at_least(value: f64, steps: &[(f64, u32)], floor: u32) -> u32 {
    steps
        .iter()
        .find(|(threshold, _)| value >= *threshold)
        .map_or(floor, |(_, points)| *points)
}

fn at_most(value: f64, steps: &[(f64, u32)], floor: u32) -> u32 {
    steps
        .iter()
        .find(|(threshold, _)| value <= *threshold)
        .map_or(floor, |(_, points)| *points)
}

pub struct WellnessService {
    store: Arc<dyn LoadStore>,
    pmc: Arc<PmcService>,
    cache: TtlCache<(NaiveDate, i64), Arc<HealthHistory>>,
}

impl WellnessService {
    pub fn new(store: Arc<dyn LoadStore>, pmc: Arc<PmcService>, cache_ttl: Duration) -> Self {
        Self {
            store,
            pmc,
            cache: TtlCache::new(cache_ttl),
        }
    }

    pub async fn invalidate(&self) {
        self.cache.invalidate_all().await;
    }

    pub async fn cached_histories(&self) -> usize {
        self.cache.len().await
    }

    /// Recorded days in the `days`-long window ending at `date`.
    pub async fn history(&self, date: NaiveDate, days: i64) -> Result<Arc<HealthHistory>, AppError> {
        let start = days_before(date, days - 1)?;
        self.cache
            .get_or_try_insert_with((date, days), || async move {
                let rows = self.store.daily_health_between(start, date).await?;
                tracing::debug!("Health history {}..={}: {} days recorded", start, date, rows.len());
                Ok::<_, AppError>(Arc::new(HealthHistory::from_days(start, date, &rows)))
            })
            .await
    }

    pub async fn trends(&self, date: NaiveDate, days: i64) -> Result<HealthTrends, AppError> {
        let history = self.history(date, days).await?;
        Ok(HealthTrends::from_history(date, days, &history))
    }

    pub async fn recommendation(&self, date: NaiveDate) -> Result<Recommendation, AppError> {
        let (health, report) = tokio::try_join!(
            async { self.store.daily_health(date).await.map_err(AppError::from) },
            self.pmc.report(date, RECOMMENDATION_PMC_WINDOW_DAYS),
        )?;
        let load_ratio = (report.ctl > 0.0).then(|| round_1dp(report.atl / report.ctl));
        let recovery = recovery_score(health.as_ref(), load_ratio);
        let intensity = Intensity::from_recovery(recovery);
        Ok(Recommendation {
            date,
            recovery,
            intensity,
            message: intensity.message().to_string(),
            session: intensity.session(),
            load_ratio,
            health_recorded: health.is_some(),
        })
    }
}
