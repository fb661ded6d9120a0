//! Per-activity training effort ("load") policies.
//!
//! The primary metric is the platform's relative-effort score. Activities
//! without one get a heart-rate/duration estimate. The estimate's constants
//! were fitted to a single athlete's history, so they sit behind the same
//! `EffortPolicy` interface as the primary metric and can be retuned or
//! swapped without touching aggregation.

use chrono::NaiveDate;
use std::collections::BTreeMap;

use crate::services::records::WorkoutRecord;

/// Produces a load for one activity, or `None` when the policy does not apply.
pub trait EffortPolicy: Send + Sync {
    fn effort(&self, workout: &WorkoutRecord) -> Option<f64>;
}

/// The recorded relative-effort score, when it is positive.
#[derive(Debug, Clone, Copy, Default)]
pub struct RelativeEffort;

impl EffortPolicy for RelativeEffort {
    fn effort(&self, workout: &WorkoutRecord) -> Option<f64> {
        workout
            .effort_score
            .filter(|score| score.is_finite() && *score > 0.0)
    }
}

/// Duration × intensity × heart-rate multiplier estimate.
#[derive(Debug, Clone)]
pub struct HeartRateDuration {
    pub resting_hr: f64,
    /// Upper bounds (exclusive) of the average-HR bands and the intensity for
    /// each; anything above the last bound gets `top_band_intensity`.
    pub hr_bands: Vec<(f64, f64)>,
    pub top_band_intensity: f64,
    /// Intensity when no heart rate was recorded at all.
    pub default_intensity: f64,
    /// HR at which the multiplier is exactly 1.0.
    pub multiplier_pivot_hr: f64,
}

impl Default for HeartRateDuration {
    fn default() -> Self {
        Self {
            resting_hr: 60.0,
            hr_bands: vec![(120.0, 0.6), (140.0, 0.8), (160.0, 1.0)],
            top_band_intensity: 1.2,
            default_intensity: 0.75,
            multiplier_pivot_hr: 100.0,
        }
    }
}

impl HeartRateDuration {
    /// Intensity factor from heart-rate reserve when max HR is known,
    /// otherwise from fixed average-HR bands.
    pub fn intensity(&self, avg_hr: Option<f64>, max_hr: Option<f64>) -> f64 {
        if let (Some(avg), Some(max)) = (avg_hr, max_hr) {
            let reserve = max - self.resting_hr;
            if reserve > 0.0 {
                return ((avg - self.resting_hr) / reserve).max(0.0);
            }
        }

        match avg_hr {
            Some(avg) => self
                .hr_bands
                .iter()
                .find(|(upper, _)| avg < *upper)
                .map(|(_, intensity)| *intensity)
                .unwrap_or(self.top_band_intensity),
            None => self.default_intensity,
        }
    }

    fn hr_multiplier(&self, avg_hr: Option<f64>) -> f64 {
        match avg_hr {
            Some(avg) => {
                (1.0 + (avg - self.multiplier_pivot_hr) / self.multiplier_pivot_hr).max(0.0)
            }
            None => 1.0,
        }
    }
}

impl EffortPolicy for HeartRateDuration {
    fn effort(&self, workout: &WorkoutRecord) -> Option<f64> {
        let minutes = workout
            .duration_minutes
            .filter(|m| m.is_finite() && *m > 0.0)?;
        let avg_hr = workout.avg_hr.filter(|hr| *hr > 0.0);
        let max_hr = workout.max_hr.filter(|hr| *hr > 0.0);

        Some(minutes * self.intensity(avg_hr, max_hr) * self.hr_multiplier(avg_hr))
    }
}

/// Tries each policy in order; the first that applies decides.
pub struct EffortChain {
    policies: Vec<Box<dyn EffortPolicy>>,
}

impl EffortChain {
    pub fn new(policies: Vec<Box<dyn EffortPolicy>>) -> Self {
        Self { policies }
    }

    pub fn load_for(&self, workout: &WorkoutRecord) -> f64 {
        self.policies
            .iter()
            .find_map(|p| p.effort(workout))
            .unwrap_or(0.0)
    }

    /// Sum activity loads per calendar day. Days whose total is not positive
    /// are left out; the PMC engine gap-fills them with zero.
    pub fn daily_loads(&self, workouts: &[WorkoutRecord]) -> BTreeMap<NaiveDate, f64> {
        let mut by_date: BTreeMap<NaiveDate, f64> = BTreeMap::new();
        for workout in workouts {
            *by_date.entry(workout.date).or_insert(0.0) += self.load_for(workout);
        }
        by_date.retain(|_, load| *load > 0.0);
        by_date
    }
}

impl Default for EffortChain {
    fn default() -> Self {
        Self::new(vec![
            Box::new(RelativeEffort),
            Box::new(HeartRateDuration::default()),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::records::tests::workout;

    #[test]
    fn test_relative_effort_used_when_present() {
        let mut w = workout("2024-01-01", "run");
        w.effort_score = Some(87.0);
        w.avg_hr = Some(150.0);
        assert_eq!(EffortChain::default().load_for(&w), 87.0);
    }

    #[test]
    fn test_zero_effort_score_falls_back_to_heart_rate() {
        let mut w = workout("2024-01-01", "run");
        w.effort_score = Some(0.0);
        w.duration_minutes = Some(60.0);
        w.avg_hr = Some(130.0);
        // band intensity 0.8, multiplier 1.3 -> 60 * 0.8 * 1.3
        let load = EffortChain::default().load_for(&w);
        assert!((load - 62.4).abs() < 1e-9, "got {}", load);
    }

    #[test]
    fn test_heart_rate_reserve_intensity() {
        let policy = HeartRateDuration::default();
        // (150 - 60) / (180 - 60) = 0.75
        assert!((policy.intensity(Some(150.0), Some(180.0)) - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_hr_bands_and_default_intensity() {
        let policy = HeartRateDuration::default();
        assert_eq!(policy.intensity(Some(110.0), None), 0.6);
        assert_eq!(policy.intensity(Some(150.0), None), 1.0);
        assert_eq!(policy.intensity(Some(175.0), None), 1.2);
        assert_eq!(policy.intensity(None, None), 0.75);
    }

    #[test]
    fn test_no_duration_means_no_estimate() {
        let mut w = workout("2024-01-01", "strength");
        w.duration_minutes = None;
        w.avg_hr = Some(120.0);
        assert_eq!(HeartRateDuration::default().effort(&w), None);
        assert_eq!(EffortChain::default().load_for(&w), 0.0);
    }

    #[test]
    fn test_daily_loads_sum_same_day() {
        let mut a = workout("2024-01-01", "am");
        a.effort_score = Some(40.0);
        let mut b = workout("2024-01-01", "pm");
        b.effort_score = Some(25.0);
        let mut c = workout("2024-01-03", "run");
        c.effort_score = Some(10.0);
        let mut rest = workout("2024-01-02", "walk");
        rest.duration_minutes = None;

        let loads = EffortChain::default().daily_loads(&[a, b, c, rest]);
        assert_eq!(loads.len(), 2);
        assert_eq!(loads[&"2024-01-01".parse::<NaiveDate>().unwrap()], 65.0);
        assert_eq!(loads[&"2024-01-03".parse::<NaiveDate>().unwrap()], 10.0);
    }
}
