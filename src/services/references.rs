//! Manual reference / override values.
//!
//! The store is append-only, so a value is never updated or removed in place.
//! Every write appends a row; a delete appends a tombstone (`deleted = true`).
//! For each (date, metric) the most recently recorded row decides the outcome.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;

use crate::db::models::ReferenceValueRow;
use crate::helpers::opt_dec_to_f64;
use crate::services::calibration::ReferencePoint;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceMetric {
    Ctl,
    Atl,
    Weight,
}

impl ReferenceMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceMetric::Ctl => "ctl",
            ReferenceMetric::Atl => "atl",
            ReferenceMetric::Weight => "weight",
        }
    }

    /// Whether values of this metric drive calibration.
    pub fn is_training_load(&self) -> bool {
        matches!(self, ReferenceMetric::Ctl | ReferenceMetric::Atl)
    }
}

impl fmt::Display for ReferenceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown reference metric '{0}' (expected ctl, atl or weight)")]
pub struct UnknownMetric(pub String);

impl FromStr for ReferenceMetric {
    type Err = UnknownMetric;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ctl" => Ok(ReferenceMetric::Ctl),
            "atl" => Ok(ReferenceMetric::Atl),
            "weight" => Ok(ReferenceMetric::Weight),
            other => Err(UnknownMetric(other.to_string())),
        }
    }
}

/// One appended reference row, as stored.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceValue {
    pub date: NaiveDate,
    pub metric: ReferenceMetric,
    pub value: Option<f64>,
    pub deleted: bool,
    pub recorded_at: DateTime<Utc>,
}

impl ReferenceValue {
    pub fn tombstone(date: NaiveDate, metric: ReferenceMetric) -> Self {
        Self {
            date,
            metric,
            value: None,
            deleted: true,
            recorded_at: Utc::now(),
        }
    }

    pub fn new(date: NaiveDate, metric: ReferenceMetric, value: f64) -> Self {
        Self {
            date,
            metric,
            value: Some(value),
            deleted: false,
            recorded_at: Utc::now(),
        }
    }
}

impl TryFrom<ReferenceValueRow> for ReferenceValue {
    type Error = UnknownMetric;

    fn try_from(row: ReferenceValueRow) -> Result<Self, Self::Error> {
        Ok(Self {
            date: row.date,
            metric: row.metric.parse()?,
            value: opt_dec_to_f64(row.value),
            deleted: row.deleted,
            recorded_at: row.recorded_at,
        })
    }
}

/// A live (non-deleted) reference value after tombstone resolution.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ResolvedReference {
    pub date: NaiveDate,
    pub metric: ReferenceMetric,
    pub value: f64,
    pub recorded_at: DateTime<Utc>,
}

/// Resolve appended rows into the current set of live values, ordered by
/// (date, metric).
pub fn resolve_latest(values: &[ReferenceValue]) -> Vec<ResolvedReference> {
    let mut latest: BTreeMap<(NaiveDate, ReferenceMetric), &ReferenceValue> = BTreeMap::new();
    for value in values {
        let key = (value.date, value.metric);
        match latest.get(&key) {
            Some(existing) if existing.recorded_at > value.recorded_at => {}
            _ => {
                latest.insert(key, value);
            }
        }
    }

    latest
        .into_values()
        .filter(|v| !v.deleted)
        .filter_map(|v| {
            v.value.map(|value| ResolvedReference {
                date: v.date,
                metric: v.metric,
                value,
                recorded_at: v.recorded_at,
            })
        })
        .collect()
}

/// Group live CTL/ATL values by date into calibration reference points.
pub fn reference_points(resolved: &[ResolvedReference]) -> Vec<ReferencePoint> {
    let mut by_date: BTreeMap<NaiveDate, ReferencePoint> = BTreeMap::new();
    for r in resolved.iter().filter(|r| r.metric.is_training_load()) {
        let point = by_date.entry(r.date).or_insert(ReferencePoint {
            date: r.date,
            ctl: None,
            atl: None,
        });
        match r.metric {
            ReferenceMetric::Ctl => point.ctl = Some(r.value),
            ReferenceMetric::Atl => point.atl = Some(r.value),
            ReferenceMetric::Weight => {}
        }
    }
    by_date.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn at(date: &str, metric: ReferenceMetric, value: Option<f64>, secs: i64) -> ReferenceValue {
        ReferenceValue {
            date: date.parse().unwrap(),
            metric,
            value,
            deleted: value.is_none(),
            recorded_at: "2024-01-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap()
                + Duration::seconds(secs),
        }
    }

    #[test]
    fn test_metric_parse_round_trip() {
        for metric in [
            ReferenceMetric::Ctl,
            ReferenceMetric::Atl,
            ReferenceMetric::Weight,
        ] {
            assert_eq!(metric.as_str().parse::<ReferenceMetric>().unwrap(), metric);
        }
        assert_eq!(" CTL ".parse::<ReferenceMetric>().unwrap(), ReferenceMetric::Ctl);
        assert!("tsb".parse::<ReferenceMetric>().is_err());
    }

    #[test]
    fn test_latest_write_wins() {
        let values = vec![
            at("2024-02-01", ReferenceMetric::Ctl, Some(40.0), 0),
            at("2024-02-01", ReferenceMetric::Ctl, Some(44.0), 10),
        ];
        let resolved = resolve_latest(&values);
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].value, 44.0);
    }

    #[test]
    fn test_tombstone_hides_value() {
        let values = vec![
            at("2024-02-01", ReferenceMetric::Ctl, Some(40.0), 0),
            at("2024-02-01", ReferenceMetric::Ctl, None, 10),
            at("2024-02-01", ReferenceMetric::Atl, Some(30.0), 5),
        ];
        let resolved = resolve_latest(&values);
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].metric, ReferenceMetric::Atl);
    }

    #[test]
    fn test_rewrite_after_tombstone_revives_value() {
        let values = vec![
            at("2024-02-01", ReferenceMetric::Weight, Some(70.0), 0),
            at("2024-02-01", ReferenceMetric::Weight, None, 10),
            at("2024-02-01", ReferenceMetric::Weight, Some(69.5), 20),
        ];
        let resolved = resolve_latest(&values);
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].value, 69.5);
    }

    #[test]
    fn test_reference_points_group_by_date_and_skip_weight() {
        let values = vec![
            at("2024-02-01", ReferenceMetric::Ctl, Some(40.0), 0),
            at("2024-02-01", ReferenceMetric::Atl, Some(35.0), 0),
            at("2024-02-08", ReferenceMetric::Atl, Some(50.0), 0),
            at("2024-02-09", ReferenceMetric::Weight, Some(70.0), 0),
        ];
        let points = reference_points(&resolve_latest(&values));
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].ctl, Some(40.0));
        assert_eq!(points[0].atl, Some(35.0));
        assert_eq!(points[1].ctl, None);
        assert_eq!(points[1].atl, Some(50.0));
    }
}
