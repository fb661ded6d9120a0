//! In-memory index of recent workouts in front of the load store.
//!
//! Architecture:
//! - One snapshot of deduplicated records covering the last `window_days`,
//!   sorted most recent first. Queries filter the snapshot; they never
//!   re-query the store while it is usable.
//! - Population runs in a supervised background task. Its `JoinHandle` lives
//!   in the index state, so at most one task exists at a time and a task that
//!   died without reporting is noticed on the next request.
//! - Waiters block on a `watch` channel bumped after every population
//!   attempt, for at most the load ceiling measured from when loading began.
//!   Dropping a waiter never touches the task.
//!
//! Phases:
//!
//! ```text
//! Empty --request--> Loading --done--> Ready --ttl--> Stale --request--> Refreshing --done--> Ready
//!                       |                                                    |
//!                       +--failed--> Empty                      failed--> Stale (still served)
//! ```
//!
//! `invalidate` returns the index to Empty from any phase.

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use utoipa::ToSchema;

use crate::errors::AppError;
use crate::helpers::days_before;
use crate::services::records::{dedupe, sort_recent_first, WorkoutRecord};
use crate::services::store::LoadStore;

// ---------------------------------------------------------------------------
// Configuration and query types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct WorkoutIndexConfig {
    /// How long a populated snapshot counts as fresh.
    pub ttl: Duration,
    /// Longest a caller waits on a cold index before its `ColdPolicy` applies.
    pub load_ceiling: Duration,
    /// Days of history held in the index, at most `MAX_WINDOW_DAYS`.
    pub window_days: i64,
}

/// Upper bound on `WorkoutIndexConfig::window_days`.
pub const MAX_WINDOW_DAYS: i64 = 3650;

impl Default for WorkoutIndexConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(600),
            load_ceiling: Duration::from_secs(15),
            window_days: 365,
        }
    }
}

/// What a caller wants when the index is still cold after the load ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ColdPolicy {
    /// Query the store directly, unindexed.
    #[default]
    #[serde(alias = "direct")]
    DirectQuery,
    /// Return `StaleIndexTimeout` so the client retries shortly.
    #[serde(alias = "retry")]
    TryLater,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct WorkoutQuery {
    /// Only workouts on exactly this date.
    pub filter_date: Option<NaiveDate>,
    /// Only workouts on or before this date.
    pub before: Option<NaiveDate>,
    pub limit: Option<usize>,
}

impl WorkoutQuery {
    fn anchor(&self) -> Option<NaiveDate> {
        self.filter_date.or(self.before)
    }

    fn matches(&self, record: &WorkoutRecord) -> bool {
        self.filter_date.map_or(true, |d| record.date == d)
            && self.before.map_or(true, |d| record.date <= d)
    }

    /// Filter records already sorted most recent first.
    fn apply(&self, sorted: &[WorkoutRecord]) -> Vec<WorkoutRecord> {
        sorted
            .iter()
            .filter(|r| self.matches(r))
            .take(self.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Index state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum IndexPhase {
    Empty,
    Loading,
    Ready,
    Stale,
    Refreshing,
}

/// Snapshot of the index state, exposed via the cache status endpoint.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct IndexStatus {
    pub phase: IndexPhase,
    pub record_count: usize,
    pub coverage_start: Option<NaiveDate>,
    pub populated_at: Option<DateTime<Utc>>,
    pub age_secs: Option<u64>,
    pub loading_for_secs: Option<u64>,
    pub last_error: Option<String>,
    /// Successful populations since start
    pub populations: u64,
}

struct Snapshot {
    records: Vec<WorkoutRecord>,
    coverage_start: NaiveDate,
    loaded_at: Instant,
    populated_at: DateTime<Utc>,
}

#[derive(Default)]
struct IndexState {
    snapshot: Option<Arc<Snapshot>>,
    task: Option<JoinHandle<()>>,
    loading_since: Option<Instant>,
    last_error: Option<String>,
    populations: u64,
    /// Bumped by `invalidate`; a task from an older epoch never publishes.
    epoch: u64,
}

struct Inner {
    store: Arc<dyn LoadStore>,
    config: WorkoutIndexConfig,
    state: RwLock<IndexState>,
    attempts: watch::Sender<u64>,
}

enum Acquired {
    Ready(Arc<Snapshot>),
    Cold { loading_since: Instant },
}

/// Handle to the shared index. Cloning is cheap.
#[derive(Clone)]
pub struct WorkoutIndex {
    inner: Arc<Inner>,
}

impl WorkoutIndex {
    pub fn new(store: Arc<dyn LoadStore>, mut config: WorkoutIndexConfig) -> Self {
        config.window_days = config.window_days.clamp(1, MAX_WINDOW_DAYS);
        let (attempts, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                store,
                config,
                state: RwLock::new(IndexState::default()),
                attempts,
            }),
        }
    }

    fn today() -> NaiveDate {
        Utc::now().date_naive()
    }

    fn window_start(&self) -> NaiveDate {
        Self::today() - ChronoDuration::days(self.inner.config.window_days)
    }

    /// Workouts matching `query`, most recent first.
    pub async fn get(
        &self,
        query: &WorkoutQuery,
        policy: ColdPolicy,
    ) -> Result<Vec<WorkoutRecord>, AppError> {
        if query.anchor().is_some_and(|d| d < self.window_start()) {
            tracing::debug!("Workout index: {:?} predates coverage, querying store", query);
            return self.direct_query(query).await;
        }

        // Subscribe before inspecting state so a completion in between is not missed.
        let mut attempts = self.inner.attempts.subscribe();

        loop {
            let loading_since = match self.acquire().await {
                Acquired::Ready(snapshot) => return Ok(query.apply(&snapshot.records)),
                Acquired::Cold { loading_since } => loading_since,
            };

            let deadline = loading_since + self.inner.config.load_ceiling;
            let waited = tokio::time::timeout_at(deadline, attempts.changed()).await;
            if !matches!(waited, Ok(Ok(()))) {
                return self.cold_fallback(query, policy).await;
            }

            let state = self.inner.state.read().await;
            if let Some(snapshot) = &state.snapshot {
                return Ok(query.apply(&snapshot.records));
            }
            if state.task.is_none() {
                if let Some(err) = &state.last_error {
                    return Err(AppError::UpstreamUnavailable(err.clone()));
                }
            }
            // Invalidated mid-load: go round and start over.
        }
    }

    async fn cold_fallback(
        &self,
        query: &WorkoutQuery,
        policy: ColdPolicy,
    ) -> Result<Vec<WorkoutRecord>, AppError> {
        match policy {
            ColdPolicy::DirectQuery => {
                tracing::warn!(
                    "Workout index: still loading after {:?}, falling back to direct query",
                    self.inner.config.load_ceiling
                );
                self.direct_query(query).await
            }
            ColdPolicy::TryLater => {
                tracing::debug!("Workout index: still loading, asking caller to retry");
                Err(AppError::StaleIndexTimeout)
            }
        }
    }

    /// Unindexed store query, deduplicated and ordered like an index read.
    async fn direct_query(&self, query: &WorkoutQuery) -> Result<Vec<WorkoutRecord>, AppError> {
        let (start, end) = match (query.filter_date, query.before) {
            (Some(date), _) => (date, date),
            (None, Some(before)) => (
                days_before(before, self.inner.config.window_days)?,
                before,
            ),
            (None, None) => (self.window_start(), Self::today() + ChronoDuration::days(1)),
        };
        let mut records = dedupe(self.inner.store.workouts_between(start, end).await?);
        sort_recent_first(&mut records);
        Ok(query.apply(&records))
    }

    /// Fresh snapshot, or stale snapshot with a refresh started, or the
    /// instant the running (possibly just started) population began.
    async fn acquire(&self) -> Acquired {
        {
            let state = self.inner.state.read().await;
            if let Some(snapshot) = &state.snapshot {
                if snapshot.loaded_at.elapsed() < self.inner.config.ttl {
                    return Acquired::Ready(snapshot.clone());
                }
            }
        }

        let mut state = self.inner.state.write().await;
        self.reap_dead_task(&mut state);

        match state.snapshot.clone() {
            Some(snapshot) if snapshot.loaded_at.elapsed() < self.inner.config.ttl => {
                Acquired::Ready(snapshot)
            }
            Some(snapshot) => {
                if state.task.is_none() {
                    tracing::info!("Workout index: snapshot stale, refreshing in background");
                    self.spawn_population(&mut state);
                }
                Acquired::Ready(snapshot)
            }
            None => {
                if state.task.is_none() {
                    tracing::info!("Workout index: empty, starting population");
                    self.spawn_population(&mut state);
                }
                Acquired::Cold {
                    loading_since: state.loading_since.unwrap_or_else(Instant::now),
                }
            }
        }
    }

    /// A finished task always clears its own handle. One still present and
    /// finished panicked or was aborted.
    fn reap_dead_task(&self, state: &mut IndexState) {
        if state.task.as_ref().is_some_and(JoinHandle::is_finished) {
            tracing::error!("Workout index: population task ended without reporting");
            state.task = None;
            state.loading_since = None;
            state.last_error = Some("population task ended unexpectedly".to_string());
        }
    }

    fn spawn_population(&self, state: &mut IndexState) {
        let inner = self.inner.clone();
        let epoch = state.epoch;
        state.loading_since = Some(Instant::now());
        state.task = Some(tokio::spawn(populate(inner, epoch)));
    }

    /// Start populating without waiting (used at startup).
    pub async fn prefetch(&self) {
        let _ = self.acquire().await;
    }

    /// Drop the snapshot and any running population; the next read repopulates.
    pub async fn invalidate(&self) {
        {
            let mut state = self.inner.state.write().await;
            if let Some(task) = state.task.take() {
                task.abort();
            }
            state.snapshot = None;
            state.loading_since = None;
            state.last_error = None;
            state.epoch += 1;
        }
        self.inner.attempts.send_modify(|n| *n += 1);
        tracing::info!("Workout index: invalidated");
    }

    pub async fn status(&self) -> IndexStatus {
        let state = self.inner.state.read().await;
        let loading = state.task.as_ref().is_some_and(|t| !t.is_finished());
        let snapshot = state.snapshot.as_ref();
        let fresh = snapshot.is_some_and(|s| s.loaded_at.elapsed() < self.inner.config.ttl);

        let phase = match (snapshot.is_some(), fresh, loading) {
            (false, _, false) => IndexPhase::Empty,
            (false, _, true) => IndexPhase::Loading,
            (true, _, true) => IndexPhase::Refreshing,
            (true, true, false) => IndexPhase::Ready,
            (true, false, false) => IndexPhase::Stale,
        };

        IndexStatus {
            phase,
            record_count: snapshot.map_or(0, |s| s.records.len()),
            coverage_start: snapshot.map(|s| s.coverage_start),
            populated_at: snapshot.map(|s| s.populated_at),
            age_secs: snapshot.map(|s| s.loaded_at.elapsed().as_secs()),
            loading_for_secs: state
                .loading_since
                .filter(|_| loading)
                .map(|since| since.elapsed().as_secs()),
            last_error: state.last_error.clone(),
            populations: state.populations,
        }
    }
}

// ---------------------------------------------------------------------------
// Background population
// ---------------------------------------------------------------------------

async fn populate(inner: Arc<Inner>, epoch: u64) {
    let started = Instant::now();
    let today = WorkoutIndex::today();
    let start = today - ChronoDuration::days(inner.config.window_days);
    let result = inner
        .store
        .workouts_between(start, today + ChronoDuration::days(1))
        .await;

    {
        let mut state = inner.state.write().await;
        if state.epoch != epoch {
            return;
        }
        state.task = None;
        state.loading_since = None;

        match result {
            Ok(raw) => {
                let raw_count = raw.len();
                let mut records = dedupe(raw);
                sort_recent_first(&mut records);
                tracing::info!(
                    "Workout index: populated {} workouts ({} rows) in {:?}",
                    records.len(),
                    raw_count,
                    started.elapsed()
                );
                state.snapshot = Some(Arc::new(Snapshot {
                    records,
                    coverage_start: start,
                    loaded_at: Instant::now(),
                    populated_at: Utc::now(),
                }));
                state.last_error = None;
                state.populations += 1;
            }
            Err(e) => {
                tracing::warn!("Workout index: population failed: {}", e);
                state.last_error = Some(e.to_string());
            }
        }
    }

    inner.attempts.send_modify(|n| *n += 1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::records::tests::workout;
    use crate::services::store::fake::FakeStore;
    use tokio_test::{assert_err, assert_ok};

    const OP: &str = "workouts_between";

    fn days_ago(n: i64) -> String {
        (Utc::now().date_naive() - ChronoDuration::days(n)).to_string()
    }

    fn setup(records: Vec<WorkoutRecord>) -> (Arc<FakeStore>, WorkoutIndex) {
        let store = Arc::new(FakeStore::with_workouts(records));
        let index = WorkoutIndex::new(store.clone(), WorkoutIndexConfig::default());
        (store, index)
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_reads_within_ttl_hit_store_once() {
        let (store, index) = setup(vec![
            workout(&days_ago(1), "tempo"),
            workout(&days_ago(3), "long"),
        ]);

        let first = assert_ok!(index.get(&WorkoutQuery::default(), ColdPolicy::DirectQuery).await);
        tokio::time::advance(Duration::from_secs(120)).await;
        let second = assert_ok!(index.get(&WorkoutQuery::default(), ColdPolicy::DirectQuery).await);

        assert_eq!(
            serde_json::to_vec(&first).unwrap(),
            serde_json::to_vec(&second).unwrap()
        );
        assert_eq!(first.len(), 2);
        assert_eq!(store.calls(OP), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_cold_reads_start_one_population() {
        let (store, index) = setup(vec![workout(&days_ago(2), "easy")]);
        store.set_latency(OP, Duration::from_secs(3));

        let reads: Vec<_> = (0..10)
            .map(|_| {
                let index = index.clone();
                tokio::spawn(async move {
                    index
                        .get(&WorkoutQuery::default(), ColdPolicy::DirectQuery)
                        .await
                })
            })
            .collect();

        for read in futures::future::join_all(reads).await {
            assert_eq!(read.unwrap().unwrap().len(), 1);
        }
        assert_eq!(store.calls(OP), 1);
        assert_eq!(index.status().await.populations, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_snapshot_served_while_refreshing() {
        let (store, index) = setup(vec![workout(&days_ago(2), "old")]);
        assert_ok!(index.get(&WorkoutQuery::default(), ColdPolicy::DirectQuery).await);

        tokio::time::advance(Duration::from_secs(601)).await;
        store.set_latency(OP, Duration::from_secs(5));
        store.workouts.lock().unwrap().push(workout(&days_ago(0), "new"));

        let started = Instant::now();
        let stale = assert_ok!(index.get(&WorkoutQuery::default(), ColdPolicy::DirectQuery).await);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(stale.len(), 1);
        assert_eq!(index.status().await.phase, IndexPhase::Refreshing);

        tokio::time::sleep(Duration::from_secs(6)).await;
        let fresh = assert_ok!(index.get(&WorkoutQuery::default(), ColdPolicy::DirectQuery).await);
        assert_eq!(fresh.len(), 2);
        assert_eq!(fresh[0].name, "new");
        assert_eq!(store.calls(OP), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_population_falls_back_to_direct_query() {
        let (store, index) = setup(vec![workout(&days_ago(1), "run")]);
        store.set_latency(OP, Duration::from_secs(30));

        let started = Instant::now();
        let records = assert_ok!(index.get(&WorkoutQuery::default(), ColdPolicy::DirectQuery).await);
        assert_eq!(records.len(), 1);
        assert!(started.elapsed() >= Duration::from_secs(15));
        assert_eq!(store.calls(OP), 2);

        // The population kept running and now serves reads.
        store.set_latency(OP, Duration::ZERO);
        assert_ok!(index.get(&WorkoutQuery::default(), ColdPolicy::DirectQuery).await);
        assert_eq!(store.calls(OP), 2);
        assert_eq!(index.status().await.phase, IndexPhase::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_try_later_policy_and_population_survives_abandoned_wait() {
        let (store, index) = setup(vec![workout(&days_ago(1), "run")]);
        store.set_latency(OP, Duration::from_secs(30));

        let abandoned = tokio::time::timeout(
            Duration::from_secs(1),
            index.get(&WorkoutQuery::default(), ColdPolicy::TryLater),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(index.status().await.phase, IndexPhase::Loading);

        let err = assert_err!(index.get(&WorkoutQuery::default(), ColdPolicy::TryLater).await);
        assert!(matches!(err, AppError::StaleIndexTimeout));

        tokio::time::sleep(Duration::from_secs(20)).await;
        let records = assert_ok!(index.get(&WorkoutQuery::default(), ColdPolicy::TryLater).await);
        assert_eq!(records.len(), 1);
        assert_eq!(store.calls(OP), 1);
    }

    #[tokio::test]
    async fn test_failed_population_surfaces_error_then_recovers() {
        let (store, index) = setup(vec![workout(&days_ago(1), "run")]);
        store.fail(OP);

        let err = assert_err!(index.get(&WorkoutQuery::default(), ColdPolicy::DirectQuery).await);
        assert!(matches!(err, AppError::UpstreamUnavailable(_)));
        let status = index.status().await;
        assert_eq!(status.phase, IndexPhase::Empty);
        assert!(status.last_error.is_some());

        store.recover(OP);
        let records = assert_ok!(index.get(&WorkoutQuery::default(), ColdPolicy::DirectQuery).await);
        assert_eq!(records.len(), 1);
        assert_eq!(store.calls(OP), 2);
    }

    #[tokio::test]
    async fn test_filters_order_and_dedup() {
        let mut dup = workout(&days_ago(2), "intervals");
        dup.external_id = Some("garmin:9".to_string());
        let mut dup_again = dup.clone();
        dup_again.source = "strava".to_string();
        dup_again.avg_hr = Some(161.0);

        let mut am = workout(&days_ago(5), "am");
        am.start_time = Some(Utc::now() - ChronoDuration::days(5) - ChronoDuration::hours(6));
        let mut pm = workout(&days_ago(5), "pm");
        pm.start_time = Some(Utc::now() - ChronoDuration::days(5));

        let (_, index) = setup(vec![dup, am, workout(&days_ago(9), "recovery"), pm, dup_again]);

        let all = assert_ok!(index.get(&WorkoutQuery::default(), ColdPolicy::DirectQuery).await);
        let names: Vec<&str> = all.iter().map(|w| w.name.as_str()).collect();
        assert_eq!(names, vec!["intervals", "pm", "am", "recovery"]);
        assert_eq!(all[0].avg_hr, Some(161.0));

        let exact = WorkoutQuery {
            filter_date: Some(days_ago(5).parse().unwrap()),
            ..WorkoutQuery::default()
        };
        let on_day = assert_ok!(index.get(&exact, ColdPolicy::DirectQuery).await);
        assert_eq!(on_day.len(), 2);

        let before = WorkoutQuery {
            before: Some(days_ago(4).parse().unwrap()),
            limit: Some(2),
            ..WorkoutQuery::default()
        };
        let limited = assert_ok!(index.get(&before, ColdPolicy::DirectQuery).await);
        let names: Vec<&str> = limited.iter().map(|w| w.name.as_str()).collect();
        assert_eq!(names, vec!["pm", "am"]);
    }

    #[tokio::test]
    async fn test_dates_older_than_window_bypass_index() {
        let (store, index) = setup(vec![workout(&days_ago(400), "ancient")]);
        let query = WorkoutQuery {
            filter_date: Some(days_ago(400).parse().unwrap()),
            ..WorkoutQuery::default()
        };

        let records = assert_ok!(index.get(&query, ColdPolicy::DirectQuery).await);
        assert_eq!(records.len(), 1);
        assert_eq!(store.calls(OP), 1);
        assert_eq!(index.status().await.populations, 0);
    }

    #[tokio::test]
    async fn test_invalidate_forces_repopulation() {
        let (store, index) = setup(vec![workout(&days_ago(1), "run")]);
        assert_ok!(index.get(&WorkoutQuery::default(), ColdPolicy::DirectQuery).await);

        store.workouts.lock().unwrap().push(workout(&days_ago(0), "ride"));
        index.invalidate().await;
        assert_eq!(index.status().await.phase, IndexPhase::Empty);

        let records = assert_ok!(index.get(&WorkoutQuery::default(), ColdPolicy::DirectQuery).await);
        assert_eq!(records.len(), 2);
        assert_eq!(store.calls(OP), 2);
    }

    #[tokio::test]
    async fn test_anchor_at_calendar_start_is_rejected_not_panicking() {
        let (store, index) = setup(vec![workout(&days_ago(1), "run")]);
        let query = WorkoutQuery {
            before: NaiveDate::MIN.succ_opt(),
            ..WorkoutQuery::default()
        };

        let result = index.get(&query, ColdPolicy::DirectQuery).await;
        assert!(matches!(result, Err(AppError::BadRequest(_))));
        assert_eq!(store.calls(OP), 0);
    }

    #[test]
    fn test_window_clamped() {
        let index = WorkoutIndex::new(
            Arc::new(FakeStore::default()),
            WorkoutIndexConfig {
                window_days: i64::MAX,
                ..WorkoutIndexConfig::default()
            },
        );
        assert_eq!(index.inner.config.window_days, MAX_WINDOW_DAYS);
    }
}
