//! Per-sensor log retrieval with supersession, cancellation and progress.
//!
//! Fetches are keyed by sensor and [`FetchKind`]. Every new fetch intent for
//! a key mints a fresh [`Generation`] and aborts whatever that key had in
//! flight. Only the holder of the latest generation may touch shared state;
//! late results from older generations are dropped however they arrive.

use crate::cache::DayCache;
use crate::clock::TimeRange;
use crate::telemetry::{Reading, SensorId, TelemetrySource};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use time::UtcOffset;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub mod abort;
pub mod owner;

use abort::{AbortController, AbortSignal};

/// What a log fetch is for. Each kind has its own generation line per
/// sensor, so an index window never supersedes an open details view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchKind {
    Details,
    Aqi,
}

type SessionKey = (SensorId, FetchKind);

/// Opaque, monotonically increasing fetch-intent token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum LoadState {
    Idle,
    Loading,
    Progress { percent: u8 },
    Done,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    pub total_days: u32,
    pub loaded_days: u32,
    pub cached_days: u32,
}

impl ProgressEvent {
    pub fn percent(&self) -> u8 {
        if self.total_days == 0 {
            return 100;
        }
        let ratio = f64::from(self.loaded_days) / f64::from(self.total_days);
        (ratio * 100.0).round().clamp(0.0, 100.0) as u8
    }
}

/// How a fetch ended for its caller.
#[derive(Debug, Clone, PartialEq)]
pub enum LogsOutcome {
    /// Logs for the requested range; may be empty.
    Loaded(Vec<Reading>),
    /// Superseded or cancelled before completion; nothing was applied.
    NotLoaded,
    /// Upstream failure; previously loaded logs stay in place.
    Failed,
}

/// Cache qualifier for one day slice of raw logs.
pub fn logs_qualifier(range: TimeRange) -> String {
    format!("logs:{}-{}", range.start, range.end)
}

#[derive(Debug)]
struct Session {
    generation: Option<Generation>,
    range: Option<TimeRange>,
    abort: Option<AbortController>,
    state_tx: watch::Sender<LoadState>,
    progress_tx: watch::Sender<Option<ProgressEvent>>,
    logs: Option<Vec<Reading>>,
}

impl Session {
    fn new() -> Self {
        let (state_tx, _state_rx) = watch::channel(LoadState::Idle);
        let (progress_tx, _progress_rx) = watch::channel(None);
        Self {
            generation: None,
            range: None,
            abort: None,
            state_tx,
            progress_tx,
            logs: None,
        }
    }

    fn is_current(&self, generation: Generation) -> bool {
        self.generation == Some(generation)
    }

    /// Nothing in flight and nobody watching.
    fn is_idle(&self) -> bool {
        self.abort.is_none()
            && self.state_tx.receiver_count() == 0
            && self.progress_tx.receiver_count() == 0
    }
}

pub struct LogCoordinator<S> {
    source: Arc<S>,
    cache: Arc<DayCache>,
    offset: UtcOffset,
    next_generation: AtomicU64,
    sessions: Mutex<HashMap<SessionKey, Session>>,
}

impl<S: TelemetrySource> LogCoordinator<S> {
    pub fn new(source: Arc<S>, cache: Arc<DayCache>, offset: UtcOffset) -> Self {
        Self {
            source,
            cache,
            offset,
            next_generation: AtomicU64::new(1),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<SessionKey, Session>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_session<R>(
        &self,
        sensor_id: &str,
        kind: FetchKind,
        f: impl FnOnce(&mut Session) -> R,
    ) -> R {
        let mut sessions = self.sessions();
        let session = sessions
            .entry((sensor_id.to_string(), kind))
            .or_insert_with(Session::new);
        f(session)
    }

    fn update_session<R>(
        &self,
        sensor_id: &str,
        kind: FetchKind,
        f: impl FnOnce(&mut Session) -> R,
    ) -> Option<R> {
        self.sessions().get_mut(&(sensor_id.to_string(), kind)).map(f)
    }

    fn read_session<R>(
        &self,
        sensor_id: &str,
        kind: FetchKind,
        f: impl FnOnce(&Session) -> R,
    ) -> Option<R> {
        self.sessions().get(&(sensor_id.to_string(), kind)).map(f)
    }

    pub fn subscribe_state(&self, sensor_id: &str, kind: FetchKind) -> watch::Receiver<LoadState> {
        self.with_session(sensor_id, kind, |session| session.state_tx.subscribe())
    }

    pub fn subscribe_progress(
        &self,
        sensor_id: &str,
        kind: FetchKind,
    ) -> watch::Receiver<Option<ProgressEvent>> {
        self.with_session(sensor_id, kind, |session| session.progress_tx.subscribe())
    }

    pub fn state(&self, sensor_id: &str, kind: FetchKind) -> LoadState {
        self.read_session(sensor_id, kind, |session| *session.state_tx.borrow())
            .unwrap_or(LoadState::Idle)
    }

    /// Latest progress event of the key's current or last fetch.
    pub fn progress(&self, sensor_id: &str, kind: FetchKind) -> Option<ProgressEvent> {
        self.read_session(sensor_id, kind, |session| *session.progress_tx.borrow())
            .flatten()
    }

    /// Last successfully loaded logs for the key.
    pub fn last_logs(&self, sensor_id: &str, kind: FetchKind) -> Option<Vec<Reading>> {
        self.read_session(sensor_id, kind, |session| session.logs.clone())
            .flatten()
    }

    pub fn current_range(&self, sensor_id: &str, kind: FetchKind) -> Option<TimeRange> {
        self.read_session(sensor_id, kind, |session| session.range)
            .flatten()
    }

    pub fn is_current(&self, sensor_id: &str, kind: FetchKind, generation: Generation) -> bool {
        self.read_session(sensor_id, kind, |session| session.is_current(generation))
            .unwrap_or(false)
    }

    /// Number of sessions held in memory.
    pub fn session_count(&self) -> usize {
        self.sessions().len()
    }

    /// Start a new fetch intent: mint a token, abort the key's previous one.
    ///
    /// Settled sessions of other keys that nobody subscribes to are dropped
    /// here, so the session map only holds what is live or watched.
    pub fn begin(&self, sensor_id: &str, kind: FetchKind, range: TimeRange) -> (Generation, AbortSignal) {
        let generation = Generation(self.next_generation.fetch_add(1, Ordering::SeqCst));
        let controller = AbortController::new();
        let signal = controller.signal();
        let key = (sensor_id.to_string(), kind);
        let mut sessions = self.sessions();
        let before = sessions.len();
        sessions.retain(|other, session| *other == key || !session.is_idle());
        let swept = before - sessions.len();
        if swept > 0 {
            debug!(swept, "Dropped idle fetch sessions");
        }
        let session = sessions.entry(key).or_insert_with(Session::new);
        if let Some(previous) = session.abort.replace(controller) {
            previous.abort();
        }
        session.generation = Some(generation);
        session.range = Some(range);
        session.progress_tx.send_replace(None);
        session.state_tx.send_replace(LoadState::Loading);
        (generation, signal)
    }

    /// Abort the key's in-flight fetch, e.g. when a details view closes.
    /// An unobserved session is forgotten entirely.
    pub fn cancel(&self, sensor_id: &str, kind: FetchKind) {
        let key = (sensor_id.to_string(), kind);
        let mut sessions = self.sessions();
        let Some(session) = sessions.get_mut(&key) else {
            return;
        };
        if let Some(controller) = session.abort.take() {
            controller.abort();
        }
        session.generation = None;
        if matches!(
            *session.state_tx.borrow(),
            LoadState::Loading | LoadState::Progress { .. }
        ) {
            session.state_tx.send_replace(LoadState::Idle);
        }
        if session.is_idle() {
            sessions.remove(&key);
        }
    }

    fn publish_progress(
        &self,
        sensor_id: &str,
        kind: FetchKind,
        generation: Generation,
        event: ProgressEvent,
    ) -> bool {
        self.update_session(sensor_id, kind, |session| {
            if !session.is_current(generation) {
                return false;
            }
            session.progress_tx.send_replace(Some(event));
            if event.loaded_days < event.total_days {
                session.state_tx.send_replace(LoadState::Progress {
                    percent: event.percent(),
                });
            }
            true
        })
        .unwrap_or(false)
    }

    fn commit(&self, sensor_id: &str, kind: FetchKind, generation: Generation, logs: &[Reading]) -> bool {
        self.update_session(sensor_id, kind, |session| {
            if !session.is_current(generation) {
                return false;
            }
            session.logs = Some(logs.to_vec());
            session.abort = None;
            session.state_tx.send_replace(LoadState::Done);
            true
        })
        .unwrap_or(false)
    }

    fn fail(&self, sensor_id: &str, kind: FetchKind, generation: Generation) {
        self.update_session(sensor_id, kind, |session| {
            if session.is_current(generation) {
                session.abort = None;
                session.state_tx.send_replace(LoadState::Error);
            }
        });
    }

    /// Load logs for `range`, one local day at a time, serving days from the
    /// cache where possible.
    pub async fn load(&self, sensor_id: &str, kind: FetchKind, range: TimeRange) -> LogsOutcome {
        let (generation, signal) = self.begin(sensor_id, kind, range);
        self.load_with(sensor_id, kind, range, generation, signal).await
    }

    async fn load_with(
        &self,
        sensor_id: &str,
        kind: FetchKind,
        range: TimeRange,
        generation: Generation,
        mut signal: AbortSignal,
    ) -> LogsOutcome {
        let days = range.split_days(self.offset);
        let mut progress = ProgressEvent {
            total_days: u32::try_from(days.len()).unwrap_or(u32::MAX),
            loaded_days: 0,
            cached_days: 0,
        };
        let mut logs = Vec::new();

        for (date, day) in days {
            let qualifier = logs_qualifier(day);
            if let Some(cached) = self.cache.get::<Vec<Reading>>(date, sensor_id, &qualifier) {
                logs.extend(cached);
                progress.cached_days += 1;
            } else {
                let fetched = tokio::select! {
                    biased;
                    _ = signal.aborted() => {
                        debug!(sensor_id, ?kind, ?generation, "Log fetch cancelled");
                        return LogsOutcome::NotLoaded;
                    }
                    result = self.source.logs(sensor_id, day) => result,
                };
                if !self.is_current(sensor_id, kind, generation) {
                    debug!(sensor_id, ?generation, "Dropping stale log response");
                    return LogsOutcome::NotLoaded;
                }
                match fetched {
                    Ok(day_logs) => {
                        self.cache.set(date, sensor_id, &qualifier, &day_logs);
                        logs.extend(day_logs);
                    }
                    Err(err) => {
                        warn!(sensor_id, error = %err, "Log fetch failed");
                        self.fail(sensor_id, kind, generation);
                        return LogsOutcome::Failed;
                    }
                }
            }
            progress.loaded_days += 1;
            if !self.publish_progress(sensor_id, kind, generation, progress) {
                return LogsOutcome::NotLoaded;
            }
        }

        logs.sort_by_key(|reading| reading.timestamp);
        if !self.commit(sensor_id, kind, generation, &logs) {
            debug!(sensor_id, ?generation, "Dropping superseded log result");
            return LogsOutcome::NotLoaded;
        }
        info!(
            sensor_id,
            readings = logs.len(),
            days = progress.total_days,
            cached_days = progress.cached_days,
            "Logs loaded"
        );
        LogsOutcome::Loaded(logs)
    }
}
