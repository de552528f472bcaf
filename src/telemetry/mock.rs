use crate::clock::TimeRange;
use crate::telemetry::{
    OwnerInfo, PointSnapshot, Reading, SensorId, SourceError, TelemetrySource,
};
use crate::zones::Unit;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Notify;

#[derive(Debug, Clone)]
pub enum MockResponse {
    Logs(Vec<Reading>),
    Fail(String),
}

/// One scripted answer to a `logs` call, optionally held back until `gate`
/// is notified.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub gate: Option<Arc<Notify>>,
    pub response: MockResponse,
}

impl MockCall {
    pub fn logs(readings: Vec<Reading>) -> Self {
        Self {
            gate: None,
            response: MockResponse::Logs(readings),
        }
    }

    pub fn fail(reason: &str) -> Self {
        Self {
            gate: None,
            response: MockResponse::Fail(reason.to_string()),
        }
    }

    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }
}

/// Scriptable in-process telemetry source.
///
/// Scripted `logs` calls are consumed in order; once the script is empty the
/// per-sensor fixtures answer instead.
#[derive(Debug, Default)]
pub struct MockSource {
    fixtures: Mutex<HashMap<SensorId, Vec<Reading>>>,
    script: Mutex<VecDeque<MockCall>>,
    points: Mutex<Vec<PointSnapshot>>,
    fail_maxima: AtomicBool,
    owners: Mutex<HashMap<SensorId, OwnerInfo>>,
    owner_gate: Mutex<Option<Arc<Notify>>>,
    fail_owner: AtomicBool,
    log_calls: AtomicUsize,
    maxima_calls: AtomicUsize,
    owner_calls: AtomicUsize,
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_logs(self, sensor_id: &str, readings: Vec<Reading>) -> Self {
        self.fixtures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(sensor_id.to_string(), readings);
        self
    }

    pub fn with_points(self, points: Vec<PointSnapshot>) -> Self {
        *self.points.lock().unwrap_or_else(PoisonError::into_inner) = points;
        self
    }

    pub fn with_owner(self, sensor_id: &str, owner: OwnerInfo) -> Self {
        self.owners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(sensor_id.to_string(), owner);
        self
    }

    pub fn push_call(&self, call: MockCall) {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(call);
    }

    pub fn set_points(&self, points: Vec<PointSnapshot>) {
        *self.points.lock().unwrap_or_else(PoisonError::into_inner) = points;
    }

    pub fn set_fail_maxima(&self, fail: bool) {
        self.fail_maxima.store(fail, Ordering::SeqCst);
    }

    pub fn set_owner_gate(&self, gate: Option<Arc<Notify>>) {
        *self.owner_gate.lock().unwrap_or_else(PoisonError::into_inner) = gate;
    }

    pub fn set_fail_owner(&self, fail: bool) {
        self.fail_owner.store(fail, Ordering::SeqCst);
    }

    pub fn log_calls(&self) -> usize {
        self.log_calls.load(Ordering::SeqCst)
    }

    pub fn maxima_calls(&self) -> usize {
        self.maxima_calls.load(Ordering::SeqCst)
    }

    pub fn owner_calls(&self) -> usize {
        self.owner_calls.load(Ordering::SeqCst)
    }
}

impl TelemetrySource for MockSource {
    async fn logs(&self, sensor_id: &str, range: TimeRange) -> Result<Vec<Reading>, SourceError> {
        self.log_calls.fetch_add(1, Ordering::SeqCst);
        let scripted = {
            self.script
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop_front()
        };
        match scripted {
            Some(call) => {
                if let Some(gate) = call.gate {
                    gate.notified().await;
                }
                match call.response {
                    MockResponse::Logs(readings) => Ok(readings),
                    MockResponse::Fail(reason) => Err(SourceError::Scripted(reason)),
                }
            }
            None => {
                let fixtures = self.fixtures.lock().unwrap_or_else(PoisonError::into_inner);
                Ok(fixtures
                    .get(sensor_id)
                    .map(|readings| {
                        readings
                            .iter()
                            .filter(|r| r.timestamp >= range.start && r.timestamp < range.end)
                            .cloned()
                            .collect()
                    })
                    .unwrap_or_default())
            }
        }
    }

    async fn maxima(&self, _unit: Unit, _range: TimeRange) -> Result<Vec<PointSnapshot>, SourceError> {
        self.maxima_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_maxima.load(Ordering::SeqCst) {
            return Err(SourceError::Scripted("maxima unavailable".to_string()));
        }
        Ok(self
            .points
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    async fn active_sensors(&self, _range: TimeRange) -> Result<Vec<SensorId>, SourceError> {
        let points = self.points.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(points.iter().map(|p| p.sensor_id.clone()).collect())
    }

    async fn owner(&self, sensor_id: &str) -> Result<Option<OwnerInfo>, SourceError> {
        self.owner_calls.fetch_add(1, Ordering::SeqCst);
        let gate = {
            self.owner_gate
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        };
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.fail_owner.load(Ordering::SeqCst) {
            return Err(SourceError::Scripted("owner lookup failed".to_string()));
        }
        Ok(self
            .owners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(sensor_id)
            .cloned())
    }
}
