//! Session-scoped signal monitor
//!
//! The monitor caches, per signal path, the last value observed together with
//! access counters and a rolling window of recent samples. The signal proxy
//! consults it as its second resolution layer, and hosts read it for telemetry.
//!
//! A `Monitor` is owned by a [`Session`](crate::session::Session) and cleared
//! with [`Monitor::reset`] when a new session begins.

use crate::types::{Operation, SignalValue};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// Default size of the per-path rolling sample window
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// One recorded access
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorSample {
    /// Time since the monitor was created or last reset
    pub elapsed: Duration,
    pub operation: Operation,
    pub value: SignalValue,
}

/// Everything the monitor knows about one path
#[derive(Debug, Clone, Serialize)]
pub struct MonitorEntry {
    pub path: String,
    pub last_value: Option<SignalValue>,
    /// Total number of recorded accesses
    pub call_count: u64,
    pub get_count: u64,
    pub set_count: u64,
    /// Rolling window of recent samples, oldest first
    pub history: VecDeque<MonitorSample>,
}

impl MonitorEntry {
    fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            last_value: None,
            call_count: 0,
            get_count: 0,
            set_count: 0,
            history: VecDeque::new(),
        }
    }
}

/// Explicit, resettable monitor
#[derive(Debug)]
pub struct Monitor {
    entries: RwLock<HashMap<String, MonitorEntry>>,
    history_limit: usize,
    started: RwLock<Instant>,
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

impl Monitor {
    pub fn new(history_limit: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            history_limit,
            started: RwLock::new(Instant::now()),
        }
    }

    pub fn history_limit(&self) -> usize {
        self.history_limit
    }

    /// Record an access to `path`
    pub fn record(&self, path: &str, operation: Operation, value: SignalValue) {
        let elapsed = self
            .started
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .elapsed();
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let entry = entries
            .entry(path.to_string())
            .or_insert_with(|| MonitorEntry::new(path));

        entry.call_count += 1;
        match operation {
            Operation::Get => entry.get_count += 1,
            Operation::Set => entry.set_count += 1,
            Operation::Subscribe => {}
        }
        entry.last_value = Some(value.clone());

        if self.history_limit > 0 {
            entry.history.push_back(MonitorSample {
                elapsed,
                operation,
                value,
            });
            while entry.history.len() > self.history_limit {
                entry.history.pop_front();
            }
        }
    }

    /// Last value observed for `path`, if any
    pub fn last_value(&self, path: &str) -> Option<SignalValue> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(path)
            .and_then(|entry| entry.last_value.clone())
    }

    pub fn call_count(&self, path: &str) -> u64 {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(path)
            .map(|entry| entry.call_count)
            .unwrap_or(0)
    }

    pub fn entry(&self, path: &str) -> Option<MonitorEntry> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(path)
            .cloned()
    }

    /// All entries, sorted by path
    pub fn snapshot(&self) -> Vec<MonitorEntry> {
        let mut entries: Vec<_> = self
            .entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        entries
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget everything and restart the sample clock
    pub fn reset(&self) {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        *self.started.write().unwrap_or_else(|e| e.into_inner()) = Instant::now();
        tracing::debug!("Monitor reset");
    }
}
