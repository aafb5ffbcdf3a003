//! Shared path -> value map written by scripts and the signal proxy.

use crate::types::SignalValue;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Cloneable handle to a session's value map
#[derive(Debug, Clone, Default)]
pub struct ValueStore {
    inner: Arc<RwLock<HashMap<String, SignalValue>>>,
}

impl ValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<SignalValue> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(path)
            .cloned()
    }

    /// Write `value`, returning the previous one
    pub fn set(&self, path: impl Into<String>, value: SignalValue) -> Option<SignalValue> {
        self.inner
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path.into(), value)
    }

    pub fn remove(&self, path: &str) -> Option<SignalValue> {
        self.inner
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(path)
    }

    /// Sorted paths
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self
            .inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    pub fn snapshot(&self) -> HashMap<String, SignalValue> {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.inner
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}
