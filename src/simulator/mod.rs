//! Interceptor / simulator chain
//!
//! Plugins compose override behaviour for a `(path, operation)` key by
//! registering transforms. Each key holds an ordered list of transforms; the
//! list is applied as a left fold in registration order, so every later
//! transform post-processes the previous result:
//!
//! ```text
//! apply(args, default) = Tn(args, ... T2(args, T1(args, default)))
//! ```

use crate::error::Result;
use crate::types::{Operation, SignalValue};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

/// A transform `(args, previous) -> next`
pub type Transform =
    Arc<dyn Fn(&[SignalValue], SignalValue) -> Result<SignalValue> + Send + Sync>;

/// A registered transform and the plugin that installed it
#[derive(Clone)]
pub struct SimulatorStage {
    pub owner: String,
    pub transform: Transform,
}

impl fmt::Debug for SimulatorStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulatorStage")
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}

type ChainKey = (String, Operation);

/// Shared registry of transform pipelines
#[derive(Clone, Default)]
pub struct SimulatorChain {
    pipelines: Arc<RwLock<HashMap<ChainKey, Vec<SimulatorStage>>>>,
}

impl SimulatorChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `transform` to the pipeline for `(path, operation)`
    pub fn register(
        &self,
        path: impl Into<String>,
        operation: Operation,
        owner: impl Into<String>,
        transform: Transform,
    ) {
        let path = path.into();
        let owner = owner.into();
        let mut pipelines = self.pipelines.write().unwrap_or_else(|e| e.into_inner());
        let stages = pipelines.entry((path.clone(), operation)).or_default();
        stages.push(SimulatorStage { owner, transform });
        tracing::debug!(
            "Registered simulator for ({}, {}), depth {}",
            path,
            operation,
            stages.len()
        );
    }

    /// Convenience wrapper around [`SimulatorChain::register`] for closures
    pub fn register_fn<F>(
        &self,
        path: impl Into<String>,
        operation: Operation,
        owner: impl Into<String>,
        transform: F,
    ) where
        F: Fn(&[SignalValue], SignalValue) -> Result<SignalValue> + Send + Sync + 'static,
    {
        self.register(path, operation, owner, Arc::new(transform));
    }

    /// The pipeline for `(path, operation)`, or `None` when nothing is registered.
    ///
    /// The returned interceptor is a snapshot; transforms registered later
    /// are not seen by it.
    pub fn interceptor(&self, path: &str, operation: Operation) -> Option<Interceptor> {
        let pipelines = self.pipelines.read().unwrap_or_else(|e| e.into_inner());
        pipelines
            .get(&(path.to_string(), operation))
            .filter(|stages| !stages.is_empty())
            .map(|stages| Interceptor {
                path: path.to_string(),
                operation,
                stages: stages.clone(),
            })
    }

    /// Number of keys with a pipeline
    pub fn len(&self) -> usize {
        self.pipelines.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered keys, sorted
    pub fn keys(&self) -> Vec<(String, Operation)> {
        let mut keys: Vec<_> = self
            .pipelines
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        keys.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.as_str().cmp(b.1.as_str())));
        keys
    }

    /// Drop every stage installed by `owner`, returning how many were removed
    pub fn remove_owner(&self, owner: &str) -> usize {
        let mut pipelines = self.pipelines.write().unwrap_or_else(|e| e.into_inner());
        let mut removed = 0;
        pipelines.retain(|_, stages| {
            let before = stages.len();
            stages.retain(|stage| stage.owner != owner);
            removed += before - stages.len();
            !stages.is_empty()
        });
        removed
    }

    /// Drop every pipeline
    pub fn clear(&self) {
        self.pipelines
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

impl fmt::Debug for SimulatorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulatorChain")
            .field("keys", &self.keys())
            .finish()
    }
}

/// A snapshot of one key's pipeline
#[derive(Clone, Debug)]
pub struct Interceptor {
    path: String,
    operation: Operation,
    stages: Vec<SimulatorStage>,
}

impl Interceptor {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    /// Number of composed transforms
    pub fn depth(&self) -> usize {
        self.stages.len()
    }

    /// Names of the plugins owning each stage, in application order
    pub fn owners(&self) -> impl Iterator<Item = &str> {
        self.stages.iter().map(|s| s.owner.as_str())
    }

    /// Drive the pipeline from `default`
    pub fn apply(&self, args: &[SignalValue], default: SignalValue) -> Result<SignalValue> {
        self.stages
            .iter()
            .try_fold(default, |prev, stage| (stage.transform)(args, prev))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SandboxError;

    #[test]
    fn test_no_pipeline_returns_none() {
        let chain = SimulatorChain::new();
        assert!(chain.interceptor("Vehicle.Speed", Operation::Get).is_none());
    }

    #[test]
    fn test_fold_applies_in_registration_order() {
        let chain = SimulatorChain::new();
        chain.register_fn("Vehicle.Speed", Operation::Get, "a", |_, prev| {
            Ok(SignalValue::Float(prev.as_f64().unwrap_or(0.0) + 1.0))
        });
        chain.register_fn("Vehicle.Speed", Operation::Get, "b", |_, prev| {
            Ok(SignalValue::Float(prev.as_f64().unwrap_or(0.0) * 10.0))
        });

        let interceptor = chain.interceptor("Vehicle.Speed", Operation::Get).unwrap();
        assert_eq!(interceptor.depth(), 2);
        assert_eq!(interceptor.owners().collect::<Vec<_>>(), vec!["a", "b"]);
        // b(a(2.0)) = (2 + 1) * 10
        assert_eq!(
            interceptor.apply(&[], SignalValue::Float(2.0)).unwrap(),
            SignalValue::Float(30.0)
        );
    }

    #[test]
    fn test_keys_are_per_operation() {
        let chain = SimulatorChain::new();
        chain.register_fn("Vehicle.Speed", Operation::Set, "a", |_, prev| Ok(prev));
        assert!(chain.interceptor("Vehicle.Speed", Operation::Get).is_none());
        assert!(chain.interceptor("Vehicle.Speed", Operation::Set).is_some());
    }

    #[test]
    fn test_args_reach_every_stage() {
        let chain = SimulatorChain::new();
        for owner in ["a", "b"] {
            chain.register_fn("Vehicle.Speed", Operation::Set, owner, |args, prev| {
                Ok(SignalValue::Int(prev.as_i64().unwrap_or(0) + args.len() as i64))
            });
        }
        let interceptor = chain.interceptor("Vehicle.Speed", Operation::Set).unwrap();
        let out = interceptor
            .apply(&[SignalValue::Null, SignalValue::Null], SignalValue::Int(0))
            .unwrap();
        assert_eq!(out, SignalValue::Int(4));
    }

    #[test]
    fn test_failing_stage_short_circuits() {
        let chain = SimulatorChain::new();
        chain.register_fn("Vehicle.Speed", Operation::Get, "bad", |_, _| {
            Err(SandboxError::Script("boom".to_string()))
        });
        chain.register_fn("Vehicle.Speed", Operation::Get, "never", |_, _| {
            panic!("stage after a failure must not run")
        });
        let interceptor = chain.interceptor("Vehicle.Speed", Operation::Get).unwrap();
        assert!(interceptor.apply(&[], SignalValue::Null).is_err());
    }

    #[test]
    fn test_snapshot_ignores_later_registrations() {
        let chain = SimulatorChain::new();
        chain.register_fn("Vehicle.Speed", Operation::Get, "a", |_, _| {
            Ok(SignalValue::Int(1))
        });
        let snapshot = chain.interceptor("Vehicle.Speed", Operation::Get).unwrap();
        chain.register_fn("Vehicle.Speed", Operation::Get, "b", |_, _| {
            Ok(SignalValue::Int(2))
        });
        assert_eq!(snapshot.apply(&[], SignalValue::Null).unwrap(), SignalValue::Int(1));
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn test_remove_owner() {
        let chain = SimulatorChain::new();
        chain.register_fn("Vehicle.Speed", Operation::Get, "a", |_, prev| Ok(prev));
        chain.register_fn("Vehicle.Speed", Operation::Get, "b", |_, prev| Ok(prev));
        chain.register_fn("Vehicle.Gear", Operation::Set, "a", |_, prev| Ok(prev));

        assert_eq!(chain.remove_owner("a"), 2);
        assert_eq!(chain.keys(), vec![("Vehicle.Speed".to_string(), Operation::Get)]);
        let interceptor = chain.interceptor("Vehicle.Speed", Operation::Get).unwrap();
        assert_eq!(interceptor.owners().collect::<Vec<_>>(), vec!["b"]);
    }
}
