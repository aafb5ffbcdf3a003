//! Runtime session
//!
//! A [`Session`] bundles the state shared by the signal proxy, the plugin
//! loader and the sandbox bridge for one run of a prototype:
//!
//! - the signal schema (immutable)
//! - the [`ValueStore`] written by scripts and `set()`
//! - the [`Monitor`] holding last-known values and access counts
//! - the [`SimulatorChain`] populated by plugins
//!
//! Cloning a session clones handles, not state.

pub mod value_store;

pub use value_store::ValueStore;

use crate::error::Result;
use crate::id::SessionId;
use crate::monitor::{Monitor, DEFAULT_HISTORY_LIMIT};
use crate::schema::SignalSchema;
use crate::simulator::SimulatorChain;
use crate::vehicle::VehicleProxy;
use chrono::{DateTime, Utc};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct Session {
    id: SessionId,
    started_at: DateTime<Utc>,
    schema: Arc<SignalSchema>,
    values: ValueStore,
    monitor: Arc<Monitor>,
    simulators: SimulatorChain,
}

impl Session {
    pub fn new(schema: SignalSchema) -> Self {
        Self::with_history_limit(schema, DEFAULT_HISTORY_LIMIT)
    }

    pub fn with_history_limit(schema: SignalSchema, history_limit: usize) -> Self {
        let session = Self {
            id: SessionId::new(),
            started_at: Utc::now(),
            schema: Arc::new(schema),
            values: ValueStore::new(),
            monitor: Arc::new(Monitor::new(history_limit)),
            simulators: SimulatorChain::new(),
        };
        tracing::info!(
            "Session {} created with {} signals",
            session.id,
            session.schema.len()
        );
        session
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn schema(&self) -> &Arc<SignalSchema> {
        &self.schema
    }

    pub fn values(&self) -> &ValueStore {
        &self.values
    }

    pub fn monitor(&self) -> &Arc<Monitor> {
        &self.monitor
    }

    pub fn simulators(&self) -> &SimulatorChain {
        &self.simulators
    }

    /// Clear written values and monitor state. Registered simulators stay.
    pub fn reset(&self) {
        self.values.clear();
        self.monitor.reset();
        tracing::info!("Session {} reset", self.id);
    }

    /// Clear only the monitor, e.g. before a new script run
    pub fn reset_monitor(&self) {
        self.monitor.reset();
    }

    /// Signal proxy rooted at `root`
    pub fn vehicle(&self, root: &str) -> Result<VehicleProxy> {
        VehicleProxy::new(self.clone(), root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NodeKind, Operation, SignalValue};

    fn schema() -> SignalSchema {
        let mut schema = SignalSchema::new();
        let root = schema.add_root("Vehicle", NodeKind::Branch, None).unwrap();
        schema
            .add_child(
                root,
                "Speed",
                NodeKind::Sensor,
                Some(crate::types::DataType::Float),
            )
            .unwrap();
        schema
    }

    #[test]
    fn test_clones_share_state() {
        let session = Session::new(schema());
        let clone = session.clone();
        clone.values().set("Vehicle.Speed", SignalValue::Float(1.0));
        assert_eq!(
            session.values().get("Vehicle.Speed"),
            Some(SignalValue::Float(1.0))
        );
        assert_eq!(session.id(), clone.id());
    }

    #[test]
    fn test_reset_keeps_simulators() {
        let session = Session::new(schema());
        session.values().set("Vehicle.Speed", SignalValue::Float(1.0));
        session
            .monitor()
            .record("Vehicle.Speed", Operation::Get, SignalValue::Float(1.0));
        session
            .simulators()
            .register_fn("Vehicle.Speed", Operation::Get, "p", |_, v| Ok(v));

        session.reset();

        assert!(session.values().is_empty());
        assert!(session.monitor().is_empty());
        assert_eq!(session.simulators().len(), 1);
    }

    #[test]
    fn test_vehicle_requires_known_root() {
        let session = Session::new(schema());
        assert!(session.vehicle("Vehicle").is_ok());
        assert!(session.vehicle("Plane").is_err());
    }
}
