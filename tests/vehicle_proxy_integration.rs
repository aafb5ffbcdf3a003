//! Integration tests for the signal proxy
//!
//! These tests validate the proxy against a full session:
//! - Path resolution and lookup errors
//! - The get resolution order and interceptor composition
//! - Monitor bookkeeping

mod common;

use proto_sandbox::vehicle::ModelObjectCreator;
use proto_sandbox::{Operation, SandboxError, Session, SignalValue};

fn session() -> Session {
    Session::new(common::vehicle_schema())
}

#[test]
fn test_absolute_and_relative_resolution() {
    let vehicle = session().vehicle("Vehicle").unwrap();

    let absolute = vehicle.resolve("Vehicle.Cabin.Door.IsOpen").unwrap();
    let relative = vehicle.resolve("Cabin.Door.IsOpen").unwrap();
    assert_eq!(absolute.path(), relative.path());
    assert_eq!(absolute.id(), relative.id());
    assert_eq!(vehicle.resolve("Vehicle").unwrap().path(), "Vehicle");
}

#[test]
fn test_lookup_error_names_missing_child() {
    let vehicle = session().vehicle("Vehicle").unwrap();
    match vehicle.resolve("Cabin.Window.IsOpen") {
        Err(SandboxError::SchemaLookup { parent, child }) => {
            assert_eq!(parent, "Vehicle.Cabin");
            assert_eq!(child, "Window");
        }
        other => panic!("expected a lookup error, got {:?}", other),
    }
}

#[test]
fn test_defaults_follow_datatype() {
    let vehicle = session().vehicle("Vehicle").unwrap();
    assert_eq!(vehicle.get("Speed").unwrap(), SignalValue::Float(0.0));
    assert_eq!(vehicle.get("Gear").unwrap(), SignalValue::Int(0));
    assert_eq!(vehicle.get("VIN").unwrap(), SignalValue::String(String::new()));
    assert_eq!(vehicle.get("Cabin.Lights").unwrap(), SignalValue::Bool(false));
}

#[test]
fn test_branch_operations_are_rejected() {
    let vehicle = session().vehicle("Vehicle").unwrap();
    let cabin = vehicle.resolve("Cabin").unwrap();

    assert!(matches!(
        cabin.get(),
        Err(SandboxError::InvalidOperation { operation: Operation::Get, .. })
    ));
    assert!(matches!(
        cabin.set(SignalValue::Int(1)),
        Err(SandboxError::InvalidOperation { operation: Operation::Set, .. })
    ));
}

#[test]
fn test_subscribe_always_fails() {
    let vehicle = session().vehicle("Vehicle").unwrap();
    let err = vehicle.resolve("Speed").unwrap().subscribe().unwrap_err();
    assert!(err.to_string().contains("cannot be called from a plugin"));
}

#[test]
fn test_set_then_get_and_session_reset() {
    let session = session();
    let vehicle = session.vehicle("Vehicle").unwrap();

    vehicle.set("Cabin.Door.Position", SignalValue::Int(40)).unwrap();
    assert_eq!(vehicle.get("Cabin.Door.Position").unwrap(), SignalValue::Int(40));

    session.reset();
    assert_eq!(vehicle.get("Cabin.Door.Position").unwrap(), SignalValue::Int(0));
}

#[test]
fn test_get_passes_through_every_simulator_in_order() {
    let session = session();
    let simulators = session.simulators();
    simulators.register_fn("Vehicle.Speed", Operation::Get, "offset", |_, prev| {
        Ok(SignalValue::Float(prev.as_f64().unwrap_or(0.0) + 5.0))
    });
    simulators.register_fn("Vehicle.Speed", Operation::Get, "scale", |_, prev| {
        Ok(SignalValue::Float(prev.as_f64().unwrap_or(0.0) * 2.0))
    });

    let vehicle = session.vehicle("Vehicle").unwrap();
    vehicle.set("Speed", SignalValue::Float(10.0)).unwrap();
    assert_eq!(vehicle.get("Speed").unwrap(), SignalValue::Float(30.0));

    // The monitor keeps the value before interception
    assert_eq!(
        session.monitor().last_value("Vehicle.Speed"),
        Some(SignalValue::Float(10.0))
    );
}

#[test]
fn test_transform_can_reenter_the_proxy() {
    let session = session();
    let reader = session.vehicle("Vehicle").unwrap();
    session
        .simulators()
        .register_fn("Vehicle.Speed", Operation::Get, "follow", move |_, _| {
            reader.get("Gear")
        });

    let vehicle = session.vehicle("Vehicle").unwrap();
    vehicle.set("Gear", SignalValue::Int(3)).unwrap();
    assert_eq!(vehicle.get("Speed").unwrap(), SignalValue::Int(3));
}

#[test]
fn test_plain_set_skips_set_interceptor() {
    let session = session();
    session
        .simulators()
        .register_fn("Vehicle.Gear", Operation::Set, "clamp", |args, _| {
            Ok(SignalValue::Int(args[0].as_i64().unwrap_or(0).min(6)))
        });
    let gear = session.vehicle("Vehicle").unwrap().resolve("Gear").unwrap();

    gear.set(SignalValue::Int(9)).unwrap();
    assert_eq!(gear.get().unwrap(), SignalValue::Int(9));

    gear.set_intercepted(SignalValue::Int(9)).unwrap();
    assert_eq!(gear.get().unwrap(), SignalValue::Int(6));
}

#[test]
fn test_model_object_on_other_root() {
    let session = session();
    let trailer = ModelObjectCreator::new(session.clone()).create("Trailer").unwrap();
    trailer.set("Load", SignalValue::Int(1200)).unwrap();

    assert_eq!(
        session.values().get("Trailer.Load"),
        Some(SignalValue::Int(1200))
    );
    assert!(ModelObjectCreator::new(session).create("Boat").is_err());
}

#[test]
fn test_monitor_counts_accesses() {
    let session = session();
    let vehicle = session.vehicle("Vehicle").unwrap();
    vehicle.get("Speed").unwrap();
    vehicle.set("Speed", SignalValue::Float(1.0)).unwrap();
    vehicle.get("Speed").unwrap();

    let entry = session.monitor().entry("Vehicle.Speed").unwrap();
    assert_eq!(entry.call_count, 3);
    assert_eq!(entry.get_count, 2);
    assert_eq!(entry.set_count, 1);

    session.reset_monitor();
    assert!(session.monitor().entry("Vehicle.Speed").is_none());
}

// Property-based tests using proptest
use proptest::prelude::*;

proptest! {
    #[test]
    fn test_last_write_wins(values in prop::collection::vec(-1.0e6f64..1.0e6, 1..40)) {
        let session = session();
        let vehicle = session.vehicle("Vehicle").unwrap();

        for value in &values {
            vehicle.set("Speed", SignalValue::Float(*value)).unwrap();
        }

        let last = *values.last().unwrap();
        prop_assert_eq!(vehicle.get("Speed").unwrap(), SignalValue::Float(last));
    }

    #[test]
    fn test_history_is_bounded(count in 1usize..300, limit in 1usize..50) {
        let session = Session::with_history_limit(common::vehicle_schema(), limit);
        let vehicle = session.vehicle("Vehicle").unwrap();

        for i in 0..count {
            vehicle.set("Gear", SignalValue::Int(i as i64)).unwrap();
        }

        let entry = session.monitor().entry("Vehicle.Gear").unwrap();
        prop_assert_eq!(entry.call_count, count as u64);
        prop_assert_eq!(entry.history.len(), count.min(limit));
        prop_assert_eq!(
            entry.history.back().map(|s| s.value.clone()),
            Some(SignalValue::Int(count as i64 - 1))
        );
    }

    #[test]
    fn test_fold_depth_matches_stage_count(stages in 0usize..12, start in -100i64..100) {
        let session = session();
        for i in 0..stages {
            session.simulators().register_fn(
                "Vehicle.Gear",
                Operation::Get,
                format!("stage{}", i),
                |_, prev| Ok(SignalValue::Int(prev.as_i64().unwrap_or(0) + 1)),
            );
        }

        let vehicle = session.vehicle("Vehicle").unwrap();
        vehicle.set("Gear", SignalValue::Int(start)).unwrap();
        prop_assert_eq!(
            vehicle.get("Gear").unwrap(),
            SignalValue::Int(start + stages as i64)
        );
    }
}
