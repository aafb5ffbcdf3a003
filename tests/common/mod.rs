//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;

use proto_sandbox::{OutputEntry, SignalSchema};
use std::time::Duration;

/// Upper bound for any single sandbox round trip in tests
pub fn test_timeout() -> Duration {
    Duration::from_secs(10)
}

/// Assert two floats are approximately equal
pub fn assert_float_eq(a: f64, b: f64, epsilon: f64) {
    assert!(
        (a - b).abs() < epsilon,
        "Expected {} to be approximately equal to {} (epsilon: {})",
        a,
        b,
        epsilon
    );
}

/// Schema used across integration tests
pub const VEHICLE_SCHEMA_JSON: &str = r#"{
    "Vehicle": {
        "type": "branch",
        "children": {
            "Speed": { "type": "sensor", "datatype": "float", "unit": "km/h" },
            "Gear": { "type": "actuator", "datatype": "int8" },
            "VIN": { "type": "attribute", "datatype": "string" },
            "Cabin": {
                "type": "branch",
                "children": {
                    "Door": {
                        "type": "branch",
                        "children": {
                            "IsOpen": { "type": "actuator", "datatype": "boolean" },
                            "Position": { "type": "actuator", "datatype": "uint8" }
                        }
                    },
                    "Lights": { "type": "actuator", "datatype": "boolean" }
                }
            }
        }
    },
    "Trailer": {
        "type": "branch",
        "children": {
            "Load": { "type": "sensor", "datatype": "uint16" }
        }
    }
}"#;

pub fn vehicle_schema() -> SignalSchema {
    SignalSchema::from_json_str(VEHICLE_SCHEMA_JSON).expect("test schema parses")
}

/// Texts of the non-error entries, in order
pub fn texts(output: &[OutputEntry]) -> Vec<&str> {
    output
        .iter()
        .filter(|e| !e.is_error())
        .map(|e| e.text.as_str())
        .collect()
}

/// Texts of the error entries, in order
pub fn errors(output: &[OutputEntry]) -> Vec<&str> {
    output
        .iter()
        .filter(|e| e.is_error())
        .map(|e| e.text.as_str())
        .collect()
}
