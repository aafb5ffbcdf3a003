//! Rhai engine configuration shared by the sandbox and the plugin loader
//!
//! ## Signal nodes
//!
//! Schema nodes are exposed as the `SignalNode` type:
//! - `vehicle.Speed` / `vehicle["Speed"]` - resolve a child (fails on unknown names)
//! - `node.get()` / `node.set(value)` - read or write a leaf
//! - `node.subscribe()` - always fails
//! - `node.path()`, `node.name()`, `node.kind()`, `node.datatype()`, `node.children()`
//!
//! ## Helpers
//!
//! - `sleep(seconds)` - block the calling thread

use crate::config::SandboxConfig;
use crate::error::SandboxError;
use crate::types::SignalValue;
use crate::vehicle::NodeHandle;
use rhai::{Array, Dynamic, Engine, EvalAltResult, ImmutableString};
use std::time::Duration;

/// Rhai-visible name of [`NodeHandle`]
pub const SIGNAL_NODE_TYPE: &str = "SignalNode";

/// How `node.set(value)` treats `(path, set)` interceptors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetPolicy {
    /// Write the value as given
    Direct,
    /// Pass the value through the `(path, set)` interceptor first
    Intercepted,
}

/// Create an engine with limits applied and the signal API registered
pub fn new_engine(limits: &SandboxConfig, set_policy: SetPolicy) -> Engine {
    let mut engine = Engine::new();
    configure_engine(&mut engine, limits);
    register_signal_api(&mut engine, set_policy);
    register_helpers(&mut engine);
    engine
}

/// Apply safety limits
pub fn configure_engine(engine: &mut Engine, limits: &SandboxConfig) {
    engine.set_max_expr_depths(limits.max_expr_depth, limits.max_function_expr_depth);
    engine.set_max_call_levels(limits.max_call_levels);
    engine.set_max_operations(limits.max_operations);
    engine.set_max_string_size(limits.max_string_size);
    engine.set_max_array_size(limits.max_array_size);
    engine.set_max_map_size(limits.max_map_size);
}

/// Register the `SignalNode` type
pub fn register_signal_api(engine: &mut Engine, set_policy: SetPolicy) {
    engine.register_type_with_name::<NodeHandle>(SIGNAL_NODE_TYPE);

    // Also serves property access: `vehicle.Speed` falls back to this indexer
    engine.register_indexer_get(
        |node: &mut NodeHandle, name: ImmutableString| -> Result<NodeHandle, Box<EvalAltResult>> {
            node.child(name.as_str()).map_err(SandboxError::into_rhai)
        },
    );

    engine.register_fn(
        "get",
        |node: NodeHandle| -> Result<Dynamic, Box<EvalAltResult>> {
            node.get()
                .map(|v| v.to_dynamic())
                .map_err(SandboxError::into_rhai)
        },
    );

    engine.register_fn(
        "set",
        move |node: NodeHandle, value: Dynamic| -> Result<(), Box<EvalAltResult>> {
            let value = SignalValue::from_dynamic(&value).map_err(SandboxError::into_rhai)?;
            let result = match set_policy {
                SetPolicy::Direct => node.set(value),
                SetPolicy::Intercepted => node.set_intercepted(value),
            };
            result.map_err(SandboxError::into_rhai)
        },
    );

    engine.register_fn(
        "subscribe",
        |node: NodeHandle| -> Result<(), Box<EvalAltResult>> {
            node.subscribe().map_err(SandboxError::into_rhai)
        },
    );

    engine.register_fn("path", |node: NodeHandle| node.path().to_string());
    engine.register_fn("name", |node: NodeHandle| node.name().to_string());
    engine.register_fn("kind", |node: NodeHandle| node.kind().to_string());
    engine.register_fn("is_branch", |node: NodeHandle| node.is_branch());
    engine.register_fn("datatype", |node: NodeHandle| -> Dynamic {
        match node.datatype() {
            Some(datatype) => Dynamic::from(datatype.to_string()),
            None => Dynamic::UNIT,
        }
    });
    engine.register_fn("children", |node: NodeHandle| -> Array {
        node.children().into_iter().map(Dynamic::from).collect()
    });
    engine.register_fn("resolve", |node: NodeHandle, path: &str| {
        node.resolve(path).map_err(SandboxError::into_rhai)
    });

    engine.register_fn("to_string", |node: &mut NodeHandle| {
        format!("{}({})", SIGNAL_NODE_TYPE, node.path())
    });
    engine.register_fn("to_debug", |node: &mut NodeHandle| {
        format!("{}({}: {})", SIGNAL_NODE_TYPE, node.path(), node.kind())
    });
}

/// Register engine-independent helpers
pub fn register_helpers(engine: &mut Engine) {
    engine.register_fn("sleep", |seconds: f64| {
        std::thread::sleep(Duration::try_from_secs_f64(seconds).unwrap_or(Duration::ZERO));
    });
    engine.register_fn("sleep", |seconds: i64| {
        std::thread::sleep(Duration::from_secs(seconds.max(0) as u64));
    });
}

/// Convert a script value to JSON, resolving shared values first
pub fn dynamic_to_json(value: &Dynamic) -> Result<serde_json::Value, Box<EvalAltResult>> {
    rhai::serde::from_dynamic(&value.flatten_clone())
}

/// Convert JSON to a script value
pub fn json_to_dynamic(value: &serde_json::Value) -> Result<Dynamic, Box<EvalAltResult>> {
    rhai::serde::to_dynamic(value)
}
