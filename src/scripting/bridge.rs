//! Bridge between sandboxed scripts and the session
//!
//! Script globals:
//! - `vehicle` - root signal node
//! - `valueMap` - the session value store, indexable by path
//! - `INTERNALS` - event bus, `INTERNALS.emit(name, payload)`
//! - `plugins` - loaded hooks, `plugins.invoke(plugin, hook, args)`
//!
//! Global functions:
//! - `signal(path)` - resolve an absolute or root-relative path
//! - `interceptor(path, op)` - the registered pipeline, or `()`
//! - `execution_id()` - id of the running execution

use crate::error::SandboxError;
use crate::events::EventBus;
use crate::plugin::hooks::{HookArg, HookRegistry};
use crate::scripting::engine::{dynamic_to_json, json_to_dynamic};
use crate::session::ValueStore;
use crate::simulator::Interceptor;
use crate::types::{Operation, SignalValue};
use crate::vehicle::VehicleProxy;
use rhai::{Array, Dynamic, Engine, EvalAltResult, FnPtr, ImmutableString, NativeCallContext, Scope};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Script handle to the value store
#[derive(Debug, Clone)]
pub struct ValueMap(pub ValueStore);

/// Script handle to the event bus
#[derive(Debug, Clone)]
pub struct Internals(pub EventBus);

/// Script handle to the loaded plugin hooks
#[derive(Debug, Clone)]
pub struct Plugins(pub HookRegistry);

/// Script handle to an interceptor pipeline
#[derive(Debug, Clone)]
pub struct InterceptorHandle(pub Interceptor);

/// Everything the sandbox exposes to scripts
#[derive(Debug, Clone)]
pub struct Bridge {
    vehicle: VehicleProxy,
    events: EventBus,
    plugins: HookRegistry,
    current_execution: Arc<AtomicU64>,
}

impl Bridge {
    pub fn new(vehicle: VehicleProxy, events: EventBus) -> Self {
        Self {
            vehicle,
            events,
            plugins: HookRegistry::new(),
            current_execution: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn set_plugins(&mut self, plugins: HookRegistry) {
        self.plugins = plugins;
    }

    pub fn set_current_execution(&self, id: u64) {
        self.current_execution.store(id, Ordering::SeqCst);
    }

    /// Push the bridge globals into `scope`
    pub fn push_globals(&self, scope: &mut Scope<'static>) {
        scope.push("vehicle", self.vehicle.root().clone());
        scope.push("valueMap", ValueMap(self.vehicle.session().values().clone()));
        scope.push("INTERNALS", Internals(self.events.clone()));
        scope.push("plugins", Plugins(self.plugins.clone()));
    }

    /// Register bridge types and global functions
    pub fn register(&self, engine: &mut Engine) {
        register_value_map(engine);
        register_internals(engine);
        register_plugins(engine);
        register_interceptor(engine);

        {
            let vehicle = self.vehicle.clone();
            engine.register_fn(
                "signal",
                move |path: &str| -> Result<Dynamic, Box<EvalAltResult>> {
                    vehicle
                        .resolve(path)
                        .map(Dynamic::from)
                        .map_err(SandboxError::into_rhai)
                },
            );
        }

        {
            let simulators = self.vehicle.session().simulators().clone();
            engine.register_fn(
                "interceptor",
                move |path: &str, operation: &str| -> Result<Dynamic, Box<EvalAltResult>> {
                    let operation: Operation =
                        operation.parse().map_err(SandboxError::into_rhai)?;
                    Ok(simulators
                        .interceptor(path, operation)
                        .map(|i| Dynamic::from(InterceptorHandle(i)))
                        .unwrap_or(Dynamic::UNIT))
                },
            );
        }

        {
            let current = self.current_execution.clone();
            engine.register_fn("execution_id", move || -> i64 {
                current.load(Ordering::SeqCst) as i64
            });
        }
    }
}

fn register_value_map(engine: &mut Engine) {
    engine.register_type_with_name::<ValueMap>("ValueMap");
    engine.register_indexer_get(|map: &mut ValueMap, path: ImmutableString| -> Dynamic {
        map.0
            .get(path.as_str())
            .map(|v| v.to_dynamic())
            .unwrap_or(Dynamic::UNIT)
    });
    engine.register_indexer_set(
        |map: &mut ValueMap,
         path: ImmutableString,
         value: Dynamic|
         -> Result<(), Box<EvalAltResult>> {
            let value = SignalValue::from_dynamic(&value).map_err(SandboxError::into_rhai)?;
            map.0.set(path.to_string(), value);
            Ok(())
        },
    );
    engine.register_fn("keys", |map: &mut ValueMap| -> Array {
        map.0.keys().into_iter().map(Dynamic::from).collect()
    });
    engine.register_fn("contains", |map: &mut ValueMap, path: &str| map.0.contains(path));
    engine.register_fn("remove", |map: &mut ValueMap, path: &str| -> Dynamic {
        map.0
            .remove(path)
            .map(|v| v.to_dynamic())
            .unwrap_or(Dynamic::UNIT)
    });
    engine.register_fn("len", |map: &mut ValueMap| map.0.len() as i64);
}

fn register_internals(engine: &mut Engine) {
    engine.register_type_with_name::<Internals>("Internals");
    engine.register_fn(
        "emit",
        |internals: &mut Internals,
         name: &str,
         payload: Dynamic|
         -> Result<i64, Box<EvalAltResult>> {
            let payload = dynamic_to_json(&payload)?;
            Ok(internals.0.emit(name, payload) as i64)
        },
    );
    engine.register_fn("emit", |internals: &mut Internals, name: &str| -> i64 {
        internals.0.emit(name, serde_json::Value::Null) as i64
    });
}

/// Resolve script closures passed as hook arguments, then convert to JSON
fn resolve_hook_args(
    ctx: &NativeCallContext,
    args: Array,
) -> Result<Vec<HookArg>, Box<EvalAltResult>> {
    args.into_iter()
        .map(|arg| {
            let arg = arg.flatten();
            let value = if arg.is_fnptr() {
                let deferred = arg.cast::<FnPtr>();
                deferred.call_within_context::<Dynamic>(ctx, ())?
            } else {
                arg
            };
            dynamic_to_json(&value).map(HookArg::Value)
        })
        .collect()
}

fn register_plugins(engine: &mut Engine) {
    engine.register_type_with_name::<Plugins>("Plugins");
    engine.register_fn(
        "invoke",
        |ctx: NativeCallContext,
         plugins: &mut Plugins,
         plugin: &str,
         hook: &str,
         args: Array|
         -> Result<Dynamic, Box<EvalAltResult>> {
            let args = resolve_hook_args(&ctx, args)?;
            let result = plugins
                .0
                .call(plugin, hook, args)
                .map_err(SandboxError::into_rhai)?;
            json_to_dynamic(&result)
        },
    );
    engine.register_fn(
        "invoke",
        |plugins: &mut Plugins, plugin: &str, hook: &str| -> Result<Dynamic, Box<EvalAltResult>> {
            let result = plugins
                .0
                .call(plugin, hook, Vec::new())
                .map_err(SandboxError::into_rhai)?;
            json_to_dynamic(&result)
        },
    );
    engine.register_fn("names", |plugins: &mut Plugins| -> Array {
        plugins.0.names().into_iter().map(Dynamic::from).collect()
    });
    engine.register_fn("hooks", |plugins: &mut Plugins, plugin: &str| -> Array {
        plugins.0.hooks(plugin).into_iter().map(Dynamic::from).collect()
    });
}

fn register_interceptor(engine: &mut Engine) {
    engine.register_type_with_name::<InterceptorHandle>("Interceptor");
    engine.register_fn(
        "apply",
        |handle: &mut InterceptorHandle,
         args: Array,
         default: Dynamic|
         -> Result<Dynamic, Box<EvalAltResult>> {
            let args = args
                .iter()
                .map(SignalValue::from_dynamic)
                .collect::<crate::error::Result<Vec<_>>>()
                .map_err(SandboxError::into_rhai)?;
            let default = SignalValue::from_dynamic(&default).map_err(SandboxError::into_rhai)?;
            handle
                .0
                .apply(&args, default)
                .map(|v| v.to_dynamic())
                .map_err(SandboxError::into_rhai)
        },
    );
    engine.register_fn("depth", |handle: &mut InterceptorHandle| {
        handle.0.depth() as i64
    });
}
