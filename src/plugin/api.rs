//! The `api` object handed to plugin factories
//!
//! ```rhai
//! fn plugin(api) {
//!     api.simulator("Vehicle.Speed", "get", |args, prev| prev + 10.0);
//!     api.widgets.register("speedometer", |surface| surface.inject_html("<div/>"));
//!     api.sandbox.emit("ready", #{ name: api.prototype.name });
//!     let cabin = api.vehicle.Cabin;
//!     let trailer = api.model_object("Trailer");
//!     #{ reset: || api.vehicle.Speed.set(0.0) }
//! }
//! ```

use super::widgets::{register_widget_api, ScriptCallback, Widget, WidgetBox, WidgetRegistry};
use super::Capabilities;
use crate::error::SandboxError;
use crate::events::EventBus;
use crate::scripting::engine::dynamic_to_json;
use crate::simulator::Transform;
use crate::types::{Operation, SignalValue};
use crate::vehicle::{ModelObjectCreator, NodeHandle, VehicleProxy};
use rhai::{Array, Dynamic, Engine, EvalAltResult, FnPtr, Map, AST};
use std::fmt;
use std::sync::{Arc, Mutex};

type RhaiResult<T> = std::result::Result<T, Box<EvalAltResult>>;

/// Capability object for one plugin
#[derive(Clone)]
pub struct PluginApi {
    plugin: String,
    engine: Arc<Engine>,
    ast: Arc<AST>,
    capabilities: Capabilities,
    /// Callbacks registered while the factory runs
    callbacks: Arc<Mutex<Vec<ScriptCallback>>>,
}

impl PluginApi {
    pub(crate) fn new(
        plugin: &str,
        engine: Arc<Engine>,
        ast: Arc<AST>,
        capabilities: Capabilities,
    ) -> Self {
        Self {
            plugin: plugin.to_string(),
            engine,
            ast,
            capabilities,
            callbacks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    fn callback(&self, func: FnPtr) -> ScriptCallback {
        let callback = ScriptCallback::new(self.engine.clone(), self.ast.clone(), func);
        self.callbacks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(callback.clone());
        callback
    }

    /// Detach captured host handles in every callback registered so far.
    /// Called once the factory has returned and no script holds `api`.
    pub(crate) fn detach_callbacks(&self) {
        let callbacks =
            std::mem::take(&mut *self.callbacks.lock().unwrap_or_else(|e| e.into_inner()));
        for callback in &callbacks {
            callback.detach_host_handles();
        }
    }

    fn vehicle(&self) -> crate::error::Result<NodeHandle> {
        VehicleProxy::new(
            self.capabilities.session.clone(),
            &self.capabilities.vehicle_root,
        )
        .map(|proxy| proxy.root().clone())
    }

    fn model_object(&self, root: &str) -> crate::error::Result<NodeHandle> {
        ModelObjectCreator::new(self.capabilities.session.clone())
            .create(root)
            .map(|proxy| proxy.root().clone())
    }

    fn prototype(&self) -> Map {
        let prototype = &self.capabilities.prototype;
        let mut map = Map::new();
        map.insert("name".into(), Dynamic::from(prototype.name.clone()));
        map.insert(
            "customer_journey".into(),
            Dynamic::from(prototype.customer_journey.clone()),
        );
        map
    }

    /// Append a script transform to the `(path, operation)` pipeline
    fn simulator(&self, path: &str, operation: Operation, func: FnPtr) {
        let callback = self.callback(func);
        let plugin = self.plugin.clone();
        let label = format!("simulator ({}, {})", path, operation);

        let transform: Transform = Arc::new(move |args: &[SignalValue], prev: SignalValue| {
            let args: Array = args.iter().map(SignalValue::to_dynamic).collect();
            let result = callback
                .call(vec![Dynamic::from_array(args), prev.to_dynamic()])
                .map_err(|e| SandboxError::PluginExecution {
                    plugin: plugin.clone(),
                    message: format!("{}: {}", label, e),
                })?;
            SignalValue::from_dynamic(&result).map_err(|e| SandboxError::PluginExecution {
                plugin: plugin.clone(),
                message: format!("{}: {}", label, e),
            })
        });

        self.capabilities
            .session
            .simulators()
            .register(path, operation, self.plugin.as_str(), transform);
    }
}

impl fmt::Debug for PluginApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginApi")
            .field("plugin", &self.plugin)
            .finish_non_exhaustive()
    }
}

/// Copy of `func` whose captured host handles are no longer shared.
///
/// Closures of one plugin that capture `api` share a single cell, and Rhai
/// write-locks that cell for a whole method chain. A hook reading a signal
/// whose transform also uses `api` would otherwise hit a data race. Host
/// handles are clones over shared state, so an unshared copy acts the same.
/// Captured script values stay shared, as does a cell that is locked now.
pub(crate) fn detach_host_handles(func: &FnPtr) -> FnPtr {
    let curry: Vec<Dynamic> = func.iter_curry().map(detach_handle).collect();
    let mut detached = func.clone();
    detached.set_curry(curry);
    detached
}

fn detach_handle(value: &Dynamic) -> Dynamic {
    if !value.is_shared() {
        return value.clone();
    }
    let inner = value.flatten_clone();
    let is_handle = !inner.is_shared()
        && (inner.is::<PluginApi>()
            || inner.is::<WidgetsApi>()
            || inner.is::<SandboxApi>()
            || inner.is::<NodeHandle>()
            || inner.is::<WidgetBox>());
    if is_handle {
        inner
    } else {
        value.clone()
    }
}

/// `api.widgets`
#[derive(Clone)]
pub struct WidgetsApi {
    api: PluginApi,
    registry: WidgetRegistry,
}

/// `api.sandbox`
#[derive(Debug, Clone)]
pub struct SandboxApi(EventBus);

/// Register the plugin-facing types on `engine`
pub fn register_plugin_api(engine: &mut Engine) {
    register_widget_api(engine);

    engine.register_type_with_name::<PluginApi>("PluginApi");
    engine.register_get("name", |api: &mut PluginApi| api.plugin.clone());
    engine.register_get("prototype", |api: &mut PluginApi| api.prototype());
    engine.register_get("vehicle", |api: &mut PluginApi| -> RhaiResult<NodeHandle> {
        api.vehicle().map_err(SandboxError::into_rhai)
    });
    engine.register_get("widgets", |api: &mut PluginApi| WidgetsApi {
        api: api.clone(),
        registry: api.capabilities.widgets.clone(),
    });
    engine.register_get("sandbox", |api: &mut PluginApi| {
        SandboxApi(api.capabilities.events.clone())
    });

    engine.register_fn(
        "simulator",
        |api: PluginApi, path: &str, operation: &str, transform: FnPtr| -> RhaiResult<()> {
            let operation: Operation = operation.parse().map_err(SandboxError::into_rhai)?;
            api.simulator(path, operation, transform);
            Ok(())
        },
    );
    engine.register_fn(
        "model_object",
        |api: PluginApi, root: &str| -> RhaiResult<NodeHandle> {
            api.model_object(root).map_err(SandboxError::into_rhai)
        },
    );

    engine.register_type_with_name::<WidgetsApi>("WidgetsApi");
    engine.register_fn(
        "register",
        |widgets: WidgetsApi, name: &str, on_activate: FnPtr| {
            let callback = widgets.api.callback(on_activate);
            widgets
                .registry
                .register(Widget::new(widgets.api.plugin(), name, callback));
        },
    );
    engine.register_fn("names", |widgets: WidgetsApi| -> Array {
        widgets.registry.names().into_iter().map(Dynamic::from).collect()
    });

    engine.register_type_with_name::<SandboxApi>("SandboxApi");
    engine.register_fn(
        "emit",
        |sandbox: SandboxApi, name: &str, payload: Dynamic| -> RhaiResult<i64> {
            let payload = dynamic_to_json(&payload)?;
            Ok(sandbox.0.emit(name, payload) as i64)
        },
    );
    engine.register_fn("emit", |sandbox: SandboxApi, name: &str| -> i64 {
        sandbox.0.emit(name, serde_json::Value::Null) as i64
    });
}
