//! Plugin loading
//!
//! A plugin is a Rhai module exporting a factory:
//!
//! ```rhai
//! fn plugin(api) {
//!     api.simulator("Vehicle.Speed", "get", |args, prev| prev * 2.0);
//!     #{ greet: |name| `hello ${name}` }
//! }
//! ```
//!
//! [`PluginLoader::load`] fetches every module concurrently, then runs the
//! factories one by one in descriptor order. A plugin that fails to import
//! or whose factory throws is logged, recorded in
//! [`LoadOutcome::failures`] and skipped; the others load normally.

pub mod api;
pub mod fetch;
pub mod hooks;
pub mod widgets;

pub use api::PluginApi;
pub use fetch::{FileFetcher, ModuleFetcher};
pub use hooks::{HookArg, HookRegistry, PluginHook, PluginHookMap};
pub use widgets::{ActiveWidget, SurfaceOp, WidgetBox, WidgetRegistry};

use crate::config::{PrototypeConfig, RuntimeConfig, SandboxConfig, DEFAULT_VEHICLE_ROOT};
use crate::error::{Result, SandboxError};
use crate::events::EventBus;
use crate::id::SessionId;
use crate::scripting::engine::{new_engine, SetPolicy};
use crate::scripting::translate::normalize_source;
use crate::session::Session;
use crate::simulator::{Interceptor, SimulatorChain};
use crate::types::Operation;
use futures::future::join_all;
use rhai::{Dynamic, Engine, FnPtr, Map, Scope};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::Instrument;

/// Name of the factory every plugin module must define
pub const FACTORY_FN: &str = "plugin";

/// A plugin to load
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    pub name: String,
    pub module_url: String,
}

impl PluginDescriptor {
    pub fn new(name: impl Into<String>, module_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            module_url: module_url.into(),
        }
    }
}

/// What plugins are allowed to touch
#[derive(Debug, Clone)]
pub struct Capabilities {
    pub session: Session,
    pub widgets: WidgetRegistry,
    pub events: EventBus,
    pub prototype: PrototypeConfig,
    /// Schema root bound to `api.vehicle`
    pub vehicle_root: String,
    pub limits: SandboxConfig,
}

impl Capabilities {
    pub fn new(session: Session, events: EventBus) -> Self {
        Self {
            session,
            widgets: WidgetRegistry::new(),
            events,
            prototype: PrototypeConfig::default(),
            vehicle_root: DEFAULT_VEHICLE_ROOT.to_string(),
            limits: SandboxConfig::default(),
        }
    }

    pub fn from_config(session: Session, events: EventBus, config: &RuntimeConfig) -> Self {
        Self {
            prototype: config.prototype.clone(),
            vehicle_root: config.vehicle.root.clone(),
            limits: config.sandbox.clone(),
            ..Self::new(session, events)
        }
    }

    pub fn with_prototype(mut self, prototype: PrototypeConfig) -> Self {
        self.prototype = prototype;
        self
    }

    pub fn with_widgets(mut self, widgets: WidgetRegistry) -> Self {
        self.widgets = widgets;
        self
    }

    pub fn with_vehicle_root(mut self, root: impl Into<String>) -> Self {
        self.vehicle_root = root.into();
        self
    }
}

/// A plugin that was skipped
#[derive(Debug)]
pub struct PluginFailure {
    pub plugin: String,
    pub error: SandboxError,
}

/// Result of [`PluginLoader::load`]
#[derive(Debug)]
pub struct LoadOutcome {
    pub session_id: SessionId,
    pub simulators: SimulatorChain,
    /// One entry per descriptor, `None` where the plugin failed
    pub hooks: Vec<Option<PluginHookMap>>,
    pub registry: HookRegistry,
    pub failures: Vec<PluginFailure>,
}

impl LoadOutcome {
    pub fn interceptor(&self, path: &str, operation: Operation) -> Option<Interceptor> {
        self.simulators.interceptor(path, operation)
    }

    pub fn loaded_count(&self) -> usize {
        self.hooks.iter().filter(|h| h.is_some()).count()
    }
}

/// Loads plugin modules against a set of [`Capabilities`]
pub struct PluginLoader {
    fetcher: Arc<dyn ModuleFetcher>,
}

impl PluginLoader {
    pub fn new(fetcher: impl ModuleFetcher + 'static) -> Self {
        Self {
            fetcher: Arc::new(fetcher),
        }
    }

    /// Loader reading modules relative to `dir`
    pub fn from_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(FileFetcher::new(dir.as_ref()))
    }

    /// Import and instantiate every plugin in `descriptors`.
    ///
    /// Never fails as a whole: failures are collected per plugin.
    pub async fn load(
        &self,
        descriptors: &[PluginDescriptor],
        capabilities: &Capabilities,
    ) -> LoadOutcome {
        let span = tracing::info_span!("plugin_load", session = %capabilities.session.id());
        self.load_inner(descriptors, capabilities)
            .instrument(span)
            .await
    }

    async fn load_inner(
        &self,
        descriptors: &[PluginDescriptor],
        capabilities: &Capabilities,
    ) -> LoadOutcome {
        tracing::info!("Loading {} plugins", descriptors.len());
        let sources = join_all(
            descriptors
                .iter()
                .map(|descriptor| self.fetcher.fetch(&descriptor.module_url)),
        )
        .await;

        let engine = Arc::new(plugin_engine(&capabilities.limits));
        let registry = HookRegistry::new();
        let mut hooks = Vec::with_capacity(descriptors.len());
        let mut failures = Vec::new();

        let mut seen = HashSet::new();
        for (descriptor, source) in descriptors.iter().zip(sources) {
            // Registrations and rollback are keyed by name
            if !seen.insert(descriptor.name.as_str()) {
                let error = SandboxError::PluginImport {
                    plugin: descriptor.name.clone(),
                    message: "another plugin with this name is already loaded".to_string(),
                };
                tracing::warn!("Skipping plugin '{}': {}", descriptor.name, error);
                hooks.push(None);
                failures.push(PluginFailure {
                    plugin: descriptor.name.clone(),
                    error,
                });
                continue;
            }

            match instantiate(&engine, descriptor, source, capabilities) {
                Ok(map) => {
                    tracing::info!(
                        "Loaded plugin '{}' with {} hooks",
                        descriptor.name,
                        map.len()
                    );
                    registry.insert(descriptor.name.clone(), map.clone());
                    hooks.push(Some(map));
                }
                Err(error) => {
                    tracing::warn!("Skipping plugin '{}': {}", descriptor.name, error);
                    capabilities.session.simulators().remove_owner(&descriptor.name);
                    capabilities.widgets.remove_plugin(&descriptor.name);
                    hooks.push(None);
                    failures.push(PluginFailure {
                        plugin: descriptor.name.clone(),
                        error,
                    });
                }
            }
        }

        LoadOutcome {
            session_id: capabilities.session.id(),
            simulators: capabilities.session.simulators().clone(),
            hooks,
            registry,
            failures,
        }
    }
}

impl fmt::Debug for PluginLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginLoader").finish_non_exhaustive()
    }
}

/// Engine shared by every plugin of one load
fn plugin_engine(limits: &SandboxConfig) -> Engine {
    let mut engine = new_engine(limits, SetPolicy::Direct);
    api::register_plugin_api(&mut engine);
    engine.on_print(|text| tracing::info!(target: "plugin", "{}", text));
    engine.on_debug(|text, source, pos| {
        tracing::debug!(target: "plugin", "[{}] {:?} {}", source.unwrap_or("?"), pos, text)
    });
    engine
}

fn instantiate(
    engine: &Arc<Engine>,
    descriptor: &PluginDescriptor,
    source: Result<String>,
    capabilities: &Capabilities,
) -> Result<PluginHookMap> {
    let plugin = descriptor.name.as_str();
    let import_error = |message: String| SandboxError::PluginImport {
        plugin: plugin.to_string(),
        message,
    };
    let execution_error = |message: String| SandboxError::PluginExecution {
        plugin: plugin.to_string(),
        message,
    };

    let source = source.map_err(|e| import_error(e.to_string()))?;
    let mut ast = engine
        .compile(normalize_source(&source))
        .map_err(|e| import_error(e.to_string()))?;
    ast.set_source(plugin);

    let has_factory = ast
        .iter_functions()
        .any(|f| f.name == FACTORY_FN && f.params.len() == 1);
    if !has_factory {
        return Err(execution_error(format!(
            "module does not define fn {}(api)",
            FACTORY_FN
        )));
    }

    let ast = Arc::new(ast);
    let api = PluginApi::new(plugin, engine.clone(), ast.clone(), capabilities.clone());
    let exported: Dynamic = engine
        .call_fn(&mut Scope::new(), &ast, FACTORY_FN, (api.clone(),))
        .map_err(|e| execution_error(e.to_string()))?;
    api.detach_callbacks();

    let exported = exported.flatten();
    if exported.is_unit() {
        return Ok(PluginHookMap::new());
    }
    let exported = exported.try_cast::<Map>().ok_or_else(|| {
        execution_error(format!("{}() must return a map of hooks", FACTORY_FN))
    })?;

    let mut hooks = PluginHookMap::new();
    for (name, value) in exported {
        let value = value.flatten();
        if !value.is_fnptr() {
            tracing::warn!(
                "Plugin '{}' export '{}' is a {}, not a function; ignored",
                plugin,
                name,
                value.type_name()
            );
            continue;
        }
        let func = api::detach_host_handles(&value.cast::<FnPtr>());
        hooks.insert(
            name.to_string(),
            PluginHook::new(plugin, name.as_str(), engine.clone(), ast.clone(), func),
        );
    }
    Ok(hooks)
}
