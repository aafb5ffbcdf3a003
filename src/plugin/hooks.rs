//! Plugin hooks
//!
//! A plugin factory returns a map of named closures. Each closure is wrapped
//! in a [`PluginHook`] that normalises its arguments before calling into the
//! plugin: deferred arguments are resolved and the results forwarded as JSON.

use crate::error::{Result, SandboxError};
use crate::scripting::engine::{dynamic_to_json, json_to_dynamic};
use rhai::{Dynamic, Engine, FnPtr, AST};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, RwLock};

/// A value produced when the hook is invoked
pub type DeferredValue = Box<dyn FnOnce() -> Result<serde_json::Value> + Send>;

/// An argument passed to a hook
pub enum HookArg {
    Value(serde_json::Value),
    /// Resolved immediately before the hook runs
    Deferred(DeferredValue),
}

impl HookArg {
    pub fn deferred<F>(f: F) -> Self
    where
        F: FnOnce() -> Result<serde_json::Value> + Send + 'static,
    {
        HookArg::Deferred(Box::new(f))
    }

    pub fn resolve(self) -> Result<serde_json::Value> {
        match self {
            HookArg::Value(value) => Ok(value),
            HookArg::Deferred(f) => f(),
        }
    }
}

impl From<serde_json::Value> for HookArg {
    fn from(value: serde_json::Value) -> Self {
        HookArg::Value(value)
    }
}

impl fmt::Debug for HookArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookArg::Value(value) => f.debug_tuple("Value").field(value).finish(),
            HookArg::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}

/// Resolve every deferred argument, in order
pub fn normalize_args(args: Vec<HookArg>) -> Result<Vec<serde_json::Value>> {
    args.into_iter().map(HookArg::resolve).collect()
}

/// A callable hook exported by a plugin
#[derive(Clone)]
pub struct PluginHook {
    plugin: String,
    name: String,
    engine: Arc<Engine>,
    ast: Arc<AST>,
    func: FnPtr,
}

impl PluginHook {
    pub fn new(
        plugin: impl Into<String>,
        name: impl Into<String>,
        engine: Arc<Engine>,
        ast: Arc<AST>,
        func: FnPtr,
    ) -> Self {
        Self {
            plugin: plugin.into(),
            name: name.into(),
            engine,
            ast,
            func,
        }
    }

    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Normalise `args` and invoke the hook
    pub fn call(&self, args: Vec<HookArg>) -> Result<serde_json::Value> {
        let args = normalize_args(args)?;
        self.call_json(&args)
    }

    /// Invoke the hook with already-resolved arguments
    pub fn call_json(&self, args: &[serde_json::Value]) -> Result<serde_json::Value> {
        let args = args
            .iter()
            .map(json_to_dynamic)
            .collect::<std::result::Result<Vec<Dynamic>, _>>()
            .map_err(|e| self.failure(e))?;

        let result: Dynamic = self
            .func
            .call(&self.engine, &self.ast, args)
            .map_err(|e| self.failure(e))?;

        dynamic_to_json(&result).map_err(|e| self.failure(e))
    }

    fn failure(&self, err: impl fmt::Display) -> SandboxError {
        SandboxError::PluginExecution {
            plugin: self.plugin.clone(),
            message: format!("hook '{}': {}", self.name, err),
        }
    }
}

impl fmt::Debug for PluginHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginHook")
            .field("plugin", &self.plugin)
            .field("name", &self.name)
            .finish()
    }
}

/// Hook name to hook, for one plugin
pub type PluginHookMap = BTreeMap<String, PluginHook>;

/// Hooks of every loaded plugin, shared with the sandbox
#[derive(Debug, Clone, Default)]
pub struct HookRegistry {
    plugins: Arc<RwLock<BTreeMap<String, PluginHookMap>>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, plugin: impl Into<String>, hooks: PluginHookMap) {
        self.plugins
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(plugin.into(), hooks);
    }

    pub fn get(&self, plugin: &str, hook: &str) -> Option<PluginHook> {
        self.plugins
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(plugin)
            .and_then(|hooks| hooks.get(hook))
            .cloned()
    }

    /// Plugin names, sorted
    pub fn names(&self) -> Vec<String> {
        self.plugins
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    /// Hook names of `plugin`, sorted; empty when the plugin is unknown
    pub fn hooks(&self, plugin: &str) -> Vec<String> {
        self.plugins
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(plugin)
            .map(|hooks| hooks.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Look up and invoke a hook. The registry lock is not held during the call.
    pub fn call(&self, plugin: &str, hook: &str, args: Vec<HookArg>) -> Result<serde_json::Value> {
        let target = self.get(plugin, hook).ok_or_else(|| SandboxError::PluginExecution {
            plugin: plugin.to_string(),
            message: format!("no hook named '{}'", hook),
        })?;
        target.call(args)
    }

    pub fn len(&self) -> usize {
        self.plugins.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn hook(source: &str) -> PluginHook {
        let engine = Arc::new(Engine::new());
        let ast = Arc::new(engine.compile(source).unwrap());
        let func: FnPtr = engine.eval_ast(&ast).unwrap();
        PluginHook::new("test", "hook", engine, ast, func)
    }

    #[test]
    fn test_deferred_args_are_resolved_in_order() {
        let args = vec![
            HookArg::Value(json!(1)),
            HookArg::deferred(|| Ok(json!("later"))),
        ];
        assert_eq!(normalize_args(args).unwrap(), vec![json!(1), json!("later")]);
    }

    #[test]
    fn test_failing_deferred_arg_fails_the_call() {
        let args = vec![HookArg::deferred(|| {
            Err(SandboxError::Script("not ready".to_string()))
        })];
        assert!(normalize_args(args).is_err());
    }

    #[test]
    fn test_hook_call_roundtrips_json() {
        let h = hook("|a, b| #{ sum: a + b.x }");
        let out = h
            .call(vec![
                HookArg::Value(json!(2)),
                HookArg::deferred(|| Ok(json!({"x": 3}))),
            ])
            .unwrap();
        assert_eq!(out, json!({"sum": 5}));
    }

    #[test]
    fn test_hook_error_names_plugin() {
        let h = hook("|| { throw \"nope\"; }");
        let err = h.call(vec![]).unwrap_err();
        match err {
            SandboxError::PluginExecution { plugin, message } => {
                assert_eq!(plugin, "test");
                assert!(message.contains("nope"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_registry_lookup() {
        let registry = HookRegistry::new();
        let mut hooks = PluginHookMap::new();
        hooks.insert("ping".to_string(), hook("|| \"pong\""));
        registry.insert("net", hooks);

        assert_eq!(registry.names(), vec!["net".to_string()]);
        assert_eq!(registry.hooks("net"), vec!["ping".to_string()]);
        assert!(registry.hooks("missing").is_empty());
        assert_eq!(registry.call("net", "ping", vec![]).unwrap(), json!("pong"));
        assert!(registry.call("net", "pang", vec![]).is_err());
    }
}
