//! Widget registration and activation
//!
//! Plugins register widgets with `api.widgets.register(name, on_activate)`.
//! When the host activates a widget it hands over a [`WidgetBox`], an
//! isolated rendering surface. The plugin draws into it through
//! `surface.inject_html(..)`, `surface.inject_node(..)` and `surface.trigger_popup(..)`,
//! which are recorded as [`SurfaceOp`]s for the host UI to apply. If
//! `on_activate` returns a closure, it is kept as the deactivation callback.

use super::api::detach_host_handles;
use crate::error::{Result, SandboxError};
use crate::scripting::engine::dynamic_to_json;
use rhai::{Dynamic, Engine, EvalAltResult, FnPtr, Map, AST};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

/// One drawing operation on a widget surface
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SurfaceOp {
    InjectHtml { html: String },
    InjectNode { node: serde_json::Value },
    TriggerPopup {
        node: serde_json::Value,
        class_name: Option<String>,
    },
}

/// Rendering surface handed to `on_activate`
#[derive(Debug, Clone)]
pub struct WidgetBox {
    id: String,
    ops: Arc<Mutex<Vec<SurfaceOp>>>,
}

impl WidgetBox {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ops: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    fn record(&self, op: SurfaceOp) {
        self.ops.lock().unwrap_or_else(|e| e.into_inner()).push(op);
    }

    pub fn inject_html(&self, html: impl Into<String>) {
        self.record(SurfaceOp::InjectHtml { html: html.into() });
    }

    pub fn inject_node(&self, node: serde_json::Value) {
        self.record(SurfaceOp::InjectNode { node });
    }

    pub fn trigger_popup(&self, node: serde_json::Value, class_name: Option<String>) {
        self.record(SurfaceOp::TriggerPopup { node, class_name });
    }

    /// Operations recorded so far
    pub fn ops(&self) -> Vec<SurfaceOp> {
        self.ops.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Drain recorded operations
    pub fn take_ops(&self) -> Vec<SurfaceOp> {
        std::mem::take(&mut *self.ops.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

/// A script callback bound to the AST it was defined in.
///
/// Clones share the function pointer, so [`ScriptCallback::detach_host_handles`]
/// reaches every copy already handed out.
#[derive(Clone)]
pub(crate) struct ScriptCallback {
    engine: Arc<Engine>,
    ast: Arc<AST>,
    func: Arc<RwLock<FnPtr>>,
}

impl ScriptCallback {
    pub(crate) fn new(engine: Arc<Engine>, ast: Arc<AST>, func: FnPtr) -> Self {
        Self {
            engine,
            ast,
            func: Arc::new(RwLock::new(func)),
        }
    }

    /// Another callback from the same plugin
    pub(crate) fn sibling(&self, func: FnPtr) -> Self {
        Self::new(self.engine.clone(), self.ast.clone(), func)
    }

    pub(crate) fn call(
        &self,
        args: Vec<Dynamic>,
    ) -> std::result::Result<Dynamic, Box<EvalAltResult>> {
        let func = self.func.read().unwrap_or_else(|e| e.into_inner()).clone();
        func.call(&self.engine, &self.ast, args)
    }

    pub(crate) fn detach_host_handles(&self) {
        let mut func = self.func.write().unwrap_or_else(|e| e.into_inner());
        *func = detach_host_handles(&func);
    }
}

/// A registered widget
#[derive(Clone)]
pub struct Widget {
    pub plugin: String,
    pub name: String,
    on_activate: ScriptCallback,
}

impl Widget {
    pub(crate) fn new(plugin: &str, name: &str, on_activate: ScriptCallback) -> Self {
        Self {
            plugin: plugin.to_string(),
            name: name.to_string(),
            on_activate,
        }
    }
}

impl fmt::Debug for Widget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Widget")
            .field("plugin", &self.plugin)
            .field("name", &self.name)
            .finish()
    }
}

/// Shared registry of widgets by name
#[derive(Debug, Clone, Default)]
pub struct WidgetRegistry {
    widgets: Arc<RwLock<BTreeMap<String, Widget>>>,
}

impl WidgetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `widget`, replacing any widget of the same name
    pub fn register(&self, widget: Widget) {
        let mut widgets = self.widgets.write().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = widgets.get(&widget.name) {
            tracing::warn!(
                "Widget '{}' from '{}' replaces the one from '{}'",
                widget.name,
                widget.plugin,
                previous.plugin
            );
        }
        tracing::debug!("Registered widget '{}' from '{}'", widget.name, widget.plugin);
        widgets.insert(widget.name.clone(), widget);
    }

    /// Drop every widget registered by `plugin`
    pub fn remove_plugin(&self, plugin: &str) -> usize {
        let mut widgets = self.widgets.write().unwrap_or_else(|e| e.into_inner());
        let before = widgets.len();
        widgets.retain(|_, widget| widget.plugin != plugin);
        before - widgets.len()
    }

    pub fn names(&self) -> Vec<String> {
        self.widgets
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.widgets
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.widgets.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run the widget's `on_activate` with `surface`
    pub fn activate(&self, name: &str, surface: WidgetBox) -> Result<ActiveWidget> {
        let widget = self
            .widgets
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
            .ok_or_else(|| SandboxError::Widget(format!("No widget named '{}'", name)))?;

        let returned = widget
            .on_activate
            .call(vec![Dynamic::from(surface.clone())])
            .map_err(|e| SandboxError::Widget(format!("Activating '{}': {}", name, e)))?;

        let deactivator = if returned.is_fnptr() {
            let func = detach_host_handles(&returned.cast::<FnPtr>());
            Some(widget.on_activate.sibling(func))
        } else {
            None
        };

        tracing::info!("Activated widget '{}'", name);
        Ok(ActiveWidget {
            name: name.to_string(),
            surface,
            deactivator,
        })
    }
}

/// A widget that has been activated
pub struct ActiveWidget {
    name: String,
    surface: WidgetBox,
    deactivator: Option<ScriptCallback>,
}

impl ActiveWidget {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn surface(&self) -> &WidgetBox {
        &self.surface
    }

    pub fn has_deactivator(&self) -> bool {
        self.deactivator.is_some()
    }

    /// Run the deactivation callback, if one was returned
    pub fn deactivate(self) -> Result<()> {
        if let Some(callback) = self.deactivator {
            callback
                .call(Vec::new())
                .map_err(|e| SandboxError::Widget(format!("Deactivating '{}': {}", self.name, e)))?;
        }
        tracing::info!("Deactivated widget '{}'", self.name);
        Ok(())
    }
}

impl fmt::Debug for ActiveWidget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveWidget")
            .field("name", &self.name)
            .field("has_deactivator", &self.has_deactivator())
            .finish()
    }
}

/// Register the `WidgetBox` script type
pub fn register_widget_api(engine: &mut Engine) {
    engine.register_type_with_name::<WidgetBox>("WidgetBox");
    engine.register_fn("window", |surface: WidgetBox| -> Map {
        let mut window = Map::new();
        window.insert("id".into(), Dynamic::from(surface.id().to_string()));
        window
    });
    engine.register_fn("inject_html", |surface: WidgetBox, html: &str| {
        surface.inject_html(html);
    });
    engine.register_fn(
        "inject_node",
        |surface: WidgetBox, node: Dynamic| -> std::result::Result<(), Box<EvalAltResult>> {
            surface.inject_node(dynamic_to_json(&node)?);
            Ok(())
        },
    );
    engine.register_fn(
        "trigger_popup",
        |surface: WidgetBox, node: Dynamic| -> std::result::Result<(), Box<EvalAltResult>> {
            surface.trigger_popup(dynamic_to_json(&node)?, None);
            Ok(())
        },
    );
    engine.register_fn(
        "trigger_popup",
        |surface: WidgetBox,
         node: Dynamic,
         class_name: &str|
         -> std::result::Result<(), Box<EvalAltResult>> {
            surface.trigger_popup(dynamic_to_json(&node)?, Some(class_name.to_string()));
            Ok(())
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn widget(source: &str) -> Widget {
        let mut engine = Engine::new();
        register_widget_api(&mut engine);
        let engine = Arc::new(engine);
        let ast = Arc::new(engine.compile(source).unwrap());
        let func: FnPtr = engine.eval_ast(&ast).unwrap();
        Widget::new("test", "panel", ScriptCallback::new(engine, ast, func))
    }

    #[test]
    fn test_activation_records_surface_ops() {
        let registry = WidgetRegistry::new();
        registry.register(widget(
            r#"|surface| {
                surface.inject_html("<b>hi</b>");
                surface.inject_node(#{ tag: "div" });
                surface.trigger_popup("alert", "warning");
            }"#,
        ));

        let active = registry.activate("panel", WidgetBox::new("box-1")).unwrap();
        assert!(!active.has_deactivator());
        assert_eq!(
            active.surface().ops(),
            vec![
                SurfaceOp::InjectHtml {
                    html: "<b>hi</b>".to_string()
                },
                SurfaceOp::InjectNode {
                    node: json!({"tag": "div"})
                },
                SurfaceOp::TriggerPopup {
                    node: json!("alert"),
                    class_name: Some("warning".to_string())
                },
            ]
        );
        active.deactivate().unwrap();
    }

    #[test]
    fn test_returned_closure_becomes_deactivator() {
        let registry = WidgetRegistry::new();
        registry.register(widget(
            r#"|surface| {
                surface.inject_html("on");
                || surface.inject_html("off")
            }"#,
        ));

        let surface = WidgetBox::new("box-2");
        let active = registry.activate("panel", surface.clone()).unwrap();
        assert!(active.has_deactivator());
        active.deactivate().unwrap();
        assert_eq!(surface.take_ops().len(), 2);
        assert!(surface.ops().is_empty());
    }

    #[test]
    fn test_window_handle() {
        let registry = WidgetRegistry::new();
        registry.register(widget(r#"|surface| { surface.inject_html(surface.window().id); }"#));
        let active = registry.activate("panel", WidgetBox::new("box-3")).unwrap();
        assert_eq!(
            active.surface().ops(),
            vec![SurfaceOp::InjectHtml {
                html: "box-3".to_string()
            }]
        );
    }

    #[test]
    fn test_unknown_widget() {
        let registry = WidgetRegistry::new();
        assert!(matches!(
            registry.activate("nope", WidgetBox::new("x")),
            Err(SandboxError::Widget(_))
        ));
    }
}
