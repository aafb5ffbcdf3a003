//! Integration tests for plugin loading
//!
//! These tests load real plugin modules from a temporary directory:
//! - N descriptors with M failures yield N - M hook maps
//! - Simulators registered by plugins shape proxy reads
//! - Widgets and events registered through the api object
//! - Plugin closures reading signals through their own `api`

mod common;

use common::builders::PluginDirBuilder;
use common::{errors, texts};
use proto_sandbox::config::PrototypeConfig;
use proto_sandbox::plugin::{HookArg, SurfaceOp, WidgetBox};
use proto_sandbox::{
    Capabilities, EventBus, Operation, PluginLoader, SandboxError, SandboxOptions,
    SandboxSession, Session, SignalValue,
};
use serde_json::json;

fn capabilities() -> Capabilities {
    Capabilities::new(Session::new(common::vehicle_schema()), EventBus::new())
}

const SPEED_SIM: &str = r#"
fn plugin(api) {
    api.simulator("Vehicle.Speed", "get", |args, prev| prev + 20.0);
    #{
        describe: || `speed sim for ${api.prototype.name}`,
        echo: |value| value,
    }
}
"#;

const SCALE_SIM: &str = r#"
fn plugin(api) {
    api.simulator("Vehicle.Speed", "get", |args, prev| prev * 3.0);
    api.simulator("Vehicle.Gear", "set", |args, prev| if prev > 6 { 6 } else { prev });
}
"#;

// Speed follows Gear; every closure reads through the captured `api`
const FOLLOW_GEAR: &str = r#"
fn plugin(api) {
    api.simulator("Vehicle.Speed", "get", |args, prev| api.vehicle.Gear.get() * 1.0);
    api.widgets.register("speedo", |surface| {
        surface.inject_html(`${api.vehicle.Speed.get()}`);
    });
    #{ read: || api.vehicle.Speed.get() }
}
"#;

#[tokio::test]
async fn test_partial_failures_degrade_gracefully() {
    let dir = PluginDirBuilder::new()
        .plugin("speed", SPEED_SIM)
        .missing("ghost")
        .plugin("syntax", "fn plugin(api) { let = 1; }")
        .plugin("scale", SCALE_SIM)
        .plugin("thrower", r#"fn plugin(api) { throw "refusing to start"; }"#);

    let caps = capabilities();
    let outcome = PluginLoader::from_dir(dir.path())
        .load(dir.descriptors(), &caps)
        .await;

    assert_eq!(outcome.hooks.len(), 5);
    assert_eq!(outcome.loaded_count(), 2);
    assert_eq!(outcome.failures.len(), 3);
    assert!(outcome.hooks[0].is_some());
    assert!(outcome.hooks[1].is_none());
    assert!(outcome.hooks[2].is_none());
    assert!(outcome.hooks[3].is_some());
    assert!(outcome.hooks[4].is_none());

    let failed: Vec<&str> = outcome.failures.iter().map(|f| f.plugin.as_str()).collect();
    assert_eq!(failed, vec!["ghost", "syntax", "thrower"]);
    assert!(matches!(
        outcome.failures[0].error,
        SandboxError::PluginImport { .. }
    ));
    assert!(matches!(
        outcome.failures[2].error,
        SandboxError::PluginExecution { .. }
    ));
}

#[tokio::test]
async fn test_simulators_compose_in_load_order() {
    let dir = PluginDirBuilder::new()
        .plugin("speed", SPEED_SIM)
        .plugin("scale", SCALE_SIM);

    let caps = capabilities();
    let outcome = PluginLoader::from_dir(dir.path())
        .load(dir.descriptors(), &caps)
        .await;
    assert_eq!(outcome.session_id, caps.session.id());

    let interceptor = outcome
        .interceptor("Vehicle.Speed", Operation::Get)
        .unwrap();
    assert_eq!(interceptor.owners().collect::<Vec<_>>(), vec!["speed", "scale"]);

    // scale(speed(10)) = (10 + 20) * 3
    let vehicle = caps.session.vehicle("Vehicle").unwrap();
    vehicle.set("Speed", SignalValue::Float(10.0)).unwrap();
    assert_eq!(vehicle.get("Speed").unwrap(), SignalValue::Float(90.0));

    let gear = vehicle.resolve("Gear").unwrap();
    gear.set_intercepted(SignalValue::Int(9)).unwrap();
    assert_eq!(gear.get().unwrap(), SignalValue::Int(6));
}

#[tokio::test]
async fn test_hooks_receive_normalized_arguments() {
    let dir = PluginDirBuilder::new().plugin("speed", SPEED_SIM);
    let caps = capabilities().with_prototype(PrototypeConfig {
        name: "Door demo".to_string(),
        customer_journey: String::new(),
    });
    let outcome = PluginLoader::from_dir(dir.path())
        .load(dir.descriptors(), &caps)
        .await;

    assert_eq!(
        outcome.registry.call("speed", "describe", vec![]).unwrap(),
        json!("speed sim for Door demo")
    );
    let echoed = outcome
        .registry
        .call(
            "speed",
            "echo",
            vec![HookArg::deferred(|| Ok(json!({"lazy": [1, 2]})))],
        )
        .unwrap();
    assert_eq!(echoed, json!({"lazy": [1, 2]}));

    assert!(matches!(
        outcome.registry.call("speed", "missing", vec![]),
        Err(SandboxError::PluginExecution { .. })
    ));
}

#[tokio::test]
async fn test_widgets_and_events() {
    let dir = PluginDirBuilder::new().plugin(
        "dash",
        r#"
        fn plugin(api) {
            api.widgets.register("gauge", |surface| {
                surface.inject_html(`<div id="${surface.window().id}"></div>`);
                surface.trigger_popup(#{ text: "hello" });
                || surface.inject_html("bye")
            });
            api.sandbox.emit("plugin-ready", #{ name: "dash" });
        }
        "#,
    );

    let caps = capabilities();
    let mut events = caps.events.subscribe();
    let outcome = PluginLoader::from_dir(dir.path())
        .load(dir.descriptors(), &caps)
        .await;
    assert_eq!(outcome.loaded_count(), 1);

    let event = events.try_recv().unwrap();
    assert_eq!(event.name, "plugin-ready");
    assert_eq!(event.payload, json!({"name": "dash"}));

    let active = caps.widgets.activate("gauge", WidgetBox::new("w1")).unwrap();
    assert_eq!(active.surface().ops().len(), 2);
    let surface = active.surface().clone();
    active.deactivate().unwrap();
    assert_eq!(surface.ops().len(), 3);
}

#[tokio::test]
async fn test_file_urls_and_plugin_side_subscribe() {
    let dir = PluginDirBuilder::new().file(
        "sub.rhai",
        r#"
        fn plugin(api) {
            #{ try_subscribe: || api.vehicle.Speed.subscribe() }
        }
        "#,
    );
    let url = format!("file://{}", dir.join("sub.rhai").display());
    let descriptors = vec![proto_sandbox::PluginDescriptor::new("sub", url)];

    let caps = capabilities();
    let outcome = PluginLoader::from_dir(dir.path())
        .load(&descriptors, &caps)
        .await;
    assert_eq!(outcome.loaded_count(), 1);

    let err = outcome
        .registry
        .call("sub", "try_subscribe", vec![])
        .unwrap_err();
    assert!(err.to_string().contains("cannot be called from a plugin"));
}

#[tokio::test]
async fn test_plugin_closures_reenter_the_proxy_through_api() {
    let dir = PluginDirBuilder::new().plugin("follow", FOLLOW_GEAR);
    let caps = capabilities();
    let outcome = PluginLoader::from_dir(dir.path())
        .load(dir.descriptors(), &caps)
        .await;
    assert_eq!(outcome.loaded_count(), 1);

    caps.session
        .vehicle("Vehicle")
        .unwrap()
        .set("Gear", SignalValue::Int(4))
        .unwrap();

    assert_eq!(
        outcome.registry.call("follow", "read", vec![]).unwrap(),
        json!(4.0)
    );
    assert_eq!(
        outcome.registry.call("follow", "read", vec![]).unwrap(),
        json!(4.0)
    );

    let active = caps.widgets.activate("speedo", WidgetBox::new("w1")).unwrap();
    assert_eq!(
        active.surface().ops(),
        vec![SurfaceOp::InjectHtml {
            html: "4.0".to_string()
        }]
    );
}

#[tokio::test]
async fn test_sandbox_invokes_hooks_that_reenter_the_proxy() {
    let dir = PluginDirBuilder::new().plugin("follow", FOLLOW_GEAR);
    let session = Session::new(common::vehicle_schema());
    let sandbox = SandboxSession::open(session.clone(), SandboxOptions::default()).unwrap();
    let caps = Capabilities::new(session.clone(), sandbox.events().clone());
    let outcome = PluginLoader::from_dir(dir.path())
        .load(dir.descriptors(), &caps)
        .await;
    sandbox.attach_plugins(&outcome.registry).unwrap();

    session
        .vehicle("Vehicle")
        .unwrap()
        .set("Gear", SignalValue::Int(4))
        .unwrap();

    let output = sandbox
        .run_code(
            r#"
            print(plugins.invoke("follow", "read", []));
            print(vehicle.Speed.get());
            "#,
        )
        .await
        .unwrap();
    assert!(errors(&output).is_empty(), "{:?}", output);
    assert_eq!(texts(&output), vec!["4.0", "4.0"]);
}
