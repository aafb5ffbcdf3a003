//! # proto-sandbox: prototype script runtime
//!
//! Runs untrusted prototype scripts in an isolated Rhai sandbox against a
//! vehicle signal schema, with plugins that can override signal behaviour.
//!
//! ## Architecture
//!
//! - **Session**: schema, value store, monitor and simulator chain for one run
//! - **Vehicle**: the signal proxy scripts and plugins use (`vehicle.Speed.get()`)
//! - **Plugin**: loads plugin modules, which register simulators, widgets and hooks
//! - **Scripting**: the sandbox worker thread executing scripts in FIFO order
//! - **Communication**: crossbeam command channel to the worker, tokio
//!   primitives back to the host
//!
//! ## Configuration
//!
//! Runtime configuration is TOML, by default in the platform config directory
//! under `dev.proto-sandbox` (see [`config`]).
//!
//! ## Example
//!
//! ```ignore
//! use proto_sandbox::{
//!     config::RuntimeConfig,
//!     plugin::{Capabilities, PluginLoader},
//!     schema::SignalSchema,
//!     scripting::{BootstrapPlan, SandboxOptions, SandboxSession},
//!     Session,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = RuntimeConfig::load_or_default()?;
//!     let session = Session::new(SignalSchema::from_json_str(SCHEMA)?);
//!
//!     let sandbox = SandboxSession::open(session.clone(), SandboxOptions::from(&config))?;
//!     let capabilities = Capabilities::from_config(session, sandbox.events().clone(), &config);
//!     let outcome = PluginLoader::from_dir("plugins")
//!         .load(&config.plugins, &capabilities)
//!         .await;
//!     sandbox.attach_plugins(&outcome.registry)?;
//!
//!     sandbox.bootstrap(BootstrapPlan::from(&config.bootstrap)).await?;
//!     for entry in sandbox.run_code("print(vehicle.Speed.get())").await? {
//!         println!("{}", entry.text);
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod id;
pub mod monitor;
pub mod plugin;
pub mod schema;
pub mod scripting;
pub mod session;
pub mod simulator;
pub mod types;
pub mod vehicle;

// Re-export commonly used types
pub use config::RuntimeConfig;
pub use error::{Result, SandboxError};
pub use events::{EventBus, SandboxEvent};
pub use plugin::{Capabilities, LoadOutcome, PluginDescriptor, PluginLoader};
pub use schema::SignalSchema;
pub use scripting::{BootstrapPlan, SandboxOptions, SandboxSession};
pub use session::Session;
pub use types::{DataType, NodeKind, Operation, OutputEntry, OutputKind, SignalValue};
pub use vehicle::{NodeHandle, VehicleProxy};
