//! Sandboxed script execution
//!
//! A [`SandboxSession`] owns an isolated Rhai engine running on a dedicated
//! worker thread. The host talks to it through a command channel and awaits
//! results asynchronously, so it stays responsive while scripts run.
//!
//! # Lifecycle
//!
//! ```text
//! open(session, options)
//!   -> bootstrap(plan)            interpreter prelude, then libraries
//!   -> set_schema(schema, apis)   SCHEMA / CUSTOM_APIS globals
//!   -> run_code(source)*          Vec<OutputEntry>
//!   -> close()
//! ```
//!
//! Script errors never fail `run_code`; they come back as `error` entries in
//! the output log. `Err` is reserved for the sandbox itself being unusable.
//!
//! # Limitations
//!
//! Executions cannot be cancelled. `run_code_with_timeout` stops waiting but
//! the script keeps running on the worker; use `SandboxConfig::max_operations`
//! to bound runaway scripts.
//!
//! # Example
//!
//! ```ignore
//! use proto_sandbox::scripting::{SandboxOptions, SandboxSession};
//!
//! let sandbox = SandboxSession::open(session, SandboxOptions::default())?;
//! let output = sandbox.run_code("print(vehicle.Speed.get())").await?;
//! ```

pub mod bridge;
pub mod engine;
pub mod translate;
pub mod worker;

use crate::config::{BootstrapConfig, LibraryEntry, RuntimeConfig, SandboxConfig};
use crate::error::{Result, SandboxError};
use crate::events::{EventBus, SandboxEvent};
use crate::id::ExecutionIdGen;
use crate::plugin::hooks::HookRegistry;
use crate::session::Session;
use crate::types::OutputEntry;
use crossbeam_channel::{unbounded, Sender};
use futures::future::join_all;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot, watch};
use worker::{CompletionTable, SandboxCommand, SandboxWorker};

/// Settings for opening a sandbox
#[derive(Debug, Clone)]
pub struct SandboxOptions {
    pub limits: SandboxConfig,
    /// Schema root bound to the `vehicle` global
    pub vehicle_root: String,
}

impl Default for SandboxOptions {
    fn default() -> Self {
        Self {
            limits: SandboxConfig::default(),
            vehicle_root: crate::config::DEFAULT_VEHICLE_ROOT.to_string(),
        }
    }
}

impl From<&RuntimeConfig> for SandboxOptions {
    fn from(config: &RuntimeConfig) -> Self {
        Self {
            limits: config.sandbox.clone(),
            vehicle_root: config.vehicle.root.clone(),
        }
    }
}

/// Source of a prelude or library module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleSource {
    pub name: String,
    pub source: String,
}

/// What to load during bootstrap
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootstrapPlan {
    /// Prelude whose functions become globally callable
    pub interpreter: Option<PathBuf>,
    /// Libraries, each callable as `name::function()`
    pub libraries: Vec<LibraryEntry>,
}

impl From<&BootstrapConfig> for BootstrapPlan {
    fn from(config: &BootstrapConfig) -> Self {
        Self {
            interpreter: config.interpreter.clone(),
            libraries: config.libraries.clone(),
        }
    }
}

/// Progress of [`SandboxSession::bootstrap`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapState {
    NotStarted,
    Loading,
    Ready,
    Failed(String),
}

/// Host-side handle to a running sandbox
pub struct SandboxSession {
    session: Session,
    commands: Sender<SandboxCommand>,
    completions: CompletionTable,
    ids: ExecutionIdGen,
    bootstrap_tx: watch::Sender<BootstrapState>,
    events: EventBus,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SandboxSession {
    /// Spawn the worker thread
    pub fn open(session: Session, options: SandboxOptions) -> Result<Self> {
        let vehicle = session.vehicle(&options.vehicle_root)?;
        let events = EventBus::new();
        let completions = CompletionTable::new();
        let (commands, command_rx) = unbounded();

        let handle = {
            let events = events.clone();
            let completions = completions.clone();
            std::thread::Builder::new()
                .name("sandbox-worker".to_string())
                .spawn(move || {
                    SandboxWorker::new(&options, vehicle, events, command_rx, completions).run()
                })?
        };

        let (bootstrap_tx, _) = watch::channel(BootstrapState::NotStarted);
        tracing::info!("Sandbox opened for session {}", session.id());

        Ok(Self {
            session,
            commands,
            completions,
            ids: ExecutionIdGen::new(),
            bootstrap_tx,
            events,
            worker: Mutex::new(Some(handle)),
        })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn bootstrap_state(&self) -> BootstrapState {
        self.bootstrap_tx.borrow().clone()
    }

    /// Load the interpreter prelude, then every library concurrently, and
    /// install them in the sandbox. Executions wait for this to finish.
    pub async fn bootstrap(&self, plan: BootstrapPlan) -> Result<()> {
        self.bootstrap_tx.send_replace(BootstrapState::Loading);
        let result = self.load_and_install(plan).await;
        self.bootstrap_tx.send_replace(match &result {
            Ok(()) => BootstrapState::Ready,
            Err(e) => BootstrapState::Failed(e.to_string()),
        });
        match &result {
            Ok(()) => tracing::info!("Sandbox bootstrap complete"),
            Err(e) => tracing::error!("Sandbox bootstrap failed: {}", e),
        }
        result
    }

    async fn load_and_install(&self, plan: BootstrapPlan) -> Result<()> {
        let prelude = match &plan.interpreter {
            Some(path) => Some(read_module("prelude", path).await?),
            None => None,
        };

        let libraries = join_all(
            plan.libraries
                .iter()
                .map(|library| read_module(&library.name, &library.path)),
        )
        .await
        .into_iter()
        .collect::<Result<Vec<_>>>()?;

        let (reply, rx) = oneshot::channel();
        self.send(SandboxCommand::Bootstrap {
            prelude,
            libraries,
            reply,
        })?;
        rx.await.map_err(|_| SandboxError::SandboxClosed)?
    }

    /// Inject the schema and custom API descriptions as `SCHEMA` and `CUSTOM_APIS`
    pub async fn set_schema(&self, schema_json: &str, custom_apis_json: &str) -> Result<()> {
        let schema: serde_json::Value = serde_json::from_str(schema_json)
            .map_err(|e| SandboxError::Schema(format!("Invalid schema JSON: {}", e)))?;
        let custom_apis: serde_json::Value = if custom_apis_json.trim().is_empty() {
            serde_json::Value::Object(serde_json::Map::new())
        } else {
            serde_json::from_str(custom_apis_json)
                .map_err(|e| SandboxError::Schema(format!("Invalid custom APIs JSON: {}", e)))?
        };

        let (reply, rx) = oneshot::channel();
        self.send(SandboxCommand::SetSchema {
            schema,
            custom_apis,
            reply,
        })?;
        rx.await.map_err(|_| SandboxError::SandboxClosed)?
    }

    /// Expose loaded plugin hooks through the `plugins` global
    pub fn attach_plugins(&self, registry: &HookRegistry) -> Result<()> {
        self.send(SandboxCommand::AttachPlugins(registry.clone()))
    }

    /// Run `source` and resolve with its output log once it finalizes
    pub async fn run_code(&self, source: &str) -> Result<Vec<OutputEntry>> {
        self.wait_ready().await?;

        let id = self.ids.next_id();
        let done = self.completions.register(id);
        if let Err(e) = self.send(SandboxCommand::Run {
            id,
            source: source.to_string(),
        }) {
            self.completions.remove(id);
            return Err(e);
        }
        tracing::debug!("Queued execution {}", id);

        done.await.map_err(|_| SandboxError::SandboxClosed)
    }

    /// Like [`SandboxSession::run_code`], but give up waiting after `timeout`.
    ///
    /// The execution is not cancelled and keeps running on the worker.
    pub async fn run_code_with_timeout(
        &self,
        source: &str,
        timeout: Duration,
    ) -> Result<Vec<OutputEntry>> {
        tokio::time::timeout(timeout, self.run_code(source))
            .await
            .map_err(|_| {
                SandboxError::Timeout(format!("no completion after {:?}", timeout))
            })?
    }

    /// Receive events emitted through `INTERNALS.emit`
    pub fn subscribe_events(&self) -> broadcast::Receiver<SandboxEvent> {
        self.events.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Stop the worker and wait for it to exit.
    ///
    /// Blocks until the running execution, if any, finishes.
    pub fn close(&self) -> Result<()> {
        let _ = self.commands.send(SandboxCommand::Shutdown);
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            handle
                .join()
                .map_err(|_| SandboxError::Script("sandbox worker panicked".to_string()))?;
            tracing::info!("Sandbox closed for session {}", self.session.id());
        }
        Ok(())
    }

    fn send(&self, command: SandboxCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| SandboxError::SandboxClosed)
    }

    async fn wait_ready(&self) -> Result<()> {
        let mut rx = self.bootstrap_tx.subscribe();
        let failure = {
            let state = rx
                .wait_for(|state| *state != BootstrapState::Loading)
                .await
                .map_err(|_| SandboxError::SandboxClosed)?;
            match &*state {
                BootstrapState::Failed(message) => Some(message.clone()),
                _ => None,
            }
        };
        match failure {
            Some(message) => Err(SandboxError::Bootstrap(message)),
            None => Ok(()),
        }
    }
}

impl Drop for SandboxSession {
    fn drop(&mut self) {
        let _ = self.commands.send(SandboxCommand::Shutdown);
    }
}

impl std::fmt::Debug for SandboxSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxSession")
            .field("session", &self.session.id())
            .field("bootstrap", &self.bootstrap_state())
            .field("pending", &self.completions.len())
            .finish()
    }
}

async fn read_module(name: &str, path: &Path) -> Result<ModuleSource> {
    let source = tokio::fs::read_to_string(path).await.map_err(|e| {
        SandboxError::Bootstrap(format!("Failed to read '{}' from {:?}: {}", name, path, e))
    })?;
    Ok(ModuleSource {
        name: name.to_string(),
        source,
    })
}
