//! Sandbox worker thread
//!
//! The worker owns the Rhai engine and the global scope. It processes
//! [`SandboxCommand`]s from a FIFO channel, one at a time, so at most one
//! execution is ever running and the console buffer is never shared.
//!
//! Every execution ends in a finalize step, run by [`FinalizeGuard`] on drop:
//! the console buffer is flushed into the execution's completion slot and
//! reset. The guard also runs while unwinding from a panic.

use crate::error::{Result, SandboxError};
use crate::events::EventBus;
use crate::id::ExecutionId;
use crate::plugin::hooks::HookRegistry;
use crate::scripting::bridge::Bridge;
use crate::scripting::engine::{json_to_dynamic, new_engine, SetPolicy};
use crate::scripting::translate::{execution_symbol, normalize_source, translate};
use crate::scripting::{ModuleSource, SandboxOptions};
use crate::types::OutputEntry;
use crate::vehicle::VehicleProxy;
use crossbeam_channel::Receiver;
use rhai::{Dynamic, Engine, Map, Module, Scope};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

/// Message sent from the host to the worker
pub(crate) enum SandboxCommand {
    /// Install the prelude and libraries
    Bootstrap {
        prelude: Option<ModuleSource>,
        libraries: Vec<ModuleSource>,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Replace the `SCHEMA` and `CUSTOM_APIS` globals
    SetSchema {
        schema: serde_json::Value,
        custom_apis: serde_json::Value,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Replace the hooks behind the `plugins` global
    AttachPlugins(HookRegistry),
    /// Run one execution
    Run { id: ExecutionId, source: String },
    /// Stop the worker
    Shutdown,
}

/// Output captured for the running execution
#[derive(Debug, Clone, Default)]
pub struct ConsoleBuffer {
    entries: Arc<Mutex<Vec<OutputEntry>>>,
}

impl ConsoleBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: OutputEntry) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(entry);
    }

    /// Take everything captured so far, leaving the buffer empty
    pub fn take(&self) -> Vec<OutputEntry> {
        std::mem::take(&mut *self.entries.lock().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Completion callbacks keyed by execution id
#[derive(Debug, Clone, Default)]
pub struct CompletionTable {
    pending: Arc<Mutex<HashMap<ExecutionId, oneshot::Sender<Vec<OutputEntry>>>>>,
}

impl CompletionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for `id`
    pub fn register(&self, id: ExecutionId) -> oneshot::Receiver<Vec<OutputEntry>> {
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, tx);
        rx
    }

    /// Deliver `output` to the waiter for `id`. Returns false if nobody was waiting.
    pub fn complete(&self, id: ExecutionId, output: Vec<OutputEntry>) -> bool {
        let waiter = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
        match waiter {
            Some(tx) => tx.send(output).is_ok(),
            None => false,
        }
    }

    pub fn remove(&self, id: ExecutionId) {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
    }

    /// Drop every waiter; their receivers observe a closed channel
    pub fn clear(&self) {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    pub fn len(&self) -> usize {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Finalizes one execution when dropped
pub struct FinalizeGuard {
    id: ExecutionId,
    console: ConsoleBuffer,
    completions: CompletionTable,
}

impl FinalizeGuard {
    pub fn new(id: ExecutionId, console: ConsoleBuffer, completions: CompletionTable) -> Self {
        Self {
            id,
            console,
            completions,
        }
    }
}

impl Drop for FinalizeGuard {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.console.push(OutputEntry::error(format!(
                "Execution {} aborted: sandbox panicked",
                self.id
            )));
        }
        let output = self.console.take();
        let entries = output.len();
        if !self.completions.complete(self.id, output) {
            tracing::debug!("Execution {} finished with no waiter", self.id);
        }
        tracing::debug!("Execution {} finalized with {} entries", self.id, entries);
    }
}

/// The sandbox side of a [`SandboxSession`](crate::scripting::SandboxSession)
pub(crate) struct SandboxWorker {
    engine: Engine,
    scope: Scope<'static>,
    bridge: Bridge,
    console: ConsoleBuffer,
    completions: CompletionTable,
    commands: Receiver<SandboxCommand>,
    schema: Dynamic,
    custom_apis: Dynamic,
}

impl SandboxWorker {
    pub(crate) fn new(
        options: &SandboxOptions,
        vehicle: VehicleProxy,
        events: EventBus,
        commands: Receiver<SandboxCommand>,
        completions: CompletionTable,
    ) -> Self {
        let console = ConsoleBuffer::new();
        let bridge = Bridge::new(vehicle, events);

        let mut engine = new_engine(&options.limits, SetPolicy::Intercepted);
        bridge.register(&mut engine);
        {
            let console = console.clone();
            engine.on_print(move |text| console.push(OutputEntry::text(text)));
        }
        {
            let console = console.clone();
            engine.on_debug(move |text, source, pos| {
                tracing::trace!("debug() from {:?} at {}", source, pos);
                console.push(OutputEntry::text(text));
            });
        }

        Self {
            engine,
            scope: Scope::new(),
            bridge,
            console,
            completions,
            commands,
            schema: Dynamic::from_map(Map::new()),
            custom_apis: Dynamic::from_map(Map::new()),
        }
    }

    /// Run the command loop until shutdown or until the host side is dropped
    pub(crate) fn run(mut self) {
        tracing::info!("Sandbox worker started");

        while let Ok(command) = self.commands.recv() {
            match command {
                SandboxCommand::Bootstrap {
                    prelude,
                    libraries,
                    reply,
                } => {
                    let result = self.bootstrap(prelude, libraries);
                    let _ = reply.send(result);
                }
                SandboxCommand::SetSchema {
                    schema,
                    custom_apis,
                    reply,
                } => {
                    let result = self.set_schema(&schema, &custom_apis);
                    let _ = reply.send(result);
                }
                SandboxCommand::AttachPlugins(registry) => {
                    tracing::debug!("Attached {} plugin(s)", registry.len());
                    self.bridge.set_plugins(registry);
                }
                SandboxCommand::Run { id, source } => {
                    let outcome = catch_unwind(AssertUnwindSafe(|| self.execute(id, &source)));
                    if outcome.is_err() {
                        tracing::error!("Execution {} panicked", id);
                    }
                }
                SandboxCommand::Shutdown => break,
            }
        }

        // Waiters for anything still queued observe a closed sandbox
        self.completions.clear();
        tracing::info!("Sandbox worker stopped");
    }

    fn bootstrap(
        &mut self,
        prelude: Option<ModuleSource>,
        libraries: Vec<ModuleSource>,
    ) -> Result<()> {
        if let Some(prelude) = prelude {
            let module = self.compile_module(&prelude)?;
            self.engine.register_global_module(module.into());
            tracing::info!("Installed interpreter prelude '{}'", prelude.name);
        }

        for library in libraries {
            let module = self.compile_module(&library)?;
            self.engine
                .register_static_module(library.name.as_str(), module.into());
            tracing::info!("Installed library '{}'", library.name);
        }

        // Anything printed while loading does not belong to an execution
        let stray = self.console.take();
        if !stray.is_empty() {
            tracing::debug!("Discarded {} bootstrap output entries", stray.len());
        }
        Ok(())
    }

    fn compile_module(&self, module: &ModuleSource) -> Result<Module> {
        let mut ast = self
            .engine
            .compile(normalize_source(&module.source))
            .map_err(|e| SandboxError::Bootstrap(format!("'{}': {}", module.name, e)))?;
        ast.set_source(module.name.as_str());

        Module::eval_ast_as_new(Scope::new(), &ast, &self.engine)
            .map_err(|e| SandboxError::Bootstrap(format!("'{}': {}", module.name, e)))
    }

    fn set_schema(
        &mut self,
        schema: &serde_json::Value,
        custom_apis: &serde_json::Value,
    ) -> Result<()> {
        self.schema = json_to_dynamic(schema)
            .map_err(|e| SandboxError::Schema(format!("Cannot inject schema: {}", e)))?;
        self.custom_apis = json_to_dynamic(custom_apis)
            .map_err(|e| SandboxError::Schema(format!("Cannot inject custom APIs: {}", e)))?;
        tracing::debug!("Injected SCHEMA and CUSTOM_APIS");
        Ok(())
    }

    fn reset_scope(&mut self) {
        self.scope.clear();
        self.bridge.push_globals(&mut self.scope);
        self.scope.push_constant("SCHEMA", self.schema.clone());
        self.scope.push_constant("CUSTOM_APIS", self.custom_apis.clone());
    }

    fn execute(&mut self, id: ExecutionId, source: &str) {
        let span = tracing::info_span!("execution", id = %id);
        let _enter = span.enter();
        let _finalize =
            FinalizeGuard::new(id, self.console.clone(), self.completions.clone());

        self.bridge.set_current_execution(id.0);
        self.reset_scope();
        self.scope
            .push_constant(execution_symbol(id), id.0 as i64);
        let baseline = self.scope.len();

        let job = match translate(&self.engine, id, source) {
            Ok(job) => job,
            Err(e) => {
                tracing::debug!("Translation failed: {}", e);
                self.console.push(OutputEntry::error(e.to_string()));
                return;
            }
        };

        if let Err(err) = self.engine.run_ast_with_scope(&mut self.scope, &job.ast) {
            tracing::debug!("Execution failed: {}", err);
            self.console.push(OutputEntry::error(err.to_string()));
        }

        self.scope.rewind(baseline);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_console_buffer_take_resets() {
        let console = ConsoleBuffer::new();
        console.push(OutputEntry::text("a"));
        console.push(OutputEntry::error("b"));
        assert_eq!(console.len(), 2);
        let taken = console.take();
        assert_eq!(taken[1], OutputEntry::error("b"));
        assert!(console.is_empty());
    }

    #[test]
    fn test_completion_routes_by_id() {
        let table = CompletionTable::new();
        let mut first = table.register(ExecutionId(1));
        let mut second = table.register(ExecutionId(2));

        assert!(table.complete(ExecutionId(2), vec![OutputEntry::text("two")]));
        assert_eq!(second.try_recv().unwrap(), vec![OutputEntry::text("two")]);
        assert!(first.try_recv().is_err());
        assert!(!table.complete(ExecutionId(2), vec![]));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_clear_closes_waiters() {
        let table = CompletionTable::new();
        let mut rx = table.register(ExecutionId(1));
        table.clear();
        assert!(matches!(
            rx.try_recv(),
            Err(oneshot::error::TryRecvError::Closed)
        ));
    }

    #[test]
    fn test_finalize_guard_flushes_console() {
        let console = ConsoleBuffer::new();
        let table = CompletionTable::new();
        let mut rx = table.register(ExecutionId(5));
        {
            let _guard = FinalizeGuard::new(ExecutionId(5), console.clone(), table.clone());
            console.push(OutputEntry::text("hello"));
        }
        assert_eq!(rx.try_recv().unwrap(), vec![OutputEntry::text("hello")]);
        assert!(console.is_empty());
    }

    #[test]
    fn test_finalize_guard_runs_on_panic() {
        let console = ConsoleBuffer::new();
        let table = CompletionTable::new();
        let mut rx = table.register(ExecutionId(9));
        let result = catch_unwind(AssertUnwindSafe(|| {
            let _guard = FinalizeGuard::new(ExecutionId(9), console.clone(), table.clone());
            console.push(OutputEntry::text("before"));
            panic!("boom");
        }));
        assert!(result.is_err());

        let output = rx.try_recv().unwrap();
        assert_eq!(output[0], OutputEntry::text("before"));
        assert!(output[1].is_error());
    }
}
