//! proto-sandbox - command line entry point
//!
//! Runs a prototype script against a signal schema with the configured
//! plugins, bootstrap prelude and libraries loaded.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use proto_sandbox::{
    config::LoggingConfig,
    plugin::{Capabilities, PluginLoader},
    scripting::{BootstrapPlan, SandboxOptions, SandboxSession},
    EventBus, OutputKind, RuntimeConfig, Session, SignalSchema,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE: &str = "proto-sandbox.log";

#[derive(Parser)]
#[command(name = "proto-sandbox")]
#[command(about = "Run prototype scripts in a sandbox against a vehicle signal schema", long_about = None)]
struct Cli {
    /// Config file; defaults to the platform config directory
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute a script and print its output log
    Run(RunArgs),
    /// Print the schema tree and, optionally, what the plugins register
    Inspect(InspectArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Script to execute
    script: PathBuf,

    /// Signal schema (JSON)
    #[arg(long)]
    schema: PathBuf,

    /// Custom API descriptions exposed as CUSTOM_APIS (JSON)
    #[arg(long)]
    apis: Option<PathBuf>,

    /// Stop waiting for the script after this many seconds
    #[arg(long)]
    timeout: Option<f64>,

    /// Print the output log as JSON
    #[arg(long)]
    json: bool,

    /// Print the monitor snapshot after the run
    #[arg(long)]
    monitor: bool,
}

#[derive(Args)]
struct InspectArgs {
    /// Signal schema (JSON)
    #[arg(long)]
    schema: PathBuf,

    /// Also load the configured plugins and list their registrations
    #[arg(long)]
    plugins: bool,
}

fn main() -> ExitCode {
    match try_main() {
        Ok(code) => code,
        Err(err) => {
            tracing::error!("{:#}", err);
            eprintln!("{err:#}");
            ExitCode::from(2)
        }
    }
}

fn try_main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let (config, default_config_error) = match cli.config.as_deref() {
        Some(path) => {
            let config = RuntimeConfig::load(path)
                .with_context(|| format!("failed to load config {:?}", path))?;
            (config, None)
        }
        None => match RuntimeConfig::load_or_default() {
            Ok(config) => (config, None),
            Err(err) => (RuntimeConfig::default(), Some(err)),
        },
    };
    let _log_guard = init_logging(&config.logging);
    if let Some(err) = default_config_error {
        tracing::warn!("Ignoring the config in the default location: {}", err);
    }

    tracing::info!("Starting proto-sandbox");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start the async runtime")?;

    runtime.block_on(async move {
        match cli.command {
            Command::Run(args) => run_script(config, args).await,
            Command::Inspect(args) => inspect(config, args).await,
        }
    })
}

/// Console logging, plus a daily rolling file when a log directory is set.
/// `RUST_LOG` overrides the configured filter.
fn init_logging(logging: &LoggingConfig) -> Option<WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.filter));

    let (file_layer, guard) = match &logging.directory {
        Some(dir) => {
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, LOG_FILE));
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    guard
}

async fn read_text(path: &Path, what: &str) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {} {:?}", what, path))
}

fn plugin_dir(config: &RuntimeConfig) -> PathBuf {
    config
        .plugin_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("."))
}

async fn run_script(config: RuntimeConfig, args: RunArgs) -> Result<ExitCode> {
    let schema_text = read_text(&args.schema, "schema").await?;
    let schema = SignalSchema::from_json_str(&schema_text)
        .with_context(|| format!("invalid schema {:?}", args.schema))?;
    let session = Session::with_history_limit(schema, config.monitor.history_limit);

    let sandbox = SandboxSession::open(session.clone(), SandboxOptions::from(&config))?;

    if !config.plugins.is_empty() {
        let capabilities =
            Capabilities::from_config(session.clone(), sandbox.events().clone(), &config);
        let outcome = PluginLoader::from_dir(plugin_dir(&config))
            .load(&config.plugins, &capabilities)
            .await;
        tracing::info!(
            "{} of {} plugins loaded",
            outcome.loaded_count(),
            config.plugins.len()
        );
        sandbox.attach_plugins(&outcome.registry)?;
    }

    sandbox
        .bootstrap(BootstrapPlan::from(&config.bootstrap))
        .await?;

    let custom_apis = match &args.apis {
        Some(path) => read_text(path, "custom APIs").await?,
        None => String::new(),
    };
    sandbox.set_schema(&schema_text, &custom_apis).await?;

    let source = read_text(&args.script, "script").await?;
    let mut events = sandbox.subscribe_events();
    let output = match args.timeout {
        Some(seconds) => {
            let timeout = Duration::try_from_secs_f64(seconds)
                .with_context(|| format!("invalid timeout {}", seconds))?;
            sandbox.run_code_with_timeout(&source, timeout).await?
        }
        None => sandbox.run_code(&source).await?,
    };

    while let Ok(event) = events.try_recv() {
        tracing::info!(event = %event.name, payload = %event.payload, "Sandbox event");
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        for entry in &output {
            match entry.kind {
                OutputKind::Text => println!("{}", entry.text),
                OutputKind::Error => eprintln!("error: {}", entry.text),
            }
        }
    }

    if args.monitor {
        println!("{}", serde_json::to_string_pretty(&session.monitor().snapshot())?);
    }

    sandbox.close()?;

    Ok(if output.iter().any(|entry| entry.is_error()) {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

async fn inspect(config: RuntimeConfig, args: InspectArgs) -> Result<ExitCode> {
    let schema_text = read_text(&args.schema, "schema").await?;
    let schema = SignalSchema::from_json_str(&schema_text)
        .with_context(|| format!("invalid schema {:?}", args.schema))?;

    for node in schema.iter() {
        let indent = "  ".repeat(node.depth as usize);
        match &node.datatype {
            Some(datatype) => println!("{}{} [{}: {}]", indent, node.name, node.kind, datatype),
            None => println!("{}{} [{}]", indent, node.name, node.kind),
        }
    }

    if !args.plugins {
        return Ok(ExitCode::SUCCESS);
    }

    let session = Session::new(schema);
    let capabilities = Capabilities::from_config(session, EventBus::new(), &config);
    let outcome = PluginLoader::from_dir(plugin_dir(&config))
        .load(&config.plugins, &capabilities)
        .await;

    println!();
    for (descriptor, hooks) in config.plugins.iter().zip(&outcome.hooks) {
        match hooks {
            Some(hooks) => {
                let names: Vec<&str> = hooks.keys().map(String::as_str).collect();
                println!("plugin {}: hooks [{}]", descriptor.name, names.join(", "));
            }
            None => println!("plugin {}: not loaded", descriptor.name),
        }
    }
    for (path, operation) in outcome.simulators.keys() {
        let depth = outcome
            .interceptor(&path, operation)
            .map(|i| i.depth())
            .unwrap_or(0);
        println!("simulator ({}, {}) x{}", path, operation, depth);
    }
    for name in capabilities.widgets.names() {
        println!("widget {}", name);
    }
    for failure in &outcome.failures {
        eprintln!("failed {}: {}", failure.plugin, failure.error);
    }

    Ok(if outcome.failures.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
