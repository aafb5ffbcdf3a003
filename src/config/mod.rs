//! Configuration module for proto-sandbox
//!
//! Runtime configuration is a single TOML document:
//!
//! ```toml
//! plugin_dir = "plugins"
//!
//! [sandbox]
//! max_operations = 1000000
//!
//! [bootstrap]
//! interpreter = "prelude.rhai"
//! libraries = [{ name = "math2", path = "lib/math2.rhai" }]
//!
//! [monitor]
//! history_limit = 100
//!
//! [vehicle]
//! root = "Vehicle"
//!
//! [prototype]
//! name = "Door demo"
//! customer_journey = "Driver opens the door"
//!
//! [[plugins]]
//! name = "speed-sim"
//! module_url = "speed.rhai"
//!
//! [logging]
//! filter = "info,proto_sandbox=debug"
//! ```
//!
//! Every section is optional. Without an explicit path the file is looked up
//! in the platform config directory:
//! - **Linux**: `~/.config/dev.proto-sandbox/config.toml`
//! - **macOS**: `~/Library/Application Support/dev.proto-sandbox/config.toml`
//! - **Windows**: `%APPDATA%\dev.proto-sandbox\config.toml`

use crate::error::{Result, SandboxError};
use crate::plugin::PluginDescriptor;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application identifier for config directories
pub const APP_ID: &str = "dev.proto-sandbox";

/// Config filename
pub const CONFIG_FILE: &str = "config.toml";

/// Default schema root the `vehicle` global points at
pub const DEFAULT_VEHICLE_ROOT: &str = "Vehicle";

/// Default tracing filter
pub const DEFAULT_LOG_FILTER: &str = "info,proto_sandbox=debug";

/// Get the path to the default config file
pub fn default_config_path() -> Option<PathBuf> {
    dirs_next::config_dir().map(|p| p.join(APP_ID).join(CONFIG_FILE))
}

// ==================== Sandbox Limits ====================

/// Safety limits applied to the sandbox engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Operation budget per script run (0 = unlimited)
    pub max_operations: u64,
    pub max_call_levels: usize,
    pub max_expr_depth: usize,
    pub max_function_expr_depth: usize,
    pub max_string_size: usize,
    pub max_array_size: usize,
    pub max_map_size: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            max_operations: 0,
            max_call_levels: 64,
            max_expr_depth: 128,
            max_function_expr_depth: 64,
            max_string_size: 1024 * 1024,
            max_array_size: 100_000,
            max_map_size: 10_000,
        }
    }
}

// ==================== Bootstrap ====================

/// A support library compiled into a named module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryEntry {
    pub name: String,
    pub path: PathBuf,
}

/// Interpreter prelude and libraries loaded before any script runs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interpreter: Option<PathBuf>,
    #[serde(default)]
    pub libraries: Vec<LibraryEntry>,
}

// ==================== Smaller Sections ====================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

fn default_history_limit() -> usize {
    crate::monitor::DEFAULT_HISTORY_LIMIT
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            history_limit: default_history_limit(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleConfig {
    #[serde(default = "default_vehicle_root")]
    pub root: String,
}

fn default_vehicle_root() -> String {
    DEFAULT_VEHICLE_ROOT.to_string()
}

impl Default for VehicleConfig {
    fn default() -> Self {
        Self {
            root: default_vehicle_root(),
        }
    }
}

/// Prototype metadata handed to plugins
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrototypeConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub customer_journey: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_filter")]
    pub filter: String,
    /// Directory for daily rolling log files; console only when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
}

fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            directory: None,
        }
    }
}

// ==================== Runtime Config ====================

/// Complete runtime configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Base directory for relative plugin module urls
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_dir: Option<PathBuf>,

    #[serde(default)]
    pub sandbox: SandboxConfig,

    #[serde(default)]
    pub bootstrap: BootstrapConfig,

    #[serde(default)]
    pub monitor: MonitorConfig,

    #[serde(default)]
    pub vehicle: VehicleConfig,

    #[serde(default)]
    pub prototype: PrototypeConfig,

    #[serde(default)]
    pub plugins: Vec<PluginDescriptor>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl RuntimeConfig {
    /// Parse a config from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text)
            .map_err(|e| SandboxError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Load a config file from disk
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            SandboxError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        let mut config = Self::from_toml_str(&content)
            .map_err(|e| e.with_context(format!("In config file {:?}", path)))?;
        if let Some(base) = path.parent() {
            config.resolve_relative_paths(base);
        }
        Ok(config)
    }

    /// Load the config from the platform config directory.
    ///
    /// A missing file yields the defaults. A malformed one is an error; the
    /// caller decides whether to fall back.
    pub fn load_or_default() -> Result<Self> {
        match default_config_path() {
            Some(path) => Self::load_if_present(path),
            None => Ok(Self::default()),
        }
    }

    /// Like [`RuntimeConfig::load`], but a missing file yields the defaults
    pub fn load_if_present(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!("No config at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        Self::load(path)
    }

    /// Save config to disk as TOML
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                SandboxError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| SandboxError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content).map_err(|e| {
            SandboxError::Config(format!("Failed to write config file {:?}: {}", path, e))
        })
    }

    /// Make bootstrap and plugin paths relative to `base` absolute
    pub fn resolve_relative_paths(&mut self, base: &Path) {
        let join = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };

        if let Some(interpreter) = self.bootstrap.interpreter.as_mut() {
            join(interpreter);
        }
        for library in &mut self.bootstrap.libraries {
            join(&mut library.path);
        }
        match self.plugin_dir.as_mut() {
            Some(dir) => join(dir),
            None => self.plugin_dir = Some(base.to_path_buf()),
        }
    }
}
