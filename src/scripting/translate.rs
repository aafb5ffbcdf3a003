//! Script translation
//!
//! Turns user source into an executable AST for one execution. Every symbol
//! the runtime injects for an execution is suffixed with its id so runs that
//! reuse identifier names never collide.

use crate::error::{Result, SandboxError};
use crate::id::ExecutionId;
use rhai::{Engine, AST};

/// A compiled script ready to run
#[derive(Debug, Clone)]
pub struct TranslatedJob {
    pub id: ExecutionId,
    /// Entry point name, also used as the AST source
    pub entry: String,
    pub ast: AST,
}

/// Entry point name for an execution
pub fn entry_name(id: ExecutionId) -> String {
    format!("__entry_{}", id)
}

/// Scope symbol holding the execution id
pub fn execution_symbol(id: ExecutionId) -> String {
    format!("__execution_{}", id)
}

/// Strip a byte-order mark and normalise line endings to `\n`
pub fn normalize_source(source: &str) -> String {
    source
        .strip_prefix('\u{feff}')
        .unwrap_or(source)
        .replace("\r\n", "\n")
        .replace('\r', "\n")
}

/// Compile `source` for execution `id`
pub fn translate(engine: &Engine, id: ExecutionId, source: &str) -> Result<TranslatedJob> {
    let source = normalize_source(source);
    let entry = entry_name(id);

    let mut ast = engine
        .compile(&source)
        .map_err(|e| SandboxError::Translation(e.to_string()))?;
    ast.set_source(entry.as_str());

    tracing::debug!(
        "Translated execution {} ({} bytes, {} functions)",
        id,
        source.len(),
        ast.iter_functions().count()
    );

    Ok(TranslatedJob { id, entry, ast })
}
