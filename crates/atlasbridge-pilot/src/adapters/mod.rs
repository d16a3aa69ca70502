//! Built-in tool adapters.
//!
//! - [`claude::ClaudeAdapter`]: Claude Code permission and menu prompts
//! - [`codex::CodexAdapter`]: OpenAI Codex CLI approval prompts
//! - [`generic::GenericAdapter`]: configurable patterns for arbitrary CLIs

pub mod claude;
pub mod codex;
pub mod generic;

use std::sync::Arc;

use crate::adapter::ToolAdapter;

/// Create an adapter by name, or auto-detect from the command basename
/// when `name` is `"auto"`.
pub fn create_adapter(name: &str, command: &str) -> Arc<dyn ToolAdapter> {
    match name {
        "claude" => Arc::new(claude::ClaudeAdapter::new()),
        "codex" => Arc::new(codex::CodexAdapter::new()),
        "generic" => Arc::new(generic::GenericAdapter::with_defaults()),
        "auto" => auto_detect(command),
        other => {
            tracing::warn!(adapter = other, "unknown adapter name, using generic");
            Arc::new(generic::GenericAdapter::with_defaults())
        }
    }
}

/// Pick an adapter from the command basename.
fn auto_detect(command: &str) -> Arc<dyn ToolAdapter> {
    let base = command.rsplit('/').next().unwrap_or(command);
    if base.contains("claude") {
        tracing::info!(command, "auto-detected Claude Code adapter");
        Arc::new(claude::ClaudeAdapter::new())
    } else if base.contains("codex") {
        tracing::info!(command, "auto-detected Codex adapter");
        Arc::new(codex::CodexAdapter::new())
    } else {
        tracing::info!(command, "no specific adapter, using generic");
        Arc::new(generic::GenericAdapter::with_defaults())
    }
}
