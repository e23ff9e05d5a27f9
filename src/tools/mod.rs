//! Read-only tool suite bound to the agent.
//!
//! Each tool operates on one virtual filesystem instance through the
//! sandbox resolver and returns human-readable text plus structured
//! metadata. Advisory conditions (missing file, bad pattern, no
//! matches) come back as plain output the model can react to; only
//! infrastructure failures surface as errors.

mod glob;
mod grep;
mod list;
mod read;

use std::sync::Arc;

use schemars::schema_for;
use serde_json::Value;

use crate::error::{QuarryError, Result};
use crate::vfs::VfsRegistry;

pub use glob::GlobArgs;
pub use grep::GrepArgs;
pub use list::ListArgs;
pub use read::ReadArgs;

/// Scope a tool invocation runs in.
#[derive(Clone)]
pub struct ToolContext {
    /// Collection root every path is resolved against.
    pub base_path: String,
    /// Virtual filesystem instance holding the collection.
    pub vfs_instance_id: String,
    pub vfs: Arc<VfsRegistry>,
}

/// Binary payload returned alongside text output (images, PDFs).
#[derive(Debug, Clone)]
pub struct Attachment {
    pub media_type: String,
    /// Base64-encoded content.
    pub data: String,
}

/// Result of one tool invocation.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub title: String,
    pub output: String,
    pub metadata: Value,
    pub attachment: Option<Attachment>,
}

impl ToolOutput {
    pub(crate) fn text(title: impl Into<String>, output: impl Into<String>, metadata: Value) -> Self {
        Self {
            title: title.into(),
            output: output.into(),
            metadata,
            attachment: None,
        }
    }
}

/// Definition of a tool as handed to the model provider.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
}

fn schema_value<T: schemars::JsonSchema>() -> Value {
    serde_json::to_value(schema_for!(T)).unwrap_or_else(|_| Value::Object(Default::default()))
}

/// The four tools bound to every agent run.
pub fn tool_specs() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: "read",
            description: "Read a file from the collection. Output is line-numbered; use \
                          offset and limit to page through large files.",
            parameters: schema_value::<ReadArgs>(),
        },
        ToolSpec {
            name: "grep",
            description: "Search file contents under a directory with a regular expression. \
                          Optionally restrict to files matching an include glob.",
            parameters: schema_value::<GrepArgs>(),
        },
        ToolSpec {
            name: "glob",
            description: "Find files whose relative path matches a glob pattern \
                          (e.g. **/*.rs), newest first.",
            parameters: schema_value::<GlobArgs>(),
        },
        ToolSpec {
            name: "list",
            description: "List the immediate children of a directory.",
            parameters: schema_value::<ListArgs>(),
        },
    ]
}

/// Dispatch one tool call. Malformed arguments are reported back as
/// tool output so the model can retry with a corrected call.
pub fn run_tool(name: &str, input: Value, ctx: &ToolContext) -> Result<ToolOutput> {
    fn parse<T: serde::de::DeserializeOwned>(name: &str, input: Value) -> std::result::Result<T, ToolOutput> {
        serde_json::from_value(input).map_err(|e| {
            ToolOutput::text(
                name.to_string(),
                format!("Invalid arguments for {}: {}", name, e),
                serde_json::json!({ "invalidArguments": true }),
            )
        })
    }

    match name {
        "read" => match parse::<ReadArgs>(name, input) {
            Ok(args) => read::run(args, ctx),
            Err(out) => Ok(out),
        },
        "grep" => match parse::<GrepArgs>(name, input) {
            Ok(args) => grep::run(args, ctx),
            Err(out) => Ok(out),
        },
        "glob" => match parse::<GlobArgs>(name, input) {
            Ok(args) => glob::run(args, ctx),
            Err(out) => Ok(out),
        },
        "list" => match parse::<ListArgs>(name, input) {
            Ok(args) => list::run(args, ctx),
            Err(out) => Ok(out),
        },
        other => Err(QuarryError::agent(format!("unknown tool: {}", other))),
    }
}

/// Display path for titles and listings: relative to the collection
/// root when inside it.
pub(crate) fn display_path(base_path: &str, absolute: &str) -> String {
    let prefix = format!("{}/", base_path.trim_end_matches('/'));
    if absolute == base_path {
        ".".to_string()
    } else if let Some(rel) = absolute.strip_prefix(&prefix) {
        rel.to_string()
    } else {
        absolute.to_string()
    }
}
