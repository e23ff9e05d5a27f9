//! The glob tool: pattern-based file discovery, newest first.

use regex::Regex;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;

use super::{display_path, ToolContext, ToolOutput};
use crate::error::Result;
use crate::sandbox;

/// Maximum number of results returned per call.
const MAX_RESULTS: usize = 100;

/// Parameters for the glob tool.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct GlobArgs {
    /// Glob pattern matched against paths relative to the search root
    pub pattern: String,
    /// Directory to search in (defaults to the collection root)
    pub path: Option<String>,
}

/// Translate glob syntax to an anchored regular expression.
///
/// `**` matches any sequence including separators, `*` any sequence
/// excluding separators, `?` one non-separator character; everything
/// else is matched literally.
pub(crate) fn glob_to_regex(pattern: &str) -> Option<Regex> {
    let mut re = String::from("^");
    let chars: Vec<char> = pattern.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' => {
                if chars.get(i + 1) == Some(&'*') {
                    re.push_str(".*");
                    i += 2;
                } else {
                    re.push_str("[^/]*");
                    i += 1;
                }
            }
            '?' => {
                re.push_str("[^/]");
                i += 1;
            }
            c => {
                re.push_str(&regex::escape(&c.to_string()));
                i += 1;
            }
        }
    }
    re.push('$');
    Regex::new(&re).ok()
}

pub(super) fn run(args: GlobArgs, ctx: &ToolContext) -> Result<ToolOutput> {
    let requested_root = args.path.as_deref().unwrap_or(".");
    let root = match sandbox::resolve(&ctx.base_path, requested_root) {
        Ok(p) => p,
        Err(_) => {
            return Ok(ToolOutput::text(
                args.pattern.clone(),
                format!("Path is outside the collection: {}", requested_root),
                json!({ "error": "outside-collection" }),
            ));
        }
    };
    match ctx.vfs.stat(&root, &ctx.vfs_instance_id) {
        Ok(s) if s.is_directory => {}
        Ok(_) => {
            return Ok(ToolOutput::text(
                args.pattern.clone(),
                format!("Not a directory: {}", requested_root),
                json!({ "error": "not-a-directory" }),
            ));
        }
        Err(_) => {
            return Ok(ToolOutput::text(
                args.pattern.clone(),
                format!("Path not found: {}", requested_root),
                json!({ "error": "not-found" }),
            ));
        }
    }

    let regex = match glob_to_regex(&args.pattern) {
        Some(r) => r,
        None => {
            return Ok(ToolOutput::text(
                args.pattern.clone(),
                format!("Invalid glob pattern: {}", args.pattern),
                json!({ "error": "invalid-pattern" }),
            ));
        }
    };

    let files = ctx.vfs.list_files_recursive(&root, &ctx.vfs_instance_id)?;
    let mut results: Vec<(String, u64)> = Vec::new();
    let mut truncated = false;
    for file in files {
        let rel = display_path(&root, &file);
        if !regex.is_match(&rel) {
            continue;
        }
        if results.len() >= MAX_RESULTS {
            truncated = true;
            break;
        }
        let mtime = ctx
            .vfs
            .stat(&file, &ctx.vfs_instance_id)
            .map(|s| s.mtime_millis)
            .unwrap_or(0);
        results.push((rel, mtime));
    }

    results.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    let count = results.len();
    let output = if results.is_empty() {
        "No files found".to_string()
    } else {
        let mut out = results
            .iter()
            .map(|(p, _)| p.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        if truncated {
            out.push_str("\n\n(Result limit reached; narrow the pattern to see more.)");
        }
        out
    };

    Ok(ToolOutput::text(
        args.pattern.clone(),
        output,
        json!({ "count": count, "truncated": truncated }),
    ))
}
