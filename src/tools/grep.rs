//! The grep tool: regex search over file contents.

use regex::Regex;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;

use super::glob::glob_to_regex;
use super::{display_path, ToolContext, ToolOutput};
use crate::error::Result;
use crate::sandbox;

/// Matches are collected until this many have been found; anything
/// beyond only proves there was more.
const MAX_MATCHES: usize = 100;
/// Displayed match lines are cut at this many characters.
const MAX_LINE_DISPLAY: usize = 200;

/// Parameters for the grep tool.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct GrepArgs {
    /// Regular expression to search for
    pub pattern: String,
    /// Directory to search in (defaults to the collection root)
    pub path: Option<String>,
    /// Glob restricting which files are searched, matched against the
    /// basename (no slash) or the relative path (with slash)
    pub include: Option<String>,
}

struct FileMatches {
    rel: String,
    mtime: u64,
    lines: Vec<(usize, String)>,
}

pub(super) fn run(args: GrepArgs, ctx: &ToolContext) -> Result<ToolOutput> {
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

    let regex = match Regex::new(&args.pattern) {
        Ok(r) => r,
        Err(e) => {
            return Ok(ToolOutput::text(
                args.pattern.clone(),
                format!("Invalid regex pattern: {}", e),
                json!({ "error": "invalid-pattern" }),
            ));
        }
    };
    let include = match args.include.as_deref() {
        Some(glob) => match glob_to_regex(glob) {
            Some(r) => Some((r, glob.contains('/'))),
            None => {
                return Ok(ToolOutput::text(
                    args.pattern.clone(),
                    format!("Invalid include glob: {}", glob),
                    json!({ "error": "invalid-pattern" }),
                ));
            }
        },
        None => None,
    };

    let files = ctx.vfs.list_files_recursive(&root, &ctx.vfs_instance_id)?;
    let mut groups: Vec<FileMatches> = Vec::new();
    let mut total = 0usize;
    let mut truncated = false;
    'files: for file in files {
        let rel = display_path(&root, &file);
        if let Some((ref include_re, on_path)) = include {
            let candidate = if on_path {
                rel.as_str()
            } else {
                rel.rsplit('/').next().unwrap_or(&rel)
            };
            if !include_re.is_match(candidate) {
                continue;
            }
        }

        let buffer = match ctx.vfs.read_file_buffer(&file, &ctx.vfs_instance_id) {
            Ok(b) => b,
            Err(_) => continue,
        };
        if buffer.contains(&0) {
            continue;
        }
        let content = String::from_utf8_lossy(&buffer);

        let mut lines = Vec::new();
        for (index, line) in content.lines().enumerate() {
            if regex.is_match(line) {
                lines.push((index + 1, line.to_string()));
                total += 1;
                if total > MAX_MATCHES {
                    // One extra match proves truncation; it is dropped
                    // before display.
                    truncated = true;
                    lines.pop();
                    total -= 1;
                    if !lines.is_empty() {
                        let mtime = ctx
                            .vfs
                            .stat(&file, &ctx.vfs_instance_id)
                            .map(|s| s.mtime_millis)
                            .unwrap_or(0);
                        groups.push(FileMatches { rel, mtime, lines });
                    }
                    break 'files;
                }
            }
        }
        if !lines.is_empty() {
            let mtime = ctx
                .vfs
                .stat(&file, &ctx.vfs_instance_id)
                .map(|s| s.mtime_millis)
                .unwrap_or(0);
            groups.push(FileMatches { rel, mtime, lines });
        }
    }

    if groups.is_empty() {
        return Ok(ToolOutput::text(
            args.pattern.clone(),
            "No matches found",
            json!({ "matches": 0, "truncated": false }),
        ));
    }

    groups.sort_by(|a, b| b.mtime.cmp(&a.mtime).then_with(|| a.rel.cmp(&b.rel)));

    let mut output = format!("Found {} match(es)\n", total);
    for group in &groups {
        output.push('\n');
        output.push_str(&group.rel);
        output.push(':');
        for (line_no, text) in &group.lines {
            let display = if text.chars().count() > MAX_LINE_DISPLAY {
                let cut: String = text.chars().take(MAX_LINE_DISPLAY).collect();
                format!("{}...", cut)
            } else {
                text.clone()
            };
            output.push_str(&format!("\n  Line {}: {}", line_no, display));
        }
        output.push('\n');
    }
    if truncated {
        output.push_str("\n(Match limit reached; refine the pattern to see more.)");
    }

    Ok(ToolOutput::text(
        args.pattern.clone(),
        output.trim_end().to_string(),
        json!({ "matches": total, "truncated": truncated }),
    ))
}
