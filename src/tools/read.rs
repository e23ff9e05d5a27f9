//! The read tool: bounded, line-numbered file content.

use base64::Engine;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;

use super::{display_path, Attachment, ToolContext, ToolOutput};
use crate::error::Result;
use crate::sandbox;

/// Default number of lines returned per call.
const DEFAULT_LINE_LIMIT: usize = 2000;
/// Individual lines longer than this are cut with an ellipsis.
const MAX_LINE_LENGTH: usize = 2000;
/// Total byte budget for one read.
const MAX_READ_BYTES: usize = 50 * 1024;
/// Maximum number of fuzzy filename suggestions.
const MAX_SUGGESTIONS: usize = 5;

/// Parameters for the read tool.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct ReadArgs {
    /// Path to the file, relative to the collection root
    pub path: String,
    /// Line offset to start reading from (0-based)
    pub offset: Option<usize>,
    /// Maximum number of lines to return (defaults to 2000)
    pub limit: Option<usize>,
}

fn extension(name: &str) -> Option<String> {
    name.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase())
}

fn image_media_type(ext: &str) -> Option<&'static str> {
    match ext {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "bmp" => Some("image/bmp"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

/// Suggest up to five files in the same directory sharing the first
/// three characters of the requested name.
fn suggestions(ctx: &ToolContext, resolved: &str) -> Vec<String> {
    let (dir, name) = match resolved.rsplit_once('/') {
        Some((d, n)) if !n.is_empty() => (if d.is_empty() { "/" } else { d }, n),
        _ => return Vec::new(),
    };
    let prefix: String = name.chars().take(3).collect::<String>().to_lowercase();
    if prefix.is_empty() {
        return Vec::new();
    }
    match ctx.vfs.readdir(dir, &ctx.vfs_instance_id) {
        Ok(children) => children
            .into_iter()
            .filter(|c| c.to_lowercase().starts_with(&prefix) && c.as_str() != name)
            .take(MAX_SUGGESTIONS)
            .collect(),
        Err(_) => Vec::new(),
    }
}

pub(super) fn run(args: ReadArgs, ctx: &ToolContext) -> Result<ToolOutput> {
    let requested = &args.path;
    let resolved = match sandbox::resolve_following_symlinks(
        &ctx.vfs,
        &ctx.vfs_instance_id,
        &ctx.base_path,
        requested,
    ) {
        Ok(p) => p,
        Err(_) => {
            return Ok(ToolOutput::text(
                requested.clone(),
                format!("Path is outside the collection: {}", requested),
                json!({ "error": "outside-collection" }),
            ));
        }
    };
    let title = display_path(&ctx.base_path, &resolved);

    let stat = ctx.vfs.stat(&resolved, &ctx.vfs_instance_id);
    match stat {
        Ok(s) if s.is_directory => {
            return Ok(ToolOutput::text(
                title,
                format!("Path is a directory, not a file: {}", requested),
                json!({ "error": "is-a-directory" }),
            ));
        }
        Err(_) => {
            let mut output = format!("File not found: {}", requested);
            let similar = suggestions(ctx, &resolved);
            if !similar.is_empty() {
                output.push_str("\n\nDid you mean one of these?");
                for s in &similar {
                    output.push_str("\n  - ");
                    output.push_str(s);
                }
            }
            return Ok(ToolOutput::text(
                title,
                output,
                json!({ "error": "not-found", "suggestions": similar }),
            ));
        }
        Ok(_) => {}
    }

    let name = resolved.rsplit('/').next().unwrap_or(&resolved).to_string();
    let ext = extension(&name);

    if let Some(media_type) = ext.as_deref().and_then(image_media_type) {
        let buffer = ctx.vfs.read_file_buffer(&resolved, &ctx.vfs_instance_id)?;
        return Ok(ToolOutput {
            title,
            output: format!("[Image file: {}]", name),
            metadata: json!({ "attachment": true, "mediaType": media_type }),
            attachment: Some(Attachment {
                media_type: media_type.to_string(),
                data: base64::engine::general_purpose::STANDARD.encode(buffer),
            }),
        });
    }
    if ext.as_deref() == Some("pdf") {
        let buffer = ctx.vfs.read_file_buffer(&resolved, &ctx.vfs_instance_id)?;
        return Ok(ToolOutput {
            title,
            output: format!("[PDF file: {}]", name),
            metadata: json!({ "attachment": true, "mediaType": "application/pdf" }),
            attachment: Some(Attachment {
                media_type: "application/pdf".to_string(),
                data: base64::engine::general_purpose::STANDARD.encode(buffer),
            }),
        });
    }

    let buffer = ctx.vfs.read_file_buffer(&resolved, &ctx.vfs_instance_id)?;
    if buffer.contains(&0) {
        return Ok(ToolOutput::text(
            title,
            format!("[Binary file: {}]", name),
            json!({ "binary": true, "truncated": false }),
        ));
    }

    let content = String::from_utf8_lossy(&buffer);
    let lines: Vec<&str> = content.lines().collect();
    let total_lines = lines.len();
    let offset = args.offset.unwrap_or(0);
    let limit = args.limit.unwrap_or(DEFAULT_LINE_LIMIT);

    let mut shown: Vec<String> = Vec::new();
    let mut bytes_used = 0usize;
    let mut byte_truncated = false;
    for (index, line) in lines.iter().enumerate().skip(offset) {
        // Byte budget is checked first so that byte-truncation wins the
        // truncation flag when both limits would trigger on this line.
        if bytes_used + line.len() > MAX_READ_BYTES {
            byte_truncated = true;
            break;
        }
        if shown.len() >= limit {
            break;
        }
        bytes_used += line.len();
        let display = if line.chars().count() > MAX_LINE_LENGTH {
            let cut: String = line.chars().take(MAX_LINE_LENGTH).collect();
            format!("{}...", cut)
        } else {
            (*line).to_string()
        };
        shown.push(format!("{:>5}\t{}", index + 1, display));
    }

    let next_offset = offset + shown.len();
    let remaining = total_lines.saturating_sub(next_offset);
    let line_truncated = remaining > 0;
    let truncated = byte_truncated || line_truncated;

    let mut output = shown.join("\n");
    if truncated {
        output.push_str(&format!(
            "\n\n({} more lines in file. Resume with offset={}.)",
            remaining, next_offset
        ));
    }

    // Byte-budget truncation wins when both limits would apply.
    let truncated_by = if byte_truncated {
        Some("bytes")
    } else if line_truncated {
        Some("lines")
    } else {
        None
    };
    let mut metadata = json!({
        "truncated": truncated,
        "totalLines": total_lines,
        "offset": offset,
        "linesShown": shown.len(),
    });
    if let Some(reason) = truncated_by {
        metadata["truncatedBy"] = json!(reason);
    }

    Ok(ToolOutput::text(title, output, metadata))
}
