//! The list tool: immediate children of a directory.

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;

use super::{display_path, ToolContext, ToolOutput};
use crate::error::Result;
use crate::sandbox;
use crate::vfs::normalize;

/// Parameters for the list tool.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListArgs {
    /// Directory to list, relative to the collection root
    pub path: String,
}

#[derive(PartialEq, Eq, PartialOrd, Ord)]
enum Kind {
    Directory,
    File,
    Other,
}

impl Kind {
    fn label(&self) -> &'static str {
        match self {
            Kind::Directory => "dir",
            Kind::File => "file",
            Kind::Other => "other",
        }
    }
}

pub(super) fn run(args: ListArgs, ctx: &ToolContext) -> Result<ToolOutput> {
    let requested = &args.path;
    let dir = match sandbox::resolve(&ctx.base_path, requested) {
        Ok(p) => p,
        Err(_) => {
            return Ok(ToolOutput::text(
                requested.clone(),
                format!("Path is outside the collection: {}", requested),
                json!({ "error": "outside-collection" }),
            ));
        }
    };
    match ctx.vfs.stat(&dir, &ctx.vfs_instance_id) {
        Ok(s) if s.is_directory => {}
        Ok(_) => {
            return Ok(ToolOutput::text(
                requested.clone(),
                format!("Not a directory: {}", requested),
                json!({ "error": "not-a-directory" }),
            ));
        }
        Err(_) => {
            return Ok(ToolOutput::text(
                requested.clone(),
                format!("Path not found: {}", requested),
                json!({ "error": "not-found" }),
            ));
        }
    }

    let children = ctx.vfs.readdir(&dir, &ctx.vfs_instance_id)?;
    let mut entries: Vec<(Kind, String, u64)> = Vec::new();
    for name in children {
        let child = normalize(&format!("{}/{}", dir, name));
        let (kind, size) = match ctx.vfs.entry_kind(&child, &ctx.vfs_instance_id) {
            Ok((true, _)) => (Kind::Directory, 0),
            Ok((_, true)) => {
                let size = ctx
                    .vfs
                    .stat(&child, &ctx.vfs_instance_id)
                    .map(|s| s.size)
                    .unwrap_or(0);
                (Kind::File, size)
            }
            Ok(_) => (Kind::Other, 0),
            Err(_) => continue,
        };
        entries.push((kind, name, size));
    }

    // Directories first, then files, then the rest; alphabetical within
    // each group.
    entries.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

    let dirs = entries.iter().filter(|e| e.0 == Kind::Directory).count();
    let files = entries.iter().filter(|e| e.0 == Kind::File).count();
    let other = entries.iter().filter(|e| e.0 == Kind::Other).count();

    let title = display_path(&ctx.base_path, &dir);
    let mut output = format!("{}:\n", title);
    for (kind, name, size) in &entries {
        let display_name = if *kind == Kind::Directory {
            format!("{}/", name)
        } else {
            name.clone()
        };
        let size_column = if *kind == Kind::File {
            format!("{} B", size)
        } else {
            String::new()
        };
        let line = format!("  {:<6}{:<42}{:>10}", kind.label(), display_name, size_column);
        output.push_str(line.trim_end());
        output.push('\n');
    }
    output.push_str(&format!(
        "\n{} director{}, {} file{}",
        dirs,
        if dirs == 1 { "y" } else { "ies" },
        files,
        if files == 1 { "" } else { "s" },
    ));
    if other > 0 {
        output.push_str(&format!(", {} other", other));
    }

    Ok(ToolOutput::text(
        title,
        output,
        json!({ "directories": dirs, "files": files, "other": other }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::VfsRegistry;
    use std::sync::Arc;

    fn ctx() -> ToolContext {
        let vfs = Arc::new(VfsRegistry::new());
        let id = vfs.create();
        vfs.mkdir("/root/src", &id).unwrap();
        vfs.mkdir("/root/docs", &id).unwrap();
        vfs.write_file("/root/Cargo.toml", b"[package]".to_vec(), &id)
            .unwrap();
        vfs.write_file("/root/README.md", b"# readme".to_vec(), &id)
            .unwrap();
        vfs.symlink("/root/src", "/root/src-link", &id).unwrap();
        ToolContext {
            base_path: "/root".to_string(),
            vfs_instance_id: id,
            vfs,
        }
    }

    #[test]
    fn test_list_orders_directories_first() {
        let out = run(
            ListArgs {
                path: ".".to_string(),
            },
            &ctx(),
        )
        .unwrap();
        let lines: Vec<&str> = out.output.lines().collect();
        assert_eq!(lines[0], ".:");
        assert!(lines[1].starts_with("  dir   docs/"));
        assert!(lines[2].starts_with("  dir   src/"));
        assert!(lines[3].starts_with("  file  Cargo.toml"));
        assert!(lines[4].starts_with("  file  README.md"));
        assert!(lines[5].starts_with("  other src-link"));
        assert!(out.output.ends_with("2 directories, 2 files, 1 other"));
        assert_eq!(out.metadata["directories"], 2);
        assert_eq!(out.metadata["files"], 2);
    }

    #[test]
    fn test_list_file_sizes_shown() {
        let out = run(
            ListArgs {
                path: ".".to_string(),
            },
            &ctx(),
        )
        .unwrap();
        assert!(out.output.contains("9 B"));
    }

    #[test]
    fn test_list_not_a_directory_is_advisory() {
        let out = run(
            ListArgs {
                path: "Cargo.toml".to_string(),
            },
            &ctx(),
        )
        .unwrap();
        assert_eq!(out.output, "Not a directory: Cargo.toml");
    }

    #[test]
    fn test_list_missing_path_is_advisory() {
        let out = run(
            ListArgs {
                path: "nope".to_string(),
            },
            &ctx(),
        )
        .unwrap();
        assert_eq!(out.output, "Path not found: nope");
    }
}
