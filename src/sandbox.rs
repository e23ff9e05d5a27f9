//! Path containment for tool access.
//!
//! Every path a tool touches goes through [`resolve`] (or its
//! symlink-aware variant) so that no request can address anything
//! outside its collection root. The advisory probes never throw; the
//! validate operations fail loudly when a caller needs the hard
//! guarantee.

use crate::error::{QuarryError, Result};
use crate::vfs::{normalize, VfsRegistry};

/// Relative path from `from` to `to`, both normalized absolute paths.
fn relative(from: &str, to: &str) -> String {
    let from_parts: Vec<&str> = from.split('/').filter(|s| !s.is_empty()).collect();
    let to_parts: Vec<&str> = to.split('/').filter(|s| !s.is_empty()).collect();
    let common = from_parts
        .iter()
        .zip(to_parts.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let mut parts: Vec<String> = Vec::new();
    for _ in common..from_parts.len() {
        parts.push("..".to_string());
    }
    for segment in &to_parts[common..] {
        parts.push((*segment).to_string());
    }
    parts.join("/")
}

/// Resolve `requested` against `base_path`, rejecting any result that
/// escapes the base.
pub fn resolve(base_path: &str, requested: &str) -> Result<String> {
    let base = normalize(base_path);
    let resolved = if requested.starts_with('/') {
        normalize(requested)
    } else {
        normalize(&format!("{}/{}", base, requested))
    };
    let rel = relative(&base, &resolved);
    if rel == ".." || rel.starts_with("../") || rel.starts_with('/') {
        return Err(QuarryError::PathEscape {
            path: requested.to_string(),
        });
    }
    Ok(resolved)
}

/// Like [`resolve`], additionally following symlinks to their real
/// target. Falls back to the plain resolution when real-path lookup
/// fails (broken or absent target); read-type tools must degrade
/// gracefully when probing uncertain paths.
pub fn resolve_following_symlinks(
    vfs: &VfsRegistry,
    instance_id: &str,
    base_path: &str,
    requested: &str,
) -> Result<String> {
    let resolved = resolve(base_path, requested)?;
    match vfs.realpath(&resolved, instance_id) {
        Ok(real) => Ok(real),
        Err(_) => Ok(resolved),
    }
}

/// Advisory existence probe. Any internal failure, including an escape,
/// reports `false`.
pub fn exists(vfs: &VfsRegistry, instance_id: &str, base_path: &str, requested: &str) -> bool {
    match resolve(base_path, requested) {
        Ok(path) => vfs.exists(&path, instance_id),
        Err(_) => false,
    }
}

/// Advisory directory probe.
pub fn is_directory(
    vfs: &VfsRegistry,
    instance_id: &str,
    base_path: &str,
    requested: &str,
) -> bool {
    match resolve(base_path, requested) {
        Ok(path) => vfs
            .stat(&path, instance_id)
            .map(|s| s.is_directory)
            .unwrap_or(false),
        Err(_) => false,
    }
}

/// Advisory file probe.
pub fn is_file(vfs: &VfsRegistry, instance_id: &str, base_path: &str, requested: &str) -> bool {
    match resolve(base_path, requested) {
        Ok(path) => vfs
            .stat(&path, instance_id)
            .map(|s| s.is_file)
            .unwrap_or(false),
        Err(_) => false,
    }
}

/// Loud variant: resolve and require an existing directory.
pub fn validate_directory(
    vfs: &VfsRegistry,
    instance_id: &str,
    base_path: &str,
    requested: &str,
) -> Result<String> {
    let path = resolve(base_path, requested)?;
    let stat = vfs.stat(&path, instance_id)?;
    if !stat.is_directory {
        return Err(QuarryError::NotADirectory { path });
    }
    Ok(path)
}
