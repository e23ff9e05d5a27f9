//! Import of a real directory subtree into a virtual instance.

use std::path::Path;
use std::time::UNIX_EPOCH;

use tracing::{debug, warn};
use walkdir::WalkDir;

use super::registry::VfsRegistry;
use super::store::join;
use crate::error::Result;

/// Options for [`VfsRegistry::import_directory_from_disk`].
pub struct ImportOptions<'a> {
    /// Real directory to walk.
    pub source_path: &'a Path,
    /// Absolute virtual destination for the subtree root.
    pub destination_path: &'a str,
    /// Predicate over slash-separated relative paths. Ignored
    /// directories are pruned entirely; their subtree is never visited.
    pub ignore: &'a dyn Fn(&str) -> bool,
    /// Target instance.
    pub instance_id: &'a str,
}

impl VfsRegistry {
    /// Walk `source_path` depth-first and copy it under
    /// `destination_path` in the given instance.
    ///
    /// Regular files are copied by content with their on-disk mtime;
    /// symlinks are recreated pointing at their original target string
    /// (broken targets are tolerated). Individual unreadable entries are
    /// skipped with a warning, never fatal for the whole import.
    pub fn import_directory_from_disk(&self, options: ImportOptions<'_>) -> Result<()> {
        let ImportOptions {
            source_path,
            destination_path,
            ignore,
            instance_id,
        } = options;

        self.mkdir(destination_path, instance_id)?;

        let mut walker = WalkDir::new(source_path).follow_links(false).into_iter();
        let mut imported = 0usize;
        while let Some(entry) = walker.next() {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!("Skipping unreadable entry during import: {}", e);
                    continue;
                }
            };
            if entry.depth() == 0 {
                continue;
            }

            let relative = match entry.path().strip_prefix(source_path) {
                Ok(p) => p.to_string_lossy().replace('\\', "/"),
                Err(_) => continue,
            };
            if ignore(&relative) {
                if entry.file_type().is_dir() {
                    walker.skip_current_dir();
                }
                continue;
            }

            let dest = join(destination_path, &relative);
            let file_type = entry.file_type();
            if file_type.is_dir() {
                self.mkdir(&dest, instance_id)?;
            } else if file_type.is_symlink() {
                match std::fs::read_link(entry.path()) {
                    Ok(target) => {
                        let target = target.to_string_lossy().replace('\\', "/");
                        self.symlink(&target, &dest, instance_id)?;
                    }
                    Err(e) => {
                        warn!("Skipping unreadable symlink {}: {}", relative, e);
                    }
                }
            } else if file_type.is_file() {
                let content = match std::fs::read(entry.path()) {
                    Ok(c) => c,
                    Err(e) => {
                        warn!("Skipping unreadable file {}: {}", relative, e);
                        continue;
                    }
                };
                let mtime = entry
                    .metadata()
                    .ok()
                    .and_then(|m| m.modified().ok())
                    .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                    .map(|d| d.as_millis() as u64)
                    .unwrap_or(0);
                self.write_file_with_mtime(&dest, content, mtime, instance_id)?;
                imported += 1;
            }
        }

        debug!(
            "Imported {} files from {} into {}",
            imported,
            source_path.display(),
            destination_path
        );
        Ok(())
    }
}
