//! Process-wide registry of virtual filesystem instances.
//!
//! The registry is an explicit object constructed once and passed by
//! reference into every component that needs it; there is no hidden
//! global. Instance ids are caller-held UUIDs: operating on an id that
//! was disposed (or never created) transparently gets a fresh empty
//! instance rather than an error.

use std::collections::HashMap;
use std::sync::Mutex;

use uuid::Uuid;

use super::store::{VfsInstance, VfsStat};
use crate::error::Result;

#[derive(Debug, Default)]
pub struct VfsRegistry {
    instances: Mutex<HashMap<String, VfsInstance>>,
}

impl VfsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fresh instance and return its id.
    pub fn create(&self) -> String {
        let id = Uuid::new_v4().to_string();
        self.lock().insert(id.clone(), VfsInstance::new());
        id
    }

    /// Drop an instance and all of its contents.
    pub fn dispose(&self, instance_id: &str) {
        self.lock().remove(instance_id);
    }

    /// Number of live instances (diagnostics only).
    pub fn instance_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, VfsInstance>> {
        self.instances.lock().expect("vfs registry lock poisoned")
    }

    fn with_instance<R>(&self, instance_id: &str, f: impl FnOnce(&mut VfsInstance) -> R) -> R {
        let mut guard = self.lock();
        let instance = guard
            .entry(instance_id.to_string())
            .or_insert_with(VfsInstance::new);
        f(instance)
    }

    pub fn mkdir(&self, path: &str, instance_id: &str) -> Result<()> {
        self.with_instance(instance_id, |vfs| vfs.mkdir(path))
    }

    pub fn rm(&self, path: &str, instance_id: &str) -> Result<()> {
        self.with_instance(instance_id, |vfs| vfs.rm(path))
    }

    pub fn stat(&self, path: &str, instance_id: &str) -> Result<VfsStat> {
        self.with_instance(instance_id, |vfs| vfs.stat(path))
    }

    pub fn exists(&self, path: &str, instance_id: &str) -> bool {
        self.with_instance(instance_id, |vfs| vfs.exists(path))
    }

    pub fn readdir(&self, path: &str, instance_id: &str) -> Result<Vec<String>> {
        self.with_instance(instance_id, |vfs| vfs.readdir(path))
    }

    /// Kind of the entry itself (`(is_dir, is_file)`), not following a
    /// final symlink.
    pub fn entry_kind(&self, path: &str, instance_id: &str) -> Result<(bool, bool)> {
        self.with_instance(instance_id, |vfs| vfs.entry_kind(path))
    }

    pub fn read_file(&self, path: &str, instance_id: &str) -> Result<String> {
        self.with_instance(instance_id, |vfs| vfs.read_file(path))
    }

    pub fn read_file_buffer(&self, path: &str, instance_id: &str) -> Result<Vec<u8>> {
        self.with_instance(instance_id, |vfs| vfs.read_file_buffer(path))
    }

    pub fn write_file(&self, path: &str, content: Vec<u8>, instance_id: &str) -> Result<()> {
        self.with_instance(instance_id, |vfs| vfs.write_file(path, content))
    }

    pub(crate) fn write_file_with_mtime(
        &self,
        path: &str,
        content: Vec<u8>,
        mtime_millis: u64,
        instance_id: &str,
    ) -> Result<()> {
        self.with_instance(instance_id, |vfs| {
            vfs.write_file_with_mtime(path, content, mtime_millis)
        })
    }

    pub fn symlink(&self, target: &str, path: &str, instance_id: &str) -> Result<()> {
        self.with_instance(instance_id, |vfs| vfs.symlink(target, path))
    }

    pub fn realpath(&self, path: &str, instance_id: &str) -> Result<String> {
        self.with_instance(instance_id, |vfs| vfs.realpath(path))
    }

    pub fn list_files_recursive(&self, root: &str, instance_id: &str) -> Result<Vec<String>> {
        self.with_instance(instance_id, |vfs| vfs.list_files_recursive(root))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instances_are_isolated() {
        let registry = VfsRegistry::new();
        let a = registry.create();
        let b = registry.create();

        registry.write_file("/f.txt", b"a".to_vec(), &a).unwrap();
        assert!(registry.exists("/f.txt", &a));
        assert!(!registry.exists("/f.txt", &b));
    }

    #[test]
    fn test_disposed_instance_behaves_fresh() {
        let registry = VfsRegistry::new();
        let id = registry.create();
        registry.write_file("/f.txt", b"a".to_vec(), &id).unwrap();
        registry.dispose(&id);

        // Prior content never resurrects; the id just maps to a fresh
        // empty instance again.
        assert!(!registry.exists("/f.txt", &id));
        registry.mkdir("/again", &id).unwrap();
        assert!(registry.exists("/again", &id));
    }

    #[test]
    fn test_unknown_instance_id_is_created_on_demand() {
        let registry = VfsRegistry::new();
        assert!(!registry.exists("/x", "never-created"));
        registry
            .write_file("/x", b"ok".to_vec(), "never-created")
            .unwrap();
        assert_eq!(registry.read_file("/x", "never-created").unwrap(), "ok");
    }
}
