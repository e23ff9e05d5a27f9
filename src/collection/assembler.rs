//! Collection assembly: many resources, one searchable filesystem.

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::instructions::instruction_block;
use super::metadata::{CollectionMetadataStore, ResourceProvenance, VirtualCollectionMetadata};
use crate::error::{QuarryError, Result};
use crate::resource::{CleanupFn, ResourceDefinition, ResourceLoader, VirtualizedResource};
use crate::vfs::{ImportOptions, VfsRegistry};

/// Root directory every resource is mounted under.
pub const COLLECTION_ROOT: &str = "/sources";

/// Hex length of the collection cache key.
const COLLECTION_KEY_LEN: usize = 16;

/// Derive the order-independent cache key for a sorted name set.
pub fn collection_key(sorted_names: &[String]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(sorted_names.join("\n").as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    hex[..COLLECTION_KEY_LEN].to_string()
}

/// Version-control metadata directories are never imported.
fn is_vcs_path(relative: &str) -> bool {
    relative
        .split('/')
        .any(|segment| matches!(segment, ".git" | ".hg" | ".svn"))
}

/// Best-effort resolved commit of a checkout. Never fatal.
async fn git_head(path: &Path) -> Option<String> {
    let output = tokio::process::Command::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(path)
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let commit = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if commit.is_empty() {
        None
    } else {
        Some(commit)
    }
}

/// Best-effort resolved version of an npm-style package checkout.
fn package_manifest_version(path: &Path) -> Option<String> {
    let raw = std::fs::read_to_string(path.join("package.json")).ok()?;
    let manifest: serde_json::Value = serde_json::from_str(&raw).ok()?;
    manifest["version"].as_str().map(str::to_string)
}

/// Request for one collection load.
#[derive(Debug, Clone)]
pub struct LoadRequest {
    pub resource_names: Vec<String>,
    /// Suppress loader progress output.
    pub quiet: bool,
}

/// Guaranteed, idempotent-safe teardown of one collection.
///
/// Disposes the VFS instance, removes the metadata entry, and runs
/// every per-resource cleanup callback. Individual cleanup failures are
/// swallowed; teardown never fails a user-visible operation.
#[derive(Clone)]
pub struct CollectionCleanup {
    inner: Arc<Mutex<Option<CleanupState>>>,
}

struct CleanupState {
    vfs: Arc<VfsRegistry>,
    metadata: Arc<CollectionMetadataStore>,
    vfs_instance_id: String,
    resource_cleanups: Vec<CleanupFn>,
}

impl CollectionCleanup {
    pub(crate) fn new(
        vfs: Arc<VfsRegistry>,
        metadata: Arc<CollectionMetadataStore>,
        vfs_instance_id: String,
        resource_cleanups: Vec<CleanupFn>,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(CleanupState {
                vfs,
                metadata,
                vfs_instance_id,
                resource_cleanups,
            }))),
        }
    }

    /// Run the teardown. Later calls are no-ops.
    pub fn run(&self) {
        let state = self
            .inner
            .lock()
            .expect("cleanup lock poisoned")
            .take();
        let Some(state) = state else {
            return;
        };
        state.vfs.dispose(&state.vfs_instance_id);
        state.metadata.remove(&state.vfs_instance_id);
        for cleanup in &state.resource_cleanups {
            if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| cleanup())).is_err() {
                warn!("Resource cleanup panicked; continuing teardown");
            }
        }
        debug!("Collection {} torn down", state.vfs_instance_id);
    }
}

impl std::fmt::Debug for CollectionCleanup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionCleanup").finish_non_exhaustive()
    }
}

/// The assembled, queryable view handed to one agent run.
#[derive(Debug)]
pub struct CollectionResult {
    pub root_path: String,
    pub agent_instructions: String,
    pub vfs_instance_id: String,
    pub collection_key: String,
    pub resources: Vec<ResourceProvenance>,
    pub cleanup: CollectionCleanup,
}

/// Assembles collections from named resources.
pub struct CollectionAssembler {
    vfs: Arc<VfsRegistry>,
    metadata: Arc<CollectionMetadataStore>,
    loader: Arc<dyn ResourceLoader>,
}

impl CollectionAssembler {
    pub fn new(
        vfs: Arc<VfsRegistry>,
        metadata: Arc<CollectionMetadataStore>,
        loader: Arc<dyn ResourceLoader>,
    ) -> Self {
        Self {
            vfs,
            metadata,
            loader,
        }
    }

    /// Load every named resource into one fresh VFS instance.
    ///
    /// On any failure, everything acquired so far is rolled back: the
    /// instance is disposed, metadata is cleared, and the cleanup of
    /// every already-loaded resource runs.
    pub async fn load(&self, request: LoadRequest) -> Result<CollectionResult> {
        let mut names: Vec<String> = request
            .resource_names
            .iter()
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .collect();
        names.sort();
        names.dedup();
        if names.is_empty() {
            return Err(QuarryError::CollectionLoad {
                message: "no resources requested".to_string(),
                hint: Some("Pass at least one resource name with -r.".to_string()),
                source: None,
            });
        }

        let key = collection_key(&names);
        let instance_id = self.vfs.create();
        debug!("Assembling collection {} ({} resources)", key, names.len());

        let mut loaded: Vec<VirtualizedResource> = Vec::new();
        let mut blocks: Vec<String> = Vec::new();
        let mut provenance: Vec<ResourceProvenance> = Vec::new();

        let assembled: Result<()> = async {
            self.vfs.mkdir(COLLECTION_ROOT, &instance_id)?;
            for name in &names {
                let resource = self.loader.load(name, request.quiet).await?;
                let destination = format!("{}/{}", COLLECTION_ROOT, resource.fs_name);
                if self.vfs.exists(&destination, &instance_id) {
                    self.vfs.rm(&destination, &instance_id)?;
                }
                self.vfs.import_directory_from_disk(ImportOptions {
                    source_path: &resource.real_path,
                    destination_path: &destination,
                    ignore: &is_vcs_path,
                    instance_id: &instance_id,
                })?;

                let definition = self.loader.definition(name);
                let prov = build_provenance(&resource, definition).await;
                blocks.push(instruction_block(&resource, &destination, &prov));
                provenance.push(prov);
                loaded.push(resource);
            }
            Ok(())
        }
        .await;

        if let Err(cause) = assembled {
            self.vfs.dispose(&instance_id);
            self.metadata.remove(&instance_id);
            for resource in &loaded {
                if let Some(cleanup) = &resource.cleanup {
                    cleanup();
                }
            }
            return Err(QuarryError::CollectionLoad {
                message: format!("could not assemble collection {}", key),
                hint: Some(
                    "Check that every requested resource is configured and its checkout exists."
                        .to_string(),
                ),
                source: Some(Box::new(cause)),
            });
        }

        self.metadata.insert(VirtualCollectionMetadata {
            vfs_instance_id: instance_id.clone(),
            collection_key: key.clone(),
            created_at: Utc::now(),
            resources: provenance.clone(),
        });

        let resource_cleanups: Vec<CleanupFn> = loaded
            .iter()
            .filter_map(|r| r.cleanup.clone())
            .collect();
        let cleanup = CollectionCleanup::new(
            self.vfs.clone(),
            self.metadata.clone(),
            instance_id.clone(),
            resource_cleanups,
        );

        Ok(CollectionResult {
            root_path: COLLECTION_ROOT.to_string(),
            agent_instructions: blocks.join("\n\n"),
            vfs_instance_id: instance_id,
            collection_key: key,
            resources: provenance,
            cleanup,
        })
    }
}

async fn build_provenance(
    resource: &VirtualizedResource,
    definition: Option<ResourceDefinition>,
) -> ResourceProvenance {
    match definition {
        Some(ResourceDefinition::Git { url, branch, .. }) => {
            let commit = git_head(&resource.real_path).await;
            ResourceProvenance::Git {
                name: resource.name.clone(),
                url,
                branch,
                commit,
            }
        }
        Some(ResourceDefinition::Package {
            package,
            version,
            ecosystem,
            ..
        }) => {
            let version = version.or_else(|| package_manifest_version(&resource.real_path));
            ResourceProvenance::Package {
                name: resource.name.clone(),
                ecosystem,
                package,
                version,
            }
        }
        _ => ResourceProvenance::Local {
            name: resource.name.clone(),
            path: resource.real_path.display().to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{derive_fs_name, ResourceKind};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct StubLoader {
        dirs: HashMap<String, PathBuf>,
        cleanup_counter: Arc<AtomicUsize>,
        fail_on: Option<String>,
    }

    #[async_trait]
    impl ResourceLoader for StubLoader {
        async fn load(&self, name: &str, _quiet: bool) -> Result<VirtualizedResource> {
            if self.fail_on.as_deref() == Some(name) {
                return Err(crate::resource::resource_not_found(name, &[]));
            }
            let path = self
                .dirs
                .get(name)
                .ok_or_else(|| crate::resource::resource_not_found(name, &[]))?;
            let counter = self.cleanup_counter.clone();
            Ok(VirtualizedResource {
                name: name.to_string(),
                fs_name: derive_fs_name(name),
                kind: ResourceKind::Local,
                real_path: path.clone(),
                focus: Vec::new(),
                notes: None,
                cleanup: Some(Arc::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                })),
            })
        }

        fn definition(&self, _name: &str) -> Option<ResourceDefinition> {
            None
        }
    }

    fn fixture(files: &[(&str, &str)]) -> TempDir {
        let tmp = TempDir::new().unwrap();
        for (rel, content) in files {
            let path = tmp.path().join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, content).unwrap();
        }
        tmp
    }

    fn assembler(
        loader: StubLoader,
    ) -> (Arc<VfsRegistry>, Arc<CollectionMetadataStore>, CollectionAssembler) {
        let vfs = Arc::new(VfsRegistry::new());
        let metadata = Arc::new(CollectionMetadataStore::new());
        let assembler =
            CollectionAssembler::new(vfs.clone(), metadata.clone(), Arc::new(loader));
        (vfs, metadata, assembler)
    }

    #[test]
    fn test_collection_key_is_order_independent() {
        let mut a = vec!["beta".to_string(), "alpha".to_string()];
        let mut b = vec!["alpha".to_string(), "beta".to_string()];
        a.sort();
        b.sort();
        assert_eq!(collection_key(&a), collection_key(&b));
        assert_ne!(collection_key(&a), collection_key(&["alpha".to_string()]));
        assert_eq!(collection_key(&a).len(), 16);
    }

    #[test]
    fn test_vcs_paths_are_excluded() {
        assert!(is_vcs_path(".git"));
        assert!(is_vcs_path("a/.git/HEAD"));
        assert!(is_vcs_path("a/.hg"));
        assert!(!is_vcs_path("src/git_helpers.rs"));
        assert!(!is_vcs_path(".github/workflows/ci.yml"));
    }

    #[tokio::test]
    async fn test_load_assembles_and_instructs() {
        let tmp = fixture(&[("src/lib.rs", "pub fn x() {}"), (".git/HEAD", "ref")]);
        let counter = Arc::new(AtomicUsize::new(0));
        let (vfs, metadata, assembler) = assembler(StubLoader {
            dirs: HashMap::from([("demo".to_string(), tmp.path().to_path_buf())]),
            cleanup_counter: counter.clone(),
            fail_on: None,
        });

        let result = assembler
            .load(LoadRequest {
                resource_names: vec!["demo".to_string(), "demo".to_string()],
                quiet: true,
            })
            .await
            .unwrap();

        assert_eq!(result.root_path, "/sources");
        assert!(result.agent_instructions.contains("## Resource: demo"));
        assert!(vfs.exists("/sources/demo/src/lib.rs", &result.vfs_instance_id));
        assert!(!vfs.exists("/sources/demo/.git", &result.vfs_instance_id));
        assert_eq!(metadata.len(), 1);
        assert_eq!(
            metadata.get(&result.vfs_instance_id).unwrap().collection_key,
            result.collection_key
        );

        result.cleanup.run();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(metadata.is_empty());
        assert!(!vfs.exists("/sources/demo/src/lib.rs", &result.vfs_instance_id));

        // Idempotent-safe: a second run does nothing.
        result.cleanup.run();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_partial_failure_rolls_back() {
        let tmp = fixture(&[("a.txt", "content")]);
        let counter = Arc::new(AtomicUsize::new(0));
        let (vfs, metadata, assembler) = assembler(StubLoader {
            dirs: HashMap::from([("alpha".to_string(), tmp.path().to_path_buf())]),
            cleanup_counter: counter.clone(),
            fail_on: Some("zeta".to_string()),
        });

        // "alpha" sorts before "zeta", so it loads first and must be
        // cleaned up when "zeta" fails.
        let err = assembler
            .load(LoadRequest {
                resource_names: vec!["zeta".to_string(), "alpha".to_string()],
                quiet: true,
            })
            .await
            .unwrap_err();

        assert_eq!(err.tag(), "collection-load");
        assert!(err.hint().is_some());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(metadata.is_empty());
        assert_eq!(vfs.instance_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_request_fails() {
        let (_vfs, _metadata, assembler) = assembler(StubLoader {
            dirs: HashMap::new(),
            cleanup_counter: Arc::new(AtomicUsize::new(0)),
            fail_on: None,
        });
        let err = assembler
            .load(LoadRequest {
                resource_names: vec!["  ".to_string()],
                quiet: true,
            })
            .await
            .unwrap_err();
        assert_eq!(err.tag(), "collection-load");
    }
}
