//! Per-collection provenance metadata.
//!
//! One entry per live collection, keyed by its VFS instance id.
//! Inserted when a load finishes, removed when the collection is
//! disposed. The store is an explicit object injected where needed.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Citation-relevant provenance of one loaded resource.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ResourceProvenance {
    #[serde(rename_all = "camelCase")]
    Git {
        name: String,
        url: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        branch: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        commit: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Package {
        name: String,
        ecosystem: String,
        package: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        version: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Local { name: String, path: String },
}

impl ResourceProvenance {
    pub fn name(&self) -> &str {
        match self {
            ResourceProvenance::Git { name, .. }
            | ResourceProvenance::Package { name, .. }
            | ResourceProvenance::Local { name, .. } => name,
        }
    }
}

/// Metadata for one assembled collection.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualCollectionMetadata {
    pub vfs_instance_id: String,
    pub collection_key: String,
    pub created_at: DateTime<Utc>,
    pub resources: Vec<ResourceProvenance>,
}

#[derive(Debug, Default)]
pub struct CollectionMetadataStore {
    inner: Mutex<HashMap<String, VirtualCollectionMetadata>>,
}

impl CollectionMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, metadata: VirtualCollectionMetadata) {
        self.lock()
            .insert(metadata.vfs_instance_id.clone(), metadata);
    }

    pub fn get(&self, vfs_instance_id: &str) -> Option<VirtualCollectionMetadata> {
        self.lock().get(vfs_instance_id).cloned()
    }

    pub fn remove(&self, vfs_instance_id: &str) -> Option<VirtualCollectionMetadata> {
        self.lock().remove(vfs_instance_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, VirtualCollectionMetadata>> {
        self.inner.lock().expect("metadata store lock poisoned")
    }
}
