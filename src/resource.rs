//! Resource definitions and the loader contract.
//!
//! A resource is a named, typed knowledge source (git repository,
//! package artifact, or local directory). Definitions are owned by
//! configuration; the core only consumes them through a
//! [`ResourceLoader`], which hands back a [`VirtualizedResource`] per
//! collection-load request.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{QuarryError, Result};

/// Kind discriminant shared by definitions and loaded resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Git,
    Package,
    Local,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Git => "git",
            ResourceKind::Package => "package",
            ResourceKind::Local => "local",
        }
    }
}

/// Immutable description of a configured resource.
///
/// `checkout` is where the external fetcher has materialized the
/// resource on disk; for local resources the path itself plays that
/// role.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ResourceDefinition {
    #[serde(rename_all = "camelCase")]
    Git {
        name: String,
        url: String,
        #[serde(default)]
        branch: Option<String>,
        #[serde(default)]
        checkout: Option<PathBuf>,
        #[serde(default)]
        focus: Vec<String>,
        #[serde(default)]
        notes: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Package {
        name: String,
        package: String,
        #[serde(default)]
        version: Option<String>,
        #[serde(default = "default_ecosystem")]
        ecosystem: String,
        #[serde(default)]
        checkout: Option<PathBuf>,
        #[serde(default)]
        focus: Vec<String>,
        #[serde(default)]
        notes: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Local {
        name: String,
        path: PathBuf,
        #[serde(default)]
        focus: Vec<String>,
        #[serde(default)]
        notes: Option<String>,
    },
}

fn default_ecosystem() -> String {
    "npm".to_string()
}

impl ResourceDefinition {
    pub fn name(&self) -> &str {
        match self {
            ResourceDefinition::Git { name, .. }
            | ResourceDefinition::Package { name, .. }
            | ResourceDefinition::Local { name, .. } => name,
        }
    }

    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceDefinition::Git { .. } => ResourceKind::Git,
            ResourceDefinition::Package { .. } => ResourceKind::Package,
            ResourceDefinition::Local { .. } => ResourceKind::Local,
        }
    }

    pub fn focus(&self) -> &[String] {
        match self {
            ResourceDefinition::Git { focus, .. }
            | ResourceDefinition::Package { focus, .. }
            | ResourceDefinition::Local { focus, .. } => focus,
        }
    }

    pub fn notes(&self) -> Option<&str> {
        match self {
            ResourceDefinition::Git { notes, .. }
            | ResourceDefinition::Package { notes, .. }
            | ResourceDefinition::Local { notes, .. } => notes.as_deref(),
        }
    }
}

/// Per-resource cleanup callback. Failures inside it are the callee's
/// problem; callers always swallow them.
pub type CleanupFn = Arc<dyn Fn() + Send + Sync>;

/// A resource materialized for one collection-load request.
pub struct VirtualizedResource {
    /// Configured name.
    pub name: String,
    /// Filesystem-safe name derived from `name`, used for the
    /// namespaced virtual subpath.
    pub fs_name: String,
    pub kind: ResourceKind,
    /// Real, on-disk absolute directory holding the materialized tree.
    pub real_path: PathBuf,
    /// Sub-paths the agent should look at first.
    pub focus: Vec<String>,
    /// Free-text notes passed through to the agent instructions.
    pub notes: Option<String>,
    /// Invoked once when the owning collection is torn down.
    pub cleanup: Option<CleanupFn>,
}

impl std::fmt::Debug for VirtualizedResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualizedResource")
            .field("name", &self.name)
            .field("fs_name", &self.fs_name)
            .field("kind", &self.kind)
            .field("real_path", &self.real_path)
            .finish_non_exhaustive()
    }
}

/// Derive a filesystem-safe name from a resource name.
///
/// Lowercased; anything outside `[a-z0-9._-]` collapses to a single
/// `-`; leading/trailing dashes are trimmed.
pub fn derive_fs_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_dash = false;
    for c in name.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
            out.push(c);
            last_dash = c == '-';
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    let trimmed = out.trim_matches('-').to_string();
    if trimmed.is_empty() {
        "resource".to_string()
    } else {
        trimmed
    }
}

/// External collaborator that materializes resources on disk.
#[async_trait]
pub trait ResourceLoader: Send + Sync {
    /// Resolve `name` to a materialized resource for one load request.
    async fn load(&self, name: &str, quiet: bool) -> Result<VirtualizedResource>;

    /// The concrete definition behind `name`, when one is configured.
    /// Used to enrich citation metadata.
    fn definition(&self, name: &str) -> Option<ResourceDefinition>;
}

/// Build the not-found error for an unresolvable name, recognizing
/// ad-hoc references so the hint stays actionable.
pub fn resource_not_found(name: &str, known: &[String]) -> QuarryError {
    let hint = if name.starts_with("https://") && name.contains("git") {
        format!(
            "'{}' looks like a git URL. Add it to resources.json with a name and a local checkout path.",
            name
        )
    } else if name.contains('@') && !name.contains('/') {
        format!(
            "'{}' looks like a package reference. Add it to resources.json with a name and a local checkout path.",
            name
        )
    } else if known.is_empty() {
        "No resources are configured. Create a resources.json first.".to_string()
    } else {
        format!("Known resources: {}", known.join(", "))
    };
    QuarryError::ResourceNotFound {
        name: name.to_string(),
        hint,
    }
}
