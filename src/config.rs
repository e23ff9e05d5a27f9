//! Resource configuration and the reference loader.
//!
//! Resources are declared in a JSON file (default
//! `~/.quarry/resources.json`, overridable with `QUARRY_CONFIG`).
//! Provider settings come from the environment. The loader here
//! resolves names to already-materialized directories; fetching is an
//! external concern.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{QuarryError, Result};
use crate::resource::{
    derive_fs_name, resource_not_found, ResourceDefinition, ResourceLoader, VirtualizedResource,
};

/// Environment variable overriding the config file location.
pub const CONFIG_ENV: &str = "QUARRY_CONFIG";

/// Top-level config file structure.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct QuarryConfig {
    #[serde(default)]
    pub resources: Vec<ResourceDefinition>,
}

impl QuarryConfig {
    /// Default location under the user's home directory.
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir().ok_or_else(|| QuarryError::Config {
            message: "could not determine home directory".to_string(),
        })?;
        Ok(home.join(".quarry").join("resources.json"))
    }

    /// Load from an explicit path, the `QUARRY_CONFIG` override, or the
    /// default location. A missing file is an empty configuration, not
    /// an error.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(p) => p.to_path_buf(),
            None => match std::env::var(CONFIG_ENV) {
                Ok(p) if !p.is_empty() => PathBuf::from(p),
                _ => Self::default_path()?,
            },
        };
        if !path.exists() {
            debug!("No config file at {:?}; starting empty", path);
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(&path).map_err(|e| QuarryError::Config {
            message: format!("failed to read {:?}: {}", path, e),
        })?;
        let config: QuarryConfig =
            serde_json::from_str(&raw).map_err(|e| QuarryError::Config {
                message: format!("malformed config {:?}: {}", path, e),
            })?;
        config.validate()?;
        debug!(
            "Loaded {} resource definition(s) from {:?}",
            config.resources.len(),
            path
        );
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for definition in &self.resources {
            if !seen.insert(definition.name().to_string()) {
                return Err(QuarryError::Config {
                    message: format!("duplicate resource name: {}", definition.name()),
                });
            }
        }
        Ok(())
    }
}

/// Provider connection settings, resolved from the environment.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub provider_id: String,
    pub model_id: String,
}

impl ProviderSettings {
    /// Resolve settings, giving the CLI `--model` override precedence
    /// over `QUARRY_MODEL`. Model references use `provider/model` form;
    /// a bare model id defaults the provider to `openai`.
    pub fn from_env(model_override: Option<&str>) -> Self {
        let base_url = std::env::var("QUARRY_BASE_URL")
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
        let api_key = std::env::var("QUARRY_API_KEY")
            .ok()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .filter(|v| !v.is_empty());
        let model = model_override
            .map(str::to_string)
            .or_else(|| std::env::var("QUARRY_MODEL").ok().filter(|v| !v.is_empty()))
            .unwrap_or_else(|| "openai/gpt-4o-mini".to_string());
        let (provider_id, model_id) = match model.split_once('/') {
            Some((provider, model)) => (provider.to_string(), model.to_string()),
            None => ("openai".to_string(), model),
        };
        if api_key.is_none() {
            warn!("No API key configured (QUARRY_API_KEY / OPENAI_API_KEY)");
        }
        Self {
            base_url,
            api_key,
            provider_id,
            model_id,
        }
    }
}

/// Reference [`ResourceLoader`] backed by configured definitions.
pub struct ConfigResourceLoader {
    definitions: HashMap<String, ResourceDefinition>,
}

impl ConfigResourceLoader {
    pub fn new(config: &QuarryConfig) -> Self {
        Self {
            definitions: config
                .resources
                .iter()
                .map(|d| (d.name().to_string(), d.clone()))
                .collect(),
        }
    }

    fn known_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.definitions.keys().cloned().collect();
        names.sort();
        names
    }

    fn checkout_of(definition: &ResourceDefinition) -> Option<&PathBuf> {
        match definition {
            ResourceDefinition::Git { checkout, .. }
            | ResourceDefinition::Package { checkout, .. } => checkout.as_ref(),
            ResourceDefinition::Local { path, .. } => Some(path),
        }
    }
}

#[async_trait]
impl ResourceLoader for ConfigResourceLoader {
    async fn load(&self, name: &str, quiet: bool) -> Result<VirtualizedResource> {
        let definition = self
            .definitions
            .get(name)
            .ok_or_else(|| resource_not_found(name, &self.known_names()))?;

        let checkout = Self::checkout_of(definition).ok_or_else(|| {
            QuarryError::ResourceNotFound {
                name: name.to_string(),
                hint: format!(
                    "Resource '{}' is configured but has no local checkout; set its checkout path.",
                    name
                ),
            }
        })?;
        let real_path =
            std::fs::canonicalize(checkout).map_err(|_| QuarryError::ResourceNotFound {
                name: name.to_string(),
                hint: format!(
                    "Checkout path {:?} does not exist; fetch the resource first.",
                    checkout
                ),
            })?;
        if !real_path.is_dir() {
            return Err(QuarryError::ResourceNotFound {
                name: name.to_string(),
                hint: format!("Checkout path {:?} is not a directory.", real_path),
            });
        }

        if !quiet {
            info!("Loading resource {} from {:?}", name, real_path);
        }
        Ok(VirtualizedResource {
            name: name.to_string(),
            fs_name: derive_fs_name(name),
            kind: definition.kind(),
            real_path,
            focus: definition.focus().to_vec(),
            notes: definition.notes().map(str::to_string),
            cleanup: None,
        })
    }

    fn definition(&self, name: &str) -> Option<ResourceDefinition> {
        self.definitions.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("resources.json");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let tmp = TempDir::new().unwrap();
        let config = QuarryConfig::load(Some(&tmp.path().join("nope.json"))).unwrap();
        assert!(config.resources.is_empty());
    }

    #[test]
    fn test_load_and_validate() {
        let tmp = TempDir::new().unwrap();
        let path = write_config(
            &tmp,
            r#"{ "resources": [
                { "kind": "local", "name": "notes", "path": "/tmp/notes" },
                { "kind": "git", "name": "tokio", "url": "https://github.com/tokio-rs/tokio.git" }
            ]}"#,
        );
        let config = QuarryConfig::load(Some(&path)).unwrap();
        assert_eq!(config.resources.len(), 2);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = write_config(
            &tmp,
            r#"{ "resources": [
                { "kind": "local", "name": "x", "path": "/a" },
                { "kind": "local", "name": "x", "path": "/b" }
            ]}"#,
        );
        let err = QuarryConfig::load(Some(&path)).unwrap_err();
        assert_eq!(err.tag(), "config");
    }

    #[test]
    fn test_malformed_config_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = write_config(&tmp, "not json");
        let err = QuarryConfig::load(Some(&path)).unwrap_err();
        assert_eq!(err.tag(), "config");
    }

    #[tokio::test]
    async fn test_loader_resolves_local_resource() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.txt"), "x").unwrap();
        let config = QuarryConfig {
            resources: vec![ResourceDefinition::Local {
                name: "notes".to_string(),
                path: tmp.path().to_path_buf(),
                focus: Vec::new(),
                notes: None,
            }],
        };
        let loader = ConfigResourceLoader::new(&config);

        let resource = loader.load("notes", true).await.unwrap();
        assert_eq!(resource.fs_name, "notes");
        assert!(resource.real_path.is_dir());
        assert!(loader.definition("notes").is_some());
    }

    #[tokio::test]
    async fn test_loader_unknown_name() {
        let loader = ConfigResourceLoader::new(&QuarryConfig::default());
        let err = loader.load("ghost", true).await.unwrap_err();
        assert_eq!(err.tag(), "resource-not-found");
    }

    #[tokio::test]
    async fn test_loader_missing_checkout() {
        let config = QuarryConfig {
            resources: vec![ResourceDefinition::Git {
                name: "tokio".to_string(),
                url: "https://github.com/tokio-rs/tokio.git".to_string(),
                branch: None,
                checkout: None,
                focus: Vec::new(),
                notes: None,
            }],
        };
        let loader = ConfigResourceLoader::new(&config);
        let err = loader.load("tokio", true).await.unwrap_err();
        assert!(err.hint().unwrap().contains("checkout"));
    }

    #[test]
    fn test_provider_settings_model_parsing() {
        let settings = ProviderSettings::from_env(Some("anthropic/claude-sonnet"));
        assert_eq!(settings.provider_id, "anthropic");
        assert_eq!(settings.model_id, "claude-sonnet");

        let settings = ProviderSettings::from_env(Some("gpt-4o"));
        assert_eq!(settings.provider_id, "openai");
        assert_eq!(settings.model_id, "gpt-4o");
    }
}
