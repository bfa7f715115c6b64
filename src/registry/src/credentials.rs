//! Registry login storage.
//!
//! One JSON file at `~/.regmirror/auth/credentials.json` maps registry
//! hosts to username/password pairs. Writes go through a temporary file
//! and a rename.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use regmirror_core::error::{MirrorError, Result};
use serde::{Deserialize, Serialize};

/// Host every Docker Hub alias is stored under.
pub const DOCKER_HUB: &str = "docker.io";

const DOCKER_HUB_ALIASES: &[&str] = &[
    DOCKER_HUB,
    "index.docker.io",
    "registry-1.docker.io",
    "registry.hub.docker.com",
];

/// Whether `registry` names Docker Hub.
pub fn is_docker_hub(registry: &str) -> bool {
    let registry = registry.trim().to_lowercase();
    DOCKER_HUB_ALIASES.contains(&registry.as_str())
}

/// Canonical key for a registry host.
fn registry_key(registry: &str) -> String {
    if is_docker_hub(registry) {
        DOCKER_HUB.to_string()
    } else {
        registry.trim().to_lowercase()
    }
}

/// A stored login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CredentialFile {
    #[serde(default)]
    registries: BTreeMap<String, Credential>,
}

/// Persistent per-registry credentials.
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    /// Store under the user's home directory.
    pub fn default_path() -> Result<Self> {
        let home = dirs::home_dir().ok_or_else(|| {
            MirrorError::ConfigError("Cannot determine home directory for credential store".to_string())
        })?;
        Ok(Self::new(
            home.join(".regmirror").join("auth").join("credentials.json"),
        ))
    }

    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Save a login, replacing any previous one for the registry.
    pub fn store(&self, registry: &str, username: &str, password: &str) -> Result<()> {
        let mut file = self.load()?;
        file.registries.insert(
            registry_key(registry),
            Credential {
                username: username.to_string(),
                password: password.to_string(),
            },
        );
        self.save(&file)
    }

    pub fn get(&self, registry: &str) -> Result<Option<Credential>> {
        Ok(self.load()?.registries.remove(&registry_key(registry)))
    }

    /// Forget a login. `false` when there was none.
    pub fn remove(&self, registry: &str) -> Result<bool> {
        let mut file = self.load()?;
        if file.registries.remove(&registry_key(registry)).is_none() {
            return Ok(false);
        }
        self.save(&file)?;
        Ok(true)
    }

    fn load(&self) -> Result<CredentialFile> {
        if !self.path.exists() {
            return Ok(CredentialFile::default());
        }
        let data = std::fs::read_to_string(&self.path).map_err(|e| {
            MirrorError::ConfigError(format!(
                "Failed to read credential store {}: {}",
                self.path.display(),
                e
            ))
        })?;
        serde_json::from_str(&data).map_err(|e| {
            MirrorError::ConfigError(format!(
                "Corrupt credential store {}: {}",
                self.path.display(),
                e
            ))
        })
    }

    fn save(&self, file: &CredentialFile) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, serde_json::to_vec_pretty(file)?)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}
