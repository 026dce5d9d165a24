use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{RepoError, RepoResult};

/// Name of the profile used when none is configured.
pub const DEFAULT_PROFILE: &str = "default";

/// Directory of the default disk repository, relative to the working directory.
pub const DEFAULT_DISK_PATH: &str = ".prov";

/// Which backend a profile uses and where it keeps its data.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum BackendConfig {
    /// Ephemeral temporary directory, under `parent` if given.
    Sandbox {
        #[serde(default)]
        parent: Option<PathBuf>,
    },
    /// Persistent content-addressed repository rooted at `path`.
    Disk { path: PathBuf },
    /// Read-only archive at `path` (the `.pack` file or its base path).
    Archive { path: PathBuf },
}

/// Named backend profiles, loaded from TOML.
///
/// ```toml
/// default_profile = "main"
///
/// [profiles.main]
/// backend = "disk"
/// path = "/var/lib/prov"
///
/// [profiles.scratch]
/// backend = "sandbox"
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryConfig {
    #[serde(default = "default_profile_name")]
    pub default_profile: String,
    #[serde(default)]
    pub profiles: BTreeMap<String, BackendConfig>,
}

fn default_profile_name() -> String {
    DEFAULT_PROFILE.to_string()
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        let mut profiles = BTreeMap::new();
        profiles.insert(
            DEFAULT_PROFILE.to_string(),
            BackendConfig::Disk {
                path: PathBuf::from(DEFAULT_DISK_PATH),
            },
        );
        Self {
            default_profile: DEFAULT_PROFILE.to_string(),
            profiles,
        }
    }
}

impl RepositoryConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> RepoResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| RepoError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: &Path) -> RepoResult<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| RepoError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Serialise back to TOML.
    pub fn to_toml_string(&self) -> RepoResult<String> {
        toml::to_string_pretty(self).map_err(|e| RepoError::Config(e.to_string()))
    }

    pub fn validate(&self) -> RepoResult<()> {
        if !self.profiles.contains_key(&self.default_profile) {
            return Err(RepoError::Config(format!(
                "default profile '{}' is not defined",
                self.default_profile
            )));
        }
        for (name, backend) in &self.profiles {
            if name.is_empty() {
                return Err(RepoError::Config("profile names must not be empty".into()));
            }
            match backend {
                BackendConfig::Disk { path } | BackendConfig::Archive { path }
                    if path.as_os_str().is_empty() =>
                {
                    return Err(RepoError::Config(format!(
                        "profile '{name}' needs a non-empty path"
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// The backend settings for `profile`.
    pub fn profile(&self, profile: &str) -> Option<&BackendConfig> {
        self.profiles.get(profile)
    }
}
