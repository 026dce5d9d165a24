use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::archive::ArchiveRepositoryBackend;
use crate::config::{BackendConfig, RepositoryConfig};
use crate::disk::DiskRepositoryBackend;
use crate::error::{RepoError, RepoResult};
use crate::sandbox::SandboxRepositoryBackend;
use crate::traits::{BackendKind, RepositoryBackend};

/// Construct a fresh backend for `config`. Nothing is cached.
pub fn build_backend(config: &BackendConfig) -> RepoResult<Arc<dyn RepositoryBackend>> {
    let backend: Arc<dyn RepositoryBackend> = match config {
        BackendConfig::Sandbox { parent: Some(parent) } => {
            Arc::new(SandboxRepositoryBackend::with_parent(parent))
        }
        BackendConfig::Sandbox { parent: None } => Arc::new(SandboxRepositoryBackend::new()),
        BackendConfig::Disk { path } => Arc::new(DiskRepositoryBackend::new(path)),
        BackendConfig::Archive { path } => Arc::new(ArchiveRepositoryBackend::open(path)?),
    };
    Ok(backend)
}

/// Owns the backends of one process, built on demand from named profiles.
///
/// Each backend is constructed the first time its profile is requested and
/// shared afterwards. There is no global instance: whoever needs backends
/// creates a registry and passes it (or the backends) along.
pub struct BackendRegistry {
    config: RepositoryConfig,
    backends: Mutex<HashMap<String, Arc<dyn RepositoryBackend>>>,
}

impl BackendRegistry {
    pub fn new(config: RepositoryConfig) -> Self {
        Self {
            config,
            backends: Mutex::new(HashMap::new()),
        }
    }

    /// Build a registry from a TOML configuration file.
    pub fn from_path(path: &Path) -> RepoResult<Self> {
        Ok(Self::new(RepositoryConfig::load(path)?))
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    /// The backend for `profile`, constructing it on first request.
    pub fn backend(&self, profile: &str) -> RepoResult<Arc<dyn RepositoryBackend>> {
        let mut backends = self.backends.lock().expect("lock poisoned");
        if let Some(backend) = backends.get(profile) {
            return Ok(Arc::clone(backend));
        }
        let settings = self.config.profile(profile).ok_or_else(|| {
            RepoError::InvalidConfig(format!("unknown repository profile '{profile}'"))
        })?;
        let backend = build_backend(settings)?;
        debug!(profile, kind = %backend.kind(), "backend constructed");
        backends.insert(profile.to_string(), Arc::clone(&backend));
        Ok(backend)
    }

    pub fn default_backend(&self) -> RepoResult<Arc<dyn RepositoryBackend>> {
        self.backend(&self.config.default_profile)
    }

    /// Configured profile names, sorted.
    pub fn profiles(&self) -> Vec<&str> {
        self.config.profiles.keys().map(String::as_str).collect()
    }

    /// Erase every sandbox backend handed out so far and forget all cached
    /// backends. Persistent backends keep their data.
    ///
    /// Every sandbox is attempted; the first failure is returned.
    pub fn close(&self) -> RepoResult<()> {
        let backends: Vec<(String, Arc<dyn RepositoryBackend>)> = self
            .backends
            .lock()
            .expect("lock poisoned")
            .drain()
            .collect();
        let mut first_error = None;
        for (profile, backend) in backends {
            if backend.kind() != BackendKind::Sandbox {
                continue;
            }
            if let Err(e) = backend.erase() {
                warn!(profile = %profile, error = %e, "failed to erase sandbox");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let active = self.backends.lock().map(|b| b.len()).unwrap_or_default();
        f.debug_struct("BackendRegistry")
            .field("default_profile", &self.config.default_profile)
            .field("profiles", &self.profiles())
            .field("active", &active)
            .finish()
    }
}
