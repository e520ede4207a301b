//! Adapter registry: resolves URI schemes to adapter instances.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use uniblob_common::{Error, Result};

use crate::adapter::StorageAdapter;
use crate::config::StorageConfig;
use crate::disk::DiskAdapter;
use crate::gcs::GcsAdapter;
use crate::memory::{MemoryAdapter, MemoryStore};

/// Closed set of adapters a URI scheme can name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdapterKind {
    /// Local filesystem below a base directory.
    Disk,
    /// Process-local memory.
    InMemory,
    /// Google Cloud Storage JSON API.
    Gcs,
}

impl AdapterKind {
    /// Every registered adapter.
    pub const ALL: [AdapterKind; 3] = [AdapterKind::Disk, AdapterKind::InMemory, AdapterKind::Gcs];

    /// Scheme name of this adapter.
    pub fn as_str(&self) -> &'static str {
        match self {
            AdapterKind::Disk => "disk",
            AdapterKind::InMemory => "inmemory",
            AdapterKind::Gcs => "gcs",
        }
    }
}

impl FromStr for AdapterKind {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self> {
        AdapterKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == name)
            .ok_or_else(|| Error::UnknownAdapter(name.to_string()))
    }
}

impl fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registry building and caching one adapter per kind.
///
/// The `inmemory` adapter of a registry always works on the registry's
/// [`MemoryStore`], so two registries sharing a store share objects.
pub struct AdapterRegistry {
    config: StorageConfig,
    memory: MemoryStore,
    adapters: RwLock<HashMap<AdapterKind, Arc<dyn StorageAdapter>>>,
}

impl AdapterRegistry {
    /// Create a registry with its own empty memory store.
    pub fn new(config: StorageConfig) -> Self {
        Self::with_store(config, MemoryStore::new())
    }

    /// Create a registry whose `inmemory` adapter uses `memory`.
    pub fn with_store(config: StorageConfig, memory: MemoryStore) -> Self {
        Self {
            config,
            memory,
            adapters: RwLock::new(HashMap::new()),
        }
    }

    /// Process-wide registry, configured from the environment on first use
    /// and wired to [`MemoryStore::global`].
    ///
    /// # Errors
    /// - Environment configuration is malformed
    pub fn global() -> Result<&'static AdapterRegistry> {
        static GLOBAL: OnceLock<AdapterRegistry> = OnceLock::new();

        if let Some(registry) = GLOBAL.get() {
            return Ok(registry);
        }
        let config = StorageConfig::from_env()?;
        Ok(GLOBAL.get_or_init(|| Self::with_store(config, MemoryStore::global().clone())))
    }

    /// Configuration adapters are built from.
    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Store behind this registry's `inmemory` adapter.
    pub fn memory_store(&self) -> &MemoryStore {
        &self.memory
    }

    /// Resolve an adapter by scheme name.
    ///
    /// # Errors
    /// - `Error::UnknownAdapter` for unregistered names
    /// - Adapter construction failed (e.g., disk base not creatable)
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn StorageAdapter>> {
        self.resolve_kind(name.parse()?)
    }

    /// Resolve an adapter by kind, building it on first use.
    pub fn resolve_kind(&self, kind: AdapterKind) -> Result<Arc<dyn StorageAdapter>> {
        if let Some(adapter) = self
            .adapters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
        {
            return Ok(adapter.clone());
        }

        let adapter = self.build(kind)?;
        let mut adapters = self.adapters.write().unwrap_or_else(PoisonError::into_inner);
        Ok(adapters.entry(kind).or_insert(adapter).clone())
    }

    fn build(&self, kind: AdapterKind) -> Result<Arc<dyn StorageAdapter>> {
        Ok(match kind {
            AdapterKind::Disk => Arc::new(DiskAdapter::new(&self.config.disk.base_dir)?),
            AdapterKind::InMemory => Arc::new(MemoryAdapter::new(self.memory.clone())),
            AdapterKind::Gcs => Arc::new(GcsAdapter::new(&self.config.gcs)?),
        })
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new(StorageConfig::default())
    }
}
