//! Binding protocol strings to configured filesystems.
//!
//! The table itself belongs to whatever tool hosts the filesystems; this
//! module only defines the seam ([`FilesystemRegistry`]), a plain in-process
//! table, and [`register`], which builds a filesystem from a config and binds
//! it under the config's protocol.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use objfs_store::BackendFactory;

use crate::config::FsConfig;
use crate::error::{FsError, Result};
use crate::fs::ObjectFs;

/// A protocol -> filesystem table.
pub trait FilesystemRegistry: Send + Sync {
    /// Bind `protocol` to `fs`. Without `clobber`, an existing binding is an
    /// `AlreadyExists` error.
    fn register(&self, protocol: &str, fs: Arc<ObjectFs>, clobber: bool) -> Result<()>;

    fn get(&self, protocol: &str) -> Option<Arc<ObjectFs>>;
}

/// In-process [`FilesystemRegistry`].
#[derive(Debug, Default)]
pub struct ProtocolTable {
    entries: RwLock<HashMap<String, Arc<ObjectFs>>>,
}

impl ProtocolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registered protocols, sorted.
    pub fn protocols(&self) -> Vec<String> {
        let entries = self
            .entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut protocols: Vec<String> = entries.keys().cloned().collect();
        protocols.sort();
        protocols
    }
}

impl FilesystemRegistry for ProtocolTable {
    fn register(&self, protocol: &str, fs: Arc<ObjectFs>, clobber: bool) -> Result<()> {
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !clobber && entries.contains_key(protocol) {
            return Err(FsError::AlreadyExists(format!(
                "filesystem already registered for protocol '{protocol}'"
            )));
        }
        entries.insert(protocol.to_string(), fs);
        tracing::info!("Registered filesystem for protocol '{}'", protocol);
        Ok(())
    }

    fn get(&self, protocol: &str) -> Option<Arc<ObjectFs>> {
        let entries = self
            .entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.get(protocol).cloned()
    }
}

/// Build a filesystem from `config` and bind it under `config.protocol`,
/// replacing any earlier binding.
pub fn register(
    registry: &dyn FilesystemRegistry,
    config: &FsConfig,
    factory: Arc<dyn BackendFactory>,
) -> Result<Arc<ObjectFs>> {
    let fs = Arc::new(ObjectFs::new(config, factory)?);
    registry.register(&config.protocol, Arc::clone(&fs), true)?;
    Ok(fs)
}
