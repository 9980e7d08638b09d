use crate::DatabaseCache;
use crate::error::{ErrorKind, Result};
use handheld_device::DeviceHandle;
use handheld_record::DatabaseDescriptor;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

/// Name-keyed set of [`DatabaseCache`]s for one device.
///
/// Loading is at-most-once per name: concurrent [`load`](Self::load) calls
/// for the same database read it off the device a single time and all get
/// the same cache back.
pub struct CacheRegistry {
    device: DeviceHandle,
    catalog: Vec<DatabaseDescriptor>,
    caches: RwLock<HashMap<String, Arc<DatabaseCache>>>,
    // Held across the whole of a device load, separately from `caches`, so
    // lookups of already loaded databases never wait behind a slow load.
    loading: Mutex<()>,
}

impl CacheRegistry {
    /// Registry for the databases in the device's catalog.
    pub fn new(device: DeviceHandle) -> Result<Self> {
        let catalog = device.acquire().session().catalog().map_err(ErrorKind::device)?;
        Ok(Self::with_catalog(device, catalog))
    }

    pub fn with_catalog(device: DeviceHandle, catalog: Vec<DatabaseDescriptor>) -> Self {
        Self {
            device,
            catalog,
            caches: RwLock::new(HashMap::new()),
            loading: Mutex::new(()),
        }
    }

    pub fn device(&self) -> &DeviceHandle {
        &self.device
    }

    /// Databases eligible for loading.
    pub fn catalog(&self) -> &[DatabaseDescriptor] {
        &self.catalog
    }

    /// The cache for `name`, if it has been loaded.
    pub fn get(&self, name: &str) -> Option<Arc<DatabaseCache>> {
        self.caches.read().get(name).cloned()
    }

    /// Names of the databases loaded so far.
    pub fn loaded(&self) -> Vec<String> {
        self.caches.read().keys().cloned().collect()
    }

    /// The cache for `name`, reading it off the device if nobody has yet.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn load(&self, name: &str) -> Result<Arc<DatabaseCache>> {
        if let Some(cache) = self.get(name) {
            return Ok(cache);
        }
        if !self.catalog.iter().any(|descriptor| descriptor.name == name) {
            exn::bail!(ErrorKind::UnknownDatabase(name.to_string()));
        }
        let _loading = self.loading.lock();
        // Someone else may have finished loading it while we waited.
        if let Some(cache) = self.get(name) {
            return Ok(cache);
        }
        let cache = Arc::new(DatabaseCache::load(&self.device, name)?);
        self.caches.write().insert(name.to_string(), Arc::clone(&cache));
        Ok(cache)
    }
}
