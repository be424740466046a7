//! Stable pseudonymous identifier for this installation

use tracing::{debug, info, warn};

use super::storage::{IdentityStorage, MemoryStorage};
use crate::types::DeviceId;
use crate::Result;

/// Storage key holding the device identifier
pub const DEVICE_ID_KEY: &str = "device_id";

/// Owner of the installation's [`DeviceId`]
///
/// The first call to [`get_or_create`](Self::get_or_create) generates and
/// persists an identifier; later calls return it unchanged. When storage is
/// unavailable or fails, the identifier is kept in memory for the rest of
/// the session.
pub struct DeviceIdentity {
    storage: Box<dyn IdentityStorage>,
    cached: Option<DeviceId>,
    persisted: bool,
}

impl DeviceIdentity {
    pub fn new(storage: Box<dyn IdentityStorage>) -> Self {
        Self {
            storage,
            cached: None,
            persisted: false,
        }
    }

    /// Identity that lives only as long as this value
    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryStorage::new()))
    }

    pub fn get_or_create(&mut self) -> DeviceId {
        if let Some(id) = &self.cached {
            return id.clone();
        }
        if !self.storage.is_available() {
            warn!("Device identity storage unavailable, using session-only id");
            let id = DeviceId::generate();
            self.cached = Some(id.clone());
            return id;
        }

        let id = match self.storage.retrieve(DEVICE_ID_KEY) {
            Ok(Some(stored)) if !stored.trim().is_empty() => {
                debug!(device_id = %stored, "Loaded device identity");
                self.persisted = true;
                DeviceId::new(stored.trim())
            }
            Ok(_) => self.generate_and_store(),
            Err(e) => {
                warn!("Device identity storage unavailable, using session-only id: {}", e);
                DeviceId::generate()
            }
        };

        self.cached = Some(id.clone());
        id
    }

    /// Forget the stored identifier
    ///
    /// The next [`get_or_create`](Self::get_or_create) generates a new one.
    pub fn reset(&mut self) -> Result<()> {
        self.cached = None;
        self.persisted = false;
        self.storage.delete(DEVICE_ID_KEY)?;
        info!("Device identity reset");
        Ok(())
    }

    /// Whether the current identifier survives a restart
    pub fn is_persisted(&self) -> bool {
        self.persisted
    }

    fn generate_and_store(&mut self) -> DeviceId {
        let id = DeviceId::generate();
        match self.storage.store(DEVICE_ID_KEY, id.as_str()) {
            Ok(()) => {
                info!(device_id = %id, "Created device identity");
                self.persisted = true;
            }
            Err(e) => {
                warn!("Could not persist device identity, using session-only id: {}", e);
            }
        }
        id
    }
}

impl core::fmt::Debug for DeviceIdentity {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DeviceIdentity")
            .field("cached", &self.cached)
            .field("persisted", &self.persisted)
            .finish()
    }
}
