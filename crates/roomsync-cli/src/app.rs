//! RoomSync application state: configuration, device identity and runtime

use roomsync_core::{DeviceId, DeviceIdentity, FileStorage, RoomId};
use roomsync_runtime::{ChatHandle, ChatRuntime, RuntimeBuilder};
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::error::{CliError, Result};

/// Main RoomSync application
pub struct RoomSyncApp {
    config: AppConfig,
    room: RoomId,
    device_id: DeviceId,
    identity_persisted: bool,
    runtime: Option<ChatRuntime>,
}

impl RoomSyncApp {
    /// Resolve the device identity; the runtime is started separately
    pub fn new(config: AppConfig) -> Result<Self> {
        config.validate()?;

        let (device_id, identity_persisted) = match &config.identity.device_id {
            Some(fixed) => {
                debug!("Using configured device id");
                (DeviceId::new(fixed.trim()), false)
            }
            None => {
                let dir = config.data_dir();
                let mut identity = DeviceIdentity::new(Box::new(FileStorage::new(dir.clone())));
                let device_id = identity.get_or_create();
                if !identity.is_persisted() {
                    warn!(dir = %dir.display(), "Device id is only valid for this session");
                }
                (device_id, identity.is_persisted())
            }
        };

        let room = RoomId::new(config.cli.room.trim());
        info!(room = %room, device_id = %device_id, "RoomSync client ready");

        Ok(Self {
            config,
            room,
            device_id,
            identity_persisted,
            runtime: None,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn room(&self) -> &RoomId {
        &self.room
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    /// Whether the device id survives a restart
    pub fn identity_persisted(&self) -> bool {
        self.identity_persisted
    }

    /// Replace the persisted device id with a fresh one
    ///
    /// Refused while a fixed id is configured or the runtime is running.
    pub fn reset_identity(&mut self) -> Result<()> {
        if self.config.identity.device_id.is_some() {
            return Err(CliError::Config(
                "Device id is fixed by the configuration".to_string(),
            ));
        }
        if self.runtime.is_some() {
            return Err(CliError::Config(
                "Cannot reset the device id while connected".to_string(),
            ));
        }

        let dir = self.config.data_dir();
        let mut identity = DeviceIdentity::new(Box::new(FileStorage::new(dir)));
        identity.reset()?;
        self.device_id = identity.get_or_create();
        self.identity_persisted = identity.is_persisted();
        info!(device_id = %self.device_id, "Device identity replaced");
        Ok(())
    }

    /// Start the runtime, or return a handle to the running one
    pub fn start(&mut self) -> Result<ChatHandle> {
        if let Some(runtime) = &self.runtime {
            return Ok(runtime.handle());
        }

        let runtime = RuntimeBuilder::new(self.room.clone(), self.device_id.clone())
            .with_config(self.config.sync.clone())
            .build_and_start()?;
        let handle = runtime.handle();
        self.runtime = Some(runtime);
        Ok(handle)
    }

    /// Stop the runtime if it is running
    pub async fn stop(&mut self) -> Result<()> {
        if let Some(mut runtime) = self.runtime.take() {
            runtime.shutdown().await?;
        }
        Ok(())
    }
}
