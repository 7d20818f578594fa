//! Application state shared between services.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::RwLock;

use crate::{
    config::{Config, ConfigManager},
    desired_state::{DesiredState, DesiredStateStore},
    drivers::jdts,
    proxy::SensorServiceProxy,
    sample::LoopStatus,
};

/// Shared application state.
///
/// The store is the only channel through which configuration requests
/// reach the control loop; `last_status` caches the latest poll outcome
/// for the bus interface.
pub struct AppState {
    pub config_manager: Arc<ConfigManager>,
    pub store: Arc<DesiredStateStore>,
    pub proxy: Arc<dyn SensorServiceProxy>,
    pub last_status: Arc<RwLock<Option<LoopStatus>>>,
}

impl AppState {
    /// Opens the configured sensor and seeds the store with the initial
    /// configuration.
    pub async fn new(config_manager: ConfigManager) -> Result<Self> {
        let config = config_manager.clone_config().await;
        let proxy = jdts::open_proxy(&config.device).context("Failed to open sensor device")?;
        Ok(Self::with_proxy(config_manager, proxy, config.initial_state.into()))
    }

    pub fn with_proxy(
        config_manager: ConfigManager,
        proxy: Arc<dyn SensorServiceProxy>,
        initial: DesiredState,
    ) -> Self {
        Self {
            config_manager: Arc::new(config_manager),
            store: Arc::new(DesiredStateStore::new(initial)),
            proxy,
            last_status: Arc::new(RwLock::new(None)),
        }
    }

    pub async fn config(&self) -> tokio::sync::RwLockReadGuard<'_, Config> {
        self.config_manager.get().await
    }

    pub fn config_manager(&self) -> &Arc<ConfigManager> {
        &self.config_manager
    }

    pub async fn last_status(&self) -> Option<LoopStatus> {
        *self.last_status.read().await
    }

    pub async fn record_status(&self, status: LoopStatus) {
        *self.last_status.write().await = Some(status);
    }
}
