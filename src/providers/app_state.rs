//! Application state provider.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::{
    app_context::AppState, config::ConfigManager, providers::traits::AsyncProvider,
    proxy::SensorServiceProxy,
};

/// Builds [`AppState`], opening the configured sensor unless a proxy was
/// supplied up front.
pub struct AppStateProvider {
    config_manager: ConfigManager,
    proxy: Option<Arc<dyn SensorServiceProxy>>,
}

impl AppStateProvider {
    pub const fn new(config_manager: ConfigManager) -> Self {
        Self {
            config_manager,
            proxy: None,
        }
    }

    /// Uses `proxy` instead of opening the configured device.
    pub fn with_proxy(mut self, proxy: Arc<dyn SensorServiceProxy>) -> Self {
        self.proxy = Some(proxy);
        self
    }
}

#[async_trait]
impl AsyncProvider<Arc<AppState>> for AppStateProvider {
    async fn provide(&self) -> Result<Arc<AppState>> {
        let app_state = match &self.proxy {
            Some(proxy) => {
                let initial = self.config_manager.get().await.initial_state.into();
                AppState::with_proxy(self.config_manager.clone(), proxy.clone(), initial)
            }
            None => AppState::new(self.config_manager.clone()).await?,
        };
        Ok(Arc::new(app_state))
    }
}
