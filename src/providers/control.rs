//! Control loop service provider.

use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{info, warn};

use crate::{
    app_context::AppState,
    consumer::StatusDispatcher,
    control_loop::{ControlLoop, LoopSettings, LoopState},
    providers::traits::ServiceProvider,
    task_manager::TaskManager,
};

/// Runs the [`ControlLoop`] against the shared store and sensor proxy.
///
/// - **Priority**: 10 (highest)
/// - **Critical**: Yes
///
/// On shutdown the loop gets its configured grace period to finish the
/// current iteration; after that the task returns regardless.
pub struct ControlLoopServiceProvider {
    state: Arc<AppState>,
    dispatcher: Mutex<Option<StatusDispatcher>>,
}

impl ControlLoopServiceProvider {
    pub fn new(state: Arc<AppState>, dispatcher: StatusDispatcher) -> Self {
        Self {
            state,
            dispatcher: Mutex::new(Some(dispatcher)),
        }
    }
}

#[async_trait]
impl ServiceProvider for ControlLoopServiceProvider {
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
        let dispatcher = self
            .dispatcher
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .context("Control loop already started")?;
        let settings = LoopSettings::from_config(&*self.state.config().await);
        let control = ControlLoop::new(
            self.state.store.clone(),
            self.state.proxy.clone(),
            dispatcher,
            settings,
        );

        task_manager.spawn_task(self.name(), move |cancel_token| async move {
            let handle = control.start();
            cancel_token.cancelled().await;

            match handle.stop().await {
                LoopState::Stopped => info!("Control loop shut down"),
                state => warn!("Control loop left {state:?}; sensor state is undefined"),
            }
            Ok(())
        });
        Ok(())
    }

    fn name(&self) -> &'static str {
        "ControlLoopService"
    }

    fn priority(&self) -> i32 {
        10
    }

    fn is_critical(&self) -> bool {
        true
    }
}
