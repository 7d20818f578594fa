//! System coordinator: service wiring and lifecycle.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use log::{debug, info, warn};
use tokio::sync::broadcast::error::RecvError;

use crate::{
    app_context::AppState,
    config::ConfigManager,
    consumer::status_channel,
    control_loop::LoopSettings,
    event::{Event, EventBus},
    providers::{
        AppStateProvider, AsyncProvider, ControlLoopServiceProvider, DBusServiceProvider,
        PresentationServiceProvider, ServiceProvider,
    },
    task_manager::{DEFAULT_SHUTDOWN_TIMEOUT, TaskManager},
};

/// Owns the task manager, the event bus and the registered services.
///
/// Lifecycle: [`initialize`](Self::initialize), then
/// [`start_all_services`](Self::start_all_services), then
/// [`run_main_loop`](Self::run_main_loop) until Ctrl+C, SIGTERM or a
/// `SystemShutdown` event.
pub struct SystemCoordinator {
    task_manager: TaskManager,
    event_bus: EventBus,
    shared_state: Option<Arc<AppState>>,
    service_providers: Vec<Box<dyn ServiceProvider>>,
}

impl Default for SystemCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemCoordinator {
    pub fn new() -> Self {
        Self {
            task_manager: TaskManager::new(),
            event_bus: EventBus::new(),
            shared_state: None,
            service_providers: Vec::new(),
        }
    }

    /// Builds the shared state from configuration and registers services.
    pub async fn initialize(&mut self, config_manager: ConfigManager) -> Result<()> {
        let state = AppStateProvider::new(config_manager)
            .provide()
            .await
            .context("Failed to initialize application state")?;
        self.initialize_with_state(state).await
    }

    /// Registers services around an already built state.
    pub async fn initialize_with_state(&mut self, state: Arc<AppState>) -> Result<()> {
        info!("Initializing SystemCoordinator...");

        let settings = LoopSettings::from_config(&*state.config().await);
        // The control task bounds its own wait by the grace period.
        self.task_manager =
            TaskManager::with_shutdown_timeout(
            settings.shutdown_grace.saturating_add(DEFAULT_SHUTDOWN_TIMEOUT),
        );

        self.register_service_providers(state.clone()).await;
        self.shared_state = Some(state);

        info!("SystemCoordinator initialization completed");
        Ok(())
    }

    async fn register_service_providers(&mut self, state: Arc<AppState>) {
        let (dispatcher, receiver) = status_channel();
        let mut providers: Vec<Box<dyn ServiceProvider>> = vec![
            Box::new(ControlLoopServiceProvider::new(state.clone(), dispatcher)),
            Box::new(PresentationServiceProvider::new(
                state.clone(),
                self.event_bus.clone(),
                receiver,
            )),
        ];

        if state.config().await.enable_dbus {
            match DBusServiceProvider::new(state.clone(), self.event_bus.clone()).await {
                Ok(provider) => providers.push(Box::new(provider)),
                Err(e) => warn!("{e:#}, skipping D-Bus service"),
            }
        }

        providers.sort_by_key(|p| std::cmp::Reverse(p.priority()));
        self.service_providers = providers;

        info!(
            "Registered {} service providers in priority order",
            self.service_providers.len()
        );
    }

    /// Starts all registered services in priority order.
    ///
    /// Critical services must start successfully, while non-critical
    /// services can fail without stopping the system.
    pub async fn start_all_services(&mut self) -> Result<()> {
        if self.shared_state.is_none() {
            bail!("System not properly initialized");
        }

        for provider in &self.service_providers {
            let is_critical = provider.is_critical();

            match provider.start(&mut self.task_manager).await {
                Ok(()) => info!(
                    "Service '{}' started (priority: {}, critical: {})",
                    provider.name(),
                    provider.priority(),
                    is_critical
                ),
                Err(e) if is_critical => {
                    self.task_manager.shutdown_all().await.ok();
                    return Err(e).with_context(|| {
                        format!("Critical service '{}' failed to start", provider.name())
                    });
                }
                Err(e) => warn!(
                    "Non-critical service '{}' failed to start: {e:#}",
                    provider.name()
                ),
            }
        }

        info!("All critical services started successfully");
        Ok(())
    }

    /// Waits for a shutdown trigger, then stops every service.
    pub async fn run_main_loop(&mut self) -> Result<()> {
        let mut event_rx = self.event_bus.subscribe();
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .context("Failed to install SIGTERM handler")?;
        info!("Starting main event loop");

        loop {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    result.context("Failed to listen for shutdown signal")?;
                    info!("Received Ctrl+C, initiating graceful shutdown...");
                    break;
                }
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, initiating graceful shutdown...");
                    break;
                }
                event = event_rx.recv() => {
                    if !self.handle_event(event)? {
                        break;
                    }
                }
            }
        }

        self.shutdown().await;
        info!("Main event loop terminated");
        Ok(())
    }

    /// Returns `false` when the event asks the daemon to stop.
    fn handle_event(&self, event: Result<Event, RecvError>) -> Result<bool> {
        match event {
            Ok(Event::SystemShutdown) => {
                info!("Shutdown requested, initiating graceful shutdown...");
                return Ok(false);
            }
            Ok(Event::ConfigReloaded) => info!("Configuration reloaded"),
            Ok(Event::StatusUpdated(status)) => debug!("Status: {status:?}"),
            Err(RecvError::Lagged(n)) => debug!("Main loop lagged by {n} events"),
            Err(RecvError::Closed) => bail!("Event bus channel closed unexpectedly"),
        }
        Ok(true)
    }

    async fn shutdown(&mut self) {
        info!("Initiating graceful shutdown...");
        if let Err(e) = self.task_manager.shutdown_all().await {
            log::error!("Error during task shutdown: {e:#}");
        }
        info!("Shutdown complete");
    }

    pub const fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn shared_state(&self) -> Option<&Arc<AppState>> {
        self.shared_state.as_ref()
    }

    pub fn running_services(&self) -> Vec<&'static str> {
        self.service_providers.iter().map(|p| p.name()).collect()
    }
}
