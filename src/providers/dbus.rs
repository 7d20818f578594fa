//! D-Bus service provider.

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{info, warn};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use zbus::Connection;

use crate::{
    app_context::AppState,
    event::{Event, EventBus},
    interface::{BUS_NAME, DBusInterface, OBJECT_PATH},
    providers::traits::ServiceProvider,
    task_manager::TaskManager,
};

/// Exposes [`DBusInterface`] on the session bus and turns status events
/// into bus signals.
///
/// - **Priority**: 5
/// - **Critical**: No (the sensor keeps running without a bus)
///
/// Creation fails when no session bus is reachable; the coordinator then
/// skips the service.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use jdtsd::providers::DBusServiceProvider;
/// use jdtsd::event::EventBus;
/// use jdtsd::app_context::AppState;
///
/// # async fn example(state: Arc<AppState>) -> anyhow::Result<()> {
/// let provider = DBusServiceProvider::new(state, EventBus::new()).await?;
/// # Ok(())
/// # }
/// ```
pub struct DBusServiceProvider {
    state: Arc<AppState>,
    event_bus: EventBus,
    connection: Connection,
}

impl DBusServiceProvider {
    pub async fn new(state: Arc<AppState>, event_bus: EventBus) -> Result<Self> {
        let connection = Connection::session()
            .await
            .context("Cannot connect to the session bus")?;
        Ok(Self {
            state,
            event_bus,
            connection,
        })
    }
}

#[async_trait]
impl ServiceProvider for DBusServiceProvider {
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
        let interface = DBusInterface::new(
            self.state.clone(),
            env!("CARGO_PKG_VERSION").to_string(),
            self.event_bus.clone(),
        );
        self.connection
            .object_server()
            .at(OBJECT_PATH, interface)
            .await?;
        self.connection.request_name(BUS_NAME).await?;
        info!("Serving {BUS_NAME} at {OBJECT_PATH}");

        // Subscribe before returning so no status published after startup is missed.
        let events = self.event_bus.subscribe();
        let connection = self.connection.clone();
        task_manager.spawn_task(self.name(), move |cancel_token| {
            forward_events(connection, events, cancel_token)
        });
        Ok(())
    }

    fn name(&self) -> &'static str {
        "DBusService"
    }

    fn priority(&self) -> i32 {
        5
    }
}

async fn forward_events(
    connection: Connection,
    mut events: tokio::sync::broadcast::Receiver<Event>,
    cancel_token: CancellationToken,
) -> Result<()> {
    let iface_ref = connection
        .object_server()
        .interface::<_, DBusInterface>(OBJECT_PATH)
        .await?;
    let emitter = iface_ref.signal_emitter();

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                info!("D-Bus service cancelled");
                break;
            }
            event = events.recv() => match event {
                Ok(Event::StatusUpdated(status)) => {
                    if let Err(e) = DBusInterface::emit_status(emitter, status).await {
                        warn!("Cannot emit status signal: {e}");
                    }
                    let iface = iface_ref.get().await;
                    if let Err(e) = iface.last_synchro_changed(emitter).await {
                        warn!("Cannot notify LastSynchro change: {e}");
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => warn!("D-Bus service lagged by {n} events"),
                Err(RecvError::Closed) => break,
            }
        }
    }

    connection.release_name(BUS_NAME).await.ok();
    Ok(())
}
