//! Session bus interface of the daemon.

use std::sync::Arc;

use log::{info, warn};
use zbus::{fdo, interface, object_server::SignalEmitter};

use crate::{
    app_context::AppState,
    event::{Event, EventBus},
    sample::LoopStatus,
};

pub const BUS_NAME: &str = "io.github.jdtsd";
pub const OBJECT_PATH: &str = "/io/github/jdtsd";

pub struct DBusInterface {
    state: Arc<AppState>,
    event_bus: EventBus,
    version: String,
}

impl DBusInterface {
    pub fn new(state: Arc<AppState>, version: String, event_bus: EventBus) -> Self {
        Self {
            state,
            event_bus,
            version,
        }
    }

    /// Emits the signal matching a poll outcome.
    pub async fn emit_status(emitter: &SignalEmitter<'_>, status: LoopStatus) -> zbus::Result<()> {
        match status {
            LoopStatus::Sample(sample) => {
                Self::sample_received(
                    emitter,
                    sample.synchro,
                    f64::from(sample.object_celsius()),
                    f64::from(sample.ntc1_celsius()),
                    f64::from(sample.ntc2_celsius()),
                    f64::from(sample.ntc3_celsius()),
                )
                .await
            }
            LoopStatus::NoSignal => Self::no_signal(emitter).await,
        }
    }
}

#[interface(name = "io.github.jdtsd1")]
impl DBusInterface {
    #[zbus(signal)]
    pub async fn sample_received(
        emitter: &SignalEmitter<'_>,
        synchro: u16,
        object: f64,
        ntc1: f64,
        ntc2: f64,
        ntc3: f64,
    ) -> zbus::Result<()>;

    #[zbus(signal)]
    pub async fn no_signal(emitter: &SignalEmitter<'_>) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn stopped(emitter: &SignalEmitter<'_>) -> zbus::Result<()>;

    /// Requests the sensor to be woken up or put to sleep.
    async fn set_power(&self, enabled: bool) {
        info!("Power {} requested over D-Bus", if enabled { "on" } else { "off" });
        self.state.store.request_power(enabled);
    }

    /// Requests continuous (`true`) or burst (`false`) measurement.
    async fn set_mode(&self, continuous: bool) {
        info!(
            "{} mode requested over D-Bus",
            if continuous { "Continuous" } else { "Burst" }
        );
        self.state.store.request_mode(continuous);
    }

    async fn reload(&self) -> fdo::Result<()> {
        let config_manager = self.state.config_manager();
        let previous = config_manager
            .reload()
            .await
            .map_err(|e| fdo::Error::Failed(format!("{e:#}")))?;

        if previous.requires_restart(&*config_manager.get().await) {
            warn!("Only output settings were applied; restart to apply the rest");
        }
        self.event_bus.publish(Event::ConfigReloaded).ok();
        Ok(())
    }

    async fn stop(&self, #[zbus(signal_emitter)] emitter: SignalEmitter<'_>) -> fdo::Result<()> {
        Self::stopped(&emitter).await?;
        self.event_bus
            .publish(Event::SystemShutdown)
            .map_err(|e| fdo::Error::Failed(e.to_string()))?;
        Ok(())
    }

    #[zbus(property)]
    async fn version(&self) -> String {
        self.version.clone()
    }

    /// Requested power state, not necessarily applied yet.
    #[zbus(property)]
    async fn power(&self) -> bool {
        self.state.store.desired().power_enabled
    }

    #[zbus(property)]
    async fn continuous_mode(&self) -> bool {
        self.state.store.desired().continuous_mode
    }

    #[zbus(property)]
    async fn power_pending(&self) -> bool {
        self.state.store.flags().power_dirty
    }

    #[zbus(property)]
    async fn mode_pending(&self) -> bool {
        self.state.store.flags().mode_dirty
    }

    /// Synchro counter of the latest sample, -1 without signal.
    #[zbus(property)]
    async fn last_synchro(&self) -> i32 {
        match self.state.last_status().await {
            Some(LoopStatus::Sample(sample)) => i32::from(sample.synchro),
            _ => -1,
        }
    }
}
