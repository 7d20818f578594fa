//! Presentation service: the consumer side of the status channel.

use std::{
    io::{self, Write},
    sync::{Arc, Mutex},
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::debug;

use crate::{
    app_context::AppState,
    config::ConfigManager,
    consumer::{JsonLinesConsumer, LogConsumer, SampleConsumer, StatusReceiver, run_consumer},
    event::{Event, EventBus},
    providers::traits::ServiceProvider,
    sample::{LoopStatus, Sample},
    task_manager::TaskManager,
};

/// Caches the latest outcome in [`AppState`] and republishes it on the
/// [`EventBus`].
pub struct BroadcastConsumer {
    state: Arc<AppState>,
    event_bus: EventBus,
}

impl BroadcastConsumer {
    pub fn new(state: Arc<AppState>, event_bus: EventBus) -> Self {
        Self { state, event_bus }
    }

    async fn publish(&self, status: LoopStatus) {
        self.state.record_status(status).await;
        if self.event_bus.publish(Event::StatusUpdated(status)).is_err() {
            debug!("No subscribers for status updates");
        }
    }
}

#[async_trait]
impl SampleConsumer for BroadcastConsumer {
    async fn on_sample(&mut self, sample: Sample) {
        self.publish(LoopStatus::Sample(sample)).await;
    }

    async fn on_no_signal(&mut self) {
        self.publish(LoopStatus::NoSignal).await;
    }
}

/// Log and JSON output, following the live `output` settings so that a
/// configuration reload takes effect on the next outcome.
pub struct OutputConsumer<W: Write + Send> {
    config_manager: Arc<ConfigManager>,
    log: LogConsumer,
    json: JsonLinesConsumer<W>,
}

impl<W: Write + Send> OutputConsumer<W> {
    pub fn new(config_manager: Arc<ConfigManager>, out: W) -> Self {
        Self {
            config_manager,
            log: LogConsumer::new(),
            json: JsonLinesConsumer::new(out),
        }
    }

    /// Applies the current settings and returns whether JSON is enabled.
    async fn refresh(&mut self) -> bool {
        let output = self.config_manager.get().await.output;
        self.log.set_log_samples(output.log_samples);
        output.json
    }

    pub fn into_inner(self) -> W {
        self.json.into_inner()
    }
}

#[async_trait]
impl<W: Write + Send> SampleConsumer for OutputConsumer<W> {
    async fn on_sample(&mut self, sample: Sample) {
        let json = self.refresh().await;
        self.log.on_sample(sample).await;
        if json {
            self.json.on_sample(sample).await;
        }
    }

    async fn on_no_signal(&mut self) {
        let json = self.refresh().await;
        self.log.on_no_signal().await;
        if json {
            self.json.on_no_signal().await;
        }
    }
}

/// Drains the status channel into the output and broadcast consumers.
///
/// - **Priority**: 9
/// - **Critical**: Yes
pub struct PresentationServiceProvider {
    state: Arc<AppState>,
    event_bus: EventBus,
    receiver: Mutex<Option<StatusReceiver>>,
}

impl PresentationServiceProvider {
    pub fn new(state: Arc<AppState>, event_bus: EventBus, receiver: StatusReceiver) -> Self {
        Self {
            state,
            event_bus,
            receiver: Mutex::new(Some(receiver)),
        }
    }
}

#[async_trait]
impl ServiceProvider for PresentationServiceProvider {
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
        let receiver = self
            .receiver
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .context("Presentation service already started")?;

        let mut consumers: Vec<Box<dyn SampleConsumer>> = vec![
            Box::new(OutputConsumer::new(
                self.state.config_manager().clone(),
                io::stdout(),
            )),
            Box::new(BroadcastConsumer::new(
                self.state.clone(),
                self.event_bus.clone(),
            )),
        ];

        task_manager.spawn_task(self.name(), move |cancel_token| async move {
            run_consumer(receiver, &mut consumers, cancel_token).await
        });
        Ok(())
    }

    fn name(&self) -> &'static str {
        "PresentationService"
    }

    fn priority(&self) -> i32 {
        9
    }

    fn is_critical(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Config, consumer::status_channel, desired_state::DesiredState,
        drivers::jdts::DeviceProxy,
    };
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tokio::time::timeout;

    fn sample(synchro: u16) -> Sample {
        Sample {
            synchro,
            object_temp: 3655,
            ntc1_temp: 2450,
            ntc2_temp: 2460,
            ntc3_temp: 2470,
        }
    }

    fn state_with(config: Config) -> Arc<AppState> {
        Arc::new(AppState::with_proxy(
            ConfigManager::new(config, "/tmp/jdtsd-test.yml".into()),
            Arc::new(DeviceProxy::simulated(0.0)),
            DesiredState::default(),
        ))
    }

    #[tokio::test]
    async fn broadcast_caches_and_publishes() {
        let state = state_with(Config::default());
        let event_bus = EventBus::new();
        let mut events = event_bus.subscribe();
        let mut consumer = BroadcastConsumer::new(state.clone(), event_bus);

        consumer.on_sample(sample(11)).await;
        assert_eq!(state.last_status().await, Some(LoopStatus::Sample(sample(11))));
        assert_eq!(
            events.recv().await.unwrap(),
            Event::StatusUpdated(LoopStatus::Sample(sample(11)))
        );

        consumer.on_no_signal().await;
        assert_eq!(state.last_status().await, Some(LoopStatus::NoSignal));
    }

    #[tokio::test]
    async fn json_output_follows_live_config() {
        let state = state_with(Config::default());
        let mut consumer = OutputConsumer::new(state.config_manager().clone(), Vec::new());

        consumer.on_sample(sample(1)).await;
        state.config_manager().get_mut().await.output.json = true;
        consumer.on_sample(sample(2)).await;
        consumer.on_no_signal().await;

        let out = String::from_utf8(consumer.into_inner()).unwrap();
        let lines: Vec<_> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains(r#""synchro":2"#));
        assert_eq!(lines[1], r#"{"status":"no_signal"}"#);
    }

    #[tokio::test]
    async fn service_forwards_channel_to_event_bus() {
        let state = state_with(Config::default());
        let event_bus = EventBus::new();
        let mut events = event_bus.subscribe();
        let (dispatcher, receiver) = status_channel();

        let provider = PresentationServiceProvider::new(state.clone(), event_bus, receiver);
        let mut task_manager = TaskManager::new();
        provider.start(&mut task_manager).await.unwrap();
        assert!(provider.start(&mut task_manager).await.is_err());

        dispatcher.dispatch(LoopStatus::NoSignal);
        let event = timeout(Duration::from_secs(1), events.recv()).await.unwrap();
        assert_eq!(event.unwrap(), Event::StatusUpdated(LoopStatus::NoSignal));

        task_manager.shutdown_all().await.unwrap();
        assert_eq!(state.last_status().await, Some(LoopStatus::NoSignal));
    }
}
