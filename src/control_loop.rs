//! Reconciliation and polling loop.
//!
//! Each iteration applies dirty configuration fields to the sensor (power
//! first, then measurement mode), reads one sample and dispatches the
//! outcome to the consumer task. Device failures are logged and retried
//! according to the [`RetryPolicy`]; they never end the loop. Only a stop
//! request does, and only between device calls.

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use log::{debug, error, info, warn};
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{Instant, sleep, timeout},
};
use tokio_util::sync::CancellationToken;

use crate::{
    config::Config,
    consumer::StatusDispatcher,
    desired_state::{DesiredStateStore, Field, PendingChange},
    proxy::SensorServiceProxy,
    retry::{Decision, FieldRetry, RetryPolicy},
    sample::LoopStatus,
};

/// Default polling period.
pub const DEFAULT_POLL_PERIOD: Duration = Duration::from_millis(200);

/// Lifecycle of a control loop. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Running,
    /// Stop requested, current iteration still finishing.
    Stopping,
    Stopped,
}

/// Timing and retry parameters of a control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopSettings {
    /// Sleep between iterations.
    pub poll_period: Duration,
    /// How long `stop` waits for the loop to reach `Stopped`.
    pub shutdown_grace: Duration,
    pub retry: RetryPolicy,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            poll_period: DEFAULT_POLL_PERIOD,
            shutdown_grace: DEFAULT_POLL_PERIOD * 2,
            retry: RetryPolicy::default(),
        }
    }
}

impl LoopSettings {
    pub fn from_config(config: &Config) -> Self {
        let poll_period = Duration::from_millis(config.poll_period_ms);
        Self {
            poll_period,
            shutdown_grace: poll_period.saturating_mul(config.shutdown_grace_periods),
            retry: config.retry,
        }
    }
}

/// Background worker reconciling the [`DesiredStateStore`] with the sensor.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use jdtsd::consumer::{LogConsumer, run_consumer, status_channel};
/// use jdtsd::control_loop::{ControlLoop, LoopSettings};
/// use jdtsd::desired_state::DesiredStateStore;
/// use jdtsd::drivers::jdts::DeviceProxy;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> anyhow::Result<()> {
/// let store = Arc::new(DesiredStateStore::default());
/// let (dispatcher, receiver) = status_channel();
/// tokio::spawn(async move {
///     run_consumer(receiver, &mut LogConsumer::new(), CancellationToken::new()).await
/// });
///
/// let handle = ControlLoop::new(
///     store.clone(),
///     Arc::new(DeviceProxy::simulated(0.0)),
///     dispatcher,
///     LoopSettings::default(),
/// )
/// .start();
///
/// store.request_mode(false);
/// handle.stop().await;
/// # Ok(())
/// # }
/// ```
pub struct ControlLoop {
    store: Arc<DesiredStateStore>,
    proxy: Arc<dyn SensorServiceProxy>,
    dispatcher: StatusDispatcher,
    settings: LoopSettings,
    power_retry: FieldRetry,
    mode_retry: FieldRetry,
    state: Arc<watch::Sender<LoopState>>,
}

impl ControlLoop {
    pub fn new(
        store: Arc<DesiredStateStore>,
        proxy: Arc<dyn SensorServiceProxy>,
        dispatcher: StatusDispatcher,
        settings: LoopSettings,
    ) -> Self {
        let (state, _) = watch::channel(LoopState::Running);
        Self {
            store,
            proxy,
            dispatcher,
            settings,
            power_retry: FieldRetry::default(),
            mode_retry: FieldRetry::default(),
            state: Arc::new(state),
        }
    }

    /// Receiver observing the loop's lifecycle state.
    pub fn subscribe_state(&self) -> watch::Receiver<LoopState> {
        self.state.subscribe()
    }

    /// Runs one reconcile-then-poll cycle and dispatches its outcome.
    pub async fn run_iteration(&mut self) -> LoopStatus {
        let pending = self.store.take_pending();

        if let Some(change) = pending.power {
            self.reconcile(Field::Power, change).await;
        }
        if let Some(change) = pending.mode {
            self.reconcile(Field::Mode, change).await;
        }

        let status = match self.proxy.read_sample().await {
            Some(sample) => LoopStatus::Sample(sample),
            None => LoopStatus::NoSignal,
        };
        self.dispatcher.dispatch(status);
        status
    }

    async fn reconcile(&mut self, field: Field, change: PendingChange) {
        let policy = self.settings.retry;
        let retry = match field {
            Field::Power => &mut self.power_retry,
            Field::Mode => &mut self.mode_retry,
        };

        match retry.decide(&policy, change.generation, Instant::now()) {
            Decision::Attempt => {}
            Decision::Wait(until) => {
                debug!(
                    "Backing off {} update for {:?}",
                    field.name(),
                    until.saturating_duration_since(Instant::now())
                );
                return;
            }
            Decision::GaveUp => {
                if retry.report_skip() {
                    warn!(
                        "Skipping {} update, retry budget spent until a new request arrives",
                        field.name()
                    );
                }
                return;
            }
        }

        let applied = match field {
            Field::Power => self.proxy.activate(change.value).await,
            Field::Mode => self.proxy.set_mode(change.value).await,
        };

        if applied {
            retry.record_success();
            if self.store.mark_applied(field, change.generation) {
                info!("Applied {} = {}", field.name(), describe(field, change.value));
            } else {
                debug!(
                    "{} changed while being applied, keeping it pending",
                    field.name()
                );
            }
        } else if retry.record_failure(&policy, Instant::now()) {
            error!(
                "Cannot update {}, giving up after {} attempts until a new request arrives",
                field.name(),
                retry.failures()
            );
        } else {
            warn!("Cannot update {}", field.name());
        }
    }

    /// Iterates until `cancel_token` fires.
    ///
    /// A stop request interrupts the polling sleep immediately but lets an
    /// in-flight iteration complete.
    pub async fn run(mut self, cancel_token: CancellationToken) -> Result<()> {
        let state = Arc::clone(&self.state);
        state.send_replace(LoopState::Running);
        info!(
            "Control loop running, polling every {:?}",
            self.settings.poll_period
        );

        while !cancel_token.is_cancelled() {
            {
                let iteration = self.run_iteration();
                tokio::pin!(iteration);
                tokio::select! {
                    biased;
                    _ = &mut iteration => {}
                    () = cancel_token.cancelled() => {
                        state.send_replace(LoopState::Stopping);
                        info!("Stop requested, finishing current iteration");
                        iteration.await;
                    }
                }
            }

            tokio::select! {
                () = cancel_token.cancelled() => {}
                () = sleep(self.settings.poll_period) => {}
            }
        }

        state.send_replace(LoopState::Stopping);
        state.send_replace(LoopState::Stopped);
        info!("Control loop stopped");
        Ok(())
    }

    /// Spawns the loop on the runtime.
    pub fn start(self) -> ControlLoopHandle {
        let cancel_token = CancellationToken::new();
        let state = self.subscribe_state();
        let shutdown_grace = self.settings.shutdown_grace;
        let task = tokio::spawn(self.run(cancel_token.clone()));

        ControlLoopHandle {
            cancel_token,
            state,
            shutdown_grace,
            task,
        }
    }
}

fn describe(field: Field, value: bool) -> &'static str {
    match (field, value) {
        (Field::Power, true) => "on",
        (Field::Power, false) => "off",
        (Field::Mode, true) => "continuous",
        (Field::Mode, false) => "burst",
    }
}

/// Owner's side of a started [`ControlLoop`].
#[derive(Debug)]
pub struct ControlLoopHandle {
    cancel_token: CancellationToken,
    state: watch::Receiver<LoopState>,
    shutdown_grace: Duration,
    task: JoinHandle<Result<()>>,
}

impl ControlLoopHandle {
    pub fn state(&self) -> LoopState {
        *self.state.borrow()
    }

    /// Requests a stop and waits up to the shutdown grace period for the
    /// loop to reach `Stopped`.
    ///
    /// Returns the last observed state. On timeout the task is left to
    /// finish on its own; the sensor may be in any power state afterwards.
    pub async fn stop(mut self) -> LoopState {
        self.cancel_token.cancel();

        let outcome = timeout(
            self.shutdown_grace,
            self.state.wait_for(|state| *state == LoopState::Stopped),
        )
        .await
        .map(|stopped| stopped.is_ok());
        let last = *self.state.borrow();

        match outcome {
            Ok(true) => {}
            Ok(false) => warn!("Control loop ended without reporting Stopped"),
            Err(_) => warn!(
                "Control loop still {last:?} after {:?}, proceeding without it",
                self.shutdown_grace
            ),
        }
        last
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        consumer::{StatusReceiver, status_channel},
        desired_state::{DesiredState, PendingFlags},
        proxy::MockSensorServiceProxy,
        sample::Sample,
    };
    use mockall::{Sequence, predicate::eq};
    use pretty_assertions::assert_eq;
    use std::{collections::VecDeque, sync::Mutex};

    fn sample(synchro: u16) -> Sample {
        Sample {
            synchro,
            object_temp: 3650,
            ntc1_temp: 2500,
            ntc2_temp: 2510,
            ntc3_temp: 2520,
        }
    }

    fn clean_store() -> Arc<DesiredStateStore> {
        let store = DesiredStateStore::default();
        let pending = store.take_pending();
        store.mark_applied(Field::Power, pending.power.unwrap().generation);
        store.mark_applied(Field::Mode, pending.mode.unwrap().generation);
        Arc::new(store)
    }

    fn drain(receiver: &mut StatusReceiver) -> Vec<LoopStatus> {
        std::iter::from_fn(|| receiver.try_recv()).collect()
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Call {
        Activate(bool),
        SetMode(bool),
        Read,
    }

    type Hook = Box<dyn Fn() + Send + Sync>;

    /// Proxy replaying queued outcomes. Empty queues mean success for
    /// configuration calls and no signal for reads.
    #[derive(Default)]
    struct ScriptedProxy {
        activate_results: Mutex<VecDeque<bool>>,
        mode_results: Mutex<VecDeque<bool>>,
        samples: Mutex<VecDeque<Option<Sample>>>,
        calls: Mutex<Vec<Call>>,
        read_delay: Duration,
        during_activate: Option<Hook>,
    }

    impl ScriptedProxy {
        fn with_activate(self, results: &[bool]) -> Self {
            *self.activate_results.lock().unwrap() = results.iter().copied().collect();
            self
        }

        fn with_mode(self, results: &[bool]) -> Self {
            *self.mode_results.lock().unwrap() = results.iter().copied().collect();
            self
        }

        fn with_samples(self, samples: &[Option<Sample>]) -> Self {
            *self.samples.lock().unwrap() = samples.iter().copied().collect();
            self
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl SensorServiceProxy for ScriptedProxy {
        async fn read_sample(&self) -> Option<Sample> {
            self.calls.lock().unwrap().push(Call::Read);
            if !self.read_delay.is_zero() {
                sleep(self.read_delay).await;
            }
            self.samples.lock().unwrap().pop_front().flatten()
        }

        async fn activate(&self, enabled: bool) -> bool {
            self.calls.lock().unwrap().push(Call::Activate(enabled));
            if let Some(hook) = &self.during_activate {
                hook();
            }
            self.activate_results.lock().unwrap().pop_front().unwrap_or(true)
        }

        async fn set_mode(&self, continuous: bool) -> bool {
            self.calls.lock().unwrap().push(Call::SetMode(continuous));
            self.mode_results.lock().unwrap().pop_front().unwrap_or(true)
        }
    }

    fn control_loop(
        store: Arc<DesiredStateStore>,
        proxy: Arc<dyn SensorServiceProxy>,
        settings: LoopSettings,
    ) -> (ControlLoop, StatusReceiver) {
        let (dispatcher, receiver) = status_channel();
        (ControlLoop::new(store, proxy, dispatcher, settings), receiver)
    }

    #[tokio::test]
    async fn startup_scenario_applies_power_and_keeps_failed_mode_dirty() {
        let store = Arc::new(DesiredStateStore::new(DesiredState {
            power_enabled: true,
            continuous_mode: true,
        }));

        let mut proxy = MockSensorServiceProxy::new();
        proxy
            .expect_activate()
            .with(eq(true))
            .times(1)
            .returning(|_| true);
        proxy
            .expect_set_mode()
            .with(eq(true))
            .times(1)
            .returning(|_| false);
        proxy
            .expect_read_sample()
            .times(1)
            .returning(|| Some(sample(1)));

        let (mut control, mut receiver) =
            control_loop(store.clone(), Arc::new(proxy), LoopSettings::default());
        let status = control.run_iteration().await;

        assert_eq!(status, LoopStatus::Sample(sample(1)));
        assert_eq!(
            store.flags(),
            PendingFlags {
                power_dirty: false,
                mode_dirty: true
            }
        );
        assert_eq!(drain(&mut receiver), vec![LoopStatus::Sample(sample(1))]);
    }

    #[tokio::test]
    async fn power_then_mode_then_read_within_iteration() {
        let store = Arc::new(DesiredStateStore::default());
        let mut seq = Sequence::new();

        let mut proxy = MockSensorServiceProxy::new();
        proxy
            .expect_activate()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| true);
        proxy
            .expect_set_mode()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| true);
        proxy
            .expect_read_sample()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| None);

        let (mut control, _receiver) =
            control_loop(store, Arc::new(proxy), LoopSettings::default());
        control.run_iteration().await;
    }

    #[tokio::test]
    async fn failed_activate_is_retried_with_same_value() {
        let store = clean_store();
        store.request_power(false);
        let proxy = Arc::new(ScriptedProxy::default().with_activate(&[false, true]));

        let (mut control, _receiver) =
            control_loop(store.clone(), proxy.clone(), LoopSettings::default());

        control.run_iteration().await;
        assert!(store.flags().power_dirty);

        control.run_iteration().await;
        assert!(!store.flags().power_dirty);

        assert_eq!(
            proxy.calls(),
            vec![
                Call::Activate(false),
                Call::Read,
                Call::Activate(false),
                Call::Read
            ]
        );
    }

    #[tokio::test]
    async fn applied_field_is_not_reapplied_without_new_request() {
        let store = clean_store();
        store.request_power(true);

        let mut proxy = MockSensorServiceProxy::new();
        proxy.expect_activate().times(1).returning(|_| true);
        proxy.expect_set_mode().never();
        proxy.expect_read_sample().times(3).returning(|| None);

        let (mut control, _receiver) =
            control_loop(store.clone(), Arc::new(proxy), LoopSettings::default());
        for _ in 0..3 {
            control.run_iteration().await;
        }
        assert_eq!(store.flags(), PendingFlags::default());
    }

    #[tokio::test]
    async fn fields_retry_independently() {
        let store = Arc::new(DesiredStateStore::default());
        let proxy = Arc::new(
            ScriptedProxy::default()
                .with_activate(&[false])
                .with_mode(&[true]),
        );

        let (mut control, _receiver) =
            control_loop(store.clone(), proxy.clone(), LoopSettings::default());
        control.run_iteration().await;

        assert_eq!(
            store.flags(),
            PendingFlags {
                power_dirty: true,
                mode_dirty: false
            }
        );

        control.run_iteration().await;
        assert_eq!(store.flags(), PendingFlags::default());
        assert_eq!(
            proxy.calls(),
            vec![
                Call::Activate(true),
                Call::SetMode(true),
                Call::Read,
                Call::Activate(true),
                Call::Read
            ]
        );
    }

    #[tokio::test]
    async fn missing_sample_dispatches_single_no_signal() {
        let store = clean_store();
        let proxy = Arc::new(ScriptedProxy::default().with_samples(&[None, Some(sample(2))]));

        let (mut control, mut receiver) =
            control_loop(store, proxy.clone(), LoopSettings::default());

        assert_eq!(control.run_iteration().await, LoopStatus::NoSignal);
        assert_eq!(drain(&mut receiver), vec![LoopStatus::NoSignal]);

        assert_eq!(
            control.run_iteration().await,
            LoopStatus::Sample(sample(2))
        );
        assert_eq!(drain(&mut receiver), vec![LoopStatus::Sample(sample(2))]);
    }

    #[tokio::test]
    async fn last_mode_request_wins() {
        let store = clean_store();
        store.request_mode(false);
        store.request_mode(true);

        let mut proxy = MockSensorServiceProxy::new();
        proxy
            .expect_set_mode()
            .with(eq(true))
            .times(1)
            .returning(|_| true);
        proxy.expect_read_sample().returning(|| None);

        let (mut control, _receiver) =
            control_loop(store.clone(), Arc::new(proxy), LoopSettings::default());
        control.run_iteration().await;
        assert!(!store.flags().mode_dirty);
    }

    #[tokio::test]
    async fn request_during_apply_stays_pending() {
        let store = clean_store();
        store.request_power(true);

        let hook_store = store.clone();
        let proxy = Arc::new(ScriptedProxy {
            during_activate: Some(Box::new(move || hook_store.request_power(false))),
            ..Default::default()
        });

        let (mut control, _receiver) =
            control_loop(store.clone(), proxy.clone(), LoopSettings::default());
        control.run_iteration().await;

        let (desired, flags) = store.snapshot();
        assert!(flags.power_dirty);
        assert!(!desired.power_enabled);

        control.run_iteration().await;
        assert_eq!(
            proxy.calls(),
            vec![
                Call::Activate(true),
                Call::Read,
                Call::Activate(false),
                Call::Read
            ]
        );
    }

    #[tokio::test]
    async fn retry_budget_stops_calls_until_next_request() {
        let store = clean_store();
        store.request_mode(false);
        let proxy = Arc::new(ScriptedProxy::default().with_mode(&[false, false]));
        let settings = LoopSettings {
            retry: RetryPolicy {
                max_attempts: Some(2),
                ..Default::default()
            },
            ..Default::default()
        };

        let (mut control, _receiver) = control_loop(store.clone(), proxy.clone(), settings);
        for _ in 0..4 {
            control.run_iteration().await;
        }
        let mode_calls = |calls: Vec<Call>| {
            calls
                .into_iter()
                .filter(|c| matches!(c, Call::SetMode(_)))
                .count()
        };
        assert_eq!(mode_calls(proxy.calls()), 2);
        assert!(store.flags().mode_dirty);

        store.request_mode(false);
        control.run_iteration().await;
        assert_eq!(mode_calls(proxy.calls()), 3);
        assert!(!store.flags().mode_dirty);
    }

    #[tokio::test]
    async fn started_loop_polls_and_stops() {
        let store = Arc::new(DesiredStateStore::default());
        let proxy = Arc::new(ScriptedProxy::default().with_samples(&[
            Some(sample(1)),
            Some(sample(2)),
            Some(sample(3)),
        ]));
        let settings = LoopSettings {
            poll_period: Duration::from_millis(10),
            shutdown_grace: Duration::from_secs(1),
            ..Default::default()
        };

        let (control, mut receiver) = control_loop(store.clone(), proxy.clone(), settings);
        let handle = control.start();
        assert_ne!(handle.state(), LoopState::Stopped);

        let first = timeout(Duration::from_secs(2), receiver.recv()).await.unwrap();
        assert_eq!(first, Some(LoopStatus::Sample(sample(1))));

        assert_eq!(handle.stop().await, LoopState::Stopped);
        assert_eq!(store.flags(), PendingFlags::default());
        assert_eq!(&proxy.calls()[..2], &[Call::Activate(true), Call::SetMode(true)]);
    }

    #[tokio::test]
    async fn stop_interrupts_polling_sleep() {
        let proxy = Arc::new(ScriptedProxy::default());
        let settings = LoopSettings {
            poll_period: Duration::from_secs(60),
            shutdown_grace: Duration::from_secs(120),
            ..Default::default()
        };
        let (control, mut receiver) = control_loop(clean_store(), proxy, settings);
        let handle = control.start();

        // First iteration done, loop now sleeping.
        receiver.recv().await.unwrap();

        let stopped = timeout(Duration::from_secs(1), handle.stop()).await;
        assert_eq!(stopped.unwrap(), LoopState::Stopped);
    }

    #[tokio::test]
    async fn stop_lets_in_flight_read_finish_and_dispatch() {
        let proxy = Arc::new(
            ScriptedProxy {
                read_delay: Duration::from_millis(100),
                ..Default::default()
            }
            .with_samples(&[Some(sample(7))]),
        );
        let settings = LoopSettings {
            poll_period: Duration::from_millis(10),
            shutdown_grace: Duration::from_secs(2),
            ..Default::default()
        };
        let (control, mut receiver) = control_loop(clean_store(), proxy.clone(), settings);
        let handle = control.start();

        while proxy.calls().is_empty() {
            tokio::task::yield_now().await;
        }

        assert_eq!(handle.stop().await, LoopState::Stopped);
        assert_eq!(drain(&mut receiver), vec![LoopStatus::Sample(sample(7))]);
        assert_eq!(proxy.calls(), vec![Call::Read]);
    }

    #[tokio::test]
    async fn stop_gives_up_after_grace_period() {
        let proxy = Arc::new(ScriptedProxy {
            read_delay: Duration::from_millis(500),
            ..Default::default()
        });
        let settings = LoopSettings {
            poll_period: Duration::from_millis(10),
            shutdown_grace: Duration::from_millis(50),
            ..Default::default()
        };
        let (control, _receiver) = control_loop(clean_store(), proxy.clone(), settings);
        let handle = control.start();

        // Let the first read start.
        while proxy.calls().is_empty() {
            tokio::task::yield_now().await;
        }

        let started = std::time::Instant::now();
        let last = handle.stop().await;
        assert_eq!(last, LoopState::Stopping);
        assert!(started.elapsed() < Duration::from_millis(400));
    }

    #[test]
    fn settings_follow_config() {
        let config = Config {
            poll_period_ms: 150,
            shutdown_grace_periods: 3,
            ..Default::default()
        };
        let settings = LoopSettings::from_config(&config);
        assert_eq!(settings.poll_period, Duration::from_millis(150));
        assert_eq!(settings.shutdown_grace, Duration::from_millis(450));
        assert_eq!(settings.retry, RetryPolicy::default());
    }

    #[test]
    fn settings_saturate_on_extreme_config() {
        let config = Config {
            poll_period_ms: u64::MAX,
            shutdown_grace_periods: u32::MAX,
            ..Default::default()
        };
        let settings = LoopSettings::from_config(&config);
        assert_eq!(settings.shutdown_grace, Duration::MAX);
    }
}
