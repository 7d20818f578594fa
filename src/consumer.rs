//! Delivery of poll outcomes to the presentation side.
//!
//! The control loop never calls consumers directly. It pushes every
//! [`LoopStatus`] into an unbounded single-producer channel and returns
//! immediately; a separate task drains the channel and invokes the
//! [`SampleConsumer`] callbacks in order.

use std::io::Write;

use anyhow::Result;
use async_trait::async_trait;
use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::sample::{LoopStatus, Sample};

/// Receiver of poll outcomes.
#[async_trait]
pub trait SampleConsumer: Send {
    async fn on_sample(&mut self, sample: Sample);
    async fn on_no_signal(&mut self);
}

#[async_trait]
impl SampleConsumer for Vec<Box<dyn SampleConsumer>> {
    async fn on_sample(&mut self, sample: Sample) {
        for consumer in self.iter_mut() {
            consumer.on_sample(sample).await;
        }
    }

    async fn on_no_signal(&mut self) {
        for consumer in self.iter_mut() {
            consumer.on_no_signal().await;
        }
    }
}

/// Creates the dispatch channel between the control loop and the consumer task.
pub fn status_channel() -> (StatusDispatcher, StatusReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (StatusDispatcher { tx }, StatusReceiver { rx })
}

/// Sending half, owned by the control loop. Never blocks.
#[derive(Debug, Clone)]
pub struct StatusDispatcher {
    tx: mpsc::UnboundedSender<LoopStatus>,
}

impl StatusDispatcher {
    /// Queues `status` for the consumer task.
    ///
    /// Returns `false` if the consumer side is gone; the status is dropped.
    pub fn dispatch(&self, status: LoopStatus) -> bool {
        match self.tx.send(status) {
            Ok(()) => true,
            Err(_) => {
                debug!("No consumer attached, dropping {status:?}");
                false
            }
        }
    }
}

/// Receiving half, drained on the presentation side.
#[derive(Debug)]
pub struct StatusReceiver {
    rx: mpsc::UnboundedReceiver<LoopStatus>,
}

impl StatusReceiver {
    pub async fn recv(&mut self) -> Option<LoopStatus> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<LoopStatus> {
        self.rx.try_recv().ok()
    }
}

/// Invokes the callback matching `status`.
pub async fn deliver<C: SampleConsumer + ?Sized>(consumer: &mut C, status: LoopStatus) {
    match status {
        LoopStatus::Sample(sample) => consumer.on_sample(sample).await,
        LoopStatus::NoSignal => consumer.on_no_signal().await,
    }
}

/// Feeds every received status to `consumer` until cancelled or until the
/// control loop drops its dispatcher. Statuses already queued at
/// cancellation are still delivered.
pub async fn run_consumer<C: SampleConsumer + ?Sized>(
    mut receiver: StatusReceiver,
    consumer: &mut C,
    cancel_token: CancellationToken,
) -> Result<()> {
    let cancelled = loop {
        tokio::select! {
            () = cancel_token.cancelled() => break true,
            status = receiver.recv() => match status {
                Some(status) => deliver(&mut *consumer, status).await,
                None => break false,
            }
        }
    };

    if cancelled {
        while let Some(status) = receiver.try_recv() {
            deliver(&mut *consumer, status).await;
        }
        info!("Sample consumer cancelled");
    } else {
        info!("Status channel closed");
    }
    Ok(())
}

/// Logs samples and signal transitions.
///
/// Samples go to `debug` unless disabled; losing or regaining the signal
/// is reported once per transition.
#[derive(Debug)]
pub struct LogConsumer {
    has_signal: Option<bool>,
    log_samples: bool,
}

impl Default for LogConsumer {
    fn default() -> Self {
        Self {
            has_signal: None,
            log_samples: true,
        }
    }
}

impl LogConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_log_samples(&mut self, enabled: bool) {
        self.log_samples = enabled;
    }

    /// `None` until the first outcome arrives.
    pub fn has_signal(&self) -> Option<bool> {
        self.has_signal
    }
}

#[async_trait]
impl SampleConsumer for LogConsumer {
    async fn on_sample(&mut self, sample: Sample) {
        if self.has_signal != Some(true) {
            info!("Sensor signal acquired");
        }
        self.has_signal = Some(true);
        if self.log_samples {
            debug!("{sample}");
        }
    }

    async fn on_no_signal(&mut self) {
        if self.has_signal != Some(false) {
            warn!("Sensor signal lost");
        }
        self.has_signal = Some(false);
    }
}

/// Writes one JSON object per outcome, newline separated.
#[derive(Debug)]
pub struct JsonLinesConsumer<W: Write + Send> {
    out: W,
}

impl<W: Write + Send> JsonLinesConsumer<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn emit(&mut self, status: &LoopStatus) {
        let result = serde_json::to_writer(&mut self.out, status)
            .map_err(anyhow::Error::from)
            .and_then(|()| {
                self.out.write_all(b"\n")?;
                self.out.flush()?;
                Ok(())
            });
        if let Err(e) = result {
            error!("Failed to write JSON status: {e}");
        }
    }
}

#[async_trait]
impl<W: Write + Send> SampleConsumer for JsonLinesConsumer<W> {
    async fn on_sample(&mut self, sample: Sample) {
        self.emit(&LoopStatus::Sample(sample));
    }

    async fn on_no_signal(&mut self) {
        self.emit(&LoopStatus::NoSignal);
    }
}
