//! JDTS temperature sensor binding.
//!
//! The driver exposes a character device: two-byte command writes switch
//! power and measurement mode, ten-byte reads return one sample frame.

pub mod device;
pub mod device_io;
pub mod protocol;
pub mod simulated;

use std::{fs::File, path::Path, sync::Arc};

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{error, info, warn};
use tokio::sync::{Mutex, MutexGuard};

use crate::{config::DeviceCfg, proxy::SensorServiceProxy, sample::Sample};

use self::{device::JdtsDevice, device_io::DeviceIO, simulated::SimulatedIo};

/// Default device node created by the kernel driver.
pub const DEVICE_PATH: &str = "/dev/jdts_temperature";

/// [`SensorServiceProxy`] backed by a [`JdtsDevice`].
///
/// Blocking I/O runs on the blocking thread pool, one call at a time.
/// Every error is logged and folded into `None`/`false`.
///
/// # Example
///
/// ```no_run
/// use jdtsd::drivers::jdts::DeviceProxy;
/// use jdtsd::proxy::SensorServiceProxy;
///
/// # async fn example() -> anyhow::Result<()> {
/// let proxy = DeviceProxy::open("/dev/jdts_temperature")?;
/// if proxy.activate(true).await {
///     println!("{:?}", proxy.read_sample().await);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct DeviceProxy<Io: DeviceIO>(Arc<Mutex<JdtsDevice<Io>>>);

impl<Io: DeviceIO> DeviceProxy<Io> {
    pub fn new(device: JdtsDevice<Io>) -> Self {
        Self(Arc::new(Mutex::new(device)))
    }

    /// Direct access to the wrapped device.
    pub async fn device(&self) -> MutexGuard<'_, JdtsDevice<Io>> {
        self.0.lock().await
    }

    async fn call<T, F>(&self, what: &'static str, op: F) -> Option<T>
    where
        T: Send + 'static,
        F: FnOnce(&JdtsDevice<Io>) -> Result<T> + Send + 'static,
    {
        let dev = self.0.clone();
        match tokio::task::spawn_blocking(move || {
            let guard = dev.blocking_lock();
            op(&guard)
        })
        .await
        {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                warn!("{what} failed: {e}");
                None
            }
            Err(e) => {
                error!("{what} task aborted: {e}");
                None
            }
        }
    }
}

impl DeviceProxy<File> {
    /// Opens the driver's character device for reading and writing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::options()
            .read(true)
            .write(true)
            .open(path)
            .with_context(|| format!("Cannot open device driver {}", path.display()))?;
        info!("Opened JDTS device {}", path.display());
        Ok(Self::new(JdtsDevice::new(path.display().to_string(), file)))
    }
}

impl DeviceProxy<SimulatedIo> {
    pub fn simulated(failure_rate: f64) -> Self {
        info!("Using simulated JDTS device (failure rate {failure_rate})");
        Self::new(JdtsDevice::new("simulated", SimulatedIo::new(failure_rate)))
    }
}

#[async_trait]
impl<Io: DeviceIO> SensorServiceProxy for DeviceProxy<Io> {
    async fn read_sample(&self) -> Option<Sample> {
        self.call("read_sample", |dev| dev.read_sample()).await
    }

    async fn activate(&self, enabled: bool) -> bool {
        self.call("activate", move |dev| dev.activate(enabled))
            .await
            .is_some()
    }

    async fn set_mode(&self, continuous: bool) -> bool {
        self.call("set_mode", move |dev| dev.set_mode(continuous))
            .await
            .is_some()
    }
}

/// Builds the proxy selected by configuration.
///
/// # Errors
///
/// Returns an error if a character device cannot be opened.
pub fn open_proxy(cfg: &DeviceCfg) -> Result<Arc<dyn SensorServiceProxy>> {
    let proxy: Arc<dyn SensorServiceProxy> = match cfg {
        DeviceCfg::CharDevice { path } => Arc::new(DeviceProxy::open(path)?),
        DeviceCfg::Simulated { failure_rate } => Arc::new(DeviceProxy::simulated(*failure_rate)),
    };
    Ok(proxy)
}
