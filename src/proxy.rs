//! Remote call boundary to the temperature sensor.

use async_trait::async_trait;

use crate::sample::Sample;

/// Operations the sensor service exposes.
///
/// Implementations never fail loudly: any communication error becomes
/// `None` or `false`, and a `false` must be taken to mean the device state
/// did not change.
///
/// # Example
///
/// ```no_run
/// use jdtsd::proxy::SensorServiceProxy;
/// use jdtsd::sample::Sample;
///
/// struct Offline;
///
/// #[async_trait::async_trait]
/// impl SensorServiceProxy for Offline {
///     async fn read_sample(&self) -> Option<Sample> { None }
///     async fn activate(&self, _enabled: bool) -> bool { false }
///     async fn set_mode(&self, _continuous: bool) -> bool { false }
/// }
/// ```
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SensorServiceProxy: Send + Sync {
    /// Reads one sample, `None` on any failure.
    async fn read_sample(&self) -> Option<Sample>;

    /// Wakes the sensor up (`true`) or puts it to sleep (`false`).
    async fn activate(&self, enabled: bool) -> bool;

    /// Selects continuous (`true`) or burst (`false`) measurement.
    async fn set_mode(&self, continuous: bool) -> bool;
}
