//! In-process stand-in for the JDTS character device.

use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{Result, bail};
use rand::Rng;

use crate::sample::Sample;

use super::{
    device_io::DeviceIO,
    protocol::{self, Command},
};

/// Baseline readings in centi-degrees.
const OBJECT_BASE: i16 = 3650;
const NTC_BASE: [i16; 3] = [2450, 2500, 2550];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulatedState {
    pub awake: bool,
    pub continuous: bool,
    pub synchro: u16,
}

/// Simulated sensor speaking the driver's byte protocol.
///
/// Starts asleep in burst mode, like the hardware after reset. Reads fail
/// while asleep, and every call fails with probability `failure_rate`.
#[derive(Debug)]
pub struct SimulatedIo {
    state: Mutex<SimulatedState>,
    failure_rate: f64,
}

impl SimulatedIo {
    pub fn new(failure_rate: f64) -> Self {
        Self {
            state: Mutex::new(SimulatedState {
                awake: false,
                continuous: false,
                synchro: 0,
            }),
            failure_rate: failure_rate.clamp(0.0, 1.0),
        }
    }

    pub fn state(&self) -> SimulatedState {
        *self.lock()
    }

    fn lock(&self) -> MutexGuard<'_, SimulatedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn inject_failure(&self) -> bool {
        rand::rng().random_bool(self.failure_rate)
    }
}

impl DeviceIO for SimulatedIo {
    fn write(&self, buf: &[u8]) -> Result<usize> {
        if self.inject_failure() {
            bail!("Simulated write failure");
        }
        let mut state = self.lock();
        match Command::parse(buf)? {
            Command::Power { wake } => state.awake = wake,
            Command::MeasMode { continuous } => state.continuous = continuous,
        }
        Ok(buf.len())
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        if self.inject_failure() {
            bail!("Simulated read failure");
        }
        let mut state = self.lock();
        if !state.awake {
            bail!("Sensor is asleep");
        }
        state.synchro = state.synchro.wrapping_add(1);

        let mut rng = rand::rng();
        let sample = Sample {
            synchro: state.synchro,
            object_temp: OBJECT_BASE + rng.random_range(-25i16..=25),
            ntc1_temp: NTC_BASE[0] + rng.random_range(-10i16..=10),
            ntc2_temp: NTC_BASE[1] + rng.random_range(-10i16..=10),
            ntc3_temp: NTC_BASE[2] + rng.random_range(-10i16..=10),
        };
        let frame = protocol::encode_frame(&sample);
        let n = frame.len().min(buf.len());
        buf[..n].copy_from_slice(&frame[..n]);
        Ok(n)
    }
}
