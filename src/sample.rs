//! Temperature samples and per-iteration poll outcomes.

use std::fmt;

use serde::Serialize;

/// One multi-channel reading from the sensor.
///
/// All temperatures are in hundredths of a degree Celsius, exactly as the
/// device reports them. `synchro` is the device's free-running frame counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Sample {
    pub synchro: u16,
    pub object_temp: i16,
    pub ntc1_temp: i16,
    pub ntc2_temp: i16,
    pub ntc3_temp: i16,
}

impl Sample {
    pub fn object_celsius(&self) -> f32 {
        centi_to_celsius(self.object_temp)
    }

    pub fn ntc1_celsius(&self) -> f32 {
        centi_to_celsius(self.ntc1_temp)
    }

    pub fn ntc2_celsius(&self) -> f32 {
        centi_to_celsius(self.ntc2_temp)
    }

    pub fn ntc3_celsius(&self) -> f32 {
        centi_to_celsius(self.ntc3_temp)
    }
}

impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Synchro = {} Obj = {:.2} °C NTC1 = {:.2} °C NTC2 = {:.2} °C NTC3 = {:.2} °C",
            self.synchro,
            self.object_celsius(),
            self.ntc1_celsius(),
            self.ntc2_celsius(),
            self.ntc3_celsius()
        )
    }
}

/// Converts a centi-degree reading to degrees Celsius.
pub fn centi_to_celsius(value: i16) -> f32 {
    f32::from(value) / 100.0
}

/// Outcome of a single control loop iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LoopStatus {
    Sample(Sample),
    NoSignal,
}
