//! Hardware drivers for supported sensors.

pub mod jdts;
