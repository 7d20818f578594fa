use anyhow::{Result, anyhow, bail};

use crate::sample::Sample;

/// Size of one raw sample frame read from the driver.
pub const FRAME_LEN: usize = 10;

pub const CMD_TYPE_POWER: u8 = 0x00;
pub const CMD_TYPE_MEAS_MODE: u8 = 0x01;

pub const CMD_POWER_SLEEP: u8 = 0x00;
pub const CMD_POWER_WAKEUP: u8 = 0x01;

pub const CMD_MEAS_MODE_CONT: u8 = 0x00;
pub const CMD_MEAS_MODE_BURST: u8 = 0x01;

/// Control commands accepted by the driver, one two-byte write each.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Power { wake: bool },
    MeasMode { continuous: bool },
}

impl Command {
    pub fn to_bytes(self) -> [u8; 2] {
        match self {
            Command::Power { wake } => [
                CMD_TYPE_POWER,
                if wake { CMD_POWER_WAKEUP } else { CMD_POWER_SLEEP },
            ],
            Command::MeasMode { continuous } => [
                CMD_TYPE_MEAS_MODE,
                if continuous {
                    CMD_MEAS_MODE_CONT
                } else {
                    CMD_MEAS_MODE_BURST
                },
            ],
        }
    }

    pub fn parse(buf: &[u8]) -> Result<Self> {
        match *buf {
            [CMD_TYPE_POWER, CMD_POWER_WAKEUP] => Ok(Command::Power { wake: true }),
            [CMD_TYPE_POWER, CMD_POWER_SLEEP] => Ok(Command::Power { wake: false }),
            [CMD_TYPE_MEAS_MODE, CMD_MEAS_MODE_CONT] => Ok(Command::MeasMode { continuous: true }),
            [CMD_TYPE_MEAS_MODE, CMD_MEAS_MODE_BURST] => {
                Ok(Command::MeasMode { continuous: false })
            }
            _ => Err(anyhow!("Unknown command: {:02X?}", buf)),
        }
    }
}

/// Decodes a raw little-endian sample frame.
///
/// Layout: object temperature, synchro, NTC1, NTC2, NTC3; two bytes each.
pub fn parse_frame(buf: &[u8]) -> Result<Sample> {
    if buf.len() < FRAME_LEN {
        bail!("Incomplete frame: {} of {FRAME_LEN} bytes", buf.len());
    }
    let word = |at: usize| [buf[at], buf[at + 1]];

    Ok(Sample {
        object_temp: i16::from_le_bytes(word(0)),
        synchro: u16::from_le_bytes(word(2)),
        ntc1_temp: i16::from_le_bytes(word(4)),
        ntc2_temp: i16::from_le_bytes(word(6)),
        ntc3_temp: i16::from_le_bytes(word(8)),
    })
}

pub fn encode_frame(sample: &Sample) -> [u8; FRAME_LEN] {
    let mut buf = [0u8; FRAME_LEN];
    buf[0..2].copy_from_slice(&sample.object_temp.to_le_bytes());
    buf[2..4].copy_from_slice(&sample.synchro.to_le_bytes());
    buf[4..6].copy_from_slice(&sample.ntc1_temp.to_le_bytes());
    buf[6..8].copy_from_slice(&sample.ntc2_temp.to_le_bytes());
    buf[8..10].copy_from_slice(&sample.ntc3_temp.to_le_bytes());
    buf
}
