use anyhow::{Result, anyhow, bail};
use log::debug;

use crate::sample::Sample;

use super::{
    device_io::DeviceIO,
    protocol::{self, Command, FRAME_LEN},
};

/// Protocol-level handle on one JDTS sensor.
///
/// Speaks the driver's command and frame format over any [`DeviceIO`].
/// All calls block on the underlying transport.
///
/// # Type Parameters
///
/// * `Io` - Device I/O implementation (a character device file or the simulator)
#[derive(Debug)]
pub struct JdtsDevice<Io: DeviceIO> {
    /// Human-readable device name for logs.
    pub name: String,

    /// Byte transport to the driver.
    pub dev: Io,
}

impl<Io: DeviceIO> JdtsDevice<Io> {
    pub fn new(name: impl Into<String>, dev: Io) -> Self {
        Self {
            name: name.into(),
            dev,
        }
    }

    fn send(&self, cmd: Command) -> Result<()> {
        let pkt = cmd.to_bytes();
        let written = self.dev.write(&pkt)?;
        if written != pkt.len() {
            bail!("Short write for {cmd:?}: {written} of {} bytes", pkt.len());
        }
        debug!("{}: {cmd:?} written", self.name);
        Ok(())
    }

    /// Wakes the sensor up or puts it to sleep.
    ///
    /// # Errors
    ///
    /// Returns an error if the command could not be written completely.
    pub fn activate(&self, enabled: bool) -> Result<()> {
        self.send(Command::Power { wake: enabled })
            .map_err(|e| anyhow!("Cannot write activation state: {e}"))
    }

    /// Switches between continuous and burst measurement.
    ///
    /// # Errors
    ///
    /// Returns an error if the command could not be written completely.
    pub fn set_mode(&self, continuous: bool) -> Result<()> {
        self.send(Command::MeasMode { continuous })
            .map_err(|e| anyhow!("Cannot write mode state: {e}"))
    }

    /// Reads and decodes one sample frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails or returns fewer than a full frame.
    pub fn read_sample(&self) -> Result<Sample> {
        let mut buf = [0u8; FRAME_LEN];
        let n = self
            .dev
            .read(&mut buf)
            .map_err(|e| anyhow!("Cannot read raw temperature data: {e}"))?;
        protocol::parse_frame(&buf[..n])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingIo {
        written: Mutex<Vec<Vec<u8>>>,
        frame: Vec<u8>,
        short_write: bool,
    }

    impl DeviceIO for RecordingIo {
        fn write(&self, buf: &[u8]) -> Result<usize> {
            self.written.lock().unwrap().push(buf.to_vec());
            Ok(if self.short_write { 1 } else { buf.len() })
        }

        fn read(&self, buf: &mut [u8]) -> Result<usize> {
            let n = self.frame.len().min(buf.len());
            buf[..n].copy_from_slice(&self.frame[..n]);
            Ok(n)
        }
    }

    #[test]
    fn activate_and_set_mode_write_commands() {
        let device = JdtsDevice::new("test", RecordingIo::default());
        device.activate(true).unwrap();
        device.set_mode(false).unwrap();
        device.activate(false).unwrap();

        assert_eq!(
            *device.dev.written.lock().unwrap(),
            vec![vec![0x00, 0x01], vec![0x01, 0x01], vec![0x00, 0x00]]
        );
    }

    #[test]
    fn short_write_is_an_error() {
        let device = JdtsDevice::new(
            "test",
            RecordingIo {
                short_write: true,
                ..Default::default()
            },
        );
        let err = device.activate(true).unwrap_err();
        assert!(err.to_string().contains("Short write"));
    }

    #[test]
    fn read_sample_decodes_frame() {
        let sample = Sample {
            synchro: 42,
            object_temp: 3712,
            ntc1_temp: 2401,
            ntc2_temp: 2402,
            ntc3_temp: 2403,
        };
        let device = JdtsDevice::new(
            "test",
            RecordingIo {
                frame: protocol::encode_frame(&sample).to_vec(),
                ..Default::default()
            },
        );
        assert_eq!(device.read_sample().unwrap(), sample);
    }

    #[test]
    fn truncated_read_is_an_error() {
        let device = JdtsDevice::new(
            "test",
            RecordingIo {
                frame: vec![0u8; 4],
                ..Default::default()
            },
        );
        assert!(device.read_sample().is_err());
    }
}
