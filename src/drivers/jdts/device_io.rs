use std::{
    fs::File,
    io::{Read, Write},
};

use anyhow::{Context, Result};

/// Raw byte transport to the sensor driver.
pub trait DeviceIO: Send + 'static {
    fn write(&self, buf: &[u8]) -> Result<usize>;
    fn read(&self, buf: &mut [u8]) -> Result<usize>;
}

impl DeviceIO for File {
    fn write(&self, buf: &[u8]) -> Result<usize> {
        let mut file: &File = self;
        Write::write(&mut file, buf).context("Device write failed")
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let mut file: &File = self;
        Read::read(&mut file, buf).context("Device read failed")
    }
}
