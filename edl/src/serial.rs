// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) Qualcomm Technologies, Inc. and/or its subsidiaries.
use anyhow::{Result, bail};
use owo_colors::OwoColorize;
use serial2::{self, SerialPort};
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

use crate::types::EdlReadWrite;

const EDL_BAUD_RATE: u32 = 115200;

/// How many back-to-back read timeouts we tolerate before declaring the
/// device gone. Any successful read resets the count.
const WATCHDOG_STRIKES: u8 = 3;

pub struct EdlSerialConfig {
    serport: SerialPort,
    dev_path: String,
    read_timeout: Duration,
    connected: bool,
    strikes: u8,
}

fn open_port(dev_path: &str, read_timeout: Duration) -> io::Result<SerialPort> {
    let mut serport = SerialPort::open(dev_path, |mut settings: serial2::Settings| {
        settings.set_raw();
        settings.set_baud_rate(EDL_BAUD_RATE)?;
        Ok(settings)
    })?;
    serport.set_read_timeout(read_timeout)?;
    Ok(serport)
}

impl Write for EdlSerialConfig {
    fn write(&mut self, buf: &[u8]) -> Result<usize, std::io::Error> {
        if !self.connected {
            return Err(io::ErrorKind::NotConnected.into());
        }
        self.serport.write(buf)
    }

    fn flush(&mut self) -> Result<(), std::io::Error> {
        self.serport.flush()
    }
}

impl Read for EdlSerialConfig {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, std::io::Error> {
        if !self.connected {
            return Err(io::ErrorKind::NotConnected.into());
        }

        match self.serport.read(buf) {
            Ok(n) => {
                self.strikes = 0;
                Ok(n)
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
                self.strikes += 1;
                anstream::eprintln!(
                    "{} no data from the device for {:?} ({}/{})",
                    "watchdog:".yellow(),
                    self.read_timeout,
                    self.strikes,
                    WATCHDOG_STRIKES
                );
                if self.strikes >= WATCHDOG_STRIKES {
                    self.connected = false;
                    return Err(io::ErrorKind::NotConnected.into());
                }
                Err(e)
            }
            Err(e) => {
                self.connected = false;
                Err(e)
            }
        }
    }
}

impl EdlReadWrite for EdlSerialConfig {
    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.read_timeout = timeout;
        self.serport.set_read_timeout(timeout)
    }

    fn purge(&mut self) -> io::Result<()> {
        self.serport.discard_buffers()
    }

    fn drain(&mut self, window: Duration) -> io::Result<usize> {
        let deadline = Instant::now() + window;
        let mut scratch = [0u8; 4096];
        let mut discarded = 0;

        self.serport.set_read_timeout(Duration::from_millis(50))?;
        while Instant::now() < deadline {
            match self.serport.read(&mut scratch) {
                Ok(0) => break,
                Ok(n) => discarded += n,
                Err(e)
                    if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) =>
                {
                    continue;
                }
                Err(e) => {
                    self.serport.set_read_timeout(self.read_timeout)?;
                    return Err(e);
                }
            }
        }
        self.serport.set_read_timeout(self.read_timeout)?;

        Ok(discarded)
    }

    fn reopen(&mut self, purge: bool) -> io::Result<()> {
        self.serport = open_port(&self.dev_path, self.read_timeout)?;
        if purge {
            self.serport.discard_buffers()?;
        }
        self.connected = true;
        self.strikes = 0;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

pub fn setup_serial_device(
    dev_path: Option<String>,
    purge: bool,
    read_timeout: Duration,
) -> Result<EdlSerialConfig> {
    let Some(dev_path) = dev_path else {
        bail!("Serial port path unspecified");
    };

    let serport = open_port(&dev_path, read_timeout)?;
    if purge {
        serport.discard_buffers()?;
    }

    Ok(EdlSerialConfig {
        serport,
        dev_path,
        read_timeout,
        connected: true,
        strikes: 0,
    })
}
