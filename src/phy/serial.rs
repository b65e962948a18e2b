//! Blocking RS-485 serial port transceiver, built on the `serialport` crate.
//!
//! The port is configured for the PROFIBUS character format: 8 data bits, even parity, one
//! stop bit. Reads use a one millisecond timeout so [`SerialPhy::poll`] never blocks for
//! longer than roughly a character time at the slow end of the baud range.
//!
//! Parity errors are not reported per character by the OS serial layer; a corrupted character
//! reaches the decoder and is caught by the frame checksum instead.

use crate::{
    baud::Baudrate,
    error::PhyError,
    fmt,
    phy::{LineMonitor, Phy, PhyCounters, RxByte},
};
use std::{
    collections::VecDeque,
    io::{Read, Write},
    time::{Duration, Instant},
};

const READ_TIMEOUT: Duration = Duration::from_millis(1);

/// A PROFIBUS transceiver on a serial port device.
pub struct SerialPhy {
    path: String,
    baudrate: Baudrate,
    port: Option<Box<dyn serialport::SerialPort>>,
    epoch: Instant,
    monitor: LineMonitor,
    queue: VecDeque<RxByte>,
    counters: PhyCounters,
}

impl SerialPhy {
    /// Create a driver for `path`. The device is not touched until [`Phy::open`].
    pub fn new(path: &str, baudrate: Baudrate) -> Self {
        Self {
            path: path.to_string(),
            baudrate,
            port: None,
            epoch: Instant::now(),
            monitor: LineMonitor::new(baudrate),
            queue: VecDeque::new(),
            counters: PhyCounters::default(),
        }
    }

    /// Device path this driver was created for.
    pub fn path(&self) -> &str {
        &self.path
    }

    fn clock_us(epoch: &Instant) -> u64 {
        epoch.elapsed().as_micros() as u64
    }

    /// Pull everything the OS has buffered into our timestamped queue.
    fn fill_rx(&mut self) -> Result<(), PhyError> {
        let port = self.port.as_mut().ok_or(PhyError::NotOpen)?;

        let mut buf = [0u8; 256];

        match port.read(&mut buf) {
            Ok(0) => Ok(()),
            Ok(n) => {
                let now = Self::clock_us(&self.epoch);

                self.monitor.note_activity(now);
                self.counters.rx_bytes += n as u64;

                for byte in &buf[..n] {
                    self.queue.push_back(RxByte {
                        byte: *byte,
                        timestamp_us: now,
                    });
                }

                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => Ok(()),
            Err(e) => {
                fmt::error!("serial read failed: {}", e);

                Err(PhyError::Io)
            }
        }
    }
}

impl core::fmt::Debug for SerialPhy {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SerialPhy")
            .field("path", &self.path)
            .field("baudrate", &self.baudrate)
            .field("open", &self.port.is_some())
            .finish()
    }
}

impl Phy for SerialPhy {
    fn open(&mut self) -> Result<(), PhyError> {
        if self.port.is_some() {
            return Ok(());
        }

        let port = serialport::new(self.path.as_str(), self.baudrate.bits_per_second())
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::Even)
            .stop_bits(serialport::StopBits::One)
            .timeout(READ_TIMEOUT)
            .open()
            .map_err(|e| {
                fmt::error!("failed to open {}: {}", self.path, e);

                PhyError::Open
            })?;

        fmt::info!("opened {} at {}", self.path, self.baudrate);

        self.port = Some(port);

        Ok(())
    }

    fn close(&mut self) {
        self.port = None;
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn baudrate(&self) -> Baudrate {
        self.baudrate
    }

    fn now_us(&self) -> u64 {
        Self::clock_us(&self.epoch)
    }

    fn send(&mut self, telegram: &[u8]) -> Result<(), PhyError> {
        if self.port.is_none() {
            return Err(PhyError::NotOpen);
        }

        // Wait out the synchronisation period, watching for late arrivals which restart it.
        loop {
            self.fill_rx()?;

            let remaining = self.monitor.sync_remaining_us(self.now_us());

            if remaining == 0 {
                break;
            }

            std::thread::sleep(Duration::from_micros(remaining.min(1_000)));
        }

        let port = self.port.as_mut().ok_or(PhyError::NotOpen)?;

        port.write_all(telegram).map_err(|e| {
            fmt::error!("serial write failed: {}", e);

            PhyError::Io
        })?;

        // Blocks until the UART has drained, so "now" is the end of our last character.
        port.flush().map_err(|_| PhyError::Io)?;

        self.counters.tx_bytes += telegram.len() as u64;
        self.monitor.note_tx_end(Self::clock_us(&self.epoch));

        Ok(())
    }

    fn poll(&mut self) -> Result<Option<RxByte>, PhyError> {
        if self.queue.is_empty() {
            self.fill_rx()?;
        }

        Ok(self.queue.pop_front())
    }

    fn flush_rx(&mut self) {
        self.counters.flushed_bytes += self.queue.len() as u32;
        self.queue.clear();

        if let Some(port) = self.port.as_mut() {
            let _ = port.clear(serialport::ClearBuffer::Input);
        }
    }

    fn set_tx_enable(&mut self, enable: bool) -> Result<(), PhyError> {
        let port = self.port.as_mut().ok_or(PhyError::NotOpen)?;

        port.write_request_to_send(enable).map_err(|_| PhyError::Io)
    }

    fn last_tx_end_us(&self) -> u64 {
        self.monitor.last_tx_end_us()
    }

    fn counters(&self) -> PhyCounters {
        self.counters
    }
}
