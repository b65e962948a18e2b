//! Physical layer: transmit and receive raw telegram characters over an asynchronous serial
//! line.
//!
//! PROFIBUS uses an 11 bit UART character: 1 start bit, 8 data bits, even parity, 1 stop bit.
//! The PHY owns the two timing duties that cannot live anywhere else:
//!
//! - Before any transmission the line must have been idle for at least Tsyn (33 bit times).
//!   [`Phy::send`] blocks until the synchronisation period has elapsed.
//! - Received characters are timestamped so the upper layers can measure slot times and detect
//!   stalled frames.
//!
//! The bus is half duplex; a driver must never start transmitting while a reception is in
//! progress. Satisfying the Tsyn idle requirement implies this.

#[cfg(feature = "std")]
pub mod serial;
pub mod simulator;

use crate::{
    baud::{Baudrate, TSYN_BITS},
    error::PhyError,
};

/// One received character and the monotonic time at which it arrived.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RxByte {
    /// The character value.
    pub byte: u8,
    /// Arrival time in microseconds on the PHY's monotonic clock.
    pub timestamp_us: u64,
}

/// Observable PHY statistics.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PhyCounters {
    /// Characters transmitted.
    pub tx_bytes: u64,
    /// Characters received.
    pub rx_bytes: u64,
    /// Characters dropped due to parity or stop bit errors.
    pub framing_errors: u32,
    /// Characters discarded by [`Phy::flush_rx`].
    pub flushed_bytes: u32,
}

/// A PROFIBUS transceiver.
///
/// Implementations: [`serial::SerialPhy`] for a real RS-485 port (`std` only) and the
/// [`simulator`] drivers used by tests and demos. An FPGA offload transceiver would sit behind
/// this same trait but is a separate project.
///
/// All times are microseconds on a monotonic clock owned by the driver. The simulator drivers
/// use a virtual clock which only advances when the bus is used, making timing behaviour fully
/// deterministic under test.
pub trait Phy {
    /// Open the underlying device.
    fn open(&mut self) -> Result<(), PhyError>;

    /// Close the underlying device. Idempotent.
    fn close(&mut self);

    /// `true` if the device is open.
    fn is_open(&self) -> bool;

    /// The configured baud rate.
    fn baudrate(&self) -> Baudrate;

    /// Current time in microseconds on this driver's monotonic clock.
    fn now_us(&self) -> u64;

    /// Transmit one complete telegram.
    ///
    /// Blocks until the line has been idle for Tsyn, then writes all of `telegram`. The time
    /// at which the last character left the wire is recorded and readable via
    /// [`Phy::last_tx_end_us`].
    fn send(&mut self, telegram: &[u8]) -> Result<(), PhyError>;

    /// Take the next received character, if any.
    ///
    /// Never blocks for longer than roughly one character time. Returns `Ok(None)` when no
    /// character is pending.
    fn poll(&mut self) -> Result<Option<RxByte>, PhyError>;

    /// Discard any pending received characters.
    fn flush_rx(&mut self);

    /// Switch the RS-485 driver direction, where the hardware requires it.
    ///
    /// Drivers with automatic direction control ignore this.
    fn set_tx_enable(&mut self, _enable: bool) -> Result<(), PhyError> {
        Ok(())
    }

    /// Monotonic time at which the last character of the last transmission left the wire.
    fn last_tx_end_us(&self) -> u64;

    /// Statistics counters.
    fn counters(&self) -> PhyCounters;
}

/// Tracks line activity to answer "has the line been idle for Tsyn yet?".
///
/// Embedded by drivers; not part of the public API surface beyond this module.
#[derive(Debug, Copy, Clone)]
pub(crate) struct LineMonitor {
    tsyn_us: u64,
    last_edge_us: u64,
    last_tx_end_us: u64,
}

impl LineMonitor {
    pub(crate) fn new(baudrate: Baudrate) -> Self {
        Self {
            tsyn_us: baudrate.bits_to_us(TSYN_BITS),
            last_edge_us: 0,
            last_tx_end_us: 0,
        }
    }

    /// Record bus activity (a received character or our own transmission) at `now_us`.
    pub(crate) fn note_activity(&mut self, now_us: u64) {
        self.last_edge_us = self.last_edge_us.max(now_us);
    }

    /// Record the end of our own transmission.
    pub(crate) fn note_tx_end(&mut self, now_us: u64) {
        self.last_tx_end_us = now_us;
        self.note_activity(now_us);
    }

    pub(crate) fn last_tx_end_us(&self) -> u64 {
        self.last_tx_end_us
    }

    /// Microseconds of idle still required before a transmission may start. Zero means the
    /// synchronisation period has elapsed.
    pub(crate) fn sync_remaining_us(&self, now_us: u64) -> u64 {
        let idle_end = self.last_edge_us + self.tsyn_us;

        idle_end.saturating_sub(now_us)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_window_tracks_last_edge() {
        let mut monitor = LineMonitor::new(Baudrate::B500000);

        // Tsyn at 500 kBd is 66 us.
        monitor.note_activity(1_000);

        assert_eq!(monitor.sync_remaining_us(1_000), 66);
        assert_eq!(monitor.sync_remaining_us(1_050), 16);
        assert_eq!(monitor.sync_remaining_us(1_066), 0);
        assert_eq!(monitor.sync_remaining_us(2_000), 0);
    }

    #[test]
    fn activity_never_moves_backwards() {
        let mut monitor = LineMonitor::new(Baudrate::B500000);

        monitor.note_activity(5_000);
        monitor.note_activity(4_000);

        assert_eq!(monitor.sync_remaining_us(5_000), 66);
    }
}
