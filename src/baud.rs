//! Bus timing parameters, derived once per baud rate change.
//!
//! PROFIBUS timing is specified in *bit times*: the duration of one bit on the wire at the
//! configured baud rate. A character occupies 11 bit times (1 start, 8 data, even parity, 1
//! stop). All waits in the stack are bounded by values derived here; wall-clock time is never
//! used, only a monotonic microsecond clock provided by the PHY.

use crate::error::ConfigError;

/// Number of bit times one UART character occupies on the wire.
pub const BITS_PER_CHAR: u32 = 11;

/// Synchronisation time: the line must be idle for this many bit times before a new request or
/// token may be transmitted.
pub const TSYN_BITS: u32 = 33;

/// A standard PROFIBUS baud rate, 9.6 kBd to 12 MBd.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Baudrate {
    /// 9.6 kBd.
    B9600,
    /// 19.2 kBd.
    B19200,
    /// 45.45 kBd (PROFIBUS PA segment couplers).
    B45450,
    /// 93.75 kBd.
    B93750,
    /// 187.5 kBd.
    B187500,
    /// 500 kBd.
    B500000,
    /// 1.5 MBd.
    B1500000,
    /// 3 MBd.
    B3000000,
    /// 6 MBd.
    B6000000,
    /// 12 MBd.
    B12000000,
}

impl Baudrate {
    /// All standard rates, slowest first.
    pub const ALL: [Baudrate; 10] = [
        Baudrate::B9600,
        Baudrate::B19200,
        Baudrate::B45450,
        Baudrate::B93750,
        Baudrate::B187500,
        Baudrate::B500000,
        Baudrate::B1500000,
        Baudrate::B3000000,
        Baudrate::B6000000,
        Baudrate::B12000000,
    ];

    /// This rate in bits per second.
    pub const fn bits_per_second(self) -> u32 {
        match self {
            Baudrate::B9600 => 9_600,
            Baudrate::B19200 => 19_200,
            Baudrate::B45450 => 45_450,
            Baudrate::B93750 => 93_750,
            Baudrate::B187500 => 187_500,
            Baudrate::B500000 => 500_000,
            Baudrate::B1500000 => 1_500_000,
            Baudrate::B3000000 => 3_000_000,
            Baudrate::B6000000 => 6_000_000,
            Baudrate::B12000000 => 12_000_000,
        }
    }

    /// Look up a standard rate from a plain bits per second value.
    pub fn from_bits_per_second(baud: u32) -> Result<Self, ConfigError> {
        Self::ALL
            .into_iter()
            .find(|rate| rate.bits_per_second() == baud)
            .ok_or(ConfigError::BaudUnsupported(baud))
    }

    /// Duration of `bits` bit times in microseconds, rounded up.
    pub const fn bits_to_us(self, bits: u32) -> u64 {
        let baud = self.bits_per_second() as u64;

        (bits as u64 * 1_000_000).div_ceil(baud)
    }

    /// Duration of one 11 bit UART character in microseconds, rounded up.
    pub const fn char_us(self) -> u64 {
        self.bits_to_us(BITS_PER_CHAR)
    }

    /// Time taken to transmit `len` characters, in microseconds, rounded up.
    pub const fn frame_us(self, len: usize) -> u64 {
        self.bits_to_us(BITS_PER_CHAR * len as u32)
    }
}

impl core::fmt::Display for Baudrate {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} Bd", self.bits_per_second())
    }
}

/// Per-master timing profile, all values in bit times.
///
/// [`BusTiming::for_baudrate`] gives the defaults for each standard rate. The fields are public
/// so a profile can be adjusted for a bus with repeaters or particularly slow responders before
/// it is handed to the master.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BusTiming {
    /// The baud rate this profile was derived for.
    pub baudrate: Baudrate,

    /// Slot time Tsl: maximum wait from the end of a request to the start of the response.
    pub slot_bits: u32,

    /// Minimum station delay of responders Tsdr_min.
    ///
    /// Observed on the bus but not enforced by a master, which only ever initiates.
    pub min_tsdr_bits: u32,

    /// Maximum station delay of responders Tsdr_max: a responder silent for longer is treated
    /// as absent.
    pub max_tsdr_bits: u32,

    /// Quiet time Tqui: transmitter fall time / repeater switchover time after reception.
    pub quiet_bits: u32,

    /// Setup time Tset: reaction time between an event and the associated action.
    pub setup_bits: u32,
}

impl BusTiming {
    /// Default timing profile for a standard baud rate.
    pub const fn for_baudrate(baudrate: Baudrate) -> Self {
        let (slot_bits, max_tsdr_bits, quiet_bits, setup_bits) = match baudrate {
            Baudrate::B9600
            | Baudrate::B19200
            | Baudrate::B45450
            | Baudrate::B93750
            | Baudrate::B187500 => (100, 60, 0, 1),
            Baudrate::B500000 => (200, 100, 0, 1),
            Baudrate::B1500000 => (300, 150, 0, 1),
            Baudrate::B3000000 => (400, 250, 3, 4),
            Baudrate::B6000000 => (600, 450, 6, 8),
            Baudrate::B12000000 => (1000, 800, 9, 16),
        };

        Self {
            baudrate,
            slot_bits,
            min_tsdr_bits: 11,
            max_tsdr_bits,
            quiet_bits,
            setup_bits,
        }
    }

    /// Synchronisation idle period Tsyn in microseconds.
    pub const fn tsyn_us(&self) -> u64 {
        self.baudrate.bits_to_us(TSYN_BITS)
    }

    /// Slot time in microseconds.
    pub const fn slot_us(&self) -> u64 {
        self.baudrate.bits_to_us(self.slot_bits)
    }

    /// Quiet time in microseconds.
    pub const fn quiet_us(&self) -> u64 {
        self.baudrate.bits_to_us(self.quiet_bits)
    }

    /// Inter-character timeout for an in-flight telegram, in microseconds.
    ///
    /// If a frame stalls for longer than Tqui + Tsl mid-reception, the partial frame is
    /// dropped and the receiver resynchronises.
    pub const fn rx_timeout_us(&self) -> u64 {
        self.baudrate.bits_to_us(self.quiet_bits + self.slot_bits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_rate_lookup() {
        assert_eq!(
            Baudrate::from_bits_per_second(19_200),
            Ok(Baudrate::B19200)
        );
        assert_eq!(
            Baudrate::from_bits_per_second(115_200),
            Err(ConfigError::BaudUnsupported(115_200))
        );
    }

    #[test]
    fn bit_times_round_up() {
        // 33 bits at 19.2 kBd is 1718.75 us on the wire.
        assert_eq!(Baudrate::B19200.bits_to_us(33), 1719);
        // One character at 12 MBd is 916.67 ns; must never round to zero.
        assert_eq!(Baudrate::B12000000.char_us(), 1);
    }

    #[test]
    fn default_profile_scales_with_rate() {
        let slow = BusTiming::for_baudrate(Baudrate::B187500);
        let fast = BusTiming::for_baudrate(Baudrate::B12000000);

        assert_eq!(slow.slot_bits, 100);
        assert_eq!(fast.slot_bits, 1000);
        assert!(fast.max_tsdr_bits > slow.max_tsdr_bits);

        // Tsyn is 33 bit times regardless of rate.
        assert_eq!(slow.tsyn_us(), Baudrate::B187500.bits_to_us(33));
    }
}
