//! Slave diagnosis, read via DSAP 60.
//!
//! The mandatory part of a diagnosis response is six bytes: three station status bytes, the
//! address of the parameterising master (255 if none), and the big-endian ident number.
//! Anything beyond that is device specific extended diagnosis, carried through opaquely.

use crate::error::DpError;

bitflags::bitflags! {
    /// Station status byte 1.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct StationStatus1: u8 {
        /// The slave did not answer at all. Set by the master side of a real device; a slave
        /// never sets this about itself.
        const STATION_NON_EXISTENT = 0x01;
        /// The slave is not ready for data exchange yet.
        const STATION_NOT_READY = 0x02;
        /// The configuration check failed.
        const CFG_FAULT = 0x04;
        /// Extended diagnosis data is present.
        const EXT_DIAG = 0x08;
        /// A requested service is not supported.
        const NOT_SUPPORTED = 0x10;
        /// The slave's last response was invalid.
        const INVALID_SLAVE_RESPONSE = 0x20;
        /// The last parameter telegram was faulty.
        const PRM_FAULT = 0x40;
        /// The slave is locked to another master.
        const MASTER_LOCK = 0x80;
    }
}

bitflags::bitflags! {
    /// Station status byte 2.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct StationStatus2: u8 {
        /// The slave demands (re)parameterisation.
        const PRM_REQ = 0x01;
        /// Static diagnosis: the slave cannot provide valid data yet.
        const STAT_DIAG = 0x02;
        /// Always set by a compliant slave.
        const ALWAYS_SET = 0x04;
        /// The response watchdog is active.
        const WD_ON = 0x08;
        /// The slave is in freeze mode.
        const FREEZE_MODE = 0x10;
        /// The slave is in sync mode.
        const SYNC_MODE = 0x20;
        /// The slave has been deactivated by the master.
        const DEACTIVATED = 0x80;
    }
}

bitflags::bitflags! {
    /// Station status byte 3.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct StationStatus3: u8 {
        /// More extended diagnosis exists than fits one telegram.
        const EXT_DIAG_OVERFLOW = 0x80;
    }
}

/// Maximum extended diagnosis payload: a full SD2 data unit minus the mandatory six bytes.
pub const MAX_EXT_DIAG: usize = 238;

/// A parsed slave diagnosis block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlaveDiag {
    /// Station status byte 1.
    pub status_1: StationStatus1,
    /// Station status byte 2.
    pub status_2: StationStatus2,
    /// Station status byte 3.
    pub status_3: StationStatus3,
    /// Address of the master this slave is parameterised by, or 255.
    pub master_address: u8,
    /// The slave's ident number.
    pub ident_number: u16,
    /// Device specific extended diagnosis, raw.
    pub ext_diag: heapless::Vec<u8, MAX_EXT_DIAG>,
}

impl SlaveDiag {
    /// Parse a diagnosis response data unit from `address`.
    pub fn parse(address: u8, du: &[u8]) -> Result<Self, DpError> {
        if du.len() < 6 {
            return Err(DpError::InvalidDiagnosis { address });
        }

        Ok(Self {
            status_1: StationStatus1::from_bits_truncate(du[0]),
            status_2: StationStatus2::from_bits_truncate(du[1]),
            status_3: StationStatus3::from_bits_truncate(du[2]),
            master_address: du[3],
            ident_number: u16::from_be_bytes([du[4], du[5]]),
            ext_diag: heapless::Vec::from_slice(&du[6..])
                .map_err(|_| DpError::InvalidDiagnosis { address })?,
        })
    }

    /// `true` if the slave reports itself present on the bus.
    pub fn exists(&self) -> bool {
        !self.status_1.contains(StationStatus1::STATION_NON_EXISTENT)
    }

    /// `true` if the last parameterisation was rejected.
    pub fn prm_fault(&self) -> bool {
        self.status_1.contains(StationStatus1::PRM_FAULT)
    }

    /// `true` if the last configuration check failed.
    pub fn cfg_fault(&self) -> bool {
        self.status_1.contains(StationStatus1::CFG_FAULT)
    }

    /// `true` if the slave demands (re)parameterisation.
    pub fn prm_req(&self) -> bool {
        self.status_2.contains(StationStatus2::PRM_REQ)
    }

    /// `true` once bring-up may proceed into cyclic data exchange.
    pub fn ready_for_data_exchange(&self) -> bool {
        self.exists()
            && !self.prm_fault()
            && !self.cfg_fault()
            && !self.prm_req()
            && !self.status_1.contains(StationStatus1::STATION_NOT_READY)
            && !self.status_2.contains(StationStatus2::STAT_DIAG)
    }

    /// `true` if the slave reports its response watchdog armed.
    pub fn watchdog_on(&self) -> bool {
        self.status_2.contains(StationStatus2::WD_ON)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_block() {
        // Freshly powered slave: Prm_Req set, no master, ident 0xb757.
        let diag = SlaveDiag::parse(8, &[0x00, 0x05, 0x00, 0xff, 0xb7, 0x57]).unwrap();

        assert!(diag.exists());
        assert!(diag.prm_req());
        assert!(!diag.ready_for_data_exchange());
        assert_eq!(diag.master_address, 255);
        assert_eq!(diag.ident_number, 0xb757);
        assert!(diag.ext_diag.is_empty());
    }

    #[test]
    fn parse_ready_block_with_ext_diag() {
        let diag = SlaveDiag::parse(8, &[0x08, 0x0c, 0x00, 0x02, 0xb7, 0x57, 0x03, 0x42, 0x01])
            .unwrap();

        assert!(diag.ready_for_data_exchange());
        assert!(diag.watchdog_on());
        assert_eq!(diag.ext_diag.as_slice(), &[0x03, 0x42, 0x01]);
    }

    #[test]
    fn short_block_rejected() {
        assert_eq!(
            SlaveDiag::parse(8, &[0x00, 0x04, 0x00]),
            Err(DpError::InvalidDiagnosis { address: 8 })
        );
    }

    #[test]
    fn cfg_fault_wins_over_ready() {
        let diag = SlaveDiag::parse(8, &[0x04, 0x04, 0x00, 0x02, 0xb7, 0x57]).unwrap();

        assert!(diag.cfg_fault());
        assert!(!diag.ready_for_data_exchange());
    }
}
