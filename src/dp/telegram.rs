//! Builders for the DP service telegrams a class 1 master transmits.
//!
//! Management services (diagnosis, Set_Prm, Chk_Cfg) are high priority SRD requests to the
//! slave's fixed service access points; cyclic Data_Exchange runs on the default SAP at low
//! priority, with the slave signalling pending diagnosis by answering with the high priority
//! response status. Global_Control is an unacknowledged multicast.

use crate::{
    dp::sap,
    error::{ConfigError, FdlError},
    fdl::telegram::{
        DataTelegram, DataTelegramHeader, FunctionCode, RequestFunction, BROADCAST_ADDRESS,
    },
};

/// Watchdog time base in milliseconds; the wire carries two factors of it.
pub const WATCHDOG_BASE_MS: u32 = 10;

bitflags::bitflags! {
    /// Station status byte of a Set_Prm request.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct PrmStatus: u8 {
        /// Arm the response watchdog.
        const WD_ON = 0x08;
        /// Put the slave into freeze mode.
        const FREEZE_REQ = 0x10;
        /// Put the slave into sync mode.
        const SYNC_REQ = 0x20;
        /// Release the slave for other masters.
        const UNLOCK_REQ = 0x40;
        /// Lock the slave to this master.
        const LOCK_REQ = 0x80;
    }
}

bitflags::bitflags! {
    /// Control command byte of a Global_Control multicast.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct GlobalControlCommand: u8 {
        /// Outputs are cleared; slaves leave data exchange.
        const CLEAR_DATA = 0x02;
        /// Leave freeze mode.
        const UNFREEZE = 0x04;
        /// Freeze input capture.
        const FREEZE = 0x08;
        /// Leave sync mode.
        const UNSYNC = 0x10;
        /// Latch outputs until the next sync.
        const SYNC = 0x20;
    }
}

/// Split a watchdog period in milliseconds into the two wire factors.
///
/// The slave computes its timeout as `10 ms * factor_1 * factor_2`; the chosen factors are
/// the smallest product that covers `ms`.
pub fn watchdog_factors(ms: u32) -> Result<(u8, u8), ConfigError> {
    let units = ms.div_ceil(WATCHDOG_BASE_MS).max(1);

    if units > 255 * 255 {
        return Err(ConfigError::WatchdogOutOfRange(ms));
    }

    let factor_2 = units.div_ceil(255).max(1);
    let factor_1 = units.div_ceil(factor_2);

    Ok((factor_1 as u8, factor_2 as u8))
}

fn request_header(da: u8, sa: u8, dsap: u8, function: RequestFunction) -> DataTelegramHeader {
    DataTelegramHeader {
        da,
        sa,
        dsap: Some(dsap),
        ssap: Some(sap::CLASS1_SSAP),
        fc: FunctionCode::request(function),
    }
}

/// A Slave_Diagnosis read request.
pub fn slave_diag(da: u8, sa: u8) -> DataTelegram {
    DataTelegram {
        h: request_header(da, sa, sap::SLAVE_DIAG, RequestFunction::SrdHigh),
        pdu: heapless::Vec::new(),
        sd: crate::fdl::telegram::Sd::Sd2,
    }
}

/// A Set_Prm request.
///
/// `user_prm_data` is appended behind the seven mandatory bytes: station status, the two
/// watchdog factors, the minimum station delay the slave may answer with, the expected ident
/// number and the group ident mask.
pub fn set_prm(
    da: u8,
    sa: u8,
    status: PrmStatus,
    watchdog: Option<(u8, u8)>,
    min_tsdr: u8,
    ident_number: u16,
    group_ident: u8,
    user_prm_data: &[u8],
) -> Result<DataTelegram, FdlError> {
    let mut pdu = heapless::Vec::<u8, { crate::fdl::telegram::MAX_PDU }>::new();

    let status = match watchdog {
        Some(_) => status | PrmStatus::WD_ON,
        None => status - PrmStatus::WD_ON,
    };
    let (factor_1, factor_2) = watchdog.unwrap_or((0, 0));

    pdu.push(status.bits()).map_err(|_| FdlError::TooLong)?;
    pdu.push(factor_1).map_err(|_| FdlError::TooLong)?;
    pdu.push(factor_2).map_err(|_| FdlError::TooLong)?;
    pdu.push(min_tsdr).map_err(|_| FdlError::TooLong)?;
    pdu.extend_from_slice(&ident_number.to_be_bytes())
        .map_err(|_| FdlError::TooLong)?;
    pdu.push(group_ident).map_err(|_| FdlError::TooLong)?;
    pdu.extend_from_slice(user_prm_data)
        .map_err(|_| FdlError::TooLong)?;

    DataTelegram::new(
        request_header(da, sa, sap::SET_PRM, RequestFunction::SrdHigh),
        &pdu,
    )
}

/// A Chk_Cfg request carrying the expected configuration identifier bytes.
pub fn chk_cfg(da: u8, sa: u8, cfg_data: &[u8]) -> Result<DataTelegram, FdlError> {
    DataTelegram::new(
        request_header(da, sa, sap::CHK_CFG, RequestFunction::SrdHigh),
        cfg_data,
    )
}

/// A cyclic Data_Exchange request carrying the current output data.
pub fn data_exchange(da: u8, sa: u8, outputs: &[u8]) -> Result<DataTelegram, FdlError> {
    DataTelegram::new(
        DataTelegramHeader {
            da,
            sa,
            dsap: None,
            ssap: None,
            fc: FunctionCode::request(RequestFunction::SrdLow),
        },
        outputs,
    )
}

/// A Global_Control multicast to every slave whose group ident matches `group_select`.
///
/// A `group_select` of zero addresses all slaves.
pub fn global_control(
    sa: u8,
    command: GlobalControlCommand,
    group_select: u8,
) -> Result<DataTelegram, FdlError> {
    DataTelegram::new(
        DataTelegramHeader {
            da: BROADCAST_ADDRESS,
            sa,
            dsap: Some(sap::GLOBAL_CONTROL),
            ssap: Some(sap::CLASS1_SSAP),
            fc: FunctionCode::request(RequestFunction::SdnHigh),
        },
        &[command.bits(), group_select],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn watchdog_factor_products_cover_request() {
        assert_eq!(watchdog_factors(0), Ok((1, 1)));
        assert_eq!(watchdog_factors(10), Ok((1, 1)));
        assert_eq!(watchdog_factors(200), Ok((20, 1)));
        assert_eq!(watchdog_factors(2_550), Ok((255, 1)));
        assert_eq!(watchdog_factors(2_560), Ok((128, 2)));
        assert_eq!(watchdog_factors(650_250), Ok((255, 255)));
        assert_eq!(
            watchdog_factors(651_000),
            Err(ConfigError::WatchdogOutOfRange(651_000))
        );

        // The product always covers the requested period.
        for ms in [1, 9, 11, 123, 4_567, 123_456] {
            let (f1, f2) = watchdog_factors(ms).unwrap();

            assert!(u32::from(f1) * u32::from(f2) * WATCHDOG_BASE_MS >= ms);
        }
    }

    #[test]
    fn set_prm_layout() {
        let telegram = set_prm(
            8,
            2,
            PrmStatus::LOCK_REQ,
            Some((25, 1)),
            11,
            0xb757,
            0x01,
            &[0xde, 0xad],
        )
        .unwrap();

        assert_eq!(telegram.h.dsap, Some(61));
        assert_eq!(telegram.h.ssap, Some(62));
        assert_eq!(
            telegram.pdu.as_slice(),
            &[0x88, 25, 1, 11, 0xb7, 0x57, 0x01, 0xde, 0xad]
        );
    }

    #[test]
    fn set_prm_without_watchdog_clears_wd_on() {
        let telegram = set_prm(
            8,
            2,
            PrmStatus::LOCK_REQ | PrmStatus::WD_ON,
            None,
            0,
            0xb757,
            0,
            &[],
        )
        .unwrap();

        assert_eq!(telegram.pdu[0], 0x80);
        assert_eq!(&telegram.pdu[1..3], &[0, 0]);
    }

    #[test]
    fn global_control_is_broadcast() {
        let telegram = global_control(2, GlobalControlCommand::SYNC, 0x04).unwrap();

        assert_eq!(telegram.h.da, BROADCAST_ADDRESS);
        assert_eq!(telegram.h.dsap, Some(57));
        assert_eq!(telegram.pdu.as_slice(), &[0x20, 0x04]);
    }

    #[test]
    fn data_exchange_uses_default_sap() {
        let telegram = data_exchange(8, 2, &[0xaa, 0x55]).unwrap();

        assert_eq!(telegram.h.dsap, None);
        assert_eq!(telegram.h.ssap, None);
        assert_eq!(telegram.pdu.as_slice(), &[0xaa, 0x55]);
    }
}
