//! One DP slave: its immutable description and its live bring-up/data-exchange state.
//!
//! The state machine is driven by [`DpMaster::tick`](crate::dp::master::DpMaster::tick); each
//! step issues at most one FDL request and applies the outcome:
//!
//! ```text
//! OFFLINE -> INIT -> WAIT_DIAG -> WAIT_PRM -> WAIT_CFG -> WAIT_DIAG2 -> DATA_EX <-> DIAG_EX
//!               ^                                                          |
//!               |                                                          v (watchdog)
//!               +------------------ FAULT (cooldown) <---------+      WAIT_DIAG
//! ```
//!
//! Transitions are strictly serial per slave. Every hard failure lands in `FAULT`, which
//! re-enters `INIT` after a cooldown; the exception is a "no resources" answer during data
//! exchange, which means the slave's watchdog expired and it merely needs to be
//! reparameterised, starting from `WAIT_DIAG`.

use crate::{
    dp::{
        diag::SlaveDiag,
        master::DpMasterConfig,
        telegram::{self, watchdog_factors, PrmStatus},
    },
    error::{ConfigError, DpError, Error, FdlError},
    fdl::{
        station::FdlStation,
        telegram::{
            DataTelegram, FunctionCode, ResponseStatus, StationType, Telegram,
            MAX_PDU, MAX_STATION_ADDRESS,
        },
    },
    fmt,
    phy::Phy,
};

/// Maximum user parameter data in a Set_Prm request: a full data unit minus the seven
/// mandatory parameter bytes.
pub const MAX_USER_PRM_DATA: usize = 237;

/// Rounds of readiness polling after Chk_Cfg before the slave is declared faulty.
const READY_POLL_LIMIT: u8 = 8;

/// Immutable description of one slave, assembled from its device description and the bus
/// configuration. Owned by the master for its lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlaveDesc {
    /// Station address, 0..=125.
    pub address: u8,
    /// Expected ident number, from the device description.
    pub ident_number: u16,
    /// User parameter data appended to Set_Prm.
    pub user_prm_data: heapless::Vec<u8, MAX_USER_PRM_DATA>,
    /// Configuration identifier bytes sent in Chk_Cfg.
    pub cfg_data: heapless::Vec<u8, MAX_PDU>,
    /// Expected input size in bytes.
    pub input_len: u8,
    /// Output size in bytes.
    pub output_len: u8,
    /// Response watchdog period in milliseconds; 0 disables the watchdog.
    pub watchdog_ms: u32,
    /// Group ident mask for Global_Control addressing.
    pub group_ident: u8,
    /// Request sync mode during parameterisation.
    pub sync_mode: bool,
    /// Request freeze mode during parameterisation.
    pub freeze_mode: bool,
    /// The device supports sync mode.
    pub sync_supported: bool,
    /// The device supports freeze mode.
    pub freeze_supported: bool,
    /// Smallest station delay the slave may respond with, in bit times; 0 keeps the device
    /// default.
    pub min_tsdr: u8,
    /// Read diagnosis every this many successful data exchanges; 0 reads only on demand.
    pub diag_period: u32,
    /// Human readable station name.
    pub name: Option<heapless::String<32>>,
}

impl SlaveDesc {
    /// A minimal descriptor; everything else starts zeroed/disabled.
    pub fn new(address: u8, ident_number: u16) -> Self {
        Self {
            address,
            ident_number,
            user_prm_data: heapless::Vec::new(),
            cfg_data: heapless::Vec::new(),
            input_len: 0,
            output_len: 0,
            watchdog_ms: 0,
            group_ident: 0,
            sync_mode: false,
            freeze_mode: false,
            sync_supported: false,
            freeze_supported: false,
            min_tsdr: 0,
            diag_period: 0,
            name: None,
        }
    }

    /// Validate internal consistency. Called by the master when the slave is registered.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.address > MAX_STATION_ADDRESS {
            return Err(ConfigError::AddressOutOfRange(self.address));
        }
        if self.sync_mode && !self.sync_supported {
            return Err(ConfigError::SyncUnsupported);
        }
        if self.freeze_mode && !self.freeze_supported {
            return Err(ConfigError::FreezeUnsupported);
        }
        if self.watchdog_ms > 0 {
            watchdog_factors(self.watchdog_ms)?;
        }

        Ok(())
    }

    /// The station status byte for this slave's Set_Prm request.
    fn prm_status(&self) -> PrmStatus {
        let mut status = PrmStatus::LOCK_REQ;

        if self.sync_mode {
            status |= PrmStatus::SYNC_REQ;
        }
        if self.freeze_mode {
            status |= PrmStatus::FREEZE_REQ;
        }

        status
    }
}

/// Bring-up and exchange state of one slave.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum DpSlaveState {
    /// Not being driven; the master is not initialised or has shut down.
    #[default]
    Offline,
    /// Probing the slave with FDL status requests.
    Init,
    /// Reading initial diagnosis.
    WaitDiag,
    /// Parameterising via Set_Prm.
    WaitPrm,
    /// Checking configuration via Chk_Cfg.
    WaitCfg,
    /// Polling diagnosis until the slave confirms readiness.
    WaitDiag2,
    /// Cyclic data exchange.
    DataExchange,
    /// Reading diagnosis, returning to data exchange afterwards.
    DiagExchange,
    /// Faulted; re-enters `Init` after the cooldown.
    Fault,
}

impl core::fmt::Display for DpSlaveState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            DpSlaveState::Offline => "Offline",
            DpSlaveState::Init => "Init",
            DpSlaveState::WaitDiag => "Wait Diag",
            DpSlaveState::WaitPrm => "Wait Prm",
            DpSlaveState::WaitCfg => "Wait Cfg",
            DpSlaveState::WaitDiag2 => "Wait Diag 2",
            DpSlaveState::DataExchange => "Data Exchange",
            DpSlaveState::DiagExchange => "Diag Exchange",
            DpSlaveState::Fault => "Fault",
        };

        f.write_str(s)
    }
}

/// A registered slave: description plus live state. Lives in the master's slave arena.
#[derive(Debug)]
pub struct DpSlave {
    desc: SlaveDesc,
    state: DpSlaveState,
    /// Output process data, written by the application, snapshotted at request build time.
    outputs: heapless::Vec<u8, MAX_PDU>,
    /// Input process data, latched whole-frame on reception.
    inputs: heapless::Vec<u8, MAX_PDU>,
    last_diag: Option<SlaveDiag>,
    ready_polls: u8,
    faults_in_row: u8,
    dx_since_diag: u32,
    diag_requested: bool,
    watchdog_confirmed: bool,
    fault_entered_us: u64,
}

impl DpSlave {
    pub(crate) fn new(desc: SlaveDesc) -> Self {
        let mut outputs = heapless::Vec::new();

        // Outputs start as all zeroes until the application writes real data. The length is
        // validated against the data unit limit before a slave is registered.
        outputs.resize(usize::from(desc.output_len), 0).ok();

        Self {
            desc,
            state: DpSlaveState::Offline,
            outputs,
            inputs: heapless::Vec::new(),
            last_diag: None,
            ready_polls: 0,
            faults_in_row: 0,
            dx_since_diag: 0,
            diag_requested: false,
            watchdog_confirmed: false,
            fault_entered_us: 0,
        }
    }

    /// This slave's description.
    pub fn desc(&self) -> &SlaveDesc {
        &self.desc
    }

    /// Current bring-up/exchange state.
    pub fn state(&self) -> DpSlaveState {
        self.state
    }

    /// `true` while bring-up is in progress.
    pub fn is_connecting(&self) -> bool {
        matches!(
            self.state,
            DpSlaveState::Init
                | DpSlaveState::WaitDiag
                | DpSlaveState::WaitPrm
                | DpSlaveState::WaitCfg
                | DpSlaveState::WaitDiag2
        )
    }

    /// `true` while the slave is in cyclic operation.
    pub fn is_connected(&self) -> bool {
        matches!(
            self.state,
            DpSlaveState::DataExchange | DpSlaveState::DiagExchange
        )
    }

    /// Latest input process data. Either a complete frame or empty before the first
    /// exchange; never a partial mix.
    pub fn inputs(&self) -> &[u8] {
        &self.inputs
    }

    /// Write output process data for the next exchanges. Must match the configured output
    /// size exactly.
    pub fn set_outputs(&mut self, data: &[u8]) -> Result<(), Error> {
        if data.len() != usize::from(self.desc.output_len) {
            return Err(DpError::OutputLengthMismatch {
                address: self.desc.address,
                expected: self.desc.output_len,
                received: data.len() as u8,
            }
            .into());
        }

        self.outputs = heapless::Vec::from_slice(data).map_err(|_| Error::Internal)?;

        Ok(())
    }

    /// The last diagnosis block read from the slave.
    pub fn last_diagnosis(&self) -> Option<&SlaveDiag> {
        self.last_diag.as_ref()
    }

    /// Consecutive hard faults without an intervening successful exchange.
    pub fn consecutive_faults(&self) -> u8 {
        self.faults_in_row
    }

    /// `true` once the slave's diagnosis confirmed the response watchdog armed.
    pub fn watchdog_confirmed(&self) -> bool {
        self.watchdog_confirmed
    }

    pub(crate) fn set_offline(&mut self) {
        self.state = DpSlaveState::Offline;
        self.reset_runtime();
    }

    pub(crate) fn go_online(&mut self) {
        if self.state == DpSlaveState::Offline {
            self.state = DpSlaveState::Init;
        }
    }

    fn reset_runtime(&mut self) {
        self.ready_polls = 0;
        self.dx_since_diag = 0;
        self.diag_requested = false;
        self.watchdog_confirmed = false;
    }

    fn enter_fault(&mut self, now_us: u64) {
        self.faults_in_row = self.faults_in_row.saturating_add(1);
        self.fault_entered_us = now_us;
        self.state = DpSlaveState::Fault;
        self.reset_runtime();

        fmt::log_warn!(
            "slave {} faulted ({} in a row)",
            self.desc.address,
            self.faults_in_row
        );
    }

    /// Drive the state machine one step, issuing at most one FDL request.
    ///
    /// Returns `true` if the state changed. Per-slave failures are absorbed into the `Fault`
    /// state; only unrecoverable conditions (PHY gone, internal errors) propagate.
    pub(crate) fn step<P: Phy>(
        &mut self,
        fdl: &mut FdlStation<P>,
        config: &DpMasterConfig,
    ) -> Result<bool, Error> {
        let entry_state = self.state;

        match self.state {
            DpSlaveState::Offline => {}
            DpSlaveState::Fault => {
                let now = fdl.phy().now_us();

                if now.saturating_sub(self.fault_entered_us) >= config.fault_cooldown_us {
                    fmt::info!("slave {} retrying after fault cooldown", self.desc.address);

                    self.state = DpSlaveState::Init;
                }
            }
            DpSlaveState::Init => self.step_init(fdl, config)?,
            DpSlaveState::WaitDiag | DpSlaveState::WaitDiag2 | DpSlaveState::DiagExchange => {
                self.step_diag(fdl, config)?
            }
            DpSlaveState::WaitPrm => self.step_prm(fdl, config)?,
            DpSlaveState::WaitCfg => self.step_cfg(fdl, config)?,
            DpSlaveState::DataExchange => self.step_data_exchange(fdl, config)?,
        }

        Ok(self.state != entry_state)
    }

    fn step_init<P: Phy>(
        &mut self,
        fdl: &mut FdlStation<P>,
        config: &DpMasterConfig,
    ) -> Result<(), Error> {
        let request = DataTelegram::fdl_status_request(self.desc.address, fdl.address());

        match fdl.transact(&request, config.retries) {
            Ok(Some(Telegram::Data(t)))
                if matches!(
                    t.h.fc,
                    FunctionCode::Response {
                        status: ResponseStatus::Ok,
                        station: StationType::Slave,
                    }
                ) =>
            {
                fmt::debug!("slave {} is alive, reading diagnosis", self.desc.address);

                // Fresh contact: restart frame count tracking for this peer.
                fdl.reset_fcb(self.desc.address);
                self.state = DpSlaveState::WaitDiag;

                Ok(())
            }
            Ok(_) => {
                self.enter_fault(fdl.phy().now_us());

                Ok(())
            }
            Err(Error::Fdl(_)) => {
                // Nobody home (yet). Fault cooldown paces the probing.
                self.enter_fault(fdl.phy().now_us());

                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn step_diag<P: Phy>(
        &mut self,
        fdl: &mut FdlStation<P>,
        config: &DpMasterConfig,
    ) -> Result<(), Error> {
        let request = telegram::slave_diag(self.desc.address, fdl.address());

        let diag = match fdl.transact(&request, config.retries) {
            Ok(Some(Telegram::Data(t)))
                if t.response_status().is_some_and(|s| s.carries_data()) =>
            {
                match SlaveDiag::parse(self.desc.address, &t.pdu) {
                    Ok(diag) => diag,
                    Err(e) => {
                        fmt::log_warn!("slave {} diagnosis invalid: {}", self.desc.address, e);

                        self.enter_fault(fdl.phy().now_us());

                        return Ok(());
                    }
                }
            }
            Ok(_) | Err(Error::Fdl(_)) => {
                self.enter_fault(fdl.phy().now_us());

                return Ok(());
            }
            Err(e) => return Err(e),
        };

        self.watchdog_confirmed = diag.watchdog_on();

        match self.state {
            DpSlaveState::WaitDiag => {
                if !diag.exists() {
                    fmt::log_warn!("slave {} reports itself non-existent", self.desc.address);

                    self.enter_fault(fdl.phy().now_us());
                } else {
                    // Parameterise whether or not Prm_Req is set: a slave which lost power
                    // since our last contact needs it, and one which did not is required to
                    // accept it.
                    self.state = DpSlaveState::WaitPrm;
                }
            }
            DpSlaveState::WaitDiag2 => {
                if diag.cfg_fault() || diag.prm_fault() {
                    fmt::log_warn!(
                        "slave {} rejected setup, cfg fault {}",
                        self.desc.address,
                        diag.cfg_fault()
                    );

                    self.enter_fault(fdl.phy().now_us());
                } else if diag.ready_for_data_exchange() {
                    fmt::info!("slave {} entering data exchange", self.desc.address);

                    self.ready_polls = 0;
                    self.faults_in_row = 0;
                    self.dx_since_diag = 0;
                    self.state = DpSlaveState::DataExchange;
                } else {
                    self.ready_polls += 1;

                    if self.ready_polls > READY_POLL_LIMIT {
                        fmt::log_warn!(
                            "slave {} never became ready for data exchange",
                            self.desc.address
                        );

                        self.enter_fault(fdl.phy().now_us());
                    }
                }
            }
            // DiagExchange.
            _ => {
                if diag.cfg_fault() || diag.prm_fault() {
                    self.enter_fault(fdl.phy().now_us());
                } else if diag.prm_req() {
                    fmt::info!(
                        "slave {} demands reparameterisation",
                        self.desc.address
                    );

                    fdl.reset_fcb(self.desc.address);
                    self.state = DpSlaveState::WaitPrm;
                } else {
                    self.dx_since_diag = 0;
                    self.state = DpSlaveState::DataExchange;
                }
            }
        }

        self.last_diag = Some(diag);

        Ok(())
    }

    fn step_prm<P: Phy>(
        &mut self,
        fdl: &mut FdlStation<P>,
        config: &DpMasterConfig,
    ) -> Result<(), Error> {
        let watchdog = if self.desc.watchdog_ms > 0 {
            Some(watchdog_factors(self.desc.watchdog_ms)?)
        } else {
            None
        };

        let request = telegram::set_prm(
            self.desc.address,
            fdl.address(),
            self.desc.prm_status(),
            watchdog,
            self.desc.min_tsdr,
            self.desc.ident_number,
            self.desc.group_ident,
            &self.desc.user_prm_data,
        )?;

        match fdl.transact(&request, config.retries) {
            Ok(response) if is_positive_ack(&response) => {
                fmt::debug!("slave {} parameterised", self.desc.address);

                self.state = DpSlaveState::WaitCfg;

                Ok(())
            }
            Ok(_) | Err(Error::Fdl(_)) => {
                fmt::log_warn!("slave {}: {}", self.desc.address, DpError::SetPrmRejected {
                    address: self.desc.address
                });

                self.enter_fault(fdl.phy().now_us());

                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn step_cfg<P: Phy>(
        &mut self,
        fdl: &mut FdlStation<P>,
        config: &DpMasterConfig,
    ) -> Result<(), Error> {
        let request = telegram::chk_cfg(self.desc.address, fdl.address(), &self.desc.cfg_data)?;

        match fdl.transact(&request, config.retries) {
            Ok(response) if is_positive_ack(&response) => {
                fmt::debug!("slave {} accepted configuration", self.desc.address);

                self.state = DpSlaveState::WaitDiag2;

                Ok(())
            }
            Ok(_) | Err(Error::Fdl(_)) => {
                fmt::log_warn!("slave {}: {}", self.desc.address, DpError::ChkCfgRejected {
                    address: self.desc.address
                });

                self.enter_fault(fdl.phy().now_us());

                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn step_data_exchange<P: Phy>(
        &mut self,
        fdl: &mut FdlStation<P>,
        config: &DpMasterConfig,
    ) -> Result<(), Error> {
        let request =
            telegram::data_exchange(self.desc.address, fdl.address(), &self.outputs)?;

        match fdl.transact(&request, config.retries) {
            Ok(response) => {
                if self.apply_exchange_response(response) {
                    self.faults_in_row = 0;
                    self.dx_since_diag += 1;

                    if self.diag_requested {
                        self.diag_requested = false;
                        self.state = DpSlaveState::DiagExchange;
                    } else if self.desc.diag_period > 0
                        && self.dx_since_diag >= self.desc.diag_period
                    {
                        self.state = DpSlaveState::DiagExchange;
                    }
                } else {
                    self.enter_fault(fdl.phy().now_us());
                }

                Ok(())
            }
            Err(Error::Fdl(FdlError::NoResource { .. })) => {
                // The slave's watchdog expired and it left data exchange. It only needs new
                // parameters, not a full probe.
                fmt::log_warn!(
                    "slave {} dropped out of data exchange, reinitialising",
                    self.desc.address
                );

                fdl.reset_fcb(self.desc.address);
                self.reset_runtime();
                self.state = DpSlaveState::WaitDiag;

                Ok(())
            }
            Err(Error::Fdl(_)) => {
                self.enter_fault(fdl.phy().now_us());

                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Latch inputs from a Data_Exchange response. Returns `false` if the response shape is
    /// wrong for this slave.
    fn apply_exchange_response(&mut self, response: Option<Telegram>) -> bool {
        match response {
            Some(Telegram::ShortConfirmation) => {
                if self.desc.input_len == 0 {
                    self.inputs.clear();

                    true
                } else {
                    fmt::log_warn!(
                        "slave {} acknowledged exchange without input data",
                        self.desc.address
                    );

                    false
                }
            }
            Some(Telegram::Data(t)) => match t.response_status() {
                Some(status) if status.carries_data() || status == ResponseStatus::Ok => {
                    if t.pdu.len() != usize::from(self.desc.input_len) {
                        fmt::log_warn!(
                            "slave {} returned {} input bytes, expected {}",
                            self.desc.address,
                            t.pdu.len(),
                            self.desc.input_len
                        );

                        return false;
                    }

                    self.inputs = t.pdu;

                    if status == ResponseStatus::DataHigh {
                        fmt::debug!("slave {} signals pending diagnosis", self.desc.address);

                        self.diag_requested = true;
                    }

                    true
                }
                _ => false,
            },
            _ => false,
        }
    }
}

fn is_positive_ack(response: &Option<Telegram>) -> bool {
    match response {
        Some(Telegram::ShortConfirmation) => true,
        Some(Telegram::Data(t)) => t.response_status() == Some(ResponseStatus::Ok),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc() -> SlaveDesc {
        let mut desc = SlaveDesc::new(8, 0xb757);

        desc.input_len = 2;
        desc.output_len = 2;

        desc
    }

    #[test]
    fn validate_rejects_bad_addresses_and_modes() {
        let mut d = desc();
        d.address = 126;
        assert_eq!(d.validate(), Err(ConfigError::AddressOutOfRange(126)));

        let mut d = desc();
        d.sync_mode = true;
        assert_eq!(d.validate(), Err(ConfigError::SyncUnsupported));

        d.sync_supported = true;
        assert_eq!(d.validate(), Ok(()));

        let mut d = desc();
        d.watchdog_ms = 10_000_000;
        assert_eq!(
            d.validate(),
            Err(ConfigError::WatchdogOutOfRange(10_000_000))
        );
    }

    #[test]
    fn outputs_must_match_configured_size() {
        let mut slave = DpSlave::new(desc());

        assert!(slave.set_outputs(&[1, 2]).is_ok());
        assert!(slave.set_outputs(&[1, 2, 3]).is_err());
        assert_eq!(slave.outputs.as_slice(), &[1, 2]);
    }

    #[test]
    fn exchange_response_latches_whole_frames() {
        let mut slave = DpSlave::new(desc());

        let response = Telegram::Data(
            DataTelegram::new(
                crate::fdl::telegram::DataTelegramHeader {
                    da: 2,
                    sa: 8,
                    dsap: None,
                    ssap: None,
                    fc: FunctionCode::Response {
                        status: ResponseStatus::DataLow,
                        station: StationType::Slave,
                    },
                },
                &[0xaa, 0x55],
            )
            .unwrap(),
        );

        assert!(slave.apply_exchange_response(Some(response)));
        assert_eq!(slave.inputs(), &[0xaa, 0x55]);
        assert!(!slave.diag_requested);
    }

    #[test]
    fn high_priority_response_requests_diagnosis() {
        let mut slave = DpSlave::new(desc());

        let response = Telegram::Data(
            DataTelegram::new(
                crate::fdl::telegram::DataTelegramHeader {
                    da: 2,
                    sa: 8,
                    dsap: None,
                    ssap: None,
                    fc: FunctionCode::Response {
                        status: ResponseStatus::DataHigh,
                        station: StationType::Slave,
                    },
                },
                &[0x01, 0x02],
            )
            .unwrap(),
        );

        assert!(slave.apply_exchange_response(Some(response)));
        assert!(slave.diag_requested);
    }

    #[test]
    fn wrong_input_length_is_rejected() {
        let mut slave = DpSlave::new(desc());

        let response = Telegram::Data(
            DataTelegram::new(
                crate::fdl::telegram::DataTelegramHeader {
                    da: 2,
                    sa: 8,
                    dsap: None,
                    ssap: None,
                    fc: FunctionCode::Response {
                        status: ResponseStatus::DataLow,
                        station: StationType::Slave,
                    },
                },
                &[0xaa],
            )
            .unwrap(),
        );

        assert!(!slave.apply_exchange_response(Some(response)));
    }
}
