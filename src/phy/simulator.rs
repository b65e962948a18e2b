//! Simulated transceivers for tests and demos.
//!
//! Both drivers run on a *virtual* microsecond clock which advances only as the simulated bus
//! is used: transmitting a telegram advances it by the telegram's line time, an empty poll
//! advances it by one character time. Timing behaviour (Tsyn gaps, slot expiry, watchdog
//! expiry) is therefore exact and fully deterministic under test.
//!
//! [`LoopbackPhy`] echoes everything it is told to transmit back into its receiver after a
//! configurable delay. [`SimulatedSlavePhy`] runs a complete scripted DP slave behind the
//! wire: it parses received telegrams with the real decoder and answers FDL status requests,
//! parameterisation, configuration, diagnosis reads and cyclic data exchange the way a
//! compliant device would, including watchdog expiry.

use crate::{
    baud::Baudrate,
    dp::{
        diag::{StationStatus1, StationStatus2},
        sap,
        telegram::PrmStatus,
    },
    error::PhyError,
    fdl::{
        decoder::{Decoded, Decoder},
        telegram::{
            DataTelegram, DataTelegramHeader, FunctionCode, RequestFunction, ResponseStatus,
            Sd, StationType, Telegram, BROADCAST_ADDRESS, MAX_PDU, MAX_TELEGRAM,
        },
    },
    phy::{LineMonitor, Phy, PhyCounters, RxByte},
    BusTiming,
};
use heapless::Deque;

const RX_QUEUE: usize = 1024;

/// A PHY which echoes its own transmissions back after a delay.
#[derive(Debug)]
pub struct LoopbackPhy {
    baudrate: Baudrate,
    monitor: LineMonitor,
    clock_us: u64,
    open: bool,
    delay_us: u64,
    queue: Deque<RxByte, RX_QUEUE>,
    counters: PhyCounters,
}

impl LoopbackPhy {
    /// Create a loopback with a one character echo delay.
    pub fn new(baudrate: Baudrate) -> Self {
        Self {
            baudrate,
            monitor: LineMonitor::new(baudrate),
            clock_us: 0,
            open: true,
            delay_us: baudrate.char_us(),
            queue: Deque::new(),
            counters: PhyCounters::default(),
        }
    }

    /// Override the echo delay.
    pub fn with_delay_us(mut self, delay_us: u64) -> Self {
        self.delay_us = delay_us;

        self
    }
}

impl Phy for LoopbackPhy {
    fn open(&mut self) -> Result<(), PhyError> {
        self.open = true;

        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn baudrate(&self) -> Baudrate {
        self.baudrate
    }

    fn now_us(&self) -> u64 {
        self.clock_us
    }

    fn send(&mut self, telegram: &[u8]) -> Result<(), PhyError> {
        if !self.open {
            return Err(PhyError::NotOpen);
        }

        self.clock_us += self.monitor.sync_remaining_us(self.clock_us);

        for byte in telegram {
            self.clock_us += self.baudrate.char_us();

            let _ = self.queue.push_back(RxByte {
                byte: *byte,
                timestamp_us: self.clock_us + self.delay_us,
            });
        }

        self.counters.tx_bytes += telegram.len() as u64;
        self.monitor.note_tx_end(self.clock_us);

        Ok(())
    }

    fn poll(&mut self) -> Result<Option<RxByte>, PhyError> {
        if !self.open {
            return Err(PhyError::NotOpen);
        }

        match self.queue.pop_front() {
            Some(rx) => {
                self.clock_us = self.clock_us.max(rx.timestamp_us);
                self.counters.rx_bytes += 1;
                self.monitor.note_activity(rx.timestamp_us);

                Ok(Some(rx))
            }
            None => {
                // Idle line time passes.
                self.clock_us += self.baudrate.char_us();

                Ok(None)
            }
        }
    }

    fn flush_rx(&mut self) {
        self.counters.flushed_bytes += self.queue.len() as u32;
        self.queue.clear();
    }

    fn last_tx_end_us(&self) -> u64 {
        self.monitor.last_tx_end_us()
    }

    fn counters(&self) -> PhyCounters {
        self.counters
    }
}

/// Lifecycle of the scripted slave, as the device itself sees it.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum SimState {
    /// Waiting for Set_Prm. Diagnosis reports `Prm_Req`.
    WaitPrm,
    /// Parameterised, waiting for Chk_Cfg.
    WaitCfg,
    /// In cyclic data exchange.
    DataExchange,
}

/// A PHY with one complete scripted DP slave on the simulated bus.
#[derive(Debug)]
pub struct SimulatedSlavePhy {
    timing: BusTiming,
    monitor: LineMonitor,
    clock_us: u64,
    open: bool,
    decoder: Decoder,
    queue: Deque<RxByte, RX_QUEUE>,
    counters: PhyCounters,

    address: u8,
    ident_number: u16,
    state: SimState,
    responding: bool,
    master_address: u8,
    watchdog_us: u64,
    last_data_exchange_us: u64,
    prm_fault: bool,
    cfg_fault: bool,
    diag_pending: bool,
    expected_cfg: Option<heapless::Vec<u8, MAX_PDU>>,
    inputs: heapless::Vec<u8, MAX_PDU>,
    outputs: heapless::Vec<u8, MAX_PDU>,
    last_global_control: Option<(u8, u8)>,
    prm_telegrams: u32,
    cfg_telegrams: u32,
    diag_telegrams: u32,
    data_exchanges: u32,
}

impl SimulatedSlavePhy {
    /// Create a simulated bus with one slave at `address` reporting `ident_number`.
    pub fn new(baudrate: Baudrate, address: u8, ident_number: u16) -> Self {
        let timing = BusTiming::for_baudrate(baudrate);

        Self {
            timing,
            monitor: LineMonitor::new(baudrate),
            clock_us: 0,
            open: true,
            decoder: Decoder::new(timing),
            queue: Deque::new(),
            counters: PhyCounters::default(),
            address,
            ident_number,
            state: SimState::WaitPrm,
            responding: true,
            master_address: 255,
            watchdog_us: 0,
            last_data_exchange_us: 0,
            prm_fault: false,
            cfg_fault: false,
            diag_pending: false,
            expected_cfg: None,
            inputs: heapless::Vec::new(),
            outputs: heapless::Vec::new(),
            last_global_control: None,
            prm_telegrams: 0,
            cfg_telegrams: 0,
            diag_telegrams: 0,
            data_exchanges: 0,
        }
    }

    /// Configuration bytes the slave will compare Chk_Cfg against. Without this, any
    /// configuration is accepted.
    pub fn expect_cfg(mut self, cfg: &[u8]) -> Self {
        self.expected_cfg = heapless::Vec::from_slice(cfg).ok();

        self
    }

    /// Set the input data returned in Data_Exchange responses.
    pub fn set_inputs(&mut self, inputs: &[u8]) {
        self.inputs = heapless::Vec::from_slice(inputs).unwrap_or_default();
    }

    /// Output data last received from the master.
    pub fn outputs(&self) -> &[u8] {
        &self.outputs
    }

    /// Stop or resume answering entirely, simulating an unplugged device.
    pub fn set_responding(&mut self, responding: bool) {
        self.responding = responding;
    }

    /// Flag pending diagnosis: the next Data_Exchange response uses the high priority status,
    /// which tells the master to read diagnosis before continuing.
    pub fn raise_diagnosis(&mut self) {
        self.diag_pending = true;
    }

    /// Jump the virtual clock forward, e.g. past a watchdog period.
    pub fn advance_clock_us(&mut self, us: u64) {
        self.clock_us += us;
    }

    /// Last Global_Control command and group select received, if any.
    pub fn last_global_control(&self) -> Option<(u8, u8)> {
        self.last_global_control
    }

    /// Number of Set_Prm telegrams received.
    pub fn prm_telegrams(&self) -> u32 {
        self.prm_telegrams
    }

    /// Number of Data_Exchange telegrams received.
    pub fn data_exchanges(&self) -> u32 {
        self.data_exchanges
    }

    /// `true` while the slave believes it is in cyclic data exchange.
    pub fn in_data_exchange(&self) -> bool {
        self.state == SimState::DataExchange
    }

    fn reply_header(&self, request: &DataTelegramHeader, status: ResponseStatus) -> DataTelegramHeader {
        DataTelegramHeader {
            da: request.sa,
            sa: self.address,
            // Responses mirror the request's SAP pair, swapped.
            dsap: request.ssap,
            ssap: request.dsap,
            fc: FunctionCode::Response {
                status,
                station: StationType::Slave,
            },
        }
    }

    /// React to one reassembled telegram, producing at most one response telegram.
    fn handle_telegram(&mut self, telegram: &Telegram, now_us: u64) -> Option<Telegram> {
        let data = telegram.as_data()?;

        if data.h.da != self.address && data.h.da != BROADCAST_ADDRESS {
            return None;
        }

        let function = match data.h.fc {
            FunctionCode::Request { function, .. } => function,
            FunctionCode::Response { .. } => return None,
        };

        if !self.responding {
            return None;
        }

        match (function, data.h.dsap) {
            (RequestFunction::FdlStatus, _) => Some(Telegram::Data(
                DataTelegram::with_sd(self.reply_header(&data.h, ResponseStatus::Ok), &[], Sd::Sd1)
                    .ok()?,
            )),
            (RequestFunction::SdnLow | RequestFunction::SdnHigh, Some(sap::GLOBAL_CONTROL)) => {
                if let [command, group] = data.pdu.as_slice() {
                    self.last_global_control = Some((*command, *group));
                }

                None
            }
            (_, Some(sap::SLAVE_DIAG)) => {
                self.diag_telegrams += 1;

                let du = self.diagnosis(now_us);

                self.diag_pending = false;

                Some(Telegram::Data(
                    DataTelegram::new(
                        self.reply_header(&data.h, ResponseStatus::DataLow),
                        &du,
                    )
                    .ok()?,
                ))
            }
            (_, Some(sap::SET_PRM)) => {
                self.prm_telegrams += 1;

                self.apply_prm(&data.pdu, data.h.sa);

                Some(Telegram::ShortConfirmation)
            }
            (_, Some(sap::CHK_CFG)) => {
                self.cfg_telegrams += 1;

                if self.state == SimState::WaitPrm {
                    // Not parameterised; a configuration check is out of sequence. The reply
                    // mirrors the SAP pair, so it needs the variable format.
                    return Some(Telegram::Data(
                        DataTelegram::new(
                            self.reply_header(&data.h, ResponseStatus::NoResource),
                            &[],
                        )
                        .ok()?,
                    ));
                }

                let matches = self
                    .expected_cfg
                    .as_ref()
                    .map(|expected| expected.as_slice() == data.pdu.as_slice())
                    .unwrap_or(true);

                if matches {
                    self.cfg_fault = false;
                    self.state = SimState::DataExchange;
                    self.last_data_exchange_us = now_us;
                } else {
                    self.cfg_fault = true;
                    self.state = SimState::WaitCfg;
                }

                Some(Telegram::ShortConfirmation)
            }
            (_, None) => self.data_exchange(data, now_us),
            _ => None,
        }
    }

    fn apply_prm(&mut self, pdu: &[u8], master: u8) {
        let Some((&status, rest)) = pdu.split_first() else {
            self.prm_fault = true;

            return;
        };

        if rest.len() < 6 {
            self.prm_fault = true;

            return;
        }

        let ident = u16::from_be_bytes([rest[3], rest[4]]);

        if ident != self.ident_number {
            self.prm_fault = true;
            self.state = SimState::WaitPrm;

            return;
        }

        let flags = PrmStatus::from_bits_truncate(status);

        self.watchdog_us = if flags.contains(PrmStatus::WD_ON) {
            u64::from(rest[0]) * u64::from(rest[1]) * 10_000
        } else {
            0
        };

        self.prm_fault = false;
        self.master_address = master;
        self.state = SimState::WaitCfg;
    }

    fn data_exchange(&mut self, request: &DataTelegram, now_us: u64) -> Option<Telegram> {
        if self.state != SimState::DataExchange {
            return Some(Telegram::Data(
                DataTelegram::with_sd(
                    self.reply_header(&request.h, ResponseStatus::NoResource),
                    &[],
                    Sd::Sd1,
                )
                .ok()?,
            ));
        }

        if self.watchdog_us > 0 && now_us.saturating_sub(self.last_data_exchange_us) > self.watchdog_us
        {
            // Watchdog expired: drop out of data exchange and demand fresh parameters.
            self.state = SimState::WaitPrm;
            self.prm_fault = false;

            return Some(Telegram::Data(
                DataTelegram::with_sd(
                    self.reply_header(&request.h, ResponseStatus::NoResource),
                    &[],
                    Sd::Sd1,
                )
                .ok()?,
            ));
        }

        self.data_exchanges += 1;
        self.last_data_exchange_us = now_us;
        self.outputs = request.pdu.clone();

        let status = if self.diag_pending {
            ResponseStatus::DataHigh
        } else {
            ResponseStatus::DataLow
        };

        if self.inputs.is_empty() {
            return if self.diag_pending {
                Some(Telegram::Data(
                    DataTelegram::with_sd(self.reply_header(&request.h, status), &[], Sd::Sd1)
                        .ok()?,
                ))
            } else {
                Some(Telegram::ShortConfirmation)
            };
        }

        Some(Telegram::Data(
            DataTelegram::new(self.reply_header(&request.h, status), &self.inputs).ok()?,
        ))
    }

    fn diagnosis(&self, now_us: u64) -> heapless::Vec<u8, 32> {
        let mut status_1 = StationStatus1::empty();
        let mut status_2 = StationStatus2::ALWAYS_SET;

        if self.prm_fault {
            status_1 |= StationStatus1::PRM_FAULT;
        }
        if self.cfg_fault {
            status_1 |= StationStatus1::CFG_FAULT;
        }

        let watchdog_expired = self.watchdog_us > 0
            && self.state == SimState::DataExchange
            && now_us.saturating_sub(self.last_data_exchange_us) > self.watchdog_us;

        if self.state != SimState::DataExchange || watchdog_expired {
            status_2 |= StationStatus2::PRM_REQ;
        }
        if self.watchdog_us > 0 {
            status_2 |= StationStatus2::WD_ON;
        }

        let mut du = heapless::Vec::new();

        let _ = du.push(status_1.bits());
        let _ = du.push(status_2.bits());
        let _ = du.push(0);
        let _ = du.push(self.master_address);
        let _ = du.extend_from_slice(&self.ident_number.to_be_bytes());

        du
    }
}

impl Phy for SimulatedSlavePhy {
    fn open(&mut self) -> Result<(), PhyError> {
        self.open = true;

        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn baudrate(&self) -> Baudrate {
        self.timing.baudrate
    }

    fn now_us(&self) -> u64 {
        self.clock_us
    }

    fn send(&mut self, telegram: &[u8]) -> Result<(), PhyError> {
        if !self.open {
            return Err(PhyError::NotOpen);
        }

        self.clock_us += self.monitor.sync_remaining_us(self.clock_us);

        let mut response = None;

        for byte in telegram {
            self.clock_us += self.timing.baudrate.char_us();

            if let Decoded::Telegram(t) = self.decoder.push(*byte, self.clock_us) {
                response = self.handle_telegram(&t, self.clock_us);
            }
        }

        self.counters.tx_bytes += telegram.len() as u64;
        self.monitor.note_tx_end(self.clock_us);

        if let Some(response) = response {
            let mut buf = [0u8; MAX_TELEGRAM];

            if let Ok(len) = response.encode(&mut buf) {
                // The response starts after the slave's station delay.
                let mut at = self.clock_us + self.timing.baudrate.bits_to_us(self.timing.min_tsdr_bits);

                for byte in &buf[..len] {
                    at += self.timing.baudrate.char_us();

                    let _ = self.queue.push_back(RxByte {
                        byte: *byte,
                        timestamp_us: at,
                    });
                }
            }
        }

        Ok(())
    }

    fn poll(&mut self) -> Result<Option<RxByte>, PhyError> {
        if !self.open {
            return Err(PhyError::NotOpen);
        }

        match self.queue.pop_front() {
            Some(rx) => {
                self.clock_us = self.clock_us.max(rx.timestamp_us);
                self.counters.rx_bytes += 1;
                self.monitor.note_activity(rx.timestamp_us);

                Ok(Some(rx))
            }
            None => {
                self.clock_us += self.timing.baudrate.char_us();

                Ok(None)
            }
        }
    }

    fn flush_rx(&mut self) {
        self.counters.flushed_bytes += self.queue.len() as u32;
        self.queue.clear();
    }

    fn last_tx_end_us(&self) -> u64 {
        self.monitor.last_tx_end_us()
    }

    fn counters(&self) -> PhyCounters {
        self.counters
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_echoes_after_delay() {
        let mut phy = LoopbackPhy::new(Baudrate::B500000).with_delay_us(100);

        phy.send(&[0xe5]).unwrap();

        let rx = loop {
            if let Some(rx) = phy.poll().unwrap() {
                break rx;
            }
        };

        assert_eq!(rx.byte, 0xe5);
        assert!(rx.timestamp_us >= phy.last_tx_end_us() + 100);
    }

    #[test]
    fn simulated_slave_answers_fdl_status() {
        let mut phy = SimulatedSlavePhy::new(Baudrate::B500000, 8, 0x1234);

        // `10 08 02 49 53 16`: FDL status request to address 8 from address 2.
        phy.send(&[0x10, 0x08, 0x02, 0x49, 0x53, 0x16]).unwrap();

        let mut bytes = heapless::Vec::<u8, 16>::new();

        while let Some(rx) = phy.poll().unwrap() {
            bytes.push(rx.byte).unwrap();

            if bytes.len() == 6 {
                break;
            }
        }

        // SD1 response, DA 2, SA 8, FC 0x00 (slave, OK).
        assert_eq!(bytes.as_slice(), &[0x10, 0x02, 0x08, 0x00, 0x0a, 0x16]);
    }

    #[test]
    fn simulated_slave_ignores_other_addresses() {
        let mut phy = SimulatedSlavePhy::new(Baudrate::B500000, 8, 0x1234);

        phy.send(&[0x10, 0x09, 0x02, 0x49, 0x54, 0x16]).unwrap();

        for _ in 0..8 {
            assert_eq!(phy.poll().unwrap(), None);
        }
    }
}
