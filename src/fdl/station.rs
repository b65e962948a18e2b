//! The FDL station: one active PROFIBUS initiator.
//!
//! A station runs at most one outstanding request at a time. A request goes through:
//!
//! 1. Wait for the line to have been idle for Tsyn (enforced by the PHY's `send`).
//! 2. Transmit the encoded telegram.
//! 3. If the function expects no reply (SDN), complete immediately.
//! 4. Otherwise supervise the slot time: feed received characters to the decoder, discard
//!    anything that is not a response from the addressed peer to us, and complete on a match.
//! 5. On slot expiry retransmit the *identical* frame (frame count bit unchanged, per the
//!    PROFIBUS request repetition rule) up to the retry limit, then fail with a slot timeout.
//!
//! A "no resources" negative confirmation gets a short back-off and a retry; every other
//! negative confirmation is surfaced to the caller immediately.
//!
//! The frame count bit is kept per peer and advances only when a positive confirmation for a
//! frame sent with FCV set has been received.

use crate::{
    baud::BusTiming,
    error::{Error, FdlError},
    fdl::{
        decoder::{Decoded, Decoder},
        telegram::{
            DataTelegram, FunctionCode, ResponseStatus, Telegram, MAX_STATION_ADDRESS,
            MAX_TELEGRAM,
        },
    },
    fmt,
    phy::Phy,
};

/// Back-off before retrying a request the peer had no resources for, in character times.
const NO_RESOURCE_BACKOFF_CHARS: u32 = 50;

/// Progress of the outstanding request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transfer {
    /// Still waiting; poll again.
    Pending,
    /// The request completed. `None` for send-and-forget services.
    Done(Option<Telegram>),
}

/// Observable station statistics.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct StationCounters {
    /// Requests submitted.
    pub requests: u32,
    /// Retransmissions performed.
    pub retries: u32,
    /// Requests that failed with a slot timeout after all retries.
    pub timeouts: u32,
    /// Response telegrams discarded because they did not match the outstanding request.
    pub mismatches: u32,
}

/// Frame count bit state for one peer.
#[derive(Debug, Copy, Clone, Default)]
struct FcbState {
    fcb: bool,
    fcv: bool,
}

/// Per-peer frame count bit registry, indexed by station address.
#[derive(Debug)]
struct FcbRegistry {
    peers: [FcbState; 127],
}

impl FcbRegistry {
    fn new() -> Self {
        Self {
            peers: [FcbState::default(); 127],
        }
    }

    fn current(&self, peer: u8) -> FcbState {
        self.peers[usize::from(peer % 127)]
    }

    /// Restart the count for a peer: the next frame is sent with FCB = FCV = 0, telling the
    /// peer to resynchronise its copy.
    fn reset(&mut self, peer: u8) {
        self.peers[usize::from(peer % 127)] = FcbState::default();
    }

    /// A frame sent with FCV set was positively confirmed.
    fn advance(&mut self, peer: u8) {
        let state = &mut self.peers[usize::from(peer % 127)];

        state.fcb = !state.fcb;
        state.fcv = true;
    }
}

#[derive(Debug)]
struct Outstanding {
    frame: [u8; MAX_TELEGRAM],
    len: usize,
    peer: u8,
    expects_reply: bool,
    tracks_fcb: bool,
    retries_left: u8,
    sent: bool,
    not_before_us: u64,
    deadline_us: u64,
}

/// A PROFIBUS FDL initiator bound to a PHY.
#[derive(Debug)]
pub struct FdlStation<P> {
    phy: P,
    address: u8,
    timing: BusTiming,
    decoder: Decoder,
    fcb: FcbRegistry,
    outstanding: Option<Outstanding>,
    counters: StationCounters,
}

impl<P: Phy> FdlStation<P> {
    /// Create a station with address `address` on `phy`.
    pub fn new(phy: P, address: u8, timing: BusTiming) -> Result<Self, Error> {
        if address > MAX_STATION_ADDRESS {
            return Err(crate::error::ConfigError::AddressOutOfRange(address).into());
        }

        Ok(Self {
            phy,
            address,
            timing,
            decoder: Decoder::new(timing),
            fcb: FcbRegistry::new(),
            outstanding: None,
            counters: StationCounters::default(),
        })
    }

    /// This station's address.
    pub fn address(&self) -> u8 {
        self.address
    }

    /// The timing profile in use.
    pub fn timing(&self) -> &BusTiming {
        &self.timing
    }

    /// The PHY driver.
    pub fn phy(&self) -> &P {
        &self.phy
    }

    /// Mutable access to the PHY driver.
    pub fn phy_mut(&mut self) -> &mut P {
        &mut self.phy
    }

    /// Statistics counters.
    pub fn counters(&self) -> StationCounters {
        self.counters
    }

    /// Decoder statistics.
    pub fn decoder_counters(&self) -> crate::fdl::decoder::DecoderCounters {
        self.decoder.counters()
    }

    /// Restart frame count bit tracking for a peer, e.g. when a slave is (re)initialised.
    pub fn reset_fcb(&mut self, peer: u8) {
        self.fcb.reset(peer);
    }

    /// Submit a request. Fails with [`FdlError::Outstanding`] if one is already in flight.
    ///
    /// The frame count bit of the telegram is overwritten from the per-peer registry for
    /// functions that take part in FCB tracking.
    pub fn submit(&mut self, telegram: &DataTelegram, retries: u8) -> Result<(), Error> {
        if self.outstanding.is_some() {
            return Err(FdlError::Outstanding.into());
        }

        let mut telegram = telegram.clone();

        let (expects_reply, tracks_fcb) = match telegram.h.fc {
            FunctionCode::Request { function, .. } => {
                if function.uses_fcb() {
                    let state = self.fcb.current(telegram.h.da);

                    telegram.h.fc = FunctionCode::Request {
                        function,
                        fcb: state.fcb,
                        fcv: state.fcv,
                    };
                }

                (function.expects_reply(), function.uses_fcb())
            }
            FunctionCode::Response { .. } => return Err(Error::Internal),
        };

        let mut frame = [0u8; MAX_TELEGRAM];
        let len = telegram.encode(&mut frame)?;

        self.counters.requests += 1;

        self.outstanding = Some(Outstanding {
            frame,
            len,
            peer: telegram.h.da,
            expects_reply,
            tracks_fcb,
            retries_left: retries,
            sent: false,
            not_before_us: 0,
            deadline_us: 0,
        });

        Ok(())
    }

    /// Drive the outstanding request one step. Never blocks for longer than roughly one
    /// character time.
    pub fn poll(&mut self) -> Result<Transfer, Error> {
        let Some(out) = self.outstanding.as_mut() else {
            return Err(Error::Internal);
        };

        if !out.sent {
            if self.phy.now_us() < out.not_before_us {
                // Backing off after a "no resources" confirmation. Let line time pass.
                let _ = self.phy.poll()?;

                return Ok(Transfer::Pending);
            }

            // Anything still pending in the receiver is stale: either noise from before our
            // request, or our own transmission echoed back on a 2-wire bus.
            self.phy.flush_rx();
            self.decoder.reset();

            self.phy.send(&out.frame[..out.len])?;
            out.sent = true;

            if !out.expects_reply {
                self.outstanding = None;

                return Ok(Transfer::Done(None));
            }

            out.deadline_us = self.phy.last_tx_end_us() + self.timing.slot_us();

            return Ok(Transfer::Pending);
        }

        while let Some(rx) = self.phy.poll()? {
            match self.decoder.push(rx.byte, rx.timestamp_us) {
                Decoded::NeedMore => {}
                Decoded::Error(_) => {
                    // Framing fault mid-slot. Keep listening until the slot expires.
                }
                Decoded::Telegram(telegram) => {
                    if let Some(transfer) = self.handle_response(telegram)? {
                        return Ok(transfer);
                    }
                }
            }
        }

        let now = self.phy.now_us();

        self.decoder.check_timeout(now);

        let (deadline_us, peer) = match self.outstanding.as_ref() {
            Some(out) => (out.deadline_us, out.peer),
            None => return Err(Error::Internal),
        };

        if now >= deadline_us && self.decoder.is_idle() {
            return self.retry_or_fail(FdlError::SlotTimeout { address: peer });
        }

        Ok(Transfer::Pending)
    }

    /// Submit a request and block until it completes, times out or fails.
    ///
    /// Returns `None` for send-and-forget services, otherwise the matched response telegram.
    pub fn transact(
        &mut self,
        telegram: &DataTelegram,
        retries: u8,
    ) -> Result<Option<Telegram>, Error> {
        self.submit(telegram, retries)?;

        loop {
            match self.poll() {
                Ok(Transfer::Pending) => continue,
                Ok(Transfer::Done(response)) => return Ok(response),
                Err(e) => return Err(e),
            }
        }
    }

    /// Classify a reassembled telegram against the outstanding request. `Ok(None)` means the
    /// telegram was discarded and the slot wait continues.
    fn handle_response(&mut self, telegram: Telegram) -> Result<Option<Transfer>, Error> {
        let (peer, tracks_fcb) = {
            let out = self.outstanding.as_ref().ok_or(Error::Internal)?;

            (out.peer, out.tracks_fcb)
        };

        let status = match &telegram {
            // Token frames circulating between other masters are none of our business.
            Telegram::Token(_) => {
                self.counters.mismatches += 1;

                return Ok(None);
            }
            Telegram::ShortConfirmation => ResponseStatus::Ok,
            Telegram::Data(data) => {
                if data.h.da != self.address || data.h.sa != peer {
                    fmt::trace!(
                        "dropping telegram for {} from {}, not ours",
                        data.h.da,
                        data.h.sa
                    );

                    self.counters.mismatches += 1;

                    return Ok(None);
                }

                match data.response_status() {
                    Some(status) => status,
                    None => {
                        // A request frame addressed to us mid-slot: not the response.
                        self.counters.mismatches += 1;

                        return Ok(None);
                    }
                }
            }
        };

        if status.is_positive() {
            if tracks_fcb {
                self.fcb.advance(peer);
            }

            self.outstanding = None;

            return Ok(Some(Transfer::Done(Some(telegram))));
        }

        match status {
            ResponseStatus::NoResource => {
                let backoff =
                    self.timing.baudrate.char_us() * u64::from(NO_RESOURCE_BACKOFF_CHARS);
                let now = self.phy.now_us();

                match self.retry_or_fail(FdlError::NoResource { address: peer })? {
                    Transfer::Pending => {
                        if let Some(out) = self.outstanding.as_mut() {
                            out.not_before_us = now + backoff;
                        }

                        Ok(Some(Transfer::Pending))
                    }
                    done => Ok(Some(done)),
                }
            }
            status => {
                self.outstanding = None;

                Err(FdlError::Negative {
                    address: peer,
                    status,
                }
                .into())
            }
        }
    }

    /// Consume one retry or fail the transfer with `error`.
    fn retry_or_fail(&mut self, error: FdlError) -> Result<Transfer, Error> {
        let out = self.outstanding.as_mut().ok_or(Error::Internal)?;

        if out.retries_left > 0 {
            out.retries_left -= 1;
            out.sent = false;
            out.not_before_us = 0;
            self.counters.retries += 1;

            fmt::debug!("retrying request to {}", out.peer);

            Ok(Transfer::Pending)
        } else {
            if matches!(error, FdlError::SlotTimeout { .. }) {
                self.counters.timeouts += 1;
            }

            fmt::debug!("request to {} failed", out.peer);

            self.outstanding = None;

            Err(error.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        baud::Baudrate,
        fdl::telegram::{DataTelegramHeader, RequestFunction},
        phy::simulator::LoopbackPhy,
    };

    fn station(phy: LoopbackPhy) -> FdlStation<LoopbackPhy> {
        FdlStation::new(phy, 2, BusTiming::for_baudrate(Baudrate::B500000)).unwrap()
    }

    #[test]
    fn address_must_be_assignable() {
        let phy = LoopbackPhy::new(Baudrate::B500000);

        assert!(FdlStation::new(phy, 126, BusTiming::for_baudrate(Baudrate::B500000)).is_err());
    }

    #[test]
    fn sdn_completes_without_response() {
        let phy = LoopbackPhy::new(Baudrate::B500000);
        let mut station = station(phy);

        let telegram = DataTelegram::new(
            DataTelegramHeader {
                da: 127,
                sa: 2,
                dsap: Some(57),
                ssap: Some(62),
                fc: FunctionCode::request(RequestFunction::SdnHigh),
            },
            &[0x20, 0x00],
        )
        .unwrap();

        let response = station.transact(&telegram, 1).unwrap();

        assert_eq!(response, None);
    }

    #[test]
    fn srd_times_out_against_silent_bus() {
        // The loopback echoes our own request back; it is a request frame, not a response,
        // so the station must discard it and time out.
        let phy = LoopbackPhy::new(Baudrate::B500000);
        let mut station = station(phy);

        let telegram = DataTelegram::new(
            DataTelegramHeader {
                da: 8,
                sa: 2,
                dsap: None,
                ssap: None,
                fc: FunctionCode::request(RequestFunction::SrdLow),
            },
            &[0x00],
        )
        .unwrap();

        let result = station.transact(&telegram, 2);

        assert_eq!(
            result,
            Err(Error::Fdl(FdlError::SlotTimeout { address: 8 }))
        );
        assert_eq!(station.counters().retries, 2);
        assert_eq!(station.counters().timeouts, 1);
    }
}
