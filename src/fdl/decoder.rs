//! Streaming telegram reassembly.
//!
//! The decoder is fed one received character at a time and reports one of "need more", "here
//! is a telegram" or "framing fault". It never consumes more than one character per call.
//! Faults (bad length fields, checksum, delimiters, reserved function codes) resynchronise
//! the decoder to the idle state silently; an observable counter records them. A frame that
//! stalls mid-reception for longer than Tqui + Tsl is dropped the same way.

use crate::{
    baud::BusTiming,
    error::FdlError,
    fdl::telegram::{
        self, DataTelegram, DataTelegramHeader, FunctionCode, Sd, Telegram, TokenTelegram,
        ADDRESS_EXT, ADDRESS_MASK, ED, SC, SD1, SD2, SD2_LE_MAX, SD2_LE_MIN, SD3, SD4,
    },
};

/// Result of feeding one character to the decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// The character was consumed; the frame is not complete yet.
    NeedMore,
    /// A complete, validated telegram.
    Telegram(Telegram),
    /// A framing fault. The decoder has resynchronised to idle.
    Error(FdlError),
}

/// Observable decoder statistics.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DecoderCounters {
    /// Telegrams successfully reassembled.
    pub telegrams: u32,
    /// Framing faults that forced a resynchronisation.
    pub faults: u32,
    /// Characters discarded while hunting for a start delimiter.
    pub discarded: u32,
    /// Partial frames dropped by the inter-character timeout.
    pub timeouts: u32,
}

// Collected frame bytes, SD excluded. Sized for the largest SD2 body.
type FrameBuf = heapless::Vec<u8, 255>;

#[derive(Debug)]
enum State {
    /// Hunting for a start delimiter.
    Idle,
    /// Collecting the fixed remainder of an SD1/SD3/SD4 telegram.
    Fixed { sd: u8, need: usize, buf: FrameBuf },
    /// Collecting LE, LEr and the repeated delimiter of an SD2 telegram.
    VarHeader { buf: FrameBuf },
    /// Collecting the body of an SD2 telegram: LE bytes plus FCS and ED.
    VarBody { le: u8, buf: FrameBuf },
}

/// Telegram reassembler fed one character at a time.
#[derive(Debug)]
pub struct Decoder {
    state: State,
    timing: BusTiming,
    last_byte_us: u64,
    counters: DecoderCounters,
}

impl Decoder {
    /// Create a decoder for a bus timing profile.
    pub fn new(timing: BusTiming) -> Self {
        Self {
            state: State::Idle,
            timing,
            last_byte_us: 0,
            counters: DecoderCounters::default(),
        }
    }

    /// Statistics counters.
    pub fn counters(&self) -> DecoderCounters {
        self.counters
    }

    /// `true` if no frame is partially assembled.
    pub fn is_idle(&self) -> bool {
        matches!(self.state, State::Idle)
    }

    /// Drop any partial frame and return to idle.
    pub fn reset(&mut self) {
        self.state = State::Idle;
    }

    /// Drop a partial frame if the line has stalled for longer than Tqui + Tsl.
    ///
    /// Returns `true` if a partial frame was dropped. Called by the station between polls;
    /// [`Decoder::push`] also applies it before consuming a late character.
    pub fn check_timeout(&mut self, now_us: u64) -> bool {
        if self.is_idle() {
            return false;
        }

        if now_us.saturating_sub(self.last_byte_us) > self.timing.rx_timeout_us() {
            crate::fmt::trace!("rx frame stalled, dropping partial");

            self.counters.timeouts += 1;
            self.counters.faults += 1;
            self.state = State::Idle;

            true
        } else {
            false
        }
    }

    /// Feed one received character, timestamped in microseconds.
    pub fn push(&mut self, byte: u8, now_us: u64) -> Decoded {
        self.check_timeout(now_us);
        self.last_byte_us = now_us;

        match core::mem::replace(&mut self.state, State::Idle) {
            State::Idle => match byte {
                SC => self.emit(Telegram::ShortConfirmation),
                SD1 => self.collect(SD1, 5),
                SD3 => self.collect(SD3, 13),
                SD4 => self.collect(SD4, 2),
                SD2 => {
                    self.state = State::VarHeader {
                        buf: FrameBuf::new(),
                    };

                    Decoded::NeedMore
                }
                _ => {
                    self.counters.discarded += 1;

                    Decoded::NeedMore
                }
            },
            State::Fixed { sd, need, mut buf } => {
                // Infallible: `need` never exceeds the buffer capacity.
                let _ = buf.push(byte);

                if buf.len() < need {
                    self.state = State::Fixed { sd, need, buf };

                    Decoded::NeedMore
                } else {
                    match Self::parse_fixed(sd, &buf) {
                        Ok(telegram) => self.emit(telegram),
                        Err(e) => self.fault(e),
                    }
                }
            }
            State::VarHeader { mut buf } => {
                let _ = buf.push(byte);

                if buf.len() < 3 {
                    self.state = State::VarHeader { buf };

                    return Decoded::NeedMore;
                }

                let le = buf[0];
                let ler = buf[1];

                if !(SD2_LE_MIN..=SD2_LE_MAX).contains(&le) {
                    return self.fault(FdlError::LengthOutOfRange(le));
                }
                if le != ler {
                    return self.fault(FdlError::LengthRepeatMismatch { le, ler });
                }
                if buf[2] != SD2 {
                    return self.fault(FdlError::BadLengthDelimiter(buf[2]));
                }

                self.state = State::VarBody {
                    le,
                    buf: FrameBuf::new(),
                };

                Decoded::NeedMore
            }
            State::VarBody { le, mut buf } => {
                let _ = buf.push(byte);

                if buf.len() < usize::from(le) + 2 {
                    self.state = State::VarBody { le, buf };

                    return Decoded::NeedMore;
                }

                let body = &buf[..usize::from(le)];
                let received_fcs = buf[usize::from(le)];
                let ed = buf[usize::from(le) + 1];
                let computed = telegram::fcs(body);

                if received_fcs != computed {
                    return self.fault(FdlError::Checksum {
                        received: received_fcs,
                        computed,
                    });
                }
                if ed != ED {
                    return self.fault(FdlError::BadEndDelimiter(ed));
                }

                match Self::parse_data(Sd::Sd2, body[0], body[1], body[2], &body[3..]) {
                    Ok(telegram) => self.emit(Telegram::Data(telegram)),
                    Err(e) => self.fault(e),
                }
            }
        }
    }

    fn collect(&mut self, sd: u8, need: usize) -> Decoded {
        self.state = State::Fixed {
            sd,
            need,
            buf: FrameBuf::new(),
        };

        Decoded::NeedMore
    }

    fn emit(&mut self, telegram: Telegram) -> Decoded {
        self.counters.telegrams += 1;
        self.state = State::Idle;

        Decoded::Telegram(telegram)
    }

    fn fault(&mut self, e: FdlError) -> Decoded {
        crate::fmt::trace!("rx framing fault");

        self.counters.faults += 1;
        self.state = State::Idle;

        Decoded::Error(e)
    }

    fn parse_fixed(sd: u8, buf: &[u8]) -> Result<Telegram, FdlError> {
        match sd {
            SD4 => Ok(Telegram::Token(TokenTelegram {
                da: buf[0],
                sa: buf[1],
            })),
            // SD1: DA SA FC FCS ED. SD3: DA SA FC DU[8] FCS ED.
            _ => {
                let du_len = buf.len() - 5;
                let body = &buf[..buf.len() - 2];
                let received_fcs = buf[buf.len() - 2];
                let ed = buf[buf.len() - 1];
                let computed = telegram::fcs(body);

                if received_fcs != computed {
                    return Err(FdlError::Checksum {
                        received: received_fcs,
                        computed,
                    });
                }
                if ed != ED {
                    return Err(FdlError::BadEndDelimiter(ed));
                }

                let kind = if sd == SD1 { Sd::Sd1 } else { Sd::Sd3 };

                Self::parse_data(kind, buf[0], buf[1], buf[2], &buf[3..3 + du_len])
                    .map(Telegram::Data)
            }
        }
    }

    fn parse_data(
        sd: Sd,
        da_raw: u8,
        sa_raw: u8,
        fc_byte: u8,
        du: &[u8],
    ) -> Result<DataTelegram, FdlError> {
        let fc = FunctionCode::from_byte(fc_byte)?;

        let mut at = 0;

        let dsap = if da_raw & ADDRESS_EXT != 0 {
            let sap = *du.get(at).ok_or(FdlError::SapMismatch)?;
            at += 1;

            Some(sap)
        } else {
            None
        };

        let ssap = if sa_raw & ADDRESS_EXT != 0 {
            let sap = *du.get(at).ok_or(FdlError::SapMismatch)?;
            at += 1;

            Some(sap)
        } else {
            None
        };

        DataTelegram::with_sd(
            DataTelegramHeader {
                da: da_raw & ADDRESS_MASK,
                sa: sa_raw & ADDRESS_MASK,
                dsap,
                ssap,
                fc,
            },
            &du[at..],
            sd,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{baud::Baudrate, fdl::telegram::RequestFunction};
    use pretty_assertions::assert_eq;

    fn decoder() -> Decoder {
        Decoder::new(BusTiming::for_baudrate(Baudrate::B500000))
    }

    /// Feed a whole frame, requiring exactly one telegram event at the final byte.
    fn feed(dec: &mut Decoder, bytes: &[u8]) -> Telegram {
        let mut result = None;

        for (i, byte) in bytes.iter().enumerate() {
            match dec.push(*byte, 1_000 + i as u64) {
                Decoded::NeedMore => assert!(i + 1 < bytes.len(), "frame ended early"),
                Decoded::Telegram(t) => {
                    assert_eq!(i + 1, bytes.len(), "telegram before last byte");
                    result = Some(t);
                }
                Decoded::Error(e) => panic!("unexpected fault at byte {}: {}", i, e),
            }
        }

        result.expect("no telegram")
    }

    #[test]
    fn sd1_fdl_status_request() {
        let telegram = feed(&mut decoder(), &[0x10, 0x00, 0x02, 0x49, 0x4b, 0x16]);

        let data = telegram.as_data().unwrap();

        assert_eq!(data.sd, Sd::Sd1);
        assert_eq!(data.h.da, 0);
        assert_eq!(data.h.sa, 2);
        assert_eq!(
            data.h.fc,
            FunctionCode::request(RequestFunction::FdlStatus)
        );
        assert!(data.pdu.is_empty());
    }

    #[test]
    fn sd2_with_data_unit() {
        let telegram = feed(
            &mut decoder(),
            &[0x68, 0x07, 0x07, 0x68, 0x08, 0x02, 0x5d, 0x01, 0x02, 0x03, 0x04, 0x71, 0x16],
        );

        let data = telegram.as_data().unwrap();

        assert_eq!(data.h.da, 8);
        assert_eq!(data.h.sa, 2);
        assert_eq!(data.pdu.as_slice(), &[0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn short_confirmation() {
        assert_eq!(
            decoder().push(0xe5, 0),
            Decoded::Telegram(Telegram::ShortConfirmation)
        );
    }

    #[test]
    fn token_telegram() {
        let telegram = feed(&mut decoder(), &[0xdc, 0x03, 0x02]);

        assert_eq!(telegram, Telegram::Token(TokenTelegram { da: 3, sa: 2 }));
    }

    #[test]
    fn encode_decode_round_trip() {
        let original = DataTelegram::new(
            DataTelegramHeader {
                da: 8,
                sa: 2,
                dsap: Some(61),
                ssap: Some(62),
                fc: FunctionCode::Request {
                    function: RequestFunction::SrdLow,
                    fcb: true,
                    fcv: true,
                },
            },
            &[0xb8, 0x10, 0x0b, 0x00, 0x12, 0x34, 0x00],
        )
        .unwrap();

        let mut buf = [0u8; telegram::MAX_TELEGRAM];
        let len = original.encode(&mut buf).unwrap();

        let decoded = feed(&mut decoder(), &buf[..len]);

        assert_eq!(decoded, Telegram::Data(original));
    }

    #[test]
    fn idle_discards_noise_without_fault() {
        let mut dec = decoder();

        assert_eq!(dec.push(0x00, 0), Decoded::NeedMore);
        assert_eq!(dec.push(0xff, 1), Decoded::NeedMore);
        assert_eq!(dec.counters().discarded, 2);
        assert_eq!(dec.counters().faults, 0);

        // Still able to synchronise on a following frame.
        feed(&mut dec, &[0x10, 0x00, 0x02, 0x49, 0x4b, 0x16]);
        assert_eq!(dec.counters().telegrams, 1);
    }

    #[test]
    fn corrupt_fcs_is_a_fault() {
        let mut dec = decoder();
        let frame = [0x10, 0x00, 0x02, 0x49, 0x4c, 0x16];

        for byte in &frame[..5] {
            assert_eq!(dec.push(*byte, 0), Decoded::NeedMore);
        }

        assert_eq!(
            dec.push(frame[5], 0),
            Decoded::Error(FdlError::Checksum {
                received: 0x4c,
                computed: 0x4b,
            })
        );
        assert_eq!(dec.counters().faults, 1);
        assert!(dec.is_idle());
    }

    #[test]
    fn sd2_header_field_corruption() {
        // LE != LEr.
        let mut dec = decoder();
        dec.push(0x68, 0);
        dec.push(0x07, 1);
        assert_eq!(
            dec.push(0x08, 2),
            Decoded::Error(FdlError::LengthRepeatMismatch { le: 7, ler: 8 })
        );

        // LE out of range.
        let mut dec = decoder();
        dec.push(0x68, 0);
        dec.push(0x03, 1);
        dec.push(0x03, 2);
        assert_eq!(
            dec.push(0x68, 3),
            Decoded::Error(FdlError::LengthOutOfRange(3))
        );

        // Repeated delimiter corrupted.
        let mut dec = decoder();
        dec.push(0x68, 0);
        dec.push(0x07, 1);
        dec.push(0x07, 2);
        assert_eq!(
            dec.push(0x69, 3),
            Decoded::Error(FdlError::BadLengthDelimiter(0x69))
        );
    }

    #[test]
    fn bad_end_delimiter() {
        let mut dec = decoder();
        let frame = [0x10, 0x00, 0x02, 0x49, 0x4b, 0x17];

        for byte in &frame[..5] {
            dec.push(*byte, 0);
        }

        assert_eq!(
            dec.push(frame[5], 0),
            Decoded::Error(FdlError::BadEndDelimiter(0x17))
        );
    }

    #[test]
    fn stalled_frame_dropped_by_timeout() {
        let mut dec = decoder();

        dec.push(0x68, 1_000);
        dec.push(0x07, 1_022);

        // Tqui + Tsl at 500 kBd is 400 us; stall for much longer.
        assert!(dec.check_timeout(10_000));
        assert!(dec.is_idle());
        assert_eq!(dec.counters().timeouts, 1);

        // A fresh frame parses normally afterwards.
        feed(&mut dec, &[0x10, 0x00, 0x02, 0x49, 0x4b, 0x16]);
    }

    #[test]
    fn late_byte_restarts_hunt() {
        let mut dec = decoder();

        dec.push(0x68, 1_000);

        // This SD1 start arrives long after the stalled SD2 header; the partial frame is
        // dropped and the byte starts a new frame.
        dec.push(0x10, 50_000);
        for byte in &[0x00, 0x02, 0x49, 0x4b] {
            dec.push(*byte, 50_001);
        }

        assert!(matches!(
            dec.push(0x16, 50_002),
            Decoded::Telegram(Telegram::Data(_))
        ));
    }
}
