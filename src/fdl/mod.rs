//! FDL, the fieldbus data link layer.
//!
//! [`telegram`] models the five PROFIBUS telegram formats and encodes them to wire bytes.
//! [`decoder`] reassembles telegrams from a received byte stream one character at a time.
//! [`station`] drives the request/response cycle for a single active station: synchronisation
//! gap, transmission, slot time supervision, retries and frame count bit bookkeeping.

pub mod decoder;
pub mod station;
pub mod telegram;

pub use decoder::{Decoded, Decoder, DecoderCounters};
pub use station::{FdlStation, StationCounters, Transfer};
pub use telegram::{
    DataTelegram, DataTelegramHeader, FunctionCode, RequestFunction, ResponseStatus, Sd,
    StationType, Telegram, TokenTelegram,
};
