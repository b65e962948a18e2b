//! A pure Rust PROFIBUS-DP class 1 master.
//!
//! Proficrab drives a set of configured DP slaves from power-on to cyclic data exchange over
//! an RS-485 serial line: FDL status probe, diagnosis, parameterisation (Set_Prm),
//! configuration check (Chk_Cfg), readiness diagnosis, then Data_Exchange with watchdog
//! supervision and on-demand or periodic diagnosis reads.
//!
//! The stack is layered the way the protocol is:
//!
//! - [`phy`]: transceivers. A blocking serial port driver (`std`), plus deterministic
//!   simulators used by the test suite and demos.
//! - [`fdl`]: telegram codec, streaming reassembly and the single-request station engine
//!   with slot time supervision, retries and frame count bit tracking.
//! - [`dp`]: the per-slave state machine and the round-robin master scheduler.
//!
//! Scheduling is single-threaded and cooperative: one owner thread calls
//! [`DpMaster::tick`](dp::DpMaster::tick) as often as it likes; every wait inside is bounded
//! by the bus timing profile derived from the baud rate.
//!
//! # Example
//!
//! ```rust
//! use proficrab::{
//!     dp::{DpMaster, DpMasterConfig, SlaveDesc},
//!     phy::simulator::SimulatedSlavePhy,
//!     Baudrate,
//! };
//!
//! let phy = SimulatedSlavePhy::new(Baudrate::B500000, 8, 0xb757);
//! let mut master: DpMaster<_, 8> = DpMaster::new(phy, 2, DpMasterConfig::default())?;
//!
//! let mut desc = SlaveDesc::new(8, 0xb757);
//! desc.output_len = 2;
//! desc.watchdog_ms = 300;
//!
//! let slave = master.add_slave(desc)?;
//!
//! master.initialize()?;
//!
//! while !master.is_connected() {
//!     master.tick()?;
//! }
//!
//! master.slave_mut(slave).unwrap().set_outputs(&[0xaa, 0x55])?;
//! master.tick()?;
//! # Ok::<(), proficrab::Error>(())
//! ```
//!
//! # Features
//!
//! - `std` (default): the serial port PHY driver, the config file loader and `log` output.
//! - `defmt`: logging via `defmt` for `no_std` targets.
//! - `serde`: `Serialize` implementations on error and state types.

#![cfg_attr(not(feature = "std"), no_std)]
#![deny(missing_docs)]
#![deny(trivial_casts)]
#![deny(trivial_numeric_casts)]
#![deny(unused_import_braces)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::private_intra_doc_links)]

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

pub mod baud;
#[cfg(feature = "std")]
pub mod conf;
pub mod dp;
pub mod error;
pub mod fdl;
pub mod gsd;
pub mod image;
pub mod phy;

pub use baud::{Baudrate, BusTiming};
pub use error::Error;
pub use phy::Phy;
