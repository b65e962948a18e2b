//! DP, the Decentralised Peripherals application layer.
//!
//! A class 1 master walks every configured slave through the bring-up sequence (FDL status
//! probe, diagnosis, parameterisation via Set_Prm, configuration check via Chk_Cfg,
//! readiness diagnosis) and then exchanges process data cyclically, interleaving diagnosis
//! reads when the slave requests them or a configured period elapses.
//!
//! [`master::DpMaster`] owns the bus and the slave list; [`slave::SlaveDesc`] describes one
//! device and [`slave::DpSlave`] tracks its live state.

pub mod diag;
pub mod master;
pub mod slave;
pub mod telegram;

pub use diag::SlaveDiag;
pub use master::{DpMaster, DpMasterConfig, SlaveId};
pub use slave::{DpSlave, DpSlaveState, SlaveDesc};
pub use telegram::GlobalControlCommand;

/// DP service access points, from the perspective of a request's destination.
pub mod sap {
    /// Master-to-master data exchange.
    pub const MASTER_DIAG: u8 = 54;
    /// Global_Control multicast.
    pub const GLOBAL_CONTROL: u8 = 57;
    /// Set_Slave_Address.
    pub const SET_SLAVE_ADDRESS: u8 = 58;
    /// Read inputs.
    pub const RD_INP: u8 = 59;
    /// Slave_Diagnosis.
    pub const SLAVE_DIAG: u8 = 60;
    /// Set_Prm.
    pub const SET_PRM: u8 = 61;
    /// Chk_Cfg.
    pub const CHK_CFG: u8 = 62;

    /// The source SAP a class 1 master uses for all of the above.
    pub const CLASS1_SSAP: u8 = 62;
}
