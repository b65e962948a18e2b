//! Proficrab error types.

use crate::fdl::telegram::{FunctionCode, ResponseStatus};

/// A proficrab error.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Error {
    /// A physical layer (UART/RS-485) error occurred.
    Phy(PhyError),
    /// A fieldbus data link layer error occurred.
    Fdl(FdlError),
    /// A DP (Decentralised Peripherals) layer error occurred.
    Dp(DpError),
    /// An invalid configuration was detected at construction time.
    Config(ConfigError),
    /// An internal error occurred. This indicates something that shouldn't happen within
    /// proficrab.
    Internal,
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::Phy(e) => write!(f, "phy: {}", e),
            Error::Fdl(e) => write!(f, "fdl: {}", e),
            Error::Dp(e) => write!(f, "dp: {}", e),
            Error::Config(e) => write!(f, "config: {}", e),
            Error::Internal => f.write_str("internal error"),
        }
    }
}

/// Low level transceiver error.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum PhyError {
    /// The device could not be opened.
    Open,
    /// The device is not open.
    NotOpen,
    /// A read or write on the underlying device failed.
    Io,
    /// A parity or stop bit error was detected on a received character.
    Framing,
    /// The line has not been idle for long enough to allow a transmission.
    ///
    /// Returned by non-blocking drivers; blocking drivers wait for the synchronisation period
    /// instead.
    Busy,
    /// A frame was only partially written to the device.
    PartialSend {
        /// Frame length in bytes.
        len: usize,

        /// The number of bytes sent.
        sent: usize,
    },
    /// The device disappeared and cannot be recovered.
    Fatal,
}

impl core::fmt::Display for PhyError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            PhyError::Open => f.write_str("failed to open device"),
            PhyError::NotOpen => f.write_str("device is not open"),
            PhyError::Io => f.write_str("device I/O"),
            PhyError::Framing => f.write_str("parity or framing error"),
            PhyError::Busy => f.write_str("line is not idle"),
            PhyError::PartialSend { len, sent } => {
                write!(f, "telegram of {} bytes only had {} bytes sent", len, sent)
            }
            PhyError::Fatal => f.write_str("device disappeared"),
        }
    }
}

/// Fieldbus data link layer error.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum FdlError {
    /// A received telegram failed its checksum.
    Checksum {
        /// FCS byte received on the wire.
        received: u8,
        /// FCS computed over the received header and data unit.
        computed: u8,
    },
    /// An SD2 telegram carried a length byte outside of the valid 4..=249 range.
    LengthOutOfRange(u8),
    /// The two length bytes of an SD2 telegram do not match.
    LengthRepeatMismatch {
        /// First length byte.
        le: u8,
        /// Repeated length byte.
        ler: u8,
    },
    /// The repeated start delimiter of an SD2 telegram was not `0x68`.
    BadLengthDelimiter(u8),
    /// The end delimiter of a telegram was not `0x16`.
    BadEndDelimiter(u8),
    /// The function code byte uses a reserved or unknown encoding.
    BadFunctionCode(u8),
    /// A telegram was truncated by an inter-character timeout mid-frame.
    Truncated,
    /// A data unit is too long to fit a telegram.
    TooLong,
    /// A telegram which requires service access points was built without them, or vice versa.
    SapMismatch,
    /// No response telegram started within the slot time, after all retries.
    SlotTimeout {
        /// Responder address.
        address: u8,
    },
    /// The responder reported that it is out of resources, after all retries.
    ///
    /// For a DP slave in cyclic operation this usually means its watchdog has expired and it
    /// has left the Data_Exchange state.
    NoResource {
        /// Responder address.
        address: u8,
    },
    /// The responder answered with a negative acknowledgement other than "no resource".
    Negative {
        /// Responder address.
        address: u8,
        /// Status reported in the response function code.
        status: ResponseStatus,
    },
    /// A request was submitted while another one is outstanding.
    Outstanding,
}

impl core::fmt::Display for FdlError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            FdlError::Checksum { received, computed } => {
                write!(
                    f,
                    "FCS mismatch: received {:#04x}, computed {:#04x}",
                    received, computed
                )
            }
            FdlError::LengthOutOfRange(le) => write!(f, "SD2 length {} out of range", le),
            FdlError::LengthRepeatMismatch { le, ler } => {
                write!(f, "SD2 length bytes differ: LE {}, LEr {}", le, ler)
            }
            FdlError::BadLengthDelimiter(sd) => {
                write!(f, "SD2 repeated delimiter is {:#04x}, not 0x68", sd)
            }
            FdlError::BadEndDelimiter(ed) => {
                write!(f, "end delimiter is {:#04x}, not 0x16", ed)
            }
            FdlError::BadFunctionCode(fc) => write!(f, "unknown function code {:#04x}", fc),
            FdlError::Truncated => f.write_str("telegram truncated mid-frame"),
            FdlError::TooLong => f.write_str("data unit too long for telegram"),
            FdlError::SapMismatch => f.write_str("service access point mismatch"),
            FdlError::SlotTimeout { address } => {
                write!(f, "station {} did not respond within the slot time", address)
            }
            FdlError::NoResource { address } => {
                write!(f, "station {} has no resources for the request", address)
            }
            FdlError::Negative { address, status } => {
                write!(f, "station {} responded negatively: {}", address, status)
            }
            FdlError::Outstanding => f.write_str("another request is outstanding"),
        }
    }
}

/// DP application layer error.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum DpError {
    /// The slave does not exist on the bus according to its own diagnosis.
    NonExistent {
        /// Slave address.
        address: u8,
    },
    /// The slave rejected a Set_Prm request.
    SetPrmRejected {
        /// Slave address.
        address: u8,
    },
    /// The slave rejected a Chk_Cfg request.
    ChkCfgRejected {
        /// Slave address.
        address: u8,
    },
    /// Diagnosis reports a configuration fault after Chk_Cfg.
    CfgFault {
        /// Slave address.
        address: u8,
    },
    /// Diagnosis reports a parameter fault after Set_Prm.
    PrmFault {
        /// Slave address.
        address: u8,
    },
    /// The slave never confirmed readiness after parameterisation.
    NotReady {
        /// Slave address.
        address: u8,
    },
    /// A response carried an unexpected function code for the outstanding service.
    UnexpectedResponse {
        /// Slave address.
        address: u8,
        /// The function code received.
        function_code: FunctionCode,
    },
    /// A Data_Exchange response length does not match the configured input size.
    InputLengthMismatch {
        /// Slave address.
        address: u8,
        /// Configured input size in bytes.
        expected: u8,
        /// Received data unit length.
        received: u8,
    },
    /// Output data written by the application does not match the configured output size.
    OutputLengthMismatch {
        /// Slave address.
        address: u8,
        /// Configured output size in bytes.
        expected: u8,
        /// Written length.
        received: u8,
    },
    /// A diagnosis response was too short or malformed.
    InvalidDiagnosis {
        /// Slave address.
        address: u8,
    },
    /// A slave produced too many consecutive hard faults and the master is configured to
    /// treat that as fatal.
    FaultLimitReached {
        /// Slave address.
        address: u8,
        /// Consecutive fault count at promotion time.
        faults: u8,
    },
    /// A process image signal does not fit the buffer it is mapped onto.
    SignalOutOfBounds,
    /// A value of the wrong type was packed into a process image signal.
    SignalTypeMismatch,
}

impl core::fmt::Display for DpError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            DpError::NonExistent { address } => write!(f, "slave {} does not exist", address),
            DpError::SetPrmRejected { address } => {
                write!(f, "slave {} rejected parameterisation", address)
            }
            DpError::ChkCfgRejected { address } => {
                write!(f, "slave {} rejected configuration", address)
            }
            DpError::CfgFault { address } => {
                write!(f, "slave {} diagnosis reports a configuration fault", address)
            }
            DpError::PrmFault { address } => {
                write!(f, "slave {} diagnosis reports a parameter fault", address)
            }
            DpError::NotReady { address } => {
                write!(f, "slave {} did not become ready for data exchange", address)
            }
            DpError::UnexpectedResponse {
                address,
                function_code,
            } => {
                write!(f, "slave {} sent unexpected response {:?}", address, function_code)
            }
            DpError::InputLengthMismatch {
                address,
                expected,
                received,
            } => write!(
                f,
                "slave {} returned {} bytes of input data, expected {}",
                address, received, expected
            ),
            DpError::OutputLengthMismatch {
                address,
                expected,
                received,
            } => write!(
                f,
                "{} bytes of output data written for slave {}, expected {}",
                received, address, expected
            ),
            DpError::InvalidDiagnosis { address } => {
                write!(f, "slave {} sent a malformed diagnosis", address)
            }
            DpError::FaultLimitReached { address, faults } => {
                write!(f, "slave {} faulted {} times in a row", address, faults)
            }
            DpError::SignalOutOfBounds => f.write_str("signal does not fit process data"),
            DpError::SignalTypeMismatch => f.write_str("signal value type mismatch"),
        }
    }
}

/// Invalid configuration, detected at construction time.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum ConfigError {
    /// A station address is outside of the valid 0..=125 range.
    AddressOutOfRange(u8),
    /// Two slaves were registered with the same address.
    DuplicateAddress(u8),
    /// The slave list is full.
    TooManySlaves,
    /// User parameter data exceeds the 237 byte wire limit.
    PrmDataTooLong(usize),
    /// Configuration data exceeds the 244 byte wire limit.
    CfgDataTooLong(usize),
    /// Input or output size exceeds the 244 byte data unit limit.
    IoTooLong(usize),
    /// Sync mode was requested for a slave that does not support it.
    SyncUnsupported,
    /// Freeze mode was requested for a slave that does not support it.
    FreezeUnsupported,
    /// The device description requires a watchdog but none was configured.
    WatchdogRequired,
    /// The watchdog period cannot be represented by the two wire factors.
    WatchdogOutOfRange(u32),
    /// The baud rate is not one of the standard PROFIBUS rates, or is not supported by a
    /// configured slave.
    BaudUnsupported(u32),
    /// A configuration identifier byte uses a format this master does not implement.
    CfgFormatUnsupported(u8),
    /// A module name does not exist in the device description.
    UnknownModule,
    /// Only master class 1 is supported.
    MasterClassUnsupported(u8),
    /// A config file option has an invalid or unparseable value.
    InvalidOption,
    /// A required config file option is missing.
    MissingOption,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ConfigError::AddressOutOfRange(addr) => {
                write!(f, "station address {} out of range 0..=125", addr)
            }
            ConfigError::DuplicateAddress(addr) => {
                write!(f, "duplicate slave address {}", addr)
            }
            ConfigError::TooManySlaves => f.write_str("slave list is full"),
            ConfigError::PrmDataTooLong(len) => {
                write!(f, "user parameter data of {} bytes exceeds 237 byte limit", len)
            }
            ConfigError::CfgDataTooLong(len) => {
                write!(f, "configuration data of {} bytes exceeds 244 byte limit", len)
            }
            ConfigError::IoTooLong(len) => {
                write!(f, "process data size of {} bytes exceeds 244 byte limit", len)
            }
            ConfigError::SyncUnsupported => f.write_str("slave does not support sync mode"),
            ConfigError::FreezeUnsupported => f.write_str("slave does not support freeze mode"),
            ConfigError::WatchdogRequired => {
                f.write_str("device description requires a watchdog")
            }
            ConfigError::WatchdogOutOfRange(ms) => {
                write!(f, "watchdog period of {} ms is not representable", ms)
            }
            ConfigError::BaudUnsupported(baud) => write!(f, "unsupported baud rate {}", baud),
            ConfigError::CfgFormatUnsupported(byte) => {
                write!(f, "unsupported configuration identifier {:#04x}", byte)
            }
            ConfigError::UnknownModule => f.write_str("module not found in device description"),
            ConfigError::MasterClassUnsupported(class) => {
                write!(f, "master class {} is not supported (only class 1)", class)
            }
            ConfigError::InvalidOption => f.write_str("invalid config option value"),
            ConfigError::MissingOption => f.write_str("missing config option"),
        }
    }
}

impl From<PhyError> for Error {
    fn from(e: PhyError) -> Self {
        Self::Phy(e)
    }
}

impl From<FdlError> for Error {
    fn from(e: FdlError) -> Self {
        Self::Fdl(e)
    }
}

impl From<DpError> for Error {
    fn from(e: DpError) -> Self {
        Self::Dp(e)
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}
