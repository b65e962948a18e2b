//! Bus configuration files.
//!
//! An INI format with one `[PROFIBUS]`, `[PHY]` and `[DP]` section plus any number of
//! `[SLAVE_*]` sections:
//!
//! ```ini
//! [PROFIBUS]
//! debug=1
//!
//! [PHY]
//! type=serial
//! dev=/dev/ttyS0
//! baud=19200
//!
//! [DP]
//! master_class=1
//! master_addr=2
//!
//! [SLAVE_8]
//! addr=8
//! gsd=et200s.gsd
//! module_1=8 DI
//! module_2=4 AO
//! watchdog_ms=300
//! output_size=8
//! input_size=1
//! ```
//!
//! Loading is strict: unknown enumeration values, out of range numbers and a missing master
//! address are [`ConfigError`]s, never silently defaulted. The GSD files referenced by
//! `gsd=` keys are resolved by the application; this module only carries the paths.

use crate::{
    baud::Baudrate,
    error::{ConfigError, Error},
};
use configparser::ini::Ini;
use std::path::Path;

/// Which transceiver driver to instantiate.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PhyKind {
    /// A real serial port, [`crate::phy::serial::SerialPhy`].
    Serial,
    /// Loopback, [`crate::phy::simulator::LoopbackPhy`].
    Dummy,
    /// Scripted slave, [`crate::phy::simulator::SimulatedSlavePhy`].
    DummySlave,
    /// FPGA offload transceiver; a separate project, recognised but not instantiable here.
    Fpga,
}

/// The `[PHY]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhyConf {
    /// Driver selection.
    pub kind: PhyKind,
    /// Device path, for drivers that need one.
    pub dev: String,
    /// Baud rate.
    pub baudrate: Baudrate,
}

/// One `[SLAVE_*]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlaveConf {
    /// Station address.
    pub address: u8,
    /// Path of the GSD file describing the device, if configured.
    pub gsd: Option<String>,
    /// Module order names, from `module_1..module_N`.
    pub modules: Vec<String>,
    /// Request sync mode.
    pub sync_mode: bool,
    /// Request freeze mode.
    pub freeze_mode: bool,
    /// Group ident mask.
    pub group_mask: u8,
    /// Response watchdog period in milliseconds; 0 disables.
    pub watchdog_ms: u32,
    /// Expected input size in bytes.
    pub input_size: u8,
    /// Output size in bytes.
    pub output_size: u8,
    /// Diagnosis period in data exchange rounds; 0 on demand only.
    pub diag_period: u32,
}

/// A complete parsed bus configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusConf {
    /// Logging verbosity: 0 quiet, 1 operational, 2 telegram level.
    pub debug: u8,
    /// Transceiver configuration.
    pub phy: PhyConf,
    /// The master's station address.
    pub master_addr: u8,
    /// Slave sections, in file order.
    pub slaves: Vec<SlaveConf>,
}

fn invalid(section: &str, key: &str) -> ConfigError {
    crate::fmt::error!("config option {}.{} is invalid", section, key);

    ConfigError::InvalidOption
}

fn get_uint(ini: &Ini, section: &str, key: &str, default: u64) -> Result<u64, ConfigError> {
    ini.getuint(section, key)
        .map_err(|_| invalid(section, key))
        .map(|v| v.unwrap_or(default))
}

fn get_bool(ini: &Ini, section: &str, key: &str) -> Result<bool, ConfigError> {
    ini.getboolcoerce(section, key)
        .map_err(|_| invalid(section, key))
        .map(|v| v.unwrap_or(false))
}

fn get_u8(ini: &Ini, section: &str, key: &str, default: u8) -> Result<u8, ConfigError> {
    u8::try_from(get_uint(ini, section, key, u64::from(default))?)
        .map_err(|_| invalid(section, key))
}

impl BusConf {
    /// Parse a configuration from INI text.
    pub fn from_ini_str(content: &str) -> Result<Self, Error> {
        let mut ini = Ini::new();

        ini.read(content.to_string()).map_err(|e| {
            crate::fmt::error!("config parse failed: {}", e);

            Error::Config(ConfigError::InvalidOption)
        })?;

        let debug = get_u8(&ini, "PROFIBUS", "debug", 0)?;

        let kind = match ini
            .get("PHY", "type")
            .ok_or(ConfigError::MissingOption)?
            .as_str()
        {
            "serial" => PhyKind::Serial,
            "dummy" => PhyKind::Dummy,
            "dummy_slave" => PhyKind::DummySlave,
            "fpga" => PhyKind::Fpga,
            _ => return Err(invalid("PHY", "type").into()),
        };

        let dev = ini.get("PHY", "dev").unwrap_or_default();

        if kind == PhyKind::Serial && dev.is_empty() {
            return Err(ConfigError::MissingOption.into());
        }

        let baud = get_uint(&ini, "PHY", "baud", 19_200)?;
        let baudrate = Baudrate::from_bits_per_second(
            u32::try_from(baud).map_err(|_| invalid("PHY", "baud"))?,
        )?;

        let master_class = get_u8(&ini, "DP", "master_class", 1)?;

        if master_class != 1 {
            return Err(ConfigError::MasterClassUnsupported(master_class).into());
        }

        let master_addr = match ini.getuint("DP", "master_addr") {
            Ok(Some(addr)) => u8::try_from(addr).map_err(|_| invalid("DP", "master_addr"))?,
            Ok(None) => return Err(ConfigError::MissingOption.into()),
            Err(_) => return Err(invalid("DP", "master_addr").into()),
        };

        if master_addr > crate::fdl::telegram::MAX_STATION_ADDRESS {
            return Err(ConfigError::AddressOutOfRange(master_addr).into());
        }

        let mut slaves = Vec::new();

        for section in ini.sections() {
            if !section.starts_with("slave") {
                continue;
            }

            slaves.push(Self::parse_slave(&ini, &section)?);
        }

        Ok(Self {
            debug,
            phy: PhyConf {
                kind,
                dev,
                baudrate,
            },
            master_addr,
            slaves,
        })
    }

    /// Load a configuration file.
    pub fn from_file(path: &Path) -> Result<Self, Error> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::fmt::error!("cannot read {}: {}", path.display(), e);

            Error::Config(ConfigError::MissingOption)
        })?;

        Self::from_ini_str(&content)
    }

    fn parse_slave(ini: &Ini, section: &str) -> Result<SlaveConf, Error> {
        let address = match ini.getuint(section, "addr") {
            Ok(Some(addr)) => u8::try_from(addr).map_err(|_| invalid(section, "addr"))?,
            Ok(None) => return Err(ConfigError::MissingOption.into()),
            Err(_) => return Err(invalid(section, "addr").into()),
        };

        let mut modules = Vec::new();

        for n in 1.. {
            match ini.get(section, &format!("module_{}", n)) {
                Some(module) => modules.push(module),
                None => break,
            }
        }

        Ok(SlaveConf {
            address,
            gsd: ini.get(section, "gsd"),
            modules,
            sync_mode: get_bool(ini, section, "sync_mode")?,
            freeze_mode: get_bool(ini, section, "freeze_mode")?,
            group_mask: get_u8(ini, section, "group_mask", 0)?,
            watchdog_ms: get_uint(ini, section, "watchdog_ms", 0)?
                .try_into()
                .map_err(|_| invalid(section, "watchdog_ms"))?,
            input_size: get_u8(ini, section, "input_size", 0)?,
            output_size: get_u8(ini, section, "output_size", 0)?,
            diag_period: get_uint(ini, section, "diag_period", 0)?
                .try_into()
                .map_err(|_| invalid(section, "diag_period"))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const EXAMPLE: &str = r#"
[PROFIBUS]
debug=1

[PHY]
type=dummy_slave
baud=500000

[DP]
master_class=1
master_addr=2

[SLAVE_8]
addr=8
gsd=et200s.gsd
module_1=8 DI
module_2=4 AO
sync_mode=0
watchdog_ms=300
input_size=1
output_size=8
diag_period=16
"#;

    #[test]
    fn parse_example() {
        let conf = BusConf::from_ini_str(EXAMPLE).unwrap();

        assert_eq!(conf.debug, 1);
        assert_eq!(conf.phy.kind, PhyKind::DummySlave);
        assert_eq!(conf.phy.baudrate, Baudrate::B500000);
        assert_eq!(conf.master_addr, 2);

        let slave = &conf.slaves[0];

        assert_eq!(slave.address, 8);
        assert_eq!(slave.gsd.as_deref(), Some("et200s.gsd"));
        assert_eq!(slave.modules, vec!["8 DI".to_string(), "4 AO".to_string()]);
        assert_eq!(slave.watchdog_ms, 300);
        assert_eq!(slave.input_size, 1);
        assert_eq!(slave.output_size, 8);
        assert_eq!(slave.diag_period, 16);
    }

    #[test]
    fn master_addr_is_mandatory() {
        let content = "[PHY]\ntype=dummy\n";

        assert_eq!(
            BusConf::from_ini_str(content),
            Err(Error::Config(ConfigError::MissingOption))
        );
    }

    #[test]
    fn unknown_phy_type_rejected() {
        let content = "[PHY]\ntype=carrier_pigeon\n[DP]\nmaster_addr=2\n";

        assert_eq!(
            BusConf::from_ini_str(content),
            Err(Error::Config(ConfigError::InvalidOption))
        );
    }

    #[test]
    fn serial_phy_needs_a_device() {
        let content = "[PHY]\ntype=serial\nbaud=19200\n[DP]\nmaster_addr=2\n";

        assert_eq!(
            BusConf::from_ini_str(content),
            Err(Error::Config(ConfigError::MissingOption))
        );
    }

    #[test]
    fn nonstandard_baud_rejected() {
        let content = "[PHY]\ntype=dummy\nbaud=115200\n[DP]\nmaster_addr=2\n";

        assert_eq!(
            BusConf::from_ini_str(content),
            Err(Error::Config(ConfigError::BaudUnsupported(115_200)))
        );
    }
}
