//! The consumer side of a GSD device description.
//!
//! Parsing GSD text files is a separate concern; this module defines the data a parser (or a
//! hand-written profile) must deliver so a [`SlaveDesc`] can be derived from it. The
//! derivation is strict: sizes, module names and capability flags outside of what the
//! profile declares are rejected with a [`ConfigError`] rather than coerced.

use crate::{
    baud::Baudrate,
    dp::slave::{SlaveDesc, MAX_USER_PRM_DATA},
    error::ConfigError,
    fdl::telegram::MAX_PDU,
};

/// One pluggable module of a modular slave: its order name and the configuration identifier
/// bytes it contributes to Chk_Cfg.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GsdModule {
    /// Order name, as listed in the device description.
    pub name: heapless::String<32>,
    /// Configuration identifier bytes.
    pub cfg_bytes: heapless::Vec<u8, 16>,
}

/// Everything the DP core consumes from a device description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GsdProfile {
    /// The device's ident number.
    pub ident_number: u16,
    /// Baud rates the device supports.
    pub supported_bauds: heapless::Vec<Baudrate, 10>,
    /// Maximum station delay per baud rate, in bit times.
    pub max_tsdr: heapless::Vec<(Baudrate, u16), 10>,
    /// Upper bound the device places on user parameter data length.
    pub max_user_prm_data_len: u8,
    /// Default user parameter data.
    pub default_user_prm_data: heapless::Vec<u8, MAX_USER_PRM_DATA>,
    /// Pluggable modules. Empty for a compact station.
    pub modules: heapless::Vec<GsdModule, 32>,
    /// Configuration identifier bytes of a compact station, used when no modules are picked.
    pub fixed_cfg: heapless::Vec<u8, MAX_PDU>,
    /// The device supports sync mode.
    pub sync_supported: bool,
    /// The device supports freeze mode.
    pub freeze_supported: bool,
    /// The device refuses to run without a response watchdog.
    pub watchdog_required: bool,
}

impl GsdProfile {
    /// An empty profile for `ident_number`; fields are filled in by the parser.
    pub fn new(ident_number: u16) -> Self {
        Self {
            ident_number,
            supported_bauds: heapless::Vec::new(),
            max_tsdr: heapless::Vec::new(),
            max_user_prm_data_len: MAX_USER_PRM_DATA as u8,
            default_user_prm_data: heapless::Vec::new(),
            modules: heapless::Vec::new(),
            fixed_cfg: heapless::Vec::new(),
            sync_supported: false,
            freeze_supported: false,
            watchdog_required: false,
        }
    }

    /// `true` if the device declares support for `baudrate`.
    pub fn supports_baudrate(&self, baudrate: Baudrate) -> bool {
        self.supported_bauds.contains(&baudrate)
    }

    /// Maximum station delay at `baudrate`, in bit times.
    pub fn max_tsdr(&self, baudrate: Baudrate) -> Option<u16> {
        self.max_tsdr
            .iter()
            .find(|(rate, _)| *rate == baudrate)
            .map(|(_, tsdr)| *tsdr)
    }

    /// Look up a module by order name.
    pub fn module(&self, name: &str) -> Option<&GsdModule> {
        self.modules.iter().find(|m| m.name.as_str() == name)
    }
}

/// Per-slave options from the bus configuration, combined with a [`GsdProfile`] to derive a
/// [`SlaveDesc`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlaveOptions {
    /// Response watchdog period in milliseconds; 0 disables.
    pub watchdog_ms: u32,
    /// Group ident mask for Global_Control addressing.
    pub group_ident: u8,
    /// Request sync mode.
    pub sync_mode: bool,
    /// Request freeze mode.
    pub freeze_mode: bool,
    /// Read diagnosis every this many data exchanges; 0 on demand only.
    pub diag_period: u32,
    /// Minimum station delay to parameterise, in bit times; 0 keeps the device default.
    pub min_tsdr: u8,
    /// Station name.
    pub name: Option<heapless::String<32>>,
}

/// Input and output byte counts described by configuration identifier bytes.
///
/// The plain identifier format is accepted: bits 0..=3 carry the unit count minus one, bit 6
/// selects word units, bits 4 and 5 flag input and output directions, and `0x00` is an empty
/// slot. The special (variable length) identifier format is not implemented and rejected
/// explicitly.
pub fn io_sizes_from_cfg(cfg: &[u8]) -> Result<(usize, usize), ConfigError> {
    let mut inputs = 0usize;
    let mut outputs = 0usize;

    for &byte in cfg {
        if byte == 0x00 {
            // Empty slot.
            continue;
        }

        if byte & 0x30 == 0 {
            return Err(ConfigError::CfgFormatUnsupported(byte));
        }

        let units = usize::from(byte & 0x0f) + 1;
        let len = if byte & 0x40 != 0 { units * 2 } else { units };

        if byte & 0x10 != 0 {
            inputs += len;
        }
        if byte & 0x20 != 0 {
            outputs += len;
        }
    }

    if inputs > MAX_PDU {
        return Err(ConfigError::IoTooLong(inputs));
    }
    if outputs > MAX_PDU {
        return Err(ConfigError::IoTooLong(outputs));
    }

    Ok((inputs, outputs))
}

impl SlaveDesc {
    /// Derive a slave descriptor from a device description.
    ///
    /// `modules` selects module order names for a modular station, in slot order; leave it
    /// empty to use the profile's fixed configuration.
    pub fn try_from_gsd(
        profile: &GsdProfile,
        address: u8,
        baudrate: Baudrate,
        modules: &[&str],
        options: &SlaveOptions,
    ) -> Result<Self, ConfigError> {
        if !profile.supports_baudrate(baudrate) {
            return Err(ConfigError::BaudUnsupported(baudrate.bits_per_second()));
        }
        if profile.watchdog_required && options.watchdog_ms == 0 {
            return Err(ConfigError::WatchdogRequired);
        }

        let mut cfg_data = heapless::Vec::<u8, MAX_PDU>::new();

        if modules.is_empty() {
            cfg_data
                .extend_from_slice(&profile.fixed_cfg)
                .map_err(|_| ConfigError::CfgDataTooLong(profile.fixed_cfg.len()))?;
        } else {
            for name in modules {
                let module = profile.module(name).ok_or(ConfigError::UnknownModule)?;

                cfg_data
                    .extend_from_slice(&module.cfg_bytes)
                    .map_err(|_| {
                        ConfigError::CfgDataTooLong(cfg_data.len() + module.cfg_bytes.len())
                    })?;
            }
        }

        let (input_len, output_len) = io_sizes_from_cfg(&cfg_data)?;

        if profile.default_user_prm_data.len() > usize::from(profile.max_user_prm_data_len) {
            return Err(ConfigError::PrmDataTooLong(
                profile.default_user_prm_data.len(),
            ));
        }

        let desc = Self {
            address,
            ident_number: profile.ident_number,
            user_prm_data: profile.default_user_prm_data.clone(),
            cfg_data,
            input_len: input_len as u8,
            output_len: output_len as u8,
            watchdog_ms: options.watchdog_ms,
            group_ident: options.group_ident,
            sync_mode: options.sync_mode,
            freeze_mode: options.freeze_mode,
            sync_supported: profile.sync_supported,
            freeze_supported: profile.freeze_supported,
            min_tsdr: options.min_tsdr,
            diag_period: options.diag_period,
            name: options.name.clone(),
        };

        desc.validate()?;

        Ok(desc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> GsdProfile {
        let mut profile = GsdProfile::new(0xb757);

        profile.supported_bauds =
            heapless::Vec::from_slice(&[Baudrate::B19200, Baudrate::B500000]).unwrap();
        profile.max_tsdr = heapless::Vec::from_slice(&[(Baudrate::B500000, 100)]).unwrap();

        profile
            .modules
            .push(GsdModule {
                name: heapless::String::try_from("8 DI").unwrap(),
                cfg_bytes: heapless::Vec::from_slice(&[0x10]).unwrap(),
            })
            .unwrap();
        profile
            .modules
            .push(GsdModule {
                name: heapless::String::try_from("4 AO").unwrap(),
                cfg_bytes: heapless::Vec::from_slice(&[0x63]).unwrap(),
            })
            .unwrap();

        profile
    }

    #[test]
    fn io_sizes_for_plain_identifiers() {
        // 1 input byte, empty slot, 4 output words, 2 in/out bytes.
        assert_eq!(io_sizes_from_cfg(&[0x10, 0x00, 0x63, 0x31]), Ok((3, 10)));
    }

    #[test]
    fn special_format_rejected() {
        assert_eq!(
            io_sizes_from_cfg(&[0x41]),
            Err(ConfigError::CfgFormatUnsupported(0x41))
        );
    }

    #[test]
    fn derive_desc_from_modules() {
        let desc = SlaveDesc::try_from_gsd(
            &profile(),
            8,
            Baudrate::B500000,
            &["8 DI", "4 AO"],
            &SlaveOptions {
                watchdog_ms: 200,
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(desc.cfg_data.as_slice(), &[0x10, 0x63]);
        assert_eq!(desc.input_len, 1);
        assert_eq!(desc.output_len, 8);
        assert_eq!(desc.ident_number, 0xb757);
    }

    #[test]
    fn unknown_module_rejected() {
        assert_eq!(
            SlaveDesc::try_from_gsd(
                &profile(),
                8,
                Baudrate::B500000,
                &["16 DO"],
                &SlaveOptions::default(),
            ),
            Err(ConfigError::UnknownModule)
        );
    }

    #[test]
    fn unsupported_baud_rejected() {
        assert_eq!(
            SlaveDesc::try_from_gsd(
                &profile(),
                8,
                Baudrate::B12000000,
                &[],
                &SlaveOptions::default(),
            ),
            Err(ConfigError::BaudUnsupported(12_000_000))
        );
    }

    #[test]
    fn required_watchdog_enforced() {
        let mut profile = profile();
        profile.watchdog_required = true;

        assert_eq!(
            SlaveDesc::try_from_gsd(&profile, 8, Baudrate::B500000, &[], &SlaveOptions::default()),
            Err(ConfigError::WatchdogRequired)
        );
    }
}
