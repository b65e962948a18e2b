//! Drive a bus described by a config file.
//!
//! ```bash
//! cargo run --example confdrive -- --loglevel 1 demos/example.conf
//! ```
//!
//! GSD parsing is not wired up here; slave shapes are taken from the `input_size` and
//! `output_size` options and turned into plain configuration identifiers.

use proficrab::{
    conf::{BusConf, PhyKind, SlaveConf},
    dp::{DpMaster, DpMasterConfig, SlaveDesc},
    phy::{
        serial::SerialPhy,
        simulator::{LoopbackPhy, SimulatedSlavePhy},
    },
    Error, Phy,
};
use std::path::Path;

struct CmdLine {
    loglevel: u8,
    nice: Option<i32>,
    config_file: String,
}

impl CmdLine {
    /// `--loglevel N`, `--nice N`, positional config file.
    fn parse(mut args: impl Iterator<Item = String>) -> Result<Self, String> {
        let mut loglevel = 1u8;
        let mut nice = None;
        let mut config_file = None;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--loglevel" => {
                    loglevel = args
                        .next()
                        .and_then(|v| v.parse().ok())
                        .ok_or("--loglevel needs a number")?;
                }
                "--nice" => {
                    nice = Some(
                        args.next()
                            .and_then(|v| v.parse().ok())
                            .ok_or("--nice needs a number")?,
                    );
                }
                other if !other.starts_with('-') && config_file.is_none() => {
                    config_file = Some(other.to_string());
                }
                other => return Err(format!("unknown argument: {}", other)),
            }
        }

        Ok(Self {
            loglevel,
            nice,
            config_file: config_file.ok_or("missing config file argument")?,
        })
    }
}

#[cfg(unix)]
fn renice(nice: i32) {
    // Negative niceness needs privileges; failure is not fatal.
    if unsafe { libc::setpriority(libc::PRIO_PROCESS, 0, nice) } != 0 {
        log::warn!("could not set niceness to {}", nice);
    }
}

#[cfg(not(unix))]
fn renice(_nice: i32) {}

/// Plain configuration identifier bytes covering `input` and `output` bytes.
fn synthesize_cfg(input: u8, output: u8) -> heapless::Vec<u8, 244> {
    let mut cfg = heapless::Vec::new();

    let mut remaining = input;
    while remaining > 0 {
        let chunk = remaining.min(16);
        let _ = cfg.push(0x10 | (chunk - 1));
        remaining -= chunk;
    }

    let mut remaining = output;
    while remaining > 0 {
        let chunk = remaining.min(16);
        let _ = cfg.push(0x20 | (chunk - 1));
        remaining -= chunk;
    }

    cfg
}

fn desc_from_conf(conf: &SlaveConf) -> SlaveDesc {
    let mut desc = SlaveDesc::new(conf.address, 0);

    desc.cfg_data = synthesize_cfg(conf.input_size, conf.output_size);
    desc.input_len = conf.input_size;
    desc.output_len = conf.output_size;
    desc.watchdog_ms = conf.watchdog_ms;
    desc.group_ident = conf.group_mask;
    desc.diag_period = conf.diag_period;

    desc
}

fn drive<P: Phy>(conf: &BusConf, phy: P) -> Result<(), Error> {
    let mut master: DpMaster<P, 16> =
        DpMaster::new(phy, conf.master_addr, DpMasterConfig::default())?;

    for slave in &conf.slaves {
        master.add_slave(desc_from_conf(slave))?;
    }

    master.initialize()?;

    for _ in 0..1_000 {
        if let Some(id) = master.tick()? {
            let slave = master.slave(id).expect("tick returned a valid id");

            log::info!("slave {} -> {}", slave.desc().address, slave.state());
        }
    }

    log::info!(
        "done; connected: {}, fdl counters: {:?}",
        master.is_connected(),
        master.fdl_counters()
    );

    master.shutdown()
}

fn run(cmd: &CmdLine) -> Result<(), Error> {
    let conf = BusConf::from_file(Path::new(&cmd.config_file))?;

    match conf.phy.kind {
        PhyKind::Serial => {
            let phy = SerialPhy::new(&conf.phy.dev, conf.phy.baudrate);

            drive(&conf, phy)
        }
        PhyKind::Dummy => drive(&conf, LoopbackPhy::new(conf.phy.baudrate)),
        PhyKind::DummySlave => {
            let address = conf.slaves.first().map(|s| s.address).unwrap_or(8);
            let mut phy = SimulatedSlavePhy::new(conf.phy.baudrate, address, 0);

            if let Some(slave) = conf.slaves.first() {
                let inputs = vec![0u8; usize::from(slave.input_size)];

                phy.set_inputs(&inputs);
            }

            drive(&conf, phy)
        }
        PhyKind::Fpga => {
            log::error!("the FPGA transceiver is a separate project");

            Err(Error::Config(proficrab::error::ConfigError::InvalidOption))
        }
    }
}

fn main() {
    let cmd = match CmdLine::parse(std::env::args().skip(1)) {
        Ok(cmd) => cmd,
        Err(msg) => {
            eprintln!("{}", msg);
            eprintln!("usage: confdrive [--loglevel N] [--nice N] <config file>");
            std::process::exit(1);
        }
    };

    let filter = match cmd.loglevel {
        0 => "warn",
        1 => "info",
        _ => "trace",
    };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    if let Some(nice) = cmd.nice {
        renice(nice);
    }

    if let Err(e) = run(&cmd) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
