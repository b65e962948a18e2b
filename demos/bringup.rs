//! Bring one simulated slave to cyclic data exchange and run a few exchanges.
//!
//! Run with e.g.
//!
//! ```bash
//! cargo run --example bringup -- --loglevel 2
//! ```

use proficrab::{
    dp::{DpMaster, DpMasterConfig, SlaveDesc},
    phy::simulator::SimulatedSlavePhy,
    Baudrate,
};

const SLAVE_ADDRESS: u8 = 8;
const IDENT_NUMBER: u16 = 0xb757;

fn level_filter(loglevel: u8) -> &'static str {
    match loglevel {
        0 => "warn",
        1 => "info",
        _ => "trace",
    }
}

fn run(loglevel: u8) -> Result<(), proficrab::Error> {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(level_filter(loglevel)),
    )
    .init();

    let mut phy = SimulatedSlavePhy::new(Baudrate::B500000, SLAVE_ADDRESS, IDENT_NUMBER);
    phy.set_inputs(&[0x00, 0x00]);

    let mut master: DpMaster<_, 4> = DpMaster::new(phy, 2, DpMasterConfig::default())?;

    let mut desc = SlaveDesc::new(SLAVE_ADDRESS, IDENT_NUMBER);
    desc.input_len = 2;
    desc.output_len = 2;
    desc.watchdog_ms = 300;
    desc.cfg_data = heapless::Vec::from_slice(&[0x31]).map_err(|_| proficrab::Error::Internal)?;

    let slave = master.add_slave(desc)?;

    master.initialize()?;

    let mut ticks = 0u32;

    while !master.is_connected() {
        master.tick()?;
        ticks += 1;

        if ticks > 100 {
            log::error!("slave never reached data exchange");

            return Err(proficrab::Error::Internal);
        }
    }

    log::info!("connected after {} ticks", ticks);

    for round in 0u16..16 {
        master
            .slave_mut(slave)
            .expect("slave id is valid")
            .set_outputs(&round.to_be_bytes())?;

        master.phy_mut().set_inputs(&round.to_le_bytes());

        master.tick()?;

        log::info!(
            "round {}: inputs {:02x?}, slave saw outputs {:02x?}",
            round,
            master.slave(slave).expect("slave id is valid").inputs(),
            master.phy().outputs(),
        );
    }

    master.shutdown()
}

fn main() {
    let mut loglevel = 1u8;
    let mut args = std::env::args().skip(1);

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--loglevel" => {
                loglevel = args
                    .next()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or_else(|| {
                        eprintln!("--loglevel needs a number");
                        std::process::exit(1);
                    });
            }
            other => {
                eprintln!("unknown argument: {}", other);
                std::process::exit(1);
            }
        }
    }

    if let Err(e) = run(loglevel) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
