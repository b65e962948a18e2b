//! Watchdog expiry and recovery: a slave that stops being polled drops out of data
//! exchange; the master detects the "no resources" answer and reparameterises it.

mod util;

use proficrab::dp::{DpMasterConfig, DpSlaveState};
use util::{connect_within, master_with, master_with_slave, WATCHDOG_MS};

#[test]
fn expired_watchdog_forces_reparameterisation() {
    let (mut master, id) = master_with_slave();

    connect_within(&mut master, 20);

    for _ in 0..2 {
        master.tick().unwrap();
    }

    assert_eq!(master.phy().prm_telegrams(), 1);

    // The master goes quiet for longer than the watchdog period; the slave drops out of
    // data exchange on its own.
    master
        .phy_mut()
        .advance_clock_us(u64::from(WATCHDOG_MS) * 1_000 * 2);

    // The next exchange comes back "no resources" and the slave restarts from WAIT_DIAG.
    master.tick().unwrap();

    assert_eq!(master.slave(id).unwrap().state(), DpSlaveState::WaitDiag);
    assert!(!master.phy().in_data_exchange());

    // Recovery: diagnosis, Set_Prm, Chk_Cfg, readiness diagnosis, exchange.
    let mut ticks = 0;

    while !master.is_connected() {
        master.tick().unwrap();
        ticks += 1;

        assert!(ticks <= 10, "not recovered after 10 ticks");
    }

    assert_eq!(master.phy().prm_telegrams(), 2);
    assert!(master.phy().in_data_exchange());
}

#[test]
fn unresponsive_slave_faults_and_recovers() {
    // Short cooldown so the test does not have to simulate a full second of line time.
    let (mut master, id) = master_with(DpMasterConfig {
        fault_cooldown_us: 10_000,
        ..DpMasterConfig::default()
    });

    connect_within(&mut master, 20);

    master.phy_mut().set_responding(false);

    // All retries time out; the slave lands in FAULT.
    master.tick().unwrap();

    assert_eq!(master.slave(id).unwrap().state(), DpSlaveState::Fault);
    assert_eq!(master.slave(id).unwrap().consecutive_faults(), 1);

    master.phy_mut().set_responding(true);
    master.phy_mut().advance_clock_us(20_000);

    let mut ticks = 0;

    while !master.is_connected() {
        master.tick().unwrap();
        ticks += 1;

        assert!(ticks <= 20, "not recovered after 20 ticks");
    }

    assert_eq!(master.slave(id).unwrap().consecutive_faults(), 0);
}

#[test]
fn fault_limit_promotes_to_fatal_when_opted_in() {
    let (mut master, _) = master_with(DpMasterConfig {
        fault_cooldown_us: 0,
        fatal_fault_limit: Some(3),
        ..DpMasterConfig::default()
    });

    connect_within(&mut master, 20);

    master.phy_mut().set_responding(false);

    // Fault, cooldown (zero), Init probe fault, again; the third consecutive fault is
    // promoted to an unrecoverable error.
    let mut result = Ok(None);

    for _ in 0..12 {
        result = master.tick();

        if result.is_err() {
            break;
        }
    }

    assert!(matches!(
        result,
        Err(proficrab::Error::Dp(
            proficrab::error::DpError::FaultLimitReached { address: 8, faults: 3 }
        ))
    ));
}
