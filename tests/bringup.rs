//! End-to-end bring-up against the scripted slave: probe, diagnose, parameterise,
//! configure, confirm readiness, exchange data.

mod util;

use proficrab::{dp::DpSlaveState, Phy};
use util::{connect_within, master_with_slave};

#[test]
fn reaches_data_exchange_within_twenty_ticks() {
    let (mut master, id) = master_with_slave();

    assert!(master.is_connecting());

    let ticks = connect_within(&mut master, 20);

    assert!(ticks <= 20, "took {} ticks", ticks);
    assert!(master.is_connected());
    assert!(!master.is_connecting());
    assert_eq!(
        master.slave(id).unwrap().state(),
        DpSlaveState::DataExchange
    );

    // The scripted slave saw exactly one parameterisation.
    assert_eq!(master.phy().prm_telegrams(), 1);
    assert!(master.phy().in_data_exchange());
}

#[test]
fn cyclic_exchange_moves_process_data_both_ways() {
    let (mut master, id) = master_with_slave();

    connect_within(&mut master, 20);

    master
        .slave_mut(id)
        .unwrap()
        .set_outputs(&[0x12, 0x34])
        .unwrap();

    // Steady state: ticks exchange data without a state change.
    for _ in 0..4 {
        assert_eq!(master.tick().unwrap(), None);
    }

    assert_eq!(master.slave(id).unwrap().inputs(), &[0xaa, 0x55]);
    assert_eq!(master.phy().outputs(), &[0x12, 0x34]);
    assert!(master.phy().data_exchanges() >= 4);
}

#[test]
fn diagnosis_read_precedes_next_exchange_on_high_priority_response() {
    let (mut master, id) = master_with_slave();

    connect_within(&mut master, 20);

    // A few clean rounds first.
    for _ in 0..2 {
        master.tick().unwrap();
    }

    let exchanges_before = master.phy().data_exchanges();

    master.phy_mut().raise_diagnosis();

    // This exchange is answered with the high priority status.
    let advanced = master.tick().unwrap();

    assert_eq!(advanced, Some(id));
    assert_eq!(
        master.slave(id).unwrap().state(),
        DpSlaveState::DiagExchange
    );
    assert_eq!(master.phy().data_exchanges(), exchanges_before + 1);

    // The next request on the wire is the diagnosis read, not Data_Exchange.
    master.tick().unwrap();

    assert_eq!(
        master.slave(id).unwrap().state(),
        DpSlaveState::DataExchange
    );
    assert_eq!(master.phy().data_exchanges(), exchanges_before + 1);

    // Exchange resumes afterwards.
    master.tick().unwrap();

    assert_eq!(master.phy().data_exchanges(), exchanges_before + 2);
}

#[test]
fn global_control_reaches_the_slave() {
    use proficrab::dp::GlobalControlCommand;

    let (mut master, _) = master_with_slave();

    connect_within(&mut master, 20);

    master
        .global_control(GlobalControlCommand::SYNC, 0x04)
        .unwrap();

    assert_eq!(master.phy().last_global_control(), Some((0x20, 0x04)));
}

#[test]
fn shutdown_after_connection_goes_offline() {
    let (mut master, id) = master_with_slave();

    connect_within(&mut master, 20);

    master.shutdown().unwrap();

    assert_eq!(master.slave(id).unwrap().state(), DpSlaveState::Offline);
    assert!(!master.phy().is_open());
    assert_eq!(master.tick().unwrap(), None);
}
