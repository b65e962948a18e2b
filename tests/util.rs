//! Shared scaffolding: a master wired to one scripted slave on the simulated bus.

use proficrab::{
    dp::{DpMaster, DpMasterConfig, SlaveDesc, SlaveId},
    phy::simulator::SimulatedSlavePhy,
    Baudrate,
};

#[allow(unused)]
pub const SLAVE_ADDRESS: u8 = 8;
#[allow(unused)]
pub const MASTER_ADDRESS: u8 = 2;
#[allow(unused)]
pub const IDENT_NUMBER: u16 = 0xb757;
#[allow(unused)]
pub const WATCHDOG_MS: u32 = 200;

pub type TestMaster = DpMaster<SimulatedSlavePhy, 4>;

/// A master with one registered 2-in/2-out slave, initialised but not yet ticked.
#[allow(unused)]
pub fn master_with_slave() -> (TestMaster, SlaveId) {
    master_with(DpMasterConfig::default())
}

/// Same, with a custom master configuration.
#[allow(unused)]
pub fn master_with(config: DpMasterConfig) -> (TestMaster, SlaveId) {
    let mut phy = SimulatedSlavePhy::new(Baudrate::B500000, SLAVE_ADDRESS, IDENT_NUMBER)
        .expect_cfg(&[0x31]);

    phy.set_inputs(&[0xaa, 0x55]);

    let mut master = TestMaster::new(phy, MASTER_ADDRESS, config).expect("master config");

    let mut desc = SlaveDesc::new(SLAVE_ADDRESS, IDENT_NUMBER);

    desc.cfg_data = heapless::Vec::from_slice(&[0x31]).unwrap();
    desc.input_len = 2;
    desc.output_len = 2;
    desc.watchdog_ms = WATCHDOG_MS;

    let id = master.add_slave(desc).expect("slave desc");

    master.initialize().expect("initialize");

    (master, id)
}

/// Tick until the slave is connected, panicking if `limit` ticks are not enough.
pub fn connect_within(master: &mut TestMaster, limit: u32) -> u32 {
    let mut ticks = 0;

    while !master.is_connected() {
        master.tick().expect("tick");
        ticks += 1;

        assert!(ticks <= limit, "not connected after {} ticks", limit);
    }

    ticks
}
