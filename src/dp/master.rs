//! The DP class 1 master: slave arena and cooperative scheduler.
//!
//! One owner thread drives the master by calling [`DpMaster::tick`] as often as it likes;
//! each tick services the next slave in address order and blocks for at most one FDL
//! request/response cycle, so overall throughput is bounded by line time. There is no
//! internal locking; the master assumes single-writer access.

use crate::{
    baud::BusTiming,
    dp::{
        slave::{DpSlave, SlaveDesc},
        telegram::{self, GlobalControlCommand},
    },
    error::{ConfigError, DpError, Error},
    fdl::station::{FdlStation, StationCounters},
    fmt,
    phy::Phy,
};

/// Handle to a registered slave. Indexes the master's slave arena; stable for the life of
/// the master.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct SlaveId(pub(crate) usize);

/// Configuration passed to [`DpMaster`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DpMasterConfig {
    /// FDL retransmissions per request before it counts as failed.
    ///
    /// Defaults to 3.
    pub retries: u8,

    /// How long a faulted slave rests before bring-up is attempted again, in microseconds.
    ///
    /// Defaults to one second.
    pub fault_cooldown_us: u64,

    /// Promote a slave's consecutive hard faults to an unrecoverable error once this count
    /// is reached.
    ///
    /// `None` (the default) keeps retrying forever.
    pub fatal_fault_limit: Option<u8>,
}

impl Default for DpMasterConfig {
    fn default() -> Self {
        Self {
            retries: 3,
            fault_cooldown_us: 1_000_000,
            fatal_fault_limit: None,
        }
    }
}

/// A PROFIBUS-DP class 1 master.
///
/// `MAX_SLAVES` bounds the slave arena at compile time, sizing the process data buffers
/// statically.
#[derive(Debug)]
pub struct DpMaster<P, const MAX_SLAVES: usize = 8> {
    fdl: FdlStation<P>,
    slaves: heapless::Vec<DpSlave, MAX_SLAVES>,
    /// Arena indices in station address order; the round-robin walks this.
    order: heapless::Vec<usize, MAX_SLAVES>,
    cursor: usize,
    running: bool,
    config: DpMasterConfig,
}

impl<P: Phy, const MAX_SLAVES: usize> DpMaster<P, MAX_SLAVES> {
    /// Create a master with station address `address` on `phy`.
    ///
    /// The timing profile is derived from the PHY's baud rate; use
    /// [`DpMaster::with_timing`] to override it.
    pub fn new(phy: P, address: u8, config: DpMasterConfig) -> Result<Self, Error> {
        let timing = BusTiming::for_baudrate(phy.baudrate());

        Self::with_timing(phy, address, timing, config)
    }

    /// Create a master with an explicit timing profile.
    pub fn with_timing(
        phy: P,
        address: u8,
        timing: BusTiming,
        config: DpMasterConfig,
    ) -> Result<Self, Error> {
        Ok(Self {
            fdl: FdlStation::new(phy, address, timing)?,
            slaves: heapless::Vec::new(),
            order: heapless::Vec::new(),
            cursor: 0,
            running: false,
            config,
        })
    }

    /// This master's station address.
    pub fn address(&self) -> u8 {
        self.fdl.address()
    }

    /// FDL request statistics.
    pub fn fdl_counters(&self) -> StationCounters {
        self.fdl.counters()
    }

    /// The PHY driver.
    pub fn phy(&self) -> &P {
        self.fdl.phy()
    }

    /// Mutable access to the PHY driver.
    pub fn phy_mut(&mut self) -> &mut P {
        self.fdl.phy_mut()
    }

    /// Register a slave. Fails on invalid or duplicate configuration.
    pub fn add_slave(&mut self, desc: SlaveDesc) -> Result<SlaveId, Error> {
        desc.validate()?;

        if desc.address == self.fdl.address() {
            return Err(ConfigError::DuplicateAddress(desc.address).into());
        }
        if self
            .slaves
            .iter()
            .any(|s| s.desc().address == desc.address)
        {
            return Err(ConfigError::DuplicateAddress(desc.address).into());
        }

        let address = desc.address;
        let id = self.slaves.len();

        self.slaves
            .push(DpSlave::new(desc))
            .map_err(|_| Error::Config(ConfigError::TooManySlaves))?;

        // Keep the service order sorted by station address, ids stable.
        let at = self
            .order
            .iter()
            .position(|&i| self.slaves[i].desc().address > address)
            .unwrap_or(self.order.len());

        self.order
            .insert(at, id)
            .map_err(|_| Error::Config(ConfigError::TooManySlaves))?;

        fmt::debug!("registered slave {}", address);

        Ok(SlaveId(id))
    }

    /// A registered slave by id.
    pub fn slave(&self, id: SlaveId) -> Option<&DpSlave> {
        self.slaves.get(id.0)
    }

    /// Mutable access to a registered slave, e.g. for writing outputs.
    pub fn slave_mut(&mut self, id: SlaveId) -> Option<&mut DpSlave> {
        self.slaves.get_mut(id.0)
    }

    /// Iterate registered slaves in station address order, with their ids.
    pub fn slaves(&self) -> impl Iterator<Item = (SlaveId, &DpSlave)> + '_ {
        self.order.iter().map(|&i| (SlaveId(i), &self.slaves[i]))
    }

    /// Open the PHY and take all registered slaves from `Offline` to `Init`.
    pub fn initialize(&mut self) -> Result<(), Error> {
        self.fdl.phy_mut().open()?;
        self.fdl.phy_mut().flush_rx();

        for slave in &mut self.slaves {
            slave.go_online();
        }

        self.running = true;

        fmt::info!(
            "master {} up with {} slaves at {}",
            self.fdl.address(),
            self.slaves.len(),
            self.fdl.timing().baudrate
        );

        Ok(())
    }

    /// `true` between [`DpMaster::initialize`] and [`DpMaster::shutdown`].
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// `true` while any slave is still in bring-up.
    pub fn is_connecting(&self) -> bool {
        self.slaves.iter().any(|s| s.is_connecting())
    }

    /// `true` once every registered slave is in cyclic operation.
    pub fn is_connected(&self) -> bool {
        !self.slaves.is_empty() && self.slaves.iter().all(|s| s.is_connected())
    }

    /// Service the next slave in address order.
    ///
    /// Blocks until that slave's single FDL request completes, times out or fails. Returns
    /// the slave's id if its state advanced, `None` otherwise (including steady-state data
    /// exchange). Per-slave faults are absorbed into that slave's `Fault` state; an `Err`
    /// here is unrecoverable for the whole master.
    pub fn tick(&mut self) -> Result<Option<SlaveId>, Error> {
        if !self.running || self.order.is_empty() {
            return Ok(None);
        }

        let id = self.order[self.cursor % self.order.len()];
        self.cursor = (self.cursor + 1) % self.order.len();

        let slave = &mut self.slaves[id];
        let advanced = slave.step(&mut self.fdl, &self.config)?;

        if let Some(limit) = self.config.fatal_fault_limit {
            if slave.consecutive_faults() >= limit {
                let address = slave.desc().address;

                fmt::error!("slave {} exceeded the fault limit", address);

                return Err(DpError::FaultLimitReached {
                    address,
                    faults: slave.consecutive_faults(),
                }
                .into());
            }
        }

        if advanced {
            fmt::debug!(
                "slave {} -> {}",
                self.slaves[id].desc().address,
                self.slaves[id].state()
            );

            Ok(Some(SlaveId(id)))
        } else {
            Ok(None)
        }
    }

    /// Send a Global_Control multicast, e.g. sync/freeze group management.
    ///
    /// Unacknowledged; completes as soon as the telegram is on the wire.
    pub fn global_control(
        &mut self,
        command: GlobalControlCommand,
        group_select: u8,
    ) -> Result<(), Error> {
        let request = telegram::global_control(self.fdl.address(), command, group_select)?;

        self.fdl.transact(&request, 0)?;

        Ok(())
    }

    /// Stop the bus: all slaves go `Offline` and the PHY is closed last.
    ///
    /// The master can be re-initialised afterwards.
    pub fn shutdown(&mut self) -> Result<(), Error> {
        if !self.running {
            return Ok(());
        }

        self.running = false;

        for slave in &mut self.slaves {
            slave.set_offline();
        }

        self.fdl.phy_mut().close();

        fmt::info!("master {} shut down", self.fdl.address());

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{baud::Baudrate, dp::slave::DpSlaveState, phy::simulator::LoopbackPhy};

    fn master() -> DpMaster<LoopbackPhy, 4> {
        DpMaster::new(
            LoopbackPhy::new(Baudrate::B500000),
            2,
            DpMasterConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn slaves_are_serviced_in_address_order() {
        let mut master = master();

        let c = master.add_slave(SlaveDesc::new(30, 0)).unwrap();
        let a = master.add_slave(SlaveDesc::new(8, 0)).unwrap();
        let b = master.add_slave(SlaveDesc::new(12, 0)).unwrap();

        let order: heapless::Vec<_, 4> = master.slaves().map(|(id, _)| id).collect();

        assert_eq!(order.as_slice(), &[a, b, c]);
    }

    #[test]
    fn duplicate_addresses_rejected() {
        let mut master = master();

        master.add_slave(SlaveDesc::new(8, 0)).unwrap();

        assert_eq!(
            master.add_slave(SlaveDesc::new(8, 0)),
            Err(Error::Config(ConfigError::DuplicateAddress(8)))
        );
        // The master's own address is taken too.
        assert_eq!(
            master.add_slave(SlaveDesc::new(2, 0)),
            Err(Error::Config(ConfigError::DuplicateAddress(2)))
        );
    }

    #[test]
    fn tick_without_initialize_is_a_no_op() {
        let mut master = master();

        master.add_slave(SlaveDesc::new(8, 0)).unwrap();

        assert_eq!(master.tick(), Ok(None));
        assert_eq!(
            master.slave(SlaveId(0)).unwrap().state(),
            DpSlaveState::Offline
        );
    }

    #[test]
    fn shutdown_takes_slaves_offline_and_closes_phy() {
        let mut master = master();

        master.add_slave(SlaveDesc::new(8, 0)).unwrap();
        master.initialize().unwrap();

        assert!(master.is_running());
        assert_eq!(
            master.slave(SlaveId(0)).unwrap().state(),
            DpSlaveState::Init
        );

        master.shutdown().unwrap();

        assert!(!master.is_running());
        assert!(!master.phy().is_open());
        assert_eq!(
            master.slave(SlaveId(0)).unwrap().state(),
            DpSlaveState::Offline
        );
    }
}
