//! A software model of the AHCI register block and the PHY behind the CR interface.
//!
//! The model follows the handshake the hardware performs: a rising phase bit in P0PHYCR latches
//! the payload and raises the ack bit, clearing every phase bit drops the ack bit again. The ack
//! may be delayed by a number of status reads to exercise the polling loops.

use crate::bring_up::{CR_CLOCK_RESET, CR_LANE0_OUT_STAT, Lane0OutStat};
use crate::delay::UsDelay;
use crate::{HostRegister, PhyControl, PhyStatus, RegisterSpace};
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::cell::Cell;

const STROBES: PhyControl = PhyControl::CAPTURE_ADDRESS
    .union(PhyControl::CAPTURE_DATA)
    .union(PhyControl::WRITE)
    .union(PhyControl::READ);

/// A misbehaving handshake on a single phase.
///
/// Phases are counted from zero over the life of the model, each transition of P0PHYCR from no
/// strobe bit to any strobe bit starts a new phase.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AckFault {
    /// The phase is latched but never acknowledged.
    NoAck { phase: u32 },
    /// The phase is acknowledged but the ack bit stays high after it is deasserted, until the next
    /// phase starts.
    StuckAck { phase: u32 },
}

#[derive(Debug)]
pub struct SimPhy {
    pub capabilities: u32,
    pub ports_implemented: u32,
    pub timer_1ms: u32,
    control: u32,

    /// Number of status reads which still report the previous ack level.
    pub ack_latency: u32,
    /// When false the PHY never drives the ack bit.
    pub responsive: bool,
    /// Number of lane 0 status reads after a clock reset before RX_STABLE is reported.
    /// `None` never locks.
    pub lock_after: Option<u32>,
    pub fault: Option<AckFault>,

    ack: Cell<bool>,
    ack_target: bool,
    pending: Cell<u32>,
    data_out: u16,
    phases: u32,
    stuck: bool,

    address: u16,
    data: u16,
    cr: BTreeMap<u16, u16>,
    lane_reads: u32,
    powered_down: bool,

    status_reads: Cell<usize>,
    /// Every write performed to the register block, in order.
    pub writes: Vec<(HostRegister, u32)>,
    pub selects: Vec<u16>,
    pub cr_writes: Vec<(u16, u16)>,
    pub cr_reads: Vec<u16>,
    pub clock_resets: usize,
}

impl Default for SimPhy {
    fn default() -> Self {
        Self {
            capabilities: 0,
            ports_implemented: 0,
            timer_1ms: 0,
            control: 0,
            ack_latency: 0,
            responsive: true,
            lock_after: Some(0),
            fault: None,
            ack: Cell::new(false),
            ack_target: false,
            pending: Cell::new(0),
            data_out: 0,
            phases: 0,
            stuck: false,
            address: 0,
            data: 0,
            cr: BTreeMap::new(),
            lane_reads: 0,
            powered_down: false,
            status_reads: Cell::new(0),
            writes: Vec::new(),
            selects: Vec::new(),
            cr_writes: Vec::new(),
            cr_reads: Vec::new(),
            clock_resets: 0,
        }
    }
}

impl SimPhy {
    pub fn new() -> Self {
        Self::default()
    }

    /// A PHY whose RX-PLL never reports lock.
    pub fn never_locks() -> Self {
        Self {
            lock_after: None,
            ..Self::default()
        }
    }

    /// A PHY which never acknowledges any phase.
    pub fn unresponsive() -> Self {
        Self {
            responsive: false,
            ..Self::default()
        }
    }

    /// Current value of P0PHYCR.
    pub fn control(&self) -> u32 {
        self.control
    }

    pub fn status_reads(&self) -> usize {
        self.status_reads.get()
    }

    pub fn reset_status_reads(&self) {
        self.status_reads.set(0)
    }

    /// Whether PDDQ has been asserted. Once set the PHY stops responding.
    pub fn powered_down(&self) -> bool {
        self.powered_down
    }

    /// Number of writes made to `reg`
    pub fn writes_to(&self, reg: HostRegister) -> usize {
        self.writes.iter().filter(|(r, _)| *r == reg).count()
    }

    /// Returns the value last written to the CR register at `addr`.
    pub fn cr_register(&self, addr: u16) -> Option<u16> {
        self.cr.get(&addr).copied()
    }

    fn write_control(&mut self, value: u32) {
        let new = PhyControl::from_bits_retain(value);
        let old = PhyControl::from_bits_retain(self.control);
        let rising = new.difference(old).intersection(STROBES);
        self.control = value;

        if new.contains(PhyControl::POWER_DOWN) {
            self.powered_down = true;
        }
        if self.powered_down || !self.responsive {
            return;
        }

        let payload = (value & PhyControl::PAYLOAD.bits()) as u16;
        if rising.contains(PhyControl::CAPTURE_ADDRESS) {
            self.address = payload;
            self.selects.push(payload);
        }
        if rising.contains(PhyControl::CAPTURE_DATA) {
            self.data = payload;
        }
        if rising.contains(PhyControl::WRITE) {
            self.cr.insert(self.address, self.data);
            self.cr_writes.push((self.address, self.data));
            if self.address == CR_CLOCK_RESET {
                self.clock_resets += 1;
                self.lane_reads = 0;
            }
        }
        if rising.contains(PhyControl::READ) {
            self.cr_reads.push(self.address);
            self.data_out = self.cr_value(self.address);
        }

        let mut target = new.intersects(STROBES);
        if target && !old.intersects(STROBES) {
            let phase = self.phases;
            self.phases += 1;
            self.stuck = false;
            match self.fault {
                Some(AckFault::NoAck { phase: p }) if p == phase => target = false,
                Some(AckFault::StuckAck { phase: p }) if p == phase => self.stuck = true,
                _ => {}
            }
        }
        if self.stuck {
            target = true;
        }
        if target != self.ack_target {
            self.ack_target = target;
            self.pending.set(self.ack_latency);
        }
    }

    fn cr_value(&mut self, addr: u16) -> u16 {
        if addr == CR_LANE0_OUT_STAT {
            let locked = matches!(self.lock_after, Some(n) if self.lane_reads >= n);
            self.lane_reads += 1;
            return match locked {
                true => Lane0OutStat::RX_STABLE.bits(),
                false => 0,
            };
        }
        self.cr.get(&addr).copied().unwrap_or(0)
    }

    fn read_status(&self) -> u32 {
        self.status_reads.set(self.status_reads.get() + 1);
        match self.pending.get() {
            0 => self.ack.set(self.ack_target),
            n => self.pending.set(n - 1),
        }

        let mut status = PhyStatus::from_bits_retain(self.data_out as u32);
        status.set(PhyStatus::ACK, self.ack.get());
        status.bits()
    }
}

impl RegisterSpace for SimPhy {
    fn read(&self, reg: HostRegister) -> u32 {
        match reg {
            HostRegister::Capabilities => self.capabilities,
            HostRegister::PortsImplemented => self.ports_implemented,
            HostRegister::Timer1Ms => self.timer_1ms,
            HostRegister::PhyControl => self.control,
            HostRegister::PhyStatus => self.read_status(),
        }
    }

    fn write(&mut self, reg: HostRegister, value: u32) {
        self.writes.push((reg, value));
        match reg {
            HostRegister::Capabilities => self.capabilities = value,
            HostRegister::PortsImplemented => self.ports_implemented = value,
            HostRegister::Timer1Ms => self.timer_1ms = value,
            HostRegister::PhyControl => self.write_control(value),
            HostRegister::PhyStatus => {}
        }
    }
}

/// A [UsDelay] which returns immediately, recording what was requested.
#[derive(Debug, Default)]
pub struct NoDelay {
    pub calls: usize,
    pub total_us: u64,
}

impl UsDelay for NoDelay {
    fn delay_us(&mut self, us: u32) {
        self.calls += 1;
        self.total_us += us as u64;
    }
}
