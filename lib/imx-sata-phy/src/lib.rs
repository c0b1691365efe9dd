//! Support for the analog SATA PHY found behind the i.MX6Q AHCI controller.
//!
//! The PHY's own configuration registers are not memory mapped. They are reached through the
//! "control register" (CR) interface, a pair of vendor specific registers within the AHCI register
//! block. Every phase of a CR access (address capture, data capture, write strobe, read strobe)
//! must be acknowledged by the PHY before the next phase may begin, the PHY runs on a clock domain
//! which is not synchronized with the host.
//!
//! Register documentation follows the same outline as the AHCI driver.
//! - (RO) -- Read only; This field may not be modified by software.
//! - (RW) -- Read Write: Software may modify the field.
//! - (CD) -- Check documentation for information about read/writing to this register
#![cfg_attr(not(test), no_std)]
#[cfg(any(test, feature = "sim"))]
extern crate alloc;

pub mod bring_up;
pub mod cr;
pub mod delay;
pub mod register;
#[cfg(any(test, feature = "sim"))]
pub mod sim;

pub use bring_up::{BringUpConfig, BringUpStatus};
pub use cr::PhyInterface;

/// Number of retries performed by the ack polling primitive before a phase is considered timed out.
pub const DEFAULT_ACK_RETRIES: u32 = 100;

/// The AHCI registers which are touched while bringing up the PHY.
///
/// These are the only registers this crate will ever access, offsets are relative to the start of
/// the AHCI register block.
#[repr(usize)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum HostRegister {
    /// CAP
    Capabilities = 0x00,
    /// PI
    PortsImplemented = 0x0c,
    /// TIMER1MS (vendor specific)
    ///
    /// Number of bus clock ticks within one millisecond.
    Timer1Ms = 0xe0,
    /// P0PHYCR (vendor specific)
    PhyControl = 0x178,
    /// P0PHYSR (vendor specific, RO)
    PhyStatus = 0x17c,
}

impl HostRegister {
    pub const fn offset(self) -> usize {
        self as usize
    }
}

/// Access to the AHCI register block.
///
/// Implementations must perform the access immediately, the CR protocol relies on every write
/// reaching the hardware before the following status read.
pub trait RegisterSpace {
    fn read(&self, reg: HostRegister) -> u32;
    fn write(&mut self, reg: HostRegister, value: u32);

    /// Sets the bits in `mask` within `reg`, leaving all other bits as they are.
    fn set_bits(&mut self, reg: HostRegister, mask: u32) {
        let v = self.read(reg);
        self.write(reg, v | mask);
    }
}

impl<T: RegisterSpace + ?Sized> RegisterSpace for &mut T {
    fn read(&self, reg: HostRegister) -> u32 {
        (**self).read(reg)
    }

    fn write(&mut self, reg: HostRegister, value: u32) {
        (**self).write(reg, value)
    }

    fn set_bits(&mut self, reg: HostRegister, mask: u32) {
        (**self).set_bits(reg, mask)
    }
}

bitflags::bitflags! {
    /// P0PHYCR (RW)
    ///
    /// Bits `0..16` contain the address or data payload for the current phase.
    #[repr(transparent)]
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct PhyControl: u32 {
        /// CR_CAP_ADDR
        ///
        /// Latches the payload as the target CR address.
        const CAPTURE_ADDRESS = 1 << 16;
        /// CR_CAP_DATA
        ///
        /// Latches the payload as data for the next write strobe.
        const CAPTURE_DATA = 1 << 17;
        /// CR_WRITE
        const WRITE = 1 << 18;
        /// CR_READ
        ///
        /// The PHY places the value of the selected CR register in [PhyStatus] bits `0..16`.
        const READ = 1 << 19;
        /// PDDQ
        ///
        /// Places the PHY into the deep quiescent power state. This cannot be undone without
        /// a full controller reset.
        const POWER_DOWN = 1 << 20;

        const PAYLOAD = 0xffff;
    }

    /// P0PHYSR (RO)
    #[repr(transparent)]
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct PhyStatus: u32 {
        /// CR_ACK
        ///
        /// Set by the PHY when it has latched the currently asserted phase, cleared once that
        /// phase has been deasserted.
        const ACK = 1 << 18;

        const DATA_OUT = 0xffff;
    }
}

impl PhyControl {
    /// Returns a control word carrying only `payload`.
    pub const fn payload(payload: u16) -> Self {
        Self::from_bits_retain(payload as u32)
    }

    /// Returns `self` with every phase bit removed leaving only the payload.
    pub const fn deasserted(self) -> Self {
        self.intersection(Self::PAYLOAD)
    }
}

impl PhyStatus {
    pub const fn ack(&self) -> bool {
        self.contains(Self::ACK)
    }

    pub const fn data(&self) -> u16 {
        (self.bits() & Self::DATA_OUT.bits()) as u16
    }
}

/// Errors raised by the CR interface.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PhyError {
    /// The PHY did not drive the ack bit to `expected` within the retry budget after `control`
    /// was written to P0PHYCR.
    ///
    /// The CR interface may be left with a phase asserted, the next access will deassert it.
    AckTimeout { control: u32, expected: bool },
}

impl core::fmt::Display for PhyError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::AckTimeout { control, expected } => write!(
                f,
                "timed out waiting for CR ack={} after writing {control:#x}",
                *expected as u8
            ),
        }
    }
}
