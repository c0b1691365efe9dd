//! HWINIT fixups of the generic host control registers.
//!
//! On this controller CAP and PI are not loaded by firmware, the driver must configure them before
//! the generic AHCI code reads them. TIMER1MS is vendor specific and must match the bus clock.

use imx_sata_phy::{HostRegister, RegisterSpace};

bitflags::bitflags! {
    #[repr(transparent)]
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    /// CAP (HWINIT)
    pub struct HostCapabilities: u32 {
        /// SSS
        ///
        /// Ports are spun up one at a time, the generic code only does so when this is set.
        const STAGGERED_SPIN_UP = 1 << 27;
    }
}

#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
struct PortImplemented(u32);

impl PortImplemented {
    /// Checks whether the `port` is implemented by the HBA
    ///
    /// # Panics
    ///
    /// This fn will panic if `port >= 32`
    fn implemented(&self, port: u8) -> bool {
        assert!(port < 32);
        self.0 & (1 << port) != 0
    }

    fn with_port(self, port: u8) -> Self {
        assert!(port < 32);
        Self(self.0 | 1 << port)
    }
}

/// Sets CAP.SSS if it is clear. Returns whether a write was performed.
pub(crate) fn enable_staggered_spin_up<R: RegisterSpace>(regs: &mut R) -> bool {
    let cap = HostCapabilities::from_bits_retain(regs.read(HostRegister::Capabilities));
    if cap.contains(HostCapabilities::STAGGERED_SPIN_UP) {
        return false;
    }

    log::debug!("AHCI IMX: enabling staggered spin up");
    regs.write(
        HostRegister::Capabilities,
        (cap | HostCapabilities::STAGGERED_SPIN_UP).bits(),
    );
    true
}

/// Marks `port` as implemented in PI if it is not already. Returns whether a write was performed.
pub(crate) fn implement_port<R: RegisterSpace>(regs: &mut R, port: u8) -> bool {
    let pi = PortImplemented(regs.read(HostRegister::PortsImplemented));
    if pi.implemented(port) {
        return false;
    }

    log::debug!("AHCI IMX: implementing port {port}");
    regs.write(HostRegister::PortsImplemented, pi.with_port(port).0);
    true
}

/// Programs TIMER1MS with the number of bus clock ticks per millisecond.
pub(crate) fn program_timer_1ms<R: RegisterSpace>(regs: &mut R, bus_rate_hz: u32) -> u32 {
    let ticks = bus_rate_hz / 1000;
    log::debug!("AHCI IMX: TIMER1MS = {ticks} ({bus_rate_hz}Hz bus clock)");
    regs.write(HostRegister::Timer1Ms, ticks);
    ticks
}

#[cfg(test)]
mod tests {
    use super::*;
    use imx_sata_phy::sim::SimPhy;

    #[test]
    fn spin_up_written_once() {
        let mut regs = SimPhy::new();
        regs.capabilities = 0x4000_0f00;

        assert!(enable_staggered_spin_up(&mut regs));
        assert_eq!(regs.capabilities, 0x4800_0f00);
        assert!(!enable_staggered_spin_up(&mut regs));
        assert_eq!(regs.writes_to(HostRegister::Capabilities), 1);
    }

    #[test]
    fn spin_up_already_set() {
        let mut regs = SimPhy::new();
        regs.capabilities = HostCapabilities::STAGGERED_SPIN_UP.bits();

        assert!(!enable_staggered_spin_up(&mut regs));
        assert!(!enable_staggered_spin_up(&mut regs));
        assert!(regs.writes.is_empty());
    }

    #[test]
    fn port_zero_implemented() {
        let mut regs = SimPhy::new();
        regs.ports_implemented = 0b100;

        assert!(implement_port(&mut regs, 0));
        assert_eq!(regs.ports_implemented, 0b101);
        assert!(!implement_port(&mut regs, 0));
        assert_eq!(regs.writes_to(HostRegister::PortsImplemented), 1);
    }

    #[test]
    #[should_panic]
    fn bad_port() {
        let mut regs = SimPhy::new();
        implement_port(&mut regs, 32);
    }

    #[test]
    fn timer_from_bus_clock() {
        let mut regs = SimPhy::new();
        assert_eq!(program_timer_1ms(&mut regs, 66_000_000), 66_000);
        assert_eq!(regs.timer_1ms, 66_000);

        // Written unconditionally.
        program_timer_1ms(&mut regs, 66_000_000);
        assert_eq!(regs.writes_to(HostRegister::Timer1Ms), 2);
    }
}
