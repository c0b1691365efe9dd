//! The CR (control register) interface to the PHY.
//!
//! A CR access is built out of phases. Each phase is asserted by writing P0PHYCR, the PHY latches
//! it and raises [PhyStatus::ACK], the phase is then deasserted and the PHY drops the ack bit.
//! Both edges must be observed before continuing.
//!
//! Accesses must not be interleaved. A select is always followed by exactly one write or read
//! before the next select, the caller is responsible for serializing access to the interface.

use crate::delay::{ACK_POLL, Jitter, UsDelay};
use crate::{DEFAULT_ACK_RETRIES, HostRegister, PhyControl, PhyError, PhyStatus, RegisterSpace};

pub struct PhyInterface<R, D> {
    regs: R,
    jitter: Jitter<D>,
    ack_retries: u32,
}

impl<R: RegisterSpace, D: UsDelay> PhyInterface<R, D> {
    pub fn new(regs: R, jitter: Jitter<D>) -> Self {
        Self {
            regs,
            jitter,
            ack_retries: DEFAULT_ACK_RETRIES,
        }
    }

    /// Sets the number of retries used when waiting for each ack edge.
    pub fn set_ack_retries(&mut self, retries: u32) {
        self.ack_retries = retries;
    }

    /// Writes `control` into P0PHYCR and polls P0PHYSR until the ack bit equals `expected`.
    ///
    /// `max_iterations` counts retries, the status register is read up to `max_iterations + 1`
    /// times. No delay is performed once the expected value has been observed.
    pub fn poll_ack(
        &mut self,
        control: u32,
        max_iterations: u32,
        expected: bool,
    ) -> Result<(), PhyError> {
        self.regs.write(HostRegister::PhyControl, control);

        let mut retries = 0;
        loop {
            let status = PhyStatus::from_bits_retain(self.regs.read(HostRegister::PhyStatus));
            if status.ack() == expected {
                return Ok(());
            }

            if retries == max_iterations {
                log::error!(
                    "SATA PHY: timed out waiting for CR ack={} (control {control:#x})",
                    expected as u8
                );
                return Err(PhyError::AckTimeout { control, expected });
            }
            retries += 1;
            log::trace!("SATA PHY: CR ack != {}, retry {retries}", expected as u8);
            self.jitter.sleep(ACK_POLL);
        }
    }

    /// Asserts `control` then deasserts it leaving `deasserted` in P0PHYCR, waiting for both ack edges.
    fn phase(&mut self, control: PhyControl, deasserted: PhyControl) -> Result<(), PhyError> {
        self.poll_ack(control.bits(), self.ack_retries, true)?;
        self.poll_ack(deasserted.bits(), self.ack_retries, false)
    }

    /// Selects the CR register at `addr` as the target of the next read or write.
    pub fn select(&mut self, addr: u16) -> Result<(), PhyError> {
        let payload = PhyControl::payload(addr);
        // Payload lines are settled before the capture bit is raised.
        self.regs.write(HostRegister::PhyControl, payload.bits());

        let capture = payload | PhyControl::CAPTURE_ADDRESS;
        self.phase(capture, capture.deasserted())
    }

    /// Writes `data` into the currently selected CR register.
    ///
    /// On success P0PHYCR is left as `0`.
    pub fn write(&mut self, data: u16) -> Result<(), PhyError> {
        let payload = PhyControl::payload(data);
        self.regs.write(HostRegister::PhyControl, payload.bits());

        let capture = payload | PhyControl::CAPTURE_DATA;
        self.phase(capture, capture.deasserted())?;
        self.phase(PhyControl::WRITE, PhyControl::empty())
    }

    /// Reads the currently selected CR register.
    ///
    /// The value is only valid if the read strobe is both acknowledged and released, on error
    /// any captured value is discarded.
    pub fn read(&mut self) -> Result<u16, PhyError> {
        self.poll_ack(PhyControl::READ.bits(), self.ack_retries, true)?;

        let data = PhyStatus::from_bits_retain(self.regs.read(HostRegister::PhyStatus)).data();

        self.poll_ack(PhyControl::empty().bits(), self.ack_retries, false)?;
        Ok(data)
    }

    /// Places the PHY in the deep quiescent state.
    ///
    /// PDDQ is not part of the CR handshake and is not acknowledged. Once asserted the PHY cannot
    /// be recovered without a full controller reset.
    pub fn assert_power_down(&mut self) {
        self.regs
            .set_bits(HostRegister::PhyControl, PhyControl::POWER_DOWN.bits());
    }

    pub fn regs(&self) -> &R {
        &self.regs
    }

    pub fn regs_mut(&mut self) -> &mut R {
        &mut self.regs
    }

    pub fn jitter_mut(&mut self) -> &mut Jitter<D> {
        &mut self.jitter
    }

    pub fn delay(&self) -> &D {
        self.jitter.inner()
    }
}
