//! Memory mapped access to the AHCI register block.

use crate::{HostRegister, RegisterSpace};
use core::fmt::{Debug, Formatter};
use volatile::Volatile;

#[repr(transparent)]
pub(crate) struct Register<T, M = ReadWrite> {
    inner: T,
    _phantom: core::marker::PhantomData<M>,
}

impl<T, M> Debug for Register<T, M>
where
    T: Debug,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        Debug::fmt(&self.inner, f)
    }
}

impl<T: Copy, M> Register<T, M> {
    /// Performs a volatile read and returns the inner data
    pub(crate) fn read(&self) -> T {
        Volatile::new_read_only(&self.inner).read()
    }

    /// Uses a volatile write to store the data
    pub(crate) fn write(&mut self, src: T)
    where
        M: ReadWriteMarker,
    {
        Volatile::new(&mut self.inner).write(src)
    }

    /// Runs `f` on a fresh read of the register writing the result back.
    pub(crate) fn update<F>(&mut self, f: F)
    where
        F: FnOnce(T) -> T,
        M: ReadWriteMarker,
    {
        let t = self.read();
        self.write(f(t));
    }
}

pub struct ReadWrite;

pub trait ReadWriteMarker {}

impl ReadWriteMarker for ReadWrite {}

pub struct ReadOnly;

/// The part of the AHCI register block used during PHY bring-up.
///
/// Registers between the named fields are not touched and are kept as padding.
#[repr(C)]
pub struct ImxAhciRegs {
    /// CAP
    ///
    /// Reported as RO by the AHCI specification, the HWINIT bits are writable on this controller
    /// until the first HBA reset.
    capabilities: Register<u32>,
    _ghc_is: [u32; 2],
    /// PI (HWINIT)
    ports_implemented: Register<u32>,
    _reserved0: [u32; 52],
    timer_1ms: Register<u32>,
    _reserved1: [u32; 37],
    phy_control: Register<u32>,
    phy_status: Register<u32, ReadOnly>,
}

const _: () = assert!(core::mem::offset_of!(ImxAhciRegs, ports_implemented) == 0x0c);
const _: () = assert!(core::mem::offset_of!(ImxAhciRegs, timer_1ms) == 0xe0);
const _: () = assert!(core::mem::offset_of!(ImxAhciRegs, phy_control) == 0x178);
const _: () = assert!(core::mem::offset_of!(ImxAhciRegs, phy_status) == 0x17c);

impl ImxAhciRegs {
    /// Constructs Self from a pointer to the AHCI register block.
    ///
    /// # Safety
    ///
    /// The caller must ensure that `ptr` points to the i.MX AHCI register block, mapped with an
    /// uncached memory type, and that no other reference to the block exists for `'static`.
    pub unsafe fn from_raw(ptr: *mut u8) -> &'static mut Self {
        unsafe { &mut *ptr.cast() }
    }
}

impl RegisterSpace for ImxAhciRegs {
    fn read(&self, reg: HostRegister) -> u32 {
        match reg {
            HostRegister::Capabilities => self.capabilities.read(),
            HostRegister::PortsImplemented => self.ports_implemented.read(),
            HostRegister::Timer1Ms => self.timer_1ms.read(),
            HostRegister::PhyControl => self.phy_control.read(),
            HostRegister::PhyStatus => self.phy_status.read(),
        }
    }

    fn write(&mut self, reg: HostRegister, value: u32) {
        match reg {
            HostRegister::Capabilities => self.capabilities.write(value),
            HostRegister::PortsImplemented => self.ports_implemented.write(value),
            HostRegister::Timer1Ms => self.timer_1ms.write(value),
            HostRegister::PhyControl => self.phy_control.write(value),
            HostRegister::PhyStatus => {
                log::warn!("Attempted write of {value:#x} to read only P0PHYSR, ignored")
            }
        }
    }

    fn set_bits(&mut self, reg: HostRegister, mask: u32) {
        match reg {
            HostRegister::Capabilities => self.capabilities.update(|v| v | mask),
            HostRegister::PortsImplemented => self.ports_implemented.update(|v| v | mask),
            HostRegister::Timer1Ms => self.timer_1ms.update(|v| v | mask),
            HostRegister::PhyControl => self.phy_control.update(|v| v | mask),
            HostRegister::PhyStatus => {
                log::warn!("Attempted to set {mask:#x} in read only P0PHYSR, ignored")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(C, align(4))]
    struct Block([u8; 0x180]);

    #[test]
    fn mmio_offsets() {
        let mut block = Block([0; 0x180]);
        let regs = unsafe { &mut *block.0.as_mut_ptr().cast::<ImxAhciRegs>() };

        regs.write(HostRegister::Timer1Ms, 0x0001_01d0);
        regs.write(HostRegister::PhyControl, 0x1_7f3f);
        regs.set_bits(HostRegister::PhyControl, 1 << 20);
        regs.set_bits(HostRegister::PhyStatus, 1);
        regs.write(HostRegister::PhyStatus, 0xdead);

        assert_eq!(regs.read(HostRegister::PhyControl), 0x11_7f3f);
        assert_eq!(regs.read(HostRegister::PhyStatus), 0);
        assert_eq!(block.0[0xe0..0xe4], 0x0001_01d0u32.to_ne_bytes());
        assert_eq!(block.0[0x178..0x17c], 0x11_7f3fu32.to_ne_bytes());
    }
}
