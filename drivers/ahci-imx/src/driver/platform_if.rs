//! Interface between the controller and the generic AHCI platform framework.
//!
//! The framework owns device discovery and dispatch, it calls into the controller through
//! [AhciPlatformOps] and [PortErrorHandler]. Every callback receives the same shared controller
//! state.

use super::{HostRef, ImxAhci};
use crate::clock::ClockManager;
use crate::glue::Regmap;
use crate::AhciImxError;
use imx_sata_phy::delay::{Jitter, UsDelay};
use imx_sata_phy::RegisterSpace;

pub const DRIVER_NAME: &str = "ahci-imx";

/// Lifecycle callbacks invoked by the platform framework.
pub trait AhciPlatformOps {
    fn init(&self) -> Result<(), AhciImxError>;
    fn exit(&self);
    fn suspend(&self) -> Result<(), AhciImxError>;
    fn resume(&self) -> Result<(), AhciImxError>;
}

/// A link as seen by the error handler.
pub trait AtaLink {
    /// Whether any device on the link is currently enabled.
    fn has_enabled_device(&self) -> bool;
}

/// Per port error handling invoked by the framework after a link event.
pub trait PortErrorHandler {
    fn error_handler(&self, link: &mut dyn AtaLink);
}

/// The framework's own error handler. This performs reset and recovery of the link.
pub trait GenericErrorHandler {
    fn handle(&self, link: &mut dyn AtaLink);
}

impl<F> GenericErrorHandler for F
where
    F: Fn(&mut dyn AtaLink),
{
    fn handle(&self, link: &mut dyn AtaLink) {
        self(link)
    }
}

impl<R, D, G, C> AhciPlatformOps for ImxAhci<R, D, G, C>
where
    R: RegisterSpace,
    D: UsDelay,
    G: Regmap,
    C: ClockManager,
{
    fn init(&self) -> Result<(), AhciImxError> {
        ImxAhci::init(self)
    }

    fn exit(&self) {
        ImxAhci::exit(self)
    }

    fn suspend(&self) -> Result<(), AhciImxError> {
        ImxAhci::suspend(self)
    }

    fn resume(&self) -> Result<(), AhciImxError> {
        ImxAhci::resume(self)
    }
}

/// Port operations for the controller.
///
/// Runs the generic error handler first, then checks whether the link should be powered down.
pub struct ImxPortOps<R, D, G, C> {
    host: HostRef<R, D, G, C>,
    generic: alloc::boxed::Box<dyn GenericErrorHandler + Send + Sync>,
}

impl<R, D, G, C> ImxPortOps<R, D, G, C> {
    pub fn new(
        host: HostRef<R, D, G, C>,
        generic: alloc::boxed::Box<dyn GenericErrorHandler + Send + Sync>,
    ) -> Self {
        Self { host, generic }
    }

    pub fn host(&self) -> &HostRef<R, D, G, C> {
        &self.host
    }
}

impl<R, D, G, C> PortErrorHandler for ImxPortOps<R, D, G, C>
where
    R: RegisterSpace,
    D: UsDelay,
    G: Regmap,
    C: ClockManager,
{
    fn error_handler(&self, link: &mut dyn AtaLink) {
        self.generic.handle(link);
        self.host.link_error(link.has_enabled_device());
    }
}

bitflags::bitflags! {
    /// Port capabilities advertised to the ATA layer.
    #[repr(transparent)]
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct PortFlags: u32 {
        const SATA = 1 << 1;
        const PIO_DMA = 1 << 7;
        const ACPI_SATA = 1 << 17;
        /// Asynchronous notification
        const AN = 1 << 18;

        const AHCI_COMMON = Self::SATA.bits() | Self::PIO_DMA.bits() | Self::ACPI_SATA.bits() | Self::AN.bits();
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PortInfo {
    pub flags: PortFlags,
    /// Supported PIO modes, bit `n` is mode `n`.
    pub pio_mask: u8,
    /// Supported UDMA modes, bit `n` is mode `n`.
    pub udma_mask: u8,
}

/// Per compatible data handed to the framework when a device is matched.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PlatformData {
    pub compatible: &'static str,
    pub port_info: PortInfo,
}

pub static MATCH_TABLE: [PlatformData; 1] = [PlatformData {
    compatible: "fsl,imx6q-ahci",
    port_info: PortInfo {
        flags: PortFlags::AHCI_COMMON,
        // PIO4
        pio_mask: 0x1f,
        // UDMA6
        udma_mask: 0x7f,
    },
}];

/// Looks up the platform data for a device tree `compatible` string.
pub fn match_compatible(compatible: &str) -> Result<&'static PlatformData, AhciImxError> {
    MATCH_TABLE
        .iter()
        .find(|d| d.compatible == compatible)
        .ok_or(AhciImxError::NoMatch)
}

impl<R, D, G, C> ImxAhci<R, D, G, C>
where
    R: RegisterSpace,
    D: UsDelay,
    G: Regmap,
    C: ClockManager,
{
    /// Matches `compatible` and constructs the shared controller state for the framework.
    ///
    /// `gpr` is the result of the framework's syscon lookup, a failure is returned unchanged as
    /// [AhciImxError::Framework]. The returned state has `no_device` clear and `first_time` set.
    pub fn probe(
        compatible: &str,
        config: crate::Config,
        regs: R,
        delay: Jitter<D>,
        gpr: Result<G, i32>,
        clocks: C,
    ) -> Result<(HostRef<R, D, G, C>, &'static PlatformData), AhciImxError> {
        let data = match_compatible(compatible).inspect_err(|_| {
            log::trace!("{DRIVER_NAME}: {compatible} not handled by this driver");
        })?;
        let gpr = gpr.map_err(|e| {
            log::error!("{DRIVER_NAME}: failed to find fsl,imx6q-iomuxc-gpr regmap: {e}");
            AhciImxError::Framework(e)
        })?;
        log::info!("{DRIVER_NAME}: probing {compatible}, hotplug={}", config.hotplug);

        let host = alloc::sync::Arc::new(Self::new(config, regs, delay, gpr, clocks));
        Ok((host, data))
    }
}
