//! Platform glue for the AHCI controller found on the i.MX6Q.
//!
//! The controller itself is driven by the generic AHCI code, this crate provides the platform
//! specific parts: PHY bring-up through the CR interface, HWINIT fixups of the host registers and
//! power management of the PHY across suspend, resume and empty links.
#![cfg_attr(not(test), no_std)]
extern crate alloc;

pub mod clock;
pub mod driver;
pub mod glue;
pub(crate) mod hba;

pub use driver::ImxAhci;
pub use driver::platform_if::{
    AhciPlatformOps, AtaLink, GenericErrorHandler, ImxPortOps, PortErrorHandler,
};

/// Controller configuration, fixed for the lifetime of the controller.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Config {
    /// When set the PHY is kept powered on links where no device was found, so a device may be
    /// connected later.
    pub hotplug: bool,
    pub phy: glue::PhyParameters,
    pub bring_up: imx_sata_phy::BringUpConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hotplug: false,
            phy: glue::PhyParameters::default(),
            bring_up: imx_sata_phy::BringUpConfig::default(),
        }
    }
}

/// Last known power state of the PHY.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PowerState {
    /// The controller has been attached but not initialized.
    Uninit,
    /// Clocks are held and the PHY has been brought up.
    Active,
    /// Clocks are released, the PHY can be brought up again by resume.
    PoweredDown,
    /// No device was found on the link and the PHY was placed into PDDQ.
    ///
    /// This is only left by a full controller reset, suspend and resume do nothing in this state.
    LinkDisabled,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AhciImxError {
    /// The reference clock or bus frequency could not be acquired.
    ///
    /// The PHY must never be operated without its clocks, the calling transition is aborted.
    Clock(clock::ClockError),
    /// The clocks were acquired twice without being released.
    ClockAlreadyHeld,
    /// The clocks were released while not held.
    ClockNotHeld,
    /// A resource supplied by the platform framework was unavailable, carries its error code.
    Framework(i32),
    /// The device is not handled by this driver.
    NoMatch,
}

impl From<clock::ClockError> for AhciImxError {
    fn from(value: clock::ClockError) -> Self {
        Self::Clock(value)
    }
}

impl core::fmt::Display for AhciImxError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Clock(e) => write!(f, "{e}"),
            Self::ClockAlreadyHeld => write!(f, "clocks already held"),
            Self::ClockNotHeld => write!(f, "clocks not held"),
            Self::Framework(e) => write!(f, "platform resource error {e}"),
            Self::NoMatch => write!(f, "no matching device"),
        }
    }
}
