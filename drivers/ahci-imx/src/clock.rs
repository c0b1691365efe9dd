//! Reference clock and bus frequency ownership.

use crate::AhciImxError;

/// Errors returned by a [ClockManager]. Each carries the error code reported by the platform.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ClockError {
    /// The `sata_ref` clock could not be prepared or enabled.
    ReferenceClock(i32),
    /// The high bus frequency request was refused.
    BusFrequency(i32),
}

impl core::fmt::Display for ClockError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::ReferenceClock(e) => write!(f, "sata_ref clock error {e}"),
            Self::BusFrequency(e) => write!(f, "high bus frequency request error {e}"),
        }
    }
}

/// Platform clock and power domain control used by the controller.
pub trait ClockManager {
    fn acquire_reference_clock(&mut self) -> Result<(), ClockError>;
    fn release_reference_clock(&mut self) -> Result<(), ClockError>;
    fn request_high_bandwidth(&mut self) -> Result<(), ClockError>;
    fn release_high_bandwidth(&mut self) -> Result<(), ClockError>;

    /// Rate of the `ahb` bus clock in Hz.
    fn bus_clock_rate(&self) -> u32;
}

/// Owns the reference clock and the high bus frequency request as a single resource.
///
/// Acquire and release must alternate, acquiring a held handle or releasing a free one is an error
/// and has no effect on the underlying clocks.
pub struct ClockHandle<C> {
    clocks: C,
    held: bool,
}

impl<C: ClockManager> ClockHandle<C> {
    pub fn new(clocks: C) -> Self {
        Self {
            clocks,
            held: false,
        }
    }

    pub fn is_held(&self) -> bool {
        self.held
    }

    /// Enables the reference clock then requests the high bus frequency.
    ///
    /// If the bus frequency cannot be raised the reference clock is released again before
    /// returning the error.
    pub fn acquire(&mut self) -> Result<(), AhciImxError> {
        if self.held {
            return Err(AhciImxError::ClockAlreadyHeld);
        }

        self.clocks.acquire_reference_clock()?;
        if let Err(e) = self.clocks.request_high_bandwidth() {
            if let Err(r) = self.clocks.release_reference_clock() {
                log::error!("AHCI IMX: failed to release sata_ref clock after error: {r}");
            }
            return Err(e.into());
        }

        self.held = true;
        Ok(())
    }

    /// Disables the reference clock and drops the high bus frequency request.
    ///
    /// Both are released even if the first fails, the handle is free afterwards. The first error
    /// encountered is returned.
    pub fn release(&mut self) -> Result<(), AhciImxError> {
        if !self.held {
            return Err(AhciImxError::ClockNotHeld);
        }
        self.held = false;

        let clk = self.clocks.release_reference_clock();
        let bus = self.clocks.release_high_bandwidth();
        clk.and(bus).map_err(Into::into)
    }

    pub fn bus_clock_rate(&self) -> u32 {
        self.clocks.bus_clock_rate()
    }

    pub fn inner(&self) -> &C {
        &self.clocks
    }

    #[cfg(test)]
    pub(crate) fn inner_mut(&mut self) -> &mut C {
        &mut self.clocks
    }
}
