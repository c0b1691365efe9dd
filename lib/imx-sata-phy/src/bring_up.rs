//! PHY clock reset and RX-PLL lock sequence.

use crate::delay::{LOCK_POLL, RESET_SETTLE, UsDelay};
use crate::{DEFAULT_ACK_RETRIES, PhyInterface, RegisterSpace};

/// CR address of the clock reset register.
pub const CR_CLOCK_RESET: u16 = 0x7f3f;
/// Value written to [CR_CLOCK_RESET] to reset the PHY clocks.
pub const CR_RESET_ENABLE: u16 = 0x0001;
/// CR address of the lane 0 output status register.
pub const CR_LANE0_OUT_STAT: u16 = 0x2003;

bitflags::bitflags! {
    /// LANE0_OUT_STAT (RO)
    #[repr(transparent)]
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct Lane0OutStat: u16 {
        /// RX_VALID
        const RX_VALID = 1;
        /// RX_PLL_STATE
        ///
        /// Set once the receive PLL has locked.
        const RX_STABLE = 1 << 1;
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BringUpConfig {
    /// Retries performed for every CR ack edge.
    pub ack_retries: u32,
    /// Number of times the lane status is read while waiting for RX-PLL lock.
    pub lock_attempts: u8,
}

impl Default for BringUpConfig {
    fn default() -> Self {
        Self {
            ack_retries: DEFAULT_ACK_RETRIES,
            lock_attempts: 6,
        }
    }
}

/// Outcome of [PhyInterface::bring_up].
///
/// Bring-up never fails, some boards have a PHY which is slow to lock but works regardless.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BringUpStatus {
    /// RX_STABLE was observed on attempt `attempts`.
    Locked { attempts: u8 },
    /// The RX-PLL did not report lock. The link may still come up with reduced reliability.
    ///
    /// `protocol_errors` counts CR accesses which timed out along the way.
    Degraded { attempts: u8, protocol_errors: u8 },
}

impl BringUpStatus {
    pub fn is_locked(&self) -> bool {
        matches!(self, Self::Locked { .. })
    }
}

impl<R: RegisterSpace, D: UsDelay> PhyInterface<R, D> {
    /// Resets the PHY clocks and waits for the RX-PLL to lock.
    ///
    /// CR errors are logged and counted but never abort the sequence, all `lock_attempts` are
    /// performed unless lock is observed first. When `lock_attempts` is `0` only the reset is
    /// performed.
    pub fn bring_up(&mut self, cfg: &BringUpConfig) -> BringUpStatus {
        self.set_ack_retries(cfg.ack_retries);
        let mut errors: u8 = 0;
        let mut count = |r: Result<_, _>| {
            if r.is_err() {
                errors = errors.saturating_add(1);
            }
        };

        count(self.select(CR_CLOCK_RESET));
        count(self.write(CR_RESET_ENABLE));
        self.jitter_mut().sleep(RESET_SETTLE);

        for attempt in 1..=cfg.lock_attempts {
            count(self.select(CR_LANE0_OUT_STAT));
            match self.read() {
                Ok(v) if Lane0OutStat::from_bits_retain(v).contains(Lane0OutStat::RX_STABLE) => {
                    log::info!("SATA PHY: RX_PLL is stable after {attempt} attempts");
                    return BringUpStatus::Locked { attempts: attempt };
                }
                Ok(_) => {}
                Err(e) => count(Err(e)),
            }

            if attempt == cfg.lock_attempts {
                log::warn!("SATA PHY: waiting for RX_PLL lock timed out");
            }
            self.jitter_mut().sleep(LOCK_POLL);
        }

        BringUpStatus::Degraded {
            attempts: cfg.lock_attempts,
            protocol_errors: errors,
        }
    }
}
