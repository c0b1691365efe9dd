//! Bounded busy waits used between polls of the PHY.
//!
//! Every wait is drawn at random from a window rather than being a fixed period, so retries do not
//! settle into lockstep with the PHY's own sampling clock.

use core::ops::RangeInclusive;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Wait between two ack polls.
pub const ACK_POLL: RangeInclusive<u32> = 100..=200;
/// Wait for the CR clock reset to propagate through the PHY.
pub const RESET_SETTLE: RangeInclusive<u32> = 100..=200;
/// Wait between two reads of the lane 0 status while waiting for RX-PLL lock.
pub const LOCK_POLL: RangeInclusive<u32> = 1000..=2000;
/// Wait for the MPLL to settle after its clock has been enabled.
pub const PLL_SETTLE: RangeInclusive<u32> = 100..=200;

/// Platform provided microsecond delay.
///
/// This is called from contexts which may block, implementations may either spin or sleep.
pub trait UsDelay {
    fn delay_us(&mut self, us: u32);
}

impl<T: UsDelay + ?Sized> UsDelay for &mut T {
    fn delay_us(&mut self, us: u32) {
        (**self).delay_us(us)
    }
}

/// Wraps a [UsDelay] to sleep for a random duration within a window.
pub struct Jitter<D> {
    delay: D,
    rng: SmallRng,
}

impl<D: UsDelay> Jitter<D> {
    pub fn new(delay: D, seed: u64) -> Self {
        Self {
            delay,
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    /// Sleeps for a uniformly chosen number of microseconds within `window`.
    ///
    /// # Panics
    ///
    /// This fn will panic if `window` is empty.
    pub fn sleep(&mut self, window: RangeInclusive<u32>) {
        assert!(!window.is_empty(), "Empty delay window {window:?}");
        let us = self.rng.gen_range(window);
        self.delay.delay_us(us);
    }

    pub fn inner(&self) -> &D {
        &self.delay
    }

    pub fn inner_mut(&mut self) -> &mut D {
        &mut self.delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Record(Vec<u32>);

    impl UsDelay for Record {
        fn delay_us(&mut self, us: u32) {
            self.0.push(us)
        }
    }

    #[test]
    fn sleep_stays_in_window() {
        let mut j = Jitter::new(Record(Vec::new()), 0x5a7a);
        for _ in 0..256 {
            j.sleep(ACK_POLL);
            j.sleep(LOCK_POLL);
        }

        for pair in j.inner().0.chunks(2) {
            assert!(ACK_POLL.contains(&pair[0]));
            assert!(LOCK_POLL.contains(&pair[1]));
        }
    }

    #[test]
    fn sleep_is_jittered() {
        let mut j = Jitter::new(Record(Vec::new()), 1);
        for _ in 0..64 {
            j.sleep(ACK_POLL);
        }
        let first = j.inner().0[0];
        assert!(j.inner().0.iter().any(|d| *d != first));
    }

    #[test]
    fn fixed_window() {
        let mut j = Jitter::new(Record(Vec::new()), 7);
        j.sleep(150..=150);
        assert_eq!(j.inner().0, [150]);
    }

    #[test]
    #[should_panic]
    fn empty_window() {
        let mut j = Jitter::new(Record(Vec::new()), 7);
        let (lo, hi) = (200, 100);
        j.sleep(lo..=hi);
    }
}
