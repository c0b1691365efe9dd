use crate::clock::{ClockHandle, ClockManager};
use crate::glue::Regmap;
use crate::{AhciImxError, Config, PowerState};
use core::sync::atomic::AtomicBool;
use imx_sata_phy::delay::{Jitter, PLL_SETTLE, UsDelay};
use imx_sata_phy::{BringUpStatus, PhyInterface, RegisterSpace};

pub mod platform_if;

/// Shared handle to the controller state held by the framework.
pub type HostRef<R, D, G, C> = alloc::sync::Arc<ImxAhci<R, D, G, C>>;

/// Everything which must be held while touching the hardware.
///
/// The CR interface is a strict request/acknowledge protocol, all hardware accesses go through
/// this so a CR access can never be interleaved with another.
pub(crate) struct Resources<R, D, G, C> {
    pub(crate) phy: PhyInterface<R, D>,
    pub(crate) gpr: G,
    pub(crate) clocks: ClockHandle<C>,
}

/// State for a single controller instance, shared between all callbacks invoked by the AHCI
/// framework.
pub struct ImxAhci<R, D, G, C> {
    config: Config,
    resources: spin::Mutex<Resources<R, D, G, C>>,
    state: atomic::Atomic<PowerState>,
    /// Cleared by the first error handler pass.
    first_time: AtomicBool,
}

impl<R, D, G, C> ImxAhci<R, D, G, C>
where
    R: RegisterSpace,
    D: UsDelay,
    G: Regmap,
    C: ClockManager,
{
    /// Constructs the controller state. The hardware is not touched until [Self::init].
    pub fn new(config: Config, regs: R, delay: Jitter<D>, gpr: G, clocks: C) -> Self {
        Self {
            config,
            resources: spin::Mutex::new(Resources {
                phy: PhyInterface::new(regs, delay),
                gpr,
                clocks: ClockHandle::new(clocks),
            }),
            state: atomic::Atomic::new(PowerState::Uninit),
            first_time: AtomicBool::new(true),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn power_state(&self) -> PowerState {
        self.state.load(atomic::Ordering::Acquire)
    }

    /// Whether the PHY was disabled because no device was present on the link.
    pub fn no_device(&self) -> bool {
        self.power_state() == PowerState::LinkDisabled
    }

    /// Whether the error handler has not yet run.
    pub fn first_time(&self) -> bool {
        self.first_time.load(atomic::Ordering::Acquire)
    }

    /// Brings up the PHY and performs the HWINIT fixups.
    ///
    /// This must be called once before the generic AHCI code reads the host registers. A PHY
    /// which does not lock is logged but does not fail initialization.
    pub fn init(&self) -> Result<(), AhciImxError> {
        let mut res = self.resources.lock();
        let Resources { phy, gpr, clocks } = &mut *res;

        if let Err(e) = clocks.acquire() {
            log::error!("AHCI IMX: failed to acquire clocks: {e}");
            return Err(e);
        }

        crate::glue::program_parameters(gpr, &self.config.phy);
        let status = self.start_phy(phy, gpr);

        let regs = phy.regs_mut();
        crate::hba::enable_staggered_spin_up(regs);
        crate::hba::implement_port(regs, 0);
        crate::hba::program_timer_1ms(regs, clocks.bus_clock_rate());

        log::debug!("AHCI IMX: initialized, PHY {status:?}");
        self.state.store(PowerState::Active, atomic::Ordering::Release);
        Ok(())
    }

    /// Releases the clocks when the controller is detached.
    pub fn exit(&self) {
        let mut res = self.resources.lock();
        if self.no_device() {
            return;
        }
        if !res.clocks.is_held() {
            log::debug!("AHCI IMX: exit with clocks already released");
            return;
        }
        if let Err(e) = self.power_down(&mut res) {
            log::error!("AHCI IMX: failed to release clocks on exit: {e}");
        }
    }

    /// Gates the PHY clocks.
    ///
    /// Only an active controller is suspended, in any other state this does nothing.
    pub fn suspend(&self) -> Result<(), AhciImxError> {
        let mut res = self.resources.lock();
        match self.power_state() {
            PowerState::Active => self.power_down(&mut res),
            state => {
                log::debug!("AHCI IMX: suspend ignored in state {state:?}");
                Ok(())
            }
        }
    }

    /// Restores the PHY clocks and brings the PHY back up.
    ///
    /// Only a suspended controller is resumed, in any other state this does nothing. Clock
    /// failures are returned, the PHY is never run without its clocks.
    pub fn resume(&self) -> Result<(), AhciImxError> {
        let mut res = self.resources.lock();
        let state = self.power_state();
        if state != PowerState::PoweredDown {
            log::debug!("AHCI IMX: resume ignored in state {state:?}");
            return Ok(());
        }

        let Resources { phy, gpr, clocks } = &mut *res;
        if let Err(e) = clocks.acquire() {
            log::error!("AHCI IMX: failed to acquire clocks on resume: {e}");
            return Err(e);
        }

        let status = self.start_phy(phy, gpr);
        log::debug!("AHCI IMX: resumed, PHY {status:?}");
        self.state.store(PowerState::Active, atomic::Ordering::Release);
        Ok(())
    }

    /// Runs after the generic error handler.
    ///
    /// On the first pass, if no device is enabled on the link and hotplug is not supported, the
    /// PHY is placed into PDDQ and its clocks are released. A PHY in PDDQ can only be recovered
    /// by a full reset so this is not used for link power management.
    pub fn link_error(&self, has_enabled_device: bool) {
        if self.config.hotplug {
            return;
        }
        if self
            .first_time
            .compare_exchange(
                true,
                false,
                atomic::Ordering::AcqRel,
                atomic::Ordering::Acquire,
            )
            .is_err()
        {
            return;
        }
        if has_enabled_device {
            return;
        }

        log::info!("AHCI IMX: no device found, disabling link to save power");
        let mut res = self.resources.lock();
        res.phy.assert_power_down();
        crate::glue::set_mpll_clock(&mut res.gpr, false);
        if let Err(e) = res.clocks.release() {
            log::error!("AHCI IMX: failed to release clocks after disabling link: {e}");
        }
        self.state
            .store(PowerState::LinkDisabled, atomic::Ordering::Release);
    }

    /// Enables the MPLL and runs PHY bring-up. Clocks must be held.
    fn start_phy(&self, phy: &mut PhyInterface<R, D>, gpr: &mut G) -> BringUpStatus {
        crate::glue::set_mpll_clock(gpr, true);
        phy.jitter_mut().sleep(PLL_SETTLE);
        phy.bring_up(&self.config.bring_up)
    }

    /// Disables the MPLL and releases the clocks. The state only moves to
    /// [PowerState::PoweredDown] if the release succeeded.
    fn power_down(&self, res: &mut Resources<R, D, G, C>) -> Result<(), AhciImxError> {
        crate::glue::set_mpll_clock(&mut res.gpr, false);
        res.clocks.release()?;
        self.state
            .store(PowerState::PoweredDown, atomic::Ordering::Release);
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn resources(&self) -> spin::MutexGuard<'_, Resources<R, D, G, C>> {
        self.resources.lock()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::clock::tests::FakeClocks;
    use crate::clock::ClockError;
    use crate::glue::tests::FakeGpr;
    use crate::hba::HostCapabilities;
    use imx_sata_phy::bring_up::CR_LANE0_OUT_STAT;
    use imx_sata_phy::sim::{NoDelay, SimPhy};
    use imx_sata_phy::{HostRegister, PhyControl};

    pub(crate) type TestHost = ImxAhci<SimPhy, NoDelay, FakeGpr, FakeClocks>;

    pub(crate) fn host_with(config: Config, sim: SimPhy, clocks: FakeClocks) -> TestHost {
        ImxAhci::new(
            config,
            sim,
            Jitter::new(NoDelay::default(), 0xa4c1),
            FakeGpr::default(),
            clocks,
        )
    }

    pub(crate) fn host() -> TestHost {
        host_with(
            Config::default(),
            SimPhy::new(),
            FakeClocks::with_rate(66_000_000),
        )
    }

    fn ddq_writes(res: &Resources<SimPhy, NoDelay, FakeGpr, FakeClocks>) -> usize {
        res.phy
            .regs()
            .writes
            .iter()
            .filter(|(r, v)| {
                *r == HostRegister::PhyControl && v & PhyControl::POWER_DOWN.bits() != 0
            })
            .count()
    }

    #[test]
    fn init_bootstraps_controller() {
        let h = host();
        h.init().unwrap();

        assert_eq!(h.power_state(), PowerState::Active);
        assert!(!h.no_device());
        assert!(h.first_time());

        let res = h.resources();
        let sim = res.phy.regs();
        assert_eq!(sim.clock_resets, 1);
        assert!(
            HostCapabilities::from_bits_retain(sim.capabilities)
                .contains(HostCapabilities::STAGGERED_SPIN_UP)
        );
        assert_eq!(sim.ports_implemented & 1, 1);
        assert_eq!(sim.timer_1ms, 66_000);
        assert!(res.gpr.mpll_enabled());
        assert!(res.clocks.is_held());
        assert_eq!(res.clocks.inner().acquires, 1);
        assert_eq!(res.clocks.inner().bus_requests, 1);
    }

    #[test]
    fn init_programs_parameters_before_clock() {
        let h = host();
        h.init().unwrap();

        let res = h.resources();
        let expected = h.config().phy.gpr13_value().bits();
        assert_eq!(res.gpr.updates.len(), 2);
        // Parameters with the MPLL clock held off, then the clock alone.
        assert_eq!(res.gpr.updates[0].2, expected);
        assert_eq!(res.gpr.updates[0].1 & 0b10, 0b10);
        assert_eq!(res.gpr.updates[0].2 & 0b10, 0);
        assert_eq!(res.gpr.updates[1].1, 0b10);
        assert_eq!(res.gpr.updates[1].2, 0b10);
        assert_eq!(res.gpr.value, expected | 0b10);
    }

    #[test]
    fn init_skips_fixups_already_present() {
        let mut sim = SimPhy::new();
        sim.capabilities = HostCapabilities::STAGGERED_SPIN_UP.bits();
        sim.ports_implemented = 1;
        let h = host_with(Config::default(), sim, FakeClocks::with_rate(132_000_000));
        h.init().unwrap();

        let res = h.resources();
        let sim = res.phy.regs();
        assert_eq!(sim.writes_to(HostRegister::Capabilities), 0);
        assert_eq!(sim.writes_to(HostRegister::PortsImplemented), 0);
        assert_eq!(sim.writes_to(HostRegister::Timer1Ms), 1);
        assert_eq!(sim.timer_1ms, 132_000);
    }

    #[test]
    fn init_without_lock_still_succeeds() {
        let h = host_with(
            Config::default(),
            SimPhy::never_locks(),
            FakeClocks::with_rate(66_000_000),
        );
        h.init().unwrap();

        assert_eq!(h.power_state(), PowerState::Active);
        let res = h.resources();
        assert_eq!(res.phy.regs().cr_reads, [CR_LANE0_OUT_STAT; 6]);
        assert_eq!(res.phy.regs().timer_1ms, 66_000);
    }

    #[test]
    fn init_with_unresponsive_phy_still_succeeds() {
        let mut config = Config::default();
        config.bring_up.ack_retries = 3;
        let h = host_with(
            config,
            SimPhy::unresponsive(),
            FakeClocks::with_rate(66_000_000),
        );

        h.init().unwrap();
        assert_eq!(h.power_state(), PowerState::Active);
    }

    #[test]
    fn init_clock_failure_is_fatal() {
        let h = host_with(
            Config::default(),
            SimPhy::new(),
            FakeClocks {
                fail_ref: Some(-22),
                ..FakeClocks::default()
            },
        );

        assert_eq!(
            h.init(),
            Err(AhciImxError::Clock(ClockError::ReferenceClock(-22)))
        );
        assert_eq!(h.power_state(), PowerState::Uninit);
        let res = h.resources();
        assert!(res.phy.regs().writes.is_empty());
        assert!(res.gpr.updates.is_empty());
    }

    #[test]
    fn suspend_resume_restores_phy() {
        let mut sim = SimPhy::new();
        sim.lock_after = Some(2);
        let h = host_with(Config::default(), sim, FakeClocks::with_rate(66_000_000));
        h.init().unwrap();

        h.suspend().unwrap();
        assert_eq!(h.power_state(), PowerState::PoweredDown);
        assert!(!h.no_device());
        {
            let res = h.resources();
            assert!(!res.clocks.is_held());
            assert!(!res.gpr.mpll_enabled());
            assert_eq!(ddq_writes(&res), 0);
            assert!(!res.clocks.inner().high_bandwidth);
        }

        h.resume().unwrap();
        assert_eq!(h.power_state(), PowerState::Active);
        assert!(!h.no_device());

        let mut res = h.resources();
        assert!(res.clocks.is_held());
        assert!(res.gpr.mpll_enabled());
        assert_eq!(res.phy.regs().clock_resets, 2);
        assert_eq!(res.clocks.inner().acquires, 2);
        // Resume does not touch the HWINIT registers again.
        assert_eq!(res.phy.regs().writes_to(HostRegister::Timer1Ms), 1);

        let cfg = h.config().bring_up;
        assert!(res.phy.bring_up(&cfg).is_locked());
    }

    #[test]
    fn resume_clock_failure_is_fatal() {
        let h = host();
        h.init().unwrap();
        h.suspend().unwrap();

        h.resources().clocks_fail_bus(-16);
        assert_eq!(
            h.resume(),
            Err(AhciImxError::Clock(ClockError::BusFrequency(-16)))
        );
        assert_eq!(h.power_state(), PowerState::PoweredDown);
        let res = h.resources();
        assert!(!res.clocks.is_held());
        assert_eq!(res.phy.regs().clock_resets, 1);
    }

    #[test]
    fn suspend_before_init_does_nothing() {
        let h = host();
        assert_eq!(h.suspend(), Ok(()));
        assert_eq!(h.power_state(), PowerState::Uninit);

        // A resume must not bring up a PHY which was never configured.
        assert_eq!(h.resume(), Ok(()));
        assert_eq!(h.power_state(), PowerState::Uninit);

        let res = h.resources();
        assert!(res.gpr.updates.is_empty());
        assert!(res.phy.regs().writes.is_empty());
        assert_eq!(res.clocks.inner().acquires, 0);
        assert_eq!(res.clocks.inner().releases, 0);
    }

    #[test]
    fn double_suspend() {
        let h = host();
        h.init().unwrap();
        h.suspend().unwrap();
        let updates = h.resources().gpr.updates.len();

        assert_eq!(h.suspend(), Ok(()));
        assert_eq!(h.power_state(), PowerState::PoweredDown);
        {
            let res = h.resources();
            assert_eq!(res.gpr.updates.len(), updates);
            assert_eq!(res.clocks.inner().releases, 1);
        }

        h.resume().unwrap();
        assert_eq!(h.power_state(), PowerState::Active);
        assert_eq!(h.resources().clocks.inner().acquires, 2);
    }

    #[test]
    fn resume_while_active_does_nothing() {
        let h = host();
        h.init().unwrap();

        assert_eq!(h.resume(), Ok(()));
        let res = h.resources();
        assert_eq!(res.clocks.inner().acquires, 1);
        assert_eq!(res.phy.regs().clock_resets, 1);
    }

    #[test]
    fn suspend_release_failure_keeps_state() {
        let h = host();
        h.init().unwrap();
        h.resources().clocks.inner_mut().fail_release = Some(-110);

        assert_eq!(
            h.suspend(),
            Err(AhciImxError::Clock(ClockError::BusFrequency(-110)))
        );
        assert_eq!(h.power_state(), PowerState::Active);
    }

    #[test]
    fn exit_releases_once() {
        let h = host();
        h.init().unwrap();
        h.exit();
        h.exit();

        let res = h.resources();
        assert_eq!(res.clocks.inner().releases, 1);
        assert_eq!(res.clocks.inner().bus_releases, 1);
        assert!(!res.gpr.mpll_enabled());
    }

    #[test]
    fn first_pass_without_device_disables_link() {
        let h = host();
        h.init().unwrap();

        h.link_error(false);
        assert!(h.no_device());
        assert!(!h.first_time());
        {
            let res = h.resources();
            assert_eq!(ddq_writes(&res), 1);
            assert_eq!(res.clocks.inner().releases, 1);
            assert_eq!(res.clocks.inner().bus_releases, 1);
            assert!(res.phy.regs().powered_down());
        }

        h.link_error(false);
        let res = h.resources();
        assert_eq!(ddq_writes(&res), 1);
        assert_eq!(res.clocks.inner().releases, 1);
    }

    #[test]
    fn disabled_link_ignores_power_transitions() {
        let h = host();
        h.init().unwrap();
        h.link_error(false);

        let writes = h.resources().phy.regs().writes.len();
        h.suspend().unwrap();
        h.resume().unwrap();
        h.exit();

        assert_eq!(h.power_state(), PowerState::LinkDisabled);
        let res = h.resources();
        assert_eq!(res.phy.regs().writes.len(), writes);
        assert_eq!(res.clocks.inner().acquires, 1);
        assert_eq!(res.clocks.inner().releases, 1);
    }

    #[test]
    fn first_pass_with_device_keeps_link() {
        let h = host();
        h.init().unwrap();

        h.link_error(true);
        assert!(!h.first_time());
        assert_eq!(h.power_state(), PowerState::Active);

        // Only the first pass is considered.
        h.link_error(false);
        assert_eq!(h.power_state(), PowerState::Active);
        assert_eq!(ddq_writes(&h.resources()), 0);
    }

    #[test]
    fn hotplug_keeps_link() {
        let config = Config {
            hotplug: true,
            ..Config::default()
        };
        let h = host_with(config, SimPhy::new(), FakeClocks::with_rate(66_000_000));
        h.init().unwrap();

        h.link_error(false);
        assert!(!h.no_device());
        assert!(h.first_time());
        assert_eq!(ddq_writes(&h.resources()), 0);
    }

    impl Resources<SimPhy, NoDelay, FakeGpr, FakeClocks> {
        fn clocks_fail_bus(&mut self, e: i32) {
            self.clocks.inner_mut().fail_bus = Some(e);
        }
    }
}
