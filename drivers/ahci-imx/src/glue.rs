//! SATA PHY analog parameters held within the IOMUXC general purpose register block.
//!
//! The GPR block is shared with other SoC functions and is accessed through a regmap style
//! interface which performs read-modify-write updates of a masked field.

/// Offset of IOMUXC_GPR13 within the GPR block.
pub const IOMUXC_GPR13: u32 = 0x34;

/// Shared SoC register block accessed by masked read-modify-write.
pub trait Regmap {
    /// Replaces the bits selected by `mask` in the register at `offset` with the same bits from
    /// `value`.
    fn update_bits(&mut self, offset: u32, mask: u32, value: u32);
}

impl<T: Regmap + ?Sized> Regmap for &mut T {
    fn update_bits(&mut self, offset: u32, mask: u32, value: u32) {
        (**self).update_bits(offset, mask, value)
    }
}

bitflags::bitflags! {
    /// IOMUXC_GPR13 SATA fields (RW)
    #[repr(transparent)]
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct Gpr13: u32 {
        const RX_EQ_VAL = 0x7 << 28;
        const RX_LOS_LVL = 0x1f << 23;
        const RX_DPLL_MODE = 0x7 << 20;
        const SPD_MODE = 1 << 19;
        /// Spread spectrum clocking for the MPLL
        const MPLL_SS_EN = 1 << 18;
        const TX_ATTEN = 0x7 << 14;
        const TX_BOOST = 0xf << 7;
        const TX_LVL = 0x1f << 2;
        /// Enables the MPLL clock. This must only be set once all other fields are configured.
        const MPLL_CLK_EN = 1 << 1;
        const TX_EDGE_RATE = 1;

        /// All fields set by the first of the two phase parameter update.
        const PARAMETERS = Self::RX_EQ_VAL.bits()
            | Self::RX_LOS_LVL.bits()
            | Self::RX_DPLL_MODE.bits()
            | Self::SPD_MODE.bits()
            | Self::MPLL_SS_EN.bits()
            | Self::TX_ATTEN.bits()
            | Self::TX_BOOST.bits()
            | Self::TX_LVL.bits()
            | Self::TX_EDGE_RATE.bits();
    }
}

/// Receiver equalization boost.
#[repr(u32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RxEqualization {
    Db0_5 = 0,
    Db1_0,
    Db1_5,
    Db2_0,
    Db2_5,
    Db3_0,
    Db3_5,
    Db4_0,
}

/// Loss of signal detector threshold.
#[repr(u32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LossOfSignalLevel {
    /// SATA1I, SATA1M
    Sata1 = 0x10,
    /// SATA2I, SATA2M
    Sata2 = 0x12,
    /// SATA1X, SATA2X
    External = 0x1a,
}

/// Receiver DPLL phase/frequency integrator configuration.
#[repr(u32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DpllMode {
    OnePhaseOneFreq = 0,
    TwoPhaseTwoFreq,
    OnePhaseFourFreq,
    TwoPhaseFourFreq,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SpeedMode {
    /// 1.5Gib/s
    Gen1,
    /// 3Gib/s
    Gen2,
}

/// Transmit amplitude attenuation in sixteenths.
#[repr(u32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TxAttenuation {
    Sixteen16 = 0,
    Fourteen16,
    Twelve16,
    Ten16,
    Nine16,
    Eight16,
}

/// Transmit de-emphasis, steps of ~0.37dB starting at 0dB.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TxBoost(u8);

impl TxBoost {
    /// 3.33dB
    pub const DB3_33: Self = Self(9);

    /// Returns `None` if `step > 15`
    pub const fn new(step: u8) -> Option<Self> {
        match step {
            0..=15 => Some(Self(step)),
            _ => None,
        }
    }
}

/// Transmit amplitude, steps of ~9.7mV starting at 0.937V.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TxLevel(u8);

impl TxLevel {
    /// 1.104V
    pub const V1_104: Self = Self(0x11);

    /// Returns `None` if `step > 31`
    pub const fn new(step: u8) -> Option<Self> {
        match step {
            0..=31 => Some(Self(step)),
            _ => None,
        }
    }
}

/// Analog parameters programmed into GPR13 before the MPLL is enabled.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PhyParameters {
    pub rx_equalization: RxEqualization,
    pub rx_los_level: LossOfSignalLevel,
    pub rx_dpll_mode: DpllMode,
    pub speed: SpeedMode,
    pub spread_spectrum: bool,
    pub tx_attenuation: TxAttenuation,
    pub tx_boost: TxBoost,
    pub tx_level: TxLevel,
    /// Slow transmit edge rate.
    pub tx_edge_rate: bool,
}

impl Default for PhyParameters {
    /// Reference parameters for the i.MX6Q.
    fn default() -> Self {
        Self {
            rx_equalization: RxEqualization::Db3_0,
            rx_los_level: LossOfSignalLevel::Sata2,
            rx_dpll_mode: DpllMode::TwoPhaseFourFreq,
            speed: SpeedMode::Gen2,
            spread_spectrum: true,
            tx_attenuation: TxAttenuation::Nine16,
            tx_boost: TxBoost::DB3_33,
            tx_level: TxLevel::V1_104,
            tx_edge_rate: false,
        }
    }
}

impl PhyParameters {
    /// Returns the GPR13 value for these parameters. [Gpr13::MPLL_CLK_EN] is never set.
    pub fn gpr13_value(&self) -> Gpr13 {
        let mut v = Gpr13::from_bits_retain(
            (self.rx_equalization as u32) << 28
                | (self.rx_los_level as u32) << 23
                | (self.rx_dpll_mode as u32) << 20
                | (self.tx_attenuation as u32) << 14
                | (self.tx_boost.0 as u32) << 7
                | (self.tx_level.0 as u32) << 2,
        );
        v.set(Gpr13::SPD_MODE, self.speed == SpeedMode::Gen2);
        v.set(Gpr13::MPLL_SS_EN, self.spread_spectrum);
        v.set(Gpr13::TX_EDGE_RATE, self.tx_edge_rate);
        v
    }
}

/// Programs the PHY parameters with the MPLL clock disabled.
///
/// The MPLL enable is cleared within the same update so that it can only rise after every other
/// field holds its final value.
pub(crate) fn program_parameters<G: Regmap>(gpr: &mut G, params: &PhyParameters) {
    let mask = Gpr13::PARAMETERS | Gpr13::MPLL_CLK_EN;
    gpr.update_bits(IOMUXC_GPR13, mask.bits(), params.gpr13_value().bits());
}

pub(crate) fn set_mpll_clock<G: Regmap>(gpr: &mut G, enable: bool) {
    let value = match enable {
        true => Gpr13::MPLL_CLK_EN,
        false => Gpr13::empty(),
    };
    gpr.update_bits(IOMUXC_GPR13, Gpr13::MPLL_CLK_EN.bits(), value.bits());
}
