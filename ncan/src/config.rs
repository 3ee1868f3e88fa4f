//! Controller configuration
//!
//! [`BitTiming`] expects *real* values; the `-1` encodings expected by the
//! TIME_CFG register are handled when the word is composed.

use crate::reg::time_cfg;
use core::ops::RangeInclusive;
use fugit::HertzU32;

/// Valid range of phase segment 1, in time quanta
pub const PHASE_SEG_1_RANGE: RangeInclusive<u32> = 4..=16;
/// Valid range of phase segment 2, in time quanta
pub const PHASE_SEG_2_RANGE: RangeInclusive<u32> = 3..=8;
/// Valid range of the synchronization jump width, in time quanta
pub const SJW_RANGE: RangeInclusive<u32> = 1..=4;
/// Valid range of the time quantum prescaler
pub const PRESCALER_RANGE: RangeInclusive<u32> = 1..=256;

/// Bit-timing parameters
///
/// The bit time is determined by
/// - the time quantum `t_q`, the controller clock divided by `prescaler`
/// - the number of time quanta in a bit time, one synchronization quantum
///   plus `phase_seg_1` plus `phase_seg_2`
///
/// Out-of-range values are rejected when the TIME_CFG word is composed,
/// never silently clamped.
#[derive(Copy, Clone, Debug)]
pub struct BitTiming {
    /// Propagation time and phase time before the sample point
    pub phase_seg_1: u8,
    /// Time after the sample point
    pub phase_seg_2: u8,
    /// Synchronization jump width
    pub sjw: u8,
    /// Time quantum prescaler applied to the controller clock
    pub prescaler: u16,
    /// Sample the bus three times per bit instead of once
    pub triple_sampling: bool,
}

/// Misconfigurations of [`BitTiming`].
#[derive(Debug)]
pub enum BitTimingError {
    /// Phase segment 1 is outside the wrapped `RangeInclusive`
    PhaseSeg1OutOfRange(RangeInclusive<u32>),
    /// Phase segment 2 is outside the wrapped `RangeInclusive`
    PhaseSeg2OutOfRange(RangeInclusive<u32>),
    /// SJW is outside the wrapped `RangeInclusive`
    SynchronizationJumpWidthOutOfRange(RangeInclusive<u32>),
    /// Prescaler is outside the wrapped `RangeInclusive`
    PrescalerOutOfRange(RangeInclusive<u32>),
    /// No valid prescaler could be found
    ///
    /// The following requirement must be met:
    /// - `can_clock` must be divisible by `bitrate * bit_time_quanta`
    NoValidPrescaler {
        /// Provided controller clock
        can_clock: HertzU32,
        /// Requested bitrate
        bitrate: HertzU32,
        /// Time quanta per bit selected by [`BitTiming`]
        bit_time_quanta: u32,
    },
}

impl Default for BitTiming {
    fn default() -> Self {
        Self {
            phase_seg_1: 0xB,
            phase_seg_2: 0x4,
            sjw: 0x4,
            prescaler: 1,
            triple_sampling: false,
        }
    }
}

impl BitTiming {
    /// Returns the number of time quanta that make up one bit time, `t_bit /
    /// t_q`
    pub fn time_quanta_per_bit(&self) -> u32 {
        1 + u32::from(self.phase_seg_1) + u32::from(self.phase_seg_2)
    }

    /// Derive the timing for `bitrate` from the controller clock
    ///
    /// Segment lengths come pre-populated with default values; the prescaler
    /// is computed. Fails when the clock is not divisible into whole time
    /// quanta for the requested bitrate.
    pub fn from_bitrate(can_clock: HertzU32, bitrate: HertzU32) -> Result<Self, BitTimingError> {
        let mut timing = Self::default();
        let f_q = bitrate * timing.time_quanta_per_bit();
        if let Some(0) = can_clock.to_Hz().checked_rem(f_q.to_Hz()) {
            let prescaler = can_clock / f_q;
            if !PRESCALER_RANGE.contains(&prescaler) {
                return Err(BitTimingError::PrescalerOutOfRange(PRESCALER_RANGE));
            }
            timing.prescaler = prescaler as u16;
            Ok(timing)
        } else {
            Err(BitTimingError::NoValidPrescaler {
                can_clock,
                bitrate,
                bit_time_quanta: timing.time_quanta_per_bit(),
            })
        }
    }

    fn check(&self) -> Result<(), BitTimingError> {
        if !PHASE_SEG_1_RANGE.contains(&self.phase_seg_1.into()) {
            Err(BitTimingError::PhaseSeg1OutOfRange(PHASE_SEG_1_RANGE))
        } else if !PHASE_SEG_2_RANGE.contains(&self.phase_seg_2.into()) {
            Err(BitTimingError::PhaseSeg2OutOfRange(PHASE_SEG_2_RANGE))
        } else if !SJW_RANGE.contains(&self.sjw.into()) {
            Err(BitTimingError::SynchronizationJumpWidthOutOfRange(SJW_RANGE))
        } else if !PRESCALER_RANGE.contains(&self.prescaler.into()) {
            Err(BitTimingError::PrescalerOutOfRange(PRESCALER_RANGE))
        } else {
            Ok(())
        }
    }

    /// Compose the TIME_CFG word after validating every field
    ///
    /// The caller writes the result in a single register access; the hardware
    /// must never sample a half-updated timing.
    pub fn compose(&self) -> Result<u32, BitTimingError> {
        self.check()?;
        let mut word = u32::from(self.phase_seg_2 - 1) << time_cfg::TSEG2_SHIFT;
        word |= u32::from(self.phase_seg_1 - 1) << time_cfg::TSEG1_SHIFT;
        if self.triple_sampling {
            word |= time_cfg::SAM;
        }
        word |= u32::from(self.sjw - 1) << time_cfg::SJW_SHIFT;
        word |= u32::from(self.prescaler - 1) << time_cfg::BRP_SHIFT;
        Ok(word)
    }
}

/// Configuration for one controller instance
///
/// Mailboxes `0..rx_mailboxes` are set up for reception when the device is
/// opened; the remainder transmit. All settings are applied on the
/// `Reset → Running` path and ignored on a plain `Stopped → Running` re-open.
#[derive(Copy, Clone)]
pub struct CanConfig {
    /// Bit-timing parameters, programmed once per pass through configuration
    pub timing: BitTiming,
    /// Number of mailboxes assigned to reception, counted from index 0
    pub rx_mailboxes: u8,
    /// Receive without ever driving the bus
    pub listen_only: bool,
    /// Loop transmissions back internally
    pub self_test: bool,
    /// Divider for the free-running TIMER used by mailbox timeouts
    pub timer_divider: u32,
    /// Protect unread receive mailboxes from being overwritten
    pub overwrite_protection: bool,
}

impl CanConfig {
    /// Create an instance
    ///
    /// Timing must be provided, all other settings come pre-populated with
    /// default values.
    pub fn new(timing: BitTiming) -> Self {
        Self {
            timing,
            rx_mailboxes: 8,
            listen_only: false,
            self_test: false,
            timer_divider: 0,
            overwrite_protection: true,
        }
    }
}
