//! Resolves the shared repeating cycle length, in beats, for the currently active slot set.
//!
//! In rate mode the cycle is the least common multiple of the active slots' periods: a slot
//! with reduced rate `num/den` repeats every `den/num` beats, and folding those fractions
//! together yields `lcm(dens)/gcd(nums)`. Count mode always uses a fixed 4 beat window which
//! every slot's count subdivides. The value is recomputed from scratch every block since
//! mute, solo and rate can all change between blocks.

use crate::{
    math::{gcd, lcm, reduced},
    params::TimingMode,
};

// -------------------------------------------------------------------------------------------------

/// Cycle length of the fixed window in count mode, in beats.
pub const COUNT_MODE_BASE_BEATS: f64 = 4.0;

/// Maximum denominator when approximating slot rates as fractions.
pub const MAX_RATE_DENOMINATOR: i64 = 32;

/// Defensive bounds for the resolved cycle length in beats.
const MIN_CYCLE_BEATS: f64 = 1.0e-6;
const MAX_CYCLE_BEATS: f64 = 512.0;

// -------------------------------------------------------------------------------------------------

/// Running rational cycle length, folded over the active slots' period fractions.
#[derive(Debug, Clone, Copy)]
pub struct CycleAccumulator {
    num: i64,
    den: i64,
    has_cycle: bool,
}

impl CycleAccumulator {
    pub fn new() -> Self {
        Self {
            num: 1,
            den: 1,
            has_cycle: false,
        }
    }

    /// Fold one slot's period fraction (in beats) into the running cycle length.
    /// Non-positive fractions are ignored.
    pub fn add_period(&mut self, period_num: i64, period_den: i64) {
        if period_num <= 0 || period_den <= 0 {
            return;
        }

        let (period_num, period_den) = reduced(period_num, period_den);

        if !self.has_cycle {
            self.num = period_num;
            self.den = period_den;
            self.has_cycle = true;
            return;
        }

        self.num = lcm(self.num, period_num);
        self.den = gcd(self.den, period_den);

        let g = gcd(self.num, self.den);
        if g != 0 {
            self.num /= g;
            self.den /= g;
        }
    }

    /// Resolved cycle length in beats, clamped to defensive bounds. One beat when no slot
    /// contributed a period.
    pub fn beats(&self) -> f64 {
        if !self.has_cycle {
            return 1.0;
        }
        (self.num as f64 / self.den as f64).clamp(MIN_CYCLE_BEATS, MAX_CYCLE_BEATS)
    }

    /// The running cycle as an unclamped fraction.
    pub fn fraction(&self) -> (i64, i64) {
        if self.has_cycle {
            (self.num, self.den)
        } else {
            (1, 1)
        }
    }
}

impl Default for CycleAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

// -------------------------------------------------------------------------------------------------

/// Resolve the cycle length in beats for the given timing mode and the active slots' rates.
///
/// `active_rates` must yield the rate of every slot which is active this block: sample loaded,
/// unmuted and solo-respecting. It is only consumed in rate mode; count mode pins the cycle to
/// [`COUNT_MODE_BASE_BEATS`] regardless of the slot set.
pub fn resolve_cycle_beats<RateIter>(timing_mode: TimingMode, active_rates: RateIter) -> f64
where
    RateIter: IntoIterator<Item = f64>,
{
    match timing_mode {
        TimingMode::Rate => {
            let mut cycle = CycleAccumulator::new();
            for rate in active_rates {
                let (num, den) = rate_fraction(rate);
                // the slot's period in beats is the reciprocal of its rate
                cycle.add_period(den, num);
            }
            cycle.beats()
        }
        TimingMode::Count => COUNT_MODE_BASE_BEATS.clamp(MIN_CYCLE_BEATS, MAX_CYCLE_BEATS),
    }
}

/// A slot rate as a reduced fraction with bounded denominator, shared by the scheduler and
/// both exporters.
pub fn rate_fraction(rate: f64) -> (i64, i64) {
    let rate = rate.max(0.0001);
    let (num, den) = crate::math::approximate_rational(rate, MAX_RATE_DENOMINATOR);
    reduced(num, den)
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_active_slots_is_one_beat() {
        assert_eq!(resolve_cycle_beats(TimingMode::Rate, []), 1.0);
    }

    #[test]
    fn single_slot_cycle_is_period() {
        // one slot at reduced rate num/den repeats every den/num beats
        for (rate, expected) in [(1.0, 1.0), (0.5, 2.0), (2.0, 0.5), (0.75, 4.0 / 3.0)] {
            let cycle = resolve_cycle_beats(TimingMode::Rate, [rate]);
            assert!(
                (cycle - expected).abs() < 1e-12,
                "rate {rate}: cycle {cycle} != {expected}"
            );
        }
    }

    #[test]
    fn two_slot_cycle_is_lcm_over_gcd() {
        // rates a/b and c/d combine to lcm(b,d)/gcd(a,c) beats
        let cases = [
            ((1.0, 0.5), 2.0),         // 1/1 and 1/2 -> lcm(1,2)/gcd(1,1) = 2
            ((1.0, 1.0), 1.0),         // identical slots keep the cycle
            ((0.75, 1.5), 4.0 / 3.0),  // 3/4 and 3/2 -> lcm(4,2)/gcd(3,3) = 4/3
            ((0.25, 0.375), 8.0),      // 1/4 and 3/8 -> lcm(4,8)/gcd(1,3) = 8
        ];
        for ((a, b), expected) in cases {
            let cycle = resolve_cycle_beats(TimingMode::Rate, [a, b]);
            assert!(
                (cycle - expected).abs() < 1e-12,
                "rates {a},{b}: cycle {cycle} != {expected}"
            );
        }
    }

    #[test]
    fn count_mode_cycle_is_fixed() {
        assert_eq!(resolve_cycle_beats(TimingMode::Count, []), 4.0);
        assert_eq!(resolve_cycle_beats(TimingMode::Count, [3.0, 0.1]), 4.0);
    }

    #[test]
    fn accumulator_ignores_degenerate_periods() {
        let mut cycle = CycleAccumulator::new();
        cycle.add_period(0, 4);
        cycle.add_period(-1, 2);
        cycle.add_period(3, 0);
        assert_eq!(cycle.beats(), 1.0);
    }
}
