//! Plain, statically indexed parameter snapshot which is read once at the top of every
//! processed block. There is deliberately no string keyed lookup anywhere near the realtime
//! path: the caller fills in one [`EngineParams`] value and hands it to the engine.

// -------------------------------------------------------------------------------------------------

/// Fixed number of sample slots in the engine.
pub const NUM_SLOTS: usize = 16;

/// Valid slot rate range in hits per beat.
pub const RATE_RANGE: std::ops::RangeInclusive<f32> = 0.0625..=4.0;
/// Valid beats-per-cycle range in count mode.
pub const COUNT_RANGE: std::ops::RangeInclusive<u32> = 1..=64;

const DECAY_UI_MIN: f32 = 1.0;
const DECAY_UI_MAX: f32 = 100.0;
const DECAY_UI_SKEW: f32 = 0.4;

const DECAY_MS_MIN: f32 = 10.0;
const DECAY_MS_MAX: f32 = 4000.0;

// -------------------------------------------------------------------------------------------------

/// Global switch between continuous hits-per-beat scheduling and explicit beats-per-cycle
/// stepping with a per-step enable mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimingMode {
    #[default]
    Rate,
    Count,
}

// -------------------------------------------------------------------------------------------------

/// Per-slot parameter values for one block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlotParams {
    pub mute: bool,
    pub solo: bool,
    /// Hits per beat, used in [`TimingMode::Rate`].
    pub rate: f32,
    /// Beats per cycle, used in [`TimingMode::Count`].
    pub count: u32,
    /// Gain in percent, 0..=100.
    pub gain_percent: f32,
    /// Stereo pan, -1..=1.
    pub pan: f32,
    /// Decay control value, 1..=100, mapped through a perceptual curve to 10..4000 ms.
    pub decay: f32,
    /// MIDI output channel, 1..=16.
    pub midi_channel: u8,
    /// Count mode step enable bits. Bits at or beyond `count` are ignored.
    pub beat_mask: u64,
}

impl Default for SlotParams {
    fn default() -> Self {
        Self {
            mute: false,
            solo: false,
            rate: 1.0,
            count: 4,
            gain_percent: 80.0,
            pan: 0.0,
            decay: DECAY_UI_MAX,
            midi_channel: 1,
            beat_mask: u64::MAX,
        }
    }
}

impl SlotParams {
    /// Linear gain factor from the percent value.
    #[inline]
    pub fn gain(&self) -> f32 {
        (self.gain_percent * 0.01).clamp(0.0, 1.0)
    }

    /// Decay time in milliseconds from the skewed control value.
    #[inline]
    pub fn decay_ms(&self) -> f32 {
        decay_ui_to_ms(self.decay)
    }
}

// -------------------------------------------------------------------------------------------------

/// Full parameter snapshot consumed by [`crate::Engine::process_block`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineParams {
    /// Master tempo in beats per minute. Values <= 0 suspend scheduling.
    pub bpm: f32,
    /// Master transport flag. When false the beat accumulator does not advance.
    pub run: bool,
    pub timing_mode: TimingMode,
    pub slots: [SlotParams; NUM_SLOTS],
}

impl Default for EngineParams {
    fn default() -> Self {
        let mut slots = [SlotParams::default(); NUM_SLOTS];
        for (index, slot) in slots.iter_mut().enumerate() {
            slot.midi_channel = (index + 1) as u8;
        }
        Self {
            bpm: 120.0,
            run: false,
            timing_mode: TimingMode::Rate,
            slots,
        }
    }
}

impl EngineParams {
    /// Is any slot soloed? When true, only soloed slots are audible.
    pub fn any_solo(&self) -> bool {
        self.slots.iter().any(|slot| slot.solo)
    }

    /// Whether the given slot may produce audio and MIDI output this block, honouring its own
    /// mute flag and the global solo state.
    pub fn slot_audible(&self, index: usize, any_solo: bool) -> bool {
        let slot = &self.slots[index];
        !slot.mute && (!any_solo || slot.solo)
    }

    /// Seconds per beat, or zero when the tempo is unusable.
    pub fn seconds_per_beat(&self) -> f64 {
        if self.bpm > 0.0 {
            60.0 / self.bpm as f64
        } else {
            0.0
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Map a decay control value (1..=100, skewed) to milliseconds (10..4000, same skew).
pub fn decay_ui_to_ms(ui_value: f32) -> f32 {
    let clamped = ui_value.clamp(DECAY_UI_MIN, DECAY_UI_MAX);
    let normalized = ((clamped - DECAY_UI_MIN) / (DECAY_UI_MAX - DECAY_UI_MIN)).powf(DECAY_UI_SKEW);
    DECAY_MS_MIN + (DECAY_MS_MAX - DECAY_MS_MIN) * normalized.powf(1.0 / DECAY_UI_SKEW)
}

/// Derive a count value from a rate when the timing mode switches to count mode.
pub fn count_from_rate(rate: f32) -> u32 {
    let rate = if rate.is_finite() { rate } else { 1.0 };
    ((rate * 4.0).round() as i64).clamp(1, 64) as u32
}

/// Derive a rate value from a count when the timing mode switches to rate mode.
pub fn rate_from_count(count: u32) -> f32 {
    (count as f32 / 4.0).clamp(*RATE_RANGE.start(), *RATE_RANGE.end())
}

/// A mask with the lowest `beats` bits set: the default "every step enabled" mask for a count.
pub fn mask_for_beats(beats: u32) -> u64 {
    if beats == 0 {
        0
    } else if beats >= 64 {
        u64::MAX
    } else {
        (1u64 << beats) - 1
    }
}

// -------------------------------------------------------------------------------------------------
