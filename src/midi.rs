//! Per-block MIDI output records.
//!
//! The scheduler emits plain note on/off pairs into a caller provided buffer at the same
//! sample offsets as the audio triggers. Turning them into wire output is the caller's
//! business; only the MIDI exporter writes standard MIDI files.

// -------------------------------------------------------------------------------------------------

/// Note number used for every slot trigger (middle C).
pub const TRIGGER_NOTE: u8 = 60;

/// Gate length of an emitted note pair in seconds.
pub const GATE_SECONDS: f64 = 0.010;

// -------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiEventKind {
    NoteOn,
    NoteOff,
}

/// One MIDI event, placed at an exact sample offset within the processed block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MidiEvent {
    /// Sample offset within the block, 0..num_samples.
    pub frame: usize,
    /// MIDI channel, 1..=16.
    pub channel: u8,
    pub note: u8,
    pub velocity: u8,
    pub kind: MidiEventKind,
}

/// Note velocity from a linear slot gain, 1..=127.
pub fn velocity_from_gain(gain: f32) -> u8 {
    ((gain * 127.0).round() as i32).clamp(1, 127) as u8
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn velocity_clamps() {
        assert_eq!(velocity_from_gain(0.0), 1);
        assert_eq!(velocity_from_gain(0.5), 64);
        assert_eq!(velocity_from_gain(1.0), 127);
        assert_eq!(velocity_from_gain(2.0), 127);
    }
}
