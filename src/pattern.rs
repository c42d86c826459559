//! Single pattern snapshots: everything needed to recreate one slot setup, as plain data.
//!
//! The engine only captures and applies single snapshots; storing collections of them is the
//! caller's business.

use std::path::PathBuf;

use crate::{
    engine::Engine,
    params::{EngineParams, SlotParams, TimingMode, NUM_SLOTS},
};

// -------------------------------------------------------------------------------------------------

/// One slot's share of a pattern: its parameters plus the loaded file, if any.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PatternSlot {
    pub file_path: Option<PathBuf>,
    pub mute: bool,
    pub solo: bool,
    pub rate: f32,
    pub count: u32,
    pub gain_percent: f32,
    pub pan: f32,
    pub decay: f32,
    pub midi_channel: u8,
    pub beat_mask: u64,
}

/// A named snapshot of the whole slot setup.
#[derive(Debug, Clone, PartialEq)]
pub struct Pattern {
    pub name: String,
    pub bpm: f32,
    pub timing_mode: TimingMode,
    pub slots: Vec<PatternSlot>,
}

// -------------------------------------------------------------------------------------------------

impl Engine {
    /// Snapshot the current parameters and slot files into a pattern.
    pub fn capture_pattern(&self, params: &EngineParams, name: &str) -> Pattern {
        let slots = (0..NUM_SLOTS)
            .map(|index| {
                let slot = &params.slots[index];
                PatternSlot {
                    file_path: self.file_path(index).map(|path| path.to_path_buf()),
                    mute: slot.mute,
                    solo: slot.solo,
                    rate: slot.rate,
                    count: slot.count,
                    gain_percent: slot.gain_percent,
                    pan: slot.pan,
                    decay: slot.decay,
                    midi_channel: slot.midi_channel,
                    beat_mask: slot.beat_mask,
                }
            })
            .collect();
        Pattern {
            name: name.to_string(),
            bpm: params.bpm,
            timing_mode: params.timing_mode,
            slots,
        }
    }

    /// Load a pattern's files into the slots and return the parameter snapshot the caller
    /// should adopt, together with the indices of slots whose files failed to load. Failed
    /// slots keep their path so the pattern round-trips, but carry no sample. Slots beyond
    /// the pattern's slot list are cleared.
    pub fn apply_pattern(
        &mut self,
        pattern: &Pattern,
        allow_tail: bool,
    ) -> (EngineParams, Vec<usize>) {
        let mut params = EngineParams {
            bpm: pattern.bpm,
            run: false,
            timing_mode: pattern.timing_mode,
            slots: [SlotParams::default(); NUM_SLOTS],
        };
        let mut failed = Vec::new();

        for index in 0..NUM_SLOTS {
            let Some(slot) = pattern.slots.get(index) else {
                self.clear_slot(index, allow_tail);
                continue;
            };
            params.slots[index] = SlotParams {
                mute: slot.mute,
                solo: slot.solo,
                rate: slot.rate,
                count: slot.count,
                gain_percent: slot.gain_percent,
                pan: slot.pan,
                decay: slot.decay,
                midi_channel: slot.midi_channel,
                beat_mask: slot.beat_mask,
            };
            match &slot.file_path {
                Some(path) => {
                    self.clear_slot(index, allow_tail);
                    if let Err(err) = self.load_sample(index, path, false) {
                        log::warn!("failed to load '{}': {err}", path.display());
                        self.set_file_path(index, Some(path.clone()));
                        failed.push(index);
                    }
                }
                None => self.clear_slot(index, allow_tail),
            }
        }

        (params, failed)
    }
}

// -------------------------------------------------------------------------------------------------
