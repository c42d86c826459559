#![doc = include_str!("../README.md")]

// private mods (will be partly re-exported)
mod cycle;
mod engine;
mod error;
mod export;
mod math;
mod midi;
mod params;
mod pattern;
mod voice;

// public, flat re-exports
pub use error::Error;

pub use engine::Engine;

pub use cycle::{resolve_cycle_beats, CycleAccumulator, COUNT_MODE_BASE_BEATS};

pub use midi::{MidiEvent, MidiEventKind, GATE_SECONDS, TRIGGER_NOTE};

pub use params::{
    count_from_rate, decay_ui_to_ms, mask_for_beats, rate_from_count, EngineParams, SlotParams,
    TimingMode, COUNT_RANGE, NUM_SLOTS, RATE_RANGE,
};

pub use pattern::{Pattern, PatternSlot};

pub use voice::{StereoSample, Voice};

pub use export::{audio::RenderedAudio, midi::EXPORT_PPQ};

// public mods
pub mod utils;
