//! Offline rendering of a fixed number of cycles to audio and MIDI files, with the same hit
//! timing the live scheduler produces.

pub mod audio;
pub mod midi;
