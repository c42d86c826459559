//! Writes whole cycles as standard MIDI files, one note per hit, at the same beat positions
//! the live scheduler triggers.

use std::{fs, path::Path};

use midly::{
    num::{u15, u24, u28, u4, u7},
    Format, Header, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind,
};

use crate::{
    cycle::COUNT_MODE_BASE_BEATS,
    engine::Engine,
    error::Error,
    midi::{velocity_from_gain, TRIGGER_NOTE},
    params::{mask_for_beats, EngineParams, TimingMode, COUNT_RANGE, NUM_SLOTS},
};

// -------------------------------------------------------------------------------------------------

/// Ticks per quarter note of exported files. High enough to place 32nd-triplet grids exactly.
pub const EXPORT_PPQ: u16 = 9600;

/// The exported cycle length is clamped to this many beats.
const MAX_CYCLE_BEATS: i64 = 512;

// -------------------------------------------------------------------------------------------------

struct AbsoluteEvent {
    tick: i64,
    /// Sort tiebreak at equal ticks: metas and note-offs before note-ons.
    order: u8,
    kind: TrackEventKind<'static>,
}

struct MidiSlot {
    channel: u8,
    velocity: u8,
    rate_num: i64,
    rate_den: i64,
    count: u32,
    mask: u64,
}

impl Engine {
    /// Build a single track MIDI file for `cycles` repetitions of the current cycle.
    ///
    /// Returns the file and the number of cycles actually exported, which is silently capped
    /// so that the total tick count stays within a 32 bit range.
    pub fn render_midi_cycles(
        &self,
        params: &EngineParams,
        cycles: u32,
    ) -> Result<(Smf<'static>, u32), Error> {
        if cycles == 0 {
            return Err(Error::InvalidCycleCount);
        }

        let any_solo = params.any_solo();
        let mut slots = Vec::new();
        let mut cycle_beats: i64 = 1;

        for index in 0..NUM_SLOTS {
            if !params.slot_audible(index, any_solo) || !self.has_sample(index) {
                continue;
            }
            let slot = &params.slots[index];
            let (rate_num, rate_den) = crate::cycle::rate_fraction(slot.rate as f64);
            if params.timing_mode == TimingMode::Rate {
                if rate_num <= 0 {
                    continue;
                }
                cycle_beats = crate::math::lcm(cycle_beats, rate_den);
            }
            slots.push(MidiSlot {
                channel: slot.midi_channel.clamp(1, 16),
                velocity: velocity_from_gain(slot.gain()),
                rate_num,
                rate_den,
                count: slot.count.clamp(*COUNT_RANGE.start(), *COUNT_RANGE.end()),
                mask: slot.beat_mask,
            });
        }

        if slots.is_empty() {
            return Err(Error::NoActiveSlots);
        }

        if params.timing_mode == TimingMode::Count {
            cycle_beats = COUNT_MODE_BASE_BEATS as i64;
        }
        cycle_beats = cycle_beats.clamp(1, MAX_CYCLE_BEATS);

        let ppq = EXPORT_PPQ as i64;
        let cycle_ticks = cycle_beats * ppq;
        let max_cycles = (i32::MAX as i64 / cycle_ticks).max(1);
        let actual_cycles = (cycles as i64).min(max_cycles);
        let total_ticks = cycle_ticks * actual_cycles;
        let gate_ticks = (ppq / 64).max(1);

        let mut events = Vec::new();
        if params.bpm > 0.0 {
            let micros_per_quarter =
                ((60_000_000.0 / params.bpm as f64).round() as u32).min(0x00FF_FFFF);
            events.push(AbsoluteEvent {
                tick: 0,
                order: 0,
                kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::from(micros_per_quarter))),
            });
        }
        events.push(AbsoluteEvent {
            tick: 0,
            order: 0,
            kind: TrackEventKind::Meta(MetaMessage::TimeSignature(4, 2, 24, 8)),
        });

        for slot in &slots {
            // every hit's tick within one cycle, then replicated per cycle
            let mut base_ticks = Vec::new();
            match params.timing_mode {
                TimingMode::Rate => {
                    let hits = (slot.rate_num * cycle_beats) / slot.rate_den;
                    let beat_spacing = slot.rate_den as f64 / slot.rate_num as f64;
                    for hit in 0..hits {
                        let tick = (hit as f64 * beat_spacing * ppq as f64).round() as i64;
                        base_ticks.push(tick.clamp(0, cycle_ticks - 1));
                    }
                }
                TimingMode::Count => {
                    let mask = slot.mask & mask_for_beats(slot.count);
                    let step_beats = COUNT_MODE_BASE_BEATS / slot.count as f64;
                    for n in 0..slot.count {
                        if (mask >> n) & 1 == 1 {
                            let tick = (n as f64 * step_beats * ppq as f64).round() as i64;
                            base_ticks.push(tick.clamp(0, cycle_ticks - 1));
                        }
                    }
                }
            }

            let channel = u4::from(slot.channel - 1);
            for cycle in 0..actual_cycles {
                let cycle_offset = cycle * cycle_ticks;
                for &base_tick in &base_ticks {
                    let start_tick = (cycle_offset + base_tick).clamp(0, total_ticks - 1);
                    let off_tick = (start_tick + gate_ticks).min(total_ticks);
                    events.push(AbsoluteEvent {
                        tick: start_tick,
                        order: 1,
                        kind: TrackEventKind::Midi {
                            channel,
                            message: MidiMessage::NoteOn {
                                key: u7::from(TRIGGER_NOTE),
                                vel: u7::from(slot.velocity),
                            },
                        },
                    });
                    events.push(AbsoluteEvent {
                        tick: off_tick,
                        order: 0,
                        kind: TrackEventKind::Midi {
                            channel,
                            message: MidiMessage::NoteOff {
                                key: u7::from(TRIGGER_NOTE),
                                vel: u7::from(0),
                            },
                        },
                    });
                }
            }
        }

        events.sort_by_key(|event| (event.tick, event.order));

        let mut track = Vec::with_capacity(events.len() + 1);
        let mut previous_tick = 0i64;
        for event in events {
            let delta = (event.tick - previous_tick).max(0) as u32;
            track.push(TrackEvent {
                delta: u28::from(delta),
                kind: event.kind,
            });
            previous_tick = event.tick;
        }
        track.push(TrackEvent {
            delta: u28::from((total_ticks - previous_tick).max(0) as u32),
            kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
        });

        let smf = Smf {
            header: Header {
                format: Format::SingleTrack,
                timing: Timing::Metrical(u15::from(EXPORT_PPQ)),
            },
            tracks: vec![track],
        };
        Ok((smf, actual_cycles as u32))
    }

    /// Render `cycles` repetitions and write them to `path` as a standard MIDI file.
    /// Returns the number of cycles actually written.
    pub fn export_midi_cycles<P: AsRef<Path>>(
        &self,
        params: &EngineParams,
        cycles: u32,
        path: P,
    ) -> Result<u32, Error> {
        let (smf, actual_cycles) = self.render_midi_cycles(params, cycles)?;

        let mut bytes = Vec::new();
        smf.write_std(&mut bytes)
            .map_err(|err| Error::FileWriteError(Box::new(err)))?;
        fs::write(path.as_ref(), bytes).map_err(|err| Error::FileWriteError(Box::new(err)))?;

        if actual_cycles != cycles {
            log::warn!(
                "midi export capped at {actual_cycles} of {cycles} requested cycles"
            );
        }
        log::info!(
            "exported {} midi cycles to '{}'",
            actual_cycles,
            path.as_ref().display()
        );
        Ok(actual_cycles)
    }
}

// -------------------------------------------------------------------------------------------------
