//! Block based trigger scheduler and mixer for all sixteen slots.
//!
//! [`Engine::process_block`] is the realtime entry point: it consumes one parameter snapshot,
//! advances the master beat accumulator while the transport runs, and converts beat positions
//! into sample exact trigger offsets within the block. Everything else on the engine runs on
//! non-realtime threads and communicates with the audio thread through relaxed atomics only.

use std::{
    path::{Path, PathBuf},
    sync::atomic::{AtomicU32, Ordering},
};

use crate::{
    cycle::{rate_fraction, resolve_cycle_beats, COUNT_MODE_BASE_BEATS},
    error::Error,
    midi::{velocity_from_gain, MidiEvent, MidiEventKind, GATE_SECONDS, TRIGGER_NOTE},
    params::{mask_for_beats, EngineParams, TimingMode, COUNT_RANGE, NUM_SLOTS, RATE_RANGE},
    voice::{StereoSample, Voice},
};

// -------------------------------------------------------------------------------------------------

/// Epsilon applied to beat comparisons so that hits sitting exactly on a block boundary land
/// in the block which starts there, not in the one which ends there.
const BEAT_EPSILON: f64 = 1.0e-9;

// -------------------------------------------------------------------------------------------------

/// A slot rate snapped to the shared rational grid. The live scheduler, the audio exporter and
/// the MIDI exporter all run on this value so their timelines agree exactly.
pub(crate) fn quantized_rate(rate: f32) -> f64 {
    let rate = rate.clamp(*RATE_RANGE.start(), *RATE_RANGE.end());
    let (num, den) = rate_fraction(rate as f64);
    num as f64 / den as f64
}

/// Convert a hit's position within the block, as a fraction of the block's beat span, into a
/// sample offset.
#[inline]
fn hit_frame(beat: f64, prev_beats: f64, curr_beats: f64, num_samples: usize) -> usize {
    let span = curr_beats - prev_beats;
    let fraction = if span > 0.0 {
        (beat - prev_beats) / span
    } else {
        0.0
    };
    let frame = (fraction * num_samples as f64 + 0.5).floor() as i64;
    frame.clamp(0, num_samples as i64 - 1) as usize
}

/// Append a note on/off pair for one hit, the off clamped inside the block.
fn push_note_pair(
    midi_out: &mut Vec<MidiEvent>,
    channel: u8,
    velocity: u8,
    frame: usize,
    gate_frames: usize,
    num_samples: usize,
) {
    let off_frame = (frame + gate_frames).min(num_samples.saturating_sub(1));
    midi_out.push(MidiEvent {
        frame,
        channel,
        note: TRIGGER_NOTE,
        velocity,
        kind: MidiEventKind::NoteOn,
    });
    midi_out.push(MidiEvent {
        frame: off_frame,
        channel,
        note: TRIGGER_NOTE,
        velocity: 0,
        kind: MidiEventKind::NoteOff,
    });
}

// -------------------------------------------------------------------------------------------------

/// The trigger engine: sixteen voices, the master beat accumulator and the pending manual
/// trigger flags.
pub struct Engine {
    sample_rate: u32,
    voices: [Voice; NUM_SLOTS],
    master_beats: f64,
    cycle_beats: f64,
    pending_triggers: [AtomicU32; NUM_SLOTS],
}

impl Engine {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            voices: core::array::from_fn(|_| Voice::new(sample_rate)),
            master_beats: 0.0,
            cycle_beats: 1.0,
            pending_triggers: core::array::from_fn(|_| AtomicU32::new(0)),
        }
    }

    /// (Re)initialise for a new sample rate. Already loaded samples are kept but resampled
    /// playback state is dropped; the caller reloads files if the rate actually changed.
    pub fn prepare(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate;
        self.master_beats = 0.0;
        self.cycle_beats = 1.0;
        for voice in &mut self.voices {
            voice.prepare(sample_rate);
        }
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    // ---------------------------------------------------------------------------------------------
    // non-realtime slot management

    /// Decode the given file and load it into a slot. With `allow_tail`, a previously playing
    /// sample keeps ringing as the slot's tail. On decode errors the slot is left untouched.
    pub fn load_sample<P: AsRef<Path>>(
        &mut self,
        slot: usize,
        path: P,
        allow_tail: bool,
    ) -> Result<(), Error> {
        debug_assert!(slot < NUM_SLOTS);
        let sample = StereoSample::from_file(path.as_ref(), self.sample_rate)?;
        self.load_sample_buffer(slot, sample, Some(path.as_ref().to_path_buf()), allow_tail);
        Ok(())
    }

    /// Load an already decoded sample into a slot.
    pub fn load_sample_buffer(
        &mut self,
        slot: usize,
        sample: StereoSample,
        path: Option<PathBuf>,
        allow_tail: bool,
    ) {
        debug_assert!(slot < NUM_SLOTS);
        self.voices[slot].clear(allow_tail);
        self.voices[slot].load(sample, path);
    }

    /// Unload a slot. With `allow_tail` an in-flight playback keeps ringing.
    pub fn clear_slot(&mut self, slot: usize, allow_tail: bool) {
        debug_assert!(slot < NUM_SLOTS);
        self.voices[slot].clear(allow_tail);
    }

    /// Unload all slots.
    pub fn clear_all_slots(&mut self, allow_tail: bool) {
        for voice in &mut self.voices {
            voice.clear(allow_tail);
        }
    }

    pub fn has_sample(&self, slot: usize) -> bool {
        debug_assert!(slot < NUM_SLOTS);
        self.voices[slot].has_sample()
    }

    pub fn file_path(&self, slot: usize) -> Option<&Path> {
        debug_assert!(slot < NUM_SLOTS);
        self.voices[slot].file_path()
    }

    /// Remember a file path for a slot without loading a sample, e.g. when a pattern refers
    /// to a file which is currently missing.
    pub fn set_file_path(&mut self, slot: usize, path: Option<PathBuf>) {
        debug_assert!(slot < NUM_SLOTS);
        self.voices[slot].set_file_path(path);
    }

    // ---------------------------------------------------------------------------------------------
    // cross-thread queries and commands

    /// Request a one-shot trigger of the given slot from any thread. Multiple requests before
    /// the next processed block collapse into a single trigger at the start of that block.
    pub fn request_manual_trigger(&self, slot: usize) {
        debug_assert!(slot < NUM_SLOTS);
        self.pending_triggers[slot].fetch_add(1, Ordering::Relaxed);
    }

    /// Number of times a slot was triggered since it was loaded. Wraps around.
    pub fn hit_counter(&self, slot: usize) -> u32 {
        debug_assert!(slot < NUM_SLOTS);
        self.voices[slot].hit_counter()
    }

    /// The slot's position within its own repeat period, 0..1.
    pub fn slot_phase(&self, slot: usize) -> f64 {
        debug_assert!(slot < NUM_SLOTS);
        self.voices[slot].phase
    }

    /// Position within the shared cycle, 0..1, as resolved by the last processed block.
    pub fn master_phase(&self) -> f64 {
        (self.master_beats % self.cycle_beats) / self.cycle_beats
    }

    /// Cycle length in beats, as resolved by the last processed block.
    pub fn cycle_beats(&self) -> f64 {
        self.cycle_beats
    }

    /// Master beat position since the last phase reset.
    pub fn master_beats(&self) -> f64 {
        self.master_beats
    }

    /// Rewind all phases and the master timeline to beat zero on a hard reset. A soft reset
    /// keeps the timeline and the slot phases where they are; either way ringing voices are
    /// left alone.
    pub fn reset_all_phases(&mut self, hard: bool) {
        for voice in &mut self.voices {
            voice.reset_phase(hard);
        }
        if hard {
            self.master_beats = 0.0;
        }
    }

    // ---------------------------------------------------------------------------------------------
    // realtime path

    /// Render one block of audio into `left`/`right` and collect the block's MIDI events.
    ///
    /// The output buffers are overwritten, not accumulated into. Events in `midi_out` are
    /// sorted by frame. The master beat accumulator only advances while `params.run` is set
    /// and the tempo is usable; ringing voices and manual triggers are serviced regardless,
    /// so stopping the transport never cuts tails. Muted and soloed-out slots still trigger
    /// and count hits but emit neither audio nor MIDI; their playback position freezes until
    /// they become audible again.
    pub fn process_block(
        &mut self,
        params: &EngineParams,
        left: &mut [f32],
        right: &mut [f32],
        midi_out: &mut Vec<MidiEvent>,
    ) {
        let num_samples = left.len().min(right.len());
        let left = &mut left[..num_samples];
        let right = &mut right[..num_samples];
        left.fill(0.0);
        right.fill(0.0);
        midi_out.clear();

        let any_solo = params.any_solo();
        let seconds_per_beat = params.seconds_per_beat();
        let gate_frames = ((GATE_SECONDS * self.sample_rate as f64).round() as usize).max(1);

        self.cycle_beats = resolve_cycle_beats(
            params.timing_mode,
            (0..NUM_SLOTS)
                .filter(|&i| self.voices[i].has_sample() && params.slot_audible(i, any_solo))
                .map(|i| quantized_rate(params.slots[i].rate)),
        );

        let run = params.run && seconds_per_beat > 0.0 && num_samples > 0;
        let prev_beats = self.master_beats;
        let curr_beats = if run {
            prev_beats + num_samples as f64 / self.sample_rate as f64 / seconds_per_beat
        } else {
            prev_beats
        };
        self.master_beats = curr_beats;

        for slot_index in 0..NUM_SLOTS {
            let slot = &params.slots[slot_index];
            let voice = &mut self.voices[slot_index];
            let audible = params.slot_audible(slot_index, any_solo);
            let gain = slot.gain();
            let channel = slot.midi_channel.clamp(1, 16);
            let velocity = velocity_from_gain(gain);

            voice.set_pan(slot.pan);
            voice.set_decay_ms(slot.decay_ms());

            // visual phase stays tied to the master beat position, even when muted or stopped
            if seconds_per_beat > 0.0 {
                voice.phase = match params.timing_mode {
                    TimingMode::Rate => (curr_beats * quantized_rate(slot.rate)).fract(),
                    TimingMode::Count => {
                        let count = slot.count.clamp(*COUNT_RANGE.start(), *COUNT_RANGE.end());
                        (curr_beats * count as f64 / COUNT_MODE_BASE_BEATS).fract()
                    }
                };
            }

            // manual triggers collapse into one hit at the start of the block; the ring mix
            // below picks the restarted playback up from offset zero
            let requested = self.pending_triggers[slot_index].swap(0, Ordering::Relaxed);
            if requested > 0 && voice.has_sample() && audible {
                voice.trigger();
                push_note_pair(midi_out, channel, velocity, 0, gate_frames, num_samples);
            }

            // anything currently ringing, also while the transport is stopped
            if audible {
                voice.mix_into(left, right, gain);
            }

            if !voice.has_sample() || !run {
                continue;
            }

            match params.timing_mode {
                TimingMode::Rate => {
                    let rate = quantized_rate(slot.rate);
                    let mut n = (prev_beats * rate - BEAT_EPSILON).ceil() as i64;
                    while (n as f64) < curr_beats * rate - BEAT_EPSILON {
                        let beat = n as f64 / rate;
                        let frame = hit_frame(beat, prev_beats, curr_beats, num_samples);
                        voice.trigger();
                        if audible {
                            push_note_pair(
                                midi_out,
                                channel,
                                velocity,
                                frame,
                                gate_frames,
                                num_samples,
                            );
                            voice.mix_into(&mut left[frame..], &mut right[frame..], gain);
                        }
                        n += 1;
                    }
                }
                TimingMode::Count => {
                    let count = slot.count.clamp(*COUNT_RANGE.start(), *COUNT_RANGE.end());
                    let step_beats = COUNT_MODE_BASE_BEATS / count as f64;
                    let mask = slot.beat_mask & mask_for_beats(count);
                    if mask == 0 {
                        continue;
                    }
                    let mut n = (prev_beats / step_beats - BEAT_EPSILON).ceil() as i64;
                    while (n as f64) < curr_beats / step_beats - BEAT_EPSILON {
                        let beat_index = n.rem_euclid(count as i64) as u32;
                        if (mask >> beat_index) & 1 == 1 {
                            let beat = n as f64 * step_beats;
                            let frame = hit_frame(beat, prev_beats, curr_beats, num_samples);
                            voice.trigger();
                            if audible {
                                push_note_pair(
                                    midi_out,
                                    channel,
                                    velocity,
                                    frame,
                                    gate_frames,
                                    num_samples,
                                );
                                voice.mix_into(&mut left[frame..], &mut right[frame..], gain);
                            }
                        }
                        n += 1;
                    }
                }
            }
        }

        midi_out.sort_unstable_by_key(|event| event.frame);
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // a power of two rate keeps all beat arithmetic exact in these tests
    const SAMPLE_RATE: u32 = 32768;

    fn test_sample(frames: usize) -> StereoSample {
        let data: Vec<f32> = (0..frames).map(|i| ((i % 7) as f32 - 3.0) / 4.0).collect();
        StereoSample::from_channels(data.clone(), data)
    }

    fn running_params(bpm: f32) -> EngineParams {
        EngineParams {
            bpm,
            run: true,
            ..EngineParams::default()
        }
    }

    fn render(engine: &mut Engine, params: &EngineParams, total: usize, block: usize) -> Vec<f32> {
        let mut output = Vec::with_capacity(total);
        let mut midi = Vec::new();
        let mut rendered = 0;
        while rendered < total {
            let n = block.min(total - rendered);
            let mut left = vec![0.0; n];
            let mut right = vec![0.0; n];
            engine.process_block(params, &mut left, &mut right, &mut midi);
            output.extend_from_slice(&left);
            rendered += n;
        }
        output
    }

    #[test]
    fn output_is_invariant_to_block_size() {
        let mut params = running_params(60.0);
        params.slots[0].rate = 2.0;
        params.slots[1].rate = 0.75;
        params.slots[1].pan = -0.5;

        let total = 8 * SAMPLE_RATE as usize;
        let mut reference = Engine::new(SAMPLE_RATE);
        reference.load_sample_buffer(0, test_sample(2048), None, true);
        reference.load_sample_buffer(1, test_sample(4096), None, true);
        let reference_output = render(&mut reference, &params, total, 4096);

        for block_size in [64, 128, 512, 3 * 1024, 4410] {
            let mut engine = Engine::new(SAMPLE_RATE);
            engine.load_sample_buffer(0, test_sample(2048), None, true);
            engine.load_sample_buffer(1, test_sample(4096), None, true);
            let output = render(&mut engine, &params, total, block_size);
            assert_eq!(
                output, reference_output,
                "block size {block_size} changed the output"
            );
            assert_eq!(engine.hit_counter(0), reference.hit_counter(0));
            assert_eq!(engine.hit_counter(1), reference.hit_counter(1));
        }
    }

    #[test]
    fn rate_hits_per_cycle() {
        let mut params = running_params(60.0);
        params.slots[0].rate = 2.0;

        let mut engine = Engine::new(SAMPLE_RATE);
        engine.load_sample_buffer(0, test_sample(128), None, true);

        // exactly 4 beats at 60 bpm: hits at beats 0, 0.5, 1.0, .. 3.5
        render(&mut engine, &params, 4 * SAMPLE_RATE as usize, 1024);
        assert_eq!(engine.hit_counter(0), 8);
    }

    #[test]
    fn count_mode_applies_beat_mask() {
        let mut params = running_params(60.0);
        params.timing_mode = TimingMode::Count;
        params.slots[0].count = 8;
        params.slots[0].beat_mask = 0b1010_1010;

        let mut engine = Engine::new(SAMPLE_RATE);
        engine.load_sample_buffer(0, test_sample(128), None, true);

        // 5 cycles of 4 beats: 8 steps per cycle, 4 of them enabled
        render(&mut engine, &params, 5 * 4 * SAMPLE_RATE as usize, 1024);
        assert_eq!(engine.hit_counter(0), 5 * 4);
    }

    #[test]
    fn mask_bits_beyond_count_are_ignored() {
        let mut params = running_params(60.0);
        params.timing_mode = TimingMode::Count;
        params.slots[0].count = 2;
        params.slots[0].beat_mask = !0b11; // only bits at or beyond the count are set

        let mut engine = Engine::new(SAMPLE_RATE);
        engine.load_sample_buffer(0, test_sample(128), None, true);

        render(&mut engine, &params, 4 * SAMPLE_RATE as usize, 1024);
        assert_eq!(engine.hit_counter(0), 0);
    }

    #[test]
    fn manual_triggers_collapse_into_one_hit() {
        let params = EngineParams::default(); // transport stopped
        let mut engine = Engine::new(SAMPLE_RATE);
        engine.load_sample_buffer(0, test_sample(128), None, true);

        engine.request_manual_trigger(0);
        engine.request_manual_trigger(0);
        engine.request_manual_trigger(0);

        let mut left = vec![0.0; 1024];
        let mut right = vec![0.0; 1024];
        let mut midi = Vec::new();
        engine.process_block(&params, &mut left, &mut right, &mut midi);

        assert_eq!(engine.hit_counter(0), 1);
        assert_eq!(midi.len(), 2);
        assert_eq!(midi[0].kind, MidiEventKind::NoteOn);
        assert_eq!(midi[0].frame, 0);
        assert_eq!(midi[0].channel, 1);
        assert_eq!(midi[1].kind, MidiEventKind::NoteOff);

        // the request queue drained: the next block stays quiet
        engine.process_block(&params, &mut left, &mut right, &mut midi);
        assert_eq!(engine.hit_counter(0), 1);
        assert!(midi.is_empty());
    }

    #[test]
    fn manual_triggers_respect_mute() {
        let mut params = EngineParams::default();
        params.slots[0].mute = true;

        let mut engine = Engine::new(SAMPLE_RATE);
        engine.load_sample_buffer(0, test_sample(128), None, true);
        engine.request_manual_trigger(0);

        let mut left = vec![0.0; 256];
        let mut right = vec![0.0; 256];
        let mut midi = Vec::new();
        engine.process_block(&params, &mut left, &mut right, &mut midi);
        assert_eq!(engine.hit_counter(0), 0);
        assert!(midi.is_empty());
    }

    #[test]
    fn muted_slots_still_schedule_but_stay_silent() {
        let mut params = running_params(60.0);
        params.slots[0].mute = true;
        params.slots[0].rate = 1.0;

        let mut engine = Engine::new(SAMPLE_RATE);
        engine.load_sample_buffer(0, test_sample(128), None, true);

        let total = 2 * SAMPLE_RATE as usize;
        let mut midi = Vec::new();
        let mut all_silent = true;
        let mut rendered = 0;
        while rendered < total {
            let mut left = vec![0.0; 1024];
            let mut right = vec![0.0; 1024];
            engine.process_block(&params, &mut left, &mut right, &mut midi);
            all_silent &= left.iter().chain(right.iter()).all(|s| *s == 0.0);
            assert!(midi.is_empty());
            rendered += 1024;
        }

        // hits were counted even though nothing was emitted
        assert_eq!(engine.hit_counter(0), 2);
        assert!(all_silent);
    }

    #[test]
    fn stopping_the_transport_keeps_tails_ringing() {
        let mut params = running_params(60.0);
        params.slots[0].rate = 1.0;
        params.slots[0].decay = 100.0;

        let mut engine = Engine::new(SAMPLE_RATE);
        engine.load_sample_buffer(0, test_sample(8 * SAMPLE_RATE as usize), None, true);

        // trigger the first hit, then stop
        render(&mut engine, &params, 1024, 1024);
        assert_eq!(engine.hit_counter(0), 1);
        params.run = false;

        let output = render(&mut engine, &params, 1024, 1024);
        assert!(output.iter().any(|s| *s != 0.0));
        // the timeline did not move while stopped
        assert_eq!(engine.hit_counter(0), 1);
    }

    #[test]
    fn cycle_length_follows_active_slots() {
        let mut params = running_params(120.0);
        params.slots[0].rate = 0.5;
        params.slots[1].rate = 1.0;

        let mut engine = Engine::new(SAMPLE_RATE);
        engine.load_sample_buffer(0, test_sample(64), None, true);
        engine.load_sample_buffer(1, test_sample(64), None, true);
        render(&mut engine, &params, 1024, 1024);
        assert_eq!(engine.cycle_beats(), 2.0);

        // muting the half speed slot shrinks the cycle to one beat
        params.slots[0].mute = true;
        render(&mut engine, &params, 1024, 1024);
        assert_eq!(engine.cycle_beats(), 1.0);
    }

    #[test]
    fn only_hard_resets_rewind_the_timeline() {
        let mut params = running_params(60.0);
        params.slots[0].rate = 2.0;

        let mut engine = Engine::new(SAMPLE_RATE);
        engine.load_sample_buffer(0, test_sample(128), None, true);
        // 2.25 beats leave the slot mid-period at rate 2
        render(&mut engine, &params, 9 * SAMPLE_RATE as usize / 4, 1024);

        let beats = engine.master_beats();
        let phase = engine.slot_phase(0);
        assert!(beats > 0.0);
        assert!(phase > 0.0);

        engine.reset_all_phases(false);
        assert_eq!(engine.master_beats(), beats);
        assert_eq!(engine.slot_phase(0), phase);

        engine.reset_all_phases(true);
        assert_eq!(engine.master_beats(), 0.0);
        assert_eq!(engine.slot_phase(0), 0.0);
    }

    #[test]
    fn phase_resets_never_cut_ringing_voices() {
        let mut params = running_params(60.0);
        params.slots[0].decay = 100.0;

        let mut engine = Engine::new(SAMPLE_RATE);
        engine.load_sample_buffer(0, test_sample(8 * SAMPLE_RATE as usize), None, true);
        render(&mut engine, &params, 1024, 1024);
        assert_eq!(engine.hit_counter(0), 1);
        params.run = false;

        engine.reset_all_phases(true);
        let output = render(&mut engine, &params, 512, 512);
        assert!(output.iter().any(|s| *s != 0.0));

        engine.reset_all_phases(false);
        let output = render(&mut engine, &params, 512, 512);
        assert!(output.iter().any(|s| *s != 0.0));
    }
}
