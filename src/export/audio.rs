//! Renders whole cycles to a stereo buffer and writes them as 24 bit WAV files.
//!
//! The renderer decodes fresh copies of the slot files, places every hit at
//! `round(beat * seconds_per_beat * engine_rate)` and overlap-adds each hit's full enveloped
//! sample. Each hit rings out completely even across later retriggers of the same slot, which
//! the live engine cuts; hit positions themselves match the live scheduler exactly. Tails
//! which overrun the last cycle get a short linear fade and the result is truncated to the
//! exact cycle length before an optional linear resample to the target file rate.

use std::path::Path;

use crate::{
    cycle::{CycleAccumulator, COUNT_MODE_BASE_BEATS},
    engine::Engine,
    error::Error,
    params::{mask_for_beats, EngineParams, TimingMode, COUNT_RANGE, NUM_SLOTS},
    utils::resampler::resample_linear,
    voice::{StereoSample, Voice},
};

// -------------------------------------------------------------------------------------------------

/// Fade length applied when ringing tails overrun the exported cycle range.
const OVERRUN_FADE_SAMPLES: usize = 512;

/// Bit depth of exported WAV files.
const EXPORT_BITS_PER_SAMPLE: u16 = 24;

// -------------------------------------------------------------------------------------------------

/// A finished offline render: non-interleaved stereo at the given rate.
#[derive(Debug, Clone)]
pub struct RenderedAudio {
    pub left: Vec<f32>,
    pub right: Vec<f32>,
    pub sample_rate: u32,
}

impl RenderedAudio {
    pub fn frames(&self) -> usize {
        self.left.len()
    }
}

// -------------------------------------------------------------------------------------------------

struct OfflineSlot {
    sample: StereoSample,
    gain: f32,
    pan: f32,
    decay_ms: f32,
    /// Reduced rate fraction in rate mode.
    rate_num: i64,
    rate_den: i64,
    count: u32,
    mask: u64,
    triggers: Vec<usize>,
}

impl Engine {
    /// Render `cycles` repetitions of the current cycle to a stereo buffer at `target_rate`.
    ///
    /// Slot files are re-decoded from their stored paths, so the render never touches the
    /// realtime voices. Fails without side effects when the setup cannot be exported: unusable
    /// tempo, zero cycles, missing files, no audible slot with a sample, or a beat mask which
    /// silences everything.
    pub fn render_audio_cycles(
        &self,
        params: &EngineParams,
        target_rate: u32,
        cycles: u32,
    ) -> Result<RenderedAudio, Error> {
        let engine_rate = self.sample_rate();
        if engine_rate == 0 {
            return Err(Error::EngineNotInitialized);
        }
        if params.bpm <= 0.0 {
            return Err(Error::InvalidBpm);
        }
        if cycles == 0 || target_rate == 0 {
            return Err(Error::InvalidCycleCount);
        }

        let any_solo = params.any_solo();
        let seconds_per_beat = params.seconds_per_beat();

        // decode all audible slots up front, collecting every failure before bailing out
        let mut slots = Vec::new();
        let mut missing = Vec::new();
        let mut cycle = CycleAccumulator::new();

        for index in 0..NUM_SLOTS {
            if !params.slot_audible(index, any_solo) {
                continue;
            }
            let Some(path) = self.file_path(index) else {
                continue;
            };
            let sample = match StereoSample::from_file(path, engine_rate) {
                Ok(sample) => sample,
                Err(err) => {
                    log::warn!("export: cannot decode '{}': {err}", path.display());
                    missing.push(path.display().to_string());
                    continue;
                }
            };

            let slot = &params.slots[index];
            let (rate_num, rate_den) = crate::cycle::rate_fraction(slot.rate as f64);
            if params.timing_mode == TimingMode::Rate {
                if rate_num <= 0 {
                    continue;
                }
                // fold the slot's period into the shared cycle
                cycle.add_period(rate_den, rate_num);
            }

            slots.push(OfflineSlot {
                sample,
                gain: slot.gain(),
                pan: slot.pan,
                decay_ms: slot.decay_ms(),
                rate_num,
                rate_den,
                count: slot.count.clamp(*COUNT_RANGE.start(), *COUNT_RANGE.end()),
                mask: slot.beat_mask,
                triggers: Vec::new(),
            });
        }

        if !missing.is_empty() {
            return Err(Error::MediaFilesMissing(missing));
        }
        if slots.is_empty() {
            return Err(Error::NoActiveSlots);
        }

        let cycle_beats = match params.timing_mode {
            TimingMode::Rate => cycle.beats(),
            TimingMode::Count => COUNT_MODE_BASE_BEATS,
        };

        let samples_per_beat = seconds_per_beat * engine_rate as f64;
        let total_beats = cycle_beats * cycles as f64;
        let target_len = ((total_beats * samples_per_beat).round() as usize).max(1);

        // precompute every hit's destination sample and the full buffer size including tails
        let mut needed_len = target_len;
        let mut any_triggers = false;
        for slot in &mut slots {
            let mut beats = Vec::new();
            match params.timing_mode {
                TimingMode::Rate => {
                    let hits_per_cycle = ((cycle_beats * slot.rate_num as f64
                        / slot.rate_den as f64)
                        .round() as i64)
                        .max(1);
                    let beat_spacing = slot.rate_den as f64 / slot.rate_num as f64;
                    for cycle_index in 0..cycles {
                        let cycle_offset = cycle_index as f64 * cycle_beats;
                        for hit in 0..hits_per_cycle {
                            beats.push(cycle_offset + hit as f64 * beat_spacing);
                        }
                    }
                }
                TimingMode::Count => {
                    let mask = slot.mask & mask_for_beats(slot.count);
                    if mask == 0 {
                        continue;
                    }
                    let step_beats = COUNT_MODE_BASE_BEATS / slot.count as f64;
                    for cycle_index in 0..cycles {
                        let cycle_offset = cycle_index as f64 * cycle_beats;
                        for hit in 0..slot.count {
                            if (mask >> hit) & 1 == 1 {
                                beats.push(cycle_offset + hit as f64 * step_beats);
                            }
                        }
                    }
                }
            }

            let sample_len = slot.sample.frames();
            for beat in beats {
                let trigger = (beat * samples_per_beat).round() as i64;
                if trigger < 0 || trigger as usize >= target_len {
                    continue;
                }
                let trigger = trigger as usize;
                slot.triggers.push(trigger);
                needed_len = needed_len.max(trigger + sample_len);
                any_triggers = true;
            }
        }

        if !any_triggers {
            return Err(Error::EmptyExport);
        }

        let mut left = vec![0.0f32; needed_len];
        let mut right = vec![0.0f32; needed_len];

        for slot in &slots {
            let mut voice = Voice::new(engine_rate);
            voice.load(slot.sample.clone(), None);
            voice.set_pan(slot.pan);
            voice.set_decay_ms(slot.decay_ms);

            for &trigger in &slot.triggers {
                voice.trigger();
                voice.mix_into(&mut left[trigger..], &mut right[trigger..], slot.gain);
            }
        }

        // tails past the cycle range fade out instead of clicking at the cut
        if needed_len > target_len {
            let fade_len = OVERRUN_FADE_SAMPLES.min(target_len);
            let fade_start = target_len - fade_len;
            for k in 0..fade_len {
                let gain = 1.0 - k as f32 / fade_len as f32;
                left[fade_start + k] *= gain;
                right[fade_start + k] *= gain;
            }
        }
        left.truncate(target_len);
        right.truncate(target_len);

        if target_rate != engine_rate {
            left = resample_linear(&left, engine_rate, target_rate);
            right = resample_linear(&right, engine_rate, target_rate);
        }

        Ok(RenderedAudio {
            left,
            right,
            sample_rate: target_rate,
        })
    }

    /// Render `cycles` repetitions and write them to `path` as a 24 bit stereo WAV file.
    pub fn export_audio_cycles<P: AsRef<Path>>(
        &self,
        params: &EngineParams,
        target_rate: u32,
        cycles: u32,
        path: P,
    ) -> Result<(), Error> {
        let rendered = self.render_audio_cycles(params, target_rate, cycles)?;

        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: rendered.sample_rate,
            bits_per_sample: EXPORT_BITS_PER_SAMPLE,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path.as_ref(), spec)
            .map_err(|err| Error::FileWriteError(Box::new(err)))?;

        let scale = ((1i32 << (EXPORT_BITS_PER_SAMPLE - 1)) - 1) as f32;
        for (l, r) in rendered.left.iter().zip(&rendered.right) {
            for sample in [l, r] {
                let value = (sample.clamp(-1.0, 1.0) * scale).round() as i32;
                writer
                    .write_sample(value)
                    .map_err(|err| Error::FileWriteError(Box::new(err)))?;
            }
        }
        writer
            .finalize()
            .map_err(|err| Error::FileWriteError(Box::new(err)))?;

        log::info!(
            "exported {} cycles ({} frames) to '{}'",
            cycles,
            rendered.frames(),
            path.as_ref().display()
        );
        Ok(())
    }
}

// -------------------------------------------------------------------------------------------------
