//! Per-slot sample playback with a multiplicative decay envelope and a single "tail"
//! generation for glitch-free reloads.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use symphonia::core::audio::SampleBuffer;

use crate::{
    error::Error,
    utils::{decoder::AudioDecoder, panning_factors, resampler::resample_hermite},
};

// -------------------------------------------------------------------------------------------------

/// Envelope level below which a voice past its decay duration is considered silent.
const ENVELOPE_CUTOFF: f32 = 1.0e-4;

/// Loaded samples are truncated to this many seconds to bound memory use.
const MAX_SAMPLE_SECONDS: u64 = 8 * 60;

// -------------------------------------------------------------------------------------------------

/// A decoded stereo sample, resident at the engine's sample rate as two separate channel
/// buffers. Buffers are shared so that moving a sample into a ringing tail is cheap.
#[derive(Debug, Clone)]
pub struct StereoSample {
    left: Arc<Vec<f32>>,
    right: Arc<Vec<f32>>,
}

impl StereoSample {
    /// Decode an audio file into memory and resample it to the given engine rate. Mono files
    /// are duplicated to both channels; channels beyond the first two are dropped.
    pub fn from_file<P: AsRef<Path>>(path: P, engine_rate: u32) -> Result<Self, Error> {
        let mut decoder = AudioDecoder::from_file(path)?;
        let spec = decoder.signal_spec()?;
        let source_rate = spec.rate;
        let channel_count = spec.channels.count().max(1);

        // Preallocate when the decoder gives us a frame hint.
        let frame_hint = decoder.codec_params().n_frames.unwrap_or(0) as usize;
        let mut interleaved = Vec::with_capacity(frame_hint * channel_count);

        let decode_buffer_capacity = decoder
            .codec_params()
            .max_frames_per_packet
            .unwrap_or(16 * 1024 * channel_count as u64);
        let mut decode_buffer = SampleBuffer::<f32>::new(decode_buffer_capacity, spec);

        let max_samples = MAX_SAMPLE_SECONDS as usize * source_rate as usize * channel_count;
        while decoder.read_packet(&mut decode_buffer).is_some() {
            interleaved.extend_from_slice(decode_buffer.samples());
            if interleaved.len() >= max_samples {
                interleaved.truncate(max_samples);
                break;
            }
        }
        if interleaved.is_empty() {
            return Err(Error::AudioDecodingError(Box::new(
                symphonia::core::errors::Error::DecodeError("failed to decode file"),
            )));
        }

        let frame_count = interleaved.len() / channel_count;
        let mut left = Vec::with_capacity(frame_count);
        let mut right = Vec::with_capacity(frame_count);
        for frame in interleaved.chunks_exact(channel_count) {
            left.push(frame[0]);
            right.push(if channel_count > 1 { frame[1] } else { frame[0] });
        }

        if source_rate != engine_rate {
            left = resample_hermite(&left, source_rate, engine_rate);
            right = resample_hermite(&right, source_rate, engine_rate);
        }

        Ok(Self::from_channels(left, right))
    }

    /// Create a sample from raw channel buffers, truncating to the shorter channel.
    pub fn from_channels(mut left: Vec<f32>, mut right: Vec<f32>) -> Self {
        let frames = left.len().min(right.len());
        left.truncate(frames);
        right.truncate(frames);
        Self {
            left: Arc::new(left),
            right: Arc::new(right),
        }
    }

    #[inline]
    pub fn frames(&self) -> usize {
        self.left.len()
    }

    #[inline]
    pub fn left(&self) -> &[f32] {
        &self.left
    }

    #[inline]
    pub fn right(&self) -> &[f32] {
        &self.right
    }
}

// -------------------------------------------------------------------------------------------------

/// Shared playback/envelope state of either the primary voice or its tail.
#[derive(Debug, Clone)]
struct Playback {
    sample: StereoSample,
    position: usize,
    env: f32,
    env_alpha: f32,
    env_elapsed: usize,
    env_max: usize,
    pan_l: f32,
    pan_r: f32,
}

impl Playback {
    /// Mix the remaining sample data into the output, advancing the cursor and envelope per
    /// sample. Returns false once the playback has finished: either the sample is exhausted
    /// or the envelope has decayed below the cutoff after its configured duration.
    fn mix_into(&mut self, left: &mut [f32], right: &mut [f32], gain: f32) -> bool {
        let frames = self.sample.frames();
        if self.position >= frames {
            return false;
        }

        let n = left.len().min(right.len()).min(frames - self.position);
        let src_l = &self.sample.left()[self.position..self.position + n];
        let src_r = &self.sample.right()[self.position..self.position + n];
        let gain_l = gain * self.pan_l;
        let gain_r = gain * self.pan_r;

        for i in 0..n {
            let env = self.env;
            left[i] += src_l[i] * gain_l * env;
            right[i] += src_r[i] * gain_r * env;
            self.env *= self.env_alpha;
            self.env_elapsed += 1;
        }

        self.position += n;
        let decayed =
            self.env_max > 0 && self.env_elapsed >= self.env_max && self.env < ENVELOPE_CUTOFF;
        !decayed && self.position < frames
    }
}

// -------------------------------------------------------------------------------------------------

/// One slot's voice: the loaded sample, playback cursor, decay envelope and pan, plus at most
/// one tail generation which keeps ringing after the slot was cleared or reloaded.
#[derive(Debug, Clone)]
pub struct Voice {
    sample: Option<StereoSample>,
    file_path: Option<PathBuf>,
    sample_rate: u32,
    playback: Option<Playback>,
    tail: Option<Playback>,
    env_alpha: f32,
    env_max: usize,
    pan_l: f32,
    pan_r: f32,
    hit_counter: u32,
    /// Visual phase in 0..1 over the slot's own period, updated by the scheduler.
    pub(crate) phase: f64,
}

impl Voice {
    pub fn new(sample_rate: u32) -> Self {
        let (pan_l, pan_r) = panning_factors(0.0);
        Self {
            sample: None,
            file_path: None,
            sample_rate,
            playback: None,
            tail: None,
            env_alpha: 1.0,
            env_max: 0,
            pan_l,
            pan_r,
            hit_counter: 0,
            phase: 0.0,
        }
    }

    /// Reset for a new engine sample rate. Drops all playback state but keeps the hit counter.
    pub fn prepare(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate;
        self.playback = None;
        self.tail = None;
        self.env_alpha = 1.0;
        self.env_max = 0;
        self.phase = 0.0;
    }

    /// Load a decoded sample into this slot. Any previous playback state is gone; callers
    /// wanting a tail must `clear(true)` first.
    pub fn load(&mut self, sample: StereoSample, path: Option<PathBuf>) {
        self.playback = None;
        if sample.frames() > 0 {
            self.sample = Some(sample);
            self.file_path = path;
        } else {
            self.sample = None;
            self.file_path = None;
        }
    }

    /// Decode the given file at the engine rate and load it.
    pub fn load_file<P: AsRef<Path>>(&mut self, path: P) -> Result<(), Error> {
        let sample = StereoSample::from_file(path.as_ref(), self.sample_rate)?;
        self.load(sample, Some(path.as_ref().to_path_buf()));
        Ok(())
    }

    #[inline]
    pub fn has_sample(&self) -> bool {
        self.sample.is_some()
    }

    #[inline]
    pub fn is_playing(&self) -> bool {
        self.playback.is_some()
    }

    #[inline]
    pub fn hit_counter(&self) -> u32 {
        self.hit_counter
    }

    #[inline]
    pub fn file_path(&self) -> Option<&Path> {
        self.file_path.as_deref()
    }

    /// Remember a path without a loaded sample, e.g. for a file which failed to decode when
    /// applying a pattern.
    pub fn set_file_path(&mut self, path: Option<PathBuf>) {
        self.file_path = path;
    }

    pub fn set_pan(&mut self, pan: f32) {
        let (pan_l, pan_r) = panning_factors(pan);
        self.pan_l = pan_l;
        self.pan_r = pan_r;
        if let Some(playback) = &mut self.playback {
            playback.pan_l = pan_l;
            playback.pan_r = pan_r;
        }
    }

    /// Configure the decay envelope: reaches -60 dB after the given duration.
    pub fn set_decay_ms(&mut self, decay_ms: f32) {
        if decay_ms <= 0.0 || self.sample_rate == 0 {
            self.env_alpha = 1.0;
            self.env_max = 0;
        } else {
            let samples = (decay_ms as f64 / 1000.0) * self.sample_rate as f64;
            self.env_max = samples.round() as usize;
            self.env_alpha = 0.001_f64.powf(1.0 / samples.max(1.0)) as f32;
        }
        if let Some(playback) = &mut self.playback {
            playback.env_alpha = self.env_alpha;
            playback.env_max = self.env_max;
        }
    }

    /// Start the sample from the top with a fresh envelope and count the hit.
    pub fn trigger(&mut self) {
        let Some(sample) = &self.sample else {
            return;
        };
        self.playback = Some(Playback {
            sample: sample.clone(),
            position: 0,
            env: 1.0,
            env_alpha: self.env_alpha,
            env_elapsed: 0,
            env_max: self.env_max,
            pan_l: self.pan_l,
            pan_r: self.pan_r,
        });
        self.hit_counter = self.hit_counter.wrapping_add(1);
    }

    /// Mix whatever is currently ringing (tail first, then the primary playback) into the
    /// output buffers. Finished playbacks retire to idle.
    pub fn mix_into(&mut self, left: &mut [f32], right: &mut [f32], gain: f32) {
        if let Some(tail) = &mut self.tail {
            if !tail.mix_into(left, right, gain) {
                self.tail = None;
            }
        }
        if let Some(playback) = &mut self.playback {
            if !playback.mix_into(left, right, gain) {
                self.playback = None;
            }
        }
    }

    /// Unload the slot. With `allow_tail`, an in-flight playback moves into the tail slot and
    /// keeps ringing instead of being cut; without it, everything stops immediately. When a
    /// tail is requested but nothing is playing, an already ringing tail is left alone.
    pub fn clear(&mut self, allow_tail: bool) {
        if allow_tail {
            if let Some(playback) = self.playback.take() {
                self.tail = Some(playback);
            }
        } else {
            self.tail = None;
            self.playback = None;
        }
        self.sample = None;
        self.file_path = None;
        self.phase = 0.0;
    }

    /// Reset the visual phase. Only a hard reset moves it; soft resets keep continuity.
    pub fn reset_phase(&mut self, hard: bool) {
        if hard {
            self.phase = 0.0;
        }
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RATE: u32 = 44100;

    fn constant_sample(frames: usize) -> StereoSample {
        StereoSample::from_channels(vec![1.0; frames], vec![1.0; frames])
    }

    fn mix_all(voice: &mut Voice, frames: usize) -> (Vec<f32>, Vec<f32>) {
        let mut left = vec![0.0; frames];
        let mut right = vec![0.0; frames];
        voice.mix_into(&mut left, &mut right, 1.0);
        (left, right)
    }

    #[test]
    fn decay_reaches_minus_60_db_at_duration() {
        let decay_ms = 250.0_f32;
        let decay_samples = ((decay_ms as f64 / 1000.0) * SAMPLE_RATE as f64).round() as usize;

        let mut voice = Voice::new(SAMPLE_RATE);
        voice.load(constant_sample(decay_samples + 16), None);
        voice.set_pan(0.0);
        voice.set_decay_ms(decay_ms);
        voice.trigger();

        let (left, _) = mix_all(&mut voice, decay_samples + 8);
        let (center_gain, _) = panning_factors(0.0);
        let envelope_at_duration = left[decay_samples] / center_gain;
        assert!(
            (envelope_at_duration - 0.001).abs() / 0.001 < 0.01,
            "envelope at decay duration was {envelope_at_duration}"
        );
    }

    #[test]
    fn voice_retires_on_sample_end() {
        let mut voice = Voice::new(SAMPLE_RATE);
        voice.load(constant_sample(64), None);
        voice.trigger();
        assert!(voice.is_playing());

        mix_all(&mut voice, 128);
        assert!(!voice.is_playing());
    }

    #[test]
    fn tail_keeps_ringing_after_clear() {
        let frames = 4096;

        // reference: trigger and render without any clear
        let mut reference = Voice::new(SAMPLE_RATE);
        reference.load(constant_sample(frames), None);
        reference.set_decay_ms(50.0);
        reference.trigger();
        let (reference_head, _) = mix_all(&mut reference, 1024);
        let (reference_rest, _) = mix_all(&mut reference, frames);

        // same, but clear with tail after the first chunk
        let mut voice = Voice::new(SAMPLE_RATE);
        voice.load(constant_sample(frames), None);
        voice.set_decay_ms(50.0);
        voice.trigger();
        let (head, _) = mix_all(&mut voice, 1024);
        voice.clear(true);
        assert!(!voice.has_sample());
        let (rest, _) = mix_all(&mut voice, frames);

        assert_eq!(head, reference_head);
        assert_eq!(rest, reference_rest);
        assert!(rest.iter().any(|s| *s != 0.0));
    }

    #[test]
    fn hard_clear_silences_immediately() {
        let mut voice = Voice::new(SAMPLE_RATE);
        voice.load(constant_sample(4096), None);
        voice.set_decay_ms(50.0);
        voice.trigger();
        mix_all(&mut voice, 256);

        voice.clear(false);
        let (left, right) = mix_all(&mut voice, 1024);
        assert!(left.iter().all(|s| *s == 0.0));
        assert!(right.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn clear_with_tail_keeps_existing_tail_when_idle() {
        let mut voice = Voice::new(SAMPLE_RATE);
        voice.load(constant_sample(4096), None);
        voice.set_decay_ms(50.0);
        voice.trigger();
        voice.clear(true); // playback becomes the tail

        // reload and clear again without a new trigger: the old tail must survive
        voice.load(constant_sample(4096), None);
        voice.clear(true);
        let (left, _) = mix_all(&mut voice, 256);
        assert!(left.iter().any(|s| *s != 0.0));
    }

    #[test]
    fn trigger_counts_hits() {
        let mut voice = Voice::new(SAMPLE_RATE);
        voice.load(constant_sample(16), None);
        assert_eq!(voice.hit_counter(), 0);
        voice.trigger();
        voice.trigger();
        assert_eq!(voice.hit_counter(), 2);

        // triggering without a sample is a no-op
        voice.clear(false);
        voice.trigger();
        assert_eq!(voice.hit_counter(), 2);
    }
}
