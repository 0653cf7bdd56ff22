//! Real-time mixing of tone voices and the music loop.
//!
//! The mixer lives inside the output callback. Control threads talk to it
//! exclusively through a lock-free SPSC command ring; state flows back out
//! through shared atomics (the rendered-frame counter that drives the
//! context clock). Nothing in the render path locks or blocks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rtrb::Consumer;

use crate::context::{TonePlan, Waveform};
use crate::music::MusicBuffer;

/// Commands accepted by the mixer.
#[derive(Debug)]
pub enum MixerCommand {
    StartTone(TonePlan),
    StartMusic { buffer: Arc<MusicBuffer>, volume: f32 },
    StopMusic,
    SetMusicVolume(f32),
}

/// Hard cap on simultaneous tone voices. Effects top out at a handful of
/// overlapping tones; the cap only protects the callback from a runaway
/// producer. Excess commands are dropped.
const MAX_VOICES: usize = 64;

#[inline]
fn sample_waveform(waveform: Waveform, phase: f32) -> f32 {
    match waveform {
        Waveform::Sine => (phase * core::f32::consts::TAU).sin(),
        Waveform::Square => {
            if phase < 0.5 {
                1.0
            } else {
                -1.0
            }
        }
        Waveform::Sawtooth => 2.0 * phase - 1.0,
        Waveform::Triangle => 4.0 * (phase - 0.5).abs() - 1.0,
    }
}

/// One live oscillator+envelope pair. Self-disposes when its duration
/// elapses; never reused.
struct ToneVoice {
    plan: TonePlan,
    /// First absolute frame this voice is audible on. Plans scheduled in
    /// the past start immediately.
    start_frame: u64,
    /// Frames rendered so far, i.e. position within the tone.
    elapsed: u64,
    total_frames: u64,
    /// Normalized phase in [0, 1).
    phase: f32,
    gain: f32,
    /// Per-sample multiplier implementing the exponential sweep.
    gain_step: f32,
}

impl ToneVoice {
    fn new(plan: TonePlan, sample_rate: u32) -> Self {
        let rate_f = sample_rate as f64;
        let total_frames = (plan.duration * rate_f).floor().max(1.0) as u64;
        let gain = plan.gain.start();
        // start * step^total == end, the same curve as the envelope's
        // closed form but advanced incrementally.
        let gain_step = (plan.gain.end() / plan.gain.start()).powf(1.0 / total_frames as f32);
        let start_frame = (plan.start_at.max(0.0) * rate_f).floor() as u64;
        ToneVoice {
            plan,
            start_frame,
            elapsed: 0,
            total_frames,
            phase: 0.0,
            gain,
            gain_step,
        }
    }

    /// Adds this voice into both channels. Returns false once finished.
    fn render_into(
        &mut self,
        left: &mut [f32],
        right: &mut [f32],
        base_frame: u64,
        sample_rate: u32,
    ) -> bool {
        let rate_f = sample_rate as f64;
        for i in 0..left.len() {
            if base_frame + (i as u64) < self.start_frame {
                continue;
            }
            if self.elapsed >= self.total_frames {
                return false;
            }
            let t = self.elapsed as f64 / rate_f;
            let freq = self.plan.frequency.value_at(t);

            let sample = sample_waveform(self.plan.waveform, self.phase) * self.gain;
            left[i] += sample;
            right[i] += sample;

            self.gain *= self.gain_step;
            self.phase += freq / sample_rate as f32;
            // Branchless phase wrap (phase is always positive)
            self.phase -= (self.phase >= 1.0) as u32 as f32;
            self.elapsed += 1;
        }
        self.elapsed < self.total_frames
    }
}

/// The looping music voice. Volume moves through a short smoothing ramp so
/// live volume changes do not produce zipper noise.
struct LoopVoice {
    buffer: Arc<MusicBuffer>,
    position: usize,
    volume: f32,
    smoothed: f32,
    smooth_coeff: f32,
}

impl LoopVoice {
    fn new(buffer: Arc<MusicBuffer>, volume: f32, sample_rate: u32) -> Self {
        // ~7ms time constant, enough to hide steps.
        let samples = 0.007 * sample_rate as f32;
        LoopVoice {
            buffer,
            position: 0,
            volume: volume.clamp(0.0, 1.0),
            smoothed: volume.clamp(0.0, 1.0),
            smooth_coeff: (-1.0 / samples).exp(),
        }
    }

    fn render_into(&mut self, left: &mut [f32], right: &mut [f32]) {
        let frames = self.buffer.frames();
        if frames == 0 {
            return;
        }
        for i in 0..left.len() {
            let (l, r) = self.buffer.frame(self.position);
            self.position += 1;
            if self.position == frames {
                self.position = 0;
            }
            self.smoothed = self.volume + self.smooth_coeff * (self.smoothed - self.volume);
            left[i] += l * self.smoothed;
            right[i] += r * self.smoothed;
        }
    }
}

/// Callback-side mixer: drains commands, renders voices, advances the clock.
pub struct Mixer {
    commands: Consumer<MixerCommand>,
    sample_rate: u32,
    frames_rendered: Arc<AtomicU64>,
    voices: Vec<ToneVoice>,
    music: Option<LoopVoice>,
    scratch_l: Vec<f32>,
    scratch_r: Vec<f32>,
}

impl Mixer {
    pub fn new(
        commands: Consumer<MixerCommand>,
        sample_rate: u32,
        frames_rendered: Arc<AtomicU64>,
    ) -> Self {
        Mixer {
            commands,
            sample_rate,
            frames_rendered,
            voices: Vec::with_capacity(MAX_VOICES),
            music: None,
            scratch_l: Vec::new(),
            scratch_r: Vec::new(),
        }
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn drain_commands(&mut self) {
        while let Ok(cmd) = self.commands.pop() {
            match cmd {
                MixerCommand::StartTone(plan) => {
                    if self.voices.len() < MAX_VOICES {
                        self.voices.push(ToneVoice::new(plan, self.sample_rate));
                    }
                }
                MixerCommand::StartMusic { buffer, volume } => {
                    self.music = Some(LoopVoice::new(buffer, volume, self.sample_rate));
                }
                MixerCommand::StopMusic => {
                    self.music = None;
                }
                MixerCommand::SetMusicVolume(volume) => {
                    if let Some(music) = &mut self.music {
                        music.volume = volume.clamp(0.0, 1.0);
                    }
                }
            }
        }
    }

    /// Fills an interleaved output buffer with `channels` channels.
    ///
    /// Tones are mono, duplicated into every channel pair; the music loop
    /// keeps its stereo split. Even channels get left, odd channels right.
    pub fn render(&mut self, output: &mut [f32], channels: usize) {
        if channels == 0 {
            return;
        }
        // Handle commands first
        self.drain_commands();

        let frames = output.len() / channels;
        self.scratch_l.clear();
        self.scratch_l.resize(frames, 0.0);
        self.scratch_r.clear();
        self.scratch_r.resize(frames, 0.0);

        let base_frame = self.frames_rendered.load(Ordering::Relaxed);

        let mut i = 0;
        while i < self.voices.len() {
            let alive = self.voices[i].render_into(
                &mut self.scratch_l,
                &mut self.scratch_r,
                base_frame,
                self.sample_rate,
            );
            if alive {
                i += 1;
            } else {
                self.voices.swap_remove(i);
            }
        }

        if let Some(music) = &mut self.music {
            music.render_into(&mut self.scratch_l, &mut self.scratch_r);
        }

        let mut chunks = output.chunks_exact_mut(channels);
        for (frame, chunk) in chunks.by_ref().enumerate() {
            for (c, sample) in chunk.iter_mut().enumerate() {
                *sample = if c % 2 == 0 {
                    self.scratch_l[frame]
                } else {
                    self.scratch_r[frame]
                };
            }
        }
        // A trailing chunk shorter than one frame renders as silence.
        chunks.into_remainder().fill(0.0);

        self.frames_rendered
            .fetch_add(frames as u64, Ordering::Relaxed);
    }
}
