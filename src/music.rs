//! Procedural background-music rendering.
//!
//! The whole loop is synthesized up front into an immutable stereo buffer:
//! an eight-bar melody (a rising half answered by a falling half) over a
//! two-note-per-bar bass with a quiet first overtone. Everything is plain
//! sine summation with exponential decay envelopes; there is no randomness,
//! so rendering is deterministic for a given sample rate.

use std::f64::consts::TAU;

use crate::effects::pitch::{A3, A5, C5, D5, E3, E5, F5, G3, G5};
use crate::error::{AudioError, Result};

/// Length of the rendered loop in seconds.
pub const MUSIC_DURATION_SECS: f64 = 8.0;

/// Substituted when a context reports a zero or unreasonable sample rate.
/// Some platforms briefly report 0 through their context handle.
pub const FALLBACK_SAMPLE_RATE: u32 = 44_100;

const MELODY_GAIN: f32 = 0.15;
const BASS_GAIN: f32 = 0.10;
const BASS_OVERTONE_GAIN: f32 = 0.05;

/// (pitch, start seconds, duration seconds). First four bars rise, the
/// next four fall back to the tonic.
const MELODY: [(f32, f64, f64); 16] = [
    (C5, 0.0, 0.5),
    (C5, 0.5, 0.5),
    (G5, 1.0, 0.5),
    (G5, 1.5, 0.5),
    (A5, 2.0, 0.5),
    (A5, 2.5, 0.5),
    (G5, 3.0, 0.5),
    (F5, 3.5, 0.5),
    (E5, 4.0, 0.5),
    (E5, 4.5, 0.5),
    (D5, 5.0, 0.5),
    (D5, 5.5, 0.5),
    (C5, 6.0, 0.5),
    (C5, 6.5, 0.5),
    (E5, 7.0, 0.5),
    (C5, 7.5, 0.5),
];

/// (pitch, start seconds); every bass note holds for one second.
const BASS: [(f32, f64); 8] = [
    (G3, 0.0),
    (G3, 1.0),
    (A3, 2.0),
    (A3, 3.0),
    (G3, 4.0),
    (G3, 5.0),
    (E3, 6.0),
    (G3, 7.0),
];

/// Immutable stereo loop, one `Vec<f32>` per channel.
#[derive(Debug, Clone, PartialEq)]
pub struct MusicBuffer {
    sample_rate: u32,
    left: Vec<f32>,
    right: Vec<f32>,
}

impl MusicBuffer {
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of frames per channel.
    pub fn frames(&self) -> usize {
        self.left.len()
    }

    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    pub fn left(&self) -> &[f32] {
        &self.left
    }

    pub fn right(&self) -> &[f32] {
        &self.right
    }

    /// Stereo frame at `i`; callers wrap their own read position.
    #[inline]
    pub fn frame(&self, i: usize) -> (f32, f32) {
        (self.left[i], self.right[i])
    }
}

/// Renders the loop at `sample_rate`, substituting
/// [`FALLBACK_SAMPLE_RATE`] when the rate is zero or outside 8 kHz..384 kHz.
///
/// The buffer length is `floor(duration * rate)` frames. The only failure
/// mode is allocation; callers treat it as "no music", never fatal.
pub fn render_music_buffer(sample_rate: u32) -> Result<MusicBuffer> {
    let rate = if (8_000..=384_000).contains(&sample_rate) {
        sample_rate
    } else {
        FALLBACK_SAMPLE_RATE
    };
    let frames = (MUSIC_DURATION_SECS * rate as f64).floor() as usize;

    let mut left: Vec<f32> = Vec::new();
    left.try_reserve_exact(frames)
        .map_err(|_| AudioError::MusicRender(format!("cannot allocate {frames} frames")))?;
    left.resize(frames, 0.0);

    let rate_f = rate as f64;

    for (hz, at, dur) in MELODY {
        let start = (at * rate_f).floor() as usize;
        let note_frames = (dur * rate_f).floor() as usize;
        let end = (start + note_frames).min(frames);
        for i in start..end {
            let t = (i - start) as f64 / rate_f;
            let envelope = (-t * 2.5).exp() * (1.0 - t * 0.15);
            // Phase runs on the absolute frame index so repeated pitches
            // stay phase-continuous across note boundaries.
            let phase = TAU * hz as f64 * i as f64 / rate_f;
            left[i] += (phase.sin() * envelope) as f32 * MELODY_GAIN;
        }
    }

    for (hz, at) in BASS {
        let start = (at * rate_f).floor() as usize;
        let end = (start + rate as usize).min(frames);
        for i in start..end {
            let t = (i - start) as f64 / rate_f;
            let envelope = (-t * 1.2).exp();
            let phase = TAU * hz as f64 * i as f64 / rate_f;
            let fundamental = phase.sin() * BASS_GAIN as f64;
            let overtone = (phase * 2.0).sin() * BASS_OVERTONE_GAIN as f64;
            left[i] += ((fundamental + overtone) * envelope) as f32;
        }
    }

    let mut right: Vec<f32> = Vec::new();
    right
        .try_reserve_exact(frames)
        .map_err(|_| AudioError::MusicRender(format!("cannot allocate {frames} frames")))?;
    right.extend_from_slice(&left);

    Ok(MusicBuffer {
        sample_rate: rate,
        left,
        right,
    })
}
