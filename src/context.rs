//! Playback-context trait and the tone data model.
//!
//! A [`PlaybackContext`] is the platform audio output root: it owns the
//! output clock, accepts tone and music commands, and carries the
//! suspended/running lifecycle that autoplay policies impose. The engine
//! talks to it exclusively through this trait so tests can substitute a
//! recording fake for the real device-backed implementation.

use std::sync::Arc;

use crate::error::Result;
use crate::music::MusicBuffer;

/// Smallest representable gain. Exponential ramps are undefined at zero,
/// so every envelope endpoint is clamped to at least this.
pub const MIN_GAIN: f32 = 1e-4;

/// Lifecycle of the playback context.
///
/// `Uninitialized` is the engine-level view before the first context is
/// constructed; a live context only ever reports the other three.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Uninitialized,
    /// Constructed but muted until a resume request goes through.
    Suspended,
    Running,
    /// Torn down; every operation against it fails.
    Closed,
}

impl ContextState {
    pub fn label(self) -> &'static str {
        match self {
            ContextState::Uninitialized => "uninitialized",
            ContextState::Suspended => "suspended",
            ContextState::Running => "running",
            ContextState::Closed => "closed",
        }
    }
}

/// Result of a synchronous resume attempt.
///
/// The synchronous path never waits for the platform, so "requested" is the
/// strongest claim it can make. Callers needing confirmation poll via the
/// blocking path instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeOutcome {
    /// Context was already running; no request issued.
    AlreadyRunning,
    /// A resume request was issued fire-and-forget.
    ResumeRequested,
    /// No context could be obtained.
    Unavailable,
}

/// Oscillator shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waveform {
    Sine,
    Square,
    Sawtooth,
    Triangle,
}

/// One point of a stepped frequency sequence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FreqStep {
    /// Offset in seconds from tone start.
    pub at: f64,
    pub hz: f32,
}

/// Frequency over the lifetime of one tone.
#[derive(Debug, Clone, PartialEq)]
pub enum FrequencyCurve {
    Constant(f32),
    /// Piecewise-constant: each step holds from its offset until the next.
    /// Steps must be sorted by offset with the first at 0.
    Steps(Vec<FreqStep>),
    /// Linear glide from `from` to `to` over the first `over` seconds,
    /// holding `to` afterwards.
    Ramp { from: f32, to: f32, over: f64 },
}

impl FrequencyCurve {
    /// Frequency at `t` seconds after tone start.
    pub fn value_at(&self, t: f64) -> f32 {
        match self {
            FrequencyCurve::Constant(hz) => *hz,
            FrequencyCurve::Steps(steps) => {
                let mut hz = steps.first().map(|s| s.hz).unwrap_or(0.0);
                for step in steps {
                    if step.at <= t {
                        hz = step.hz;
                    } else {
                        break;
                    }
                }
                hz
            }
            FrequencyCurve::Ramp { from, to, over } => {
                if *over <= 0.0 || t >= *over {
                    *to
                } else if t <= 0.0 {
                    *from
                } else {
                    from + (to - from) * (t / over) as f32
                }
            }
        }
    }
}

/// Exponential gain sweep across a tone's duration.
///
/// The value moves exponentially from `start` to `end`, arriving exactly
/// when the tone ends. Feedback tones decay (start above end); the
/// near-silent unlock tone rises. Both endpoints are clamped away from
/// zero at construction since an exponential sweep cannot touch zero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GainEnvelope {
    start: f32,
    end: f32,
}

impl GainEnvelope {
    pub fn new(start: f32, end: f32) -> Self {
        GainEnvelope {
            start: start.max(MIN_GAIN),
            end: end.max(MIN_GAIN),
        }
    }

    pub fn start(&self) -> f32 {
        self.start
    }

    pub fn end(&self) -> f32 {
        self.end
    }

    /// Gain at `t` seconds into a tone of length `duration`.
    pub fn value_at(&self, t: f64, duration: f64) -> f32 {
        if duration <= 0.0 || t >= duration {
            return self.end;
        }
        if t <= 0.0 {
            return self.start;
        }
        let ratio = (self.end / self.start) as f64;
        self.start * ratio.powf(t / duration) as f32
    }
}

/// A fully resolved tone: what to play and when, on the context clock.
#[derive(Debug, Clone, PartialEq)]
pub struct TonePlan {
    /// Absolute start time in context-clock seconds. A start in the past
    /// plays immediately.
    pub start_at: f64,
    /// Seconds from start to self-disposal.
    pub duration: f64,
    pub waveform: Waveform,
    pub frequency: FrequencyCurve,
    pub gain: GainEnvelope,
}

/// Platform audio output abstraction.
///
/// Exactly one context exists per engine at a time. Every method is cheap
/// and non-blocking; resume in particular only issues a request, since
/// waiting for autoplay policy inside a gesture handler defeats the point.
pub trait PlaybackContext: Send + Sync {
    fn state(&self) -> ContextState;

    fn sample_rate(&self) -> u32;

    /// Seconds of audio rendered since construction. This is the clock
    /// tone start times are expressed in.
    fn current_time(&self) -> f64;

    /// Ask the platform to leave `Suspended`. Fire-and-forget: success
    /// means the request was issued, not that the context is running.
    fn request_resume(&self) -> Result<()>;

    /// Queue one tone voice. Fails against a closed context or a full
    /// command queue; failures never affect sibling tones.
    fn schedule_tone(&self, plan: TonePlan) -> Result<()>;

    /// Start looping `buffer` at `volume`, replacing any current loop.
    fn start_music(&self, buffer: Arc<MusicBuffer>, volume: f32) -> Result<()>;

    fn stop_music(&self) -> Result<()>;

    /// Adjust the volume of an already-playing loop.
    fn set_music_volume(&self, volume: f32) -> Result<()>;

    /// Tear down. Idempotent; everything scheduled dies with the context.
    fn close(&self) -> Result<()>;
}
