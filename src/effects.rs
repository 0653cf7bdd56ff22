//! Feedback-effect catalog.
//!
//! Each logical effect maps to one or more tone specs: an oscillator shape,
//! a frequency curve, an exponential gain sweep and a schedule delay. The
//! numbers are configuration data (tuned by ear for a children's game), not
//! algorithm; the registry is built once and shared.

use hashbrown::HashMap;
use std::sync::OnceLock;

use crate::context::{FreqStep, FrequencyCurve, GainEnvelope, TonePlan, Waveform};

/// Equal-tempered pitches used by the effect and music tables, in Hz.
pub mod pitch {
    pub const E3: f32 = 164.81;
    pub const G3: f32 = 196.00;
    pub const A3: f32 = 220.00;
    pub const C5: f32 = 523.25;
    pub const D5: f32 = 587.33;
    pub const E5: f32 = 659.25;
    pub const F5: f32 = 698.46;
    pub const G5: f32 = 783.99;
    pub const A5: f32 = 880.00;
    pub const B5: f32 = 987.77;
    pub const C6: f32 = 1046.50;
}

/// Logical feedback sounds the game can trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SoundEffect {
    /// Rising three-chime acknowledgement.
    Correct,
    /// Low descending buzz.
    Wrong,
    /// Four-note ascending fanfare.
    Win,
    /// Short tick for UI taps.
    Click,
}

impl SoundEffect {
    pub const ALL: [SoundEffect; 4] = [
        SoundEffect::Correct,
        SoundEffect::Wrong,
        SoundEffect::Win,
        SoundEffect::Click,
    ];

    /// Stable lowercase name used in diagnostics.
    pub fn label(self) -> &'static str {
        match self {
            SoundEffect::Correct => "correct",
            SoundEffect::Wrong => "wrong",
            SoundEffect::Win => "win",
            SoundEffect::Click => "click",
        }
    }
}

/// Configuration form of one tone, before a start time is known.
#[derive(Debug, Clone, PartialEq)]
pub struct ToneSpec {
    /// Milliseconds after the effect trigger at which this tone starts.
    pub delay_ms: u64,
    /// Seconds from start to self-disposal.
    pub duration: f64,
    pub waveform: Waveform,
    pub frequency: FrequencyCurve,
    pub gain: GainEnvelope,
}

impl ToneSpec {
    /// Resolve into a runtime plan starting at `start_at` context seconds.
    pub fn plan(&self, start_at: f64) -> TonePlan {
        TonePlan {
            start_at,
            duration: self.duration,
            waveform: self.waveform,
            frequency: self.frequency.clone(),
            gain: self.gain,
        }
    }
}

/// All tones of one logical effect.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectSpec {
    pub tones: Vec<ToneSpec>,
}

fn build_registry() -> HashMap<SoundEffect, EffectSpec> {
    use pitch::*;

    let mut map = HashMap::new();

    // Three chimes, the second and third started on their own delays so the
    // run stays lively even when the first tone's tail overlaps.
    map.insert(
        SoundEffect::Correct,
        EffectSpec {
            tones: vec![
                ToneSpec {
                    delay_ms: 0,
                    duration: 0.4,
                    waveform: Waveform::Sine,
                    frequency: FrequencyCurve::Steps(vec![
                        FreqStep { at: 0.0, hz: C5 },
                        FreqStep { at: 0.1, hz: E5 },
                        FreqStep { at: 0.2, hz: G5 },
                    ]),
                    gain: GainEnvelope::new(0.3, 0.01),
                },
                ToneSpec {
                    delay_ms: 150,
                    duration: 0.3,
                    waveform: Waveform::Sine,
                    frequency: FrequencyCurve::Steps(vec![
                        FreqStep { at: 0.0, hz: G5 },
                        FreqStep { at: 0.1, hz: B5 },
                    ]),
                    gain: GainEnvelope::new(0.3, 0.01),
                },
                ToneSpec {
                    delay_ms: 300,
                    duration: 0.4,
                    waveform: Waveform::Sine,
                    frequency: FrequencyCurve::Constant(C6),
                    gain: GainEnvelope::new(0.3, 0.01),
                },
            ],
        },
    );

    map.insert(
        SoundEffect::Wrong,
        EffectSpec {
            tones: vec![ToneSpec {
                delay_ms: 0,
                duration: 0.4,
                waveform: Waveform::Sawtooth,
                frequency: FrequencyCurve::Ramp {
                    from: 200.0,
                    to: 100.0,
                    over: 0.3,
                },
                gain: GainEnvelope::new(0.2, 0.01),
            }],
        },
    );

    // C5 E5 G5 C6, one note every 150 ms.
    let win_notes = [C5, E5, G5, C6];
    map.insert(
        SoundEffect::Win,
        EffectSpec {
            tones: win_notes
                .iter()
                .enumerate()
                .map(|(i, &hz)| ToneSpec {
                    delay_ms: i as u64 * 150,
                    duration: 0.15,
                    waveform: Waveform::Sine,
                    frequency: FrequencyCurve::Constant(hz),
                    gain: GainEnvelope::new(0.25, 0.01),
                })
                .collect(),
        },
    );

    map.insert(
        SoundEffect::Click,
        EffectSpec {
            tones: vec![ToneSpec {
                delay_ms: 0,
                duration: 0.05,
                waveform: Waveform::Sine,
                frequency: FrequencyCurve::Constant(800.0),
                gain: GainEnvelope::new(0.1, 0.01),
            }],
        },
    );

    map
}

/// Tone table for `effect`.
pub fn effect_spec(effect: SoundEffect) -> &'static EffectSpec {
    static REGISTRY: OnceLock<HashMap<SoundEffect, EffectSpec>> = OnceLock::new();
    &REGISTRY.get_or_init(build_registry)[&effect]
}

/// Near-silent tone that completes the unlock on platforms that stay muted
/// until something audible actually plays. Sweeps up from the gain floor
/// over 10 ms; the frequency only matters insofar as a voice gets rendered.
pub fn unlock_tone() -> ToneSpec {
    ToneSpec {
        delay_ms: 0,
        duration: 0.01,
        waveform: Waveform::Sine,
        frequency: FrequencyCurve::Constant(800.0),
        gain: GainEnvelope::new(0.0001, 0.01),
    }
}
