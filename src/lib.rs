//! plink - gesture-unlocked tone, jingle and loop playback for game feedback
//!
//! Design principles:
//! - One lazily-built playback context per engine, rebuilt after close
//! - Resume is requested on gestures and confirmed by polling, never assumed
//! - Effects are data (waveform, frequency curve, gain envelope); mixing is code
//! - The output callback owns every voice; control talks to it over a ring buffer
//! - Failures degrade to silence plus a diagnostic entry, never a panic

mod context;
mod diag;
mod effects;
mod engine;
mod error;
mod mixer;
mod music;
mod scheduler;
mod settings;
mod unlock;

#[cfg(feature = "cpal_output")]
mod device;

pub use context::{
    ContextState, FreqStep, FrequencyCurve, GainEnvelope, PlaybackContext, ResumeOutcome,
    TonePlan, Waveform, MIN_GAIN,
};
pub use diag::{
    AudioEvent, DiagCategory, DiagLevel, DiagLog, DiagSnapshot, InteractionRecord, MAX_ENTRIES,
};
pub use effects::{effect_spec, pitch, unlock_tone, EffectSpec, SoundEffect, ToneSpec};
pub use engine::{AudioEngine, ContextProvider, EngineConfig};
pub use error::{AudioError, Result};
pub use mixer::{Mixer, MixerCommand};
pub use music::{render_music_buffer, MusicBuffer, FALLBACK_SAMPLE_RATE, MUSIC_DURATION_SECS};
pub use scheduler::Scheduler;
pub use settings::Settings;
pub use unlock::{PlatformProfile, UnlockGesture};

#[cfg(feature = "cpal_output")]
pub use device::{CpalContext, CpalProvider};
