//! Shared playback preferences.
//!
//! The host application owns persistence; the engine only reads these flags,
//! and it re-reads them before every playback decision rather than caching.
//! The handle is a thin `Arc` of atomics so UI threads, game logic and the
//! engine can share one instance without locking.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

#[derive(Debug)]
struct Flags {
    sound_enabled: AtomicBool,
    speech_enabled: AtomicBool,
    music_enabled: AtomicBool,
    /// Linear music volume in [0, 1], stored as f32 bits.
    music_volume: AtomicU32,
}

/// Cheaply cloneable handle to the shared preference flags.
#[derive(Debug, Clone)]
pub struct Settings {
    flags: Arc<Flags>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            flags: Arc::new(Flags {
                sound_enabled: AtomicBool::new(true),
                speech_enabled: AtomicBool::new(true),
                music_enabled: AtomicBool::new(true),
                music_volume: AtomicU32::new(0.5f32.to_bits()),
            }),
        }
    }
}

impl Settings {
    /// New handle with everything enabled and music volume at 0.5.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether feedback tones may play.
    pub fn sound_enabled(&self) -> bool {
        self.flags.sound_enabled.load(Ordering::Relaxed)
    }

    pub fn set_sound_enabled(&self, on: bool) {
        self.flags.sound_enabled.store(on, Ordering::Relaxed);
    }

    pub fn toggle_sound(&self) -> bool {
        !self.flags.sound_enabled.fetch_xor(true, Ordering::Relaxed)
    }

    /// Whether spoken prompts may play. The playback engine itself never
    /// reads this; it is carried for the host's speech layer.
    pub fn speech_enabled(&self) -> bool {
        self.flags.speech_enabled.load(Ordering::Relaxed)
    }

    pub fn set_speech_enabled(&self, on: bool) {
        self.flags.speech_enabled.store(on, Ordering::Relaxed);
    }

    pub fn toggle_speech(&self) -> bool {
        !self.flags.speech_enabled.fetch_xor(true, Ordering::Relaxed)
    }

    /// Whether the background loop may play.
    pub fn music_enabled(&self) -> bool {
        self.flags.music_enabled.load(Ordering::Relaxed)
    }

    pub fn set_music_enabled(&self, on: bool) {
        self.flags.music_enabled.store(on, Ordering::Relaxed);
    }

    /// Linear music volume in [0, 1].
    pub fn music_volume(&self) -> f32 {
        f32::from_bits(self.flags.music_volume.load(Ordering::Relaxed))
    }

    /// Stores `volume` clamped to [0, 1].
    pub fn set_music_volume(&self, volume: f32) {
        let v = volume.clamp(0.0, 1.0);
        self.flags.music_volume.store(v.to_bits(), Ordering::Relaxed);
    }
}
