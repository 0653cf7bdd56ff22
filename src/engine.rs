//! High-level playback engine.
//!
//! [`AudioEngine`] is the one object hosts talk to: it owns the singleton
//! playback context (built lazily through an injected [`ContextProvider`]),
//! runs the resume dance that mobile autoplay policies require, maps
//! logical effects onto tone voices, and drives the background-music loop.
//!
//! Every failure in here is soft. Audio is an enhancement; the engine
//! converts errors into `None`/`false`/skipped tones plus diagnostics and
//! never panics past the construction boundary.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::context::{ContextState, PlaybackContext, ResumeOutcome};
use crate::diag::{DiagCategory, DiagLevel, DiagLog, DiagSnapshot};
use crate::effects::{effect_spec, unlock_tone, SoundEffect, ToneSpec};
use crate::error::Result;
use crate::music::{render_music_buffer, MusicBuffer};
use crate::scheduler::Scheduler;
use crate::settings::Settings;
use crate::unlock::{PlatformProfile, UnlockGesture};

/// Builds playback contexts on demand. The engine holds at most one open
/// context at a time; a fresh one is requested after `close()`.
pub trait ContextProvider: Send + Sync {
    fn open(&self, diag: Arc<DiagLog>) -> Result<Arc<dyn PlaybackContext>>;
}

/// Tunables for the resume dance and environment handling.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// What the runtime environment needs from the unlock sequence.
    pub profile: PlatformProfile,
    /// Verbose diagnostics from the start.
    pub debug: bool,
    /// How often the blocking path re-checks the context state.
    pub resume_poll: Duration,
    /// Longest a blocking resume attempt will wait for `Running`.
    pub resume_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            profile: PlatformProfile::generic(),
            debug: false,
            resume_poll: Duration::from_millis(10),
            resume_timeout: Duration::from_millis(500),
        }
    }
}

struct EngineInner {
    provider: Box<dyn ContextProvider>,
    settings: Settings,
    diag: Arc<DiagLog>,
    config: EngineConfig,
    context: Mutex<Option<Arc<dyn PlaybackContext>>>,
    /// Rendered loop cached per sample rate until teardown.
    music_cache: Mutex<Option<(u32, Arc<MusicBuffer>)>>,
    scheduler: Scheduler,
    /// True while an unlock-tone probe chain is pending.
    unlock_inflight: AtomicBool,
}

/// The playback service object. Cheap to clone; clones share one context,
/// one scheduler and one diagnostic log.
#[derive(Clone)]
pub struct AudioEngine {
    inner: Arc<EngineInner>,
}

impl AudioEngine {
    pub fn new(provider: impl ContextProvider + 'static, settings: Settings) -> Self {
        Self::with_config(provider, settings, EngineConfig::default())
    }

    pub fn with_config(
        provider: impl ContextProvider + 'static,
        settings: Settings,
        config: EngineConfig,
    ) -> Self {
        let diag = Arc::new(DiagLog::new(config.debug));
        if !config.profile.descriptor().is_empty() {
            diag.record_with_detail(
                DiagLevel::Info,
                DiagCategory::Diagnostic,
                "environment profile",
                config.profile.descriptor().to_string(),
            );
        }
        if config.profile.needs_unlock_tone() {
            diag.record(
                DiagLevel::Info,
                DiagCategory::Diagnostic,
                "platform needs an audible unlock tone",
            );
        }
        AudioEngine {
            inner: Arc::new(EngineInner {
                provider: Box::new(provider),
                settings,
                diag,
                config,
                context: Mutex::new(None),
                music_cache: Mutex::new(None),
                scheduler: Scheduler::new(),
                unlock_inflight: AtomicBool::new(false),
            }),
        }
    }

    /// Engine over the default CPAL output device.
    #[cfg(feature = "cpal_output")]
    pub fn default_output(settings: Settings) -> Self {
        Self::new(crate::device::CpalProvider, settings)
    }

    #[cfg(feature = "cpal_output")]
    pub fn default_output_with_config(settings: Settings, config: EngineConfig) -> Self {
        Self::with_config(crate::device::CpalProvider, settings, config)
    }

    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub fn is_sound_enabled(&self) -> bool {
        self.inner.settings.sound_enabled()
    }

    pub fn profile(&self) -> &PlatformProfile {
        &self.inner.config.profile
    }

    /// Shared diagnostic log, for hosts that wire their own reporting.
    pub fn diag(&self) -> &Arc<DiagLog> {
        &self.inner.diag
    }

    pub fn diagnostics(&self) -> DiagSnapshot {
        self.inner.diag.snapshot(self.state())
    }

    /// Engine-level context state; `Uninitialized` before first use.
    pub fn state(&self) -> ContextState {
        self.inner
            .current_context()
            .map(|ctx| ctx.state())
            .unwrap_or(ContextState::Uninitialized)
    }

    /// The singleton context, constructed on first call. `None` when the
    /// platform has no usable output; callers skip playback and move on.
    pub fn context(&self) -> Option<Arc<dyn PlaybackContext>> {
        self.inner.obtain_context()
    }

    /// Non-blocking resume for gesture handlers.
    ///
    /// Issues the resume request and returns optimistically; waiting for
    /// the platform would have to happen outside the synchronous handler
    /// that makes the request legal in the first place.
    pub fn ensure_running_sync(&self) -> ResumeOutcome {
        match self.inner.obtain_context() {
            Some(ctx) => self.inner.resume_sync(&ctx),
            None => ResumeOutcome::Unavailable,
        }
    }

    /// Resume and wait for confirmation.
    ///
    /// Polls the state after requesting the resume because some platforms
    /// report completion before the state flag updates. False is
    /// non-fatal: playback may still work, callers just lose certainty.
    pub fn ensure_running_blocking(&self) -> bool {
        let Some(ctx) = self.inner.obtain_context() else {
            self.inner.diag.record(
                DiagLevel::Warn,
                DiagCategory::Context,
                "cannot resume, no context available",
            );
            return false;
        };
        self.inner.wait_for_running(&ctx)
    }

    /// Feeds a user gesture to the unlock logic.
    ///
    /// Hosts forward every qualifying input event for the whole session; a
    /// resume that sticks on one platform version may need repeating on
    /// another. Gestures never construct a context, they only poke an
    /// existing suspended one.
    pub fn notice_gesture(&self, gesture: UnlockGesture) {
        self.inner.diag.record_gesture(gesture.label());
        let Some(ctx) = self.inner.current_context() else {
            return;
        };
        if ctx.state() != ContextState::Suspended {
            return;
        }
        match ctx.request_resume() {
            Ok(()) => self.inner.diag.record_with_detail(
                DiagLevel::Debug,
                DiagCategory::Context,
                "resume requested by gesture",
                gesture.label(),
            ),
            Err(e) => self.inner.diag.record_with_detail(
                DiagLevel::Warn,
                DiagCategory::Context,
                "gesture resume failed",
                e.to_string(),
            ),
        }
        if self.inner.config.profile.needs_unlock_tone() {
            self.inner.queue_unlock_probe();
        }
    }

    /// Force-initialize and best-effort resume, for app startup or route
    /// changes. True once a context exists and the resume request (if one
    /// was needed) went out.
    pub fn warm_up(&self) -> bool {
        let Some(ctx) = self.inner.obtain_context() else {
            return false;
        };
        if ctx.state() == ContextState::Suspended {
            if let Err(e) = ctx.request_resume() {
                self.inner.diag.record_with_detail(
                    DiagLevel::Warn,
                    DiagCategory::Context,
                    "warm-up resume failed",
                    e.to_string(),
                );
                return false;
            }
        }
        true
    }

    /// Plays a logical effect: immediate tones now, staggered tones via
    /// the scheduler. No-op when sound is disabled or no context exists.
    pub fn play_sound(&self, effect: SoundEffect) {
        if !self.inner.settings.sound_enabled() {
            return;
        }
        let Some(ctx) = self.inner.obtain_context() else {
            self.inner.diag.record_with_detail(
                DiagLevel::Warn,
                DiagCategory::Playback,
                "effect dropped, no context",
                effect.label(),
            );
            return;
        };
        // Best-effort: playback is attempted whatever the outcome, since
        // it may work even when the resume result is unknown.
        let _ = self.inner.resume_sync(&ctx);
        self.inner.diag.record_with_detail(
            DiagLevel::Debug,
            DiagCategory::Playback,
            "effect triggered",
            effect.label(),
        );

        for tone in &effect_spec(effect).tones {
            if tone.delay_ms == 0 {
                self.inner.schedule_tone_now(&ctx, tone, effect.label());
            } else {
                self.inner.schedule_tone_delayed(
                    tone.clone(),
                    effect.label(),
                    Duration::from_millis(tone.delay_ms),
                );
            }
        }
    }

    /// Starts (or restarts) the background loop. False when music is
    /// disabled, no context exists, or the buffer cannot be produced.
    pub fn start_music(&self) -> bool {
        if !self.inner.settings.music_enabled() {
            return false;
        }
        let Some(ctx) = self.inner.obtain_context() else {
            self.inner.diag.record(
                DiagLevel::Warn,
                DiagCategory::Playback,
                "music start failed, no context",
            );
            return false;
        };
        let _ = self.inner.resume_sync(&ctx);
        let Some(buffer) = self.inner.music_buffer_for(&ctx) else {
            return false;
        };
        match ctx.start_music(buffer, self.inner.settings.music_volume()) {
            Ok(()) => {
                self.inner.diag.record(
                    DiagLevel::Info,
                    DiagCategory::Playback,
                    "music loop started",
                );
                true
            }
            Err(e) => {
                self.inner.diag.record_with_detail(
                    DiagLevel::Error,
                    DiagCategory::Playback,
                    "music loop failed to start",
                    e.to_string(),
                );
                false
            }
        }
    }

    /// Stops the loop if one is playing. Never constructs a context.
    pub fn stop_music(&self) {
        let Some(ctx) = self.inner.current_context() else {
            return;
        };
        match ctx.stop_music() {
            Ok(()) => self.inner.diag.record(
                DiagLevel::Info,
                DiagCategory::Playback,
                "music loop stopped",
            ),
            Err(e) => self.inner.diag.record_with_detail(
                DiagLevel::Warn,
                DiagCategory::Playback,
                "music stop failed",
                e.to_string(),
            ),
        }
    }

    /// Updates the stored volume and applies it to a playing loop.
    pub fn set_music_volume(&self, volume: f32) {
        let volume = volume.clamp(0.0, 1.0);
        self.inner.settings.set_music_volume(volume);
        if let Some(ctx) = self.inner.current_context() {
            if let Err(e) = ctx.set_music_volume(volume) {
                self.inner.diag.record_with_detail(
                    DiagLevel::Warn,
                    DiagCategory::Playback,
                    "volume change failed",
                    e.to_string(),
                );
            }
        }
    }

    /// Tears down the context and cached music. The next playback call
    /// builds everything from scratch.
    pub fn close(&self) {
        let ctx = self.inner.context.lock().take();
        if let Some(ctx) = ctx {
            if let Err(e) = ctx.close() {
                self.inner.diag.record_with_detail(
                    DiagLevel::Warn,
                    DiagCategory::Context,
                    "close reported an error",
                    e.to_string(),
                );
            }
            self.inner.diag.record(
                DiagLevel::Info,
                DiagCategory::Context,
                "playback context closed",
            );
        }
        self.inner.music_cache.lock().take();
    }
}

impl EngineInner {
    fn current_context(&self) -> Option<Arc<dyn PlaybackContext>> {
        self.context.lock().as_ref().cloned()
    }

    fn obtain_context(&self) -> Option<Arc<dyn PlaybackContext>> {
        let mut slot = self.context.lock();
        if let Some(ctx) = slot.as_ref() {
            if ctx.state() != ContextState::Closed {
                return Some(ctx.clone());
            }
            // Closed out from under us; rebuild below.
            slot.take();
        }
        match self.provider.open(self.diag.clone()) {
            Ok(ctx) => {
                *slot = Some(ctx.clone());
                Some(ctx)
            }
            Err(e) => {
                self.diag.record_with_detail(
                    DiagLevel::Error,
                    DiagCategory::Context,
                    "no playback context available",
                    e.to_string(),
                );
                None
            }
        }
    }

    fn resume_sync(&self, ctx: &Arc<dyn PlaybackContext>) -> ResumeOutcome {
        match ctx.state() {
            ContextState::Running => ResumeOutcome::AlreadyRunning,
            ContextState::Closed => ResumeOutcome::Unavailable,
            _ => {
                match ctx.request_resume() {
                    Ok(()) => self.diag.record(
                        DiagLevel::Debug,
                        DiagCategory::Context,
                        "resume requested",
                    ),
                    Err(e) => self.diag.record_with_detail(
                        DiagLevel::Warn,
                        DiagCategory::Context,
                        "resume request failed",
                        e.to_string(),
                    ),
                }
                ResumeOutcome::ResumeRequested
            }
        }
    }

    /// Resume and poll until running or the timeout lapses.
    fn wait_for_running(&self, ctx: &Arc<dyn PlaybackContext>) -> bool {
        let initial = ctx.state();
        match initial {
            ContextState::Running => {
                self.diag.record(
                    DiagLevel::Success,
                    DiagCategory::Context,
                    "context already running",
                );
                return true;
            }
            ContextState::Closed => return false,
            _ => {}
        }
        self.diag.record_with_detail(
            DiagLevel::Info,
            DiagCategory::Context,
            "attempting context resume",
            initial.label(),
        );
        if let Err(e) = ctx.request_resume() {
            self.diag.record_with_detail(
                DiagLevel::Error,
                DiagCategory::Context,
                "resume request failed",
                e.to_string(),
            );
            return false;
        }
        let start = Instant::now();
        let mut checks = 0u32;
        loop {
            if ctx.state() == ContextState::Running {
                self.diag.record(
                    DiagLevel::Success,
                    DiagCategory::State,
                    format!(
                        "context running after {}ms ({checks} checks)",
                        start.elapsed().as_millis()
                    ),
                );
                return true;
            }
            if start.elapsed() >= self.config.resume_timeout {
                self.diag.record_with_detail(
                    DiagLevel::Warn,
                    DiagCategory::State,
                    format!("resume poll timed out after {checks} checks"),
                    ctx.state().label(),
                );
                return false;
            }
            std::thread::sleep(self.config.resume_poll);
            checks += 1;
        }
    }

    fn schedule_tone_now(
        &self,
        ctx: &Arc<dyn PlaybackContext>,
        tone: &ToneSpec,
        label: &'static str,
    ) {
        let plan = tone.plan(ctx.current_time());
        if let Err(e) = ctx.schedule_tone(plan) {
            self.diag.record_with_detail(
                DiagLevel::Error,
                DiagCategory::Playback,
                format!("tone failed for {label}"),
                e.to_string(),
            );
        }
    }

    fn schedule_tone_delayed(
        self: &Arc<Self>,
        tone: ToneSpec,
        label: &'static str,
        delay: Duration,
    ) {
        // Tasks hold the engine weakly: a pending tone must not keep the
        // engine (and the worker it fires on) alive past its last handle.
        let inner = Arc::downgrade(self);
        let queued = self.scheduler.schedule_in(delay, move || {
            let Some(inner) = inner.upgrade() else {
                return;
            };
            // The delay can outlive the running state; re-confirm before
            // allocating a voice, and skip rather than retry.
            let Some(ctx) = inner.current_context() else {
                inner.diag.record_with_detail(
                    DiagLevel::Debug,
                    DiagCategory::Playback,
                    format!("delayed tone skipped for {label}"),
                    "context gone",
                );
                return;
            };
            if !inner.wait_for_running(&ctx) {
                inner.diag.record_with_detail(
                    DiagLevel::Debug,
                    DiagCategory::Playback,
                    format!("delayed tone skipped for {label}"),
                    "context not running",
                );
                return;
            }
            inner.schedule_tone_now(&ctx, &tone, label);
        });
        if let Err(e) = queued {
            self.diag.record_with_detail(
                DiagLevel::Error,
                DiagCategory::Playback,
                format!("could not queue delayed tone for {label}"),
                e.to_string(),
            );
        }
    }

    /// Starts the near-silent unlock-tone chain: short probes re-check the
    /// state until the resume lands, then one inaudible tone completes the
    /// unlock. One chain at a time.
    fn queue_unlock_probe(self: &Arc<Self>) {
        if self.unlock_inflight.swap(true, Ordering::SeqCst) {
            return;
        }
        let poll_ms = self.config.resume_poll.as_millis().max(1);
        let attempts = (self.config.resume_timeout.as_millis() / poll_ms).max(1) as u32;
        unlock_probe_step(self, attempts);
    }

    fn music_buffer_for(&self, ctx: &Arc<dyn PlaybackContext>) -> Option<Arc<MusicBuffer>> {
        let rate = ctx.sample_rate();
        let mut cache = self.music_cache.lock();
        if let Some((cached_rate, buffer)) = cache.as_ref() {
            if *cached_rate == rate {
                return Some(buffer.clone());
            }
        }
        match render_music_buffer(rate) {
            Ok(buffer) => {
                let buffer = Arc::new(buffer);
                *cache = Some((rate, buffer.clone()));
                self.diag.record_with_detail(
                    DiagLevel::Info,
                    DiagCategory::Playback,
                    "music buffer rendered",
                    format!("{} frames at {} Hz", buffer.frames(), buffer.sample_rate()),
                );
                Some(buffer)
            }
            Err(e) => {
                self.diag.record_with_detail(
                    DiagLevel::Error,
                    DiagCategory::Playback,
                    "music buffer construction failed",
                    e.to_string(),
                );
                None
            }
        }
    }
}

fn unlock_probe_step(inner: &Arc<EngineInner>, attempts_left: u32) {
    let delay = inner.config.resume_poll;
    // Probe tasks hold the engine weakly; the chain dies with it.
    let weak: Weak<EngineInner> = Arc::downgrade(inner);
    let queued = inner.scheduler.schedule_in(delay, move || {
        let Some(task_inner) = weak.upgrade() else {
            return;
        };
        let Some(ctx) = task_inner.current_context() else {
            task_inner.unlock_inflight.store(false, Ordering::SeqCst);
            return;
        };
        match ctx.state() {
            ContextState::Running => {
                let plan = unlock_tone().plan(ctx.current_time());
                match ctx.schedule_tone(plan) {
                    Ok(()) => task_inner.diag.record(
                        DiagLevel::Debug,
                        DiagCategory::Playback,
                        "unlock tone scheduled",
                    ),
                    Err(e) => task_inner.diag.record_with_detail(
                        DiagLevel::Warn,
                        DiagCategory::Playback,
                        "unlock tone failed",
                        e.to_string(),
                    ),
                }
                task_inner.unlock_inflight.store(false, Ordering::SeqCst);
            }
            ContextState::Suspended if attempts_left > 1 => {
                unlock_probe_step(&task_inner, attempts_left - 1);
            }
            _ => {
                task_inner.diag.record(
                    DiagLevel::Debug,
                    DiagCategory::Playback,
                    "unlock tone skipped, context never reached running",
                );
                task_inner.unlock_inflight.store(false, Ordering::SeqCst);
            }
        }
    });
    if queued.is_err() {
        inner.unlock_inflight.store(false, Ordering::SeqCst);
    }
}
