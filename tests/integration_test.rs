use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::sleep;
use std::time::{Duration, Instant};

use itertools::Itertools;
use parking_lot::Mutex;

use plink::{
    render_music_buffer, AudioEngine, AudioError, ContextProvider, ContextState, DiagLevel,
    DiagLog, EngineConfig, FrequencyCurve, MusicBuffer, PlatformProfile, PlaybackContext,
    ResumeOutcome, Settings, SoundEffect, TonePlan, UnlockGesture,
};

const WECHAT_UA: &str =
    "Mozilla/5.0 (iPhone; CPU iPhone OS 16_6 like Mac OS X) MicroMessenger/8.0.49";

/// How a mock context responds to resume requests.
#[derive(Debug, Clone, Copy)]
enum ResumeBehavior {
    /// The request flips the state straight to running.
    Immediate,
    /// The state keeps reading suspended for this many polls after the
    /// request, mimicking platforms where the flag lags the transition.
    AfterPolls(usize),
    /// Requests are accepted and nothing ever happens.
    Stuck,
}

#[derive(Clone)]
struct RecordedTone {
    plan: TonePlan,
    at: Instant,
}

#[derive(Debug, Clone, PartialEq)]
enum MusicEvent {
    Started { frames: usize, rate: u32, volume: f32 },
    Stopped,
    Volume(f32),
}

struct MockContext {
    sample_rate: u32,
    epoch: Instant,
    state: Mutex<ContextState>,
    behavior: ResumeBehavior,
    resume_requests: AtomicUsize,
    polls_after_resume: AtomicUsize,
    tones: Mutex<Vec<RecordedTone>>,
    music_events: Mutex<Vec<MusicEvent>>,
}

impl MockContext {
    fn new(initial: ContextState, behavior: ResumeBehavior) -> Self {
        MockContext {
            sample_rate: 44_100,
            epoch: Instant::now(),
            state: Mutex::new(initial),
            behavior,
            resume_requests: AtomicUsize::new(0),
            polls_after_resume: AtomicUsize::new(0),
            tones: Mutex::new(Vec::new()),
            music_events: Mutex::new(Vec::new()),
        }
    }

    fn tones(&self) -> Vec<RecordedTone> {
        self.tones.lock().clone()
    }

    fn music_events(&self) -> Vec<MusicEvent> {
        self.music_events.lock().clone()
    }

    fn resume_requests(&self) -> usize {
        self.resume_requests.load(Ordering::SeqCst)
    }

    fn force_state(&self, state: ContextState) {
        *self.state.lock() = state;
        self.polls_after_resume.store(0, Ordering::SeqCst);
    }
}

impl PlaybackContext for MockContext {
    fn state(&self) -> ContextState {
        let current = *self.state.lock();
        if current == ContextState::Suspended && self.resume_requests() > 0 {
            if let ResumeBehavior::AfterPolls(n) = self.behavior {
                let seen = self.polls_after_resume.fetch_add(1, Ordering::SeqCst) + 1;
                if seen >= n {
                    *self.state.lock() = ContextState::Running;
                    return ContextState::Running;
                }
            }
        }
        current
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn current_time(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    fn request_resume(&self) -> plink::Result<()> {
        self.resume_requests.fetch_add(1, Ordering::SeqCst);
        if matches!(self.behavior, ResumeBehavior::Immediate) {
            let mut state = self.state.lock();
            if *state == ContextState::Suspended {
                *state = ContextState::Running;
            }
        }
        Ok(())
    }

    fn schedule_tone(&self, plan: TonePlan) -> plink::Result<()> {
        self.tones.lock().push(RecordedTone {
            plan,
            at: Instant::now(),
        });
        Ok(())
    }

    fn start_music(&self, buffer: Arc<MusicBuffer>, volume: f32) -> plink::Result<()> {
        self.music_events.lock().push(MusicEvent::Started {
            frames: buffer.frames(),
            rate: buffer.sample_rate(),
            volume,
        });
        Ok(())
    }

    fn stop_music(&self) -> plink::Result<()> {
        self.music_events.lock().push(MusicEvent::Stopped);
        Ok(())
    }

    fn set_music_volume(&self, volume: f32) -> plink::Result<()> {
        self.music_events.lock().push(MusicEvent::Volume(volume));
        Ok(())
    }

    fn close(&self) -> plink::Result<()> {
        *self.state.lock() = ContextState::Closed;
        Ok(())
    }
}

#[derive(Clone)]
struct MockProvider {
    initial: ContextState,
    behavior: ResumeBehavior,
    fail: bool,
    opened: Arc<AtomicUsize>,
    last: Arc<Mutex<Option<Arc<MockContext>>>>,
}

impl MockProvider {
    fn new(initial: ContextState, behavior: ResumeBehavior) -> Self {
        MockProvider {
            initial,
            behavior,
            fail: false,
            opened: Arc::new(AtomicUsize::new(0)),
            last: Arc::new(Mutex::new(None)),
        }
    }

    fn failing() -> Self {
        let mut p = Self::new(ContextState::Suspended, ResumeBehavior::Stuck);
        p.fail = true;
        p
    }

    fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    fn ctx(&self) -> Arc<MockContext> {
        self.last.lock().clone().expect("no context was opened")
    }
}

impl ContextProvider for MockProvider {
    fn open(&self, _diag: Arc<DiagLog>) -> plink::Result<Arc<dyn PlaybackContext>> {
        if self.fail {
            return Err(AudioError::PlatformUnsupported);
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        let mock = Arc::new(MockContext::new(self.initial, self.behavior));
        *self.last.lock() = Some(mock.clone());
        let ctx: Arc<dyn PlaybackContext> = mock;
        Ok(ctx)
    }
}

/// Short poll budget so stuck-context tests stay fast.
fn fast_config() -> EngineConfig {
    EngineConfig {
        resume_poll: Duration::from_millis(5),
        resume_timeout: Duration::from_millis(80),
        ..EngineConfig::default()
    }
}

fn engine_with(provider: &MockProvider) -> AudioEngine {
    AudioEngine::with_config(provider.clone(), Settings::new(), fast_config())
}

fn wait_until(budget: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + budget;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        sleep(Duration::from_millis(5));
    }
    done()
}

#[test]
/// With sound disabled no tone reaches the context; the context is not
/// even constructed.
fn disabled_sound_schedules_nothing() {
    let provider = MockProvider::new(ContextState::Running, ResumeBehavior::Immediate);
    let engine = engine_with(&provider);
    engine.settings().set_sound_enabled(false);

    for effect in SoundEffect::ALL {
        engine.play_sound(effect);
    }
    sleep(Duration::from_millis(400));

    assert_eq!(provider.opened(), 0);
}

#[test]
fn running_context_reports_already_running() {
    let provider = MockProvider::new(ContextState::Running, ResumeBehavior::Immediate);
    let engine = engine_with(&provider);

    assert_eq!(engine.ensure_running_sync(), ResumeOutcome::AlreadyRunning);
    assert_eq!(provider.ctx().resume_requests(), 0);
}

#[test]
fn suspended_context_gets_a_resume_request() {
    let provider = MockProvider::new(ContextState::Suspended, ResumeBehavior::Stuck);
    let engine = engine_with(&provider);

    assert_eq!(engine.ensure_running_sync(), ResumeOutcome::ResumeRequested);
    assert_eq!(provider.ctx().resume_requests(), 1);
}

#[test]
/// A context that never leaves suspended makes the blocking path burn its
/// whole poll budget before giving up.
fn blocking_resume_times_out_against_stuck_context() {
    let provider = MockProvider::new(ContextState::Suspended, ResumeBehavior::Stuck);
    let engine = engine_with(&provider);

    let started = Instant::now();
    assert!(!engine.ensure_running_blocking());
    assert!(started.elapsed() >= Duration::from_millis(80));
    assert!(provider.ctx().resume_requests() >= 1);
}

#[test]
/// Some platforms complete the resume before the state flag updates; the
/// blocking path polls through the lag instead of trusting the first read.
fn blocking_resume_confirms_after_state_lag() {
    let provider = MockProvider::new(ContextState::Suspended, ResumeBehavior::AfterPolls(3));
    let engine = engine_with(&provider);

    assert!(engine.ensure_running_blocking());
    assert_eq!(engine.state(), ContextState::Running);
}

#[test]
fn music_rendering_is_deterministic() {
    let a = render_music_buffer(44_100).unwrap();
    let b = render_music_buffer(44_100).unwrap();
    assert!(a.left().iter().zip_eq(b.left()).all(|(x, y)| x == y));
    assert!(a.right().iter().zip_eq(b.right()).all(|(x, y)| x == y));
}

#[test]
/// The success chord is one immediate tone plus two staggered ones.
fn correct_effect_lands_three_tones_on_time() {
    let provider = MockProvider::new(ContextState::Running, ResumeBehavior::Immediate);
    let engine = engine_with(&provider);

    let trigger = Instant::now();
    engine.play_sound(SoundEffect::Correct);
    let ctx = provider.ctx();
    assert!(wait_until(Duration::from_secs(2), || ctx.tones().len() == 3));

    let mut tones = ctx.tones();
    tones.sort_by_key(|t| t.at);
    let delays: Vec<Duration> = tones.iter().map(|t| t.at - trigger).collect();

    assert!(delays[0] < Duration::from_millis(100), "first {:?}", delays[0]);
    assert!(
        delays[1] >= Duration::from_millis(140) && delays[1] <= Duration::from_millis(600),
        "second {:?}",
        delays[1]
    );
    assert!(
        delays[2] >= Duration::from_millis(290) && delays[2] <= Duration::from_millis(750),
        "third {:?}",
        delays[2]
    );

    // The staggered tones carry their own pitch material.
    assert!(matches!(tones[0].plan.frequency, FrequencyCurve::Steps(_)));
    assert!(matches!(tones[2].plan.frequency, FrequencyCurve::Constant(hz) if hz > 1000.0));
}

#[test]
/// Closing tears the context down; the next playback call builds a new one.
fn closing_rebuilds_on_next_use() {
    let provider = MockProvider::new(ContextState::Running, ResumeBehavior::Immediate);
    let engine = engine_with(&provider);

    engine.play_sound(SoundEffect::Click);
    let first = provider.ctx();
    assert!(wait_until(Duration::from_secs(1), || first.tones().len() == 1));

    engine.close();
    assert_eq!(*first.state.lock(), ContextState::Closed);
    assert_eq!(engine.state(), ContextState::Uninitialized);

    engine.play_sound(SoundEffect::Click);
    assert_eq!(provider.opened(), 2);
    let second = provider.ctx();
    assert!(wait_until(Duration::from_secs(1), || second.tones().len() == 1));
}

#[test]
fn click_is_a_single_short_tick() {
    let provider = MockProvider::new(ContextState::Running, ResumeBehavior::Immediate);
    let engine = engine_with(&provider);

    engine.play_sound(SoundEffect::Click);
    let ctx = provider.ctx();
    assert!(wait_until(Duration::from_secs(1), || !ctx.tones().is_empty()));

    let tones = ctx.tones();
    assert_eq!(tones.len(), 1);
    let plan = &tones[0].plan;
    assert_eq!(plan.duration, 0.05);
    assert!(matches!(plan.frequency, FrequencyCurve::Constant(hz) if hz == 800.0));
    assert_eq!(plan.gain.start(), 0.1);
    assert_eq!(plan.gain.end(), 0.01);
    // Scheduled against the context clock, at (or just after) "now".
    assert!(plan.start_at >= 0.0 && plan.start_at < 1.0);
}

#[test]
/// No output device: every surface degrades to a no-op instead of panicking.
fn unavailable_platform_degrades_to_silence() {
    let provider = MockProvider::failing();
    let engine = engine_with(&provider);

    assert_eq!(engine.ensure_running_sync(), ResumeOutcome::Unavailable);
    assert!(!engine.ensure_running_blocking());
    assert!(!engine.warm_up());
    assert!(!engine.start_music());
    engine.play_sound(SoundEffect::Win);
    engine.stop_music();
    engine.close();

    assert_eq!(engine.state(), ContextState::Uninitialized);
    let snapshot = engine.diagnostics();
    assert!(snapshot
        .recent
        .iter()
        .any(|e| e.level == DiagLevel::Error));
}

#[test]
fn gestures_resume_and_are_recorded() {
    let provider = MockProvider::new(ContextState::Suspended, ResumeBehavior::Immediate);
    let engine = engine_with(&provider);
    assert!(engine.warm_up());
    let ctx = provider.ctx();
    // warm_up already issued one request while suspended
    assert_eq!(ctx.resume_requests(), 1);
    ctx.force_state(ContextState::Suspended);

    engine.notice_gesture(UnlockGesture::PointerDown);
    assert_eq!(ctx.resume_requests(), 2);
    assert_eq!(engine.state(), ContextState::Running);

    // Further gestures are recorded but trigger no more requests.
    engine.notice_gesture(UnlockGesture::Click);
    engine.notice_gesture(UnlockGesture::KeyUp);
    assert_eq!(ctx.resume_requests(), 2);

    let interactions = engine.diagnostics().interactions;
    assert!(interactions.detected);
    assert_eq!(interactions.count, 3);
}

#[test]
/// Profiles that flag the embedded-browser quirk get one near-silent tone
/// pushed through the freshly resumed context to finish the unlock.
fn wechat_profile_plays_the_unlock_tone() {
    let provider = MockProvider::new(ContextState::Suspended, ResumeBehavior::AfterPolls(2));
    let config = EngineConfig {
        profile: PlatformProfile::from_descriptor(WECHAT_UA),
        ..fast_config()
    };
    let engine = AudioEngine::with_config(provider.clone(), Settings::new(), config);

    assert!(engine.warm_up());
    let ctx = provider.ctx();
    engine.notice_gesture(UnlockGesture::TouchStart);

    assert!(wait_until(Duration::from_secs(2), || !ctx.tones().is_empty()));
    let tones = ctx.tones();
    assert_eq!(tones.len(), 1);
    let plan = &tones[0].plan;
    assert_eq!(plan.duration, 0.01);
    assert!(matches!(plan.frequency, FrequencyCurve::Constant(hz) if hz == 800.0));
    // Rises out of near-silence; loud enough to unlock, too quiet to hear.
    assert!(plan.gain.start() < plan.gain.end());
    assert!(plan.gain.end() <= 0.01);
}

#[test]
fn generic_profile_skips_the_unlock_tone() {
    let provider = MockProvider::new(ContextState::Suspended, ResumeBehavior::Immediate);
    let engine = engine_with(&provider);

    assert!(engine.warm_up());
    let ctx = provider.ctx();
    engine.notice_gesture(UnlockGesture::TouchStart);
    sleep(Duration::from_millis(300));

    assert!(ctx.tones().is_empty());
}

#[test]
fn warm_up_builds_and_requests_resume() {
    let provider = MockProvider::new(ContextState::Suspended, ResumeBehavior::Stuck);
    let engine = engine_with(&provider);

    assert!(engine.warm_up());
    assert_eq!(provider.opened(), 1);
    assert_eq!(provider.ctx().resume_requests(), 1);

    // Idempotent; the context is reused.
    assert!(engine.warm_up());
    assert_eq!(provider.opened(), 1);
}

#[test]
fn music_start_stop_and_volume_flow_through() {
    let provider = MockProvider::new(ContextState::Running, ResumeBehavior::Immediate);
    let engine = engine_with(&provider);

    assert!(engine.start_music());
    engine.set_music_volume(0.2);
    engine.stop_music();

    let events = provider.ctx().music_events();
    assert_eq!(
        events,
        vec![
            MusicEvent::Started {
                frames: 352_800,
                rate: 44_100,
                volume: 0.5
            },
            MusicEvent::Volume(0.2),
            MusicEvent::Stopped,
        ]
    );
}

#[test]
fn disabled_music_never_starts() {
    let provider = MockProvider::new(ContextState::Running, ResumeBehavior::Immediate);
    let engine = engine_with(&provider);
    engine.settings().set_music_enabled(false);

    assert!(!engine.start_music());
    assert_eq!(provider.opened(), 0);
}

#[test]
/// A delayed tone re-checks the context at fire time and is dropped when
/// the resume no longer holds, instead of retrying or queueing up.
fn delayed_tones_skip_when_context_stalls() {
    let provider = MockProvider::new(ContextState::Running, ResumeBehavior::Stuck);
    let engine = engine_with(&provider);

    engine.play_sound(SoundEffect::Correct);
    let ctx = provider.ctx();
    assert!(wait_until(Duration::from_secs(1), || ctx.tones().len() == 1));
    ctx.force_state(ContextState::Suspended);

    sleep(Duration::from_millis(700));
    assert_eq!(ctx.tones().len(), 1);

    let snapshot = engine.diagnostics();
    assert!(snapshot
        .recent
        .iter()
        .any(|e| e.message.contains("delayed tone skipped")));
}

#[test]
/// Dropping the last engine handle cancels staggered tones cleanly instead
/// of letting them fire against a world that is going away.
fn dropping_the_engine_discards_pending_tones() {
    let provider = MockProvider::new(ContextState::Running, ResumeBehavior::Immediate);
    let engine = engine_with(&provider);

    engine.play_sound(SoundEffect::Correct);
    let ctx = provider.ctx();
    // Only the zero-delay chime has landed at this point.
    assert_eq!(ctx.tones().len(), 1);

    drop(engine);
    sleep(Duration::from_millis(500));
    assert_eq!(ctx.tones().len(), 1);
}

#[test]
fn diagnostics_snapshot_carries_the_context_state() {
    let provider = MockProvider::new(ContextState::Suspended, ResumeBehavior::Immediate);
    let engine = engine_with(&provider);
    assert_eq!(engine.diagnostics().context_state, ContextState::Uninitialized);

    assert!(engine.warm_up());
    assert_eq!(engine.diagnostics().context_state, ContextState::Running);

    provider.ctx().force_state(ContextState::Suspended);
    assert_eq!(engine.diagnostics().context_state, ContextState::Suspended);

    engine.close();
    assert_eq!(engine.diagnostics().context_state, ContextState::Uninitialized);
}
