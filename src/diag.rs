//! Structured diagnostics for unlock failures.
//!
//! Autoplay problems are miserable to reproduce, so the engine keeps a
//! bounded in-memory log of everything relevant: context-state transitions,
//! gesture detections, playback attempts and caught errors. The ring always
//! records (capped at [`MAX_ENTRIES`]); the debug flag only controls how
//! much is mirrored to `tracing` (warnings and errors always are).
//!
//! The log is constructor-injected wherever it is needed. Nothing in here
//! gates playback behavior; it is observation only.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::context::ContextState;

/// Upper bound on retained entries; oldest are dropped first.
pub const MAX_ENTRIES: usize = 500;

/// How many entries a snapshot carries (newest first).
const SNAPSHOT_RECENT: usize = 20;

/// Severity of a diagnostic entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagLevel {
    Debug,
    Info,
    /// An operation that can fail on some platforms actually went through.
    Success,
    Warn,
    Error,
}

impl DiagLevel {
    pub fn label(self) -> &'static str {
        match self {
            DiagLevel::Debug => "debug",
            DiagLevel::Info => "info",
            DiagLevel::Success => "success",
            DiagLevel::Warn => "warn",
            DiagLevel::Error => "error",
        }
    }
}

/// What part of the engine an entry is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagCategory {
    /// Context construction, resume, close.
    Context,
    /// State transitions observed by polling.
    State,
    /// Tone and music playback attempts.
    Playback,
    /// User-gesture detection.
    Gesture,
    /// Environment and configuration notes.
    Diagnostic,
}

impl DiagCategory {
    pub fn label(self) -> &'static str {
        match self {
            DiagCategory::Context => "context",
            DiagCategory::State => "state",
            DiagCategory::Playback => "playback",
            DiagCategory::Gesture => "gesture",
            DiagCategory::Diagnostic => "diagnostic",
        }
    }
}

/// One recorded diagnostic entry.
#[derive(Debug, Clone)]
pub struct AudioEvent {
    /// Monotonic sequence number, never reused.
    pub seq: u64,
    /// Milliseconds since the log was created.
    pub at_ms: u64,
    pub level: DiagLevel,
    pub category: DiagCategory,
    pub message: String,
    /// Free-form context, e.g. an error string or an event name.
    pub detail: Option<String>,
}

impl fmt::Display for AudioEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:>7}ms {:7} {:11}] {}",
            self.at_ms,
            self.level.label(),
            self.category.label(),
            self.message
        )?;
        if let Some(detail) = &self.detail {
            write!(f, " ({detail})")?;
        }
        Ok(())
    }
}

/// Gesture bookkeeping: whether any qualifying interaction happened yet,
/// when, and how many times. Diagnostics only; correctness logic never
/// reads it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InteractionRecord {
    pub detected: bool,
    pub first_at_ms: Option<u64>,
    pub last_at_ms: Option<u64>,
    pub count: u64,
}

/// Point-in-time view of the log for host-side display or bug reports.
#[derive(Debug, Clone)]
pub struct DiagSnapshot {
    /// Engine-level context state at the moment of the snapshot.
    pub context_state: ContextState,
    pub debug_enabled: bool,
    /// Total entries ever recorded, including ones the ring has dropped.
    pub total_recorded: u64,
    pub interactions: InteractionRecord,
    /// Most recent entries, newest first.
    pub recent: Vec<AudioEvent>,
}

struct DiagInner {
    entries: VecDeque<AudioEvent>,
    interactions: InteractionRecord,
    next_seq: u64,
}

/// Bounded diagnostic event log shared across the engine.
pub struct DiagLog {
    inner: Mutex<DiagInner>,
    debug: AtomicBool,
    epoch: Instant,
}

impl DiagLog {
    pub fn new(debug: bool) -> Self {
        DiagLog {
            inner: Mutex::new(DiagInner {
                entries: VecDeque::with_capacity(64),
                interactions: InteractionRecord::default(),
                next_seq: 0,
            }),
            debug: AtomicBool::new(debug),
            epoch: Instant::now(),
        }
    }

    pub fn debug_enabled(&self) -> bool {
        self.debug.load(Ordering::Relaxed)
    }

    pub fn set_debug(&self, enabled: bool) {
        self.debug.store(enabled, Ordering::Relaxed);
        if enabled {
            self.record(
                DiagLevel::Info,
                DiagCategory::Diagnostic,
                "debug mode enabled",
            );
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Records an entry and mirrors it to `tracing`.
    ///
    /// Warnings and errors are always mirrored; lower levels only when the
    /// debug flag is on. The ring records regardless of the flag.
    pub fn record(&self, level: DiagLevel, category: DiagCategory, message: impl Into<String>) {
        self.push(level, category, message.into(), None);
    }

    /// Like [`record`](Self::record) with an extra free-form detail string.
    pub fn record_with_detail(
        &self,
        level: DiagLevel,
        category: DiagCategory,
        message: impl Into<String>,
        detail: impl Into<String>,
    ) {
        self.push(level, category, message.into(), Some(detail.into()));
    }

    fn push(&self, level: DiagLevel, category: DiagCategory, message: String, detail: Option<String>) {
        let at_ms = self.now_ms();
        {
            let mut inner = self.inner.lock();
            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.entries.push_back(AudioEvent {
                seq,
                at_ms,
                level,
                category,
                message: message.clone(),
                detail: detail.clone(),
            });
            while inner.entries.len() > MAX_ENTRIES {
                inner.entries.pop_front();
            }
        }
        self.emit(level, category, &message, detail.as_deref());
    }

    fn emit(&self, level: DiagLevel, category: DiagCategory, message: &str, detail: Option<&str>) {
        let cat = category.label();
        let detail = detail.unwrap_or("");
        match level {
            DiagLevel::Error => error!(category = cat, detail, "{message}"),
            DiagLevel::Warn => warn!(category = cat, detail, "{message}"),
            _ if !self.debug_enabled() => {}
            DiagLevel::Debug => debug!(category = cat, detail, "{message}"),
            DiagLevel::Info | DiagLevel::Success => info!(category = cat, detail, "{message}"),
        }
    }

    /// Notes a qualifying user gesture. The first one gets an info entry;
    /// repeats are recorded at debug level with the running count.
    pub fn record_gesture(&self, event_name: &str) {
        let at_ms = self.now_ms();
        let (first, count) = {
            let mut inner = self.inner.lock();
            let first = !inner.interactions.detected;
            if first {
                inner.interactions.detected = true;
                inner.interactions.first_at_ms = Some(at_ms);
            }
            inner.interactions.last_at_ms = Some(at_ms);
            inner.interactions.count += 1;
            (first, inner.interactions.count)
        };
        if first {
            self.record_with_detail(
                DiagLevel::Info,
                DiagCategory::Gesture,
                "first user interaction",
                event_name,
            );
        } else {
            self.record_with_detail(
                DiagLevel::Debug,
                DiagCategory::Gesture,
                format!("user interaction #{count}"),
                event_name,
            );
        }
    }

    pub fn interactions(&self) -> InteractionRecord {
        self.inner.lock().interactions
    }

    /// Copy of every retained entry, oldest first.
    pub fn entries(&self) -> Vec<AudioEvent> {
        self.inner.lock().entries.iter().cloned().collect()
    }

    /// Number of currently retained entries.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Point-in-time summary with the newest entries first. The caller
    /// supplies the context state; the log itself never tracks it.
    pub fn snapshot(&self, context_state: ContextState) -> DiagSnapshot {
        let inner = self.inner.lock();
        DiagSnapshot {
            context_state,
            debug_enabled: self.debug_enabled(),
            total_recorded: inner.next_seq,
            interactions: inner.interactions,
            recent: inner
                .entries
                .iter()
                .rev()
                .take(SNAPSHOT_RECENT)
                .cloned()
                .collect(),
        }
    }

    /// Drops all entries and resets the interaction record.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.interactions = InteractionRecord::default();
    }
}

impl fmt::Debug for DiagLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiagLog")
            .field("debug", &self.debug_enabled())
            .field("entries", &self.len())
            .finish()
    }
}
