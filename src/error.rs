//! Error taxonomy for playback operations.
//!
//! Audio is a non-critical enhancement: every one of these is caught at the
//! engine boundary and converted into a soft failure (a `None`, a `false`,
//! or a skipped tone) plus a diagnostic entry. Public engine methods never
//! return `AudioError` to callers.

/// Errors raised by context construction, resume and scheduling.
#[derive(thiserror::Error, Debug)]
pub enum AudioError {
    /// The platform offers no usable audio output.
    #[error("no usable audio output on this platform")]
    PlatformUnsupported,

    /// The platform refused a resume request (autoplay policy, device loss).
    #[error("resume rejected: {0}")]
    ResumeRejected(String),

    /// A tone or task could not be queued.
    #[error("scheduling failed: {0}")]
    Scheduling(String),

    /// The music buffer could not be rendered.
    #[error("music render failed: {0}")]
    MusicRender(String),

    /// Operation attempted against a context that was already closed.
    #[error("playback context is closed")]
    ContextClosed,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = core::result::Result<T, AudioError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_stable() {
        let e = AudioError::ResumeRejected("not allowed".into());
        assert_eq!(e.to_string(), "resume rejected: not allowed");
        assert_eq!(
            AudioError::ContextClosed.to_string(),
            "playback context is closed"
        );
    }
}
