//! Gesture classification and platform quirks for autoplay unlock.
//!
//! Mobile platforms only allow a suspended output to resume from inside a
//! user-initiated input event. Hosts forward every input event they see as
//! an [`UnlockGesture`]; the engine treats each one as a resume opportunity.
//! Listening stays armed for the whole session because a single successful
//! resume is not guaranteed to stick on every platform version.

use core::fmt;

/// Input-event kinds that qualify as a user gesture for autoplay purposes.
///
/// The set is deliberately broad: touch, mouse, keyboard and pointer events
/// all count, and both the press and release halves are included so the
/// earliest possible event in an interaction can trigger the unlock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnlockGesture {
    TouchStart,
    TouchMove,
    TouchEnd,
    Click,
    MouseDown,
    MouseUp,
    KeyDown,
    KeyUp,
    PointerDown,
    PointerUp,
}

impl UnlockGesture {
    /// Every qualifying gesture kind, for hosts that wire listeners in a loop.
    pub const ALL: [UnlockGesture; 10] = [
        UnlockGesture::TouchStart,
        UnlockGesture::TouchMove,
        UnlockGesture::TouchEnd,
        UnlockGesture::Click,
        UnlockGesture::MouseDown,
        UnlockGesture::MouseUp,
        UnlockGesture::KeyDown,
        UnlockGesture::KeyUp,
        UnlockGesture::PointerDown,
        UnlockGesture::PointerUp,
    ];

    /// Stable lowercase name used in diagnostics.
    pub fn label(self) -> &'static str {
        match self {
            UnlockGesture::TouchStart => "touchstart",
            UnlockGesture::TouchMove => "touchmove",
            UnlockGesture::TouchEnd => "touchend",
            UnlockGesture::Click => "click",
            UnlockGesture::MouseDown => "mousedown",
            UnlockGesture::MouseUp => "mouseup",
            UnlockGesture::KeyDown => "keydown",
            UnlockGesture::KeyUp => "keyup",
            UnlockGesture::PointerDown => "pointerdown",
            UnlockGesture::PointerUp => "pointerup",
        }
    }
}

impl fmt::Display for UnlockGesture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// What the runtime environment needs from the unlock dance.
///
/// Built once at engine construction from an environment descriptor (a user
/// agent string or equivalent). WeChat's in-app browser keeps the output
/// muted until something audible actually plays, so for it the engine
/// schedules a near-silent tone right after the first resume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformProfile {
    descriptor: String,
    needs_unlock_tone: bool,
}

impl PlatformProfile {
    /// Classify an environment descriptor. Matching is case-insensitive.
    pub fn from_descriptor(descriptor: &str) -> Self {
        let lowered = descriptor.to_ascii_lowercase();
        PlatformProfile {
            descriptor: descriptor.to_owned(),
            needs_unlock_tone: lowered.contains("micromessenger"),
        }
    }

    /// Profile for environments with no known unlock quirks.
    pub fn generic() -> Self {
        PlatformProfile {
            descriptor: String::new(),
            needs_unlock_tone: false,
        }
    }

    /// The raw descriptor this profile was built from, for diagnostics.
    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    /// True when the platform stays silent until an audible tone plays.
    pub fn needs_unlock_tone(&self) -> bool {
        self.needs_unlock_tone
    }
}

impl Default for PlatformProfile {
    fn default() -> Self {
        Self::generic()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wechat_descriptor_needs_unlock_tone() {
        let ua = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) \
                  AppleWebKit/605.1.15 MicroMessenger/8.0.47";
        assert!(PlatformProfile::from_descriptor(ua).needs_unlock_tone());
    }

    #[test]
    fn detection_is_case_insensitive() {
        assert!(PlatformProfile::from_descriptor("micromessenger/8.0").needs_unlock_tone());
        assert!(PlatformProfile::from_descriptor("MICROMESSENGER").needs_unlock_tone());
    }

    #[test]
    fn plain_browsers_do_not() {
        let ua = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) Safari/605.1.15";
        assert!(!PlatformProfile::from_descriptor(ua).needs_unlock_tone());
        assert!(!PlatformProfile::generic().needs_unlock_tone());
    }

    #[test]
    fn gesture_set_covers_press_and_release() {
        assert_eq!(UnlockGesture::ALL.len(), 10);
        assert!(UnlockGesture::ALL.contains(&UnlockGesture::TouchStart));
        assert!(UnlockGesture::ALL.contains(&UnlockGesture::KeyUp));
        assert_eq!(UnlockGesture::PointerDown.label(), "pointerdown");
    }
}
