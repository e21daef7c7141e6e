//! Voice intent matching for shutdown control.
//!
//! Pure word-boundary regex matching over the transcript, English-only. A
//! negation anywhere in the text vetoes the intent, so "don't shut down"
//! never kills the listener.

use once_cell::sync::Lazy;
use regex::Regex;

/// How long a pending shutdown waits for confirmation (confirm mode).
pub const CONFIRM_WINDOW_SEC: f64 = 15.0;

static SHUTDOWN_HOTWORDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(shut\s*down|shutdown|power\s*off|turn\s*off|stop\s+listening|stop\s+the\s+server|stop\s+server|exit|quit|terminate|end\s+(?:session|process|server)|kill\s+(?:it|process|server))\b",
    )
    .expect("valid regex")
});

static NEGATIONS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(don't|do\s+not|not\s+now|cancel|false\s+alarm)\b").expect("valid regex")
});

static CONFIRM_HOTWORDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(confirm(?:ed)?\s+(?:shut\s*down|shutdown|exit|quit)|yes[, ]*(?:shut\s*down|exit)|go\s+ahead)\b",
    )
    .expect("valid regex")
});

/// True iff the text carries a shutdown phrase and no negation.
pub fn intent_shutdown(text: &str) -> bool {
    !NEGATIONS.is_match(text) && SHUTDOWN_HOTWORDS.is_match(text)
}

/// True iff the text confirms a pending shutdown and carries no negation.
pub fn intent_confirm(text: &str) -> bool {
    !NEGATIONS.is_match(text) && CONFIRM_HOTWORDS.is_match(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shutdown_positive_examples() {
        for t in [
            "please shut down the server",
            "please shut down now",
            "can you power off",
            "stop listening now",
            "terminate the process",
            "kill the server",
            "Exit.",
        ] {
            assert!(intent_shutdown(t), "expected shutdown intent for: {:?}", t);
        }
    }

    #[test]
    fn shutdown_respects_negations() {
        for t in [
            "don't shut down yet",
            "do not power off",
            "not now, stop shutdown",
            "false alarm, do not quit",
            "cancel the shutdown",
        ] {
            assert!(!intent_shutdown(t), "expected NO shutdown for: {:?}", t);
        }
    }

    #[test]
    fn confirm_positive_examples() {
        for t in [
            "confirm shutdown",
            "confirmed shutdown",
            "yes, shut down",
            "go ahead and exit",
        ] {
            assert!(intent_confirm(t), "expected confirm intent for: {:?}", t);
        }
    }

    #[test]
    fn confirm_respects_negations() {
        for t in ["don't confirm shutdown", "do not exit now", "not now, cancel it"] {
            assert!(!intent_confirm(t), "expected NO confirm for: {:?}", t);
        }
    }

    #[test]
    fn no_matches_inside_unrelated_words() {
        assert!(!intent_shutdown("the exits are clearly marked"));
        assert!(!intent_shutdown("she quits knitting quite often"));
        assert!(!intent_shutdown("we talked about termination theory yesterday"));
        assert!(!intent_shutdown(""));
    }

    #[test]
    fn matching_is_whitespace_insensitive() {
        assert!(intent_shutdown("shut down"));
        assert!(intent_shutdown("shut down "));
        assert!(intent_shutdown("  shutdown  "));
    }
}
