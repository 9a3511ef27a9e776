//! Activity tracker — weighted engagement accumulation behind the
//! feedback prompt.
//!
//! The tracker knows nothing about trees or filesystems; it only counts
//! externally supplied weights. When the accumulated score crosses the
//! current threshold it reports a one-shot firing, records the reminder,
//! and raises the threshold by a fixed increment, until the reminder cap
//! disables tracking for good.

use serde::{Deserialize, Serialize};

/// Score required before the first firing.
pub const INITIAL_THRESHOLD: u64 = 2_000;

/// How much the threshold is raised after each firing.
pub const THRESHOLD_INCREMENT: u64 = 1_000;

/// After this many reminders, tracking is permanently disabled.
pub const MAX_REMINDERS: u32 = 5;

/// Externally persisted flags gating whether tracking is active at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FeedbackPrefs {
    /// How many times the user has been reminded so far.
    #[serde(default)]
    pub reminders_count: u32,
    /// The user asked never to be reminded again.
    #[serde(default)]
    pub dont_ask: bool,
    /// Feedback was already sent; nothing left to ask for.
    #[serde(default)]
    pub mail_sent: bool,
}

/// Details of one threshold firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThresholdReached {
    /// Accumulated score at the moment of firing.
    pub score: u64,
    /// The threshold value that was crossed.
    pub threshold: u64,
}

/// Accumulates engagement weights within one session.
#[derive(Debug)]
pub struct ActivityTracker {
    score: u64,
    threshold: u64,
    prefs: FeedbackPrefs,
}

impl ActivityTracker {
    /// Create a tracker gated by externally persisted preferences.
    pub fn new(prefs: FeedbackPrefs) -> Self {
        Self {
            score: 0,
            threshold: INITIAL_THRESHOLD,
            prefs,
        }
    }

    /// `true` while firings can still happen: no feedback sent, the user
    /// has not opted out, and the reminder cap is not exhausted.
    pub fn is_tracking(&self) -> bool {
        !self.prefs.mail_sent && !self.prefs.dont_ask && self.prefs.reminders_count < MAX_REMINDERS
    }

    /// Accumulated score. Monotonically non-decreasing within a session.
    pub fn score(&self) -> u64 {
        self.score
    }

    /// The next trigger point.
    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    /// Override the next trigger point.
    pub fn set_threshold(&mut self, threshold: u64) {
        self.threshold = threshold;
    }

    /// Preferences as mutated by firings, for the external store to
    /// persist.
    pub fn prefs(&self) -> FeedbackPrefs {
        self.prefs
    }

    /// Record that feedback was sent; disables tracking.
    pub fn mark_mail_sent(&mut self) {
        self.prefs.mail_sent = true;
    }

    /// Record that the user opted out; disables tracking.
    pub fn mark_dont_ask(&mut self) {
        self.prefs.dont_ask = true;
    }

    /// Add `weight` to the score. Returns firing details the first time
    /// the score reaches the current threshold — at most once per
    /// threshold value, since each firing raises the threshold.
    pub fn track_activity(&mut self, weight: u32) -> Option<ThresholdReached> {
        if !self.is_tracking() {
            return None;
        }
        self.score += u64::from(weight);
        if self.score < self.threshold {
            return None;
        }
        let fired = ThresholdReached {
            score: self.score,
            threshold: self.threshold,
        };
        self.prefs.reminders_count += 1;
        self.threshold += THRESHOLD_INCREMENT;
        Some(fired)
    }
}
