use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Ingestion mode of the feed: where in the backfill-then-tail lifecycle the
/// stream currently is. Forward-only, except that a fresh connection re-enters
/// via `Idle`.
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default, Deserialize, Serialize,
    derive_more::Display,
)]
#[serde(rename_all = "lowercase")]
pub enum FeedStage {
    #[default]
    Idle,
    History,
    Delta,
    Live,
}

/// Windowing policy the view controller applies after each processed chunk.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum WindowPolicy {
    /// No automatic updates.
    Hold,
    /// Fit the window to all data so far, expanding the right edge - avoids a
    /// jarring jump while a large backfill streams in.
    FitAll,
    /// Tail the data clock with a fixed-width window.
    Tail,
}

/// Tracks the feed stage and the one-time window reset owed on entering
/// `Live`.
///
/// The reset needs at least one buffer with data; until then it is retried
/// with a cooldown, capped by an attempt counter rather than a wall-clock
/// timeout, and abandoned permanently once the budget is exhausted (the
/// window is left at its last good value).
#[derive(Debug)]
pub struct StageTracker {
    stage: FeedStage,
    reset_pending: bool,
    reset_attempts: u32,
    reset_cooldown: u32,
    retry_budget: u32,
}

impl StageTracker {
    pub fn new(retry_budget: u32) -> Self {
        Self {
            stage: FeedStage::Idle,
            reset_pending: false,
            reset_attempts: 0,
            reset_cooldown: 0,
            retry_budget,
        }
    }

    pub fn stage(&self) -> FeedStage {
        self.stage
    }

    /// Apply an out-of-band stage signal. Backward transitions are ignored,
    /// except to `Idle` which models a fresh connection.
    pub fn advance(&mut self, stage: FeedStage) {
        if stage == FeedStage::Idle {
            if self.stage != FeedStage::Idle {
                debug!(from = %self.stage, "feed reset to idle");
            }
            self.stage = FeedStage::Idle;
            self.reset_pending = false;
            return;
        }
        if stage <= self.stage {
            return;
        }
        debug!(from = %self.stage, to = %stage, "feed stage advanced");
        let entering_live = stage == FeedStage::Live && self.stage != FeedStage::Live;
        self.stage = stage;
        if entering_live {
            self.reset_pending = true;
            self.reset_attempts = 0;
            self.reset_cooldown = 0;
        }
    }

    pub fn window_policy(&self) -> WindowPolicy {
        match self.stage {
            FeedStage::Idle => WindowPolicy::Hold,
            FeedStage::History | FeedStage::Delta => WindowPolicy::FitAll,
            FeedStage::Live => WindowPolicy::Tail,
        }
    }

    /// Whether the live-entry window reset should be attempted this tick.
    pub fn reset_due(&mut self) -> bool {
        if !self.reset_pending {
            return false;
        }
        if self.reset_cooldown > 0 {
            self.reset_cooldown -= 1;
            return false;
        }
        true
    }

    pub fn reset_done(&mut self) {
        self.reset_pending = false;
    }

    /// An explicit host window action supersedes a pending live-entry reset.
    pub fn cancel_reset(&mut self) {
        self.reset_pending = false;
    }

    /// Record a failed attempt (no buffer had data yet) and schedule the next
    /// one with a growing cooldown.
    pub fn reset_failed(&mut self) {
        self.reset_attempts += 1;
        if self.reset_attempts >= self.retry_budget {
            warn!(
                attempts = self.reset_attempts,
                "live window reset abandoned, keeping last window"
            );
            self.reset_pending = false;
            return;
        }
        self.reset_cooldown = 1 << self.reset_attempts.min(6);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_is_forward_only() {
        struct TestCase {
            input: Vec<FeedStage>,
            expected: FeedStage,
        }

        let tests = vec![
            TestCase {
                // TC0: normal lifecycle
                input: vec![FeedStage::History, FeedStage::Delta, FeedStage::Live],
                expected: FeedStage::Live,
            },
            TestCase {
                // TC1: backward signal ignored
                input: vec![FeedStage::Live, FeedStage::History],
                expected: FeedStage::Live,
            },
            TestCase {
                // TC2: idle re-entry allowed (fresh connection)
                input: vec![FeedStage::Live, FeedStage::Idle, FeedStage::History],
                expected: FeedStage::History,
            },
            TestCase {
                // TC3: duplicate signal is a no-op
                input: vec![FeedStage::Delta, FeedStage::Delta],
                expected: FeedStage::Delta,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let mut tracker = StageTracker::new(8);
            for stage in test.input {
                tracker.advance(stage);
            }
            assert_eq!(tracker.stage(), test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_window_policy_per_stage() {
        let mut tracker = StageTracker::new(8);
        assert_eq!(tracker.window_policy(), WindowPolicy::Hold);
        tracker.advance(FeedStage::History);
        assert_eq!(tracker.window_policy(), WindowPolicy::FitAll);
        tracker.advance(FeedStage::Delta);
        assert_eq!(tracker.window_policy(), WindowPolicy::FitAll);
        tracker.advance(FeedStage::Live);
        assert_eq!(tracker.window_policy(), WindowPolicy::Tail);
    }

    #[test]
    fn test_live_entry_arms_one_reset() {
        let mut tracker = StageTracker::new(8);
        tracker.advance(FeedStage::Live);
        assert!(tracker.reset_due());
        tracker.reset_done();
        assert!(!tracker.reset_due());

        // re-entering live through a fresh connection re-arms it
        tracker.advance(FeedStage::Idle);
        tracker.advance(FeedStage::Live);
        assert!(tracker.reset_due());
    }

    #[test]
    fn test_reset_retry_backs_off_and_gives_up() {
        let mut tracker = StageTracker::new(3);
        tracker.advance(FeedStage::Live);

        assert!(tracker.reset_due());
        tracker.reset_failed();
        // cooldown of 2 ticks after the first failure
        assert!(!tracker.reset_due());
        assert!(!tracker.reset_due());
        assert!(tracker.reset_due());
        tracker.reset_failed();

        // drain the second cooldown, then fail a third time: budget of 3 is
        // exhausted and the reset is abandoned permanently
        let mut due = false;
        for _ in 0..32 {
            if tracker.reset_due() {
                due = true;
                break;
            }
        }
        assert!(due);
        tracker.reset_failed();
        assert!(!tracker.reset_due());
        assert!(!tracker.reset_pending);
    }
}
