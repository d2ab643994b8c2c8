use log::{info, warn};

use crate::request::ProbeOutcome;

/// Load attempts made for one wallpaper change before giving up.
pub const MAX_LOAD_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    NoWallpaper,
    Loading,
    /// Failures so far; another attempt is pending.
    Retrying(u32),
    Displayed,
    /// Terminal until the next `begin`.
    Failed,
}

/// Lifecycle of one wallpaper change: `NoWallpaper -> Loading -> Displayed`,
/// with `Retrying(n)` after each failed load and `Failed` once
/// `max_attempts` loads have failed.
#[derive(Debug, Clone)]
pub struct LoadTracker {
    state: LoadState,
    failures: u32,
    max_attempts: u32,
    verified: bool,
}

impl Default for LoadTracker {
    fn default() -> Self {
        Self::new(MAX_LOAD_ATTEMPTS)
    }
}

impl LoadTracker {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            state: LoadState::NoWallpaper,
            failures: 0,
            max_attempts: max_attempts.max(1),
            verified: false,
        }
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Whether the displayed wallpaper was confirmed by a successful load, as
    /// opposed to shown raw after a timeout.
    pub fn verified(&self) -> bool {
        self.verified
    }

    pub fn begin(&mut self) {
        self.state = LoadState::Loading;
        self.failures = 0;
        self.verified = false;
    }

    pub fn can_attempt(&self) -> bool {
        matches!(self.state, LoadState::Loading | LoadState::Retrying(_))
    }

    pub fn on_loaded(&mut self) {
        self.state = LoadState::Displayed;
        self.verified = true;
    }

    /// A load that outlives the timeout stops the wait and the raw URL is
    /// shown unverified.
    pub fn on_timeout(&mut self) {
        self.state = LoadState::Displayed;
        self.verified = false;
    }

    pub fn on_failed(&mut self) -> LoadState {
        self.failures += 1;
        self.state = if self.failures >= self.max_attempts {
            LoadState::Failed
        } else {
            LoadState::Retrying(self.failures)
        };
        self.state
    }

    /// Marks the change as failed without further attempts, e.g. when there
    /// is nothing left to try.
    pub fn give_up(&mut self) {
        self.state = LoadState::Failed;
    }

    /// Runs the bounded retry loop. `attempt` gets the zero-based attempt
    /// number and returns the probe result, or `None` when it has nothing
    /// left to try.
    pub fn drive<F>(&mut self, mut attempt: F) -> LoadState
    where
        F: FnMut(u32) -> Option<ProbeOutcome>,
    {
        self.begin();
        while self.can_attempt() {
            match attempt(self.failures) {
                Some(ProbeOutcome::Loaded) => self.on_loaded(),
                Some(ProbeOutcome::TimedOut) => self.on_timeout(),
                Some(ProbeOutcome::Failed) => {
                    if let LoadState::Retrying(n) = self.on_failed() {
                        info!("Retrying... attempt {}/{}", n + 1, self.max_attempts);
                    }
                }
                None => self.give_up(),
            }
        }
        if self.state == LoadState::Failed {
            warn!("Giving up after {} failed loads", self.failures);
        }
        self.state
    }
}
