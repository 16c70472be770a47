//! Progress reporting, cooperative cancellation and run outcomes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Shared cancellation flag. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<CancelState>,
}

#[derive(Debug, Default)]
struct CancelState {
    canceled: AtomicBool,
    reason: Mutex<Option<String>>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. The first reason wins.
    pub fn cancel(&self, reason: impl Into<String>) {
        let mut slot = self
            .inner
            .reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(reason.into());
        }
        self.inner.canceled.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.inner.canceled.load(Ordering::SeqCst)
    }

    pub fn reason(&self) -> Option<String> {
        self.inner
            .reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn canceled_outcome<T>(&self) -> Outcome<T> {
        Outcome::Canceled(self.reason().unwrap_or_else(|| "canceled".to_string()))
    }
}

/// Receives progress updates from long-running stages.
pub trait ProgressListener: Send + Sync {
    fn progress(&self, current: usize, total: usize);

    fn status(&self, _message: &str) {}
}

/// Listener that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressListener for NoProgress {
    fn progress(&self, _current: usize, _total: usize) {}
}

/// Result of a run that was not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Completed(T),
    Canceled(String),
}

impl<T> Outcome<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, Outcome::Completed(_))
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, Outcome::Canceled(_))
    }

    pub fn completed(self) -> Option<T> {
        match self {
            Outcome::Completed(value) => Some(value),
            Outcome::Canceled(_) => None,
        }
    }
}

/// Counts of the links written by a run, per event family.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkingReport {
    /// Frame-to-frame links, or Kalman links.
    pub links: usize,
    pub gap_closings: usize,
    pub splits: usize,
    pub merges: usize,
}

impl LinkingReport {
    pub fn total(&self) -> usize {
        self.links + self.gap_closings + self.splits + self.merges
    }

    pub(crate) fn merge(self, other: LinkingReport) -> LinkingReport {
        LinkingReport {
            links: self.links + other.links,
            gap_closings: self.gap_closings + other.gap_closings,
            splits: self.splits + other.splits,
            merges: self.merges + other.merges,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_is_shared() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_canceled());
        token.cancel("user request");
        token.cancel("second");
        assert!(clone.is_canceled());
        assert_eq!(clone.reason().as_deref(), Some("user request"));
        assert_eq!(
            clone.canceled_outcome::<()>(),
            Outcome::Canceled("user request".to_string())
        );
    }

    #[test]
    fn test_outcome_helpers() {
        let done: Outcome<u32> = Outcome::Completed(2);
        assert!(done.is_completed());
        assert_eq!(done.clone().completed(), Some(2));
        let stopped: Outcome<u32> = Outcome::Canceled("x".into());
        assert!(stopped.is_canceled());
        assert_eq!(stopped.completed(), None);
    }

    #[test]
    fn test_report_merge() {
        let a = LinkingReport {
            links: 3,
            ..Default::default()
        };
        let b = LinkingReport {
            gap_closings: 1,
            splits: 2,
            ..Default::default()
        };
        let total = a.merge(b);
        assert_eq!(total.total(), 6);
        assert_eq!(total.splits, 2);
    }
}
