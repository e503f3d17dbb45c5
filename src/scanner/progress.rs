//! Progress side channel. Nothing in the scan depends on it.
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counts at one point of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Progress {
    pub successes: u64,
    pub failures: u64,
    pub total: u64,
}

impl Progress {
    pub const fn done(&self) -> u64 {
        self.successes + self.failures
    }
}

/// Called from worker tasks after every finished probe.
pub type ProgressObserver = Arc<dyn Fn(Progress) + Send + Sync>;

pub(crate) struct ProgressCounter {
    successes: AtomicU64,
    failures: AtomicU64,
    total: u64,
    observer: Option<ProgressObserver>,
}

impl ProgressCounter {
    pub(crate) fn new(total: u64, observer: Option<ProgressObserver>) -> Self {
        Self {
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            total,
            observer,
        }
    }

    pub(crate) fn record(&self, success: bool) {
        if success {
            self.successes.fetch_add(1, Ordering::SeqCst);
        } else {
            self.failures.fetch_add(1, Ordering::SeqCst);
        }

        if let Some(observer) = &self.observer {
            observer(self.snapshot());
        }
    }

    pub(crate) fn snapshot(&self) -> Progress {
        Progress {
            successes: self.successes.load(Ordering::SeqCst),
            failures: self.failures.load(Ordering::SeqCst),
            total: self.total,
        }
    }
}

impl fmt::Debug for ProgressCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressCounter")
            .field("progress", &self.snapshot())
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{Progress, ProgressCounter};
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn counts_and_notifies() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let counter = ProgressCounter::new(3, Some(Arc::new(move |p: Progress| sink.lock().push(p))));

        counter.record(true);
        counter.record(false);
        counter.record(false);

        let last = counter.snapshot();
        assert_eq!(last.successes, 1);
        assert_eq!(last.failures, 2);
        assert_eq!(last.done(), last.total);
        assert_eq!(seen.lock().len(), 3);
    }
}
