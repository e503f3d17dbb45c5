//! Core functionality for actual scanning behaviour.
//!
//! A [`Scanner`] owns a fixed pool of worker tasks. Every worker pulls the
//! next candidate off a shared queue, probes it, hands the outcome to the
//! [`Aggregator`] and goes back for more, so no more than `concurrency`
//! probes are ever in flight and every candidate is probed exactly once.
//! [`Scanner::run`] returns only after the last worker has drained the queue.
mod probe;
mod progress;

pub use probe::{FailureReason, ProbeOutcome, Prober, SocketProber, HANDSHAKE_PAYLOAD};
pub use progress::{Progress, ProgressObserver};

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, trace, warn};
use parking_lot::Mutex;
use tokio::task::JoinSet;

use crate::candidate::{Candidate, Protocol};
use crate::error::ConfigError;
use crate::results::{Aggregator, ResultSet};
use progress::ProgressCounter;

/// Deadline for a whole probe, per protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub tcp: Duration,
    pub udp: Duration,
}

impl Timeouts {
    pub const fn uniform(timeout: Duration) -> Self {
        Self {
            tcp: timeout,
            udp: timeout,
        }
    }

    pub const fn get(&self, protocol: Protocol) -> Duration {
        match protocol {
            Protocol::Tcp => self.tcp,
            Protocol::Udp => self.udp,
        }
    }
}

/// Validated knobs of the worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanSettings {
    timeouts: Timeouts,
    concurrency: NonZeroUsize,
}

impl ScanSettings {
    pub fn new(timeouts: Timeouts, concurrency: usize) -> Result<Self, ConfigError> {
        let concurrency = NonZeroUsize::new(concurrency).ok_or(ConfigError::ZeroConcurrency)?;
        if let Some(protocol) = Protocol::ALL
            .into_iter()
            .find(|&protocol| timeouts.get(protocol).is_zero())
        {
            return Err(ConfigError::ZeroTimeout(protocol));
        }

        Ok(Self {
            timeouts,
            concurrency,
        })
    }

    pub const fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    pub const fn concurrency(&self) -> usize {
        self.concurrency.get()
    }
}

/// The worker pool.
pub struct Scanner<P: Prober = SocketProber> {
    prober: Arc<P>,
    settings: ScanSettings,
    observer: Option<ProgressObserver>,
}

impl<P: Prober> fmt::Debug for Scanner<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scanner")
            .field("settings", &self.settings)
            .field("observer", &self.observer.is_some())
            .finish_non_exhaustive()
    }
}

impl Scanner<SocketProber> {
    pub fn new(settings: ScanSettings) -> Self {
        Self::with_prober(SocketProber::default(), settings)
    }
}

impl<P: Prober> Scanner<P> {
    pub fn with_prober(prober: P, settings: ScanSettings) -> Self {
        Self {
            prober: Arc::new(prober),
            settings,
            observer: None,
        }
    }

    /// Registers a callback invoked after each finished probe.
    #[must_use]
    pub fn on_progress(mut self, observer: ProgressObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn prober(&self) -> &P {
        &self.prober
    }

    pub const fn settings(&self) -> &ScanSettings {
        &self.settings
    }

    /// Probes every candidate once and collects the successes.
    ///
    /// Individual failures never abort the run; they are simply not
    /// recorded. There is no retry: see [`ResultSet::unresolved`].
    pub async fn run(&self, candidates: Vec<Candidate>) -> ResultSet {
        let total = candidates.len();
        let workers = self.settings.concurrency().min(total);

        debug!(
            "Start probing candidates.\nConcurrency {}\nWorkers {}\nTCP timeout {:?}\nUDP timeout {:?}\nCandidates {}",
            self.settings.concurrency(),
            workers,
            self.settings.timeouts.tcp,
            self.settings.timeouts.udp,
            total
        );

        let queue = Arc::new(Mutex::new(candidates.into_iter()));
        let aggregator = Arc::new(Aggregator::new());
        let progress = Arc::new(ProgressCounter::new(total as u64, self.observer.clone()));

        let mut pool = JoinSet::new();
        for _ in 0..workers {
            let queue = Arc::clone(&queue);
            let aggregator = Arc::clone(&aggregator);
            let progress = Arc::clone(&progress);
            let prober = Arc::clone(&self.prober);
            let timeouts = self.settings.timeouts;

            pool.spawn(async move {
                let mut probed = 0usize;
                loop {
                    let next = {
                        let mut queue = queue.lock();
                        queue.next()
                    };
                    let Some(candidate) = next else {
                        break;
                    };

                    let outcome = prober
                        .probe(&candidate, timeouts.get(candidate.protocol()))
                        .await;
                    if let Some(reason) = outcome.failure_reason() {
                        trace!("{candidate}: {reason}");
                    }

                    let success = aggregator.record(outcome);
                    progress.record(success);
                    probed += 1;
                }
                probed
            });
        }

        while let Some(joined) = pool.join_next().await {
            match joined {
                Ok(probed) => trace!("Worker finished after {probed} probes"),
                Err(e) => warn!("Probe worker stopped abnormally: {e}"),
            }
        }

        let results = Arc::try_unwrap(aggregator)
            .map_or_else(|shared| shared.snapshot(), Aggregator::into_result_set);

        debug!(
            "Probing done: {:?}, {} TCP and {} UDP endpoints live",
            progress.snapshot(),
            results.get(Protocol::Tcp).len(),
            results.get(Protocol::Udp).len()
        );
        results
    }
}
