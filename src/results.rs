//! Collection of successful probes, shared by all workers during a run.
use std::collections::HashSet;

use parking_lot::Mutex;

use crate::candidate::{Candidate, Protocol};
use crate::scanner::ProbeOutcome;

/// Successful outcomes of a run, kept per protocol in the order they were
/// recorded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultSet {
    tcp: Vec<ProbeOutcome>,
    udp: Vec<ProbeOutcome>,
}

impl ResultSet {
    pub fn get(&self, protocol: Protocol) -> &[ProbeOutcome] {
        match protocol {
            Protocol::Tcp => &self.tcp,
            Protocol::Udp => &self.udp,
        }
    }

    pub fn len(&self) -> usize {
        self.tcp.len() + self.udp.len()
    }

    /// True when no candidate answered. This is the normal "nothing found"
    /// state of a run, not an error.
    pub fn is_empty(&self) -> bool {
        self.tcp.is_empty() && self.udp.is_empty()
    }

    /// Candidates with no recorded success, in their original order. Feed
    /// them to another run to retry.
    pub fn unresolved(&self, candidates: &[Candidate]) -> Vec<Candidate> {
        let live: HashSet<&Candidate> = self
            .tcp
            .iter()
            .chain(&self.udp)
            .map(ProbeOutcome::candidate)
            .collect();

        candidates
            .iter()
            .filter(|candidate| !live.contains(candidate))
            .copied()
            .collect()
    }

    fn push(&mut self, outcome: ProbeOutcome) {
        match outcome.candidate().protocol() {
            Protocol::Tcp => self.tcp.push(outcome),
            Protocol::Udp => self.udp.push(outcome),
        }
    }
}

/// Thread-safe front of a [`ResultSet`]. Failed outcomes are dropped.
#[derive(Debug, Default)]
pub struct Aggregator {
    results: Mutex<ResultSet>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `outcome` if it is a success. Returns whether it was kept.
    pub fn record(&self, outcome: ProbeOutcome) -> bool {
        if !outcome.is_success() {
            return false;
        }
        self.results.lock().push(outcome);
        true
    }

    pub fn snapshot(&self) -> ResultSet {
        self.results.lock().clone()
    }

    pub fn into_result_set(self) -> ResultSet {
        self.results.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::Aggregator;
    use crate::candidate::{Candidate, Protocol};
    use crate::scanner::{FailureReason, ProbeOutcome};
    use std::net::IpAddr;
    use std::sync::Arc;
    use std::time::Duration;

    fn candidate(last: u8, protocol: Protocol) -> Candidate {
        Candidate::new(IpAddr::from([10, 0, 0, last]), 443, protocol)
    }

    #[test]
    fn partitions_by_protocol_and_drops_failures() {
        let aggregator = Aggregator::new();

        assert!(aggregator.record(ProbeOutcome::success(candidate(1, Protocol::Tcp), Duration::from_millis(5))));
        assert!(aggregator.record(ProbeOutcome::success(candidate(2, Protocol::Udp), Duration::from_millis(7))));
        assert!(!aggregator.record(ProbeOutcome::failure(candidate(3, Protocol::Tcp), FailureReason::Timeout)));
        assert!(!aggregator.record(ProbeOutcome::failure(
            candidate(4, Protocol::Udp),
            FailureReason::HandshakeTimeout
        )));

        let results = aggregator.into_result_set();
        assert_eq!(results.len(), 2);
        assert_eq!(results.get(Protocol::Tcp)[0].candidate(), &candidate(1, Protocol::Tcp));
        assert_eq!(results.get(Protocol::Udp)[0].candidate(), &candidate(2, Protocol::Udp));
    }

    #[test]
    fn duplicate_successes_are_both_kept() {
        let aggregator = Aggregator::new();
        let outcome = ProbeOutcome::success(candidate(1, Protocol::Tcp), Duration::from_millis(5));

        aggregator.record(outcome);
        aggregator.record(outcome);

        assert_eq!(aggregator.snapshot().get(Protocol::Tcp).len(), 2);
    }

    #[test]
    fn concurrent_records_are_not_lost() {
        let aggregator = Arc::new(Aggregator::new());

        let handles = (0..8u8)
            .map(|worker| {
                let aggregator = Arc::clone(&aggregator);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        aggregator.record(ProbeOutcome::success(
                            candidate(worker, Protocol::Udp),
                            Duration::from_millis(1),
                        ));
                    }
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(aggregator.snapshot().get(Protocol::Udp).len(), 800);
    }

    #[test]
    fn unresolved_lists_missing_candidates() {
        let aggregator = Aggregator::new();
        let all = [candidate(1, Protocol::Tcp), candidate(2, Protocol::Tcp), candidate(2, Protocol::Udp)];
        aggregator.record(ProbeOutcome::success(all[1], Duration::from_millis(3)));

        let results = aggregator.into_result_set();

        assert!(!results.is_empty());
        assert_eq!(results.unresolved(&all), vec![all[0], all[2]]);
    }
}
