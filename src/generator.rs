//! Builds the list of candidates to probe from address ranges, seed
//! addresses and per-protocol port lists.
use std::collections::HashSet;
use std::net::IpAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use itertools::{iproduct, Itertools};
use log::debug;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::address::AddressRange;
use crate::candidate::{Candidate, Protocol};
use crate::error::ConfigError;
use crate::input::ScanOrder;

/// Hosts sampled from a range that does not carry its own `#N` count.
pub const DEFAULT_SAMPLES: usize = 25;

/// Upper bound on the hosts drawn from a single range.
pub const MAX_SAMPLES: usize = 65_536;

/// What to generate candidates from.
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    pub ranges: Vec<AddressRange>,
    pub default_samples: usize,
    /// Known-good addresses. Always included and always probed first.
    pub seeds: Vec<IpAddr>,
    pub tcp_ports: Vec<u16>,
    pub udp_ports: Vec<u16>,
    pub order: ScanOrder,
}

impl GeneratorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tcp_ports.is_empty() && self.udp_ports.is_empty() {
            return Err(ConfigError::NoPorts);
        }
        if let Some(protocol) = Protocol::ALL
            .into_iter()
            .find(|&protocol| self.ports(protocol).contains(&0))
        {
            return Err(ConfigError::ZeroPort(protocol));
        }
        if self.ranges.is_empty() && self.seeds.is_empty() {
            return Err(ConfigError::NoAddresses);
        }
        if let Some(range) = self.ranges.iter().find(|range| self.samples_for(range) == 0) {
            return Err(ConfigError::ZeroSamples(range.to_string()));
        }
        if let Some(range) = self
            .ranges
            .iter()
            .find(|range| self.samples_for(range) > MAX_SAMPLES)
        {
            return Err(ConfigError::TooManySamples {
                range: range.to_string(),
                samples: self.samples_for(range),
                max: MAX_SAMPLES,
            });
        }
        Ok(())
    }

    fn samples_for(&self, range: &AddressRange) -> usize {
        range.samples().unwrap_or(self.default_samples)
    }

    pub fn ports(&self, protocol: Protocol) -> &[u16] {
        match protocol {
            Protocol::Tcp => &self.tcp_ports,
            Protocol::Udp => &self.udp_ports,
        }
    }
}

/// Produces deduplicated candidates. Randomness comes from a generator seeded
/// with the current time, so two runs will sample different hosts.
#[derive(Debug)]
pub struct CandidateGenerator {
    config: GeneratorConfig,
    rng: StdRng,
}

impl CandidateGenerator {
    pub fn new(config: GeneratorConfig) -> Result<Self, ConfigError> {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_nanos())
            .unwrap_or_default();

        #[allow(clippy::cast_possible_truncation)]
        let seed = nanos as u64;
        Self::with_seed(config, seed)
    }

    /// Same as [`CandidateGenerator::new`] with a fixed RNG seed, for
    /// reproducible sampling.
    pub fn with_seed(config: GeneratorConfig, seed: u64) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    pub const fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// Seeds first, in the order given, followed by hosts sampled from each
    /// range. No address appears twice.
    pub fn addresses(&mut self) -> Vec<IpAddr> {
        let mut sampled = self.config.seeds.clone();
        for range in &self.config.ranges {
            let count = self.config.samples_for(range);
            sampled.extend(range.sample(count, &mut self.rng));
        }

        let addresses = sampled.into_iter().unique().collect::<Vec<_>>();
        debug!(
            "Sampled {} addresses ({} seeds) from {} ranges",
            addresses.len(),
            self.config.seeds.len(),
            self.config.ranges.len()
        );
        addresses
    }

    /// Expands addresses into one candidate per enabled (protocol, port).
    ///
    /// Candidates of seed addresses keep their place at the front. The rest
    /// follow either address by address or shuffled, depending on the
    /// configured [`ScanOrder`].
    pub fn candidates(&mut self, addresses: &[IpAddr]) -> Vec<Candidate> {
        let endpoints = Protocol::ALL
            .iter()
            .flat_map(|&protocol| {
                self.config
                    .ports(protocol)
                    .iter()
                    .map(move |&port| (protocol, port))
            })
            .collect::<Vec<_>>();

        let seeds: HashSet<&IpAddr> = self.config.seeds.iter().collect();
        let (mut first, mut rest): (Vec<Candidate>, Vec<Candidate>) =
            iproduct!(addresses.iter().copied(), endpoints.iter().copied())
                .map(|(address, (protocol, port))| Candidate::new(address, port, protocol))
                .unique()
                .partition(|candidate| seeds.contains(&candidate.address()));

        if self.config.order == ScanOrder::Random {
            rest.shuffle(&mut self.rng);
        }

        first.append(&mut rest);
        debug!("Generated {} candidates", first.len());
        first
    }

    /// Samples addresses and expands them in one go.
    pub fn generate(&mut self) -> Vec<Candidate> {
        let addresses = self.addresses();
        self.candidates(&addresses)
    }
}

#[cfg(test)]
mod tests {
    use super::{CandidateGenerator, GeneratorConfig, DEFAULT_SAMPLES, MAX_SAMPLES};
    use crate::candidate::Protocol;
    use crate::error::ConfigError;
    use crate::input::ScanOrder;
    use std::collections::HashSet;
    use std::net::IpAddr;

    fn config() -> GeneratorConfig {
        GeneratorConfig {
            ranges: vec![
                "162.159.192.".parse().unwrap(),
                "188.114.96.0/24".parse().unwrap(),
                "2606:4700:d0::#5".parse().unwrap(),
            ],
            default_samples: DEFAULT_SAMPLES,
            seeds: vec![],
            tcp_ports: vec![443, 8443],
            udp_ports: vec![2408, 500, 2408],
            order: ScanOrder::Random,
        }
    }

    #[test]
    fn no_duplicate_triples() {
        let mut generator = CandidateGenerator::with_seed(config(), 42).unwrap();
        let candidates = generator.generate();
        let unique: HashSet<_> = candidates.iter().collect();

        assert_eq!(unique.len(), candidates.len());
        // 55 addresses, 2 TCP ports and 2 distinct UDP ports
        assert_eq!(candidates.len(), 55 * 4);
    }

    #[test]
    fn overlapping_ranges_are_deduplicated() {
        let mut cfg = config();
        cfg.ranges = vec![
            "10.0.0.0/30".parse().unwrap(),
            "10.0.0.0/31".parse().unwrap(),
        ];
        cfg.tcp_ports = vec![80];
        cfg.udp_ports = vec![];
        let mut generator = CandidateGenerator::with_seed(cfg, 1).unwrap();

        let candidates = generator.generate();

        assert_eq!(candidates.len(), 4);
        assert!(candidates.iter().all(|c| c.protocol() == Protocol::Tcp));
    }

    #[test]
    fn seeds_come_first_and_once() {
        let seed: IpAddr = "162.159.192.1".parse().unwrap();
        let mut cfg = config();
        cfg.ranges = vec!["162.159.192.#256".parse().unwrap()];
        cfg.seeds = vec![seed];
        let mut generator = CandidateGenerator::with_seed(cfg, 9).unwrap();

        let addresses = generator.addresses();
        assert_eq!(addresses[0], seed);
        assert_eq!(addresses.iter().filter(|&&ip| ip == seed).count(), 1);
        assert_eq!(addresses.len(), 256);

        let candidates = generator.candidates(&addresses);
        assert!(candidates[..4].iter().all(|c| c.address() == seed));
        assert!(candidates[4..].iter().all(|c| c.address() != seed));
    }

    #[test]
    fn serial_order_is_address_major() {
        let mut cfg = config();
        cfg.order = ScanOrder::Serial;
        let mut generator = CandidateGenerator::with_seed(cfg, 5).unwrap();

        let candidates = generator.generate();

        for chunk in candidates.chunks(4) {
            assert!(chunk.iter().all(|c| c.address() == chunk[0].address()));
        }
    }

    #[test]
    fn same_seed_same_candidates() {
        let first = CandidateGenerator::with_seed(config(), 77).unwrap().generate();
        let second = CandidateGenerator::with_seed(config(), 77).unwrap().generate();

        assert_eq!(first, second);
    }

    #[test]
    fn reject_empty_ports() {
        let mut cfg = config();
        cfg.tcp_ports.clear();
        cfg.udp_ports.clear();

        assert_eq!(CandidateGenerator::new(cfg).unwrap_err(), ConfigError::NoPorts);
    }

    #[test]
    fn reject_nothing_to_sample() {
        let mut cfg = config();
        cfg.ranges.clear();

        assert_eq!(CandidateGenerator::new(cfg).unwrap_err(), ConfigError::NoAddresses);
    }

    #[test]
    fn reject_zero_samples() {
        let mut cfg = config();
        cfg.ranges.push("10.1.#0".parse().unwrap());

        assert_eq!(
            CandidateGenerator::new(cfg).unwrap_err(),
            ConfigError::ZeroSamples("10.1.".to_owned())
        );
    }

    #[test]
    fn seeds_alone_are_enough() {
        let mut cfg = config();
        cfg.ranges.clear();
        cfg.seeds = vec!["188.114.97.3".parse().unwrap()];
        let mut generator = CandidateGenerator::with_seed(cfg, 0).unwrap();

        assert_eq!(generator.generate().len(), 4);
    }

    #[test]
    fn reject_oversized_sample_count() {
        let mut cfg = config();
        cfg.ranges.push("2606:4700:d0::#100000000000000".parse().unwrap());

        assert_eq!(
            CandidateGenerator::new(cfg).unwrap_err(),
            ConfigError::TooManySamples {
                range: "2606:4700:d0::".to_owned(),
                samples: 100_000_000_000_000,
                max: MAX_SAMPLES,
            }
        );
    }

    #[test]
    fn reject_oversized_default_samples() {
        let mut cfg = config();
        cfg.default_samples = MAX_SAMPLES + 1;

        assert!(matches!(
            CandidateGenerator::new(cfg),
            Err(ConfigError::TooManySamples { samples, .. }) if samples == MAX_SAMPLES + 1
        ));
    }

    #[test]
    fn largest_allowed_sample_count_is_accepted() {
        let mut cfg = config();
        cfg.ranges = vec![format!("10.0.0.0/8#{MAX_SAMPLES}").parse().unwrap()];
        cfg.udp_ports = vec![];
        let mut generator = CandidateGenerator::with_seed(cfg, 3).unwrap();

        assert_eq!(generator.addresses().len(), MAX_SAMPLES);
    }

    #[test]
    fn reject_port_zero() {
        let mut cfg = config();
        cfg.udp_ports.push(0);

        assert_eq!(
            CandidateGenerator::new(cfg).unwrap_err(),
            ConfigError::ZeroPort(Protocol::Udp)
        );
    }
}
