//! This crate exposes the internal functionality of the `anycast-probe`
//! endpoint finder.
//!
//! Most addresses inside an anycast provider's blocks do not answer on any
//! given port. The crate samples hosts from known address ranges, probes
//! every (address, port, protocol) candidate under a timeout with a bounded
//! pool of workers, and ranks the endpoints that answered by latency.
//!
//! ## Architecture Overview
//!
//! 1. **Generation**: [`CandidateGenerator`](crate::generator::CandidateGenerator)
//!    samples hosts from [`AddressRange`](crate::address::AddressRange)s, puts
//!    seed addresses first and expands them into deduplicated
//!    [`Candidate`](crate::candidate::Candidate)s.
//! 2. **Optional pre-filter**: [`ping_filter`](crate::ping::ping_filter) drops
//!    hosts that do not answer ICMP.
//! 3. **Probing**: [`Scanner`](crate::scanner::Scanner) runs a fixed pool of
//!    workers. TCP candidates count as live once connected. UDP candidates
//!    must answer a handshake packet, since a UDP "connect" proves nothing.
//! 4. **Aggregation**: successes land in a shared
//!    [`Aggregator`](crate::results::Aggregator), split by protocol.
//! 5. **Ranking**: [`Ranking`](crate::rank::Ranking) sorts each protocol by
//!    latency, ties kept in discovery order.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use anycast_probe::candidate::Protocol;
//! use anycast_probe::generator::{CandidateGenerator, GeneratorConfig};
//! use anycast_probe::input::ScanOrder;
//! use anycast_probe::rank::Ranking;
//! use anycast_probe::scanner::{ScanSettings, Scanner, Timeouts};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut generator = CandidateGenerator::new(GeneratorConfig {
//!     ranges: vec!["162.159.192.#10".parse()?],
//!     default_samples: 25,
//!     seeds: vec![],
//!     tcp_ports: vec![],
//!     udp_ports: vec![2408, 500],
//!     order: ScanOrder::Random,
//! })?;
//!
//! let settings = ScanSettings::new(Timeouts::uniform(Duration::from_millis(800)), 200)?;
//! let results = Scanner::new(settings).run(generator.generate()).await;
//! let ranking = Ranking::rank(&results);
//!
//! match ranking.best(Protocol::Udp) {
//!     Some(best) => println!("Best endpoint {} ({:?})", best.endpoint, best.latency),
//!     None => println!("No working endpoints found."),
//! }
//! # Ok(())
//! # }
//! ```
#![doc(html_root_url = "https://docs.rs/anycast-probe/0.3.0")]

pub mod tui;

pub mod input;

pub mod error;

pub mod candidate;

pub mod address;

pub mod generator;

pub mod scanner;

pub mod results;

pub mod rank;

pub mod ping;
