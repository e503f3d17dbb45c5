#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::doc_markdown, clippy::if_not_else, clippy::non_ascii_literal)]

use anycast_probe::candidate::Protocol;
use anycast_probe::generator::CandidateGenerator;
use anycast_probe::input::{Config, Opts};
use anycast_probe::ping::{ping_filter, PingReply, Pinger, SystemPing, DEFAULT_ECHOES};
use anycast_probe::rank::{RankedResult, Ranking};
use anycast_probe::scanner::{ScanSettings, Scanner};
use anycast_probe::{detail, output, warning};

use anyhow::{Context, Result};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

// Average value for Ubuntu
#[cfg(unix)]
const DEFAULT_FILE_DESCRIPTORS_LIMIT: u64 = 8000;
// Descriptors kept free for stdio, the runtime and ping children.
const RESERVED_FILE_DESCRIPTORS: u64 = 100;
const PING_CONCURRENCY: usize = 64;
const PING_TIMEOUT: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let mut opts: Opts = Opts::read();
    if !opts.no_config {
        let config = Config::read(opts.config_path.clone())
            .context("Found an error in the configuration file")?;
        opts.merge(&config);
    }

    log::debug!("Main() `opts` arguments are {opts:?}");

    let plan = opts.scan_plan().context("Invalid scan configuration")?;
    let ulimit = adjust_ulimit_size(&opts);
    let concurrency = infer_concurrency(&opts, plan.settings.concurrency(), ulimit);
    let settings = ScanSettings::new(plan.settings.timeouts(), concurrency)?;

    let mut generator = CandidateGenerator::new(plan.generator)?;
    let mut addresses = generator.addresses();
    let mut replies = HashMap::new();

    if opts.ping_enabled() {
        detail!(
            format!("Pinging {} addresses", addresses.len()),
            opts.greppable || opts.json,
            opts.accessible
        );
        let seeds = generator.config().seeds.clone();
        (addresses, replies) = prefilter(
            &SystemPing::new(PING_TIMEOUT).with_echoes(DEFAULT_ECHOES),
            addresses,
            &seeds,
            &opts,
        )
        .await;
    }

    let candidates = generator.candidates(&addresses);
    detail!(
        format!(
            "Probing {} endpoints on {} addresses, {concurrency} at a time",
            candidates.len(),
            addresses.len()
        ),
        opts.greppable || opts.json,
        opts.accessible
    );

    let progress_bar = progress_bar(&opts, candidates.len() as u64);
    let bar = progress_bar.clone();
    let scanner = Scanner::new(settings).on_progress(Arc::new(move |progress| {
        bar.set_position(progress.done());
        bar.set_message(format!("{} live", progress.successes));
    }));

    let started = Instant::now();
    let results = scanner.run(candidates).await;
    progress_bar.finish_and_clear();
    log::debug!("Probing took {:?}", started.elapsed());

    let ranking = Ranking::rank(&results).with_ping(&replies);
    if ranking.is_empty() {
        warning!("No working endpoints found.", opts.greppable, opts.accessible);
        std::process::exit(1);
    }

    let enabled: Vec<Protocol> = Protocol::ALL
        .into_iter()
        .filter(|&protocol| !generator.config().ports(protocol).is_empty())
        .collect();
    print_ranking(&ranking, &enabled, &opts)
}

/// Runs the ping pre-filter. When ping cannot run at all every address is
/// kept, and the user is told so even in greppable and JSON modes.
async fn prefilter<P: Pinger>(
    pinger: &P,
    addresses: Vec<IpAddr>,
    seeds: &[IpAddr],
    opts: &Opts,
) -> (Vec<IpAddr>, HashMap<IpAddr, PingReply>) {
    match ping_filter(pinger, &addresses, seeds, PING_CONCURRENCY, opts.ping_keep).await {
        Ok(answered) => {
            let kept = answered.iter().map(|&(address, _)| address).collect();
            let replies = answered
                .into_iter()
                .filter_map(|(address, reply)| reply.map(|reply| (address, reply)))
                .collect();
            (kept, replies)
        }
        Err(e) => {
            let message = format!("{e}. Skipping the ping pre-filter and probing every address.");
            if opts.greppable || opts.json {
                eprintln!("{message}");
            } else {
                warning!(message, false, opts.accessible);
            }
            (addresses, HashMap::new())
        }
    }
}

fn progress_bar(opts: &Opts, total: u64) -> ProgressBar {
    if opts.greppable || opts.accessible || opts.json {
        return ProgressBar::hidden();
    }

    let style = ProgressStyle::with_template("{spinner} [{elapsed_precise}] {bar:40} {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    let bar = ProgressBar::new(total);
    bar.set_style(style);
    bar.enable_steady_tick(Duration::from_millis(100));
    bar
}

fn print_ranking(ranking: &Ranking, enabled: &[Protocol], opts: &Opts) -> Result<()> {
    if opts.json {
        println!("{}", serde_json::to_string_pretty(ranking)?);
        return Ok(());
    }

    if opts.greppable {
        for &protocol in enabled {
            for result in ranking.top_n(protocol, opts.top) {
                println!("{}", result.endpoint);
            }
        }
        return Ok(());
    }

    for &protocol in enabled {
        let Some(best) = ranking.best(protocol) else {
            warning!(
                format!("No working {protocol} endpoints found."),
                opts.greppable,
                opts.accessible
            );
            continue;
        };

        println!();
        output!(
            format!("Best {protocol} endpoint: {}", fmt_endpoint(best, opts.accessible)),
            opts.greppable,
            opts.accessible
        );
        println!("    Latency: {}", fmt_millis(best.latency));
        if let Some(ping) = best.ping {
            println!("    Ping: {}", fmt_millis(ping));
        }
        if let Some(loss) = best.loss {
            println!("    Packet loss: {loss}%");
        }

        println!();
        detail!(
            format!("Top {} {protocol} endpoints", opts.top),
            opts.greppable,
            opts.accessible
        );
        for (rank, result) in ranking.top_n(protocol, opts.top).iter().enumerate() {
            let ping = result
                .ping
                .map(|ping| format!(", ping {}", fmt_millis(ping)))
                .unwrap_or_default();
            let loss = result
                .loss
                .map(|loss| format!(", loss {loss}%"))
                .unwrap_or_default();
            println!(
                "{}. {} (latency {}{ping}{loss})",
                rank + 1,
                fmt_endpoint(result, opts.accessible),
                fmt_millis(result.latency)
            );
        }
    }

    Ok(())
}

fn fmt_endpoint(result: &RankedResult, accessible: bool) -> String {
    if accessible {
        result.endpoint.to_string()
    } else {
        result.endpoint.to_string().purple().to_string()
    }
}

fn fmt_millis(duration: Duration) -> String {
    format!("{:.2} ms", duration.as_secs_f64() * 1_000.0)
}

#[cfg(unix)]
fn adjust_ulimit_size(opts: &Opts) -> u64 {
    use rlimit::Resource;

    if let Some(limit) = opts.ulimit {
        if Resource::NOFILE.set(limit, limit).is_ok() {
            detail!(
                format!("Automatically increasing ulimit value to {limit}."),
                opts.greppable,
                opts.accessible
            );
        } else {
            warning!("ERROR. Failed to set ulimit value.", opts.greppable, opts.accessible);
        }
    }

    Resource::NOFILE
        .get()
        .map_or(DEFAULT_FILE_DESCRIPTORS_LIMIT, |(soft, _)| soft)
}

#[cfg(not(unix))]
fn adjust_ulimit_size(_opts: &Opts) -> u64 {
    u64::MAX
}

/// Lowers the requested concurrency when every worker holding a socket
/// would exceed the open file limit.
fn infer_concurrency(opts: &Opts, requested: usize, ulimit: u64) -> usize {
    let available = ulimit.saturating_sub(RESERVED_FILE_DESCRIPTORS).max(1);
    let available = usize::try_from(available).unwrap_or(usize::MAX);

    if requested <= available {
        return requested;
    }

    warning!(
        format!(
            "File limit of {ulimit} is lower than the concurrency of {requested}; probing {available} at a time."
        ),
        opts.greppable,
        opts.accessible
    );
    if opts.ulimit.is_none() {
        detail!(
            "Raise the limit with '--ulimit 5000' to probe faster.",
            opts.greppable,
            opts.accessible
        );
    }
    available
}

#[cfg(test)]
mod tests {
    use super::{fmt_millis, infer_concurrency, prefilter};
    use anycast_probe::input::Opts;
    use anycast_probe::ping::{PingError, PingReply, Pinger};
    use std::net::IpAddr;
    use std::time::Duration;

    struct NoPingBinary;

    impl Pinger for NoPingBinary {
        async fn ping(&self, _address: IpAddr) -> Result<PingReply, PingError> {
            Err(PingError::Spawn(std::io::Error::from(std::io::ErrorKind::NotFound)))
        }
    }

    /// Only addresses ending in an even octet answer.
    struct EvenAnswers;

    impl Pinger for EvenAnswers {
        async fn ping(&self, address: IpAddr) -> Result<PingReply, PingError> {
            match address {
                IpAddr::V4(v4) if v4.octets()[3] % 2 == 0 => Ok(PingReply {
                    rtt: Duration::from_millis(u64::from(v4.octets()[3])),
                    loss: 0,
                }),
                _ => Err(PingError::Unreachable(address)),
            }
        }
    }

    fn addresses() -> Vec<IpAddr> {
        (1..=175).map(|last: u8| IpAddr::from([162, 159, 192, last])).collect()
    }

    #[tokio::test]
    async fn missing_ping_keeps_every_address() {
        let opts = Opts::default();

        let (kept, replies) = prefilter(&NoPingBinary, addresses(), &[], &opts).await;

        assert_eq!(kept, addresses());
        assert!(replies.is_empty());
    }

    #[tokio::test]
    async fn working_ping_filters_addresses() {
        let opts = Opts::default();

        let (kept, replies) = prefilter(&EvenAnswers, addresses(), &[], &opts).await;

        assert_eq!(kept.len(), 87);
        assert_eq!(kept[0], IpAddr::from([162, 159, 192, 2]));
        assert_eq!(replies.len(), 87);
    }

    #[test]
    fn concurrency_below_limit_is_kept() {
        let opts = Opts::default();

        assert_eq!(infer_concurrency(&opts, 1000, 8000), 1000);
    }

    #[test]
    fn concurrency_is_lowered_to_fit_limit() {
        let opts = Opts::default();

        assert_eq!(infer_concurrency(&opts, 5000, 1024), 924);
    }

    #[test]
    fn tiny_limit_still_allows_one_worker() {
        let opts = Opts::default();

        assert_eq!(infer_concurrency(&opts, 50, 10), 1);
    }

    #[test]
    fn millis_have_two_decimals() {
        assert_eq!(fmt_millis(Duration::from_micros(15_250)), "15.25 ms");
    }
}
