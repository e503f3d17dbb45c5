//! ICMP pre-filter. Addresses are pinged before any port is probed so the
//! expensive phase only spends time on hosts that answer at all.
use std::collections::HashSet;
use std::future::Future;
use std::net::IpAddr;
use std::process::Stdio;
use std::time::Duration;

use futures::{stream, StreamExt};
use log::{debug, warn};
use thiserror::Error;
use tokio::process::Command;

/// Echo requests sent to each address by default.
pub const DEFAULT_ECHOES: u8 = 4;

#[derive(Error, Debug)]
pub enum PingError {
    #[error("Could not run ping: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("{0} did not answer")]
    Unreachable(IpAddr),
    #[error("Could not read a round-trip time from ping output for {0}")]
    Unparseable(IpAddr),
}

/// What a burst of echo requests to one address measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingReply {
    /// Mean round trip of the echoes that came back.
    pub rtt: Duration,
    /// Share of echoes lost, in percent.
    pub loss: u8,
}

/// Measures the round trip to one address.
pub trait Pinger: Send + Sync {
    fn ping(&self, address: IpAddr) -> impl Future<Output = Result<PingReply, PingError>> + Send;
}

/// Shells out to the platform `ping` binary.
#[derive(Debug, Clone)]
pub struct SystemPing {
    timeout: Duration,
    echoes: u8,
}

impl SystemPing {
    pub const fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            echoes: DEFAULT_ECHOES,
        }
    }

    /// Number of echo requests per address, at least one.
    #[must_use]
    pub fn with_echoes(mut self, echoes: u8) -> Self {
        self.echoes = echoes.max(1);
        self
    }

    fn command(&self, address: IpAddr) -> Command {
        let mut command = Command::new("ping");
        let echoes = self.echoes.to_string();
        if cfg!(windows) {
            command
                .args(["-n", &echoes, "-w"])
                .arg(self.timeout.as_millis().to_string());
        } else if cfg!(target_os = "macos") {
            command
                .args(["-c", &echoes, "-W"])
                .arg(self.timeout.as_millis().to_string());
        } else {
            let wait = self.timeout.as_secs().max(1).to_string();
            if address.is_ipv6() {
                command.arg("-6");
            }
            command.args(["-c", &echoes, "-W"]).arg(wait);
        }
        command
            .arg(address.to_string())
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        command
    }
}

impl Pinger for SystemPing {
    async fn ping(&self, address: IpAddr) -> Result<PingReply, PingError> {
        let output = self.command(address).output().await?;
        if !output.status.success() {
            return Err(PingError::Unreachable(address));
        }

        let text = String::from_utf8_lossy(&output.stdout);
        match (parse_rtt(&text), parse_loss(&text)) {
            (Some(rtt), Some(loss)) => Ok(PingReply { rtt, loss }),
            _ => Err(PingError::Unparseable(address)),
        }
    }
}

/// Averages every `time=12.3 ms` (or `time<1ms`) field in ping output.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn parse_rtt(output: &str) -> Option<Duration> {
    let samples = output
        .match_indices("time")
        .filter_map(|(at, _)| {
            let rest = &output[at + 4..];
            let rest = rest.strip_prefix('=').or_else(|| rest.strip_prefix('<'))?;
            rest.split(|c: char| !(c.is_ascii_digit() || c == '.'))
                .next()?
                .parse::<f64>()
                .ok()
                .filter(|millis| millis.is_finite() && *millis >= 0.0)
        })
        .collect::<Vec<_>>();

    if samples.is_empty() {
        return None;
    }
    let mean = samples.iter().sum::<f64>() / samples.len() as f64;
    Some(Duration::from_micros((mean * 1_000.0).round() as u64))
}

/// Reads the loss percentage from the summary line: `25% packet loss` on
/// unix, `(25% loss)` on Windows.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn parse_loss(output: &str) -> Option<u8> {
    let end = output
        .find("% packet loss")
        .or_else(|| output.find("% loss"))?;
    let head = &output[..end];
    let number = head.trim_end_matches(|c: char| c.is_ascii_digit() || c == '.');

    head[number.len()..]
        .parse::<f64>()
        .ok()
        .filter(|percent| (0.0..=100.0).contains(percent))
        .map(|percent| percent.round() as u8)
}

/// Pings `addresses` with at most `concurrency` requests in flight and keeps
/// the ones that answered, fastest first, at most `limit` of them.
///
/// Addresses in `keep_always` survive even when they do not answer; they are
/// placed first, in their original order, and do not count towards `limit`.
///
/// Fails with [`PingError::Spawn`] when the pinger cannot run at all, so the
/// caller can fall back to the unfiltered addresses instead of dropping them.
pub async fn ping_filter<P: Pinger>(
    pinger: &P,
    addresses: &[IpAddr],
    keep_always: &[IpAddr],
    concurrency: usize,
    limit: Option<usize>,
) -> Result<Vec<(IpAddr, Option<PingReply>)>, PingError> {
    let pinned: HashSet<&IpAddr> = keep_always.iter().collect();

    let mut answers = stream::iter(addresses.iter().copied())
        .map(|address| async move { (address, pinger.ping(address).await) })
        .buffer_unordered(concurrency.max(1));

    let mut kept = Vec::with_capacity(addresses.len());
    let mut reply_of_pinned = Vec::new();
    while let Some((address, answer)) = answers.next().await {
        let reply = match answer {
            Ok(reply) => Some(reply),
            Err(PingError::Spawn(e)) => {
                warn!("Ping pre-filter could not run for {address}: {e}");
                return Err(PingError::Spawn(e));
            }
            Err(e) => {
                debug!("{e}");
                None
            }
        };

        if pinned.contains(&address) {
            reply_of_pinned.push((address, reply));
        } else if let Some(reply) = reply {
            kept.push((address, reply));
        }
    }

    kept.sort_by_key(|&(_, reply)| reply.rtt);
    if let Some(limit) = limit {
        kept.truncate(limit);
    }

    let mut filtered: Vec<(IpAddr, Option<PingReply>)> = addresses
        .iter()
        .filter(|address| pinned.contains(address))
        .filter_map(|address| reply_of_pinned.iter().find(|(seed, _)| seed == address).copied())
        .collect();
    filtered.extend(kept.into_iter().map(|(address, reply)| (address, Some(reply))));

    debug!(
        "Ping pre-filter kept {} of {} addresses",
        filtered.len(),
        addresses.len()
    );
    Ok(filtered)
}
