//! Orders successful probes by latency.
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use serde::Serializer;
use serde_derive::Serialize;

use crate::candidate::Protocol;
use crate::ping::PingReply;
use crate::results::ResultSet;

/// One live endpoint and where it stands among its protocol's results.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankedResult {
    /// `address:port`, IPv6 addresses in brackets.
    pub endpoint: SocketAddr,
    pub protocol: Protocol,
    #[serde(rename = "latency_ms", serialize_with = "as_millis")]
    pub latency: Duration,
    /// ICMP round trip to the address, for display only.
    #[serde(rename = "ping_ms", serialize_with = "opt_as_millis")]
    pub ping: Option<Duration>,
    /// Share of ping echoes lost, in percent. Display only, like `ping`.
    #[serde(rename = "loss_percent")]
    pub loss: Option<u8>,
}

#[allow(clippy::cast_precision_loss)]
fn as_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_micros() as f64 / 1_000.0)
}

#[allow(clippy::ref_option)]
fn opt_as_millis<S: Serializer>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
    match duration {
        Some(duration) => as_millis(duration, serializer),
        None => serializer.serialize_none(),
    }
}

/// Live endpoints per protocol, fastest first.
#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Ranking {
    tcp: Vec<RankedResult>,
    udp: Vec<RankedResult>,
}

impl Ranking {
    /// Sorts each protocol's successes by ascending latency. Equal latencies
    /// keep the order in which they were recorded. `results` is left as is.
    pub fn rank(results: &ResultSet) -> Self {
        let ranked = |protocol: Protocol| {
            let mut ranked = results
                .get(protocol)
                .iter()
                .filter_map(|outcome| {
                    outcome.latency().map(|latency| RankedResult {
                        endpoint: outcome.candidate().socket_addr(),
                        protocol,
                        latency,
                        ping: None,
                        loss: None,
                    })
                })
                .collect::<Vec<_>>();
            ranked.sort_by_key(|result| result.latency);
            ranked
        };

        Self {
            tcp: ranked(Protocol::Tcp),
            udp: ranked(Protocol::Udp),
        }
    }

    /// Attaches ping round trips and loss by address. Order is unchanged.
    #[must_use]
    pub fn with_ping(mut self, replies: &HashMap<IpAddr, PingReply>) -> Self {
        for result in self.tcp.iter_mut().chain(self.udp.iter_mut()) {
            let reply = replies.get(&result.endpoint.ip());
            result.ping = reply.map(|reply| reply.rtt);
            result.loss = reply.map(|reply| reply.loss);
        }
        self
    }

    pub fn get(&self, protocol: Protocol) -> &[RankedResult] {
        match protocol {
            Protocol::Tcp => &self.tcp,
            Protocol::Udp => &self.udp,
        }
    }

    /// Fastest endpoint, or `None` when nothing answered over `protocol`.
    pub fn best(&self, protocol: Protocol) -> Option<&RankedResult> {
        self.get(protocol).first()
    }

    /// Up to `n` fastest endpoints.
    pub fn top_n(&self, protocol: Protocol, n: usize) -> &[RankedResult] {
        let ranked = self.get(protocol);
        &ranked[..n.min(ranked.len())]
    }

    pub fn is_empty(&self) -> bool {
        self.tcp.is_empty() && self.udp.is_empty()
    }
}
