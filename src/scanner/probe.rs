//! A single bounded attempt against one candidate.
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use log::debug;
use serde_derive::Serialize;
use tokio::io::{self, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::{self, Instant};

use crate::candidate::{Candidate, Protocol};

/// Control packet sent to UDP candidates. Any reply of at least one byte
/// proves the peer speaks the protocol; a bare UDP "connect" does not.
pub const HANDSHAKE_PAYLOAD: [u8; 16] = [
    0x01, 0x00, 0x00, 0x00, 0x57, 0x41, 0x52, 0x50, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/// Why a probe did not count as a success.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureReason {
    /// No connection within the deadline.
    Timeout,
    /// The network stack refused or could not route the connection.
    ConnectError,
    HandshakeWriteError,
    HandshakeReadError,
    /// The UDP peer accepted the packet but did not answer in time.
    HandshakeTimeout,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Timeout => "connect timed out",
            Self::ConnectError => "connect failed",
            Self::HandshakeWriteError => "handshake write failed",
            Self::HandshakeReadError => "handshake read failed",
            Self::HandshakeTimeout => "handshake timed out",
        };
        f.write_str(text)
    }
}

/// Result of probing one candidate. Built once and never changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeOutcome {
    candidate: Candidate,
    result: Result<Duration, FailureReason>,
}

impl ProbeOutcome {
    pub const fn success(candidate: Candidate, latency: Duration) -> Self {
        Self {
            candidate,
            result: Ok(latency),
        }
    }

    pub const fn failure(candidate: Candidate, reason: FailureReason) -> Self {
        Self {
            candidate,
            result: Err(reason),
        }
    }

    pub const fn candidate(&self) -> &Candidate {
        &self.candidate
    }

    pub const fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// Measured latency, only for successful probes.
    pub fn latency(&self) -> Option<Duration> {
        self.result.ok()
    }

    pub fn failure_reason(&self) -> Option<FailureReason> {
        self.result.err()
    }
}

/// Anything able to probe a candidate within a deadline.
///
/// [`SocketProber`] talks to the network. Tests substitute scripted probers.
pub trait Prober: Send + Sync + 'static {
    fn probe(
        &self,
        candidate: &Candidate,
        timeout: Duration,
    ) -> impl Future<Output = ProbeOutcome> + Send;
}

/// Probes candidates with real sockets: a TCP connect, or a UDP
/// handshake-and-reply exchange.
#[derive(Debug, Clone)]
pub struct SocketProber {
    payload: [u8; 16],
}

impl Default for SocketProber {
    fn default() -> Self {
        Self {
            payload: HANDSHAKE_PAYLOAD,
        }
    }
}

impl SocketProber {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the 16-byte UDP handshake packet.
    #[must_use]
    pub fn with_payload(mut self, payload: [u8; 16]) -> Self {
        self.payload = payload;
        self
    }

    /// Connects with a deadline. Latency covers the connect only; the stream
    /// is shut down before returning.
    async fn probe_tcp(socket: SocketAddr, timeout: Duration) -> Result<Duration, FailureReason> {
        let start = Instant::now();
        let stream = match time::timeout(timeout, TcpStream::connect(socket)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                debug!("Connect to {socket} failed: {e}");
                return Err(FailureReason::ConnectError);
            }
            Err(_) => return Err(FailureReason::Timeout),
        };
        let latency = start.elapsed();

        if let Err(e) = { stream }.shutdown().await {
            debug!("Shutdown stream error {socket}: {e}");
        }
        Ok(latency)
    }

    /// Binds a local socket for the candidate's address family.
    async fn udp_bind(socket: SocketAddr) -> io::Result<UdpSocket> {
        let local_addr: SocketAddr = match socket {
            SocketAddr::V4(_) => (std::net::Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (std::net::Ipv6Addr::UNSPECIFIED, 0).into(),
        };

        UdpSocket::bind(local_addr).await
    }

    /// Sends the handshake and waits for a reply, all inside one deadline.
    /// Latency spans from just before the send to just after the reply.
    async fn probe_udp(&self, socket: SocketAddr, timeout: Duration) -> Result<Duration, FailureReason> {
        let deadline = Instant::now() + timeout;

        let udp_socket = match time::timeout_at(deadline, async {
            let udp_socket = Self::udp_bind(socket).await?;
            udp_socket.connect(socket).await?;
            Ok::<_, io::Error>(udp_socket)
        })
        .await
        {
            Ok(Ok(udp_socket)) => udp_socket,
            Ok(Err(e)) => {
                debug!("UDP connect to {socket} failed: {e}");
                return Err(FailureReason::ConnectError);
            }
            Err(_) => return Err(FailureReason::Timeout),
        };

        let start = Instant::now();
        match time::timeout_at(deadline, udp_socket.send(&self.payload)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                debug!("Handshake send to {socket} failed: {e}");
                return Err(FailureReason::HandshakeWriteError);
            }
            Err(_) => return Err(FailureReason::HandshakeTimeout),
        }

        let mut buf = [0u8; 1024];
        match time::timeout_at(deadline, udp_socket.recv(&mut buf)).await {
            Ok(Ok(size)) if size > 0 => {
                let latency = start.elapsed();
                debug!("Received {size} bytes from {socket}");
                Ok(latency)
            }
            Ok(Ok(_)) => Err(FailureReason::HandshakeReadError),
            Ok(Err(e)) => {
                debug!("Handshake recv from {socket} failed: {e}");
                Err(FailureReason::HandshakeReadError)
            }
            Err(_) => Err(FailureReason::HandshakeTimeout),
        }
    }
}

impl Prober for SocketProber {
    async fn probe(&self, candidate: &Candidate, timeout: Duration) -> ProbeOutcome {
        let socket = candidate.socket_addr();
        let result = match candidate.protocol() {
            Protocol::Tcp => Self::probe_tcp(socket, timeout).await,
            Protocol::Udp => self.probe_udp(socket, timeout).await,
        };

        match result {
            Ok(latency) => ProbeOutcome::success(*candidate, latency),
            Err(reason) => ProbeOutcome::failure(*candidate, reason),
        }
    }
}
