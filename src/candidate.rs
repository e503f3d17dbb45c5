//! The unit of work: one (address, port, protocol) triple.
use clap::ValueEnum;
use serde_derive::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// Transport used to reach a candidate.
#[derive(Serialize, Deserialize, Debug, ValueEnum, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    pub const ALL: [Self; 2] = [Self::Tcp, Self::Udp];
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => f.write_str("TCP"),
            Self::Udp => f.write_str("UDP"),
        }
    }
}

/// An endpoint eligible for probing. Two candidates are equal iff their
/// address, port and protocol are all equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Candidate {
    address: IpAddr,
    port: u16,
    protocol: Protocol,
}

impl Candidate {
    pub const fn new(address: IpAddr, port: u16, protocol: Protocol) -> Self {
        Self {
            address,
            port,
            protocol,
        }
    }

    pub const fn address(&self) -> IpAddr {
        self.address
    }

    pub const fn port(&self) -> u16 {
        self.port
    }

    pub const fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.socket_addr(), self.protocol)
    }
}

#[cfg(test)]
mod tests {
    use super::{Candidate, Protocol};
    use std::net::IpAddr;

    #[test]
    fn display_brackets_ipv6() {
        let v4 = Candidate::new("162.159.192.1".parse::<IpAddr>().unwrap(), 2408, Protocol::Udp);
        let v6 = Candidate::new("2606:4700:d0::1".parse::<IpAddr>().unwrap(), 443, Protocol::Tcp);

        assert_eq!(v4.to_string(), "162.159.192.1:2408/UDP");
        assert_eq!(v6.to_string(), "[2606:4700:d0::1]:443/TCP");
    }

    #[test]
    fn identity_is_the_whole_triple() {
        let ip = "10.0.0.1".parse::<IpAddr>().unwrap();

        assert_eq!(Candidate::new(ip, 80, Protocol::Tcp), Candidate::new(ip, 80, Protocol::Tcp));
        assert_ne!(Candidate::new(ip, 80, Protocol::Tcp), Candidate::new(ip, 80, Protocol::Udp));
        assert_ne!(Candidate::new(ip, 80, Protocol::Tcp), Candidate::new(ip, 81, Protocol::Tcp));
    }
}
