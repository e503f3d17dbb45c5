//! Provides a means to parse address-range specifications and sample random
//! hosts out of them.
//!
//! Three forms are accepted, each optionally followed by `#N` to override the
//! number of hosts sampled from that range:
//!
//! - a CIDR block, `188.114.96.0/24` or `2606:4700:d0::/48`
//! - a dotted IPv4 prefix, `162.159.192.`, whose missing octets are random
//! - an IPv6 prefix, `2606:4700:d0::`, whose missing hextets are random
//!
//! ```rust
//! # use anycast_probe::address::AddressRange;
//! let range: AddressRange = "162.159.192.#10".parse().unwrap();
//! assert_eq!(range.samples(), Some(10));
//! assert_eq!(range.space(), 256);
//! ```
use std::collections::HashSet;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use cidr_utils::cidr::IpCidr;
use rand::Rng;

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    V4,
    V6,
}

impl Family {
    const fn bits(self) -> u8 {
        match self {
            Self::V4 => 32,
            Self::V6 => 128,
        }
    }
}

/// A block of addresses to sample from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressRange {
    family: Family,
    base: u128,
    host_bits: u8,
    samples: Option<usize>,
    source: String,
}

impl AddressRange {
    /// Number of hosts requested for this range, when set with `#N`.
    pub const fn samples(&self) -> Option<usize> {
        self.samples
    }

    pub fn with_samples(mut self, samples: usize) -> Self {
        self.samples = Some(samples);
        self
    }

    /// Number of distinct addresses in the range, saturating at `u128::MAX`.
    pub const fn space(&self) -> u128 {
        if self.host_bits >= 128 {
            u128::MAX
        } else {
            1 << self.host_bits
        }
    }

    const fn host_mask(&self) -> u128 {
        if self.host_bits >= 128 {
            u128::MAX
        } else {
            (1 << self.host_bits) - 1
        }
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.family, ip) {
            (Family::V4, IpAddr::V4(v4)) => {
                u128::from(u32::from(v4)) & !self.host_mask() == self.base
            }
            (Family::V6, IpAddr::V6(v6)) => u128::from(v6) & !self.host_mask() == self.base,
            _ => false,
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn address_at(&self, offset: u128) -> IpAddr {
        let raw = self.base | (offset & self.host_mask());
        match self.family {
            Family::V4 => IpAddr::V4(Ipv4Addr::from(raw as u32)),
            Family::V6 => IpAddr::V6(Ipv6Addr::from(raw)),
        }
    }

    /// Picks `count` distinct random hosts. When the range holds no more than
    /// `count` addresses, every address is returned in ascending order.
    pub fn sample<R: Rng + ?Sized>(&self, count: usize, rng: &mut R) -> Vec<IpAddr> {
        let wanted = count as u128;
        if wanted >= self.space() {
            return (0..self.space()).map(|offset| self.address_at(offset)).collect();
        }

        let mut seen = HashSet::new();
        let mut picked = Vec::new();
        while picked.len() < count {
            let address = self.address_at(rng.random::<u128>());
            if seen.insert(address) {
                picked.push(address);
            }
        }
        picked
    }

    fn from_cidr(spec: &str) -> Result<Self, ConfigError> {
        let cidr = IpCidr::from_str(spec).map_err(|_| invalid(spec, "not a valid CIDR block"))?;
        let (family, base) = match cidr.first_address() {
            IpAddr::V4(v4) => (Family::V4, u128::from(u32::from(v4))),
            IpAddr::V6(v6) => (Family::V6, u128::from(v6)),
        };

        Ok(Self {
            family,
            base,
            host_bits: family.bits() - cidr.network_length(),
            samples: None,
            source: spec.to_owned(),
        })
    }

    fn from_v4_prefix(spec: &str) -> Result<Self, ConfigError> {
        let octets = spec
            .trim_end_matches('.')
            .split('.')
            .map(|octet| octet.parse::<u8>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| invalid(spec, "octets must be numbers between 0 and 255"))?;

        if octets.is_empty() || octets.len() > 3 {
            return Err(invalid(spec, "an IPv4 prefix holds one to three octets"));
        }

        let base = octets
            .iter()
            .enumerate()
            .fold(0u128, |acc, (i, &octet)| acc | u128::from(octet) << (24 - 8 * i));

        Ok(Self {
            family: Family::V4,
            base,
            host_bits: 32 - 8 * octets.len() as u8,
            samples: None,
            source: spec.to_owned(),
        })
    }

    fn from_v6_prefix(spec: &str) -> Result<Self, ConfigError> {
        let hextets = spec
            .trim_end_matches(':')
            .split(':')
            .map(|hextet| u16::from_str_radix(hextet, 16))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| invalid(spec, "hextets must be hexadecimal numbers"))?;

        if hextets.is_empty() || hextets.len() > 7 {
            return Err(invalid(spec, "an IPv6 prefix holds one to seven hextets"));
        }

        let base = hextets
            .iter()
            .enumerate()
            .fold(0u128, |acc, (i, &hextet)| acc | u128::from(hextet) << (112 - 16 * i));

        Ok(Self {
            family: Family::V6,
            base,
            host_bits: 128 - 16 * hextets.len() as u8,
            samples: None,
            source: spec.to_owned(),
        })
    }
}

fn invalid(spec: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidRange {
        range: spec.to_owned(),
        reason: reason.to_owned(),
    }
}

impl FromStr for AddressRange {
    type Err = ConfigError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let input = input.trim();
        let (spec, samples) = match input.rsplit_once('#') {
            Some((spec, count)) => {
                let count = count
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| invalid(input, "sample count after '#' must be a number"))?;
                (spec.trim(), Some(count))
            }
            None => (input, None),
        };

        let mut range = if spec.contains('/') {
            Self::from_cidr(spec)?
        } else if spec.ends_with("::") {
            Self::from_v6_prefix(spec)?
        } else if spec.ends_with('.') {
            Self::from_v4_prefix(spec)?
        } else {
            return Err(invalid(
                spec,
                "expected a CIDR block, a dotted IPv4 prefix ending in '.' or an IPv6 prefix ending in '::'",
            ));
        };

        range.samples = samples;
        Ok(range)
    }
}

impl fmt::Display for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}
