//! Provides a means to read, parse and hold configuration options for scans.
use clap::{Parser, ValueEnum};
use serde_derive::Deserialize;
use std::fs;
use std::io::ErrorKind;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::address::AddressRange;
use crate::error::{ConfigError, ConfigFileError};
use crate::generator::{GeneratorConfig, DEFAULT_SAMPLES};
use crate::scanner::{ScanSettings, Timeouts};

const LOWEST_PORT_NUMBER: u16 = 1;
const TOP_PORT_NUMBER: u16 = 65535;

/// Prefixes of the provider's anycast blocks that carry the WireGuard service.
pub const DEFAULT_V4_RANGES: [&str; 7] = [
    "162.159.192.",
    "162.159.193.",
    "162.159.195.",
    "188.114.96.",
    "188.114.97.",
    "188.114.98.",
    "188.114.99.",
];

pub const DEFAULT_V6_RANGES: [&str; 2] = ["2606:4700:d0::", "2606:4700:d1::"];

/// Ports the provider's endpoints accept WireGuard traffic on.
pub const DEFAULT_UDP_PORTS: [u16; 54] = [
    500, 854, 859, 864, 878, 880, 890, 891, 894, 903, 908, 928, 934, 939, 942, 943, 945, 946, 955,
    968, 987, 988, 1002, 1010, 1014, 1018, 1070, 1074, 1180, 1387, 1701, 1843, 2371, 2408, 2506,
    3138, 3476, 3581, 3854, 4177, 4198, 4233, 4500, 5279, 5956, 7103, 7152, 7156, 7281, 7559, 8319,
    8742, 8854, 8886,
];

/// Represents the order in which sampled candidates are probed. Seed
/// addresses are always probed first.
///   - Serial probes every port of one address before moving to the next.
///   - Random shuffles the candidates so no single block is hit in a burst.
#[derive(Deserialize, Debug, ValueEnum, Clone, Copy, PartialEq, Eq)]
pub enum ScanOrder {
    Serial,
    Random,
}

pub type Ports = Vec<u16>;

pub fn parse_ports_and_ranges(input: &str) -> Result<Ports, String> {
    let mut ports = Vec::new();

    for part in input.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }

        if part.contains('-') {
            let range_ports = parse_port_range(part)?;
            ports.extend(range_ports);
        } else {
            let port = parse_single_port(part)?;
            ports.push(port);
        }
    }

    if ports.is_empty() {
        return Err(String::from("No valid ports or ranges provided"));
    }

    ports.sort_unstable();
    ports.dedup();

    Ok(ports)
}

fn parse_port_range(range_str: &str) -> Result<Vec<u16>, String> {
    let range_parts: Vec<&str> = range_str.split('-').collect();
    if range_parts.len() != 2 {
        return Err(format!(
            "Invalid range format '{range_str}'. Expected 'start-end'. Example: 2400-2410.",
        ));
    }

    let start: u16 = range_parts[0].parse().map_err(|_| {
        format!(
            "Invalid start port '{}' in range '{range_str}'",
            range_parts[0]
        )
    })?;
    let end: u16 = range_parts[1].parse().map_err(|_| {
        format!(
            "Invalid end port '{}' in range '{range_str}'",
            range_parts[1]
        )
    })?;

    if start > end {
        return Err(format!(
            "Start port {start} is greater than end port {end} in range '{range_str}'",
        ));
    }

    if start < LOWEST_PORT_NUMBER {
        return Err(format!(
            "Ports in range '{range_str}' must be between {LOWEST_PORT_NUMBER} and {TOP_PORT_NUMBER}",
        ));
    }

    Ok((start..=end).collect())
}

fn parse_single_port(port_str: &str) -> Result<u16, String> {
    let port: u16 = port_str
        .parse()
        .map_err(|_| format!("Invalid port number '{port_str}'"))?;

    if port < LOWEST_PORT_NUMBER {
        return Err(format!(
            "Port {port} must be between {LOWEST_PORT_NUMBER} and {TOP_PORT_NUMBER}",
        ));
    }

    Ok(port)
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "anycast-probe",
    version = env!("CARGO_PKG_VERSION"),
    max_term_width = 120,
    help_template = "{bin} {version}\n{about}\n\nUSAGE:\n    {usage}\n\nOPTIONS:\n{options}",
)]
#[allow(clippy::struct_excessive_bools)]
/// Finds the lowest-latency endpoints of an anycast network.
/// Hosts are sampled from the given address ranges, every (host, port,
/// protocol) is probed once and the endpoints that answer are ranked by
/// latency. UDP endpoints must answer a handshake packet to count.
pub struct Opts {
    /// A comma-delimited list of address ranges to sample hosts from.
    /// Forms: 188.114.96.0/24, 162.159.192. (random last octet),
    /// 2606:4700:d0:: (random host part). Append #N to sample N hosts from that range.
    #[arg(short, long, value_delimiter = ',')]
    pub ranges: Vec<String>,

    /// Hosts sampled from each range that does not set its own #N.
    #[arg(short, long, default_value = "25")]
    pub samples: usize,

    /// A comma-delimited list of known-good addresses. They are always
    /// probed, and probed first.
    #[arg(long, value_delimiter = ',')]
    pub seeds: Vec<String>,

    /// TCP ports to probe. Examples: 443,8443 or 2400-2410.
    #[arg(long, value_parser = parse_ports_and_ranges)]
    pub tcp_ports: Option<Ports>,

    /// UDP ports to probe. Defaults to the provider's WireGuard ports when
    /// no port list is given at all.
    #[arg(long, value_parser = parse_ports_and_ranges)]
    pub udp_ports: Option<Ports>,

    /// The timeout in milliseconds before a TCP endpoint is assumed dead.
    #[arg(long, default_value = "1000")]
    pub tcp_timeout: u32,

    /// The timeout in milliseconds for a UDP endpoint to answer the handshake.
    #[arg(long, default_value = "1000")]
    pub udp_timeout: u32,

    /// How many probes may be in flight at once. Depends on the open file
    /// limit of your OS.
    #[arg(short = 'b', long, alias = "batch-size", default_value = "1000")]
    pub concurrency: usize,

    /// Automatically ups the ULIMIT with the value you provided.
    #[arg(short, long)]
    pub ulimit: Option<u64>,

    /// The order of probing. "serial" probes one address at a time while
    /// "random" shuffles every sampled candidate.
    #[arg(long, value_enum, ignore_case = true, default_value = "random")]
    pub scan_order: ScanOrder,

    /// How many endpoints to list per protocol.
    #[arg(short = 'n', long, default_value = "5")]
    pub top: usize,

    /// Ping every sampled address first and only probe the ones that answer.
    #[arg(long)]
    pub ping: bool,

    /// Keep only the N fastest-pinging addresses. Implies --ping.
    #[arg(long)]
    pub ping_keep: Option<usize>,

    /// Also sample the provider's IPv6 ranges when no ranges are given.
    #[arg(long)]
    pub ipv6: bool,

    /// Whether to ignore the configuration file or not.
    #[arg(long)]
    pub no_config: bool,

    /// Custom path to config file
    #[arg(short, long, value_parser)]
    pub config_path: Option<PathBuf>,

    /// Greppable mode. Only output the endpoints, fastest first.
    #[arg(short, long)]
    pub greppable: bool,

    /// Accessible mode. Turns off features which negatively affect screen readers.
    #[arg(long)]
    pub accessible: bool,

    /// Print the ranking as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Everything a run needs, validated.
#[derive(Debug, Clone)]
pub struct ScanPlan {
    pub generator: GeneratorConfig,
    pub settings: ScanSettings,
}

impl Opts {
    pub fn read() -> Self {
        Self::parse()
    }

    /// Reads the command line arguments into an Opts struct and merge
    /// values found within the user configuration file.
    pub fn merge(&mut self, config: &Config) {
        if !self.no_config {
            self.merge_required(config);
            self.merge_optional(config);
        }
    }

    fn merge_required(&mut self, config: &Config) {
        macro_rules! merge_required {
            ($($field: ident),+) => {
                $(
                    if let Some(e) = &config.$field {
                        self.$field = e.clone();
                    }
                )+
            }
        }

        merge_required!(
            ranges, samples, seeds, tcp_timeout, udp_timeout, concurrency, scan_order, top, ping,
            ipv6, greppable, accessible, json
        );
    }

    fn merge_optional(&mut self, config: &Config) {
        macro_rules! merge_optional {
            ($($field: ident),+) => {
                $(
                    if config.$field.is_some() {
                        self.$field = config.$field.clone();
                    }
                )+
            }
        }

        merge_optional!(tcp_ports, udp_ports, ulimit, ping_keep);
    }

    pub const fn ping_enabled(&self) -> bool {
        self.ping || self.ping_keep.is_some()
    }

    /// Turns the merged options into validated settings, filling in the
    /// provider defaults for ranges and ports that were not given.
    pub fn scan_plan(&self) -> Result<ScanPlan, ConfigError> {
        let ranges = if self.ranges.is_empty() && self.seeds.is_empty() {
            let mut defaults = DEFAULT_V4_RANGES.to_vec();
            if self.ipv6 {
                defaults.extend(DEFAULT_V6_RANGES);
            }
            defaults.into_iter().map(str::parse).collect::<Result<Vec<AddressRange>, _>>()?
        } else {
            self.ranges
                .iter()
                .map(|range| range.parse())
                .collect::<Result<Vec<AddressRange>, _>>()?
        };

        let seeds = self
            .seeds
            .iter()
            .map(|seed| {
                seed.trim()
                    .parse::<IpAddr>()
                    .map_err(|_| ConfigError::InvalidSeed(seed.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let (tcp_ports, udp_ports) = match (&self.tcp_ports, &self.udp_ports) {
            (None, None) => (Vec::new(), DEFAULT_UDP_PORTS.to_vec()),
            (tcp, udp) => (tcp.clone().unwrap_or_default(), udp.clone().unwrap_or_default()),
        };

        let generator = GeneratorConfig {
            ranges,
            default_samples: self.samples,
            seeds,
            tcp_ports,
            udp_ports,
            order: self.scan_order,
        };
        generator.validate()?;

        let timeouts = Timeouts {
            tcp: Duration::from_millis(u64::from(self.tcp_timeout)),
            udp: Duration::from_millis(u64::from(self.udp_timeout)),
        };
        let settings = ScanSettings::new(timeouts, self.concurrency)?;

        Ok(ScanPlan {
            generator,
            settings,
        })
    }
}

impl Default for Opts {
    fn default() -> Self {
        Self {
            ranges: vec![],
            samples: DEFAULT_SAMPLES,
            seeds: vec![],
            tcp_ports: None,
            udp_ports: None,
            tcp_timeout: 1000,
            udp_timeout: 1000,
            concurrency: 1000,
            ulimit: None,
            scan_order: ScanOrder::Random,
            top: 5,
            ping: false,
            ping_keep: None,
            ipv6: false,
            no_config: true,
            config_path: None,
            greppable: true,
            accessible: false,
            json: false,
        }
    }
}

/// Struct used to deserialize the options specified within our config file.
/// These will be further merged with our command line arguments in order to
/// generate the final Opts struct.
#[derive(Debug, Deserialize)]
pub struct Config {
    ranges: Option<Vec<String>>,
    samples: Option<usize>,
    seeds: Option<Vec<String>>,
    tcp_ports: Option<Vec<u16>>,
    udp_ports: Option<Vec<u16>>,
    tcp_timeout: Option<u32>,
    udp_timeout: Option<u32>,
    concurrency: Option<usize>,
    ulimit: Option<u64>,
    scan_order: Option<ScanOrder>,
    top: Option<usize>,
    ping: Option<bool>,
    ping_keep: Option<usize>,
    ipv6: Option<bool>,
    greppable: Option<bool>,
    accessible: Option<bool>,
    json: Option<bool>,
}

impl Config {
    /// Reads the configuration file with TOML format and parses it into a
    /// Config struct. A missing file at the default path counts as empty; a
    /// path given explicitly must exist.
    ///
    /// # Format
    ///
    /// ranges = ["162.159.192.", "188.114.96.0/24#50"]
    /// seeds = ["162.159.192.1"]
    /// udp_ports = [2408, 500, 1701]
    /// udp_timeout = 800
    /// concurrency = 2000
    /// scan_order = "Serial"
    ///
    pub fn read(custom_config_path: Option<PathBuf>) -> Result<Self, ConfigFileError> {
        let explicit = custom_config_path.is_some();
        let config_path = custom_config_path.unwrap_or_else(default_config_path);

        let content = match fs::read_to_string(&config_path) {
            Ok(content) => content,
            Err(e) if !explicit && e.kind() == ErrorKind::NotFound => String::new(),
            Err(source) => {
                return Err(ConfigFileError::Read {
                    path: config_path,
                    source,
                })
            }
        };

        Ok(toml::from_str(&content)?)
    }
}

/// Constructs default path to config toml
pub fn default_config_path() -> PathBuf {
    let mut config_path = dirs::home_dir().unwrap_or_default();
    config_path.push(".anycast-probe.toml");
    config_path
}
