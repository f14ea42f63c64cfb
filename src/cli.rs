use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use netprobe::config::Config;
use netprobe::engine::{
    DnsRequest, HttpRequest, PingRequest, PortScanRequest, ProbeRequest, TracerouteRequest,
};
use netprobe::lookup::AddressFamily;
use netprobe::lookup::dns::parse_record_type;

/// Network diagnostics: ping, traceroute, TCP port scan, DNS and HTTP checks
#[derive(Parser, Debug, Clone)]
#[command(name = "netprobe")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Print result events as JSON lines
    #[arg(long = "json", global = true)]
    pub json: bool,

    /// Verbose logging on stderr (repeat for trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (default: ~/.config/netprobe/config.toml)
    #[arg(long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Delay between ping requests in seconds
    #[arg(short = 'i', long = "interval", global = true)]
    pub interval: Option<f64>,

    /// Concurrent connects during a port scan
    #[arg(long = "concurrency", global = true)]
    pub concurrency: Option<usize>,

    /// Skip reverse DNS lookups for traceroute hops
    #[arg(long = "no-dns", global = true)]
    pub no_dns: bool,

    /// Force IPv4
    #[arg(short = '4', long = "ipv4", global = true)]
    pub ipv4: bool,

    /// Force IPv6
    #[arg(short = '6', long = "ipv6", global = true)]
    pub ipv6: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Send ICMP echo requests
    Ping {
        target: String,
        /// Number of echo requests
        #[arg(short = 'c', long = "count", default_value = "4")]
        count: u32,
        /// Per-request timeout in milliseconds
        #[arg(short = 't', long = "timeout", default_value = "1000")]
        timeout_ms: u64,
    },
    /// Trace the route to a host
    Trace {
        target: String,
        /// Maximum TTL (hops)
        #[arg(short = 'm', long = "max-hops", default_value = "30")]
        max_hops: u8,
        /// Per-hop timeout in milliseconds
        #[arg(short = 't', long = "timeout", default_value = "1000")]
        timeout_ms: u64,
    },
    /// TCP connect scan
    Scan {
        target: String,
        /// Ports, e.g. "22,80,443,8000-8100"
        #[arg(short = 'p', long = "ports", default_value = "1-1024")]
        ports: String,
        /// Per-port connect timeout in milliseconds
        #[arg(short = 't', long = "timeout", default_value = "500")]
        timeout_ms: u64,
    },
    /// Query DNS records
    Dns {
        name: String,
        /// Record type (A, AAAA, CNAME, MX, NS, PTR, SOA, TXT, ...)
        #[arg(short = 'r', long = "type", default_value = "A")]
        record_type: String,
        /// DNS server address (default: system resolver)
        #[arg(short = 's', long = "server")]
        server: Option<String>,
    },
    /// Single HTTP GET, reporting the status line
    Http { url: String },
}

impl Args {
    /// Validate flag combinations that clap cannot express
    pub fn validate(&self) -> Result<(), String> {
        if self.ipv4 && self.ipv6 {
            return Err("Cannot specify both -4 and -6".into());
        }

        if let Some(interval) = self.interval
            && Duration::try_from_secs_f64(interval).is_err()
        {
            return Err("Interval must be a non-negative number of seconds".into());
        }

        if let Some(concurrency) = self.concurrency
            && concurrency == 0
        {
            return Err("Concurrency must be at least 1".into());
        }

        Ok(())
    }

    /// Apply command-line overrides on top of the loaded config
    pub fn apply_overrides(&self, mut config: Config) -> Config {
        if let Some(interval) = self.interval {
            config.ping_interval = Duration::from_secs_f64(interval);
        }
        if let Some(concurrency) = self.concurrency {
            config.scan_concurrency = concurrency;
        }
        if self.no_dns {
            config.reverse_dns = false;
        }
        if self.ipv4 {
            config.address_family = AddressFamily::V4;
        } else if self.ipv6 {
            config.address_family = AddressFamily::V6;
        }
        config.normalized()
    }

    /// Build the engine request for the chosen subcommand
    pub fn request(&self) -> Result<ProbeRequest, String> {
        Ok(match &self.command {
            Command::Ping {
                target,
                count,
                timeout_ms,
            } => ProbeRequest::Ping(PingRequest {
                target: target.clone(),
                count: *count,
                timeout_ms: *timeout_ms,
            }),
            Command::Trace {
                target,
                max_hops,
                timeout_ms,
            } => ProbeRequest::Traceroute(TracerouteRequest {
                target: target.clone(),
                max_hops: *max_hops,
                timeout_ms: *timeout_ms,
            }),
            Command::Scan {
                target,
                ports,
                timeout_ms,
            } => ProbeRequest::PortScan(PortScanRequest {
                target: target.clone(),
                ports: ports.clone(),
                timeout_ms: *timeout_ms,
            }),
            Command::Dns {
                name,
                record_type,
                server,
            } => ProbeRequest::Dns(DnsRequest {
                name: name.clone(),
                record_type: parse_record_type(record_type).map_err(|e| e.to_string())?,
                server: server.clone(),
            }),
            Command::Http { url } => ProbeRequest::Http(HttpRequest { url: url.clone() }),
        })
    }
}
