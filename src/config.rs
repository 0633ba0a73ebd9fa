use std::fmt;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::capture::CaptureConfig;
use crate::matcher::SearchQuery;
use crate::runner::RunParams;

/// Transport protocols the capture filter selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
    /// Both TCP and UDP.
    Any,
}

impl Protocol {
    /// BPF filter expression installed on the capture handle.
    pub fn bpf_filter(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Any => "tcp or udp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
            Protocol::Any => write!(f, "tcp or udp"),
        }
    }
}

/// Run configuration, sourced from flags, environment, an optional config
/// file, and defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Interface to capture on.
    pub interface: String,
    /// Capture snapshot length in bytes.
    pub snaplen: i32,
    /// Put the interface in promiscuous mode.
    pub promisc: bool,
    /// Marker string searched for in packet payloads.
    pub search_string: String,
    /// Transport protocol selection for the capture filter.
    pub protocol: Protocol,
    /// Number of matches that ends the run successfully.
    pub matches: u64,
    /// Wall-clock budget for the whole run.
    pub timeout_seconds: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interface: "eth0".to_string(),
            snaplen: 1024,
            promisc: false,
            search_string: "control-plane.io".to_string(),
            protocol: Protocol::Tcp,
            matches: 3,
            timeout_seconds: 60,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;

        Ok(config)
    }

    /// Reject parameter combinations the run loop cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.search_string.is_empty() {
            bail!("search string must not be empty");
        }
        if self.matches == 0 {
            bail!("match threshold must be a positive integer");
        }
        if self.timeout_seconds == 0 {
            bail!("timeout must be a positive number of seconds");
        }
        if self.snaplen <= 0 {
            bail!("snaplen must be a positive number of bytes");
        }
        Ok(())
    }

    pub fn run_params(&self) -> RunParams {
        RunParams {
            query: SearchQuery::new(self.search_string.as_bytes()),
            threshold: self.matches,
            timeout: Duration::from_secs(self.timeout_seconds),
        }
    }

    pub fn capture(&self) -> CaptureConfig {
        CaptureConfig {
            interface: self.interface.clone(),
            snaplen: self.snaplen,
            promiscuous: self.promisc,
            protocol: self.protocol,
        }
    }
}
