use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::info;

use netgrep::config::{Config, Protocol};
use netgrep::{capture, runner, CancelReason, CancelSignal, PacketMatcher, TerminalState};

#[derive(Parser)]
#[command(name = "netgrep")]
#[command(author, version, about = "Detects a marker string in live TCP/UDP traffic")]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Network interface to capture on
    #[arg(short, long, env = "IFACE")]
    pub interface: Option<String>,

    /// Capture snapshot length in bytes
    #[arg(long, env = "SNAPLEN")]
    pub snaplen: Option<i32>,

    /// Put the interface in promiscuous mode
    #[arg(long, env = "PROMISC")]
    pub promisc: bool,

    /// String to search for in packet payloads
    #[arg(short, long, env = "SEARCH_STRING")]
    pub search_string: Option<String>,

    /// Transport protocol to capture
    #[arg(short, long, env = "PROTOCOL", value_enum)]
    pub protocol: Option<Protocol>,

    /// Number of matches that ends the run successfully
    #[arg(short, long, env = "MATCHES")]
    pub matches: Option<u64>,

    /// Wall-clock budget for the whole run, in seconds
    #[arg(short, long, env = "TIMEOUT_SECONDS")]
    pub timeout_seconds: Option<u64>,

    /// Enable debug logging
    #[arg(short, long)]
    pub debug: bool,
}

impl Cli {
    /// Resolve the effective configuration: config file (or defaults)
    /// overridden by flags and environment.
    fn into_config(self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };

        if let Some(interface) = self.interface {
            config.interface = interface;
        }
        if let Some(snaplen) = self.snaplen {
            config.snaplen = snaplen;
        }
        if self.promisc {
            config.promisc = true;
        }
        if let Some(search_string) = self.search_string {
            config.search_string = search_string;
        }
        if let Some(protocol) = self.protocol {
            config.protocol = protocol;
        }
        if let Some(matches) = self.matches {
            config.matches = matches;
        }
        if let Some(timeout_seconds) = self.timeout_seconds {
            config.timeout_seconds = timeout_seconds;
        }

        config.validate()?;
        Ok(config)
    }
}

pub async fn run_command(cli: Cli) -> Result<()> {
    let config = cli.into_config()?;
    info!(?config, "starting with configuration");

    let signal = CancelSignal::new();
    let mut source =
        capture::start(&config.capture(), &signal).context("failed to start packet capture")?;

    // Operator interrupt becomes an external cancellation.
    let interrupt_signal = signal.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received interrupt from OS, cancelling run");
            interrupt_signal.cancel(CancelReason::Cancelled);
        }
    });

    let matcher = PacketMatcher::new();
    let params = config.run_params();
    let report = runner::run(&mut source, &signal, &matcher, &params).await;

    // Stop the capture reader; any leaked evaluation task observes this too.
    signal.cancel(match report.state {
        TerminalState::TimedOut => CancelReason::DeadlineExceeded,
        _ => CancelReason::Cancelled,
    });

    match report.state {
        TerminalState::ThresholdReached => {
            info!(matches = report.matches, "search succeeded");
            Ok(())
        }
        TerminalState::TimedOut => bail!(
            "timed out after {}s while searching for {:?} in {} packets ({} of {} matches)",
            config.timeout_seconds,
            config.search_string,
            config.protocol,
            report.matches,
            config.matches
        ),
        TerminalState::Cancelled => bail!(
            "cancelled while searching for {:?} in {} packets ({} of {} matches)",
            config.search_string,
            config.protocol,
            report.matches,
            config.matches
        ),
        TerminalState::StreamError => bail!(
            "packet source closed while searching for {:?} ({} of {} matches)",
            config.search_string,
            report.matches,
            config.matches
        ),
    }
}
