//! Live packet capture collaborator.
//!
//! Opens a pcap handle with a BPF filter for the selected transport
//! protocol, reads frames on a blocking task, decodes them, and feeds a
//! bounded channel. The run loop only ever sees the channel; a closed
//! channel means the source faulted or went away.

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::config::Protocol;
use crate::packet::DecodedPacket;
use crate::signal::CancelSignal;

/// Pcap read timeout; bounds how long the reader waits before rechecking
/// the cancellation signal.
const READ_TIMEOUT_MS: i32 = 500;

/// Decoded packets queued ahead of the run loop.
const CHANNEL_CAPACITY: usize = 64;

/// Capture handle configuration.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub interface: String,
    pub snaplen: i32,
    pub promiscuous: bool,
    pub protocol: Protocol,
}

/// Open the capture device and start the reader task. Returns the receiving
/// end of the packet stream.
pub fn start(config: &CaptureConfig, signal: &CancelSignal) -> Result<mpsc::Receiver<DecodedPacket>> {
    let mut cap = pcap::Capture::from_device(config.interface.as_str())
        .with_context(|| format!("unable to open capture device {:?}", config.interface))?
        .promisc(config.promiscuous)
        .snaplen(config.snaplen)
        .timeout(READ_TIMEOUT_MS)
        .open()
        .with_context(|| format!("unable to capture on the {:?} interface", config.interface))?;

    let filter = config.protocol.bpf_filter();
    cap.filter(filter, true)
        .with_context(|| format!("unable to set BPF filter to {:?}", filter))?;

    info!(interface = %config.interface, filter, "capturing traffic");

    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let reader_signal = signal.clone();
    tokio::task::spawn_blocking(move || read_loop(cap, tx, reader_signal));

    Ok(rx)
}

fn read_loop(
    mut cap: pcap::Capture<pcap::Active>,
    tx: mpsc::Sender<DecodedPacket>,
    signal: CancelSignal,
) {
    loop {
        if signal.is_cancelled() {
            debug!("capture reader stopping: run cancelled");
            return;
        }

        match cap.next_packet() {
            Ok(raw) => {
                let decoded = match DecodedPacket::from_ethernet(raw.data) {
                    Ok(packet) => packet,
                    Err(err) => {
                        debug!(error = %err, "skipping frame that failed to decode");
                        continue;
                    }
                };

                // Consumer gone means the run already hit a terminal state.
                if tx.blocking_send(decoded).is_err() {
                    return;
                }
            }
            // Normal idle tick; loop back and recheck the signal.
            Err(pcap::Error::TimeoutExpired) => continue,
            Err(err) => {
                error!(error = %err, "capture read failed");
                return;
            }
        }
    }
}
