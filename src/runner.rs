//! The processing control loop: drives a `PacketFinder` over a stream of
//! decoded packets and races packet arrival against the run deadline and
//! external cancellation.

use std::fmt;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tracing::{info, warn};

use crate::error::MatchError;
use crate::matcher::{PacketFinder, SearchQuery};
use crate::packet::DecodedPacket;
use crate::signal::{CancelReason, CancelSignal};

/// Parameters for one run, constructed once by the driver.
#[derive(Debug, Clone)]
pub struct RunParams {
    pub query: SearchQuery,
    /// Number of confirmed matches that ends the run successfully. Positive,
    /// validated by the driver.
    pub threshold: u64,
    /// Wall-clock budget, measured once from run start.
    pub timeout: Duration,
}

/// The single terminal outcome of a run; exactly one is ever produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalState {
    ThresholdReached,
    TimedOut,
    Cancelled,
    StreamError,
}

impl fmt::Display for TerminalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminalState::ThresholdReached => write!(f, "threshold reached"),
            TerminalState::TimedOut => write!(f, "timed out"),
            TerminalState::Cancelled => write!(f, "cancelled"),
            TerminalState::StreamError => write!(f, "packet source failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    pub state: TerminalState,
    pub matches: u64,
}

fn terminal_for(reason: CancelReason) -> TerminalState {
    match reason {
        CancelReason::Cancelled => TerminalState::Cancelled,
        CancelReason::DeadlineExceeded => TerminalState::TimedOut,
    }
}

/// Consume packets until the match threshold is reached, the deadline
/// elapses, the signal is set, or the source closes, whichever happens
/// first. One packet is in flight at a time; matches are counted in delivery
/// order. After a terminal state no further packets are consumed and a
/// cancelled evaluation's leaked task is not waited for.
pub async fn run(
    source: &mut mpsc::Receiver<DecodedPacket>,
    signal: &CancelSignal,
    finder: &dyn PacketFinder,
    params: &RunParams,
) -> RunReport {
    let deadline = Instant::now() + params.timeout;
    let sleep = time::sleep_until(deadline);
    tokio::pin!(sleep);

    let mut matches: u64 = 0;

    loop {
        tokio::select! {
            () = &mut sleep => {
                warn!(matches, threshold = params.threshold,
                      "deadline elapsed before the match threshold was reached");
                return RunReport { state: TerminalState::TimedOut, matches };
            }

            reason = signal.cancelled() => {
                match reason {
                    CancelReason::Cancelled => warn!(matches, "run cancelled"),
                    CancelReason::DeadlineExceeded => warn!(matches, "run deadline exceeded"),
                }
                return RunReport { state: terminal_for(reason), matches };
            }

            packet = source.recv() => {
                let Some(packet) = packet else {
                    warn!(matches, "packet source closed before the match threshold was reached");
                    return RunReport { state: TerminalState::StreamError, matches };
                };

                match finder.find_in_packet(signal, Some(packet), &params.query).await {
                    Ok(true) => {
                        matches += 1;
                        info!(count = matches, "pattern match confirmed");
                        if matches >= params.threshold {
                            info!(count = matches, "match threshold reached");
                            return RunReport { state: TerminalState::ThresholdReached, matches };
                        }
                    }
                    Ok(false) => {}
                    Err(err) if err.is_cancellation() => {
                        let state = match err {
                            MatchError::DeadlineExceeded => TerminalState::TimedOut,
                            _ => TerminalState::Cancelled,
                        };
                        return RunReport { state, matches };
                    }
                    // One unclassifiable packet never aborts the run.
                    Err(err) => warn!(error = %err, "skipping packet that could not be evaluated"),
                }
            }
        }
    }
}
