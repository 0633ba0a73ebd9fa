//! netgrep answers one question about live traffic: does it contain a marker
//! string at least N times within T seconds?
//!
//! The core is [`matcher::PacketMatcher`] (cancellable per-packet payload
//! search) and [`runner::run`] (the loop that races packet arrival against
//! the run deadline and external cancellation). [`capture`] feeds the loop
//! from a live pcap handle.

pub mod capture;
pub mod config;
pub mod error;
pub mod matcher;
pub mod packet;
pub mod runner;
pub mod signal;

pub use error::MatchError;
pub use matcher::{PacketFinder, PacketMatcher, SearchQuery};
pub use packet::DecodedPacket;
pub use runner::{run, RunParams, RunReport, TerminalState};
pub use signal::{CancelReason, CancelSignal};
