use thiserror::Error;

/// Errors produced while evaluating a single packet.
///
/// Contract violations (`EmptyPattern`, `NilPacket`, `NotTransportPacket`)
/// and cancellation (`Cancelled`, `DeadlineExceeded`) are all returned to the
/// caller; none of them is fatal to a run.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum MatchError {
    #[error("not a tcp or udp packet")]
    NotTransportPacket,

    #[error("empty pattern cannot be matched against packet data")]
    EmptyPattern,

    #[error("no packet was supplied for matching")]
    NilPacket,

    #[error("evaluation cancelled")]
    Cancelled,

    #[error("evaluation deadline exceeded")]
    DeadlineExceeded,
}

impl MatchError {
    /// True for the cancellation/deadline category, so callers can branch
    /// without string comparison.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, MatchError::Cancelled | MatchError::DeadlineExceeded)
    }
}

pub type Result<T> = std::result::Result<T, MatchError>;
