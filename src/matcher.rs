//! Cancellable per-packet pattern evaluation.
//!
//! Each evaluation runs as its own task reporting over a single-use channel;
//! the caller races that channel against the cancellation signal. The task
//! checks the signal once at entry, not during the search: a cancellation
//! that arrives mid-search only stops the caller from waiting, the in-flight
//! task runs to completion and its result is discarded. That entry-only check
//! is deliberate and callers must not assume a stronger guarantee.

use async_trait::async_trait;
use tokio::sync::oneshot;
use tracing::{debug, error, info};

use crate::error::{MatchError, Result};
use crate::packet::DecodedPacket;
use crate::signal::{CancelReason, CancelSignal};

/// The byte pattern searched for in packet payloads. Immutable for the
/// duration of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pattern: Vec<u8>,
}

impl SearchQuery {
    pub fn new(pattern: impl Into<Vec<u8>>) -> Self {
        Self {
            pattern: pattern.into(),
        }
    }

    pub fn pattern(&self) -> &[u8] {
        &self.pattern
    }

    pub fn is_empty(&self) -> bool {
        self.pattern.is_empty()
    }
}

/// Capability to decide whether one packet's payload contains the pattern.
#[async_trait]
pub trait PacketFinder: Send + Sync {
    /// `Ok(true)` on a confirmed match, `Ok(false)` when the payload does not
    /// contain the pattern (including the routine empty-payload case).
    async fn find_in_packet(
        &self,
        signal: &CancelSignal,
        packet: Option<DecodedPacket>,
        query: &SearchQuery,
    ) -> Result<bool>;
}

/// Exact case-sensitive substring matcher over TCP/UDP payloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct PacketMatcher;

impl PacketMatcher {
    pub fn new() -> Self {
        Self
    }

    fn evaluate(
        signal: &CancelSignal,
        packet: Option<&DecodedPacket>,
        query: &SearchQuery,
    ) -> Result<bool> {
        // Checked once at entry only; see the module docs.
        if let Some(err) = signal.error() {
            return Err(err);
        }

        let Some(packet) = packet else {
            error!("no packet was supplied for matching");
            return Err(MatchError::NilPacket);
        };

        if query.is_empty() {
            error!("an empty pattern cannot be searched in a packet payload");
            return Err(MatchError::EmptyPattern);
        }

        // The capture filter pre-selects tcp/udp; this is a defensive check,
        // not a filter.
        let Some(transport) = packet.transport() else {
            error!("packet has neither a tcp nor a udp layer");
            return Err(MatchError::NotTransportPacket);
        };

        let payload = transport.payload();
        if payload.is_empty() {
            // Pure ACKs and other dataless packets are routine, not faults.
            debug!("skipping packet that carries no application data");
            return Ok(false);
        }

        let pattern = query.pattern();
        let found = payload.windows(pattern.len()).any(|w| w == pattern);

        if found {
            match packet.ipv4() {
                Some(ipv4) => info!(
                    src_port = transport.src_port,
                    dst_port = transport.dst_port,
                    src_ip = %ipv4.source,
                    dst_ip = %ipv4.destination,
                    "found pattern in packet payload"
                ),
                None => info!(
                    src_port = transport.src_port,
                    dst_port = transport.dst_port,
                    "found pattern in packet payload"
                ),
            }
        }

        Ok(found)
    }

    /// Wait for the evaluation's handoff channel or the cancellation signal,
    /// whichever resolves first. If cancellation wins, the in-flight
    /// evaluation keeps running and its eventual result is discarded.
    async fn await_result(
        signal: &CancelSignal,
        rx: oneshot::Receiver<Result<bool>>,
    ) -> Result<bool> {
        tokio::select! {
            outcome = rx => match outcome {
                Ok(outcome) => outcome,
                // Sender dropped without reporting; only happens when the
                // runtime is tearing the task down during shutdown.
                Err(_) => Err(signal.reason().unwrap_or(CancelReason::Cancelled).into()),
            },
            reason = signal.cancelled() => Err(reason.into()),
        }
    }
}

#[async_trait]
impl PacketFinder for PacketMatcher {
    async fn find_in_packet(
        &self,
        signal: &CancelSignal,
        packet: Option<DecodedPacket>,
        query: &SearchQuery,
    ) -> Result<bool> {
        let (tx, rx) = oneshot::channel();
        let task_signal = signal.clone();
        let task_query = query.clone();

        tokio::spawn(async move {
            // The receiver may have stopped waiting; the result is then
            // discarded along with this task.
            let _ = tx.send(Self::evaluate(&task_signal, packet.as_ref(), &task_query));
        });

        Self::await_result(signal, rx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tcp_packet(payload: &[u8]) -> DecodedPacket {
        DecodedPacket::new()
            .with_tcp(12345, 54321, payload.to_vec())
            .with_ipv4(
                std::net::Ipv4Addr::new(192, 168, 1, 100),
                std::net::Ipv4Addr::new(10, 0, 0, 1),
            )
    }

    fn udp_packet(payload: &[u8]) -> DecodedPacket {
        DecodedPacket::new().with_udp(12345, 9090, payload.to_vec())
    }

    #[tokio::test]
    async fn test_pattern_present_in_tcp_payload() {
        let matcher = PacketMatcher::new();
        let signal = CancelSignal::new();
        let query = SearchQuery::new(&b"control-plane.io"[..]);

        let packet = tcp_packet(b"GET / HTTP/1.1\r\nHost: control-plane.io\r\n\r\n");
        let got = matcher
            .find_in_packet(&signal, Some(packet), &query)
            .await;
        assert_eq!(got, Ok(true));
    }

    #[tokio::test]
    async fn test_pattern_absent_from_tcp_payload() {
        let matcher = PacketMatcher::new();
        let signal = CancelSignal::new();
        let query = SearchQuery::new(&b"control-plane.io"[..]);

        let got = matcher
            .find_in_packet(&signal, Some(tcp_packet(b"nothing to see here")), &query)
            .await;
        assert_eq!(got, Ok(false));
    }

    #[tokio::test]
    async fn test_pattern_present_in_udp_payload() {
        let matcher = PacketMatcher::new();
        let signal = CancelSignal::new();
        let query = SearchQuery::new(&b"foo"[..]);

        let got = matcher
            .find_in_packet(&signal, Some(udp_packet(b"some foo datagram")), &query)
            .await;
        assert_eq!(got, Ok(true));
    }

    #[tokio::test]
    async fn test_pattern_absent_from_udp_payload() {
        let matcher = PacketMatcher::new();
        let signal = CancelSignal::new();
        let query = SearchQuery::new(&b"bar"[..]);

        let got = matcher
            .find_in_packet(&signal, Some(udp_packet(b"some foo datagram")), &query)
            .await;
        assert_eq!(got, Ok(false));
    }

    #[tokio::test]
    async fn test_empty_payload_is_not_an_error() {
        let matcher = PacketMatcher::new();
        let signal = CancelSignal::new();
        let query = SearchQuery::new(&b"anything"[..]);

        let got = matcher
            .find_in_packet(&signal, Some(tcp_packet(b"")), &query)
            .await;
        assert_eq!(got, Ok(false));
    }

    #[tokio::test]
    async fn test_non_transport_packet() {
        let matcher = PacketMatcher::new();
        let signal = CancelSignal::new();
        let query = SearchQuery::new(&b"foobar"[..]);

        let ipv4_only = DecodedPacket::new().with_ipv4(
            std::net::Ipv4Addr::new(1, 1, 1, 1),
            std::net::Ipv4Addr::new(2, 2, 2, 2),
        );
        let got = matcher
            .find_in_packet(&signal, Some(ipv4_only), &query)
            .await;
        assert_eq!(got, Err(MatchError::NotTransportPacket));

        let bare = DecodedPacket::new();
        let got = matcher.find_in_packet(&signal, Some(bare), &query).await;
        assert_eq!(got, Err(MatchError::NotTransportPacket));
    }

    #[tokio::test]
    async fn test_empty_pattern_regardless_of_packet() {
        let matcher = PacketMatcher::new();
        let signal = CancelSignal::new();
        let query = SearchQuery::new(Vec::new());

        let got = matcher
            .find_in_packet(&signal, Some(tcp_packet(b"payload")), &query)
            .await;
        assert_eq!(got, Err(MatchError::EmptyPattern));

        // Even a packet outside the transport contract reports the empty
        // pattern first.
        let got = matcher
            .find_in_packet(&signal, Some(DecodedPacket::new()), &query)
            .await;
        assert_eq!(got, Err(MatchError::EmptyPattern));
    }

    #[tokio::test]
    async fn test_absent_packet() {
        let matcher = PacketMatcher::new();
        let signal = CancelSignal::new();
        let query = SearchQuery::new(&b"foo"[..]);

        let got = matcher.find_in_packet(&signal, None, &query).await;
        assert_eq!(got, Err(MatchError::NilPacket));
    }

    #[tokio::test]
    async fn test_already_cancelled_signal() {
        let matcher = PacketMatcher::new();
        let signal = CancelSignal::new();
        signal.cancel(CancelReason::Cancelled);
        let query = SearchQuery::new(&b"control-plane.io"[..]);

        let got = matcher
            .find_in_packet(&signal, Some(tcp_packet(b"control-plane.io")), &query)
            .await;
        assert_eq!(got, Err(MatchError::Cancelled));
    }

    #[tokio::test]
    async fn test_already_expired_deadline() {
        let matcher = PacketMatcher::new();
        let signal = CancelSignal::new();
        signal.cancel(CancelReason::DeadlineExceeded);
        let query = SearchQuery::new(&b"control-plane.io"[..]);

        let got = matcher
            .find_in_packet(&signal, Some(tcp_packet(b"control-plane.io")), &query)
            .await;
        assert_eq!(got, Err(MatchError::DeadlineExceeded));
    }

    #[tokio::test]
    async fn test_cancellation_mid_evaluation_stops_the_wait() {
        let signal = CancelSignal::new();

        // An evaluation that never reports: the sender stays alive and
        // silent, like a worker still grinding through a payload.
        let (tx, rx) = oneshot::channel();

        let canceller = signal.clone();
        tokio::spawn(async move {
            canceller.cancel(CancelReason::Cancelled);
        });

        let got = PacketMatcher::await_result(&signal, rx).await;
        assert_eq!(got, Err(MatchError::Cancelled));

        // The worker was still in flight when the caller stopped waiting;
        // whatever it eventually reports goes nowhere.
        assert!(tx.send(Ok(true)).is_err());
    }

    #[tokio::test]
    async fn test_evaluation_is_idempotent() {
        let matcher = PacketMatcher::new();
        let signal = CancelSignal::new();
        let query = SearchQuery::new(&b"marker"[..]);
        let packet = tcp_packet(b"leading bytes marker trailing bytes");

        let first = matcher
            .find_in_packet(&signal, Some(packet.clone()), &query)
            .await;
        let second = matcher.find_in_packet(&signal, Some(packet), &query).await;
        assert_eq!(first, Ok(true));
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_both_layers_uses_tcp_payload() {
        let matcher = PacketMatcher::new();
        let signal = CancelSignal::new();
        let query = SearchQuery::new(&b"marker"[..]);

        // Inconsistent upstream decode: pattern sits only in the UDP layer,
        // so TCP priority must report no match.
        let packet = DecodedPacket::new()
            .with_tcp(1, 2, b"tcp payload".to_vec())
            .with_udp(3, 4, b"udp marker payload".to_vec());
        let got = matcher.find_in_packet(&signal, Some(packet), &query).await;
        assert_eq!(got, Ok(false));
    }

    #[tokio::test]
    async fn test_pattern_longer_than_payload() {
        let matcher = PacketMatcher::new();
        let signal = CancelSignal::new();
        let query = SearchQuery::new(&b"a very long marker pattern"[..]);

        let got = matcher
            .find_in_packet(&signal, Some(tcp_packet(b"short")), &query)
            .await;
        assert_eq!(got, Ok(false));
    }
}
