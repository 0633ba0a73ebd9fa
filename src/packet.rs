//! Decoded packet data model.
//!
//! A frame is decoded once at capture time into an owned, layer-addressable
//! view; the matcher only ever looks up layers and payload bytes on it.

use std::net::Ipv4Addr;

use etherparse::{NetSlice, SlicedPacket, TransportSlice};

/// A TCP or UDP layer: ports plus the application payload it carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportLayer {
    pub src_port: u16,
    pub dst_port: u16,
    payload: Vec<u8>,
}

impl TransportLayer {
    pub fn new(src_port: u16, dst_port: u16, payload: Vec<u8>) -> Self {
        Self {
            src_port,
            dst_port,
            payload,
        }
    }

    /// Application-level bytes, excluding headers.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

/// Source and destination of the IPv4 layer, used for match diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Layer {
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
}

/// A network frame already parsed into addressable protocol layers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedPacket {
    tcp: Option<TransportLayer>,
    udp: Option<TransportLayer>,
    ipv4: Option<Ipv4Layer>,
}

impl DecodedPacket {
    /// A packet with no layers. Add layers with the `with_*` builders.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a raw Ethernet frame into its layers.
    pub fn from_ethernet(frame: &[u8]) -> Result<Self, etherparse::err::packet::SliceError> {
        let sliced = SlicedPacket::from_ethernet(frame)?;
        Ok(Self::from_sliced(&sliced))
    }

    fn from_sliced(sliced: &SlicedPacket) -> Self {
        let ipv4 = match &sliced.net {
            Some(NetSlice::Ipv4(v4)) => Some(Ipv4Layer {
                source: v4.header().source_addr(),
                destination: v4.header().destination_addr(),
            }),
            _ => None,
        };

        let (tcp, udp) = match &sliced.transport {
            Some(TransportSlice::Tcp(tcp)) => (
                Some(TransportLayer::new(
                    tcp.source_port(),
                    tcp.destination_port(),
                    tcp.payload().to_vec(),
                )),
                None,
            ),
            Some(TransportSlice::Udp(udp)) => (
                None,
                Some(TransportLayer::new(
                    udp.source_port(),
                    udp.destination_port(),
                    udp.payload().to_vec(),
                )),
            ),
            _ => (None, None),
        };

        Self { tcp, udp, ipv4 }
    }

    pub fn with_tcp(mut self, src_port: u16, dst_port: u16, payload: impl Into<Vec<u8>>) -> Self {
        self.tcp = Some(TransportLayer::new(src_port, dst_port, payload.into()));
        self
    }

    pub fn with_udp(mut self, src_port: u16, dst_port: u16, payload: impl Into<Vec<u8>>) -> Self {
        self.udp = Some(TransportLayer::new(src_port, dst_port, payload.into()));
        self
    }

    pub fn with_ipv4(mut self, source: Ipv4Addr, destination: Ipv4Addr) -> Self {
        self.ipv4 = Some(Ipv4Layer {
            source,
            destination,
        });
        self
    }

    pub fn tcp(&self) -> Option<&TransportLayer> {
        self.tcp.as_ref()
    }

    pub fn udp(&self) -> Option<&TransportLayer> {
        self.udp.as_ref()
    }

    pub fn ipv4(&self) -> Option<&Ipv4Layer> {
        self.ipv4.as_ref()
    }

    /// The transport layer to inspect. TCP wins if an inconsistent upstream
    /// decode ever reports both.
    pub fn transport(&self) -> Option<&TransportLayer> {
        self.tcp.as_ref().or(self.udp.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use etherparse::PacketBuilder;

    fn tcp_frame(payload: &[u8]) -> Vec<u8> {
        let builder = PacketBuilder::ethernet2([1, 2, 3, 4, 5, 6], [7, 8, 9, 10, 11, 12])
            .ipv4([192, 168, 1, 100], [10, 0, 0, 1], 64)
            .tcp(12345, 54321, 1, 4096);
        let mut frame = Vec::with_capacity(builder.size(payload.len()));
        builder.write(&mut frame, payload).unwrap();
        frame
    }

    fn udp_frame(payload: &[u8]) -> Vec<u8> {
        let builder = PacketBuilder::ethernet2([1, 2, 3, 4, 5, 6], [7, 8, 9, 10, 11, 12])
            .ipv4([192, 168, 1, 100], [10, 0, 0, 1], 64)
            .udp(12345, 9090);
        let mut frame = Vec::with_capacity(builder.size(payload.len()));
        builder.write(&mut frame, payload).unwrap();
        frame
    }

    #[test]
    fn test_decode_tcp_frame() {
        let packet = DecodedPacket::from_ethernet(&tcp_frame(b"hello")).unwrap();

        let tcp = packet.tcp().expect("tcp layer");
        assert_eq!(tcp.src_port, 12345);
        assert_eq!(tcp.dst_port, 54321);
        assert_eq!(tcp.payload(), b"hello");
        assert!(packet.udp().is_none());

        let ipv4 = packet.ipv4().expect("ipv4 layer");
        assert_eq!(ipv4.source, Ipv4Addr::new(192, 168, 1, 100));
        assert_eq!(ipv4.destination, Ipv4Addr::new(10, 0, 0, 1));
    }

    #[test]
    fn test_decode_udp_frame() {
        let packet = DecodedPacket::from_ethernet(&udp_frame(b"dns-ish")).unwrap();

        let udp = packet.udp().expect("udp layer");
        assert_eq!(udp.src_port, 12345);
        assert_eq!(udp.dst_port, 9090);
        assert_eq!(udp.payload(), b"dns-ish");
        assert!(packet.tcp().is_none());
    }

    #[test]
    fn test_decode_non_transport_frame() {
        let builder = PacketBuilder::ethernet2([1, 2, 3, 4, 5, 6], [7, 8, 9, 10, 11, 12])
            .ipv4([192, 168, 1, 100], [10, 0, 0, 1], 64)
            .icmpv4_echo_request(1, 1);
        let mut frame = Vec::with_capacity(builder.size(0));
        builder.write(&mut frame, &[]).unwrap();

        let packet = DecodedPacket::from_ethernet(&frame).unwrap();
        assert!(packet.tcp().is_none());
        assert!(packet.udp().is_none());
        assert!(packet.transport().is_none());
        assert!(packet.ipv4().is_some());
    }

    #[test]
    fn test_transport_prefers_tcp() {
        let packet = DecodedPacket::new()
            .with_tcp(1, 2, b"tcp data".to_vec())
            .with_udp(3, 4, b"udp data".to_vec());

        let transport = packet.transport().expect("transport layer");
        assert_eq!(transport.payload(), b"tcp data");
    }

    #[test]
    fn test_decode_truncated_frame_fails() {
        assert!(DecodedPacket::from_ethernet(&[0u8; 4]).is_err());
    }
}
