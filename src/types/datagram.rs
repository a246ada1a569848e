//! Datagram wire codec
//!
//! A small-data stream is a plain concatenation of datagrams, each a 16-byte
//! little-endian header followed by its payload:
//!
//! | offset | size | field |
//! |--------|------|-------|
//! | 0      | 8    | timestamp (pairing key) |
//! | 8      | 1    | service ([`TransitionId`]) |
//! | 9      | 1    | reserved |
//! | 10     | 2    | source index |
//! | 12     | 4    | payload length |

use bytes::{BufMut, Bytes, BytesMut};

use super::TransitionId;
use crate::{BuilderError, Result};

/// Size of the fixed datagram header in bytes.
pub const DGRAM_HEADER_SIZE: usize = 16;

/// Decoded datagram header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatagramHeader {
    pub timestamp: u64,
    pub service: TransitionId,
    pub source: u16,
    pub payload_len: u32,
}

impl DatagramHeader {
    /// Parse a header at `offset` within `data`.
    ///
    /// `stream_source` is only used for error context. Fails with
    /// `TruncatedStream` when fewer than [`DGRAM_HEADER_SIZE`] bytes remain.
    pub fn parse(data: &[u8], offset: usize, stream_source: usize) -> Result<Self> {
        let header = data
            .get(offset..offset + DGRAM_HEADER_SIZE)
            .ok_or_else(|| BuilderError::truncated(stream_source))?;

        let timestamp = u64::from_le_bytes([
            header[0], header[1], header[2], header[3], header[4], header[5], header[6], header[7],
        ]);
        let service = TransitionId::from_u8(header[8]).ok_or_else(|| {
            BuilderError::malformed_datagram(
                stream_source,
                offset,
                format!("unknown service id {}", header[8]),
            )
        })?;
        let source = u16::from_le_bytes([header[10], header[11]]);
        let payload_len = u32::from_le_bytes([header[12], header[13], header[14], header[15]]);

        Ok(Self { timestamp, service, source, payload_len })
    }

    /// Header plus payload size.
    pub fn extent(&self) -> usize {
        DGRAM_HEADER_SIZE + self.payload_len as usize
    }

    fn write(&self, out: &mut BytesMut) {
        out.put_u64_le(self.timestamp);
        out.put_u8(self.service.as_u8());
        out.put_u8(0);
        out.put_u16_le(self.source);
        out.put_u32_le(self.payload_len);
    }
}

/// One source-tagged unit of small data.
///
/// Immutable after creation; cloning shares the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub source: usize,
    pub timestamp: u64,
    pub service: TransitionId,
    pub payload: Bytes,
}

impl Datagram {
    pub fn new(
        source: usize,
        timestamp: u64,
        service: TransitionId,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self { source, timestamp, service, payload: payload.into() }
    }

    /// Convenience constructor for an L1Accept event datagram.
    pub fn event(source: usize, timestamp: u64, payload: impl Into<Bytes>) -> Self {
        Self::new(source, timestamp, TransitionId::L1Accept, payload)
    }

    /// Convenience constructor for a transition without payload.
    pub fn transition(source: usize, timestamp: u64, service: TransitionId) -> Self {
        Self::new(source, timestamp, service, Bytes::new())
    }

    pub fn is_transition(&self) -> bool {
        self.service.is_transition()
    }

    /// Encoded size on the wire.
    pub fn extent(&self) -> usize {
        DGRAM_HEADER_SIZE + self.payload.len()
    }

    pub fn header(&self) -> DatagramHeader {
        DatagramHeader {
            timestamp: self.timestamp,
            service: self.service,
            source: self.source as u16,
            payload_len: self.payload.len() as u32,
        }
    }

    /// Append the wire encoding to `out`.
    pub fn encode_into(&self, out: &mut BytesMut) {
        out.reserve(self.extent());
        self.header().write(out);
        out.extend_from_slice(&self.payload);
    }

    pub fn encode(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(self.extent());
        self.encode_into(&mut out);
        out.freeze()
    }

    /// Decode the datagram at `offset` in `data`, sharing the payload.
    ///
    /// `stream_source` overrides the header's source tag: the position of a
    /// view, not what the producer wrote, decides attribution.
    pub fn decode_at(data: &Bytes, offset: usize, stream_source: usize) -> Result<Self> {
        let header = DatagramHeader::parse(data, offset, stream_source)?;
        let start = offset + DGRAM_HEADER_SIZE;
        let end = start + header.payload_len as usize;
        if end > data.len() {
            return Err(BuilderError::truncated(stream_source));
        }

        Ok(Self {
            source: stream_source,
            timestamp: header.timestamp,
            service: header.service,
            payload: data.slice(start..end),
        })
    }
}

/// Iterator over the datagrams of one contiguous stream buffer.
///
/// Stops after the first error.
pub struct DatagramIter {
    data: Bytes,
    offset: usize,
    source: usize,
    failed: bool,
}

impl DatagramIter {
    pub fn new(data: Bytes, source: usize) -> Self {
        Self { data, offset: 0, source, failed: false }
    }
}

impl Iterator for DatagramIter {
    type Item = Result<Datagram>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.data.len() {
            return None;
        }

        match Datagram::decode_at(&self.data, self.offset, self.source) {
            Ok(dgram) => {
                self.offset += dgram.extent();
                Some(Ok(dgram))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Encode a sequence of datagrams into one stream buffer.
pub fn encode_stream<'a>(dgrams: impl IntoIterator<Item = &'a Datagram>) -> Bytes {
    let mut out = BytesMut::new();
    for dgram in dgrams {
        dgram.encode_into(&mut out);
    }
    out.freeze()
}
