use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use serialbridge_transport::RingBuffer;
use tracing::debug;

use crate::crc::crc16;
use crate::error::{FrameError, Result};
use crate::topic::TopicId;

/// Sync marker that opens every px4 frame.
pub const PX4_MARKER: [u8; 3] = *b">>>";

/// px4 header: marker (3) + topic (1) + seq (1) + length (2) + crc (2).
pub const PX4_HEADER_LEN: usize = 9;

/// cobs header before stuffing: topic (1) + seq (1) + length (2) + crc (2).
pub const COBS_HEADER_LEN: usize = 6;

/// Record delimiter for the cobs protocol.
pub const COBS_DELIMITER: u8 = 0x00;

/// Default maximum payload size in bytes.
pub const DEFAULT_MAX_PAYLOAD: usize = 1024;

/// Default ring buffer capacity in bytes.
pub const DEFAULT_RING_CAPACITY: usize = 8192;

/// Wire protocol used on the link.
///
/// ```text
/// px4:  ┌─────┬───────┬─────┬──────────┬──────────┬─────────┐
///       │ >>> │ topic │ seq │ len (BE) │ crc (BE) │ payload │
///       └─────┴───────┴─────┴──────────┴──────────┴─────────┘
///
/// cobs: cobs( topic │ seq │ len (BE) │ crc (BE) │ payload ) 0x00
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Protocol {
    #[default]
    Px4,
    Cobs,
}

impl Protocol {
    /// Fixed header length, known before any frame is assembled.
    pub const fn header_len(self) -> usize {
        match self {
            Protocol::Px4 => PX4_HEADER_LEN,
            Protocol::Cobs => COBS_HEADER_LEN,
        }
    }

    /// Worst-case bytes on the wire for a payload of `payload_len` bytes.
    pub const fn max_wire_len(self, payload_len: usize) -> usize {
        match self {
            Protocol::Px4 => PX4_HEADER_LEN + payload_len,
            Protocol::Cobs => cobs_stuffed_max(COBS_HEADER_LEN + payload_len) + 1,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Protocol::Px4 => "px4",
            Protocol::Cobs => "cobs",
        }
    }
}

/// Upper bound on the stuffed size of `len` bytes: one code byte per started
/// 254-byte block, plus one.
const fn cobs_stuffed_max(len: usize) -> usize {
    len + len / 254 + 1
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Protocol {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "px4" => Ok(Protocol::Px4),
            "cobs" => Ok(Protocol::Cobs),
            other => Err(FrameError::Config(format!(
                "unknown serial protocol '{other}' (expected 'px4' or 'cobs')"
            ))),
        }
    }
}

/// One topic-tagged message recovered from the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Topic this payload belongs to.
    pub topic: TopicId,
    /// Sender sequence number (wrapping).
    pub seq: u8,
    /// The message payload.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(topic: TopicId, seq: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            topic,
            seq,
            payload: payload.into(),
        }
    }
}

/// Configuration shared by the reader and writer halves.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Wire protocol.
    pub protocol: Protocol,
    /// Maximum payload size in bytes.
    pub max_payload: usize,
    /// Ring buffer capacity in bytes.
    pub ring_capacity: usize,
    /// How long one read attempt waits for the link.
    pub read_poll: Duration,
    /// Upper bound on retrying a write that would block.
    pub write_timeout: Duration,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            protocol: Protocol::default(),
            max_payload: DEFAULT_MAX_PAYLOAD,
            ring_capacity: DEFAULT_RING_CAPACITY,
            read_poll: Duration::from_millis(100),
            write_timeout: Duration::from_millis(100),
        }
    }
}

impl FrameConfig {
    /// Largest payload that fits the length field, and whose worst-case
    /// wire encoding fits the ring buffer.
    pub fn effective_max_payload(&self) -> usize {
        let protocol = self.protocol;
        let mut max = self
            .max_payload
            .min(self.ring_capacity.saturating_sub(protocol.header_len()))
            .min(u16::MAX as usize);
        while max > 0 && protocol.max_wire_len(max) > self.ring_capacity {
            max -= 1;
        }
        max
    }

    /// Reject configurations that cannot carry a single frame.
    pub fn validate(&self) -> Result<()> {
        let smallest = self.protocol.max_wire_len(1);
        if self.ring_capacity < smallest {
            return Err(FrameError::Config(format!(
                "ring buffer of {} bytes cannot hold a {} byte {} frame",
                self.ring_capacity, smallest, self.protocol
            )));
        }
        if self.max_payload == 0 {
            return Err(FrameError::Config("max payload must be non-zero".into()));
        }
        if self.read_poll.is_zero() {
            return Err(FrameError::Config("read poll interval must be non-zero".into()));
        }
        Ok(())
    }
}

/// Encode one frame into `dst`.
pub fn encode_frame(
    protocol: Protocol,
    topic: TopicId,
    seq: u8,
    payload: &[u8],
    dst: &mut BytesMut,
) -> Result<()> {
    if payload.len() > u16::MAX as usize {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: u16::MAX as usize,
        });
    }
    let crc = crc16(payload);

    match protocol {
        Protocol::Px4 => {
            dst.reserve(PX4_HEADER_LEN + payload.len());
            dst.put_slice(&PX4_MARKER);
            put_header(dst, topic, seq, payload.len() as u16, crc);
            dst.put_slice(payload);
        }
        Protocol::Cobs => {
            let mut record = BytesMut::with_capacity(COBS_HEADER_LEN + payload.len());
            put_header(&mut record, topic, seq, payload.len() as u16, crc);
            record.put_slice(payload);
            let stuffed = cobs::encode_vec(&record);
            dst.reserve(stuffed.len() + 1);
            dst.put_slice(&stuffed);
            dst.put_u8(COBS_DELIMITER);
        }
    }
    Ok(())
}

fn put_header(dst: &mut BytesMut, topic: TopicId, seq: u8, len: u16, crc: u16) {
    dst.put_u8(topic);
    dst.put_u8(seq);
    dst.put_u16(len);
    dst.put_u16(crc);
}

/// Assemble at most one frame from the buffered bytes.
///
/// Returns `Ok(None)` if the buffer doesn't hold a complete frame yet.
/// Malformed input is consumed far enough to resynchronise and reported as
/// an error; the caller drops that frame and keeps reading.
pub fn decode_frame(
    protocol: Protocol,
    ring: &mut RingBuffer,
    max_payload: usize,
) -> Result<Option<Frame>> {
    match protocol {
        Protocol::Px4 => decode_px4(ring, max_payload),
        Protocol::Cobs => decode_cobs(ring, max_payload),
    }
}

fn decode_px4(ring: &mut RingBuffer, max_payload: usize) -> Result<Option<Frame>> {
    loop {
        match ring.find(&PX4_MARKER) {
            Some(0) => {}
            Some(pos) => {
                debug!(discarded = pos, "skipping bytes before frame marker");
                ring.skip(pos);
            }
            None => {
                // Keep a possible partial marker at the tail.
                let keep = ring.len().min(PX4_MARKER.len() - 1);
                let junk = ring.len() - keep;
                if junk > 0 {
                    debug!(discarded = junk, "no frame marker in buffered bytes");
                    ring.skip(junk);
                }
                return Ok(None);
            }
        }

        // In a run like ">>>>>" only the last three bytes can be the marker
        // of a frame whose topic isn't '>'.
        let last = marker_run(ring) - PX4_MARKER.len();

        match px4_frame_at(ring, 0, max_payload) {
            Ok(Some(frame)) => {
                ring.skip(PX4_HEADER_LEN + frame.payload.len());
                return Ok(Some(frame));
            }
            Ok(None) if last > 0 => {
                if let Ok(Some(frame)) = px4_frame_at(ring, last, max_payload) {
                    debug!(discarded = last, "skipping '>' run before frame marker");
                    ring.skip(last + PX4_HEADER_LEN + frame.payload.len());
                    return Ok(Some(frame));
                }
                return Ok(None);
            }
            Ok(None) => return Ok(None),
            Err(_) if last > 0 => {
                debug!(discarded = last, "skipping '>' run before frame marker");
                ring.skip(last);
            }
            Err(err) => {
                // Drop the marker only; the bytes behind it are rescanned.
                ring.skip(1);
                return Err(err);
            }
        }
    }
}

fn marker_run(ring: &RingBuffer) -> usize {
    let mut run = 0;
    while ring.get(run) == Some(PX4_MARKER[0]) {
        run += 1;
    }
    run
}

/// Parse a px4 frame whose marker starts `at` bytes into the buffer,
/// without consuming anything.
fn px4_frame_at(ring: &RingBuffer, at: usize, max_payload: usize) -> Result<Option<Frame>> {
    if ring.len() < at + PX4_HEADER_LEN {
        return Ok(None);
    }

    let mut head = vec![0u8; at + PX4_HEADER_LEN];
    ring.peek_into(&mut head);
    let header = &head[at..];
    let topic = header[3];
    let seq = header[4];
    let len = u16::from_be_bytes([header[5], header[6]]) as usize;
    let expected = u16::from_be_bytes([header[7], header[8]]);

    if len > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: len,
            max: max_payload,
        });
    }

    if ring.len() < at + PX4_HEADER_LEN + len {
        return Ok(None);
    }

    let mut record = vec![0u8; at + PX4_HEADER_LEN + len];
    ring.peek_into(&mut record);
    let payload = &record[at + PX4_HEADER_LEN..];
    let actual = crc16(payload);
    if actual != expected {
        return Err(FrameError::CrcMismatch {
            topic,
            expected,
            actual,
        });
    }

    Ok(Some(Frame {
        topic,
        seq,
        payload: Bytes::copy_from_slice(payload),
    }))
}

fn decode_cobs(ring: &mut RingBuffer, max_payload: usize) -> Result<Option<Frame>> {
    loop {
        let Some(end) = ring.find(&[COBS_DELIMITER]) else {
            if ring.is_full() {
                // A record longer than the whole buffer can never complete.
                let size = ring.len();
                ring.clear();
                return Err(FrameError::PayloadTooLarge {
                    size,
                    max: max_payload,
                });
            }
            return Ok(None);
        };

        if end == 0 {
            ring.skip(1);
            continue;
        }

        // Take the delimiter along; the decoder stops on it.
        let mut record = vec![0u8; end + 1];
        ring.pop_into(&mut record);

        let len = cobs::decode_in_place(&mut record).map_err(|_| FrameError::Cobs)?;
        return parse_cobs_record(&record[..len], max_payload).map(Some);
    }
}

fn parse_cobs_record(record: &[u8], max_payload: usize) -> Result<Frame> {
    if record.len() < COBS_HEADER_LEN {
        return Err(FrameError::Truncated {
            len: record.len(),
            header: COBS_HEADER_LEN,
        });
    }

    let topic = record[0];
    let seq = record[1];
    let len = u16::from_be_bytes([record[2], record[3]]) as usize;
    let expected = u16::from_be_bytes([record[4], record[5]]);
    let payload = &record[COBS_HEADER_LEN..];

    if len != payload.len() {
        return Err(FrameError::LengthMismatch {
            declared: len,
            actual: payload.len(),
        });
    }
    if len > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: len,
            max: max_payload,
        });
    }
    let actual = crc16(payload);
    if actual != expected {
        return Err(FrameError::CrcMismatch {
            topic,
            expected,
            actual,
        });
    }

    Ok(Frame {
        topic,
        seq,
        payload: Bytes::copy_from_slice(payload),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring_with(bytes: &[u8]) -> RingBuffer {
        let mut ring = RingBuffer::new(4096);
        ring.push(bytes).unwrap();
        ring
    }

    fn encoded(protocol: Protocol, topic: TopicId, seq: u8, payload: &[u8]) -> BytesMut {
        let mut buf = BytesMut::new();
        encode_frame(protocol, topic, seq, payload, &mut buf).unwrap();
        buf
    }

    #[test]
    fn px4_layout() {
        let wire = encoded(Protocol::Px4, 7, 3, b"abc");
        assert_eq!(wire.len(), PX4_HEADER_LEN + 3);
        assert_eq!(&wire[..3], b">>>");
        assert_eq!(wire[3], 7);
        assert_eq!(wire[4], 3);
        assert_eq!(&wire[5..7], &[0, 3]);
        assert_eq!(u16::from_be_bytes([wire[7], wire[8]]), crc16(b"abc"));
        assert_eq!(&wire[9..], b"abc");
    }

    #[test]
    fn cobs_layout_has_no_inner_zeros() {
        let wire = encoded(Protocol::Cobs, 0, 0, &[0, 0, 0]);
        assert_eq!(*wire.last().unwrap(), COBS_DELIMITER);
        assert!(!wire[..wire.len() - 1].contains(&COBS_DELIMITER));
    }

    #[test]
    fn decode_both_protocols() {
        for protocol in [Protocol::Px4, Protocol::Cobs] {
            let mut ring = ring_with(&encoded(protocol, 9, 1, b"payload"));
            let frame = decode_frame(protocol, &mut ring, DEFAULT_MAX_PAYLOAD)
                .unwrap()
                .unwrap();
            assert_eq!(frame, Frame::new(9, 1, Bytes::from_static(b"payload")));
            assert!(ring.is_empty(), "{protocol} should consume the frame");
        }
    }

    #[test]
    fn empty_payload_frames() {
        for protocol in [Protocol::Px4, Protocol::Cobs] {
            let mut ring = ring_with(&encoded(protocol, 0, 0, b""));
            let frame = decode_frame(protocol, &mut ring, DEFAULT_MAX_PAYLOAD)
                .unwrap()
                .unwrap();
            assert_eq!(frame.topic, 0);
            assert!(frame.payload.is_empty());
        }
    }

    #[test]
    fn px4_incomplete_header_and_payload() {
        let wire = encoded(Protocol::Px4, 4, 0, b"hello");

        let mut ring = ring_with(&wire[..5]);
        assert!(decode_frame(Protocol::Px4, &mut ring, 64).unwrap().is_none());
        assert_eq!(ring.len(), 5);

        ring.push(&wire[5..PX4_HEADER_LEN + 2]).unwrap();
        assert!(decode_frame(Protocol::Px4, &mut ring, 64).unwrap().is_none());

        ring.push(&wire[PX4_HEADER_LEN + 2..]).unwrap();
        let frame = decode_frame(Protocol::Px4, &mut ring, 64).unwrap().unwrap();
        assert_eq!(frame.payload.as_ref(), b"hello");
    }

    #[test]
    fn px4_resyncs_past_garbage() {
        let mut bytes = b"noise>>".to_vec();
        bytes.extend_from_slice(&encoded(Protocol::Px4, 5, 0, b"ok"));
        let mut ring = ring_with(&bytes);

        let frame = decode_frame(Protocol::Px4, &mut ring, 64).unwrap().unwrap();
        assert_eq!((frame.topic, frame.payload.as_ref()), (5, b"ok".as_ref()));
        assert!(ring.is_empty());
    }

    #[test]
    fn px4_marker_run_waiting_for_payload() {
        let wire = encoded(Protocol::Px4, 5, 0, b"later");
        let mut bytes = b">>".to_vec();
        bytes.extend_from_slice(&wire[..PX4_HEADER_LEN + 2]);
        let mut ring = ring_with(&bytes);
        assert!(decode_frame(Protocol::Px4, &mut ring, 4096).unwrap().is_none());

        ring.push(&wire[PX4_HEADER_LEN + 2..]).unwrap();
        let frame = decode_frame(Protocol::Px4, &mut ring, 4096).unwrap().unwrap();
        assert_eq!(frame.payload.as_ref(), b"later");
        assert!(ring.is_empty());
    }

    #[test]
    fn px4_topic_equal_to_marker_byte() {
        let mut ring = ring_with(&encoded(Protocol::Px4, b'>', b'>', b">>"));
        let frame = decode_frame(Protocol::Px4, &mut ring, 64).unwrap().unwrap();
        assert_eq!((frame.topic, frame.seq), (b'>', b'>'));
        assert_eq!(frame.payload.as_ref(), b">>");
    }

    #[test]
    fn px4_keeps_partial_marker_when_no_frame() {
        let mut ring = ring_with(b"garbage>>");
        assert!(decode_frame(Protocol::Px4, &mut ring, 64).unwrap().is_none());
        assert_eq!(ring.len(), 2);

        let wire = encoded(Protocol::Px4, 6, 0, b"x");
        ring.push(&wire[2..]).unwrap();
        let frame = decode_frame(Protocol::Px4, &mut ring, 64).unwrap().unwrap();
        assert_eq!(frame.topic, 6);
    }

    #[test]
    fn px4_crc_mismatch_drops_marker_and_recovers() {
        let mut bad = encoded(Protocol::Px4, 2, 0, b"data");
        let last = bad.len() - 1;
        bad[last] ^= 0xFF;
        bad.extend_from_slice(&encoded(Protocol::Px4, 3, 1, b"next"));
        let mut ring = ring_with(&bad);

        let err = decode_frame(Protocol::Px4, &mut ring, 64).unwrap_err();
        assert!(matches!(err, FrameError::CrcMismatch { topic: 2, .. }));

        let frame = decode_frame(Protocol::Px4, &mut ring, 64).unwrap().unwrap();
        assert_eq!((frame.topic, frame.payload.as_ref()), (3, b"next".as_ref()));
    }

    #[test]
    fn px4_oversized_length_rejected() {
        let wire = encoded(Protocol::Px4, 2, 0, &[7u8; 32]);
        let mut ring = ring_with(&wire);
        let err = decode_frame(Protocol::Px4, &mut ring, 16).unwrap_err();
        assert!(matches!(
            err,
            FrameError::PayloadTooLarge { size: 32, max: 16 }
        ));
        assert_eq!(ring.len(), wire.len() - 1);
    }

    #[test]
    fn cobs_partial_record_waits_for_delimiter() {
        let wire = encoded(Protocol::Cobs, 8, 2, b"split");
        let mut ring = ring_with(&wire[..wire.len() - 1]);
        assert!(decode_frame(Protocol::Cobs, &mut ring, 64).unwrap().is_none());

        ring.push(&wire[wire.len() - 1..]).unwrap();
        let frame = decode_frame(Protocol::Cobs, &mut ring, 64).unwrap().unwrap();
        assert_eq!(frame.payload.as_ref(), b"split");
    }

    #[test]
    fn cobs_skips_empty_records() {
        let mut bytes = vec![0, 0, 0];
        bytes.extend_from_slice(&encoded(Protocol::Cobs, 4, 0, b"z"));
        let mut ring = ring_with(&bytes);
        let frame = decode_frame(Protocol::Cobs, &mut ring, 64).unwrap().unwrap();
        assert_eq!(frame.topic, 4);
    }

    #[test]
    fn cobs_truncated_record() {
        let stuffed = cobs::encode_vec(&[1, 2, 3]);
        let mut bytes = stuffed.clone();
        bytes.push(0);
        let mut ring = ring_with(&bytes);
        let err = decode_frame(Protocol::Cobs, &mut ring, 64).unwrap_err();
        assert!(matches!(err, FrameError::Truncated { len: 3, .. }));
        assert!(ring.is_empty());
    }

    #[test]
    fn cobs_corrupted_payload_is_crc_error() {
        let mut record = BytesMut::new();
        put_header(&mut record, 2, 0, 3, crc16(b"abc"));
        record.put_slice(b"abd");
        let mut bytes = cobs::encode_vec(&record);
        bytes.push(0);

        let mut ring = ring_with(&bytes);
        let err = decode_frame(Protocol::Cobs, &mut ring, 64).unwrap_err();
        assert!(matches!(err, FrameError::CrcMismatch { .. }));
    }

    #[test]
    fn cobs_record_larger_than_buffer_is_dropped() {
        let mut ring = RingBuffer::new(8);
        ring.push(&[1u8; 8]).unwrap();
        let err = decode_frame(Protocol::Cobs, &mut ring, 4).unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { size: 8, .. }));
        assert!(ring.is_empty());
    }

    #[test]
    fn protocol_parsing() {
        assert_eq!("px4".parse::<Protocol>().unwrap(), Protocol::Px4);
        assert_eq!("cobs".parse::<Protocol>().unwrap(), Protocol::Cobs);
        assert!("slip".parse::<Protocol>().is_err());
        assert_eq!(Protocol::Px4.header_len(), 9);
        assert_eq!(Protocol::Cobs.header_len(), 6);
    }

    #[test]
    fn config_bounds() {
        let cfg = FrameConfig {
            ring_capacity: 64,
            ..FrameConfig::default()
        };
        assert_eq!(cfg.effective_max_payload(), 64 - PX4_HEADER_LEN);
        assert!(cfg.validate().is_ok());

        let tiny = FrameConfig {
            ring_capacity: PX4_HEADER_LEN,
            ..FrameConfig::default()
        };
        assert!(matches!(tiny.validate(), Err(FrameError::Config(_))));

        let cobs = FrameConfig {
            protocol: Protocol::Cobs,
            ring_capacity: 64,
            ..FrameConfig::default()
        };
        assert!(cobs.effective_max_payload() < 64 - COBS_HEADER_LEN);
        assert!(Protocol::Cobs.max_wire_len(cobs.effective_max_payload()) <= 64);
    }

    #[test]
    fn largest_payload_fits_the_ring() {
        for protocol in [Protocol::Px4, Protocol::Cobs] {
            for ring_capacity in [16, 64, 261, 300, 1030, 8192] {
                let cfg = FrameConfig {
                    protocol,
                    ring_capacity,
                    ..FrameConfig::default()
                };
                let max = cfg.effective_max_payload();
                assert!(max > 0);

                // Worst case for cobs: no zero bytes to stuff away.
                let payload = vec![0xA5u8; max];
                let wire = encoded(protocol, 1, 0, &payload);
                assert!(
                    wire.len() <= ring_capacity,
                    "{protocol} ring {ring_capacity}: {} wire bytes",
                    wire.len()
                );

                let mut ring = RingBuffer::new(ring_capacity);
                ring.push(&wire).unwrap();
                let frame = decode_frame(protocol, &mut ring, max).unwrap().unwrap();
                assert_eq!(frame.payload.len(), max);
                assert!(ring.is_empty());
            }
        }
    }
}
