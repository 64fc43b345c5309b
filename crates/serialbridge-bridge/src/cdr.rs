//! The `SerialMapping` negotiation message and its CDR encoding.
//!
//! Little-endian CORBA CDR without an encapsulation header:
//!
//! ```text
//! string[] topic_names      u32 count, then per string: u32 len (incl. NUL), bytes, NUL
//! uint8[]  serial_mappings  u32 count, bytes
//! string[] types
//! uint8[]  direction
//! ```
//!
//! Every `u32` is aligned to 4 bytes from the start of the payload.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{BridgeError, Result};

/// Direction code for topics flowing from the serial side to the host.
pub const SERIALTOROS2: u8 = 0;
/// Direction code for topics flowing from the host to the serial side.
pub const ROS2TOSERIAL: u8 = 1;

/// Dynamic topic mapping as sent by the remote endpoint: four parallel
/// sequences, one entry per topic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SerialMapping {
    pub topic_names: Vec<String>,
    pub serial_mappings: Vec<u8>,
    pub types: Vec<String>,
    pub direction: Vec<u8>,
}

impl SerialMapping {
    /// Encode as CDR.
    pub fn encode(&self) -> Bytes {
        let mut w = CdrWriter::default();
        w.string_seq(&self.topic_names);
        w.octet_seq(&self.serial_mappings);
        w.string_seq(&self.types);
        w.octet_seq(&self.direction);
        w.buf.freeze()
    }

    /// Decode from CDR. Trailing bytes after the last field are ignored.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut r = CdrReader { data, pos: 0 };
        Ok(Self {
            topic_names: r.string_seq("topic_names")?,
            serial_mappings: r.octet_seq("serial_mappings")?,
            types: r.string_seq("types")?,
            direction: r.octet_seq("direction")?,
        })
    }

    /// Number of topics, once all four sequences agree on it.
    pub fn consistent_len(&self) -> Result<usize> {
        let len = self.topic_names.len();
        if self.serial_mappings.len() != len || self.types.len() != len || self.direction.len() != len
        {
            return Err(BridgeError::MalformedNegotiation(format!(
                "names, mappings, types, and directions must all be the same size \
                 ({}, {}, {}, {})",
                len,
                self.serial_mappings.len(),
                self.types.len(),
                self.direction.len()
            )));
        }
        Ok(len)
    }
}

#[derive(Default)]
struct CdrWriter {
    buf: BytesMut,
}

impl CdrWriter {
    fn align(&mut self, n: usize) {
        let pad = (n - self.buf.len() % n) % n;
        self.buf.put_bytes(0, pad);
    }

    fn u32(&mut self, v: u32) {
        self.align(4);
        self.buf.put_u32_le(v);
    }

    fn string(&mut self, s: &str) {
        self.u32(s.len() as u32 + 1);
        self.buf.put_slice(s.as_bytes());
        self.buf.put_u8(0);
    }

    fn string_seq(&mut self, items: &[String]) {
        self.u32(items.len() as u32);
        for item in items {
            self.string(item);
        }
    }

    fn octet_seq(&mut self, items: &[u8]) {
        self.u32(items.len() as u32);
        self.buf.put_slice(items);
    }
}

struct CdrReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> CdrReader<'a> {
    fn take(&mut self, n: usize, what: &str) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| {
                BridgeError::MalformedNegotiation(format!(
                    "truncated {what} at offset {} (need {n} bytes, {} left)",
                    self.pos,
                    self.data.len().saturating_sub(self.pos)
                ))
            })?;
        let out = &self.data[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn u32(&mut self, what: &str) -> Result<u32> {
        let pad = (4 - self.pos % 4) % 4;
        self.take(pad, what)?;
        let raw = self.take(4, what)?;
        Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    /// Sequence count, bounded by what the remaining bytes could hold.
    fn count(&mut self, what: &str, min_item: usize) -> Result<usize> {
        let count = self.u32(what)? as usize;
        let left = self.data.len() - self.pos;
        if count.saturating_mul(min_item) > left {
            return Err(BridgeError::MalformedNegotiation(format!(
                "{what} claims {count} entries but only {left} bytes remain"
            )));
        }
        Ok(count)
    }

    fn string(&mut self, what: &str) -> Result<String> {
        let len = self.u32(what)? as usize;
        if len == 0 {
            return Ok(String::new());
        }
        let raw = self.take(len, what)?;
        let (text, nul) = raw.split_at(len - 1);
        if nul != [0] {
            return Err(BridgeError::MalformedNegotiation(format!(
                "{what} entry is not NUL terminated"
            )));
        }
        String::from_utf8(text.to_vec())
            .map_err(|_| BridgeError::MalformedNegotiation(format!("{what} entry is not UTF-8")))
    }

    fn string_seq(&mut self, what: &str) -> Result<Vec<String>> {
        let count = self.count(what, 4)?;
        (0..count).map(|_| self.string(what)).collect()
    }

    fn octet_seq(&mut self, what: &str) -> Result<Vec<u8>> {
        let count = self.count(what, 1)?;
        Ok(self.take(count, what)?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SerialMapping {
        SerialMapping {
            topic_names: vec!["a".into(), "b".into()],
            serial_mappings: vec![5, 6],
            types: vec!["A".into(), "B".into()],
            direction: vec![SERIALTOROS2, ROS2TOSERIAL],
        }
    }

    #[test]
    fn known_encoding() {
        let encoded = SerialMapping {
            topic_names: vec!["imu".into()],
            serial_mappings: vec![3],
            types: vec!["Imu".into()],
            direction: vec![SERIALTOROS2],
        }
        .encode();

        #[rustfmt::skip]
        let expected: &[u8] = &[
            1, 0, 0, 0,                 // topic_names count
            4, 0, 0, 0, b'i', b'm', b'u', 0,
            1, 0, 0, 0, 3,              // serial_mappings
            0, 0, 0,                    // pad
            1, 0, 0, 0,                 // types count
            4, 0, 0, 0, b'I', b'm', b'u', 0,
            1, 0, 0, 0, 0,              // direction
        ];
        assert_eq!(encoded.as_ref(), expected);
    }

    #[test]
    fn decodes_what_it_encodes() {
        let mapping = sample();
        assert_eq!(SerialMapping::decode(&mapping.encode()).unwrap(), mapping);
        assert_eq!(mapping.consistent_len().unwrap(), 2);
    }

    #[test]
    fn empty_mapping() {
        let empty = SerialMapping::default();
        let encoded = empty.encode();
        assert_eq!(encoded.len(), 16);
        assert_eq!(SerialMapping::decode(&encoded).unwrap(), empty);
    }

    #[test]
    fn truncated_input_is_malformed() {
        let encoded = sample().encode();
        for cut in [0, 3, 9, encoded.len() - 1] {
            let result = SerialMapping::decode(&encoded[..cut]);
            assert!(
                matches!(result, Err(BridgeError::MalformedNegotiation(_))),
                "cut at {cut}"
            );
        }
    }

    #[test]
    fn absurd_counts_rejected_without_allocating() {
        let data = [0xFF, 0xFF, 0xFF, 0x7F];
        assert!(matches!(
            SerialMapping::decode(&data),
            Err(BridgeError::MalformedNegotiation(_))
        ));
    }

    #[test]
    fn missing_nul_rejected() {
        let data = [1, 0, 0, 0, 2, 0, 0, 0, b'a', b'b'];
        assert!(SerialMapping::decode(&data).is_err());
    }

    #[test]
    fn length_mismatch_detected() {
        let mut mapping = sample();
        mapping.direction.pop();
        assert!(matches!(
            mapping.consistent_len(),
            Err(BridgeError::MalformedNegotiation(_))
        ));
    }
}
