use bytes::BytesMut;
use serialbridge_transport::Link;
use tracing::debug;

use crate::codec::{encode_frame, FrameConfig};
use crate::error::{FrameError, Result};
use crate::reader::FrameStats;
use crate::topic::TopicId;

/// Outbound half of a link: frames payloads and sends them whole.
pub struct FrameWriter<L> {
    link: L,
    buf: BytesMut,
    config: FrameConfig,
    max_payload: usize,
    seq: u8,
    stats: FrameStats,
}

impl<L: Link> FrameWriter<L> {
    /// Create a new frame writer with explicit configuration.
    pub fn with_config(link: L, config: FrameConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            link,
            buf: BytesMut::with_capacity(config.protocol.header_len() + config.max_payload),
            max_payload: config.effective_max_payload(),
            config,
            seq: 0,
            stats: FrameStats::default(),
        })
    }

    /// Encode and send a payload on a topic.
    ///
    /// Blocks for at most the configured write timeout. Returns the payload
    /// length once the whole frame is on the link; on error nothing is left
    /// pending and the sequence number is not consumed.
    pub fn write(&mut self, topic: TopicId, payload: &[u8]) -> Result<usize> {
        if payload.len() > self.max_payload {
            self.stats.dropped += 1;
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max: self.max_payload,
            });
        }

        self.buf.clear();
        encode_frame(self.config.protocol, topic, self.seq, payload, &mut self.buf)?;

        if let Err(err) = self.link.send(&self.buf, self.config.write_timeout) {
            self.stats.dropped += 1;
            return Err(err.into());
        }

        debug!(topic, seq = self.seq, size = payload.len(), "wrote frame");
        self.seq = self.seq.wrapping_add(1);
        self.stats.frames += 1;
        self.stats.bytes += payload.len() as u64;
        Ok(payload.len())
    }

    /// Sequence number the next frame will carry.
    pub fn next_seq(&self) -> u8 {
        self.seq
    }

    /// Largest payload this writer accepts.
    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    /// Counters since construction.
    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    /// Borrow the underlying link.
    pub fn get_ref(&self) -> &L {
        &self.link
    }

    /// Current frame writer configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use serialbridge_transport::{Result as TransportResult, RingBuffer, TransportError};

    use super::*;
    use crate::codec::{decode_frame, Protocol};

    #[derive(Default)]
    struct CaptureLink {
        sent: Mutex<Vec<u8>>,
        fail: bool,
    }

    impl Link for CaptureLink {
        fn recv(&self, _buf: &mut [u8], _timeout: Duration) -> TransportResult<usize> {
            Ok(0)
        }

        fn send(&self, buf: &[u8], _timeout: Duration) -> TransportResult<usize> {
            if self.fail {
                return Err(TransportError::WriteTimeout {
                    written: 0,
                    len: buf.len(),
                });
            }
            self.sent.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn is_ready(&self) -> bool {
            true
        }

        fn close(&self) -> TransportResult<()> {
            Ok(())
        }

        fn name(&self) -> &'static str {
            "capture"
        }
    }

    fn config(protocol: Protocol) -> FrameConfig {
        FrameConfig {
            protocol,
            max_payload: 32,
            ..FrameConfig::default()
        }
    }

    #[test]
    fn writes_decodable_frames_with_increasing_seq() {
        for protocol in [Protocol::Px4, Protocol::Cobs] {
            let mut writer = FrameWriter::with_config(CaptureLink::default(), config(protocol)).unwrap();
            assert_eq!(writer.write(3, b"one").unwrap(), 3);
            assert_eq!(writer.write(4, b"").unwrap(), 0);

            let mut ring = RingBuffer::new(256);
            ring.push(&writer.get_ref().sent.lock().unwrap()).unwrap();
            let a = decode_frame(protocol, &mut ring, 32).unwrap().unwrap();
            let b = decode_frame(protocol, &mut ring, 32).unwrap().unwrap();
            assert_eq!((a.topic, a.seq, a.payload.as_ref()), (3, 0, b"one".as_ref()));
            assert_eq!((b.topic, b.seq, b.payload.len()), (4, 1, 0));
            assert_eq!(writer.stats().frames, 2);
        }
    }

    #[test]
    fn seq_wraps() {
        let mut writer = FrameWriter::with_config(CaptureLink::default(), config(Protocol::Px4)).unwrap();
        for _ in 0..256 {
            writer.write(2, b"x").unwrap();
        }
        assert_eq!(writer.next_seq(), 0);
    }

    #[test]
    fn oversized_payload_rejected_before_sending() {
        let mut writer = FrameWriter::with_config(CaptureLink::default(), config(Protocol::Px4)).unwrap();
        let err = writer.write(2, &[0u8; 33]).unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { size: 33, max: 32 }));
        assert!(writer.get_ref().sent.lock().unwrap().is_empty());
        assert_eq!(writer.next_seq(), 0);
    }

    #[test]
    fn failed_send_keeps_seq_and_counts_drop() {
        let link = CaptureLink {
            fail: true,
            ..CaptureLink::default()
        };
        let mut writer = FrameWriter::with_config(link, config(Protocol::Cobs)).unwrap();
        let err = writer.write(2, b"lost").unwrap_err();
        assert!(matches!(
            err,
            FrameError::Transport(TransportError::WriteTimeout { .. })
        ));
        assert_eq!(writer.next_seq(), 0);
        assert_eq!(writer.stats().dropped, 1);
    }
}
