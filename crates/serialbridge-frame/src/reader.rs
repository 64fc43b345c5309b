use std::ops::Range;

use serialbridge_transport::{Link, RingBuffer, TransportError};
use tracing::{debug, error, trace};

use crate::codec::{decode_frame, Frame, FrameConfig};
use crate::error::{FrameError, Result};

/// Largest UDP payload over IPv4; a datagram is read whole or truncated.
pub const MAX_DATAGRAM: usize = 65_507;

/// Frame and byte counters for one direction of a link.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Complete frames delivered or sent.
    pub frames: u64,
    /// Payload bytes in those frames.
    pub bytes: u64,
    /// Frames dropped as malformed or failed.
    pub dropped: u64,
    /// Times the ring buffer filled up without completing a frame.
    pub overflows: u64,
}

/// Inbound half of a link: raw receive into the ring buffer, then frame
/// assembly.
///
/// Handles partial reads internally. Each call does at most one bounded
/// receive, so callers can check for cancellation between calls. Received
/// bytes that don't fit the ring yet stay in `scratch` and are fed in as
/// frames drain out.
pub struct FrameReader<L> {
    link: L,
    ring: RingBuffer,
    scratch: Vec<u8>,
    pending: Range<usize>,
    config: FrameConfig,
    max_payload: usize,
    stats: FrameStats,
}

impl<L: Link> FrameReader<L> {
    /// Create a new frame reader with explicit configuration.
    pub fn with_config(link: L, config: FrameConfig) -> Result<Self> {
        config.validate()?;
        let scratch_len = if link.is_datagram() {
            config.ring_capacity.max(MAX_DATAGRAM)
        } else {
            config.ring_capacity
        };
        Ok(Self {
            link,
            ring: RingBuffer::new(config.ring_capacity),
            scratch: vec![0u8; scratch_len],
            pending: 0..0,
            max_payload: config.effective_max_payload(),
            config,
            stats: FrameStats::default(),
        })
    }

    /// Try to produce the next complete frame.
    ///
    /// Returns `Ok(None)` when the poll interval elapsed without completing
    /// a frame. An error drops at most the frame being assembled; the reader
    /// stays usable unless the link itself is closed.
    pub fn read_frame(&mut self) -> Result<Option<Frame>> {
        if let Some(frame) = self.drain()? {
            return Ok(Some(frame));
        }

        let received = self.link.recv(&mut self.scratch, self.config.read_poll)?;
        if received == 0 {
            return Ok(None);
        }
        trace!(size = received, buffered = self.ring.len(), "received chunk");
        self.pending = 0..received;

        self.drain()
    }

    /// Assemble from the ring, topping it up from pending bytes until a
    /// frame completes or nothing is left to feed.
    fn drain(&mut self) -> Result<Option<Frame>> {
        loop {
            if let Some(frame) = self.assemble()? {
                return Ok(Some(frame));
            }
            if self.pending.is_empty() {
                return Ok(None);
            }

            let free = self.ring.free();
            if free == 0 {
                return Err(self.overflowed(self.pending.len()));
            }
            let end = self.pending.start + free.min(self.pending.len());
            self.ring.push(&self.scratch[self.pending.start..end])?;
            self.pending.start = end;
        }
    }

    fn assemble(&mut self) -> Result<Option<Frame>> {
        match decode_frame(self.config.protocol, &mut self.ring, self.max_payload) {
            Ok(Some(frame)) => {
                self.stats.frames += 1;
                self.stats.bytes += frame.payload.len() as u64;
                debug!(
                    topic = frame.topic,
                    seq = frame.seq,
                    size = frame.payload.len(),
                    "assembled frame"
                );
                Ok(Some(frame))
            }
            Ok(None) => Ok(None),
            Err(err) => {
                self.stats.dropped += 1;
                Err(err)
            }
        }
    }

    /// A full ring that still holds no frame can never complete one, so
    /// its contents go. Pending bytes are kept and fed in next.
    fn overflowed(&mut self, requested: usize) -> FrameError {
        let free = self.ring.free();
        error!(
            requested,
            free,
            capacity = self.ring.capacity(),
            "ring buffer overflow, discarding buffered bytes (ring_buffer_size too small?)"
        );
        self.ring.clear();
        self.stats.overflows += 1;
        FrameError::Transport(TransportError::Overflow { requested, free })
    }

    /// Header length of the configured protocol.
    pub fn header_len(&self) -> usize {
        self.config.protocol.header_len()
    }

    /// Largest payload this reader accepts.
    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    /// Bytes received but not yet assembled into a frame.
    pub fn buffered(&self) -> usize {
        self.ring.len() + self.pending.len()
    }

    /// Counters since construction.
    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    /// Borrow the underlying link.
    pub fn get_ref(&self) -> &L {
        &self.link
    }

    /// Current frame reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}
