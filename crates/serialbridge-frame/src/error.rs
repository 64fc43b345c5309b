use serialbridge_transport::TransportError;

use crate::topic::TopicId;

/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The link failed, or the ring buffer could not take a received chunk.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The payload checksum does not match the header.
    #[error("crc mismatch on topic {topic} (header {expected:#06x}, payload {actual:#06x})")]
    CrcMismatch {
        topic: TopicId,
        expected: u16,
        actual: u16,
    },

    /// A COBS record could not be unstuffed.
    #[error("invalid cobs encoding")]
    Cobs,

    /// A decoded record is shorter than a frame header.
    #[error("truncated frame ({len} bytes, header needs {header})")]
    Truncated { len: usize, header: usize },

    /// The header length field disagrees with the record size.
    #[error("length mismatch (header says {declared}, record carries {actual})")]
    LengthMismatch { declared: usize, actual: usize },

    /// The frame configuration cannot hold a single frame.
    #[error("invalid frame configuration: {0}")]
    Config(String),
}

impl FrameError {
    /// True when the ring buffer rejected received bytes.
    pub fn is_overflow(&self) -> bool {
        matches!(self, FrameError::Transport(TransportError::Overflow { .. }))
    }

    /// True when the error drops at most one frame and the stream stays usable.
    pub fn is_transient(&self) -> bool {
        !matches!(
            self,
            FrameError::Transport(TransportError::Closed) | FrameError::Config(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
