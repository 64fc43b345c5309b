use std::path::PathBuf;

/// Errors that can occur in link transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to open or configure the serial device.
    #[error("failed to open serial device {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The requested baud rate has no termios equivalent on this platform.
    #[error("unsupported baud rate {0}")]
    UnsupportedBaudRate(u32),

    /// Failed to bind the receive socket.
    #[error("failed to bind udp socket to {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    /// Failed to resolve the send destination.
    #[error("failed to resolve udp destination {addr}: {source}")]
    Resolve {
        addr: String,
        source: std::io::Error,
    },

    /// An I/O error occurred on the link.
    #[error("link I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A write could not complete within the write timeout.
    #[error("write timed out after {written} of {len} bytes")]
    WriteTimeout { written: usize, len: usize },

    /// The ring buffer has no room for a received chunk.
    #[error("ring buffer overflow ({requested} bytes requested, {free} free)")]
    Overflow { requested: usize, free: usize },

    /// The link has been closed.
    #[error("link closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, TransportError>;
