//! Byte-stream links for the serial bridge.
//!
//! Provides a unified interface over the two link backends:
//! - UART devices (raw termios mode)
//! - UDP socket pairs
//!
//! plus the fixed-capacity [`RingBuffer`] that absorbs partial reads. This
//! is the lowest layer; framing builds on the [`Link`] trait defined here.

pub mod error;
pub mod ring;
pub mod traits;

#[cfg(unix)]
pub mod link;
#[cfg(unix)]
pub mod poll;
#[cfg(unix)]
pub mod serial;
#[cfg(unix)]
pub mod udp;

pub use error::{Result, TransportError};
pub use ring::RingBuffer;
pub use traits::Link;

#[cfg(unix)]
pub use link::LinkConfig;
#[cfg(unix)]
pub use serial::SerialLink;
#[cfg(unix)]
pub use udp::UdpLink;
