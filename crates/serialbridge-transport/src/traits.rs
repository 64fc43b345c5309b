use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;

/// A raw byte-stream endpoint: a UART device or a pair of UDP sockets.
///
/// All methods take `&self` so one link can be shared between the reader
/// thread (which only calls [`Link::recv`]) and any number of writers (which
/// only call [`Link::send`]). Backends keep the two directions on resources
/// that are independently safe to use concurrently.
pub trait Link: Send + Sync {
    /// Wait up to `timeout` for the link to become readable, then read what
    /// is available into `buf`.
    ///
    /// Returns `Ok(0)` when nothing arrived before the timeout.
    fn recv(&self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Send all of `buf`, retrying while the link is transiently not
    /// writable for at most `timeout` in total.
    ///
    /// Returns `buf.len()` on success. A partial send past the timeout is an
    /// error and leaves nothing queued.
    fn send(&self, buf: &[u8], timeout: Duration) -> Result<usize>;

    /// Whether the underlying descriptors are open and usable.
    fn is_ready(&self) -> bool;

    /// Stop the link and restore any device state changed on open.
    ///
    /// Later `recv` and `send` calls fail with
    /// [`TransportError::Closed`](crate::TransportError::Closed).
    /// The descriptors themselves are released when the link is dropped, not
    /// here: another thread may still be polling them. Closing twice is a
    /// no-op.
    fn close(&self) -> Result<()>;

    /// Backend name for diagnostics.
    fn name(&self) -> &'static str;

    /// True when each `recv` yields one whole datagram that must be read in
    /// a single call.
    fn is_datagram(&self) -> bool {
        false
    }
}

impl<L: Link + ?Sized> Link for Arc<L> {
    fn recv(&self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        (**self).recv(buf, timeout)
    }

    fn send(&self, buf: &[u8], timeout: Duration) -> Result<usize> {
        (**self).send(buf, timeout)
    }

    fn is_ready(&self) -> bool {
        (**self).is_ready()
    }

    fn close(&self) -> Result<()> {
        (**self).close()
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn is_datagram(&self) -> bool {
        (**self).is_datagram()
    }
}

impl<L: Link + ?Sized> Link for Box<L> {
    fn recv(&self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        (**self).recv(buf, timeout)
    }

    fn send(&self, buf: &[u8], timeout: Duration) -> Result<usize> {
        (**self).send(buf, timeout)
    }

    fn is_ready(&self) -> bool {
        (**self).is_ready()
    }

    fn close(&self) -> Result<()> {
        (**self).close()
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn is_datagram(&self) -> bool {
        (**self).is_datagram()
    }
}
