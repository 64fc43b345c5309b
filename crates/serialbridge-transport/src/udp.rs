use std::io::ErrorKind;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::poll::{poll_fd, Interest};
use crate::traits::Link;

/// UDP link over two independent sockets.
///
/// The receive socket is bound to a local port; the send socket is bound to
/// an ephemeral port and targets a fixed destination. Reads and writes never
/// touch the same descriptor. Both sockets stay bound until the link is
/// dropped; [`Link::close`] only stops further I/O.
pub struct UdpLink {
    recv: UdpSocket,
    send: UdpSocket,
    destination: SocketAddr,
    closed: AtomicBool,
}

impl UdpLink {
    /// Bind the receive socket on `0.0.0.0:recv_port` and send to
    /// `remote_host:send_port`.
    pub fn open(remote_host: &str, recv_port: u16, send_port: u16) -> Result<Self> {
        Self::bind(("0.0.0.0", recv_port), (remote_host, send_port))
    }

    /// Bind the receive socket on `recv_addr` and send to `destination`.
    pub fn bind(recv_addr: impl ToSocketAddrs, destination: impl ToSocketAddrs) -> Result<Self> {
        let recv_desc = describe(&recv_addr);
        let recv = UdpSocket::bind(recv_addr).map_err(|source| TransportError::Bind {
            addr: recv_desc,
            source,
        })?;

        let dest_desc = describe(&destination);
        let destination = destination
            .to_socket_addrs()
            .and_then(|mut addrs| {
                addrs.next().ok_or_else(|| {
                    std::io::Error::new(ErrorKind::NotFound, "no address for destination")
                })
            })
            .map_err(|source| TransportError::Resolve {
                addr: dest_desc,
                source,
            })?;

        let send_local: SocketAddr = if destination.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let send = UdpSocket::bind(send_local).map_err(|source| TransportError::Bind {
            addr: send_local.to_string(),
            source,
        })?;

        recv.set_nonblocking(true)?;
        send.set_nonblocking(true)?;

        info!(
            local = ?recv.local_addr().ok(),
            %destination,
            "opened udp link"
        );

        Ok(Self {
            recv,
            send,
            destination,
            closed: AtomicBool::new(false),
        })
    }

    /// Two links on 127.0.0.1 wired to each other, each sending to the
    /// other's receive socket.
    pub fn pair_local() -> Result<(Self, Self)> {
        let bind_local = |what: &str| {
            UdpSocket::bind("127.0.0.1:0").map_err(|source| TransportError::Bind {
                addr: format!("127.0.0.1:0 ({what})"),
                source,
            })
        };
        let a_recv = bind_local("recv")?;
        let b_recv = bind_local("recv")?;
        let a_send = bind_local("send")?;
        let b_send = bind_local("send")?;

        let a_dest = b_recv.local_addr()?;
        let b_dest = a_recv.local_addr()?;

        for socket in [&a_recv, &b_recv, &a_send, &b_send] {
            socket.set_nonblocking(true)?;
        }

        Ok((
            Self {
                recv: a_recv,
                send: a_send,
                destination: a_dest,
                closed: AtomicBool::new(false),
            },
            Self {
                recv: b_recv,
                send: b_send,
                destination: b_dest,
                closed: AtomicBool::new(false),
            },
        ))
    }

    /// Address the receive socket is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.recv.local_addr()?)
    }

    /// Address outgoing datagrams are sent to.
    pub fn destination(&self) -> SocketAddr {
        self.destination
    }
}

impl Link for UdpLink {
    fn recv(&self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        if !poll_fd(self.recv.as_raw_fd(), Interest::Readable, timeout)? {
            return Ok(0);
        }
        match self.recv.recv_from(buf) {
            Ok((n, from)) => {
                debug!(%from, size = n, "received datagram");
                Ok(n)
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => Ok(0),
            Err(err) if err.kind() == ErrorKind::Interrupted => Ok(0),
            Err(err) => Err(TransportError::Io(err)),
        }
    }

    fn send(&self, buf: &[u8], timeout: Duration) -> Result<usize> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        let deadline = Instant::now() + timeout;

        loop {
            match self.send.send_to(buf, self.destination) {
                Ok(n) if n == buf.len() => return Ok(n),
                Ok(n) => {
                    return Err(TransportError::WriteTimeout {
                        written: n,
                        len: buf.len(),
                    })
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero()
                        || !poll_fd(self.send.as_raw_fd(), Interest::Writable, remaining)?
                    {
                        return Err(TransportError::WriteTimeout {
                            written: 0,
                            len: buf.len(),
                        });
                    }
                }
                Err(err) => return Err(TransportError::Io(err)),
            }
        }
    }

    fn is_ready(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
            && self.recv.local_addr().is_ok()
            && self.send.local_addr().is_ok()
    }

    fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!(destination = %self.destination, "closed udp link");
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "udp"
    }

    fn is_datagram(&self) -> bool {
        true
    }
}

impl std::fmt::Debug for UdpLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpLink")
            .field("local", &self.recv.local_addr().ok())
            .field("destination", &self.destination)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

fn describe(addr: &impl ToSocketAddrs) -> String {
    match addr.to_socket_addrs() {
        Ok(mut addrs) => addrs
            .next()
            .map(|a| a.to_string())
            .unwrap_or_else(|| "<unresolved>".to_string()),
        Err(_) => "<unresolved>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    fn recv_exact(link: &UdpLink, len: usize) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = [0u8; 2048];
        let start = Instant::now();
        while out.len() < len && start.elapsed() < Duration::from_secs(2) {
            let n = link.recv(&mut buf, Duration::from_millis(50)).unwrap();
            out.extend_from_slice(&buf[..n]);
        }
        out
    }

    #[test]
    fn pair_exchanges_datagrams() {
        let (a, b) = UdpLink::pair_local().unwrap();
        assert_eq!(a.destination(), b.local_addr().unwrap());
        assert_eq!(b.destination(), a.local_addr().unwrap());

        assert_eq!(a.send(b"ping", Duration::from_millis(100)).unwrap(), 4);
        assert_eq!(recv_exact(&b, 4), b"ping");

        assert_eq!(b.send(b"pong", Duration::from_millis(100)).unwrap(), 4);
        assert_eq!(recv_exact(&a, 4), b"pong");
    }

    #[test]
    fn recv_times_out_with_zero() {
        let (a, _b) = UdpLink::pair_local().unwrap();
        let mut buf = [0u8; 16];
        let start = Instant::now();
        assert_eq!(a.recv(&mut buf, Duration::from_millis(20)).unwrap(), 0);
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn closed_link_reports_not_ready() {
        let (a, _b) = UdpLink::pair_local().unwrap();
        assert!(a.is_ready());
        a.close().unwrap();
        a.close().unwrap();
        assert!(!a.is_ready());
        assert!(matches!(
            a.send(b"x", Duration::ZERO),
            Err(TransportError::Closed)
        ));
    }

    #[test]
    fn drop_releases_the_receive_port() {
        let link = UdpLink::bind("127.0.0.1:0", "127.0.0.1:9").unwrap();
        let addr = link.local_addr().unwrap();
        link.close().unwrap();

        let mut buf = [0u8; 4];
        assert!(matches!(
            link.recv(&mut buf, Duration::ZERO),
            Err(TransportError::Closed)
        ));
        assert!(matches!(
            UdpSocket::bind(addr),
            Err(err) if err.kind() == ErrorKind::AddrInUse
        ));

        drop(link);
        UdpSocket::bind(addr).unwrap();
    }

    #[test]
    fn concurrent_send_while_receiving() {
        let (a, b) = UdpLink::pair_local().unwrap();
        let a = Arc::new(a);

        let reader = {
            let a = Arc::clone(&a);
            thread::spawn(move || recv_exact(&a, 3))
        };

        a.send(b"out", Duration::from_millis(100)).unwrap();
        assert_eq!(recv_exact(&b, 3), b"out");
        b.send(b"in!", Duration::from_millis(100)).unwrap();

        assert_eq!(reader.join().unwrap(), b"in!");
    }

    #[test]
    fn open_binds_requested_port() {
        let link = UdpLink::open("127.0.0.1", 0, 9).unwrap();
        assert_eq!(link.name(), "udp");
        assert!(link.is_datagram());
        assert_eq!(link.destination(), "127.0.0.1:9".parse().unwrap());
        assert!(link.local_addr().unwrap().port() != 0);
    }

    #[test]
    fn unresolvable_destination_fails() {
        let result = UdpLink::bind("127.0.0.1:0", "no-such-host.invalid:9");
        assert!(matches!(result, Err(TransportError::Resolve { .. })));
    }
}
