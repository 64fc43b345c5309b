use std::io;
use std::os::fd::RawFd;
use std::time::{Duration, Instant};

/// Readiness to wait for in [`poll_fd`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    Readable,
    Writable,
}

/// Wait up to `timeout` for a single descriptor to become ready.
///
/// Returns `Ok(false)` on timeout. `EINTR` restarts the wait with whatever
/// time is left.
pub fn poll_fd(fd: RawFd, interest: Interest, timeout: Duration) -> io::Result<bool> {
    let events = match interest {
        Interest::Readable => libc::POLLIN,
        Interest::Writable => libc::POLLOUT,
    };
    let deadline = Instant::now() + timeout;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let timeout_ms = timeout_to_ms(remaining);

        let mut pollfd = libc::pollfd {
            fd,
            events,
            revents: 0,
        };
        // SAFETY: `pollfd` is a valid, stack-allocated pollfd and we pass a
        // count of exactly one entry.
        let rc = unsafe { libc::poll(std::ptr::addr_of_mut!(pollfd), 1, timeout_ms) };

        if rc == 0 {
            return Ok(false);
        }
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        if pollfd.revents & libc::POLLNVAL != 0 {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "descriptor is not open",
            ));
        }
        // POLLERR/POLLHUP are reported as ready so the following syscall
        // surfaces the actual error.
        return Ok(true);
    }
}

fn timeout_to_ms(timeout: Duration) -> libc::c_int {
    // Round up so a sub-millisecond remainder still waits instead of spinning.
    let ms = timeout.as_nanos().div_ceil(1_000_000);
    ms.min(libc::c_int::MAX as u128) as libc::c_int
}
