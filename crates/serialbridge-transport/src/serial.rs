use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::{Result, TransportError};
use crate::poll::{poll_fd, Interest};
use crate::traits::Link;

/// UART device link.
///
/// A single descriptor carries both directions. The device is switched to
/// raw mode at the configured baud rate on open, and the previous terminal
/// settings are restored on close. The descriptor itself is closed on drop.
pub struct SerialLink {
    file: File,
    path: PathBuf,
    baudrate: u32,
    saved: Mutex<Option<libc::termios>>,
    closed: AtomicBool,
}

impl SerialLink {
    /// Open `path` and configure it for raw 8N1 I/O at `baudrate`.
    pub fn open(path: impl AsRef<Path>, baudrate: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let speed = baud_to_speed(baudrate).ok_or(TransportError::UnsupportedBaudRate(baudrate))?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY | libc::O_NONBLOCK)
            .open(&path)
            .map_err(|source| TransportError::Open {
                path: path.clone(),
                source,
            })?;

        let saved = configure_raw(&file, speed).map_err(|source| TransportError::Open {
            path: path.clone(),
            source,
        })?;

        info!(?path, baudrate, "opened serial device");

        Ok(Self {
            file,
            path,
            baudrate,
            saved: Mutex::new(Some(saved)),
            closed: AtomicBool::new(false),
        })
    }

    /// The device path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The configured baud rate.
    pub fn baudrate(&self) -> u32 {
        self.baudrate
    }

    fn restore(&self) -> std::io::Result<()> {
        let saved = match self.saved.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(saved) = saved else {
            return Ok(());
        };
        // SAFETY: the descriptor is owned by `self.file` and still open;
        // `saved` is a termios previously filled in by tcgetattr.
        let rc = unsafe { libc::tcsetattr(self.file.as_raw_fd(), libc::TCSANOW, &saved) };
        if rc != 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(())
    }
}

impl Link for SerialLink {
    fn recv(&self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        if !poll_fd(self.file.as_raw_fd(), Interest::Readable, timeout)? {
            return Ok(0);
        }
        match (&self.file).read(buf) {
            Ok(n) => Ok(n),
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
        let mut written = 0usize;

        while written < buf.len() {
            match (&self.file).write(&buf[written..]) {
                Ok(0) => return Err(TransportError::Io(ErrorKind::WriteZero.into())),
                Ok(n) => written += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero()
                        || !poll_fd(self.file.as_raw_fd(), Interest::Writable, remaining)?
                    {
                        return Err(TransportError::WriteTimeout {
                            written,
                            len: buf.len(),
                        });
                    }
                }
                Err(err) => return Err(TransportError::Io(err)),
            }
        }

        Ok(written)
    }

    fn is_ready(&self) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        // SAFETY: F_GETFD only queries descriptor flags.
        unsafe { libc::fcntl(self.file.as_raw_fd(), libc::F_GETFD) != -1 }
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        debug!(path = ?self.path, "restoring serial device settings");
        self.restore()?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "serial"
    }
}

impl Drop for SerialLink {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(path = ?self.path, error = %err, "failed to restore serial device settings");
        }
    }
}

impl std::fmt::Debug for SerialLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialLink")
            .field("path", &self.path)
            .field("baudrate", &self.baudrate)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

fn configure_raw(file: &File, speed: libc::speed_t) -> std::io::Result<libc::termios> {
    let fd = file.as_raw_fd();
    let mut saved = std::mem::MaybeUninit::<libc::termios>::uninit();

    // SAFETY: `saved` is valid writable storage for one termios and `fd` is an
    // open descriptor owned by `file`.
    if unsafe { libc::tcgetattr(fd, saved.as_mut_ptr()) } != 0 {
        return Err(std::io::Error::last_os_error());
    }
    // SAFETY: tcgetattr succeeded and fully initialised the struct.
    let saved = unsafe { saved.assume_init() };

    let mut raw = saved;
    // SAFETY: `raw` is a valid termios copied from the device settings.
    unsafe { libc::cfmakeraw(&mut raw) };
    raw.c_cflag |= libc::CLOCAL | libc::CREAD;
    #[cfg(target_os = "linux")]
    {
        raw.c_cflag &= !libc::CRTSCTS;
    }
    raw.c_cc[libc::VMIN] = 0;
    raw.c_cc[libc::VTIME] = 0;

    // SAFETY: `raw` is a valid termios and `speed` is a termios speed constant.
    let rc = unsafe {
        if libc::cfsetispeed(&mut raw, speed) != 0 || libc::cfsetospeed(&mut raw, speed) != 0 {
            -1
        } else {
            libc::tcsetattr(fd, libc::TCSANOW, &raw)
        }
    };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }

    // Discard whatever the device buffered before we took ownership.
    // SAFETY: `fd` is open.
    unsafe { libc::tcflush(fd, libc::TCIOFLUSH) };

    Ok(saved)
}

fn baud_to_speed(baudrate: u32) -> Option<libc::speed_t> {
    let speed = match baudrate {
        1200 => libc::B1200,
        2400 => libc::B2400,
        4800 => libc::B4800,
        9600 => libc::B9600,
        19200 => libc::B19200,
        38400 => libc::B38400,
        57600 => libc::B57600,
        115200 => libc::B115200,
        230400 => libc::B230400,
        #[cfg(target_os = "linux")]
        460800 => libc::B460800,
        #[cfg(target_os = "linux")]
        500000 => libc::B500000,
        #[cfg(target_os = "linux")]
        921600 => libc::B921600,
        _ => return None,
    };
    Some(speed)
}
