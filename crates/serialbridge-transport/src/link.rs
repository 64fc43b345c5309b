use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::Result;
use crate::serial::SerialLink;
use crate::traits::Link;
use crate::udp::UdpLink;

/// Which backend to open and where it points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkConfig {
    /// A UART device at a fixed baud rate.
    Serial { device: PathBuf, baudrate: u32 },
    /// A UDP socket pair: receive on `0.0.0.0:recv_port`, send to
    /// `host:send_port`.
    Udp {
        host: String,
        recv_port: u16,
        send_port: u16,
    },
}

impl LinkConfig {
    /// Open the configured backend as a shareable link.
    pub fn open(&self) -> Result<Arc<dyn Link>> {
        match self {
            LinkConfig::Serial { device, baudrate } => {
                Ok(Arc::new(SerialLink::open(device, *baudrate)?))
            }
            LinkConfig::Udp {
                host,
                recv_port,
                send_port,
            } => Ok(Arc::new(UdpLink::open(host, *recv_port, *send_port)?)),
        }
    }

    /// Backend name, matching [`Link::name`] of the opened link.
    pub fn kind(&self) -> &'static str {
        match self {
            LinkConfig::Serial { .. } => "serial",
            LinkConfig::Udp { .. } => "udp",
        }
    }
}

impl fmt::Display for LinkConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkConfig::Serial { device, baudrate } => {
                write!(f, "serial {} @ {baudrate}", device.display())
            }
            LinkConfig::Udp {
                host,
                recv_port,
                send_port,
            } => write!(f, "udp :{recv_port} -> {host}:{send_port}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;

    #[test]
    fn opens_udp_backend() {
        let config = LinkConfig::Udp {
            host: "127.0.0.1".into(),
            recv_port: 0,
            send_port: 9,
        };
        let link = config.open().unwrap();
        assert_eq!(link.name(), config.kind());
        assert!(link.is_datagram());
        assert!(link.is_ready());
        assert_eq!(config.to_string(), "udp :0 -> 127.0.0.1:9");
    }

    #[test]
    fn serial_open_failure_propagates() {
        let config = LinkConfig::Serial {
            device: "/dev/serialbridge-does-not-exist".into(),
            baudrate: 115200,
        };
        assert!(matches!(config.open(), Err(TransportError::Open { .. })));
        assert_eq!(config.kind(), "serial");
    }
}
