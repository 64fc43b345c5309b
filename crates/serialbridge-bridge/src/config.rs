use std::path::PathBuf;
use std::time::Duration;

use serialbridge_frame::{FrameConfig, Protocol, DEFAULT_MAX_PAYLOAD};
use serialbridge_transport::LinkConfig;

use crate::error::{BridgeError, Result};
use crate::params::Parameters;

/// Startup parameter names.
pub mod keys {
    pub const TRANSPORT: &str = "transport";
    pub const DEVICE: &str = "device";
    pub const SERIAL_PROTOCOL: &str = "serial_protocol";
    pub const BAUDRATE: &str = "baudrate";
    pub const RECV_PORT: &str = "recv_port";
    pub const SEND_PORT: &str = "send_port";
    pub const READ_POLL_MS: &str = "read_poll_ms";
    pub const RING_BUFFER_SIZE: &str = "ring_buffer_size";
    pub const WRITE_SLEEP_MS: &str = "write_sleep_ms";
    pub const DYNAMIC_SERIAL_MAPPING_MS: &str = "dynamic_serial_mapping_ms";
    pub const MAX_PAYLOAD: &str = "max_payload";
}

/// Bridge tuning, independent of which link backend is used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Wire protocol on the link.
    pub protocol: Protocol,
    /// Upper bound on one read attempt, and so on shutdown latency.
    pub read_poll_ms: u64,
    /// Ring buffer capacity in bytes.
    pub ring_buffer_size: usize,
    /// Cadence of the host-side write pump.
    pub write_sleep_ms: u64,
    /// Largest payload per frame.
    pub max_payload: usize,
    /// Negotiation wait budget; zero or negative selects the static table.
    pub dynamic_serial_mapping_ms: i64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            protocol: Protocol::Px4,
            read_poll_ms: 100,
            ring_buffer_size: 8192,
            write_sleep_ms: 10,
            max_payload: DEFAULT_MAX_PAYLOAD,
            dynamic_serial_mapping_ms: -1,
        }
    }
}

impl BridgeConfig {
    /// Read the bridge parameters. All but `max_payload` are required.
    pub fn from_parameters(params: &Parameters) -> Result<Self> {
        let protocol_name = params.require_str(keys::SERIAL_PROTOCOL)?;
        let protocol: Protocol = protocol_name
            .parse()
            .map_err(|_| BridgeError::InvalidParameter {
                name: keys::SERIAL_PROTOCOL.to_string(),
                reason: format!("unknown protocol '{protocol_name}' (expected px4 or cobs)"),
            })?;

        let config = Self {
            protocol,
            read_poll_ms: params.require_int(keys::READ_POLL_MS)?,
            ring_buffer_size: params.require_int(keys::RING_BUFFER_SIZE)?,
            write_sleep_ms: params.require_int(keys::WRITE_SLEEP_MS)?,
            max_payload: params
                .optional_int(keys::MAX_PAYLOAD)?
                .unwrap_or(DEFAULT_MAX_PAYLOAD),
            dynamic_serial_mapping_ms: params.require_i64(keys::DYNAMIC_SERIAL_MAPPING_MS)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let positive = |name: &str, value: u64| {
            if value == 0 {
                Err(BridgeError::InvalidParameter {
                    name: name.to_string(),
                    reason: "must be greater than zero".to_string(),
                })
            } else {
                Ok(())
            }
        };
        positive(keys::READ_POLL_MS, self.read_poll_ms)?;
        positive(keys::WRITE_SLEEP_MS, self.write_sleep_ms)?;
        positive(keys::MAX_PAYLOAD, self.max_payload as u64)?;
        self.frame_config()
            .validate()
            .map_err(|err| BridgeError::InvalidParameter {
                name: keys::RING_BUFFER_SIZE.to_string(),
                reason: err.to_string(),
            })
    }

    /// Framing settings for the transporter.
    pub fn frame_config(&self) -> FrameConfig {
        FrameConfig {
            protocol: self.protocol,
            max_payload: self.max_payload,
            ring_capacity: self.ring_buffer_size,
            read_poll: self.read_poll(),
            ..FrameConfig::default()
        }
    }

    pub fn read_poll(&self) -> Duration {
        Duration::from_millis(self.read_poll_ms)
    }

    pub fn write_sleep(&self) -> Duration {
        Duration::from_millis(self.write_sleep_ms)
    }

    /// The negotiation budget when the dynamic mapping is selected.
    pub fn mapping_wait(&self) -> Option<Duration> {
        u64::try_from(self.dynamic_serial_mapping_ms)
            .ok()
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }
}

/// Read the link parameters.
///
/// `transport` defaults to `serial`, which needs `device` and `baudrate`.
/// `udp` needs `device` (the remote host), `recv_port` and `send_port`.
pub fn link_from_parameters(params: &Parameters) -> Result<LinkConfig> {
    let transport = params.optional_str(keys::TRANSPORT)?.unwrap_or("serial");
    let device = params.require_str(keys::DEVICE)?;
    match transport {
        "serial" => Ok(LinkConfig::Serial {
            device: PathBuf::from(device),
            baudrate: params.require_int(keys::BAUDRATE)?,
        }),
        "udp" => Ok(LinkConfig::Udp {
            host: device.to_string(),
            recv_port: params.require_int(keys::RECV_PORT)?,
            send_port: params.require_int(keys::SEND_PORT)?,
        }),
        other => Err(BridgeError::InvalidParameter {
            name: keys::TRANSPORT.to_string(),
            reason: format!("unknown transport '{other}' (expected serial or udp)"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ParamValue;

    fn base() -> Parameters {
        [
            (keys::DEVICE, ParamValue::from("/dev/ttyACM0")),
            (keys::SERIAL_PROTOCOL, "px4".into()),
            (keys::BAUDRATE, 115200i64.into()),
            (keys::READ_POLL_MS, 100i64.into()),
            (keys::RING_BUFFER_SIZE, 8192i64.into()),
            (keys::WRITE_SLEEP_MS, 10i64.into()),
            (keys::DYNAMIC_SERIAL_MAPPING_MS, (-1i64).into()),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn reads_complete_parameter_set() {
        let params = base();
        let config = BridgeConfig::from_parameters(&params).unwrap();
        assert_eq!(config, BridgeConfig::default());
        assert_eq!(config.mapping_wait(), None);
        assert_eq!(
            link_from_parameters(&params).unwrap(),
            LinkConfig::Serial {
                device: "/dev/ttyACM0".into(),
                baudrate: 115200
            }
        );
    }

    #[test]
    fn every_required_parameter_is_checked() {
        for key in [
            keys::DEVICE,
            keys::SERIAL_PROTOCOL,
            keys::BAUDRATE,
            keys::READ_POLL_MS,
            keys::RING_BUFFER_SIZE,
            keys::WRITE_SLEEP_MS,
            keys::DYNAMIC_SERIAL_MAPPING_MS,
        ] {
            let params: Parameters = base()
                .iter()
                .filter(|(k, _)| *k != key)
                .map(|(k, v)| (k, v.clone()))
                .collect();
            let result = BridgeConfig::from_parameters(&params)
                .and_then(|_| link_from_parameters(&params));
            assert!(
                matches!(result, Err(BridgeError::MissingParameter(ref name)) if name == key),
                "{key} should be required"
            );
        }
    }

    #[test]
    fn positive_wait_selects_negotiation() {
        let mut params = base();
        params.insert(keys::DYNAMIC_SERIAL_MAPPING_MS, 500i64);
        let config = BridgeConfig::from_parameters(&params).unwrap();
        assert_eq!(config.mapping_wait(), Some(Duration::from_millis(500)));
    }

    #[test]
    fn rejects_bad_values() {
        let mut params = base();
        params.insert(keys::SERIAL_PROTOCOL, "slip");
        assert!(matches!(
            BridgeConfig::from_parameters(&params),
            Err(BridgeError::InvalidParameter { .. })
        ));

        let mut params = base();
        params.insert(keys::READ_POLL_MS, 0i64);
        assert!(BridgeConfig::from_parameters(&params).is_err());

        let mut params = base();
        params.insert(keys::RING_BUFFER_SIZE, 4i64);
        assert!(BridgeConfig::from_parameters(&params).is_err());
    }

    #[test]
    fn udp_link_parameters() {
        let mut params = base();
        params.insert(keys::TRANSPORT, "udp");
        params.insert(keys::DEVICE, "127.0.0.1");
        assert!(matches!(
            link_from_parameters(&params),
            Err(BridgeError::MissingParameter(ref name)) if name == keys::RECV_PORT
        ));

        params.insert(keys::RECV_PORT, 2019i64);
        params.insert(keys::SEND_PORT, 2020i64);
        assert_eq!(
            link_from_parameters(&params).unwrap(),
            LinkConfig::Udp {
                host: "127.0.0.1".into(),
                recv_port: 2019,
                send_port: 2020
            }
        );

        params.insert(keys::TRANSPORT, "can");
        assert!(link_from_parameters(&params).is_err());
    }
}
