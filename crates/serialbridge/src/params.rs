//! Startup parameters from a YAML file, command-line flags and the
//! environment.
//!
//! The file may be a flat mapping or the ROS 2 parameter shape
//! (`<node>: { ros__parameters: { ... } }`). Nested maps are flattened to
//! dotted keys, so `topics: { imu: { type: X } }` becomes `topics.imu.type`.
//! Flags override the file.

use std::path::{Path, PathBuf};

use clap::Args;
use serde_yaml::{Mapping, Value};
use serialbridge_bridge::{keys, ParamValue, Parameters};

use crate::exit::{CliError, CliResult, DATA_INVALID, USAGE};

const ROS_PARAMETERS: &str = "ros__parameters";

#[derive(Args, Debug, Default, Clone)]
pub struct ParamArgs {
    /// YAML parameter file.
    #[arg(long, value_name = "FILE", env = "SERIALBRIDGE_PARAMS")]
    pub params: Option<PathBuf>,
    /// Node whose `ros__parameters` to use when the file has several.
    #[arg(long, value_name = "NAME", env = "SERIALBRIDGE_NODE")]
    pub node: Option<String>,
    /// Link backend: serial or udp.
    #[arg(long, env = "SERIALBRIDGE_TRANSPORT")]
    pub transport: Option<String>,
    /// Serial device path, or the remote host for udp.
    #[arg(long, env = "SERIALBRIDGE_DEVICE")]
    pub device: Option<String>,
    /// Wire protocol: px4 or cobs.
    #[arg(long, env = "SERIALBRIDGE_SERIAL_PROTOCOL")]
    pub serial_protocol: Option<String>,
    #[arg(long, env = "SERIALBRIDGE_BAUDRATE")]
    pub baudrate: Option<i64>,
    #[arg(long, env = "SERIALBRIDGE_RECV_PORT")]
    pub recv_port: Option<i64>,
    #[arg(long, env = "SERIALBRIDGE_SEND_PORT")]
    pub send_port: Option<i64>,
    #[arg(long, env = "SERIALBRIDGE_READ_POLL_MS")]
    pub read_poll_ms: Option<i64>,
    #[arg(long, env = "SERIALBRIDGE_RING_BUFFER_SIZE")]
    pub ring_buffer_size: Option<i64>,
    #[arg(long, env = "SERIALBRIDGE_WRITE_SLEEP_MS")]
    pub write_sleep_ms: Option<i64>,
    /// Negotiation budget in ms; zero or negative uses the static topic table.
    #[arg(long, env = "SERIALBRIDGE_DYNAMIC_SERIAL_MAPPING_MS", allow_hyphen_values = true)]
    pub dynamic_serial_mapping_ms: Option<i64>,
    #[arg(long, env = "SERIALBRIDGE_MAX_PAYLOAD")]
    pub max_payload: Option<i64>,
}

impl ParamArgs {
    /// The file's parameters with flag and environment overrides applied.
    pub fn load(&self) -> CliResult<Parameters> {
        let mut params = match &self.params {
            Some(path) => load_file(path, self.node.as_deref())?,
            None => Parameters::new(),
        };
        params.merge(self.overrides());
        Ok(params)
    }

    fn overrides(&self) -> Parameters {
        let strings = [
            (keys::TRANSPORT, &self.transport),
            (keys::DEVICE, &self.device),
            (keys::SERIAL_PROTOCOL, &self.serial_protocol),
        ];
        let ints = [
            (keys::BAUDRATE, self.baudrate),
            (keys::RECV_PORT, self.recv_port),
            (keys::SEND_PORT, self.send_port),
            (keys::READ_POLL_MS, self.read_poll_ms),
            (keys::RING_BUFFER_SIZE, self.ring_buffer_size),
            (keys::WRITE_SLEEP_MS, self.write_sleep_ms),
            (keys::DYNAMIC_SERIAL_MAPPING_MS, self.dynamic_serial_mapping_ms),
            (keys::MAX_PAYLOAD, self.max_payload),
        ];

        let mut params = Parameters::new();
        for (key, value) in strings {
            if let Some(value) = value {
                params.insert(key, value.as_str());
            }
        }
        for (key, value) in ints {
            if let Some(value) = value {
                params.insert(key, value);
            }
        }
        params
    }
}

pub fn load_file(path: &Path, node: Option<&str>) -> CliResult<Parameters> {
    let text = std::fs::read_to_string(path).map_err(|err| {
        CliError::new(USAGE, format!("cannot read {}: {err}", path.display()))
    })?;
    parse_yaml(&text, node)
        .map_err(|err| CliError::new(err.code, format!("{}: {}", path.display(), err.message)))
}

pub fn parse_yaml(text: &str, node: Option<&str>) -> CliResult<Parameters> {
    let doc: Value = serde_yaml::from_str(text)
        .map_err(|err| CliError::new(DATA_INVALID, format!("invalid YAML: {err}")))?;
    let root = match doc {
        Value::Mapping(map) => map,
        Value::Null => Mapping::new(),
        _ => {
            return Err(CliError::new(
                DATA_INVALID,
                "parameter file must contain a mapping",
            ))
        }
    };

    let mut params = Parameters::new();
    flatten(&select_node(root, node)?, "", &mut params)?;
    Ok(params)
}

/// Pick the `ros__parameters` block, or the whole file when it has none.
fn select_node(root: Mapping, node: Option<&str>) -> CliResult<Mapping> {
    let mut blocks: Vec<(String, Mapping)> = root
        .iter()
        .filter_map(|(name, body)| {
            let block = body.as_mapping()?.get(ROS_PARAMETERS)?.as_mapping()?;
            Some((name.as_str()?.to_string(), block.clone()))
        })
        .collect();

    if blocks.is_empty() {
        return match node {
            Some(name) => Err(CliError::new(
                USAGE,
                format!("no ros__parameters for node {name}"),
            )),
            None => Ok(root),
        };
    }

    match node {
        Some(name) => blocks
            .into_iter()
            .find(|(candidate, _)| candidate.trim_start_matches('/') == name.trim_start_matches('/'))
            .map(|(_, block)| block)
            .ok_or_else(|| CliError::new(USAGE, format!("no ros__parameters for node {name}"))),
        None if blocks.len() == 1 => Ok(blocks.remove(0).1),
        None => {
            let names: Vec<_> = blocks.iter().map(|(name, _)| name.as_str()).collect();
            Err(CliError::new(
                USAGE,
                format!("several nodes in parameter file ({}), pick one with --node", names.join(", ")),
            ))
        }
    }
}

fn flatten(map: &Mapping, prefix: &str, out: &mut Parameters) -> CliResult<()> {
    for (key, value) in map {
        let key = scalar_key(key).ok_or_else(|| {
            CliError::new(DATA_INVALID, format!("unsupported key under '{prefix}'"))
        })?;
        let name = if prefix.is_empty() {
            key
        } else {
            format!("{prefix}.{key}")
        };

        let value = match value {
            Value::Mapping(inner) => {
                flatten(inner, &name, out)?;
                continue;
            }
            Value::Null => continue,
            Value::Bool(b) => ParamValue::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => ParamValue::Int(i),
                None => ParamValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => ParamValue::String(s.clone()),
            Value::Sequence(_) | Value::Tagged(_) => {
                return Err(CliError::new(
                    DATA_INVALID,
                    format!("parameter {name} must be a scalar"),
                ))
            }
        };
        out.insert(name, value);
    }
    Ok(())
}

fn scalar_key(key: &Value) -> Option<String> {
    match key {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
