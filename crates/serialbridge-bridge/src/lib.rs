//! Topic dispatch between a framed serial link and a host pub/sub node.
//!
//! Startup builds an immutable [`DispatchTable`] either from static
//! `topics.<name>.*` parameters or by asking the remote endpoint over the
//! reserved negotiation topics. [`Bridge`] then registers a publisher for
//! every serial-to-host topic and an [`OutboundTopic`] for every
//! host-to-serial topic, and runs a dedicated reader thread that hands each
//! inbound frame to its publisher.
//!
//! ```no_run
//! use serialbridge_bridge::{link_from_parameters, Bridge, BridgeConfig, Parameters};
//! # fn run(params: Parameters, host: &mut dyn serialbridge_bridge::HostNode) -> serialbridge_bridge::Result<()> {
//! let link = link_from_parameters(&params)?;
//! let config = BridgeConfig::from_parameters(&params)?;
//! let mut bridge = Bridge::open(&link, &config, &params, host)?;
//! // ... host callbacks run here ...
//! bridge.shutdown()?;
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod cdr;
pub mod config;
pub mod error;
pub mod host;
pub mod negotiate;
pub mod params;
pub mod table;

pub use bridge::{load_table, Bridge, BridgeState, ReaderSummary};
pub use cdr::{SerialMapping, ROS2TOSERIAL, SERIALTOROS2};
pub use config::{keys, link_from_parameters, BridgeConfig};
pub use error::{BridgeError, Result};
pub use host::{HostNode, OutboundTopic, Publisher};
pub use negotiate::{negotiate, request_mapping, serve_mapping};
pub use params::{ParamValue, Parameters};
pub use table::{Direction, DispatchTable, TopicMapping};
