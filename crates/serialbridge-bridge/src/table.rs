use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use serialbridge_frame::topic::is_reserved;
use serialbridge_frame::TopicId;
use tracing::{debug, warn};

use crate::cdr::{SerialMapping, ROS2TOSERIAL, SERIALTOROS2};
use crate::error::{BridgeError, Result};
use crate::params::Parameters;

/// Parameter value selecting [`Direction::SerialToHost`].
pub const SERIAL_TO_HOST_PARAM: &str = "SerialToROS2";
/// Parameter value selecting [`Direction::HostToSerial`].
pub const HOST_TO_SERIAL_PARAM: &str = "ROS2ToSerial";

const TOPICS_PREFIX: &str = "topics";

/// Which way a topic's messages cross the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Direction {
    SerialToHost,
    HostToSerial,
    Unknown,
}

impl Direction {
    /// Parse the parameter spelling.
    pub fn from_param(value: &str) -> Option<Self> {
        match value {
            SERIAL_TO_HOST_PARAM => Some(Direction::SerialToHost),
            HOST_TO_SERIAL_PARAM => Some(Direction::HostToSerial),
            _ => None,
        }
    }

    /// Parse the negotiation wire code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            SERIALTOROS2 => Some(Direction::SerialToHost),
            ROS2TOSERIAL => Some(Direction::HostToSerial),
            _ => None,
        }
    }

    /// Negotiation wire code; `None` for `Unknown`.
    pub fn code(self) -> Option<u8> {
        match self {
            Direction::SerialToHost => Some(SERIALTOROS2),
            Direction::HostToSerial => Some(ROS2TOSERIAL),
            Direction::Unknown => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::SerialToHost => SERIAL_TO_HOST_PARAM,
            Direction::HostToSerial => HOST_TO_SERIAL_PARAM,
            Direction::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One named, typed topic and the serial id it travels under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopicMapping {
    pub topic_id: TopicId,
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub direction: Direction,
}

/// Immutable map from serial topic id to topic mapping.
///
/// Built once before the reader thread starts: ids are unique, never
/// reserved, and every direction is known.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchTable {
    by_id: BTreeMap<TopicId, TopicMapping>,
}

impl DispatchTable {
    /// Validate and index a list of mappings.
    pub fn from_mappings(mappings: impl IntoIterator<Item = TopicMapping>) -> Result<Self> {
        let mut by_id: BTreeMap<TopicId, TopicMapping> = BTreeMap::new();
        for mapping in mappings {
            if mapping.direction == Direction::Unknown {
                return Err(BridgeError::InvalidDirection {
                    topic: mapping.name,
                    value: Direction::Unknown.to_string(),
                });
            }
            if is_reserved(mapping.topic_id) {
                return Err(BridgeError::ReservedTopicId {
                    topic: mapping.name,
                    id: mapping.topic_id,
                });
            }
            match by_id.entry(mapping.topic_id) {
                Entry::Occupied(existing) => {
                    return Err(BridgeError::DuplicateTopicId {
                        id: mapping.topic_id,
                        first: existing.get().name.clone(),
                        second: mapping.name,
                    });
                }
                Entry::Vacant(slot) => {
                    slot.insert(mapping);
                }
            }
        }
        if by_id.is_empty() {
            warn!("topic table is empty, nothing will be bridged");
        }
        Ok(Self { by_id })
    }

    /// Build from `topics.<name>.{serial_mapping,type,direction}` parameters.
    ///
    /// Parameters of any other shape are ignored. An unknown setting under
    /// a topic, an unknown direction, or a topic missing one of the three
    /// settings is an error.
    pub fn from_parameters(params: &Parameters) -> Result<Self> {
        #[derive(Default)]
        struct Partial {
            topic_id: Option<TopicId>,
            type_name: Option<String>,
            direction: Option<Direction>,
        }

        let mut partials: BTreeMap<&str, Partial> = BTreeMap::new();

        for (key, _) in params.iter() {
            let mut parts = key.split('.');
            let (Some(TOPICS_PREFIX), Some(topic), Some(setting), None) =
                (parts.next(), parts.next(), parts.next(), parts.next())
            else {
                continue;
            };
            if topic.is_empty() || setting.is_empty() {
                continue;
            }

            let partial = partials.entry(topic).or_default();
            match setting {
                "serial_mapping" => {
                    let id = params.require_int::<TopicId>(key)?;
                    partial.topic_id = Some(id);
                }
                "type" => {
                    partial.type_name = Some(params.require_str(key)?.to_string());
                }
                "direction" => {
                    let raw = params.require_str(key)?;
                    let direction =
                        Direction::from_param(raw).ok_or_else(|| BridgeError::InvalidDirection {
                            topic: topic.to_string(),
                            value: raw.to_string(),
                        })?;
                    partial.direction = Some(direction);
                }
                _ => {
                    return Err(BridgeError::InvalidParameter {
                        name: key.to_string(),
                        reason: format!("unknown topic setting '{setting}'"),
                    });
                }
            }
        }

        let mut mappings = Vec::with_capacity(partials.len());
        for (name, partial) in partials {
            let incomplete = |missing| BridgeError::IncompleteTopic {
                topic: name.to_string(),
                missing,
            };
            let mapping = TopicMapping {
                topic_id: partial.topic_id.ok_or_else(|| incomplete("serial_mapping"))?,
                name: name.to_string(),
                type_name: partial.type_name.ok_or_else(|| incomplete("type"))?,
                direction: partial.direction.ok_or_else(|| incomplete("direction"))?,
            };
            debug!(
                topic = %mapping.name,
                id = mapping.topic_id,
                direction = %mapping.direction,
                "static topic mapping"
            );
            mappings.push(mapping);
        }

        Self::from_mappings(mappings)
    }

    /// Build from a negotiated response.
    pub fn from_negotiation(response: &SerialMapping) -> Result<Self> {
        let len = response.consistent_len()?;
        let mut mappings = Vec::with_capacity(len);
        for i in 0..len {
            let code = response.direction[i];
            let direction = Direction::from_code(code).ok_or_else(|| {
                BridgeError::MalformedNegotiation(format!(
                    "unknown direction code {code} for topic {}",
                    response.topic_names[i]
                ))
            })?;
            mappings.push(TopicMapping {
                topic_id: response.serial_mappings[i],
                name: response.topic_names[i].clone(),
                type_name: response.types[i].clone(),
                direction,
            });
        }
        Self::from_mappings(mappings)
    }

    /// The negotiation message describing this table.
    pub fn to_negotiation(&self) -> SerialMapping {
        let mut out = SerialMapping::default();
        for mapping in self.by_id.values() {
            out.topic_names.push(mapping.name.clone());
            out.serial_mappings.push(mapping.topic_id);
            out.types.push(mapping.type_name.clone());
            // Unknown never survives construction.
            out.direction.push(mapping.direction.code().unwrap_or(SERIALTOROS2));
        }
        out
    }

    pub fn get(&self, id: TopicId) -> Option<&TopicMapping> {
        self.by_id.get(&id)
    }

    pub fn by_name(&self, name: &str) -> Option<&TopicMapping> {
        self.by_id.values().find(|m| m.name == name)
    }

    /// Mappings in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = &TopicMapping> {
        self.by_id.values()
    }

    /// Topics received from the link and published to the host.
    pub fn inbound(&self) -> impl Iterator<Item = &TopicMapping> {
        self.iter()
            .filter(|m| m.direction == Direction::SerialToHost)
    }

    /// Topics taken from the host and written to the link.
    pub fn outbound(&self) -> impl Iterator<Item = &TopicMapping> {
        self.iter()
            .filter(|m| m.direction == Direction::HostToSerial)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
