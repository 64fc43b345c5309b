use std::time::Duration;

use serialbridge_frame::{FrameError, TopicId};
use serialbridge_transport::TransportError;

/// Errors that can occur while setting up or running the bridge.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// A required startup parameter is absent.
    #[error("no {0} parameter specified, cannot continue")]
    MissingParameter(String),

    /// A startup parameter is present but unusable.
    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: String, reason: String },

    /// A static topic names a direction other than the two known ones.
    #[error("invalid direction '{value}' for topic {topic}; must be one of 'SerialToROS2' or 'ROS2ToSerial'")]
    InvalidDirection { topic: String, value: String },

    /// A static topic is missing one of its settings.
    #[error("topic {topic} has no {missing} setting")]
    IncompleteTopic { topic: String, missing: &'static str },

    /// Two topics share one serial id.
    #[error("topics {first} and {second} both map to serial id {id}")]
    DuplicateTopicId {
        id: TopicId,
        first: String,
        second: String,
    },

    /// A topic uses an id reserved for negotiation.
    #[error("topic {topic} uses reserved serial id {id}")]
    ReservedTopicId { topic: String, id: TopicId },

    /// The remote end did not answer the mapping request in time.
    #[error("no response to dynamic serial mapping request within {0:?}")]
    NegotiationTimeout(Duration),

    /// The mapping response could not be decoded or is inconsistent.
    #[error("malformed serial mapping response: {0}")]
    MalformedNegotiation(String),

    /// The host collaborator refused a registration or a message.
    #[error("host error: {0}")]
    Host(String),

    /// Link-level error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
}

impl BridgeError {
    /// Whether the error must abort startup.
    ///
    /// Only per-frame failures are survivable; configuration, negotiation
    /// and link setup errors are all fatal.
    pub fn is_fatal(&self) -> bool {
        match self {
            BridgeError::Transport(err) | BridgeError::Frame(FrameError::Transport(err)) => {
                matches!(
                    err,
                    TransportError::Open { .. }
                        | TransportError::UnsupportedBaudRate(_)
                        | TransportError::Bind { .. }
                        | TransportError::Resolve { .. }
                        | TransportError::Closed
                )
            }
            BridgeError::Frame(err) => !err.is_transient(),
            _ => true,
        }
    }

    /// The link-level cause, if there is one.
    pub fn transport(&self) -> Option<&TransportError> {
        match self {
            BridgeError::Transport(err) | BridgeError::Frame(FrameError::Transport(err)) => {
                Some(err)
            }
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
