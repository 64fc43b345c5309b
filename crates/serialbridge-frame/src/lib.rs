//! Topic-tagged framing over serial and UDP links.
//!
//! Every message crossing the link is framed with:
//! - A one-byte topic id (0 and 1 reserved for mapping negotiation)
//! - A one-byte wrapping sequence number
//! - A two-byte big-endian payload length
//! - A CRC-16 of the payload
//!
//! preceded by a `>>>` sync marker (`px4`) or COBS-stuffed and zero
//! terminated (`cobs`). Partial reads and resynchronisation are handled
//! here; callers only ever see complete frames.

pub mod codec;
pub mod crc;
pub mod error;
pub mod reader;
pub mod topic;
pub mod transporter;
pub mod writer;

pub use codec::{
    decode_frame, encode_frame, Frame, FrameConfig, Protocol, DEFAULT_MAX_PAYLOAD,
    DEFAULT_RING_CAPACITY,
};
pub use error::{FrameError, Result};
pub use reader::{FrameReader, FrameStats};
pub use topic::{TopicId, FIRST_APPLICATION_TOPIC, NEGOTIATION_REQUEST, NEGOTIATION_RESPONSE};
pub use transporter::{FrameSender, SharedLink, Transporter};
pub use writer::FrameWriter;
