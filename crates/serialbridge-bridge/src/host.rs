//! Seams to the host messaging framework.
//!
//! The bridge never encodes or decodes message types itself. For each
//! serial-to-host topic it asks the host for a [`Publisher`] that turns a
//! payload into a published message; for each host-to-serial topic it hands
//! the host an [`OutboundTopic`] to call whenever a message is produced.

use std::fmt;
use std::sync::Arc;

use serialbridge_frame::{FrameSender, TopicId};
use tracing::warn;

use crate::error::Result;
use crate::table::TopicMapping;

/// Deserialize-and-publish capability for one serial-to-host topic.
///
/// Runs on the reader thread.
pub trait Publisher: Send {
    /// Publish one received payload.
    fn publish(&mut self, payload: &[u8]) -> Result<()>;
}

impl<F> Publisher for F
where
    F: FnMut(&[u8]) -> Result<()> + Send,
{
    fn publish(&mut self, payload: &[u8]) -> Result<()> {
        self(payload)
    }
}

/// The host framework side of the bridge.
pub trait HostNode {
    /// Create the publisher for a serial-to-host topic.
    fn create_publisher(&mut self, mapping: &TopicMapping) -> Result<Box<dyn Publisher>>;

    /// Subscribe to a host-to-serial topic. Every message the host produces
    /// on it must be serialized and passed to `outbound`.
    fn create_subscription(&mut self, mapping: &TopicMapping, outbound: OutboundTopic)
        -> Result<()>;
}

/// Write handle for one host-to-serial topic.
///
/// Cheap to clone and usable from any thread. Each send blocks for at most
/// the link's write timeout.
#[derive(Clone)]
pub struct OutboundTopic {
    topic_id: TopicId,
    name: Arc<str>,
    header_len: usize,
    sender: FrameSender,
}

impl OutboundTopic {
    pub(crate) fn new(mapping: &TopicMapping, header_len: usize, sender: FrameSender) -> Self {
        Self {
            topic_id: mapping.topic_id,
            name: Arc::from(mapping.name.as_str()),
            header_len,
            sender,
        }
    }

    /// Frame and write one serialized message.
    pub fn send(&self, payload: &[u8]) -> Result<usize> {
        self.sender.write(self.topic_id, payload).map_err(|err| {
            warn!(topic = %self.name, id = self.topic_id, error = %err, "dropping outbound message");
            err.into()
        })
    }

    pub fn topic_id(&self) -> TopicId {
        self.topic_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Length of the frame header the link adds in front of each payload.
    pub fn header_len(&self) -> usize {
        self.header_len
    }

    /// Largest payload [`OutboundTopic::send`] accepts.
    pub fn max_payload(&self) -> usize {
        self.sender.max_payload()
    }
}

impl fmt::Debug for OutboundTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutboundTopic")
            .field("topic_id", &self.topic_id)
            .field("name", &self.name)
            .field("header_len", &self.header_len)
            .finish()
    }
}
