use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serialbridge_transport::{Link, LinkConfig};
use tracing::{debug, info};

use crate::codec::{Frame, FrameConfig};
use crate::error::Result;
use crate::reader::{FrameReader, FrameStats};
use crate::topic::TopicId;
use crate::writer::FrameWriter;

/// Shared handle to one link.
pub type SharedLink = Arc<dyn Link>;

/// Framed endpoint over a serial or UDP link.
///
/// The reader half owns the ring buffer and is driven by a single thread.
/// The writer half sits behind a mutex and can be reached from any thread
/// through [`FrameSender`] clones while the reader is busy.
pub struct Transporter {
    reader: FrameReader<SharedLink>,
    sender: FrameSender,
}

impl Transporter {
    /// Frame an already opened link.
    pub fn new(link: SharedLink, config: FrameConfig) -> Result<Self> {
        let reader = FrameReader::with_config(Arc::clone(&link), config.clone())?;
        let writer = FrameWriter::with_config(link, config)?;
        Ok(Self {
            reader,
            sender: FrameSender {
                inner: Arc::new(Mutex::new(writer)),
            },
        })
    }

    /// Open the configured backend and frame it.
    pub fn open(link: &LinkConfig, config: FrameConfig) -> Result<Self> {
        config.validate()?;
        let opened = link.open()?;
        info!(
            link = %link,
            protocol = %config.protocol,
            ring_capacity = config.ring_capacity,
            "transporter ready"
        );
        Self::new(opened, config)
    }

    /// Header length of the wire protocol in use.
    pub fn header_len(&self) -> usize {
        self.reader.header_len()
    }

    /// Largest payload a frame may carry.
    pub fn max_payload(&self) -> usize {
        self.reader.max_payload()
    }

    /// How long one read attempt waits for the link.
    pub fn read_poll(&self) -> Duration {
        self.reader.config().read_poll
    }

    /// One bounded read attempt; see [`FrameReader::read_frame`].
    pub fn read_frame(&mut self) -> Result<Option<Frame>> {
        self.reader.read_frame()
    }

    /// Frame and send one payload.
    pub fn write(&self, topic: TopicId, payload: &[u8]) -> Result<usize> {
        self.sender.write(topic, payload)
    }

    /// A clonable handle to the writer half.
    pub fn sender(&self) -> FrameSender {
        self.sender.clone()
    }

    /// Whether the link is open and usable.
    pub fn is_ready(&self) -> bool {
        self.reader.get_ref().is_ready()
    }

    /// Backend name of the link.
    pub fn link_name(&self) -> &'static str {
        self.reader.get_ref().name()
    }

    /// Inbound counters.
    pub fn read_stats(&self) -> FrameStats {
        self.reader.stats()
    }

    /// Split into the reader half and the writer handle.
    pub fn split(self) -> (FrameReader<SharedLink>, FrameSender) {
        (self.reader, self.sender)
    }

    /// Close the link. Senders still held elsewhere fail with
    /// `TransportError::Closed` from then on.
    pub fn close(&self) -> Result<()> {
        debug!(link = self.link_name(), "closing transporter");
        self.reader.get_ref().close()?;
        Ok(())
    }
}

/// Clonable, thread-safe handle to the writer half of a [`Transporter`].
#[derive(Clone)]
pub struct FrameSender {
    inner: Arc<Mutex<FrameWriter<SharedLink>>>,
}

impl FrameSender {
    /// Frame and send one payload; serialised against other senders.
    pub fn write(&self, topic: TopicId, payload: &[u8]) -> Result<usize> {
        self.lock().write(topic, payload)
    }

    /// Largest payload a frame may carry.
    pub fn max_payload(&self) -> usize {
        self.lock().max_payload()
    }

    /// Outbound counters.
    pub fn stats(&self) -> FrameStats {
        self.lock().stats()
    }

    /// Close the shared link.
    pub fn close(&self) -> Result<()> {
        self.lock().get_ref().close()?;
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, FrameWriter<SharedLink>> {
        // A panicking writer leaves no partial frame queued, so the state is
        // still consistent.
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl std::fmt::Debug for FrameSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameSender")
            .field("stats", &self.stats())
            .finish()
    }
}
