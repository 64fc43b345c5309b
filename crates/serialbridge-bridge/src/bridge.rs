use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serialbridge_frame::topic::is_reserved;
use serialbridge_frame::{
    Frame, FrameError, FrameReader, FrameSender, FrameStats, SharedLink, TopicId, Transporter,
};
use serialbridge_transport::LinkConfig;
use tracing::{debug, error, info, warn};

use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::host::{HostNode, OutboundTopic, Publisher};
use crate::negotiate::negotiate;
use crate::params::Parameters;
use crate::table::{Direction, DispatchTable};

const READER_THREAD_NAME: &str = "serialbridge-reader";

/// Longest single sleep while backing off after a read error.
const CANCEL_CHECK_INTERVAL: Duration = Duration::from_millis(10);

/// Lifecycle of a [`Bridge`]. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Constructing,
    Running,
    ShuttingDown,
    Stopped,
}

impl fmt::Display for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BridgeState::Constructing => "constructing",
            BridgeState::Running => "running",
            BridgeState::ShuttingDown => "shutting down",
            BridgeState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// What the reader thread did over its lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReaderSummary {
    /// Framing counters of the inbound half.
    pub frames: FrameStats,
    /// Payloads handed to a publisher successfully.
    pub published: u64,
    /// Payloads a publisher rejected.
    pub publish_failures: u64,
    /// Frames on ids with no inbound topic.
    pub unroutable: u64,
    /// Whether the loop ended because the link failed rather than on request.
    pub link_failed: bool,
}

/// Build the dispatch table the way startup does: negotiate when
/// `config` selects it, otherwise read the static `topics.*` parameters.
pub fn load_table(
    transporter: &mut Transporter,
    config: &BridgeConfig,
    params: &Parameters,
) -> Result<DispatchTable> {
    match config.mapping_wait() {
        Some(wait) => negotiate(transporter, wait),
        None => DispatchTable::from_parameters(params),
    }
}

/// Bridges one link to the host framework.
///
/// Owns the reader thread and the write side of the link. Dropping the
/// bridge shuts it down: the reader is cancelled and joined, then the link
/// is closed.
pub struct Bridge {
    state: BridgeState,
    table: Arc<DispatchTable>,
    sender: FrameSender,
    cancel: Arc<AtomicBool>,
    reader: Option<JoinHandle<ReaderSummary>>,
    read_poll: Duration,
}

impl Bridge {
    /// Open the link, build the topic table and start bridging.
    ///
    /// Every failure here is fatal and leaves the link closed.
    pub fn open(
        link: &LinkConfig,
        config: &BridgeConfig,
        params: &Parameters,
        host: &mut dyn HostNode,
    ) -> Result<Self> {
        info!(state = %BridgeState::Constructing, link = %link, "starting bridge");
        config.validate()?;
        let mut transporter = Transporter::open(link, config.frame_config())?;

        let table = match load_table(&mut transporter, config, params) {
            Ok(table) => table,
            Err(err) => {
                close_after_failure(&transporter.sender());
                return Err(err);
            }
        };

        Self::start(transporter, table, host)
    }

    /// Register every topic with the host and start the reader thread.
    pub fn start(
        transporter: Transporter,
        table: DispatchTable,
        host: &mut dyn HostNode,
    ) -> Result<Self> {
        let header_len = transporter.header_len();
        let read_poll = transporter.read_poll();
        let (reader, sender) = transporter.split();

        let routes = match register(&table, header_len, &sender, host) {
            Ok(routes) => routes,
            Err(err) => {
                close_after_failure(&sender);
                return Err(err);
            }
        };

        let table = Arc::new(table);
        let cancel = Arc::new(AtomicBool::new(false));
        let handle = {
            let table = Arc::clone(&table);
            let cancel = Arc::clone(&cancel);
            thread::Builder::new()
                .name(READER_THREAD_NAME.to_string())
                .spawn(move || reader_loop(reader, routes, &table, &cancel, read_poll))
        };
        let handle = match handle {
            Ok(handle) => handle,
            Err(err) => {
                close_after_failure(&sender);
                return Err(BridgeError::Transport(err.into()));
            }
        };

        info!(
            state = %BridgeState::Running,
            inbound = table.inbound().count(),
            outbound = table.outbound().count(),
            "bridge running"
        );

        Ok(Self {
            state: BridgeState::Running,
            table,
            sender,
            cancel,
            reader: Some(handle),
            read_poll,
        })
    }

    pub fn state(&self) -> BridgeState {
        self.state
    }

    /// The topic table in use.
    pub fn table(&self) -> &DispatchTable {
        &self.table
    }

    /// Outbound framing counters.
    pub fn write_stats(&self) -> FrameStats {
        self.sender.stats()
    }

    /// Whether the reader thread is still running.
    pub fn is_reading(&self) -> bool {
        self.reader.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Cancel and join the reader, then close the link.
    ///
    /// Blocks for at most one read poll interval plus the dispatch of one
    /// in-flight frame. Calling it again after it returned is a no-op.
    pub fn shutdown(&mut self) -> Result<ReaderSummary> {
        if self.state == BridgeState::Stopped {
            return Ok(ReaderSummary::default());
        }
        self.state = BridgeState::ShuttingDown;
        info!(
            state = %self.state,
            read_poll_ms = self.read_poll.as_millis() as u64,
            "stopping bridge"
        );

        let started = Instant::now();
        self.cancel.store(true, Ordering::Release);
        let summary = match self.reader.take().map(JoinHandle::join) {
            Some(Ok(summary)) => summary,
            Some(Err(_)) => {
                error!("reader thread panicked");
                ReaderSummary::default()
            }
            None => ReaderSummary::default(),
        };
        debug!(elapsed_ms = started.elapsed().as_millis() as u64, "reader joined");

        let closed = self.sender.close();
        self.state = BridgeState::Stopped;

        let written = self.sender.stats();
        info!(
            state = %self.state,
            frames_in = summary.frames.frames,
            bytes_in = summary.frames.bytes,
            dropped_in = summary.frames.dropped,
            overflows = summary.frames.overflows,
            published = summary.published,
            unroutable = summary.unroutable,
            frames_out = written.frames,
            bytes_out = written.bytes,
            dropped_out = written.dropped,
            "bridge stopped"
        );

        closed?;
        Ok(summary)
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            warn!(error = %err, "error while closing link");
        }
    }
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("state", &self.state)
            .field("topics", &self.table.len())
            .finish()
    }
}

struct Route {
    name: String,
    publisher: Box<dyn Publisher>,
}

fn register(
    table: &DispatchTable,
    header_len: usize,
    sender: &FrameSender,
    host: &mut dyn HostNode,
) -> Result<HashMap<TopicId, Route>> {
    let mut routes = HashMap::new();
    for mapping in table.iter() {
        match mapping.direction {
            Direction::SerialToHost => {
                let publisher = host.create_publisher(mapping)?;
                routes.insert(
                    mapping.topic_id,
                    Route {
                        name: mapping.name.clone(),
                        publisher,
                    },
                );
            }
            Direction::HostToSerial => {
                let outbound = OutboundTopic::new(mapping, header_len, sender.clone());
                host.create_subscription(mapping, outbound)?;
            }
            Direction::Unknown => {
                return Err(BridgeError::InvalidDirection {
                    topic: mapping.name.clone(),
                    value: mapping.direction.to_string(),
                });
            }
        }
        debug!(
            topic = %mapping.name,
            id = mapping.topic_id,
            direction = %mapping.direction,
            "registered topic"
        );
    }
    Ok(routes)
}

fn reader_loop(
    mut reader: FrameReader<SharedLink>,
    mut routes: HashMap<TopicId, Route>,
    table: &DispatchTable,
    cancel: &AtomicBool,
    read_poll: Duration,
) -> ReaderSummary {
    let mut summary = ReaderSummary::default();

    while !cancel.load(Ordering::Acquire) {
        match reader.read_frame() {
            Ok(Some(frame)) => dispatch(frame, &mut routes, table, &mut summary),
            Ok(None) => {}
            // Overflow is logged by the reader itself.
            Err(err) if err.is_overflow() => {}
            Err(err) if err.is_transient() => {
                warn!(error = %err, "dropped inbound frame");
                if matches!(err, FrameError::Transport(_)) {
                    pause(cancel, read_poll);
                }
            }
            Err(err) => {
                if !cancel.load(Ordering::Acquire) {
                    error!(error = %err, "link failed, inbound bridging stopped");
                    summary.link_failed = true;
                }
                break;
            }
        }
    }

    summary.frames = reader.stats();
    debug!("reader thread exiting");
    summary
}

fn dispatch(
    frame: Frame,
    routes: &mut HashMap<TopicId, Route>,
    table: &DispatchTable,
    summary: &mut ReaderSummary,
) {
    if let Some(route) = routes.get_mut(&frame.topic) {
        match route.publisher.publish(&frame.payload) {
            Ok(()) => summary.published += 1,
            Err(err) => {
                summary.publish_failures += 1;
                warn!(topic = %route.name, error = %err, "failed to publish inbound message");
            }
        }
        return;
    }

    summary.unroutable += 1;
    match table.get(frame.topic) {
        Some(mapping) => warn!(
            topic = %mapping.name,
            id = frame.topic,
            "received frame on a host-to-serial topic, dropping"
        ),
        None if is_reserved(frame.topic) => {
            debug!(id = frame.topic, "ignoring negotiation frame");
        }
        None => warn!(
            id = frame.topic,
            size = frame.payload.len(),
            "no topic mapped to id, dropping"
        ),
    }
}

/// Back off after a link error without delaying cancellation.
fn pause(cancel: &AtomicBool, total: Duration) {
    let deadline = Instant::now() + total;
    while !cancel.load(Ordering::Acquire) {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        thread::sleep(remaining.min(CANCEL_CHECK_INTERVAL));
    }
}

fn close_after_failure(sender: &FrameSender) {
    if let Err(err) = sender.close() {
        warn!(error = %err, "failed to close link after startup error");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serialbridge_frame::{FrameConfig, Protocol};
    use serialbridge_transport::{Link, UdpLink};

    use super::*;
    use crate::config::keys;
    use crate::params::ParamValue;
    use crate::table::TopicMapping;

    type Published = Arc<Mutex<Vec<(String, Vec<u8>)>>>;

    #[derive(Default)]
    struct RecordingHost {
        published: Published,
        outbound: Vec<OutboundTopic>,
        reject: Option<&'static str>,
    }

    impl HostNode for RecordingHost {
        fn create_publisher(&mut self, mapping: &TopicMapping) -> Result<Box<dyn Publisher>> {
            if self.reject == Some(mapping.name.as_str()) {
                return Err(BridgeError::Host(format!("no type support for {}", mapping.type_name)));
            }
            let published = Arc::clone(&self.published);
            let name = mapping.name.clone();
            Ok(Box::new(move |payload: &[u8]| {
                if payload == b"poison" {
                    return Err(BridgeError::Host("cannot deserialize".into()));
                }
                published.lock().unwrap().push((name.clone(), payload.to_vec()));
                Ok(())
            }))
        }

        fn create_subscription(
            &mut self,
            _mapping: &TopicMapping,
            outbound: OutboundTopic,
        ) -> Result<()> {
            self.outbound.push(outbound);
            Ok(())
        }
    }

    fn frame_config(read_poll: Duration) -> FrameConfig {
        FrameConfig {
            protocol: Protocol::Cobs,
            read_poll,
            ..FrameConfig::default()
        }
    }

    fn table() -> DispatchTable {
        DispatchTable::from_mappings([
            TopicMapping {
                topic_id: 3,
                name: "imu".into(),
                type_name: "Imu".into(),
                direction: Direction::SerialToHost,
            },
            TopicMapping {
                topic_id: 4,
                name: "cmd_vel".into(),
                type_name: "Twist".into(),
                direction: Direction::HostToSerial,
            },
        ])
        .unwrap()
    }

    fn linked(read_poll: Duration) -> (Transporter, Transporter, SharedLink) {
        let (a, b) = UdpLink::pair_local().unwrap();
        let a: SharedLink = Arc::new(a);
        (
            Transporter::new(Arc::clone(&a), frame_config(read_poll)).unwrap(),
            Transporter::new(Arc::new(b), frame_config(read_poll)).unwrap(),
            a,
        )
    }

    fn wait_for(published: &Published, count: usize) -> Vec<(String, Vec<u8>)> {
        let start = Instant::now();
        while start.elapsed() < Duration::from_secs(2) {
            let seen = published.lock().unwrap().clone();
            if seen.len() >= count {
                return seen;
            }
            thread::sleep(Duration::from_millis(5));
        }
        published.lock().unwrap().clone()
    }

    #[test]
    fn bridges_both_directions() {
        let (local, mut remote, _) = linked(Duration::from_millis(20));
        let mut host = RecordingHost::default();
        let mut bridge = Bridge::start(local, table(), &mut host).unwrap();
        assert_eq!(bridge.state(), BridgeState::Running);
        assert!(bridge.is_reading());

        remote.write(3, b"accel").unwrap();
        assert_eq!(
            wait_for(&host.published, 1),
            vec![("imu".to_string(), b"accel".to_vec())]
        );

        let cmd = &host.outbound[0];
        assert_eq!((cmd.topic_id(), cmd.name()), (4, "cmd_vel"));
        assert_eq!(cmd.header_len(), Protocol::Cobs.header_len());
        assert_eq!(cmd.send(b"forward").unwrap(), 7);

        let start = Instant::now();
        let frame = loop {
            if let Some(frame) = remote.read_frame().unwrap() {
                break frame;
            }
            assert!(start.elapsed() < Duration::from_secs(2));
        };
        assert_eq!(frame.topic, 4);
        assert_eq!(frame.payload.as_ref(), &b"forward"[..]);

        let summary = bridge.shutdown().unwrap();
        assert_eq!(bridge.state(), BridgeState::Stopped);
        assert_eq!(summary.published, 1);
        assert_eq!(bridge.write_stats().frames, 1);
        assert!(cmd.send(b"late").is_err());
    }

    #[test]
    fn bad_frames_do_not_stop_the_reader() {
        let (local, remote, _) = linked(Duration::from_millis(20));
        let mut host = RecordingHost::default();
        let mut bridge = Bridge::start(local, table(), &mut host).unwrap();

        remote.write(3, b"poison").unwrap();
        remote.write(4, b"wrong way").unwrap();
        remote.write(77, b"unmapped").unwrap();
        remote.write(0, b"").unwrap();
        remote.write(3, b"after").unwrap();

        assert_eq!(wait_for(&host.published, 1)[0].1, b"after");
        // Let the reader account for everything before stopping it.
        thread::sleep(Duration::from_millis(50));
        let summary = bridge.shutdown().unwrap();
        assert_eq!(summary.published, 1);
        assert_eq!(summary.publish_failures, 1);
        assert_eq!(summary.unroutable, 3);
        assert!(!summary.link_failed);
    }

    #[test]
    fn shutdown_is_bounded_by_read_poll() {
        let read_poll = Duration::from_millis(100);
        let (local, _remote, link) = linked(read_poll);
        let mut host = RecordingHost::default();
        let mut bridge = Bridge::start(local, table(), &mut host).unwrap();
        thread::sleep(Duration::from_millis(30));

        let start = Instant::now();
        bridge.shutdown().unwrap();
        let elapsed = start.elapsed();

        assert!(elapsed < read_poll + Duration::from_millis(150), "took {elapsed:?}");
        assert!(!bridge.is_reading());
        assert!(!link.is_ready());
        assert!(bridge.shutdown().is_ok());
    }

    #[test]
    fn drop_tears_down() {
        let (local, _remote, link) = linked(Duration::from_millis(10));
        let mut host = RecordingHost::default();
        let bridge = Bridge::start(local, table(), &mut host).unwrap();
        drop(bridge);
        assert!(!link.is_ready());
    }

    #[test]
    fn registration_failure_closes_link() {
        let (local, _remote, link) = linked(Duration::from_millis(10));
        let mut host = RecordingHost {
            reject: Some("imu"),
            ..RecordingHost::default()
        };
        let err = Bridge::start(local, table(), &mut host).unwrap_err();
        assert!(matches!(err, BridgeError::Host(_)));
        assert!(err.is_fatal());
        assert!(!link.is_ready());
    }

    fn udp_params(dynamic_ms: i64) -> (LinkConfig, BridgeConfig, Parameters) {
        let params: Parameters = [
            (keys::TRANSPORT, ParamValue::from("udp")),
            (keys::DEVICE, "127.0.0.1".into()),
            (keys::RECV_PORT, 0i64.into()),
            (keys::SEND_PORT, 9i64.into()),
            (keys::SERIAL_PROTOCOL, "cobs".into()),
            (keys::READ_POLL_MS, 10i64.into()),
            (keys::RING_BUFFER_SIZE, 4096i64.into()),
            (keys::WRITE_SLEEP_MS, 10i64.into()),
            (keys::DYNAMIC_SERIAL_MAPPING_MS, dynamic_ms.into()),
            ("topics.imu.serial_mapping", 3i64.into()),
            ("topics.imu.type", "Imu".into()),
            ("topics.imu.direction", "SerialToROS2".into()),
        ]
        .into_iter()
        .collect();
        let link = crate::config::link_from_parameters(&params).unwrap();
        let config = BridgeConfig::from_parameters(&params).unwrap();
        (link, config, params)
    }

    #[test]
    fn opens_from_parameters_with_static_table() {
        let (link, config, params) = udp_params(0);
        let mut host = RecordingHost::default();
        let bridge = Bridge::open(&link, &config, &params, &mut host).unwrap();
        assert_eq!(bridge.state(), BridgeState::Running);
        assert_eq!(bridge.table().len(), 1);
        assert_eq!(bridge.table().get(3).unwrap().name, "imu");
    }

    #[test]
    fn negotiation_timeout_aborts_startup() {
        let (link, config, params) = udp_params(40);
        let mut host = RecordingHost::default();
        let err = Bridge::open(&link, &config, &params, &mut host).unwrap_err();
        assert!(matches!(err, BridgeError::NegotiationTimeout(_)));
    }
}
