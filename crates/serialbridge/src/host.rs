//! Host collaborator that speaks JSON lines over stdio.
//!
//! Serial-to-host topics are printed to stdout, one message per line.
//! Host-to-serial messages are read from stdin as
//! `{"topic": "<name>", "payload": "<hex>"}` lines and queued until the
//! write pump sends them.

use std::collections::HashMap;
use std::io::{self, BufRead, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;

use serde::Deserialize;
use serialbridge_bridge::{BridgeError, HostNode, OutboundTopic, Publisher, TopicMapping};
use tracing::{debug, warn};

use crate::exit::{io_error, CliResult};
use crate::output::{from_hex, render_message, MessageOutput, OutputFormat};

type Sink = Arc<Mutex<Box<dyn Write + Send>>>;

/// A message from the host waiting to go out on the link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

#[derive(Deserialize)]
struct InboundLine {
    topic: String,
    payload: String,
}

pub struct StdioHost {
    format: OutputFormat,
    sink: Sink,
    published: Arc<AtomicU64>,
    outbound: HashMap<String, OutboundTopic>,
}

impl StdioHost {
    pub fn new(format: OutputFormat) -> Self {
        Self::with_writer(format, io::stdout())
    }

    pub fn with_writer(format: OutputFormat, writer: impl Write + Send + 'static) -> Self {
        let writer: Box<dyn Write + Send> = Box::new(writer);
        Self {
            format,
            sink: Arc::new(Mutex::new(writer)),
            published: Arc::new(AtomicU64::new(0)),
            outbound: HashMap::new(),
        }
    }

    /// Messages printed so far.
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Names of the topics accepted on stdin.
    pub fn outbound_topics(&self) -> impl Iterator<Item = &str> {
        self.outbound.keys().map(String::as_str)
    }

    /// Send every queued host message. Returns how many went out.
    pub fn pump(&self, queue: &Receiver<HostMessage>) -> usize {
        let mut sent = 0;
        while let Ok(msg) = queue.try_recv() {
            let Some(outbound) = self.outbound.get(&msg.topic) else {
                warn!(topic = %msg.topic, "no host-to-serial topic with this name, dropping");
                continue;
            };
            // Failures are logged by the outbound handle.
            if outbound.send(&msg.payload).is_ok() {
                sent += 1;
            }
        }
        sent
    }
}

impl HostNode for StdioHost {
    fn create_publisher(
        &mut self,
        mapping: &TopicMapping,
    ) -> serialbridge_bridge::Result<Box<dyn Publisher>> {
        let mapping = mapping.clone();
        let format = self.format;
        let sink = Arc::clone(&self.sink);
        let published = Arc::clone(&self.published);

        Ok(Box::new(move |payload: &[u8]| {
            let line = render_message(&MessageOutput::new(&mapping, payload), format);
            let mut out = match sink.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            writeln!(out, "{line}")
                .and_then(|()| out.flush())
                .map_err(|err| BridgeError::Host(format!("stdout: {err}")))?;
            published.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }))
    }

    fn create_subscription(
        &mut self,
        mapping: &TopicMapping,
        outbound: OutboundTopic,
    ) -> serialbridge_bridge::Result<()> {
        self.outbound.insert(mapping.name.clone(), outbound);
        Ok(())
    }
}

/// Parse one stdin line.
pub fn parse_line(line: &str) -> Result<HostMessage, String> {
    let parsed: InboundLine = serde_json::from_str(line).map_err(|err| err.to_string())?;
    let payload = from_hex(&parsed.payload)
        .ok_or_else(|| format!("payload for {} is not valid hex", parsed.topic))?;
    Ok(HostMessage {
        topic: parsed.topic,
        payload,
    })
}

/// Read stdin lines on a background thread and queue them for the pump.
pub fn spawn_stdin_reader(queue: Sender<HostMessage>) -> CliResult<()> {
    thread::Builder::new()
        .name("serialbridge-stdin".to_string())
        .spawn(move || read_lines(io::stdin().lock(), &queue))
        .map(|_| ())
        .map_err(|err| io_error("stdin reader spawn failed", err))
}

fn read_lines(input: impl BufRead, queue: &Sender<HostMessage>) {
    for line in input.lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                warn!(error = %err, "stdin read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match parse_line(&line) {
            Ok(msg) => {
                if queue.send(msg).is_err() {
                    break;
                }
            }
            Err(err) => warn!(error = %err, "skipping malformed stdin line"),
        }
    }
    debug!("stdin closed");
}
