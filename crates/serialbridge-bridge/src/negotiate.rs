use std::time::{Duration, Instant};

use serialbridge_frame::{Transporter, NEGOTIATION_REQUEST, NEGOTIATION_RESPONSE};
use tracing::{debug, info, warn};

use crate::cdr::SerialMapping;
use crate::error::{BridgeError, Result};
use crate::table::DispatchTable;

/// Ask the remote endpoint for its topic mapping and build the table from
/// the answer.
///
/// Sends an empty frame on the request topic, then reads frames for at most
/// `wait` looking for one on the response topic. Frames on other topics and
/// dropped frames are skipped. No answer in time, or an answer that does not
/// decode to a consistent mapping, is an error; there is no fallback to an
/// empty table.
pub fn negotiate(transporter: &mut Transporter, wait: Duration) -> Result<DispatchTable> {
    let response = request_mapping(transporter, wait)?;
    let table = DispatchTable::from_negotiation(&response)?;
    info!(topics = table.len(), "negotiated serial mapping");
    Ok(table)
}

/// Request and decode the remote mapping without validating it as a table.
pub fn request_mapping(transporter: &mut Transporter, wait: Duration) -> Result<SerialMapping> {
    debug!(wait_ms = wait.as_millis() as u64, "requesting serial mapping");
    transporter.write(NEGOTIATION_REQUEST, &[])?;

    let deadline = Instant::now() + wait;
    let payload = recv_response_payload(transporter, deadline, wait)?;
    SerialMapping::decode(&payload)
}

/// Answer one mapping request, as the remote endpoint does.
///
/// Waits up to `wait` for a request frame, then replies with `mapping`.
pub fn serve_mapping(
    transporter: &mut Transporter,
    mapping: &SerialMapping,
    wait: Duration,
) -> Result<()> {
    let deadline = Instant::now() + wait;
    loop {
        if Instant::now() >= deadline {
            return Err(BridgeError::NegotiationTimeout(wait));
        }
        match transporter.read_frame() {
            Ok(Some(frame)) if frame.topic == NEGOTIATION_REQUEST => {
                transporter.write(NEGOTIATION_RESPONSE, &mapping.encode())?;
                return Ok(());
            }
            Ok(_) => continue,
            Err(err) if err.is_transient() => continue,
            Err(err) => return Err(err.into()),
        }
    }
}

fn recv_response_payload(
    transporter: &mut Transporter,
    deadline: Instant,
    wait: Duration,
) -> Result<Vec<u8>> {
    loop {
        if Instant::now() >= deadline {
            return Err(BridgeError::NegotiationTimeout(wait));
        }

        match transporter.read_frame() {
            Ok(Some(frame)) if frame.topic == NEGOTIATION_RESPONSE => {
                return Ok(frame.payload.to_vec());
            }
            Ok(Some(frame)) => {
                debug!(topic = frame.topic, "ignoring frame while waiting for mapping");
            }
            Ok(None) => continue,
            Err(err) if err.is_transient() => {
                warn!(error = %err, "dropped frame while waiting for mapping");
            }
            Err(err) => return Err(err.into()),
        }
    }
}
