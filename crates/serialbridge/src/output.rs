use std::fmt::Write as _;
use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use serialbridge_bridge::{DispatchTable, TopicMapping};
use serialbridge_frame::TopicId;

#[derive(Clone, Debug, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Pretty
        } else {
            Self::Json
        }
    }
}

/// One message published from the link to the host.
#[derive(Debug, Serialize)]
pub struct MessageOutput<'a> {
    pub topic: &'a str,
    #[serde(rename = "type")]
    pub type_name: &'a str,
    pub topic_id: TopicId,
    pub size: usize,
    pub payload: String,
}

impl<'a> MessageOutput<'a> {
    pub fn new(mapping: &'a TopicMapping, payload: &[u8]) -> Self {
        Self {
            topic: &mapping.name,
            type_name: &mapping.type_name,
            topic_id: mapping.topic_id,
            size: payload.len(),
            payload: to_hex(payload),
        }
    }
}

pub fn render_message(msg: &MessageOutput<'_>, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => {
            serde_json::to_string(msg).unwrap_or_else(|_| "{}".to_string())
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["TOPIC", "TYPE", "ID", "SIZE", "PAYLOAD"])
                .add_row(vec![
                    msg.topic.to_string(),
                    msg.type_name.to_string(),
                    msg.topic_id.to_string(),
                    msg.size.to_string(),
                    msg.payload.clone(),
                ]);
            table.to_string()
        }
        OutputFormat::Pretty => format!(
            "topic={} type={} id={} size={} payload={}",
            msg.topic, msg.type_name, msg.topic_id, msg.size, msg.payload
        ),
    }
}

#[derive(Serialize)]
struct TableOutput<'a> {
    source: &'a str,
    topics: Vec<&'a TopicMapping>,
}

pub fn render_table(table: &DispatchTable, source: &str, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => {
            let out = TableOutput {
                source,
                topics: table.iter().collect(),
            };
            serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
        }
        OutputFormat::Table => {
            let mut out = Table::new();
            out.load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["ID", "TOPIC", "TYPE", "DIRECTION"]);
            for mapping in table.iter() {
                out.add_row(vec![
                    mapping.topic_id.to_string(),
                    mapping.name.clone(),
                    mapping.type_name.clone(),
                    mapping.direction.to_string(),
                ]);
            }
            out.to_string()
        }
        OutputFormat::Pretty => {
            let mut out = format!("Topic table ({source}, {} topics):", table.len());
            for mapping in table.iter() {
                let _ = write!(
                    out,
                    "\n  {:>3}  {}  {}  {}",
                    mapping.topic_id, mapping.name, mapping.type_name, mapping.direction
                );
            }
            out
        }
    }
}

pub fn to_hex(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 2);
    for byte in data {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

pub fn from_hex(text: &str) -> Option<Vec<u8>> {
    let text = text.trim();
    if text.len() % 2 != 0 {
        return None;
    }
    (0..text.len())
        .step_by(2)
        .map(|i| text.get(i..i + 2).and_then(|pair| u8::from_str_radix(pair, 16).ok()))
        .collect()
}
