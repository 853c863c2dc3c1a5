//! Trace, stream and event declarations.
//!
//! These containers mirror the CTF metadata hierarchy: a trace declares an
//! optional packet header and one or more stream classes; each stream class
//! declares packet context and per-event section types plus its registered
//! event declarations and clock. The whole schema is immutable after
//! `TraceSchema::new` and is shared read-only across concurrent stream
//! decodes.

use serde::{Deserialize, Serialize};

use crate::error::{DecodeError, Result};
use crate::types::node::{ByteOrder, TypeNode};

/// Clock declaration of a stream. Event timestamps are offset by
/// `offset_cycles + offset_seconds * frequency` before any ordering use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ClockSchema {
    #[serde(default = "default_frequency")]
    pub frequency: u64,
    #[serde(default)]
    pub offset_seconds: u64,
    #[serde(default)]
    pub offset_cycles: u64,
}

fn default_frequency() -> u64 {
    1_000_000_000
}

impl ClockSchema {
    /// Total offset in clock cycles.
    pub fn offset(&self) -> u64 {
        self.offset_seconds.saturating_mul(self.frequency).saturating_add(self.offset_cycles)
    }
}

/// One registered event declaration of a stream class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct EventSchema {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub context: Option<TypeNode>,
    #[serde(default)]
    pub payload: Option<TypeNode>,
}

/// One stream class of a trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StreamSchema {
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub packet_context: Option<TypeNode>,
    #[serde(default)]
    pub event_header: Option<TypeNode>,
    /// Stream-level event context, decoded after the header of every event.
    #[serde(default)]
    pub event_context: Option<TypeNode>,
    pub events: Vec<EventSchema>,
    #[serde(default)]
    pub clock: Option<ClockSchema>,
    /// Event-header member holding the raw clock value.
    #[serde(default = "default_timestamp_member")]
    pub timestamp_member: String,
    /// Event-header member selecting the event declaration.
    #[serde(default = "default_id_member")]
    pub id_member: String,
}

fn default_timestamp_member() -> String {
    "timestamp".to_string()
}

fn default_id_member() -> String {
    "id".to_string()
}

impl StreamSchema {
    pub fn event_by_id(&self, id: u64) -> Option<&EventSchema> {
        self.events.iter().find(|ev| ev.id == id)
    }
}

/// A complete trace description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TraceSchema {
    pub byte_order: ByteOrder,
    #[serde(default)]
    pub packet_header: Option<TypeNode>,
    pub streams: Vec<StreamSchema>,
    /// Packet-header member selecting the stream class.
    #[serde(default = "default_stream_id_member")]
    pub stream_id_member: String,
}

fn default_stream_id_member() -> String {
    "stream_id".to_string()
}

impl TraceSchema {
    /// Create a schema with validation.
    pub fn new(
        byte_order: ByteOrder,
        packet_header: Option<TypeNode>,
        streams: Vec<StreamSchema>,
    ) -> Result<Self> {
        let schema = Self {
            byte_order,
            packet_header,
            streams,
            stream_id_member: default_stream_id_member(),
        };
        schema.validate()?;
        Ok(schema)
    }

    /// Validate the schema for consistency: stream and event ids must be
    /// unique, struct member names unique within one struct, enum mappings
    /// well-formed, sequence and variant references non-empty. Decode never
    /// re-checks these.
    pub fn validate(&self) -> Result<()> {
        if self.streams.is_empty() {
            return Err(DecodeError::schema("trace declares no stream class"));
        }
        for (i, stream) in self.streams.iter().enumerate() {
            if self.streams[..i].iter().any(|other| other.id == stream.id) {
                return Err(DecodeError::schema(format!("duplicate stream id {}", stream.id)));
            }
            for (j, event) in stream.events.iter().enumerate() {
                if stream.events[..j].iter().any(|other| other.id == event.id) {
                    return Err(DecodeError::schema(format!(
                        "stream {}: duplicate event id {}",
                        stream.id, event.id
                    )));
                }
                validate_node_opt(event.context.as_ref())?;
                validate_node_opt(event.payload.as_ref())?;
            }
            validate_node_opt(stream.packet_context.as_ref())?;
            validate_node_opt(stream.event_header.as_ref())?;
            validate_node_opt(stream.event_context.as_ref())?;
        }
        validate_node_opt(self.packet_header.as_ref())?;
        Ok(())
    }

    /// Select the stream class a packet belongs to. With a single declared
    /// stream the id is optional; otherwise the packet header must carry one.
    pub fn stream_by_id(&self, id: Option<u64>) -> Result<&StreamSchema> {
        match id {
            Some(id) => self
                .streams
                .iter()
                .find(|s| s.id == id)
                .ok_or_else(|| DecodeError::schema(format!("no stream class with id {id}"))),
            None if self.streams.len() == 1 => Ok(&self.streams[0]),
            None => Err(DecodeError::schema(
                "trace declares several stream classes but the packet header carries no \
                 stream id",
            )),
        }
    }
}

fn validate_node_opt(node: Option<&TypeNode>) -> Result<()> {
    match node {
        Some(node) => validate_node(node),
        None => Ok(()),
    }
}

fn validate_node(node: &TypeNode) -> Result<()> {
    match node {
        TypeNode::Integer(int) => {
            if int.size_bits > 256 {
                return Err(DecodeError::schema(format!(
                    "integer size of {} bits is unsupported",
                    int.size_bits
                )));
            }
            Ok(())
        }
        TypeNode::Float(_) | TypeNode::String | TypeNode::FixedString { .. } => Ok(()),
        TypeNode::Enum(en) => {
            if en.repr.size_bits > 64 {
                return Err(DecodeError::schema(format!(
                    "enum representation of {} bits is unsupported",
                    en.repr.size_bits
                )));
            }
            for mapping in &en.mappings {
                if mapping.lo > mapping.hi {
                    return Err(DecodeError::schema(format!(
                        "enum mapping '{}' has an empty range [{}, {}]",
                        mapping.label, mapping.lo, mapping.hi
                    )));
                }
            }
            Ok(())
        }
        TypeNode::Array { element, .. } => validate_node(element),
        TypeNode::Sequence { length_field, element } => {
            if length_field.is_empty() {
                return Err(DecodeError::schema("sequence names an empty length field"));
            }
            validate_node(element)
        }
        TypeNode::Struct(st) => {
            for (i, member) in st.members.iter().enumerate() {
                if st.members[..i].iter().any(|other| other.name == member.name) {
                    return Err(DecodeError::schema(format!(
                        "duplicate struct member '{}'",
                        member.name
                    )));
                }
                validate_node(&member.ty)?;
            }
            Ok(())
        }
        TypeNode::Variant { tag_field, options } => {
            if tag_field.is_empty() {
                return Err(DecodeError::schema("variant names an empty tag field"));
            }
            if options.is_empty() {
                return Err(DecodeError::schema("variant declares no options"));
            }
            for option in options {
                validate_node(&option.ty)?;
            }
            Ok(())
        }
    }
}
