//! Validation-tree rendering.
//!
//! Converts decoded values into the JSON validation format consumed by the
//! expectation comparator. The shapes are a compatibility contract:
//!
//! - integer: `{"type":"integer","value":<int>}`, hex string on overflow
//! - float: `{"type":"float","value":<number>}`
//! - enum: `{"type":"enum","label":<string>}`
//! - string: `{"type":"string","value":<string>}`
//! - array/sequence: `{"type":"array"|"sequence","elements":[...]}`
//! - struct: `{"type":"struct","fields":{name: value, ...}}` (name-keyed
//!   mapping form; struct member order is preserved in the output)
//!
//! Variants never render as their own object: a decoded variant already
//! collapsed to its selected option. Rendering is deterministic and has no
//! failure modes.

use serde_json::{Map, Value, json};

use crate::assembler::{Event, Packet};
use crate::types::{DecodedValue, IntValue};

/// Render one decoded field into its validation object.
pub fn render_value(value: &DecodedValue) -> Value {
    match value {
        DecodedValue::Integer(int) => json!({"type": "integer", "value": render_int(int)}),
        DecodedValue::Float(f) => json!({"type": "float", "value": *f}),
        DecodedValue::Enum { label, .. } => json!({"type": "enum", "label": label}),
        DecodedValue::String(s) => json!({"type": "string", "value": s}),
        DecodedValue::Array(elements) => {
            json!({"type": "array", "elements": render_elements(elements)})
        }
        DecodedValue::Sequence(elements) => {
            json!({"type": "sequence", "elements": render_elements(elements)})
        }
        DecodedValue::Struct(st) => {
            let mut fields = Map::new();
            for (name, field) in st.iter() {
                fields.insert(name.clone(), render_value(field));
            }
            json!({"type": "struct", "fields": fields})
        }
    }
}

fn render_elements(elements: &[DecodedValue]) -> Vec<Value> {
    elements.iter().map(render_value).collect()
}

fn render_int(int: &IntValue) -> Value {
    match int {
        IntValue::Signed(v) => Value::from(*v),
        IntValue::Unsigned(v) => Value::from(*v),
        // Magnitudes past the native range render as a big-endian hex string.
        IntValue::Raw(bytes) => {
            let mut s = String::with_capacity(2 + bytes.len() * 2);
            s.push_str("0x");
            for byte in bytes {
                s.push_str(&format!("{byte:02x}"));
            }
            Value::String(s)
        }
    }
}

/// Render a packet's header/context sections.
///
/// Sections the trace does not declare are absent from the object, matching
/// the documented packet-info shape.
pub fn render_packet_info(packet: &Packet) -> Value {
    let mut obj = Map::new();
    if let Some(header) = &packet.header {
        obj.insert("packet-header".to_string(), render_value(header));
    }
    if let Some(context) = &packet.context {
        obj.insert("packet-context".to_string(), render_value(context));
    }
    Value::Object(obj)
}

/// Render one event object; undeclared sections are absent.
pub fn render_event(event: &Event) -> Value {
    let mut obj = Map::new();
    let sections = [
        ("header", &event.header),
        ("stream-context", &event.stream_context),
        ("context", &event.context),
        ("payload", &event.payload),
    ];
    for (key, section) in sections {
        if let Some(value) = section {
            obj.insert(key.to_string(), render_value(value));
        }
    }
    Value::Object(obj)
}

/// Render a decoded stream as the top-level validation document: an array of
/// interleaved packet-info and event objects, each packet's events in
/// ascending offset-adjusted timestamp order (ties keep decode order).
pub fn render_stream(packets: &[Packet]) -> Value {
    let mut entries = Vec::new();
    for packet in packets {
        entries.push(render_packet_info(packet));
        let mut events: Vec<&Event> = packet.events.iter().collect();
        events.sort_by_key(|event| event.timestamp);
        for event in events {
            entries.push(render_event(event));
        }
    }
    Value::Array(entries)
}
