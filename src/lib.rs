//! Schema-driven Common Trace Format (CTF) binary stream decoder.
//!
//! `ctfread` reads CTF packets and events from a byte buffer according to a
//! trace metadata description and renders them into the JSON validation
//! format used to check decoder output against hand-written expectation
//! files.
//!
//! # Pipeline
//!
//! 1. A [`TraceSchema`] (built programmatically or loaded from JSON)
//!    describes the trace's packet and event structure as a [`TypeNode`]
//!    tree.
//! 2. [`decode_stream`] walks one stream buffer packet by packet, driving
//!    the recursive field decoder over a bit-granular cursor.
//! 3. [`render::render_stream`] converts the decoded packets into the
//!    validation document; [`compare::compare_documents`] checks it against
//!    an expectation file.
//!
//! Decoding is synchronous and fail-fast: the first error aborts the stream
//! and reports the byte offset and schema path at which it occurred.
//! Independent stream buffers can be decoded in parallel with
//! [`decode_streams`].
//!
//! # Example
//!
//! ```rust
//! use ctfread::{ByteOrder, EventSchema, IntegerType, StreamSchema, TraceSchema, TypeNode};
//!
//! let payload = TypeNode::structure(vec![
//!     ("value", TypeNode::Integer(IntegerType::unsigned(8))),
//! ]);
//! let stream = StreamSchema {
//!     id: 0,
//!     packet_context: None,
//!     event_header: None,
//!     event_context: None,
//!     events: vec![EventSchema {
//!         id: 0,
//!         name: "sample".to_string(),
//!         context: None,
//!         payload: Some(payload),
//!     }],
//!     clock: None,
//!     timestamp_member: "timestamp".to_string(),
//!     id_member: "id".to_string(),
//! };
//! let trace = TraceSchema::new(ByteOrder::LittleEndian, None, vec![stream])?;
//!
//! let packets = ctfread::decode_stream(&trace, &[7, 8])?;
//! assert_eq!(packets[0].events.len(), 2);
//!
//! let document = ctfread::validation_document(&trace, &[7, 8])?;
//! assert!(document.is_array());
//! # Ok::<(), ctfread::DecodeError>(())
//! ```

mod assembler;
pub mod compare;
mod cursor;
mod decoder;
mod error;
pub mod render;
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;

pub use assembler::{Event, Packet, StreamDecoder, decode_stream, decode_streams};
pub use cursor::BitCursor;
pub use decoder::{FieldDecoder, decode_field};
pub use error::{DecodeError, Result};
pub use types::*;

/// Decode one stream buffer and render it as a validation document.
pub fn validation_document(trace: &TraceSchema, buf: &[u8]) -> Result<serde_json::Value> {
    let packets = decode_stream(trace, buf)?;
    Ok(render::render_stream(&packets))
}
