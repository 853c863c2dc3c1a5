//! Core types for CTF schema and value representation.
//!
//! Two families live here:
//! - [`TypeNode`] and the trace/stream/event declaration containers describe
//!   a trace's metadata, immutable once built and shared read-only with the
//!   decoder;
//! - [`DecodedValue`] is the decoder's output tree, ordered struct members
//!   included.

mod node;
mod trace;
mod value;

pub use node::{
    ByteOrder, Encoding, EnumMapping, EnumType, FloatType, IntegerType, StructMember, StructType,
    TypeNode, VariantOption,
};
pub use trace::{ClockSchema, EventSchema, StreamSchema, TraceSchema};
pub use value::{DecodedValue, IntValue, StructValue};
