//! Error types for CTF stream decoding.
//!
//! All decode errors are fatal to the stream being decoded: the decoder never
//! recovers partial results past a failure. Every error that originates inside
//! a packet carries the byte offset at which it occurred and, where one exists,
//! the schema path of the field being decoded (e.g. `event.payload.msg`).
//!
//! Streams are independent — a failure in one stream does not prevent sibling
//! streams of the same trace from decoding.

use thiserror::Error;

/// Result type alias for decode operations.
pub type Result<T, E = DecodeError> = std::result::Result<T, E>;

/// Main error type for CTF decoding.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum DecodeError {
    #[error("read past end of buffer at {path} (byte offset {offset})")]
    OutOfBounds { path: String, offset: usize },

    #[error(
        "float at {path} declares {total_bits} bits, which matches no IEEE-754 layout \
         (byte offset {offset})"
    )]
    UnsupportedFloatWidth { path: String, offset: usize, total_bits: u64 },

    #[error("string at {path} reached end of buffer without a terminator (byte offset {offset})")]
    UnterminatedString { path: String, offset: usize },

    #[error(
        "sequence at {path} names length field '{length_field}', which is not decoded in \
         scope (byte offset {offset})"
    )]
    UnresolvedLengthField { path: String, offset: usize, length_field: String },

    #[error("variant at {path}: tag '{tag}' matches no declared option (byte offset {offset})")]
    UnresolvedVariantTag { path: String, offset: usize, tag: String },

    #[error("enum at {path}: value {value} has no label mapping (byte offset {offset})")]
    UnmappedEnumValue { path: String, offset: usize, value: i128 },

    #[error("event id {id} matches no declared event (byte offset {offset})")]
    UnknownEventId { offset: usize, id: u64 },

    #[error(
        "packet content boundary missed: cursor at bit {position_bits}, boundary at bit \
         {boundary_bits}"
    )]
    PacketBoundaryMisalignment { position_bits: u64, boundary_bits: u64 },

    #[error("schema is inconsistent: {reason}")]
    Schema { reason: String },
}

impl DecodeError {
    /// Byte offset within the stream buffer, for errors that carry one.
    pub fn byte_offset(&self) -> Option<usize> {
        match self {
            DecodeError::OutOfBounds { offset, .. }
            | DecodeError::UnsupportedFloatWidth { offset, .. }
            | DecodeError::UnterminatedString { offset, .. }
            | DecodeError::UnresolvedLengthField { offset, .. }
            | DecodeError::UnresolvedVariantTag { offset, .. }
            | DecodeError::UnmappedEnumValue { offset, .. }
            | DecodeError::UnknownEventId { offset, .. } => Some(*offset),
            DecodeError::PacketBoundaryMisalignment { position_bits, .. } => {
                Some((*position_bits / 8) as usize)
            }
            DecodeError::Schema { .. } => None,
        }
    }

    /// Schema path of the field being decoded, for errors that carry one.
    pub fn schema_path(&self) -> Option<&str> {
        match self {
            DecodeError::OutOfBounds { path, .. }
            | DecodeError::UnsupportedFloatWidth { path, .. }
            | DecodeError::UnterminatedString { path, .. }
            | DecodeError::UnresolvedLengthField { path, .. }
            | DecodeError::UnresolvedVariantTag { path, .. }
            | DecodeError::UnmappedEnumValue { path, .. } => Some(path),
            _ => None,
        }
    }

    /// Helper constructor for bounds failures.
    pub fn out_of_bounds(path: impl Into<String>, offset: usize) -> Self {
        DecodeError::OutOfBounds { path: path.into(), offset }
    }

    /// Helper constructor for schema inconsistencies.
    pub fn schema(reason: impl Into<String>) -> Self {
        DecodeError::Schema { reason: reason.into() }
    }

    /// Fill in the schema path on errors raised below the level that knows it.
    ///
    /// The bit cursor raises `OutOfBounds` without path context; the field
    /// decoder attaches the path on the way out. An already-set path is kept.
    pub(crate) fn with_path(mut self, full_path: &str) -> Self {
        if let DecodeError::OutOfBounds { path, .. }
        | DecodeError::UnsupportedFloatWidth { path, .. }
        | DecodeError::UnterminatedString { path, .. }
        | DecodeError::UnresolvedLengthField { path, .. }
        | DecodeError::UnresolvedVariantTag { path, .. }
        | DecodeError::UnmappedEnumValue { path, .. } = &mut self
            && path.is_empty()
        {
            *path = full_path.to_string();
        }
        self
    }
}
