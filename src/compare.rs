//! Expectation-file comparison.
//!
//! A validation document pairs a decoder-produced JSON tree with a
//! hand-written expectation file. This module parses both into comparison
//! trees and walks them field by field.
//!
//! The expectation side is more permissive than decoder output:
//!
//! - bare JSON values (`5`, `"x"`, `[..]`) stand for their typed field forms;
//! - `null` is an ignore marker matching anything;
//! - integer values may be hex strings;
//! - struct fields may use the canonical name-keyed mapping or the legacy
//!   ordered list of `{"name":..,"value":..}` pairs (read-only support);
//! - `"int"` and `"floating_point"` are accepted as type-tag aliases.
//!
//! Struct fields match by name, not position.

use serde_json::Value;
use thiserror::Error;

/// Errors raised while parsing or comparing validation documents.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum CompareError {
    #[error("malformed validation document at {path}: {reason}")]
    Malformed { path: String, reason: String },

    #[error("mismatch at {path}: expected {expected}, got {actual}")]
    Mismatch { path: String, expected: String, actual: String },
}

impl CompareError {
    fn malformed(path: &str, reason: impl Into<String>) -> Self {
        CompareError::Malformed { path: path.to_string(), reason: reason.into() }
    }

    fn mismatch(path: &str, expected: impl ToString, actual: impl ToString) -> Self {
        CompareError::Mismatch {
            path: path.to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}

/// One parsed comparison field.
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    /// Matches anything. Only meaningful on the expectation side.
    Ignore,
    Integer(i128),
    /// Integer magnitude past the `i128` range, as normalized lowercase hex
    /// digits without the `0x` prefix or leading zeros.
    BigInteger(String),
    Float(f64),
    String(String),
    Enum { label: String },
    /// Arrays and sequences compare identically.
    Elements(Vec<Field>),
    Struct(Vec<(String, Field)>),
}

impl Field {
    /// Parse a field from either its bare or typed JSON form.
    pub fn parse(value: &Value, path: &str) -> Result<Field, CompareError> {
        match value {
            Value::Null => Ok(Field::Ignore),
            Value::Number(n) => parse_number(n, path),
            Value::String(s) => Ok(Field::String(s.clone())),
            Value::Array(elements) => parse_elements(elements, path),
            Value::Object(obj) => {
                let tag = obj
                    .get("type")
                    .and_then(Value::as_str)
                    .ok_or_else(|| CompareError::malformed(path, "field object without a type"))?;
                match tag {
                    "integer" | "int" => parse_integer_field(value, path),
                    "float" | "floating_point" => {
                        let v = value.get("value").and_then(Value::as_f64).ok_or_else(|| {
                            CompareError::malformed(path, "float field without numeric value")
                        })?;
                        Ok(Field::Float(v))
                    }
                    "string" => {
                        let v = value.get("value").and_then(Value::as_str).ok_or_else(|| {
                            CompareError::malformed(path, "string field without string value")
                        })?;
                        Ok(Field::String(v.to_string()))
                    }
                    "enum" => {
                        let label = value.get("label").and_then(Value::as_str).ok_or_else(
                            || CompareError::malformed(path, "enum field without label"),
                        )?;
                        Ok(Field::Enum { label: label.to_string() })
                    }
                    "array" | "sequence" => {
                        let elements =
                            value.get("elements").and_then(Value::as_array).ok_or_else(|| {
                                CompareError::malformed(path, "array field without elements")
                            })?;
                        parse_elements(elements, path)
                    }
                    "struct" => parse_struct_fields(value, path),
                    other => {
                        Err(CompareError::malformed(path, format!("unknown field type '{other}'")))
                    }
                }
            }
            Value::Bool(_) => Err(CompareError::malformed(path, "booleans have no field form")),
        }
    }

    /// Compare an expected field against an actual one, by name for structs.
    /// Ignore markers on either side match.
    pub fn matches(&self, actual: &Field, path: &str) -> Result<(), CompareError> {
        match (self, actual) {
            (Field::Ignore, _) | (_, Field::Ignore) => Ok(()),
            (Field::Integer(a), Field::Integer(b)) if a == b => Ok(()),
            (Field::BigInteger(a), Field::BigInteger(b)) if a == b => Ok(()),
            (Field::Float(a), Field::Float(b)) if a == b => Ok(()),
            (Field::String(a), Field::String(b)) if a == b => Ok(()),
            (Field::Enum { label: a }, Field::Enum { label: b }) if a == b => Ok(()),
            (Field::Elements(expected), Field::Elements(actual)) => {
                if expected.len() != actual.len() {
                    return Err(CompareError::mismatch(
                        path,
                        format!("{} elements", expected.len()),
                        format!("{} elements", actual.len()),
                    ));
                }
                for (i, (e, a)) in expected.iter().zip(actual).enumerate() {
                    e.matches(a, &format!("{path}[{i}]"))?;
                }
                Ok(())
            }
            (Field::Struct(expected), Field::Struct(actual)) => {
                for (name, e) in expected {
                    let field_path = format!("{path}.{name}");
                    let a = actual
                        .iter()
                        .find(|(n, _)| n == name)
                        .map(|(_, v)| v)
                        .ok_or_else(|| {
                            CompareError::mismatch(&field_path, "a field", "missing field")
                        })?;
                    e.matches(a, &field_path)?;
                }
                Ok(())
            }
            (expected, actual) => {
                Err(CompareError::mismatch(path, describe(expected), describe(actual)))
            }
        }
    }
}

fn describe(field: &Field) -> String {
    match field {
        Field::Ignore => "<ignore>".to_string(),
        Field::Integer(v) => v.to_string(),
        Field::BigInteger(v) => format!("0x{v}"),
        Field::Float(v) => v.to_string(),
        Field::String(v) => format!("\"{v}\""),
        Field::Enum { label } => format!("enum '{label}'"),
        Field::Elements(e) => format!("{} elements", e.len()),
        Field::Struct(f) => format!("struct with {} fields", f.len()),
    }
}

fn parse_number(n: &serde_json::Number, path: &str) -> Result<Field, CompareError> {
    if let Some(v) = n.as_i64() {
        Ok(Field::Integer(i128::from(v)))
    } else if let Some(v) = n.as_u64() {
        Ok(Field::Integer(i128::from(v)))
    } else if let Some(v) = n.as_f64() {
        Ok(Field::Float(v))
    } else {
        Err(CompareError::malformed(path, "unrepresentable number"))
    }
}

fn parse_elements(elements: &[Value], path: &str) -> Result<Field, CompareError> {
    let parsed: Result<Vec<Field>, CompareError> = elements
        .iter()
        .enumerate()
        .map(|(i, elem)| Field::parse(elem, &format!("{path}[{i}]")))
        .collect();
    Ok(Field::Elements(parsed?))
}

/// Integer field values are plain numbers or hex strings (overflow form).
fn parse_integer_field(value: &Value, path: &str) -> Result<Field, CompareError> {
    match value.get("value") {
        Some(Value::Number(n)) => parse_number(n, path),
        Some(Value::String(s)) => {
            let digits = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(CompareError::malformed(path, format!("bad hex integer '{s}'")));
            }
            match i128::from_str_radix(digits, 16) {
                Ok(v) => Ok(Field::Integer(v)),
                // Past the i128 range: compare normalized hex magnitudes.
                Err(_) => Ok(Field::BigInteger(
                    digits.trim_start_matches('0').to_ascii_lowercase(),
                )),
            }
        }
        _ => Err(CompareError::malformed(path, "integer field without value")),
    }
}

/// Struct fields in canonical mapping form or the legacy ordered-list form.
fn parse_struct_fields(value: &Value, path: &str) -> Result<Field, CompareError> {
    let mut fields = Vec::new();
    match value.get("fields") {
        Some(Value::Object(map)) => {
            for (name, v) in map {
                fields.push((name.clone(), Field::parse(v, &format!("{path}.{name}"))?));
            }
        }
        Some(Value::Array(pairs)) => {
            for pair in pairs {
                let name = pair.get("name").and_then(Value::as_str).ok_or_else(|| {
                    CompareError::malformed(path, "legacy struct entry without name")
                })?;
                let v = pair.get("value").ok_or_else(|| {
                    CompareError::malformed(path, "legacy struct entry without value")
                })?;
                fields.push((name.to_string(), Field::parse(v, &format!("{path}.{name}"))?));
            }
        }
        _ => return Err(CompareError::malformed(path, "struct field without fields")),
    }
    Ok(Field::Struct(fields))
}

/// One entry of the top-level validation array.
#[derive(Debug, Clone, PartialEq)]
enum Entry {
    /// Updates the current packet info carried onto following events.
    PacketInfo { header: Option<Field>, context: Option<Field> },
    Event {
        header: Option<Field>,
        stream_context: Option<Field>,
        context: Option<Field>,
        payload: Option<Field>,
    },
}

fn parse_entry(value: &Value, path: &str) -> Result<Entry, CompareError> {
    let obj = value
        .as_object()
        .ok_or_else(|| CompareError::malformed(path, "document entry is not an object"))?;
    // An empty object is packet info for a trace declaring neither section;
    // an event always carries at least one section key.
    if obj.is_empty() || obj.contains_key("packet-header") || obj.contains_key("packet-context") {
        let header = obj
            .get("packet-header")
            .map(|v| Field::parse(v, &format!("{path}.packet-header")))
            .transpose()?;
        let context = obj
            .get("packet-context")
            .map(|v| Field::parse(v, &format!("{path}.packet-context")))
            .transpose()?;
        Ok(Entry::PacketInfo { header, context })
    } else {
        let section = |key: &str| -> Result<Option<Field>, CompareError> {
            obj.get(key).map(|v| Field::parse(v, &format!("{path}.{key}"))).transpose()
        };
        Ok(Entry::Event {
            header: section("header")?,
            stream_context: section("stream-context")?,
            context: section("context")?,
            payload: section("payload")?,
        })
    }
}

fn match_section(
    expected: &Option<Field>,
    actual: &Option<Field>,
    path: &str,
) -> Result<(), CompareError> {
    match (expected, actual) {
        (None, _) | (_, None) => Ok(()),
        (Some(e), Some(a)) => e.matches(a, path),
    }
}

/// Compare two top-level validation documents.
///
/// Both are interleaved arrays of packet-info and event objects; each side
/// carries its current packet info onto the events that follow it, so a
/// packet-info mismatch surfaces at the first event it covers.
pub fn compare_documents(expected: &Value, actual: &Value) -> Result<(), CompareError> {
    let expected_entries = expected
        .as_array()
        .ok_or_else(|| CompareError::malformed("$", "expected document is not an array"))?;
    let actual_entries = actual
        .as_array()
        .ok_or_else(|| CompareError::malformed("$", "actual document is not an array"))?;

    let mut cur_expected_info: Option<(Option<Field>, Option<Field>)> = None;
    let mut cur_actual_info: Option<(Option<Field>, Option<Field>)> = None;
    let mut actual_iter = actual_entries.iter().enumerate();
    let mut event_index = 0usize;

    for (i, raw) in expected_entries.iter().enumerate() {
        let entry = parse_entry(raw, &format!("$[{i}]"))?;
        let (ev_header, ev_stream_context, ev_context, ev_payload) = match entry {
            Entry::PacketInfo { header, context } => {
                cur_expected_info = Some((header, context));
                continue;
            }
            Entry::Event { header, stream_context, context, payload } => {
                (header, stream_context, context, payload)
            }
        };

        // Advance the actual side to its next event, folding packet info.
        let actual_event = loop {
            let Some((j, raw)) = actual_iter.next() else {
                return Err(CompareError::mismatch(
                    &format!("$[{i}]"),
                    "an event",
                    "end of document",
                ));
            };
            match parse_entry(raw, &format!("$[{j}]"))? {
                Entry::PacketInfo { header, context } => {
                    cur_actual_info = Some((header, context));
                }
                event => break event,
            }
        };
        let Entry::Event { header, stream_context, context, payload } = actual_event else {
            unreachable!("loop breaks on events only");
        };

        let path = format!("event[{event_index}]");
        let (exp_ph, exp_pc) = cur_expected_info.clone().unwrap_or((None, None));
        let (act_ph, act_pc) = cur_actual_info.clone().unwrap_or((None, None));
        match_section(&exp_ph, &act_ph, &format!("{path}.packet-header"))?;
        match_section(&exp_pc, &act_pc, &format!("{path}.packet-context"))?;
        match_section(&ev_header, &header, &format!("{path}.header"))?;
        match_section(&ev_stream_context, &stream_context, &format!("{path}.stream-context"))?;
        match_section(&ev_context, &context, &format!("{path}.context"))?;
        match_section(&ev_payload, &payload, &format!("{path}.payload"))?;
        event_index += 1;
    }

    // Any remaining actual entries must not contain events.
    for (j, raw) in actual_iter {
        if let Entry::Event { .. } = parse_entry(raw, &format!("$[{j}]"))? {
            return Err(CompareError::mismatch(
                &format!("$[{j}]"),
                "end of document",
                "an extra event",
            ));
        }
    }
    Ok(())
}
