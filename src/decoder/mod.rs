//! Recursive field decoder.
//!
//! Given a type node and a cursor, `FieldDecoder` produces exactly one
//! `DecodedValue` and advances the cursor past exactly the bits that type
//! occupies (alignment padding included). Decoding is a pure function of
//! (type, cursor position, buffer); the cursor advances monotonically and the
//! same inputs always produce the same tree.
//!
//! Cross-sibling references (sequence lengths, variant tags) resolve through
//! the scope stack in [`scope`]; see that module for the lookup order.

mod scope;

use tracing::trace;

use crate::cursor::BitCursor;
use crate::error::{DecodeError, Result};
use crate::types::{
    DecodedValue, EnumType, FloatType, IntValue, IntegerType, StructType, StructValue, TypeNode,
    VariantOption,
};

use scope::{ScopeStack, SchemaPath};

/// Decode a single type at the cursor's position.
///
/// `root` names the section being decoded for error paths, e.g.
/// `"event.payload"`.
pub fn decode_field(node: &TypeNode, cursor: &mut BitCursor<'_>, root: &str) -> Result<DecodedValue> {
    FieldDecoder::new(cursor, root).decode(node)
}

/// Stateful walk over one top-level type node.
pub struct FieldDecoder<'c, 'buf> {
    cursor: &'c mut BitCursor<'buf>,
    scopes: ScopeStack,
    path: SchemaPath,
}

impl<'c, 'buf> FieldDecoder<'c, 'buf> {
    pub fn new(cursor: &'c mut BitCursor<'buf>, root: &str) -> Self {
        Self { cursor, scopes: ScopeStack::new(), path: SchemaPath::root(root) }
    }

    /// Make already-decoded fields visible to sequence-length and variant-tag
    /// lookups, as the outermost scope. Local struct members shadow them.
    pub fn seed(&mut self, fields: &StructValue) {
        if fields.is_empty() {
            return;
        }
        self.scopes.push();
        for (name, value) in fields.iter() {
            self.scopes.insert(name, value.clone());
        }
    }

    /// Decode one node, stamping the schema path onto any error raised below.
    pub fn decode(&mut self, node: &TypeNode) -> Result<DecodedValue> {
        let rendered = self.path.render();
        self.decode_node(node).map_err(|e| e.with_path(&rendered))
    }

    fn decode_node(&mut self, node: &TypeNode) -> Result<DecodedValue> {
        match node {
            TypeNode::Integer(int) => Ok(DecodedValue::Integer(self.decode_integer(int)?)),
            TypeNode::Float(float) => Ok(DecodedValue::Float(self.decode_float(float)?)),
            TypeNode::Enum(en) => self.decode_enum(en),
            TypeNode::String => Ok(DecodedValue::String(self.decode_string()?)),
            TypeNode::FixedString { length_bytes } => {
                Ok(DecodedValue::String(self.decode_fixed_string(*length_bytes)?))
            }
            TypeNode::Array { length, element } => {
                let elements = self.decode_elements(*length, element)?;
                Ok(DecodedValue::Array(elements))
            }
            TypeNode::Sequence { length_field, element } => {
                let length = self.resolve_sequence_length(length_field)?;
                let elements = self.decode_elements(length, element)?;
                Ok(DecodedValue::Sequence(elements))
            }
            TypeNode::Struct(st) => self.decode_struct(st),
            TypeNode::Variant { tag_field, options } => self.decode_variant(tag_field, options),
        }
    }

    fn decode_integer(&mut self, int: &IntegerType) -> Result<IntValue> {
        self.cursor.align_to(int.align_bits)?;
        if int.size_bits == 0 {
            // Zero-bit integers are legal: value 0, no bits past the padding.
            return Ok(if int.signed { IntValue::Signed(0) } else { IntValue::Unsigned(0) });
        }
        let order = self.cursor.resolve_order(int.byte_order);
        if int.size_bits <= 64 {
            let bits = self.cursor.read_bits(int.size_bits, order)?;
            return Ok(IntValue::from_bits(bits, int.size_bits, int.signed));
        }
        // Wider than the native fast path: keep raw big-endian bytes, folding
        // back to native when the decoded magnitude happens to fit.
        let raw = self.cursor.read_bits_raw(int.size_bits, order)?;
        Ok(narrow_raw(raw, int.size_bits, int.signed))
    }

    fn decode_float(&mut self, float: &FloatType) -> Result<f64> {
        self.cursor.align_to(float.align_bits)?;
        let order = self.cursor.resolve_order(float.byte_order);
        match float.total_bits() {
            32 => {
                let bits = self.cursor.read_bits(32, order)? as u32;
                Ok(f64::from(f32::from_bits(bits)))
            }
            64 => {
                let bits = self.cursor.read_bits(64, order)?;
                Ok(f64::from_bits(bits))
            }
            total_bits => Err(DecodeError::UnsupportedFloatWidth {
                path: String::new(),
                offset: self.cursor.byte_offset(),
                total_bits,
            }),
        }
    }

    fn decode_enum(&mut self, en: &EnumType) -> Result<DecodedValue> {
        let offset = self.cursor.byte_offset();
        let value = self.decode_integer(&en.repr)?;
        // Repr is validated to at most 64 bits, so the widening cannot fail.
        let wide = value.as_i128().unwrap_or_default();
        let label = en
            .mappings
            .iter()
            .find(|mapping| mapping.contains(wide))
            .map(|mapping| mapping.label.clone());
        match label {
            Some(label) => Ok(DecodedValue::Enum { label, value }),
            // The validation format has no shape for a label-less enum, so an
            // unmapped value is a hard failure, distinct from a read failure.
            None => Err(DecodeError::UnmappedEnumValue { path: String::new(), offset, value: wide }),
        }
    }

    fn decode_string(&mut self) -> Result<String> {
        self.cursor.align_to(8)?;
        let mut bytes = Vec::new();
        loop {
            if self.cursor.remaining_bits() < 8 {
                return Err(DecodeError::UnterminatedString {
                    path: String::new(),
                    offset: self.cursor.byte_offset(),
                });
            }
            match self.cursor.read_byte()? {
                0 => break,
                byte => bytes.push(byte),
            }
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn decode_fixed_string(&mut self, length_bytes: u64) -> Result<String> {
        self.cursor.align_to(8)?;
        let bytes = self.cursor.read_byte_slice(length_bytes as usize)?;
        let content = match bytes.iter().position(|&b| b == 0) {
            Some(nul) => &bytes[..nul],
            None => bytes,
        };
        Ok(String::from_utf8_lossy(content).into_owned())
    }

    fn decode_elements(&mut self, length: u64, element: &TypeNode) -> Result<Vec<DecodedValue>> {
        let mut elements = Vec::with_capacity(length.min(1024) as usize);
        for i in 0..length {
            self.path.push_index(i as usize);
            let value = self.decode(element);
            self.path.pop_index();
            elements.push(value?);
        }
        Ok(elements)
    }

    fn resolve_sequence_length(&mut self, length_field: &str) -> Result<u64> {
        let resolved = self.scopes.lookup(length_field).and_then(|value| match value {
            DecodedValue::Integer(int) => int.as_u64(),
            DecodedValue::Enum { value, .. } => value.as_u64(),
            _ => None,
        });
        resolved.ok_or_else(|| DecodeError::UnresolvedLengthField {
            path: String::new(),
            offset: self.cursor.byte_offset(),
            length_field: length_field.to_string(),
        })
    }

    fn decode_struct(&mut self, st: &StructType) -> Result<DecodedValue> {
        self.cursor.align_to(st.align_bits)?;
        self.scopes.push();
        let result = self.decode_struct_members(st);
        self.scopes.pop();
        let value = result?;
        if let Some(trailing) = st.trailing_align_bits {
            self.cursor.align_to(trailing)?;
        }
        Ok(DecodedValue::Struct(value))
    }

    fn decode_struct_members(&mut self, st: &StructType) -> Result<StructValue> {
        let mut fields = StructValue::new();
        for member in &st.members {
            self.path.push(&member.name);
            let value = self.decode(&member.ty);
            self.path.pop();
            let value = value?;
            self.scopes.insert(&member.name, value.clone());
            fields.insert(member.name.clone(), value);
        }
        Ok(fields)
    }

    fn decode_variant(
        &mut self,
        tag_field: &str,
        options: &[VariantOption],
    ) -> Result<DecodedValue> {
        let offset = self.cursor.byte_offset();
        let tag = match self.scopes.lookup(tag_field) {
            Some(DecodedValue::Enum { label, .. }) => label.clone(),
            Some(DecodedValue::Integer(int)) => match int.as_i128() {
                Some(value) => value.to_string(),
                None => {
                    return Err(unresolved_tag(offset, "<tag too wide>"));
                }
            },
            _ => return Err(unresolved_tag(offset, &format!("<{tag_field} not in scope>"))),
        };
        let option = options
            .iter()
            .find(|option| option.label == tag)
            .ok_or_else(|| unresolved_tag(offset, &tag))?;
        trace!(tag = %tag, "variant selected option");
        // The selected option's value is returned directly; no variant
        // wrapper appears in the output tree.
        self.decode(&option.ty)
    }
}

fn unresolved_tag(offset: usize, tag: &str) -> DecodeError {
    DecodeError::UnresolvedVariantTag { path: String::new(), offset, tag: tag.to_string() }
}

/// Fold a raw big-endian magnitude back into a native integer when it fits.
///
/// Signed values wider than 64 bits with the sign bit set stay raw: the hex
/// rendering then shows the two's-complement bit pattern.
fn narrow_raw(raw: Vec<u8>, size_bits: u64, signed: bool) -> IntValue {
    let full_bytes = size_bits.div_ceil(8) as usize;
    let sign_set = signed
        && raw.len() == full_bytes
        && (raw[0] >> ((size_bits - 1) % 8)) & 1 == 1;
    if sign_set {
        return IntValue::Raw(raw);
    }
    if raw.len() <= 8 {
        let mut buf = [0u8; 8];
        buf[8 - raw.len()..].copy_from_slice(&raw);
        let value = u64::from_be_bytes(buf);
        if signed {
            match i64::try_from(value) {
                Ok(v) => IntValue::Signed(v),
                Err(_) => IntValue::Raw(raw),
            }
        } else {
            IntValue::Unsigned(value)
        }
    } else {
        IntValue::Raw(raw)
    }
}
