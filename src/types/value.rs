//! Decoded field values.
//!
//! A `DecodedValue` tree is fully determined by the type node, the cursor
//! start position, and the buffer contents. Struct members keep their schema
//! declaration order (IndexMap), which the renderer preserves in its output.

use indexmap::IndexMap;

/// Decoded integer. The fast path stays on native 64-bit values; only reads
/// wider than 64 bits fall back to raw big-endian magnitude bytes, which the
/// renderer emits as a hexadecimal string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntValue {
    Signed(i64),
    Unsigned(u64),
    /// Big-endian bytes of a value that does not fit a native 64-bit integer.
    /// For signed types this is the two's-complement bit pattern.
    Raw(Vec<u8>),
}

impl IntValue {
    /// Native value when representable, for length and tag resolution.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            IntValue::Signed(v) => u64::try_from(*v).ok(),
            IntValue::Unsigned(v) => Some(*v),
            IntValue::Raw(_) => None,
        }
    }

    /// Widened value for enum mapping lookups. Raw values wider than 128 bits
    /// have no mapping representation and yield `None`.
    pub fn as_i128(&self) -> Option<i128> {
        match self {
            IntValue::Signed(v) => Some(i128::from(*v)),
            IntValue::Unsigned(v) => Some(i128::from(*v)),
            IntValue::Raw(bytes) => {
                if bytes.len() > 16 {
                    return None;
                }
                let mut buf = [0u8; 16];
                buf[16 - bytes.len()..].copy_from_slice(bytes);
                let wide = u128::from_be_bytes(buf);
                i128::try_from(wide).ok()
            }
        }
    }

    /// Build from raw decoded bits of a `size_bits`-wide integer, keeping
    /// native representation whenever the value fits.
    pub fn from_bits(bits: u64, size_bits: u64, signed: bool) -> Self {
        if signed {
            IntValue::Signed(sign_extend(bits, size_bits))
        } else {
            IntValue::Unsigned(bits)
        }
    }
}

/// Two's-complement interpretation of the low `size_bits` of `bits`.
pub(crate) fn sign_extend(bits: u64, size_bits: u64) -> i64 {
    if size_bits == 0 || size_bits >= 64 {
        return bits as i64;
    }
    let shift = 64 - size_bits;
    ((bits << shift) as i64) >> shift
}

/// Ordered name→value mapping of a decoded struct.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StructValue {
    fields: IndexMap<String, DecodedValue>,
}

impl StructValue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: String, value: DecodedValue) {
        self.fields.insert(name, value);
    }

    pub fn get(&self, name: &str) -> Option<&DecodedValue> {
        self.fields.get(name)
    }

    /// Member lookup narrowed to a native unsigned integer, used by the
    /// assembler for `content_size`, `stream_id` and friends.
    pub fn get_u64(&self, name: &str) -> Option<u64> {
        match self.get(name)? {
            DecodedValue::Integer(int) => int.as_u64(),
            DecodedValue::Enum { value, .. } => value.as_u64(),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &DecodedValue)> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl FromIterator<(String, DecodedValue)> for StructValue {
    fn from_iter<I: IntoIterator<Item = (String, DecodedValue)>>(iter: I) -> Self {
        Self { fields: iter.into_iter().collect() }
    }
}

/// Tagged union over every decodable field shape.
///
/// Variants never appear here: a decoded variant collapses to its selected
/// option's value directly.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedValue {
    Integer(IntValue),
    Float(f64),
    Enum { label: String, value: IntValue },
    String(String),
    Array(Vec<DecodedValue>),
    Sequence(Vec<DecodedValue>),
    Struct(StructValue),
}

impl DecodedValue {
    /// Struct view of this value, if it is one.
    pub fn as_struct(&self) -> Option<&StructValue> {
        match self {
            DecodedValue::Struct(s) => Some(s),
            _ => None,
        }
    }
}
