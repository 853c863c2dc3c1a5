//! CTF metadata type tree.
//!
//! `TypeNode` is the in-memory form of a trace's type descriptions, produced
//! by the metadata front end and consumed read-only by the field decoder. It
//! is a closed set of variants matched exhaustively at every decode site.
//!
//! All nodes derive serde so a schema can be loaded from JSON, which is how
//! the test suite builds fixtures.

use serde::{Deserialize, Serialize};

/// Byte order of a multi-byte field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ByteOrder {
    LittleEndian,
    BigEndian,
}

/// Character encoding of integers used as characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Encoding {
    #[default]
    None,
    Utf8,
    Ascii,
}

/// Fixed-size integer description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct IntegerType {
    /// Size in bits. Zero is legal and decodes to 0 consuming no value bits.
    pub size_bits: u64,
    /// Alignment in bits, applied before the read.
    #[serde(default = "default_align")]
    pub align_bits: u64,
    #[serde(default)]
    pub signed: bool,
    /// Per-field override; `None` inherits the trace default.
    #[serde(default)]
    pub byte_order: Option<ByteOrder>,
    #[serde(default)]
    pub encoding: Encoding,
    /// Display base. Irrelevant to decoding, carried for renderers.
    #[serde(default = "default_base")]
    pub base: u32,
}

fn default_align() -> u64 {
    8
}

fn default_base() -> u32 {
    10
}

impl IntegerType {
    /// Shorthand for an unsigned, byte-aligned integer of `size_bits`.
    pub fn unsigned(size_bits: u64) -> Self {
        Self {
            size_bits,
            align_bits: default_align(),
            signed: false,
            byte_order: None,
            encoding: Encoding::None,
            base: default_base(),
        }
    }

    /// Shorthand for a signed, byte-aligned integer of `size_bits`.
    pub fn signed(size_bits: u64) -> Self {
        Self { signed: true, ..Self::unsigned(size_bits) }
    }
}

/// IEEE-754 floating point description, sized as exponent + mantissa digits
/// (the mantissa count includes the sign/hidden bit, TSDL style: 8 + 24 is
/// binary32, 11 + 53 is binary64).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FloatType {
    pub exp_bits: u32,
    pub mant_bits: u32,
    #[serde(default = "default_align")]
    pub align_bits: u64,
    #[serde(default)]
    pub byte_order: Option<ByteOrder>,
}

impl FloatType {
    pub fn binary32() -> Self {
        Self { exp_bits: 8, mant_bits: 24, align_bits: 32, byte_order: None }
    }

    pub fn binary64() -> Self {
        Self { exp_bits: 11, mant_bits: 53, align_bits: 64, byte_order: None }
    }

    /// Total occupied width in bits.
    pub fn total_bits(&self) -> u64 {
        u64::from(self.exp_bits) + u64::from(self.mant_bits)
    }
}

/// One label mapping of an enumeration: an inclusive value range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct EnumMapping {
    #[serde(deserialize_with = "deserialize_i128")]
    pub lo: i128,
    #[serde(deserialize_with = "deserialize_i128")]
    pub hi: i128,
    pub label: String,
}

/// Deserializes an `i128` without calling `deserialize_i128`, which serde's
/// internal `Content` buffer (used for the `kind`-tagged [`TypeNode`]) does
/// not support.
fn deserialize_i128<'de, D>(deserializer: D) -> Result<i128, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct I128Visitor;

    impl serde::de::Visitor<'_> for I128Visitor {
        type Value = i128;

        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            f.write_str("an integer")
        }

        fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<i128, E> {
            Ok(i128::from(v))
        }

        fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<i128, E> {
            Ok(i128::from(v))
        }

        fn visit_i128<E: serde::de::Error>(self, v: i128) -> Result<i128, E> {
            Ok(v)
        }

        fn visit_u128<E: serde::de::Error>(self, v: u128) -> Result<i128, E> {
            i128::try_from(v).map_err(|_| {
                E::custom(format!("integer {v} out of range for i128"))
            })
        }
    }

    deserializer.deserialize_any(I128Visitor)
}

impl EnumMapping {
    /// Mapping covering a single value.
    pub fn value(value: i128, label: impl Into<String>) -> Self {
        Self { lo: value, hi: value, label: label.into() }
    }

    pub fn contains(&self, value: i128) -> bool {
        self.lo <= value && value <= self.hi
    }
}

/// Enumeration: an integer representation plus an ordered label mapping list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct EnumType {
    pub repr: IntegerType,
    pub mappings: Vec<EnumMapping>,
}

/// One named member of a struct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StructMember {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: TypeNode,
}

/// Ordered member list with the struct's own alignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StructType {
    pub members: Vec<StructMember>,
    /// Applied before the first member.
    #[serde(default = "default_struct_align")]
    pub align_bits: u64,
    /// Applied after the last member, when declared.
    #[serde(default)]
    pub trailing_align_bits: Option<u64>,
}

fn default_struct_align() -> u64 {
    1
}

impl StructType {
    pub fn new(members: Vec<StructMember>) -> Self {
        Self { members, align_bits: default_struct_align(), trailing_align_bits: None }
    }
}

/// One option of a variant, selected by tag label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct VariantOption {
    pub label: String,
    #[serde(rename = "type")]
    pub ty: TypeNode,
}

/// Polymorphic type description, the closed set the decoder matches over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum TypeNode {
    Integer(IntegerType),
    Float(FloatType),
    Enum(EnumType),
    /// Null-terminated byte string.
    String,
    /// Fixed-size byte string; content stops at the first NUL but the full
    /// declared length is always consumed.
    FixedString { length_bytes: u64 },
    Array { length: u64, element: Box<TypeNode> },
    /// Dynamically sized; `length_field` names a previously decoded integer
    /// sibling holding the element count.
    Sequence { length_field: String, element: Box<TypeNode> },
    Struct(StructType),
    /// Tag-selected union. A decoded variant collapses to its selected
    /// option's value; no variant node appears in decoder output.
    Variant { tag_field: String, options: Vec<VariantOption> },
}

impl TypeNode {
    /// Convenience constructor for a struct node.
    pub fn structure(members: Vec<(&str, TypeNode)>) -> Self {
        TypeNode::Struct(StructType::new(
            members
                .into_iter()
                .map(|(name, ty)| StructMember { name: name.to_string(), ty })
                .collect(),
        ))
    }
}
