//! Test utilities: a companion bit writer/encoder and synthetic streams.
//!
//! The encoder mirrors the cursor's bit-packing semantics so tests can build
//! buffers from value trees and verify the round-trip law: decoding a
//! re-encoded tree reproduces it exactly.

#![cfg(any(test, feature = "benchmark"))]

use crate::types::{
    ByteOrder, DecodedValue, EventSchema, IntValue, IntegerType, StreamSchema, TraceSchema,
    TypeNode,
};

/// Bit-granular writer mirroring [`crate::cursor::BitCursor`] packing,
/// including the rule that byte order may not switch inside a partially
/// written byte.
#[derive(Debug, Default)]
pub struct BitWriter {
    bytes: Vec<u8>,
    pos_bits: u64,
    partial: Option<(u64, ByteOrder)>,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position_bits(&self) -> u64 {
        self.pos_bits
    }

    pub fn finish(self) -> Vec<u8> {
        self.bytes
    }

    /// Zero-pad up to the next multiple of `align_bits`.
    pub fn align_to(&mut self, align_bits: u64) {
        if align_bits > 1 {
            let aligned = self.pos_bits.div_ceil(align_bits) * align_bits;
            self.grow_to(aligned);
            self.pos_bits = aligned;
            if self.pos_bits % 8 == 0 {
                self.partial = None;
            }
        }
    }

    /// Write the low `n` bits of `value` in the given byte order.
    pub fn write_bits(&mut self, n: u64, order: ByteOrder, value: u64) {
        assert!(n <= 64, "writer supports at most 64-bit fields");
        if n == 0 {
            return;
        }
        if self.pos_bits % 8 != 0
            && let Some((byte, prev)) = self.partial
            && byte == self.pos_bits / 8
        {
            assert_eq!(prev, order, "byte order switch inside byte {byte}");
        }
        self.grow_to(self.pos_bits + n);
        for i in 0..n {
            let value_bit = match order {
                ByteOrder::LittleEndian => (value >> i) & 1,
                ByteOrder::BigEndian => (value >> (n - 1 - i)) & 1,
            };
            if value_bit == 1 {
                let bit_pos = self.pos_bits + i;
                let slot = match order {
                    ByteOrder::LittleEndian => bit_pos % 8,
                    ByteOrder::BigEndian => 7 - (bit_pos % 8),
                };
                self.bytes[(bit_pos / 8) as usize] |= 1 << slot;
            }
        }
        self.pos_bits += n;
        self.partial = if self.pos_bits % 8 == 0 {
            None
        } else {
            Some((self.pos_bits / 8, order))
        };
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        assert_eq!(self.pos_bits % 8, 0, "byte writes require byte alignment");
        self.bytes.extend_from_slice(bytes);
        self.pos_bits += (bytes.len() as u64) * 8;
    }

    fn grow_to(&mut self, end_bits: u64) {
        let needed = end_bits.div_ceil(8) as usize;
        if self.bytes.len() < needed {
            self.bytes.resize(needed, 0);
        }
    }
}

/// Encode a value tree per its type node. Supports every node kind the
/// round-trip tests generate; variants are laid out by the caller because
/// encoding cannot resolve tag scopes.
pub fn encode_value(
    node: &TypeNode,
    value: &DecodedValue,
    writer: &mut BitWriter,
    default_order: ByteOrder,
) {
    match (node, value) {
        (TypeNode::Integer(int), DecodedValue::Integer(v)) => {
            writer.align_to(int.align_bits);
            let order = int.byte_order.unwrap_or(default_order);
            let bits = match v {
                IntValue::Signed(s) => *s as u64,
                IntValue::Unsigned(u) => *u,
                IntValue::Raw(_) => panic!("raw integers are not encodable"),
            };
            let mask = if int.size_bits == 64 { u64::MAX } else { (1u64 << int.size_bits) - 1 };
            if int.size_bits > 0 {
                writer.write_bits(int.size_bits, order, bits & mask);
            }
        }
        (TypeNode::Float(float), DecodedValue::Float(v)) => {
            writer.align_to(float.align_bits);
            let order = float.byte_order.unwrap_or(default_order);
            match float.total_bits() {
                32 => writer.write_bits(32, order, u64::from((*v as f32).to_bits())),
                64 => writer.write_bits(64, order, v.to_bits()),
                other => panic!("unsupported float width {other}"),
            }
        }
        (TypeNode::Enum(en), DecodedValue::Enum { value, .. }) => {
            encode_value(
                &TypeNode::Integer(en.repr.clone()),
                &DecodedValue::Integer(value.clone()),
                writer,
                default_order,
            );
        }
        (TypeNode::String, DecodedValue::String(s)) => {
            writer.align_to(8);
            writer.write_bytes(s.as_bytes());
            writer.write_bytes(&[0]);
        }
        (TypeNode::FixedString { length_bytes }, DecodedValue::String(s)) => {
            writer.align_to(8);
            let mut bytes = s.as_bytes().to_vec();
            assert!(bytes.len() < *length_bytes as usize, "fixed string content too long");
            bytes.resize(*length_bytes as usize, 0);
            writer.write_bytes(&bytes);
        }
        (TypeNode::Array { element, length }, DecodedValue::Array(elements)) => {
            assert_eq!(elements.len() as u64, *length);
            for elem in elements {
                encode_value(element, elem, writer, default_order);
            }
        }
        (TypeNode::Sequence { element, .. }, DecodedValue::Sequence(elements)) => {
            for elem in elements {
                encode_value(element, elem, writer, default_order);
            }
        }
        (TypeNode::Struct(st), DecodedValue::Struct(fields)) => {
            writer.align_to(st.align_bits);
            for member in &st.members {
                let value = fields.get(&member.name).expect("member value present");
                encode_value(&member.ty, value, writer, default_order);
            }
            if let Some(trailing) = st.trailing_align_bits {
                writer.align_to(trailing);
            }
        }
        (TypeNode::Variant { .. }, _) => panic!("variant encoding is laid out by the caller"),
        (node, value) => panic!("value {value:?} does not fit node {node:?}"),
    }
}

/// Build a single-stream trace and a buffer of `num_events` one-packet events
/// for benches and integration tests.
pub fn synthetic_stream(num_events: u16) -> (TraceSchema, Vec<u8>) {
    let payload = TypeNode::structure(vec![
        ("value", TypeNode::Integer(IntegerType::unsigned(32))),
        ("flags", TypeNode::Integer(IntegerType::unsigned(16))),
    ]);
    let stream = StreamSchema {
        id: 0,
        packet_context: Some(TypeNode::structure(vec![
            ("content_size", TypeNode::Integer(IntegerType::unsigned(32))),
            ("packet_size", TypeNode::Integer(IntegerType::unsigned(32))),
        ])),
        event_header: Some(TypeNode::structure(vec![
            ("id", TypeNode::Integer(IntegerType::unsigned(8))),
            ("timestamp", TypeNode::Integer(IntegerType::unsigned(32))),
        ])),
        event_context: None,
        events: vec![EventSchema {
            id: 0,
            name: "sample".to_string(),
            context: None,
            payload: Some(payload),
        }],
        clock: None,
        timestamp_member: "timestamp".to_string(),
        id_member: "id".to_string(),
    };
    let trace = TraceSchema::new(ByteOrder::LittleEndian, None, vec![stream])
        .expect("synthetic schema is valid");

    let event_bits = (1 + 4 + 4 + 2) as u64 * 8;
    let content_bits = 64 + u64::from(num_events) * event_bits;
    let mut writer = BitWriter::new();
    writer.write_bytes(&(content_bits as u32).to_le_bytes());
    writer.write_bytes(&(content_bits as u32).to_le_bytes());
    for i in 0..num_events {
        writer.write_bytes(&[0]);
        writer.write_bytes(&u32::from(i).to_le_bytes());
        writer.write_bytes(&(u32::from(i) * 3).to_le_bytes());
        writer.write_bytes(&i.to_le_bytes());
    }
    (trace, writer.finish())
}

#[cfg(test)]
mod round_trip {
    use super::*;
    use crate::cursor::BitCursor;
    use crate::decoder::decode_field;
    use crate::types::{EnumMapping, EnumType, StructMember, StructType};
    use proptest::prelude::*;

    fn mask(size_bits: u64) -> u64 {
        if size_bits == 64 { u64::MAX } else { (1u64 << size_bits) - 1 }
    }

    fn arb_byte_order() -> impl Strategy<Value = ByteOrder> {
        prop::sample::select(vec![ByteOrder::LittleEndian, ByteOrder::BigEndian])
    }

    prop_compose! {
        // Per-field overrides stay on the stream's order: at sub-byte
        // positions a genuine order switch is rejected, not round-tripped.
        fn arb_integer(stream_order: ByteOrder)(
            size_bits in 1u64..=64,
            raw in any::<u64>(),
            signed in any::<bool>(),
            explicit in any::<bool>(),
            align_pow in 0u32..=3,
        ) -> (TypeNode, DecodedValue) {
            let bits = raw & mask(size_bits);
            let value = IntValue::from_bits(bits, size_bits, signed);
            let node = TypeNode::Integer(IntegerType {
                size_bits,
                align_bits: 1 << align_pow,
                signed,
                byte_order: explicit.then_some(stream_order),
                ..IntegerType::unsigned(size_bits)
            });
            (node, DecodedValue::Integer(value))
        }
    }

    prop_compose! {
        fn arb_float()(value in any::<f64>().prop_filter("finite", |f| f.is_finite()))
            -> (TypeNode, DecodedValue)
        {
            (TypeNode::Float(crate::types::FloatType::binary64()), DecodedValue::Float(value))
        }
    }

    prop_compose! {
        fn arb_string()(content in "[a-zA-Z0-9 ]{0,12}") -> (TypeNode, DecodedValue) {
            (TypeNode::String, DecodedValue::String(content))
        }
    }

    prop_compose! {
        fn arb_enum()(value in 0u64..100, extra in 100u64..200) -> (TypeNode, DecodedValue) {
            let node = TypeNode::Enum(EnumType {
                repr: IntegerType::unsigned(16),
                mappings: vec![
                    EnumMapping::value(value as i128, "HIT"),
                    EnumMapping::value(extra as i128, "OTHER"),
                ],
            });
            let decoded =
                DecodedValue::Enum { label: "HIT".to_string(), value: IntValue::Unsigned(value) };
            (node, decoded)
        }
    }

    fn arb_pair(stream_order: ByteOrder) -> impl Strategy<Value = (TypeNode, DecodedValue)> {
        let leaf = prop_oneof![arb_integer(stream_order), arb_float(), arb_string(), arb_enum()];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                // Struct of up to 4 members.
                prop::collection::vec(inner.clone(), 1..=4).prop_map(|pairs| {
                    let mut members = Vec::new();
                    let mut fields = crate::types::StructValue::new();
                    for (i, (ty, value)) in pairs.into_iter().enumerate() {
                        let name = format!("m{i}");
                        members.push(StructMember { name: name.clone(), ty });
                        fields.insert(name, value);
                    }
                    (
                        TypeNode::Struct(StructType::new(members)),
                        DecodedValue::Struct(fields),
                    )
                }),
                // Fixed array of one element type.
                (inner, 0usize..4).prop_map(|((ty, value), n)| {
                    let elements = vec![value; n];
                    (
                        TypeNode::Array { length: n as u64, element: Box::new(ty) },
                        DecodedValue::Array(elements),
                    )
                }),
            ]
        })
    }

    proptest! {
        #[test]
        fn decoding_a_reencoded_tree_reproduces_it(
            (order, (node, value)) in arb_byte_order()
                .prop_flat_map(|order| (Just(order), arb_pair(order)))
        ) {
            let mut writer = BitWriter::new();
            encode_value(&node, &value, &mut writer, order);
            let written_bits = writer.position_bits();
            let buf = writer.finish();

            let mut cursor = BitCursor::new(&buf, order);
            let decoded = decode_field(&node, &mut cursor, "roundtrip").unwrap();
            prop_assert_eq!(&decoded, &value);
            prop_assert_eq!(cursor.position_bits(), written_bits);

            // Determinism: a second decode of the same buffer matches.
            let mut cursor = BitCursor::new(&buf, order);
            let again = decode_field(&node, &mut cursor, "roundtrip").unwrap();
            prop_assert_eq!(again, decoded);
        }

        #[test]
        fn struct_consumed_bits_match_member_sum(
            sizes in prop::collection::vec(1u64..=64, 1..6),
        ) {
            // Byte-aligned unsigned members: consumed bits are the sum of
            // each member's alignment padding plus its size.
            let members: Vec<StructMember> = sizes
                .iter()
                .enumerate()
                .map(|(i, &size)| StructMember {
                    name: format!("m{i}"),
                    ty: TypeNode::Integer(IntegerType::unsigned(size)),
                })
                .collect();
            let node = TypeNode::Struct(StructType::new(members));

            let mut expected_bits = 0u64;
            for &size in &sizes {
                expected_bits = expected_bits.div_ceil(8) * 8 + size;
            }

            let buf = vec![0u8; expected_bits.div_ceil(8) as usize];
            let mut cursor = BitCursor::new(&buf, ByteOrder::LittleEndian);
            decode_field(&node, &mut cursor, "payload").unwrap();
            prop_assert_eq!(cursor.position_bits(), expected_bits);
        }
    }

    #[test]
    fn byte_aligned_order_mix_round_trips() {
        let node = TypeNode::structure(vec![
            (
                "be",
                TypeNode::Integer(IntegerType {
                    byte_order: Some(ByteOrder::BigEndian),
                    ..IntegerType::unsigned(16)
                }),
            ),
            (
                "le",
                TypeNode::Integer(IntegerType {
                    byte_order: Some(ByteOrder::LittleEndian),
                    ..IntegerType::unsigned(16)
                }),
            ),
        ]);
        let mut fields = crate::types::StructValue::new();
        fields.insert("be".to_string(), DecodedValue::Integer(IntValue::Unsigned(0x1234)));
        fields.insert("le".to_string(), DecodedValue::Integer(IntValue::Unsigned(0x5678)));
        let value = DecodedValue::Struct(fields);

        let mut writer = BitWriter::new();
        encode_value(&node, &value, &mut writer, ByteOrder::LittleEndian);
        let buf = writer.finish();
        assert_eq!(buf, vec![0x12, 0x34, 0x78, 0x56]);

        let mut cursor = BitCursor::new(&buf, ByteOrder::LittleEndian);
        assert_eq!(decode_field(&node, &mut cursor, "payload").unwrap(), value);
    }

    #[test]
    fn synthetic_stream_decodes() {
        let (trace, buf) = synthetic_stream(5);
        let packets = crate::assembler::decode_stream(&trace, &buf).unwrap();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].events.len(), 5);
        assert_eq!(packets[0].events[4].timestamp, Some(4));
    }
}
