//! Packet and event assembly.
//!
//! A stream buffer is a sequence of packets: optional trace-level packet
//! header, stream-level packet context, then events until the packet's
//! declared content boundary. The assembler drives the field decoder through
//! that structure as an explicit state machine and attaches clock-offset
//! adjusted timestamps to events.
//!
//! Packets must be decoded strictly in sequence because each packet's
//! `packet_size` determines where the next one starts. Independent streams
//! share nothing but the read-only schema and may run in parallel; see
//! [`decode_streams`].

use tracing::{debug, trace};

use crate::cursor::BitCursor;
use crate::decoder::FieldDecoder;
use crate::error::{DecodeError, Result};
use crate::types::{DecodedValue, StreamSchema, StructValue, TraceSchema, TypeNode};

/// One decoded event with its section values and adjusted timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub id: u64,
    pub name: String,
    pub header: Option<DecodedValue>,
    pub stream_context: Option<DecodedValue>,
    pub context: Option<DecodedValue>,
    pub payload: Option<DecodedValue>,
    /// Raw clock value plus the stream clock's offset. `None` when the
    /// stream declares no timestamp member in its event header.
    pub timestamp: Option<u64>,
}

/// One decoded packet: its header/context sections and events in stream order.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub header: Option<DecodedValue>,
    pub context: Option<DecodedValue>,
    pub events: Vec<Event>,
}

/// Assembler states, advanced in order for every packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AtPacketHeader,
    AtPacketContext,
    AtEvent,
    AtStreamEnd,
}

/// Decodes the packets of one stream buffer in sequence.
pub struct StreamDecoder<'a> {
    trace: &'a TraceSchema,
    cursor: BitCursor<'a>,
    state: State,
}

impl<'a> StreamDecoder<'a> {
    pub fn new(trace: &'a TraceSchema, buf: &'a [u8]) -> Self {
        let cursor = BitCursor::new(buf, trace.byte_order);
        Self { trace, cursor, state: State::AtPacketHeader }
    }

    /// Decode every packet until the end of the buffer. Fail-fast: the first
    /// error aborts the stream with no partial result.
    pub fn decode_all(mut self) -> Result<Vec<Packet>> {
        let mut packets = Vec::new();
        while self.state != State::AtStreamEnd {
            if self.cursor.remaining_bits() == 0 {
                self.state = State::AtStreamEnd;
                break;
            }
            packets.push(self.decode_packet()?);
        }
        debug!(packets = packets.len(), "stream decode complete");
        Ok(packets)
    }

    fn decode_packet(&mut self) -> Result<Packet> {
        let packet_start = self.cursor.position_bits();

        // AtPacketHeader
        debug_assert_eq!(self.state, State::AtPacketHeader);
        let header =
            self.decode_section(self.trace.packet_header.as_ref(), "packet.header", None)?;
        let stream_id = header
            .as_ref()
            .and_then(DecodedValue::as_struct)
            .and_then(|st| st.get_u64(&self.trace.stream_id_member));
        let stream = self.trace.stream_by_id(stream_id)?;
        self.state = State::AtPacketContext;

        // AtPacketContext
        let mut packet_scope = StructValue::new();
        merge_section(&mut packet_scope, header.as_ref());
        let context = self.decode_section(
            stream.packet_context.as_ref(),
            "packet.context",
            Some(&packet_scope),
        )?;
        merge_section(&mut packet_scope, context.as_ref());
        let (content_end, packet_end) = self.packet_bounds(packet_start, context.as_ref())?;
        self.state = State::AtEvent;

        // AtEvent
        let mut events = Vec::new();
        while self.cursor.position_bits() < content_end {
            let event_start = self.cursor.position_bits();
            let event = self.decode_event(stream, &packet_scope)?;
            trace!(id = event.id, timestamp = ?event.timestamp, "decoded event");
            if self.cursor.position_bits() > content_end {
                return Err(DecodeError::PacketBoundaryMisalignment {
                    position_bits: self.cursor.position_bits(),
                    boundary_bits: content_end,
                });
            }
            // An event that consumes no bits can never reach the content
            // boundary; bail instead of looping.
            if self.cursor.position_bits() == event_start {
                return Err(DecodeError::schema(format!(
                    "event '{}' at bit {event_start} consumes no bits, so the packet \
                     cannot reach its content boundary at bit {content_end}",
                    event.name
                )));
            }
            events.push(event);
        }

        // Exact landing on the content boundary; skip padding up to the
        // declared packet size.
        self.cursor.seek_to(packet_end)?;
        self.state = State::AtPacketHeader;
        debug!(
            stream_id = stream.id,
            events = events.len(),
            content_end_bits = content_end,
            "packet complete"
        );
        Ok(Packet { header, context, events })
    }

    /// Resolve the packet's content and total boundaries, in absolute bits.
    ///
    /// `content_size` and `packet_size` are bit counts relative to the packet
    /// start. A missing `content_size` extends the content to the end of the
    /// buffer; a missing `packet_size` matches the content boundary.
    fn packet_bounds(
        &self,
        packet_start: u64,
        context: Option<&DecodedValue>,
    ) -> Result<(u64, u64)> {
        let fields = context.and_then(DecodedValue::as_struct);
        let content_end = match fields.and_then(|st| st.get_u64("content_size")) {
            Some(bits) => packet_start + bits,
            None => self.cursor.len_bits(),
        };
        let packet_end = match fields.and_then(|st| st.get_u64("packet_size")) {
            Some(bits) => packet_start + bits,
            None => content_end,
        };
        if content_end > self.cursor.len_bits() || packet_end > self.cursor.len_bits() {
            return Err(DecodeError::out_of_bounds("packet.context", self.cursor.byte_offset()));
        }
        if content_end < self.cursor.position_bits() || packet_end < content_end {
            return Err(DecodeError::PacketBoundaryMisalignment {
                position_bits: self.cursor.position_bits(),
                boundary_bits: content_end,
            });
        }
        Ok((content_end, packet_end))
    }

    fn decode_event(&mut self, stream: &StreamSchema, packet_scope: &StructValue) -> Result<Event> {
        let event_offset = self.cursor.byte_offset();
        let mut scope = packet_scope.clone();
        let header =
            self.decode_section(stream.event_header.as_ref(), "event.header", Some(&scope))?;
        merge_section(&mut scope, header.as_ref());
        let header_fields = header.as_ref().and_then(DecodedValue::as_struct);

        // The header's id member selects the event declaration; headerless
        // streams carry a single implicit id 0.
        let id = header_fields.and_then(|st| st.get_u64(&stream.id_member)).unwrap_or(0);
        let declaration = stream
            .event_by_id(id)
            .ok_or(DecodeError::UnknownEventId { offset: event_offset, id })?;

        let raw_timestamp = header_fields.and_then(|st| st.get_u64(&stream.timestamp_member));
        let timestamp = raw_timestamp.map(|raw| {
            let offset = stream.clock.as_ref().map_or(0, |clock| clock.offset());
            raw.saturating_add(offset)
        });

        let stream_context = self.decode_section(
            stream.event_context.as_ref(),
            "event.stream-context",
            Some(&scope),
        )?;
        merge_section(&mut scope, stream_context.as_ref());
        let context =
            self.decode_section(declaration.context.as_ref(), "event.context", Some(&scope))?;
        merge_section(&mut scope, context.as_ref());
        let payload =
            self.decode_section(declaration.payload.as_ref(), "event.payload", Some(&scope))?;

        Ok(Event {
            id,
            name: declaration.name.clone(),
            header,
            stream_context,
            context,
            payload,
            timestamp,
        })
    }

    /// Decode one section, with earlier sections' members visible to
    /// sequence-length and variant-tag lookups as the outermost scope.
    fn decode_section(
        &mut self,
        node: Option<&TypeNode>,
        root: &str,
        scope: Option<&StructValue>,
    ) -> Result<Option<DecodedValue>> {
        match node {
            Some(node) => {
                let mut decoder = FieldDecoder::new(&mut self.cursor, root);
                if let Some(scope) = scope {
                    decoder.seed(scope);
                }
                Ok(Some(decoder.decode(node)?))
            }
            None => Ok(None),
        }
    }
}

/// Fold a decoded section's top-level members into the cross-section scope.
fn merge_section(scope: &mut StructValue, section: Option<&DecodedValue>) {
    if let Some(st) = section.and_then(DecodedValue::as_struct) {
        for (name, value) in st.iter() {
            scope.insert(name.clone(), value.clone());
        }
    }
}

/// Decode one stream buffer into its packets.
pub fn decode_stream(trace: &TraceSchema, buf: &[u8]) -> Result<Vec<Packet>> {
    StreamDecoder::new(trace, buf).decode_all()
}

/// Decode several independent stream buffers, one worker thread each.
///
/// The schema is shared read-only; streams share no mutable state. A failing
/// stream reports its own error without aborting its siblings, so the result
/// holds one `Result` per input buffer, in input order.
pub fn decode_streams(trace: &TraceSchema, buffers: &[&[u8]]) -> Vec<Result<Vec<Packet>>> {
    std::thread::scope(|scope| {
        let handles: Vec<_> = buffers
            .iter()
            .map(|buf| scope.spawn(move || decode_stream(trace, buf)))
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("stream decode worker panicked"))
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ByteOrder, ClockSchema, EventSchema, IntegerType, StreamSchema};

    fn simple_stream(events: Vec<EventSchema>) -> StreamSchema {
        StreamSchema {
            id: 0,
            packet_context: None,
            event_header: None,
            event_context: None,
            events,
            clock: None,
            timestamp_member: "timestamp".to_string(),
            id_member: "id".to_string(),
        }
    }

    fn u8_payload_event(id: u64, name: &str) -> EventSchema {
        EventSchema {
            id,
            name: name.to_string(),
            context: None,
            payload: Some(TypeNode::structure(vec![(
                "value",
                TypeNode::Integer(IntegerType::unsigned(8)),
            )])),
        }
    }

    #[test]
    fn headerless_single_event_stream() {
        let trace = TraceSchema::new(
            ByteOrder::LittleEndian,
            None,
            vec![simple_stream(vec![u8_payload_event(0, "sample")])],
        )
        .unwrap();

        let buf = [10, 20, 30];
        let packets = decode_stream(&trace, &buf).unwrap();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].events.len(), 3);
        assert_eq!(packets[0].events[2].name, "sample");
        let payload = packets[0].events[2].payload.as_ref().unwrap().as_struct().unwrap();
        assert_eq!(payload.get_u64("value"), Some(30));
    }

    #[test]
    fn event_id_dispatch_and_unknown_id() {
        let mut stream = simple_stream(vec![u8_payload_event(1, "one")]);
        stream.event_header = Some(TypeNode::structure(vec![(
            "id",
            TypeNode::Integer(IntegerType::unsigned(8)),
        )]));
        let trace = TraceSchema::new(ByteOrder::LittleEndian, None, vec![stream]).unwrap();

        let packets = decode_stream(&trace, &[1, 42]).unwrap();
        assert_eq!(packets[0].events[0].name, "one");

        let err = decode_stream(&trace, &[9, 42]).unwrap_err();
        match err {
            DecodeError::UnknownEventId { id, offset } => {
                assert_eq!(id, 9);
                assert_eq!(offset, 0);
            }
            other => panic!("expected UnknownEventId, got {other:?}"),
        }
    }

    #[test]
    fn timestamps_carry_clock_offset() {
        let mut stream = simple_stream(vec![u8_payload_event(0, "tick")]);
        stream.event_header = Some(TypeNode::structure(vec![
            ("id", TypeNode::Integer(IntegerType::unsigned(8))),
            ("timestamp", TypeNode::Integer(IntegerType::unsigned(16))),
        ]));
        stream.clock = Some(ClockSchema { frequency: 1000, offset_seconds: 1, offset_cycles: 5 });
        let trace = TraceSchema::new(ByteOrder::LittleEndian, None, vec![stream]).unwrap();

        let buf = [0, 0x10, 0x00, 7];
        let packets = decode_stream(&trace, &buf).unwrap();
        // raw 0x0010 = 16, offset = 1 * 1000 + 5
        assert_eq!(packets[0].events[0].timestamp, Some(16 + 1005));
    }

    #[test]
    fn content_size_bounds_events_and_padding_is_skipped() {
        let mut stream = simple_stream(vec![u8_payload_event(0, "sample")]);
        stream.packet_context = Some(TypeNode::structure(vec![
            ("content_size", TypeNode::Integer(IntegerType::unsigned(16))),
            ("packet_size", TypeNode::Integer(IntegerType::unsigned(16))),
        ]));
        let trace = TraceSchema::new(ByteOrder::LittleEndian, None, vec![stream]).unwrap();

        // Two packets of 8 bytes (64 bits): 4 bytes context, 2 events,
        // 2 bytes padding (content 48 bits, packet 64 bits).
        let mut buf = Vec::new();
        for base in [0u8, 100] {
            buf.extend_from_slice(&48u16.to_le_bytes());
            buf.extend_from_slice(&64u16.to_le_bytes());
            buf.push(base + 1);
            buf.push(base + 2);
            buf.extend_from_slice(&[0xEE, 0xEE]); // padding
        }
        let packets = decode_stream(&trace, &buf).unwrap();
        assert_eq!(packets.len(), 2);
        for (packet, base) in packets.iter().zip([0u64, 100]) {
            assert_eq!(packet.events.len(), 2);
            let payload = packet.events[0].payload.as_ref().unwrap().as_struct().unwrap();
            assert_eq!(payload.get_u64("value"), Some(base + 1));
        }
    }

    #[test]
    fn boundary_overrun_fails() {
        let mut stream = simple_stream(vec![u8_payload_event(0, "sample")]);
        stream.packet_context = Some(TypeNode::structure(vec![(
            "content_size",
            TypeNode::Integer(IntegerType::unsigned(16)),
        )]));
        let trace = TraceSchema::new(ByteOrder::LittleEndian, None, vec![stream]).unwrap();

        // Context claims 21 bits of content: 16 bits context + one 8-bit
        // event overruns the boundary by 3 bits.
        let buf = [21, 0, 0xAA, 0xBB];
        let err = decode_stream(&trace, &buf).unwrap_err();
        match err {
            DecodeError::PacketBoundaryMisalignment { position_bits, boundary_bits } => {
                assert_eq!(position_bits, 24);
                assert_eq!(boundary_bits, 21);
            }
            other => panic!("expected PacketBoundaryMisalignment, got {other:?}"),
        }
    }

    #[test]
    fn content_size_past_buffer_fails() {
        let mut stream = simple_stream(vec![u8_payload_event(0, "sample")]);
        stream.packet_context = Some(TypeNode::structure(vec![(
            "content_size",
            TypeNode::Integer(IntegerType::unsigned(16)),
        )]));
        let trace = TraceSchema::new(ByteOrder::LittleEndian, None, vec![stream]).unwrap();

        let buf = [0xFF, 0xFF, 0x00];
        let err = decode_stream(&trace, &buf).unwrap_err();
        assert!(matches!(err, DecodeError::OutOfBounds { .. }));
    }

    #[test]
    fn multi_stream_class_selection_via_packet_header() {
        let header = TypeNode::structure(vec![
            ("magic", TypeNode::Integer(IntegerType::unsigned(32))),
            ("stream_id", TypeNode::Integer(IntegerType::unsigned(32))),
        ]);
        let mut audio = simple_stream(vec![u8_payload_event(0, "audio")]);
        audio.id = 0;
        let mut video = simple_stream(vec![u8_payload_event(0, "video")]);
        video.id = 1;
        let trace =
            TraceSchema::new(ByteOrder::LittleEndian, Some(header), vec![audio, video]).unwrap();

        let mut buf = Vec::new();
        buf.extend_from_slice(&0xC1FC_1FC1u32.to_le_bytes());
        buf.extend_from_slice(&1u32.to_le_bytes());
        buf.push(0x55);
        let packets = decode_stream(&trace, &buf).unwrap();
        assert_eq!(packets[0].events[0].name, "video");
        let header_fields = packets[0].header.as_ref().unwrap().as_struct().unwrap();
        assert_eq!(header_fields.get_u64("magic"), Some(0xC1FC_1FC1));
    }

    #[test]
    fn parallel_streams_fail_independently() {
        let trace = TraceSchema::new(
            ByteOrder::LittleEndian,
            None,
            vec![simple_stream(vec![u8_payload_event(0, "sample")])],
        )
        .unwrap();

        // Second stream has an unterminated-looking payload: a string event.
        let mut bad_stream = simple_stream(vec![EventSchema {
            id: 0,
            name: "msg".to_string(),
            context: None,
            payload: Some(TypeNode::String),
        }]);
        bad_stream.id = 0;
        let bad_trace =
            TraceSchema::new(ByteOrder::LittleEndian, None, vec![bad_stream]).unwrap();

        let good = [1u8, 2, 3];
        let results = decode_streams(&trace, &[&good, &good]);
        assert!(results.iter().all(|r| r.is_ok()));

        let unterminated = [b'x', b'y'];
        let results = decode_streams(&bad_trace, &[&unterminated]);
        assert!(matches!(results[0], Err(DecodeError::UnterminatedString { .. })));
    }

    #[test]
    fn zero_bit_event_cannot_stall_a_packet() {
        // Zero-bit integers are legal, so an event can consume nothing at
        // all; the packet must fail instead of looping on it.
        let trace = TraceSchema::new(
            ByteOrder::LittleEndian,
            None,
            vec![simple_stream(vec![EventSchema {
                id: 0,
                name: "empty".to_string(),
                context: None,
                payload: Some(TypeNode::structure(vec![(
                    "nothing",
                    TypeNode::Integer(IntegerType::unsigned(0)),
                )])),
            }])],
        )
        .unwrap();

        let err = decode_stream(&trace, &[0]).unwrap_err();
        assert!(matches!(err, DecodeError::Schema { .. }));
    }

    #[test]
    fn payload_sequence_sized_by_event_context() {
        let stream = StreamSchema {
            events: vec![EventSchema {
                id: 0,
                name: "samples".to_string(),
                context: Some(TypeNode::structure(vec![(
                    "n",
                    TypeNode::Integer(IntegerType::unsigned(8)),
                )])),
                payload: Some(TypeNode::structure(vec![(
                    "data",
                    TypeNode::Sequence {
                        length_field: "n".to_string(),
                        element: Box::new(TypeNode::Integer(IntegerType::unsigned(8))),
                    },
                )])),
            }],
            ..simple_stream(vec![])
        };
        let trace = TraceSchema::new(ByteOrder::LittleEndian, None, vec![stream]).unwrap();

        // n = 2, then the two sequence bytes.
        let packets = decode_stream(&trace, &[2, 7, 9]).unwrap();
        assert_eq!(packets[0].events.len(), 1);
        let payload = packets[0].events[0].payload.as_ref().unwrap().as_struct().unwrap();
        match payload.get("data").unwrap() {
            DecodedValue::Sequence(elems) => {
                assert_eq!(
                    elems,
                    &vec![
                        DecodedValue::Integer(crate::types::IntValue::Unsigned(7)),
                        DecodedValue::Integer(crate::types::IntValue::Unsigned(9)),
                    ]
                );
            }
            other => panic!("expected sequence, got {other:?}"),
        }
    }

    #[test]
    fn empty_buffer_decodes_to_no_packets() {
        let trace = TraceSchema::new(
            ByteOrder::LittleEndian,
            None,
            vec![simple_stream(vec![u8_payload_event(0, "sample")])],
        )
        .unwrap();
        assert_eq!(decode_stream(&trace, &[]).unwrap(), Vec::<Packet>::new());
    }
}
