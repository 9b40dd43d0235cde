//! End-to-end: build a trace/stream-class/event-class schema by hand, encode one packet with
//! two events, and decode it back through [`BifirReader`], against a schema built via this
//! crate's own API rather than a barectf YAML fixture.
use ctf_ir::field_class::{struct_add_field, ByteOrder, Encoding, FieldClass, IntegerBase};
use ctf_ir::{BifirReader, ClockClass, EventClass, SliceMedium, StreamClass, Trace};
use pretty_assertions::assert_eq;
use test_log::test;

fn u32_be() -> FieldClass {
    FieldClass::new_integer(32, false, IntegerBase::default(), Encoding::default(), ByteOrder::BigEndian).unwrap()
}
fn u8_fc() -> FieldClass {
    FieldClass::new_integer(8, false, IntegerBase::default(), Encoding::default(), ByteOrder::default()).unwrap()
}

fn simple_trace() -> Trace {
    let trace = Trace::new();

    let packet_header = FieldClass::new_struct(8);
    struct_add_field(&packet_header, "magic", u32_be()).unwrap();
    struct_add_field(&packet_header, "stream_id", u32_be()).unwrap();
    trace.set_packet_header(packet_header).unwrap();

    let packet_context = FieldClass::new_struct(8);
    struct_add_field(&packet_context, "packet_size", u32_be()).unwrap();
    struct_add_field(&packet_context, "content_size", u32_be()).unwrap();

    let event_header = FieldClass::new_struct(8);
    struct_add_field(&event_header, "id", u8_fc()).unwrap();
    struct_add_field(&event_header, "timestamp", u32_be()).unwrap();

    let sc = StreamClass::new(0);
    sc.set_packet_context(packet_context).unwrap();
    sc.set_event_header(event_header).unwrap();
    sc.set_mapped_clock(ClockClass::new("timer")).unwrap();
    trace.add_stream_class(sc.clone()).unwrap();

    let init_payload = FieldClass::new_struct(8);
    struct_add_field(&init_payload, "code", u8_fc()).unwrap();
    sc.add_event_class(EventClass::new(0, "init", init_payload).unwrap()).unwrap();

    let shutdown_payload = FieldClass::new_struct(8);
    struct_add_field(&shutdown_payload, "code", u8_fc()).unwrap();
    sc.add_event_class(EventClass::new(1, "shutdown", shutdown_payload).unwrap()).unwrap();

    trace
}

/// One packet: header, context, `init(code=0)` at t=0, `shutdown(code=7)` at t=1, padded out
/// to a fixed packet size.
fn encode_packet() -> Vec<u8> {
    const PACKET_SIZE_BITS: u32 = 1024;
    let fixed_bits = 32 * 4; // magic, stream_id, packet_size, content_size
    let event_bits = (8 + 32 + 8) * 2; // (id, timestamp, code) x2
    let content_size_bits = fixed_bits + event_bits;

    let mut bytes = Vec::new();
    bytes.extend_from_slice(&0xC1FC_1FC1u32.to_be_bytes());
    bytes.extend_from_slice(&0u32.to_be_bytes());
    bytes.extend_from_slice(&PACKET_SIZE_BITS.to_be_bytes());
    bytes.extend_from_slice(&content_size_bits.to_be_bytes());

    bytes.push(0); // init event id
    bytes.extend_from_slice(&0u32.to_be_bytes()); // timestamp
    bytes.push(0); // code

    bytes.push(1); // shutdown event id
    bytes.extend_from_slice(&1u32.to_be_bytes()); // timestamp
    bytes.push(7); // code

    bytes.resize((PACKET_SIZE_BITS as usize).div_ceil(8), 0);
    bytes
}

#[test]
fn simple_trace_decodes_both_events() {
    let trace = simple_trace();
    let bytes = encode_packet();
    let mut reader = BifirReader::new(trace, SliceMedium::new(&bytes));

    let header = reader.get_header().unwrap().unwrap();
    assert!(matches!(header.get_field_by_name("stream_id").unwrap().kind(), ctf_ir::FieldValueKind::Unsigned(0)));

    let first = reader.get_next_event().unwrap().unwrap();
    assert_eq!(first.event_class.name().as_str(), "init");

    let second = reader.get_next_event().unwrap().unwrap();
    assert_eq!(second.event_class.name().as_str(), "shutdown");

    assert!(reader.get_next_event().unwrap().is_none());
}
