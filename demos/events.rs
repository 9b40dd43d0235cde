//! ctf-ir events reader example.
//!
//! Reads a binary CTF stream and prints every decoded packet. There's no YAML config
//! argument: this crate has no TSDL generator, so the schema a real caller would get from
//! barectf or a metadata parser is built here by hand, the way `tests/simple.rs` does.
use clap::Parser as ClapParser;
use ctf_ir::field_class::{struct_add_field, ByteOrder, Encoding, FieldClass, IntegerBase};
use ctf_ir::{BifirReader, ClockClass, DecodeError, EventClass, ReadMedium, StreamClass, Trace};
use std::{fs, path::PathBuf};
use tracing::error;

/// ctf-ir events reader example
#[derive(Debug, clap::Parser)]
struct Opts {
    /// The binary CTF stream file
    pub stream: PathBuf,
}

fn u32_be() -> FieldClass {
    FieldClass::new_integer(32, false, IntegerBase::default(), Encoding::default(), ByteOrder::BigEndian).unwrap()
}
fn u8_fc() -> FieldClass {
    FieldClass::new_integer(8, false, IntegerBase::default(), Encoding::default(), ByteOrder::default()).unwrap()
}

/// The schema a TSDL/barectf metadata parser would hand this crate: one stream, two event
/// classes, matching `tests/simple.rs`'s fixture.
fn demo_trace() -> Trace {
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

fn main() {
    tracing_subscriber::fmt::init();

    let opts = Opts::parse();
    let stream = fs::File::open(&opts.stream).unwrap();
    let trace = demo_trace();
    let mut reader = BifirReader::new(trace, ReadMedium::new(stream));

    loop {
        match reader.get_next_event() {
            Ok(Some(event)) => println!("{event:#?}"),
            Ok(None) => {
                if let Err(e) = reader.goto_next_packet() {
                    if !matches!(e, DecodeError::Eof) {
                        error!("{e}");
                    }
                    break;
                }
            }
            Err(DecodeError::Eof) => break,
            Err(e) => {
                error!("{e}");
                break;
            }
        }
    }
}
