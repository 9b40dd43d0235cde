//! ctf-ir async events reader example.
//!
//! Drives [`ctf_ir::PacketDecoder`], a `tokio_util::codec::Decoder`, through
//! `tokio_util::codec::FramedRead` over a `tokio::fs::File`. See `demos/events.rs` for why
//! there's no YAML config argument here.
use clap::Parser as ClapParser;
use ctf_ir::field_class::{struct_add_field, ByteOrder, Encoding, FieldClass, IntegerBase};
use ctf_ir::{ClockClass, EventClass, PacketDecoder, StreamClass, Trace};
use std::path::PathBuf;
use tokio::fs::File;
use tokio_stream::StreamExt;
use tokio_util::codec::FramedRead;
use tracing::error;

/// ctf-ir async events reader example
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

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let opts = Opts::parse();
    let stream = File::open(&opts.stream).await.unwrap();
    let trace = demo_trace();
    let decoder = PacketDecoder::new(trace);
    let mut reader = FramedRead::new(stream, decoder);

    while let Some(value) = reader.next().await {
        match value {
            Ok(pkt) => println!("{pkt:#?}"),
            Err(e) => {
                error!("{e}");
                break;
            }
        }
    }
}
