#![doc = include_str!("../README.md")]

pub use crate::bifir::{BifirReader, DecodedEvent, DecodedPacket, PacketDecoder};
pub use crate::clock_class::ClockClass;
pub use crate::error::{DecodeError, DecodeStatus, Error, MediumStatus};
pub use crate::event_class::{AttributeValue, EventClass};
pub use crate::field_class::{ByteOrder, Encoding, FieldClass, FieldClassKind, IntegerBase};
pub use crate::field_value::{FieldValue, FieldValueKind};
pub use crate::medium::{Medium, ReadMedium, SliceMedium};
pub use crate::path::{FieldPath, Scope};
pub use crate::resolver::EnvValue;
pub use crate::stream_class::StreamClass;
pub use crate::trace::Trace;

pub mod bifir;
pub mod bitcursor;
pub mod btr;
pub mod clock_class;
pub mod error;
pub mod event_class;
pub mod field_class;
pub mod field_value;
pub mod medium;
pub mod path;
pub mod resolver;
pub mod stream_class;
pub mod trace;
pub mod validator;
