//! Stream classes: the scopes shared by every event on a stream (packet-context,
//! event-header, stream-event-context), plus the event classes themselves and the clock
//! mapped to the stream's default timestamp.
use crate::clock_class::ClockClass;
use crate::error::Error;
use crate::event_class::EventClass;
use crate::field_class::FieldClass;
use crate::path::Scope;
use crate::resolver::ScopeRoots;
use crate::trace::SchemaContext;
use crate::validator;
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Debug)]
struct StreamClassInner {
    id: u64,
    packet_context: Option<FieldClass>,
    event_header: Option<FieldClass>,
    stream_event_context: Option<FieldClass>,
    event_classes: Vec<EventClass>,
    mapped_clock: Option<ClockClass>,
    trace_context: Option<SchemaContext>,
    frozen: bool,
}

/// A schema owner. Frozen by `trace.add_stream_class(sc)`, after which it can still accept
/// new event classes.
#[derive(Clone, Debug)]
pub struct StreamClass(Rc<RefCell<StreamClassInner>>);

impl PartialEq for StreamClass {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for StreamClass {}

impl StreamClass {
    pub fn new(id: u64) -> Self {
        Self(Rc::new(RefCell::new(StreamClassInner {
            id,
            packet_context: None,
            event_header: None,
            stream_event_context: None,
            event_classes: Vec::new(),
            mapped_clock: None,
            trace_context: None,
            frozen: false,
        })))
    }

    pub fn id(&self) -> u64 {
        self.0.borrow().id
    }

    pub fn is_frozen(&self) -> bool {
        self.0.borrow().frozen
    }

    pub fn packet_context(&self) -> Option<FieldClass> {
        self.0.borrow().packet_context.clone()
    }

    pub fn event_header(&self) -> Option<FieldClass> {
        self.0.borrow().event_header.clone()
    }

    pub fn stream_event_context(&self) -> Option<FieldClass> {
        self.0.borrow().stream_event_context.clone()
    }

    pub fn set_packet_context(&self, fc: FieldClass) -> Result<(), Error> {
        if self.is_frozen() {
            return Err(Error::Frozen);
        }
        self.0.borrow_mut().packet_context = Some(fc);
        Ok(())
    }

    /// Every event class relies on the stream having an event header: an event class
    /// cannot be added before this is set.
    pub fn set_event_header(&self, fc: FieldClass) -> Result<(), Error> {
        if self.is_frozen() {
            return Err(Error::Frozen);
        }
        self.0.borrow_mut().event_header = Some(fc);
        Ok(())
    }

    pub fn set_stream_event_context(&self, fc: FieldClass) -> Result<(), Error> {
        if self.is_frozen() {
            return Err(Error::Frozen);
        }
        self.0.borrow_mut().stream_event_context = Some(fc);
        Ok(())
    }

    pub fn mapped_clock(&self) -> Option<ClockClass> {
        self.0.borrow().mapped_clock.clone()
    }

    pub fn set_mapped_clock(&self, cc: ClockClass) -> Result<(), Error> {
        if self.is_frozen() {
            return Err(Error::Frozen);
        }
        self.0.borrow_mut().mapped_clock = Some(cc);
        Ok(())
    }

    pub fn event_classes(&self) -> Vec<EventClass> {
        self.0.borrow().event_classes.clone()
    }

    pub fn event_class_by_id(&self, id: u64) -> Option<EventClass> {
        self.0.borrow().event_classes.iter().find(|ec| ec.id() == id).cloned()
    }

    pub(crate) fn replace_validated_scopes(
        &self,
        packet_context: Option<FieldClass>,
        event_header: Option<FieldClass>,
        stream_event_context: Option<FieldClass>,
    ) {
        let mut inner = self.0.borrow_mut();
        inner.packet_context = packet_context;
        inner.event_header = event_header;
        inner.stream_event_context = stream_event_context;
    }

    pub(crate) fn attach_trace_context(&self, ctx: SchemaContext) {
        self.0.borrow_mut().trace_context = Some(ctx);
    }

    pub(crate) fn freeze(&self) {
        self.0.borrow_mut().frozen = true;
        if let Some(pc) = self.packet_context() {
            pc.freeze();
        }
        if let Some(eh) = self.event_header() {
            eh.freeze();
        }
        if let Some(sec) = self.stream_event_context() {
            sec.freeze();
        }
    }

    /// Resolves and validates `ec`'s context and payload scopes against this stream's
    /// (already-validated) packet-context, event-header and stream-event-context, plus the
    /// owning trace's packet-header and environment, then freezes `ec` and appends it.
    pub fn add_event_class(&self, ec: EventClass) -> Result<(), Error> {
        if self.event_header().is_none() {
            return Err(Error::InvalidArgument(
                "stream class must have an event header before events can be added".into(),
            ));
        }
        {
            let inner = self.0.borrow();
            if inner.event_classes.iter().any(|existing| existing.id() == ec.id()) {
                return Err(Error::Duplicate(ec.id().to_string()));
            }
            if inner.event_classes.iter().any(|existing| existing.name() == ec.name()) {
                return Err(Error::Duplicate(ec.name().to_string()));
            }
        }

        let trace_context = self.0.borrow().trace_context.clone().unwrap_or_default();
        let mut roots = ScopeRoots {
            packet_header: trace_context.packet_header.clone(),
            packet_context: self.packet_context(),
            event_header: self.event_header(),
            stream_event_context: self.stream_event_context(),
            event_context: ec.context(),
            event_payload: Some(ec.payload()),
        };
        let mut targets = vec![];
        if roots.event_context.is_some() {
            targets.push(Scope::EventContext);
        }
        targets.push(Scope::EventPayload);

        validator::validate(&mut roots, &trace_context.environment, &targets)?;

        ec.replace_validated_scopes(roots.event_context, roots.event_payload.expect("payload always set"));
        ec.freeze();
        self.0.borrow_mut().event_classes.push(ec);
        Ok(())
    }
}
