//! Trace: the schema root. Owns the optional packet-header field class, the environment,
//! clock classes and stream classes, and drives the resolver and validator whenever a
//! stream class is added.
use crate::clock_class::ClockClass;
use crate::error::Error;
use crate::field_class::FieldClass;
use crate::path::Scope;
use crate::resolver::{EnvValue, ScopeRoots};
use crate::stream_class::StreamClass;
use crate::validator;
use fxhash::FxHashMap;
use std::cell::RefCell;
use std::rc::Rc;

/// Read-only snapshot of trace-level schema state, handed to a [`StreamClass`] once it has
/// been added to a trace, so later `add_event_class` calls can resolve references against
/// `trace.packet.header.*` and `env.*` without the stream class holding an owning pointer
/// back to its trace (schema parents own children, never the reverse).
#[derive(Clone, Debug, Default)]
pub struct SchemaContext {
    pub packet_header: Option<FieldClass>,
    pub environment: Rc<FxHashMap<String, EnvValue>>,
}

#[derive(Debug)]
struct TraceInner {
    packet_header: Option<FieldClass>,
    environment: FxHashMap<String, EnvValue>,
    clock_classes: Vec<ClockClass>,
    stream_classes: Vec<StreamClass>,
    frozen: bool,
}

/// Frozen on the first `add_stream_class`.
#[derive(Clone, Debug)]
pub struct Trace(Rc<RefCell<TraceInner>>);

impl PartialEq for Trace {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for Trace {}

impl Default for Trace {
    fn default() -> Self {
        Self::new()
    }
}

impl Trace {
    pub fn new() -> Self {
        Self(Rc::new(RefCell::new(TraceInner {
            packet_header: None,
            environment: FxHashMap::default(),
            clock_classes: Vec::new(),
            stream_classes: Vec::new(),
            frozen: false,
        })))
    }

    pub fn is_frozen(&self) -> bool {
        self.0.borrow().frozen
    }

    pub fn packet_header(&self) -> Option<FieldClass> {
        self.0.borrow().packet_header.clone()
    }

    pub fn set_packet_header(&self, fc: FieldClass) -> Result<(), Error> {
        if self.is_frozen() {
            return Err(Error::Frozen);
        }
        self.0.borrow_mut().packet_header = Some(fc);
        Ok(())
    }

    pub fn set_environment(&self, key: impl Into<String>, value: EnvValue) -> Result<(), Error> {
        if self.is_frozen() {
            return Err(Error::Frozen);
        }
        self.0.borrow_mut().environment.insert(key.into(), value);
        Ok(())
    }

    pub fn environment(&self, key: &str) -> Option<EnvValue> {
        self.0.borrow().environment.get(key).cloned()
    }

    pub fn add_clock_class(&self, cc: ClockClass) -> Result<(), Error> {
        if self.is_frozen() {
            return Err(Error::Frozen);
        }
        let mut inner = self.0.borrow_mut();
        if inner.clock_classes.iter().any(|existing| existing.name() == cc.name()) {
            return Err(Error::Duplicate(cc.name()));
        }
        inner.clock_classes.push(cc);
        Ok(())
    }

    pub fn clock_classes(&self) -> Vec<ClockClass> {
        self.0.borrow().clock_classes.clone()
    }

    pub fn stream_classes(&self) -> Vec<StreamClass> {
        self.0.borrow().stream_classes.clone()
    }

    pub fn stream_class_by_id(&self, id: u64) -> Option<StreamClass> {
        self.0.borrow().stream_classes.iter().find(|sc| sc.id() == id).cloned()
    }

    fn schema_context(&self) -> SchemaContext {
        let inner = self.0.borrow();
        SchemaContext {
            packet_header: inner.packet_header.clone(),
            environment: Rc::new(inner.environment.clone()),
        }
    }

    /// Validates `sc`'s packet-context, event-header and stream-event-context scopes,
    /// freezes both the trace and `sc`, and appends `sc` to the trace's stream classes.
    pub fn add_stream_class(&self, sc: StreamClass) -> Result<(), Error> {
        {
            let inner = self.0.borrow();
            if inner.stream_classes.iter().any(|existing| existing.id() == sc.id()) {
                return Err(Error::Duplicate(sc.id().to_string()));
            }
        }

        let mut roots = ScopeRoots {
            packet_header: self.packet_header(),
            packet_context: sc.packet_context(),
            event_header: sc.event_header(),
            stream_event_context: sc.stream_event_context(),
            event_context: None,
            event_payload: None,
        };
        let environment = self.0.borrow().environment.clone();
        let mut targets = vec![];
        if roots.packet_header.is_some() {
            targets.push(Scope::PacketHeader);
        }
        if roots.packet_context.is_some() {
            targets.push(Scope::PacketContext);
        }
        if roots.event_header.is_some() {
            targets.push(Scope::EventHeader);
        }
        if roots.stream_event_context.is_some() {
            targets.push(Scope::StreamEventContext);
        }
        validator::validate(&mut roots, &environment, &targets)?;

        if let Some(ph) = roots.packet_header.clone() {
            self.0.borrow_mut().packet_header = Some(ph);
        }
        sc.replace_validated_scopes(roots.packet_context, roots.event_header, roots.stream_event_context);
        sc.attach_trace_context(self.schema_context());

        self.0.borrow_mut().frozen = true;
        sc.freeze();
        self.0.borrow_mut().stream_classes.push(sc);
        Ok(())
    }
}
