use derive_more::Display;
use serde::{Deserialize, Serialize};

/// One of the six roles a field class can play in a trace.
///
/// `Env` is deliberately not a member: it never roots a field path, it only
/// names a lookup into `trace.environment` (see [`crate::resolver`]).
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Display, Serialize, Deserialize)]
pub enum Scope {
    #[display("PACKET_HEADER")]
    PacketHeader,
    #[display("PACKET_CONTEXT")]
    PacketContext,
    #[display("EVENT_HEADER")]
    EventHeader,
    #[display("STREAM_EVENT_CONTEXT")]
    StreamEventContext,
    #[display("EVENT_CONTEXT")]
    EventContext,
    #[display("EVENT_PAYLOAD")]
    EventPayload,
}

impl Scope {
    /// Fixed fallback order used by the resolver when a relative reference escapes every
    /// frame of the current scope's visitation stack.
    pub const FALLBACK_ORDER: [Scope; 6] = [
        Scope::EventPayload,
        Scope::EventContext,
        Scope::StreamEventContext,
        Scope::EventHeader,
        Scope::PacketContext,
        Scope::PacketHeader,
    ];

    /// On-wire layout order: the order in which the validator processes scopes, so that a
    /// later scope's resolver can see the already-validated field classes of earlier ones.
    pub const CANONICAL_ORDER: [Scope; 6] = [
        Scope::PacketHeader,
        Scope::PacketContext,
        Scope::EventHeader,
        Scope::StreamEventContext,
        Scope::EventContext,
        Scope::EventPayload,
    ];
}

/// Sentinel index meaning "the current element of an array or sequence".
pub const CURRENT_ELEMENT: i64 = -1;

/// Structural reference from a scope root down to a field class: `(root_scope, indexes)`.
///
/// Immutable after construction, except while the resolver is assembling one index at a
/// time (see [`crate::resolver::ResolverContext`]).
#[derive(Clone, Eq, PartialEq, Hash, Debug, Serialize, Deserialize)]
pub struct FieldPath {
    root: Scope,
    indexes: Vec<i64>,
}

impl FieldPath {
    pub fn new(root: Scope, indexes: Vec<i64>) -> Self {
        Self { root, indexes }
    }

    pub fn root(&self) -> Scope {
        self.root
    }

    pub fn indexes(&self) -> &[i64] {
        &self.indexes
    }

    /// `[scope, i0, i1, ...]` bracket notation.
    pub fn string_form(&self) -> String {
        let mut s = format!("[{}", self.root);
        for idx in &self.indexes {
            s.push_str(&format!(", {idx}"));
        }
        s.push(']');
        s
    }
}

impl std::fmt::Display for FieldPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.string_form())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn string_form_renders_bracket_notation() {
        let p = FieldPath::new(Scope::PacketContext, vec![0, -1, 2]);
        assert_eq!(p.string_form(), "[PACKET_CONTEXT, 0, -1, 2]");
    }

    #[test]
    fn equality_compares_scope_then_indexes() {
        let a = FieldPath::new(Scope::EventPayload, vec![0, 1]);
        let b = FieldPath::new(Scope::EventPayload, vec![0, 1]);
        let c = FieldPath::new(Scope::EventPayload, vec![0, 2]);
        let d = FieldPath::new(Scope::EventContext, vec![0, 1]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }
}
