//! Converts textual CTF-scope path references on sequence/variant field classes into
//! concrete field paths, by visiting the enclosing class graph.
//!
//! This is the hardest algorithmic part of the core: a token/stack/fallback walk over
//! absolute scope-prefixed paths and relative paths alike.
use crate::error::Error;
use crate::field_class::{FieldClass, FieldClassKind};
use crate::path::{FieldPath, Scope, CURRENT_ELEMENT};
use fxhash::FxHashMap;

/// A value held in `trace.environment`, looked up by the `env.` absolute prefix.
#[derive(Clone, Debug, PartialEq)]
pub enum EnvValue {
    Integer(i64),
    String(String),
}

/// What `resolve_reference` found: either a structural path into one of the six scopes, or
/// a constant pulled straight out of the trace environment.
#[derive(Clone, Debug, PartialEq)]
pub enum Resolved {
    Path(FieldPath),
    Env(EnvValue),
}

/// The root field class of each of the six scopes, as known at the point a reference is
/// being resolved. Scopes validated earlier than the one currently being walked are
/// already-resolved copies; the scope currently being walked is its own (still-mutable)
/// working copy.
#[derive(Clone, Debug, Default)]
pub struct ScopeRoots {
    pub packet_header: Option<FieldClass>,
    pub packet_context: Option<FieldClass>,
    pub event_header: Option<FieldClass>,
    pub stream_event_context: Option<FieldClass>,
    pub event_context: Option<FieldClass>,
    pub event_payload: Option<FieldClass>,
}

impl ScopeRoots {
    pub fn get(&self, scope: Scope) -> Option<&FieldClass> {
        match scope {
            Scope::PacketHeader => self.packet_header.as_ref(),
            Scope::PacketContext => self.packet_context.as_ref(),
            Scope::EventHeader => self.event_header.as_ref(),
            Scope::StreamEventContext => self.stream_event_context.as_ref(),
            Scope::EventContext => self.event_context.as_ref(),
            Scope::EventPayload => self.event_payload.as_ref(),
        }
    }

    pub fn set(&mut self, scope: Scope, fc: FieldClass) {
        match scope {
            Scope::PacketHeader => self.packet_header = Some(fc),
            Scope::PacketContext => self.packet_context = Some(fc),
            Scope::EventHeader => self.event_header = Some(fc),
            Scope::StreamEventContext => self.stream_event_context = Some(fc),
            Scope::EventContext => self.event_context = Some(fc),
            Scope::EventPayload => self.event_payload = Some(fc),
        }
    }
}

/// Holds the six scope roots, the scope currently being resolved, and the visitation stack
/// of `(field class, index_in_parent)` frames tracking the path from the current scope root
/// down to the field class under inspection.
pub struct ResolverContext<'a> {
    pub roots: &'a ScopeRoots,
    pub environment: &'a FxHashMap<String, EnvValue>,
    pub current_scope: Scope,
    pub stack: Vec<(FieldClass, i64)>,
}

impl<'a> ResolverContext<'a> {
    pub fn new(roots: &'a ScopeRoots, environment: &'a FxHashMap<String, EnvValue>, current_scope: Scope) -> Self {
        Self {
            roots,
            environment,
            current_scope,
            stack: Vec::new(),
        }
    }
}

enum AbsoluteTarget {
    Env,
    Scope(Scope),
}

/// Prefixes in matching order. Token counts fall out of the slice lengths.
fn absolute_prefixes() -> &'static [(&'static [&'static str], AbsoluteTarget)] {
    &[
        (&["env"], AbsoluteTarget::Env),
        (&["trace", "packet", "header"], AbsoluteTarget::Scope(Scope::PacketHeader)),
        (&["stream", "packet", "context"], AbsoluteTarget::Scope(Scope::PacketContext)),
        (&["stream", "event", "header"], AbsoluteTarget::Scope(Scope::EventHeader)),
        (&["stream", "event", "context"], AbsoluteTarget::Scope(Scope::StreamEventContext)),
        (&["event", "context"], AbsoluteTarget::Scope(Scope::EventContext)),
        (&["event", "fields"], AbsoluteTarget::Scope(Scope::EventPayload)),
    ]
}

fn tokenize(path_text: &str) -> Result<Vec<&str>, Error> {
    let tokens: Vec<&str> = path_text.split('.').collect();
    if tokens.iter().any(|t| t.is_empty()) {
        return Err(Error::InvalidArgument(format!(
            "empty token in path '{path_text}'"
        )));
    }
    Ok(tokens)
}

/// Walks `tokens` from `root_fc`, descending through struct/variant children and
/// transparently hopping into array/sequence elements (pushing `-1` without consuming a
/// token) until the tokens are exhausted. Fails `NotFound` on a missing field, `BadType` if
/// a non-compound field class is reached with tokens remaining.
fn resolve_walk(root_fc: &FieldClass, tokens: &[&str]) -> Result<Vec<i64>, Error> {
    let mut indexes = Vec::new();
    let mut current = root_fc.clone();
    let mut remaining = tokens;

    loop {
        if remaining.is_empty() {
            break;
        }

        let descend_into_element = matches!(
            &*current.kind_ref(),
            FieldClassKind::Array(_) | FieldClassKind::Sequence(_)
        );
        if descend_into_element {
            let element = match &*current.kind_ref() {
                FieldClassKind::Array(a) => a.element.clone(),
                FieldClassKind::Sequence(s) => s.element.clone(),
                _ => unreachable!(),
            };
            indexes.push(CURRENT_ELEMENT);
            current = element;
            continue;
        }

        let token = remaining[0];
        remaining = &remaining[1..];

        let next = {
            let kind = current.kind_ref();
            match &*kind {
                FieldClassKind::Struct(s) => {
                    let idx = s
                        .field_index_by_name(token)
                        .ok_or_else(|| Error::NotFound(token.to_string()))?;
                    (idx as i64, s.fields[idx].fc.clone())
                }
                FieldClassKind::Variant(v) => {
                    let idx = v
                        .selectors
                        .iter()
                        .position(|(l, _)| l.as_str() == token)
                        .ok_or_else(|| Error::NotFound(token.to_string()))?;
                    (idx as i64, v.selectors[idx].1.clone())
                }
                other => {
                    return Err(Error::BadType(format!(
                        "reached a {} field class with tokens remaining (at '{token}')",
                        other.kind_name()
                    )));
                }
            }
        };
        indexes.push(next.0);
        current = next.1;
    }

    Ok(indexes)
}

fn match_absolute_prefix<'t>(tokens: &'t [&'t str]) -> Option<(&'static AbsoluteTarget, &'t [&'t str])> {
    'outer: for (prefix, target) in absolute_prefixes() {
        if tokens.len() < prefix.len() {
            continue;
        }
        for (a, b) in tokens.iter().zip(prefix.iter()) {
            if a != b {
                continue 'outer;
            }
        }
        return Some((target, &tokens[prefix.len()..]));
    }
    None
}

/// Resolves a textual path reference relative to `ctx`, trying an absolute scope prefix,
pub fn resolve_reference(ctx: &ResolverContext<'_>, path_text: &str) -> Result<Resolved, Error> {
    let tokens = tokenize(path_text)?;

    if let Some((target, rest)) = match_absolute_prefix(&tokens) {
        return match target {
            AbsoluteTarget::Env => {
                if rest.len() != 1 {
                    return Err(Error::InvalidArgument(format!(
                        "malformed env. reference '{path_text}'"
                    )));
                }
                ctx.environment
                    .get(rest[0])
                    .cloned()
                    .map(Resolved::Env)
                    .ok_or_else(|| Error::NotFound(path_text.to_string()))
            }
            AbsoluteTarget::Scope(scope) => {
                let root = ctx
                    .roots
                    .get(*scope)
                    .ok_or_else(|| Error::NotFound(format!("scope {scope} has no root field class")))?;
                let indexes = resolve_walk(root, rest)?;
                Ok(Resolved::Path(FieldPath::new(*scope, indexes)))
            }
        };
    }

    // Relative: try each frame of the current scope's visitation stack, innermost first,
    // then the scope root itself (the implicit bottom-most frame, with an empty prefix).
    for i in (0..ctx.stack.len()).rev() {
        let (frame_fc, _) = &ctx.stack[i];
        if let Ok(tail) = resolve_walk(frame_fc, &tokens) {
            let mut indexes: Vec<i64> = ctx.stack[..=i].iter().map(|(_, idx)| *idx).collect();
            indexes.extend(tail);
            return Ok(Resolved::Path(FieldPath::new(ctx.current_scope, indexes)));
        }
    }
    if let Some(root) = ctx.roots.get(ctx.current_scope) {
        if let Ok(indexes) = resolve_walk(root, &tokens) {
            return Ok(Resolved::Path(FieldPath::new(ctx.current_scope, indexes)));
        }
    }

    // Fall back through previous scopes, innermost-to-outermost payload-ward order.
    for scope in Scope::FALLBACK_ORDER {
        if scope == ctx.current_scope {
            continue;
        }
        if let Some(root) = ctx.roots.get(scope) {
            if let Ok(indexes) = resolve_walk(root, &tokens) {
                return Ok(Resolved::Path(FieldPath::new(scope, indexes)));
            }
        }
    }

    Err(Error::NotFound(path_text.to_string()))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::field_class::{struct_add_field, ByteOrder, Encoding, IntegerBase};

    fn u32_fc() -> FieldClass {
        FieldClass::new_integer(32, false, IntegerBase::default(), Encoding::default(), ByteOrder::default()).unwrap()
    }

    fn u8_fc() -> FieldClass {
        FieldClass::new_integer(8, false, IntegerBase::default(), Encoding::default(), ByteOrder::default()).unwrap()
    }

    /// `"stream.packet.context.len"` resolves to `FieldPath(PacketContext, [0])`.
    #[test]
    fn absolute_path_resolves_into_packet_context() {
        let ctx_struct = FieldClass::new_struct(8);
        struct_add_field(&ctx_struct, "len", u32_fc()).unwrap();
        struct_add_field(&ctx_struct, "seq", FieldClass::new_sequence("stream.packet.context.len", u8_fc())).unwrap();

        let mut roots = ScopeRoots::default();
        roots.set(Scope::PacketContext, ctx_struct);
        let env = FxHashMap::default();
        let rctx = ResolverContext::new(&roots, &env, Scope::PacketContext);

        let resolved = resolve_reference(&rctx, "stream.packet.context.len").unwrap();
        assert_eq!(
            resolved,
            Resolved::Path(FieldPath::new(Scope::PacketContext, vec![0]))
        );
    }

    /// Resolving `"choice"` relative, from inside the variant, finds the sibling field
    /// at index 0 of the enclosing struct.
    #[test]
    fn relative_path_resolves_to_sibling_field() {
        let payload = FieldClass::new_struct(8);
        struct_add_field(&payload, "choice", u8_fc()).unwrap();
        let variant = FieldClass::new_variant();
        struct_add_field(&payload, "v", variant.clone()).unwrap();

        let mut roots = ScopeRoots::default();
        roots.set(Scope::EventPayload, payload.clone());
        let env = FxHashMap::default();
        let mut rctx = ResolverContext::new(&roots, &env, Scope::EventPayload);
        // Simulate the depth-first visit having descended from the (implicit, unpushed)
        // root `payload` into its field `v` at index 1.
        rctx.stack.push((variant, 1));

        let resolved = resolve_reference(&rctx, "choice").unwrap();
        assert_eq!(
            resolved,
            Resolved::Path(FieldPath::new(Scope::EventPayload, vec![0]))
        );
    }

    /// An absent scope fails lookup.
    #[test]
    fn absent_scope_fails_lookup() {
        let roots = ScopeRoots::default();
        let env = FxHashMap::default();
        let rctx = ResolverContext::new(&roots, &env, Scope::EventPayload);
        assert!(resolve_reference(&rctx, "trace.packet.header.magic").is_err());
    }

    #[test]
    fn array_and_sequence_hops_emit_current_element_sentinel() {
        let element = FieldClass::new_struct(8);
        struct_add_field(&element, "x", u8_fc()).unwrap();
        let array = FieldClass::new_array(4, element);
        let root = FieldClass::new_struct(8);
        struct_add_field(&root, "arr", array).unwrap();

        let mut roots = ScopeRoots::default();
        roots.set(Scope::EventPayload, root);
        let env = FxHashMap::default();
        let rctx = ResolverContext::new(&roots, &env, Scope::EventPayload);
        let resolved = resolve_reference(&rctx, "event.fields.arr.x").unwrap();
        assert_eq!(
            resolved,
            Resolved::Path(FieldPath::new(Scope::EventPayload, vec![0, CURRENT_ELEMENT, 0]))
        );
    }

    #[test]
    fn env_reference_resolves_to_constant() {
        let roots = ScopeRoots::default();
        let mut env = FxHashMap::default();
        env.insert("count".to_string(), EnvValue::Integer(3));
        let rctx = ResolverContext::new(&roots, &env, Scope::EventPayload);
        assert_eq!(
            resolve_reference(&rctx, "env.count").unwrap(),
            Resolved::Env(EnvValue::Integer(3))
        );
    }
}
