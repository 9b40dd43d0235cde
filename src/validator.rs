//! Cross-checks the class graphs of all six scopes and marks them valid.
//!
//! Runs the resolver ([`crate::resolver`]) over each scope in on-wire layout order, then
//! produces a new, validated copy of each scope's field class and swaps the owner's
//! reference in one step, so a failed validation never leaves a partially-mutated graph
//! observable.
use crate::error::Error;
use crate::field_class::{FieldClass, FieldClassKind};
use crate::path::{FieldPath, Scope, CURRENT_ELEMENT};
use crate::resolver::{resolve_reference, EnvValue, Resolved, ResolverContext, ScopeRoots};
use fxhash::FxHashMap;

/// Walks `indexes` from `root`, descending through struct/variant children; a `-1` index
/// means "descend into the array/sequence element". Used to fetch the field class a
/// resolved [`FieldPath`] points at, to check the resolver's post-conditions.
fn fetch_at_path(roots: &ScopeRoots, path: &FieldPath) -> Option<FieldClass> {
    let mut current = roots.get(path.root())?.clone();
    for &idx in path.indexes() {
        let next = match &*current.kind_ref() {
            FieldClassKind::Struct(s) => s.fields.get(idx as usize)?.fc.clone(),
            FieldClassKind::Variant(v) => v.selectors.get(idx as usize)?.1.clone(),
            FieldClassKind::Array(a) if idx == CURRENT_ELEMENT => a.element.clone(),
            FieldClassKind::Sequence(s) if idx == CURRENT_ELEMENT => s.element.clone(),
            _ => return None,
        };
        current = next;
    }
    Some(current)
}

fn is_unsigned_integer(fc: &FieldClass) -> bool {
    matches!(&*fc.kind_ref(), FieldClassKind::Integer(i) if !i.signed)
}

/// Depth-first visit of `fc`, resolving any `Sequence`/`Variant` found along the way and
/// recursing into children. Sequence and variant nodes are resolved when first visited,
/// before their children, so a variant's resolved tag path is established before anything
/// that depends on it is decoded.
fn visit(fc: &FieldClass, ctx: &mut ResolverContext<'_>) -> Result<(), Error> {
    let kind_tag = fc.kind_ref().kind_name();
    match kind_tag {
        "struct" => {
            let children: Vec<FieldClass> = match &*fc.kind_ref() {
                FieldClassKind::Struct(s) => s.fields.iter().map(|f| f.fc.clone()).collect(),
                _ => unreachable!(),
            };
            for (i, child) in children.into_iter().enumerate() {
                ctx.stack.push((child.clone(), i as i64));
                visit(&child, ctx)?;
                ctx.stack.pop();
            }
        }
        "variant" => {
            let tag_name = match &*fc.kind_ref() {
                FieldClassKind::Variant(v) => v.tag_name.clone(),
                _ => unreachable!(),
            };
            let tag_name = tag_name.ok_or_else(|| {
                Error::ValidationFailed("variant has no tag reference set".into())
            })?;

            let resolved = resolve_reference(ctx, &tag_name)?;
            let Resolved::Path(path) = resolved else {
                return Err(Error::ValidationFailed(
                    "variant tag must resolve to a field path, not an environment constant".into(),
                ));
            };
            let tag_enum_fc = fetch_at_path(ctx.roots, &path)
                .ok_or_else(|| Error::ValidationFailed("variant tag path does not resolve inside the schema".into()))?;
            let mapping_labels: Vec<_> = match &*tag_enum_fc.kind_ref() {
                FieldClassKind::Enumeration(e) => e.mappings.iter().map(|(l, _)| *l).collect(),
                _ => {
                    return Err(Error::ValidationFailed(
                        "variant tag must reference an enumeration field class".into(),
                    ))
                }
            };

            let selectors: Vec<_> = match &*fc.kind_ref() {
                FieldClassKind::Variant(v) => v.selectors.clone(),
                _ => unreachable!(),
            };
            for (label, _) in &selectors {
                if !mapping_labels.contains(label) {
                    return Err(Error::ValidationFailed(format!(
                        "variant selector label '{label}' is not a label of the resolved enumeration"
                    )));
                }
            }

            {
                let mut kind = fc.kind_mut()?;
                if let FieldClassKind::Variant(v) = &mut *kind {
                    v.resolved_tag_field_path = Some(path);
                    v.resolved_tag_enum_fc = Some(tag_enum_fc);
                }
            }

            for (i, (_, child)) in selectors.into_iter().enumerate() {
                ctx.stack.push((child.clone(), i as i64));
                visit(&child, ctx)?;
                ctx.stack.pop();
            }
        }
        "array" => {
            let element = match &*fc.kind_ref() {
                FieldClassKind::Array(a) => a.element.clone(),
                _ => unreachable!(),
            };
            ctx.stack.push((element.clone(), CURRENT_ELEMENT));
            visit(&element, ctx)?;
            ctx.stack.pop();
        }
        "sequence" => {
            let length_field_name = match &*fc.kind_ref() {
                FieldClassKind::Sequence(s) => s.length_field_name.clone(),
                _ => unreachable!(),
            };

            let resolved = resolve_reference(ctx, &length_field_name)?;
            let path = match resolved {
                Resolved::Path(path) => {
                    let target = fetch_at_path(ctx.roots, &path).ok_or_else(|| {
                        Error::ValidationFailed("sequence length path does not resolve inside the schema".into())
                    })?;
                    if !is_unsigned_integer(&target) {
                        return Err(Error::ValidationFailed(
                            "sequence length reference must resolve to an unsigned integer".into(),
                        ));
                    }
                    Some(path)
                }
                // An `env.` constant length is a valid resolve with no field path.
                Resolved::Env(EnvValue::Integer(_)) => None,
                Resolved::Env(EnvValue::String(_)) => {
                    return Err(Error::ValidationFailed(
                        "sequence length environment constant must be an integer".into(),
                    ))
                }
            };

            {
                let mut kind = fc.kind_mut()?;
                if let FieldClassKind::Sequence(s) = &mut *kind {
                    s.resolved_length_field_path = path;
                }
            }

            let element = match &*fc.kind_ref() {
                FieldClassKind::Sequence(s) => s.element.clone(),
                _ => unreachable!(),
            };
            ctx.stack.push((element.clone(), CURRENT_ELEMENT));
            visit(&element, ctx)?;
            ctx.stack.pop();
        }
        _ => {
            // Integer, Float, String, Enumeration, Unknown: leaves, nothing further to resolve.
        }
    }
    Ok(())
}

/// Validates (and resolves) every scope named in `targets`, in on-wire layout order, against
/// `roots` and `environment`. On success, each validated scope's root in `roots` is replaced
/// by its validated copy; on the first failure, `roots` is left completely untouched.
pub fn validate(
    roots: &mut ScopeRoots,
    environment: &FxHashMap<String, EnvValue>,
    targets: &[Scope],
) -> Result<(), Error> {
    let mut working = roots.clone();
    for scope in Scope::CANONICAL_ORDER {
        if !targets.contains(&scope) {
            continue;
        }
        let Some(original) = roots.get(scope).cloned() else {
            continue;
        };
        let copy = original.copy();
        working.set(scope, copy.clone());

        let mut ctx = ResolverContext::new(&working, environment, scope);
        visit(&copy, &mut ctx)?;

        working.set(scope, copy);
    }

    // All scopes validated successfully: swap every target's root in one step.
    for scope in Scope::CANONICAL_ORDER {
        if !targets.contains(&scope) {
            continue;
        }
        if let Some(validated) = working.get(scope).cloned() {
            roots.set(scope, validated);
        }
    }
    Ok(())
}
