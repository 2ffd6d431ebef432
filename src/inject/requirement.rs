// ============================================================================
// spark-context - Requirements
// What an injected field, method or constructor parameter asks for
// ============================================================================

use std::any::{Any, TypeId};
use std::rc::Rc;

use tracing::warn;

use crate::core::error::InjectionError;
use crate::core::types::{Key, Value};
use crate::inject::binding::make_for;
use crate::primitives::scope::Context;
use crate::reactivity::batching::untrack;

/// One dependency of an injected member.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Requirement {
    key: Key,
    optional: bool,
    active: bool,
    ty: Option<TypeId>,
}

impl Requirement {
    /// Requirement on a named key. Accepts a value of any type.
    pub fn named(key: impl Into<Key>) -> Self {
        Self {
            key: key.into(),
            optional: false,
            active: false,
            ty: None,
        }
    }

    /// Requirement on the raw type key of `T`, accepting only a `T`.
    pub fn of<T: Any>() -> Self {
        Self::named(Key::of::<T>()).typed::<T>()
    }

    /// Resolve to absent instead of failing when nothing is found.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Resolve from the active leaf of the tracked context.
    pub fn active(mut self) -> Self {
        self.active = true;
        self
    }

    /// Only accept values whose concrete type is `T`.
    pub fn typed<T: Any>(mut self) -> Self {
        self.ty = Some(TypeId::of::<T>());
        self
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    fn accepts(&self, value: &Value) -> bool {
        self.ty.is_none_or(|ty| Any::type_id(&**value) == ty)
    }
}

// =============================================================================
// ARGS
// =============================================================================

/// Resolved values, in declaration order. Absent optional requirements are
/// `None`.
#[derive(Clone, Default)]
pub struct Args {
    values: Vec<Option<Value>>,
}

impl Args {
    pub(crate) fn new(values: Vec<Option<Value>>) -> Self {
        Self { values }
    }

    /// All-absent arguments, passed to methods when an object is uninjected.
    pub(crate) fn absent(len: usize) -> Self {
        Self {
            values: vec![None; len],
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn value(&self, index: usize) -> Option<&Value> {
        self.values.get(index)?.as_ref()
    }

    /// Argument `index` downcast to `T`.
    pub fn get<T: Any>(&self, index: usize) -> Option<Rc<T>> {
        self.value(index)?.clone().downcast::<T>().ok()
    }

    pub(crate) fn into_values(self) -> Vec<Option<Value>> {
        self.values
    }
}

// =============================================================================
// RESOLUTION
// =============================================================================

fn resolve_requirement(
    requirement: &Requirement,
    tracked: Context,
    static_ctx: Option<Context>,
) -> Result<Option<Value>, InjectionError> {
    let from_tracked = if requirement.active {
        tracked.ensure_readable()?;
        tracked.get_active_leaf().try_get(&requirement.key)?
    } else {
        tracked.try_get(&requirement.key)?
    };

    let value = from_tracked
        .or_else(|| {
            // Static contexts are never tracked, and a disposed one is
            // simply empty
            static_ctx.and_then(|s| untrack(|| s.try_get(&requirement.key)).ok().flatten())
        })
        .or_else(|| {
            (requirement.key == Key::of::<Context>()).then(|| Rc::new(tracked) as Value)
        });

    Ok(value.filter(|value| {
        let accepted = requirement.accepts(value);
        if !accepted {
            warn!(key = %requirement.key, "resolved value has another type");
        }
        accepted
    }))
}

/// Resolve every requirement against `tracked` (then `static_ctx`).
///
/// `extra` fills any requirement left unresolved whose declared type
/// matches it, then a binding for the declared type gets a chance. A
/// mandatory requirement that stays unresolved fails.
pub(crate) fn resolve_all(
    requirements: &[Requirement],
    tracked: Context,
    static_ctx: Option<Context>,
    extra: Option<&Value>,
    target: &'static str,
) -> Result<Args, InjectionError> {
    let mut values = Vec::with_capacity(requirements.len());

    for requirement in requirements {
        let mut value = resolve_requirement(requirement, tracked, static_ctx)?;

        if value.is_none() {
            if let Some(extra) = extra {
                if requirement.ty.is_some() && requirement.accepts(extra) {
                    value = Some(extra.clone());
                }
            }
        }

        if value.is_none() {
            if let Some(ty) = requirement.ty {
                value = untrack(|| make_for(ty, &requirement.key, tracked, static_ctx));
            }
        }

        if value.is_none() && !requirement.optional {
            return Err(InjectionError::Unresolved {
                target,
                key: requirement.key.clone(),
            });
        }
        values.push(value);
    }

    Ok(Args::new(values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn mandatory_requirements_fail_loudly() {
        let ctx = Context::create();
        let result = resolve_all(&[Requirement::named("missing")], ctx, None, None, "Target");
        assert_eq!(
            result.err(),
            Some(InjectionError::Unresolved {
                target: "Target",
                key: Key::from("missing"),
            })
        );
    }

    #[test]
    fn optional_requirements_resolve_to_absent() {
        let ctx = Context::create();
        let args = resolve_all(
            &[Requirement::named("missing").optional()],
            ctx,
            None,
            None,
            "Target",
        )
        .unwrap();
        assert_eq!(args.len(), 1);
        assert!(args.value(0).is_none());
    }

    #[test]
    fn static_context_fills_gaps() {
        let tracked = Context::create();
        let fallback = Context::create();
        fallback.set("x", 5i32).unwrap();

        let required = [Requirement::named("x")];
        let args = resolve_all(&required, tracked, Some(fallback), None, "T").unwrap();
        assert_eq!(args.get::<i32>(0).map(|v| *v), Some(5));

        fallback.dispose();
        assert!(resolve_all(&required, tracked, Some(fallback), None, "T").is_err());
    }

    #[test]
    fn type_checked_requirements_reject_other_types() {
        let ctx = Context::create();
        ctx.set("x", 1u8).unwrap();
        let result = resolve_all(&[Requirement::named("x").typed::<i32>()], ctx, None, None, "T");
        assert!(result.is_err());
    }

    #[test]
    fn extra_argument_matches_by_type() {
        let ctx = Context::create();
        let extra: Value = Rc::new(String::from("event"));
        let args = resolve_all(
            &[Requirement::of::<String>()],
            ctx,
            None,
            Some(&extra),
            "T",
        )
        .unwrap();
        assert_eq!(args.get::<String>(0).as_deref().map(String::as_str), Some("event"));
    }

    #[test]
    fn context_resolves_to_itself() {
        let ctx = Context::create();
        let args = resolve_all(&[Requirement::of::<Context>()], ctx, None, None, "T").unwrap();
        assert_eq!(args.get::<Context>(0).map(|c| *c), Some(ctx));
    }
}
