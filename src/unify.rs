//! Structural unification over persistent contexts.

use std::collections::HashSet;
use std::sync::Arc;

use smallvec::{smallvec, SmallVec};

use crate::context::Context;
use crate::term::{Struct, Term};

/// Unifies `left` and `right` without the occurs check.
///
/// Returns the extended context, or `None` when the terms do not unify.
/// Existing terms and contexts are never modified.
#[must_use]
pub fn unify<'s>(ctx: Context<'s>, left: &Term, right: &Term) -> Option<Context<'s>> {
    Unifier::new().unify(ctx, left, right)
}

/// Unifies `left` and `right`, refusing to bind a variable to a term that
/// contains it.
#[must_use]
pub fn unify_with_occurs_check<'s>(
    ctx: Context<'s>,
    left: &Term,
    right: &Term,
) -> Option<Context<'s>> {
    Unifier::with_occurs_check().unify(ctx, left, right)
}

/// Unification settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Unifier {
    occurs_check: bool,
}

impl Unifier {
    /// A unifier without the occurs check
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A unifier that performs the occurs check
    #[must_use]
    pub fn with_occurs_check() -> Self {
        Self { occurs_check: true }
    }

    /// Whether the occurs check is enabled.
    #[must_use]
    pub fn occurs_check(&self) -> bool {
        self.occurs_check
    }

    /// Unifies `left` and `right` under `ctx`.
    ///
    /// Pairs are processed from an explicit work-list so deep terms (long
    /// lists) do not recurse natively. Struct arguments are visited left to
    /// right and the context is threaded through each pair.
    #[must_use]
    pub fn unify<'s>(&self, ctx: Context<'s>, left: &Term, right: &Term) -> Option<Context<'s>> {
        let mut ctx = ctx;
        let mut pending: SmallVec<[(Term, Term); 16]> = smallvec![(left.clone(), right.clone())];
        // Struct pairs reached through a binding. Meeting one again means a
        // cyclic binding and the pair is assumed equal.
        let mut entered: HashSet<(*const Struct, *const Struct)> = HashSet::new();

        while let Some((raw_left, raw_right)) = pending.pop() {
            if raw_left.same_ref(&raw_right) {
                continue;
            }
            let left = ctx.deref(&raw_left);
            let right = ctx.deref(&raw_right);

            match (&left, &right) {
                (Term::Var(x), Term::Var(y)) => {
                    if x.is_anonymous() || y.is_anonymous() || x == y {
                        continue;
                    }
                    ctx = ctx.bind(x, right.clone());
                }
                (Term::Var(var), other) | (other, Term::Var(var)) => {
                    if var.is_anonymous() {
                        continue;
                    }
                    if self.occurs_check && ctx.occurs(var, other) {
                        return None;
                    }
                    ctx = ctx.bind(var, other.clone());
                }
                (Term::Struct(a), Term::Struct(b)) => {
                    if Arc::ptr_eq(a, b) {
                        continue;
                    }
                    if !a.same_indicator(b) {
                        return None;
                    }
                    let through_binding =
                        matches!(raw_left, Term::Var(_)) || matches!(raw_right, Term::Var(_));
                    if !self.occurs_check
                        && through_binding
                        && !entered.insert((Arc::as_ptr(a), Arc::as_ptr(b)))
                    {
                        continue;
                    }
                    pending.extend(a.args().iter().cloned().zip(b.args().iter().cloned()).rev());
                }
                (Term::Atom(a), Term::Atom(b)) => {
                    if a != b {
                        return None;
                    }
                }
                (Term::Number(a), Term::Number(b)) => {
                    if a != b {
                        return None;
                    }
                }
                _ => return None,
            }
        }

        Some(ctx)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use proptest::prelude::*;

    use super::*;
    use crate::context::BindingStore;
    use crate::term::Var;

    fn var(name: &str, index: usize) -> Term {
        Term::Var(Var::indexed(Arc::from(name), index))
    }

    #[test]
    fn test_identical_terms_unify_without_bindings() {
        let store = BindingStore::new();
        let ctx = store.context();
        let term = Term::compound("f", vec![Term::atom("a"), Term::int(1)]);
        let result = unify(ctx, &term, &term.clone()).unwrap();
        assert_eq!(result.stamp(), ctx.stamp());
        assert!(store.is_empty());
    }

    #[test]
    fn test_variable_binds_to_either_side() {
        let store = BindingStore::new();
        let (ctx, _) = store.context().allocate(1);
        let x = var("X", 0);

        let left = unify(ctx, &x, &Term::int(2)).unwrap();
        let right = unify(ctx, &Term::int(2), &x).unwrap();
        assert_eq!(left.reify(&x), Term::int(2));
        assert_eq!(right.reify(&x), Term::int(2));
    }

    #[test]
    fn test_struct_arguments_thread_the_context() {
        let store = BindingStore::new();
        let (ctx, _) = store.context().allocate(2);
        let (x, y) = (var("X", 0), var("Y", 1));

        let pattern = Term::compound("f", vec![x.clone(), x.clone(), y.clone()]);
        let ok = Term::compound("f", vec![Term::atom("a"), Term::atom("a"), Term::atom("b")]);
        let clash = Term::compound("f", vec![Term::atom("a"), Term::atom("c"), Term::atom("b")]);

        let ctx2 = unify(ctx, &pattern, &ok).unwrap();
        assert_eq!(ctx2.reify(&x), Term::atom("a"));
        assert_eq!(ctx2.reify(&y), Term::atom("b"));
        assert!(unify(ctx, &pattern, &clash).is_none(), "X cannot be both a and c");
    }

    #[test]
    fn test_indicator_mismatch_fails() {
        let store = BindingStore::new();
        let ctx = store.context();
        let f1 = Term::compound("f", vec![Term::atom("a")]);
        let f2 = Term::compound("f", vec![Term::atom("a"), Term::atom("b")]);
        let g1 = Term::compound("g", vec![Term::atom("a")]);
        assert!(unify(ctx, &f1, &f2).is_none());
        assert!(unify(ctx, &f1, &g1).is_none());
    }

    #[test]
    fn test_constants() {
        let store = BindingStore::new();
        let ctx = store.context();
        assert!(unify(ctx, &Term::int(1), &Term::int(1)).is_some());
        assert!(unify(ctx, &Term::int(1), &Term::int(2)).is_none());
        assert!(unify(ctx, &Term::int(1), &Term::float(1.0)).is_none());
        assert!(unify(ctx, &Term::atom("a"), &Term::atom("a")).is_some());
        assert!(unify(ctx, &Term::atom("a"), &Term::atom("b")).is_none());
        assert!(unify(ctx, &Term::atom("a"), &Term::int(1)).is_none());
        assert!(unify(ctx, &Term::atom("f"), &Term::compound("f", vec![])).is_none());
    }

    #[test]
    fn test_anonymous_variable_matches_anything_without_binding() {
        let store = BindingStore::new();
        let (ctx, _) = store.context().allocate(1);
        let x = var("X", 0);
        let result = unify(ctx, &Term::anonymous(), &Term::atom("a")).unwrap();
        assert!(store.is_empty());
        let result = unify(result, &x, &Term::anonymous()).unwrap();
        assert!(store.is_empty(), "Unifying with _ must not record a binding");
        assert_eq!(result.reify(&x), x);
    }

    #[test]
    fn test_variable_to_variable_aliasing() {
        let store = BindingStore::new();
        let (ctx, _) = store.context().allocate(2);
        let (x, y) = (var("X", 0), var("Y", 1));
        let ctx = unify(ctx, &x, &y).unwrap();
        let ctx = unify(ctx, &y, &Term::atom("z")).unwrap();
        assert_eq!(ctx.reify(&x), Term::atom("z"));
    }

    #[test]
    fn test_bound_variable_is_compared_by_value() {
        let store = BindingStore::new();
        let (ctx, _) = store.context().allocate(1);
        let x = var("X", 0);
        let ctx = unify(ctx, &x, &Term::atom("a")).unwrap();
        assert!(unify(ctx, &x, &Term::atom("a")).is_some());
        assert!(unify(ctx, &x, &Term::atom("b")).is_none());
    }

    #[test]
    fn test_occurs_check_is_opt_in() {
        let store = BindingStore::new();
        let (ctx, _) = store.context().allocate(1);
        let x = var("X", 0);
        let cyclic = Term::compound("f", vec![x.clone()]);

        assert!(unify(ctx, &x, &cyclic).is_some(), "Default unification skips the occurs check");
        assert!(unify_with_occurs_check(ctx, &x, &cyclic).is_none());
        let ground = Term::compound("f", vec![Term::atom("a")]);
        assert!(unify_with_occurs_check(ctx, &x, &ground).is_some());
    }

    #[test]
    fn test_long_lists_unify_iteratively() {
        let store = BindingStore::new();
        let (ctx, _) = store.context().allocate(1);
        let items: Vec<Term> = (0..2_000).map(Term::int).collect();
        let mut open: Vec<Term> = items.clone();
        open[1_500] = var("X", 0);

        let ctx = unify(ctx, &Term::list(items), &Term::list(open)).unwrap();
        assert_eq!(ctx.reify(&var("X", 0)), Term::int(1_500));
    }

    #[test]
    fn test_cyclic_bindings_unify_without_looping() {
        let store = BindingStore::new();
        let (ctx, _) = store.context().allocate(2);
        let (x, y) = (var("X", 0), var("Y", 1));
        let ctx = unify(ctx, &x, &Term::compound("f", vec![x.clone()])).unwrap();

        let twice = Term::compound("f", vec![Term::compound("f", vec![y.clone()])]);
        let f_cycle = unify(ctx, &y, &twice).unwrap();
        assert!(unify(f_cycle, &x, &y).is_some(), "Both denote the infinite term f(f(...))");

        let g_cycle = unify(ctx, &y, &Term::compound("g", vec![y.clone()])).unwrap();
        assert!(unify(g_cycle, &x, &y).is_none());
        assert!(Unifier::new().unify(g_cycle, &y, &y).is_some());
        assert!(!Unifier::new().occurs_check());
        assert!(Unifier::with_occurs_check().occurs_check());
    }

    const VARS: usize = 4;

    fn ground_term() -> impl Strategy<Value = Term> {
        let leaf = prop_oneof![
            prop::sample::select(vec!["a", "b", "c"]).prop_map(Term::atom),
            (0i64..3).prop_map(Term::int),
        ];
        leaf.prop_recursive(3, 16, 3, |inner| {
            (prop::sample::select(vec!["f", "g"]), prop::collection::vec(inner, 1..3))
                .prop_map(|(functor, args)| Term::compound(functor, args))
        })
    }

    fn open_term() -> impl Strategy<Value = Term> {
        let leaf = prop_oneof![
            prop::sample::select(vec!["a", "b", "c"]).prop_map(Term::atom),
            (0i64..3).prop_map(Term::int),
            (0..VARS).prop_map(|index| var(&format!("V{index}"), index)),
        ];
        leaf.prop_recursive(3, 16, 3, |inner| {
            (prop::sample::select(vec!["f", "g"]), prop::collection::vec(inner, 1..3))
                .prop_map(|(functor, args)| Term::compound(functor, args))
        })
    }

    proptest! {
        #[test]
        fn prop_unification_is_symmetric(a in open_term(), b in ground_term()) {
            let store = BindingStore::new();
            let (ctx, _) = store.context().allocate(VARS);
            let forward = unify(ctx, &a, &b);
            let backward = unify(ctx, &b, &a);
            prop_assert_eq!(forward.is_some(), backward.is_some());
            if let (Some(forward), Some(backward)) = (forward, backward) {
                prop_assert_eq!(forward.reify(&a), forward.reify(&b));
                prop_assert_eq!(backward.reify(&a), backward.reify(&b));
            }
        }

        #[test]
        fn prop_open_unification_succeeds_symmetrically(a in open_term(), b in open_term()) {
            // Bindings may be cyclic here, so only success is compared.
            let store = BindingStore::new();
            let (ctx, _) = store.context().allocate(VARS);
            prop_assert_eq!(unify(ctx, &a, &b).is_some(), unify(ctx, &b, &a).is_some());
        }

        #[test]
        fn prop_checked_unification_is_symmetric(a in open_term(), b in open_term()) {
            let store = BindingStore::new();
            let (ctx, _) = store.context().allocate(VARS);
            let forward = unify_with_occurs_check(ctx, &a, &b);
            let backward = unify_with_occurs_check(ctx, &b, &a);
            prop_assert_eq!(forward.is_some(), backward.is_some());
            if let (Some(forward), Some(backward)) = (forward, backward) {
                prop_assert_eq!(forward.reify(&a), forward.reify(&b));
                prop_assert_eq!(backward.reify(&a), backward.reify(&b));
            }
        }

        #[test]
        fn prop_reify_is_idempotent(a in open_term(), b in open_term()) {
            let store = BindingStore::new();
            let (ctx, _) = store.context().allocate(VARS);
            if let Some(ctx) = unify_with_occurs_check(ctx, &a, &b) {
                let once = ctx.reify(&a);
                prop_assert_eq!(ctx.reify(&once), once);
            }
        }
    }
}
