//! Normalized clauses.
//!
//! Normalization gives every named variable of a term a slot index in
//! `[0, N)` by order of first occurrence and records, for every struct, how
//! many distinct variables it contains. A normalized clause is instantiated by
//! allocating `N` fresh slots and substituting by index.

use std::sync::Arc;

use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::context::Context;
use crate::error::ClauseError;
use crate::term::{fold, Atom, Fold, Struct, Term, Var};

/// Functor of rules, `Head :- Body`.
pub const NECK: &str = ":-";

/// A term whose variables carry slot indices.
#[derive(Debug, Clone)]
pub struct Normalized {
    /// The rewritten term
    pub term: Term,
    /// Variables in slot order; `variables[i]` has index `i`
    pub variables: Vec<Var>,
}

impl Normalized {
    /// Number of distinct variables.
    #[must_use]
    pub fn var_count(&self) -> usize {
        self.variables.len()
    }
}

/// Normalizes `term`. Anonymous variables stay anonymous.
#[must_use]
pub fn normalize(term: &Term) -> Normalized {
    let mut normalizer = Normalizer::default();
    let term = normalizer.walk(term);
    Normalized {
        term,
        variables: normalizer.slots.into_values().collect(),
    }
}

/// A rewritten subterm and the sorted, deduplicated slots below it.
type Walked = (Term, SmallVec<[usize; 8]>);

#[derive(Default)]
struct Normalizer {
    /// Keyed by name and any pre-existing index, so distinct variables that
    /// happen to share a display name keep apart.
    slots: IndexMap<(Arc<str>, Option<usize>), Var>,
}

impl Normalizer {
    fn walk(&mut self, term: &Term) -> Term {
        let slots = &mut self.slots;
        let enter = |term: &Term| -> Fold<Walked> {
            match term {
                Term::Var(var) if var.is_anonymous() => {
                    Fold::Done((Term::anonymous(), SmallVec::new()))
                }
                Term::Var(var) => {
                    let next = slots.len();
                    let key = (Arc::clone(var.shared_name()), var.index());
                    let slot = slots
                        .entry(key)
                        .or_insert_with(|| Var::indexed(Arc::clone(var.shared_name()), next));
                    let index = slot.index().unwrap_or(next);
                    Fold::Done((Term::Var(slot.clone()), SmallVec::from_elem(index, 1)))
                }
                Term::Struct(s) => Fold::Descend(Arc::clone(s)),
                Term::Atom(_) | Term::Number(_) => Fold::Done((term.clone(), SmallVec::new())),
            }
        };
        let exit = |s: &Arc<Struct>, walked: Vec<Walked>| -> Walked {
            let mut seen: SmallVec<[usize; 8]> = SmallVec::new();
            let args = walked
                .into_iter()
                .map(|(arg, below)| {
                    seen.extend(below);
                    arg
                })
                .collect();
            seen.sort_unstable();
            seen.dedup();
            let rebuilt = Struct::with_var_count(s.functor().clone(), args, seen.len());
            (Term::Struct(Arc::new(rebuilt)), seen)
        };
        fold(term, enter, exit).0
    }
}

/// Substitutes slot `i` of a normalized term with `frame[i]`. Ground structs
/// are shared rather than copied.
fn instantiate(term: &Term, frame: &[Term]) -> Term {
    fold(
        term,
        |term| match term {
            Term::Var(var) => match var.index().and_then(|index| frame.get(index)) {
                Some(fresh) => Fold::Done(fresh.clone()),
                None => Fold::Done(term.clone()),
            },
            Term::Struct(s) if s.var_count() > 0 => Fold::Descend(Arc::clone(s)),
            Term::Struct(_) | Term::Atom(_) | Term::Number(_) => Fold::Done(term.clone()),
        },
        |s, args| {
            Term::Struct(Arc::new(Struct::with_var_count(
                s.functor().clone(),
                args,
                s.var_count(),
            )))
        },
    )
}

/// A fact or rule, `head :- body`.
#[derive(Debug, Clone)]
pub struct Clause {
    head: Arc<Struct>,
    body: Term,
    key: String,
    variables: Vec<Arc<str>>,
}

impl Clause {
    /// Builds a clause from `Head :- Body` or a bare head.
    ///
    /// # Errors
    ///
    /// Returns [`ClauseError`] when the head is not callable or the body is a
    /// number.
    pub fn new(term: &Term) -> Result<Self, ClauseError> {
        match term {
            Term::Struct(s) if s.arity() == 2 && s.functor().name() == NECK => {
                Self::rule(&s.args()[0], &s.args()[1])
            }
            _ => Self::rule(term, &Term::atom("true")),
        }
    }

    /// Builds a rule from its head and body.
    ///
    /// # Errors
    ///
    /// Returns [`ClauseError`] when the head is not callable or the body is a
    /// number.
    pub fn rule(head: &Term, body: &Term) -> Result<Self, ClauseError> {
        if !head.is_callable() {
            return Err(ClauseError::InvalidHead(head.clone()));
        }
        if let Term::Number(_) = body {
            return Err(ClauseError::InvalidBody(body.clone()));
        }

        let normalized = normalize(&Term::compound(NECK, vec![head.clone(), body.clone()]));
        let Term::Struct(neck) = &normalized.term else {
            return Err(ClauseError::InvalidHead(head.clone()));
        };
        let head = match &neck.args()[0] {
            Term::Struct(s) => Arc::clone(s),
            Term::Atom(atom) => Arc::new(Struct::new(atom.clone(), Vec::new())),
            other => return Err(ClauseError::InvalidHead(other.clone())),
        };

        Ok(Self {
            key: head.indicator(),
            head,
            body: neck.args()[1].clone(),
            variables: normalized
                .variables
                .iter()
                .map(|var| Arc::clone(var.shared_name()))
                .collect(),
        })
    }

    /// The clause head.
    #[must_use]
    pub fn head(&self) -> &Arc<Struct> {
        &self.head
    }

    /// The clause body; `true` for facts.
    #[must_use]
    pub fn body(&self) -> &Term {
        &self.body
    }

    /// The predicate indicator of the head.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Number of distinct variables in the clause.
    #[must_use]
    pub fn var_count(&self) -> usize {
        self.variables.len()
    }

    /// Whether the body is the atom `true`.
    #[must_use]
    pub fn is_fact(&self) -> bool {
        self.body.is_atom_named("true")
    }

    /// Builds a fresh instance of the clause in `ctx`.
    ///
    /// Allocates one new variable per clause variable and returns the
    /// extended context with the renamed head and body.
    #[must_use]
    pub fn rename<'s>(&self, ctx: Context<'s>) -> (Context<'s>, Term, Term) {
        let (ctx, base) = ctx.allocate(self.var_count());
        let frame: SmallVec<[Term; 8]> = self
            .variables
            .iter()
            .enumerate()
            .map(|(offset, name)| Term::Var(Var::indexed(Arc::clone(name), base + offset)))
            .collect();
        let head = instantiate(&Term::Struct(Arc::clone(&self.head)), &frame);
        let body = instantiate(&self.body, &frame);
        (ctx, head, body)
    }

    /// The clause as a term: `Head :- Body`, or just the head for facts.
    #[must_use]
    pub fn to_term(&self) -> Term {
        let head = Term::Struct(Arc::clone(&self.head));
        if self.is_fact() {
            head
        } else {
            Term::Struct(Arc::new(Struct::new(
                Atom::new(NECK),
                vec![head, self.body.clone()],
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::BindingStore;

    #[test]
    fn test_normalize_assigns_slots_by_first_occurrence() {
        let term = Term::compound(
            "f",
            vec![Term::var("Y"), Term::var("X"), Term::var("Y"), Term::anonymous()],
        );
        let normalized = normalize(&term);
        assert_eq!(normalized.var_count(), 2);
        assert_eq!(normalized.variables[0].name(), "Y");
        assert_eq!(normalized.variables[1].name(), "X");

        let s = normalized.term.as_struct().unwrap();
        assert_eq!(s.args()[0].as_var().and_then(Var::index), Some(0));
        assert_eq!(s.args()[1].as_var().and_then(Var::index), Some(1));
        assert_eq!(s.args()[2].as_var().and_then(Var::index), Some(0));
        assert!(s.args()[3].as_var().unwrap().is_anonymous());
        assert_eq!(s.var_count(), 2);
    }

    #[test]
    fn test_normalize_counts_variables_per_struct() {
        let term = Term::compound(
            "f",
            vec![
                Term::compound("g", vec![Term::var("X"), Term::var("X")]),
                Term::compound("h", vec![Term::atom("a")]),
            ],
        );
        let normalized = normalize(&term);
        let root = normalized.term.as_struct().unwrap();
        assert_eq!(root.var_count(), 1);
        assert_eq!(root.args()[0].as_struct().unwrap().var_count(), 1);
        assert_eq!(root.args()[1].as_struct().unwrap().var_count(), 0);
    }

    #[test]
    fn test_fact_and_rule_construction() {
        let fact = Clause::new(&Term::compound("p", vec![Term::int(1)])).unwrap();
        assert!(fact.is_fact());
        assert_eq!(fact.key(), "p/1");
        assert_eq!(fact.var_count(), 0);

        let rule = Clause::new(&Term::compound(
            NECK,
            vec![
                Term::compound("grandparent", vec![Term::var("X"), Term::var("Z")]),
                Term::conjunction(vec![
                    Term::compound("parent", vec![Term::var("X"), Term::var("Y")]),
                    Term::compound("parent", vec![Term::var("Y"), Term::var("Z")]),
                ]),
            ],
        ))
        .unwrap();
        assert!(!rule.is_fact());
        assert_eq!(rule.key(), "grandparent/2");
        assert_eq!(rule.var_count(), 3);
    }

    #[test]
    fn test_atom_head_becomes_zero_arity_struct() {
        let clause = Clause::new(&Term::atom("halt")).unwrap();
        assert_eq!(clause.key(), "halt/0");
        assert_eq!(clause.head().arity(), 0);
    }

    #[test]
    fn test_invalid_clauses_are_rejected() {
        assert_eq!(
            Clause::new(&Term::var("X")).unwrap_err(),
            ClauseError::InvalidHead(Term::var("X"))
        );
        assert_eq!(
            Clause::new(&Term::int(3)).unwrap_err(),
            ClauseError::InvalidHead(Term::int(3))
        );
        assert_eq!(
            Clause::rule(&Term::atom("p"), &Term::int(3)).unwrap_err(),
            ClauseError::InvalidBody(Term::int(3))
        );
    }

    #[test]
    fn test_rename_allocates_fresh_slots() {
        let clause = Clause::rule(
            &Term::compound("p", vec![Term::var("X"), Term::compound("k", vec![Term::atom("a")])]),
            &Term::compound("q", vec![Term::var("X")]),
        )
        .unwrap();
        let store = BindingStore::new();
        let (ctx, _) = store.context().allocate(5);

        let (ctx1, head1, body1) = clause.rename(ctx);
        assert_eq!(ctx1.top(), 6);
        let renamed = head1.as_struct().unwrap();
        assert_eq!(renamed.args()[0].as_var().and_then(Var::index), Some(5));
        assert_eq!(
            body1.as_struct().unwrap().args()[0].as_var().and_then(Var::index),
            Some(5)
        );
        assert!(
            renamed.args()[1].same_ref(&clause.head().args()[1]),
            "Ground subterms are shared between instances"
        );

        let (ctx2, head2, _) = clause.rename(ctx1);
        assert_eq!(ctx2.top(), 7);
        assert_eq!(
            head2.as_struct().unwrap().args()[0].as_var().and_then(Var::index),
            Some(6)
        );
    }

    #[test]
    fn test_to_term() {
        let fact = Clause::new(&Term::compound("p", vec![Term::int(1)])).unwrap();
        assert_eq!(fact.to_term(), Term::compound("p", vec![Term::int(1)]));
        let rule = Clause::rule(&Term::atom("a"), &Term::atom("b")).unwrap();
        assert_eq!(rule.to_term().to_string(), ":-(a(),b)");
    }

    #[test]
    fn test_normalize_and_rename_long_lists() {
        let items = (0..50_000).map(|_| Term::var("X")).collect();
        let normalized = normalize(&Term::list_with_tail(items, Term::var("T")));
        assert_eq!(normalized.var_count(), 2);
        assert_eq!(normalized.term.as_struct().unwrap().var_count(), 2);

        let clause = Clause::rule(
            &Term::compound("big", vec![normalized.term.clone()]),
            &Term::atom("true"),
        )
        .unwrap();
        let store = BindingStore::new();
        let (ctx, head, _) = clause.rename(store.context().allocate(3).0);
        assert_eq!(ctx.top(), 5);
        let list = &head.as_struct().unwrap().args()[0];
        let items = list.as_struct().unwrap().args()[0].as_var().and_then(Var::index);
        assert_eq!(items, Some(3), "Renamed into the fresh slots");
    }
}
