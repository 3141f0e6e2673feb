//! Persistent substitutions.
//!
//! All bindings made during a search live in one append-only arena, the
//! [`BindingStore`]. A [`Context`] is a small `Copy` handle naming one entry of
//! that arena (its *stamp*); the substitution it denotes is the chain of
//! entries reachable from that entry through parent stamps. Binding never
//! touches existing entries, so every context ever handed out keeps denoting
//! the same substitution, and backtracking is just going back to an older
//! context.
//!
//! The store uses interior mutability and is deliberately `!Sync`: one store
//! serves exactly one in-flight search.

use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;

use crate::term::{fold, Fold, Struct, Term, Var};

/// One binding: `var` was bound to `value` in the context with stamp `parent`.
#[derive(Debug, Clone)]
struct Binding {
    var: usize,
    value: Term,
    parent: usize,
}

/// Append-only arena of variable bindings shared by the contexts of a search.
#[derive(Default)]
pub struct BindingStore {
    entries: RefCell<Vec<Binding>>,
}

impl BindingStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The empty substitution with no variables allocated.
    #[must_use]
    pub fn context(&self) -> Context<'_> {
        Context {
            store: self,
            stamp: 0,
            top: 0,
        }
    }

    /// Number of entries ever appended (and not reclaimed).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    /// Whether no binding has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    /// Drops every entry at arena position `len` or later.
    ///
    /// Contexts whose stamp exceeds `len` become invalid; callers must only
    /// truncate past entries no live context can reach.
    pub(crate) fn truncate(&self, len: usize) {
        self.entries.borrow_mut().truncate(len);
    }

    fn push(&self, binding: Binding) -> usize {
        let mut entries = self.entries.borrow_mut();
        entries.push(binding);
        entries.len()
    }
}

impl fmt::Debug for BindingStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindingStore")
            .field("entries", &self.len())
            .finish()
    }
}

/// A snapshot of the substitution at one point of the search.
#[derive(Clone, Copy)]
pub struct Context<'s> {
    store: &'s BindingStore,
    stamp: usize,
    top: usize,
}

impl<'s> Context<'s> {
    /// The entry this context names; `0` is the empty substitution.
    #[must_use]
    pub fn stamp(&self) -> usize {
        self.stamp
    }

    /// One past the highest variable index allocated so far.
    #[must_use]
    pub fn top(&self) -> usize {
        self.top
    }

    /// Reserves `count` fresh variable slots, returning the first one.
    #[must_use]
    pub fn allocate(self, count: usize) -> (Self, usize) {
        let base = self.top;
        (
            Self {
                top: base + count,
                ..self
            },
            base,
        )
    }

    /// Binds `var` to `value`, returning the extended context.
    ///
    /// Binding a variable to itself returns `self` unchanged, as does binding
    /// the anonymous variable or any variable without an index.
    #[must_use]
    pub fn bind(self, var: &Var, value: Term) -> Self {
        let Some(index) = var.index() else {
            return self;
        };
        if var.is_anonymous() {
            return self;
        }
        if let Term::Var(other) = &value {
            if other.index() == Some(index) {
                return self;
            }
        }

        let stamp = self.store.push(Binding {
            var: index,
            value,
            parent: self.stamp,
        });
        Self { stamp, ..self }
    }

    /// The value directly bound to slot `index`, if any.
    #[must_use]
    pub fn lookup(&self, index: usize) -> Option<Term> {
        let entries = self.store.entries.borrow();
        let mut stamp = self.stamp;
        while stamp > 0 {
            let binding = &entries[stamp - 1];
            if binding.var == index {
                return Some(binding.value.clone());
            }
            stamp = binding.parent;
        }
        None
    }

    /// Whether `var` is bound in this context.
    #[must_use]
    pub fn is_bound(&self, var: &Var) -> bool {
        var.index().is_some_and(|index| self.lookup(index).is_some())
    }

    /// Follows variable bindings from `term` until reaching a non-variable or
    /// a free variable.
    #[must_use]
    pub fn deref(&self, term: &Term) -> Term {
        let mut current = term.clone();
        loop {
            let next = match &current {
                Term::Var(var) => match var.index().and_then(|index| self.lookup(index)) {
                    Some(value) => value,
                    None => return current,
                },
                _ => return current,
            };
            current = next;
        }
    }

    /// Applies the substitution throughout `term`.
    ///
    /// Free variables are left in place, so the result may be partially
    /// ground. Cyclic bindings (possible without the occurs check) do not
    /// terminate.
    #[must_use]
    pub fn reify(&self, term: &Term) -> Term {
        fold(
            term,
            |term| match self.deref(term) {
                Term::Struct(s) => Fold::Descend(s),
                other => Fold::Done(other),
            },
            |s, args| Term::Struct(Arc::new(Struct::new(s.functor().clone(), args))),
        )
    }

    /// Whether `var` occurs in `term` under this substitution.
    #[must_use]
    pub fn occurs(&self, var: &Var, term: &Term) -> bool {
        let mut pending = vec![term.clone()];
        while let Some(term) = pending.pop() {
            match self.deref(&term) {
                Term::Var(other) => {
                    if other.index().is_some() && other == *var {
                        return true;
                    }
                }
                Term::Struct(s) => pending.extend(s.args().iter().cloned()),
                Term::Atom(_) | Term::Number(_) => {}
            }
        }
        false
    }
}

impl fmt::Debug for Context<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("stamp", &self.stamp)
            .field("top", &self.top)
            .finish_non_exhaustive()
    }
}
