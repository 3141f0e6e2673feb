//! Clause providers and the predicate index that routes lookups to them.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use indexmap::IndexMap;

use crate::clause::Clause;
use crate::error::ClauseError;
use crate::term::{variadic_indicator, Term};

/// A source of clauses.
///
/// Implementations return the candidates for a predicate indicator in the
/// order they must be tried. The returned vector is a snapshot: later
/// changes to the provider do not affect a search already iterating it.
pub trait ClauseProvider: Send + Sync + fmt::Debug {
    /// Clauses whose head has predicate indicator `key`.
    fn matching_clauses(&self, key: &str) -> Vec<Arc<Clause>>;
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// Static clauses grouped by predicate indicator, in insertion order.
#[derive(Debug, Default)]
pub struct Theory {
    clauses_by_pred: RwLock<IndexMap<String, Vec<Arc<Clause>>>>,
}

impl Theory {
    /// Create an empty theory
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `clause` after the existing clauses of its predicate.
    pub fn add(&self, clause: Clause) {
        let mut clauses_by_pred = write(&self.clauses_by_pred);
        clauses_by_pred
            .entry(clause.key().to_string())
            .or_default()
            .push(Arc::new(clause));
    }

    /// Builds a clause from `term` and appends it.
    ///
    /// # Errors
    ///
    /// Returns [`ClauseError`] when `term` is not a valid clause.
    pub fn add_term(&self, term: &Term) -> Result<(), ClauseError> {
        self.add(Clause::new(term)?);
        Ok(())
    }

    /// Predicate indicators with at least one clause.
    #[must_use]
    pub fn predicates(&self) -> Vec<String> {
        read(&self.clauses_by_pred).keys().cloned().collect()
    }

    /// Removes every clause of predicate `key`, returning how many there were.
    pub fn abolish(&self, key: &str) -> usize {
        write(&self.clauses_by_pred)
            .shift_remove(key)
            .map_or(0, |clauses| clauses.len())
    }

    /// Total number of clauses.
    #[must_use]
    pub fn len(&self) -> usize {
        read(&self.clauses_by_pred).values().map(Vec::len).sum()
    }

    /// Whether the theory holds no clauses.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every clause.
    pub fn clear(&self) {
        write(&self.clauses_by_pred).clear();
    }
}

impl ClauseProvider for Theory {
    fn matching_clauses(&self, key: &str) -> Vec<Arc<Clause>> {
        read(&self.clauses_by_pred)
            .get(key)
            .cloned()
            .unwrap_or_default()
    }
}

/// Clauses asserted at run time.
///
/// Every assertion occupies a slot whose index is returned to the caller and
/// stays valid for the life of the provider: retracting a clause leaves an
/// empty slot behind instead of shifting later clauses down.
#[derive(Debug, Default)]
pub struct DynamicClauses {
    slots: RwLock<Vec<Option<Arc<Clause>>>>,
}

impl DynamicClauses {
    /// Create an empty provider
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a clause from `term`, appends it and returns its slot index.
    ///
    /// # Errors
    ///
    /// Returns [`ClauseError`] when `term` is not a valid clause.
    pub fn assert_clause(&self, term: &Term) -> Result<usize, ClauseError> {
        Ok(self.push(Clause::new(term)?))
    }

    /// Appends `clause` and returns its slot index.
    pub fn push(&self, clause: Clause) -> usize {
        let mut slots = write(&self.slots);
        slots.push(Some(Arc::new(clause)));
        slots.len() - 1
    }

    /// Empties slot `index`, returning the clause it held.
    pub fn retract_at(&self, index: usize) -> Option<Arc<Clause>> {
        write(&self.slots).get_mut(index).and_then(Option::take)
    }

    /// Drops slot `len` and every later slot.
    pub fn retract_to_before_index(&self, len: usize) {
        write(&self.slots).truncate(len);
    }

    /// Drops every slot.
    pub fn retract_all(&self) {
        write(&self.slots).clear();
    }

    /// The clause in slot `index`, if it has not been retracted.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<Arc<Clause>> {
        read(&self.slots).get(index).cloned().flatten()
    }

    /// Number of slots, including retracted ones.
    #[must_use]
    pub fn len(&self) -> usize {
        read(&self.slots).len()
    }

    /// Whether no slot was ever filled (or all were dropped).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        read(&self.slots).is_empty()
    }

    /// Number of clauses that have not been retracted.
    #[must_use]
    pub fn live_count(&self) -> usize {
        read(&self.slots).iter().filter(|slot| slot.is_some()).count()
    }
}

impl ClauseProvider for DynamicClauses {
    fn matching_clauses(&self, key: &str) -> Vec<Arc<Clause>> {
        read(&self.slots)
            .iter()
            .flatten()
            .filter(|clause| clause.key() == key)
            .cloned()
            .collect()
    }
}

/// The predicate index: routes a predicate indicator to its providers.
///
/// Providers are consulted in registration order. A provider registered for
/// `name/*` serves every arity of `name`; a global provider serves every key.
#[derive(Debug, Default)]
pub struct ClauseStore {
    providers: Vec<Arc<dyn ClauseProvider>>,
    /// Positions in `providers` registered for each key
    providers_by_key: IndexMap<String, Vec<usize>>,
    global: Vec<usize>,
}

impl ClauseStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `provider` for predicate indicator `key` (`name/arity` or
    /// `name/*`).
    pub fn register(&mut self, key: impl Into<String>, provider: Arc<dyn ClauseProvider>) {
        let position = self.providers.len();
        self.providers.push(provider);
        self.providers_by_key
            .entry(key.into())
            .or_default()
            .push(position);
    }

    /// Registers `provider` for every predicate.
    pub fn register_global(&mut self, provider: Arc<dyn ClauseProvider>) {
        self.global.push(self.providers.len());
        self.providers.push(provider);
    }

    /// Number of registered providers.
    #[must_use]
    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    fn positions_for(&self, key: &str) -> Vec<usize> {
        let mut positions = self.global.clone();
        if let Some(keyed) = self.providers_by_key.get(key) {
            positions.extend(keyed);
        }
        if let Some((name, _arity)) = key.rsplit_once('/') {
            if let Some(variadic) = self.providers_by_key.get(&variadic_indicator(name)) {
                positions.extend(variadic);
            }
        }
        positions.sort_unstable();
        positions.dedup();
        positions
    }

    /// Candidate clauses for `key`, in provider registration order.
    #[must_use]
    pub fn matching_clauses(&self, key: &str) -> Vec<Arc<Clause>> {
        self.positions_for(key)
            .into_iter()
            .flat_map(|position| self.providers[position].matching_clauses(key))
            .collect()
    }
}
