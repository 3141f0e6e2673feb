//! # Resolog
//!
//! A small SLD-resolution engine for Horn clauses in Rust.
//!
//! ## Features
//!
//! - Terms with interned atoms and shared structure
//! - Persistent bindings: backtracking restores an earlier context, nothing
//!   is undone
//! - Iterative unification with an optional occurs check
//! - Depth-first resolution with conjunction, disjunction, if-then-else,
//!   negation as failure, cut and `call/N`
//! - Pluggable clause providers next to a static theory and a dynamic
//!   database
//!
//! ## Example
//!
//! ```rust
//! use resolog::{Engine, Term};
//!
//! let mut engine = Engine::new();
//! for n in 1..=3 {
//!     engine.add_clause(&Term::compound("p", vec![Term::int(n)])).unwrap();
//! }
//!
//! let results = engine.query(&Term::compound("p", vec![Term::var("X")])).unwrap();
//! assert_eq!(results.len(), 3);
//! assert_eq!(results[0].bindings["X"], Term::int(1));
//! ```

/// Normalized clauses and renaming.
pub mod clause;
/// Engine configuration.
pub mod config;
/// Binding store and contexts.
pub mod context;
/// Resolution engine.
pub mod engine;
/// Error types.
pub mod error;
/// Clause providers and the predicate index.
pub mod store;
/// Term model.
pub mod term;
/// Unification.
pub mod unify;

pub use clause::{normalize, Clause, Normalized};
pub use config::EngineConfig;
pub use context::{BindingStore, Context};
pub use engine::{Engine, QueryResult, Signal, Solution, SolutionListener, SolveOutcome};
#[cfg(feature = "serde")]
pub use error::ConfigError;
pub use error::{ClauseError, EngineError, Result};
pub use store::{ClauseProvider, ClauseStore, DynamicClauses, Theory};
pub use term::{Atom, Number, Struct, Term, Var};
pub use unify::{unify, unify_with_occurs_check, Unifier};
