use thiserror::Error;

use crate::term::Term;

/// Errors raised when a term cannot be turned into a clause.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClauseError {
    /// The head is a variable or a number
    #[error("clause head must be an atom or compound term, found {0}")]
    InvalidHead(Term),
    /// The body is a number
    #[error("clause body must be callable, found {0}")]
    InvalidBody(Term),
}

/// Fatal conditions that end a query.
///
/// Ordinary failure (no more solutions) is never an error; these are
/// reported instead of, not in addition to, the remaining solutions.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// A goal was an unbound variable
    #[error("instantiation error: goal is an unbound variable")]
    Instantiation,
    /// A goal was a number
    #[error("type error: {0} is not callable")]
    NotCallable(Term),
    /// A control construct was used with the wrong arity
    #[error("malformed control construct {indicator}")]
    MalformedControl {
        /// The offending predicate indicator
        indicator: String,
    },
    /// Resolution went deeper than the configured limit
    #[error("search too deep: resolution depth limit of {limit} exceeded")]
    DepthExceeded {
        /// The configured depth limit
        limit: usize,
    },
    /// The query performed more inferences than allowed
    #[error("inference limit of {limit} exceeded")]
    InferenceLimit {
        /// The configured inference limit
        limit: u64,
    },
    /// The interrupt handle was raised while solving
    #[error("query interrupted")]
    Interrupted,
    /// A clause could not be built
    #[error(transparent)]
    Clause(#[from] ClauseError),
}

/// Error returned when an engine configuration cannot be decoded.
#[cfg(feature = "serde")]
#[derive(Debug, Error)]
#[error("invalid engine configuration: {0}")]
pub struct ConfigError(#[from] serde_json::Error);

/// Result type used throughout the engine.
pub type Result<T, E = EngineError> = std::result::Result<T, E>;
