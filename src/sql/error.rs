use thiserror::Error;

/// Problems found in query text before anything reaches the store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SqlError {
    #[error("unterminated {what} starting at byte {offset}")]
    Unterminated { what: &'static str, offset: usize },

    #[error("invalid parameter marker {marker} at byte {offset}")]
    InvalidMarker { marker: String, offset: usize },

    #[error("query references ${marker} but only {supplied} parameter(s) were supplied")]
    MissingParameter { marker: u32, supplied: usize },

    #[error("parameter ${0} is supplied but never referenced")]
    UnusedParameter(usize),

    #[error("generic '?' marker at byte {0}; use ordinal $n markers")]
    GenericMarker(usize),

    #[error("empty statement")]
    Empty,

    #[error("more than one statement; use execute_batch for scripts")]
    MultipleStatements,

    #[error("cannot emulate RETURNING: {0}")]
    Unsupported(String),
}
