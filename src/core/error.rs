use thiserror::Error;

/// Boxed error produced by the database engine behind a [`Connection`](crate::Connection).
pub type EngineFailure = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum TxError {
    /// Operation attempted in the wrong lifecycle state, e.g. a savepoint
    /// outside of a transaction scope.
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// Savepoint id that was never created or has already been invalidated.
    #[error("Savepoint '{0}' not found")]
    NotFound(String),

    /// The engine rejected a statement (connection loss, constraint
    /// violation, deadlock, ...).
    #[error("Transaction error on `{statement}`: {source}")]
    Transaction {
        statement: String,
        #[source]
        source: EngineFailure,
    },

    #[error("Invalid savepoint label '{0}': {1}")]
    InvalidLabel(String, String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Pool error: {0}")]
    Pool(String),

    #[error("Lock error: {0}")]
    LockError(String),
}

impl TxError {
    pub(crate) fn engine<E>(statement: &str, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Transaction {
            statement: statement.to_string(),
            source: Box::new(source),
        }
    }

    pub fn is_illegal_state(&self) -> bool {
        matches!(self, Self::IllegalState(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// True when the engine itself rejected a statement.
    pub fn is_engine_failure(&self) -> bool {
        matches!(self, Self::Transaction { .. })
    }
}

pub type Result<T> = std::result::Result<T, TxError>;

impl<T> From<std::sync::PoisonError<T>> for TxError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}
