use super::Connection;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Errors raised by [`RecordingConnection`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Connection is closed")]
    Closed,

    #[error("Statement rejected: {0}")]
    Rejected(String),

    #[error("{0}")]
    Protocol(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionState {
    Active,
    InTransaction,
    Closed,
}

/// In-process engine stand-in that records every statement
///
/// Tracks transaction-control statements the way a PostgreSQL-style engine
/// does, including the engine's own savepoint stack, and rejects what such
/// an engine would reject. Other statements are accepted and only recorded.
/// Note that `RELEASE SAVEPOINT` also destroys every later savepoint on the
/// engine side, as PostgreSQL and SQLite do.
#[derive(Debug)]
pub struct RecordingConnection {
    id: u64,
    state: ConnectionState,
    savepoints: Vec<String>,
    statements: Vec<String>,
    failures: Vec<String>,
    broken: bool,
}

impl RecordingConnection {
    pub fn new() -> Self {
        Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::SeqCst),
            state: ConnectionState::Active,
            savepoints: Vec::new(),
            statements: Vec::new(),
            failures: Vec::new(),
            broken: false,
        }
    }

    /// Get connection ID
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Every statement attempted on this connection, including rejected ones
    pub fn statements(&self) -> &[String] {
        &self.statements
    }

    pub fn clear_statements(&mut self) {
        self.statements.clear();
    }

    /// Savepoints the engine currently knows about, lowercased
    pub fn engine_savepoints(&self) -> &[String] {
        &self.savepoints
    }

    /// Reject every later statement containing `fragment`
    pub fn fail_on(&mut self, fragment: &str) {
        self.failures.push(fragment.to_string());
    }

    pub fn clear_failures(&mut self) {
        self.failures.clear();
    }

    /// Break the connection; every later statement fails with `Closed`
    pub fn close(&mut self) {
        self.state = ConnectionState::Closed;
        self.savepoints.clear();
    }

    /// Whether a failed COMMIT or ROLLBACK marked this connection unusable
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    fn require_transaction(&self) -> Result<(), EngineError> {
        if self.state == ConnectionState::InTransaction {
            Ok(())
        } else {
            Err(EngineError::Protocol(
                "there is no transaction in progress".into(),
            ))
        }
    }

    fn savepoint_index(&self, name: &str) -> Result<usize, EngineError> {
        self.savepoints
            .iter()
            .rposition(|sp| sp == name)
            .ok_or_else(|| EngineError::Protocol(format!("savepoint \"{}\" does not exist", name)))
    }

    fn apply(&mut self, sql: &str) -> Result<(), EngineError> {
        let normalized = sql.trim().trim_end_matches(';').trim().to_ascii_lowercase();
        let words: Vec<&str> = normalized.split_whitespace().collect();

        match words.as_slice() {
            ["begin"] | ["begin", "transaction"] | ["begin", "work"] | ["start", "transaction"] => {
                if self.state == ConnectionState::InTransaction {
                    return Err(EngineError::Protocol(
                        "there is already a transaction in progress".into(),
                    ));
                }
                self.state = ConnectionState::InTransaction;
            }
            ["commit"] | ["commit", "work"] | ["end"] => {
                self.require_transaction()?;
                self.state = ConnectionState::Active;
                self.savepoints.clear();
            }
            ["rollback", "to", "savepoint", name] | ["rollback", "to", name] => {
                self.require_transaction()?;
                let index = self.savepoint_index(name)?;
                self.savepoints.truncate(index + 1);
            }
            ["rollback"] | ["rollback", "work"] => {
                // Outside a transaction this is only a warning in PostgreSQL.
                self.state = ConnectionState::Active;
                self.savepoints.clear();
            }
            ["savepoint", name] => {
                self.require_transaction()?;
                self.savepoints.push(name.to_string());
            }
            ["release", "savepoint", name] | ["release", name] => {
                self.require_transaction()?;
                let index = self.savepoint_index(name)?;
                self.savepoints.truncate(index);
            }
            _ => {}
        }

        Ok(())
    }
}

impl Default for RecordingConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl Connection for RecordingConnection {
    type Error = EngineError;

    fn execute(&mut self, sql: &str) -> Result<(), EngineError> {
        self.statements.push(sql.to_string());

        if self.state == ConnectionState::Closed {
            return Err(EngineError::Closed);
        }

        if let Some(fragment) = self.failures.iter().find(|f| sql.contains(f.as_str())) {
            return Err(EngineError::Rejected(format!("matched '{}'", fragment)));
        }

        self.apply(sql)
    }

    fn in_transaction(&self) -> Option<bool> {
        Some(self.state == ConnectionState::InTransaction)
    }

    fn is_active(&self) -> bool {
        self.state != ConnectionState::Closed
    }

    fn mark_broken(&mut self) {
        self.broken = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_creation() {
        let first = RecordingConnection::new();
        let second = RecordingConnection::new();

        assert!(second.id() > first.id());
        assert!(first.is_active());
        assert_eq!(first.in_transaction(), Some(false));
    }

    #[test]
    fn test_transaction_lifecycle() {
        let mut conn = RecordingConnection::new();

        conn.execute("BEGIN TRANSACTION;").unwrap();
        assert_eq!(conn.in_transaction(), Some(true));
        assert!(conn.execute("BEGIN;").is_err());

        conn.execute("COMMIT;").unwrap();
        assert_eq!(conn.in_transaction(), Some(false));
        assert!(conn.execute("COMMIT;").is_err());
    }

    #[test]
    fn test_savepoint_stack() {
        let mut conn = RecordingConnection::new();

        assert!(conn.execute("SAVEPOINT a_0;").is_err());

        conn.execute("BEGIN;").unwrap();
        conn.execute("SAVEPOINT a_0;").unwrap();
        conn.execute("SAVEPOINT B_1;").unwrap();
        conn.execute("SAVEPOINT c_2;").unwrap();
        assert_eq!(conn.engine_savepoints(), ["a_0", "b_1", "c_2"]);

        conn.execute("ROLLBACK TO SAVEPOINT b_1;").unwrap();
        assert_eq!(conn.engine_savepoints(), ["a_0", "b_1"]);

        conn.execute("RELEASE SAVEPOINT a_0;").unwrap();
        assert!(conn.engine_savepoints().is_empty());

        let err = conn.execute("ROLLBACK TO SAVEPOINT b_1;").unwrap_err();
        assert_eq!(
            err,
            EngineError::Protocol("savepoint \"b_1\" does not exist".into())
        );
    }

    #[test]
    fn test_failure_injection() {
        let mut conn = RecordingConnection::new();
        conn.fail_on("INSERT INTO stock");

        assert!(matches!(
            conn.execute("INSERT INTO stock VALUES (1)"),
            Err(EngineError::Rejected(_))
        ));
        conn.execute("INSERT INTO sales VALUES (1)").unwrap();

        conn.clear_failures();
        conn.execute("INSERT INTO stock VALUES (1)").unwrap();
        assert_eq!(conn.statements().len(), 3);
    }

    #[test]
    fn test_connection_close() {
        let mut conn = RecordingConnection::new();
        conn.execute("BEGIN;").unwrap();

        conn.close();
        assert!(!conn.is_active());

        // Should fail after close
        assert_eq!(conn.execute("SELECT 1"), Err(EngineError::Closed));
    }
}
