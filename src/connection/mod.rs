pub mod config;
pub mod pool;
pub mod recording;

/// Database connection handle
///
/// The engine-side collaborator of a
/// [`TransactionManager`](crate::TransactionManager): anything that can run
/// one literal SQL statement and report failure. Connections must not be in
/// engine-level autocommit mode while a transaction scope is open.
/// Similar to `postgres::Client::batch_execute` or `rusqlite::Connection::execute_batch`.
pub trait Connection {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Execute a statement that returns no rows
    fn execute(&mut self, sql: &str) -> Result<(), Self::Error>;

    /// Whether the engine currently holds an open transaction, if known
    ///
    /// The pool uses this to discard connections handed back mid-transaction.
    fn in_transaction(&self) -> Option<bool> {
        None
    }

    /// Check if connection is still usable
    fn is_active(&self) -> bool {
        true
    }

    /// Called when a terminal COMMIT or ROLLBACK failed
    ///
    /// The engine may still hold the transaction open, so the connection
    /// must not be reused for another operation.
    fn mark_broken(&mut self) {}
}

impl<C: Connection + ?Sized> Connection for &mut C {
    type Error = C::Error;

    fn execute(&mut self, sql: &str) -> Result<(), Self::Error> {
        (**self).execute(sql)
    }

    fn in_transaction(&self) -> Option<bool> {
        (**self).in_transaction()
    }

    fn is_active(&self) -> bool {
        (**self).is_active()
    }

    fn mark_broken(&mut self) {
        (**self).mark_broken()
    }
}

impl<C: Connection + ?Sized> Connection for Box<C> {
    type Error = C::Error;

    fn execute(&mut self, sql: &str) -> Result<(), Self::Error> {
        (**self).execute(sql)
    }

    fn in_transaction(&self) -> Option<bool> {
        (**self).in_transaction()
    }

    fn is_active(&self) -> bool {
        (**self).is_active()
    }

    fn mark_broken(&mut self) {
        (**self).mark_broken()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::recording::RecordingConnection;
    use crate::transaction::TransactionManager;

    #[test]
    fn test_borrowed_connection() {
        let mut conn = RecordingConnection::new();
        {
            let mut tm = TransactionManager::new(&mut conn);
            tm.transaction("borrowed", |tx| tx.execute("SELECT 1")).unwrap();
        }

        assert_eq!(conn.statements(), ["BEGIN;", "SELECT 1", "COMMIT;"]);
    }

    #[test]
    fn test_boxed_connection() {
        let boxed: Box<RecordingConnection> = Box::new(RecordingConnection::new());
        let mut tm = TransactionManager::new(boxed);

        let mut scope = tm.begin_transaction("boxed").unwrap();
        scope.create_savepoint("a").unwrap();
        assert_eq!(scope.connection().in_transaction(), Some(true));
        assert!(scope.connection().is_active());
    }
}
