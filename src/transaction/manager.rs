// ============================================================================
// Transaction Manager
// ============================================================================

use super::savepoint::SavepointId;
use super::scope::TransactionScope;
use super::state::{Transaction, TransactionId, TransactionInfo, TransactionState};
use super::statement::Statement;
use crate::connection::Connection;
use crate::connection::config::TransactionConfig;
use crate::core::{Result, TxError};
use log::{debug, info, warn};

/// Scoped transactions with named savepoints over one connection
///
/// Build one manager per logical operation (or per checked-out pooled
/// connection). Statements go to the engine first; local bookkeeping only
/// changes once the engine accepted them.
///
/// # Examples
///
/// ```
/// use savepoint_tx::{RecordingConnection, TransactionManager, TxError};
///
/// # fn main() -> Result<(), TxError> {
/// let mut manager = TransactionManager::new(RecordingConnection::new());
///
/// manager.transaction("record_sale", |tx| {
///     let start = tx.create_savepoint("sale_start")?;
///     tx.execute("INSERT INTO sales (id) VALUES (1)")?;
///     tx.create_savepoint("sale_items_added")?;
///     tx.rollback_to_savepoint(&start)?;
///     tx.create_savepoint("sale_retry")?;
///     Ok::<_, TxError>(())
/// })?;
///
/// assert!(!manager.is_active());
/// # Ok(())
/// # }
/// ```
pub struct TransactionManager<C: Connection> {
    connection: C,
    config: TransactionConfig,
    current: Option<Transaction>,
}

/// Send `sql` to the engine inside `span`
fn run<C: Connection>(connection: &mut C, span: &tracing::Span, sql: &str) -> Result<()> {
    let _entered = span.enter();
    debug!("executing `{}`", sql);
    connection.execute(sql).map_err(|e| TxError::engine(sql, e))
}

impl<C: Connection> TransactionManager<C> {
    /// Wrap `connection` using the default dialect
    pub fn new(connection: C) -> Self {
        Self {
            connection,
            config: TransactionConfig::default(),
            current: None,
        }
    }

    /// Wrap `connection` with a custom dialect
    pub fn with_config(connection: C, config: TransactionConfig) -> Result<Self> {
        config.validate().map_err(TxError::Config)?;
        Ok(Self {
            connection,
            config,
            current: None,
        })
    }

    pub fn config(&self) -> &TransactionConfig {
        &self.config
    }

    pub fn connection(&self) -> &C {
        &self.connection
    }

    /// Direct access to the connection, bypassing savepoint bookkeeping
    pub fn connection_mut(&mut self) -> &mut C {
        &mut self.connection
    }

    pub fn state(&self) -> TransactionState {
        if self.current.is_some() {
            TransactionState::Active
        } else {
            TransactionState::Idle
        }
    }

    pub fn is_active(&self) -> bool {
        self.current.is_some()
    }

    /// Savepoints of the active transaction, oldest first; empty when idle
    pub fn savepoints(&self) -> &[SavepointId] {
        self.current
            .as_ref()
            .map(|tx| tx.savepoints())
            .unwrap_or(&[])
    }

    pub fn info(&self) -> Option<TransactionInfo> {
        self.current.as_ref().map(|tx| tx.info())
    }

    pub(crate) fn current_id(&self) -> Option<TransactionId> {
        self.current.as_ref().map(|tx| tx.id())
    }

    /// Open a transaction and return the guard that owns it
    ///
    /// The guard commits through [`TransactionScope::commit`]; dropping it
    /// any other way (early return, `?`, panic) rolls the transaction back.
    ///
    /// # Errors
    /// `IllegalState` if a transaction is already active, `Transaction` if the
    /// engine rejects the begin statement (the manager stays idle).
    pub fn begin_transaction(&mut self, operation_name: &str) -> Result<TransactionScope<'_, C>> {
        if let Some(tx) = &self.current {
            return Err(TxError::IllegalState(format!(
                "cannot begin '{}': transaction {} ('{}') is still active",
                operation_name,
                tx.id(),
                tx.operation()
            )));
        }

        let tx = Transaction::new(operation_name);
        let sql = Statement::Begin.render(&self.config);
        run(&mut self.connection, &tx.span, &sql)?;

        let id = tx.id();
        info!("Transaction {} started: {}", id, operation_name);
        self.current = Some(tx);

        Ok(TransactionScope::new(self, id))
    }

    /// Run `f` inside a transaction
    ///
    /// Commits when `f` returns `Ok`. When `f` returns `Err` the transaction is
    /// rolled back and that error is returned unchanged; a failing rollback is
    /// logged and does not replace it.
    pub fn transaction<T, E, F>(&mut self, operation_name: &str, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&mut TransactionScope<'_, C>) -> std::result::Result<T, E>,
        E: From<TxError>,
    {
        let mut scope = self.begin_transaction(operation_name)?;

        match f(&mut scope) {
            Ok(value) => {
                // `f` may already have forced the transaction to an end.
                if scope.is_open() {
                    scope.commit()?;
                }
                Ok(value)
            }
            Err(err) => {
                scope.abort();
                Err(err)
            }
        }
    }

    /// Create a savepoint named after `label`
    ///
    /// # Errors
    /// `IllegalState` when no transaction is active and `InvalidLabel` for a
    /// label that cannot form an identifier; neither issues a statement.
    pub fn create_savepoint(&mut self, label: &str) -> Result<SavepointId> {
        let Some(tx) = self.current.as_mut() else {
            return Err(TxError::IllegalState(format!(
                "cannot create savepoint '{}' without an active transaction",
                label
            )));
        };

        let id = SavepointId::generate(label, tx.next_sequence(), &self.config)?;
        let sql = Statement::Savepoint(id.as_str()).render(&self.config);
        run(&mut self.connection, &tx.span, &sql)?;

        debug!("Savepoint {} created in {}", id, tx.id());
        tx.push(id.clone());
        Ok(id)
    }

    /// Roll back to `savepoint`, discarding every savepoint created after it
    ///
    /// The target itself stays valid. Until a new savepoint is created the
    /// transaction counts as rewound (see
    /// [`TransactionConfig::require_savepoint_after_rewind`]).
    ///
    /// # Errors
    /// `NotFound` when `savepoint` is not in the current sequence (always the
    /// case while idle); no statement is issued.
    pub fn rollback_to_savepoint(&mut self, savepoint: impl AsRef<str>) -> Result<()> {
        let name = savepoint.as_ref();
        let Some(tx) = self.current.as_mut() else {
            return Err(TxError::NotFound(name.to_string()));
        };
        let Some(index) = tx.position(name) else {
            return Err(TxError::NotFound(name.to_string()));
        };

        let sql = Statement::RollbackTo(name).render(&self.config);
        run(&mut self.connection, &tx.span, &sql)?;

        let discarded = tx.truncate_after(index);
        info!(
            "Transaction {} rolled back to {} ({} later savepoint(s) discarded)",
            tx.id(),
            name,
            discarded.len()
        );
        Ok(())
    }

    /// Release `savepoint` if it exists
    ///
    /// Only that entry is removed; savepoints before and after it remain.
    /// Returns `false` without issuing anything when the id is unknown.
    pub fn release_savepoint(&mut self, savepoint: impl AsRef<str>) -> Result<bool> {
        let name = savepoint.as_ref();
        let Some(tx) = self.current.as_mut() else {
            return Ok(false);
        };
        let Some(index) = tx.position(name) else {
            debug!("release of unknown savepoint {} ignored", name);
            return Ok(false);
        };

        let sql = Statement::Release(name).render(&self.config);
        run(&mut self.connection, &tx.span, &sql)?;

        tx.remove(index);
        debug!("Savepoint {} released in {}", name, tx.id());
        Ok(true)
    }

    /// Execute a statement on the bound connection
    ///
    /// # Errors
    /// `IllegalState` while the transaction is rewound and the config demands
    /// a fresh savepoint first; `Transaction` when the engine rejects `sql`.
    pub fn execute(&mut self, sql: &str) -> Result<()> {
        let span = match &self.current {
            Some(tx) => {
                if tx.is_rewound() && self.config.require_savepoint_after_rewind {
                    return Err(TxError::IllegalState(format!(
                        "transaction {} was rolled back to a savepoint; create a new savepoint before writing",
                        tx.id()
                    )));
                }
                tx.span.clone()
            }
            None => tracing::Span::none(),
        };

        run(&mut self.connection, &span, sql)
    }

    /// Commit immediately, bypassing the scope
    ///
    /// The manager is idle afterwards even if the engine rejects the commit;
    /// in that case a rollback is attempted and the commit error returned.
    pub fn commit_all(&mut self) -> Result<()> {
        let Some(tx) = self.current.take() else {
            return Err(TxError::IllegalState("no active transaction to commit".into()));
        };

        let sql = Statement::Commit.render(&self.config);
        match run(&mut self.connection, &tx.span, &sql) {
            Ok(()) => {
                info!(
                    "Transaction {} committed: {} ({:?})",
                    tx.id(),
                    tx.operation(),
                    tx.duration()
                );
                Ok(())
            }
            Err(err) => {
                warn!("Commit of {} ('{}') failed: {}", tx.id(), tx.operation(), err);
                let rollback = Statement::Rollback.render(&self.config);
                if let Err(rollback_err) = run(&mut self.connection, &tx.span, &rollback) {
                    warn!("Rollback after failed commit of {} failed: {}", tx.id(), rollback_err);
                }
                self.connection.mark_broken();
                Err(err)
            }
        }
    }

    /// Roll back immediately, bypassing the scope
    ///
    /// Always issues the rollback statement, so it also clears an engine-side
    /// transaction the manager no longer tracks. The manager is idle
    /// afterwards whether or not the statement succeeds.
    pub fn rollback_all(&mut self) -> Result<()> {
        let tx = self.current.take();
        let sql = Statement::Rollback.render(&self.config);

        let result = match &tx {
            Some(tx) => {
                warn!(
                    "Transaction {} rolled back: {} ({} savepoint(s) discarded)",
                    tx.id(),
                    tx.operation(),
                    tx.savepoints().len()
                );
                run(&mut self.connection, &tx.span, &sql)
            }
            None => {
                debug!("rollback issued with no tracked transaction");
                run(&mut self.connection, &tracing::Span::none(), &sql)
            }
        };
        if result.is_err() {
            self.connection.mark_broken();
        }
        result
    }

    /// Hand the connection back, rolling back an active transaction first
    ///
    /// # Errors
    /// If that rollback fails the connection is marked broken and dropped
    /// with the manager; a pooled connection is then discarded, not reused.
    pub fn into_inner(mut self) -> Result<C> {
        if self.is_active() {
            self.rollback_all()?;
        }
        Ok(self.connection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::recording::RecordingConnection;

    fn manager() -> TransactionManager<RecordingConnection> {
        TransactionManager::new(RecordingConnection::new())
    }

    #[test]
    fn test_begin_and_commit() {
        let mut tm = manager();

        let scope = tm.begin_transaction("sale").unwrap();
        assert!(scope.is_active());
        scope.commit().unwrap();

        assert!(!tm.is_active());
        assert_eq!(tm.state(), TransactionState::Idle);
        assert_eq!(tm.connection().statements(), ["BEGIN;", "COMMIT;"]);
    }

    #[test]
    fn test_savepoint_ids_are_unique_for_reused_labels() {
        let mut tm = manager();
        let mut scope = tm.begin_transaction("inventory").unwrap();

        let a = scope.create_savepoint("step").unwrap();
        let b = scope.create_savepoint("step").unwrap();
        let c = scope.create_savepoint("step").unwrap();

        assert_eq!(a, "step_0");
        assert_eq!(b, "step_1");
        assert_eq!(c, "step_2");
    }

    #[test]
    fn test_scenario_rollback_to_first_savepoint() {
        let mut tm = manager();
        let mut scope = tm.begin_transaction("sale").unwrap();

        scope.create_savepoint("start").unwrap();
        scope.create_savepoint("mid").unwrap();
        scope.rollback_to_savepoint("start_0").unwrap();

        assert_eq!(scope.savepoints(), ["start_0"]);
        assert!(scope.connection().statements().contains(&"ROLLBACK TO SAVEPOINT start_0;".to_string()));
    }

    #[test]
    fn test_no_resurrection_after_rollback() {
        let mut tm = manager();
        let mut scope = tm.begin_transaction("sale").unwrap();

        scope.create_savepoint("start").unwrap();
        let mid = scope.create_savepoint("mid").unwrap();
        scope.rollback_to_savepoint("start_0").unwrap();
        let again = scope.create_savepoint("mid").unwrap();

        assert_ne!(again, mid);
        assert_eq!(again, "mid_2");
    }

    #[test]
    fn test_create_savepoint_requires_active_transaction() {
        let mut tm = manager();

        let err = tm.create_savepoint("start").unwrap_err();
        assert!(err.is_illegal_state());
        assert!(tm.connection().statements().is_empty());
    }

    #[test]
    fn test_rollback_to_unknown_savepoint() {
        let mut tm = manager();
        let mut scope = tm.begin_transaction("sale").unwrap();
        scope.create_savepoint("start").unwrap();

        let err = scope.rollback_to_savepoint("start_7").unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(scope.connection().statements(), ["BEGIN;", "SAVEPOINT start_0;"]);
    }

    #[test]
    fn test_rollback_to_savepoint_while_idle() {
        let mut tm = manager();
        assert!(tm.rollback_to_savepoint("start_0").unwrap_err().is_not_found());
        assert!(tm.connection().statements().is_empty());
    }

    #[test]
    fn test_release_then_rollback_fails() {
        let mut tm = manager();
        let mut scope = tm.begin_transaction("sale").unwrap();

        let a = scope.create_savepoint("a").unwrap();
        assert!(scope.release_savepoint(&a).unwrap());

        assert!(scope.rollback_to_savepoint(&a).unwrap_err().is_not_found());
    }

    #[test]
    fn test_release_keeps_later_savepoints() {
        let mut tm = manager();
        let mut scope = tm.begin_transaction("sale").unwrap();

        scope.create_savepoint("a").unwrap();
        let b = scope.create_savepoint("b").unwrap();
        scope.create_savepoint("c").unwrap();

        assert!(scope.release_savepoint(&b).unwrap());
        assert_eq!(scope.savepoints(), ["a_0", "c_2"]);

        assert!(!scope.release_savepoint(&b).unwrap());
        assert!(!scope.release_savepoint("never").unwrap());
    }

    #[test]
    fn test_execute_blocked_after_rewind() {
        let mut tm = manager();
        let mut scope = tm.begin_transaction("sale").unwrap();

        let start = scope.create_savepoint("start").unwrap();
        scope.execute("INSERT INTO sales (id) VALUES (1)").unwrap();
        scope.rollback_to_savepoint(&start).unwrap();

        assert!(scope.info().unwrap().rewound);
        assert!(scope.execute("INSERT INTO sales (id) VALUES (2)").unwrap_err().is_illegal_state());

        scope.create_savepoint("retry").unwrap();
        scope.execute("INSERT INTO sales (id) VALUES (2)").unwrap();
    }

    #[test]
    fn test_execute_after_rewind_when_allowed() {
        let config = TransactionConfig::default().require_savepoint_after_rewind(false);
        let mut tm = TransactionManager::with_config(RecordingConnection::new(), config).unwrap();
        let mut scope = tm.begin_transaction("sale").unwrap();

        let start = scope.create_savepoint("start").unwrap();
        scope.rollback_to_savepoint(&start).unwrap();
        scope.execute("INSERT INTO sales (id) VALUES (2)").unwrap();
    }

    #[test]
    fn test_begin_twice_is_illegal() {
        let mut tm = manager();
        let mut scope = tm.begin_transaction("first").unwrap();

        let err = scope.begin_transaction("second").err().unwrap();
        assert!(err.is_illegal_state());
        assert!(scope.is_open());
    }

    #[test]
    fn test_commit_all_and_rollback_all() {
        let mut tm = manager();
        {
            let mut scope = tm.begin_transaction("forced").unwrap();
            scope.create_savepoint("a").unwrap();
            scope.commit_all().unwrap();
            assert!(!scope.is_open());
        }
        assert!(!tm.is_active());
        assert!(tm.savepoints().is_empty());
        assert!(tm.commit_all().unwrap_err().is_illegal_state());

        {
            let mut scope = tm.begin_transaction("forced").unwrap();
            scope.create_savepoint("a").unwrap();
            scope.rollback_all().unwrap();
        }
        assert!(!tm.is_active());
        assert_eq!(
            tm.connection().statements(),
            [
                "BEGIN;",
                "SAVEPOINT a_0;",
                "COMMIT;",
                "BEGIN;",
                "SAVEPOINT a_0;",
                "ROLLBACK;",
            ]
        );
    }

    #[test]
    fn test_begin_failure_stays_idle() {
        let mut conn = RecordingConnection::new();
        conn.fail_on("BEGIN");
        let mut tm = TransactionManager::new(conn);

        let err = tm.begin_transaction("sale").err().unwrap();
        assert!(err.is_engine_failure());
        assert!(!tm.is_active());
    }

    #[test]
    fn test_failed_commit_goes_idle() {
        let mut conn = RecordingConnection::new();
        conn.fail_on("COMMIT");
        let mut tm = TransactionManager::new(conn);

        let mut scope = tm.begin_transaction("sale").unwrap();
        scope.create_savepoint("a").unwrap();
        let err = scope.commit().unwrap_err();

        assert!(err.is_engine_failure());
        assert!(!tm.is_active());
        assert_eq!(tm.connection().statements().last().unwrap(), "ROLLBACK;");
        assert!(tm.connection().is_broken());
    }

    #[test]
    fn test_failed_rollback_marks_connection_broken() {
        let mut conn = RecordingConnection::new();
        conn.fail_on("ROLLBACK");
        let mut tm = TransactionManager::new(conn);

        let mut scope = tm.begin_transaction("sale").unwrap();
        scope.create_savepoint("a").unwrap();
        assert!(scope.rollback_all().unwrap_err().is_engine_failure());
        drop(scope);

        assert!(!tm.is_active());
        assert!(tm.connection().is_broken());
    }

    #[test]
    fn test_clean_rollback_leaves_connection_usable() {
        let mut tm = manager();
        tm.begin_transaction("sale").unwrap().rollback().unwrap();

        assert!(!tm.connection().is_broken());
    }

    #[test]
    fn test_invalid_label_issues_nothing() {
        let mut tm = manager();
        let mut scope = tm.begin_transaction("sale").unwrap();

        let err = scope.create_savepoint("x; DROP TABLE sales").unwrap_err();
        assert!(matches!(err, TxError::InvalidLabel(..)));
        assert_eq!(scope.connection().statements(), ["BEGIN;"]);
    }

    #[test]
    fn test_into_inner_rolls_back() {
        let mut tm = manager();
        let scope = tm.begin_transaction("sale").unwrap();
        std::mem::forget(scope);
        assert!(tm.is_active());

        let conn = tm.into_inner().unwrap();
        assert_eq!(conn.statements(), ["BEGIN;", "ROLLBACK;"]);
        assert!(!conn.in_transaction().unwrap());
    }

    #[test]
    fn test_into_inner_failed_rollback_marks_connection_broken() {
        let mut conn = RecordingConnection::new();
        conn.fail_on("ROLLBACK");
        {
            let mut tm = TransactionManager::new(&mut conn);
            let scope = tm.begin_transaction("sale").unwrap();
            std::mem::forget(scope);

            assert!(tm.into_inner().unwrap_err().is_engine_failure());
        }

        assert!(conn.is_broken());
        assert!(conn.in_transaction().unwrap());
    }
}
