use super::manager::TransactionManager;
use super::state::TransactionId;
use crate::connection::Connection;
use crate::core::{Result, TxError};
use log::warn;
use std::ops::{Deref, DerefMut};

/// RAII guard for one open transaction
///
/// Derefs to the [`TransactionManager`], so savepoints and statements are
/// issued straight through it. Commit with [`commit`](Self::commit);
/// any other exit rolls back.
pub struct TransactionScope<'m, C: Connection> {
    manager: &'m mut TransactionManager<C>,
    id: TransactionId,
}

impl<'m, C: Connection> TransactionScope<'m, C> {
    pub(crate) fn new(manager: &'m mut TransactionManager<C>, id: TransactionId) -> Self {
        Self { manager, id }
    }

    /// Id of the transaction this scope opened
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// False once the transaction was committed or rolled back, including
    /// through `commit_all` / `rollback_all`
    pub fn is_open(&self) -> bool {
        self.manager.current_id() == Some(self.id)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(TxError::IllegalState(format!(
                "transaction {} was already terminated",
                self.id
            )))
        }
    }

    /// Commit and close the scope
    pub fn commit(self) -> Result<()> {
        self.ensure_open()?;
        self.manager.commit_all()
    }

    /// Roll back and close the scope
    pub fn rollback(self) -> Result<()> {
        self.ensure_open()?;
        self.manager.rollback_all()
    }

    /// Roll back on a failure path, keeping the caller's error primary
    pub(crate) fn abort(&mut self) {
        if !self.is_open() {
            return;
        }
        if let Err(err) = self.manager.rollback_all() {
            warn!("Rollback of {} failed: {}", self.id, err);
        }
    }
}

impl<C: Connection> Deref for TransactionScope<'_, C> {
    type Target = TransactionManager<C>;

    fn deref(&self) -> &Self::Target {
        self.manager
    }
}

impl<C: Connection> DerefMut for TransactionScope<'_, C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.manager
    }
}

impl<C: Connection> Drop for TransactionScope<'_, C> {
    fn drop(&mut self) {
        if !self.is_open() {
            return;
        }
        if std::thread::panicking() {
            warn!("Transaction {} rolled back while unwinding", self.id);
        } else {
            warn!("Transaction {} dropped without commit, rolling back", self.id);
        }
        self.abort();
    }
}
