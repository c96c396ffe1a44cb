// ============================================================================
// savepoint-tx Library
// ============================================================================

//! Scoped SQL transactions with nested named savepoints.
//!
//! A [`TransactionManager`] wraps one [`Connection`] and sequences a
//! multi-step operation (insert a sale header, add line items, adjust stock)
//! inside a single engine transaction. Each step can drop a savepoint; a
//! failed step can roll back to the last good one, and any failure that
//! leaves the scope rolls the whole transaction back.
//!
//! ```
//! use savepoint_tx::{RecordingConnection, TransactionManager, TxError};
//! use savepoint_tx::catalog::{SALE_ITEMS_ADDED, SALE_START};
//!
//! #[derive(Debug, thiserror::Error)]
//! enum SaleError {
//!     #[error("insufficient stock")]
//!     InsufficientStock,
//!     #[error(transparent)]
//!     Tx(#[from] TxError),
//! }
//!
//! let mut manager = TransactionManager::new(RecordingConnection::new());
//!
//! let result: Result<(), SaleError> = manager.transaction("record_sale", |tx| {
//!     tx.create_savepoint(SALE_START)?;
//!     tx.execute("INSERT INTO sales (id, customer) VALUES (1, 'walk-in')")?;
//!     tx.create_savepoint(SALE_ITEMS_ADDED)?;
//!     // Validate before touching the engine; the scope rolls back for us.
//!     Err(SaleError::InsufficientStock)
//! });
//!
//! assert!(matches!(result, Err(SaleError::InsufficientStock)));
//! assert!(!manager.is_active());
//! assert_eq!(manager.connection().statements().last().unwrap(), "ROLLBACK;");
//! ```

pub mod catalog;
pub mod connection;
pub mod core;
pub mod transaction;

pub use crate::core::{EngineFailure, Result, TxError};
pub use catalog::SavepointCatalog;
pub use connection::{
    Connection,
    config::{PoolConfig, TransactionConfig},
    pool::{ConnectionFactory, ConnectionPool, PoolGuard, PoolStats},
    recording::{EngineError, RecordingConnection},
};
pub use transaction::{
    SavepointId, Statement, TransactionId, TransactionInfo, TransactionManager, TransactionScope,
    TransactionState,
};
