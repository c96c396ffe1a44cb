// ============================================================================
// Transaction Management Module
// ============================================================================
//
// Scoped transactions over a single connection with a stack of named
// savepoints:
// - create pushes a savepoint
// - rollback-to pops everything above its target
// - release removes exactly one entry
//
// ============================================================================

pub mod manager;
pub mod savepoint;
pub mod scope;
pub mod state;
pub mod statement;

pub use manager::TransactionManager;
pub use savepoint::SavepointId;
pub use scope::TransactionScope;
pub use state::{TransactionId, TransactionInfo, TransactionState};
pub use statement::Statement;
