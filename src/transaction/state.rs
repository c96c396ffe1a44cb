// ============================================================================
// Transaction State
// ============================================================================
//
// Bookkeeping for one open transaction: its savepoint stack and the counter
// that numbers new savepoints. Nothing in here talks to the engine; the
// manager issues statements first and mutates this state only on success.
//
// ============================================================================

use super::savepoint::SavepointId;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Global transaction ID counter
static NEXT_TXN_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Generate a new unique transaction ID
    pub fn new() -> Self {
        TransactionId(NEXT_TXN_ID.fetch_add(1, Ordering::SeqCst))
    }

    /// Get the raw ID value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "txn_{}", self.0)
    }
}

/// Manager lifecycle
///
/// ```text
/// Idle ──begin──> Active ──commit / rollback / forced──> Idle
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TransactionState {
    Idle,
    Active,
}

impl TransactionState {
    pub fn is_active(&self) -> bool {
        matches!(self, TransactionState::Active)
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionState::Idle => write!(f, "IDLE"),
            TransactionState::Active => write!(f, "ACTIVE"),
        }
    }
}

/// One open transaction
#[derive(Debug)]
pub(crate) struct Transaction {
    id: TransactionId,
    operation: String,
    savepoints: Vec<SavepointId>,
    next_sequence: u64,
    /// Set by rollback-to, cleared by the next savepoint
    rewound: bool,
    start_time: Instant,
    pub(crate) span: tracing::Span,
}

impl Transaction {
    pub(crate) fn new(operation: &str) -> Self {
        let id = TransactionId::new();
        let span = tracing::info_span!("transaction", operation = %operation, id = %id);
        Self {
            id,
            operation: operation.to_string(),
            savepoints: Vec::new(),
            next_sequence: 0,
            rewound: false,
            start_time: Instant::now(),
            span,
        }
    }

    pub(crate) fn id(&self) -> TransactionId {
        self.id
    }

    pub(crate) fn operation(&self) -> &str {
        &self.operation
    }

    pub(crate) fn savepoints(&self) -> &[SavepointId] {
        &self.savepoints
    }

    pub(crate) fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    pub(crate) fn is_rewound(&self) -> bool {
        self.rewound
    }

    pub(crate) fn duration(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub(crate) fn position(&self, id: &str) -> Option<usize> {
        self.savepoints.iter().position(|sp| sp == id)
    }

    /// Record a savepoint the engine accepted
    pub(crate) fn push(&mut self, id: SavepointId) {
        self.next_sequence = self.next_sequence.max(id.sequence() + 1);
        self.savepoints.push(id);
        self.rewound = false;
    }

    /// Drop every savepoint after `index`
    pub(crate) fn truncate_after(&mut self, index: usize) -> Vec<SavepointId> {
        self.rewound = true;
        self.savepoints.split_off(index + 1)
    }

    /// Forget exactly one savepoint
    pub(crate) fn remove(&mut self, index: usize) -> SavepointId {
        self.savepoints.remove(index)
    }

    pub(crate) fn info(&self) -> TransactionInfo {
        TransactionInfo {
            id: self.id,
            operation: self.operation.clone(),
            savepoints: self.savepoints.clone(),
            duration: self.duration(),
            rewound: self.rewound,
        }
    }
}

/// Snapshot of the active transaction
#[derive(Debug, Clone, Serialize)]
pub struct TransactionInfo {
    pub id: TransactionId,
    pub operation: String,
    pub savepoints: Vec<SavepointId>,
    pub duration: Duration,
    pub rewound: bool,
}
