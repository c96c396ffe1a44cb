// ============================================================================
// Savepoint Identifiers
// ============================================================================
//
// Ids are `{prefix}{label}_{sequence}`. The sequence comes from a
// per-transaction counter that never goes backwards, so an id handed out once
// is never handed out again inside the same transaction.
//
// ============================================================================

use crate::connection::config::TransactionConfig;
use crate::core::{Result, TxError};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use std::fmt;

lazy_static! {
    static ref IDENTIFIER: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
}

/// True for a plain, unquoted SQL identifier
pub(crate) fn is_identifier(candidate: &str) -> bool {
    IDENTIFIER.is_match(candidate)
}

/// Identifier of a savepoint inside one transaction
#[derive(Debug, Clone, Serialize)]
pub struct SavepointId {
    name: String,
    label: String,
    sequence: u64,
}

impl SavepointId {
    /// Build the id for `label`, checking it against the dialect first
    pub(crate) fn generate(label: &str, sequence: u64, config: &TransactionConfig) -> Result<Self> {
        if !is_identifier(label) {
            return Err(TxError::InvalidLabel(
                label.to_string(),
                "labels must start with a letter or underscore and contain only letters, digits and underscores".into(),
            ));
        }

        let name = format!("{}{}_{}", config.savepoint_prefix, label, sequence);
        if name.len() > config.max_identifier_len {
            return Err(TxError::InvalidLabel(
                label.to_string(),
                format!(
                    "savepoint id '{}' exceeds {} characters",
                    name, config.max_identifier_len
                ),
            ));
        }

        Ok(Self {
            name,
            label: label.to_string(),
            sequence,
        })
    }

    /// Full id as sent to the engine
    pub fn as_str(&self) -> &str {
        &self.name
    }

    /// Label the caller passed to `create_savepoint`
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl PartialEq for SavepointId {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for SavepointId {}

impl std::hash::Hash for SavepointId {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl PartialEq<str> for SavepointId {
    fn eq(&self, other: &str) -> bool {
        self.name == other
    }
}

impl PartialEq<&str> for SavepointId {
    fn eq(&self, other: &&str) -> bool {
        self.name == *other
    }
}

impl AsRef<str> for SavepointId {
    fn as_ref(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for SavepointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
