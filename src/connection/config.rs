use crate::core::{Result, TxError};
use crate::transaction::savepoint::is_identifier;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// SQL dialect and policy used by a [`TransactionManager`](crate::TransactionManager)
///
/// Defaults match PostgreSQL-style engines: `BEGIN` / `COMMIT` / `ROLLBACK`,
/// standard `SAVEPOINT` syntax and a 63 byte identifier limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionConfig {
    /// Statement that opens a transaction
    pub begin_statement: String,

    /// Statement that commits a transaction
    pub commit_statement: String,

    /// Statement that rolls back a whole transaction
    pub rollback_statement: String,

    /// Prepended to every generated savepoint id
    pub savepoint_prefix: String,

    /// Appended to every issued statement
    pub statement_terminator: String,

    /// Longest savepoint id the engine accepts
    pub max_identifier_len: usize,

    /// Refuse `execute` after a rollback-to until a fresh savepoint exists
    pub require_savepoint_after_rewind: bool,
}

impl TransactionConfig {
    pub fn new() -> Self {
        Self {
            begin_statement: "BEGIN".to_string(),
            commit_statement: "COMMIT".to_string(),
            rollback_statement: "ROLLBACK".to_string(),
            savepoint_prefix: String::new(),
            statement_terminator: ";".to_string(),
            max_identifier_len: 63,
            require_savepoint_after_rewind: true,
        }
    }

    /// PostgreSQL with an explicit `BEGIN TRANSACTION`
    pub fn postgres() -> Self {
        Self::new().begin_statement("BEGIN TRANSACTION")
    }

    /// MySQL / MariaDB
    pub fn mysql() -> Self {
        Self::new()
            .begin_statement("START TRANSACTION")
            .max_identifier_len(64)
    }

    /// Set the begin statement
    pub fn begin_statement(mut self, sql: &str) -> Self {
        self.begin_statement = sql.to_string();
        self
    }

    /// Set the commit statement
    pub fn commit_statement(mut self, sql: &str) -> Self {
        self.commit_statement = sql.to_string();
        self
    }

    /// Set the rollback statement
    pub fn rollback_statement(mut self, sql: &str) -> Self {
        self.rollback_statement = sql.to_string();
        self
    }

    /// Set the savepoint id prefix
    pub fn savepoint_prefix(mut self, prefix: &str) -> Self {
        self.savepoint_prefix = prefix.to_string();
        self
    }

    /// Set the statement terminator
    pub fn statement_terminator(mut self, terminator: &str) -> Self {
        self.statement_terminator = terminator.to_string();
        self
    }

    /// Set the identifier length limit
    pub fn max_identifier_len(mut self, len: usize) -> Self {
        self.max_identifier_len = len;
        self
    }

    /// Toggle the rewind guard on `execute`
    pub fn require_savepoint_after_rewind(mut self, required: bool) -> Self {
        self.require_savepoint_after_rewind = required;
        self
    }

    /// Parse from a JSON document; missing keys keep their defaults
    ///
    /// # Examples
    ///
    /// ```
    /// # use savepoint_tx::TransactionConfig;
    /// let config = TransactionConfig::from_json(r#"{ "savepoint_prefix": "sp_" }"#).unwrap();
    /// assert_eq!(config.savepoint_prefix, "sp_");
    /// assert_eq!(config.begin_statement, "BEGIN");
    /// ```
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| TxError::Config(e.to_string()))?;
        config.validate().map_err(TxError::Config)?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        for (name, sql) in [
            ("begin_statement", &self.begin_statement),
            ("commit_statement", &self.commit_statement),
            ("rollback_statement", &self.rollback_statement),
        ] {
            if sql.trim().is_empty() {
                return Err(format!("{} cannot be empty", name));
            }
        }

        if !self.savepoint_prefix.is_empty() && !is_identifier(&self.savepoint_prefix) {
            return Err(format!(
                "savepoint_prefix '{}' is not a valid identifier",
                self.savepoint_prefix
            ));
        }

        if !matches!(self.statement_terminator.as_str(), "" | ";") {
            return Err("statement_terminator must be empty or ';'".to_string());
        }

        // Room for the prefix, a one-character label and "_0".
        if self.max_identifier_len < self.savepoint_prefix.len() + 3 {
            return Err("max_identifier_len is too small for any savepoint id".to_string());
        }

        Ok(())
    }
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Connection pool configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum number of connections in pool
    pub max_connections: usize,

    /// Minimum number of connections in pool
    pub min_connections: usize,

    /// How long `get_connection` waits for a free slot
    #[serde(with = "millis")]
    pub connect_timeout: Duration,

    /// Connection idle timeout
    #[serde(with = "opt_millis")]
    pub idle_timeout: Option<Duration>,

    /// Maximum connection lifetime
    #[serde(with = "opt_millis")]
    pub max_lifetime: Option<Duration>,
}

impl PoolConfig {
    pub fn new() -> Self {
        Self {
            max_connections: 10,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Some(Duration::from_secs(600)), // 10 minutes
            max_lifetime: Some(Duration::from_secs(1800)), // 30 minutes
        }
    }

    /// Set maximum connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set minimum connections
    pub fn min_connections(mut self, min: usize) -> Self {
        self.min_connections = min;
        self
    }

    /// Set connection timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set idle timeout
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Set maximum lifetime
    pub fn max_lifetime(mut self, lifetime: Duration) -> Self {
        self.max_lifetime = Some(lifetime);
        self
    }

    /// Parse from a JSON document; durations are given in milliseconds
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| TxError::Config(e.to_string()))?;
        config.validate().map_err(TxError::Config)?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.max_connections == 0 {
            return Err("max_connections must be > 0".to_string());
        }

        if self.min_connections > self.max_connections {
            return Err("min_connections cannot exceed max_connections".to_string());
        }

        Ok(())
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::new()
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod opt_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_some(&(duration.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TransactionConfig::default();
        assert_eq!(config.begin_statement, "BEGIN");
        assert_eq!(config.savepoint_prefix, "");
        assert_eq!(config.max_identifier_len, 63);
        assert!(config.require_savepoint_after_rewind);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_pattern() {
        let config = TransactionConfig::postgres()
            .savepoint_prefix("sp_")
            .statement_terminator("")
            .require_savepoint_after_rewind(false);

        assert_eq!(config.begin_statement, "BEGIN TRANSACTION");
        assert_eq!(config.savepoint_prefix, "sp_");
        assert_eq!(config.statement_terminator, "");
        assert!(!config.require_savepoint_after_rewind);
    }

    #[test]
    fn test_validate() {
        assert!(TransactionConfig::new().begin_statement("  ").validate().is_err());
        assert!(TransactionConfig::new().savepoint_prefix("sp-").validate().is_err());
        assert!(TransactionConfig::new().statement_terminator("GO").validate().is_err());
        assert!(TransactionConfig::new().max_identifier_len(2).validate().is_err());
    }

    #[test]
    fn test_from_json() {
        let config = TransactionConfig::from_json(
            r#"{ "begin_statement": "START TRANSACTION", "max_identifier_len": 64 }"#,
        )
        .unwrap();

        assert_eq!(config, TransactionConfig::mysql());
        assert!(TransactionConfig::from_json(r#"{ "savepoint_prefix": "1x" }"#).is_err());
        assert!(TransactionConfig::from_json("not json").is_err());
    }

    #[test]
    fn test_pool_config_from_json() {
        let config = PoolConfig::from_json(
            r#"{ "max_connections": 4, "connect_timeout": 250, "idle_timeout": null }"#,
        )
        .unwrap();

        assert_eq!(config.max_connections, 4);
        assert_eq!(config.min_connections, 1);
        assert_eq!(config.connect_timeout, Duration::from_millis(250));
        assert_eq!(config.idle_timeout, None);
        assert_eq!(config.max_lifetime, Some(Duration::from_secs(1800)));
    }

    #[test]
    fn test_pool_validate() {
        assert!(PoolConfig::new().validate().is_ok());
        assert!(PoolConfig::new().max_connections(0).validate().is_err());
        assert!(
            PoolConfig::new()
                .min_connections(10)
                .max_connections(5)
                .validate()
                .is_err()
        );
    }
}
