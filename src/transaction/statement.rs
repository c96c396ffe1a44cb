use crate::connection::config::TransactionConfig;

/// Transaction-control statements issued by the manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Statement<'a> {
    Begin,
    Commit,
    Rollback,
    Savepoint(&'a str),
    RollbackTo(&'a str),
    Release(&'a str),
}

impl Statement<'_> {
    /// Render the SQL text for the configured dialect
    pub fn render(&self, config: &TransactionConfig) -> String {
        let body = match self {
            Statement::Begin => config.begin_statement.clone(),
            Statement::Commit => config.commit_statement.clone(),
            Statement::Rollback => config.rollback_statement.clone(),
            Statement::Savepoint(id) => format!("SAVEPOINT {}", id),
            Statement::RollbackTo(id) => format!("ROLLBACK TO SAVEPOINT {}", id),
            Statement::Release(id) => format!("RELEASE SAVEPOINT {}", id),
        };
        format!("{}{}", body, config.statement_terminator)
    }
}
