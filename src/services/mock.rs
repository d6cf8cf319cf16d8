//! In-memory [`Database`] that records statements instead of running them.
//!
//! Used by `provision --dry-run` to print the plan and by tests to check the
//! order of statements. Queries are answered from canned responses keyed by
//! the exact SQL text, falling back to a default.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use super::database::Database;
use super::ddl::Statement;
use crate::error::AppError;

#[derive(Debug, Default)]
struct Recorded {
    statements: Vec<Statement>,
    copies: Vec<PathBuf>,
}

pub struct RecordingDatabase {
    name: String,
    recorded: Mutex<Recorded>,
    bools: HashMap<String, bool>,
    default_bool: bool,
    count: i64,
    copied_rows: u64,
    fail_on: Option<String>,
}

impl RecordingDatabase {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            recorded: Mutex::new(Recorded::default()),
            bools: HashMap::new(),
            default_bool: false,
            count: 0,
            copied_rows: 0,
            fail_on: None,
        }
    }

    /// Answer `statement` with `value` when queried.
    pub fn with_bool(mut self, statement: &Statement, value: bool) -> Self {
        self.bools.insert(statement.sql.clone(), value);
        self
    }

    pub fn with_default_bool(mut self, value: bool) -> Self {
        self.default_bool = value;
        self
    }

    pub fn with_count(mut self, count: i64) -> Self {
        self.count = count;
        self
    }

    pub fn with_copied_rows(mut self, rows: u64) -> Self {
        self.copied_rows = rows;
        self
    }

    /// Fail any statement whose SQL starts with `prefix`.
    pub fn with_failure_on(mut self, prefix: impl Into<String>) -> Self {
        self.fail_on = Some(prefix.into());
        self
    }

    pub async fn statements(&self) -> Vec<Statement> {
        self.recorded.lock().await.statements.clone()
    }

    pub async fn copies(&self) -> Vec<PathBuf> {
        self.recorded.lock().await.copies.clone()
    }

    async fn record(&self, statement: &Statement) -> Result<(), AppError> {
        self.recorded.lock().await.statements.push(statement.clone());

        match &self.fail_on {
            Some(prefix) if statement.sql.starts_with(prefix.as_str()) => Err(
                AppError::DatabaseError(format!("simulated failure: {}", statement)),
            ),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl Database for RecordingDatabase {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, statement: &Statement) -> Result<(), AppError> {
        self.record(statement).await
    }

    async fn query_bool(&self, statement: &Statement) -> Result<bool, AppError> {
        self.record(statement).await?;
        Ok(self.bools.get(&statement.sql).copied().unwrap_or(self.default_bool))
    }

    async fn query_count(&self, statement: &Statement) -> Result<i64, AppError> {
        self.record(statement).await?;
        Ok(self.count)
    }

    async fn copy_in(&self, statement: &Statement, source: &Path) -> Result<u64, AppError> {
        self.record(statement).await?;
        self.recorded.lock().await.copies.push(source.to_path_buf());
        Ok(self.copied_rows)
    }
}
