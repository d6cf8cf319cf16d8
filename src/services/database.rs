use async_trait::async_trait;
use std::path::Path;

use super::ddl::Statement;
use crate::error::AppError;

/// The operations provisioning needs from a database server.
///
/// Administrative statements go through [`Database::execute`]; existence
/// checks and verification go through the scalar queries; bulk loading goes
/// through [`Database::copy_in`], which streams a file into a `COPY ... FROM
/// STDIN` statement.
#[async_trait]
pub trait Database: Send + Sync {
    /// Name of the database this connection is attached to.
    fn name(&self) -> &str;

    async fn execute(&self, statement: &Statement) -> Result<(), AppError>;

    /// Runs a query returning a single boolean.
    async fn query_bool(&self, statement: &Statement) -> Result<bool, AppError>;

    /// Runs a query returning a single `bigint`.
    async fn query_count(&self, statement: &Statement) -> Result<i64, AppError>;

    /// Streams `source` into a `COPY ... FROM STDIN` statement and returns the
    /// number of rows the server reports as copied.
    async fn copy_in(&self, statement: &Statement, source: &Path) -> Result<u64, AppError>;
}
