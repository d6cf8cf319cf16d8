use async_trait::async_trait;
use bytes::Bytes;
use futures::{pin_mut, SinkExt};
use std::path::Path;
use tokio::io::AsyncReadExt;
use tokio_postgres::{Client, NoTls};
use tracing::{debug, error, info};

use super::database::Database;
use super::ddl::Statement;
use super::profiler::open_error;
use crate::config::PostgresConfig;
use crate::error::AppError;

const COPY_CHUNK_SIZE: usize = 64 * 1024;

/// A `tokio-postgres` connection to one database.
pub struct DbLoader {
    client: Client,
    database: String,
}

impl DbLoader {
    pub async fn connect(config: &PostgresConfig, database: &str) -> Result<Self, AppError> {
        info!("Connecting to PostgreSQL at {}:{}/{}", config.host, config.port, database);

        let (client, connection) = config
            .connect_config(database)
            .connect(NoTls)
            .await
            .map_err(|e| {
                error!("Failed to connect to {}: {}", database, e);
                AppError::DatabaseError(format!(
                    "Failed to connect to PostgreSQL at {}:{}/{}: {}",
                    config.host, config.port, database, e
                ))
            })?;

        // Spawn connection handler in background
        let name = database.to_string();
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("PostgreSQL connection error ({}): {}", name, e);
            }
        });

        debug!("Connected to {}", database);
        Ok(Self {
            client,
            database: database.to_string(),
        })
    }
}

#[async_trait]
impl Database for DbLoader {
    fn name(&self) -> &str {
        &self.database
    }

    async fn execute(&self, statement: &Statement) -> Result<(), AppError> {
        // Simple query protocol: CREATE DATABASE cannot run inside the
        // implicit transaction of an extended-protocol statement.
        self.client.batch_execute(&statement.sql).await.map_err(|e| {
            error!("Statement failed on {}: {}: {}", self.database, statement, e);
            AppError::DatabaseError(e.to_string())
        })
    }

    async fn query_bool(&self, statement: &Statement) -> Result<bool, AppError> {
        let row = self.client.query_one(statement.sql.as_str(), &[]).await?;
        Ok(row.try_get::<_, bool>(0)?)
    }

    async fn query_count(&self, statement: &Statement) -> Result<i64, AppError> {
        let row = self.client.query_one(statement.sql.as_str(), &[]).await?;
        Ok(row.try_get::<_, i64>(0)?)
    }

    async fn copy_in(&self, statement: &Statement, source: &Path) -> Result<u64, AppError> {
        let start = std::time::Instant::now();
        info!("Bulk loading {} into {}", source.display(), self.database);

        let mut file = tokio::fs::File::open(source)
            .await
            .map_err(|e| AppError::from(open_error(source, e)))?;

        let sink = self.client.copy_in::<_, Bytes>(statement.sql.as_str()).await?;
        pin_mut!(sink);

        let mut buf = vec![0u8; COPY_CHUNK_SIZE];
        let mut sent = 0usize;
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            sink.send(Bytes::copy_from_slice(&buf[..n])).await?;
            sent += n;
        }

        let rows = sink.as_mut().finish().await.map_err(|e| {
            error!("COPY into {} failed: {}", self.database, e);
            AppError::DatabaseError(e.to_string())
        })?;

        info!(
            "Copied {} rows ({}KB) in {:?}",
            rows,
            sent / 1024,
            start.elapsed()
        );
        Ok(rows)
    }
}
