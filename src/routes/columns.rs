use axum::{
    extract::State,
    routing::post,
    Router,
    Json,
};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use crate::{
    AppState,
    config::parse_delimiter,
    error::AppError,
    models::{ProfileSummary, TableSchema},
    services::{
        ddl,
        names::clean_table_name,
        profiler::{column_index, open_error, ColumnProfiler},
        SchemaInferrer,
    },
};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/columns/profile", post(profile_column))
        .route("/schema/infer", post(infer_schema))
}

#[derive(Debug, Deserialize)]
pub struct ProfileRequest {
    path: PathBuf,
    column: Option<i64>,
    column_name: Option<String>,
    delimiter: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct InferRequest {
    path: PathBuf,
    schema: Option<String>,
    table: Option<String>,
    delimiter: Option<String>,
    enum_threshold: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct InferResponse {
    table: TableSchema,
    statements: Vec<String>,
}

enum ColumnSelector {
    Index(usize),
    Name(String),
}

async fn profile_column(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ProfileRequest>,
) -> Result<Json<ProfileSummary>, AppError> {
    let selector = match (request.column, request.column_name) {
        (Some(index), None) => ColumnSelector::Index(column_index(index)?),
        (None, Some(name)) => ColumnSelector::Name(name),
        _ => {
            return Err(AppError::InvalidInput(
                "Provide exactly one of column or column_name".to_string(),
            ))
        }
    };

    let delimiter = delimiter_or(request.delimiter.as_deref(), state.config.target.delimiter)?;
    let path = resolve_data_path(&state.config.data_dir, &request.path).await?;
    ensure_within_limit(&path, state.config.max_file_size).await?;

    tracing::info!("Profiling {}", path.display());
    let profiler = ColumnProfiler::new().with_delimiter(delimiter);
    let profile = tokio::task::spawn_blocking(move || match selector {
        ColumnSelector::Index(index) => profiler.profile_column(&path, index),
        ColumnSelector::Name(name) => profiler.profile_named(&path, &name),
    })
    .await??;

    Ok(Json(profile.summary()))
}

async fn infer_schema(
    State(state): State<Arc<AppState>>,
    Json(request): Json<InferRequest>,
) -> Result<Json<InferResponse>, AppError> {
    let target = &state.config.target;
    let delimiter = delimiter_or(request.delimiter.as_deref(), target.delimiter)?;
    let path = resolve_data_path(&state.config.data_dir, &request.path).await?;
    ensure_within_limit(&path, state.config.max_file_size).await?;

    let schema = request.schema.unwrap_or_else(|| target.schema.clone());
    let table = request
        .table
        .unwrap_or_else(|| default_table_name(&request.path));
    let inferrer = SchemaInferrer::new(
        ColumnProfiler::new().with_delimiter(delimiter),
        request.enum_threshold.unwrap_or(target.enum_threshold),
    );

    let table = tokio::task::spawn_blocking(move || inferrer.infer(&path, &schema, &table)).await??;

    let mut statements = vec![ddl::create_schema(&table.schema).sql];
    statements.extend(ddl::table_statements(&table).into_iter().map(|s| s.sql));
    statements.push(ddl::copy_from_stdin(&table, delimiter, b'"').sql);

    Ok(Json(InferResponse { table, statements }))
}

/// Table name derived from the file name, `records` when there is none.
pub fn default_table_name(path: &Path) -> String {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .map(clean_table_name)
        .unwrap_or_else(|| "records".to_string())
}

fn delimiter_or(raw: Option<&str>, default: u8) -> Result<u8, AppError> {
    match raw {
        Some(raw) => parse_delimiter(raw).map_err(|e| AppError::InvalidInput(e.to_string())),
        None => Ok(default),
    }
}

/// Resolves a client-supplied path against `data_dir`, following symlinks,
/// and rejects anything that lands outside it. Relative paths are taken
/// from `data_dir`.
pub(crate) async fn resolve_data_path(data_dir: &Path, requested: &Path) -> Result<PathBuf, AppError> {
    let root = tokio::fs::canonicalize(data_dir).await.map_err(|e| {
        AppError::Config(format!("Data directory {} is unusable: {}", data_dir.display(), e))
    })?;

    let resolved = match tokio::fs::canonicalize(root.join(requested)).await {
        Ok(resolved) => resolved,
        // Missing files outside the root must not reveal whether they exist.
        Err(_) if escapes(&root, requested) => return Err(outside(&root, requested)),
        Err(e) => return Err(open_error(requested, e).into()),
    };

    if !resolved.starts_with(&root) {
        return Err(outside(&root, requested));
    }
    Ok(resolved)
}

fn outside(root: &Path, requested: &Path) -> AppError {
    tracing::warn!("Rejected {} outside {}", requested.display(), root.display());
    AppError::OutsideDataDir(requested.to_path_buf())
}

fn escapes(root: &Path, requested: &Path) -> bool {
    requested.components().any(|c| c == Component::ParentDir)
        || (requested.is_absolute() && !requested.starts_with(root))
}

pub(crate) async fn ensure_within_limit(path: &Path, max_file_size: u64) -> Result<(), AppError> {
    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|e| AppError::from(open_error(path, e)))?;

    if metadata.len() > max_file_size {
        tracing::error!("{} exceeds the file size limit", path.display());
        return Err(AppError::InvalidInput(format!(
            "File is {}KB, the limit is {}KB",
            metadata.len() / 1024,
            max_file_size / 1024
        )));
    }
    Ok(())
}
