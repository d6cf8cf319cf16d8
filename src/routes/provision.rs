use axum::{extract::State, routing::post, Json, Router};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;

use super::columns::{ensure_within_limit, resolve_data_path};
use crate::{
    AppState,
    error::AppError,
    models::ProvisionReport,
    services::Provisioner,
};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/provision", post(provision))
}

#[derive(Debug, Default, Deserialize)]
pub struct ProvisionRequest {
    csv_path: Option<PathBuf>,
    table: Option<String>,
}

async fn provision(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ProvisionRequest>,
) -> Result<Json<ProvisionReport>, AppError> {
    let start = std::time::Instant::now();
    // Only a client-chosen file is confined; PROVISION_CSV_PATH is the operator's.
    let csv_override = match request.csv_path {
        Some(path) => Some(resolve_data_path(&state.config.data_dir, &path).await?),
        None => None,
    };
    let plan = state.config.provision_plan(csv_override, request.table)?;
    ensure_within_limit(&plan.csv_path, state.config.max_file_size).await?;

    tracing::info!(
        "Provisioning {}.{}.{} from {}",
        plan.database,
        plan.schema,
        plan.table,
        plan.csv_path.display()
    );

    let report = Provisioner::new(plan).run(&state.config.postgres).await?;
    if !report.verified {
        tracing::warn!("Provisioning completed but verification failed");
    }

    tracing::info!("Provision request completed in {:?}", start.elapsed());
    Ok(Json(report))
}
