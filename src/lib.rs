pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod routes;
pub mod services;

pub use error::{AppError, ProfileError};
pub use models::{ColumnProfile, ProvisionReport, TableSchema};
pub use services::{ColumnProfiler, Provisioner, SchemaInferrer};

// Application state
#[derive(Clone)]
pub struct AppState {
    pub config: config::Config,
}

impl AppState {
    pub fn new(config: config::Config) -> Self {
        Self { config }
    }
}
