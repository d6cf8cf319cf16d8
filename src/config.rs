use anyhow::Result;
use axum::http::HeaderValue;
use dotenvy::dotenv;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::AppError;
use crate::models::{AccessPlan, ProvisionPlan, RoleCredentials};

fn default_max_file_size() -> u64 {
    // 256 MB in bytes
    256 * 1024 * 1024
}

pub const DEFAULT_ENUM_THRESHOLD: usize = 10;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub max_file_size: u64,
    /// HTTP requests may only name files below this directory.
    pub data_dir: PathBuf,
    /// Browser origins allowed by CORS. Empty means same-origin only.
    pub allowed_origins: Vec<HeaderValue>,
    pub postgres: PostgresConfig,
    pub target: TargetConfig,
    pub access: AccessConfig,
}

/// Connection settings for the server that hosts the provisioned database.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    /// Database used for `CREATE DATABASE`, normally `postgres`.
    pub maintenance_db: String,
}

impl PostgresConfig {
    pub fn connect_config(&self, dbname: &str) -> tokio_postgres::Config {
        let mut config = tokio_postgres::Config::new();
        config
            .host(&self.host)
            .port(self.port)
            .user(&self.user)
            .dbname(dbname)
            .application_name("csv-provisioner");
        if let Some(password) = &self.password {
            config.password(password);
        }
        config
    }
}

#[derive(Debug, Clone)]
pub struct TargetConfig {
    pub database: String,
    pub schema: String,
    pub table: String,
    pub csv_path: Option<PathBuf>,
    pub delimiter: u8,
    pub enum_threshold: usize,
}

#[derive(Debug, Clone)]
pub struct AccessConfig {
    pub readonly_group: String,
    pub readwrite_group: String,
    pub readonly_user: String,
    pub readonly_password: Option<String>,
    pub readwrite_user: String,
    pub readwrite_password: Option<String>,
}

impl Config {
    pub fn new() -> Result<Self> {
        // Load .env file first
        dotenv().ok();

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let bind_addr = parse_var(&lookup, "BIND_ADDR", SocketAddr::from(([127, 0, 0, 1], 3000)))?;
        let max_file_size = parse_var(&lookup, "MAX_FILE_SIZE", default_max_file_size())?;
        let port = parse_var(&lookup, "PGPORT", 5432u16)?;
        let enum_threshold = parse_var(&lookup, "PROVISION_ENUM_THRESHOLD", DEFAULT_ENUM_THRESHOLD)?;
        let delimiter = match lookup("PROVISION_DELIMITER") {
            Some(raw) => parse_delimiter(&raw)?,
            None => b',',
        };
        let allowed_origins = match lookup("CORS_ALLOWED_ORIGINS") {
            Some(raw) => parse_origins(&raw)?,
            None => Vec::new(),
        };

        Ok(Config {
            bind_addr,
            max_file_size,
            data_dir: PathBuf::from(var("PROVISION_DATA_DIR", "data")),
            allowed_origins,
            postgres: PostgresConfig {
                host: var("PGHOST", "localhost"),
                port,
                user: var("PGUSER", "postgres"),
                password: lookup("PGPASSWORD"),
                maintenance_db: var("PG_MAINTENANCE_DB", "postgres"),
            },
            target: TargetConfig {
                database: var("PROVISION_DATABASE", "analytics"),
                schema: var("PROVISION_SCHEMA", "staging"),
                table: var("PROVISION_TABLE", "records"),
                csv_path: lookup("PROVISION_CSV_PATH").map(PathBuf::from),
                delimiter,
                enum_threshold,
            },
            access: AccessConfig {
                readonly_group: var("READONLY_GROUP", "readonly"),
                readwrite_group: var("READWRITE_GROUP", "readwrite"),
                readonly_user: var("READONLY_USER", "analyst"),
                readonly_password: lookup("READONLY_PASSWORD"),
                readwrite_user: var("READWRITE_USER", "editor"),
                readwrite_password: lookup("READWRITE_PASSWORD"),
            },
        })
    }

    /// Resolves everything a provisioning run needs. Passwords and the CSV
    /// path are only mandatory here, so the profiling routes work without them.
    pub fn provision_plan(
        &self,
        csv_override: Option<PathBuf>,
        table_override: Option<String>,
    ) -> Result<ProvisionPlan, AppError> {
        let csv_path = csv_override
            .or_else(|| self.target.csv_path.clone())
            .ok_or_else(|| AppError::Config("PROVISION_CSV_PATH is not set".to_string()))?;

        let password = |value: &Option<String>, key: &str| {
            value
                .clone()
                .filter(|p| !p.is_empty())
                .ok_or_else(|| AppError::Config(format!("{} is not set", key)))
        };

        Ok(ProvisionPlan {
            database: self.target.database.clone(),
            schema: self.target.schema.clone(),
            table: table_override.unwrap_or_else(|| self.target.table.clone()),
            csv_path,
            delimiter: self.target.delimiter,
            enum_threshold: self.target.enum_threshold,
            access: AccessPlan {
                readonly_group: self.access.readonly_group.clone(),
                readwrite_group: self.access.readwrite_group.clone(),
                readonly_user: RoleCredentials {
                    name: self.access.readonly_user.clone(),
                    password: password(&self.access.readonly_password, "READONLY_PASSWORD")?,
                },
                readwrite_user: RoleCredentials {
                    name: self.access.readwrite_user.clone(),
                    password: password(&self.access.readwrite_password, "READWRITE_PASSWORD")?,
                },
            },
        })
    }
}

pub fn load_config() -> Result<Config> {
    Config::new()
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid value for {}: {}", key, e)),
        None => Ok(default),
    }
}

/// Comma-separated origins such as `https://app.example.com`.
pub fn parse_origins(raw: &str) -> Result<Vec<HeaderValue>> {
    raw.split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(|origin| {
            if origin == "*" {
                anyhow::bail!("CORS_ALLOWED_ORIGINS must list origins, not *");
            }
            HeaderValue::from_str(origin)
                .map_err(|e| anyhow::anyhow!("Invalid origin {:?}: {}", origin, e))
        })
        .collect()
}

/// Accepts a single ASCII character, or `\t`/`tab` for tab-separated files.
pub fn parse_delimiter(raw: &str) -> Result<u8> {
    match raw {
        "\\t" | "tab" | "\t" => return Ok(b'\t'),
        _ => {}
    }

    let mut chars = raw.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c.is_ascii() => Ok(c as u8),
        _ => Err(anyhow::anyhow!("Delimiter must be a single ASCII character, got {:?}", raw)),
    }
}
