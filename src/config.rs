//! Typed configuration from environment variables.
//!
//! Loads once at startup. The remote DSN is optional — without it the
//! engine runs local-only and the sync bridge is simply not started.
//! Sensitive values wrapped in secrecy::SecretString to prevent log leaks.

use std::path::PathBuf;

use secrecy::SecretString;

use crate::error::{Error, Result};

#[derive(Debug)]
pub struct Config {
    /// Postgres DSN for the shared backend store. None = local-only mode.
    pub database_url: Option<SecretString>,
    /// Directory holding the per-tenant state snapshots and ping sentinels.
    pub data_dir: PathBuf,
    /// Explicit tenant identity, when the operator is already logged in.
    pub tenant_id: Option<String>,
    /// URL-safe slug to resolve against the remote businesses collection.
    pub tenant_slug: Option<String>,
    /// Permit the literal "default" tenant. Single-tenant deployments only.
    pub single_tenant: bool,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: std::env::var("DATABASE_URL").ok().map(SecretString::from),
            data_dir: std::env::var("TURNOQ_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("turnoq-data")),
            tenant_id: non_empty_var("TURNOQ_TENANT_ID"),
            tenant_slug: non_empty_var("TURNOQ_TENANT_SLUG"),
            single_tenant: flag_var("TURNOQ_SINGLE_TENANT")?,
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn flag_var(name: &str) -> Result<bool> {
    match std::env::var(name) {
        Err(_) => Ok(false),
        Ok(v) => match v.as_str() {
            "1" | "true" | "yes" => Ok(true),
            "0" | "false" | "no" | "" => Ok(false),
            other => Err(Error::Config(format!(
                "{name} must be a boolean flag, got '{other}'"
            ))),
        },
    }
}
