use crate::app_config::{AppConfig, Environment, ImportConfig};
use crate::ConfigError;

/// Load application configuration from environment variables.
///
/// Calls `dotenvy::dotenv().ok()` to load `.env` files before reading env vars.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config() -> Result<AppConfig, ConfigError> {
    dotenvy::dotenv().ok();
    load_app_config_from_env()
}

/// Load application configuration from environment variables already in the process.
///
/// Unlike [`load_app_config`], this does NOT load `.env` files. Useful for testing
/// or when the caller manages env setup.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config_from_env() -> Result<AppConfig, ConfigError> {
    build_app_config(|key| std::env::var(key))
}

/// Build application configuration using the provided env-var lookup function.
///
/// This is the core parsing/validation logic, decoupled from the actual environment
/// so it can be tested with a pure `HashMap` lookup, no `set_var`/`remove_var` needed.
fn build_app_config<F>(lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    use std::net::SocketAddr;

    let require = |var: &str| -> Result<String, ConfigError> {
        lookup(var).map_err(|_| ConfigError::MissingEnvVar(var.to_string()))
    };

    let or_default = |var: &str, default: &str| -> String {
        lookup(var).unwrap_or_else(|_| default.to_string())
    };

    let parse = |var: &str, default: &str| -> Result<SocketAddr, ConfigError> {
        let raw = or_default(var, default);
        raw.parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidEnvVar {
                var: var.to_string(),
                reason: e.to_string(),
            })
    };

    let database_url = require("DATABASE_URL")?;

    let env = parse_environment(&or_default("ANNOT_ENV", "development"))?;

    let bind_addr = parse("ANNOT_BIND_ADDR", "0.0.0.0:3000")?;
    let log_level = or_default("ANNOT_LOG_LEVEL", "info");

    let db_max_connections = parse_number::<u32, _>(&lookup, "ANNOT_DB_MAX_CONNECTIONS", "10")?;
    let db_min_connections = parse_number::<u32, _>(&lookup, "ANNOT_DB_MIN_CONNECTIONS", "1")?;
    let db_acquire_timeout_secs =
        parse_number::<u64, _>(&lookup, "ANNOT_DB_ACQUIRE_TIMEOUT_SECS", "10")?;

    if db_min_connections > db_max_connections {
        return Err(ConfigError::InvalidEnvVar {
            var: "ANNOT_DB_MIN_CONNECTIONS".to_string(),
            reason: format!(
                "min connections ({db_min_connections}) exceeds max connections ({db_max_connections})"
            ),
        });
    }

    let import = build_import_config(&lookup)?;
    let upload_max_bytes = parse_number::<usize, _>(&lookup, "ANNOT_UPLOAD_MAX_BYTES", "104857600")?;

    Ok(AppConfig {
        database_url,
        env,
        bind_addr,
        log_level,
        db_max_connections,
        db_min_connections,
        db_acquire_timeout_secs,
        import,
        upload_max_bytes,
    })
}

fn build_import_config<F>(lookup: &F) -> Result<ImportConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    let default_batch_size = parse_number::<usize, _>(lookup, "ANNOT_IMPORT_BATCH_SIZE", "1000")?;
    let max_batch_size = parse_number::<usize, _>(lookup, "ANNOT_IMPORT_MAX_BATCH_SIZE", "10000")?;
    let batch_pause_ms = parse_number::<u64, _>(lookup, "ANNOT_IMPORT_BATCH_PAUSE_MS", "100")?;
    let max_concurrent_jobs =
        parse_number::<usize, _>(lookup, "ANNOT_IMPORT_MAX_CONCURRENT_JOBS", "4")?;

    if default_batch_size == 0 || default_batch_size > max_batch_size {
        return Err(ConfigError::InvalidEnvVar {
            var: "ANNOT_IMPORT_BATCH_SIZE".to_string(),
            reason: format!("must be between 1 and {max_batch_size}, got {default_batch_size}"),
        });
    }
    if max_concurrent_jobs == 0 {
        return Err(ConfigError::InvalidEnvVar {
            var: "ANNOT_IMPORT_MAX_CONCURRENT_JOBS".to_string(),
            reason: "must be at least 1".to_string(),
        });
    }

    Ok(ImportConfig {
        default_batch_size,
        max_batch_size,
        batch_pause_ms,
        max_concurrent_jobs,
    })
}

fn parse_number<T, F>(lookup: &F, var: &str, default: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    let raw = lookup(var).unwrap_or_else(|_| default.to_string());
    raw.trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidEnvVar {
            var: var.to_string(),
            reason: e.to_string(),
        })
}

/// Parse a string into an `Environment` variant.
fn parse_environment(s: &str) -> Result<Environment, ConfigError> {
    match s {
        "development" => Ok(Environment::Development),
        "test" => Ok(Environment::Test),
        "production" => Ok(Environment::Production),
        other => Err(ConfigError::InvalidEnvVar {
            var: "ANNOT_ENV".to_string(),
            reason: format!("expected development, test, or production, got '{other}'"),
        }),
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
