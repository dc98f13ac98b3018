//! Configuration loader with TOML parsing and environment variable overrides

use super::schema::SluiceConfig;
use super::secret::secret_string;
use crate::domain::errors::SluiceError;
use crate::domain::result::Result;
use regex::Regex;
use std::fs;
use std::path::Path;

/// Loads configuration from a TOML file
///
/// This function:
/// 1. Reads the TOML file
/// 2. Performs environment variable substitution (`${VAR}` syntax)
/// 3. Parses the TOML into [`SluiceConfig`]
/// 4. Applies environment variable overrides (`SLUICE_*` prefix)
/// 5. Validates the configuration
///
/// # Errors
///
/// Returns [`SluiceError::Configuration`] if the file cannot be read or
/// parsed, a referenced variable is unset, or validation fails.
///
/// # Examples
///
/// ```no_run
/// use sluice::config::loader::load_config;
///
/// let config = load_config("sluice.toml").expect("Failed to load config");
/// ```
pub fn load_config(path: impl AsRef<Path>) -> Result<SluiceConfig> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(SluiceError::Configuration(format!(
            "Configuration file not found: {}",
            path.display()
        )));
    }

    let contents = fs::read_to_string(path).map_err(|e| {
        SluiceError::Configuration(format!(
            "Failed to read configuration file {}: {}",
            path.display(),
            e
        ))
    })?;

    parse_config(&contents)
}

/// Substitute, parse, override and validate configuration text
pub fn parse_config(contents: &str) -> Result<SluiceConfig> {
    let contents = substitute_env_vars(contents)?;

    let mut config: SluiceConfig = toml::from_str(&contents)?;

    apply_env_overrides(&mut config);

    config.validate().map_err(|e| {
        SluiceError::Configuration(format!("Configuration validation failed: {}", e))
    })?;

    Ok(config)
}

/// Substitutes environment variables in the format `${VAR_NAME}`
///
/// Comment lines are left untouched.
///
/// # Errors
///
/// Returns an error naming every referenced variable that is not set
fn substitute_env_vars(input: &str) -> Result<String> {
    let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}")
        .map_err(|e| SluiceError::Configuration(format!("Invalid substitution pattern: {e}")))?;
    let mut result = String::with_capacity(input.len());
    let mut missing_vars: Vec<String> = Vec::new();

    for line in input.lines() {
        if line.trim_start().starts_with('#') {
            result.push_str(line);
            result.push('\n');
            continue;
        }

        let processed = re.replace_all(line, |cap: &regex::Captures<'_>| {
            let var_name = &cap[1];
            match std::env::var(var_name) {
                Ok(value) => value,
                Err(_) => {
                    if !missing_vars.iter().any(|v| v == var_name) {
                        missing_vars.push(var_name.to_string());
                    }
                    cap[0].to_string()
                }
            }
        });
        result.push_str(&processed);
        result.push('\n');
    }

    if !missing_vars.is_empty() {
        return Err(SluiceError::Configuration(format!(
            "Missing required environment variables: {}",
            missing_vars.join(", ")
        )));
    }

    Ok(result)
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let value = std::env::var(name).ok()?;
    match value.parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            tracing::warn!(variable = name, value = %value, "Ignoring unparsable override");
            None
        }
    }
}

/// Applies environment variable overrides using the `SLUICE_*` prefix
///
/// Variables follow the pattern `SLUICE_<SECTION>_<KEY>`, for example
/// `SLUICE_SOURCE_TIMEZONE` or `SLUICE_RUN_MAX_CONCURRENCY`.
fn apply_env_overrides(config: &mut SluiceConfig) {
    // Application overrides
    if let Ok(val) = std::env::var("SLUICE_APPLICATION_LOG_LEVEL") {
        config.application.log_level = val;
    }
    if let Some(val) = env_parse("SLUICE_APPLICATION_DRY_RUN") {
        config.application.dry_run = val;
    }

    // Source overrides
    if let Ok(val) = std::env::var("SLUICE_SOURCE_CONNECTION_STRING") {
        config.source.connection_string = secret_string(val);
    }
    if let Ok(val) = std::env::var("SLUICE_SOURCE_SSL_MODE") {
        config.source.ssl_mode = val;
    }
    if let Ok(val) = std::env::var("SLUICE_SOURCE_TIMEZONE") {
        config.source.timezone = val;
    }
    if let Some(val) = env_parse("SLUICE_SOURCE_MAX_CONNECTIONS") {
        config.source.max_connections = val;
    }

    // Staging overrides
    if let Ok(val) = std::env::var("SLUICE_STAGING_BUCKET") {
        config.staging.bucket = Some(val);
    }
    if let Ok(val) = std::env::var("SLUICE_STAGING_DATA_PATH") {
        config.staging.data_path = val;
    }
    if let Ok(val) = std::env::var("SLUICE_STAGING_ACCESS_TOKEN") {
        config.staging.access_token = Some(secret_string(val));
    }

    // Warehouse overrides
    if let Ok(val) = std::env::var("SLUICE_WAREHOUSE_PROJECT_ID") {
        config.warehouse.project_id = val;
    }
    if let Ok(val) = std::env::var("SLUICE_WAREHOUSE_DATASET_ID") {
        config.warehouse.dataset_id = val;
    }
    if let Ok(val) = std::env::var("SLUICE_WAREHOUSE_LOCATION") {
        config.warehouse.location = Some(val);
    }
    if let Ok(val) = std::env::var("SLUICE_WAREHOUSE_ACCESS_TOKEN") {
        config.warehouse.access_token = Some(secret_string(val));
    }

    // Checkpoint overrides
    if let Ok(val) = std::env::var("SLUICE_CHECKPOINT_FILE_PATH") {
        config.checkpoint.file_path = val;
    }

    // Run overrides
    if let Some(val) = env_parse("SLUICE_RUN_MAX_CONCURRENCY") {
        config.run.max_concurrency = val;
    }
    if let Some(val) = env_parse("SLUICE_RUN_DEFAULT_LOOKBACK_MINUTES") {
        config.run.default_lookback_minutes = val;
    }
    if let Some(val) = env_parse("SLUICE_RUN_RUN_TIMEOUT_SECONDS") {
        config.run.run_timeout_seconds = Some(val);
    }

    // Retry overrides
    if let Some(val) = env_parse("SLUICE_RETRY_MAX_ATTEMPTS") {
        config.retry.max_attempts = val;
    }

    // Logging overrides
    if let Some(val) = env_parse("SLUICE_LOGGING_LOCAL_ENABLED") {
        config.logging.local_enabled = val;
    }
    if let Ok(val) = std::env::var("SLUICE_LOGGING_LOCAL_PATH") {
        config.logging.local_path = val;
    }
}
