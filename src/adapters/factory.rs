//! Collaborator factory
//!
//! Builds the source, staging, warehouse and checkpoint implementations
//! selected by the configuration, and assembles them into a [`RunContext`].
//! The run lock is built separately since it spans the whole run.

use crate::adapters::bigquery::BigQueryLoader;
use crate::adapters::file::FileCheckpointStorage;
use crate::adapters::memory::InMemoryCheckpointStorage;
use crate::adapters::postgresql::{PostgresCheckpointStorage, PostgresClient, PostgresSource};
use crate::adapters::routing::SourceRouter;
use crate::adapters::staging::{GcsStagingStore, LocalStagingStore};
use crate::adapters::traits::{CheckpointStorage, LoadSubmitter, SourceClient, StagingStore};
use crate::config::schema::{
    CheckpointBackend, CheckpointConfig, SluiceConfig, SourceConfig, StagingBackend,
    StagingConfig, WarehouseConfig,
};
use crate::core::incremental::RunParameters;
use crate::core::pipeline::{RetryPolicy, RunContext, RunLock, StagingLayout, StagingWriter};
use crate::domain::timestamp::source_now;
use crate::domain::{Result, SluiceError};
use std::sync::Arc;

/// Create the PostgreSQL connection pool shared by the source and the
/// checkpoint table
pub fn create_postgres_client(config: &SourceConfig) -> Result<Arc<PostgresClient>> {
    tracing::info!("Creating PostgreSQL client");
    Ok(Arc::new(PostgresClient::new(config)?))
}

pub fn create_source_client(client: Arc<PostgresClient>) -> Arc<dyn SourceClient + Send + Sync> {
    Arc::new(PostgresSource::new(client))
}

/// Source client for every configured database
///
/// Tables without `database` read through `default`; named databases get a
/// pool of their own.
pub fn create_routed_source(
    config: &SluiceConfig,
    default: Arc<PostgresClient>,
) -> Result<Arc<dyn SourceClient + Send + Sync>> {
    if config.databases.is_empty() {
        return Ok(create_source_client(default));
    }

    let mut router = SourceRouter::new(create_source_client(default));
    for (name, database) in &config.databases {
        let client = create_postgres_client(database)?;
        tracing::info!(database = %name, source = %client.connection_string_safe(), "Registered source database");
        router = router.with_database(name.clone(), create_source_client(client));
    }
    Ok(Arc::new(router))
}

/// Create the staging store selected by `staging.backend`
pub fn create_staging_store(config: &StagingConfig) -> Result<Arc<dyn StagingStore + Send + Sync>> {
    match config.backend {
        StagingBackend::Gcs => {
            let store = GcsStagingStore::new(config)?;
            tracing::info!(location = %store.describe(), "Using GCS staging");
            Ok(Arc::new(store))
        }
        StagingBackend::Local => {
            let root = config
                .local_root
                .clone()
                .filter(|r| !r.trim().is_empty())
                .ok_or_else(|| {
                    SluiceError::Configuration("staging.local_root is required".to_string())
                })?;
            let store = LocalStagingStore::new(root);
            tracing::warn!(
                location = %store.describe(),
                "Using local staging; warehouse load jobs cannot read file:// objects"
            );
            Ok(Arc::new(store))
        }
    }
}

pub fn create_load_submitter(
    config: &WarehouseConfig,
) -> Result<Arc<dyn LoadSubmitter + Send + Sync>> {
    tracing::info!(
        project = %config.project_id,
        dataset = %config.dataset_id,
        "Creating BigQuery loader"
    );
    Ok(Arc::new(BigQueryLoader::new(config)?))
}

/// Create the checkpoint storage selected by `checkpoint.backend`
///
/// The PostgreSQL backend reuses the source pool.
pub fn create_checkpoint_storage(
    config: &CheckpointConfig,
    client: &Arc<PostgresClient>,
) -> Arc<dyn CheckpointStorage + Send + Sync> {
    match config.backend {
        CheckpointBackend::Postgresql => {
            tracing::info!(table = %config.table_name, "Using PostgreSQL checkpoint storage");
            Arc::new(PostgresCheckpointStorage::new(
                Arc::clone(client),
                config.table_name.clone(),
            ))
        }
        CheckpointBackend::File => {
            tracing::info!(path = %config.file_path, "Using file checkpoint storage");
            Arc::new(FileCheckpointStorage::new(&config.file_path))
        }
        CheckpointBackend::Memory => {
            tracing::warn!("Using in-memory checkpoint storage; checkpoints are not persisted");
            Arc::new(InMemoryCheckpointStorage::new())
        }
    }
}

/// Run lock on the staging store, `None` when `run.lock_enabled` is off
pub fn create_run_lock(config: &SluiceConfig) -> Result<Option<RunLock>> {
    if !config.run.lock_enabled {
        tracing::warn!("Run lock disabled; concurrent runs are not prevented");
        return Ok(None);
    }
    let store = create_staging_store(&config.staging)?;
    Ok(Some(RunLock::new(store, config.staging.lock_path())))
}

/// Run parameters from the configuration, with optional command-line overrides
pub fn run_parameters(
    config: &SluiceConfig,
    force_full_load: bool,
    lookback_minutes: Option<u32>,
) -> RunParameters {
    RunParameters {
        force_full_load,
        lookback_minutes: lookback_minutes.unwrap_or(config.run.default_lookback_minutes),
    }
}

/// Assemble every collaborator of a run
///
/// "Now" is taken once, in the source timezone, and fixes both the window end
/// and the staging prefix of the run. Unless `dry_run` is set the source must
/// answer a probe query. `params` is used as given; see
/// [`run_parameters`] for the configured defaults.
///
/// # Errors
///
/// [`SluiceError::ConfigValidation`] for a malformed SystemDate section,
/// [`SluiceError::Configuration`] for unusable settings and
/// [`SluiceError::Connection`] when the source is unreachable.
pub async fn build_run_context(
    config: &SluiceConfig,
    params: RunParameters,
    dry_run: bool,
) -> Result<RunContext> {
    let offset = config
        .source
        .utc_offset()
        .map_err(SluiceError::ConfigValidation)?;
    let systemdate = config.systemdate_config()?;
    let now = source_now(offset);

    let pg = create_postgres_client(&config.source)?;
    let source = create_routed_source(config, Arc::clone(&pg))?;
    if !dry_run {
        source.test_connection().await?;
        tracing::info!(source = %pg.connection_string_safe(), "Source connection verified");
    }

    let retry = RetryPolicy::from(&config.retry);
    let layout = StagingLayout::new(config.staging.data_path.clone(), now);
    let mut staging =
        StagingWriter::new(create_staging_store(&config.staging)?, layout, retry.clone());
    if let Some(gate) = &config.staging.execution_gate {
        tracing::info!(gate = %gate, "Execution gate enabled");
        staging = staging.with_execution_gate(gate.trim_matches('/'));
    }
    let loader = create_load_submitter(&config.warehouse)?;
    let checkpoints = create_checkpoint_storage(&config.checkpoint, &pg);

    let mut ctx = RunContext::new(source, Arc::new(staging), loader, checkpoints, now);
    ctx.systemdate = systemdate;
    ctx.params = params;
    ctx.retry = retry;
    ctx.dry_run = dry_run;
    Ok(ctx)
}
