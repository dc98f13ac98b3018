//! BigQuery load job submitter
//!
//! One load job per table and run: `jobs.insert` registers every staged CSV
//! object of the table, then `jobs.get` is polled until the job is `DONE`.
//! Merges and landing table DDL run as GoogleSQL query jobs polled the same
//! way.

use crate::adapters::bigquery::merge::{create_like_sql, render_merge};
use crate::adapters::bigquery::models::{
    DatasetReference, ErrorResponse, Job, JobConfiguration, JobReference, LoadConfiguration,
    QueryConfiguration, TableReference,
};
use crate::adapters::traits::{
    LoadJobHandle, LoadJobReport, LoadRequest, LoadSubmitter, MergeRequest,
};
use crate::config::schema::WarehouseConfig;
use crate::config::SecretString;
use crate::domain::ids::TableName;
use crate::domain::{Result, SluiceError};
use async_trait::async_trait;
use reqwest::{Client, ClientBuilder, RequestBuilder, Response};
use secrecy::ExposeSecret;
use std::time::{Duration, Instant};
use url::Url;
use uuid::Uuid;

/// [`LoadSubmitter`] for BigQuery
pub struct BigQueryLoader {
    client: Client,
    endpoint: Url,
    project_id: String,
    dataset_id: String,
    location: Option<String>,
    access_token: Option<SecretString>,
    skip_leading_rows: u32,
    poll_interval: Duration,
    job_timeout: Duration,
}

impl BigQueryLoader {
    /// Create a loader from the `[warehouse]` section
    pub fn new(config: &WarehouseConfig) -> Result<Self> {
        let endpoint = Url::parse(&config.endpoint).map_err(|e| {
            SluiceError::Configuration(format!("Invalid warehouse.endpoint: {e}"))
        })?;

        let client = ClientBuilder::new()
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| SluiceError::Connection(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            project_id: config.project_id.clone(),
            dataset_id: config.dataset_id.clone(),
            location: config.location.clone(),
            access_token: config.access_token.clone(),
            skip_leading_rows: config.skip_leading_rows,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            job_timeout: Duration::from_secs(config.job_timeout_seconds),
        })
    }

    /// Override the polling cadence
    pub fn with_polling(mut self, interval: Duration, timeout: Duration) -> Self {
        self.poll_interval = interval;
        self.job_timeout = timeout;
        self
    }

    fn jobs_url(&self, job_id: Option<&str>) -> Result<Url> {
        let mut url = self.endpoint.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                SluiceError::Configuration(format!(
                    "warehouse.endpoint '{}' cannot carry a path",
                    self.endpoint
                ))
            })?;
            segments
                .pop_if_empty()
                .extend(["bigquery", "v2", "projects", self.project_id.as_str(), "jobs"]);
            if let Some(job_id) = job_id {
                segments.push(job_id);
            }
        }
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.access_token {
            Some(token) => request.bearer_auth(token.expose_secret().as_ref()),
            None => request,
        }
    }

    fn load_job(&self, request: &LoadRequest, job_id: String) -> Job {
        Job {
            job_reference: JobReference {
                project_id: self.project_id.clone(),
                job_id,
                location: self.location.clone(),
            },
            configuration: Some(JobConfiguration {
                load: Some(LoadConfiguration {
                    source_uris: request.source_uris.clone(),
                    destination_table: TableReference {
                        project_id: self.project_id.clone(),
                        dataset_id: self.dataset_id.clone(),
                        table_id: request.destination_table.clone(),
                    },
                    source_format: "CSV".to_string(),
                    skip_leading_rows: self.skip_leading_rows,
                    write_disposition: request.write_disposition.as_bigquery().to_string(),
                    allow_quoted_newlines: true,
                }),
                query: None,
            }),
            ..Job::default()
        }
    }

    fn query_job(&self, sql: String, job_id: String) -> Job {
        Job {
            job_reference: JobReference {
                project_id: self.project_id.clone(),
                job_id,
                location: self.location.clone(),
            },
            configuration: Some(JobConfiguration {
                load: None,
                query: Some(QueryConfiguration {
                    query: sql,
                    use_legacy_sql: false,
                    default_dataset: DatasetReference {
                        project_id: self.project_id.clone(),
                        dataset_id: self.dataset_id.clone(),
                    },
                }),
            }),
            ..Job::default()
        }
    }

    /// `jobs.insert`
    async fn insert(&self, table: &TableName, job: &Job) -> Result<LoadJobHandle> {
        let url = self.jobs_url(None)?;
        let resp = self
            .authorize(self.client.post(url))
            .json(job)
            .send()
            .await
            .map_err(|e| SluiceError::LoadSubmission(format!("{table}: {e}")))?;

        if !resp.status().is_success() {
            return Err(SluiceError::LoadSubmission(format!(
                "{table}: {}",
                error_message(resp).await
            )));
        }

        let accepted: Job = resp
            .json()
            .await
            .map_err(|e| SluiceError::LoadSubmission(format!("Unexpected jobs.insert response: {e}")))?;

        Ok(LoadJobHandle {
            job_id: accepted.job_reference.job_id,
            location: accepted.job_reference.location.or_else(|| self.location.clone()),
        })
    }

    /// Poll `jobs.get` once
    async fn poll(&self, handle: &LoadJobHandle) -> Result<Job> {
        let mut url = self.jobs_url(Some(&handle.job_id))?;
        if let Some(location) = &handle.location {
            url.query_pairs_mut().append_pair("location", location);
        }

        let resp = self.authorize(self.client.get(url)).send().await?;
        if resp.status().is_success() {
            Ok(resp.json::<Job>().await?)
        } else if resp.status().is_server_error() || resp.status().as_u16() == 429 {
            Err(SluiceError::Connection(error_message(resp).await))
        } else {
            Err(SluiceError::LoadJobFailed {
                job_id: handle.job_id.clone(),
                message: error_message(resp).await,
            })
        }
    }
}

/// BigQuery job id for a table: letters, digits and underscores only
pub fn job_id_for(table: &TableName) -> String {
    let sanitized: String = table
        .as_str()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("sluice_{}_{}", sanitized, Uuid::new_v4().simple())
}

async fn error_message(resp: Response) -> String {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorResponse>(&body) {
        Ok(parsed) if !parsed.error.message.is_empty() => {
            format!("status {status}: {}", parsed.error.message)
        }
        _ => format!("status {status}: {body}"),
    }
}

#[async_trait]
impl LoadSubmitter for BigQueryLoader {
    async fn submit(&self, request: &LoadRequest) -> Result<LoadJobHandle> {
        if request.source_uris.is_empty() {
            return Err(SluiceError::LoadSubmission(format!(
                "{}: no staged objects to load",
                request.table_name
            )));
        }

        if let Some(like) = &request.create_like {
            let ddl = create_like_sql(&request.destination_table, like)?;
            tracing::debug!(table = %request.table_name, sql = %ddl, "Preparing landing table");
            let job = self.query_job(ddl, job_id_for(&request.table_name));
            let handle = self.insert(&request.table_name, &job).await?;
            self.wait(&handle).await?;
        }

        let job = self.load_job(request, job_id_for(&request.table_name));

        tracing::debug!(
            table = %request.table_name,
            job_id = %job.job_reference.job_id,
            destination = %format!("{}.{}.{}", self.project_id, self.dataset_id, request.destination_table),
            objects = request.source_uris.len(),
            "Submitting load job"
        );

        self.insert(&request.table_name, &job).await
    }

    async fn submit_merge(&self, request: &MergeRequest) -> Result<LoadJobHandle> {
        let sql = render_merge(request)?;
        let job = self.query_job(sql, job_id_for(&request.table_name));

        tracing::debug!(
            table = %request.table_name,
            job_id = %job.job_reference.job_id,
            strategy = request.strategy.name(),
            target = %request.target_table,
            landing = %request.landing_table,
            "Submitting merge job"
        );

        self.insert(&request.table_name, &job).await
    }

    async fn wait(&self, handle: &LoadJobHandle) -> Result<LoadJobReport> {
        let deadline = Instant::now() + self.job_timeout;

        loop {
            match self.poll(handle).await {
                Ok(job) => {
                    let status = job.status.clone().unwrap_or_default();
                    if status.is_done() {
                        if let Some(error) = status.error_result {
                            let details: Vec<String> =
                                status.errors.iter().map(|e| e.message.clone()).collect();
                            let mut message = format!("{}: {}", error.reason, error.message);
                            if !details.is_empty() {
                                message.push_str(&format!(" ({})", details.join("; ")));
                            }
                            return Err(SluiceError::LoadJobFailed {
                                job_id: handle.job_id.clone(),
                                message,
                            });
                        }
                        return Ok(LoadJobReport {
                            job_id: handle.job_id.clone(),
                            output_rows: job.output_rows(),
                        });
                    }
                    tracing::debug!(job_id = %handle.job_id, state = %status.state, "Load job running");
                }
                Err(err) if err.is_transient() => {
                    tracing::warn!(job_id = %handle.job_id, error = %err, "Load job poll failed, will retry");
                }
                Err(err) => return Err(err),
            }

            if Instant::now() + self.poll_interval > deadline {
                return Err(SluiceError::LoadJobFailed {
                    job_id: handle.job_id.clone(),
                    message: format!(
                        "job did not finish within {}s",
                        self.job_timeout.as_secs_f64()
                    ),
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
