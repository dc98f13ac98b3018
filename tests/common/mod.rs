//! Scripted collaborators for pipeline integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::NaiveDateTime;
use sluice::adapters::memory::InMemoryCheckpointStorage;
use sluice::adapters::staging::sha256_hex;
use sluice::adapters::traits::{
    LoadJobHandle, LoadJobReport, LoadRequest, LoadSubmitter, MergeRequest, RowBatch, RowCursor,
    SourceClient, StagedObject, StagingStore,
};
use sluice::core::incremental::{FinalQuery, RunParameters};
use sluice::core::pipeline::{RetryPolicy, RunContext, StagingLayout, StagingWriter};
use sluice::domain::timestamp::{format_timestamp, parse_timestamp};
use sluice::domain::{
    MergeStrategy, Result, SluiceError, SystemDateConfig, TableName, TableSpec, WriteDisposition,
};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn ts(text: &str) -> NaiveDateTime {
    parse_timestamp(text).unwrap()
}

pub fn table(name: &str) -> TableName {
    TableName::new(name).unwrap()
}

/// Incremental table on `SystemDate` reading `SELECT * FROM {name}`
pub fn spec(name: &str) -> TableSpec {
    let mut spec = TableSpec::new(table(name), format!("SELECT * FROM {name}"));
    spec.batch_size = 2;
    spec
}

/// Batch of `(id, SystemDate)` rows
pub fn batch(rows: &[(&str, &str)]) -> RowBatch {
    RowBatch::new(
        vec!["id".to_string(), "SystemDate".to_string()],
        rows.iter()
            .map(|(id, at)| vec![Some(id.to_string()), Some(at.to_string())])
            .collect(),
    )
}

/// How a scripted call fails
#[derive(Debug, Clone, Copy)]
pub enum Fault {
    /// Connection reset and similar
    Transient,
    /// Syntax error and similar
    Permanent,
}

impl Fault {
    fn error(self, what: &str) -> SluiceError {
        match self {
            Self::Transient => SluiceError::TransientExtraction(format!("{what}: connection reset")),
            Self::Permanent => SluiceError::Extraction(format!("{what}: syntax error")),
        }
    }
}

/// One element of a scripted result stream
#[derive(Debug, Clone)]
pub enum Item {
    Batch(RowBatch),
    Fail(Fault),
    /// Never yields; only cancellation ends the extraction
    Hang,
}

/// Script of one extraction attempt
#[derive(Debug, Clone)]
pub enum Attempt {
    Stream(Vec<Item>),
    FailOpen(Fault),
}

impl Attempt {
    pub fn rows(batches: Vec<RowBatch>) -> Self {
        Self::Stream(batches.into_iter().map(Item::Batch).collect())
    }
}

/// Source whose result sets are scripted per table and attempt
///
/// A table without (remaining) script returns an empty result set.
#[derive(Default)]
pub struct ScriptedSource {
    scripts: Mutex<HashMap<String, VecDeque<Attempt>>>,
    queries: Mutex<Vec<FinalQuery>>,
}

impl ScriptedSource {
    pub fn script(&self, table: &str, attempts: Vec<Attempt>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(table.to_string(), attempts.into());
    }

    /// Final queries opened for `table`, in order
    pub fn queries_for(&self, table: &str) -> Vec<String> {
        self.queries
            .lock()
            .unwrap()
            .iter()
            .filter(|q| q.table_name.as_str() == table)
            .map(|q| q.sql.clone())
            .collect()
    }

    pub fn total_queries(&self) -> usize {
        self.queries.lock().unwrap().len()
    }
}

struct ScriptedCursor {
    items: VecDeque<Item>,
    closed: Arc<AtomicU32>,
}

#[async_trait]
impl RowCursor for ScriptedCursor {
    async fn next_batch(&mut self) -> Result<Option<RowBatch>> {
        match self.items.pop_front() {
            None => Ok(None),
            Some(Item::Batch(batch)) => Ok(Some(batch)),
            Some(Item::Fail(fault)) => Err(fault.error("fetch")),
            Some(Item::Hang) => {
                std::future::pending::<()>().await;
                Ok(None)
            }
        }
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Shares the closed-cursor counter with the cursors it hands out
pub struct SourceHandle(pub Arc<ScriptedSource>, Arc<AtomicU32>);

#[async_trait]
impl SourceClient for SourceHandle {
    async fn test_connection(&self) -> Result<()> {
        Ok(())
    }

    async fn open_cursor(
        &self,
        query: &FinalQuery,
        _fetch_size: usize,
    ) -> Result<Box<dyn RowCursor>> {
        self.0.queries.lock().unwrap().push(query.clone());
        let attempt = self
            .0
            .scripts
            .lock()
            .unwrap()
            .get_mut(query.table_name.as_str())
            .and_then(VecDeque::pop_front)
            .unwrap_or(Attempt::Stream(Vec::new()));

        match attempt {
            Attempt::FailOpen(fault) => Err(fault.error("open")),
            Attempt::Stream(items) => {
                let closed = Arc::clone(&self.1);
                Ok(Box::new(ScriptedCursor {
                    items: items.into(),
                    closed,
                }))
            }
        }
    }
}

/// In-memory object store that can refuse uploads
#[derive(Default)]
pub struct RecordingStaging {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    deleted: Mutex<Vec<String>>,
    fail_next_puts: AtomicU32,
    puts: AtomicU32,
}

impl RecordingStaging {
    /// Refuse the next `n` uploads with a staging error
    pub fn fail_next_puts(&self, n: u32) {
        self.fail_next_puts.store(n, Ordering::SeqCst);
    }

    pub fn paths(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    pub fn paths_for(&self, table: &str) -> Vec<String> {
        let marker = format!("/{table}/");
        self.paths()
            .into_iter()
            .filter(|p| p.contains(&marker))
            .collect()
    }

    pub fn body(&self, path: &str) -> Option<String> {
        self.objects
            .lock()
            .unwrap()
            .get(path)
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn put_attempts(&self) -> u32 {
        self.puts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StagingStore for RecordingStaging {
    async fn put(&self, path: &str, bytes: Vec<u8>) -> Result<StagedObject> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .fail_next_puts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(SluiceError::Staging(format!("upload of {path} refused")));
        }

        let object = StagedObject {
            path: path.to_string(),
            uri: format!("mem://staging/{path}"),
            size_bytes: bytes.len() as u64,
            sha256: sha256_hex(&bytes),
        };
        self.objects.lock().unwrap().insert(path.to_string(), bytes);
        Ok(object)
    }

    async fn put_if_absent(&self, path: &str, bytes: Vec<u8>) -> Result<bool> {
        let mut objects = self.objects.lock().unwrap();
        if objects.contains_key(path) {
            return Ok(false);
        }
        objects.insert(path.to_string(), bytes);
        Ok(true)
    }

    async fn get(&self, path: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.objects.lock().unwrap().get(path).cloned())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.objects.lock().unwrap().remove(path);
        self.deleted.lock().unwrap().push(path.to_string());
        Ok(())
    }

    fn describe(&self) -> String {
        "mem://staging".to_string()
    }
}

/// Rows of one warehouse table, all values as text
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WarehouseTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl WarehouseTable {
    fn column(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.eq_ignore_ascii_case(name))
    }
}

#[derive(Debug, Clone)]
enum Job {
    Load(LoadRequest),
    Merge(MergeRequest),
}

/// Warehouse that reads staged CSV objects and applies loads and merges
///
/// Jobs take effect in `wait`. Failures are scripted per table name.
pub struct ScriptedLoader {
    staging: Arc<RecordingStaging>,
    requests: Mutex<Vec<LoadRequest>>,
    merges: Mutex<Vec<MergeRequest>>,
    reject_submit: Mutex<HashSet<String>>,
    fail_job: Mutex<HashSet<String>>,
    job_delay: Mutex<Option<Duration>>,
    job_counts: Mutex<HashMap<String, u32>>,
    jobs: Mutex<HashMap<String, (String, Job)>>,
    tables: Mutex<HashMap<String, WarehouseTable>>,
}

impl ScriptedLoader {
    pub fn new(staging: Arc<RecordingStaging>) -> Self {
        Self {
            staging,
            requests: Mutex::default(),
            merges: Mutex::default(),
            reject_submit: Mutex::default(),
            fail_job: Mutex::default(),
            job_delay: Mutex::default(),
            job_counts: Mutex::default(),
            jobs: Mutex::default(),
            tables: Mutex::default(),
        }
    }

    pub fn reject_submit(&self, table: &str) {
        self.reject_submit.lock().unwrap().insert(table.to_string());
    }

    pub fn fail_job(&self, table: &str) {
        self.fail_job.lock().unwrap().insert(table.to_string());
    }

    /// Every job takes `delay` to finish
    pub fn slow_jobs(&self, delay: Duration) {
        *self.job_delay.lock().unwrap() = Some(delay);
    }

    pub fn requests(&self) -> Vec<LoadRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_for(&self, table: &str) -> Vec<LoadRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.table_name.as_str() == table)
            .collect()
    }

    pub fn merges_for(&self, table: &str) -> Vec<MergeRequest> {
        self.merges
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.table_name.as_str() == table)
            .cloned()
            .collect()
    }

    /// Current rows of a warehouse table
    pub fn rows(&self, table: &str) -> Vec<Vec<String>> {
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    fn register(&self, table: &TableName, job: Job) -> Result<LoadJobHandle> {
        if self.reject_submit.lock().unwrap().contains(table.as_str()) {
            return Err(SluiceError::LoadSubmission(format!("{table}: access denied")));
        }
        let n = {
            let mut counts = self.job_counts.lock().unwrap();
            let n = counts.entry(table.as_str().to_string()).or_insert(0);
            *n += 1;
            *n
        };
        let job_id = format!("job_{table}_{n}");
        self.jobs
            .lock()
            .unwrap()
            .insert(job_id.clone(), (table.as_str().to_string(), job));
        Ok(LoadJobHandle {
            job_id,
            location: None,
        })
    }

    fn staged_rows(&self, uris: &[String]) -> WarehouseTable {
        let mut loaded = WarehouseTable::default();
        for uri in uris {
            let path = uri.trim_start_matches("mem://staging/");
            let body = self.staging.body(path).unwrap_or_default();
            let mut reader = csv::Reader::from_reader(body.as_bytes());
            loaded.columns = reader.headers().unwrap().iter().map(str::to_string).collect();
            for record in reader.records() {
                loaded
                    .rows
                    .push(record.unwrap().iter().map(str::to_string).collect());
            }
        }
        loaded
    }

    fn apply(&self, job: Job) -> u64 {
        let mut tables = self.tables.lock().unwrap();
        match job {
            Job::Load(request) => {
                let loaded = self.staged_rows(&request.source_uris);
                let count = loaded.rows.len() as u64;
                let table = tables.entry(request.destination_table).or_default();
                match request.write_disposition {
                    WriteDisposition::Truncate => *table = loaded,
                    WriteDisposition::Append => {
                        table.columns = loaded.columns;
                        table.rows.extend(loaded.rows);
                    }
                }
                count
            }
            Job::Merge(merge) => {
                let landing = tables.get(&merge.landing_table).cloned().unwrap_or_default();
                let target = tables.entry(merge.target_table.clone()).or_default();
                if target.columns.is_empty() {
                    target.columns = landing.columns.clone();
                }
                match &merge.strategy {
                    MergeStrategy::ReplaceWindow => {
                        let start = format_timestamp(&merge.window.start);
                        let end = format_timestamp(&merge.window.end);
                        if let Some(col) = target.column(&merge.window_column) {
                            target.rows.retain(|row| {
                                !(row[col].as_str() >= start.as_str()
                                    && row[col].as_str() <= end.as_str())
                            });
                        }
                        target.rows.extend(landing.rows.iter().cloned());
                    }
                    MergeStrategy::Upsert { keys } => {
                        let key_of = |table: &WarehouseTable, row: &Vec<String>| -> Vec<String> {
                            keys.iter()
                                .filter_map(|k| table.column(k))
                                .map(|i| row[i].clone())
                                .collect()
                        };
                        for row in &landing.rows {
                            let key = key_of(&landing, row);
                            let existing = {
                                let current: &WarehouseTable = target;
                                current.rows.iter().position(|t| key_of(current, t) == key)
                            };
                            match existing {
                                Some(i) => target.rows[i] = row.clone(),
                                None => target.rows.push(row.clone()),
                            }
                        }
                    }
                    MergeStrategy::Custom { .. } => {}
                }
                landing.rows.len() as u64
            }
        }
    }
}

#[async_trait]
impl LoadSubmitter for ScriptedLoader {
    async fn submit(&self, request: &LoadRequest) -> Result<LoadJobHandle> {
        self.requests.lock().unwrap().push(request.clone());
        self.register(&request.table_name, Job::Load(request.clone()))
    }

    async fn submit_merge(&self, request: &MergeRequest) -> Result<LoadJobHandle> {
        self.merges.lock().unwrap().push(request.clone());
        self.register(&request.table_name, Job::Merge(request.clone()))
    }

    async fn wait(&self, handle: &LoadJobHandle) -> Result<LoadJobReport> {
        let delay = *self.job_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let (table, job) = self
            .jobs
            .lock()
            .unwrap()
            .remove(&handle.job_id)
            .expect("unknown job id");
        if self.fail_job.lock().unwrap().contains(&table) {
            return Err(SluiceError::LoadJobFailed {
                job_id: handle.job_id.clone(),
                message: "invalid: row 3 could not be parsed".to_string(),
            });
        }

        let output_rows = self.apply(job);
        Ok(LoadJobReport {
            job_id: handle.job_id.clone(),
            output_rows: Some(output_rows),
        })
    }
}

/// All fakes of one test, plus the "now" runs are built with
pub struct Harness {
    pub source: Arc<ScriptedSource>,
    closed: Arc<AtomicU32>,
    pub staging: Arc<RecordingStaging>,
    pub loader: Arc<ScriptedLoader>,
    pub checkpoints: Arc<InMemoryCheckpointStorage>,
}

impl Harness {
    pub fn new() -> Self {
        let staging = Arc::new(RecordingStaging::default());
        Self {
            source: Arc::new(ScriptedSource::default()),
            closed: Arc::new(AtomicU32::new(0)),
            loader: Arc::new(ScriptedLoader::new(staging.clone())),
            staging,
            checkpoints: Arc::new(InMemoryCheckpointStorage::new()),
        }
    }

    pub fn closed_cursors(&self) -> u32 {
        self.closed.load(Ordering::SeqCst)
    }

    /// Checkpoint-driven context: SystemDate enabled without bounds, 60
    /// minute lookback, immediate retries
    pub fn context(&self, now: NaiveDateTime) -> RunContext {
        self.build_context(now, None)
    }

    /// Like [`Harness::context`], staging only while `gate` exists
    pub fn context_with_gate(&self, now: NaiveDateTime, gate: &str) -> RunContext {
        self.build_context(now, Some(gate))
    }

    fn build_context(&self, now: NaiveDateTime, gate: Option<&str>) -> RunContext {
        let retry = RetryPolicy::immediate(3);
        let mut writer = StagingWriter::new(
            self.staging.clone(),
            StagingLayout::new("exports", now),
            retry.clone(),
        );
        if let Some(gate) = gate {
            writer = writer.with_execution_gate(gate);
        }
        let mut ctx = RunContext::new(
            Arc::new(SourceHandle(self.source.clone(), self.closed.clone())),
            Arc::new(writer),
            self.loader.clone(),
            self.checkpoints.clone(),
            now,
        );
        ctx.systemdate = SystemDateConfig::window(None, None);
        ctx.params = RunParameters {
            force_full_load: false,
            lookback_minutes: 60,
        };
        ctx.retry = retry;
        ctx
    }
}
