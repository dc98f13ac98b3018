//! PostgreSQL source reader
//!
//! Final queries run inside a read-only transaction behind a server-side
//! cursor, so a table of any size is streamed `fetch_size` rows at a time and
//! never materialized in memory. Rows use the simple query protocol, which
//! renders every value as text exactly as PostgreSQL formats it.

use crate::adapters::postgresql::client::PostgresClient;
use crate::adapters::traits::{RowBatch, RowCursor, SourceClient};
use crate::core::incremental::rewriter::{statement_body, FinalQuery};
use crate::domain::ids::TableName;
use crate::domain::{Result, SluiceError};
use async_trait::async_trait;
use deadpool_postgres::Object;
use std::sync::Arc;
use tokio_postgres::SimpleQueryMessage;

const CURSOR_NAME: &str = "sluice_cursor";

/// [`SourceClient`] backed by a PostgreSQL pool
pub struct PostgresSource {
    client: Arc<PostgresClient>,
}

impl PostgresSource {
    pub fn new(client: Arc<PostgresClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SourceClient for PostgresSource {
    async fn test_connection(&self) -> Result<()> {
        self.client.test_connection().await
    }

    async fn open_cursor(
        &self,
        query: &FinalQuery,
        fetch_size: usize,
    ) -> Result<Box<dyn RowCursor>> {
        let body = statement_body(&query.sql)
            .map_err(|e| SluiceError::QueryRewrite(format!("{}: {e}", query.table_name)))?;

        let conn = self
            .client
            .get_connection()
            .await
            .map_err(|e| SluiceError::TransientExtraction(e.to_string()))?;

        let mut setup = String::from("BEGIN READ ONLY;");
        if let Some(timeout) = self.client.statement_timeout_sql() {
            setup.push_str(&timeout);
            setup.push(';');
        }
        setup.push_str(&format!("DECLARE {CURSOR_NAME} NO SCROLL CURSOR FOR {body}"));

        tracing::debug!(
            table = %query.table_name,
            fetch_size = fetch_size,
            "Declaring source cursor"
        );

        let mut cursor = PgRowCursor {
            conn: Some(conn),
            table: query.table_name.clone(),
            fetch_sql: format!("FETCH FORWARD {} FROM {CURSOR_NAME}", fetch_size.max(1)),
            exhausted: false,
        };

        let declared = cursor.connection()?.batch_execute(&setup).await;
        if let Err(err) = declared {
            cursor.discard();
            return Err(SluiceError::from(err));
        }

        Ok(Box::new(cursor))
    }
}

/// Open server-side cursor holding one pooled connection
pub struct PgRowCursor {
    conn: Option<Object>,
    table: TableName,
    fetch_sql: String,
    exhausted: bool,
}

impl PgRowCursor {
    fn connection(&self) -> Result<&Object> {
        self.conn
            .as_ref()
            .ok_or_else(|| SluiceError::Extraction(format!("{}: cursor already closed", self.table)))
    }

    /// Detach the connection from the pool so an open transaction dies with it
    fn discard(&mut self) {
        if let Some(conn) = self.conn.take() {
            drop(Object::take(conn));
        }
    }
}

#[async_trait]
impl RowCursor for PgRowCursor {
    async fn next_batch(&mut self) -> Result<Option<RowBatch>> {
        if self.exhausted {
            return Ok(None);
        }

        let fetched = self.connection()?.simple_query(&self.fetch_sql).await;
        let messages = match fetched {
            Ok(messages) => messages,
            Err(err) => {
                self.discard();
                return Err(SluiceError::from(err));
            }
        };

        let batch = rows_to_batch(&messages);
        if batch.is_empty() {
            self.exhausted = true;
            return Ok(None);
        }
        Ok(Some(batch))
    }

    async fn close(mut self: Box<Self>) -> Result<()> {
        let Some(conn) = self.conn.take() else {
            return Ok(());
        };

        let close_sql = format!("CLOSE {CURSOR_NAME}; COMMIT");
        let closed = conn.batch_execute(&close_sql).await;
        if let Err(err) = closed {
            tracing::warn!(table = %self.table, error = %err, "Failed to close source cursor");
            drop(Object::take(conn));
            return Err(SluiceError::from(err));
        }
        Ok(())
    }
}

impl Drop for PgRowCursor {
    fn drop(&mut self) {
        if self.conn.is_some() {
            tracing::debug!(table = %self.table, "Source cursor dropped without close");
            self.discard();
        }
    }
}

/// Collect the data rows of a simple query response
fn rows_to_batch(messages: &[SimpleQueryMessage]) -> RowBatch {
    let mut batch = RowBatch::default();
    for message in messages {
        if let SimpleQueryMessage::Row(row) = message {
            if batch.columns.is_empty() {
                batch.columns = row
                    .columns()
                    .iter()
                    .map(|c| c.name().to_string())
                    .collect();
            }
            batch
                .rows
                .push((0..row.len()).map(|i| row.get(i).map(str::to_string)).collect());
        }
    }
    batch
}
