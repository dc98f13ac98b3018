//! Source routing
//!
//! Tables may read from named databases besides the default source. The
//! router picks the client by [`FinalQuery::database`].

use crate::adapters::traits::{RowCursor, SourceClient};
use crate::core::incremental::rewriter::FinalQuery;
use crate::domain::{Result, SluiceError};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

type Source = Arc<dyn SourceClient + Send + Sync>;

/// [`SourceClient`] dispatching to the default or a named database
pub struct SourceRouter {
    default: Source,
    named: BTreeMap<String, Source>,
}

impl SourceRouter {
    pub fn new(default: Source) -> Self {
        Self {
            default,
            named: BTreeMap::new(),
        }
    }

    pub fn with_database(mut self, name: impl Into<String>, source: Source) -> Self {
        self.named.insert(name.into(), source);
        self
    }

    fn route(&self, database: Option<&str>) -> Result<&Source> {
        match database {
            None => Ok(&self.default),
            Some(name) => self.named.get(name).ok_or_else(|| {
                SluiceError::ConfigValidation(format!("unknown source database '{name}'"))
            }),
        }
    }
}

#[async_trait]
impl SourceClient for SourceRouter {
    async fn test_connection(&self) -> Result<()> {
        self.default.test_connection().await?;
        for (name, source) in &self.named {
            source.test_connection().await.map_err(|e| match e {
                SluiceError::Connection(message) => {
                    SluiceError::Connection(format!("database '{name}': {message}"))
                }
                other => other,
            })?;
        }
        Ok(())
    }

    async fn open_cursor(
        &self,
        query: &FinalQuery,
        fetch_size: usize,
    ) -> Result<Box<dyn RowCursor>> {
        let source = self.route(query.database.as_deref())?;
        tracing::debug!(
            table = %query.table_name,
            database = query.database.as_deref().unwrap_or("default"),
            "Routing query"
        );
        source.open_cursor(query, fetch_size).await
    }
}
