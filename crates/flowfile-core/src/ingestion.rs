//! `IngestionBackend` — the seam between node settings and wherever data
//! actually lives (§4.2's source/sink kinds). Implementing real cloud
//! storage or database connectivity is out of scope; this module defines
//! the trait those integrations would implement and ships
//! [`LocalIngestionBackend`], which only serves the local-filesystem
//! `Read`/`Write` kinds.

use crate::error::{FlowfileError, Result};
use crate::handle::LazyFrameHandle;
use crate::ops::{DatabaseDialect, FileFormat};
use async_trait::async_trait;
use polars::prelude::*;

fn unsupported(what: &str) -> FlowfileError {
    FlowfileError::Engine(format!("{what} requires a configured IngestionBackend; none is wired in"))
}

/// Metadata about a named external connection, as resolved from whatever
/// configuration store a deployment uses (credentials vault, env, etc).
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub name: String,
    pub kind: String,
}

#[async_trait]
pub trait IngestionBackend: Send + Sync {
    async fn scan_local(&self, path: &str, format: FileFormat, has_header: bool) -> Result<LazyFrameHandle>;

    async fn scan_cloud(&self, connection_name: &str, location: &str, format: FileFormat) -> Result<LazyFrameHandle>;

    async fn scan_database(&self, connection_name: &str, dialect: DatabaseDialect, query: &str) -> Result<LazyFrameHandle>;

    async fn scan_unity_catalog(
        &self,
        connection_name: &str,
        catalog: &str,
        schema: &str,
        table: &str,
    ) -> Result<LazyFrameHandle>;

    async fn resolve_connection(&self, connection_name: &str) -> Result<ConnectionInfo>;

    async fn sink_cloud(&self, connection_name: &str, location: &str, format: FileFormat, handle: &LazyFrameHandle) -> Result<()>;

    async fn sink_database(&self, connection_name: &str, dialect: DatabaseDialect, table: &str, handle: &LazyFrameHandle) -> Result<()>;

    async fn sink_unity_catalog(
        &self,
        connection_name: &str,
        catalog: &str,
        schema: &str,
        table: &str,
        handle: &LazyFrameHandle,
    ) -> Result<()>;

    async fn preview_schema(&self, path: &str, format: FileFormat, has_header: bool) -> Result<crate::types::Schema> {
        Ok(self.scan_local(path, format, has_header).await?.schema().clone())
    }
}

/// Serves `Read`/`Write` against the local filesystem; every other source
/// kind reports `unsupported` until a deployment wires in a real backend.
pub struct LocalIngestionBackend;

#[async_trait]
impl IngestionBackend for LocalIngestionBackend {
    async fn scan_local(&self, path: &str, format: FileFormat, has_header: bool) -> Result<LazyFrameHandle> {
        let plan = match format {
            FileFormat::Csv => LazyCsvReader::new(path)
                .with_has_header(has_header)
                .finish()
                .map_err(|e| FlowfileError::Engine(format!("csv scan of '{path}' failed: {e}")))?,
            FileFormat::Parquet => LazyFrame::scan_parquet(path, ScanArgsParquet::default())
                .map_err(|e| FlowfileError::Engine(format!("parquet scan of '{path}' failed: {e}")))?,
            FileFormat::Json => LazyJsonLineReader::new(path)
                .finish()
                .map_err(|e| FlowfileError::Engine(format!("json scan of '{path}' failed: {e}")))?,
            FileFormat::Excel => return Err(unsupported("excel ingestion")),
        };
        LazyFrameHandle::from_lazyframe(plan)
    }

    async fn scan_cloud(&self, _connection_name: &str, _location: &str, _format: FileFormat) -> Result<LazyFrameHandle> {
        Err(unsupported("cloud storage ingestion"))
    }

    async fn scan_database(&self, _connection_name: &str, _dialect: DatabaseDialect, _query: &str) -> Result<LazyFrameHandle> {
        Err(unsupported("database ingestion"))
    }

    async fn scan_unity_catalog(
        &self,
        _connection_name: &str,
        _catalog: &str,
        _schema: &str,
        _table: &str,
    ) -> Result<LazyFrameHandle> {
        Err(unsupported("unity catalog ingestion"))
    }

    async fn resolve_connection(&self, connection_name: &str) -> Result<ConnectionInfo> {
        Err(FlowfileError::NotFound(format!("connection '{connection_name}'")))
    }

    async fn sink_cloud(&self, _connection_name: &str, _location: &str, _format: FileFormat, _handle: &LazyFrameHandle) -> Result<()> {
        Err(unsupported("cloud storage sink"))
    }

    async fn sink_database(&self, _connection_name: &str, _dialect: DatabaseDialect, _table: &str, _handle: &LazyFrameHandle) -> Result<()> {
        Err(unsupported("database sink"))
    }

    async fn sink_unity_catalog(
        &self,
        _connection_name: &str,
        _catalog: &str,
        _schema: &str,
        _table: &str,
        _handle: &LazyFrameHandle,
    ) -> Result<()> {
        Err(unsupported("unity catalog sink"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn scan_local_reads_csv() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "a,b\n1,2\n3,4").unwrap();
        let backend = LocalIngestionBackend;
        let handle = backend
            .scan_local(file.path().to_str().unwrap(), FileFormat::Csv, true)
            .await
            .unwrap();
        assert_eq!(handle.schema().len(), 2);
    }

    #[tokio::test]
    async fn scan_cloud_is_unsupported_by_default() {
        let backend = LocalIngestionBackend;
        assert!(backend.scan_cloud("conn", "s3://bucket/key", FileFormat::Parquet).await.is_err());
    }
}
