//! Google Cloud Storage staging backend
//!
//! Objects are uploaded with the JSON API's simple media upload and removed
//! with an object delete. Create-only uploads carry `ifGenerationMatch=0`, so
//! GCS itself decides which of two concurrent writers wins. Authentication is
//! a pre-issued OAuth2 bearer token.

use crate::adapters::staging::staged_object;
use crate::adapters::traits::{StagedObject, StagingStore};
use crate::config::schema::StagingConfig;
use crate::config::SecretString;
use crate::domain::{Result, SluiceError};
use async_trait::async_trait;
use reqwest::{Client, ClientBuilder, RequestBuilder, StatusCode};
use secrecy::ExposeSecret;
use std::time::Duration;
use url::Url;

/// [`StagingStore`] writing to a GCS bucket
pub struct GcsStagingStore {
    client: Client,
    endpoint: Url,
    bucket: String,
    access_token: Option<SecretString>,
}

impl GcsStagingStore {
    /// Create a GCS store from the `[staging]` section
    ///
    /// # Errors
    ///
    /// Returns [`SluiceError::Configuration`] when the bucket is missing or the
    /// endpoint is not a URL.
    pub fn new(config: &StagingConfig) -> Result<Self> {
        let bucket = config
            .bucket
            .clone()
            .filter(|b| !b.trim().is_empty())
            .ok_or_else(|| SluiceError::Configuration("staging.bucket is required".into()))?;

        let endpoint = Url::parse(&config.endpoint).map_err(|e| {
            SluiceError::Configuration(format!("Invalid staging.endpoint: {e}"))
        })?;

        let client = ClientBuilder::new()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| SluiceError::Connection(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            bucket,
            access_token: config.access_token.clone(),
        })
    }

    fn object_url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| {
                SluiceError::Configuration(format!(
                    "staging.endpoint '{}' cannot carry a path",
                    self.endpoint
                ))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.access_token {
            Some(token) => request.bearer_auth(token.expose_secret().as_ref()),
            None => request,
        }
    }

    fn uri_for(&self, path: &str) -> String {
        format!("gs://{}/{}", self.bucket, path)
    }

    /// Media upload; `None` when `create_only` and the object already exists
    async fn upload(
        &self,
        path: &str,
        bytes: Vec<u8>,
        create_only: bool,
    ) -> Result<Option<StagedObject>> {
        let bucket = self.bucket.as_str();
        let mut url = self.object_url(&["upload", "storage", "v1", "b", bucket, "o"])?;
        url.query_pairs_mut()
            .append_pair("uploadType", "media")
            .append_pair("name", path);
        if create_only {
            url.query_pairs_mut().append_pair("ifGenerationMatch", "0");
        }

        let object = staged_object(path, self.uri_for(path), &bytes);
        let content_type = if path.ends_with(".csv") {
            "text/csv"
        } else {
            "application/octet-stream"
        };

        let resp = self
            .authorize(self.client.post(url))
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await
            .map_err(|e| SluiceError::Staging(format!("Upload of {path} failed: {e}")))?;

        match resp.status() {
            status if status.is_success() => {
                tracing::debug!(
                    uri = %object.uri,
                    bytes = object.size_bytes,
                    "Uploaded staging object"
                );
                Ok(Some(object))
            }
            StatusCode::PRECONDITION_FAILED if create_only => Ok(None),
            status => {
                let body = resp.text().await.unwrap_or_default();
                Err(SluiceError::Staging(format!(
                    "Upload of {path} failed with status {status}: {body}"
                )))
            }
        }
    }
}

#[async_trait]
impl StagingStore for GcsStagingStore {
    async fn put(&self, path: &str, bytes: Vec<u8>) -> Result<StagedObject> {
        self.upload(path, bytes, false).await?.ok_or_else(|| {
            SluiceError::Staging(format!("Upload of {path} was not acknowledged"))
        })
    }

    async fn put_if_absent(&self, path: &str, bytes: Vec<u8>) -> Result<bool> {
        Ok(self.upload(path, bytes, true).await?.is_some())
    }

    async fn get(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let mut url = self.object_url(&["storage", "v1", "b", self.bucket.as_str(), "o", path])?;
        url.query_pairs_mut().append_pair("alt", "media");

        let resp = self
            .authorize(self.client.get(url))
            .send()
            .await
            .map_err(|e| SluiceError::Staging(format!("Download of {path} failed: {e}")))?;

        match resp.status() {
            status if status.is_success() => {
                let body = resp
                    .bytes()
                    .await
                    .map_err(|e| SluiceError::Staging(format!("Download of {path} failed: {e}")))?;
                Ok(Some(body.to_vec()))
            }
            StatusCode::NOT_FOUND => Ok(None),
            status => {
                let body = resp.text().await.unwrap_or_default();
                Err(SluiceError::Staging(format!(
                    "Download of {path} failed with status {status}: {body}"
                )))
            }
        }
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let url = self.object_url(&["storage", "v1", "b", self.bucket.as_str(), "o", path])?;

        let resp = self
            .authorize(self.client.delete(url))
            .send()
            .await
            .map_err(|e| SluiceError::Staging(format!("Delete of {path} failed: {e}")))?;

        match resp.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Ok(()),
            status => {
                let body = resp.text().await.unwrap_or_default();
                Err(SluiceError::Staging(format!(
                    "Delete of {path} failed with status {status}: {body}"
                )))
            }
        }
    }

    fn describe(&self) -> String {
        format!("gs://{}", self.bucket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::staging::sha256_hex;
    use crate::config::schema::StagingBackend;
    use crate::config::secret_string;
    use mockito::Matcher;

    fn store(endpoint: &str) -> GcsStagingStore {
        GcsStagingStore::new(&StagingConfig {
            backend: StagingBackend::Gcs,
            bucket: Some("etl-staging".to_string()),
            data_path: "exports".to_string(),
            local_root: None,
            endpoint: endpoint.to_string(),
            access_token: Some(secret_string("test-token".to_string())),
            request_timeout_seconds: 5,
            execution_gate: None,
            lock_path: None,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_put_uploads_media() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/upload/storage/v1/b/etl-staging/o")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("uploadType".into(), "media".into()),
                Matcher::UrlEncoded("name".into(), "exports/orders/orders_0001.csv".into()),
            ]))
            .match_header("authorization", "Bearer test-token")
            .match_header("content-type", "text/csv")
            .match_body("id,total\n1,9.5\n")
            .with_status(200)
            .with_body(r#"{"name":"exports/orders/orders_0001.csv","size":"15"}"#)
            .create_async()
            .await;

        let object = store(&server.url())
            .put("exports/orders/orders_0001.csv", b"id,total\n1,9.5\n".to_vec())
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(object.uri, "gs://etl-staging/exports/orders/orders_0001.csv");
        assert_eq!(object.size_bytes, 15);
        assert_eq!(object.sha256, sha256_hex(b"id,total\n1,9.5\n"));
    }

    #[tokio::test]
    async fn test_put_server_error_is_staging_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/upload/storage/v1/b/etl-staging/o")
            .match_query(Matcher::Any)
            .with_status(503)
            .with_body("backend unavailable")
            .create_async()
            .await;

        let err = store(&server.url())
            .put("exports/a.csv", b"x\n".to_vec())
            .await
            .unwrap_err();

        assert!(matches!(err, SluiceError::Staging(_)));
        assert!(err.is_transient());
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn test_delete_encodes_object_name() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock(
                "DELETE",
                Matcher::Regex(r"^/storage/v1/b/etl-staging/o/exports(%2F|/)a\.csv$".into()),
            )
            .with_status(204)
            .create_async()
            .await;

        store(&server.url()).delete("exports/a.csv").await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_delete_missing_object_is_ok() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("DELETE", Matcher::Regex("^/storage/v1/b/etl-staging/o/".into()))
            .with_status(404)
            .create_async()
            .await;

        assert!(store(&server.url()).delete("exports/gone.csv").await.is_ok());
    }

    #[tokio::test]
    async fn test_put_if_absent_uses_generation_precondition() {
        let mut server = mockito::Server::new_async().await;
        let created = server
            .mock("POST", "/upload/storage/v1/b/etl-staging/o")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("name".into(), "exports/_run.lock".into()),
                Matcher::UrlEncoded("ifGenerationMatch".into(), "0".into()),
            ]))
            .match_header("content-type", "application/octet-stream")
            .with_status(200)
            .with_body(r#"{"name":"exports/_run.lock","generation":"1"}"#)
            .create_async()
            .await;

        let store = store(&server.url());
        assert!(store
            .put_if_absent("exports/_run.lock", b"{}".to_vec())
            .await
            .unwrap());
        created.assert_async().await;
    }

    #[tokio::test]
    async fn test_put_if_absent_reports_existing_object() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/upload/storage/v1/b/etl-staging/o")
            .match_query(Matcher::Any)
            .with_status(412)
            .with_body(r#"{"error":{"code":412,"message":"conditionNotMet"}}"#)
            .create_async()
            .await;

        let taken = store(&server.url())
            .put_if_absent("exports/_run.lock", b"{}".to_vec())
            .await
            .unwrap();
        assert!(!taken);
    }

    #[tokio::test]
    async fn test_get_reads_media_and_missing_is_none() {
        let mut server = mockito::Server::new_async().await;
        let _found = server
            .mock(
                "GET",
                Matcher::Regex(r"^/storage/v1/b/etl-staging/o/control(%2F|/)EXECUTE_APPLY$".into()),
            )
            .match_query(Matcher::UrlEncoded("alt".into(), "media".into()))
            .with_status(200)
            .with_body("go")
            .create_async()
            .await;
        let _missing = server
            .mock("GET", Matcher::Regex(r"^/storage/v1/b/etl-staging/o/gone$".into()))
            .match_query(Matcher::Any)
            .with_status(404)
            .create_async()
            .await;

        let store = store(&server.url());
        assert_eq!(
            store.get("control/EXECUTE_APPLY").await.unwrap(),
            Some(b"go".to_vec())
        );
        assert!(store.exists("control/EXECUTE_APPLY").await.unwrap());
        assert_eq!(store.get("gone").await.unwrap(), None);
    }

    #[test]
    fn test_missing_bucket_rejected() {
        let result = GcsStagingStore::new(&StagingConfig {
            backend: StagingBackend::Gcs,
            bucket: None,
            data_path: "exports".to_string(),
            local_root: None,
            endpoint: "https://storage.googleapis.com".to_string(),
            access_token: None,
            request_timeout_seconds: 5,
            execution_gate: None,
            lock_path: None,
        });
        assert!(matches!(result, Err(SluiceError::Configuration(_))));
    }

    #[test]
    fn test_describe() {
        assert_eq!(store("https://storage.googleapis.com").describe(), "gs://etl-staging");
    }
}
