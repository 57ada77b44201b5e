//! Google Cloud Storage implementation.
//!
//! Uses the Cloud Storage JSON API. Create-if-absent maps onto an upload with
//! `ifGenerationMatch=0`, which the service rejects with `412 Precondition
//! Failed` when the object already exists.

use super::storage::{BlobLocation, BlobMeta, CreateOutcome, ObjectStore};
use crate::config::GcsConfig;
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

/// GCS API response structures.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GcsObjectList {
    #[serde(default)]
    items: Vec<GcsObject>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GcsObject {
    name: String,
    size: Option<String>,
}

/// Google Cloud Storage object store.
pub struct GcsObjectStore {
    config: GcsConfig,
    client: Client,
}

impl GcsObjectStore {
    /// Creates a new GCS store.
    pub fn new(config: GcsConfig) -> SyncResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SyncError::Network(format!("failed to create HTTP client: {e}")))?;

        Ok(Self { config, client })
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn object_url(&self, blob: &BlobLocation) -> String {
        format!(
            "{}/storage/v1/b/{}/o/{}",
            self.config.api_base_url,
            urlencoding::encode(&blob.bucket),
            urlencoding::encode(&blob.name)
        )
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> SyncResult<Response> {
        self.authorize(request)
            .send()
            .await
            .map_err(|e| SyncError::Network(format!("{what} failed: {e}")))
    }
}

/// Maps an unsuccessful response to an error.
async fn status_error(response: Response, what: &str) -> SyncError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            SyncError::Auth(format!("{what} failed ({status}): {body}"))
        }
        StatusCode::NOT_FOUND => SyncError::NotFound(format!("{what}: {body}")),
        _ => SyncError::Network(format!("{what} failed ({status}): {body}")),
    }
}

#[async_trait]
impl ObjectStore for GcsObjectStore {
    fn provider_name(&self) -> &'static str {
        "Google Cloud Storage"
    }

    async fn list(&self, bucket: &str, prefix: &str) -> SyncResult<Vec<BlobMeta>> {
        let url = format!(
            "{}/storage/v1/b/{}/o",
            self.config.api_base_url,
            urlencoding::encode(bucket)
        );

        let mut blobs = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self.client.get(&url).query(&[
                ("prefix", prefix),
                ("delimiter", "/"),
                ("fields", "nextPageToken,items(name,size)"),
            ]);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }

            let response = self.send(request, "object list").await?;
            if !response.status().is_success() {
                return Err(status_error(response, "object list").await);
            }

            let body = response
                .bytes()
                .await
                .map_err(|e| SyncError::Network(format!("failed to read object list: {e}")))?;
            let page: GcsObjectList = serde_json::from_slice(&body)?;

            blobs.extend(page.items.into_iter().map(|object| BlobMeta {
                size: object.size.and_then(|s| s.parse().ok()),
                location: BlobLocation::new(bucket, object.name),
            }));

            page_token = page.next_page_token;
            if page_token.is_none() {
                break;
            }
        }

        debug!("Listed {} objects under gs://{}/{}", blobs.len(), bucket, prefix);
        Ok(blobs)
    }

    async fn read_all(&self, blob: &BlobLocation) -> SyncResult<Vec<u8>> {
        let request = self
            .client
            .get(self.object_url(blob))
            .query(&[("alt", "media")]);

        let response = self.send(request, "object download").await?;
        if !response.status().is_success() {
            return Err(status_error(response, &format!("download of {blob}")).await);
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| SyncError::Network(format!("failed to read {blob}: {e}")))?;

        debug!("Downloaded {} ({} bytes)", blob, bytes.len());
        Ok(bytes.to_vec())
    }

    async fn create_if_absent(
        &self,
        blob: &BlobLocation,
        content: &[u8],
    ) -> SyncResult<CreateOutcome> {
        let url = format!(
            "{}/upload/storage/v1/b/{}/o",
            self.config.upload_base_url,
            urlencoding::encode(&blob.bucket)
        );

        let request = self
            .client
            .post(url)
            .query(&[
                ("uploadType", "media"),
                ("name", blob.name.as_str()),
                ("ifGenerationMatch", "0"),
            ])
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(content.to_vec());

        let response = self.send(request, "object upload").await?;
        match response.status() {
            status if status.is_success() => {
                info!("Uploaded {} ({} bytes)", blob, content.len());
                Ok(CreateOutcome::Created)
            }
            StatusCode::PRECONDITION_FAILED => {
                debug!("{} already exists", blob);
                Ok(CreateOutcome::AlreadyExists)
            }
            _ => Err(status_error(response, &format!("upload of {blob}")).await),
        }
    }
}
