//! Google Cloud Storage JSON API client.

use bytes::Bytes;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::{header, Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};

use uniblob_common::{Error, Result};

use crate::adapter::ObjectRef;
use crate::config::GcsConfig;

/// Resumable upload chunks must be multiples of this size, except the last.
pub const UPLOAD_ALIGNMENT: usize = 256 * 1024;

/// Object names travel as a single path segment, so `/` is escaped too.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'.').remove(b'_').remove(b'~');

/// Object resource returned by the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GcsObject {
    /// Object name (the key).
    pub name: String,
    /// Bucket name.
    pub bucket: String,
    /// Size in bytes, as a decimal string.
    #[serde(default)]
    pub size: Option<String>,
    /// Content generation.
    #[serde(default)]
    pub generation: Option<String>,
    /// Base64 MD5 of the content.
    #[serde(default)]
    pub md5_hash: Option<String>,
}

impl GcsObject {
    /// Get size as u64.
    pub fn size_bytes(&self) -> Option<u64> {
        self.size.as_ref().and_then(|s| s.parse().ok())
    }
}

/// One page of `objects.list`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectList {
    /// Objects in this page; absent when the page is empty.
    #[serde(default)]
    pub items: Vec<GcsObject>,
    /// Cursor for the next page; absent on the last page.
    #[serde(default)]
    pub next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RewriteResponse {
    done: bool,
    #[serde(default)]
    rewrite_token: Option<String>,
}

/// GCS JSON API client.
///
/// Performs no retries; every failure is returned to the caller as is.
pub struct GcsClient {
    http: Client,
    endpoint: String,
    token: Option<String>,
}

impl GcsClient {
    /// Create a new client with the configured endpoint, token and timeouts.
    pub fn new(config: &GcsConfig) -> Result<Self> {
        let http = Client::builder()
            .user_agent("uniblob/0.1")
            .connect_timeout(config.connect_timeout())
            .read_timeout(config.read_timeout())
            // Resumable uploads answer 308 without a Location; never follow it.
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        })
    }

    fn objects_url(&self, bucket: &str) -> String {
        format!("{}/storage/v1/b/{}/o", self.endpoint, encode_segment(bucket))
    }

    fn object_url(&self, bucket: &str, key: &str) -> String {
        format!("{}/{}", self.objects_url(bucket), encode_segment(key))
    }

    fn upload_url(&self, bucket: &str) -> String {
        format!(
            "{}/upload/storage/v1/b/{}/o",
            self.endpoint,
            encode_segment(bucket)
        )
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Upload an object in a single media request.
    pub async fn put_object(&self, bucket: &str, key: &str, data: Bytes) -> Result<GcsObject> {
        let response = self
            .authorize(self.http.post(self.upload_url(bucket)))
            .query(&[("uploadType", "media"), ("name", key)])
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(data)
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to upload object: {}", e)))?;

        handle_response(response).await
    }

    /// Download the full object content.
    pub async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes> {
        let response = self
            .authorize(self.http.get(self.object_url(bucket, key)))
            .query(&[("alt", "media")])
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to download object: {}", e)))?;

        read_body(check_status(response).await?).await
    }

    /// Download bytes `start..=end` of the object.
    pub async fn get_range(&self, bucket: &str, key: &str, start: u64, end: u64) -> Result<Bytes> {
        let response = self
            .authorize(self.http.get(self.object_url(bucket, key)))
            .query(&[("alt", "media")])
            .header(header::RANGE, format!("bytes={}-{}", start, end))
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to read object range: {}", e)))?;

        read_body(check_status(response).await?).await
    }

    /// Fetch object metadata (size, generation).
    pub async fn object_metadata(&self, bucket: &str, key: &str) -> Result<GcsObject> {
        let response = self
            .authorize(self.http.get(self.object_url(bucket, key)))
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to get object: {}", e)))?;

        handle_response(response).await
    }

    /// Fetch one page of objects whose names start with `prefix`.
    pub async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        max_results: usize,
        page_token: Option<&str>,
    ) -> Result<ObjectList> {
        let max_results = max_results.to_string();
        let mut request = self
            .authorize(self.http.get(self.objects_url(bucket)))
            .query(&[
                ("prefix", prefix),
                ("maxResults", max_results.as_str()),
                ("fields", "items(name,bucket,size,generation,md5Hash),nextPageToken"),
            ]);

        if let Some(token) = page_token {
            request = request.query(&[("pageToken", token)]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to list objects: {}", e)))?;

        handle_response(response).await
    }

    /// Delete an object.
    pub async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        let response = self
            .authorize(self.http.delete(self.object_url(bucket, key)))
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to delete object: {}", e)))?;

        check_status(response).await?;
        Ok(())
    }

    /// Start a resumable upload session and return its session URI.
    pub async fn start_resumable(&self, bucket: &str, key: &str) -> Result<String> {
        let response = self
            .authorize(self.http.post(self.upload_url(bucket)))
            .query(&[("uploadType", "resumable"), ("name", key)])
            .header(header::CONTENT_LENGTH, "0")
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to start resumable upload: {}", e)))?;

        let response = check_status(response).await?;

        let session = response
            .headers()
            .get(header::LOCATION)
            .ok_or_else(|| Error::Network("No upload session in response".to_string()))?
            .to_str()
            .map_err(|e| Error::Network(format!("Invalid upload session URI: {}", e)))?
            .to_string();

        Ok(session)
    }

    /// Send bytes starting at `offset` to a resumable session.
    ///
    /// `total` is set only on the final request. Returns the object once the
    /// store reports the upload complete, `None` while more is expected.
    pub async fn put_chunk(
        &self,
        session: &str,
        data: Bytes,
        offset: u64,
        total: Option<u64>,
    ) -> Result<Option<GcsObject>> {
        let range = content_range(offset, data.len() as u64, total);

        let response = self
            .authorize(self.http.put(session))
            .header(header::CONTENT_RANGE, range)
            .body(data)
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to upload chunk: {}", e)))?;

        // 308 Resume Incomplete
        if response.status() == StatusCode::PERMANENT_REDIRECT {
            return Ok(None);
        }

        handle_response(response).await.map(Some)
    }

    /// Copy `from` to `to`, following rewrite tokens until the copy is done.
    pub async fn rewrite(&self, from: &ObjectRef, to: &ObjectRef) -> Result<()> {
        let url = format!(
            "{}/rewriteTo/b/{}/o/{}",
            self.object_url(&from.bucket, &from.key),
            encode_segment(&to.bucket),
            encode_segment(&to.key)
        );
        let mut token: Option<String> = None;

        loop {
            let mut request = self.authorize(self.http.post(&url)).header(header::CONTENT_LENGTH, "0");
            if let Some(t) = &token {
                request = request.query(&[("rewriteToken", t.as_str())]);
            }

            let response = request
                .send()
                .await
                .map_err(|e| Error::Network(format!("Failed to rewrite object: {}", e)))?;

            let rewrite: RewriteResponse = handle_response(response).await?;
            if rewrite.done {
                return Ok(());
            }
            token = Some(rewrite.rewrite_token.ok_or_else(|| {
                Error::Network("Rewrite incomplete without a rewrite token".to_string())
            })?);
        }
    }
}

/// Percent-encode a bucket or object name as one URL path segment.
pub fn encode_segment(raw: &str) -> String {
    utf8_percent_encode(raw, SEGMENT).to_string()
}

/// `Content-Range` header for a resumable upload request.
pub fn content_range(offset: u64, len: u64, total: Option<u64>) -> String {
    let total = total.map_or_else(|| "*".to_string(), |t| t.to_string());
    if len == 0 {
        format!("bytes */{}", total)
    } else {
        format!("bytes {}-{}/{}", offset, offset + len - 1, total)
    }
}

/// Map a failed HTTP status onto the error taxonomy.
pub fn status_error(status: StatusCode, body: &str) -> Error {
    match status {
        StatusCode::NOT_FOUND => Error::NotFound(format!("Object not found: {}", body)),
        StatusCode::UNAUTHORIZED => Error::Authentication("Invalid or expired token".to_string()),
        StatusCode::FORBIDDEN => Error::PermissionDenied("Access denied".to_string()),
        _ => Error::Network(format!("API error: {} - {}", status, body)),
    }
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        let body = response.text().await.unwrap_or_default();
        Err(status_error(status, &body))
    }
}

async fn handle_response<T: serde::de::DeserializeOwned>(response: Response) -> Result<T> {
    check_status(response)
        .await?
        .json()
        .await
        .map_err(|e| Error::Network(format!("Failed to parse response: {}", e)))
}

async fn read_body(response: Response) -> Result<Bytes> {
    response
        .bytes()
        .await
        .map_err(|e| Error::Network(format!("Failed to read response body: {}", e)))
}
