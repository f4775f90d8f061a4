//! Google Drive v3 REST client
//!
//! Thin mapping from [`RemoteClient`] calls to Drive HTTP requests. Retries,
//! pagination and folder caching happen in the engine; this module only
//! translates requests and classifies failures.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use drive_core::remote::RemoteResult;
use drive_core::{ListPage, RemoteClient, RemoteError, RemoteId, RemoteKind, RemoteObject};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;

/// Public Drive endpoint
pub const DEFAULT_API_BASE: &str = "https://www.googleapis.com";

const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";
const FILE_FIELDS: &str = "id,name,parents,mimeType,modifiedTime,md5Checksum";
const LIST_FIELDS: &str =
    "nextPageToken,files(id,name,parents,mimeType,modifiedTime,md5Checksum)";
const PAGE_SIZE: &str = "100";
const MULTIPART_BOUNDARY: &str = "drive-sync-part-boundary";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    name: String,
    #[serde(default)]
    parents: Vec<String>,
    mime_type: String,
    modified_time: Option<DateTime<Utc>>,
    md5_checksum: Option<String>,
}

impl From<DriveFile> for RemoteObject {
    fn from(file: DriveFile) -> Self {
        let kind = if file.mime_type == FOLDER_MIME_TYPE {
            RemoteKind::Folder
        } else {
            RemoteKind::File
        };
        RemoteObject {
            id: RemoteId::new(file.id),
            name: file.name,
            parent: file.parents.into_iter().next().map(RemoteId::new),
            kind,
            modified_time: file.modified_time,
            fingerprint: file.md5_checksum.map(|md5| format!("md5:{md5}")),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Parents {
    #[serde(default)]
    parents: Vec<String>,
}

/// [`RemoteClient`] backed by the Drive v3 API.
pub struct DriveClient {
    http: Client,
    api_base: String,
    token: String,
}

impl DriveClient {
    /// Client authenticating with the bearer `token`.
    pub fn new(token: impl Into<String>, api_base: Option<&str>) -> reqwest::Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("drive-sync/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            api_base: api_base
                .unwrap_or(DEFAULT_API_BASE)
                .trim_end_matches('/')
                .to_string(),
            token: token.into(),
        })
    }

    fn files_url(&self) -> String {
        format!("{}/drive/v3/files", self.api_base)
    }

    fn file_url(&self, id: &RemoteId) -> String {
        format!("{}/drive/v3/files/{}", self.api_base, id)
    }

    fn upload_url(&self) -> String {
        format!("{}/upload/drive/v3/files", self.api_base)
    }

    async fn send(&self, request: RequestBuilder) -> RemoteResult<Response> {
        let response = request
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(status_error(status, body.trim()))
    }

    async fn send_for_file(&self, request: RequestBuilder) -> RemoteResult<RemoteObject> {
        let file: DriveFile = self
            .send(request)
            .await?
            .json()
            .await
            .map_err(|e| RemoteError::rejected(format!("unexpected response: {e}")))?;
        Ok(file.into())
    }
}

/// Reasons Drive attaches to a 403 when a quota, not a permission, is hit
const RATE_LIMIT_REASONS: &[&str] = &["rateLimitExceeded", "userRateLimitExceeded"];

/// Drive error body: `{"error": {"errors": [{"reason": ...}], ...}}`
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: ErrorDetail,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    errors: Vec<ErrorReason>,
}

#[derive(Debug, Deserialize)]
struct ErrorReason {
    #[serde(default)]
    reason: String,
}

fn is_rate_limited(body: &str) -> bool {
    serde_json::from_str::<ErrorBody>(body).is_ok_and(|body| {
        body.error
            .errors
            .iter()
            .any(|e| RATE_LIMIT_REASONS.contains(&e.reason.as_str()))
    })
}

/// Classify an HTTP status and response body as transient or permanent.
pub fn status_error(status: StatusCode, body: &str) -> RemoteError {
    let rate_limited = status == StatusCode::FORBIDDEN && is_rate_limited(body);
    let message = if body.is_empty() {
        status.to_string()
    } else {
        format!("{status}: {body}")
    };
    match status {
        StatusCode::TOO_MANY_REQUESTS => RemoteError::RateLimited { message },
        _ if rate_limited => RemoteError::RateLimited { message },
        StatusCode::NOT_FOUND => RemoteError::NotFound { id: message },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            RemoteError::PermissionDenied { message }
        }
        s if s.is_server_error() || s == StatusCode::REQUEST_TIMEOUT => {
            RemoteError::Transient { message }
        }
        _ => RemoteError::Rejected { message },
    }
}

fn transport_error(e: reqwest::Error) -> RemoteError {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        RemoteError::transient(e.to_string())
    } else {
        RemoteError::rejected(e.to_string())
    }
}

fn escape_query(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Drive search query for the children of `parent`, optionally by name.
pub fn list_query(parent: Option<&RemoteId>, name: Option<&str>) -> String {
    let parent = parent.map_or("root", RemoteId::as_str);
    let mut query = format!("'{}' in parents and trashed = false", escape_query(parent));
    if let Some(name) = name {
        query.push_str(&format!(" and name = '{}'", escape_query(name)));
    }
    query
}

/// `multipart/related` body carrying metadata and content in one request.
fn multipart_body(metadata: &serde_json::Value, content: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(content.len() + 256);
    body.extend_from_slice(
        format!(
            "--{MULTIPART_BOUNDARY}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{metadata}\r\n--{MULTIPART_BOUNDARY}\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{MULTIPART_BOUNDARY}--\r\n").as_bytes());
    body
}

#[async_trait]
impl RemoteClient for DriveClient {
    async fn list_page(
        &self,
        parent: Option<&RemoteId>,
        name: Option<&str>,
        page_token: Option<&str>,
    ) -> RemoteResult<ListPage> {
        let mut query = vec![
            ("q", list_query(parent, name)),
            ("fields", LIST_FIELDS.to_string()),
            ("pageSize", PAGE_SIZE.to_string()),
        ];
        if let Some(token) = page_token {
            query.push(("pageToken", token.to_string()));
        }

        let list: FileList = self
            .send(self.http.get(self.files_url()).query(&query))
            .await?
            .json()
            .await
            .map_err(|e| RemoteError::rejected(format!("unexpected listing: {e}")))?;

        Ok(ListPage {
            items: list.files.into_iter().map(Into::into).collect(),
            next_page_token: list.next_page_token,
        })
    }

    async fn create_folder(
        &self,
        parent: Option<&RemoteId>,
        name: &str,
    ) -> RemoteResult<RemoteObject> {
        let metadata = json!({
            "name": name,
            "mimeType": FOLDER_MIME_TYPE,
            "parents": [parent.map_or("root", RemoteId::as_str)],
        });
        self.send_for_file(
            self.http
                .post(self.files_url())
                .query(&[("fields", FILE_FIELDS)])
                .json(&metadata),
        )
        .await
    }

    async fn create_file(
        &self,
        parent: &RemoteId,
        name: &str,
        content: &[u8],
    ) -> RemoteResult<RemoteObject> {
        let metadata = json!({ "name": name, "parents": [parent.as_str()] });
        self.send_for_file(
            self.http
                .post(self.upload_url())
                .query(&[("uploadType", "multipart"), ("fields", FILE_FIELDS)])
                .header(
                    reqwest::header::CONTENT_TYPE,
                    format!("multipart/related; boundary={MULTIPART_BOUNDARY}"),
                )
                .body(multipart_body(&metadata, content)),
        )
        .await
    }

    async fn update_file(&self, id: &RemoteId, content: &[u8]) -> RemoteResult<RemoteObject> {
        self.send_for_file(
            self.http
                .patch(format!("{}/{}", self.upload_url(), id))
                .query(&[("uploadType", "media"), ("fields", FILE_FIELDS)])
                .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                .body(content.to_vec()),
        )
        .await
    }

    async fn delete(&self, id: &RemoteId) -> RemoteResult<()> {
        self.send(self.http.delete(self.file_url(id))).await?;
        Ok(())
    }

    async fn move_object(
        &self,
        id: &RemoteId,
        new_parent: &RemoteId,
        new_name: &str,
    ) -> RemoteResult<RemoteObject> {
        let current: Parents = self
            .send(
                self.http
                    .get(self.file_url(id))
                    .query(&[("fields", "parents")]),
            )
            .await?
            .json()
            .await
            .map_err(|e| RemoteError::rejected(format!("unexpected response: {e}")))?;
        let old_parents = current.parents.join(",");

        self.send_for_file(
            self.http
                .patch(self.file_url(id))
                .query(&[
                    ("addParents", new_parent.as_str()),
                    ("removeParents", old_parents.as_str()),
                    ("fields", FILE_FIELDS),
                ])
                .json(&json!({ "name": new_name })),
        )
        .await
    }
}
