//! REST client for the document store gateway
//!
//! # Example
//!
//! ```rust,no_run
//! use docbackup_cosmos::CosmosClient;
//!
//! # fn example() -> docbackup_core::Result<()> {
//! let client = CosmosClient::builder()
//!     .connection_string("AccountEndpoint=https://acct.documents.azure.com:443/;AccountKey=a2V5;")
//!     .build()?;
//! # Ok(())
//! # }
//! ```

use crate::auth::{http_date, MasterKey};
use crate::connection::ConnectionString;
use chrono::Utc;
use docbackup_core::{BackupError, Result};
use reqwest::header::HeaderMap;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// REST API version sent with every request
pub const API_VERSION: &str = "2018-12-31";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_PAGE_SIZE: u32 = 1000;

/// Maximum error body bytes kept in error messages
const MAX_ERROR_BODY_BYTES: usize = 4096;

/// Builder for [`CosmosClient`]
#[derive(Debug, Default)]
pub struct CosmosClientBuilder {
    connection: Option<String>,
    timeout: Option<Duration>,
    page_size: Option<u32>,
}

impl CosmosClientBuilder {
    /// Set the account connection string (required)
    pub fn connection_string(mut self, raw: impl Into<String>) -> Self {
        self.connection = Some(raw.into());
        self
    }

    /// Per-request timeout (default: 60s)
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Maximum documents per page on listing and feed reads (default: 1000)
    pub fn page_size(mut self, size: u32) -> Self {
        self.page_size = Some(size);
        self
    }

    /// Build the client
    pub fn build(self) -> Result<CosmosClient> {
        let raw = self
            .connection
            .ok_or_else(|| BackupError::config("connection string is required"))?;
        let connection = ConnectionString::parse(&raw)?;
        let key = MasterKey::from_base64(connection.account_key())?;

        let endpoint = connection.endpoint().clone();
        let loopback = matches!(endpoint.host_str(), Some("localhost") | Some("127.0.0.1"));
        if endpoint.scheme() == "http" && !loopback {
            warn!("Account endpoint uses plain HTTP, requests are not encrypted");
        }

        let page_size = self.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
        if page_size == 0 {
            return Err(BackupError::config("page_size must be at least 1"));
        }

        let timeout = self.timeout.unwrap_or(DEFAULT_TIMEOUT);
        let mut http = reqwest::Client::builder().timeout(timeout);
        if loopback {
            // local emulator, never through a proxy
            http = http.no_proxy();
        }
        let http = http
            .build()
            .map_err(|e| BackupError::config(format!("failed to build HTTP client: {}", e)))?;

        debug!(endpoint = %endpoint, "Document store client initialized");

        Ok(CosmosClient {
            endpoint,
            key,
            http,
            page_size,
        })
    }
}

/// Document store REST client
pub struct CosmosClient {
    endpoint: Url,
    key: MasterKey,
    http: reqwest::Client,
    page_size: u32,
}

impl std::fmt::Debug for CosmosClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CosmosClient")
            .field("endpoint", &self.endpoint.as_str())
            .field("page_size", &self.page_size)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// A signed request about to be sent
pub(crate) struct Resource<'a> {
    /// Path below the endpoint, e.g. `dbs/db1/colls`
    pub path: String,
    /// Resource type used for signing (`dbs`, `colls`, `docs`, `pkranges`)
    pub resource_type: &'a str,
    /// Resource link used for signing, e.g. `dbs/db1`
    pub link: String,
}

impl CosmosClient {
    /// Create a builder
    pub fn builder() -> CosmosClientBuilder {
        CosmosClientBuilder::default()
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub(crate) fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Start a signed request
    pub(crate) fn request(
        &self,
        method: Method,
        resource: &Resource<'_>,
    ) -> Result<RequestBuilder> {
        let url = self.endpoint.join(&resource.path).map_err(|e| {
            BackupError::config(format!("invalid resource path '{}': {}", resource.path, e))
        })?;
        let date = http_date(Utc::now());
        let authorization = self.key.authorization(
            method.as_str(),
            resource.resource_type,
            &resource.link,
            &date,
        )?;

        debug!(method = %method, url = %url, "Document store request");

        Ok(self
            .http
            .request(method, url)
            .header("authorization", authorization)
            .header("x-ms-date", date)
            .header("x-ms-version", API_VERSION)
            .header("accept", "application/json"))
    }

    /// Send and map transport failures
    pub(crate) async fn send(&self, request: RequestBuilder) -> Result<Response> {
        request.send().await.map_err(transport_error)
    }

    /// Send, fail on non-success status, decode the JSON body
    pub(crate) async fn send_json<T>(&self, request: RequestBuilder) -> Result<(T, HeaderMap)>
    where
        T: for<'de> Deserialize<'de>,
    {
        let response = self.send(request).await?;
        if !response.status().is_success() {
            return Err(error_response(response).await);
        }
        let headers = response.headers().clone();
        let body = response
            .json::<T>()
            .await
            .map_err(|e| BackupError::serialization(format!("failed to parse response: {}", e)))?;
        Ok((body, headers))
    }
}

/// Continuation header of a paginated response
pub(crate) fn continuation(headers: &HeaderMap) -> Option<String> {
    header_value(headers, "x-ms-continuation")
}

pub(crate) fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

pub(crate) fn transport_error(err: reqwest::Error) -> BackupError {
    if err.is_timeout() {
        BackupError::Timeout("request timed out".to_string())
    } else if err.is_connect() {
        BackupError::connection(err.to_string())
    } else if let Some(status) = err.status() {
        status_error(status, err.to_string())
    } else {
        BackupError::connection(err.to_string())
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// Build an error from a non-success response
pub(crate) async fn error_response(response: Response) -> BackupError {
    let status = response.status();
    let body = match response.bytes().await {
        Ok(b) => {
            let end = b.len().min(MAX_ERROR_BODY_BYTES);
            String::from_utf8_lossy(&b[..end]).to_string()
        }
        Err(_) => String::new(),
    };
    let message = match serde_json::from_str::<ErrorBody>(&body) {
        Ok(err) if !err.message.is_empty() => format!("{}: {}", err.code, err.message),
        _ => body,
    };

    status_error(status, message)
}

fn status_error(status: StatusCode, message: String) -> BackupError {
    match status.as_u16() {
        401 | 403 => BackupError::Auth(message),
        404 => BackupError::NotFound(message),
        408 => BackupError::Timeout(message),
        409 => BackupError::Conflict(message),
        429 => BackupError::Throttled(message),
        code => BackupError::store(code, message),
    }
}
