//! Amazon Photos API connector
//!
//! Implements the `RemoteLibrary` trait over the drive v1 endpoints used by
//! the Amazon Photos web client.

use async_trait::async_trait;
use bridge_traits::error::{BridgeError, Result};
use bridge_traits::{ByteStream, Page, PageRequest, RemoteItemDescriptor, RemoteLibrary};
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use futures::{StreamExt, TryStreamExt};
use reqwest::header::{ACCEPT, COOKIE};
use reqwest::{Client, Response};
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::error::AmazonPhotosError;
use crate::session::Session;
use crate::types::{Node, NodeListResponse};

/// Default API base URL
pub const DEFAULT_BASE_URL: &str = "https://www.amazon.com";

/// Largest page the nodes endpoint returns
const MAX_PAGE_SIZE: u32 = 200;

const USER_AGENT: &str = concat!("media-vault/", env!("CARGO_PKG_VERSION"));

/// Amazon Photos API connector
///
/// # Example
///
/// ```ignore
/// use provider_amazon_photos::{AmazonPhotosConnector, Session};
///
/// let session = Session::from_storage_state_file(path, "www.amazon.com", now).await?;
/// let connector = AmazonPhotosConnector::new(session)?;
/// let page = connector.list_page(&PageRequest::first(200)).await?;
/// ```
pub struct AmazonPhotosConnector {
    client: Client,
    base_url: String,
    session: Session,
}

impl AmazonPhotosConnector {
    /// Create a connector against [`DEFAULT_BASE_URL`]
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(session: Session) -> crate::Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            session,
        })
    }

    /// Point the connector at another host, e.g. a regional endpoint.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Build the listing URL for a page request.
    pub fn list_url(&self, request: &PageRequest) -> String {
        let mut filters = "kind:FILE".to_string();
        if let Some(since) = request.modified_since.and_then(format_timestamp) {
            filters.push_str(&format!(" AND modifiedDate:[{} TO *]", since));
        }

        let mut url = format!(
            "{}/drive/v1/nodes?filters={}&limit={}",
            self.base_url,
            urlencoding::encode(&filters),
            request.page_size.clamp(1, MAX_PAGE_SIZE)
        );

        if let Some(token) = &request.cursor {
            url.push_str(&format!("&startToken={}", urlencoding::encode(token)));
        }

        url
    }

    pub fn content_url(&self, node_id: &str) -> String {
        format!(
            "{}/drive/v1/nodes/{}/contentRedirection?querySuffix=%3Fdownload%3Dtrue",
            self.base_url,
            urlencoding::encode(node_id)
        )
    }

    /// Convert a node to a descriptor; folders and nodes without content
    /// properties or a size are skipped.
    pub fn convert_node(node: Node) -> Option<RemoteItemDescriptor> {
        if node.kind.as_deref().is_some_and(|kind| kind != "FILE") {
            return None;
        }
        let properties = node.content_properties?;
        let Some(byte_size) = properties.size else {
            warn!(node_id = %node.id, "Skipping node without a content size");
            return None;
        };

        let modified_at = node
            .modified_date
            .as_deref()
            .or(node.created_date.as_deref())
            .and_then(parse_timestamp)
            .unwrap_or(0);
        let display_name = node.name.unwrap_or_else(|| node.id.clone());

        let mut descriptor =
            RemoteItemDescriptor::new(node.id, display_name, modified_at, byte_size);
        if let Some(content_type) = properties.content_type {
            descriptor = descriptor.with_content_type(content_type);
        }
        if let Some(md5) = properties.md5.filter(|md5| !md5.is_empty()) {
            descriptor = descriptor.with_declared_md5(md5);
        }
        Some(descriptor)
    }

    async fn get(&self, url: &str, node_id: Option<&str>) -> Result<Response> {
        let response = self
            .client
            .get(url)
            .header(COOKIE, self.session.cookie_header())
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| BridgeError::from(AmazonPhotosError::from(e)))?;

        let status = response.status();
        if status.is_success() {
            debug!(status = status.as_u16(), "API request succeeded");
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        warn!(status = status.as_u16(), "API request failed");
        Err(AmazonPhotosError::from_status(status.as_u16(), truncate(&body), node_id).into())
    }
}

#[async_trait]
impl RemoteLibrary for AmazonPhotosConnector {
    #[instrument(skip(self, request), fields(cursor = ?request.cursor))]
    async fn list_page(&self, request: &PageRequest) -> Result<Page> {
        let url = self.list_url(request);
        let response = self.get(&url, None).await?;

        let body: NodeListResponse = response
            .json()
            .await
            .map_err(|e| BridgeError::from(AmazonPhotosError::from(e)))?;

        let fetched = body.data.len();
        let items: Vec<_> = body
            .data
            .into_iter()
            .filter_map(Self::convert_node)
            .collect();

        debug!(
            fetched,
            files = items.len(),
            has_more = body.next_token.is_some(),
            "Listed nodes"
        );

        // An empty token means the listing is exhausted.
        let next_cursor = body.next_token.filter(|token| !token.is_empty());
        Ok(Page::new(items, next_cursor))
    }

    #[instrument(skip(self))]
    async fn fetch_bytes(&self, remote_id: &str) -> Result<ByteStream> {
        let url = self.content_url(remote_id);
        let response = self.get(&url, Some(remote_id)).await?;

        Ok(response
            .bytes_stream()
            .map_err(|e| BridgeError::from(AmazonPhotosError::from(e)))
            .boxed())
    }
}

fn parse_timestamp(iso: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(iso)
        .ok()
        .map(|dt| dt.with_timezone(&Utc).timestamp())
}

fn format_timestamp(unix_seconds: i64) -> Option<String> {
    Utc.timestamp_opt(unix_seconds, 0)
        .single()
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
}

fn truncate(body: &str) -> String {
    const LIMIT: usize = 200;
    match body.char_indices().nth(LIMIT) {
        Some((index, _)) => format!("{}...", &body[..index]),
        None => body.to_string(),
    }
}
