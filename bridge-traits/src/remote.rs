//! Remote Library Abstraction
//!
//! The listing/fetch capability the sync engine consumes. Implementations own
//! whatever session mechanics the remote service needs (cookies, tokens,
//! browser state); the engine only sees pages of descriptors and byte streams.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};

/// Stream of content chunks returned by [`RemoteLibrary::fetch_bytes`].
pub type ByteStream = BoxStream<'static, std::result::Result<Bytes, BridgeError>>;

/// Metadata describing one item in the remote library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteItemDescriptor {
    /// Stable identifier assigned by the remote system
    pub remote_id: String,
    /// File name shown by the remote service
    pub display_name: String,
    /// Last modification time (Unix seconds)
    pub modified_at: i64,
    /// Size declared by the remote before download
    pub byte_size: u64,
    /// MIME type, when the remote reports one
    pub content_type: Option<String>,
    /// Lowercase hex MD5 the remote reports for the content, if any
    pub declared_md5: Option<String>,
}

impl RemoteItemDescriptor {
    pub fn new(
        remote_id: impl Into<String>,
        display_name: impl Into<String>,
        modified_at: i64,
        byte_size: u64,
    ) -> Self {
        Self {
            remote_id: remote_id.into(),
            display_name: display_name.into(),
            modified_at,
            byte_size,
            content_type: None,
            declared_md5: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_declared_md5(mut self, md5: impl Into<String>) -> Self {
        self.declared_md5 = Some(md5.into().to_ascii_lowercase());
        self
    }
}

/// Parameters for a single listing call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageRequest {
    /// Opaque continuation token from the previous page, `None` for the first page
    pub cursor: Option<String>,
    /// Only items modified at or after this Unix timestamp are wanted.
    ///
    /// This is a hint: implementations that cannot filter server-side may
    /// return older items and the caller filters them out.
    pub modified_since: Option<i64>,
    /// Preferred number of items per page
    pub page_size: u32,
}

impl PageRequest {
    pub fn first(page_size: u32) -> Self {
        Self {
            cursor: None,
            modified_since: None,
            page_size,
        }
    }

    pub fn modified_since(mut self, since: Option<i64>) -> Self {
        self.modified_since = since;
        self
    }

    /// Request for the page that follows `cursor`, keeping the other parameters.
    pub fn next(&self, cursor: String) -> Self {
        Self {
            cursor: Some(cursor),
            ..self.clone()
        }
    }
}

/// One page of listing results.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Page {
    pub items: Vec<RemoteItemDescriptor>,
    /// `None` once the listing is exhausted
    pub next_cursor: Option<String>,
}

impl Page {
    pub fn new(items: Vec<RemoteItemDescriptor>, next_cursor: Option<String>) -> Self {
        Self { items, next_cursor }
    }

    pub fn is_last(&self) -> bool {
        self.next_cursor.is_none()
    }
}

/// Remote media library collaborator.
///
/// Only one listing interaction is expected to be live at a time; fetches may
/// run concurrently.
///
/// # Errors
///
/// Implementations report failures with:
/// - [`BridgeError::NotFound`] when the item no longer exists remotely
/// - [`BridgeError::Transient`] for timeouts, throttling and server errors
/// - [`BridgeError::AuthExpired`] when the session must be renewed by the operator
#[async_trait]
pub trait RemoteLibrary: Send + Sync {
    /// Fetch one page of item descriptors.
    async fn list_page(&self, request: &PageRequest) -> Result<Page>;

    /// Open a byte stream for the content of `remote_id`.
    async fn fetch_bytes(&self, remote_id: &str) -> Result<ByteStream>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_page_request_keeps_filter() {
        let first = PageRequest::first(50).modified_since(Some(1_700_000_000));
        let next = first.next("token-2".to_string());

        assert_eq!(next.cursor.as_deref(), Some("token-2"));
        assert_eq!(next.modified_since, Some(1_700_000_000));
        assert_eq!(next.page_size, 50);
    }

    #[test]
    fn test_descriptor_builder() {
        let item = RemoteItemDescriptor::new("id-1", "IMG_0001.JPG", 10, 2048)
            .with_content_type("image/jpeg")
            .with_declared_md5("9E107D9D372BB6826BD81D3542A419D6");
        assert_eq!(item.content_type.as_deref(), Some("image/jpeg"));
        assert_eq!(
            item.declared_md5.as_deref(),
            Some("9e107d9d372bb6826bd81d3542a419d6")
        );
        assert!(Page::new(vec![item], None).is_last());
    }
}
