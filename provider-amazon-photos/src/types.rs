//! Amazon Photos API response types

use serde::Deserialize;

/// One page of `GET /drive/v1/nodes`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeListResponse {
    #[serde(default)]
    pub data: Vec<Node>,

    /// Token for the next page
    #[serde(default)]
    pub next_token: Option<String>,

    #[serde(default)]
    pub count: Option<u64>,
}

/// A drive node (file or folder)
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: String,

    #[serde(default)]
    pub name: Option<String>,

    /// `FILE` or `FOLDER`
    #[serde(default)]
    pub kind: Option<String>,

    /// ISO 8601
    #[serde(default)]
    pub modified_date: Option<String>,

    #[serde(default)]
    pub created_date: Option<String>,

    #[serde(default)]
    pub content_properties: Option<ContentProperties>,
}

/// Content metadata present on file nodes
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentProperties {
    #[serde(default)]
    pub size: Option<u64>,

    #[serde(default)]
    pub content_type: Option<String>,

    #[serde(default)]
    pub md5: Option<String>,

    /// Capture date, when the media carries one
    #[serde(default)]
    pub content_date: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_node_list() {
        let json = r#"{
            "count": 2,
            "nextToken": "tok-2",
            "data": [
                {
                    "id": "n1",
                    "name": "IMG_0001.HEIC",
                    "kind": "FILE",
                    "modifiedDate": "2024-03-01T10:00:00.000Z",
                    "contentProperties": {"size": 2048, "contentType": "image/heic", "md5": "abc"}
                },
                {"id": "f1", "name": "Pictures", "kind": "FOLDER"}
            ]
        }"#;

        let page: NodeListResponse = serde_json::from_str(json).unwrap();
        assert_eq!(page.next_token.as_deref(), Some("tok-2"));
        assert_eq!(page.data.len(), 2);

        let props = page.data[0].content_properties.as_ref().unwrap();
        assert_eq!(props.size, Some(2048));
        assert_eq!(props.content_type.as_deref(), Some("image/heic"));
        assert!(page.data[1].content_properties.is_none());
    }

    #[test]
    fn test_last_page_has_no_token() {
        let page: NodeListResponse = serde_json::from_str(r#"{"data": []}"#).unwrap();
        assert!(page.next_token.is_none());
        assert!(page.data.is_empty());
    }
}
