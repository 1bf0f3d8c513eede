//! Storage types and response structures

use http::HeaderMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Prefix of user-defined metadata headers
pub const USER_METADATA_PREFIX: &str = "x-amz-meta-";

/// Bucket entry from ListBuckets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    pub name: String,
    pub creation_date: Option<String>,
}

/// Account owning a bucket or object
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    pub id: String,
    pub display_name: Option<String>,
}

/// Object entry from ListObjects
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
    pub last_modified: Option<String>,
    pub etag: Option<String>,
    /// STANDARD, STANDARD_IA, GLACIER, ...
    pub storage_class: Option<String>,
    pub owner: Option<Owner>,
}

impl ObjectSummary {
    pub fn new(key: String, size: u64) -> Self {
        Self {
            key,
            size,
            last_modified: None,
            etag: None,
            storage_class: None,
            owner: None,
        }
    }
}

/// One page of a marker-based object listing
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectListing {
    pub bucket: String,
    pub prefix: Option<String>,
    pub marker: Option<String>,
    pub delimiter: Option<String>,
    pub max_keys: Option<u32>,
    pub is_truncated: bool,
    /// Marker for the next page; when the service omits it and a delimiter
    /// was used, the last key or common prefix takes its place
    pub next_marker: Option<String>,
    pub contents: Vec<ObjectSummary>,
    /// Common prefixes (subdirectories when using delimiter)
    pub common_prefixes: Vec<String>,
}

impl ObjectListing {
    /// Marker to request the page following this one
    pub fn continuation_marker(&self) -> Option<String> {
        if !self.is_truncated {
            return None;
        }
        if self.next_marker.is_some() {
            return self.next_marker.clone();
        }
        let last_key = self.contents.last().map(|o| o.key.as_str());
        let last_prefix = self.common_prefixes.last().map(String::as_str);
        match (last_key, last_prefix) {
            (Some(k), Some(p)) => Some(k.max(p).to_string()),
            (Some(k), None) => Some(k.to_string()),
            (None, Some(p)) => Some(p.to_string()),
            (None, None) => None,
        }
    }
}

/// Filters for ListObjects
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListObjectsRequest {
    pub prefix: Option<String>,
    pub marker: Option<String>,
    pub delimiter: Option<String>,
    pub max_keys: Option<u32>,
}

/// Object metadata carried in response headers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    pub content_length: Option<u64>,
    pub content_type: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub content_md5: Option<String>,
    pub cache_control: Option<String>,
    pub content_disposition: Option<String>,
    pub content_encoding: Option<String>,
    /// `x-amz-meta-*` entries, keyed without the prefix
    pub user_metadata: BTreeMap<String, String>,
}

impl ObjectMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_user_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.user_metadata.insert(key.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn from_headers(headers: &HeaderMap) -> Self {
        let get = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let user_metadata = headers
            .iter()
            .filter_map(|(name, value)| {
                let key = name.as_str().strip_prefix(USER_METADATA_PREFIX)?;
                Some((key.to_string(), value.to_str().ok()?.to_string()))
            })
            .collect();
        Self {
            content_length: get("content-length").and_then(|v| v.parse().ok()),
            content_type: get("content-type"),
            etag: get("etag").map(|e| trim_etag(&e).to_string()),
            last_modified: get("last-modified"),
            content_md5: get("content-md5"),
            cache_control: get("cache-control"),
            content_disposition: get("content-disposition"),
            content_encoding: get("content-encoding"),
            user_metadata,
        }
    }

    /// Headers to send when storing an object with this metadata
    pub fn to_request_headers(&self) -> Vec<(String, String)> {
        let mut out = Vec::with_capacity(self.user_metadata.len() + 4);
        let mut push = |name: &str, value: &Option<String>| {
            if let Some(v) = value {
                out.push((name.to_string(), v.clone()));
            }
        };
        push("content-type", &self.content_type);
        push("cache-control", &self.cache_control);
        push("content-disposition", &self.content_disposition);
        push("content-encoding", &self.content_encoding);
        for (k, v) in &self.user_metadata {
            out.push((format!("{}{}", USER_METADATA_PREFIX, k), v.clone()));
        }
        out
    }
}

/// Strip the quotes the service wraps ETags in
pub fn trim_etag(etag: &str) -> &str {
    etag.trim().trim_matches('"')
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutObjectResult {
    pub etag: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyObjectResult {
    pub etag: String,
    pub last_modified: Option<String>,
}

/// Who a grant applies to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Grantee {
    CanonicalUser { id: String, display_name: Option<String> },
    Group { uri: String },
    Email { address: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub grantee: Grantee,
    /// READ, WRITE, READ_ACP, WRITE_ACP, FULL_CONTROL
    pub permission: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessControlList {
    pub owner: Option<Owner>,
    pub grants: Vec<Grant>,
}

/// Predefined ACLs applied through the `x-amz-acl` header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CannedAcl {
    Private,
    PublicRead,
    PublicReadWrite,
    AuthenticatedRead,
}

impl CannedAcl {
    pub fn as_str(&self) -> &'static str {
        match self {
            CannedAcl::Private => "private",
            CannedAcl::PublicRead => "public-read",
            CannedAcl::PublicReadWrite => "public-read-write",
            CannedAcl::AuthenticatedRead => "authenticated-read",
        }
    }
}

impl fmt::Display for CannedAcl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CannedAcl {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "private" => Ok(CannedAcl::Private),
            "public-read" => Ok(CannedAcl::PublicRead),
            "public-read-write" => Ok(CannedAcl::PublicReadWrite),
            "authenticated-read" => Ok(CannedAcl::AuthenticatedRead),
            other => Err(format!("unknown canned ACL: {}", other)),
        }
    }
}

// =============================================================================
// Multipart Upload Types
// =============================================================================

/// Response from InitiateMultipartUpload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitiateMultipartUploadResult {
    pub bucket: String,
    pub key: String,
    pub upload_id: String,
}

/// Part entry from ListParts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartSummary {
    pub part_number: u32,
    pub etag: String,
    pub size: u64,
    pub last_modified: Option<String>,
}

/// One page of ListParts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartPage {
    pub upload_id: String,
    pub part_number_marker: Option<u32>,
    pub next_part_number_marker: Option<u32>,
    pub max_parts: Option<u32>,
    pub is_truncated: bool,
    pub parts: Vec<PartSummary>,
}

/// Part information for CompleteMultipartUpload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedPart {
    /// Part number (1-10000)
    pub part_number: u32,
    /// ETag returned from UploadPart
    pub etag: String,
}

impl CompletedPart {
    pub fn new(part_number: u32, etag: String) -> Self {
        Self { part_number, etag }
    }
}

/// Response body of CompleteMultipartUpload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteMultipartUploadResult {
    pub location: Option<String>,
    pub bucket: String,
    pub key: String,
    pub etag: String,
}

/// Final object produced by a multipart upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedUpload {
    pub bucket: String,
    pub key: String,
    pub upload_id: String,
    pub etag: String,
    pub location: Option<String>,
    /// Sum of all recorded part sizes
    pub size: u64,
    pub parts: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn test_metadata_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("content-length", HeaderValue::from_static("12"));
        headers.insert("content-type", HeaderValue::from_static("text/plain"));
        headers.insert("etag", HeaderValue::from_static("\"d41d8cd9\""));
        headers.insert("x-amz-meta-owner", HeaderValue::from_static("ops"));
        let meta = ObjectMetadata::from_headers(&headers);
        assert_eq!(meta.content_length, Some(12));
        assert_eq!(meta.etag.as_deref(), Some("d41d8cd9"));
        assert_eq!(meta.user_metadata.get("owner").map(String::as_str), Some("ops"));
    }

    #[test]
    fn test_metadata_to_request_headers() {
        let meta = ObjectMetadata::new()
            .with_content_type("image/png")
            .with_user_metadata("Source", "camera");
        let headers = meta.to_request_headers();
        assert!(headers.contains(&("content-type".into(), "image/png".into())));
        assert!(headers.contains(&("x-amz-meta-source".into(), "camera".into())));
    }

    #[test]
    fn test_continuation_marker() {
        let mut listing = ObjectListing {
            is_truncated: true,
            contents: vec![ObjectSummary::new("a".into(), 1), ObjectSummary::new("c".into(), 1)],
            common_prefixes: vec!["b/".into()],
            ..Default::default()
        };
        assert_eq!(listing.continuation_marker().as_deref(), Some("c"));
        listing.next_marker = Some("z".into());
        assert_eq!(listing.continuation_marker().as_deref(), Some("z"));
        listing.is_truncated = false;
        assert_eq!(listing.continuation_marker(), None);
    }

    #[test]
    fn test_canned_acl_round_trip() {
        for acl in [CannedAcl::Private, CannedAcl::PublicRead, CannedAcl::PublicReadWrite, CannedAcl::AuthenticatedRead] {
            assert_eq!(acl.as_str().parse::<CannedAcl>(), Ok(acl));
        }
        assert!("world-writable".parse::<CannedAcl>().is_err());
    }
}
