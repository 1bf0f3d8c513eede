//! Outgoing request model
//!
//! A [`Request`] describes one logical operation. The engine mutates its
//! headers and parameters while signing, and restores them from a snapshot
//! at the start of every attempt.

use crate::http::body::Payload;
use http::Method;
use serde::Serialize;
use std::collections::BTreeMap;

/// Hex lookup table for URI encoding
static HEX_UPPER: &[u8; 16] = b"0123456789ABCDEF";

/// Case-insensitive header map
///
/// Keys are stored lowercase, which is also the canonical form the signer
/// needs, so iteration yields headers already sorted for signing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(BTreeMap<String, String>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl AsRef<str>, value: impl Into<String>) -> Option<String> {
        self.0.insert(name.as_ref().to_ascii_lowercase(), value.into())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        if name.bytes().any(|b| b.is_ascii_uppercase()) {
            self.0.get(&name.to_ascii_lowercase()).map(String::as_str)
        } else {
            self.0.get(name).map(String::as_str)
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.0.remove(&name.to_ascii_lowercase())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (k, v) in iter {
            headers.insert(k, v);
        }
        headers
    }
}

/// The logical storage operation a request belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Operation {
    ListBuckets,
    CreateBucket,
    DeleteBucket,
    HeadBucket,
    ListObjects,
    PutObject,
    GetObject,
    HeadObject,
    CopyObject,
    DeleteObject,
    GetBucketAcl,
    SetBucketAcl,
    GetObjectAcl,
    SetObjectAcl,
    InitiateMultipartUpload,
    UploadPart,
    ListParts,
    CompleteMultipartUpload,
    AbortMultipartUpload,
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::ListBuckets => "ListBuckets",
            Operation::CreateBucket => "CreateBucket",
            Operation::DeleteBucket => "DeleteBucket",
            Operation::HeadBucket => "HeadBucket",
            Operation::ListObjects => "ListObjects",
            Operation::PutObject => "PutObject",
            Operation::GetObject => "GetObject",
            Operation::HeadObject => "HeadObject",
            Operation::CopyObject => "CopyObject",
            Operation::DeleteObject => "DeleteObject",
            Operation::GetBucketAcl => "GetBucketAcl",
            Operation::SetBucketAcl => "SetBucketAcl",
            Operation::GetObjectAcl => "GetObjectAcl",
            Operation::SetObjectAcl => "SetObjectAcl",
            Operation::InitiateMultipartUpload => "InitiateMultipartUpload",
            Operation::UploadPart => "UploadPart",
            Operation::ListParts => "ListParts",
            Operation::CompleteMultipartUpload => "CompleteMultipartUpload",
            Operation::AbortMultipartUpload => "AbortMultipartUpload",
        }
    }

    /// Whether repeating the operation after an ambiguous transport failure
    /// is safe
    ///
    /// Initiate is safe: a failed initiate never mints an upload id the caller
    /// knows about. Complete is not: the first attempt may have assembled the
    /// object and consumed the upload id.
    pub fn is_idempotent(&self) -> bool {
        !matches!(self, Operation::CompleteMultipartUpload)
    }
}

/// A request for one logical operation
#[derive(Debug)]
pub struct Request {
    pub method: Method,
    /// `scheme://host[:port]`, no trailing slash
    pub endpoint: String,
    /// Already URI-encoded path, always starting with `/`
    pub path: String,
    pub headers: Headers,
    pub params: BTreeMap<String, String>,
    pub payload: Option<Payload>,
    pub operation: Operation,
    redirect: Option<String>,
}

impl Request {
    pub fn new(operation: Operation, method: Method, endpoint: impl Into<String>, path: impl Into<String>) -> Self {
        let mut endpoint = endpoint.into();
        while endpoint.ends_with('/') {
            endpoint.pop();
        }
        let mut path = path.into();
        if !path.starts_with('/') {
            path.insert(0, '/');
        }
        Self {
            method,
            endpoint,
            path,
            headers: Headers::new(),
            params: BTreeMap::new(),
            payload: None,
            operation,
            redirect: None,
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Add a query parameter; an empty value renders as `name=`
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Full URL the next attempt targets
    ///
    /// Once a redirect was followed, the redirect location is used verbatim.
    pub fn url(&self) -> String {
        if let Some(location) = &self.redirect {
            return location.clone();
        }
        let mut url = String::with_capacity(self.endpoint.len() + self.path.len() + 64);
        url.push_str(&self.endpoint);
        url.push_str(&self.path);
        if !self.params.is_empty() {
            url.push('?');
            let mut first = true;
            // BTreeMap iteration keeps parameters sorted for the signer
            for (k, v) in &self.params {
                if !first {
                    url.push('&');
                }
                first = false;
                url_encode_into(&mut url, k);
                url.push('=');
                url_encode_into(&mut url, v);
            }
        }
        url
    }

    /// Point every following attempt at `location`
    ///
    /// Relative locations are resolved against the current endpoint.
    pub fn redirect_to(&mut self, location: &str) {
        let target = if location.starts_with("http://") || location.starts_with("https://") {
            location.to_string()
        } else {
            let mut target = String::with_capacity(self.endpoint.len() + location.len() + 1);
            target.push_str(&self.endpoint);
            if !location.starts_with('/') {
                target.push('/');
            }
            target.push_str(location);
            target
        };
        self.redirect = Some(target);
    }

    pub fn redirected(&self) -> bool {
        self.redirect.is_some()
    }

    /// Replace headers and parameters with a previously taken snapshot
    pub fn restore(&mut self, headers: &Headers, params: &BTreeMap<String, String>) {
        self.headers.clone_from(headers);
        self.params.clone_from(params);
    }

    pub fn is_replayable(&self) -> bool {
        self.payload.as_ref().map_or(true, Payload::is_replayable)
    }

    /// Declared body length, if known
    pub fn content_length(&self) -> Option<u64> {
        match &self.payload {
            None => Some(0),
            Some(p) => p.len(),
        }
    }
}

impl std::fmt::Display for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.operation.name(), self.method, self.url())
    }
}

/// Encode a string for use in a URL query component (RFC 3986)
pub fn url_encode_into(buf: &mut String, s: &str) {
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                buf.push(byte as char);
            }
            _ => {
                buf.push('%');
                buf.push(HEX_UPPER[(byte >> 4) as usize] as char);
                buf.push(HEX_UPPER[(byte & 0xf) as usize] as char);
            }
        }
    }
}

/// Encode an object key for use in a path, preserving `/`
pub fn encode_key(key: &str) -> String {
    let mut result = String::with_capacity(key.len() + 16);
    for segment in key.split('/').enumerate() {
        if segment.0 > 0 {
            result.push('/');
        }
        url_encode_into(&mut result, segment.1);
    }
    result
}

/// Build a `/bucket[/key]` path
pub fn object_path(bucket: &str, key: Option<&str>) -> String {
    let mut path = String::with_capacity(bucket.len() + key.map_or(0, str::len) + 2);
    path.push('/');
    url_encode_into(&mut path, bucket);
    if let Some(key) = key {
        path.push('/');
        path.push_str(&encode_key(key));
    }
    path
}
