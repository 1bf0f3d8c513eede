//! AWS Signature Version 4
//!
//! - Daily signing key cache (avoids 4 HMAC operations per request)
//! - Constant empty payload hash, UNSIGNED-PAYLOAD for request bodies
//! - Timestamps shifted by the client's clock offset
//! - Query-string presigning for shareable URLs

use crate::auth::{Credentials, Signer};
use crate::http::error::ClientError;
use crate::http::request::{url_encode_into, Request};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

type HmacSha256 = Hmac<Sha256>;

/// Hex lookup table for percent encoding
static HEX_UPPER: &[u8; 16] = b"0123456789ABCDEF";

/// SHA256 of the empty payload
const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// Longest validity SigV4 allows for a presigned URL (7 days)
pub const MAX_PRESIGN_EXPIRY_SECS: u64 = 7 * 24 * 60 * 60;

/// Cached signing key: (date stamp, access key, derived key)
type CachedKey = (String, String, [u8; 32]);

/// AWS Signature Version 4 signer
pub struct SigV4Signer {
    region: String,
    service: String,
    cached_signing_key: Mutex<Option<CachedKey>>,
}

impl std::fmt::Debug for SigV4Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigV4Signer")
            .field("region", &self.region)
            .field("service", &self.service)
            .finish()
    }
}

impl Clone for SigV4Signer {
    fn clone(&self) -> Self {
        // Each clone gets its own cache (populated on first use)
        Self::with_service(self.region.clone(), self.service.clone())
    }
}

impl SigV4Signer {
    pub fn new(region: Option<String>) -> Self {
        Self::with_service(region.unwrap_or_else(|| "us-east-1".to_string()), "s3".to_string())
    }

    pub fn with_service(region: String, service: String) -> Self {
        Self {
            region,
            service,
            cached_signing_key: Mutex::new(None),
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Sign `request` as of `now`
    pub fn sign_at(&self, request: &mut Request, credentials: &Credentials, now: DateTime<Utc>) -> Result<(), ClientError> {
        let url = request.url();
        let (host, path, query) = parse_url(&url)?;

        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date_stamp = now.format("%Y%m%d").to_string();

        let payload_hash = match &request.payload {
            Some(p) if !p.is_empty() => UNSIGNED_PAYLOAD,
            _ => EMPTY_SHA256,
        };

        request.headers.insert("host", host);
        request.headers.insert("x-amz-date", amz_date.as_str());
        request.headers.insert("x-amz-content-sha256", payload_hash);

        let canonical_query = canonical_query_string(query);
        let mut canonical_headers = String::with_capacity(request.headers.len() * 64);
        let mut signed_headers = String::with_capacity(request.headers.len() * 20);
        for (k, v) in request.headers.iter() {
            canonical_headers.push_str(k);
            canonical_headers.push(':');
            canonical_headers.push_str(v.trim());
            canonical_headers.push('\n');
            if !signed_headers.is_empty() {
                signed_headers.push(';');
            }
            signed_headers.push_str(k);
        }

        // path is used as-is because the request already URI-encoded it
        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            request.method, path, canonical_query, canonical_headers, signed_headers, payload_hash
        );
        tracing::trace!(canonical_request = %canonical_request, "SigV4 canonical request");

        let credential_scope = self.credential_scope(&date_stamp);
        let signature = self.signature(credentials, &date_stamp, &amz_date, &credential_scope, &canonical_request);

        let authorization = format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            ALGORITHM, credentials.access_key, credential_scope, signed_headers, signature
        );
        request.headers.insert("authorization", authorization);
        Ok(())
    }

    /// Build a presigned URL for `request` valid for `expires_secs`
    ///
    /// Only `host` is signed, so the URL works from any HTTP client.
    pub fn presign(
        &self,
        request: &Request,
        credentials: &Credentials,
        clock_offset: i64,
        expires_secs: u64,
    ) -> Result<String, ClientError> {
        let now = Utc::now() - ChronoDuration::seconds(clock_offset);
        self.presign_at(request, credentials, now, expires_secs)
    }

    pub fn presign_at(
        &self,
        request: &Request,
        credentials: &Credentials,
        now: DateTime<Utc>,
        expires_secs: u64,
    ) -> Result<String, ClientError> {
        if expires_secs == 0 || expires_secs > MAX_PRESIGN_EXPIRY_SECS {
            return Err(ClientError::invalid_request(format!(
                "presigned URL expiry must be between 1 and {} seconds, got {}",
                MAX_PRESIGN_EXPIRY_SECS, expires_secs
            )));
        }

        let base = format!("{}{}", request.endpoint, request.path);
        let (host, path, _) = parse_url(&base)?;

        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date_stamp = now.format("%Y%m%d").to_string();
        let credential_scope = self.credential_scope(&date_stamp);

        let mut params: BTreeMap<String, String> = request.params.clone();
        params.insert("X-Amz-Algorithm".into(), ALGORITHM.into());
        params.insert(
            "X-Amz-Credential".into(),
            format!("{}/{}", credentials.access_key, credential_scope),
        );
        params.insert("X-Amz-Date".into(), amz_date.clone());
        params.insert("X-Amz-Expires".into(), expires_secs.to_string());
        params.insert("X-Amz-SignedHeaders".into(), "host".into());

        let mut query = String::with_capacity(256);
        for (k, v) in &params {
            if !query.is_empty() {
                query.push('&');
            }
            url_encode_into(&mut query, k);
            query.push('=');
            url_encode_into(&mut query, v);
        }

        let canonical_request = format!(
            "{}\n{}\n{}\nhost:{}\n\nhost\n{}",
            request.method, path, query, host, UNSIGNED_PAYLOAD
        );
        let signature = self.signature(credentials, &date_stamp, &amz_date, &credential_scope, &canonical_request);

        Ok(format!("{}?{}&X-Amz-Signature={}", base, query, signature))
    }

    fn credential_scope(&self, date_stamp: &str) -> String {
        format!("{}/{}/{}/aws4_request", date_stamp, self.region, self.service)
    }

    fn signature(
        &self,
        credentials: &Credentials,
        date_stamp: &str,
        amz_date: &str,
        credential_scope: &str,
        canonical_request: &str,
    ) -> String {
        let canonical_request_hash = hex::encode(Sha256::digest(canonical_request.as_bytes()));
        let string_to_sign = format!(
            "{}\n{}\n{}\n{}",
            ALGORITHM, amz_date, credential_scope, canonical_request_hash
        );
        let signing_key = self.signing_key(credentials, date_stamp);
        hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()))
    }

    /// Signing key for the day, cached until the date or access key changes
    fn signing_key(&self, credentials: &Credentials, date_stamp: &str) -> [u8; 32] {
        let mut cache = self
            .cached_signing_key
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some((cached_date, cached_access_key, key)) = cache.as_ref() {
            if cached_date == date_stamp && *cached_access_key == credentials.access_key {
                return *key;
            }
        }
        let key = self.derive_signing_key(&credentials.secret_key, date_stamp);
        *cache = Some((date_stamp.to_string(), credentials.access_key.clone(), key));
        key
    }

    /// 4 chained HMAC operations
    fn derive_signing_key(&self, secret_key: &str, date_stamp: &str) -> [u8; 32] {
        let aws4_key = format!("AWS4{}", secret_key);
        let k_date = hmac_sha256(aws4_key.as_bytes(), date_stamp.as_bytes());
        let k_region = hmac_sha256(&k_date, self.region.as_bytes());
        let k_service = hmac_sha256(&k_region, self.service.as_bytes());
        hmac_sha256(&k_service, b"aws4_request")
    }
}

impl Signer for SigV4Signer {
    fn sign(&self, request: &mut Request, credentials: &Credentials, clock_offset: i64) -> Result<(), ClientError> {
        let now = Utc::now() - ChronoDuration::seconds(clock_offset);
        self.sign_at(request, credentials, now)
    }
}

fn hmac_sha256(key: &[u8], msg: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(msg);
    let result = mac.finalize().into_bytes();
    let mut output = [0u8; 32];
    output.copy_from_slice(&result);
    output
}

/// Split a URL into (host, path, query) without allocating
///
/// Default ports (:443 for https, :80 for http) are stripped from the host.
fn parse_url(url: &str) -> Result<(&str, &str, &str), ClientError> {
    let (https, after_scheme) = if let Some(rest) = url.strip_prefix("https://") {
        (true, rest)
    } else if let Some(rest) = url.strip_prefix("http://") {
        (false, rest)
    } else {
        return Err(ClientError::invalid_request(format!("URL without http(s) scheme: {}", url)));
    };

    let (authority, path_and_query) = match after_scheme.find('/') {
        Some(pos) => (&after_scheme[..pos], &after_scheme[pos..]),
        None => (after_scheme, "/"),
    };
    if authority.is_empty() {
        return Err(ClientError::invalid_request(format!("URL without host: {}", url)));
    }

    let (path, query) = match path_and_query.find('?') {
        Some(pos) => (&path_and_query[..pos], &path_and_query[pos + 1..]),
        None => (path_and_query, ""),
    };

    let host = if https {
        authority.strip_suffix(":443").unwrap_or(authority)
    } else {
        authority.strip_suffix(":80").unwrap_or(authority)
    };

    Ok((host, path, query))
}

/// Canonical query string (sorted by parameter name)
///
/// Fast path: every byte already canonical, parameters sorted, all with `=`.
/// Otherwise decode, re-encode and sort (redirect locations, `?uploads`).
fn canonical_query_string(query: &str) -> String {
    if query.is_empty() {
        return String::new();
    }

    let all_canonical = query.bytes().all(|b| {
        matches!(b,
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9'
            | b'-' | b'_' | b'.' | b'~'
            | b'=' | b'&' | b'%'
        )
    });

    if all_canonical {
        let mut sorted = true;
        let mut all_have_equals = true;
        let mut last_key: &str = "";
        for pair in query.split('&') {
            let key = match pair.find('=') {
                Some(pos) => &pair[..pos],
                None => {
                    all_have_equals = false;
                    pair
                }
            };
            if key < last_key {
                sorted = false;
                break;
            }
            last_key = key;
        }
        if sorted && all_have_equals {
            return query.to_string();
        }
    }

    let mut params: Vec<(String, String)> = query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let key = urlencoding::decode(key).unwrap_or_else(|_| key.into());
            let value = urlencoding::decode(value).unwrap_or_else(|_| value.into());
            (uri_encode(&key), uri_encode(&value))
        })
        .collect();

    params.sort_unstable();

    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// RFC 3986 encoding, slashes included
fn uri_encode(s: &str) -> String {
    let mut result = String::with_capacity(s.len() + 16);
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push('%');
                result.push(HEX_UPPER[(byte >> 4) as usize] as char);
                result.push(HEX_UPPER[(byte & 0xf) as usize] as char);
            }
        }
    }
    result
}
