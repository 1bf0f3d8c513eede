//! Storage client
//!
//! Every operation builds a [`Request`] and runs it through the shared
//! [`HttpExecutor`], so each one inherits retry, redirect and clock-skew
//! handling. Clone is cheap: the transport, signer and clock are shared.

use crate::auth::{Credentials, SigV4Signer, Signer};
use crate::http::body::{FileSegment, Payload, ReplayableSource};
use crate::http::clock::ClockOffset;
use crate::http::engine::{ExecutionContext, HttpExecutor};
use crate::http::error::{ClientError, Error, Result};
use crate::http::handler::{BufferedBody, DiscardBody, FromHeaders, ResponseHandler, StreamingBody, Unmarshal};
use crate::http::request::{encode_key, object_path, Operation, Request};
use crate::http::response::HttpResponse;
use crate::s3::handlers::S3ErrorResponseHandler;
use crate::s3::types::{
    trim_etag, AccessControlList, Bucket, CannedAcl, CopyObjectResult, ListObjectsRequest, ObjectListing,
    ObjectMetadata, ObjectSummary, PutObjectResult,
};
use crate::s3::xml;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use futures::StreamExt;
use http::Method;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const DEFAULT_REGION: &str = "us-east-1";

/// Client for an S3-compatible storage service
#[derive(Clone)]
pub struct ScsClient {
    executor: HttpExecutor,
    context: ExecutionContext,
    /// Kept concrete for presigning; the context holds the same signer
    signer: Option<Arc<SigV4Signer>>,
    /// `scheme://host[:port]`
    endpoint: String,
    virtual_host_style: bool,
}

impl std::fmt::Debug for ScsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScsClient")
            .field("endpoint", &self.endpoint)
            .field("virtual_host_style", &self.virtual_host_style)
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

impl ScsClient {
    /// Signed client with its own clock offset
    pub fn new(
        executor: HttpExecutor,
        endpoint: impl Into<String>,
        signer: SigV4Signer,
        credentials: Credentials,
    ) -> Self {
        let signer = Arc::new(signer);
        let context = ExecutionContext::new(signer.clone() as Arc<dyn Signer>, credentials, ClockOffset::new());
        Self {
            executor,
            context,
            signer: Some(signer),
            endpoint: trim_endpoint(endpoint.into()),
            virtual_host_style: false,
        }
    }

    /// Client that sends unsigned requests
    pub fn anonymous(executor: HttpExecutor, endpoint: impl Into<String>) -> Self {
        Self {
            executor,
            context: ExecutionContext::default(),
            signer: None,
            endpoint: trim_endpoint(endpoint.into()),
            virtual_host_style: false,
        }
    }

    /// Share a clock offset with other clients
    pub fn with_clock(mut self, clock: ClockOffset) -> Self {
        self.context.clock = clock;
        self
    }

    /// Address buckets as `bucket.host` instead of `host/bucket`
    pub fn with_virtual_host_style(mut self, enabled: bool) -> Self {
        self.virtual_host_style = enabled;
        self
    }

    /// Same client, cancelled through `token`
    pub fn with_cancel(&self, token: CancellationToken) -> Self {
        let mut client = self.clone();
        client.context = self.context.with_cancel(token);
        client
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn clock(&self) -> &ClockOffset {
        &self.context.clock
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    pub fn executor(&self) -> &HttpExecutor {
        &self.executor
    }

    fn region(&self) -> &str {
        self.signer.as_ref().map_or(DEFAULT_REGION, |s| s.region())
    }

    /// Build a request addressed to `bucket` and optionally `key`
    ///
    /// An empty bucket addresses the service root.
    pub fn request(&self, operation: Operation, method: Method, bucket: &str, key: Option<&str>) -> Request {
        if bucket.is_empty() {
            return Request::new(operation, method, self.endpoint.as_str(), "/");
        }
        if self.virtual_host_style && is_dns_compatible(bucket) {
            if let Some((scheme, host)) = self.endpoint.split_once("://") {
                let endpoint = format!("{}://{}.{}", scheme, bucket, host);
                let path = key.map_or_else(|| "/".to_string(), |k| format!("/{}", encode_key(k)));
                return Request::new(operation, method, endpoint, path);
            }
        }
        Request::new(operation, method, self.endpoint.as_str(), object_path(bucket, key))
    }

    /// Run a request through the engine with the storage error handler
    pub async fn execute<T, H>(&self, request: &mut Request, handler: &H) -> Result<T>
    where
        H: ResponseHandler<T> + ?Sized,
        T: Send,
    {
        self.executor
            .execute(request, handler, &S3ErrorResponseHandler, &self.context)
            .await
    }

    // =========================================================================
    // Buckets
    // =========================================================================

    /// Create a bucket, sending a location constraint outside the default region
    pub async fn create_bucket(&self, bucket: &str, acl: Option<CannedAcl>) -> Result<()> {
        let mut request = self.request(Operation::CreateBucket, Method::PUT, bucket, None);
        if let Some(acl) = acl {
            request.headers.insert("x-amz-acl", acl.as_str());
        }
        let region = self.region();
        if region != DEFAULT_REGION {
            let mut body = String::with_capacity(128);
            body.push_str("<CreateBucketConfiguration><LocationConstraint>");
            xml::xml_escape_into(&mut body, region);
            body.push_str("</LocationConstraint></CreateBucketConfiguration>");
            request.headers.insert("content-type", "application/xml");
            request.payload = Some(Payload::bytes(body));
        }
        self.execute(&mut request, &DiscardBody).await
    }

    pub async fn delete_bucket(&self, bucket: &str) -> Result<()> {
        let mut request = self.request(Operation::DeleteBucket, Method::DELETE, bucket, None);
        self.execute(&mut request, &DiscardBody).await
    }

    /// HEAD the bucket; 404 means it does not exist
    pub async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        let mut request = self.request(Operation::HeadBucket, Method::HEAD, bucket, None);
        match self.execute(&mut request, &DiscardBody).await {
            Ok(()) => Ok(true),
            Err(Error::Service(e)) if e.status_code == 404 => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn list_buckets(&self) -> Result<Vec<Bucket>> {
        let mut request = self.request(Operation::ListBuckets, Method::GET, "", None);
        let handler = Unmarshal::new(|body: &[u8]| xml::parse_list_buckets(body).map(|(_, buckets)| buckets));
        self.execute(&mut request, &handler).await
    }

    /// One page of a marker-based listing
    pub async fn list_objects(&self, bucket: &str, options: &ListObjectsRequest) -> Result<ObjectListing> {
        let mut request = self.request(Operation::ListObjects, Method::GET, bucket, None);
        if let Some(prefix) = &options.prefix {
            request.params.insert("prefix".into(), prefix.clone());
        }
        if let Some(marker) = &options.marker {
            request.params.insert("marker".into(), marker.clone());
        }
        if let Some(delimiter) = &options.delimiter {
            request.params.insert("delimiter".into(), delimiter.clone());
        }
        if let Some(max_keys) = options.max_keys {
            request.params.insert("max-keys".into(), max_keys.to_string());
        }
        let handler = Unmarshal::new(xml::parse_list_objects);
        let mut listing = self.execute(&mut request, &handler).await?;
        if listing.bucket.is_empty() {
            listing.bucket = bucket.to_string();
        }
        Ok(listing)
    }

    /// Follow markers until the listing is exhausted
    ///
    /// Returns every object and every common prefix seen.
    pub async fn list_all_objects(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        delimiter: Option<&str>,
    ) -> Result<(Vec<ObjectSummary>, Vec<String>)> {
        let mut options = ListObjectsRequest {
            prefix: prefix.map(str::to_string),
            delimiter: delimiter.map(str::to_string),
            ..Default::default()
        };
        let mut objects = Vec::new();
        let mut prefixes = Vec::new();
        loop {
            let page = self.list_objects(bucket, &options).await?;
            let next = page.continuation_marker();
            objects.extend(page.contents);
            prefixes.extend(page.common_prefixes);
            match next {
                Some(marker) => {
                    debug!(bucket, marker = %marker, "Fetching next listing page");
                    options.marker = Some(marker);
                }
                None => break,
            }
        }
        Ok((objects, prefixes))
    }

    // =========================================================================
    // Objects
    // =========================================================================

    /// Store an object in a single request
    ///
    /// In-memory payloads get a Content-MD5 header so the service can verify
    /// the upload.
    pub async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        payload: Payload,
        metadata: &ObjectMetadata,
    ) -> Result<PutObjectResult> {
        let mut request = self.request(Operation::PutObject, Method::PUT, bucket, Some(key));
        apply_metadata(&mut request, metadata);
        if let Some(md5) = &metadata.content_md5 {
            request.headers.insert("content-md5", md5.as_str());
        } else if let Payload::Replayable(ReplayableSource::Bytes(data)) = &payload {
            request.headers.insert("content-md5", content_md5(data));
        }
        if !request.headers.contains("content-type") {
            request.headers.insert("content-type", "application/octet-stream");
        }
        request.payload = Some(payload);
        self.execute(&mut request, &FromHeaders::new(put_result)).await
    }

    /// Store a whole file in a single request
    pub async fn put_file(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        metadata: &ObjectMetadata,
    ) -> Result<PutObjectResult> {
        let segment = FileSegment::whole(path)
            .await
            .map_err(|e| ClientError::io(format!("Unable to read {}", path.display()), e))?;
        self.put_object(bucket, key, Payload::file(segment), metadata).await
    }

    pub async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes> {
        let mut request = self.request(Operation::GetObject, Method::GET, bucket, Some(key));
        self.execute(&mut request, &BufferedBody).await
    }

    /// Stream an object into `path`, returning the number of bytes written
    pub async fn get_object_to_file(&self, bucket: &str, key: &str, path: &Path) -> Result<u64> {
        let mut request = self.request(Operation::GetObject, Method::GET, bucket, Some(key));
        let mut response = self.execute(&mut request, &StreamingBody).await?;

        let file = tokio::fs::File::create(path)
            .await
            .map_err(|e| ClientError::io(format!("Unable to create {}", path.display()), e))?;
        let mut writer = tokio::io::BufWriter::with_capacity(256 * 1024, file);
        let mut total_bytes = 0u64;

        while let Some(chunk) = response.body.next().await {
            let chunk = chunk.map_err(ClientError::transport)?;
            writer
                .write_all(&chunk)
                .await
                .map_err(|e| ClientError::io("Unable to write object data", e))?;
            total_bytes += chunk.len() as u64;
        }
        writer
            .flush()
            .await
            .map_err(|e| ClientError::io("Unable to write object data", e))?;

        debug!(bucket, key, bytes = total_bytes, "Downloaded object to file");
        Ok(total_bytes)
    }

    pub async fn get_object_metadata(&self, bucket: &str, key: &str) -> Result<ObjectMetadata> {
        let mut request = self.request(Operation::HeadObject, Method::HEAD, bucket, Some(key));
        self.execute(&mut request, &FromHeaders::new(metadata_result)).await
    }

    /// Replace an object's metadata by copying it onto itself
    pub async fn set_object_metadata(
        &self,
        bucket: &str,
        key: &str,
        metadata: &ObjectMetadata,
    ) -> Result<CopyObjectResult> {
        self.copy_object(bucket, key, bucket, key, Some(metadata)).await
    }

    /// Server-side copy; `metadata` replaces the source metadata when given
    pub async fn copy_object(
        &self,
        source_bucket: &str,
        source_key: &str,
        bucket: &str,
        key: &str,
        metadata: Option<&ObjectMetadata>,
    ) -> Result<CopyObjectResult> {
        let mut request = self.request(Operation::CopyObject, Method::PUT, bucket, Some(key));
        request
            .headers
            .insert("x-amz-copy-source", object_path(source_bucket, Some(source_key)));
        match metadata {
            Some(metadata) => {
                request.headers.insert("x-amz-metadata-directive", "REPLACE");
                apply_metadata(&mut request, metadata);
            }
            None => {
                request.headers.insert("x-amz-metadata-directive", "COPY");
            }
        }
        let handler = Unmarshal::new(xml::parse_copy_object);
        self.execute(&mut request, &handler).await
    }

    pub async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        let mut request = self.request(Operation::DeleteObject, Method::DELETE, bucket, Some(key));
        self.execute(&mut request, &DiscardBody).await
    }

    // =========================================================================
    // Access control
    // =========================================================================

    pub async fn get_bucket_acl(&self, bucket: &str) -> Result<AccessControlList> {
        self.get_acl(Operation::GetBucketAcl, bucket, None).await
    }

    pub async fn get_object_acl(&self, bucket: &str, key: &str) -> Result<AccessControlList> {
        self.get_acl(Operation::GetObjectAcl, bucket, Some(key)).await
    }

    pub async fn set_bucket_acl(&self, bucket: &str, acl: CannedAcl) -> Result<()> {
        self.set_acl(Operation::SetBucketAcl, bucket, None, acl).await
    }

    pub async fn set_object_acl(&self, bucket: &str, key: &str, acl: CannedAcl) -> Result<()> {
        self.set_acl(Operation::SetObjectAcl, bucket, Some(key), acl).await
    }

    async fn get_acl(&self, operation: Operation, bucket: &str, key: Option<&str>) -> Result<AccessControlList> {
        let mut request = self
            .request(operation, Method::GET, bucket, key)
            .with_param("acl", "");
        let handler = Unmarshal::new(xml::parse_access_control_policy);
        self.execute(&mut request, &handler).await
    }

    async fn set_acl(&self, operation: Operation, bucket: &str, key: Option<&str>, acl: CannedAcl) -> Result<()> {
        let mut request = self
            .request(operation, Method::PUT, bucket, key)
            .with_param("acl", "")
            .with_header("x-amz-acl", acl.as_str());
        self.execute(&mut request, &DiscardBody).await
    }

    // =========================================================================
    // Presigned URLs
    // =========================================================================

    /// Signed URL granting `method` on the object for `expires`
    ///
    /// Computed locally; nothing is sent.
    pub fn generate_presigned_url(&self, method: Method, bucket: &str, key: &str, expires: Duration) -> Result<String> {
        let (Some(signer), Some(credentials)) = (&self.signer, &self.context.credentials) else {
            return Err(ClientError::invalid_request("presigned URLs require credentials").into());
        };
        let operation = match method {
            Method::PUT => Operation::PutObject,
            Method::DELETE => Operation::DeleteObject,
            Method::HEAD => Operation::HeadObject,
            _ => Operation::GetObject,
        };
        let request = self.request(operation, method, bucket, Some(key));
        Ok(signer.presign(&request, credentials, self.context.clock.get(), expires.as_secs())?)
    }
}

fn trim_endpoint(mut endpoint: String) -> String {
    while endpoint.ends_with('/') {
        endpoint.pop();
    }
    endpoint
}

/// Bucket names that can be used as a host label
fn is_dns_compatible(bucket: &str) -> bool {
    (3..=63).contains(&bucket.len())
        && !bucket.contains("..")
        && !bucket.starts_with(['.', '-'])
        && !bucket.ends_with(['.', '-'])
        && bucket
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'.' || b == b'-')
}

fn apply_metadata(request: &mut Request, metadata: &ObjectMetadata) {
    for (name, value) in metadata.to_request_headers() {
        request.headers.insert(name, value);
    }
}

/// Base64 MD5 digest for the Content-MD5 header
pub fn content_md5(data: &[u8]) -> String {
    BASE64.encode(md5::compute(data).0)
}

pub(crate) fn etag_header(response: &HttpResponse) -> Option<String> {
    response.header("etag").map(|e| trim_etag(e).to_string())
}

fn metadata_result(response: &HttpResponse) -> std::result::Result<ObjectMetadata, ClientError> {
    Ok(ObjectMetadata::from_headers(response.headers()))
}

fn put_result(response: &HttpResponse) -> std::result::Result<PutObjectResult, ClientError> {
    Ok(PutObjectResult {
        etag: etag_header(response).unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::retry::RetryPolicy;
    use crate::http::transport::{OutgoingRequest, Transport, TransportError};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records requests and answers each with the same canned response
    struct Canned {
        status: u16,
        headers: Vec<(&'static str, &'static str)>,
        body: &'static str,
        seen: Mutex<Vec<(Method, String, Vec<(String, String)>)>>,
    }

    impl Canned {
        fn new(status: u16, headers: Vec<(&'static str, &'static str)>, body: &'static str) -> Arc<Self> {
            Arc::new(Self {
                status,
                headers,
                body,
                seen: Mutex::new(Vec::new()),
            })
        }

        fn last(&self) -> (Method, String, Vec<(String, String)>) {
            self.seen.lock().unwrap().last().cloned().unwrap()
        }
    }

    #[async_trait]
    impl Transport for Canned {
        async fn send(&self, request: OutgoingRequest) -> std::result::Result<HttpResponse, TransportError> {
            let headers = request
                .headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
            self.seen
                .lock()
                .unwrap()
                .push((request.method.clone(), request.url.clone(), headers));
            Ok(HttpResponse::from_parts(
                self.status,
                &self.headers,
                self.body,
                request.method,
            ))
        }
    }

    fn client(transport: Arc<Canned>) -> ScsClient {
        let executor = HttpExecutor::new(transport, RetryPolicy::no_retry());
        ScsClient::new(
            executor,
            "http://localhost:9000/",
            SigV4Signer::new(None),
            Credentials::new("AKID", "SECRET"),
        )
    }

    fn header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
        headers.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }

    #[test]
    fn test_path_and_virtual_host_addressing() {
        let c = client(Canned::new(200, vec![], ""));
        assert_eq!(
            c.request(Operation::GetObject, Method::GET, "photos", Some("a b/c.jpg")).url(),
            "http://localhost:9000/photos/a%20b/c.jpg"
        );
        let c = c.with_virtual_host_style(true);
        assert_eq!(
            c.request(Operation::GetObject, Method::GET, "photos", Some("c.jpg")).url(),
            "http://photos.localhost:9000/c.jpg"
        );
        // not a valid host label
        assert_eq!(
            c.request(Operation::GetObject, Method::GET, "Photos_1", Some("c.jpg")).url(),
            "http://localhost:9000/Photos_1/c.jpg"
        );
    }

    #[tokio::test]
    async fn test_put_object_sends_md5_and_returns_etag() {
        let transport = Canned::new(200, vec![("etag", "\"abc\"")], "");
        let c = client(transport.clone());
        let meta = ObjectMetadata::new().with_user_metadata("origin", "test");
        let result = c
            .put_object("b", "k", Payload::bytes("hello"), &meta)
            .await
            .unwrap();
        assert_eq!(result.etag, "abc");

        let (method, url, headers) = transport.last();
        assert_eq!(method, Method::PUT);
        assert_eq!(url, "http://localhost:9000/b/k");
        assert_eq!(header(&headers, "content-md5"), Some("XUFAKrxLKna5cZ2REBfFkg=="));
        assert_eq!(header(&headers, "x-amz-meta-origin"), Some("test"));
        assert_eq!(header(&headers, "content-length"), Some("5"));
        assert!(header(&headers, "authorization").is_some());
    }

    #[tokio::test]
    async fn test_bucket_exists_maps_404() {
        let c = client(Canned::new(404, vec![], ""));
        assert!(!c.bucket_exists("missing").await.unwrap());

        let c = client(Canned::new(200, vec![], ""));
        assert!(c.bucket_exists("present").await.unwrap());

        let c = client(Canned::new(403, vec![], ""));
        assert_eq!(c.bucket_exists("locked").await.unwrap_err().status_code(), Some(403));
    }

    #[tokio::test]
    async fn test_set_object_metadata_copies_in_place() {
        let transport = Canned::new(
            200,
            vec![],
            "<CopyObjectResult><LastModified>t</LastModified><ETag>\"e\"</ETag></CopyObjectResult>",
        );
        let c = client(transport.clone());
        let meta = ObjectMetadata::new().with_content_type("text/plain");
        let result = c.set_object_metadata("b", "dir/k", &meta).await.unwrap();
        assert_eq!(result.etag, "e");

        let (_, _, headers) = transport.last();
        assert_eq!(header(&headers, "x-amz-copy-source"), Some("/b/dir/k"));
        assert_eq!(header(&headers, "x-amz-metadata-directive"), Some("REPLACE"));
        assert_eq!(header(&headers, "content-type"), Some("text/plain"));
    }

    #[tokio::test]
    async fn test_set_acl_uses_canned_header() {
        let transport = Canned::new(200, vec![], "");
        let c = client(transport.clone());
        c.set_object_acl("b", "k", CannedAcl::PublicRead).await.unwrap();
        let (_, url, headers) = transport.last();
        assert_eq!(url, "http://localhost:9000/b/k?acl=");
        assert_eq!(header(&headers, "x-amz-acl"), Some("public-read"));
    }

    #[tokio::test]
    async fn test_service_error_surfaces() {
        let c = client(Canned::new(
            404,
            vec![],
            "<Error><Code>NoSuchKey</Code><Message>gone</Message></Error>",
        ));
        let err = c.get_object("b", "k").await.unwrap_err();
        let service = err.as_service().unwrap();
        assert_eq!(service.error_code, "NoSuchKey");
    }

    #[test]
    fn test_presign_requires_credentials() {
        let executor = HttpExecutor::new(Canned::new(200, vec![], ""), RetryPolicy::no_retry());
        let anon = ScsClient::anonymous(executor, "http://localhost:9000");
        assert!(anon
            .generate_presigned_url(Method::GET, "b", "k", Duration::from_secs(60))
            .is_err());

        let url = client(Canned::new(200, vec![], ""))
            .generate_presigned_url(Method::GET, "b", "k", Duration::from_secs(60))
            .unwrap();
        assert!(url.starts_with("http://localhost:9000/b/k?X-Amz-Algorithm=AWS4-HMAC-SHA256"));
        assert!(url.contains("X-Amz-Expires=60"));
        assert!(url.contains("X-Amz-Signature="));
    }

    #[test]
    fn test_dns_compatible() {
        assert!(is_dns_compatible("my-bucket.logs"));
        assert!(!is_dns_compatible("ab"));
        assert!(!is_dns_compatible("-bucket"));
        assert!(!is_dns_compatible("a..b"));
        assert!(!is_dns_compatible("UPPER"));
    }
}
