//! Multipart protocol operations

use crate::http::body::Payload;
use crate::http::error::{ClientError, Error, Result};
use crate::http::handler::{DiscardBody, FromHeaders, Unmarshal};
use crate::http::request::{Operation, Request};
use crate::http::response::HttpResponse;
use crate::multipart::part::{PartDescriptor, PartSource};
use crate::multipart::session::UploadSession;
use crate::multipart::{MultipartConfig, MAX_PARTS};
use crate::s3::client::{etag_header, ScsClient};
use crate::s3::types::{CompletedUpload, ObjectMetadata, PartPage, PartSummary};
use crate::s3::xml;
use futures::stream::{self, TryStreamExt};
use http::Method;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Observes bytes as parts finish uploading
pub type ProgressFn = Arc<dyn Fn(u64) + Send + Sync>;

/// Drives the multipart protocol through a [`ScsClient`]
#[derive(Clone)]
pub struct MultipartUploader {
    client: ScsClient,
    config: MultipartConfig,
    progress: Option<ProgressFn>,
}

impl std::fmt::Debug for MultipartUploader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultipartUploader")
            .field("client", &self.client)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl MultipartUploader {
    pub fn new(client: ScsClient, config: MultipartConfig) -> Self {
        Self {
            client,
            config,
            progress: None,
        }
    }

    /// Report the size of every part once it is stored
    pub fn with_progress(mut self, progress: impl Fn(u64) + Send + Sync + 'static) -> Self {
        self.progress = Some(Arc::new(progress));
        self
    }

    pub fn config(&self) -> &MultipartConfig {
        &self.config
    }

    fn session_request(&self, operation: Operation, method: Method, session: &UploadSession) -> Request {
        self.client
            .request(operation, method, session.bucket(), Some(session.key()))
            .with_param("uploadId", session.upload_id())
    }

    /// Start an upload; nothing exists on the service until this succeeds
    pub async fn initiate(&self, bucket: &str, key: &str, metadata: &ObjectMetadata) -> Result<UploadSession> {
        let mut request = self
            .client
            .request(Operation::InitiateMultipartUpload, Method::POST, bucket, Some(key))
            .with_param("uploads", "");
        for (name, value) in metadata.to_request_headers() {
            request.headers.insert(name, value);
        }
        if !request.headers.contains("content-type") {
            request.headers.insert("content-type", "application/octet-stream");
        }

        let handler = Unmarshal::new(xml::parse_initiate_multipart);
        let result = self.client.execute(&mut request, &handler).await?;
        info!(bucket, key, upload_id = %result.upload_id, "Initiated multipart upload");
        Ok(UploadSession::new(bucket, key, result.upload_id, self.config.part_size))
    }

    /// Upload one part and record its ETag in the session
    pub async fn upload_part(&self, session: &UploadSession, part: &PartDescriptor) -> Result<String> {
        if part.part_number == 0 || part.part_number > MAX_PARTS {
            return Err(ClientError::invalid_request(format!(
                "part number {} is outside 1..={}",
                part.part_number, MAX_PARTS
            ))
            .into());
        }

        let mut request = self
            .session_request(Operation::UploadPart, Method::PUT, session)
            .with_param("partNumber", part.part_number.to_string())
            .with_payload(Payload::Replayable(part.content.clone()));

        let handler = FromHeaders::new(part_etag);
        let etag = self.client.execute(&mut request, &handler).await?;

        if session.record(part.part_number, etag.clone(), part.len()).is_some() {
            debug!(part_number = part.part_number, "Replaced previously recorded part");
        }
        debug!(
            upload_id = session.upload_id(),
            part_number = part.part_number,
            size = part.len(),
            etag = %etag,
            "Uploaded part"
        );
        Ok(etag)
    }

    /// One page of the parts stored for this upload; read-only
    pub async fn list_parts(
        &self,
        session: &UploadSession,
        marker: Option<u32>,
        max_parts: Option<u32>,
    ) -> Result<PartPage> {
        let mut request = self.session_request(Operation::ListParts, Method::GET, session);
        if let Some(marker) = marker {
            request.params.insert("part-number-marker".into(), marker.to_string());
        }
        if let Some(max_parts) = max_parts {
            request.params.insert("max-parts".into(), max_parts.to_string());
        }
        let handler = Unmarshal::new(xml::parse_list_parts);
        self.client.execute(&mut request, &handler).await
    }

    /// Follow part markers until every stored part has been listed
    pub async fn list_all_parts(&self, session: &UploadSession) -> Result<Vec<PartSummary>> {
        let mut parts = Vec::new();
        let mut marker = None;
        loop {
            let page = self.list_parts(session, marker, None).await?;
            let next = page.next_part_number_marker;
            parts.extend(page.parts);
            match next {
                Some(n) if page.is_truncated && Some(n) != marker => marker = Some(n),
                _ => break,
            }
        }
        Ok(parts)
    }

    /// Assemble the object from the ledger, then clear it
    pub async fn complete(&self, session: &UploadSession) -> Result<CompletedUpload> {
        let parts = session.completed_parts();
        if parts.is_empty() {
            return Err(ClientError::invalid_request(format!(
                "upload {} has no recorded parts to complete",
                session.upload_id()
            ))
            .into());
        }

        let body = xml::build_complete_multipart(&parts);
        let mut request = self
            .session_request(Operation::CompleteMultipartUpload, Method::POST, session)
            .with_header("content-type", "application/xml")
            .with_payload(Payload::bytes(body));

        let handler = Unmarshal::new(xml::parse_complete_multipart);
        let result = self.client.execute(&mut request, &handler).await?;

        let completed = CompletedUpload {
            bucket: session.bucket().to_string(),
            key: session.key().to_string(),
            upload_id: session.upload_id().to_string(),
            etag: result.etag,
            location: result.location,
            size: session.total_size(),
            parts: parts.len() as u32,
        };
        session.clear();
        info!(
            bucket = %completed.bucket,
            key = %completed.key,
            parts = completed.parts,
            size = completed.size,
            "Completed multipart upload"
        );
        Ok(completed)
    }

    /// Discard the upload and every part stored for it
    pub async fn abort(&self, session: &UploadSession) -> Result<()> {
        let mut request = self.session_request(Operation::AbortMultipartUpload, Method::DELETE, session);
        self.client.execute(&mut request, &DiscardBody).await?;
        info!(upload_id = session.upload_id(), "Aborted multipart upload");
        Ok(())
    }

    /// Upload every part, `concurrency` at a time
    ///
    /// Stops at the first part that fails for good. Parts already stored stay
    /// recorded in the session.
    pub async fn upload_parts(&self, session: &UploadSession, parts: Vec<PartDescriptor>) -> Result<()> {
        let concurrency = self.config.concurrency.max(1);
        stream::iter(parts.into_iter().map(Ok::<_, Error>))
            .try_for_each_concurrent(concurrency, |part| async move {
                self.upload_part(session, &part).await?;
                if let Some(progress) = &self.progress {
                    progress(part.len());
                }
                Ok(())
            })
            .await
    }

    /// Initiate, upload every part of `source` and complete
    ///
    /// When a part fails for good the error is returned and, unless
    /// `abort_on_failure` is set, the stored parts are left on the service.
    pub async fn upload_large(
        &self,
        bucket: &str,
        key: &str,
        source: &PartSource,
        metadata: &ObjectMetadata,
    ) -> Result<CompletedUpload> {
        let parts = source.partition(self.config.part_size)?;
        let dispatched = parts.len();
        let session = self.initiate(bucket, key, metadata).await?;

        if let Err(e) = self.upload_parts(&session, parts).await {
            self.handle_failure(&session).await;
            return Err(e);
        }

        if session.len() != dispatched {
            self.handle_failure(&session).await;
            return Err(ClientError::invalid_request(format!(
                "only {} of {} parts recorded an ETag",
                session.len(),
                dispatched
            ))
            .into());
        }

        self.complete(&session).await
    }

    async fn handle_failure(&self, session: &UploadSession) {
        if !self.config.abort_on_failure {
            warn!(
                upload_id = session.upload_id(),
                parts_stored = session.len(),
                "Multipart upload failed, stored parts left in place"
            );
            return;
        }
        if let Err(e) = self.abort(session).await {
            warn!(upload_id = session.upload_id(), "Unable to abort multipart upload: {}", e);
        }
    }
}

impl ScsClient {
    /// Multipart uploader sharing this client's engine and signing context
    pub fn multipart(&self, config: MultipartConfig) -> MultipartUploader {
        MultipartUploader::new(self.clone(), config)
    }
}

fn part_etag(response: &HttpResponse) -> std::result::Result<String, ClientError> {
    etag_header(response).ok_or_else(|| ClientError::unmarshall("no ETag in UploadPart response"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Credentials, SigV4Signer};
    use crate::http::engine::HttpExecutor;
    use crate::http::retry::RetryPolicy;
    use crate::http::transport::{OutgoingRequest, Transport, TransportError};
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::Mutex;

    /// Answers every request with 200 and remembers the URLs
    #[derive(Default)]
    struct Recorder {
        urls: Mutex<Vec<(Method, String)>>,
    }

    #[async_trait]
    impl Transport for Recorder {
        async fn send(&self, request: OutgoingRequest) -> std::result::Result<HttpResponse, TransportError> {
            self.urls.lock().unwrap().push((request.method.clone(), request.url.clone()));
            let body = if request.url.ends_with("?uploads=") {
                "<InitiateMultipartUploadResult><UploadId>u 1</UploadId></InitiateMultipartUploadResult>"
            } else if request.method == Method::POST {
                "<CompleteMultipartUploadResult><ETag>\"final\"</ETag></CompleteMultipartUploadResult>"
            } else {
                ""
            };
            Ok(HttpResponse::from_parts(200, &[("etag", "\"part\"")], body, request.method))
        }
    }

    fn uploader(transport: Arc<Recorder>) -> MultipartUploader {
        let executor = HttpExecutor::new(transport, RetryPolicy::no_retry());
        ScsClient::new(
            executor,
            "http://localhost:9000",
            SigV4Signer::new(None),
            Credentials::new("AKID", "SECRET"),
        )
        .multipart(MultipartConfig::default())
    }

    #[tokio::test]
    async fn test_protocol_urls() {
        let transport = Arc::new(Recorder::default());
        let up = uploader(transport.clone());

        let session = up.initiate("b", "k", &ObjectMetadata::new()).await.unwrap();
        assert_eq!(session.upload_id(), "u 1");

        let part = PartDescriptor::new(1, crate::http::body::ReplayableSource::Bytes(Bytes::from_static(b"x")));
        assert_eq!(up.upload_part(&session, &part).await.unwrap(), "part");
        let done = up.complete(&session).await.unwrap();
        assert_eq!(done.etag, "final");
        assert_eq!(done.size, 1);
        assert!(session.is_empty());
        up.abort(&session).await.unwrap();

        let urls = transport.urls.lock().unwrap().clone();
        assert_eq!(
            urls,
            vec![
                (Method::POST, "http://localhost:9000/b/k?uploads=".to_string()),
                (Method::PUT, "http://localhost:9000/b/k?partNumber=1&uploadId=u%201".to_string()),
                (Method::POST, "http://localhost:9000/b/k?uploadId=u%201".to_string()),
                (Method::DELETE, "http://localhost:9000/b/k?uploadId=u%201".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_complete_requires_parts() {
        let up = uploader(Arc::new(Recorder::default()));
        let session = UploadSession::new("b", "k", "u", 5);
        let err = up.complete(&session).await.unwrap_err();
        assert!(err.as_client().is_some());
    }

    #[tokio::test]
    async fn test_part_number_bounds() {
        let up = uploader(Arc::new(Recorder::default()));
        let session = UploadSession::new("b", "k", "u", 5);
        let content = crate::http::body::ReplayableSource::Bytes(Bytes::from_static(b"x"));
        assert!(up.upload_part(&session, &PartDescriptor::new(0, content.clone())).await.is_err());
        assert!(up
            .upload_part(&session, &PartDescriptor::new(MAX_PARTS + 1, content))
            .await
            .is_err());
    }
}
