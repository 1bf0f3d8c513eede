//! In-memory transports shared by the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use http::Method;
use scs_client::auth::{Credentials, SigV4Signer, Signer};
use scs_client::http::error::ClientError;
use scs_client::http::retry::{NoBackoff, RetryPolicy};
use scs_client::http::{HttpExecutor, HttpResponse, OutgoingRequest, Request, Transport, TransportError};
use scs_client::ScsClient;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

/// One attempt as seen on the wire
#[derive(Debug, Clone)]
pub struct Attempt {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl Attempt {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Canned outcome for one attempt
#[derive(Debug, Clone)]
pub enum Reply {
    Status {
        status: u16,
        headers: Vec<(String, String)>,
        body: String,
        reason: Option<String>,
    },
    /// Connection reset before any response
    Reset,
    /// Never answers; only cancellation ends the attempt
    Hang,
}

impl Reply {
    pub fn ok(body: &str) -> Self {
        Reply::status(200, body)
    }

    pub fn status(status: u16, body: &str) -> Self {
        Reply::Status {
            status,
            headers: Vec::new(),
            body: body.to_string(),
            reason: None,
        }
    }

    pub fn with_header(self, name: &str, value: &str) -> Self {
        match self {
            Reply::Status {
                status,
                mut headers,
                body,
                reason,
            } => {
                headers.push((name.to_string(), value.to_string()));
                Reply::Status {
                    status,
                    headers,
                    body,
                    reason,
                }
            }
            other => other,
        }
    }

    /// Replace the canonical reason phrase of the status line
    pub fn with_reason(self, phrase: &str) -> Self {
        match self {
            Reply::Status {
                status, headers, body, ..
            } => Reply::Status {
                status,
                headers,
                body,
                reason: Some(phrase.to_string()),
            },
            other => other,
        }
    }

    pub fn error(status: u16, code: &str, message: &str) -> Self {
        Reply::status(
            status,
            &format!(
                "<Error><Code>{}</Code><Message>{}</Message><RequestId>req-{}</RequestId></Error>",
                code, message, status
            ),
        )
    }

    pub fn redirect(location: &str) -> Self {
        Reply::status(307, "").with_header("location", location)
    }
}

/// Plays back a fixed script of replies, then answers 200 with no body
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Reply>>,
    attempts: Mutex<Vec<Attempt>>,
}

impl ScriptedTransport {
    pub fn new(replies: impl IntoIterator<Item = Reply>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(replies.into_iter().collect()),
            attempts: Mutex::new(Vec::new()),
        })
    }

    pub fn attempts(&self) -> Vec<Attempt> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().unwrap().len()
    }
}

async fn record(request: OutgoingRequest) -> Attempt {
    let headers = request
        .headers
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let body = request.body.collect().await.unwrap_or_default();
    Attempt {
        method: request.method,
        url: request.url,
        headers,
        body,
    }
}

fn response(status: u16, headers: &[(String, String)], body: impl Into<Bytes>, method: Method) -> HttpResponse {
    let headers: Vec<(&str, &str)> = headers.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
    HttpResponse::from_parts(status, &headers, body, method)
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: OutgoingRequest) -> Result<HttpResponse, TransportError> {
        let attempt = record(request).await;
        let method = attempt.method.clone();
        self.attempts.lock().unwrap().push(attempt);

        let reply = self.script.lock().unwrap().pop_front();
        match reply {
            None => Ok(response(200, &[], "", method)),
            Some(Reply::Status {
                status,
                headers,
                body,
                reason,
            }) => {
                let response = response(status, &headers, body, method);
                Ok(match reason {
                    Some(reason) => response.with_reason(reason),
                    None => response,
                })
            }
            Some(Reply::Reset) => Err(TransportError::Io(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "connection reset by peer",
            ))),
            Some(Reply::Hang) => futures::future::pending().await,
        }
    }
}

/// Signer that only remembers the clock offset of every signing
#[derive(Default)]
pub struct RecordingSigner {
    pub offsets: Mutex<Vec<i64>>,
}

impl Signer for RecordingSigner {
    fn sign(&self, request: &mut Request, _credentials: &Credentials, clock_offset: i64) -> Result<(), ClientError> {
        self.offsets.lock().unwrap().push(clock_offset);
        request.headers.insert("authorization", format!("test offset={}", clock_offset));
        Ok(())
    }
}

/// Retry policy with the default condition and no sleeping
pub fn fast_policy(max_retries: u32) -> RetryPolicy {
    RetryPolicy::with_max_retries(max_retries).backoff(NoBackoff)
}

pub fn client(transport: Arc<dyn Transport>, max_retries: u32) -> ScsClient {
    let executor = HttpExecutor::new(transport, fast_policy(max_retries));
    ScsClient::new(
        executor,
        "http://localhost:9000",
        SigV4Signer::new(Some("us-east-1".to_string())),
        Credentials::new("AKIDEXAMPLE", "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY"),
    )
}

#[derive(Debug, Default)]
struct Upload {
    key: String,
    parts: BTreeMap<u32, (String, u64, Bytes)>,
}

#[derive(Debug, Default)]
struct StoreState {
    uploads: HashMap<String, Upload>,
    objects: HashMap<String, Bytes>,
    /// Transient 500s still to serve, per part number
    flaky_parts: HashMap<u32, u32>,
    /// Parts rejected with a non-retryable 400
    rejected_parts: Vec<u32>,
}

/// Minimal multipart-capable object store
#[derive(Default)]
pub struct FakeStore {
    state: Mutex<StoreState>,
    next_upload: AtomicU32,
    part_requests: AtomicU32,
    requests: Mutex<Vec<(Method, String)>>,
    in_flight: AtomicU32,
    max_in_flight: AtomicU32,
}

impl FakeStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail the next `failures` attempts of `part_number` with 500
    pub fn fail_part(&self, part_number: u32, failures: u32) {
        self.state.lock().unwrap().flaky_parts.insert(part_number, failures);
    }

    /// Reject `part_number` with a 400 on every attempt
    pub fn reject_part(&self, part_number: u32) {
        self.state.lock().unwrap().rejected_parts.push(part_number);
    }

    pub fn part_requests(&self) -> u32 {
        self.part_requests.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> u32 {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<(Method, String)> {
        self.requests.lock().unwrap().clone()
    }

    pub fn open_uploads(&self) -> usize {
        self.state.lock().unwrap().uploads.len()
    }

    pub fn stored_parts(&self, upload_id: &str) -> Vec<u32> {
        self.state
            .lock()
            .unwrap()
            .uploads
            .get(upload_id)
            .map(|u| u.parts.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn object(&self, key: &str) -> Option<Bytes> {
        self.state.lock().unwrap().objects.get(key).cloned()
    }

    fn handle(&self, attempt: &Attempt) -> (u16, Vec<(String, String)>, String) {
        let (path, query) = attempt.url.split_once('?').unwrap_or((attempt.url.as_str(), ""));
        let key = path.rsplit('/').next().unwrap_or_default().to_string();
        let params: HashMap<String, String> = query
            .split('&')
            .filter(|p| !p.is_empty())
            .map(|p| {
                let (k, v) = p.split_once('=').unwrap_or((p, ""));
                (k.to_string(), urlencoding::decode(v).unwrap().into_owned())
            })
            .collect();

        let mut state = self.state.lock().unwrap();
        let no_such_upload = || {
            (
                404,
                Vec::new(),
                "<Error><Code>NoSuchUpload</Code><Message>unknown upload</Message></Error>".to_string(),
            )
        };

        if attempt.method == Method::POST && params.contains_key("uploads") {
            let id = format!("upload-{}", self.next_upload.fetch_add(1, Ordering::SeqCst) + 1);
            state.uploads.insert(
                id.clone(),
                Upload {
                    key: key.clone(),
                    ..Default::default()
                },
            );
            let body = format!(
                "<InitiateMultipartUploadResult><Bucket>b</Bucket><Key>{}</Key><UploadId>{}</UploadId></InitiateMultipartUploadResult>",
                key, id
            );
            return (200, Vec::new(), body);
        }

        let Some(upload_id) = params.get("uploadId").cloned() else {
            return (400, Vec::new(), "<Error><Code>InvalidRequest</Code><Message>?</Message></Error>".into());
        };

        match attempt.method {
            Method::PUT => {
                let part_number: u32 = params.get("partNumber").and_then(|n| n.parse().ok()).unwrap_or(0);
                self.part_requests.fetch_add(1, Ordering::SeqCst);
                if state.rejected_parts.contains(&part_number) {
                    return (
                        400,
                        Vec::new(),
                        "<Error><Code>InvalidPart</Code><Message>rejected</Message></Error>".into(),
                    );
                }
                if let Some(left) = state.flaky_parts.get_mut(&part_number) {
                    if *left > 0 {
                        *left -= 1;
                        return (
                            500,
                            Vec::new(),
                            "<Error><Code>InternalError</Code><Message>try again</Message></Error>".into(),
                        );
                    }
                }
                let Some(upload) = state.uploads.get_mut(&upload_id) else {
                    return no_such_upload();
                };
                let etag = format!("{:x}", md5::compute(&attempt.body));
                upload
                    .parts
                    .insert(part_number, (etag.clone(), attempt.body.len() as u64, attempt.body.clone()));
                (200, vec![("etag".into(), format!("\"{}\"", etag))], String::new())
            }
            Method::GET => {
                let Some(upload) = state.uploads.get(&upload_id) else {
                    return no_such_upload();
                };
                let marker: u32 = params.get("part-number-marker").and_then(|m| m.parse().ok()).unwrap_or(0);
                let max: usize = params.get("max-parts").and_then(|m| m.parse().ok()).unwrap_or(1000);
                let page: Vec<_> = upload.parts.range(marker + 1..).take(max).collect();
                let truncated = upload.parts.range(marker + 1..).count() > page.len();
                let mut body = format!("<ListPartsResult><UploadId>{}</UploadId>", upload_id);
                for (number, (etag, size, _)) in &page {
                    body.push_str(&format!(
                        "<Part><PartNumber>{}</PartNumber><ETag>\"{}\"</ETag><Size>{}</Size></Part>",
                        number, etag, size
                    ));
                }
                if let Some((last, _)) = page.last() {
                    body.push_str(&format!("<NextPartNumberMarker>{}</NextPartNumberMarker>", last));
                }
                body.push_str(&format!("<IsTruncated>{}</IsTruncated></ListPartsResult>", truncated));
                (200, Vec::new(), body)
            }
            Method::POST => {
                let Some(upload) = state.uploads.remove(&upload_id) else {
                    return no_such_upload();
                };
                let mut object = Vec::new();
                for (_, _, data) in upload.parts.values() {
                    object.extend_from_slice(data);
                }
                state.objects.insert(upload.key.clone(), Bytes::from(object));
                let body = format!(
                    "<CompleteMultipartUploadResult><Bucket>b</Bucket><Key>{}</Key><ETag>\"final-{}\"</ETag></CompleteMultipartUploadResult>",
                    upload.key,
                    upload.parts.len()
                );
                (200, Vec::new(), body)
            }
            Method::DELETE => {
                if state.uploads.remove(&upload_id).is_none() {
                    return no_such_upload();
                }
                (204, Vec::new(), String::new())
            }
            _ => (405, Vec::new(), String::new()),
        }
    }
}

#[async_trait]
impl Transport for FakeStore {
    async fn send(&self, request: OutgoingRequest) -> Result<HttpResponse, TransportError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let attempt = record(request).await;
        self.requests.lock().unwrap().push((attempt.method.clone(), attempt.url.clone()));
        // Give concurrent part uploads a chance to overlap
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;

        let (status, headers, body) = self.handle(&attempt);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(response(status, &headers, body, attempt.method))
    }
}
