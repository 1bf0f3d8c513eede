//! Transport: sends one HTTP request, returns one HTTP response
//!
//! [`HyperTransport`] is a pooled hyper client tuned for object storage:
//! - TCP_NODELAY, 90s TCP keepalive, 10s connect timeout
//! - 1024 idle connections per host, 90s idle timeout
//! - native-tls (OpenSSL) for TLS, with an opt-in insecure mode

use crate::http::body::Body;
use crate::http::error::BoxError;
use crate::http::request::Headers;
use crate::http::response::HttpResponse;
use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use http::Method;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full, StreamBody};
use hyper::body::Frame;
use hyper_tls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client as HyperClient;
use hyper_util::rt::TokioExecutor;
use native_tls::TlsConnector;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// A fully signed request, ready for the wire
#[derive(Debug)]
pub struct OutgoingRequest {
    pub method: Method,
    pub url: String,
    pub headers: Headers,
    pub body: Body,
}

/// Transport-level failure: no HTTP response was obtained
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("connection error: {0}")]
    Connection(#[source] BoxError),
}

impl TransportError {
    /// Failures that happened before anything left the machine
    pub fn is_local(&self) -> bool {
        matches!(self, TransportError::InvalidRequest(_))
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: OutgoingRequest) -> Result<HttpResponse, TransportError>;
}

type RequestBody = UnsyncBoxBody<Bytes, io::Error>;

/// Pooled hyper client
#[derive(Clone)]
pub struct HyperTransport {
    client: HyperClient<HttpsConnector<HttpConnector>, RequestBody>,
    timeout: Duration,
}

impl HyperTransport {
    pub fn new(timeout: Duration, insecure_tls: bool) -> Result<Self, native_tls::Error> {
        let mut http = HttpConnector::new();
        http.set_nodelay(true);
        http.enforce_http(false);
        http.set_connect_timeout(Some(Duration::from_secs(10)));
        http.set_keepalive(Some(Duration::from_secs(90)));

        let tls = if insecure_tls {
            tracing::warn!("INSECURE TLS MODE ENABLED: Certificate verification is disabled!");
            TlsConnector::builder()
                .danger_accept_invalid_certs(true)
                .danger_accept_invalid_hostnames(true)
                .build()?
        } else {
            TlsConnector::new()?
        };

        let https = HttpsConnector::from((http, tls.into()));

        // Retries are owned by the engine, so the pool must not replay on its own
        let client = HyperClient::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(1024)
            .retry_canceled_requests(false)
            .set_host(true)
            .build(https);

        Ok(Self { client, timeout })
    }

    fn to_hyper_body(body: Body) -> RequestBody {
        match body {
            Body::Empty => Empty::<Bytes>::new().map_err(|never| match never {}).boxed_unsync(),
            Body::Full(b) => Full::new(b).map_err(|never| match never {}).boxed_unsync(),
            Body::Stream(s) => StreamBody::new(s.map_ok(Frame::data)).boxed_unsync(),
        }
    }
}

#[async_trait]
impl Transport for HyperTransport {
    async fn send(&self, request: OutgoingRequest) -> Result<HttpResponse, TransportError> {
        let method = request.method.clone();
        let mut builder = http::Request::builder().method(request.method).uri(&request.url);
        for (name, value) in request.headers.iter() {
            // hyper derives Host from the URI
            if name == "host" {
                continue;
            }
            builder = builder.header(name, value);
        }
        let req = builder
            .body(Self::to_hyper_body(request.body))
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;

        let response = tokio::time::timeout(self.timeout, self.client.request(req))
            .await
            .map_err(|_| TransportError::Timeout(self.timeout))?
            .map_err(|e| TransportError::Connection(Box::new(e)))?;

        let (parts, incoming) = response.into_parts();
        let stream = incoming.into_data_stream().map_err(io::Error::other);
        let mut resp = HttpResponse::new(parts.status, parts.headers, Body::Stream(Box::pin(stream)), method);
        if let Some(reason) = parts.extensions.get::<hyper::ext::ReasonPhrase>() {
            if let Ok(reason) = std::str::from_utf8(reason.as_bytes()) {
                resp = resp.with_reason(reason);
            }
        }
        Ok(resp)
    }
}
