//! Raw HTTP response as seen by the handlers

use crate::http::body::Body;
use bytes::Bytes;
use futures::stream::BoxStream;
use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::{Method, StatusCode};
use std::io;

/// One HTTP response
///
/// The body is owned by whichever handler consumes it. Whatever the handler
/// leaves behind is drained by the engine via [`HttpResponse::release`].
#[derive(Debug)]
pub struct HttpResponse {
    status: StatusCode,
    reason: Option<String>,
    headers: HeaderMap,
    body: Option<Body>,
    request_method: Method,
}

impl HttpResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: Body, request_method: Method) -> Self {
        Self {
            status,
            reason: None,
            headers,
            body: Some(body),
            request_method,
        }
    }

    /// Build a response with a buffered body; used by in-memory transports
    pub fn from_parts(status: u16, headers: &[(&str, &str)], body: impl Into<Bytes>, request_method: Method) -> Self {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                map.append(name, value);
            }
        }
        let body = body.into();
        let body = if body.is_empty() { Body::Empty } else { Body::Full(body) };
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Self::new(status, map, body, request_method)
    }

    /// Override the reason phrase reported by the server
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn status_code(&self) -> u16 {
        self.status.as_u16()
    }

    /// Reason phrase, falling back to the canonical one for the status
    pub fn status_text(&self) -> Option<&str> {
        self.reason.as_deref().or_else(|| self.status.canonical_reason())
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// First value of a header, if present and valid UTF-8
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn request_method(&self) -> &Method {
        &self.request_method
    }

    /// Take the body, leaving nothing behind for the engine to drain
    pub fn take_body(&mut self) -> Option<Body> {
        self.body.take()
    }

    /// Take the body as a byte stream
    pub fn take_stream(&mut self) -> Option<BoxStream<'static, io::Result<Bytes>>> {
        use futures::StreamExt;
        match self.body.take()? {
            Body::Empty => Some(futures::stream::empty().boxed()),
            Body::Full(b) => Some(futures::stream::once(async move { Ok(b) }).boxed()),
            Body::Stream(s) => Some(s),
        }
    }

    /// Read the remaining body into memory
    pub async fn bytes(&mut self) -> io::Result<Bytes> {
        match self.body.take() {
            Some(body) => body.collect().await,
            None => Ok(Bytes::new()),
        }
    }

    /// Drain and drop whatever body is left so the connection can be reused
    pub async fn release(&mut self) -> io::Result<()> {
        if let Some(body) = self.body.take() {
            body.collect().await?;
        }
        Ok(())
    }
}
