//! Response handlers
//!
//! The engine hands every 2xx response to a [`ResponseHandler`] and every
//! other non-redirect response to an [`ErrorResponseHandler`]. Handlers own
//! the body while they run; whatever they leave unread is drained by the
//! engine unless the handler asked for the connection to stay open.

use crate::http::error::{ClientError, ServiceError};
use crate::http::response::HttpResponse;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use http::{HeaderMap, StatusCode};
use std::fmt;
use std::io;
use std::marker::PhantomData;

#[async_trait]
pub trait ResponseHandler<T>: Send + Sync {
    async fn handle(&self, response: &mut HttpResponse) -> Result<T, ClientError>;

    /// Keep the connection open after `handle` returns (streaming results)
    fn needs_connection_left_open(&self) -> bool {
        false
    }
}

/// Turns a non-2xx response into a [`ServiceError`]
///
/// Returning `Err` means the response could not be interpreted; the engine
/// then falls back to the status line.
#[async_trait]
pub trait ErrorResponseHandler: Send + Sync {
    async fn handle(&self, response: &mut HttpResponse) -> Result<ServiceError, ClientError>;
}

pub(crate) async fn read_body(response: &mut HttpResponse) -> Result<Bytes, ClientError> {
    response
        .bytes()
        .await
        .map_err(ClientError::transport)
}

/// Ignores the body
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardBody;

#[async_trait]
impl ResponseHandler<()> for DiscardBody {
    async fn handle(&self, _response: &mut HttpResponse) -> Result<(), ClientError> {
        Ok(())
    }
}

/// Buffers the body
#[derive(Debug, Clone, Copy, Default)]
pub struct BufferedBody;

#[async_trait]
impl ResponseHandler<Bytes> for BufferedBody {
    async fn handle(&self, response: &mut HttpResponse) -> Result<Bytes, ClientError> {
        read_body(response).await
    }
}

/// Buffers the body and decodes it with `F`
pub struct Unmarshal<F, T> {
    decode: F,
    _marker: PhantomData<fn() -> T>,
}

impl<F, T> Unmarshal<F, T>
where
    F: Fn(&[u8]) -> Result<T, ClientError> + Send + Sync,
{
    pub fn new(decode: F) -> Self {
        Self {
            decode,
            _marker: PhantomData,
        }
    }
}

impl<F, T> fmt::Debug for Unmarshal<F, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Unmarshal")
    }
}

#[async_trait]
impl<F, T> ResponseHandler<T> for Unmarshal<F, T>
where
    F: Fn(&[u8]) -> Result<T, ClientError> + Send + Sync,
    T: Send,
{
    async fn handle(&self, response: &mut HttpResponse) -> Result<T, ClientError> {
        let body = read_body(response).await?;
        (self.decode)(&body).map_err(|e| {
            ClientError::unmarshall(format!("Unable to unmarshall response ({})", e.message())).with_source(e)
        })
    }
}

/// Builds the result from status and headers alone
pub struct FromHeaders<F, T> {
    extract: F,
    _marker: PhantomData<fn() -> T>,
}

impl<F, T> FromHeaders<F, T>
where
    F: Fn(&HttpResponse) -> Result<T, ClientError> + Send + Sync,
{
    pub fn new(extract: F) -> Self {
        Self {
            extract,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<F, T> ResponseHandler<T> for FromHeaders<F, T>
where
    F: Fn(&HttpResponse) -> Result<T, ClientError> + Send + Sync,
    T: Send,
{
    async fn handle(&self, response: &mut HttpResponse) -> Result<T, ClientError> {
        (self.extract)(response)
    }
}

/// A 2xx response whose body is still on the wire
pub struct StreamingResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: BoxStream<'static, io::Result<Bytes>>,
}

impl fmt::Debug for StreamingResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamingResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Hands the unread body to the caller
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamingBody;

#[async_trait]
impl ResponseHandler<StreamingResponse> for StreamingBody {
    async fn handle(&self, response: &mut HttpResponse) -> Result<StreamingResponse, ClientError> {
        let body = response
            .take_stream()
            .unwrap_or_else(|| Box::pin(futures::stream::empty()));
        Ok(StreamingResponse {
            status: response.status(),
            headers: response.headers().clone(),
            body,
        })
    }

    fn needs_connection_left_open(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use http::Method;

    #[tokio::test]
    async fn test_unmarshal_wraps_decode_failure() {
        let handler = Unmarshal::new(|body: &[u8]| {
            std::str::from_utf8(body)
                .map(str::to_string)
                .map_err(|_| ClientError::unmarshall("not utf-8"))
        });
        let mut ok = HttpResponse::from_parts(200, &[], "hello", Method::GET);
        assert_eq!(handler.handle(&mut ok).await.unwrap(), "hello");

        let mut bad = HttpResponse::from_parts(200, &[], vec![0xffu8, 0xfe], Method::GET);
        let err = handler.handle(&mut bad).await.unwrap_err();
        assert_eq!(err.message(), "Unable to unmarshall response (not utf-8)");
    }

    #[tokio::test]
    async fn test_streaming_body_keeps_connection() {
        let handler = StreamingBody;
        assert!(handler.needs_connection_left_open());
        let mut resp = HttpResponse::from_parts(200, &[("content-length", "3")], "abc", Method::GET);
        let streaming = handler.handle(&mut resp).await.unwrap();
        let chunks: Vec<_> = streaming.body.collect().await;
        assert_eq!(chunks.len(), 1);
        assert!(resp.take_body().is_none());
    }

    #[tokio::test]
    async fn test_from_headers() {
        let handler = FromHeaders::new(|resp: &HttpResponse| {
            resp.header("etag")
                .map(|v| v.trim_matches('"').to_string())
                .ok_or_else(|| ClientError::unmarshall("missing ETag"))
        });
        let mut resp = HttpResponse::from_parts(200, &[("ETag", "\"e1\"")], "", Method::PUT);
        assert_eq!(handler.handle(&mut resp).await.unwrap(), "e1");
    }
}
