//! Storage-specific response handlers

use crate::http::engine::REQUEST_ID_HEADER;
use crate::http::error::{ClientError, ServiceError, REQUEST_ENTITY_TOO_LARGE, SERVICE_UNAVAILABLE};
use crate::http::handler::{read_body, ErrorResponseHandler};
use crate::http::response::HttpResponse;
use crate::s3::xml::parse_error;
use async_trait::async_trait;
use http::Method;
use tracing::debug;

/// Interprets non-2xx responses carrying an XML `<Error>` document
///
/// HEAD responses and empty bodies have nothing to parse, so the error is
/// built from the status line; 413 and 503 get fixed codes. A body that is
/// not an `<Error>` document (an HTML page from a proxy, say) is kept as the
/// message. Only a body that cannot be read fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct S3ErrorResponseHandler;

#[async_trait]
impl ErrorResponseHandler for S3ErrorResponseHandler {
    async fn handle(&self, response: &mut HttpResponse) -> Result<ServiceError, ClientError> {
        let status = response.status_code();
        let request_id = response.header(REQUEST_ID_HEADER).map(str::to_string);
        let status_text = response
            .status_text()
            .map(str::to_string)
            .unwrap_or_else(|| status.to_string());

        let body = if response.request_method() == Method::HEAD {
            None
        } else {
            Some(read_body(response).await?).filter(|b| !b.is_empty())
        };

        let Some(body) = body else {
            let error = match status {
                413 => ServiceError::new(status, REQUEST_ENTITY_TOO_LARGE, status_text),
                503 => ServiceError::new(status, SERVICE_UNAVAILABLE, status_text),
                _ => ServiceError::new(status, status_text.clone(), status_text),
            };
            return Ok(error.with_request_id(request_id));
        };

        match parse_error(&body) {
            Ok(doc) => Ok(ServiceError::new(status, doc.code, doc.message)
                .with_request_id(doc.request_id.or(request_id))
                .with_host_id(doc.host_id)),
            Err(e) => {
                debug!(status, "Error response is not an Error document: {}", e.message());
                let raw = String::from_utf8_lossy(&body).trim().to_string();
                Ok(ServiceError::new(status, status_text, raw).with_request_id(request_id))
            }
        }
    }
}
