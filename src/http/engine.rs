//! Request execution engine
//!
//! One `execute` call runs a logical operation to completion:
//!
//! ```text
//! restore snapshot -> sign -> open body -> send -+-> 2xx   -> success handler
//!        ^                                       +-> 307   -> follow Location
//!        |                                       +-> other -> error handler
//!        +------- backoff <- retry policy <------+-> transport failure
//! ```
//!
//! Attempts within one call are strictly sequential. Redirects count toward
//! the same attempt ceiling as retries.

use crate::auth::{Credentials, Signer};
use crate::http::body::{Body, Payload};
use crate::http::clock::{parse_clock_skew_offset, ClockOffset};
use crate::http::error::{
    ClientError, ClientErrorKind, Error, Result, ServiceError, REQUEST_ENTITY_TOO_LARGE, SERVICE_UNAVAILABLE,
};
use crate::http::handler::{ErrorResponseHandler, ResponseHandler};
use crate::http::request::Request;
use crate::http::response::HttpResponse;
use crate::http::retry::RetryPolicy;
use crate::http::transport::{OutgoingRequest, Transport, TransportError};
use chrono::Utc;
use http::{HeaderMap, StatusCode};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_USER_AGENT: &str = concat!("scs-client/", env!("CARGO_PKG_VERSION"));

/// Header carrying the service-assigned request id
pub const REQUEST_ID_HEADER: &str = "x-amz-request-id";

/// Per-call bundle of signing material, clock and cancellation signal
#[derive(Clone, Default)]
pub struct ExecutionContext {
    pub signer: Option<Arc<dyn Signer>>,
    pub credentials: Option<Credentials>,
    pub clock: ClockOffset,
    pub cancel: CancellationToken,
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("signed", &self.signer.is_some())
            .field("credentials", &self.credentials)
            .field("clock_offset", &self.clock.get())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl ExecutionContext {
    pub fn new(signer: Arc<dyn Signer>, credentials: Credentials, clock: ClockOffset) -> Self {
        Self {
            signer: Some(signer),
            credentials: Some(credentials),
            clock,
            cancel: CancellationToken::new(),
        }
    }

    /// Same signing material and clock, different cancellation token
    pub fn with_cancel(&self, cancel: CancellationToken) -> Self {
        Self {
            cancel,
            ..self.clone()
        }
    }
}

/// Drives requests through sign/send/classify/retry
#[derive(Clone)]
pub struct HttpExecutor {
    transport: Arc<dyn Transport>,
    retry_policy: RetryPolicy,
    user_agent: String,
}

impl HttpExecutor {
    pub fn new(transport: Arc<dyn Transport>, retry_policy: RetryPolicy) -> Self {
        Self {
            transport,
            retry_policy,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }

    /// Prepend a custom user agent; the default one is kept as a suffix
    pub fn with_user_agent(mut self, user_agent: &str) -> Self {
        if !user_agent.is_empty() && user_agent != DEFAULT_USER_AGENT {
            self.user_agent = format!("{}, {}", user_agent, DEFAULT_USER_AGENT);
        }
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Run one logical operation
    pub async fn execute<T, H, E>(
        &self,
        request: &mut Request,
        handler: &H,
        error_handler: &E,
        ctx: &ExecutionContext,
    ) -> Result<T>
    where
        H: ResponseHandler<T> + ?Sized,
        E: ErrorResponseHandler + ?Sized,
        T: Send,
    {
        if !request.headers.contains("user-agent") {
            request.headers.insert("user-agent", self.user_agent.as_str());
        }
        if !request.headers.contains("content-length") {
            if let Some(len) = request.payload.as_ref().and_then(Payload::len) {
                request.headers.insert("content-length", len.to_string());
            }
        }

        let original_headers = request.headers.clone();
        let original_params = request.params.clone();
        let idempotent = request.operation.is_idempotent();
        let max_attempts = self.retry_policy.max_retries().saturating_add(1);
        let mut attempts: u32 = 0;

        loop {
            if ctx.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            attempts += 1;
            if attempts > 1 {
                request.restore(&original_headers, &original_params);
            }

            if let (Some(signer), Some(credentials)) = (&ctx.signer, &ctx.credentials) {
                signer.sign(request, credentials, ctx.clock.get())?;
            }

            let body = open_body(request).await?;
            let outgoing = OutgoingRequest {
                method: request.method.clone(),
                url: request.url(),
                headers: request.headers.clone(),
                body,
            };

            debug!(
                operation = request.operation.name(),
                attempt = attempts,
                method = %outgoing.method,
                url = %outgoing.url,
                "Sending request"
            );

            let outcome = tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => return Err(Error::Cancelled),
                outcome = self.transport.send(outgoing) => outcome,
            };

            let (error, error_headers) = match outcome {
                Ok(mut response) => {
                    let status = response.status();
                    debug!(
                        operation = request.operation.name(),
                        attempt = attempts,
                        status = status.as_u16(),
                        "Received response"
                    );

                    if status.is_success() {
                        let result = handler.handle(&mut response).await;
                        if !handler.needs_connection_left_open() {
                            release(&mut response).await;
                        }
                        return result.map_err(Error::from);
                    }

                    if let Some(location) = redirect_location(&response) {
                        release(&mut response).await;
                        if attempts >= max_attempts {
                            return Err(ClientError::new(
                                ClientErrorKind::TooManyRedirects,
                                format!("Gave up after {} attempts, last redirect to {}", attempts, location),
                            )
                            .into());
                        }
                        if !request.is_replayable() {
                            debug!(
                                location = %location,
                                "Not following redirect, request body cannot be sent again"
                            );
                            return Err(ClientError::new(
                                ClientErrorKind::NonReplayable,
                                format!("Redirected to {} but the request body is not replayable", location),
                            )
                            .into());
                        }
                        debug!(attempt = attempts, location = %location, "Redirecting");
                        request.redirect_to(&location);
                        continue;
                    }

                    let headers = response.headers().clone();
                    let classified = classify_error(&mut response, error_handler).await;
                    release(&mut response).await;
                    match classified {
                        Ok(service_error) => {
                            debug!(
                                status = service_error.status_code,
                                error_code = %service_error.error_code,
                                request_id = ?service_error.request_id,
                                "Service error"
                            );
                            (Error::Service(service_error), Some(headers))
                        }
                        Err(client_error) => (Error::Client(client_error), None),
                    }
                }
                Err(e) => {
                    info!(
                        operation = request.operation.name(),
                        attempt = attempts,
                        "Unable to execute HTTP request: {}",
                        e
                    );
                    (transport_error(e), None)
                }
            };

            let retries = attempts - 1;
            if !self
                .retry_policy
                .should_retry(&error, retries, idempotent, request.is_replayable())
            {
                return Err(error);
            }

            if let (Error::Service(service_error), Some(headers)) = (&error, &error_headers) {
                if service_error.is_clock_skew() {
                    self.correct_clock_skew(ctx, headers, service_error);
                }
            }

            let delay = self.retry_policy.delay(Some(&error), retries);
            debug!(
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                "Retriable error detected, will retry"
            );
            tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// An unparseable skew leaves the previous offset in place rather than resetting it to zero
    fn correct_clock_skew(&self, ctx: &ExecutionContext, headers: &HeaderMap, error: &ServiceError) {
        match parse_clock_skew_offset(headers, &error.message, Utc::now()) {
            Ok(offset) => {
                info!(offset_secs = offset, error_code = %error.error_code, "Adjusting clock offset");
                ctx.clock.set(offset);
            }
            Err(e) => {
                warn!("Unable to parse clock skew offset from response: {}", e);
            }
        }
    }
}

/// Fresh body for this attempt; replayable sources restart from their beginning
async fn open_body(request: &mut Request) -> Result<Body, ClientError> {
    match request.payload.as_mut() {
        None => Ok(Body::Empty),
        Some(Payload::Replayable(source)) => source
            .open()
            .await
            .map_err(|e| ClientError::io("Unable to open request body", e)),
        Some(Payload::OneShot(stream)) => stream.take().map(Body::Stream).ok_or_else(|| {
            ClientError::new(
                ClientErrorKind::NonReplayable,
                "Encountered an exception and stream is not resettable",
            )
        }),
    }
}

fn redirect_location(response: &HttpResponse) -> Option<String> {
    if response.status() != StatusCode::TEMPORARY_REDIRECT {
        return None;
    }
    response.header("location").map(str::to_string)
}

fn transport_error(err: TransportError) -> Error {
    if err.is_local() {
        Error::Client(ClientError::invalid_request("Unable to build HTTP request").with_source(err))
    } else {
        Error::Client(ClientError::transport(err))
    }
}

/// Ask the error handler; if it cannot read the body, 413 and 503 still map to fixed codes
async fn classify_error<E>(response: &mut HttpResponse, error_handler: &E) -> Result<ServiceError, ClientError>
where
    E: ErrorResponseHandler + ?Sized,
{
    let status = response.status_code();
    let request_id = response.header(REQUEST_ID_HEADER).map(str::to_string);
    match error_handler.handle(response).await {
        Ok(mut error) => {
            error.set_status_code(status);
            Ok(error)
        }
        Err(_) if status == 413 => {
            Ok(ServiceError::new(413, REQUEST_ENTITY_TOO_LARGE, REQUEST_ENTITY_TOO_LARGE).with_request_id(request_id))
        }
        Err(_) if status == 503 => {
            Ok(ServiceError::new(503, SERVICE_UNAVAILABLE, SERVICE_UNAVAILABLE).with_request_id(request_id))
        }
        Err(cause) => Err(ClientError::unmarshall(format!(
            "Unable to unmarshall error response ({})",
            cause.message()
        ))
        .with_source(cause)),
    }
}

async fn release(response: &mut HttpResponse) {
    if let Err(e) = response.release().await {
        warn!("Cannot close the response content: {}", e);
    }
}
