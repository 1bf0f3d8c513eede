//! Error taxonomy for the request engine
//!
//! Every logical operation ends in exactly one of:
//! - [`ServiceError`]: the service answered with a non-2xx status
//! - [`ClientError`]: nothing classifiable came back (transport failure,
//!   non-replayable body, unmarshalling failure, invalid input)
//! - [`Error::Cancelled`]: the caller's cancellation token fired

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Boxed error used as the `source` of client errors
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Which side is to blame for a service error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Fault {
    /// 4xx: the request was bad
    Client,
    /// 5xx: the service failed
    Service,
}

impl Fault {
    pub fn from_status(status_code: u16) -> Self {
        if status_code >= 500 {
            Fault::Service
        } else {
            Fault::Client
        }
    }
}

/// Error codes the service uses when the request timestamp is out of range
const CLOCK_SKEW_CODES: &[&str] = &[
    "RequestTimeTooSkewed",
    "RequestExpired",
    "InvalidSignatureException",
    "SignatureDoesNotMatch",
];

const THROTTLING_CODES: &[&str] = &[
    "Throttling",
    "ThrottlingException",
    "ProvisionedThroughputExceededException",
    "SlowDown",
];

/// Literal code used when a 413 carries no parsable body
pub const REQUEST_ENTITY_TOO_LARGE: &str = "Request entity too large";

/// Literal code used when a 503 carries no parsable body
pub const SERVICE_UNAVAILABLE: &str = "Service unavailable";

/// The service answered with a non-2xx status
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{error_code} (status {status_code}): {message}")]
pub struct ServiceError {
    pub status_code: u16,
    pub error_code: String,
    pub message: String,
    pub request_id: Option<String>,
    pub host_id: Option<String>,
    pub fault: Fault,
}

impl ServiceError {
    /// Build an error with the fault inferred from the status code
    pub fn new(status_code: u16, error_code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status_code,
            error_code: error_code.into(),
            message: message.into(),
            request_id: None,
            host_id: None,
            fault: Fault::from_status(status_code),
        }
    }

    pub fn with_request_id(mut self, request_id: Option<String>) -> Self {
        self.request_id = request_id;
        self
    }

    pub fn with_host_id(mut self, host_id: Option<String>) -> Self {
        self.host_id = host_id;
        self
    }

    /// Override the status code and re-derive the fault from it
    pub fn set_status_code(&mut self, status_code: u16) {
        self.status_code = status_code;
        self.fault = Fault::from_status(status_code);
    }

    pub fn is_clock_skew(&self) -> bool {
        CLOCK_SKEW_CODES.contains(&self.error_code.as_str())
    }

    pub fn is_throttling(&self) -> bool {
        self.status_code == 429 || THROTTLING_CODES.contains(&self.error_code.as_str())
    }

    pub fn is_request_entity_too_large(&self) -> bool {
        self.error_code == REQUEST_ENTITY_TOO_LARGE
    }
}

/// What kind of local failure a [`ClientError`] represents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientErrorKind {
    /// Sending or receiving over the network failed
    Transport,
    /// The request body cannot be replayed for another attempt
    NonReplayable,
    /// A response body could not be decoded
    Unmarshall,
    /// Local I/O (reading a source file, writing a download)
    Io,
    /// The caller asked for something that cannot be sent
    InvalidRequest,
    /// Redirects kept coming past the attempt ceiling
    TooManyRedirects,
}

/// A failure without a classifiable service response
#[derive(Debug, Error)]
pub struct ClientError {
    kind: ClientErrorKind,
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(source) => write!(f, "{}: {}", self.message, source),
            None => f.write_str(&self.message),
        }
    }
}

impl ClientError {
    pub fn new(kind: ClientErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: Into<BoxError>,
    {
        self.source = Some(source.into());
        self
    }

    pub fn transport<E: Into<BoxError>>(source: E) -> Self {
        Self::new(ClientErrorKind::Transport, "Unable to execute HTTP request").with_source(source)
    }

    pub fn unmarshall(message: impl Into<String>) -> Self {
        Self::new(ClientErrorKind::Unmarshall, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ClientErrorKind::InvalidRequest, message)
    }

    pub fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::new(ClientErrorKind::Io, message).with_source(source)
    }

    pub fn kind(&self) -> ClientErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_transport(&self) -> bool {
        self.kind == ClientErrorKind::Transport
    }
}

impl From<quick_xml::Error> for ClientError {
    fn from(err: quick_xml::Error) -> Self {
        ClientError::unmarshall("XML parse error").with_source(err)
    }
}

/// Terminal outcome of a failed logical operation
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    pub fn as_service(&self) -> Option<&ServiceError> {
        match self {
            Error::Service(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_client(&self) -> Option<&ClientError> {
        match self {
            Error::Client(e) => Some(e),
            _ => None,
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        self.as_service().map(|e| e.status_code)
    }

    pub fn is_clock_skew(&self) -> bool {
        self.as_service().is_some_and(ServiceError::is_clock_skew)
    }

    pub fn is_throttling(&self) -> bool {
        self.as_service().is_some_and(ServiceError::is_throttling)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_from_status() {
        assert_eq!(Fault::from_status(404), Fault::Client);
        assert_eq!(Fault::from_status(499), Fault::Client);
        assert_eq!(Fault::from_status(500), Fault::Service);
        assert_eq!(Fault::from_status(503), Fault::Service);
    }

    #[test]
    fn test_clock_skew_codes() {
        for code in CLOCK_SKEW_CODES {
            assert!(ServiceError::new(403, *code, "").is_clock_skew());
        }
        assert!(!ServiceError::new(403, "AccessDenied", "").is_clock_skew());
    }

    #[test]
    fn test_throttling_detection() {
        assert!(ServiceError::new(503, "SlowDown", "").is_throttling());
        assert!(ServiceError::new(429, "TooManyRequests", "").is_throttling());
        assert!(!ServiceError::new(500, "InternalError", "").is_throttling());
    }

    #[test]
    fn test_set_status_code_updates_fault() {
        let mut err = ServiceError::new(400, "X", "y");
        assert_eq!(err.fault, Fault::Client);
        err.set_status_code(502);
        assert_eq!(err.fault, Fault::Service);
    }

    #[test]
    fn test_client_error_display_includes_source() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        let err = ClientError::transport(io);
        assert!(err.is_transport());
        assert_eq!(err.to_string(), "Unable to execute HTTP request: reset by peer");
    }
}
