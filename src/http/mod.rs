//! Resilient request execution
//!
//! Everything a storage operation needs to go over the wire: the request and
//! response model, replayable bodies, the transport seam, response handlers,
//! the retry policy and the engine that ties them together.

pub mod body;
pub mod clock;
pub mod engine;
pub mod error;
pub mod handler;
pub mod request;
pub mod response;
pub mod retry;
pub mod transport;

pub use body::{Body, FileSegment, OneShotStream, Payload, ReplayableSource};
pub use clock::{ClockOffset, OffsetGuard};
pub use engine::{ExecutionContext, HttpExecutor};
pub use error::{ClientError, ClientErrorKind, Error, Fault, Result, ServiceError};
pub use handler::{ErrorResponseHandler, ResponseHandler};
pub use request::{Headers, Operation, Request};
pub use response::HttpResponse;
pub use retry::{BackoffStrategy, RetryCondition, RetryPolicy};
pub use transport::{HyperTransport, OutgoingRequest, Transport, TransportError};
