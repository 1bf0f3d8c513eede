//! Request authentication
//!
//! The engine only knows the [`Signer`] trait; [`SigV4Signer`] is the
//! implementation the storage client uses.

mod sigv4;

pub use sigv4::{SigV4Signer, MAX_PRESIGN_EXPIRY_SECS};

use crate::http::error::ClientError;
use crate::http::request::Request;
use std::fmt;

/// Access key pair
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: String,
}

impl Credentials {
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// Adds authentication to a request in place
///
/// `clock_offset` is `local - server` in seconds and must be subtracted from
/// the local clock when stamping the request.
pub trait Signer: Send + Sync {
    fn sign(&self, request: &mut Request, credentials: &Credentials, clock_offset: i64) -> Result<(), ClientError>;
}
