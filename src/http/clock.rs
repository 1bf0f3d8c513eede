//! Clock offset between this machine and the storage service
//!
//! The offset is `local - server` in seconds. Signers subtract it from the
//! local clock so request timestamps match the server's notion of "now".
//! One handle is shared by every request of a client (last writer wins);
//! separate clients own separate handles.

use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, Utc};
use http::HeaderMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Shared, atomically replaced clock offset in seconds
#[derive(Debug, Clone, Default)]
pub struct ClockOffset(Arc<AtomicI64>);

impl ClockOffset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(seconds: i64) -> Self {
        Self(Arc::new(AtomicI64::new(seconds)))
    }

    pub fn get(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }

    pub fn set(&self, seconds: i64) {
        self.0.store(seconds, Ordering::Relaxed);
    }

    /// Local time corrected by the current offset
    pub fn now(&self) -> DateTime<Utc> {
        Utc::now() - ChronoDuration::seconds(self.get())
    }

    /// Temporarily replace the offset, e.g. for a long download whose
    /// signature must stay valid for its whole duration
    ///
    /// Every other request sharing this handle observes the override until
    /// the guard is dropped or [`OffsetGuard::restore`] is called.
    pub fn override_for(&self, seconds: i64) -> OffsetGuard {
        let previous = self.0.swap(seconds, Ordering::Relaxed);
        OffsetGuard {
            clock: self.clone(),
            previous,
            restored: false,
        }
    }
}

/// Restores the previous offset when dropped
#[must_use = "the override ends as soon as the guard is dropped"]
#[derive(Debug)]
pub struct OffsetGuard {
    clock: ClockOffset,
    previous: i64,
    restored: bool,
}

impl OffsetGuard {
    pub fn previous(&self) -> i64 {
        self.previous
    }

    pub fn restore(mut self) {
        self.restore_inner();
    }

    fn restore_inner(&mut self) {
        if !self.restored {
            self.clock.set(self.previous);
            self.restored = true;
        }
    }
}

impl Drop for OffsetGuard {
    fn drop(&mut self) {
        self.restore_inner();
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClockSkewParseError {
    #[error("invalid Date header: {0}")]
    DateHeader(String),

    #[error("no server time in error message: {0}")]
    Message(String),
}

/// Compute the offset implied by a clock-skew error response
///
/// The server time comes from the `Date` header (RFC 1123) or, when the
/// header is absent, from the error message, which embeds it as
/// `... (20130401T040113Z - 15 min.)`.
pub fn parse_clock_skew_offset(
    headers: &HeaderMap,
    message: &str,
    now: DateTime<Utc>,
) -> Result<i64, ClockSkewParseError> {
    let server = match headers.get(http::header::DATE) {
        Some(value) => {
            let raw = value
                .to_str()
                .map_err(|_| ClockSkewParseError::DateHeader("<non-ascii>".to_string()))?;
            DateTime::parse_from_rfc2822(raw)
                .map_err(|_| ClockSkewParseError::DateHeader(raw.to_string()))?
                .with_timezone(&Utc)
        }
        None => server_date_from_message(message)?,
    };

    let diff_ms = (now - server).num_milliseconds();
    Ok((diff_ms as f64 / 1000.0).round() as i64)
}

fn server_date_from_message(message: &str) -> Result<DateTime<Utc>, ClockSkewParseError> {
    let err = || ClockSkewParseError::Message(message.to_string());
    let start = message.find('(').ok_or_else(err)? + 1;
    let end = message
        .find(" + 15")
        .or_else(|| message.find(" - 15"))
        .ok_or_else(err)?;
    let stamp = message.get(start..end).ok_or_else(err)?;
    NaiveDateTime::parse_from_str(stamp, "%Y%m%dT%H%M%SZ")
        .map(|naive| naive.and_utc())
        .map_err(|_| err())
}
