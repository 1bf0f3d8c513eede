//! Multipart upload protocol
//!
//! Initiate, upload parts, complete. Each step is an ordinary engine call,
//! so every part inherits retry, backoff and clock-skew handling. The
//! [`UploadSession`] carries the upload id and the part ledger between
//! steps.

pub mod part;
pub mod session;
pub mod upload;

pub use part::{plan_parts, PartDescriptor, PartRange, PartSource};
pub use session::UploadSession;
pub use upload::{MultipartUploader, ProgressFn};

/// Smallest part the service accepts, except for the last one
pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Part numbers run from 1 to this value
pub const MAX_PARTS: u32 = 10_000;

/// Multipart upload configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartConfig {
    /// Target part size in bytes (default: 5 MiB)
    pub part_size: u64,
    /// Parts uploaded at once (default: 1, strictly serial)
    pub concurrency: usize,
    /// Sources at least this large go multipart (default: 64 MiB)
    pub threshold: u64,
    /// Abort the upload when a part fails for good (default: leave parts in place)
    pub abort_on_failure: bool,
}

impl Default for MultipartConfig {
    fn default() -> Self {
        Self {
            part_size: MIN_PART_SIZE,
            concurrency: 1,
            threshold: 64 * 1024 * 1024,
            abort_on_failure: false,
        }
    }
}

impl MultipartConfig {
    pub fn with_part_size(mut self, size: u64) -> Self {
        self.part_size = size;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_threshold(mut self, threshold: u64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_abort_on_failure(mut self, abort: bool) -> Self {
        self.abort_on_failure = abort;
        self
    }

    /// Whether a source of `len` bytes should be uploaded in parts
    pub fn use_multipart(&self, len: u64) -> bool {
        len >= self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MultipartConfig::default();
        assert_eq!(config.part_size, 5 * 1024 * 1024);
        assert_eq!(config.concurrency, 1);
        assert!(!config.abort_on_failure);
        assert!(config.use_multipart(64 * 1024 * 1024));
        assert!(!config.use_multipart(64 * 1024 * 1024 - 1));
    }

    #[test]
    fn test_concurrency_floor() {
        assert_eq!(MultipartConfig::default().with_concurrency(0).concurrency, 1);
    }
}
