//! scs-client - resilient client for S3-compatible object storage
//!
//! Every storage operation funnels through one request engine that retries
//! with backoff, replays bodies, follows redirects and corrects clock skew.
//! Multipart uploads are built from ordinary engine calls.

pub mod auth;
pub mod cli;
pub mod config;
pub mod core;
pub mod http;
pub mod multipart;
pub mod s3;

pub use crate::core::Core;
pub use config::Config;
pub use crate::http::{Error, Result};
pub use multipart::{MultipartConfig, MultipartUploader, UploadSession};
pub use s3::ScsClient;
