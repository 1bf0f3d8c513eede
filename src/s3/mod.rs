//! Storage façade
//!
//! This module provides:
//! - `ScsClient`, one method per storage operation
//! - XML unmarshallers for service responses
//! - The error handler that turns `<Error>` documents into service errors

pub mod client;
pub mod handlers;
pub mod types;
pub mod xml;

// Re-export main types for convenience
pub use client::ScsClient;
pub use handlers::S3ErrorResponseHandler;
pub use types::{
    AccessControlList, Bucket, CannedAcl, CopyObjectResult, Grant, Grantee, ListObjectsRequest, ObjectListing,
    ObjectMetadata, ObjectSummary, Owner, PutObjectResult,
    // Multipart upload types
    CompleteMultipartUploadResult, CompletedPart, CompletedUpload, InitiateMultipartUploadResult, PartPage,
    PartSummary,
};
