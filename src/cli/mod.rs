//! Command-line interface for `scs`
//!
//! ```bash
//! scs mb s3://photos
//! scs put ./video.mp4 s3://photos/2026/ --part-size 16M --workers 4
//! scs ls s3://photos/2026/ --json
//! scs presign s3://photos/2026/video.mp4 --expires 600
//! scs parts s3://photos/2026/video.mp4 --upload-id <ID> --abort
//! ```

pub mod args;
pub mod commands;

pub use args::{Cli, Commands, OutputFormat, PutArgs};
