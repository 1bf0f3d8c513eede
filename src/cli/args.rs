use clap::{Args, Parser, Subcommand};

/// scs - resilient client for S3-compatible object storage
#[derive(Parser, Debug)]
#[command(name = "scs")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file path (environment variables are used when omitted)
    #[arg(long, global = true, env = "SCS_CONFIG")]
    pub config: Option<String>,

    /// Profile to use from config
    #[arg(long, global = true, env = "SCS_PROFILE")]
    pub profile: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    /// Retries after the first attempt, overriding the configured value
    #[arg(long, global = true)]
    pub retries: Option<u32>,

    /// Use plain HTTP for endpoints given without a scheme
    #[arg(long, global = true)]
    pub http: bool,

    /// Disable TLS certificate verification
    #[arg(long, global = true)]
    pub insecure: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn output_format(&self) -> OutputFormat {
        if self.json {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Make a bucket
    Mb {
        /// Bucket (s3://bucket)
        bucket: String,

        /// Canned ACL applied on creation
        #[arg(long)]
        acl: Option<String>,
    },

    /// Remove an empty bucket
    Rb {
        /// Bucket (s3://bucket)
        bucket: String,
    },

    /// List buckets, or objects under a prefix
    Ls {
        /// S3 path (s3://bucket/prefix); lists buckets when omitted
        path: Option<String>,

        /// List every key instead of grouping by "/"
        #[arg(short, long)]
        recursive: bool,

        /// Stop after this many entries (0 = unlimited)
        #[arg(long, default_value = "0")]
        max_keys: usize,
    },

    /// Upload a file, switching to multipart above the threshold
    Put(PutArgs),

    /// Upload a file as a multipart upload regardless of size
    Mpu(PutArgs),

    /// Download an object to a file
    Get {
        /// S3 path (s3://bucket/key)
        source: String,

        /// Local file; defaults to the key's last path segment
        destination: Option<String>,
    },

    /// Show object metadata
    Head {
        /// S3 path (s3://bucket/key)
        path: String,
    },

    /// Remove an object, or every object under a prefix
    Rm {
        /// S3 path (s3://bucket/key)
        path: String,

        /// Remove every key under the prefix
        #[arg(short, long)]
        recursive: bool,
    },

    /// Copy between local files and S3, or within S3
    Cp {
        /// Source (local path or s3://bucket/key)
        source: String,

        /// Destination (local path or s3://bucket/key)
        destination: String,
    },

    /// Show the ACL of a bucket or object
    Getacl {
        /// S3 path (s3://bucket or s3://bucket/key)
        path: String,
    },

    /// Apply a canned ACL to a bucket or object
    Setacl {
        /// S3 path (s3://bucket or s3://bucket/key)
        path: String,

        /// private, public-read, public-read-write or authenticated-read
        acl: String,
    },

    /// Print a presigned URL
    Presign {
        /// S3 path (s3://bucket/key)
        path: String,

        /// Lifetime in seconds (at most 7 days)
        #[arg(long, default_value = "3600")]
        expires: u64,

        /// HTTP method the URL is valid for
        #[arg(long, default_value = "GET")]
        method: String,
    },

    /// List the parts stored for an in-flight multipart upload
    Parts {
        /// S3 path (s3://bucket/key)
        path: String,

        /// Upload ID returned when the upload was initiated
        #[arg(long)]
        upload_id: String,

        /// Abort the upload after listing
        #[arg(long)]
        abort: bool,
    },
}

/// Options shared by `put` and `mpu`
#[derive(Args, Debug, Clone)]
pub struct PutArgs {
    /// Local file to upload
    pub source: String,

    /// Destination (s3://bucket/key); a trailing "/" appends the file name
    pub destination: String,

    /// Part size for multipart uploads (e.g. 5M, 64M)
    #[arg(long, value_parser = parse_size)]
    pub part_size: Option<u64>,

    /// Parts uploaded at once
    #[arg(long)]
    pub workers: Option<usize>,

    /// Abort the upload if a part fails for good
    #[arg(long)]
    pub abort_on_failure: bool,

    /// Content type of the stored object
    #[arg(long)]
    pub content_type: Option<String>,
}

/// Either side of a copy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    S3 { bucket: String, key: Option<String> },
    Local(String),
}

impl Location {
    pub fn parse(path: &str) -> anyhow::Result<Self> {
        if is_s3_path(path) {
            let (bucket, key) = parse_s3_path(path)?;
            Ok(Location::S3 { bucket, key })
        } else {
            Ok(Location::Local(path.to_string()))
        }
    }
}

pub fn is_s3_path(path: &str) -> bool {
    let path = path.trim();
    path.starts_with("s3://") || path.starts_with("s3/")
}

/// Split an S3 path into bucket and optional key
///
/// Accepts both `s3://bucket/key` and `s3/bucket/key`.
pub fn parse_s3_path(path: &str) -> anyhow::Result<(String, Option<String>)> {
    let path = path.trim();

    let stripped = if let Some(p) = path.strip_prefix("s3://") {
        p
    } else if let Some(p) = path.strip_prefix("s3/") {
        p
    } else {
        anyhow::bail!("Invalid S3 path '{}'. Expected: s3://bucket/key", path);
    };

    let (bucket, key) = match stripped.split_once('/') {
        Some((bucket, key)) => (bucket, key),
        None => (stripped, ""),
    };
    if bucket.is_empty() {
        anyhow::bail!("Bucket name cannot be empty");
    }

    let key = if key.is_empty() { None } else { Some(key.to_string()) };
    Ok((bucket.to_string(), key))
}

/// Parse a byte count with an optional binary suffix (K, M, G, T; "iB"/"B" allowed)
pub fn parse_size(size: &str) -> anyhow::Result<u64> {
    let upper = size.trim().to_ascii_uppercase();
    let digits = upper
        .trim_end_matches("IB")
        .trim_end_matches('B');
    let (number, multiplier) = match digits.chars().last() {
        Some('K') => (&digits[..digits.len() - 1], 1u64 << 10),
        Some('M') => (&digits[..digits.len() - 1], 1u64 << 20),
        Some('G') => (&digits[..digits.len() - 1], 1u64 << 30),
        Some('T') => (&digits[..digits.len() - 1], 1u64 << 40),
        _ => (digits, 1),
    };

    let number: u64 = number
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid size format: {}", size))?;
    number
        .checked_mul(multiplier)
        .ok_or_else(|| anyhow::anyhow!("Size out of range: {}", size))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_s3_path() {
        assert_eq!(parse_s3_path("s3/mybucket").unwrap(), ("mybucket".to_string(), None));
        assert_eq!(
            parse_s3_path("s3/mybucket/path/to/object.txt").unwrap(),
            ("mybucket".to_string(), Some("path/to/object.txt".to_string()))
        );
        assert_eq!(parse_s3_path("s3://mybucket/").unwrap(), ("mybucket".to_string(), None));
        assert_eq!(
            parse_s3_path("s3://mybucket/mykey").unwrap(),
            ("mybucket".to_string(), Some("mykey".to_string()))
        );

        assert!(parse_s3_path("mybucket").is_err());
        assert!(parse_s3_path("s3://").is_err());
        assert!(parse_s3_path("http://mybucket").is_err());
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("1024").unwrap(), 1024);
        assert_eq!(parse_size("5M").unwrap(), 5 * 1024 * 1024);
        assert_eq!(parse_size("5mb").unwrap(), 5 * 1024 * 1024);
        assert_eq!(parse_size("8MiB").unwrap(), 8 * 1024 * 1024);
        assert_eq!(parse_size("1G").unwrap(), 1 << 30);
        assert!(parse_size("lots").is_err());
        assert!(parse_size("").is_err());
    }

    #[test]
    fn test_location() {
        assert_eq!(Location::parse("./data.bin").unwrap(), Location::Local("./data.bin".into()));
        assert_eq!(
            Location::parse("s3://b/k").unwrap(),
            Location::S3 {
                bucket: "b".into(),
                key: Some("k".into())
            }
        );
    }

    #[test]
    fn test_cli_parses_global_flags() {
        let cli = Cli::try_parse_from([
            "scs", "--retries", "2", "--http", "--json", "put", "a.bin", "s3://b/k", "--part-size", "8M", "--workers", "4",
        ])
        .unwrap();
        assert_eq!(cli.retries, Some(2));
        assert!(cli.http);
        assert_eq!(cli.output_format(), OutputFormat::Json);
        match cli.command {
            Commands::Put(args) => {
                assert_eq!(args.part_size, Some(8 * 1024 * 1024));
                assert_eq!(args.workers, Some(4));
                assert!(!args.abort_on_failure);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
