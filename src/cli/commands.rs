use crate::cli::args::{parse_s3_path, Location, OutputFormat, PutArgs};
use crate::core::Core;
use crate::multipart::{PartSource, UploadSession};
use crate::s3::types::{AccessControlList, CannedAcl, Grantee, ListObjectsRequest, ObjectMetadata, ObjectSummary};
use anyhow::{Context, Result};
use http::Method;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Longest lifetime a presigned URL may have
const MAX_PRESIGN_SECS: u64 = 7 * 24 * 3600;

/// Largest page requested from ListObjects
const LIST_PAGE_SIZE: usize = 1000;

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn require_key(path: &str) -> Result<(String, String)> {
    match parse_s3_path(path)? {
        (bucket, Some(key)) => Ok((bucket, key)),
        (bucket, None) => anyhow::bail!("Object key required: s3://{}/<key>", bucket),
    }
}

/// Key to store a local file under; an empty key or one ending in "/" gets the file name appended
fn destination_key(key: Option<String>, source: &Path) -> Result<String> {
    let file_name = || {
        source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| anyhow::anyhow!("Cannot derive an object key from {}", source.display()))
    };
    match key {
        Some(key) if !key.ends_with('/') => Ok(key),
        Some(prefix) => Ok(format!("{}{}", prefix, file_name()?)),
        None => file_name(),
    }
}

fn upload_progress(total: u64, format: OutputFormat) -> ProgressBar {
    if format == OutputFormat::Json {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total);
    if let Ok(style) =
        ProgressStyle::default_bar().template("[{elapsed_precise}] {bar:40.cyan/blue} {bytes}/{total_bytes} {msg}")
    {
        pb.set_style(style.progress_chars("=>-"));
    }
    pb
}

/// Make bucket command
pub async fn cmd_mb(core: &Core, bucket: &str, acl: Option<&str>, format: OutputFormat) -> Result<()> {
    let (bucket, _) = parse_s3_path(bucket)?;
    let acl = acl
        .map(str::parse::<CannedAcl>)
        .transpose()
        .map_err(anyhow::Error::msg)?;

    core.client()
        .create_bucket(&bucket, acl)
        .await
        .with_context(|| format!("Failed to create bucket {}", bucket))?;

    match format {
        OutputFormat::Json => print_json(&serde_json::json!({ "bucket": bucket, "created": true }))?,
        OutputFormat::Text => println!("Bucket created: s3://{}", bucket),
    }
    Ok(())
}

/// Remove bucket command
pub async fn cmd_rb(core: &Core, bucket: &str, format: OutputFormat) -> Result<()> {
    let (bucket, _) = parse_s3_path(bucket)?;

    core.client()
        .delete_bucket(&bucket)
        .await
        .with_context(|| format!("Failed to remove bucket {}", bucket))?;

    match format {
        OutputFormat::Json => print_json(&serde_json::json!({ "bucket": bucket, "removed": true }))?,
        OutputFormat::Text => println!("Bucket removed: s3://{}", bucket),
    }
    Ok(())
}

#[derive(Serialize)]
struct Listing {
    objects: Vec<ObjectSummary>,
    prefixes: Vec<String>,
    truncated: bool,
}

/// List command: buckets without a path, objects under a prefix otherwise
pub async fn cmd_ls(
    core: &Core,
    path: Option<&str>,
    recursive: bool,
    max_keys: usize,
    format: OutputFormat,
) -> Result<()> {
    let client = core.client();

    let Some(path) = path else {
        let buckets = client.list_buckets().await.context("Failed to list buckets")?;
        match format {
            OutputFormat::Json => print_json(&buckets)?,
            OutputFormat::Text => {
                for bucket in &buckets {
                    println!("[{}] {}/", format_s3_date(bucket.creation_date.as_deref()), bucket.name);
                }
            }
        }
        return Ok(());
    };

    let (bucket, prefix) = parse_s3_path(path)?;
    let mut options = ListObjectsRequest {
        prefix,
        delimiter: if recursive { None } else { Some("/".to_string()) },
        ..Default::default()
    };

    let mut listing = Listing {
        objects: Vec::new(),
        prefixes: Vec::new(),
        truncated: false,
    };
    loop {
        let seen = listing.objects.len() + listing.prefixes.len();
        if max_keys > 0 {
            if seen >= max_keys {
                listing.truncated = true;
                break;
            }
            options.max_keys = Some((max_keys - seen).min(LIST_PAGE_SIZE) as u32);
        }

        let page = client
            .list_objects(&bucket, &options)
            .await
            .with_context(|| format!("Failed to list s3://{}", bucket))?;
        let next = page.continuation_marker();

        if format == OutputFormat::Text {
            for prefix in &page.common_prefixes {
                println!("{:>26} {:>7} {}", "", "PRE", prefix);
            }
            for object in &page.contents {
                println!(
                    "[{}] {:>7} {}",
                    format_s3_date(object.last_modified.as_deref()),
                    format_bytes_compact(object.size),
                    object.key
                );
            }
        }
        listing.objects.extend(page.contents);
        listing.prefixes.extend(page.common_prefixes);

        match next {
            Some(marker) => options.marker = Some(marker),
            None => break,
        }
    }

    if format == OutputFormat::Json {
        print_json(&listing)?;
    }
    Ok(())
}

#[derive(Serialize)]
struct UploadOutput {
    source: String,
    bucket: String,
    key: String,
    size: u64,
    etag: String,
    multipart: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    parts: Option<u32>,
}

/// Upload a local file; goes multipart at the threshold or when `force_multipart` is set
pub async fn cmd_put(core: &Core, args: &PutArgs, force_multipart: bool, format: OutputFormat) -> Result<()> {
    let (bucket, key) = parse_s3_path(&args.destination)?;
    let path = Path::new(&args.source);
    let key = destination_key(key, path)?;

    let mut metadata = ObjectMetadata::new();
    if let Some(content_type) = &args.content_type {
        metadata = metadata.with_content_type(content_type);
    }

    let mut config = core.multipart_config();
    if let Some(part_size) = args.part_size {
        config = config.with_part_size(part_size);
    }
    if let Some(workers) = args.workers {
        config = config.with_concurrency(workers);
    }
    if args.abort_on_failure {
        config = config.with_abort_on_failure(true);
    }

    let source = PartSource::file(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let size = source.len();

    let output = if force_multipart || config.use_multipart(size) {
        info!(
            size,
            part_size = config.part_size,
            workers = config.concurrency,
            "Using multipart upload"
        );
        let pb = upload_progress(size, format);
        let progress = pb.clone();
        let uploader = core.client().multipart(config).with_progress(move |n| progress.inc(n));

        let result = uploader.upload_large(&bucket, &key, &source, &metadata).await;
        match &result {
            Ok(_) => pb.finish_and_clear(),
            Err(_) => pb.abandon_with_message("failed"),
        }
        let done = result.with_context(|| format!("Multipart upload of {} failed", path.display()))?;
        UploadOutput {
            source: args.source.clone(),
            bucket: done.bucket,
            key: done.key,
            size: done.size,
            etag: done.etag,
            multipart: true,
            parts: Some(done.parts),
        }
    } else {
        let result = core
            .client()
            .put_file(&bucket, &key, path, &metadata)
            .await
            .with_context(|| format!("Failed to upload {}", path.display()))?;
        UploadOutput {
            source: args.source.clone(),
            bucket,
            key,
            size,
            etag: result.etag,
            multipart: false,
            parts: None,
        }
    };

    match format {
        OutputFormat::Json => print_json(&output)?,
        OutputFormat::Text => {
            let mut line = format!(
                "{} -> s3://{}/{} ({}",
                output.source,
                output.bucket,
                output.key,
                format_bytes(output.size)
            );
            if let Some(parts) = output.parts {
                let _ = write!(line, ", {} parts", parts);
            }
            line.push(')');
            println!("{}", line);
        }
    }
    Ok(())
}

/// Download an object to a local file
pub async fn cmd_get(core: &Core, source: &str, destination: Option<&str>, format: OutputFormat) -> Result<()> {
    let (bucket, key) = require_key(source)?;

    let file_name = key.rsplit('/').next().unwrap_or(key.as_str()).to_string();
    let mut target = match destination {
        Some(dest) => PathBuf::from(dest),
        None => PathBuf::from(&file_name),
    };
    if target.is_dir() {
        target.push(&file_name);
    }

    let written = core
        .client()
        .get_object_to_file(&bucket, &key, &target)
        .await
        .with_context(|| format!("Failed to download s3://{}/{}", bucket, key))?;

    match format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "bucket": bucket,
            "key": key,
            "destination": target.display().to_string(),
            "size": written,
        }))?,
        OutputFormat::Text => println!(
            "s3://{}/{} -> {} ({})",
            bucket,
            key,
            target.display(),
            format_bytes(written)
        ),
    }
    Ok(())
}

/// Show object metadata
pub async fn cmd_head(core: &Core, path: &str, format: OutputFormat) -> Result<()> {
    let (bucket, key) = require_key(path)?;

    let meta = core
        .client()
        .get_object_metadata(&bucket, &key)
        .await
        .with_context(|| format!("Failed to stat s3://{}/{}", bucket, key))?;

    if format == OutputFormat::Json {
        return print_json(&meta);
    }

    println!("Name      : {}", key);
    if let Some(size) = meta.content_length {
        println!("Size      : {}", format_bytes(size));
    }
    if let Some(content_type) = &meta.content_type {
        println!("Type      : {}", content_type);
    }
    if let Some(etag) = &meta.etag {
        println!("ETag      : {}", etag);
    }
    if let Some(modified) = &meta.last_modified {
        println!("Date      : {}", modified);
    }
    if !meta.user_metadata.is_empty() {
        println!("Metadata  :");
        for (k, v) in &meta.user_metadata {
            println!("  {}: {}", k, v);
        }
    }
    Ok(())
}

/// Remove an object, or every object under a prefix
pub async fn cmd_rm(core: &Core, path: &str, recursive: bool, format: OutputFormat) -> Result<()> {
    let client = core.client();
    let (bucket, key) = parse_s3_path(path)?;

    let keys = if recursive {
        let (objects, _) = client
            .list_all_objects(&bucket, key.as_deref(), None)
            .await
            .with_context(|| format!("Failed to list s3://{}", bucket))?;
        objects.into_iter().map(|o| o.key).collect()
    } else {
        match key {
            Some(key) => vec![key],
            None => anyhow::bail!("Object key required; use --recursive to empty a prefix"),
        }
    };

    debug!(bucket = %bucket, count = keys.len(), "Removing objects");
    for key in &keys {
        client
            .delete_object(&bucket, key)
            .await
            .with_context(|| format!("Failed to remove s3://{}/{}", bucket, key))?;
        if format == OutputFormat::Text {
            println!("Removed: s3://{}/{}", bucket, key);
        }
    }

    if format == OutputFormat::Json {
        print_json(&serde_json::json!({ "bucket": bucket, "removed": keys }))?;
    }
    Ok(())
}

/// Copy between local files and S3, or server-side within S3
pub async fn cmd_cp(core: &Core, source: &str, destination: &str, format: OutputFormat) -> Result<()> {
    match (Location::parse(source)?, Location::parse(destination)?) {
        (Location::Local(_), Location::S3 { .. }) => {
            let args = PutArgs {
                source: source.to_string(),
                destination: destination.to_string(),
                part_size: None,
                workers: None,
                abort_on_failure: false,
                content_type: None,
            };
            cmd_put(core, &args, false, format).await
        }
        (Location::S3 { .. }, Location::Local(dest)) => cmd_get(core, source, Some(dest.as_str()), format).await,
        (Location::S3 { bucket, key }, Location::S3 { bucket: dest_bucket, key: dest_key }) => {
            let key = key.ok_or_else(|| anyhow::anyhow!("Source object key required"))?;
            let dest_key = destination_key(dest_key, Path::new(&key))?;

            let result = core
                .client()
                .copy_object(&bucket, &key, &dest_bucket, &dest_key, None)
                .await
                .with_context(|| format!("Failed to copy s3://{}/{}", bucket, key))?;

            match format {
                OutputFormat::Json => print_json(&serde_json::json!({
                    "source": format!("s3://{}/{}", bucket, key),
                    "destination": format!("s3://{}/{}", dest_bucket, dest_key),
                    "etag": result.etag,
                }))?,
                OutputFormat::Text => println!("s3://{}/{} -> s3://{}/{}", bucket, key, dest_bucket, dest_key),
            }
            Ok(())
        }
        (Location::Local(_), Location::Local(_)) => {
            anyhow::bail!("At least one side of a copy must be an S3 path")
        }
    }
}

fn describe_grantee(grantee: &Grantee) -> String {
    match grantee {
        Grantee::CanonicalUser {
            id,
            display_name: Some(name),
        } => format!("{} ({})", name, id),
        Grantee::CanonicalUser { id, display_name: None } => id.clone(),
        Grantee::Group { uri } => uri.clone(),
        Grantee::Email { address } => address.clone(),
    }
}

fn print_acl(acl: &AccessControlList) {
    if let Some(owner) = &acl.owner {
        match &owner.display_name {
            Some(name) => println!("Owner: {} ({})", name, owner.id),
            None => println!("Owner: {}", owner.id),
        }
    }
    for grant in &acl.grants {
        println!("  {:<13} {}", grant.permission, describe_grantee(&grant.grantee));
    }
}

/// Show the ACL of a bucket or object
pub async fn cmd_getacl(core: &Core, path: &str, format: OutputFormat) -> Result<()> {
    let client = core.client();
    let (bucket, key) = parse_s3_path(path)?;

    let acl = match &key {
        Some(key) => client.get_object_acl(&bucket, key).await,
        None => client.get_bucket_acl(&bucket).await,
    }
    .with_context(|| format!("Failed to read ACL of {}", path))?;

    match format {
        OutputFormat::Json => print_json(&acl)?,
        OutputFormat::Text => print_acl(&acl),
    }
    Ok(())
}

/// Apply a canned ACL to a bucket or object
pub async fn cmd_setacl(core: &Core, path: &str, acl: &str, format: OutputFormat) -> Result<()> {
    let client = core.client();
    let (bucket, key) = parse_s3_path(path)?;
    let acl: CannedAcl = acl.parse().map_err(anyhow::Error::msg)?;

    let applied = match &key {
        Some(key) => client.set_object_acl(&bucket, key, acl).await,
        None => client.set_bucket_acl(&bucket, acl).await,
    };
    applied.with_context(|| format!("Failed to set ACL on {}", path))?;

    match format {
        OutputFormat::Json => print_json(&serde_json::json!({ "path": path, "acl": acl.as_str() }))?,
        OutputFormat::Text => println!("ACL {} applied to {}", acl, path),
    }
    Ok(())
}

fn parse_method(method: &str) -> Result<Method> {
    match method.to_ascii_uppercase().as_str() {
        "GET" => Ok(Method::GET),
        "PUT" => Ok(Method::PUT),
        "HEAD" => Ok(Method::HEAD),
        "DELETE" => Ok(Method::DELETE),
        other => anyhow::bail!("Unsupported presign method: {}", other),
    }
}

/// Print a presigned URL; no request is sent
pub fn cmd_presign(core: &Core, path: &str, expires: u64, method: &str, format: OutputFormat) -> Result<()> {
    let (bucket, key) = require_key(path)?;
    if expires == 0 || expires > MAX_PRESIGN_SECS {
        anyhow::bail!("--expires must be between 1 and {} seconds", MAX_PRESIGN_SECS);
    }
    let method = parse_method(method)?;

    let url = core
        .client()
        .generate_presigned_url(method.clone(), &bucket, &key, Duration::from_secs(expires))
        .context("Failed to presign URL")?;

    match format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "method": method.as_str(),
            "url": url,
            "expires_in": expires,
        }))?,
        OutputFormat::Text => println!("{}", url),
    }
    Ok(())
}

/// List the parts stored for an in-flight upload, optionally aborting it
pub async fn cmd_parts(core: &Core, path: &str, upload_id: &str, abort: bool, format: OutputFormat) -> Result<()> {
    let (bucket, key) = require_key(path)?;
    let uploader = core.uploader();
    let session = UploadSession::new(bucket, key, upload_id, uploader.config().part_size);

    let parts = uploader
        .list_all_parts(&session)
        .await
        .with_context(|| format!("Failed to list parts of upload {}", upload_id))?;
    let total: u64 = parts.iter().map(|p| p.size).sum();

    match format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "upload_id": upload_id,
            "parts": parts,
            "total_size": total,
        }))?,
        OutputFormat::Text => {
            for part in &parts {
                println!(
                    "{:>5}  {:>9}  {}  {}",
                    part.part_number,
                    format_bytes_compact(part.size),
                    part.etag,
                    part.last_modified.as_deref().unwrap_or("")
                );
            }
            println!("{} parts, {}", parts.len(), format_bytes(total));
        }
    }

    if abort {
        uploader
            .abort(&session)
            .await
            .with_context(|| format!("Failed to abort upload {}", upload_id))?;
        if format == OutputFormat::Text {
            println!("Aborted upload {}", upload_id);
        }
    }
    Ok(())
}

/// Format bytes into human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];

    if bytes == 0 {
        return "0 B".to_string();
    }

    let exponent = ((bytes as f64).ln() / 1024_f64.ln()).floor() as usize;
    let exponent = exponent.min(UNITS.len() - 1);
    if exponent == 0 {
        return format!("{} {}", bytes, UNITS[0]);
    }
    format!("{:.2} {}", bytes as f64 / 1024_f64.powi(exponent as i32), UNITS[exponent])
}

/// Compact listing form (0B, 1.0KiB, 10MiB)
pub fn format_bytes_compact(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB", "PiB"];

    if bytes == 0 {
        return "0B".to_string();
    }

    let exponent = ((bytes as f64).ln() / 1024_f64.ln()).floor() as usize;
    let exponent = exponent.min(UNITS.len() - 1);
    let value = bytes as f64 / 1024_f64.powi(exponent as i32);
    match exponent {
        0 => format!("{}B", bytes),
        _ if value >= 10.0 => format!("{:.0}{}", value, UNITS[exponent]),
        _ => format!("{:.1}{}", value, UNITS[exponent]),
    }
}

/// "2026-01-22T20:44:33.219Z" becomes "2026-01-22 20:44:33 UTC"
///
/// Other formats pass through unchanged; a missing date is a blank column.
pub fn format_s3_date(date: Option<&str>) -> String {
    let Some(date) = date else {
        return " ".repeat(23);
    };
    match date.split_once('T') {
        Some((day, rest)) => {
            let time = rest.get(..8).unwrap_or_else(|| rest.trim_end_matches('Z'));
            format!("{} {} UTC", day, time)
        }
        None => date.to_string(),
    }
}
