//! XML unmarshallers and request body builders
//!
//! Parsers use byte-slice tag matching on `local_name()` and collect text
//! into one reusable buffer.

use crate::http::error::ClientError;
use crate::s3::types::{
    AccessControlList, Bucket, CompleteMultipartUploadResult, CompletedPart, CopyObjectResult, Grant, Grantee,
    InitiateMultipartUploadResult, ObjectListing, ObjectSummary, Owner, PartPage, PartSummary,
};
use quick_xml::events::Event;
use quick_xml::Reader;

type Result<T> = std::result::Result<T, ClientError>;

fn reader(xml: &[u8]) -> Reader<&[u8]> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text_start = true;
    reader.config_mut().trim_text_end = true;
    reader
}

/// The `<Error>` document the service sends with non-2xx responses
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorDocument {
    pub code: String,
    pub message: String,
    pub request_id: Option<String>,
    pub host_id: Option<String>,
}

pub fn parse_error(xml: &[u8]) -> Result<ErrorDocument> {
    let mut reader = reader(xml);
    let mut doc = ErrorDocument::default();
    let mut seen_root = false;
    let mut current_text = String::with_capacity(128);

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                if e.local_name().as_ref() == b"Error" {
                    seen_root = true;
                }
                current_text.clear();
            }
            Event::Text(e) => {
                current_text.clear();
                current_text.push_str(&e.unescape()?);
            }
            Event::End(e) => {
                match e.local_name().as_ref() {
                    b"Code" => doc.code = std::mem::take(&mut current_text),
                    b"Message" => doc.message = std::mem::take(&mut current_text),
                    b"RequestId" => doc.request_id = Some(std::mem::take(&mut current_text)),
                    b"HostId" => doc.host_id = Some(std::mem::take(&mut current_text)),
                    _ => {}
                }
                current_text.clear();
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !seen_root || doc.code.is_empty() {
        return Err(ClientError::unmarshall("response is not an Error document"));
    }
    Ok(doc)
}

/// ListAllMyBucketsResult
pub fn parse_list_buckets(xml: &[u8]) -> Result<(Option<Owner>, Vec<Bucket>)> {
    let mut reader = reader(xml);
    let mut owner: Option<Owner> = None;
    let mut buckets = Vec::new();
    let mut current: Option<Bucket> = None;
    let mut in_owner = false;
    let mut current_text = String::with_capacity(128);

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"Owner" => {
                    in_owner = true;
                    owner = Some(Owner::default());
                }
                b"Bucket" => {
                    current = Some(Bucket {
                        name: String::new(),
                        creation_date: None,
                    })
                }
                _ => {}
            },
            Event::Text(e) => {
                current_text.clear();
                current_text.push_str(&e.unescape()?);
            }
            Event::End(e) => {
                match e.local_name().as_ref() {
                    b"ID" if in_owner => {
                        if let Some(ref mut o) = owner {
                            o.id = std::mem::take(&mut current_text);
                        }
                    }
                    b"DisplayName" if in_owner => {
                        if let Some(ref mut o) = owner {
                            o.display_name = Some(std::mem::take(&mut current_text));
                        }
                    }
                    b"Owner" => in_owner = false,
                    b"Name" => {
                        if let Some(ref mut b) = current {
                            b.name = std::mem::take(&mut current_text);
                        }
                    }
                    b"CreationDate" => {
                        if let Some(ref mut b) = current {
                            b.creation_date = Some(std::mem::take(&mut current_text));
                        }
                    }
                    b"Bucket" => {
                        if let Some(b) = current.take() {
                            buckets.push(b);
                        }
                    }
                    _ => {}
                }
                current_text.clear();
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok((owner, buckets))
}

/// ListBucketResult (marker-based listing)
pub fn parse_list_objects(xml: &[u8]) -> Result<ObjectListing> {
    let mut reader = reader(xml);
    let mut listing = ObjectListing::default();
    let mut current: Option<ObjectSummary> = None;
    let mut in_common_prefixes = false;
    let mut in_owner = false;
    let mut owner = Owner::default();
    let mut seen_root = false;
    let mut current_text = String::with_capacity(256);

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"ListBucketResult" => seen_root = true,
                b"Contents" => current = Some(ObjectSummary::new(String::new(), 0)),
                b"CommonPrefixes" => in_common_prefixes = true,
                b"Owner" => {
                    in_owner = true;
                    owner = Owner::default();
                }
                _ => {}
            },
            Event::Text(e) => {
                current_text.clear();
                current_text.push_str(&e.unescape()?);
            }
            Event::End(e) => {
                let name = e.local_name();
                if in_owner {
                    match name.as_ref() {
                        b"ID" => owner.id = std::mem::take(&mut current_text),
                        b"DisplayName" => owner.display_name = Some(std::mem::take(&mut current_text)),
                        b"Owner" => {
                            in_owner = false;
                            if let Some(ref mut obj) = current {
                                obj.owner = Some(std::mem::take(&mut owner));
                            }
                        }
                        _ => {}
                    }
                    current_text.clear();
                    continue;
                }

                if let Some(ref mut obj) = current {
                    match name.as_ref() {
                        b"Key" => obj.key = std::mem::take(&mut current_text),
                        b"Size" => obj.size = current_text.parse().unwrap_or(0),
                        b"LastModified" => obj.last_modified = Some(std::mem::take(&mut current_text)),
                        b"ETag" => obj.etag = Some(current_text.trim_matches('"').to_string()),
                        b"StorageClass" => obj.storage_class = Some(std::mem::take(&mut current_text)),
                        b"Contents" => {
                            if let Some(obj) = current.take() {
                                listing.contents.push(obj);
                            }
                        }
                        _ => {}
                    }
                } else {
                    match name.as_ref() {
                        b"Prefix" if in_common_prefixes => {
                            listing.common_prefixes.push(std::mem::take(&mut current_text));
                        }
                        b"CommonPrefixes" => in_common_prefixes = false,
                        b"Name" => listing.bucket = std::mem::take(&mut current_text),
                        b"Prefix" => listing.prefix = non_empty(&mut current_text),
                        b"Marker" => listing.marker = non_empty(&mut current_text),
                        b"NextMarker" => listing.next_marker = non_empty(&mut current_text),
                        b"Delimiter" => listing.delimiter = non_empty(&mut current_text),
                        b"MaxKeys" => listing.max_keys = current_text.parse().ok(),
                        b"IsTruncated" => listing.is_truncated = current_text == "true",
                        _ => {}
                    }
                }
                current_text.clear();
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !seen_root {
        return Err(ClientError::unmarshall("missing ListBucketResult element"));
    }
    Ok(listing)
}

/// AccessControlPolicy
pub fn parse_access_control_policy(xml: &[u8]) -> Result<AccessControlList> {
    let mut reader = reader(xml);
    let mut acl = AccessControlList::default();
    let mut in_owner = false;
    let mut in_grantee = false;
    let mut grantee_type = String::new();
    let mut grantee_id = String::new();
    let mut grantee_name: Option<String> = None;
    let mut grantee_uri = String::new();
    let mut grantee_email = String::new();
    let mut permission = String::new();
    let mut current_text = String::with_capacity(128);

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"Owner" => {
                    in_owner = true;
                    acl.owner = Some(Owner::default());
                }
                b"Grantee" => {
                    in_grantee = true;
                    grantee_type.clear();
                    for attr in e.attributes().flatten() {
                        if attr.key.local_name().as_ref() == b"type" {
                            grantee_type = attr.unescape_value()?.into_owned();
                        }
                    }
                }
                _ => {}
            },
            Event::Text(e) => {
                current_text.clear();
                current_text.push_str(&e.unescape()?);
            }
            Event::End(e) => {
                match e.local_name().as_ref() {
                    b"ID" if in_owner => {
                        if let Some(ref mut o) = acl.owner {
                            o.id = std::mem::take(&mut current_text);
                        }
                    }
                    b"DisplayName" if in_owner => {
                        if let Some(ref mut o) = acl.owner {
                            o.display_name = Some(std::mem::take(&mut current_text));
                        }
                    }
                    b"Owner" => in_owner = false,
                    b"ID" if in_grantee => grantee_id = std::mem::take(&mut current_text),
                    b"DisplayName" if in_grantee => grantee_name = Some(std::mem::take(&mut current_text)),
                    b"URI" if in_grantee => grantee_uri = std::mem::take(&mut current_text),
                    b"EmailAddress" if in_grantee => grantee_email = std::mem::take(&mut current_text),
                    b"Grantee" => in_grantee = false,
                    b"Permission" => permission = std::mem::take(&mut current_text),
                    b"Grant" => {
                        let grantee = match grantee_type.as_str() {
                            "Group" => Grantee::Group {
                                uri: std::mem::take(&mut grantee_uri),
                            },
                            "AmazonCustomerByEmail" => Grantee::Email {
                                address: std::mem::take(&mut grantee_email),
                            },
                            _ => Grantee::CanonicalUser {
                                id: std::mem::take(&mut grantee_id),
                                display_name: grantee_name.take(),
                            },
                        };
                        acl.grants.push(Grant {
                            grantee,
                            permission: std::mem::take(&mut permission),
                        });
                    }
                    _ => {}
                }
                current_text.clear();
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(acl)
}

/// InitiateMultipartUploadResult
pub fn parse_initiate_multipart(xml: &[u8]) -> Result<InitiateMultipartUploadResult> {
    let mut reader = reader(xml);
    let mut result = InitiateMultipartUploadResult {
        bucket: String::new(),
        key: String::new(),
        upload_id: String::new(),
    };
    let mut current_text = String::with_capacity(128);

    loop {
        match reader.read_event()? {
            Event::Text(e) => {
                current_text.clear();
                current_text.push_str(&e.unescape()?);
            }
            Event::End(e) => {
                match e.local_name().as_ref() {
                    b"Bucket" => result.bucket = std::mem::take(&mut current_text),
                    b"Key" => result.key = std::mem::take(&mut current_text),
                    b"UploadId" => result.upload_id = std::mem::take(&mut current_text),
                    _ => {}
                }
                current_text.clear();
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if result.upload_id.is_empty() {
        return Err(ClientError::unmarshall("no UploadId in InitiateMultipartUpload response"));
    }
    Ok(result)
}

/// ListPartsResult
pub fn parse_list_parts(xml: &[u8]) -> Result<PartPage> {
    let mut reader = reader(xml);
    let mut page = PartPage::default();
    let mut current: Option<PartSummary> = None;
    let mut seen_root = false;
    let mut current_text = String::with_capacity(128);

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"ListPartsResult" => seen_root = true,
                b"Part" => {
                    current = Some(PartSummary {
                        part_number: 0,
                        etag: String::new(),
                        size: 0,
                        last_modified: None,
                    })
                }
                _ => {}
            },
            Event::Text(e) => {
                current_text.clear();
                current_text.push_str(&e.unescape()?);
            }
            Event::End(e) => {
                if let Some(ref mut part) = current {
                    match e.local_name().as_ref() {
                        b"PartNumber" => part.part_number = current_text.parse().unwrap_or(0),
                        b"ETag" => part.etag = current_text.trim_matches('"').to_string(),
                        b"Size" => part.size = current_text.parse().unwrap_or(0),
                        b"LastModified" => part.last_modified = Some(std::mem::take(&mut current_text)),
                        b"Part" => {
                            if let Some(part) = current.take() {
                                page.parts.push(part);
                            }
                        }
                        _ => {}
                    }
                } else {
                    match e.local_name().as_ref() {
                        b"UploadId" => page.upload_id = std::mem::take(&mut current_text),
                        b"PartNumberMarker" => page.part_number_marker = current_text.parse().ok(),
                        b"NextPartNumberMarker" => page.next_part_number_marker = current_text.parse().ok(),
                        b"MaxParts" => page.max_parts = current_text.parse().ok(),
                        b"IsTruncated" => page.is_truncated = current_text == "true",
                        _ => {}
                    }
                }
                current_text.clear();
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !seen_root {
        return Err(ClientError::unmarshall("missing ListPartsResult element"));
    }
    Ok(page)
}

/// CompleteMultipartUploadResult
///
/// The service can answer 200 and still report a failure in an `<Error>`
/// body; that case is returned as an unmarshalling error naming the code.
pub fn parse_complete_multipart(xml: &[u8]) -> Result<CompleteMultipartUploadResult> {
    let mut reader = reader(xml);
    let mut result = CompleteMultipartUploadResult::default();
    let mut error_code: Option<String> = None;
    let mut in_error = false;
    let mut current_text = String::with_capacity(128);

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                if e.local_name().as_ref() == b"Error" {
                    in_error = true;
                }
            }
            Event::Text(e) => {
                current_text.clear();
                current_text.push_str(&e.unescape()?);
            }
            Event::End(e) => {
                match e.local_name().as_ref() {
                    b"Code" if in_error => error_code = Some(std::mem::take(&mut current_text)),
                    b"Location" => result.location = Some(std::mem::take(&mut current_text)),
                    b"Bucket" => result.bucket = std::mem::take(&mut current_text),
                    b"Key" => result.key = std::mem::take(&mut current_text),
                    b"ETag" => result.etag = current_text.trim_matches('"').to_string(),
                    _ => {}
                }
                current_text.clear();
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(code) = error_code {
        return Err(ClientError::unmarshall(format!("CompleteMultipartUpload failed: {}", code)));
    }
    Ok(result)
}

/// CopyObjectResult
pub fn parse_copy_object(xml: &[u8]) -> Result<CopyObjectResult> {
    let mut reader = reader(xml);
    let mut result = CopyObjectResult {
        etag: String::new(),
        last_modified: None,
    };
    let mut current_text = String::with_capacity(128);

    loop {
        match reader.read_event()? {
            Event::Text(e) => {
                current_text.clear();
                current_text.push_str(&e.unescape()?);
            }
            Event::End(e) => {
                match e.local_name().as_ref() {
                    b"ETag" => result.etag = current_text.trim_matches('"').to_string(),
                    b"LastModified" => result.last_modified = Some(std::mem::take(&mut current_text)),
                    _ => {}
                }
                current_text.clear();
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(result)
}

/// CompleteMultipartUpload request body; `parts` must already be sorted
pub fn build_complete_multipart(parts: &[CompletedPart]) -> String {
    let mut xml = String::with_capacity(64 + parts.len() * 96);
    xml.push_str("<CompleteMultipartUpload>");
    for part in parts {
        xml.push_str("<Part><PartNumber>");
        xml.push_str(&part.part_number.to_string());
        xml.push_str("</PartNumber><ETag>\"");
        xml_escape_into(&mut xml, &part.etag);
        xml.push_str("\"</ETag></Part>");
    }
    xml.push_str("</CompleteMultipartUpload>");
    xml
}

/// Escape XML special characters into an existing buffer
pub fn xml_escape_into(buf: &mut String, s: &str) {
    for ch in s.chars() {
        match ch {
            '&' => buf.push_str("&amp;"),
            '<' => buf.push_str("&lt;"),
            '>' => buf.push_str("&gt;"),
            '"' => buf.push_str("&quot;"),
            '\'' => buf.push_str("&apos;"),
            _ => buf.push(ch),
        }
    }
}

fn non_empty(text: &mut String) -> Option<String> {
    if text.is_empty() {
        None
    } else {
        Some(std::mem::take(text))
    }
}
