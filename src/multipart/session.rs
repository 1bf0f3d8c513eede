//! Upload session and part ledger

use crate::s3::types::CompletedPart;
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Clone, PartialEq, Eq)]
struct PartRecord {
    etag: String,
    size: u64,
}

/// State of one in-flight multipart upload
///
/// The ledger maps part number to the most recent ETag recorded for it and
/// accepts concurrent writes from parallel part uploads.
#[derive(Debug)]
pub struct UploadSession {
    bucket: String,
    key: String,
    upload_id: String,
    part_size: u64,
    ledger: Mutex<BTreeMap<u32, PartRecord>>,
}

impl UploadSession {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>, upload_id: impl Into<String>, part_size: u64) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            upload_id: upload_id.into(),
            part_size,
            ledger: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }

    pub fn part_size(&self) -> u64 {
        self.part_size
    }

    /// Record a part, returning the ETag it replaces
    pub fn record(&self, part_number: u32, etag: impl Into<String>, size: u64) -> Option<String> {
        self.lock()
            .insert(
                part_number,
                PartRecord {
                    etag: etag.into(),
                    size,
                },
            )
            .map(|previous| previous.etag)
    }

    pub fn etag(&self, part_number: u32) -> Option<String> {
        self.lock().get(&part_number).map(|r| r.etag.clone())
    }

    pub fn contains(&self, part_number: u32) -> bool {
        self.lock().contains_key(&part_number)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Ledger in ascending part order, as sent on completion
    pub fn completed_parts(&self) -> Vec<CompletedPart> {
        self.lock()
            .iter()
            .map(|(number, record)| CompletedPart::new(*number, record.etag.clone()))
            .collect()
    }

    /// Sum of recorded part sizes
    pub fn total_size(&self) -> u64 {
        self.lock().values().map(|r| r.size).sum()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<u32, PartRecord>> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_ledger_orders_by_part_number() {
        let session = UploadSession::new("b", "k", "u-1", 5);
        session.record(3, "c", 1);
        session.record(1, "a", 5);
        session.record(2, "b", 5);
        let numbers: Vec<u32> = session.completed_parts().iter().map(|p| p.part_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(session.total_size(), 11);
    }

    #[test]
    fn test_rerecord_keeps_latest_etag() {
        let session = UploadSession::new("b", "k", "u-1", 5);
        assert_eq!(session.record(1, "first", 5), None);
        assert_eq!(session.record(1, "second", 5), Some("first".to_string()));
        assert_eq!(session.etag(1).as_deref(), Some("second"));
        assert_eq!(session.len(), 1);
    }

    #[test]
    fn test_concurrent_records_are_not_lost() {
        let session = Arc::new(UploadSession::new("b", "k", "u-1", 5));
        let handles: Vec<_> = (1..=64u32)
            .map(|n| {
                let session = session.clone();
                std::thread::spawn(move || {
                    session.record(n, format!("etag-{}", n), 1);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(session.len(), 64);
        assert_eq!(session.total_size(), 64);
    }

    #[test]
    fn test_clear() {
        let session = UploadSession::new("b", "k", "u-1", 5);
        session.record(1, "a", 5);
        session.clear();
        assert!(session.is_empty());
        assert!(!session.contains(1));
    }
}
