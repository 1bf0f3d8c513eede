//! Partitioning a source into numbered parts

use crate::http::body::{FileSegment, ReplayableSource};
use crate::http::error::ClientError;
use crate::multipart::{MAX_PARTS, MIN_PART_SIZE};
use bytes::Bytes;
use std::io;
use std::path::{Path, PathBuf};

/// Byte range of one part; part numbers start at 1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartRange {
    pub part_number: u32,
    pub offset: u64,
    pub len: u64,
}

/// Split `total` bytes into parts of `part_size`, the last one possibly shorter
///
/// An empty source still yields one empty part. Sources needing more than
/// one part must use parts of at least [`MIN_PART_SIZE`].
pub fn plan_parts(total: u64, part_size: u64) -> Result<Vec<PartRange>, ClientError> {
    if part_size == 0 {
        return Err(ClientError::invalid_request("part size must be greater than zero"));
    }
    let count = total.div_ceil(part_size).max(1);
    if count > 1 && part_size < MIN_PART_SIZE {
        return Err(ClientError::invalid_request(format!(
            "part size {} is below the minimum of {} bytes",
            part_size, MIN_PART_SIZE
        )));
    }
    if count > MAX_PARTS as u64 {
        return Err(ClientError::invalid_request(format!(
            "{} bytes in parts of {} needs {} parts, more than the maximum of {}",
            total, part_size, count, MAX_PARTS
        )));
    }

    Ok((0..count)
        .map(|i| {
            let offset = i * part_size;
            PartRange {
                part_number: (i + 1) as u32,
                offset,
                len: part_size.min(total - offset),
            }
        })
        .collect())
}

/// Where the bytes of a large upload come from
#[derive(Debug, Clone)]
pub enum PartSource {
    Bytes(Bytes),
    File { path: PathBuf, len: u64 },
}

impl PartSource {
    /// File source sized from its current metadata
    pub async fn file(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let len = tokio::fs::metadata(&path).await?.len();
        Ok(PartSource::File { path, len })
    }

    pub fn len(&self) -> u64 {
        match self {
            PartSource::Bytes(b) => b.len() as u64,
            PartSource::File { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replayable content for one range of this source
    pub fn slice(&self, range: &PartRange) -> ReplayableSource {
        match self {
            PartSource::Bytes(b) => {
                let start = range.offset as usize;
                ReplayableSource::Bytes(b.slice(start..start + range.len as usize))
            }
            PartSource::File { path, .. } => {
                ReplayableSource::File(FileSegment::new(path.clone(), range.offset, range.len))
            }
        }
    }

    /// Split into parts of `part_size`
    pub fn partition(&self, part_size: u64) -> Result<Vec<PartDescriptor>, ClientError> {
        Ok(plan_parts(self.len(), part_size)?
            .into_iter()
            .map(|range| PartDescriptor {
                part_number: range.part_number,
                content: self.slice(&range),
            })
            .collect())
    }
}

impl From<Bytes> for PartSource {
    fn from(b: Bytes) -> Self {
        PartSource::Bytes(b)
    }
}

/// One part ready to upload
#[derive(Debug, Clone)]
pub struct PartDescriptor {
    pub part_number: u32,
    pub content: ReplayableSource,
}

impl PartDescriptor {
    pub fn new(part_number: u32, content: ReplayableSource) -> Self {
        Self { part_number, content }
    }

    pub fn len(&self) -> u64 {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1024 * 1024;

    #[test]
    fn test_twelve_mib_in_five_mib_parts() {
        let parts = plan_parts(12 * MIB, 5 * MIB).unwrap();
        let sizes: Vec<u64> = parts.iter().map(|p| p.len).collect();
        assert_eq!(sizes, vec![5 * MIB, 5 * MIB, 2 * MIB]);
        let numbers: Vec<u32> = parts.iter().map(|p| p.part_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(parts[2].offset, 10 * MIB);
    }

    #[test]
    fn test_exact_multiple() {
        let parts = plan_parts(10 * MIB, 5 * MIB).unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1].len, 5 * MIB);
    }

    #[test]
    fn test_part_count_and_sizes_cover_source() {
        for total in [1, 5 * MIB - 1, 5 * MIB, 5 * MIB + 1, 23 * MIB + 17] {
            let parts = plan_parts(total, 5 * MIB).unwrap();
            assert_eq!(parts.len() as u64, total.div_ceil(5 * MIB));
            assert_eq!(parts.iter().map(|p| p.len).sum::<u64>(), total);
            for (i, part) in parts.iter().enumerate() {
                assert_eq!(part.part_number, i as u32 + 1);
            }
        }
    }

    #[test]
    fn test_empty_source_is_one_part() {
        let parts = plan_parts(0, 5 * MIB).unwrap();
        assert_eq!(parts, vec![PartRange { part_number: 1, offset: 0, len: 0 }]);
    }

    #[test]
    fn test_small_parts_rejected_only_when_splitting() {
        assert!(plan_parts(10, 1024).is_ok());
        assert!(plan_parts(10 * MIB, MIB).is_err());
        assert!(plan_parts(10, 0).is_err());
    }

    #[test]
    fn test_too_many_parts() {
        assert!(plan_parts(10_001 * 5 * MIB, 5 * MIB).is_err());
        assert!(plan_parts(10_000 * 5 * MIB, 5 * MIB).is_ok());
    }

    #[test]
    fn test_partition_bytes_slices_source() {
        let data: Bytes = (0..(11 * MIB)).map(|i| (i % 251) as u8).collect::<Vec<u8>>().into();
        let parts = PartSource::Bytes(data.clone()).partition(5 * MIB).unwrap();
        assert_eq!(parts.len(), 3);
        match &parts[2].content {
            ReplayableSource::Bytes(b) => assert_eq!(b, &data.slice((10 * MIB as usize)..)),
            other => panic!("unexpected content {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_partition_file_uses_segments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("source.bin");
        std::fs::write(&path, vec![7u8; (6 * MIB) as usize]).unwrap();

        let source = PartSource::file(&path).await.unwrap();
        assert_eq!(source.len(), 6 * MIB);
        let parts = source.partition(5 * MIB).unwrap();
        assert_eq!(parts.len(), 2);
        match &parts[1].content {
            ReplayableSource::File(seg) => {
                assert_eq!(seg.offset, 5 * MIB);
                assert_eq!(seg.len, MIB);
            }
            other => panic!("unexpected content {:?}", other),
        }
        assert_eq!(parts[1].content.read_all().await.unwrap().len() as u64, MIB);
    }
}
