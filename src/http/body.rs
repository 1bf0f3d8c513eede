//! Request and response bodies
//!
//! A [`Payload`] is either replayable (every attempt re-opens it from the
//! start) or one-shot (consumed by the first attempt). The engine refuses to
//! retry a request carrying a one-shot payload.

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use std::fmt;
use std::io::{self, SeekFrom};
use std::path::PathBuf;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

/// Read buffer size for file-backed bodies
const FILE_CHUNK_SIZE: usize = 64 * 1024;

/// A contiguous byte range of a file on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSegment {
    pub path: PathBuf,
    pub offset: u64,
    pub len: u64,
}

impl FileSegment {
    pub fn new(path: impl Into<PathBuf>, offset: u64, len: u64) -> Self {
        Self {
            path: path.into(),
            offset,
            len,
        }
    }

    /// Whole-file segment, sized from the file's current metadata
    pub async fn whole(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let len = tokio::fs::metadata(&path).await?.len();
        Ok(Self::new(path, 0, len))
    }
}

/// A source that can be read from its start any number of times
#[derive(Debug, Clone)]
pub enum ReplayableSource {
    Bytes(Bytes),
    File(FileSegment),
}

impl ReplayableSource {
    pub fn len(&self) -> u64 {
        match self {
            ReplayableSource::Bytes(b) => b.len() as u64,
            ReplayableSource::File(seg) => seg.len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Produce a fresh body positioned at the start of the source
    pub async fn open(&self) -> io::Result<Body> {
        match self {
            ReplayableSource::Bytes(b) if b.is_empty() => Ok(Body::Empty),
            ReplayableSource::Bytes(b) => Ok(Body::Full(b.clone())),
            ReplayableSource::File(seg) => {
                let mut file = tokio::fs::File::open(&seg.path).await?;
                if seg.offset > 0 {
                    file.seek(SeekFrom::Start(seg.offset)).await?;
                }
                let reader = file.take(seg.len);
                let stream = ReaderStream::with_capacity(reader, FILE_CHUNK_SIZE);
                Ok(Body::Stream(stream.boxed()))
            }
        }
    }

    /// Read the whole source into memory
    pub async fn read_all(&self) -> io::Result<Bytes> {
        match self {
            ReplayableSource::Bytes(b) => Ok(b.clone()),
            ReplayableSource::File(seg) => {
                let mut file = tokio::fs::File::open(&seg.path).await?;
                file.seek(SeekFrom::Start(seg.offset)).await?;
                let mut buf = Vec::with_capacity(seg.len as usize);
                file.take(seg.len).read_to_end(&mut buf).await?;
                if (buf.len() as u64) < seg.len {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("{} is shorter than expected", seg.path.display()),
                    ));
                }
                Ok(Bytes::from(buf))
            }
        }
    }
}

/// A stream that can be read exactly once
pub struct OneShotStream {
    inner: Option<BoxStream<'static, io::Result<Bytes>>>,
    len: Option<u64>,
}

impl OneShotStream {
    pub fn new<S>(stream: S, len: Option<u64>) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        Self {
            inner: Some(stream.boxed()),
            len,
        }
    }

    pub fn from_reader<R>(reader: R, len: Option<u64>) -> Self
    where
        R: AsyncRead + Send + 'static,
    {
        Self::new(ReaderStream::with_capacity(reader, FILE_CHUNK_SIZE), len)
    }

    /// Hand out the stream; `None` once it has been consumed
    pub fn take(&mut self) -> Option<BoxStream<'static, io::Result<Bytes>>> {
        self.inner.take()
    }

    pub fn is_consumed(&self) -> bool {
        self.inner.is_none()
    }
}

impl fmt::Debug for OneShotStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OneShotStream")
            .field("len", &self.len)
            .field("consumed", &self.is_consumed())
            .finish()
    }
}

/// Request body
#[derive(Debug)]
pub enum Payload {
    Replayable(ReplayableSource),
    OneShot(OneShotStream),
}

impl Payload {
    pub fn bytes(data: impl Into<Bytes>) -> Self {
        Payload::Replayable(ReplayableSource::Bytes(data.into()))
    }

    pub fn file(segment: FileSegment) -> Self {
        Payload::Replayable(ReplayableSource::File(segment))
    }

    pub fn one_shot<S>(stream: S, len: Option<u64>) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        Payload::OneShot(OneShotStream::new(stream, len))
    }

    pub fn is_replayable(&self) -> bool {
        matches!(self, Payload::Replayable(_))
    }

    pub fn len(&self) -> Option<u64> {
        match self {
            Payload::Replayable(src) => Some(src.len()),
            Payload::OneShot(s) => s.len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }
}

/// A body in flight, in either direction over the transport
pub enum Body {
    Empty,
    Full(Bytes),
    Stream(BoxStream<'static, io::Result<Bytes>>),
}

impl Body {
    /// Drain the body into memory
    pub async fn collect(self) -> io::Result<Bytes> {
        match self {
            Body::Empty => Ok(Bytes::new()),
            Body::Full(b) => Ok(b),
            Body::Stream(mut s) => {
                let mut buf = Vec::new();
                while let Some(chunk) = s.next().await {
                    buf.extend_from_slice(&chunk?);
                }
                Ok(Bytes::from(buf))
            }
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Empty => f.write_str("Empty"),
            Body::Full(b) => write!(f, "Full({} bytes)", b.len()),
            Body::Stream(_) => f.write_str("Stream"),
        }
    }
}
