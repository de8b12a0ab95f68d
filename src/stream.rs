//! Data sources, cancellation, and progress reporting for object transfers.
//!
//! Uploads consume any `futures_util::Stream` of byte chunks; [`ByteStream`]
//! wraps one together with its logical size, which the engine needs up front
//! for the data-phase container header. Two sized sources can be joined into
//! one, which is how a data phase is assembled from its 12-byte container
//! header plus the object bytes without copying the object into memory.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::stream::{self, Stream, StreamExt};

use crate::error::{Error, Result};

/// Read granularity for file-backed sources and data-phase assembly.
pub(crate) const IO_CHUNK_SIZE: usize = 64 * 1024;

/// Progress callback: `(bytes_transferred, bytes_total)`.
///
/// Invoked from the task performing the transfer after each chunk; keep it
/// cheap and non-blocking.
pub type ProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// One-shot cancellation flag shared between a transfer and its initiator.
///
/// Tokens are cheap to clone; all clones observe the same flag. The transfer
/// checks the flag at chunk boundaries, so cancellation takes effect within
/// one chunk of I/O.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trips the flag. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    pub(crate) fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// A chunk stream with a known logical size.
pub struct ByteStream<S> {
    size: u64,
    stream: S,
}

pub type BoxedByteStream = ByteStream<Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>>;

impl ByteStream<stream::Iter<std::vec::IntoIter<io::Result<Bytes>>>> {
    /// A source reading from an in-memory buffer. Used for small payloads
    /// such as object-info records and whole-file writes.
    pub fn from_bytes(data: Bytes) -> Self {
        let size = data.len() as u64;
        ByteStream {
            size,
            stream: stream::iter(vec![Ok(data)]),
        }
    }
}

impl BoxedByteStream {
    /// A source streaming a local file in [`IO_CHUNK_SIZE`] chunks.
    ///
    /// The file is read lazily; the size is taken from its metadata at open
    /// time and the device-side object is created with exactly that size.
    pub async fn from_path(path: &std::path::Path) -> Result<Self> {
        let file = tokio::fs::File::open(path).await?;
        let size = file.metadata().await?.len();
        Ok(ByteStream {
            size,
            stream: Box::pin(file_chunks(file)),
        })
    }
}

impl<S> ByteStream<S>
where
    S: Stream<Item = io::Result<Bytes>> + Send + Unpin,
{
    /// Wraps an arbitrary chunk stream whose total size is known.
    pub fn new(size: u64, stream: S) -> Self {
        ByteStream { size, stream }
    }

    /// Logical size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Concatenates two sized sources. The combined stream yields every
    /// chunk of `self` and then every chunk of `other`; its size is the sum
    /// of both sizes.
    pub fn join<S2>(self, other: ByteStream<S2>) -> ByteStream<Joined<S, S2>>
    where
        S2: Stream<Item = io::Result<Bytes>> + Send + Unpin,
    {
        ByteStream {
            size: self.size + other.size,
            stream: Joined {
                first: self.stream,
                second: other.stream,
                first_exhausted: false,
            },
        }
    }

    /// Attaches a cancellation token checked before each chunk.
    pub fn cancellable(self, token: CancellationToken) -> ByteStream<Cancellable<S>> {
        ByteStream {
            size: self.size,
            stream: Cancellable {
                inner: self.stream,
                token,
            },
        }
    }

    pub(crate) async fn next_chunk(&mut self) -> Option<io::Result<Bytes>> {
        self.stream.next().await
    }

    /// Drains the source into one buffer. Test and small-payload helper.
    pub async fn read_all(mut self) -> Result<Bytes> {
        let mut out = bytes::BytesMut::with_capacity(self.size as usize);
        while let Some(chunk) = self.next_chunk().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out.freeze())
    }
}

impl<S> Stream for ByteStream<S>
where
    S: Stream<Item = io::Result<Bytes>> + Unpin,
{
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.stream).poll_next(cx)
    }
}

/// Two chunk streams consumed back to back.
///
/// The backing storage changes at a known transition point: once the first
/// stream finishes, every subsequent poll goes to the second.
pub struct Joined<A, B> {
    first: A,
    second: B,
    first_exhausted: bool,
}

impl<A, B> Stream for Joined<A, B>
where
    A: Stream<Item = io::Result<Bytes>> + Unpin,
    B: Stream<Item = io::Result<Bytes>> + Unpin,
{
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        if !this.first_exhausted {
            match Pin::new(&mut this.first).poll_next(cx) {
                Poll::Ready(None) => this.first_exhausted = true,
                other => return other,
            }
        }
        Pin::new(&mut this.second).poll_next(cx)
    }
}

/// Stream adapter failing with [`Error::Cancelled`]'s I/O equivalent once
/// the token trips. The session layer maps the error kind back to
/// [`Error::Cancelled`].
pub struct Cancellable<S> {
    inner: S,
    token: CancellationToken,
}

impl<S> Stream for Cancellable<S>
where
    S: Stream<Item = io::Result<Bytes>> + Unpin,
{
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.token.is_cancelled() {
            return Poll::Ready(Some(Err(io::Error::new(io::ErrorKind::Interrupted, "cancelled"))));
        }
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// Chunks a `tokio::fs::File` into a stream of reads.
fn file_chunks(file: tokio::fs::File) -> impl Stream<Item = io::Result<Bytes>> + Send {
    stream::try_unfold(file, |mut file| async move {
        use tokio::io::AsyncReadExt;
        let mut buf = vec![0u8; IO_CHUNK_SIZE];
        let n = file.read(&mut buf).await?;
        if n == 0 {
            Ok(None)
        } else {
            buf.truncate(n);
            Ok(Some((Bytes::from(buf), file)))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunked(size_hint: u64, chunks: &[&[u8]]) -> ByteStream<impl Stream<Item = io::Result<Bytes>> + Send + Unpin>
    {
        let items: Vec<io::Result<Bytes>> = chunks.iter().map(|c| Ok(Bytes::copy_from_slice(c))).collect();
        ByteStream::new(size_hint, stream::iter(items))
    }

    #[tokio::test]
    async fn test_joined_size_is_sum() {
        let a = chunked(3, &[b"abc"]);
        let b = chunked(2, &[b"de"]);
        assert_eq!(a.join(b).size(), 5);
    }

    #[tokio::test]
    async fn test_joined_reads_concatenation() {
        let a = chunked(4, &[b"ab", b"cd"]);
        let b = chunked(3, &[b"efg"]);
        let all = a.join(b).read_all().await.unwrap();
        assert_eq!(&all[..], b"abcdefg");
    }

    #[tokio::test]
    async fn test_joined_with_empty_first() {
        let a = chunked(0, &[]);
        let b = chunked(2, &[b"xy"]);
        let joined = a.join(b);
        assert_eq!(joined.size(), 2);
        assert_eq!(&joined.read_all().await.unwrap()[..], b"xy");
    }

    #[tokio::test]
    async fn test_bytes_source() {
        let src = ByteStream::from_bytes(Bytes::from_static(b"hello"));
        assert_eq!(src.size(), 5);
        assert_eq!(&src.read_all().await.unwrap()[..], b"hello");
    }

    #[tokio::test]
    async fn test_cancel_before_first_read() {
        let token = CancellationToken::new();
        token.cancel();
        let mut src = chunked(3, &[b"abc"]).cancellable(token);
        let err = src.next_chunk().await.unwrap().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Interrupted);
    }

    #[tokio::test]
    async fn test_cancel_mid_stream() {
        let token = CancellationToken::new();
        let mut src = chunked(6, &[b"abc", b"def"]).cancellable(token.clone());
        assert!(src.next_chunk().await.unwrap().is_ok());
        token.cancel();
        let err = src.next_chunk().await.unwrap().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Interrupted);
    }

    #[tokio::test]
    async fn test_token_is_shared_across_clones() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
        assert!(matches!(clone.check(), Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn test_file_source_roundtrip() {
        let dir = std::env::temp_dir().join("mtp-rs-stream-test");
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("source.bin");
        let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        tokio::fs::write(&path, &payload).await.unwrap();

        let src = BoxedByteStream::from_path(&path).await.unwrap();
        assert_eq!(src.size(), payload.len() as u64);
        let all = src.read_all().await.unwrap();
        assert_eq!(&all[..], &payload[..]);

        tokio::fs::remove_file(&path).await.unwrap();
    }
}
