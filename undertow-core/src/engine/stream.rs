//! Byte streams handed out by the engine.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use futures::stream::BoxStream;

type ReleaseHook = Box<dyn FnOnce() + Send>;

/// Stream of file bytes backed by engine-side read resources.
///
/// The resources are freed by [`FileStream::release`], at end of stream, or on
/// drop, whichever happens first. The release hook runs at most once.
pub struct FileStream {
    inner: Option<BoxStream<'static, io::Result<Bytes>>>,
    on_release: Option<ReleaseHook>,
}

impl FileStream {
    /// Wraps an engine byte stream.
    pub fn new<S>(inner: S) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        Self {
            inner: Some(Box::pin(inner)),
            on_release: None,
        }
    }

    /// Stream that yields nothing, used for zero-length files.
    pub fn empty() -> Self {
        Self::new(futures::stream::empty())
    }

    /// Registers a callback invoked when the engine resources are released.
    pub fn with_release_hook<F>(mut self, hook: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_release = Some(Box::new(hook));
        self
    }

    /// Releases the engine-side read resources. Later calls are no-ops.
    pub fn release(&mut self) {
        self.inner = None;
        if let Some(hook) = self.on_release.take() {
            hook();
        }
    }

    /// Returns true once the stream has been released.
    pub fn is_released(&self) -> bool {
        self.inner.is_none()
    }
}

impl Stream for FileStream {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let Some(inner) = self.inner.as_mut() else {
            return Poll::Ready(None);
        };

        match inner.as_mut().poll_next(cx) {
            Poll::Ready(None) => {
                self.release();
                Poll::Ready(None)
            }
            other => other,
        }
    }
}

impl Drop for FileStream {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for FileStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileStream")
            .field("released", &self.is_released())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::StreamExt;

    use super::*;

    fn counted_stream(chunks: Vec<&'static [u8]>) -> (FileStream, Arc<AtomicUsize>) {
        let releases = Arc::new(AtomicUsize::new(0));
        let counter = releases.clone();
        let items = chunks
            .into_iter()
            .map(|chunk| Ok(Bytes::from_static(chunk)));
        let stream = FileStream::new(futures::stream::iter(items)).with_release_hook(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (stream, releases)
    }

    #[tokio::test]
    async fn test_release_on_end_of_stream() {
        let (mut stream, releases) = counted_stream(vec![b"ab", b"cd"]);

        let mut collected = Vec::new();
        while let Some(chunk) = stream.next().await {
            collected.extend_from_slice(&chunk.unwrap());
        }

        assert_eq!(collected, b"abcd");
        assert!(stream.is_released());
        assert_eq!(releases.load(Ordering::SeqCst), 1);

        drop(stream);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_release_on_drop_mid_stream() {
        let (mut stream, releases) = counted_stream(vec![b"ab", b"cd"]);
        let _ = stream.next().await;
        assert_eq!(releases.load(Ordering::SeqCst), 0);

        drop(stream);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_explicit_release_is_idempotent() {
        let (mut stream, releases) = counted_stream(vec![b"ab"]);
        stream.release();
        stream.release();

        assert!(stream.next().await.is_none());
        drop(stream);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }
}
