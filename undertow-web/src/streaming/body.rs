//! Response body that owns an engine file stream.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tracing::{debug, error};
use undertow_core::FileStream;

/// Checks whether a stream error only reflects the peer having gone away.
pub fn is_benign_stream_error(err: &io::Error) -> bool {
    if matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted
    ) {
        return true;
    }
    let message = err.to_string();
    message.contains("closed prematurely") || message.contains("write after close")
}

/// Byte stream handed to the HTTP layer.
///
/// Errors never reach the connection: benign ones are dropped quietly,
/// abnormal ones are logged, and either way the body ends. The engine stream
/// is released when the body ends, errors, or is dropped on disconnect.
pub struct ReleasingBody {
    stream: FileStream,
    primed: Option<Bytes>,
    finished: bool,
    label: String,
}

impl ReleasingBody {
    /// Reads the first chunk before any response headers are committed.
    ///
    /// A benign error yields an empty body.
    ///
    /// # Errors
    /// - `io::Error` - Engine stream failed before producing any bytes
    pub async fn prime(mut stream: FileStream, label: String) -> io::Result<Self> {
        let (primed, finished) = match stream.next().await {
            Some(Ok(chunk)) => (Some(chunk), false),
            Some(Err(e)) if is_benign_stream_error(&e) => {
                debug!("Stream {} closed before first chunk: {}", label, e);
                stream.release();
                (None, true)
            }
            Some(Err(e)) => {
                stream.release();
                return Err(e);
            }
            None => (None, true),
        };

        Ok(Self {
            stream,
            primed,
            finished,
            label,
        })
    }

    fn finish(&mut self) {
        self.finished = true;
        self.stream.release();
    }
}

impl Stream for ReleasingBody {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if let Some(chunk) = this.primed.take() {
            return Poll::Ready(Some(Ok(chunk)));
        }
        if this.finished {
            return Poll::Ready(None);
        }

        match ready!(this.stream.poll_next_unpin(cx)) {
            Some(Ok(chunk)) => Poll::Ready(Some(Ok(chunk))),
            Some(Err(e)) => {
                if is_benign_stream_error(&e) {
                    debug!("Stream {} closed by peer: {}", this.label, e);
                } else {
                    error!("Stream {} failed mid-response: {}", this.label, e);
                }
                this.finish();
                Poll::Ready(None)
            }
            None => {
                this.finish();
                Poll::Ready(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::stream;

    use super::*;

    fn counted(items: Vec<io::Result<Bytes>>) -> (FileStream, Arc<AtomicUsize>) {
        let releases = Arc::new(AtomicUsize::new(0));
        let counter = releases.clone();
        let stream = FileStream::new(stream::iter(items)).with_release_hook(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (stream, releases)
    }

    async fn drain(body: ReleasingBody) -> Vec<u8> {
        let chunks: Vec<_> = body.collect().await;
        chunks
            .into_iter()
            .flat_map(|chunk| chunk.unwrap().to_vec())
            .collect()
    }

    #[test]
    fn test_benign_error_classification() {
        assert!(is_benign_stream_error(&io::Error::from(io::ErrorKind::BrokenPipe)));
        assert!(is_benign_stream_error(&io::Error::from(
            io::ErrorKind::ConnectionReset
        )));
        assert!(is_benign_stream_error(&io::Error::other(
            "Writable stream closed prematurely"
        )));
        assert!(!is_benign_stream_error(&io::Error::other("disk on fire")));
    }

    #[tokio::test]
    async fn test_full_read_releases_once() {
        let (stream, releases) = counted(vec![
            Ok(Bytes::from_static(b"ab")),
            Ok(Bytes::from_static(b"cd")),
        ]);

        let body = ReleasingBody::prime(stream, "test".to_string()).await.unwrap();
        assert_eq!(drain(body).await, b"abcd");
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_abnormal_error_ends_body_without_error_item() {
        let (stream, releases) = counted(vec![
            Ok(Bytes::from_static(b"ab")),
            Err(io::Error::other("disk on fire")),
            Ok(Bytes::from_static(b"never")),
        ]);

        let body = ReleasingBody::prime(stream, "test".to_string()).await.unwrap();
        assert_eq!(drain(body).await, b"ab");
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_error_before_first_chunk() {
        let (stream, releases) = counted(vec![Err(io::Error::other("disk on fire"))]);
        assert!(ReleasingBody::prime(stream, "test".to_string()).await.is_err());
        assert_eq!(releases.load(Ordering::SeqCst), 1);

        let (stream, releases) = counted(vec![Err(io::Error::from(io::ErrorKind::BrokenPipe))]);
        let body = ReleasingBody::prime(stream, "test".to_string()).await.unwrap();
        assert!(drain(body).await.is_empty());
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_drop_mid_stream_releases_once() {
        let (stream, releases) = counted(vec![
            Ok(Bytes::from_static(b"ab")),
            Ok(Bytes::from_static(b"cd")),
        ]);

        let mut body = ReleasingBody::prime(stream, "test".to_string()).await.unwrap();
        assert!(body.next().await.is_some());
        drop(body);

        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }
}
