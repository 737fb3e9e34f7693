//! Transfer engine: the operation state machines for both peers.
//!
//! Each operation is a fixed ping-pong sequence. The server half lives in
//! [`server`], the client half in [`client`]; both halves must walk the same
//! steps in the same order or the stream falls out of step. The bulk data
//! phase of Upload and Download shares the chunk loops below.

pub mod client;
pub mod server;

use crate::error::{ProtocolError, ProtocolResult};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Observes transfer progress. Purely presentational.
pub trait TransferObserver: Send {
    fn begin(&mut self, _name: &str, _total: u64) {}
    fn advance(&mut self, _bytes: u64) {}
    fn finish(&mut self) {}
}

/// Observer that shows nothing
pub struct NoProgress;
impl TransferObserver for NoProgress {}

/// Asks the operator whether a remote file may be removed.
pub trait Confirm {
    fn confirm(&mut self, name: &str) -> bool;
}

/// Fixed answer, for `--yes` and tests
pub struct AutoConfirm(pub bool);

impl Confirm for AutoConfirm {
    fn confirm(&mut self, _name: &str) -> bool {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkStats {
    pub bytes: u64,
    pub chunks: u64,
}

/// Stream exactly `total` bytes from `src` to the peer, `chunk` bytes at a time.
///
/// The peer has already been told `total`, so running out of source data or
/// failing to read it leaves the exchange unfinishable.
pub async fn send_chunks<R, W>(
    src: &mut R,
    peer: &mut W,
    total: u64,
    chunk: usize,
    observer: &mut dyn TransferObserver,
) -> ProtocolResult<ChunkStats>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = vec![0u8; chunk.max(1)];
    let mut stats = ChunkStats { bytes: 0, chunks: 0 };
    while stats.bytes < total {
        let want = (total - stats.bytes).min(buf.len() as u64) as usize;
        let got = fill_from_source(src, &mut buf[..want]).await.map_err(|e| {
            ProtocolError::Desync(format!(
                "source read failed after {} of {} bytes: {}",
                stats.bytes, total, e
            ))
        })?;
        if got < want {
            return Err(ProtocolError::Desync(format!(
                "source ended after {} of {} bytes",
                stats.bytes + got as u64,
                total
            )));
        }
        peer.write_all(&buf[..got]).await?;
        stats.bytes += got as u64;
        stats.chunks += 1;
        observer.advance(got as u64);
    }
    peer.flush().await?;
    Ok(stats)
}

// Read until `buf` is full or the source hits EOF
async fn fill_from_source<R>(src: &mut R, buf: &mut [u8]) -> io::Result<usize>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = src.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

#[derive(Debug)]
pub struct Received {
    pub stats: ChunkStats,
    /// First local write failure; later bytes were drained and discarded
    pub write_error: Option<io::Error>,
}

/// Take exactly `total` bytes off the peer and write them into `sink`.
///
/// Reads never ask for more than the bytes still owed, so nothing belonging
/// to the next message is consumed. A zero-length read means the peer went
/// away. If writing to `sink` fails, the remaining bytes are still read so
/// the stream stays in step; the sink is dropped and the error reported.
pub async fn receive_chunks<R, W>(
    peer: &mut R,
    sink: &mut Option<W>,
    total: u64,
    chunk: usize,
    observer: &mut dyn TransferObserver,
) -> ProtocolResult<Received>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; chunk.max(1)];
    let mut stats = ChunkStats { bytes: 0, chunks: 0 };
    let mut write_error = None;
    while stats.bytes < total {
        let want = (total - stats.bytes).min(buf.len() as u64) as usize;
        let n = peer.read(&mut buf[..want]).await?;
        if n == 0 {
            return Err(ProtocolError::ShortRead {
                expected: total as usize,
                received: stats.bytes as usize,
            });
        }
        if let Some(w) = sink.as_mut() {
            if let Err(e) = w.write_all(&buf[..n]).await {
                write_error = Some(e);
                *sink = None;
            }
        }
        stats.bytes += n as u64;
        stats.chunks += 1;
        observer.advance(n as u64);
    }
    if let Some(w) = sink.as_mut() {
        if let Err(e) = w.flush().await {
            write_error.get_or_insert(e);
            *sink = None;
        }
    }
    Ok(Received { stats, write_error })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    struct Counting {
        advanced: u64,
        calls: u64,
    }

    impl TransferObserver for Counting {
        fn advance(&mut self, bytes: u64) {
            self.advanced += bytes;
            self.calls += 1;
        }
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[tokio::test]
    async fn test_send_counts_chunks() {
        let data = pattern(10_000);
        let mut src = Cursor::new(data.clone());
        let mut wire = Vec::new();
        let mut obs = Counting { advanced: 0, calls: 0 };

        let stats = send_chunks(&mut src, &mut wire, 10_000, 1024, &mut obs)
            .await
            .unwrap();
        assert_eq!(stats, ChunkStats { bytes: 10_000, chunks: 10 });
        assert_eq!(wire, data);
        assert_eq!(obs.advanced, 10_000);
        assert_eq!(obs.calls, 10);
    }

    #[tokio::test]
    async fn test_send_detects_shrunk_source() {
        let mut src = Cursor::new(vec![1u8; 100]);
        let mut wire = Vec::new();
        let res = send_chunks(&mut src, &mut wire, 200, 64, &mut NoProgress).await;
        assert!(matches!(res, Err(ProtocolError::Desync(_))));
    }

    #[tokio::test]
    async fn test_receive_stops_at_declared_size() {
        // trailing bytes belong to the next message and must stay unread
        let mut wire = Cursor::new(b"hello worldNEXT".to_vec());
        let mut sink = Some(Vec::new());
        let got = receive_chunks(&mut wire, &mut sink, 11, 4, &mut NoProgress)
            .await
            .unwrap();
        assert_eq!(got.stats.bytes, 11);
        assert!(got.write_error.is_none());
        assert_eq!(sink.unwrap(), b"hello world");
        assert_eq!(wire.position(), 11);
    }

    #[tokio::test]
    async fn test_receive_over_tiny_duplex() {
        let data = pattern(5_000);
        let (mut a, mut b) = tokio::io::duplex(7);
        let expected = data.clone();
        let writer = tokio::spawn(async move {
            let mut src = Cursor::new(data);
            send_chunks(&mut src, &mut a, 5_000, 512, &mut NoProgress)
                .await
                .unwrap()
        });
        let mut sink = Some(Vec::new());
        let got = receive_chunks(&mut b, &mut sink, 5_000, 512, &mut NoProgress)
            .await
            .unwrap();
        assert_eq!(got.stats.bytes, 5_000);
        // the tiny pipe forces many short reads
        assert!(got.stats.chunks > 10);
        assert_eq!(sink.unwrap(), expected);
        assert_eq!(writer.await.unwrap().chunks, 10);
    }

    #[tokio::test]
    async fn test_receive_peer_closed() {
        let mut wire = Cursor::new(vec![0u8; 10]);
        let mut sink = Some(Vec::new());
        let res = receive_chunks(&mut wire, &mut sink, 20, 8, &mut NoProgress).await;
        assert!(matches!(
            res,
            Err(ProtocolError::ShortRead { expected: 20, received: 10 })
        ));
    }

    struct FailingSink;
    impl AsyncWrite for FailingSink {
        fn poll_write(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            _buf: &[u8],
        ) -> std::task::Poll<io::Result<usize>> {
            std::task::Poll::Ready(Err(io::Error::new(io::ErrorKind::Other, "disk full")))
        }
        fn poll_flush(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }
        fn poll_shutdown(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_receive_drains_after_write_failure() {
        let mut wire = Cursor::new(vec![7u8; 300]);
        let mut sink = Some(FailingSink);
        let got = receive_chunks(&mut wire, &mut sink, 300, 100, &mut NoProgress)
            .await
            .unwrap();
        assert_eq!(got.stats.bytes, 300);
        assert!(got.write_error.is_some());
        assert!(sink.is_none());
        assert_eq!(wire.position(), 300);
    }

    #[test]
    fn test_auto_confirm() {
        assert!(AutoConfirm(true).confirm("x"));
        assert!(!AutoConfirm(false).confirm("x"));
    }
}
