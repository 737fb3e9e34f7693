//! Server half of each operation.
//!
//! Every handler is entered right after the command token was read. An `Ok`
//! result means the exchange finished in step, whatever happened to the file;
//! an `Err` means the connection has to go.

use super::{receive_chunks, send_chunks, NoProgress};
use crate::codec::{
    expect_ack, read_byte, read_name, read_size, send_ack, write_elapsed, write_name, write_size,
    MAX_WIRE_SIZE,
};
use crate::error::{ProtocolError, ProtocolResult};
use crate::protocol::{confirm, NOT_FOUND, STATUS_FAILED, STATUS_OK};
use crate::share::SharedDir;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

/// What the server needs to run operations for one session
#[derive(Debug, Clone)]
pub struct ServeContext {
    pub share: SharedDir,
    pub chunk_size: usize,
}

/// How an operation ended, for logging and the journal
#[derive(Debug, Clone, PartialEq)]
pub enum Served {
    Stored { name: String, bytes: u64, elapsed: f32 },
    StoreFailed { name: String, bytes: u64, reason: String },
    Sent { name: String, bytes: u64, elapsed: f32 },
    Missing { name: String },
    Listed { files: usize, total: u64 },
    Removed { name: String },
    RemoveFailed { name: String, reason: String },
    RemoveDeclined { name: String },
    Goodbye,
}

pub async fn upload<S>(stream: &mut S, ctx: &ServeContext) -> ProtocolResult<Served>
where
    S: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    send_ack(stream).await?;
    let name = read_name(stream).await?;
    send_ack(stream).await?;
    let size = read_size(stream).await?;
    if size < 0 {
        return Err(ProtocolError::Desync(format!(
            "negative upload size {} for {}",
            size, name
        )));
    }

    let started = Instant::now();
    let mut failure = None;
    let mut sink = match ctx.share.create(&name).await {
        Ok(f) => Some(f),
        Err(e) => {
            warn!(file = %name, error = %e, "cannot store upload; draining payload");
            failure = Some(e.to_string());
            None
        }
    };
    let created = sink.is_some();
    debug!(file = %name, bytes = size, "receiving");
    let received =
        receive_chunks(stream, &mut sink, size as u64, ctx.chunk_size, &mut NoProgress).await;
    drop(sink);
    let received = match received {
        Ok(r) => r,
        Err(e) => {
            if created {
                discard_partial(ctx, &name);
            }
            return Err(e);
        }
    };
    if let Some(e) = received.write_error {
        warn!(file = %name, error = %e, "write failed during upload");
        failure.get_or_insert(e.to_string());
    }
    let elapsed = started.elapsed().as_secs_f32();

    write_elapsed(stream, elapsed).await?;
    match failure {
        None => {
            write_size(stream, received.stats.bytes as i64).await?;
            info!(file = %name, bytes = received.stats.bytes, elapsed, "upload stored");
            Ok(Served::Stored {
                name,
                bytes: received.stats.bytes,
                elapsed,
            })
        }
        Some(reason) => {
            write_size(stream, NOT_FOUND).await?;
            if created {
                discard_partial(ctx, &name);
            }
            Ok(Served::StoreFailed {
                name,
                bytes: received.stats.bytes,
                reason,
            })
        }
    }
}

// a half-written file is worse than none
fn discard_partial(ctx: &ServeContext, name: &str) {
    if let Err(e) = ctx.share.delete(name) {
        warn!(file = %name, error = %e, "could not remove partial upload");
    }
}

pub async fn download<S>(stream: &mut S, ctx: &ServeContext) -> ProtocolResult<Served>
where
    S: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    send_ack(stream).await?;
    let name = read_name(stream).await?;

    let (mut file, size) = match ctx.share.open_file(&name).await {
        Ok((f, size)) if size <= MAX_WIRE_SIZE => (f, size),
        Ok((_, size)) => {
            warn!(file = %name, bytes = size, "file too large for the size frame");
            write_size(stream, NOT_FOUND).await?;
            return Ok(Served::Missing { name });
        }
        Err(e) => {
            debug!(file = %name, error = %e, "download target unavailable");
            write_size(stream, NOT_FOUND).await?;
            return Ok(Served::Missing { name });
        }
    };

    write_size(stream, size as i64).await?;
    expect_ack(stream).await?;
    let started = Instant::now();
    debug!(file = %name, bytes = size, "sending");
    let stats = send_chunks(&mut file, stream, size, ctx.chunk_size, &mut NoProgress).await?;
    expect_ack(stream).await?;
    let elapsed = started.elapsed().as_secs_f32();
    write_elapsed(stream, elapsed).await?;
    info!(file = %name, bytes = stats.bytes, elapsed, "download sent");
    Ok(Served::Sent {
        name,
        bytes: stats.bytes,
        elapsed,
    })
}

pub async fn list<S>(stream: &mut S, ctx: &ServeContext) -> ProtocolResult<Served>
where
    S: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    // count, entries and total must all fit their frames before anything is sent
    let mut total = 0u64;
    let mut entries = Vec::new();
    for e in ctx.share.list()? {
        if total + e.size > MAX_WIRE_SIZE {
            warn!(file = %e.name, bytes = e.size, "leaving file out of listing; total would overflow");
            continue;
        }
        total += e.size;
        entries.push(e);
    }

    write_size(stream, entries.len() as i64).await?;
    for entry in &entries {
        write_name(stream, &entry.name).await?;
        expect_ack(stream).await?;
        write_size(stream, entry.size as i64).await?;
        expect_ack(stream).await?;
    }
    write_size(stream, total as i64).await?;
    expect_ack(stream).await?;
    debug!(files = entries.len(), total, "listing sent");
    Ok(Served::Listed {
        files: entries.len(),
        total,
    })
}

pub async fn remove<S>(stream: &mut S, ctx: &ServeContext) -> ProtocolResult<Served>
where
    S: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    send_ack(stream).await?;
    let name = read_name(stream).await?;
    if !ctx.share.exists(&name) {
        write_size(stream, NOT_FOUND).await?;
        return Ok(Served::Missing { name });
    }
    write_size(stream, STATUS_OK).await?;

    match read_byte(stream).await? {
        confirm::YES => match ctx.share.delete(&name) {
            Ok(()) => {
                write_size(stream, STATUS_OK).await?;
                info!(file = %name, "removed");
                Ok(Served::Removed { name })
            }
            Err(e) => {
                warn!(file = %name, error = %e, "remove failed");
                write_size(stream, STATUS_FAILED).await?;
                Ok(Served::RemoveFailed {
                    name,
                    reason: e.to_string(),
                })
            }
        },
        confirm::NO => {
            debug!(file = %name, "removal declined by client");
            Ok(Served::RemoveDeclined { name })
        }
        other => Err(ProtocolError::Violation(format!(
            "expected remove confirmation, got byte 0x{:02x}",
            other
        ))),
    }
}

/// Acknowledge a disconnect; the caller closes the session afterwards.
pub async fn goodbye<S>(stream: &mut S) -> ProtocolResult<Served>
where
    S: AsyncWrite + Unpin + ?Sized,
{
    send_ack(stream).await?;
    Ok(Served::Goodbye)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode_f32, decode_size};
    use std::fs;
    use tempfile::TempDir;
    use tokio_test::io::Builder;

    fn ctx(dir: &TempDir) -> ServeContext {
        ServeContext {
            share: SharedDir::new(dir.path()),
            chunk_size: 4,
        }
    }

    #[tokio::test]
    async fn test_download_missing_sends_sentinel() {
        let dir = TempDir::new().unwrap();
        let mut mock = Builder::new()
            .write(b"1")
            .read(&[4, 0])
            .read(b"nope")
            .write(&[0xff, 0xff, 0xff, 0xff])
            .build();
        let served = download(&mut mock, &ctx(&dir)).await.unwrap();
        assert_eq!(served, Served::Missing { name: "nope".into() });
    }

    #[tokio::test]
    async fn test_remove_declined_is_silent() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("keep"), b"data").unwrap();
        // no bytes may follow the "N"
        let mut mock = Builder::new()
            .write(b"1")
            .read(&[4, 0])
            .read(b"keep")
            .write(&[1, 0, 0, 0])
            .read(b"N")
            .build();
        let served = remove(&mut mock, &ctx(&dir)).await.unwrap();
        assert_eq!(served, Served::RemoveDeclined { name: "keep".into() });
        assert!(dir.path().join("keep").exists());
    }

    #[tokio::test]
    async fn test_remove_rejects_unknown_confirmation() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("f"), b"x").unwrap();
        let mut mock = Builder::new()
            .write(b"1")
            .read(&[1, 0])
            .read(b"f")
            .write(&[1, 0, 0, 0])
            .read(b"?")
            .build();
        assert!(matches!(
            remove(&mut mock, &ctx(&dir)).await,
            Err(ProtocolError::Violation(_))
        ));
        assert!(dir.path().join("f").exists());
    }

    #[tokio::test]
    async fn test_upload_rejects_negative_size() {
        let dir = TempDir::new().unwrap();
        let mut mock = Builder::new()
            .write(b"1")
            .read(&[1, 0])
            .read(b"a")
            .write(b"1")
            .read(&[0xfe, 0xff, 0xff, 0xff])
            .build();
        assert!(matches!(
            upload(&mut mock, &ctx(&dir)).await,
            Err(ProtocolError::Desync(_))
        ));
    }

    #[tokio::test]
    async fn test_upload_bad_name_drains_and_reports_failure() {
        let dir = TempDir::new().unwrap();
        let (mut client, mut server) = tokio::io::duplex(64);
        let context = ctx(&dir);
        let task = tokio::spawn(async move { upload(&mut server, &context).await });

        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        let mut ack = [0u8; 1];
        client.read_exact(&mut ack).await.unwrap();
        client.write_all(&[5, 0]).await.unwrap();
        client.write_all(b"../up").await.unwrap();
        client.read_exact(&mut ack).await.unwrap();
        client.write_all(&10i32.to_le_bytes()).await.unwrap();
        client.write_all(&[0u8; 10]).await.unwrap();
        let mut tail = [0u8; 8];
        client.read_exact(&mut tail).await.unwrap();

        assert!(decode_f32(tail[..4].try_into().unwrap()) >= 0.0);
        assert_eq!(decode_size(tail[4..].try_into().unwrap()), NOT_FOUND);
        match task.await.unwrap().unwrap() {
            Served::StoreFailed { bytes, .. } => assert_eq!(bytes, 10),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(!dir.path().parent().unwrap().join("up").exists());
    }

    #[tokio::test]
    async fn test_upload_cut_short_leaves_no_file() {
        let dir = TempDir::new().unwrap();
        let (mut client, mut server) = tokio::io::duplex(64);
        let context = ctx(&dir);
        let task = tokio::spawn(async move { upload(&mut server, &context).await });

        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        let mut ack = [0u8; 1];
        client.read_exact(&mut ack).await.unwrap();
        client.write_all(&[4, 0]).await.unwrap();
        client.write_all(b"half").await.unwrap();
        client.read_exact(&mut ack).await.unwrap();
        client.write_all(&1000i32.to_le_bytes()).await.unwrap();
        client.write_all(&[9u8; 300]).await.unwrap();
        drop(client);

        assert!(matches!(
            task.await.unwrap(),
            Err(ProtocolError::ShortRead { expected: 1000, received: 300 })
        ));
        assert!(!dir.path().join("half").exists());
    }

    #[tokio::test]
    async fn test_list_keeps_total_within_size_frame() {
        let dir = TempDir::new().unwrap();
        let big = 1_500_000_000u64;
        for name in ["big1", "big2"] {
            let f = fs::File::create(dir.path().join(name)).unwrap();
            f.set_len(big).unwrap();
        }
        fs::write(dir.path().join("small"), b"12345").unwrap();

        let (mut client, mut server) = tokio::io::duplex(64);
        let context = ctx(&dir);
        let task = tokio::spawn(async move { list(&mut server, &context).await });

        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        let mut frame = [0u8; 4];
        client.read_exact(&mut frame).await.unwrap();
        let count = i32::from_le_bytes(frame);
        let mut sum = 0i64;
        for _ in 0..count {
            let mut len = [0u8; 2];
            client.read_exact(&mut len).await.unwrap();
            let mut name = vec![0u8; i16::from_le_bytes(len) as usize];
            client.read_exact(&mut name).await.unwrap();
            client.write_all(b"1").await.unwrap();
            client.read_exact(&mut frame).await.unwrap();
            sum += i32::from_le_bytes(frame) as i64;
            client.write_all(b"1").await.unwrap();
        }
        client.read_exact(&mut frame).await.unwrap();
        client.write_all(b"1").await.unwrap();

        // one of the large files cannot be counted
        assert_eq!(count, 2);
        assert_eq!(i32::from_le_bytes(frame) as i64, sum);
        assert_eq!(sum, big as i64 + 5);
        match task.await.unwrap().unwrap() {
            Served::Listed { files, total } => {
                assert_eq!(files, 2);
                assert_eq!(total, big + 5);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }
}
