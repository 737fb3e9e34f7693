//! Client half of each operation.
//!
//! Anything that can be checked locally (file exists, name and size fit their
//! frames) is checked before the command token goes out, so a local problem
//! never leaves the connection mid-sequence.

use super::{receive_chunks, send_chunks, Confirm, TransferObserver};
use crate::codec::{
    encode_name_len, expect_ack, read_elapsed, read_name, read_size, send_ack, write_all,
    write_command, write_name, write_size, MAX_WIRE_SIZE,
};
use crate::error::{ProtocolError, ProtocolResult};
use crate::protocol::{confirm, Command, DISCONNECT_WAIT_MS, NOT_FOUND, STATUS_OK};
use crate::share::{ListingEntry, SharedDir};
use std::io;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub enum UploadOutcome {
    /// The server stored `bytes` bytes
    Stored {
        name: String,
        bytes: u64,
        chunks: u64,
        elapsed: f32,
    },
    /// The server took the payload but could not keep it
    NotStored { name: String, elapsed: f32 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum DownloadOutcome {
    Downloaded {
        name: String,
        path: PathBuf,
        bytes: u64,
        elapsed: f32,
    },
    NotFound { name: String },
    /// Payload was received but could not be written locally
    LocalWriteFailed {
        name: String,
        path: PathBuf,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Listing {
    pub entries: Vec<ListingEntry>,
    pub total: u64,
    /// Synchronization exchanges the listing took
    pub handshakes: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed { name: String },
    NotFound { name: String },
    Declined { name: String },
    Failed { name: String },
}

/// One connection to a ferry server
pub struct Client<S> {
    stream: S,
    chunk_size: usize,
    local: SharedDir,
}

impl Client<TcpStream> {
    pub async fn connect(
        addr: &str,
        chunk_size: usize,
        local_dir: impl Into<PathBuf>,
    ) -> ProtocolResult<Self> {
        let stream = TcpStream::connect(addr).await?;
        let _ = stream.set_nodelay(true);
        debug!(addr, "connected");
        Ok(Self::new(stream, chunk_size, local_dir))
    }
}

impl<S> Client<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, chunk_size: usize, local_dir: impl Into<PathBuf>) -> Self {
        Self {
            stream,
            chunk_size: chunk_size.max(1),
            local: SharedDir::new(local_dir),
        }
    }

    /// Where downloads land
    pub fn local_dir(&self) -> &Path {
        self.local.root()
    }

    pub async fn upload(
        &mut self,
        path: &Path,
        observer: &mut dyn TransferObserver,
    ) -> ProtocolResult<UploadOutcome> {
        let display = path.display().to_string();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                ProtocolError::fs(
                    &display,
                    io::Error::new(io::ErrorKind::InvalidInput, "no usable file name"),
                )
            })?
            .to_string();
        let mut file = tokio::fs::File::open(path)
            .await
            .map_err(|e| ProtocolError::fs(&display, e))?;
        let size = file
            .metadata()
            .await
            .map_err(|e| ProtocolError::fs(&display, e))?
            .len();
        if size > MAX_WIRE_SIZE {
            return Err(ProtocolError::FrameRange {
                field: "size",
                value: size as i64,
            });
        }
        encode_name_len(name.len())?;

        write_command(&mut self.stream, Command::Upload.token()).await?;
        expect_ack(&mut self.stream).await?;
        write_name(&mut self.stream, &name).await?;
        expect_ack(&mut self.stream).await?;
        write_size(&mut self.stream, size as i64).await?;

        observer.begin(&name, size);
        let sent = send_chunks(&mut file, &mut self.stream, size, self.chunk_size, observer).await;
        observer.finish();
        let sent = sent?;

        let elapsed = read_elapsed(&mut self.stream).await?;
        let stored = read_size(&mut self.stream).await?;
        match stored {
            NOT_FOUND => Ok(UploadOutcome::NotStored { name, elapsed }),
            n if n >= 0 => Ok(UploadOutcome::Stored {
                name,
                bytes: n as u64,
                chunks: sent.chunks,
                elapsed,
            }),
            n => Err(ProtocolError::Desync(format!("upload reply carried size {}", n))),
        }
    }

    pub async fn download(
        &mut self,
        name: &str,
        observer: &mut dyn TransferObserver,
    ) -> ProtocolResult<DownloadOutcome> {
        encode_name_len(name.len())?;
        let path = self.local.resolve(name)?;

        write_command(&mut self.stream, Command::Download.token()).await?;
        expect_ack(&mut self.stream).await?;
        write_name(&mut self.stream, name).await?;
        let size = read_size(&mut self.stream).await?;
        if size == NOT_FOUND {
            return Ok(DownloadOutcome::NotFound {
                name: name.to_string(),
            });
        }
        if size < 0 {
            return Err(ProtocolError::Desync(format!("download size {}", size)));
        }

        let mut failure = None;
        let mut sink = match self.create_local(name).await {
            Ok(f) => Some(f),
            Err(e) => {
                failure = Some(e.to_string());
                None
            }
        };
        send_ack(&mut self.stream).await?;
        observer.begin(name, size as u64);
        let received = receive_chunks(
            &mut self.stream,
            &mut sink,
            size as u64,
            self.chunk_size,
            observer,
        )
        .await;
        observer.finish();
        let received = received?;
        drop(sink);
        send_ack(&mut self.stream).await?;
        let elapsed = read_elapsed(&mut self.stream).await?;

        if let Some(e) = received.write_error {
            failure.get_or_insert(e.to_string());
        }
        match failure {
            None => Ok(DownloadOutcome::Downloaded {
                name: name.to_string(),
                path,
                bytes: received.stats.bytes,
                elapsed,
            }),
            Some(reason) => Ok(DownloadOutcome::LocalWriteFailed {
                name: name.to_string(),
                path,
                reason,
            }),
        }
    }

    async fn create_local(&self, name: &str) -> ProtocolResult<tokio::fs::File> {
        let root = self.local.root();
        if !root.exists() {
            tokio::fs::create_dir_all(root)
                .await
                .map_err(|e| ProtocolError::fs(root.display().to_string(), e))?;
        }
        self.local.create(name).await
    }

    pub async fn list(&mut self) -> ProtocolResult<Listing> {
        write_command(&mut self.stream, Command::List.token()).await?;
        let count = read_size(&mut self.stream).await?;
        if count < 0 {
            return Err(ProtocolError::Desync(format!("listing count {}", count)));
        }
        let mut handshakes = 1;
        // the count comes off the wire; grow as entries actually arrive
        let mut entries = Vec::new();
        for _ in 0..count {
            let name = read_name(&mut self.stream).await?;
            send_ack(&mut self.stream).await?;
            let size = read_size(&mut self.stream).await?;
            send_ack(&mut self.stream).await?;
            if size < 0 {
                return Err(ProtocolError::Desync(format!("size {} for {}", size, name)));
            }
            handshakes += 2;
            entries.push(ListingEntry {
                name,
                size: size as u64,
            });
        }
        let total = read_size(&mut self.stream).await?;
        send_ack(&mut self.stream).await?;
        handshakes += 1;
        if total < 0 {
            return Err(ProtocolError::Desync(format!("directory total {}", total)));
        }
        Ok(Listing {
            entries,
            total: total as u64,
            handshakes,
        })
    }

    pub async fn remove(
        &mut self,
        name: &str,
        confirmer: &mut dyn Confirm,
    ) -> ProtocolResult<RemoveOutcome> {
        encode_name_len(name.len())?;
        write_command(&mut self.stream, Command::Remove.token()).await?;
        expect_ack(&mut self.stream).await?;
        write_name(&mut self.stream, name).await?;
        let name = name.to_string();
        match read_size(&mut self.stream).await? {
            NOT_FOUND => return Ok(RemoveOutcome::NotFound { name }),
            STATUS_OK => {}
            other => {
                return Err(ProtocolError::Desync(format!(
                    "existence reply {} for {}",
                    other, name
                )))
            }
        }

        if !confirmer.confirm(&name) {
            write_all(&mut self.stream, &[confirm::NO]).await?;
            return Ok(RemoveOutcome::Declined { name });
        }
        write_all(&mut self.stream, &[confirm::YES]).await?;
        match read_size(&mut self.stream).await? {
            STATUS_OK => Ok(RemoveOutcome::Removed { name }),
            _ => Ok(RemoveOutcome::Failed { name }),
        }
    }

    /// Say goodbye and close. The server's ack is awaited only briefly.
    pub async fn disconnect(mut self) -> ProtocolResult<()> {
        write_command(&mut self.stream, Command::Disconnect.token()).await?;
        match timeout(
            Duration::from_millis(DISCONNECT_WAIT_MS),
            expect_ack(&mut self.stream),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(error = %e, "no goodbye from server"),
            Err(_) => debug!("timed out waiting for goodbye"),
        }
        let _ = self.stream.shutdown().await;
        Ok(())
    }
}
