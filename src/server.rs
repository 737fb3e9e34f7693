//! Accept loop and per-connection command dispatch.

use crate::codec::read_command;
use crate::error::{ProtocolError, ProtocolResult};
use crate::journal::Journal;
use crate::protocol::Command;
use crate::registry::{Session, SessionGuard, SessionRegistry};
use crate::transfer::server::{self as ops, ServeContext, Served};
use anyhow::{Context, Result};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

pub struct Server {
    listener: TcpListener,
    ctx: ServeContext,
    registry: Arc<SessionRegistry>,
    journal: Arc<dyn Journal>,
}

impl Server {
    pub async fn bind(bind: &str, ctx: ServeContext, journal: Arc<dyn Journal>) -> Result<Self> {
        let listener = TcpListener::bind(bind)
            .await
            .with_context(|| format!("bind {}", bind))?;
        Ok(Self {
            listener,
            ctx,
            registry: Arc::new(SessionRegistry::new()),
            journal,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.registry)
    }

    /// Accept connections until `shutdown` resolves, then close every session.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        info!(
            addr = %self.local_addr()?,
            root = %self.ctx.share.root().display(),
            buffer_size = self.ctx.chunk_size,
            "ferryd listening"
        );
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => self.spawn_session(stream, peer),
                    Err(e) => warn!(error = %e, "accept failed"),
                },
            }
        }
        let closed = self.registry.disconnect_all();
        info!(closed, "server stopped");
        Ok(())
    }

    fn spawn_session(&self, stream: TcpStream, peer: SocketAddr) {
        let _ = stream.set_nodelay(true);
        let session = self.registry.register(peer);
        let guard = SessionGuard::new(Arc::clone(&self.registry), &session.id);
        let id = session.id.clone();
        let ctx = self.ctx.clone();
        let journal = Arc::clone(&self.journal);
        let task = tokio::spawn(async move {
            let _guard = guard;
            let mut stream = stream;
            journal.session_opened(&session.id, &session.peer);
            let _ = serve_session(&mut stream, &session, &ctx, journal.as_ref()).await;
            journal.session_closed(&session.id);
        });
        self.registry.attach(&id, task.abort_handle());
    }
}

/// Serve one connection until the peer leaves or an operation fails.
///
/// The returned error has already been logged and journaled; it is handed
/// back for callers that want to inspect it.
pub async fn serve_session<S>(
    stream: &mut S,
    session: &Session,
    ctx: &ServeContext,
    journal: &dyn Journal,
) -> ProtocolResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let token = match read_command(stream).await {
            Ok(Some(t)) => t,
            Ok(None) => {
                debug!(session = %session.id, "peer closed connection");
                return Ok(());
            }
            Err(e) => {
                warn!(session = %session.id, error = %e, "bad command frame; closing session");
                journal.failed(&session.id, "reading command", &e.to_string());
                return Err(e);
            }
        };
        let Some(cmd) = Command::from_token(&token) else {
            warn!(session = %session.id, token = %token, "unknown command");
            continue;
        };
        let result = match cmd {
            Command::Upload => ops::upload(stream, ctx).await,
            Command::Download => ops::download(stream, ctx).await,
            Command::List => ops::list(stream, ctx).await,
            Command::Remove => ops::remove(stream, ctx).await,
            Command::Disconnect | Command::Exit => ops::goodbye(stream).await,
            // client-local; never meaningful on the wire
            Command::Connect => {
                warn!(session = %session.id, token = %token, "unknown command");
                continue;
            }
        };
        match result {
            Ok(Served::Goodbye) => {
                debug!(session = %session.id, "goodbye");
                return Ok(());
            }
            Ok(served) => record(journal, &session.id, cmd, &served),
            Err(e) => {
                warn!(
                    session = %session.id,
                    operation = cmd.label(),
                    error = %e,
                    "operation failed; closing session"
                );
                journal.failed(&session.id, cmd.label(), &e.to_string());
                return Err(e);
            }
        }
    }
}

fn record(journal: &dyn Journal, session: &str, cmd: Command, served: &Served) {
    match served {
        Served::Stored {
            name,
            bytes,
            elapsed,
        } => journal.stored(session, name, *bytes, *elapsed),
        Served::Sent {
            name,
            bytes,
            elapsed,
        } => journal.sent(session, name, *bytes, *elapsed),
        Served::Listed { files, total } => journal.listed(session, *files, *total),
        Served::Removed { name } => journal.removed(session, name),
        Served::StoreFailed { name, reason, .. } | Served::RemoveFailed { name, reason } => {
            journal.failed(session, cmd.label(), &format!("{}: {}", name, reason))
        }
        Served::Missing { name } => {
            let missing = ProtocolError::NotFound(name.clone());
            journal.failed(session, cmd.label(), &missing.to_string())
        }
        Served::RemoveDeclined { .. } | Served::Goodbye => {}
    }
}
