use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use ferry::cli::DaemonOpts;
use ferry::config::ServerSettings;
use ferry::journal::open_journal;
use ferry::server::Server;
use ferry::share::SharedDir;
use ferry::transfer::server::ServeContext;

fn main() -> Result<()> {
    let opts = DaemonOpts::parse();
    let settings = ServerSettings::load(opts).context("Failed to load configuration")?;
    ferry::init_tracing(&settings.log_level);

    let share = SharedDir::open(&settings.root)
        .with_context(|| format!("Failed to open root directory: {}", settings.root.display()))?;
    let journal = open_journal(settings.journal.as_deref(), settings.journal_format)?;

    info!(
        root = %share.root().display(),
        bind = %settings.bind,
        buffer_size = settings.buffer_size,
        journal = ?settings.journal,
        "starting ferryd"
    );
    if settings.bind.starts_with("0.0.0.0") {
        warn!("binding to all interfaces; the protocol has no encryption or authentication");
    }

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    rt.block_on(async {
        let ctx = ServeContext {
            share,
            chunk_size: settings.buffer_size,
        };
        let server = Server::bind(&settings.bind, ctx, journal).await?;
        server
            .run_until(async {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => info!("interrupt received, shutting down"),
                    Err(e) => {
                        warn!(error = %e, "cannot listen for ctrl-c");
                        std::future::pending::<()>().await
                    }
                }
            })
            .await
    })
}
