//! Filebot - a Telegram bot for everyday file chores.
//!
//! Each chat can run these conversational workflows:
//! - Image resize (target file size or dimensions)
//! - Images to PDF
//! - PDF split, PDF to images, PDF merge
//! - PDF to Word / Excel, text message to file
//! - Archive extraction (zip, rar, 7z)
//!
//! ## Architecture
//!
//! ```text
//! Telegram ── getUpdates ──► TelegramChannel ──► Dispatcher ──► per-chat worker
//!                                                                  │
//!                                  SessionStore ◄── Workflow ◄─────┘
//!                                                     │
//! Telegram ◄── send/edit/delete ── Transport ◄────────┘  (+ Backends, Workspace)
//! ```

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod backends;
pub mod dispatcher;
pub mod error;
pub mod message;
pub mod progress;
pub mod recording;
pub mod routes;
pub mod session;
pub mod telegram;
pub mod traits;
pub mod workflows;
pub mod workspace;

// Re-export commonly used types
pub use backends::Backends;
pub use dispatcher::Dispatcher;
pub use error::{WorkflowError, WorkflowResult};
pub use message::{ChatId, EventPayload, EventShape, InboundEvent, MessageId};
pub use recording::{Outbound, RecordingTransport};
pub use routes::{build_router, serve_health};
pub use session::{SessionStore, WorkflowKind};
pub use telegram::TelegramChannel;
pub use traits::{Channel, ChannelError, ChannelResult, TransferObserver, Transport};
pub use workflows::{Workflow, WorkflowContext};
pub use workspace::Workspace;

use filebot_common::config::{Config, WorkspaceConfig};
use filebot_common::error::ResultExt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Create the scratch root and optionally clear what a previous run left behind.
pub fn prepare_workspace(config: &WorkspaceConfig) -> filebot_common::Result<Workspace> {
    std::fs::create_dir_all(&config.root)
        .context(format!("Failed to create workspace {}", config.root.display()))?;

    let workspace = Workspace::new(&config.root);
    if config.purge_on_startup {
        let removed = workspace.purge().context("Failed to purge workspace")?;
        tracing::info!(root = %config.root.display(), removed, "Workspace purged");
    }
    Ok(workspace)
}

/// Wire everything up around `transport`.
pub fn build_dispatcher(config: &Config, transport: Arc<dyn Transport>, workspace: Workspace) -> Arc<Dispatcher> {
    let ctx = Arc::new(WorkflowContext::new(
        transport,
        Arc::new(SessionStore::new()),
        Arc::new(workspace),
        Arc::new(Backends::from_config(&config.backends)),
        config.limits.clone(),
    ));
    Arc::new(Dispatcher::new(ctx))
}

/// Run the bot until Ctrl-C.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let workspace = prepare_workspace(&config.workspace)?;

    let mut channel = TelegramChannel::from_config(&config.telegram);
    channel.init().await?;
    let channel = Arc::new(channel);

    let dispatcher = build_dispatcher(&config, channel.clone(), workspace);
    let shutdown = CancellationToken::new();

    let addr = SocketAddr::from((
        config.health.bind.parse::<std::net::IpAddr>()?,
        config.health.port,
    ));
    let health_handle = tokio::spawn(serve_health(addr, shutdown.clone()));

    let sweeper_handle = config.idle_timeout().map(|timeout| {
        tracing::info!(timeout_secs = timeout.as_secs(), "Idle session eviction enabled");
        dispatcher.spawn_idle_sweeper(
            timeout,
            Duration::from_secs(config.sessions.sweep_interval_secs),
            shutdown.clone(),
        )
    });

    let signal_channel = channel.clone();
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            return;
        }
        tracing::info!("Shutdown requested");
        signal_shutdown.cancel();
        let _ = signal_channel.shutdown().await;
    });

    tracing::info!("Filebot started");
    let listener = Arc::clone(&dispatcher);
    let listened = channel.listen(move |event| listener.submit(event)).await;

    shutdown.cancel();
    dispatcher.shutdown().await;
    if let Some(handle) = sweeper_handle {
        let _ = handle.await;
    }
    match health_handle.await {
        Ok(Err(e)) => tracing::warn!(error = %e, "Health endpoint stopped with an error"),
        Err(e) => tracing::warn!(error = %e, "Health endpoint task failed"),
        Ok(Ok(())) => {}
    }

    listened?;
    tracing::info!("Filebot stopped");
    Ok(())
}
