//! Startup helpers for the chat binaries.

use std::process::ExitCode;

use tracing_subscriber::EnvFilter;

use crate::chat::ConversationSession;
use crate::config::ChatConfig;
use crate::error::ChatResult;
use crate::server::{self, AppState};
use crate::store::HttpConversationStore;

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` is honoured; INFO is always enabled.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();
}

/// Run the development store server until Ctrl+C (used by the
/// `halldyll-chat-store` binary).
///
/// # Returns
/// `ExitCode::SUCCESS` on graceful shutdown, `1` on failure.
#[must_use]
pub fn run_store_server() -> ExitCode {
    init_tracing();

    tracing::info!("Starting Halldyll chat store v{}", env!("CARGO_PKG_VERSION"));

    let config = match ChatConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Invalid configuration: {e}");
            return ExitCode::from(1);
        }
    };

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to create runtime: {e}");
            return ExitCode::from(1);
        }
    };

    if let Err(e) = rt.block_on(server::run_server_with_shutdown(
        AppState::new(),
        config.server_port,
        shutdown_signal(),
    )) {
        tracing::error!("Server error: {e}");
        return ExitCode::from(1);
    }

    tracing::info!("Chat store stopped");
    ExitCode::SUCCESS
}

/// Build a session talking to the store configured in `config`.
///
/// # Errors
/// Returns an error if the store client cannot be created.
pub fn connect(config: &ChatConfig) -> ChatResult<ConversationSession<HttpConversationStore>> {
    tracing::info!("Conversation store: {}", config.store.base_url);
    let store = HttpConversationStore::new(&config.store)?;
    Ok(ConversationSession::new(store, config.match_policy))
}

/// Resolves on Ctrl+C.
pub async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for Ctrl+C: {e}");
        std::future::pending::<()>().await;
    }
}
