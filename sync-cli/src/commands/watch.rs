//! Watch command - follow a live document.

use std::path::PathBuf;

use anyhow::{Context, Result};
use livesync_client::{SseTransport, SyncConfig, SyncHandle, TransportKind, WsTransport};

use super::render;
use crate::config::{CliConfig, TransportChoice};

/// Command-line options for `watch`.
#[derive(Debug, Default)]
pub struct Options {
    pub url: Option<String>,
    pub transport: Option<TransportChoice>,
    pub config: Option<PathBuf>,
    pub base_url: Option<String>,
    pub pretty: bool,
}

/// Run the watch command until Ctrl+C.
pub async fn run(options: Options) -> Result<()> {
    let file = match &options.config {
        Some(path) => CliConfig::from_file(path).await?,
        None => CliConfig::default(),
    };
    let (kind, sync) = resolve(options.url, options.base_url, options.transport, file);

    tracing::info!(url = %sync.url, ?kind, "watching");

    let builder = SyncHandle::builder(sync)
        .on_change(|connected| tracing::info!(connected, "connection changed"))
        .on_error(|e| tracing::warn!(error = %e, "sync error"));
    let handle = match kind {
        TransportKind::Stream => builder.spawn(WsTransport::new()),
        TransportKind::Push => builder.spawn(SseTransport::new()),
    }
    .context("Failed to start sync")?;

    let mut documents = handle.subscribe();
    loop {
        tokio::select! {
            changed = documents.changed() => {
                if changed.is_err() {
                    break;
                }
                let doc = documents.borrow_and_update().clone();
                println!("{}", render(&doc, options.pretty)?);
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            }
        }
    }

    handle.disconnect().await.context("Failed to disconnect")?;
    Ok(())
}

/// Combine flags and config file. Flags win; otherwise the transport follows
/// the endpoint's scheme, then the base URL's.
fn resolve(
    url: Option<String>,
    base_url: Option<String>,
    transport: Option<TransportChoice>,
    file: CliConfig,
) -> (TransportKind, SyncConfig) {
    let mut sync = file.sync;
    if let Some(url) = url {
        sync.url = url;
    }
    if let Some(base_url) = base_url {
        sync.base_url = Some(base_url);
    }

    let choice = transport
        .or(file.transport)
        .or_else(|| TransportChoice::for_url(&sync.url))
        .or_else(|| sync.base_url.as_deref().and_then(TransportChoice::for_url));
    let kind = choice.map(TransportKind::from).unwrap_or_default();
    (kind, sync)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_overrides_config() {
        let file = CliConfig {
            transport: Some(TransportChoice::Push),
            sync: SyncConfig::new("wss://example.com/sync"),
        };
        let (kind, _) = resolve(None, None, Some(TransportChoice::Stream), file);
        assert_eq!(kind, TransportKind::Stream);
    }

    #[test]
    fn config_transport_beats_scheme() {
        let file = CliConfig {
            transport: Some(TransportChoice::Push),
            sync: SyncConfig::default(),
        };
        let (kind, _) = resolve(Some("ws://localhost/sync".into()), None, None, file);
        assert_eq!(kind, TransportKind::Push);
    }

    #[test]
    fn scheme_picks_transport() {
        let (kind, sync) = resolve(
            Some("wss://example.com/live".into()),
            None,
            None,
            CliConfig::default(),
        );
        assert_eq!(kind, TransportKind::Stream);
        assert_eq!(sync.url, "wss://example.com/live");
    }

    #[test]
    fn relative_url_follows_base_scheme() {
        let (kind, sync) = resolve(
            None,
            Some("https://example.com".into()),
            None,
            CliConfig::default(),
        );
        assert_eq!(kind, TransportKind::Push);
        assert_eq!(sync.url, "/sync");
        assert_eq!(sync.base_url.as_deref(), Some("https://example.com"));
    }
}
