//! closerd - webhook daemon that closes mistaken pull requests.
//!
//! Library components for the daemon process.

pub mod check;
pub mod config;
pub mod github;
pub mod registry;
pub mod server;

use std::fmt;
use std::sync::Arc;

use eyre::WrapErr;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub use config::DaemonConfig;
use github::GithubClient;
use registry::HandlerRegistry;
use server::{AppState, DeliveryGuard};

/// Daemon state.
pub struct Daemon {
    config: DaemonConfig,
    state: Arc<AppState>,
    cancel: CancellationToken,
}

impl fmt::Debug for Daemon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Daemon")
            .field("addr", &self.config.addr())
            .field("api_base", &self.config.api_base)
            .field("state", &self.state)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Daemon {
    /// Create a daemon talking to the GitHub API described by `config`.
    pub fn new(config: DaemonConfig) -> eyre::Result<Self> {
        let github = GithubClient::new(
            &config.api_base,
            config.token.as_deref(),
            config.request_timeout(),
        )
        .wrap_err("failed to build github client")?;

        let state = Arc::new(AppState {
            registry: HandlerRegistry::with_default_handlers(&config.config_file),
            collaborator: Arc::new(github),
            deliveries: DeliveryGuard::new(config.delivery_cache),
        });

        Ok(Self {
            config,
            state,
            cancel: CancellationToken::new(),
        })
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// Token that stops the server when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Serve webhooks until shutdown is requested.
    pub async fn run(&self) -> eyre::Result<()> {
        info!("closerd starting on {}", self.config.addr());
        info!("github api: {}", self.config.api_base);
        info!("repository config: .github/{}", self.config.config_file);
        if self.config.token.is_some() {
            info!("github token: configured");
        } else {
            warn!("github token: not configured, api calls will be unauthenticated");
        }
        match &self.state.deliveries {
            Some(_) => info!("delivery guard: {} ids", self.config.delivery_cache),
            None => info!("delivery guard: disabled"),
        }

        server::start_server(
            Arc::clone(&self.state),
            self.config.addr(),
            self.cancel.clone(),
        )
        .await
        .wrap_err_with(|| format!("webhook server on {} failed", self.config.addr()))?;

        info!("closerd stopped");
        Ok(())
    }

    /// Request graceful shutdown.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn daemon_respects_delivery_cache_setting() {
        let daemon = Daemon::new(DaemonConfig {
            delivery_cache: 0,
            ..DaemonConfig::default()
        })
        .unwrap();
        assert!(daemon.state().deliveries.is_none());
        assert!(daemon.state().registry.get("pull_request", "opened").is_some());
    }

    #[test]
    fn debug_output_omits_token() {
        let daemon = Daemon::new(DaemonConfig {
            token: Some("ghp_secret".to_string()),
            ..DaemonConfig::default()
        })
        .unwrap();
        let rendered = format!("{daemon:?}");
        assert!(rendered.contains("127.0.0.1:7800"));
        assert!(rendered.contains("AppState"));
        assert!(!rendered.contains("ghp_secret"));
    }

    #[test]
    fn invalid_token_fails_construction() {
        let result = Daemon::new(DaemonConfig {
            token: Some("line\nbreak".to_string()),
            ..DaemonConfig::default()
        });
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn shutdown_stops_running_server() {
        let daemon = Arc::new(
            Daemon::new(DaemonConfig {
                port: 0,
                ..DaemonConfig::default()
            })
            .unwrap(),
        );

        let runner = Arc::clone(&daemon);
        let handle = tokio::spawn(async move { runner.run().await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        daemon.shutdown();

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }
}
