// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Process wiring: store, encoder client, registrar, HTTP listener.
//!
//! Shutdown is driven by a `CancellationToken`. Ctrl-C or SIGTERM cancels
//! it, and the listener then stops accepting connections and gives
//! in-flight requests a grace period to finish.

use std::sync::Arc;
use std::time::Duration;

use axum_server::tls_rustls::RustlsConfig;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::api::router;
use crate::config::Config;
use crate::crypto::Secp256k1KeyGenerator;
use crate::provisioner::{EncoderClient, ProvisionerError};
use crate::registrar::DeviceRegistrar;
use crate::state::AppState;
use crate::storage::{RedbDeviceStore, StoreError};
use crate::telemetry::ProvisionerMetrics;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to open device store: {0}")]
    Store(#[from] StoreError),

    #[error("device store worker failed: {0}")]
    StoreWorker(#[from] tokio::task::JoinError),

    #[error("failed to build encoder client: {0}")]
    Encoder(#[from] ProvisionerError),

    #[error("failed to load TLS certificate: {0}")]
    Tls(std::io::Error),

    #[error("failed to install rustls crypto provider")]
    CryptoProvider,

    #[error("server error: {0}")]
    Serve(std::io::Error),
}

/// Build the application state from configuration.
///
/// Opening the store derives the column key and touches the disk, so it
/// runs on a blocking worker.
pub async fn build_state(config: &Config) -> Result<AppState, ServerError> {
    let path = config.database_path.clone();
    let password = config.encryption_password.clone();
    let store =
        tokio::task::spawn_blocking(move || RedbDeviceStore::open(&path, &password)).await??;
    let encoder = EncoderClient::new(config.encoder_url.clone(), Handle::current())?;
    let metrics = Arc::new(ProvisionerMetrics::new());

    let registrar = DeviceRegistrar::new(store, encoder, Secp256k1KeyGenerator::new(), metrics)
        .verbose(config.verbose);

    Ok(AppState::new(registrar))
}

/// Serve until `shutdown` is cancelled.
pub async fn serve(config: Config, shutdown: CancellationToken) -> Result<(), ServerError> {
    let state = build_state(&config).await?;
    let app = router(state);
    let addr = config.listen_addr;

    let handle = axum_server::Handle::new();
    let shutdown_handle = handle.clone();
    tokio::spawn(async move {
        shutdown.cancelled().await;
        info!(grace_secs = SHUTDOWN_GRACE.as_secs(), "shutting down");
        shutdown_handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
    });

    match &config.tls {
        Some(tls) => {
            // Must happen before any rustls config is built.
            if rustls::crypto::CryptoProvider::get_default().is_none() {
                rustls::crypto::ring::default_provider()
                    .install_default()
                    .map_err(|_| ServerError::CryptoProvider)?;
            }

            let tls_config = RustlsConfig::from_pem_file(&tls.cert, &tls.key)
                .await
                .map_err(ServerError::Tls)?;

            info!(%addr, encoder = %config.encoder_url, "listening on https (docs at /docs)");
            axum_server::bind_rustls(addr, tls_config)
                .handle(handle)
                .serve(app.into_make_service())
                .await
                .map_err(ServerError::Serve)
        }
        None => {
            info!(%addr, encoder = %config.encoder_url, "listening on http (docs at /docs)");
            axum_server::bind(addr)
                .handle(handle)
                .serve(app.into_make_service())
                .await
                .map_err(ServerError::Serve)
        }
    }
}

/// Cancel `token` on Ctrl-C or SIGTERM.
pub fn cancel_on_signal(token: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    warn!(error = %e, "failed to listen for SIGTERM");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {}
            _ = terminate => {}
        }
        token.cancel();
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LogFormat, TlsPaths};
    use crate::registrar::RegistrationService;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> Config {
        Config {
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            encoder_url: "http://127.0.0.1:9".parse().unwrap(),
            database_path: dir.path().join("nested").join("devicereg.redb"),
            encryption_password: "password".to_string(),
            verbose: true,
            tls: None,
            log_format: LogFormat::Pretty,
        }
    }

    #[tokio::test]
    async fn build_state_opens_store() {
        let dir = TempDir::new().unwrap();
        let state = build_state(&config(&dir)).await.unwrap();
        assert!(state.registrar.check_ready().is_ok());
        assert!(dir.path().join("nested").join("devicereg.redb").exists());
    }

    #[tokio::test]
    async fn wrong_password_fails_startup() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        build_state(&config).await.unwrap();

        config.encryption_password = "other".to_string();
        let result = build_state(&config).await;
        assert!(matches!(result, Err(ServerError::Store(_))));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn store_opens_off_the_runtime_thread() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);

        // Only gets polled if `build_state` yields to the runtime.
        let ticks = Arc::new(AtomicUsize::new(0));
        let ticker = tokio::spawn({
            let ticks = ticks.clone();
            async move {
                loop {
                    ticks.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
            }
        });

        let state = build_state(&config).await.unwrap();
        assert!(ticks.load(Ordering::SeqCst) > 0);
        assert!(state.registrar.check_ready().is_ok());
        ticker.abort();
    }

    #[tokio::test]
    async fn cancelled_server_stops() {
        let dir = TempDir::new().unwrap();
        let token = CancellationToken::new();
        let server = tokio::spawn(serve(config(&dir), token.clone()));

        tokio::time::sleep(Duration::from_millis(200)).await;
        token.cancel();

        let result = tokio::time::timeout(Duration::from_secs(10), server)
            .await
            .expect("server did not stop")
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn missing_certificate_fails_startup() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        config.tls = Some(TlsPaths {
            cert: dir.path().join("missing.pem"),
            key: dir.path().join("missing-key.pem"),
        });

        let result = serve(config, CancellationToken::new()).await;
        assert!(matches!(result, Err(ServerError::Tls(_))));
    }
}
