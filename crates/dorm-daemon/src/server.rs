//! Server setup and lifecycle management

use crate::api::create_router;
use crate::api::rest::state::AppState;
use crate::config::{DormConfig, StorageConfig};
use crate::error::{DaemonError, DaemonResult};
use crate::sweeper::Sweeper;
use axum::Router;
use dorm_core::{Clock, CredentialCodec, IdentityLifecycle, ReservationService, SystemClock};
use dorm_storage::memory::InMemoryDormStorage;
use dorm_storage::postgres::PostgresDormStorage;
use dorm_storage::DormStorage;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Dormitory helper daemon
pub struct Server {
    config: DormConfig,
    state: AppState,
    sweeper: Arc<Sweeper>,
}

impl Server {
    /// Validate the configuration, open storage and wire the services.
    pub async fn new(config: DormConfig) -> DaemonResult<Self> {
        config.validate()?;

        let storage: Arc<dyn DormStorage> = match &config.storage {
            StorageConfig::Memory => {
                tracing::warn!("Using in-memory storage; data is lost on restart");
                Arc::new(InMemoryDormStorage::new())
            }
            StorageConfig::Postgres {
                url,
                max_connections,
                connect_timeout_secs,
            } => {
                let store = PostgresDormStorage::connect_with_options(
                    url,
                    *max_connections,
                    *connect_timeout_secs,
                )
                .await?;
                tracing::info!(max_connections, "Connected to PostgreSQL");
                Arc::new(store)
            }
        };

        Self::with_storage(config, storage, Arc::new(SystemClock))
    }

    /// Wire the services over an already-open store.
    pub fn with_storage(
        config: DormConfig,
        storage: Arc<dyn DormStorage>,
        clock: Arc<dyn Clock>,
    ) -> DaemonResult<Self> {
        let codec = Arc::new(CredentialCodec::new(
            &config.credentials.secret,
            config.credential_ttl(),
        )?);

        let reservations = Arc::new(ReservationService::new(
            storage.clone(),
            config.reservation_policy(),
        ));
        let identities = Arc::new(IdentityLifecycle::new(
            storage,
            codec,
            clock,
            config.identity_policy(),
        ));

        if !config.identity.sweep_protects_reservation_holders {
            tracing::warn!(
                "Identity sweep will delete expired identities together with their reservations"
            );
        }

        let sweeper = Sweeper::new(identities.clone(), config.sweep_interval());
        let state = AppState::new(reservations, identities);

        Ok(Self {
            config,
            state,
            sweeper,
        })
    }

    /// HTTP router with all middleware applied
    pub fn router(&self) -> Router {
        create_router(self.state.clone(), &self.config.server)
    }

    /// Run the server
    pub async fn run(self) -> DaemonResult<()> {
        let addr = self.config.server.listen_addr;
        let app = self.router();

        // Create listener
        let listener = TcpListener::bind(addr).await?;

        tracing::info!("Dormitory daemon listening on {}", addr);

        // Start sweeper in background
        let sweeper = self.sweeper.clone();
        let sweeper_handle = tokio::spawn(async move {
            sweeper.start().await;
        });

        // Run server with graceful shutdown
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| DaemonError::Server(e.to_string()))?;

        tracing::info!("Dormitory daemon shutting down");

        // Stop sweeper
        self.sweeper.stop();
        if let Err(e) = sweeper_handle.await {
            tracing::warn!(error = %e, "Sweeper task ended abnormally");
        }

        Ok(())
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
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
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
