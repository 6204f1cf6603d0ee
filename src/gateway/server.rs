//! Gateway server

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::{debug, info, warn};

use super::personalization::{Personalizer, StaticContentSource};
use super::router::{AppState, create_router};
use crate::config::Config;
use crate::failsafe::{CircuitBreaker, export_for_monitoring};
use crate::store::MemoryStateStore;
use crate::{Error, Result};

/// Personalization gateway server
pub struct Gateway {
    /// Configuration
    config: Config,
    /// Shared circuit breaker
    breaker: Arc<CircuitBreaker>,
    /// Shared personalization wrapper
    personalizer: Arc<Personalizer>,
}

impl Gateway {
    /// Create a new gateway with an in-memory breaker state store
    #[must_use]
    pub fn new(config: Config) -> Self {
        let store = Arc::new(MemoryStateStore::new());
        let breaker = Arc::new(CircuitBreaker::new(
            &config.failsafe.circuit_breaker,
            store,
        ));
        let source = Arc::new(StaticContentSource::new(&config.personalization));
        let personalizer = Arc::new(Personalizer::new(
            source,
            Arc::clone(&breaker),
            config.personalization.clone(),
        ));

        Self {
            config,
            breaker,
            personalizer,
        }
    }

    /// Run the gateway
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        // Create shutdown channel
        let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

        let state = Arc::new(AppState {
            personalizer: Arc::clone(&self.personalizer),
            breaker: Arc::clone(&self.breaker),
            environment: self.config.server.environment,
        });

        let app = create_router(state);

        let listener = TcpListener::bind(addr).await?;

        info!("============================================================");
        info!("PERSONA GATEWAY v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(host = %self.config.server.host, port = %self.config.server.port, "Listening");
        info!(
            environment = ?self.config.server.environment,
            max_errors = self.config.failsafe.circuit_breaker.max_errors,
            recovery_threshold = self.config.failsafe.circuit_breaker.recovery_threshold,
            cooldown = ?self.config.failsafe.circuit_breaker.cooldown,
            "Circuit breaker configured"
        );
        info!("Health endpoint:  GET  /api/middleware-health");
        info!("Control endpoint: POST /api/middleware-health");
        info!("Sync endpoint:    POST /api/personalization/sync");

        if self.config.server.environment.is_production() {
            info!("Manual breaker reset disabled (production)");
        } else {
            warn!("Manual breaker reset enabled (non-production)");
        }

        // Cooldown probe task: while open, an elapsed cooldown enables a
        // half-open probe even without traffic, so the health endpoint
        // reflects recovery eligibility.
        let health_config = self.config.failsafe.health_check.clone();
        let breaker = Arc::clone(&self.breaker);
        let mut shutdown_rx = shutdown_tx.subscribe();

        tokio::spawn(async move {
            if !health_config.enabled {
                return;
            }

            let mut interval = tokio::time::interval(health_config.interval);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if breaker.try_probe() {
                            debug!("Probe transition performed by health-check task");
                        }
                        let _ = export_for_monitoring(&breaker.metrics());
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
        });

        // Run server with graceful shutdown
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(shutdown_tx))
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;

        info!("Gateway stopped");
        Ok(())
    }
}

/// Shutdown signal handler
async fn shutdown_signal(shutdown_tx: tokio::sync::broadcast::Sender<()>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
    let _ = shutdown_tx.send(());
}
