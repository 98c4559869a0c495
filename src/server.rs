use crate::audit::AuditLogger;
use crate::circuit_breaker::CircuitBreaker;
use crate::clock::{SharedClock, SystemClock};
use crate::config::Config;
use crate::config_validator::ConfigValidator;
use crate::error::GatewayError;
use crate::gateway::{Gateway, Limiters};
use crate::handlers::{
    append_order, append_request, audit_stats, circuit_breaker_status, detailed_health_check,
    health_check, search_audit_logs, AppState,
};
use crate::key_generator::KeyGenerator;
use crate::middleware::{logging_middleware, rate_limit_middleware};
use crate::rate_limiter::RateLimiter;
use crate::sheets::{EmulatedSheets, SheetsBackend};
use axum::routing::{get, post};
use axum::{middleware, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Build the router. Requests pass logging, then rate limiting, then the
/// handler.
pub fn create_app(state: AppState) -> Router {
    Router::new()
        // Guarded spreadsheet writes
        .route("/api/v1/orders/sheets", post(append_order))
        .route("/api/v1/requests/sheets", post(append_request))
        // Operator surface
        .route("/api/v1/health", get(health_check))
        .route("/api/v1/health/detailed", get(detailed_health_check))
        .route("/api/v1/circuit-breaker/status", get(circuit_breaker_status))
        .route("/api/v1/audit-logs/search", get(search_audit_logs))
        .route("/api/v1/audit-logs/stats", get(audit_stats))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(middleware::from_fn_with_state(
                    state.clone(),
                    logging_middleware,
                ))
                .layer(middleware::from_fn_with_state(
                    state.clone(),
                    rate_limit_middleware,
                )),
        )
        .with_state(state)
}

/// Wire the breaker, limiters, audit log and backend from configuration.
pub fn build_state(config: &Config, clock: SharedClock) -> AppState {
    let limits = config.rate_limits();
    let limiters = Limiters {
        global: RateLimiter::new("global", limits.global, clock.clone()),
        admin: RateLimiter::new("admin", limits.admin, clock.clone()),
    };

    let gateway = Gateway::new(
        CircuitBreaker::new("sheets", config.circuit_breaker(), clock.clone()),
        config.retry_policy(),
        AuditLogger::new(config.audit(), clock.clone()),
        limiters,
        clock.clone(),
    );
    let sheets: Arc<dyn SheetsBackend> =
        Arc::new(EmulatedSheets::new(config.data_dir.clone(), clock));

    AppState::new(
        Arc::new(gateway),
        sheets,
        KeyGenerator::new(config.trust_proxy_headers),
    )
}

/// Periodically evict rate-limit buckets whose window ended more than
/// `grace` ago.
pub fn spawn_bucket_sweeper(
    limiters: Limiters,
    every: Duration,
    grace: Duration,
) -> JoinHandle<()> {
    let grace =
        chrono::Duration::from_std(grace).unwrap_or_else(|_| chrono::Duration::days(36_500));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = limiters.global.sweep(grace) + limiters.admin.sweep(grace);
            if removed > 0 {
                tracing::debug!(
                    removed,
                    global = limiters.global.bucket_count(),
                    admin = limiters.admin.bucket_count(),
                    "Evicted idle rate limit buckets"
                );
            }
        }
    })
}

pub struct Server {
    app: Router,
    state: AppState,
    bind_addr: SocketAddr,
    cleanup_interval: Duration,
    idle_grace: Duration,
}

impl Server {
    pub fn new(config: Config) -> Result<Self, GatewayError> {
        ConfigValidator::validate(&config)?;

        let state = build_state(&config, SystemClock::shared());
        let app = create_app(state.clone());

        Ok(Self {
            app,
            state,
            bind_addr: config.bind_addr,
            cleanup_interval: config.cleanup_interval(),
            idle_grace: config.rate_limits().idle_grace,
        })
    }

    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = tokio::net::TcpListener::bind(self.bind_addr).await?;

        tracing::info!("sheetguard listening on {}", listener.local_addr()?);
        tracing::info!("Health check available at /api/v1/health");
        if self.state.keys.trusts_proxy_headers() {
            tracing::warn!("Rate limit keys come from X-Forwarded-For/X-Real-IP");
        }

        let sweeper = spawn_bucket_sweeper(
            self.state.gateway.limiters().clone(),
            self.cleanup_interval,
            self.idle_grace,
        );

        // Run server with graceful shutdown
        let served = axum::serve(
            listener,
            self.app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await;

        sweeper.abort();
        served?;
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::rate_limit_config::RateLimitRule;

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_evicts_expired_buckets() {
        let clock = MockClock::default();
        let shared: SharedClock = Arc::new(clock.clone());
        let limiters = Limiters {
            global: RateLimiter::new(
                "global",
                RateLimitRule::new(Duration::from_secs(1), 5),
                shared.clone(),
            ),
            admin: RateLimiter::new("admin", RateLimitRule::new(Duration::from_secs(1), 5), shared),
        };
        limiters.global.admit("a");
        limiters.admin.admit("a");

        let handle =
            spawn_bucket_sweeper(limiters.clone(), Duration::from_secs(10), Duration::from_secs(1));

        clock.advance_ms(2_500);
        tokio::time::sleep(Duration::from_secs(11)).await;

        assert_eq!(limiters.global.bucket_count(), 0);
        assert_eq!(limiters.admin.bucket_count(), 0);
        handle.abort();
    }

    #[test]
    fn test_build_state_uses_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            log_dir: dir.path().join("logs"),
            rate_limit_max_requests: 7,
            ..Config::default()
        };
        let state = build_state(&config, SystemClock::shared());
        assert_eq!(state.gateway.limiters().global.rule().max_requests, 7);
        assert_eq!(state.gateway.limiters().admin.rule().max_requests, 30);
        assert_eq!(state.gateway.audit().path(), dir.path().join("logs").join("audit.log"));
        assert!(!state.keys.trusts_proxy_headers());
    }
}
