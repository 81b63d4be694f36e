//! Health check HTTP server
//!
//! Endpoints for operators and container orchestration: overall health with
//! per-check detail, the metrics snapshot, and readiness/liveness probes.

use crate::observability::metrics::{current_timestamp, metrics};
use crate::retrieval::VectorStore;
use serde::Serialize;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::RwLock;
use warp::http::StatusCode;
use warp::Filter;

/// Seconds without a turn before activity is reported as idle
const TURN_IDLE_THRESHOLD_SECONDS: u64 = 300;

/// HTTP health check server
pub struct HealthServer {
    service_id: String,
    port: u16,
    vector_store: Option<Arc<dyn VectorStore>>,
    /// A sweep older than this is reported stale
    sweep_staleness_seconds: u64,
    additional_checks: Arc<RwLock<HashMap<String, HealthCheck>>>,
}

impl HealthServer {
    pub fn new(service_id: String, port: u16) -> Self {
        Self {
            service_id,
            port,
            vector_store: None,
            sweep_staleness_seconds: 2 * 3600,
            additional_checks: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Probe this store on every `/health` and `/ready` request
    pub fn with_vector_store(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.vector_store = Some(store);
        self
    }

    /// Expect a sweep at least every `interval_secs`; stale after two misses
    pub fn with_sweep_interval(mut self, interval_secs: u64) -> Self {
        self.sweep_staleness_seconds = interval_secs.saturating_mul(2);
        self
    }

    pub async fn add_health_check(&self, name: String, check: HealthCheck) {
        self.additional_checks.write().await.insert(name, check);
    }

    pub async fn remove_health_check(&self, name: &str) {
        self.additional_checks.write().await.remove(name);
    }

    /// Start the HTTP health server
    pub async fn start(self: Arc<Self>) {
        let health_server = self.clone();
        let ready_server = self.clone();

        // GET /health - overall status with detailed checks
        let health_route = warp::path("health").and(warp::get()).and_then(move || {
            let server = health_server.clone();
            async move {
                let status = server.get_health_status().await;
                let code = if status.status == "healthy" {
                    StatusCode::OK
                } else {
                    StatusCode::SERVICE_UNAVAILABLE
                };
                Ok::<_, Infallible>(warp::reply::with_status(warp::reply::json(&status), code))
            }
        });

        // GET /metrics - complete metrics export
        let metrics_route = warp::path("metrics")
            .and(warp::get())
            .map(|| warp::reply::json(&metrics().get_metrics()));

        // GET /ready - readiness probe, requires a reachable vector store
        let ready_route = warp::path("ready").and(warp::get()).and_then(move || {
            let server = ready_server.clone();
            async move {
                let ready = server.check_vector_store().await.status == "healthy";
                let response = ReadinessResponse {
                    ready,
                    timestamp: current_timestamp(),
                };
                let code = if ready {
                    StatusCode::OK
                } else {
                    StatusCode::SERVICE_UNAVAILABLE
                };
                Ok::<_, Infallible>(warp::reply::with_status(warp::reply::json(&response), code))
            }
        });

        // GET /live - liveness probe
        let live_route = warp::path("live").and(warp::get()).map(|| {
            warp::reply::json(&LivenessResponse {
                alive: true,
                timestamp: current_timestamp(),
            })
        });

        // GET / - endpoint listing
        let root_route = warp::path::end().and(warp::get()).map(|| {
            let endpoints = HashMap::from([
                ("/health", "Overall health status with detailed checks"),
                ("/metrics", "Turn, handler, retrieval and token metrics"),
                ("/ready", "Readiness probe (vector store reachable)"),
                ("/live", "Liveness probe"),
            ]);
            warp::reply::json(&endpoints)
        });

        let routes = health_route
            .or(metrics_route)
            .or(ready_route)
            .or(live_route)
            .or(root_route)
            .with(warp::cors().allow_any_origin());

        tracing::info!(port = self.port, "Starting health server");
        warp::serve(routes).run(([0, 0, 0, 0], self.port)).await;
    }

    async fn get_health_status(&self) -> HealthStatus {
        let mut checks = HashMap::new();
        checks.insert("vector_store".to_string(), self.check_vector_store().await);
        checks.insert("ttl_sweep".to_string(), self.check_sweep());
        checks.insert("turn_activity".to_string(), Self::check_turn_activity());

        for (name, check) in self.additional_checks.read().await.iter() {
            checks.insert(name.clone(), check.clone());
        }

        let healthy = checks
            .values()
            .all(|check| check.status == "healthy" || check.status == "idle");

        HealthStatus {
            status: if healthy { "healthy" } else { "degraded" }.to_string(),
            timestamp: current_timestamp(),
            service_id: self.service_id.clone(),
            uptime_seconds: metrics().get_metrics().uptime_seconds,
            checks,
        }
    }

    async fn check_vector_store(&self) -> HealthCheck {
        let reachable = match &self.vector_store {
            Some(store) => {
                let reachable = store.list_collections().await.is_ok();
                metrics().set_vector_store_reachable(reachable);
                reachable
            }
            None => metrics().vector_store_reachable(),
        };

        if reachable {
            HealthCheck::new("healthy", "Vector store reachable")
        } else {
            HealthCheck::new("unhealthy", "Vector store unreachable")
        }
    }

    fn check_sweep(&self) -> HealthCheck {
        let now = current_timestamp();
        let last_sweep = metrics().last_sweep_at();

        if last_sweep == 0 {
            HealthCheck::new("healthy", "No sweep has run yet")
        } else if now.saturating_sub(last_sweep) > self.sweep_staleness_seconds {
            HealthCheck::new(
                "stale",
                format!("Last sweep {} seconds ago", now.saturating_sub(last_sweep)),
            )
        } else {
            HealthCheck::new("healthy", "Sweep running on schedule")
        }
    }

    fn check_turn_activity() -> HealthCheck {
        let now = current_timestamp();
        let last_turn = metrics().last_turn_at();

        if last_turn == 0 {
            HealthCheck::new("idle", "No turns processed yet")
        } else if now.saturating_sub(last_turn) > TURN_IDLE_THRESHOLD_SECONDS {
            HealthCheck::new(
                "idle",
                format!("No turns for {} seconds", now.saturating_sub(last_turn)),
            )
        } else {
            HealthCheck::new("healthy", "Recent turn activity")
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    pub status: String,
    pub message: Option<String>,
    pub last_check: u64,
}

impl HealthCheck {
    pub fn new(status: &str, message: impl Into<String>) -> Self {
        Self {
            status: status.to_string(),
            message: Some(message.into()),
            last_check: current_timestamp(),
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthStatus {
    status: String,
    timestamp: u64,
    service_id: String,
    uptime_seconds: u64,
    checks: HashMap<String, HealthCheck>,
}

#[derive(Debug, Serialize)]
struct ReadinessResponse {
    ready: bool,
    timestamp: u64,
}

#[derive(Debug, Serialize)]
struct LivenessResponse {
    alive: bool,
    timestamp: u64,
}
