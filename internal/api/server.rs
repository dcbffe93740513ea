use crate::api::{ota, AppState};
use crate::obs::MetricsLayer;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, TextEncoder};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub struct Servers {
    handles: Vec<JoinHandle<()>>,
}

impl Servers {
    pub async fn run_all(self) {
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

pub fn build_servers(state: AppState) -> Result<Servers, String> {
    let mut handles = Vec::new();

    let api_app = ota::router(state.clone()).layer(MetricsLayer::new(state.metrics.clone(), "api"));
    handles.push(spawn_server(&state.config.listen, api_app)?);

    let metrics_app = metrics_router(state.clone())
        .layer(MetricsLayer::new(state.metrics.clone(), "metrics"));
    handles.push(spawn_server(&state.config.metrics_listen, metrics_app)?);

    Ok(Servers { handles })
}

fn spawn_server(addr: &str, app: Router) -> Result<JoinHandle<()>, String> {
    let socket: SocketAddr = addr
        .parse()
        .map_err(|_| format!("invalid listen addr {addr}"))?;
    let handle = tokio::spawn(async move {
        let listener = match TcpListener::bind(socket).await {
            Ok(val) => val,
            Err(_) => return,
        };
        let _ = axum::serve(listener, app).await;
    });
    Ok(handle)
}

fn metrics_router(state: AppState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(ready_handler))
        .with_state(state)
}

async fn metrics_handler(State(state): State<AppState>) -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    let _ = encoder.encode(&state.metrics.gather(), &mut buffer);
    String::from_utf8_lossy(&buffer).to_string()
}

async fn ready_handler(State(state): State<AppState>) -> (StatusCode, &'static str) {
    if !check_registry_ready(&state).await {
        return (StatusCode::SERVICE_UNAVAILABLE, "registry not ready");
    }
    (StatusCode::OK, "ok")
}

async fn check_registry_ready(state: &AppState) -> bool {
    tokio::time::timeout(std::time::Duration::from_secs(3), state.registry.ping())
        .await
        .is_ok_and(|result| result.is_ok())
}

#[cfg(test)]
mod tests {
    use super::{build_servers, metrics_handler, metrics_router, ready_handler, spawn_server};
    use crate::meta::registry::Registry;
    use crate::test_support;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::routing::get;
    use axum::Router;
    use tokio::time::{sleep, Duration};
    use tower::ServiceExt;

    #[tokio::test]
    async fn build_servers_rejects_invalid_listen() {
        let (mut state, _backends) = test_support::build_state().await;
        state.config.listen = "invalid".to_string();
        let err = build_servers(state).err().expect("err");
        assert!(err.contains("invalid listen addr"));
    }

    #[tokio::test]
    async fn build_servers_rejects_invalid_metrics_listen() {
        let (mut state, _backends) = test_support::build_state().await;
        state.config.listen = "127.0.0.1:0".to_string();
        state.config.metrics_listen = "invalid".to_string();
        let err = build_servers(state).err().expect("err");
        assert!(err.contains("invalid listen addr"));
    }

    #[tokio::test]
    async fn build_servers_starts_both_listeners() {
        let (mut state, _backends) = test_support::build_state().await;
        state.config.listen = "127.0.0.1:0".to_string();
        state.config.metrics_listen = "127.0.0.1:0".to_string();
        let servers = build_servers(state).expect("servers");
        assert_eq!(servers.handles.len(), 2);
        sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn servers_run_all_waits_for_handles() {
        let handle = tokio::spawn(async {});
        let servers = super::Servers {
            handles: vec![handle],
        };
        servers.run_all().await;
    }

    #[tokio::test]
    async fn spawn_server_handles_bind_failure() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        let app = Router::new().route("/healthz", get(|| async { "ok" }));
        let handle = spawn_server(&addr.to_string(), app).expect("spawn");
        sleep(Duration::from_millis(50)).await;
        handle.abort();
        drop(listener);
    }

    #[tokio::test]
    async fn metrics_router_healthz_returns_ok() {
        let (state, _backends) = test_support::build_state().await;
        let app = metrics_router(state);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/healthz")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn metrics_handler_returns_payload() {
        let (state, _backends) = test_support::build_state().await;
        state
            .metrics
            .publishes
            .with_label_values(&["ok"])
            .inc();
        let body = metrics_handler(axum::extract::State(state)).await;
        assert!(body.contains("ota_publishes_total"));
    }

    #[tokio::test]
    async fn ready_handler_reports_registry_state() {
        let (state, _backends) = test_support::build_state().await;
        let (status, _) = ready_handler(axum::extract::State(state.clone())).await;
        assert_eq!(status, StatusCode::OK);

        let mut broken = state;
        broken.registry = Registry::new("http://127.0.0.1:1", "test-token");
        let (status, message) = ready_handler(axum::extract::State(broken)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(message, "registry not ready");
    }
}
