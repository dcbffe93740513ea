use crate::api::AppState;
use crate::meta::models::{AppVersion, Platform};
use crate::meta::registry::Registry;
use crate::obs::Metrics;
use crate::storage::object_store::ObjectStore;
use crate::util::config::{Config, Credentials};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use bytes::Bytes;
use chrono::Utc;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub struct ServerHandle {
    shutdown: Option<oneshot::Sender<()>>,
    join: JoinHandle<()>,
    pub base_url: String,
}

impl ServerHandle {
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = self.join.await;
    }
}

pub async fn start_router_server(app: Router) -> ServerHandle {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let (tx, rx) = oneshot::channel();
    let join = tokio::spawn(async move {
        let _ = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = rx.await;
            })
            .await;
    });
    ServerHandle {
        shutdown: Some(tx),
        join,
        base_url: format!("http://{addr}"),
    }
}

/// In-memory stand-in for the hosted keyed-document registry, speaking the
/// same JSON REST dialect the production client expects. Failure switches
/// let tests force each operation class to return a server error.
#[derive(Clone, Default)]
pub struct RegistryBackend {
    pub records: Arc<Mutex<HashMap<String, Value>>>,
    next_key: Arc<AtomicU64>,
    pub fail_reads: Arc<AtomicBool>,
    pub fail_push: Arc<AtomicBool>,
    pub fail_puts: Arc<AtomicBool>,
    pub fail_deletes: Arc<AtomicBool>,
}

impl RegistryBackend {
    pub fn insert_record(&self, id: &str, release: &AppVersion) {
        let value = serde_json::to_value(release).expect("serialize release");
        self.records
            .lock()
            .expect("lock")
            .insert(id.to_string(), value);
    }

    pub fn record_count(&self) -> usize {
        self.records.lock().expect("lock").len()
    }
}

pub fn registry_router(backend: RegistryBackend) -> Router {
    Router::new()
        .route("/versions.json", get(list_docs).post(push_doc))
        .route(
            "/versions/{doc}",
            get(get_doc).put(put_doc).delete(delete_doc),
        )
        .with_state(backend)
}

fn backend_failure() -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, "backend failure").into_response()
}

async fn list_docs(
    State(backend): State<RegistryBackend>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if backend.fail_reads.load(Ordering::SeqCst) {
        return backend_failure();
    }
    let records = backend.records.lock().expect("lock").clone();
    let documents: Map<String, Value> = match equality_filter(&params) {
        Some((field, expected)) => records
            .into_iter()
            .filter(|(_, doc)| doc.get(&field).and_then(Value::as_i64) == Some(expected))
            .collect(),
        None => records.into_iter().collect(),
    };
    Json(Value::Object(documents)).into_response()
}

fn equality_filter(params: &HashMap<String, String>) -> Option<(String, i64)> {
    let field = params.get("orderBy")?.trim_matches('"').to_string();
    let expected = params.get("equalTo")?.parse().ok()?;
    Some((field, expected))
}

async fn push_doc(State(backend): State<RegistryBackend>, Json(body): Json<Value>) -> Response {
    if backend.fail_push.load(Ordering::SeqCst) {
        return backend_failure();
    }
    let next = backend.next_key.fetch_add(1, Ordering::SeqCst) + 1;
    let key = format!("push-{next:04}");
    backend
        .records
        .lock()
        .expect("lock")
        .insert(key.clone(), body);
    Json(json!({"name": key})).into_response()
}

async fn get_doc(State(backend): State<RegistryBackend>, Path(doc): Path<String>) -> Response {
    if backend.fail_reads.load(Ordering::SeqCst) {
        return backend_failure();
    }
    let id = doc.strip_suffix(".json").unwrap_or(&doc);
    let value = backend
        .records
        .lock()
        .expect("lock")
        .get(id)
        .cloned()
        .unwrap_or(Value::Null);
    Json(value).into_response()
}

async fn put_doc(
    State(backend): State<RegistryBackend>,
    Path(doc): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    if backend.fail_puts.load(Ordering::SeqCst) {
        return backend_failure();
    }
    let id = doc.strip_suffix(".json").unwrap_or(&doc).to_string();
    backend.records.lock().expect("lock").insert(id, body.clone());
    Json(body).into_response()
}

async fn delete_doc(State(backend): State<RegistryBackend>, Path(doc): Path<String>) -> Response {
    if backend.fail_deletes.load(Ordering::SeqCst) {
        return backend_failure();
    }
    let id = doc.strip_suffix(".json").unwrap_or(&doc);
    backend.records.lock().expect("lock").remove(id);
    Json(Value::Null).into_response()
}

/// In-memory stand-in for the hosted bucket/object store.
#[derive(Clone, Default)]
pub struct StoreBackend {
    pub objects: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    public_objects: Arc<Mutex<Vec<String>>>,
    pub fail_uploads: Arc<AtomicBool>,
    pub fail_reads: Arc<AtomicBool>,
    pub fail_deletes: Arc<AtomicBool>,
    pub fail_acl: Arc<AtomicBool>,
}

impl StoreBackend {
    pub fn insert_object(&self, key: &str, data: &[u8]) {
        self.objects
            .lock()
            .expect("lock")
            .insert(key.to_string(), data.to_vec());
    }

    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().expect("lock").get(key).cloned()
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().expect("lock").len()
    }

    pub fn is_public(&self, key: &str) -> bool {
        self.public_objects
            .lock()
            .expect("lock")
            .iter()
            .any(|entry| entry == key)
    }
}

pub fn store_router(backend: StoreBackend) -> Router {
    Router::new()
        .route("/upload/v1/b/{bucket}/o", post(upload_object))
        .route(
            "/v1/b/{bucket}/o/{key}",
            get(read_object).delete(delete_object),
        )
        .route("/v1/b/{bucket}/o/{key}/acl", put(grant_object_acl))
        .with_state(backend)
}

async fn upload_object(
    State(backend): State<StoreBackend>,
    Query(params): Query<HashMap<String, String>>,
    body: Bytes,
) -> Response {
    let Some(name) = params.get("name") else {
        return (StatusCode::BAD_REQUEST, "missing name").into_response();
    };
    if backend.fail_uploads.load(Ordering::SeqCst) {
        return backend_failure();
    }
    backend
        .objects
        .lock()
        .expect("lock")
        .insert(name.clone(), body.to_vec());
    Json(json!({"name": name, "size": body.len()})).into_response()
}

async fn read_object(
    State(backend): State<StoreBackend>,
    Path((_bucket, key)): Path<(String, String)>,
) -> Response {
    if backend.fail_reads.load(Ordering::SeqCst) {
        return backend_failure();
    }
    match backend.object(&key) {
        Some(data) => data.into_response(),
        None => (StatusCode::NOT_FOUND, "no such object").into_response(),
    }
}

async fn delete_object(
    State(backend): State<StoreBackend>,
    Path((_bucket, key)): Path<(String, String)>,
) -> Response {
    if backend.fail_deletes.load(Ordering::SeqCst) {
        return backend_failure();
    }
    match backend.objects.lock().expect("lock").remove(&key) {
        Some(_) => StatusCode::OK.into_response(),
        None => (StatusCode::NOT_FOUND, "no such object").into_response(),
    }
}

async fn grant_object_acl(
    State(backend): State<StoreBackend>,
    Path((_bucket, key)): Path<(String, String)>,
) -> Response {
    if backend.fail_acl.load(Ordering::SeqCst) {
        return backend_failure();
    }
    backend.public_objects.lock().expect("lock").push(key);
    Json(json!({"entity": "allUsers", "role": "READER"})).into_response()
}

pub struct TestBackends {
    pub registry: RegistryBackend,
    pub store: StoreBackend,
    pub registry_server: ServerHandle,
    pub store_server: ServerHandle,
}

pub fn base_config(database_url: &str, storage_url: &str) -> Config {
    Config {
        credentials: Credentials {
            api_token: "test-token".to_string(),
        },
        database_url: database_url.trim_end_matches('/').to_string(),
        storage_url: storage_url.trim_end_matches('/').to_string(),
        storage_bucket: "releases-test".to_string(),
        listen: "127.0.0.1:0".to_string(),
        metrics_listen: "127.0.0.1:0".to_string(),
        upload_timeout: Duration::from_secs(30),
        log_level: "info".to_string(),
    }
}

/// Spin up mock registry and store servers and build an `AppState` whose
/// clients point at them.
pub async fn build_state() -> (AppState, TestBackends) {
    let registry_backend = RegistryBackend::default();
    let store_backend = StoreBackend::default();
    let registry_server = start_router_server(registry_router(registry_backend.clone())).await;
    let store_server = start_router_server(store_router(store_backend.clone())).await;
    let config = base_config(&registry_server.base_url, &store_server.base_url);
    let registry = Registry::from_config(&config);
    let store = ObjectStore::from_config(&config);
    let state = AppState::new(config, registry, store, Metrics::new());
    (
        state,
        TestBackends {
            registry: registry_backend,
            store: store_backend,
            registry_server,
            store_server,
        },
    )
}

pub fn sample_release(platform: Platform, version: &str, code: i64) -> AppVersion {
    let now = Utc::now();
    AppVersion {
        id: String::new(),
        version: version.to_string(),
        version_code: code,
        platform,
        download_url: format!("/download/{version}?platform={platform}"),
        release_notes: String::new(),
        file_size: 4,
        checksum: "ab".repeat(32),
        created_at: now,
        updated_at: now,
        storage_path: format!(
            "releases/{platform}/{version}-1700000000{}",
            platform.extension()
        ),
    }
}

/// Build a `multipart/form-data` payload by hand: text fields in order,
/// then optionally a `file` part. Returns `(content_type, body)`.
pub fn multipart_payload(
    fields: &[(&str, &str)],
    file: Option<(&str, &[u8])>,
) -> (String, Vec<u8>) {
    const BOUNDARY: &str = "ota-test-boundary";
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    if let Some((filename, data)) = file {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; \
filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    (
        format!("multipart/form-data; boundary={BOUNDARY}"),
        body,
    )
}
