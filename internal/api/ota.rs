use crate::api::AppState;
use crate::meta::models::{AppVersion, Platform};
use crate::release::error::ReleaseError;
use crate::release::publish::{self, ReleaseDraft};
use crate::release::{delivery, resolve};
use axum::body::Body;
use axum::extract::multipart::{Field, Multipart};
use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use serde_json::json;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/check-update", post(check_update))
        .route("/download/{version}", get(download))
        .route("/upload", post(upload))
        .route("/versions", get(list_versions))
        .route("/versions/{id}", delete(delete_version))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::disable())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct UpdateCheckRequest {
    current_version: String,
    current_code: i64,
    platform: String,
}

#[derive(Debug, Serialize)]
struct UpdateCheckResponse {
    update_available: bool,
    #[serde(skip_serializing_if = "is_false")]
    is_mandatory: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    latest_version: Option<AppVersion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    change_log: Option<String>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

#[derive(Debug, Default, Deserialize)]
struct PlatformQuery {
    platform: Option<String>,
}

async fn check_update(
    State(state): State<AppState>,
    Json(request): Json<UpdateCheckRequest>,
) -> Result<Json<UpdateCheckResponse>, ReleaseError> {
    let platform = Platform::parse(&request.platform).ok_or(ReleaseError::InvalidPlatform)?;
    if request.current_code <= 0 {
        return Err(ReleaseError::InvalidVersionCode);
    }
    tracing::debug!(
        platform = %platform,
        current_version = %request.current_version,
        current_code = request.current_code,
        "update check"
    );

    let check = resolve::resolve(&state.registry, platform, request.current_code).await?;
    let outcome = if check.update_available {
        "available"
    } else {
        "current"
    };
    state
        .metrics
        .update_checks
        .with_label_values(&[platform.as_str(), outcome])
        .inc();

    let change_log = check
        .latest
        .as_ref()
        .map(|latest| latest.release_notes.clone())
        .filter(|notes| !notes.is_empty());
    Ok(Json(UpdateCheckResponse {
        update_available: check.update_available,
        is_mandatory: check.is_mandatory,
        latest_version: check.latest,
        change_log,
    }))
}

async fn download(
    State(state): State<AppState>,
    Path(version): Path<String>,
    Query(query): Query<PlatformQuery>,
) -> Result<Response, ReleaseError> {
    let platform = platform_or_default(query.platform.as_deref())?;
    let (release, stream) =
        match delivery::fetch(&state.registry, &state.store, &version, platform).await {
            Ok(fetched) => fetched,
            Err(err) => {
                state
                    .metrics
                    .downloads
                    .with_label_values(&[platform.as_str(), "error"])
                    .inc();
                return Err(err);
            }
        };
    state
        .metrics
        .downloads
        .with_label_values(&[platform.as_str(), "ok"])
        .inc();

    let filename = delivery::attachment_filename(&release);
    let mut response = (StatusCode::OK, Body::from_stream(stream)).into_response();
    let headers = response.headers_mut();
    headers.insert(
        "Content-Description",
        HeaderValue::from_static("File Transfer"),
    );
    headers.insert(
        header::CONTENT_DISPOSITION,
        format!("attachment; filename={filename}").parse().unwrap(),
    );
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(platform.content_type()),
    );
    headers.insert(
        header::CONTENT_LENGTH,
        release.file_size.to_string().parse().unwrap(),
    );
    Ok(response)
}

async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, ReleaseError> {
    let budget = state.config.upload_timeout;
    let published = match tokio::time::timeout(budget, run_upload(&state, &mut multipart)).await {
        Ok(result) => result,
        Err(_) => {
            tracing::error!(
                budget_seconds = budget.as_secs(),
                "upload abandoned after exceeding its time budget"
            );
            Err(ReleaseError::Storage)
        }
    };
    let result_label = if published.is_ok() { "ok" } else { "error" };
    state
        .metrics
        .publishes
        .with_label_values(&[result_label])
        .inc();

    let release = published?;
    let download_url = release.download_url.clone();
    Ok((
        StatusCode::OK,
        Json(json!({
            "message": "version uploaded successfully",
            "version": release,
            "download_url": download_url,
        })),
    )
        .into_response())
}

/// Walk the multipart fields in arrival order, collecting metadata until the
/// `file` field starts the pipeline. Metadata must precede the file so
/// validation completes before any byte is streamed.
async fn run_upload(
    state: &AppState,
    multipart: &mut Multipart,
) -> Result<AppVersion, ReleaseError> {
    let mut draft = ReleaseDraft::default();
    loop {
        let field = multipart.next_field().await.map_err(|err| {
            tracing::warn!(error = %err, "multipart decode failed");
            ReleaseError::InvalidMultipart
        })?;
        let Some(field) = field else {
            return Err(ReleaseError::MissingFile);
        };
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "version" => draft.version = field_text(field).await?,
            "version_code" => draft.version_code = field_text(field).await?,
            "platform" => draft.platform = field_text(field).await?,
            "release_notes" => draft.release_notes = field_text(field).await?,
            "file" => {
                let filename = field.file_name().unwrap_or_default().to_string();
                return publish::publish(
                    &state.registry,
                    &state.store,
                    &draft,
                    &filename,
                    file_stream(field),
                )
                .await;
            }
            _ => {
                // unknown parts are drained so the stream can advance
                let _ = field.bytes().await;
            }
        }
    }
}

async fn field_text(field: Field<'_>) -> Result<String, ReleaseError> {
    field.text().await.map_err(|err| {
        tracing::warn!(error = %err, "multipart field read failed");
        ReleaseError::InvalidMultipart
    })
}

fn file_stream(field: Field<'_>) -> impl Stream<Item = Result<Bytes, std::io::Error>> + '_ {
    futures_util::stream::try_unfold(field, |mut field| async move {
        match field.chunk().await {
            Ok(Some(chunk)) => Ok(Some((chunk, field))),
            Ok(None) => Ok(None),
            Err(err) => Err(std::io::Error::other(err.to_string())),
        }
    })
}

async fn list_versions(
    State(state): State<AppState>,
    Query(query): Query<PlatformQuery>,
) -> Result<Json<Vec<AppVersion>>, ReleaseError> {
    let platform = match query.platform.as_deref() {
        None => None,
        Some(value) if value.trim().is_empty() => None,
        Some(value) => Some(Platform::parse(value).ok_or(ReleaseError::InvalidPlatform)?),
    };
    let releases = delivery::list(&state.registry, platform).await?;
    Ok(Json(releases))
}

async fn delete_version(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ReleaseError> {
    let release = delivery::delete(&state.registry, &state.store, &id).await?;
    tracing::info!(id = %release.id, version = %release.version, "release deleted");
    Ok(Json(json!({"message": "version deleted successfully"})))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

fn platform_or_default(raw: Option<&str>) -> Result<Platform, ReleaseError> {
    match raw {
        None => Ok(Platform::Android),
        Some(value) if value.trim().is_empty() => Ok(Platform::Android),
        Some(value) => Platform::parse(value).ok_or(ReleaseError::InvalidPlatform),
    }
}
