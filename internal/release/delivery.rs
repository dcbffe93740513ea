use crate::meta::models::{AppVersion, Platform};
use crate::meta::registry::Registry;
use crate::release::error::ReleaseError;
use crate::storage::object_store::ObjectStore;
use bytes::Bytes;
use futures_util::Stream;

/// Resolve a `(version, platform)` pair to its registry record and an open
/// byte stream of the binary.
pub async fn fetch(
    registry: &Registry,
    store: &ObjectStore,
    version: &str,
    platform: Platform,
) -> Result<
    (
        AppVersion,
        impl Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static,
    ),
    ReleaseError,
> {
    let releases = registry.list().await.map_err(|err| {
        tracing::error!(error = %err, "registry list failed during download");
        ReleaseError::Database
    })?;
    let release = releases
        .into_iter()
        .find(|release| release.version == version && release.platform == platform)
        .ok_or(ReleaseError::ReleaseNotFound)?;
    let stream = store.open_read(&release.storage_path).await.map_err(|err| {
        tracing::error!(error = %err, path = %release.storage_path, "object read failed during download");
        ReleaseError::Storage
    })?;
    Ok((release, stream))
}

/// Download filename presented to the client.
pub fn attachment_filename(release: &AppVersion) -> String {
    format!("app-v{}{}", release.version, release.platform.extension())
}

/// All releases, optionally narrowed to one platform, newest version code
/// first.
pub async fn list(
    registry: &Registry,
    platform: Option<Platform>,
) -> Result<Vec<AppVersion>, ReleaseError> {
    let mut releases = registry.list().await.map_err(|err| {
        tracing::error!(error = %err, "registry list failed");
        ReleaseError::Database
    })?;
    if let Some(platform) = platform {
        releases.retain(|release| release.platform == platform);
    }
    releases.sort_by(|a, b| b.version_code.cmp(&a.version_code));
    Ok(releases)
}

/// Remove a release: blob first (best effort), record second. Only the
/// record delete failing fails the operation.
pub async fn delete(
    registry: &Registry,
    store: &ObjectStore,
    id: &str,
) -> Result<AppVersion, ReleaseError> {
    let release = registry
        .get(id)
        .await
        .map_err(|err| {
            tracing::error!(error = %err, id, "registry get failed during delete");
            ReleaseError::Database
        })?
        .ok_or(ReleaseError::VersionNotFound)?;

    if let Err(err) = store.delete(&release.storage_path).await {
        tracing::warn!(error = %err, path = %release.storage_path, "failed to delete object for release");
    }

    registry.delete(id).await.map_err(|err| {
        tracing::error!(error = %err, id, "registry delete failed");
        ReleaseError::Database
    })?;
    Ok(release)
}
