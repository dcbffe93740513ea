use crate::meta::models::{AppVersion, Platform};
use crate::meta::registry::Registry;
use crate::release::error::ReleaseError;
use crate::storage::object_store::ObjectStore;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::Stream;

/// Raw multipart metadata as received from the client, before any
/// validation. Field values arrive as strings and are trimmed here.
#[derive(Debug, Clone, Default)]
pub struct ReleaseDraft {
    pub platform: String,
    pub version: String,
    pub version_code: String,
    pub release_notes: String,
}

#[derive(Debug)]
struct ValidatedDraft {
    platform: Platform,
    version: String,
    version_code: i64,
    release_notes: String,
}

/// Run the full publish pipeline: validate the draft, check the version
/// code is free on the platform, check the file extension, then stream the
/// binary to the blob store and write the registry record. The registry
/// write failing after a successful upload triggers the one compensating
/// action in the system: the orphaned blob is deleted before the error is
/// surfaced.
pub async fn publish<S>(
    registry: &Registry,
    store: &ObjectStore,
    draft: &ReleaseDraft,
    filename: &str,
    source: S,
) -> Result<AppVersion, ReleaseError>
where
    S: Stream<Item = Result<Bytes, std::io::Error>>,
{
    let draft = validate_draft(draft)?;
    check_version_code_free(registry, draft.platform, draft.version_code).await?;
    validate_filename(draft.platform, filename)?;
    upload_and_record(registry, store, draft, source).await
}

fn validate_draft(draft: &ReleaseDraft) -> Result<ValidatedDraft, ReleaseError> {
    let platform_raw = draft.platform.trim();
    let platform = if platform_raw.is_empty() {
        Platform::Android
    } else {
        Platform::parse(platform_raw).ok_or(ReleaseError::InvalidPlatform)?
    };
    let version = draft.version.trim().to_string();
    let version_code_raw = draft.version_code.trim();
    if version.is_empty() || version_code_raw.is_empty() {
        return Err(ReleaseError::MissingFields);
    }
    let version_code = version_code_raw
        .parse::<i64>()
        .ok()
        .filter(|code| *code > 0)
        .ok_or(ReleaseError::InvalidVersionCode)?;
    Ok(ValidatedDraft {
        platform,
        version,
        version_code,
        release_notes: draft.release_notes.trim().to_string(),
    })
}

fn validate_filename(platform: Platform, filename: &str) -> Result<(), ReleaseError> {
    if !extension_of(filename).eq_ignore_ascii_case(platform.extension()) {
        return Err(ReleaseError::WrongExtension(platform));
    }
    Ok(())
}

fn extension_of(filename: &str) -> &str {
    match filename.rfind('.') {
        Some(index) => &filename[index..],
        None => "",
    }
}

/// Version codes are unique per platform. The check and the later record
/// write are not atomic: two concurrent publishes of the same code can both
/// pass and both land, because the registry dialect has no conditional
/// write. Callers get first-writer-wins semantics on reads only insofar as
/// the resolver picks an arbitrary maximal record.
async fn check_version_code_free(
    registry: &Registry,
    platform: Platform,
    version_code: i64,
) -> Result<(), ReleaseError> {
    let matches = registry
        .find_by_version_code(version_code)
        .await
        .map_err(|err| {
            tracing::error!(error = %err, "registry query failed during publish");
            ReleaseError::Database
        })?;
    if matches.iter().any(|release| release.platform == platform) {
        return Err(ReleaseError::DuplicateVersionCode(version_code));
    }
    Ok(())
}

/// Object key for an upload. The timestamp component keeps keys unique
/// across repeated uploads of the same version string.
pub fn storage_key(platform: Platform, version: &str, uploaded_at: DateTime<Utc>) -> String {
    format!(
        "releases/{}/{}-{}{}",
        platform,
        version,
        uploaded_at.timestamp(),
        platform.extension()
    )
}

async fn upload_and_record<S>(
    registry: &Registry,
    store: &ObjectStore,
    draft: ValidatedDraft,
    source: S,
) -> Result<AppVersion, ReleaseError>
where
    S: Stream<Item = Result<Bytes, std::io::Error>>,
{
    let now = Utc::now();
    let storage_path = storage_key(draft.platform, &draft.version, now);

    let stored = store
        .put_streaming(&storage_path, draft.platform.content_type(), source)
        .await
        .map_err(|err| {
            tracing::error!(error = %err, path = %storage_path, "release upload failed");
            ReleaseError::Storage
        })?;

    if let Err(err) = store.make_public(&storage_path).await {
        tracing::warn!(error = %err, path = %storage_path, "failed to set public access");
    }

    let id = match registry.push_key().await {
        Ok(id) => id,
        Err(err) => {
            tracing::error!(error = %err, "registry key allocation failed");
            roll_back_blob(store, &storage_path).await;
            return Err(ReleaseError::Database);
        }
    };

    let release = AppVersion {
        id: id.clone(),
        download_url: format!(
            "/download/{}?platform={}",
            draft.version, draft.platform
        ),
        version: draft.version,
        version_code: draft.version_code,
        platform: draft.platform,
        release_notes: draft.release_notes,
        file_size: stored.size_bytes,
        checksum: stored.checksum_hex,
        created_at: now,
        updated_at: now,
        storage_path: storage_path.clone(),
    };

    if let Err(err) = registry.put(&id, &release).await {
        tracing::error!(error = %err, "release record write failed");
        roll_back_blob(store, &storage_path).await;
        return Err(ReleaseError::Database);
    }

    tracing::info!(
        id = %release.id,
        version = %release.version,
        version_code = release.version_code,
        platform = %release.platform,
        size = release.file_size,
        "release published"
    );
    Ok(release)
}

async fn roll_back_blob(store: &ObjectStore, storage_path: &str) {
    if let Err(err) = store.delete(storage_path).await {
        tracing::warn!(error = %err, path = storage_path, "failed to clean up uploaded object");
    }
}
