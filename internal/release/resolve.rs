use crate::meta::models::{AppVersion, Platform};
use crate::meta::registry::Registry;
use crate::release::error::ReleaseError;

/// A client this many published increments (or more) behind the latest
/// build cannot skip the update.
pub const MANDATORY_GAP: i64 = 2;

#[derive(Debug, Clone)]
pub struct UpdateCheck {
    pub update_available: bool,
    pub is_mandatory: bool,
    pub latest: Option<AppVersion>,
}

impl UpdateCheck {
    fn none_available() -> Self {
        Self {
            update_available: false,
            is_mandatory: false,
            latest: None,
        }
    }
}

/// Decide whether a newer build exists for `platform` than `current_code`.
/// Read-only: scans the registry and compares version codes.
pub async fn resolve(
    registry: &Registry,
    platform: Platform,
    current_code: i64,
) -> Result<UpdateCheck, ReleaseError> {
    let releases = registry.list().await.map_err(|err| {
        tracing::error!(error = %err, "registry list failed during update check");
        ReleaseError::Database
    })?;
    let Some(latest) = latest_for_platform(releases, platform) else {
        return Ok(UpdateCheck::none_available());
    };
    Ok(UpdateCheck {
        update_available: current_code < latest.version_code,
        is_mandatory: latest.version_code - current_code >= MANDATORY_GAP,
        latest: Some(latest),
    })
}

fn latest_for_platform(releases: Vec<AppVersion>, platform: Platform) -> Option<AppVersion> {
    releases
        .into_iter()
        .filter(|release| release.platform == platform)
        .max_by_key(|release| release.version_code)
}
