use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Android,
    Ios,
}

impl Platform {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "android" => Some(Self::Android),
            "ios" => Some(Self::Ios),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Android => "android",
            Self::Ios => "ios",
        }
    }

    /// Expected binary file extension, leading dot included.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Android => ".apk",
            Self::Ios => ".ipa",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Android => "application/vnd.android.package-archive",
            Self::Ios => "application/octet-stream",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A published build. One registry document per release; never updated in
/// place after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppVersion {
    #[serde(default)]
    pub id: String,
    pub version: String,
    pub version_code: i64,
    pub platform: Platform,
    pub download_url: String,
    #[serde(default)]
    pub release_notes: String,
    pub file_size: i64,
    pub checksum: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub storage_path: String,
}
