use crate::meta::models::Platform;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Failure taxonomy for the release pipelines. Client mistakes carry a
/// descriptive message; dependent-service failures stay generic on the wire
/// while the detail goes to the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseError {
    InvalidPlatform,
    MissingFields,
    InvalidVersionCode,
    DuplicateVersionCode(i64),
    WrongExtension(Platform),
    MissingFile,
    InvalidMultipart,
    ReleaseNotFound,
    VersionNotFound,
    Database,
    Storage,
}

impl ReleaseError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidPlatform
            | Self::MissingFields
            | Self::InvalidVersionCode
            | Self::WrongExtension(_)
            | Self::MissingFile
            | Self::InvalidMultipart => StatusCode::BAD_REQUEST,
            Self::DuplicateVersionCode(_) => StatusCode::CONFLICT,
            Self::ReleaseNotFound | Self::VersionNotFound => StatusCode::NOT_FOUND,
            Self::Database | Self::Storage => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::InvalidPlatform => "invalid platform".to_string(),
            Self::MissingFields => {
                "missing required fields: version, version_code (metadata fields must precede the file)"
                    .to_string()
            }
            Self::InvalidVersionCode => "version_code must be a positive integer".to_string(),
            Self::DuplicateVersionCode(code) => format!("version code {code} already exists"),
            Self::WrongExtension(platform) => format!(
                "invalid file extension for {} platform, expected {}",
                platform,
                platform.extension()
            ),
            Self::MissingFile => "no file uploaded".to_string(),
            Self::InvalidMultipart => "invalid multipart payload".to_string(),
            Self::ReleaseNotFound => {
                "requested platform/version does not match any available release".to_string()
            }
            Self::VersionNotFound => "version not found".to_string(),
            Self::Database => "database error".to_string(),
            Self::Storage => "storage error".to_string(),
        }
    }
}

impl IntoResponse for ReleaseError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({"error": self.message()}))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::ReleaseError;
    use crate::meta::models::Platform;
    use axum::body::to_bytes;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    #[test]
    fn variants_map_to_statuses() {
        let cases = [
            (ReleaseError::InvalidPlatform, StatusCode::BAD_REQUEST),
            (ReleaseError::MissingFields, StatusCode::BAD_REQUEST),
            (ReleaseError::InvalidVersionCode, StatusCode::BAD_REQUEST),
            (ReleaseError::DuplicateVersionCode(5), StatusCode::CONFLICT),
            (
                ReleaseError::WrongExtension(Platform::Ios),
                StatusCode::BAD_REQUEST,
            ),
            (ReleaseError::MissingFile, StatusCode::BAD_REQUEST),
            (ReleaseError::InvalidMultipart, StatusCode::BAD_REQUEST),
            (ReleaseError::ReleaseNotFound, StatusCode::NOT_FOUND),
            (ReleaseError::VersionNotFound, StatusCode::NOT_FOUND),
            (ReleaseError::Database, StatusCode::INTERNAL_SERVER_ERROR),
            (ReleaseError::Storage, StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(err.status(), status);
            assert!(!err.message().is_empty());
        }
    }

    #[test]
    fn duplicate_message_names_the_code() {
        assert_eq!(
            ReleaseError::DuplicateVersionCode(5).message(),
            "version code 5 already exists"
        );
    }

    #[test]
    fn wrong_extension_message_names_the_expected_extension() {
        let message = ReleaseError::WrongExtension(Platform::Ios).message();
        assert!(message.contains("ios"));
        assert!(message.contains(".ipa"));

        let message = ReleaseError::WrongExtension(Platform::Android).message();
        assert!(message.contains(".apk"));
    }

    #[test]
    fn dependent_service_messages_stay_generic() {
        assert_eq!(ReleaseError::Database.message(), "database error");
        assert_eq!(ReleaseError::Storage.message(), "storage error");
    }

    #[tokio::test]
    async fn into_response_builds_json_error_body() {
        let response = ReleaseError::DuplicateVersionCode(7).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let value: serde_json::Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(value["error"], "version code 7 already exists");
    }
}
