use serde::Deserialize;
use std::env;
use std::time::Duration;

/// Credentials for the hosted registry and blob store, supplied either as
/// inline JSON or as a path to a JSON file. A value starting with `{` is
/// treated as inline JSON, anything else as a file path.
#[derive(Clone, Debug)]
pub struct Credentials {
    pub api_token: String,
}

#[derive(Clone)]
pub struct Config {
    pub credentials: Credentials,
    pub database_url: String,
    pub storage_url: String,
    pub storage_bucket: String,
    pub listen: String,
    pub metrics_listen: String,
    pub upload_timeout: Duration,
    pub log_level: String,
}

impl Config {
    pub fn load() -> Result<Self, String> {
        let raw_credentials = required_env("OTA_CREDENTIALS", "OTA_CREDENTIALS is required")?;
        let credentials = load_credentials(&raw_credentials)?;
        Ok(Self {
            credentials,
            database_url: trim_base_url(required_env(
                "OTA_DATABASE_URL",
                "OTA_DATABASE_URL is required",
            )?),
            storage_url: trim_base_url(required_env(
                "OTA_STORAGE_URL",
                "OTA_STORAGE_URL is required",
            )?),
            storage_bucket: required_env("OTA_STORAGE_BUCKET", "OTA_STORAGE_BUCKET is required")?,
            listen: normalize_listen_addr(env_or_default("OTA_LISTEN", ":8080")),
            metrics_listen: normalize_listen_addr(env_or_default("OTA_METRICS_LISTEN", ":9100")),
            upload_timeout: Duration::from_secs(
                parse_env("OTA_UPLOAD_TIMEOUT_SECONDS").unwrap_or(600),
            ),
            log_level: env_or_default("OTA_LOG_LEVEL", "info"),
        })
    }
}

#[derive(Deserialize)]
struct CredentialsDocument {
    api_token: String,
}

fn load_credentials(raw: &str) -> Result<Credentials, String> {
    let json = if raw.starts_with('{') {
        tracing::info!("using credentials from inline JSON");
        raw.to_string()
    } else {
        tracing::info!(path = raw, "using credentials from file");
        std::fs::read_to_string(raw).map_err(|err| format!("credentials read failed: {err}"))?
    };
    let document: CredentialsDocument = serde_json::from_str(&json)
        .map_err(|_| "OTA_CREDENTIALS must be valid credentials JSON".to_string())?;
    if document.api_token.trim().is_empty() {
        return Err("OTA_CREDENTIALS api_token must not be empty".into());
    }
    Ok(Credentials {
        api_token: document.api_token,
    })
}

fn required_env(key: &str, missing_message: &str) -> Result<String, String> {
    env::var(key).map_err(|_| missing_message.to_string())
}

fn env_or_default(key: &str, default_value: &str) -> String {
    env::var(key).unwrap_or_else(|_| default_value.to_string())
}

fn parse_env<T>(key: &str) -> Option<T>
where
    T: std::str::FromStr,
{
    env::var(key).ok().and_then(|value| value.parse().ok())
}

fn normalize_listen_addr(value: String) -> String {
    if value.starts_with(':') {
        format!("0.0.0.0{}", value)
    } else {
        value
    }
}

fn trim_base_url(value: String) -> String {
    value.trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::{load_credentials, normalize_listen_addr, trim_base_url, Config};
    use std::env;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    struct EnvGuard {
        entries: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new() -> Self {
            Self {
                entries: Vec::new(),
            }
        }

        fn set(&mut self, key: &str, value: &str) {
            let prev = env::var(key).ok();
            self.entries.push((key.to_string(), prev));
            env::set_var(key, value);
        }

        fn remove(&mut self, key: &str) {
            let prev = env::var(key).ok();
            self.entries.push((key.to_string(), prev));
            env::remove_var(key);
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.entries.drain(..).rev() {
                if let Some(val) = value {
                    env::set_var(key, val);
                } else {
                    env::remove_var(key);
                }
            }
        }
    }

    fn set_minimum_env(env_guard: &mut EnvGuard) {
        env_guard.set("OTA_CREDENTIALS", r#"{"api_token":"secret"}"#);
        env_guard.set("OTA_DATABASE_URL", "https://registry.example.com/");
        env_guard.set("OTA_STORAGE_URL", "https://blobs.example.com");
        env_guard.set("OTA_STORAGE_BUCKET", "releases-prod");
        env_guard.remove("OTA_LISTEN");
        env_guard.remove("OTA_METRICS_LISTEN");
        env_guard.remove("OTA_UPLOAD_TIMEOUT_SECONDS");
        env_guard.remove("OTA_LOG_LEVEL");
    }

    #[test]
    fn load_config_success_with_defaults() {
        let _guard = ENV_LOCK.lock().expect("env lock");
        let mut env_guard = EnvGuard::new();
        set_minimum_env(&mut env_guard);

        let config = Config::load().expect("load");
        assert_eq!(config.credentials.api_token, "secret");
        assert_eq!(config.database_url, "https://registry.example.com");
        assert_eq!(config.storage_url, "https://blobs.example.com");
        assert_eq!(config.storage_bucket, "releases-prod");
        assert_eq!(config.listen, "0.0.0.0:8080");
        assert_eq!(config.metrics_listen, "0.0.0.0:9100");
        assert_eq!(config.upload_timeout.as_secs(), 600);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn load_config_honors_overrides() {
        let _guard = ENV_LOCK.lock().expect("env lock");
        let mut env_guard = EnvGuard::new();
        set_minimum_env(&mut env_guard);
        env_guard.set("OTA_LISTEN", "127.0.0.1:9080");
        env_guard.set("OTA_UPLOAD_TIMEOUT_SECONDS", "120");
        env_guard.set("OTA_LOG_LEVEL", "debug");

        let config = Config::load().expect("load");
        assert_eq!(config.listen, "127.0.0.1:9080");
        assert_eq!(config.upload_timeout.as_secs(), 120);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn load_config_defaults_for_invalid_timeout() {
        let _guard = ENV_LOCK.lock().expect("env lock");
        let mut env_guard = EnvGuard::new();
        set_minimum_env(&mut env_guard);
        env_guard.set("OTA_UPLOAD_TIMEOUT_SECONDS", "not-a-number");

        let config = Config::load().expect("load");
        assert_eq!(config.upload_timeout.as_secs(), 600);
    }

    #[test]
    fn load_config_requires_credentials() {
        let _guard = ENV_LOCK.lock().expect("env lock");
        let mut env_guard = EnvGuard::new();
        set_minimum_env(&mut env_guard);
        env_guard.remove("OTA_CREDENTIALS");

        let err = Config::load().err().expect("expected error");
        assert_eq!(err, "OTA_CREDENTIALS is required");
    }

    #[test]
    fn load_config_requires_database_url() {
        let _guard = ENV_LOCK.lock().expect("env lock");
        let mut env_guard = EnvGuard::new();
        set_minimum_env(&mut env_guard);
        env_guard.remove("OTA_DATABASE_URL");

        let err = Config::load().err().expect("expected error");
        assert_eq!(err, "OTA_DATABASE_URL is required");
    }

    #[test]
    fn load_config_requires_storage_url_and_bucket() {
        let _guard = ENV_LOCK.lock().expect("env lock");
        let mut env_guard = EnvGuard::new();
        set_minimum_env(&mut env_guard);
        env_guard.remove("OTA_STORAGE_URL");
        let err = Config::load().err().expect("expected error");
        assert_eq!(err, "OTA_STORAGE_URL is required");

        set_minimum_env(&mut env_guard);
        env_guard.remove("OTA_STORAGE_BUCKET");
        let err = Config::load().err().expect("expected error");
        assert_eq!(err, "OTA_STORAGE_BUCKET is required");
    }

    #[test]
    fn load_credentials_reads_file_path() {
        let path = env::temp_dir().join("ota-config-credentials.json");
        std::fs::write(&path, r#"{"api_token":"from-file"}"#).expect("write credentials");
        let credentials =
            load_credentials(path.to_str().expect("path")).expect("load credentials");
        assert_eq!(credentials.api_token, "from-file");
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn load_credentials_rejects_missing_file() {
        let err = load_credentials("/nonexistent/ota-credentials.json").unwrap_err();
        assert!(err.contains("credentials read failed"));
    }

    #[test]
    fn load_credentials_rejects_invalid_json() {
        let err = load_credentials("{not json").unwrap_err();
        assert_eq!(err, "OTA_CREDENTIALS must be valid credentials JSON");
    }

    #[test]
    fn load_credentials_rejects_blank_token() {
        let err = load_credentials(r#"{"api_token":"   "}"#).unwrap_err();
        assert_eq!(err, "OTA_CREDENTIALS api_token must not be empty");
    }

    #[test]
    fn normalize_listen_addr_handles_colon_prefix() {
        assert_eq!(normalize_listen_addr(":8080".to_string()), "0.0.0.0:8080");
        assert_eq!(
            normalize_listen_addr("127.0.0.1:8080".to_string()),
            "127.0.0.1:8080"
        );
    }

    #[test]
    fn trim_base_url_strips_trailing_slashes() {
        assert_eq!(
            trim_base_url("https://a.example//".to_string()),
            "https://a.example"
        );
        assert_eq!(
            trim_base_url("https://a.example".to_string()),
            "https://a.example"
        );
    }

    #[test]
    fn env_guard_restores_previous_value() {
        let _guard = ENV_LOCK.lock().expect("env lock");
        env::set_var("OTA_TEST_ENV", "original");
        {
            let mut env_guard = EnvGuard::new();
            env_guard.set("OTA_TEST_ENV", "updated");
            assert_eq!(env::var("OTA_TEST_ENV").expect("read"), "updated");
        }
        assert_eq!(env::var("OTA_TEST_ENV").expect("read"), "original");
        env::remove_var("OTA_TEST_ENV");
    }
}
