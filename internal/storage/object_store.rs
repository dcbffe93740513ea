use crate::storage::digest::DigestTap;
use crate::util::config::Config;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Body, Client, StatusCode};
use tokio::sync::mpsc;

/// HTTP client for the hosted bucket/object store. Objects are addressed as
/// `{base}/v1/b/{bucket}/o/{key}` with the key percent-encoded into a single
/// path segment; uploads go through `{base}/upload/v1/b/{bucket}/o` with the
/// key as a query parameter so arbitrary keys never touch the path.
#[derive(Clone)]
pub struct ObjectStore {
    client: Client,
    base_url: String,
    bucket: String,
    api_token: String,
}

/// Result of a finished streaming upload: the byte count and hex SHA-256
/// observed by the digest tap while the object was in flight.
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub size_bytes: i64,
    pub checksum_hex: String,
}

impl ObjectStore {
    pub fn new(base_url: &str, bucket: &str, api_token: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            bucket: bucket.to_string(),
            api_token: api_token.to_string(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            &config.storage_url,
            &config.storage_bucket,
            &config.credentials.api_token,
        )
    }

    fn object_url(&self, key: &str) -> String {
        format!(
            "{}/v1/b/{}/o/{}",
            self.base_url,
            self.bucket,
            encode_object_key(key)
        )
    }

    fn upload_url(&self) -> String {
        format!("{}/upload/v1/b/{}/o", self.base_url, self.bucket)
    }

    /// Stream `source` into the store in a single pass. Every chunk is fed
    /// through a digest tap on its way out, so the checksum and byte count
    /// come for free with the upload; the binary is never held in memory.
    pub async fn put_streaming<S>(
        &self,
        key: &str,
        content_type: &str,
        source: S,
    ) -> Result<StoredObject, String>
    where
        S: Stream<Item = Result<Bytes, std::io::Error>>,
    {
        let (tx, rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(8);
        let body = Body::wrap_stream(futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        }));
        let request = self
            .client
            .post(self.upload_url())
            .query(&[("uploadType", "media"), ("name", key)])
            .bearer_auth(&self.api_token)
            .header(CONTENT_TYPE, content_type)
            .body(body)
            .send();

        let tap = DigestTap::new();
        let (response, source_ok) = tokio::join!(request, pump(source, tx, tap.clone()));
        let response = response.map_err(|err| format!("object upload failed: {err}"))?;
        if !response.status().is_success() {
            return Err(format!("object upload status {}", response.status()));
        }
        if !source_ok {
            return Err("object upload source stream failed".to_string());
        }
        Ok(StoredObject {
            size_bytes: tap.byte_count(),
            checksum_hex: tap.hex_digest(),
        })
    }

    /// Open a streamed read of an object. The returned stream yields the
    /// object bytes; a mid-stream failure surfaces as an error item after
    /// being logged (response headers are long gone by then).
    pub async fn open_read(
        &self,
        key: &str,
    ) -> Result<impl Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static, String> {
        let response = self
            .client
            .get(self.object_url(key))
            .query(&[("alt", "media")])
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(|err| format!("object read failed: {err}"))?;
        if !response.status().is_success() {
            return Err(format!("object read status {}", response.status()));
        }
        Ok(response.bytes_stream().map(|chunk| {
            chunk.map_err(|err| {
                tracing::warn!(error = %err, "object stream interrupted");
                std::io::Error::other(err)
            })
        }))
    }

    /// Delete an object. An already-missing object is not an error.
    pub async fn delete(&self, key: &str) -> Result<(), String> {
        let response = self
            .client
            .delete(self.object_url(key))
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(|err| format!("object delete failed: {err}"))?;
        if response.status().is_success() || response.status() == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(format!("object delete status {}", response.status()))
        }
    }

    /// Grant public read on an object.
    pub async fn make_public(&self, key: &str) -> Result<(), String> {
        let response = self
            .client
            .put(format!("{}/acl", self.object_url(key)))
            .bearer_auth(&self.api_token)
            .json(&serde_json::json!({"entity": "allUsers", "role": "READER"}))
            .send()
            .await
            .map_err(|err| format!("object acl failed: {err}"))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(format!("object acl status {}", response.status()))
        }
    }
}

/// Forward `source` into the request body channel, observing each chunk on
/// the digest tap. Returns false when the source errored or the request side
/// hung up early; the caller decides which failure wins (a failed response
/// status takes precedence).
async fn pump<S>(source: S, tx: mpsc::Sender<Result<Bytes, std::io::Error>>, tap: DigestTap) -> bool
where
    S: Stream<Item = Result<Bytes, std::io::Error>>,
{
    futures_util::pin_mut!(source);
    while let Some(next) = source.next().await {
        match next {
            Ok(chunk) => {
                tap.observe(&chunk);
                if tx.send(Ok(chunk)).await.is_err() {
                    return false;
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "upload source stream failed");
                let _ = tx.send(Err(err)).await;
                return false;
            }
        }
    }
    true
}

fn encode_object_key(key: &str) -> String {
    let mut encoded = String::with_capacity(key.len());
    for byte in key.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                encoded.push(byte as char);
            }
            _ => {
                encoded.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::{encode_object_key, ObjectStore};
    use crate::storage::digest::sha256_hex;
    use crate::test_support;
    use bytes::Bytes;
    use futures_util::StreamExt;
    use std::sync::atomic::Ordering;

    fn chunked_source(
        chunks: Vec<&'static [u8]>,
    ) -> impl futures_util::Stream<Item = Result<Bytes, std::io::Error>> {
        futures_util::stream::iter(
            chunks
                .into_iter()
                .map(|chunk| Ok(Bytes::from_static(chunk))),
        )
    }

    async fn start_store() -> (ObjectStore, test_support::StoreBackend, test_support::ServerHandle)
    {
        let backend = test_support::StoreBackend::default();
        let server =
            test_support::start_router_server(test_support::store_router(backend.clone())).await;
        let store = ObjectStore::new(&server.base_url, "releases-test", "test-token");
        (store, backend, server)
    }

    #[tokio::test]
    async fn put_streaming_stores_bytes_and_computes_digest() {
        let (store, backend, _server) = start_store().await;
        let stored = store
            .put_streaming(
                "releases/android/1.0.0-1700000000.apk",
                "application/vnd.android.package-archive",
                chunked_source(vec![b"hello ", b"world"]),
            )
            .await
            .expect("upload");

        assert_eq!(stored.size_bytes, 11);
        assert_eq!(stored.checksum_hex, sha256_hex(b"hello world"));
        let object = backend
            .object("releases/android/1.0.0-1700000000.apk")
            .expect("stored");
        assert_eq!(object, b"hello world");
    }

    #[tokio::test]
    async fn put_streaming_reports_server_rejection() {
        let (store, backend, _server) = start_store().await;
        backend.fail_uploads.store(true, Ordering::SeqCst);
        let err = store
            .put_streaming("key.apk", "application/octet-stream", chunked_source(vec![b"x"]))
            .await
            .unwrap_err();
        assert!(err.contains("object upload status"));
        assert_eq!(backend.object_count(), 0);
    }

    #[tokio::test]
    async fn put_streaming_reports_source_failure() {
        let (store, backend, _server) = start_store().await;
        let source = futures_util::stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(std::io::Error::other("client hung up")),
        ]);
        let err = store
            .put_streaming("key.apk", "application/octet-stream", source)
            .await
            .unwrap_err();
        assert!(err.contains("upload"));
        assert_eq!(backend.object_count(), 0);
    }

    #[tokio::test]
    async fn put_streaming_reports_unreachable_server() {
        let store = ObjectStore::new("http://127.0.0.1:1", "bucket", "test-token");
        let err = store
            .put_streaming("key.apk", "application/octet-stream", chunked_source(vec![b"x"]))
            .await
            .unwrap_err();
        assert!(err.contains("object upload failed"));
    }

    #[tokio::test]
    async fn open_read_round_trips_object_bytes() {
        let (store, backend, _server) = start_store().await;
        backend.insert_object("releases/ios/2.0.0-1700000000.ipa", b"binary payload");

        let stream = store
            .open_read("releases/ios/2.0.0-1700000000.ipa")
            .await
            .expect("open");
        futures_util::pin_mut!(stream);
        let mut collected = Vec::new();
        while let Some(chunk) = stream.next().await {
            collected.extend_from_slice(&chunk.expect("chunk"));
        }
        assert_eq!(collected, b"binary payload");
    }

    #[tokio::test]
    async fn open_read_reports_missing_object() {
        let (store, _backend, _server) = start_store().await;
        let err = match store.open_read("missing.apk").await {
            Ok(_) => panic!("expected error"),
            Err(e) => e,
        };
        assert!(err.contains("object read status"));
    }

    #[tokio::test]
    async fn delete_removes_object_and_tolerates_missing() {
        let (store, backend, _server) = start_store().await;
        backend.insert_object("releases/android/1.0.0-1.apk", b"data");

        store
            .delete("releases/android/1.0.0-1.apk")
            .await
            .expect("delete");
        assert_eq!(backend.object_count(), 0);

        store
            .delete("releases/android/1.0.0-1.apk")
            .await
            .expect("delete missing");
    }

    #[tokio::test]
    async fn delete_reports_server_errors() {
        let (store, backend, _server) = start_store().await;
        backend.insert_object("key.apk", b"data");
        backend.fail_deletes.store(true, Ordering::SeqCst);
        let err = store.delete("key.apk").await.unwrap_err();
        assert!(err.contains("object delete status"));
    }

    #[tokio::test]
    async fn make_public_records_acl_grant() {
        let (store, backend, _server) = start_store().await;
        backend.insert_object("releases/android/1.0.0-1.apk", b"data");
        store
            .make_public("releases/android/1.0.0-1.apk")
            .await
            .expect("acl");
        assert!(backend.is_public("releases/android/1.0.0-1.apk"));
    }

    #[tokio::test]
    async fn make_public_reports_server_errors() {
        let (store, backend, _server) = start_store().await;
        backend.fail_acl.store(true, Ordering::SeqCst);
        let err = store.make_public("key.apk").await.unwrap_err();
        assert!(err.contains("object acl status"));
    }

    #[test]
    fn encode_object_key_escapes_separators() {
        assert_eq!(
            encode_object_key("releases/android/1.0.0-1700000000.apk"),
            "releases%2Fandroid%2F1.0.0-1700000000.apk"
        );
        assert_eq!(encode_object_key("plain-key.apk"), "plain-key.apk");
        assert_eq!(encode_object_key("a b%c"), "a%20b%25c");
    }
}
