use crate::meta::models::AppVersion;
use crate::util::config::Config;
use reqwest::Client;
use serde_json::Value;
use std::collections::BTreeMap;

/// HTTP client for the hosted keyed-document store holding one document per
/// published release under the `versions` collection. The store speaks a
/// Realtime-Database-style JSON REST dialect: collections and documents are
/// addressed as `.json` resources, documents are created with a POST that
/// returns the allocated key, and field-equality queries use
/// `orderBy`/`equalTo` parameters.
#[derive(Clone)]
pub struct Registry {
    client: Client,
    base_url: String,
    api_token: String,
}

impl Registry {
    pub fn new(base_url: &str, api_token: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token: api_token.to_string(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.database_url, &config.credentials.api_token)
    }

    fn collection_url(&self) -> String {
        format!("{}/versions.json", self.base_url)
    }

    fn document_url(&self, id: &str) -> String {
        format!("{}/versions/{}.json", self.base_url, id)
    }

    /// Fetch every release document.
    pub async fn list(&self) -> Result<Vec<AppVersion>, String> {
        let response = self
            .client
            .get(self.collection_url())
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(|err| format!("registry list failed: {err}"))?;
        let body = read_success_body("list", response).await?;
        decode_collection(&body)
    }

    pub async fn get(&self, id: &str) -> Result<Option<AppVersion>, String> {
        let response = self
            .client
            .get(self.document_url(id))
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(|err| format!("registry get failed: {err}"))?;
        let body = read_success_body("get", response).await?;
        let value: Value = serde_json::from_str(&body)
            .map_err(|err| format!("registry payload decode failed: {err}"))?;
        if value.is_null() {
            return Ok(None);
        }
        Ok(Some(decode_document(id, value)?))
    }

    /// Field-equality query on `version_code`. The store indexes a single
    /// field per query, so platform scoping happens in the caller.
    pub async fn find_by_version_code(&self, version_code: i64) -> Result<Vec<AppVersion>, String> {
        let response = self
            .client
            .get(self.collection_url())
            .query(&[
                ("orderBy", "\"version_code\"".to_string()),
                ("equalTo", version_code.to_string()),
            ])
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(|err| format!("registry query failed: {err}"))?;
        let body = read_success_body("query", response).await?;
        decode_collection(&body)
    }

    /// Allocate a new document key. The placeholder document is overwritten
    /// by the `put` that follows.
    pub async fn push_key(&self) -> Result<String, String> {
        let response = self
            .client
            .post(self.collection_url())
            .bearer_auth(&self.api_token)
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(|err| format!("registry push failed: {err}"))?;
        let body = read_success_body("push", response).await?;
        let value: Value = serde_json::from_str(&body)
            .map_err(|err| format!("registry payload decode failed: {err}"))?;
        value["name"]
            .as_str()
            .map(|name| name.to_string())
            .ok_or_else(|| "registry push returned no key".to_string())
    }

    pub async fn put(&self, id: &str, release: &AppVersion) -> Result<(), String> {
        let response = self
            .client
            .put(self.document_url(id))
            .bearer_auth(&self.api_token)
            .json(release)
            .send()
            .await
            .map_err(|err| format!("registry put failed: {err}"))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(format!("registry put status {}", response.status()))
        }
    }

    pub async fn delete(&self, id: &str) -> Result<(), String> {
        let response = self
            .client
            .delete(self.document_url(id))
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(|err| format!("registry delete failed: {err}"))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(format!("registry delete status {}", response.status()))
        }
    }

    /// Cheap reachability probe for readiness checks: a shallow collection
    /// read that only cares about the status code.
    pub async fn ping(&self) -> Result<(), String> {
        let response = self
            .client
            .get(self.collection_url())
            .query(&[("shallow", "true")])
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(|err| format!("registry ping failed: {err}"))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(format!("registry ping status {}", response.status()))
        }
    }
}

async fn read_success_body(op: &str, response: reqwest::Response) -> Result<String, String> {
    let status = response.status();
    if !status.is_success() {
        return Err(format!("registry {op} status {status}"));
    }
    response
        .text()
        .await
        .map_err(|err| format!("registry {op} body failed: {err}"))
}

fn decode_collection(body: &str) -> Result<Vec<AppVersion>, String> {
    let value: Value = serde_json::from_str(body)
        .map_err(|err| format!("registry payload decode failed: {err}"))?;
    if value.is_null() {
        return Ok(Vec::new());
    }
    let documents: BTreeMap<String, Value> = serde_json::from_value(value)
        .map_err(|err| format!("registry payload decode failed: {err}"))?;
    let mut releases = Vec::with_capacity(documents.len());
    for (id, raw) in documents {
        releases.push(decode_document(&id, raw)?);
    }
    Ok(releases)
}

fn decode_document(id: &str, raw: Value) -> Result<AppVersion, String> {
    let mut release: AppVersion = serde_json::from_value(raw)
        .map_err(|err| format!("registry document {id} decode failed: {err}"))?;
    release.id = id.to_string();
    Ok(release)
}
