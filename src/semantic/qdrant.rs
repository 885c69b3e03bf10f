//! Qdrant REST implementation of [`AnnStore`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};

use super::index::{AnnStore, Distance, IndexError, IndexPoint, ScoredPoint};

/// Client for one Qdrant instance.
pub struct QdrantStore {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

/// Qdrant wraps every answer in `{result, status, time}`.
#[derive(Deserialize)]
struct QdrantResponse<T> {
    result: Option<T>,
    #[serde(default)]
    status: Value,
}

impl QdrantStore {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self, IndexError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.strip_suffix('/').unwrap_or(base_url).to_string(),
            api_key,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        log::debug!("qdrant {method} {url}");

        let req = self.client.request(method, &url);
        match &self.api_key {
            Some(key) => req.header("api-key", key),
            None => req,
        }
    }
}

/// Pull a readable message out of an error body.
fn error_message(status: StatusCode, body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/status/error")
                .and_then(Value::as_str)
                .map(str::to_owned)
        })
        .unwrap_or_else(|| format!("status={status} body={body}"))
}

async fn check(response: reqwest::Response) -> Result<String, IndexError> {
    let status = response.status();
    let body = response.text().await?;
    if status.is_success() {
        Ok(body)
    } else {
        Err(IndexError::Unavailable(error_message(status, &body)))
    }
}

#[async_trait]
impl AnnStore for QdrantStore {
    async fn create_collection(
        &self,
        name: &str,
        size: usize,
        distance: Distance,
    ) -> Result<(), IndexError> {
        let response = self
            .request(Method::PUT, &format!("/collections/{name}"))
            .json(&json!({
                "vectors": {
                    "size": size,
                    "distance": distance,
                }
            }))
            .send()
            .await
            .map_err(|e| IndexError::Unavailable(e.to_string()))?;

        let status = response.status();
        let body = response.text().await?;
        if status.is_success() {
            return Ok(());
        }

        let message = error_message(status, &body);
        if status == StatusCode::CONFLICT || message.contains("already exists") {
            return Err(IndexError::AlreadyExists);
        }
        Err(IndexError::Unavailable(message))
    }

    async fn upsert(&self, collection: &str, points: Vec<IndexPoint>) -> Result<(), IndexError> {
        let response = self
            .request(
                Method::PUT,
                &format!("/collections/{collection}/points?wait=true"),
            )
            .json(&json!({ "points": points }))
            .send()
            .await
            .map_err(|e| IndexError::Unavailable(e.to_string()))?;

        check(response).await.map(|_| ())
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        score_threshold: f32,
    ) -> Result<Vec<ScoredPoint>, IndexError> {
        let response = self
            .request(
                Method::POST,
                &format!("/collections/{collection}/points/search"),
            )
            .json(&json!({
                "vector": vector,
                "limit": limit,
                "score_threshold": score_threshold,
                "with_payload": true,
            }))
            .send()
            .await
            .map_err(|e| IndexError::Unavailable(e.to_string()))?;

        let body = check(response).await?;
        let parsed: QdrantResponse<Vec<ScoredPoint>> = serde_json::from_str(&body).map_err(|err| {
            log::error!("{err}. tried to parse: {body:?}");
            IndexError::Unavailable(format!("malformed search response: {err}"))
        })?;

        parsed.result.ok_or_else(|| {
            IndexError::Unavailable(format!("search returned no result, status={}", parsed.status))
        })
    }
}
