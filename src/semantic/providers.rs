//! Embedding providers used by the [`Embedder`](super::Embedder) chain.
//!
//! - `InferenceClient`: typed client for a hosted feature-extraction pipeline
//! - `HttpEndpointProvider`: raw POST `{inputs}` to a model endpoint
//! - `LocalModelProvider`: in-process fastembed model (`local-model` feature)

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use super::embeddings::{parse_vector_response, EmbeddingError, EmbeddingProvider};

/// Default hosted inference base URL.
pub const DEFAULT_INFERENCE_URL: &str = "https://router.huggingface.co/hf-inference";

/// Bearer token that never shows up in `Debug` output.
#[derive(Clone)]
struct Token(String);

impl Token {
    fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Token(***)")
    }
}

fn build_client(timeout: Duration) -> Result<reqwest::Client, EmbeddingError> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

/// Read the body as JSON, turning non-2xx statuses into errors.
async fn read_json(response: reqwest::Response) -> Result<Value, EmbeddingError> {
    let status = response.status();
    let text = response.text().await?;

    if !status.is_success() {
        return Err(EmbeddingError::Status {
            status: status.as_u16(),
            body: text,
        });
    }

    serde_json::from_str(&text).map_err(|err| {
        log::debug!("{err}. tried to parse: {text:?}");
        EmbeddingError::Malformed(err.to_string())
    })
}

#[derive(Serialize)]
struct PipelineRequest<'a> {
    inputs: &'a str,
    options: PipelineOptions,
}

#[derive(Serialize)]
struct PipelineOptions {
    wait_for_model: bool,
}

/// Client for a hosted feature-extraction pipeline.
#[derive(Debug, Clone)]
pub struct InferenceClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    token: Option<Token>,
}

impl InferenceClient {
    pub fn new(
        base_url: &str,
        model: &str,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, EmbeddingError> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: base_url.strip_suffix('/').unwrap_or(base_url).to_string(),
            model: model.to_string(),
            token: token.map(Token::new),
        })
    }

    fn pipeline_url(&self) -> String {
        format!(
            "{}/models/{}/pipeline/feature-extraction",
            self.base_url, self.model
        )
    }

    /// Run feature extraction for one input.
    pub async fn feature_extraction(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut req = self.client.post(self.pipeline_url()).json(&PipelineRequest {
            inputs: text,
            options: PipelineOptions {
                wait_for_model: true,
            },
        });
        if let Some(token) = &self.token {
            req = req.bearer_auth(token.expose());
        }

        let body = read_json(req.send().await?).await?;
        parse_vector_response(&body)
    }
}

#[async_trait]
impl EmbeddingProvider for InferenceClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.feature_extraction(text).await
    }

    fn name(&self) -> &str {
        "inference-client"
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[derive(Serialize)]
struct InputsRequest<'a> {
    inputs: &'a str,
}

/// Direct POST to a model endpoint with bearer auth.
#[derive(Debug, Clone)]
pub struct HttpEndpointProvider {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    token: Option<Token>,
}

impl HttpEndpointProvider {
    pub fn new(
        endpoint: &str,
        model: &str,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, EmbeddingError> {
        Ok(Self {
            client: build_client(timeout)?,
            endpoint: endpoint.to_string(),
            model: model.to_string(),
            token: token.map(Token::new),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEndpointProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut req = self
            .client
            .post(&self.endpoint)
            .json(&InputsRequest { inputs: text });
        if let Some(token) = &self.token {
            req = req.bearer_auth(token.expose());
        }

        let body = read_json(req.send().await?).await?;
        parse_vector_response(&body)
    }

    fn name(&self) -> &str {
        "http-endpoint"
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(feature = "local-model")]
pub use local::LocalModelProvider;

#[cfg(feature = "local-model")]
mod local {
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use fastembed::{InitOptions, TextEmbedding};

    use crate::semantic::embeddings::{EmbeddingError, EmbeddingProvider};

    /// fastembed model running in-process.
    /// Uses a Mutex because fastembed's embed() requires &mut self.
    pub struct LocalModelProvider {
        model: Arc<Mutex<TextEmbedding>>,
        model_name: String,
    }

    impl LocalModelProvider {
        /// Load all-MiniLM-L6-v2 (384 dimensions), caching files in `cache_dir/models`.
        pub fn new(cache_dir: PathBuf) -> Result<Self, EmbeddingError> {
            let models_dir = cache_dir.join("models");
            std::fs::create_dir_all(&models_dir).map_err(|e| {
                EmbeddingError::Provider(format!("Failed to create models directory: {}", e))
            })?;

            let options = InitOptions::new(fastembed::EmbeddingModel::AllMiniLML6V2)
                .with_cache_dir(models_dir)
                .with_show_download_progress(false);

            let model = TextEmbedding::try_new(options)
                .map_err(|e| EmbeddingError::Provider(e.to_string()))?;

            Ok(Self {
                model: Arc::new(Mutex::new(model)),
                model_name: "all-MiniLM-L6-v2".to_string(),
            })
        }
    }

    #[async_trait]
    impl EmbeddingProvider for LocalModelProvider {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            let model = self.model.clone();
            let text = text.to_string();

            // inference is CPU bound, keep it off the async workers
            tokio::task::spawn_blocking(move || {
                let mut model = model.lock().map_err(|e| {
                    EmbeddingError::Provider(format!("Failed to acquire model lock: {}", e))
                })?;
                let embeddings = model
                    .embed(vec![text], None)
                    .map_err(|e| EmbeddingError::Provider(e.to_string()))?;
                embeddings
                    .into_iter()
                    .next()
                    .ok_or_else(|| EmbeddingError::Malformed("No embedding returned".to_string()))
            })
            .await
            .map_err(|e| EmbeddingError::Provider(e.to_string()))?
        }

        fn name(&self) -> &str {
            "local-model"
        }

        fn model(&self) -> &str {
            &self.model_name
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semantic::DIMENSIONS;
    use axum::{extract::State, http::HeaderMap, http::StatusCode, routing::post, Json, Router};
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Seen {
        auth: Arc<Mutex<Option<String>>>,
        body: Arc<Mutex<Option<Value>>>,
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    async fn record_and_answer(
        State(seen): State<Seen>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> Json<Value> {
        *seen.auth.lock().unwrap() = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        *seen.body.lock().unwrap() = Some(body);
        Json(json!([vec![0.1f32; DIMENSIONS]]))
    }

    #[tokio::test]
    async fn test_inference_client_request_shape() {
        let seen = Seen::default();
        let router = Router::new()
            .route(
                "/models/test-model/pipeline/feature-extraction",
                post(record_and_answer),
            )
            .with_state(seen.clone());
        let base = serve(router).await;

        let client = InferenceClient::new(
            &format!("{base}/"),
            "test-model",
            Some("secret".to_string()),
            Duration::from_secs(5),
        )
        .unwrap();

        let vector = client.embed("kidney stones").await.unwrap();
        assert_eq!(vector.len(), DIMENSIONS);
        assert_eq!(seen.auth.lock().unwrap().as_deref(), Some("Bearer secret"));

        let body = seen.body.lock().unwrap().clone().unwrap();
        assert_eq!(body["inputs"], "kidney stones");
        assert_eq!(body["options"]["wait_for_model"], true);
    }

    #[tokio::test]
    async fn test_http_endpoint_request_shape() {
        let seen = Seen::default();
        let router = Router::new()
            .route("/embed", post(record_and_answer))
            .with_state(seen.clone());
        let base = serve(router).await;

        let provider = HttpEndpointProvider::new(
            &format!("{base}/embed"),
            "test-model",
            Some("tok".to_string()),
            Duration::from_secs(5),
        )
        .unwrap();

        let vector = provider.embed("kidney stones").await.unwrap();
        assert_eq!(vector.len(), DIMENSIONS);
        assert_eq!(seen.auth.lock().unwrap().as_deref(), Some("Bearer tok"));
        assert_eq!(
            seen.body.lock().unwrap().clone().unwrap(),
            json!({"inputs": "kidney stones"})
        );
    }

    #[tokio::test]
    async fn test_http_endpoint_error_status() {
        let router = Router::new().route(
            "/embed",
            post(|| async {
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(json!({"error": "Model is loading"})),
                )
            }),
        );
        let base = serve(router).await;

        let provider =
            HttpEndpointProvider::new(&format!("{base}/embed"), "m", None, Duration::from_secs(5))
                .unwrap();

        let result = provider.embed("kidney stones").await;
        assert!(matches!(result, Err(EmbeddingError::Status { status: 503, .. })));
    }

    #[tokio::test]
    async fn test_http_endpoint_structured_error_body() {
        let router = Router::new().route(
            "/embed",
            post(|| async { Json(json!({"error": "rate limited"})) }),
        );
        let base = serve(router).await;

        let provider =
            HttpEndpointProvider::new(&format!("{base}/embed"), "m", None, Duration::from_secs(5))
                .unwrap();

        let result = provider.embed("kidney stones").await;
        assert!(matches!(result, Err(EmbeddingError::Provider(msg)) if msg == "rate limited"));
    }

    #[test]
    fn test_token_hidden_in_debug() {
        let provider =
            HttpEndpointProvider::new("http://localhost/embed", "m", Some("hunter2".into()), Duration::from_secs(1))
                .unwrap();
        assert!(!format!("{provider:?}").contains("hunter2"));
    }
}
