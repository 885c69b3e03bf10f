use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde_json::json;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use semsearch::config::Config;
use semsearch::content::MemoryContentStore;
use semsearch::semantic::math::l2_norm;
use semsearch::semantic::providers::{HttpEndpointProvider, InferenceClient};
use semsearch::semantic::{
    AnnStore, Embedder, EmbeddingProvider, QdrantStore, RetryPolicy, SearchService, SharedIndex,
    VectorIndexAdapter,
};

mod cli;

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn build_embedder(config: &Config) -> anyhow::Result<Embedder> {
    let emb = &config.embedding;
    let timeout = Duration::from_secs(emb.request_timeout_secs);
    let mut providers: Vec<Arc<dyn EmbeddingProvider>> = vec![];

    if emb.local_model {
        #[cfg(feature = "local-model")]
        providers.push(Arc::new(
            semsearch::semantic::providers::LocalModelProvider::new(config.base_path().to_path_buf())?,
        ));

        #[cfg(not(feature = "local-model"))]
        anyhow::bail!("embedding.local_model is set but semsearch was built without the local-model feature");
    }

    if !emb.primary_url.is_empty() {
        if emb.api_token.is_none() {
            log::info!("no provider token set, hosted inference calls may be rejected");
        }
        providers.push(Arc::new(InferenceClient::new(
            &emb.primary_url,
            &emb.model,
            emb.api_token.clone(),
            timeout,
        )?));
    }

    if let Some(url) = &emb.secondary_url {
        providers.push(Arc::new(HttpEndpointProvider::new(
            url,
            &emb.model,
            emb.api_token.clone(),
            timeout,
        )?));
    }

    Ok(Embedder::new(
        providers,
        RetryPolicy::from(emb),
        emb.dimensions,
        emb.max_input_chars,
    ))
}

fn build_index(config: &Config) -> anyhow::Result<Option<SharedIndex>> {
    if !config.index.enabled {
        return Ok(None);
    }

    let store = QdrantStore::new(
        &config.index.url,
        config.index.api_key.clone(),
        Duration::from_secs(config.embedding.request_timeout_secs),
    )?;
    let store: Arc<dyn AnnStore> = Arc::new(store);

    Ok(Some(Arc::new(VectorIndexAdapter::new(
        store,
        &config.index.collection,
        config.embedding.dimensions,
    ))))
}

fn load_items(path: &Path) -> anyhow::Result<Arc<MemoryContentStore>> {
    let store = MemoryContentStore::load(path)
        .with_context(|| format!("failed to load items from {}", path.display()))?;
    Ok(Arc::new(store))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let args = cli::Args::parse();
    let config = Config::load_with(&args.config)?;
    let embedder = build_embedder(&config)?;

    let service_for = |store: Arc<MemoryContentStore>| -> anyhow::Result<SearchService> {
        Ok(SearchService::new(
            embedder.clone(),
            store,
            build_index(&config)?,
            &config.search,
        ))
    };

    match args.command {
        cli::Command::Embed { text, summary } => {
            let generated = embedder.generate_tagged(&text).await;
            let mut out = json!({
                "model": generated.model,
                "fallback": generated.is_fallback(),
                "dimensions": generated.vector.len(),
                "norm": l2_norm(&generated.vector),
            });
            if !summary {
                out["vector"] = json!(generated.vector);
            }
            println!("{}", serde_json::to_string_pretty(&out)?);
        }

        cli::Command::Backfill { items, limit } => {
            let store = load_items(&items)?;
            let service = service_for(store.clone())?;

            let report = service.backfill(limit).await?;
            store.save(&items)?;

            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        cli::Command::Search {
            query,
            items,
            limit,
        } => {
            let service = service_for(load_items(&items)?)?;
            let results = service.hybrid_search(&query, limit).await;
            println!("{}", serde_json::to_string_pretty(&results)?);
        }

        cli::Command::Similar { id, items, limit } => {
            let service = service_for(load_items(&items)?)?;
            let results = service.find_similar(&id, limit).await?;
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
    }

    Ok(())
}
