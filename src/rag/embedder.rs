//! Local text embeddings via fastembed (ONNX runtime).
//!
//! Uses `AllMiniLML6V2` (sentence-transformers/all-MiniLM-L6-v2): 384-dim
//! output, deterministic for identical input, no API key required. The
//! model (~80MB) is downloaded on first use and cached on disk.

use fastembed::{EmbeddingModel, TextEmbedding, TextInitOptions};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{RagError, EMBEDDING_DIM};

pub struct Embedder {
    // fastembed inference is synchronous and needs &mut; calls are moved
    // off the async runtime with spawn_blocking
    model: Arc<Mutex<TextEmbedding>>,
    cache: Arc<RwLock<HashMap<String, Vec<f32>>>>,
}

impl Embedder {
    /// Load the embedding model, downloading it on first use.
    pub fn load(cache_dir: Option<&str>) -> Result<Self, RagError> {
        let dir = cache_dir.map(PathBuf::from).unwrap_or_else(|| {
            dirs::home_dir().map_or_else(
                || PathBuf::from(".fastembed_cache"),
                |home| home.join(".invest-advisor").join("fastembed"),
            )
        });

        info!("Loading embedding model (all-MiniLM-L6-v2)");
        let model = TextEmbedding::try_new(
            TextInitOptions::new(EmbeddingModel::AllMiniLML6V2)
                .with_cache_dir(dir)
                .with_show_download_progress(false),
        )
        .map_err(|e| RagError::Embedding(format!("model load failed: {e}")))?;

        Ok(Self {
            model: Arc::new(Mutex::new(model)),
            cache: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Embed a single text into a 384-dim vector.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, RagError> {
        let mut vectors = self.embed_batch(std::slice::from_ref(&text.to_string())).await?;
        vectors
            .pop()
            .ok_or_else(|| RagError::Embedding("model returned no embedding".to_string()))
    }

    /// Embed a batch of texts, one vector per input in order. Batching
    /// does not change per-item output: each text is embedded
    /// independently and cached by exact content.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        let mut results: Vec<Option<Vec<f32>>> = vec![None; texts.len()];

        {
            let cache = self.cache.read().await;
            for (i, text) in texts.iter().enumerate() {
                if let Some(hit) = cache.get(text) {
                    results[i] = Some(hit.clone());
                }
            }
        }

        let missing: Vec<(usize, String)> = texts
            .iter()
            .enumerate()
            .filter(|(i, _)| results[*i].is_none())
            .map(|(i, t)| (i, t.clone()))
            .collect();

        if !missing.is_empty() {
            debug!("Embedding {} uncached texts", missing.len());
            let inputs: Vec<String> = missing.iter().map(|(_, t)| t.clone()).collect();
            let model = Arc::clone(&self.model);

            let vectors = tokio::task::spawn_blocking(move || {
                let mut model = model.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                model.embed(inputs, None)
            })
            .await
            .map_err(|e| RagError::Embedding(format!("embedding task panicked: {e}")))?
            .map_err(|e| RagError::Embedding(e.to_string()))?;

            if vectors.len() != missing.len() {
                return Err(RagError::Embedding(format!(
                    "model returned {} embeddings for {} inputs",
                    vectors.len(),
                    missing.len()
                )));
            }

            let mut cache = self.cache.write().await;
            for ((i, text), vector) in missing.into_iter().zip(vectors) {
                if vector.len() != EMBEDDING_DIM {
                    return Err(RagError::Dimension {
                        expected: EMBEDDING_DIM,
                        actual: vector.len(),
                    });
                }
                cache.insert(text, vector.clone());
                results[i] = Some(vector);
            }
        }

        Ok(results.into_iter().flatten().collect())
    }

    pub const fn dimension() -> usize {
        EMBEDDING_DIM
    }
}
