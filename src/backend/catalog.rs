//! Cached view of which models each runtime currently offers.
//!
//! The fallback selector consults this before committing to a retry, so a
//! model that is not installed is skipped without a chat round trip.

use super::transport::ChatTransport;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
struct CatalogEntry {
    models: Vec<String>,
    fetched_at: Instant,
}

pub struct ModelCatalog {
    transport: Arc<dyn ChatTransport>,
    ttl: Duration,
    entries: RwLock<HashMap<String, CatalogEntry>>,
}

impl ModelCatalog {
    pub fn new(transport: Arc<dyn ChatTransport>, ttl: Duration) -> Self {
        Self {
            transport,
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Models listed by `base_url`, refreshed once the cached copy is older
    /// than the TTL. An unreachable runtime lists nothing.
    pub async fn models(&self, base_url: &str) -> Vec<String> {
        {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(base_url) {
                if entry.fetched_at.elapsed() < self.ttl {
                    return entry.models.clone();
                }
            }
        }

        let models = match self.transport.list_models(base_url).await {
            Ok(models) => {
                debug!(base_url, count = models.len(), "Model catalog refreshed");
                models
            }
            Err(e) => {
                warn!(base_url, error = %e, "Model listing failed");
                Vec::new()
            }
        };

        self.entries.write().await.insert(
            base_url.to_string(),
            CatalogEntry {
                models: models.clone(),
                fetched_at: Instant::now(),
            },
        );
        models
    }

    pub async fn is_available(&self, base_url: &str, model: &str) -> bool {
        self.models(base_url)
            .await
            .iter()
            .any(|m| m == model || m.contains(model))
    }

    /// Forget a runtime's listing so the next lookup refetches it.
    pub async fn invalidate(&self, base_url: &str) {
        self.entries.write().await.remove(base_url);
    }
}
