//! Startup connectivity to the key-value and document stores.

use crate::adapters::{MemoryDocumentStore, MemoryStore, MongoStore, RedisStore};
use crate::config::backend::BackendSettings;
use crate::domain::ports::{DocumentStore, KeyValueStore};
use crate::utils::error::{Result, StackError};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Runs `attempt` until it succeeds or `attempts` tries are used up.
///
/// The closure receives the 1-based attempt number. The last error is kept
/// as the message of the resulting `StackError::ConnectionError`.
pub async fn retry<T, F, Fut>(
    store: &str,
    attempts: u32,
    delay: Duration,
    mut attempt: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = attempts.max(1);
    let mut last_error = String::new();

    for n in 1..=attempts {
        match attempt(n).await {
            Ok(value) => {
                if n > 1 {
                    tracing::info!("✅ Connected to {} on attempt {}", store, n);
                }
                return Ok(value);
            }
            Err(e) => {
                tracing::warn!(
                    "⚠️ Connection attempt {}/{} to {} failed: {}",
                    n,
                    attempts,
                    store,
                    e
                );
                last_error = e.to_string();
                if n < attempts {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    tracing::error!("❌ Giving up on {} after {} attempt(s)", store, attempts);
    Err(StackError::ConnectionError {
        store: store.to_string(),
        attempts,
        message: last_error,
    })
}

pub struct ConnectedStores {
    pub key_value: Arc<dyn KeyValueStore>,
    pub key_value_label: String,
    /// `None` when the backend runs without a document store.
    pub document: Option<Arc<dyn DocumentStore>>,
    pub document_label: String,
}

impl ConnectedStores {
    /// In-process stores for local runs without containers.
    pub fn in_memory() -> Self {
        Self {
            key_value: Arc::new(MemoryStore::new()),
            key_value_label: "memory".to_string(),
            document: Some(Arc::new(MemoryDocumentStore::new())),
            document_label: "memory".to_string(),
        }
    }

    pub fn close(&self) {
        self.key_value.close();
        tracing::info!("🔌 Store connections closed");
    }
}

/// Both stores must answer before the backend starts serving.
pub async fn connect_stores(settings: &BackendSettings) -> Result<ConnectedStores> {
    let timeout = settings.connect_timeout();
    let attempts = settings.connect_retries;
    let delay = settings.retry_delay();

    let redis_endpoint = settings.redis_endpoint()?;
    let credentials = settings.redis_credentials(&redis_endpoint);
    let max_connections = settings.redis_max_connections as usize;

    tracing::info!("🔗 Connecting to key-value store at {}", redis_endpoint);
    let redis = retry("key-value store", attempts, delay, |_| {
        RedisStore::connect(
            redis_endpoint.clone(),
            credentials.clone(),
            max_connections,
            timeout,
        )
    })
    .await?;

    let mongo_endpoint = settings.mongo_endpoint()?;
    tracing::info!(
        "🔗 Connecting to document store at {} (database '{}', pool {}..{})",
        mongo_endpoint,
        settings.mongo_db_name,
        settings.mongo_min_pool_size,
        settings.mongo_max_pool_size
    );
    let mongo = retry("document store", attempts, delay, |_| async move {
        let store = MongoStore::connect(settings, timeout).await?;
        store.ping().await?;
        Ok(store)
    })
    .await?;

    tracing::info!("✅ Both stores are reachable");
    Ok(ConnectedStores {
        key_value: Arc::new(redis),
        key_value_label: redis_endpoint.to_string(),
        document: Some(Arc::new(mongo)),
        document_label: mongo_endpoint.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_retry_succeeds_on_third_attempt() {
        let calls = AtomicU32::new(0);
        let result = retry("redis", 3, Duration::from_secs(5), |n| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 3 {
                    Err(StackError::protocol("not yet"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhaustion_reports_attempts() {
        let started = tokio::time::Instant::now();
        let err = retry::<(), _, _>("mongo", 3, Duration::from_secs(5), |_| async {
            Err(StackError::protocol("refused"))
        })
        .await
        .unwrap_err();

        match err {
            StackError::ConnectionError {
                store,
                attempts,
                message,
            } => {
                assert_eq!(store, "mongo");
                assert_eq!(attempts, 3);
                assert!(message.contains("refused"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        // Two pauses between three attempts.
        assert!(started.elapsed() >= Duration::from_secs(10));
    }
}
