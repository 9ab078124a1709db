//! TTL response cache keyed by normalized request hash.

use std::time::Duration;

use moka::sync::Cache;
use sha2::{Digest, Sha256};

use super::provider::GenerationRequest;

/// A bounded cache whose entries expire after a fixed TTL.
///
/// Backed by moka; a capacity of zero disables caching entirely.
pub struct ResponseCache<V> {
    cache: Option<Cache<String, V>>,
}

impl<V: Clone + Send + Sync + 'static> ResponseCache<V> {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        let cache = (capacity > 0).then(|| {
            Cache::builder()
                .max_capacity(capacity as u64)
                .time_to_live(ttl)
                .build()
        });
        Self { cache }
    }

    /// Get a value if it exists and hasn't expired.
    pub fn get(&self, key: &str) -> Option<V> {
        self.cache.as_ref().and_then(|cache| cache.get(key))
    }

    pub fn insert(&self, key: String, value: V) {
        if let Some(cache) = &self.cache {
            cache.insert(key, value);
        }
    }

    /// Number of live entries, after flushing pending evictions.
    pub fn len(&self) -> u64 {
        match &self.cache {
            Some(cache) => {
                cache.run_pending_tasks();
                cache.entry_count()
            }
            None => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Hash a request after normalizing away differences that cannot change the answer.
///
/// Whitespace runs collapse to a single space, leading/trailing whitespace is dropped,
/// and temperature is rounded to two decimals.
pub fn cache_key(request: &GenerationRequest) -> String {
    let mut hasher = Sha256::new();
    hasher.update(request.model.as_bytes());
    hasher.update([0u8]);
    hasher.update(request.max_tokens.to_le_bytes());
    hasher.update(format!("{:.2}", request.temperature).as_bytes());
    hasher.update([0u8]);
    hasher.update(normalize(&request.system_context).as_bytes());
    for message in &request.messages {
        hasher.update([0u8]);
        hasher.update(format!("{:?}", message.role).as_bytes());
        hasher.update([0u8]);
        hasher.update(normalize(&message.text).as_bytes());
    }
    hex::encode(hasher.finalize())
}

fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::provider::ChatMessage;

    fn request(text: &str, temperature: f32) -> GenerationRequest {
        GenerationRequest::new("model-a", "system")
            .with_message(ChatMessage::user(text))
            .with_temperature(temperature)
    }

    #[test]
    fn test_key_ignores_whitespace_noise() {
        let a = cache_key(&request("Write a  quest\nfor Mira", 0.7));
        let b = cache_key(&request("  Write a quest for Mira ", 0.7001));
        assert_eq!(a, b);
    }

    #[test]
    fn test_key_distinguishes_content_and_temperature() {
        let base = cache_key(&request("Write a quest", 0.7));
        assert_ne!(base, cache_key(&request("Write a poem", 0.7)));
        assert_ne!(base, cache_key(&request("Write a quest", 0.2)));
    }

    #[test]
    fn test_cache_hit_and_expiry() {
        let cache = ResponseCache::new(Duration::from_millis(20), 4);
        cache.insert("k".to_string(), 7u32);
        assert_eq!(cache.get("k"), Some(7));

        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn test_capacity_bounds_entries() {
        let cache = ResponseCache::new(Duration::from_secs(60), 2);
        for (i, key) in ["a", "b", "c", "d"].into_iter().enumerate() {
            cache.insert(key.to_string(), i as u32);
        }
        assert!(cache.len() <= 2);
    }

    #[test]
    fn test_zero_capacity_disables_cache() {
        let cache = ResponseCache::new(Duration::from_secs(60), 0);
        cache.insert("a".to_string(), 1u32);
        assert_eq!(cache.get("a"), None);
        assert!(cache.is_empty());
    }
}
