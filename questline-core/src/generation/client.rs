//! Generation Client: the single gateway to the content provider.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use tracing::{debug, info, warn};

use super::cache::{cache_key, ResponseCache};
use super::provider::{GenerationProvider, GenerationRequest, ProviderReply};
use crate::config::GenerationConfig;
use crate::error::GenerationProviderError;

/// A provider response plus bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationResponse {
    /// Raw content; callers parse it into their own schema.
    pub content: String,
    pub model: String,
    pub latency_ms: u64,
    /// Estimated USD cost of this call (zero on cache hits).
    pub cost: f64,
    pub cached: bool,
}

/// Running totals for observability.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GenerationStats {
    /// Calls made through the client, hits included.
    pub requests: u64,
    pub cache_hits: u64,
    /// Calls that reached the provider.
    pub provider_calls: u64,
    pub failures: u64,
    pub total_latency_ms: u64,
    pub total_cost: f64,
}

/// Wraps a [`GenerationProvider`] with caching, a timeout and cost accounting.
///
/// No retry happens here; the orchestrator retries with a
/// different prompt instead of repeating the same call.
pub struct GenerationClient {
    provider: Arc<dyn GenerationProvider>,
    cache: ResponseCache<GenerationResponse>,
    config: GenerationConfig,
    stats: Mutex<GenerationStats>,
}

impl GenerationClient {
    pub fn new(provider: Arc<dyn GenerationProvider>, config: GenerationConfig) -> Self {
        Self {
            provider,
            cache: ResponseCache::new(config.cache_ttl, config.cache_capacity),
            config,
            stats: Mutex::new(GenerationStats::default()),
        }
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    /// A request skeleton with the configured model and token limit.
    pub fn request(&self, system_context: impl Into<String>) -> GenerationRequest {
        GenerationRequest::new(&self.config.model, system_context)
            .with_max_tokens(self.config.max_tokens)
    }

    /// Generate a response and parse it with `parse`, serving from cache when an
    /// equivalent request was seen recently.
    ///
    /// Only replies that `parse` accepts are cached, so a malformed reply is never
    /// replayed and the next identical request reaches the provider again.
    pub async fn generate_parsed<T, E>(
        &self,
        request: &GenerationRequest,
        parse: impl FnOnce(&str) -> Result<T, E>,
    ) -> Result<(T, GenerationResponse), E>
    where
        E: From<GenerationProviderError>,
    {
        let key = cache_key(request);

        if let Some(mut hit) = self.cache.get(&key) {
            hit.cached = true;
            hit.cost = 0.0;
            hit.latency_ms = 0;
            self.record(|s| {
                s.requests += 1;
                s.cache_hits += 1;
            });
            debug!(model = %hit.model, key = %&key[..12], "generation cache hit");
            let parsed = parse(&hit.content)?;
            return Ok((parsed, hit));
        }

        let response = self.call_provider(request).await?;
        let parsed = parse(&response.content)?;
        self.cache.insert(key, response.clone());
        Ok((parsed, response))
    }

    async fn call_provider(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationResponse, GenerationProviderError> {
        let started = Instant::now();
        let outcome =
            tokio::time::timeout(self.config.timeout, self.provider.complete(request)).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        let reply: ProviderReply = match outcome {
            Ok(Ok(reply)) => reply,
            Ok(Err(err)) => {
                self.record_failure(latency_ms);
                warn!(
                    provider = self.provider.name(),
                    latency_ms,
                    error = %err,
                    "generation provider call failed"
                );
                return Err(err);
            }
            Err(_) => {
                self.record_failure(latency_ms);
                warn!(
                    provider = self.provider.name(),
                    timeout_ms = self.config.timeout.as_millis() as u64,
                    "generation provider call timed out"
                );
                return Err(GenerationProviderError::Timeout(self.config.timeout));
            }
        };

        let cost = self.estimate_cost(reply.input_tokens, reply.output_tokens);
        let response = GenerationResponse {
            content: reply.content,
            model: reply.model,
            latency_ms,
            cost,
            cached: false,
        };

        self.record(|s| {
            s.requests += 1;
            s.provider_calls += 1;
            s.total_latency_ms += latency_ms;
            s.total_cost += cost;
        });
        info!(
            provider = self.provider.name(),
            model = %response.model,
            latency_ms,
            cost,
            input_tokens = reply.input_tokens,
            output_tokens = reply.output_tokens,
            "generation completed"
        );
        Ok(response)
    }

    /// Snapshot of the running totals.
    pub fn stats(&self) -> GenerationStats {
        self.stats.lock().map(|s| *s).unwrap_or_default()
    }

    fn estimate_cost(&self, input_tokens: usize, output_tokens: usize) -> f64 {
        (input_tokens as f64 * self.config.input_price_per_mtok
            + output_tokens as f64 * self.config.output_price_per_mtok)
            / 1_000_000.0
    }

    fn record_failure(&self, latency_ms: u64) {
        self.record(|s| {
            s.requests += 1;
            s.provider_calls += 1;
            s.failures += 1;
            s.total_latency_ms += latency_ms;
        });
    }

    fn record(&self, update: impl FnOnce(&mut GenerationStats)) {
        if let Ok(mut stats) = self.stats.lock() {
            update(&mut stats);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SchemaValidationError;
    use crate::generation::provider::ChatMessage;
    use crate::generation::schema::parse_payload;
    use crate::testing::ScriptedProvider;
    use serde_json::Value;
    use std::time::Duration;

    fn client(provider: Arc<ScriptedProvider>, config: GenerationConfig) -> GenerationClient {
        GenerationClient::new(provider, config)
    }

    fn request(text: &str) -> GenerationRequest {
        GenerationRequest::new("test-model", "system").with_message(ChatMessage::user(text))
    }

    #[derive(Debug)]
    enum TestError {
        Provider(GenerationProviderError),
        Schema(SchemaValidationError),
    }

    impl From<GenerationProviderError> for TestError {
        fn from(e: GenerationProviderError) -> Self {
            TestError::Provider(e)
        }
    }

    async fn generate_json(
        client: &GenerationClient,
        request: &GenerationRequest,
    ) -> Result<(Value, GenerationResponse), TestError> {
        client
            .generate_parsed(request, |text| {
                parse_payload::<Value>(text).map_err(TestError::Schema)
            })
            .await
    }

    #[tokio::test]
    async fn test_cache_hit_skips_provider() {
        let provider = Arc::new(ScriptedProvider::new().with_reply("{\"ok\":true}"));
        let client = client(provider.clone(), GenerationConfig::default());

        let (_, first) = generate_json(&client, &request("hello")).await.unwrap();
        let (value, second) = generate_json(&client, &request("hello")).await.unwrap();

        assert!(!first.cached);
        assert!(second.cached);
        assert_eq!(second.cost, 0.0);
        assert_eq!(second.content, first.content);
        assert_eq!(value["ok"], Value::Bool(true));
        assert_eq!(provider.call_count(), 1);

        let stats = client.stats();
        assert_eq!(stats.requests, 2);
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.provider_calls, 1);
    }

    #[tokio::test]
    async fn test_unparseable_reply_is_not_cached() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .with_reply("not json at all")
                .with_reply("{\"ok\":true}"),
        );
        let client = client(provider.clone(), GenerationConfig::default());

        let err = generate_json(&client, &request("same")).await.unwrap_err();
        assert!(matches!(err, TestError::Schema(_)));

        let (value, response) = generate_json(&client, &request("same")).await.unwrap();
        assert!(!response.cached);
        assert_eq!(value["ok"], Value::Bool(true));
        assert_eq!(provider.call_count(), 2);
        assert_eq!(client.stats().cache_hits, 0);

        // Now that a reply parsed, it is served from cache.
        let (_, third) = generate_json(&client, &request("same")).await.unwrap();
        assert!(third.cached);
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn test_cost_from_token_usage() {
        let provider =
            Arc::new(ScriptedProvider::new().with_reply_usage("{}", 1_000_000, 1_000_000));
        let config = GenerationConfig {
            input_price_per_mtok: 3.0,
            output_price_per_mtok: 15.0,
            ..GenerationConfig::default()
        };
        let client = client(provider, config);

        let (_, response) = generate_json(&client, &request("price me")).await.unwrap();
        assert!((response.cost - 18.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_failure_is_not_retried_or_cached() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .with_failure(GenerationProviderError::Network("reset".into()))
                .with_reply("{}"),
        );
        let client = client(provider.clone(), GenerationConfig::default());

        let err = generate_json(&client, &request("flaky")).await.unwrap_err();
        assert!(matches!(
            err,
            TestError::Provider(GenerationProviderError::Network(_))
        ));
        assert_eq!(provider.call_count(), 1);
        assert_eq!(client.stats().failures, 1);

        // The next call goes to the provider again: failures are never cached.
        let (_, ok) = generate_json(&client, &request("flaky")).await.unwrap();
        assert!(!ok.cached);
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn test_stalled_provider_times_out() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .with_reply("{}")
                .with_delay(Duration::from_millis(200)),
        );
        let config = GenerationConfig {
            timeout: Duration::from_millis(20),
            ..GenerationConfig::default()
        };
        let client = client(provider, config);

        let err = generate_json(&client, &request("slow")).await.unwrap_err();
        assert!(matches!(
            err,
            TestError::Provider(GenerationProviderError::Timeout(_))
        ));
    }
}
