//! Pipeline configuration, retry policy and tenant secrets.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::TtlCache;
use crate::defaults;
use crate::error::{Error, Result};

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

// =============================================================================
// RETRY POLICY
// =============================================================================

/// Outcome of recording a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum RetryDecision {
    /// Back to `ready` once `next_retry_at` passes.
    Retry {
        attempts: i32,
        delay_secs: i64,
        next_retry_at: DateTime<Utc>,
    },
    /// Parked in `failed_max_attempts`.
    Exhausted { attempts: i32, error: String },
}

impl RetryDecision {
    pub fn attempts(&self) -> i32 {
        match self {
            RetryDecision::Retry { attempts, .. } | RetryDecision::Exhausted { attempts, .. } => {
                *attempts
            }
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, RetryDecision::Exhausted { .. })
    }
}

/// Exponential backoff with a hard attempt ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: i32,
    pub base_delay_secs: i64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: defaults::MAX_ATTEMPTS,
            base_delay_secs: defaults::BASE_RETRY_DELAY_SECS,
        }
    }
}

impl RetryPolicy {
    /// Environment variables:
    /// - `WORKER_MAX_RETRY_ATTEMPTS`
    /// - `WORKER_BASE_RETRY_DELAY` (seconds)
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            max_attempts: env_parse("WORKER_MAX_RETRY_ATTEMPTS")
                .filter(|n: &i32| *n > 0)
                .unwrap_or(default.max_attempts),
            base_delay_secs: env_parse("WORKER_BASE_RETRY_DELAY")
                .filter(|n: &i64| *n > 0)
                .unwrap_or(default.base_delay_secs),
        }
    }

    pub fn new(max_attempts: i32, base_delay_secs: i64) -> Self {
        Self {
            max_attempts,
            base_delay_secs,
        }
    }

    /// Delay before attempt number `attempts + 1`: `base × 2^(attempts − 1)`.
    pub fn delay_secs(&self, attempts: i32) -> i64 {
        let exponent = attempts.saturating_sub(1).clamp(0, 30) as u32;
        self.base_delay_secs.saturating_mul(1_i64 << exponent)
    }

    /// Decide what happens after a failure on an intake that had `attempts`
    /// recorded before this run.
    pub fn decide(&self, attempts: i32, error: &str, now: DateTime<Utc>) -> RetryDecision {
        let new_attempts = attempts.saturating_add(1);
        if new_attempts >= self.max_attempts {
            return RetryDecision::Exhausted {
                attempts: new_attempts.min(self.max_attempts).max(attempts),
                error: format!(
                    "Exceeded maximum attempts ({}). Last error: {}",
                    self.max_attempts, error
                ),
            };
        }
        let delay_secs = self.delay_secs(new_attempts);
        RetryDecision::Retry {
            attempts: new_attempts,
            delay_secs,
            next_retry_at: now + chrono::Duration::seconds(delay_secs),
        }
    }
}

// =============================================================================
// PIPELINE
// =============================================================================

/// Tunables for extraction and graph building.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub chunk_size: usize,
    pub topic_overflow_threshold: i64,
    pub extraction_temperature: f32,
    pub summary_temperature: f32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_size: defaults::CHUNK_SIZE,
            topic_overflow_threshold: defaults::TOPIC_OVERFLOW_THRESHOLD,
            extraction_temperature: defaults::EXTRACTION_TEMPERATURE,
            summary_temperature: defaults::SUMMARY_TEMPERATURE,
        }
    }
}

impl PipelineConfig {
    /// Environment variables:
    /// - `EXTRACTION_CHUNK_SIZE`
    /// - `TOPIC_OVERFLOW_THRESHOLD`
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            chunk_size: env_parse("EXTRACTION_CHUNK_SIZE")
                .filter(|n: &usize| *n > 0)
                .unwrap_or(default.chunk_size),
            topic_overflow_threshold: env_parse("TOPIC_OVERFLOW_THRESHOLD")
                .filter(|n: &i64| *n > 0)
                .unwrap_or(default.topic_overflow_threshold),
            ..default
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_overflow_threshold(mut self, threshold: i64) -> Self {
        self.topic_overflow_threshold = threshold;
        self
    }
}

// =============================================================================
// TENANT SECRETS
// =============================================================================

/// Connection settings resolved per tenant.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantSecrets {
    pub org_id: String,
    /// Generation model override.
    pub model_name: Option<String>,
    /// Generation endpoint override.
    pub model_url: Option<String>,
    pub neo4j_uri: String,
    pub neo4j_user: String,
    pub neo4j_password: String,
    pub neo4j_database: String,
    pub vector_namespace: String,
}

impl std::fmt::Debug for TenantSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantSecrets")
            .field("org_id", &self.org_id)
            .field("model_name", &self.model_name)
            .field("model_url", &self.model_url)
            .field("neo4j_uri", &self.neo4j_uri)
            .field("neo4j_user", &self.neo4j_user)
            .field("neo4j_password", &"<redacted>")
            .field("neo4j_database", &self.neo4j_database)
            .field("vector_namespace", &self.vector_namespace)
            .finish()
    }
}

/// Lowercase, `[a-z0-9-]` only, no repeated or edge dashes.
pub fn sanitize_namespace(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.to_lowercase().chars() {
        let c = if c.is_ascii_alphanumeric() || c == '-' {
            c
        } else {
            '-'
        };
        if c == '-' && out.ends_with('-') {
            continue;
        }
        out.push(c);
    }
    let trimmed = out.trim_matches('-');
    if trimmed.is_empty() {
        defaults::VECTOR_NAMESPACE.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Resolves connection secrets for a tenant.
#[async_trait]
pub trait SecretSource: Send + Sync {
    async fn load(&self, org_id: &str) -> Result<TenantSecrets>;
}

type Lookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Secrets read from process environment, identical for every tenant
/// except the vector namespace, which is derived from the org id unless
/// `VECTOR_NAMESPACE` is set.
///
/// Required: `NEO4J_URI`, `NEO4J_PASSWORD`. Optional: `NEO4J_USER`
/// (default `neo4j`), `NEO4J_DATABASE`, `OLLAMA_GEN_MODEL`, `OLLAMA_BASE`.
#[derive(Clone)]
pub struct EnvSecretSource {
    lookup: Lookup,
}

impl Default for EnvSecretSource {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvSecretSource {
    pub fn new() -> Self {
        Self {
            lookup: Arc::new(|key| std::env::var(key).ok().filter(|v| !v.trim().is_empty())),
        }
    }

    /// Read from a custom lookup instead of the environment.
    pub fn with_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            lookup: Arc::new(lookup),
        }
    }

    fn required(&self, key: &str) -> Result<String> {
        (self.lookup)(key).ok_or_else(|| Error::Config(format!("{} is not set", key)))
    }
}

#[async_trait]
impl SecretSource for EnvSecretSource {
    async fn load(&self, org_id: &str) -> Result<TenantSecrets> {
        Ok(TenantSecrets {
            org_id: org_id.to_string(),
            model_name: (self.lookup)("OLLAMA_GEN_MODEL"),
            model_url: (self.lookup)("OLLAMA_BASE"),
            neo4j_uri: self.required("NEO4J_URI")?,
            neo4j_user: (self.lookup)("NEO4J_USER").unwrap_or_else(|| "neo4j".to_string()),
            neo4j_password: self.required("NEO4J_PASSWORD")?,
            neo4j_database: (self.lookup)("NEO4J_DATABASE")
                .unwrap_or_else(|| defaults::NEO4J_DATABASE.to_string()),
            vector_namespace: (self.lookup)("VECTOR_NAMESPACE")
                .map(|ns| sanitize_namespace(&ns))
                .unwrap_or_else(|| sanitize_namespace(org_id)),
        })
    }
}

/// Wraps a source with a TTL cache keyed by org id.
pub struct CachedSecretSource {
    inner: Arc<dyn SecretSource>,
    cache: TtlCache<String, TenantSecrets>,
}

impl CachedSecretSource {
    pub fn new(inner: Arc<dyn SecretSource>) -> Self {
        Self::with_ttl(
            inner,
            Duration::from_secs(defaults::SECRETS_CACHE_TTL_SECS),
        )
    }

    pub fn with_ttl(inner: Arc<dyn SecretSource>, ttl: Duration) -> Self {
        Self {
            inner,
            cache: TtlCache::new(ttl),
        }
    }

    /// Forget a tenant's secrets, e.g. after a credential rotation.
    pub async fn invalidate(&self, org_id: &str) {
        self.cache.invalidate(&org_id.to_string()).await;
    }
}

#[async_trait]
impl SecretSource for CachedSecretSource {
    async fn load(&self, org_id: &str) -> Result<TenantSecrets> {
        let key = org_id.to_string();
        if let Some(secrets) = self.cache.get(&key).await {
            debug!(org_id, "Tenant secrets served from cache");
            return Ok(secrets);
        }
        let secrets = self.inner.load(org_id).await?;
        self.cache.insert(key, secrets.clone()).await;
        debug!(org_id, ttl_secs = self.cache.ttl().as_secs(), "Tenant secrets cached");
        Ok(secrets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 5, 12, 0, 0).unwrap()
    }

    #[test]
    fn retry_after_second_attempt_waits_four_minutes() {
        let policy = RetryPolicy::new(5, 60);
        match policy.decide(2, "boom", now()) {
            RetryDecision::Retry {
                attempts,
                delay_secs,
                next_retry_at,
            } => {
                assert_eq!(attempts, 3);
                assert_eq!(delay_secs, 240);
                assert_eq!(next_retry_at, now() + chrono::Duration::seconds(240));
            }
            other => panic!("expected retry, got {:?}", other),
        }
    }

    #[test]
    fn first_failure_waits_base_delay() {
        let policy = RetryPolicy::new(5, 60);
        let decision = policy.decide(0, "boom", now());
        assert_eq!(
            decision,
            RetryDecision::Retry {
                attempts: 1,
                delay_secs: 60,
                next_retry_at: now() + chrono::Duration::seconds(60),
            }
        );
    }

    #[test]
    fn reaching_max_attempts_is_terminal() {
        let policy = RetryPolicy::new(5, 60);
        let decision = policy.decide(4, "llm down", now());
        assert!(decision.is_exhausted());
        assert_eq!(decision.attempts(), 5);
        match decision {
            RetryDecision::Exhausted { error, .. } => {
                assert_eq!(error, "Exceeded maximum attempts (5). Last error: llm down");
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn attempts_never_exceed_max() {
        let policy = RetryPolicy::new(3, 10);
        let decision = policy.decide(7, "late", now());
        assert!(decision.is_exhausted());
        assert!(decision.attempts() >= 3);
    }

    #[test]
    fn delay_does_not_overflow() {
        let policy = RetryPolicy::new(i32::MAX, 60);
        assert!(policy.delay_secs(500) > 0);
    }

    #[test]
    fn namespace_sanitization() {
        assert_eq!(sanitize_namespace("Acme Corp_EU"), "acme-corp-eu");
        assert_eq!(sanitize_namespace("--a!!b--"), "a-b");
        assert_eq!(sanitize_namespace("***"), "default");
    }

    #[test]
    fn pipeline_builder_guards_zero_chunk() {
        let cfg = PipelineConfig::default().with_chunk_size(0);
        assert_eq!(cfg.chunk_size, 1);
    }

    fn lookup(vars: &[(&str, &str)]) -> EnvSecretSource {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EnvSecretSource::with_lookup(move |k| map.get(k).cloned())
    }

    #[tokio::test]
    async fn env_source_requires_graph_credentials() {
        let source = lookup(&[("NEO4J_URI", "http://localhost:7474")]);
        let err = source.load("org-1").await.unwrap_err();
        assert!(err.to_string().contains("NEO4J_PASSWORD"));
    }

    #[tokio::test]
    async fn env_source_derives_namespace_from_org() {
        let source = lookup(&[
            ("NEO4J_URI", "http://localhost:7474"),
            ("NEO4J_PASSWORD", "pw"),
        ]);
        let secrets = source.load("Org 42").await.unwrap();
        assert_eq!(secrets.vector_namespace, "org-42");
        assert_eq!(secrets.neo4j_user, "neo4j");
        assert_eq!(secrets.neo4j_database, "neo4j");
        assert!(!format!("{:?}", secrets).contains("pw\""));
    }

    struct CountingSource(AtomicUsize);

    #[async_trait]
    impl SecretSource for CountingSource {
        async fn load(&self, org_id: &str) -> Result<TenantSecrets> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(TenantSecrets {
                org_id: org_id.to_string(),
                model_name: None,
                model_url: None,
                neo4j_uri: "http://graph".into(),
                neo4j_user: "neo4j".into(),
                neo4j_password: "pw".into(),
                neo4j_database: "neo4j".into(),
                vector_namespace: org_id.to_string(),
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cached_source_reloads_after_ttl() {
        let inner = Arc::new(CountingSource(AtomicUsize::new(0)));
        let cached = CachedSecretSource::with_ttl(inner.clone(), Duration::from_secs(60));

        cached.load("org-1").await.unwrap();
        cached.load("org-1").await.unwrap();
        cached.load("org-2").await.unwrap();
        assert_eq!(inner.0.load(Ordering::SeqCst), 2);

        tokio::time::advance(Duration::from_secs(61)).await;
        cached.load("org-1").await.unwrap();
        assert_eq!(inner.0.load(Ordering::SeqCst), 3);

        cached.invalidate("org-1").await;
        cached.load("org-1").await.unwrap();
        assert_eq!(inner.0.load(Ordering::SeqCst), 4);
    }
}
