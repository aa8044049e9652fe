//! Per-tenant backends for the pipeline.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use pulse_core::{
    defaults, CachedSecretSource, EmbeddingBackend, GenerationBackend, GraphStore, Result,
    SecretSource, TenantSecrets, TtlCache, VectorStore,
};
use pulse_db::Database;
use pulse_graph::{Neo4jConfig, Neo4jGraphStore};
use pulse_inference::OllamaBackend;

/// Backends one intake is processed with.
#[derive(Clone)]
pub struct TenantServices {
    pub llm: Arc<dyn GenerationBackend>,
    pub graph: Arc<dyn GraphStore>,
    pub vectors: Arc<dyn VectorStore>,
}

/// Resolves the backends for an organization.
#[async_trait]
pub trait ServiceProvider: Send + Sync {
    async fn services_for(&self, org_id: &str) -> Result<TenantServices>;
}

/// The same backends for every organization.
#[derive(Clone)]
pub struct SharedServices {
    services: TenantServices,
}

impl SharedServices {
    pub fn new(services: TenantServices) -> Self {
        Self { services }
    }
}

#[async_trait]
impl ServiceProvider for SharedServices {
    async fn services_for(&self, _org_id: &str) -> Result<TenantServices> {
        Ok(self.services.clone())
    }
}

/// Builds Ollama, Neo4j and pgvector backends from each tenant's secrets.
///
/// Secrets and the constructed backends are cached per org for the same
/// TTL, so a credential rotation is picked up once the entry expires or
/// [`TenantServiceProvider::invalidate`] is called.
pub struct TenantServiceProvider {
    secrets: CachedSecretSource,
    db: Database,
    embedder: Arc<dyn EmbeddingBackend>,
    cache: TtlCache<String, TenantServices>,
}

impl TenantServiceProvider {
    pub fn new(
        secrets: Arc<dyn SecretSource>,
        db: Database,
        embedder: Arc<dyn EmbeddingBackend>,
    ) -> Self {
        Self::with_ttl(
            secrets,
            db,
            embedder,
            Duration::from_secs(defaults::SECRETS_CACHE_TTL_SECS),
        )
    }

    pub fn with_ttl(
        secrets: Arc<dyn SecretSource>,
        db: Database,
        embedder: Arc<dyn EmbeddingBackend>,
        ttl: Duration,
    ) -> Self {
        Self {
            secrets: CachedSecretSource::with_ttl(secrets, ttl),
            db,
            embedder,
            cache: TtlCache::new(ttl),
        }
    }

    /// Drop cached secrets and backends for an org.
    pub async fn invalidate(&self, org_id: &str) {
        self.secrets.invalidate(org_id).await;
        self.cache.invalidate(&org_id.to_string()).await;
    }

    fn build(&self, secrets: &TenantSecrets) -> TenantServices {
        let mut llm = OllamaBackend::from_env();
        if let Some(url) = secrets.model_url.as_deref() {
            llm = llm.with_base_url(url);
        }
        if let Some(model) = secrets.model_name.as_deref() {
            llm = llm.with_gen_model(model);
        }
        let graph = Neo4jGraphStore::new(Neo4jConfig::from_secrets(secrets));
        let vectors = self
            .db
            .vectors(self.embedder.clone(), secrets.vector_namespace.clone());
        info!(
            subsystem = "jobs",
            component = "services",
            org_id = %secrets.org_id,
            model = GenerationBackend::model_name(&llm),
            namespace = %secrets.vector_namespace,
            "Tenant services built"
        );
        TenantServices {
            llm: Arc::new(llm),
            graph: Arc::new(graph),
            vectors: Arc::new(vectors),
        }
    }
}

#[async_trait]
impl ServiceProvider for TenantServiceProvider {
    async fn services_for(&self, org_id: &str) -> Result<TenantServices> {
        self.cache
            .get_or_try_insert_with(&org_id.to_string(), || async {
                debug!(org_id, "Building tenant services");
                let secrets = self.secrets.load(org_id).await?;
                Ok(self.build(&secrets))
            })
            .await
    }
}
