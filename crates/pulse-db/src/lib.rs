//! # pulse-db
//!
//! Persistence layer for the pulse pipeline.
//!
//! This crate provides:
//! - Connection pool management
//! - `PgIntakeRepository` with the atomic claim and retry scheduling
//! - `PgMemoryRepository` for derived memories
//! - `PgVectorStore` over pgvector for topic findings
//! - Filesystem content storage with MD5 verification
//! - In-memory implementations of every trait for tests and local runs
//!
//! ## Example
//!
//! ```rust,ignore
//! use pulse_db::{Database, IntakeRepository, NewIntake};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/pulse").await?;
//!     let intake = db.intakes.create(NewIntake::ready("acme", "org/acme/intake/1")).await?;
//!     assert!(db.intakes.claim(intake.id, "acme").await?);
//!     Ok(())
//! }
//! ```

pub mod content;
pub mod in_memory;
pub mod intakes;
pub mod memories;
pub mod pool;
pub mod vectors;

// Re-export core types
pub use pulse_core::*;

pub use content::{
    compute_checksum, download_verified, object_path, verify_checksum, FilesystemContentStore,
};
pub use in_memory::{InMemoryContentStore, InMemoryIntakeStore, InMemoryVectorStore};
pub use intakes::PgIntakeRepository;
pub use memories::PgMemoryRepository;
pub use pool::{create_pool, create_pool_with_config, log_pool_metrics, PoolConfig};
pub use vectors::PgVectorStore;

use std::sync::Arc;

/// Combined database context with all repositories.
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Intake lifecycle repository.
    pub intakes: PgIntakeRepository,
    /// Derived memory repository.
    pub memories: PgMemoryRepository,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            intakes: PgIntakeRepository::new(pool.clone()),
            memories: PgMemoryRepository::new(pool.clone()),
            pool,
        }
    }

    /// Create a new Database instance by connecting to the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool))
    }

    /// Connect with an explicit pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Vector store for one tenant namespace sharing this pool.
    pub fn vectors(
        &self,
        embedder: Arc<dyn EmbeddingBackend>,
        namespace: impl Into<String>,
    ) -> PgVectorStore {
        PgVectorStore::new(self.pool.clone(), embedder, namespace)
    }

    /// Run database migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Internal(format!("Migration failed: {}", e)))?;
        Ok(())
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self::new(self.pool.clone())
    }
}
