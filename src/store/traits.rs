//! Repository traits injected into the tenant registry and dedup ledger.
//!
//! Both are optional: without them the registry and ledger keep state in
//! process memory only.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DatabaseError;
use crate::tenants::TenantConfig;

/// Durable storage for tenant configuration.
#[async_trait]
pub trait TenantRepository: Send + Sync {
    /// Insert or replace a tenant.
    async fn save_tenant(&self, tenant: &TenantConfig) -> Result<(), DatabaseError>;

    /// Load every stored tenant.
    async fn load_tenants(&self) -> Result<Vec<TenantConfig>, DatabaseError>;
}

/// Durable storage for message claims.
#[async_trait]
pub trait ClaimRepository: Send + Sync {
    /// Record a claim. Returns `false` if the id was already stored.
    async fn insert_claim(
        &self,
        message_id: &str,
        claimed_at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError>;

    /// Claims made at or after `since`, oldest first.
    async fn load_claims(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<(String, DateTime<Utc>)>, DatabaseError>;

    /// Delete claims older than `before`. Returns the number removed.
    async fn prune_claims(&self, before: DateTime<Utc>) -> Result<usize, DatabaseError>;
}
