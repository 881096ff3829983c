//! Tenant registry — credential, field mapping and sender policy per tenant.

use std::collections::HashMap;
use std::sync::Arc;

use secrecy::SecretString;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::model::{FieldMapping, TenantConfig, normalize_sender};
use crate::error::{DatabaseError, RegistryError};
use crate::store::TenantRepository;

/// In-memory tenant registry with optional write-through persistence.
pub struct TenantRegistry {
    tenants: RwLock<HashMap<String, TenantConfig>>,
    repository: Option<Arc<dyn TenantRepository>>,
}

impl TenantRegistry {
    pub fn new() -> Self {
        Self {
            tenants: RwLock::new(HashMap::new()),
            repository: None,
        }
    }

    /// Registry that persists every mutation to `repository`.
    pub fn with_repository(repository: Arc<dyn TenantRepository>) -> Self {
        Self {
            tenants: RwLock::new(HashMap::new()),
            repository: Some(repository),
        }
    }

    /// Load all persisted tenants. Returns the number loaded.
    pub async fn load(&self) -> Result<usize, DatabaseError> {
        let Some(repo) = &self.repository else {
            return Ok(0);
        };
        let stored = repo.load_tenants().await?;
        let count = stored.len();

        let mut tenants = self.tenants.write().await;
        for tenant in stored {
            tenants.insert(tenant.tenant_id.clone(), tenant);
        }
        info!(count, "Tenants loaded from store");
        Ok(count)
    }

    /// Insert or replace a tenant after onboarding.
    ///
    /// A sender policy configured earlier survives re-registration.
    pub async fn register(
        &self,
        tenant_id: &str,
        access_token: SecretString,
        field_mapping: FieldMapping,
    ) -> Result<(), RegistryError> {
        let mut tenants = self.tenants.write().await;

        let mut config = TenantConfig::new(tenant_id, access_token, field_mapping);
        config.allowed_sender = tenants
            .get(tenant_id)
            .and_then(|existing| existing.allowed_sender.clone());

        self.persist(&config).await?;
        tenants.insert(tenant_id.to_string(), config);

        info!(tenant = %tenant_id, "Tenant registered");
        Ok(())
    }

    /// Set the single sender allowed to create records for a tenant.
    /// Returns the normalized address that was stored.
    pub async fn set_allowed_sender(
        &self,
        tenant_id: &str,
        email: &str,
    ) -> Result<String, RegistryError> {
        let normalized = normalize_sender(email);
        if normalized.is_empty() {
            return Err(RegistryError::InvalidSender(email.to_string()));
        }

        let mut tenants = self.tenants.write().await;
        let existing = tenants
            .get(tenant_id)
            .ok_or_else(|| RegistryError::NotFound {
                tenant_id: tenant_id.to_string(),
            })?;

        let mut updated = existing.clone();
        updated.allowed_sender = Some(normalized.clone());
        self.persist(&updated).await?;
        tenants.insert(tenant_id.to_string(), updated);

        info!(tenant = %tenant_id, sender = %normalized, "Allowed sender updated");
        Ok(normalized)
    }

    /// The tenant's configured sender, or why there is none.
    pub async fn allowed_sender(&self, tenant_id: &str) -> Result<String, RegistryError> {
        let tenants = self.tenants.read().await;
        let tenant = tenants.get(tenant_id).ok_or_else(|| RegistryError::NotFound {
            tenant_id: tenant_id.to_string(),
        })?;
        tenant
            .allowed_sender
            .clone()
            .ok_or_else(|| RegistryError::NoAllowedSender {
                tenant_id: tenant_id.to_string(),
            })
    }

    pub async fn get(&self, tenant_id: &str) -> Option<TenantConfig> {
        self.tenants.read().await.get(tenant_id).cloned()
    }

    pub async fn tenant_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.tenants.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    async fn persist(&self, config: &TenantConfig) -> Result<(), RegistryError> {
        if let Some(repo) = &self.repository {
            repo.save_tenant(config)
                .await
                .map_err(|source| RegistryError::Persist {
                    tenant_id: config.tenant_id.clone(),
                    source,
                })?;
            debug!(tenant = %config.tenant_id, "Tenant persisted");
        }
        Ok(())
    }
}

impl Default for TenantRegistry {
    fn default() -> Self {
        Self::new()
    }
}
