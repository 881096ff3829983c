//! Tenant onboarding — resolve the schema, register, start polling.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use secrecy::SecretString;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

use crate::error::Error;
use crate::poller::{MailboxPoller, PollerHandle, spawn_tenant_poller};
use crate::records::RecordStore;
use crate::tenants::{TenantRegistry, TenantSummary, ensure_schema};

/// Owns the per-tenant poll loops. At most one loop runs per tenant.
pub struct PollerSupervisor {
    poller: Arc<MailboxPoller>,
    handles: Mutex<HashMap<String, PollerHandle>>,
}

impl PollerSupervisor {
    pub fn new(poller: Arc<MailboxPoller>) -> Self {
        Self {
            poller,
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Start the tenant's loop unless one is already running.
    /// Returns `true` if a new loop was spawned.
    pub fn ensure_started(&self, tenant_id: &str) -> bool {
        let mut handles = self
            .handles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(existing) = handles.get(tenant_id) {
            if !existing.is_finished() {
                return false;
            }
            warn!(tenant = %tenant_id, "Poller had exited, restarting");
        }

        let handle = spawn_tenant_poller(Arc::clone(&self.poller), tenant_id.to_string());
        handles.insert(tenant_id.to_string(), handle);
        true
    }

    pub fn running(&self) -> Vec<String> {
        let handles = self
            .handles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut ids: Vec<String> = handles
            .iter()
            .filter(|(_, h)| !h.is_finished())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Signal every loop to stop and wait for them to exit.
    pub async fn shutdown_all(&self) {
        let handles: Vec<(String, PollerHandle)> = self
            .handles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .drain()
            .collect();

        for (_, handle) in &handles {
            handle.stop();
        }
        for (tenant_id, handle) in handles {
            if let Err(e) = handle.handle.await {
                warn!(tenant = %tenant_id, error = %e, "Poller task ended abnormally");
            }
        }
    }
}

/// Turns a `(tenant_id, access_token)` pair into an active tenant.
pub struct Onboarding {
    store: Arc<dyn RecordStore>,
    registry: Arc<TenantRegistry>,
    /// `None` when no mailbox is configured; tenants are registered but not polled.
    supervisor: Option<Arc<PollerSupervisor>>,
    /// One lock per tenant; onboarding runs for the same tenant never overlap.
    tenant_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl Onboarding {
    pub fn new(
        store: Arc<dyn RecordStore>,
        registry: Arc<TenantRegistry>,
        supervisor: Option<Arc<PollerSupervisor>>,
    ) -> Self {
        Self {
            store,
            registry,
            supervisor,
            tenant_locks: Mutex::new(HashMap::new()),
        }
    }

    fn tenant_lock(&self, tenant_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self
            .tenant_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(locks.entry(tenant_id.to_string()).or_default())
    }

    /// Ensure the four destination fields exist, register the tenant, and
    /// start its poller. A schema failure leaves the tenant unregistered.
    /// Safe to re-run: fields are reused and the poller is not duplicated.
    pub async fn onboard(
        &self,
        tenant_id: &str,
        access_token: SecretString,
    ) -> Result<TenantSummary, Error> {
        let lock = self.tenant_lock(tenant_id);
        let _guard = lock.lock().await;

        let mapping = ensure_schema(self.store.as_ref(), tenant_id, &access_token).await?;

        self.registry
            .register(tenant_id, access_token, mapping)
            .await?;

        if let Some(supervisor) = &self.supervisor
            && supervisor.ensure_started(tenant_id)
        {
            info!(tenant = %tenant_id, "Polling started");
        }

        let config = self
            .registry
            .get(tenant_id)
            .await
            .ok_or_else(|| crate::error::RegistryError::NotFound {
                tenant_id: tenant_id.to_string(),
            })?;
        Ok(TenantSummary::from(&config))
    }

    /// Start pollers for every tenant already in the registry (after a reload).
    pub async fn resume_all(&self) -> usize {
        let Some(supervisor) = &self.supervisor else {
            return 0;
        };
        let mut started = 0;
        for tenant_id in self.registry.tenant_ids().await {
            if supervisor.ensure_started(&tenant_id) {
                started += 1;
            }
        }
        started
    }

    pub fn registry(&self) -> &Arc<TenantRegistry> {
        &self.registry
    }
}
