//! libSQL backend — durable tenant configuration and message claims.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::{ClaimRepository, TenantRepository};
use crate::tenants::{FieldMapping, TenantConfig};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db)?;
        backend.init_schema().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let backend = Self::from_database(db)?;
        backend.init_schema().await?;
        Ok(backend)
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn init_schema(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }
}

// ── Row helpers ─────────────────────────────────────────────────────

fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    Utc::now()
}

fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn row_to_tenant(row: &libsql::Row) -> Result<TenantConfig, DatabaseError> {
    let tenant_id: String = row
        .get(0)
        .map_err(|e| DatabaseError::Query(format!("tenant row parse: {e}")))?;
    let token: String = row
        .get(1)
        .map_err(|e| DatabaseError::Query(format!("tenant row parse: {e}")))?;
    let mapping_json: String = row
        .get(2)
        .map_err(|e| DatabaseError::Query(format!("tenant row parse: {e}")))?;
    let allowed_sender: Option<String> = row.get(3).ok();

    let field_mapping: FieldMapping = serde_json::from_str(&mapping_json).map_err(|e| {
        DatabaseError::Serialization(format!("field_mapping for {tenant_id}: {e}"))
    })?;

    let mut tenant = TenantConfig::new(tenant_id, SecretString::from(token), field_mapping);
    tenant.allowed_sender = allowed_sender;
    Ok(tenant)
}

// ── Trait implementations ───────────────────────────────────────────

#[async_trait]
impl TenantRepository for LibSqlBackend {
    async fn save_tenant(&self, tenant: &TenantConfig) -> Result<(), DatabaseError> {
        let mapping = serde_json::to_string(&tenant.field_mapping)
            .map_err(|e| DatabaseError::Serialization(format!("field_mapping: {e}")))?;
        let now = Utc::now().to_rfc3339();

        self.conn()
            .execute(
                "INSERT INTO tenants (tenant_id, access_token, field_mapping, allowed_sender,
                    created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                 ON CONFLICT(tenant_id) DO UPDATE SET
                    access_token = excluded.access_token,
                    field_mapping = excluded.field_mapping,
                    allowed_sender = excluded.allowed_sender,
                    updated_at = excluded.updated_at",
                params![
                    tenant.tenant_id.clone(),
                    tenant.access_token.expose_secret().to_string(),
                    mapping,
                    opt_text(tenant.allowed_sender.as_deref()),
                    now,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("save_tenant: {e}")))?;

        debug!(tenant = %tenant.tenant_id, "Tenant saved");
        Ok(())
    }

    async fn load_tenants(&self) -> Result<Vec<TenantConfig>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT tenant_id, access_token, field_mapping, allowed_sender
                 FROM tenants ORDER BY created_at",
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("load_tenants: {e}")))?;

        let mut tenants = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("load_tenants: {e}")))?
        {
            tenants.push(row_to_tenant(&row)?);
        }
        Ok(tenants)
    }
}

#[async_trait]
impl ClaimRepository for LibSqlBackend {
    async fn insert_claim(
        &self,
        message_id: &str,
        claimed_at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let inserted = self
            .conn()
            .execute(
                "INSERT OR IGNORE INTO message_claims (message_id, claimed_at) VALUES (?1, ?2)",
                params![message_id, claimed_at.to_rfc3339()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_claim: {e}")))?;
        Ok(inserted > 0)
    }

    async fn load_claims(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<(String, DateTime<Utc>)>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT message_id, claimed_at FROM message_claims
                 WHERE claimed_at >= ?1 ORDER BY claimed_at",
                params![since.to_rfc3339()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("load_claims: {e}")))?;

        let mut claims = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("load_claims: {e}")))?
        {
            let id: String = row
                .get(0)
                .map_err(|e| DatabaseError::Query(format!("claim row parse: {e}")))?;
            let at: String = row
                .get(1)
                .map_err(|e| DatabaseError::Query(format!("claim row parse: {e}")))?;
            claims.push((id, parse_datetime(&at)));
        }
        Ok(claims)
    }

    async fn prune_claims(&self, before: DateTime<Utc>) -> Result<usize, DatabaseError> {
        let removed = self
            .conn()
            .execute(
                "DELETE FROM message_claims WHERE claimed_at < ?1",
                params![before.to_rfc3339()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("prune_claims: {e}")))?;
        Ok(removed as usize)
    }
}
