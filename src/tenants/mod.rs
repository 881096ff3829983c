//! Tenants — per-board credential, field mapping and sender policy.

pub mod model;
pub mod registry;
pub mod schema;

pub use model::{FieldKey, FieldKind, FieldMapping, TenantConfig, TenantSummary, normalize_sender};
pub use registry::TenantRegistry;
pub use schema::ensure_schema;
