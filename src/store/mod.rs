//! Optional persistence — libSQL-backed tenant and claim repositories.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{ClaimRepository, TenantRepository};
