//! Error types for mail-intake.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Mailbox error: {0}")]
    Mailbox(#[from] MailboxError),

    #[error("Upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("Schema resolution error: {0}")]
    Schema(#[from] SchemaError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Persistence errors (libSQL backend).
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Tenant registry errors, surfaced to the administrative caller.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Tenant {tenant_id} not found")]
    NotFound { tenant_id: String },

    #[error("Tenant {tenant_id} has no allowed sender configured")]
    NoAllowedSender { tenant_id: String },

    #[error("Invalid sender address: {0:?}")]
    InvalidSender(String),

    #[error("Failed to persist tenant {tenant_id}: {source}")]
    Persist {
        tenant_id: String,
        #[source]
        source: DatabaseError,
    },
}

/// Mailbox transport errors.
#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    #[error("Mailbox connection failed: {0}")]
    Connect(String),

    #[error("IMAP command {command} failed: {reason}")]
    Command { command: String, reason: String },

    #[error("Mailbox call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Mailbox I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Message could not be parsed")]
    Unparseable,
}

/// Failures talking to the remote record store.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("Record store request failed: {0}")]
    Request(String),

    #[error("Record store returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Record store rejected the call: {0}")]
    Api(String),

    #[error("Unexpected record store response: {0}")]
    InvalidResponse(String),

    #[error("Record store call timed out after {0:?}")]
    Timeout(Duration),
}

/// Onboarding failures while resolving a tenant's destination fields.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("Failed to list fields for tenant {tenant_id}: {source}")]
    Lookup {
        tenant_id: String,
        #[source]
        source: UpstreamError,
    },

    #[error("Failed to create field {title:?} for tenant {tenant_id}: {source}")]
    Create {
        tenant_id: String,
        title: String,
        #[source]
        source: UpstreamError,
    },
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
