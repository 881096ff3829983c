//! Remote record store — schema discovery and record creation.
//!
//! The store is an RPC boundary behind [`RecordStore`]; [`RecordCreator`]
//! encodes extracted fields into typed values for it.

pub mod creator;
pub mod graphql;

use std::collections::BTreeMap;

use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::error::UpstreamError;
use crate::extract::ExtractedFields;
use crate::tenants::FieldKind;

pub use creator::RecordCreator;
pub use graphql::GraphQlRecordStore;

/// Identifier of a record created on the remote store.
pub type RecordId = String;

/// Identifier of a destination field on the remote store.
pub type FieldId = String;

/// A destination field as reported by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldInfo {
    pub id: FieldId,
    pub title: String,
    /// `None` when the store reports a kind this crate doesn't write to.
    pub kind: Option<FieldKind>,
}

/// A typed value for one destination field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Email {
        email: String,
        text: String,
    },
    Phone {
        phone: String,
        #[serde(rename = "countryShortName")]
        country_short_name: String,
    },
    Status {
        label: String,
    },
    LongText(String),
    Text(String),
}

/// Destination field id → value. Serializes to the store's column-values object.
pub type FieldValues = BTreeMap<FieldId, FieldValue>;

/// A record ready to be created: the required display name plus whatever
/// optional fields were extracted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordDraft {
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub service: Option<String>,
    pub note: Option<String>,
}

impl RecordDraft {
    /// `None` when the fields carry no name (the message is not actionable).
    pub fn from_fields(fields: ExtractedFields) -> Option<Self> {
        Some(Self {
            name: fields.name?,
            phone: fields.phone,
            email: fields.email,
            service: fields.service,
            note: fields.note,
        })
    }
}

/// Schema discovery and mutation calls on the remote store, authenticated
/// with the tenant's credential.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// List the tenant's existing destination fields.
    async fn find_fields(
        &self,
        tenant_id: &str,
        token: &SecretString,
    ) -> Result<Vec<FieldInfo>, UpstreamError>;

    /// Create a destination field and return its identifier.
    async fn create_field(
        &self,
        tenant_id: &str,
        token: &SecretString,
        title: &str,
        kind: FieldKind,
    ) -> Result<FieldId, UpstreamError>;

    /// Create a record with a display name and typed field values.
    async fn create_record(
        &self,
        tenant_id: &str,
        token: &SecretString,
        name: &str,
        values: &FieldValues,
    ) -> Result<RecordId, UpstreamError>;
}
