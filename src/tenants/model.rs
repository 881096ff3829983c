//! Tenant data model — credentials, destination field mapping, sender policy.

use std::collections::BTreeMap;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// Logical intake field that maps onto one destination field per tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKey {
    Email,
    Phone,
    Service,
    Note,
}

impl FieldKey {
    pub const ALL: [FieldKey; 4] = [
        FieldKey::Email,
        FieldKey::Phone,
        FieldKey::Service,
        FieldKey::Note,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Phone => "phone",
            Self::Service => "service",
            Self::Note => "note",
        }
    }

    /// Title of the destination field looked up (or created) during onboarding.
    pub fn title(&self) -> &'static str {
        match self {
            Self::Email => "Email",
            Self::Phone => "Phone",
            Self::Service => "Service",
            Self::Note => "Note",
        }
    }

    /// Kind of destination field created when none exists, and the encoding
    /// used when a mapping does not record the field's actual kind.
    pub fn kind(&self) -> FieldKind {
        match self {
            Self::Email => FieldKind::Email,
            Self::Phone => FieldKind::Phone,
            Self::Service => FieldKind::Status,
            Self::Note => FieldKind::LongText,
        }
    }
}

impl std::fmt::Display for FieldKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Destination field type on the remote store. Drives value encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Email,
    Phone,
    Status,
    LongText,
    /// Plain text, and the fallback for field types with no dedicated encoding.
    Text,
}

impl FieldKind {
    /// Wire name of the kind on the remote store.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Phone => "phone",
            Self::Status => "status",
            Self::LongText => "long_text",
            Self::Text => "text",
        }
    }

    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "email" => Some(Self::Email),
            "phone" => Some(Self::Phone),
            "status" | "color" => Some(Self::Status),
            "long_text" | "long-text" => Some(Self::LongText),
            "text" => Some(Self::Text),
            _ => None,
        }
    }
}

/// Destination field identifiers for all four logical keys.
///
/// Only constructible with every key present, so a registered tenant can
/// never be missing a mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub email: String,
    pub phone: String,
    pub service: String,
    pub note: String,
    /// Kind of each destination field as resolved on the store. Keys without
    /// an entry use [`FieldKey::kind`].
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub kinds: BTreeMap<FieldKey, FieldKind>,
}

impl FieldMapping {
    pub fn new(
        email: impl Into<String>,
        phone: impl Into<String>,
        service: impl Into<String>,
        note: impl Into<String>,
    ) -> Self {
        Self {
            email: email.into(),
            phone: phone.into(),
            service: service.into(),
            note: note.into(),
            kinds: BTreeMap::new(),
        }
    }

    /// Record the actual kind of the destination field behind `key`.
    pub fn with_kind(mut self, key: FieldKey, kind: FieldKind) -> Self {
        self.kinds.insert(key, kind);
        self
    }

    /// Kind to encode `key`'s value as.
    pub fn kind(&self, key: FieldKey) -> FieldKind {
        self.kinds.get(&key).copied().unwrap_or(key.kind())
    }

    /// Destination field id for a logical key.
    pub fn get(&self, key: FieldKey) -> &str {
        match key {
            FieldKey::Email => &self.email,
            FieldKey::Phone => &self.phone,
            FieldKey::Service => &self.service,
            FieldKey::Note => &self.note,
        }
    }
}

/// Configuration for one tenant (one destination board).
#[derive(Debug, Clone)]
pub struct TenantConfig {
    pub tenant_id: String,
    pub access_token: SecretString,
    pub field_mapping: FieldMapping,
    /// Lowercased address; `None` until an administrator configures it.
    pub allowed_sender: Option<String>,
}

impl TenantConfig {
    pub fn new(
        tenant_id: impl Into<String>,
        access_token: SecretString,
        field_mapping: FieldMapping,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            access_token,
            field_mapping,
            allowed_sender: None,
        }
    }

    /// Exact comparison against the stored (lowercased) address.
    ///
    /// The incoming sender is not normalized, so `A@X.com` does not match a
    /// stored `a@x.com`.
    pub fn accepts_sender(&self, sender: &str) -> bool {
        self.allowed_sender
            .as_deref()
            .is_some_and(|allowed| allowed == sender)
    }
}

/// Public view of a tenant, without its credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantSummary {
    pub tenant_id: String,
    pub field_mapping: FieldMapping,
    pub allowed_sender: Option<String>,
}

impl From<&TenantConfig> for TenantSummary {
    fn from(config: &TenantConfig) -> Self {
        Self {
            tenant_id: config.tenant_id.clone(),
            field_mapping: config.field_mapping.clone(),
            allowed_sender: config.allowed_sender.clone(),
        }
    }
}

/// Normalize an administrator-supplied sender address.
pub fn normalize_sender(email: &str) -> String {
    email.trim().to_lowercase()
}
