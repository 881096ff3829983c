//! Schema resolution — make sure a tenant's four destination fields exist.

use secrecy::SecretString;
use tracing::{debug, info};

use super::model::{FieldKey, FieldKind, FieldMapping};
use crate::error::SchemaError;
use crate::records::{FieldId, FieldInfo, RecordStore};

/// Resolve (lookup-or-create) the destination field for every logical key.
///
/// Existing fields are matched by title, so re-running for the same tenant
/// reuses what an earlier run created.
pub async fn ensure_schema(
    store: &dyn RecordStore,
    tenant_id: &str,
    token: &SecretString,
) -> Result<FieldMapping, SchemaError> {
    let existing = store
        .find_fields(tenant_id, token)
        .await
        .map_err(|source| SchemaError::Lookup {
            tenant_id: tenant_id.to_string(),
            source,
        })?;

    let email = resolve_field(store, tenant_id, token, &existing, FieldKey::Email).await?;
    let phone = resolve_field(store, tenant_id, token, &existing, FieldKey::Phone).await?;
    let service = resolve_field(store, tenant_id, token, &existing, FieldKey::Service).await?;
    let note = resolve_field(store, tenant_id, token, &existing, FieldKey::Note).await?;

    Ok(
        FieldMapping::new(&email.id, &phone.id, &service.id, &note.id)
            .with_kind(FieldKey::Email, email.kind)
            .with_kind(FieldKey::Phone, phone.kind)
            .with_kind(FieldKey::Service, service.kind)
            .with_kind(FieldKey::Note, note.kind),
    )
}

struct ResolvedField {
    id: FieldId,
    kind: FieldKind,
}

async fn resolve_field(
    store: &dyn RecordStore,
    tenant_id: &str,
    token: &SecretString,
    existing: &[FieldInfo],
    key: FieldKey,
) -> Result<ResolvedField, SchemaError> {
    if let Some(field) = find_by_title(existing, key.title()) {
        // Unknown store types take plain text.
        let kind = field.kind.unwrap_or(FieldKind::Text);
        debug!(tenant = %tenant_id, key = %key, field = %field.id, kind = kind.as_str(), "Reusing field");
        return Ok(ResolvedField {
            id: field.id.clone(),
            kind,
        });
    }

    let id = store
        .create_field(tenant_id, token, key.title(), key.kind())
        .await
        .map_err(|source| SchemaError::Create {
            tenant_id: tenant_id.to_string(),
            title: key.title().to_string(),
            source,
        })?;
    info!(tenant = %tenant_id, key = %key, field = %id, "Created field");
    Ok(ResolvedField {
        id,
        kind: key.kind(),
    })
}

fn find_by_title<'a>(fields: &'a [FieldInfo], title: &str) -> Option<&'a FieldInfo> {
    fields
        .iter()
        .find(|f| f.title.trim().eq_ignore_ascii_case(title))
}
