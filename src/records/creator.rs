//! Record creator — maps a draft through the tenant's field mapping and
//! issues the create call.

use std::sync::Arc;

use tracing::{debug, info};

use super::{FieldValue, FieldValues, RecordDraft, RecordId, RecordStore};
use crate::error::UpstreamError;
use crate::tenants::{FieldKey, FieldKind, FieldMapping, TenantConfig};

/// Region assumed for phone numbers when none is configured.
pub const DEFAULT_REGION_CODE: &str = "US";

pub struct RecordCreator {
    store: Arc<dyn RecordStore>,
    region_code: String,
}

impl RecordCreator {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self::with_region(store, DEFAULT_REGION_CODE)
    }

    pub fn with_region(store: Arc<dyn RecordStore>, region_code: impl Into<String>) -> Self {
        Self {
            store,
            region_code: region_code.into(),
        }
    }

    /// Create one record for `draft` on the tenant's store. Not retried.
    pub async fn create(
        &self,
        tenant: &TenantConfig,
        draft: &RecordDraft,
    ) -> Result<RecordId, UpstreamError> {
        let values = self.encode(&tenant.field_mapping, draft);
        debug!(
            tenant = %tenant.tenant_id,
            fields = values.len(),
            "Creating record"
        );

        let record_id = self
            .store
            .create_record(&tenant.tenant_id, &tenant.access_token, &draft.name, &values)
            .await?;

        info!(tenant = %tenant.tenant_id, record_id = %record_id, "Record created");
        Ok(record_id)
    }

    /// Encode the draft's present fields. Absent fields are omitted, never
    /// sent as null.
    pub fn encode(&self, mapping: &FieldMapping, draft: &RecordDraft) -> FieldValues {
        let present = [
            (FieldKey::Email, draft.email.as_deref()),
            (FieldKey::Phone, draft.phone.as_deref()),
            (FieldKey::Service, draft.service.as_deref()),
            (FieldKey::Note, draft.note.as_deref()),
        ];

        present
            .into_iter()
            .filter_map(|(key, value)| {
                let value = value?;
                Some((
                    mapping.get(key).to_string(),
                    self.encode_value(mapping.kind(key), value),
                ))
            })
            .collect()
    }

    fn encode_value(&self, kind: FieldKind, raw: &str) -> FieldValue {
        match kind {
            FieldKind::Email => FieldValue::Email {
                email: raw.to_string(),
                text: raw.to_string(),
            },
            FieldKind::Phone => FieldValue::Phone {
                phone: raw.to_string(),
                country_short_name: self.region_code.clone(),
            },
            FieldKind::Status => FieldValue::Status {
                label: raw.to_string(),
            },
            FieldKind::LongText => FieldValue::LongText(raw.to_string()),
            FieldKind::Text => FieldValue::Text(raw.to_string()),
        }
    }
}
