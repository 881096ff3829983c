//! In-memory fakes of the mailbox and record store for unit tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;

use crate::error::{MailboxError, UpstreamError};
use crate::mailbox::{Mailbox, RawMessage};
use crate::records::{FieldId, FieldInfo, FieldValues, RecordId, RecordStore};
use crate::tenants::{FieldKind, FieldMapping, TenantConfig};

pub fn tenant(id: &str, allowed_sender: Option<&str>) -> TenantConfig {
    let mut config = TenantConfig::new(
        id,
        SecretString::from("tok"),
        FieldMapping::new("colE", "colP", "colS", "colN"),
    );
    config.allowed_sender = allowed_sender.map(str::to_string);
    config
}

/// RFC 5322 text message from `sender` with `body`.
pub fn email(sender: &str, body: &str) -> Vec<u8> {
    format!(
        "From: {sender}\r\nTo: intake@example.com\r\nSubject: Intake\r\n\
         Content-Type: text/plain; charset=utf-8\r\n\r\n{}\r\n",
        body.replace('\n', "\r\n")
    )
    .into_bytes()
}

#[derive(Debug, Clone)]
pub struct CreatedRecord {
    pub record_id: RecordId,
    pub tenant_id: String,
    pub name: String,
    pub values: FieldValues,
}

#[derive(Default)]
pub struct FakeStore {
    fields: Mutex<HashMap<String, Vec<FieldInfo>>>,
    records: Mutex<Vec<CreatedRecord>>,
    fail_lookups: AtomicBool,
    fail_records: AtomicBool,
    record_delay: Mutex<Option<Duration>>,
    lookup_delay: Mutex<Option<Duration>>,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_field(&self, tenant_id: &str, id: &str, title: &str, kind: FieldKind) {
        self.fields
            .lock()
            .unwrap()
            .entry(tenant_id.to_string())
            .or_default()
            .push(FieldInfo {
                id: id.to_string(),
                title: title.to_string(),
                kind: Some(kind),
            });
    }

    /// A field whose type the store reports but this crate doesn't know.
    pub fn seed_unknown_field(&self, tenant_id: &str, id: &str, title: &str) {
        self.fields
            .lock()
            .unwrap()
            .entry(tenant_id.to_string())
            .or_default()
            .push(FieldInfo {
                id: id.to_string(),
                title: title.to_string(),
                kind: None,
            });
    }

    pub fn fields(&self, tenant_id: &str) -> Vec<FieldInfo> {
        self.fields
            .lock()
            .unwrap()
            .get(tenant_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn field_count(&self, tenant_id: &str) -> usize {
        self.fields(tenant_id).len()
    }

    pub fn records(&self) -> Vec<CreatedRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn fail_lookups(&self, fail: bool) {
        self.fail_lookups.store(fail, Ordering::SeqCst);
    }

    pub fn fail_records(&self, fail: bool) {
        self.fail_records.store(fail, Ordering::SeqCst);
    }

    pub fn delay_records(&self, delay: Duration) {
        *self.record_delay.lock().unwrap() = Some(delay);
    }

    /// Make field listing suspend, so overlapping callers interleave.
    pub fn delay_lookups(&self, delay: Duration) {
        *self.lookup_delay.lock().unwrap() = Some(delay);
    }
}

#[async_trait]
impl RecordStore for FakeStore {
    async fn find_fields(
        &self,
        tenant_id: &str,
        _token: &SecretString,
    ) -> Result<Vec<FieldInfo>, UpstreamError> {
        let delay = *self.lookup_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(UpstreamError::Request("lookup failed".into()));
        }
        Ok(self.fields(tenant_id))
    }

    async fn create_field(
        &self,
        tenant_id: &str,
        _token: &SecretString,
        title: &str,
        kind: FieldKind,
    ) -> Result<FieldId, UpstreamError> {
        let id = format!("{}_{}", kind.as_str(), self.field_count(tenant_id) + 1);
        self.seed_field(tenant_id, &id, title, kind);
        Ok(id)
    }

    async fn create_record(
        &self,
        tenant_id: &str,
        _token: &SecretString,
        name: &str,
        values: &FieldValues,
    ) -> Result<RecordId, UpstreamError> {
        let delay = *self.record_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_records.load(Ordering::SeqCst) {
            return Err(UpstreamError::Api("create failed".into()));
        }
        let mut records = self.records.lock().unwrap();
        let record_id = format!("rec-{}", records.len() + 1);
        records.push(CreatedRecord {
            record_id: record_id.clone(),
            tenant_id: tenant_id.to_string(),
            name: name.to_string(),
            values: values.clone(),
        });
        Ok(record_id)
    }
}

/// Mailbox whose unseen set is whatever was delivered and not yet marked seen.
/// `redeliver` puts a seen message back, as an at-least-once server might.
#[derive(Default)]
pub struct FakeMailbox {
    messages: Mutex<Vec<(RawMessage, bool)>>,
    seen_calls: Mutex<Vec<String>>,
    fail_list: AtomicBool,
}

impl FakeMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deliver(&self, message_id: &str, raw: Vec<u8>) {
        self.messages.lock().unwrap().push((
            RawMessage {
                message_id: message_id.to_string(),
                raw,
            },
            false,
        ));
    }

    pub fn redeliver(&self, message_id: &str) {
        for (msg, seen) in self.messages.lock().unwrap().iter_mut() {
            if msg.message_id == message_id {
                *seen = false;
            }
        }
    }

    pub fn seen_calls(&self) -> Vec<String> {
        self.seen_calls.lock().unwrap().clone()
    }

    pub fn is_seen(&self, message_id: &str) -> bool {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .any(|(m, seen)| m.message_id == message_id && *seen)
    }

    pub fn fail_list(&self, fail: bool) {
        self.fail_list.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Mailbox for FakeMailbox {
    async fn list_unseen(&self) -> Result<Vec<RawMessage>, MailboxError> {
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(MailboxError::Connect("mailbox offline".into()));
        }
        Ok(self
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, seen)| !seen)
            .map(|(m, _)| m.clone())
            .collect())
    }

    async fn mark_seen(&self, message_id: &str) -> Result<(), MailboxError> {
        self.seen_calls.lock().unwrap().push(message_id.to_string());
        for (msg, seen) in self.messages.lock().unwrap().iter_mut() {
            if msg.message_id == message_id {
                *seen = true;
            }
        }
        Ok(())
    }
}
