//! Mailbox poller — per-tenant cycle of claim → filter → extract → create → ack.
//!
//! One background task per tenant runs [`MailboxPoller::poll_once`] on a fixed
//! interval. Cycles for the same tenant never overlap, and a failure on one
//! message never stops the rest of the cycle or the loop itself.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, timeout};
use tracing::{debug, error, info, warn};

use crate::dedup::DedupLedger;
use crate::error::{MailboxError, UpstreamError};
use crate::extract::extract;
use crate::mailbox::{Mailbox, RawMessage, parse_message};
use crate::records::{RecordCreator, RecordDraft, RecordId};
use crate::tenants::{TenantConfig, TenantRegistry};

/// Default poll interval per tenant.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 15;

/// Poll cadence and bounds on the network calls made during a cycle.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub interval: Duration,
    pub mailbox_timeout: Duration,
    pub store_timeout: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            mailbox_timeout: Duration::from_secs(30),
            store_timeout: Duration::from_secs(20),
        }
    }
}

/// What happened to one message during a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Already claimed by an earlier or concurrent cycle; untouched.
    Duplicate,
    /// Could not be parsed; acknowledged.
    Unparseable,
    /// Sender is not the tenant's allowed sender; acknowledged.
    Rejected,
    /// No record name could be derived; acknowledged.
    NotActionable,
    /// Record created, then acknowledged.
    Created(RecordId),
    /// Record creation failed; left unacknowledged for manual reconciliation.
    Failed(String),
}

/// Summary of one poll cycle.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub tenant_id: String,
    /// The cycle did not run because another one was in flight.
    pub skipped: bool,
    pub outcomes: Vec<(String, MessageOutcome)>,
}

impl CycleReport {
    fn new(tenant_id: &str) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            ..Default::default()
        }
    }

    pub fn created(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, MessageOutcome::Created(_)))
            .count()
    }

    pub fn outcome(&self, message_id: &str) -> Option<&MessageOutcome> {
        self.outcomes
            .iter()
            .find(|(id, _)| id == message_id)
            .map(|(_, o)| o)
    }
}

/// Removes the tenant from the in-flight set when the cycle ends (or unwinds).
struct CycleGuard<'a> {
    in_flight: &'a Mutex<HashSet<String>>,
    tenant_id: String,
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&self.tenant_id);
    }
}

pub struct MailboxPoller {
    registry: Arc<TenantRegistry>,
    ledger: Arc<DedupLedger>,
    mailbox: Arc<dyn Mailbox>,
    creator: Arc<RecordCreator>,
    config: PollerConfig,
    in_flight: Mutex<HashSet<String>>,
}

impl MailboxPoller {
    pub fn new(
        registry: Arc<TenantRegistry>,
        ledger: Arc<DedupLedger>,
        mailbox: Arc<dyn Mailbox>,
        creator: Arc<RecordCreator>,
        config: PollerConfig,
    ) -> Self {
        Self {
            registry,
            ledger,
            mailbox,
            creator,
            config,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    fn begin_cycle(&self, tenant_id: &str) -> Option<CycleGuard<'_>> {
        let mut in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !in_flight.insert(tenant_id.to_string()) {
            return None;
        }
        Some(CycleGuard {
            in_flight: &self.in_flight,
            tenant_id: tenant_id.to_string(),
        })
    }

    /// Run one poll cycle for a tenant.
    pub async fn poll_once(&self, tenant_id: &str) -> CycleReport {
        let mut report = CycleReport::new(tenant_id);

        let Some(_guard) = self.begin_cycle(tenant_id) else {
            debug!(tenant = %tenant_id, "Previous cycle still running, skipping");
            report.skipped = true;
            return report;
        };

        let Some(tenant) = self.registry.get(tenant_id).await else {
            warn!(tenant = %tenant_id, "Tenant not registered, nothing to poll");
            return report;
        };

        let messages = match timeout(self.config.mailbox_timeout, self.mailbox.list_unseen()).await
        {
            Ok(Ok(messages)) => messages,
            Ok(Err(e)) => {
                error!(tenant = %tenant_id, error = %e, "Mailbox poll failed");
                return report;
            }
            Err(_) => {
                let e = MailboxError::Timeout(self.config.mailbox_timeout);
                error!(tenant = %tenant_id, error = %e, "Mailbox poll failed");
                return report;
            }
        };

        if !messages.is_empty() {
            debug!(tenant = %tenant_id, count = messages.len(), "Fetched unseen messages");
        }

        for message in &messages {
            let outcome = self.process_message(&tenant, message).await;
            report.outcomes.push((message.message_id.clone(), outcome));
        }

        if report.created() > 0 {
            info!(tenant = %tenant_id, created = report.created(), "Poll cycle complete");
        }
        report
    }

    async fn process_message(&self, tenant: &TenantConfig, message: &RawMessage) -> MessageOutcome {
        let tenant_id = tenant.tenant_id.as_str();
        let message_id = message.message_id.as_str();

        if !self.ledger.try_claim(message_id).await {
            debug!(tenant = %tenant_id, message_id = %message_id, "Already claimed, skipping");
            return MessageOutcome::Duplicate;
        }

        let parsed = match parse_message(&message.raw) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(tenant = %tenant_id, message_id = %message_id, error = %e, "Unparseable message");
                self.acknowledge(tenant_id, message_id).await;
                return MessageOutcome::Unparseable;
            }
        };

        let sender = parsed.sender.as_deref().unwrap_or_default();
        if !tenant.accepts_sender(sender) {
            if tenant.allowed_sender.is_none() {
                info!(tenant = %tenant_id, message_id = %message_id, "No allowed sender configured, rejecting");
            } else {
                info!(tenant = %tenant_id, message_id = %message_id, sender = %sender, "Sender not allowed");
            }
            self.acknowledge(tenant_id, message_id).await;
            return MessageOutcome::Rejected;
        }

        let Some(draft) = RecordDraft::from_fields(extract(&parsed.body)) else {
            info!(tenant = %tenant_id, message_id = %message_id, "No record name in message, skipping");
            self.acknowledge(tenant_id, message_id).await;
            return MessageOutcome::NotActionable;
        };

        let created = match timeout(self.config.store_timeout, self.creator.create(tenant, &draft)).await
        {
            Ok(result) => result,
            Err(_) => Err(UpstreamError::Timeout(self.config.store_timeout)),
        };

        match created {
            Ok(record_id) => {
                self.acknowledge(tenant_id, message_id).await;
                MessageOutcome::Created(record_id)
            }
            Err(e) => {
                // Claimed but not created: needs manual reconciliation.
                error!(
                    tenant = %tenant_id,
                    message_id = %message_id,
                    name = %draft.name,
                    error = %e,
                    "Record creation failed"
                );
                MessageOutcome::Failed(e.to_string())
            }
        }
    }

    async fn acknowledge(&self, tenant_id: &str, message_id: &str) {
        match timeout(self.config.mailbox_timeout, self.mailbox.mark_seen(message_id)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(tenant = %tenant_id, message_id = %message_id, error = %e, "Failed to mark message seen");
            }
            Err(_) => {
                warn!(tenant = %tenant_id, message_id = %message_id, "Timed out marking message seen");
            }
        }
    }
}

/// Handle to a running per-tenant poll loop.
pub struct PollerHandle {
    pub handle: JoinHandle<()>,
    shutdown: Arc<AtomicBool>,
}

impl PollerHandle {
    /// Ask the loop to exit at its next tick.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Spawn the poll loop for one tenant. The first cycle runs immediately.
pub fn spawn_tenant_poller(poller: Arc<MailboxPoller>, tenant_id: String) -> PollerHandle {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        let interval = poller.config().interval;
        info!(tenant = %tenant_id, "Mailbox poller started, polling every {}s", interval.as_secs());

        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tick.tick().await;

            if shutdown.load(Ordering::Relaxed) {
                info!(tenant = %tenant_id, "Mailbox poller shutting down");
                return;
            }

            // A panic inside a cycle must not end the loop.
            let cycle_poller = Arc::clone(&poller);
            let cycle_tenant = tenant_id.clone();
            if let Err(e) =
                tokio::spawn(async move { cycle_poller.poll_once(&cycle_tenant).await }).await
            {
                error!(tenant = %tenant_id, error = %e, "Poll cycle panicked");
            }
        }
    });

    PollerHandle {
        handle,
        shutdown: shutdown_flag,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::FieldValue;
    use crate::test_support::{FakeMailbox, FakeStore, email};
    use secrecy::SecretString;

    use crate::tenants::FieldMapping;

    struct Harness {
        mailbox: Arc<FakeMailbox>,
        store: Arc<FakeStore>,
        ledger: Arc<DedupLedger>,
        poller: Arc<MailboxPoller>,
    }

    async fn harness(allowed_sender: Option<&str>) -> Harness {
        let registry = Arc::new(TenantRegistry::new());
        registry
            .register(
                "board-1",
                SecretString::from("tok"),
                FieldMapping::new("colE", "colP", "colS", "colN"),
            )
            .await
            .unwrap();
        if let Some(sender) = allowed_sender {
            registry.set_allowed_sender("board-1", sender).await.unwrap();
        }

        let mailbox = Arc::new(FakeMailbox::new());
        let store = Arc::new(FakeStore::new());
        let ledger = Arc::new(DedupLedger::new());
        let creator = Arc::new(RecordCreator::new(store.clone()));
        let poller = Arc::new(MailboxPoller::new(
            registry,
            Arc::clone(&ledger),
            mailbox.clone(),
            creator,
            PollerConfig {
                interval: Duration::from_millis(20),
                mailbox_timeout: Duration::from_secs(1),
                store_timeout: Duration::from_millis(200),
            },
        ));
        Harness {
            mailbox,
            store,
            ledger,
            poller,
        }
    }

    const BODY: &str =
        "Jane Doe\nPhone Number: 555-1234\nEmail Address: jane@x.com\nService: Checkup";

    #[tokio::test]
    async fn allowed_sender_creates_record_and_acks() {
        let h = harness(Some("doc@clinic.com")).await;
        h.mailbox.deliver("1:1", email("doc@clinic.com", BODY));

        let report = h.poller.poll_once("board-1").await;

        assert!(matches!(report.outcome("1:1"), Some(MessageOutcome::Created(_))));
        let records = h.store.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "Jane Doe");
        assert_eq!(records[0].values["colS"], FieldValue::Status { label: "Checkup".into() });
        assert!(!records[0].values.contains_key("colN"));
        assert!(h.mailbox.is_seen("1:1"));
    }

    #[tokio::test]
    async fn other_sender_is_rejected_and_acked() {
        let h = harness(Some("doc@clinic.com")).await;
        h.mailbox.deliver("1:2", email("other@evil.com", BODY));

        let report = h.poller.poll_once("board-1").await;

        assert_eq!(report.outcome("1:2"), Some(&MessageOutcome::Rejected));
        assert!(h.store.records().is_empty());
        assert!(h.mailbox.is_seen("1:2"));
    }

    #[tokio::test]
    async fn uppercase_sender_does_not_match_lowercased_policy() {
        let h = harness(Some("a@x.com")).await;
        h.mailbox.deliver("1:3", email("A@X.com", BODY));

        let report = h.poller.poll_once("board-1").await;

        assert_eq!(report.outcome("1:3"), Some(&MessageOutcome::Rejected));
        assert!(h.store.records().is_empty());
    }

    #[tokio::test]
    async fn no_configured_sender_rejects() {
        let h = harness(None).await;
        h.mailbox.deliver("1:4", email("doc@clinic.com", BODY));

        let report = h.poller.poll_once("board-1").await;

        assert_eq!(report.outcome("1:4"), Some(&MessageOutcome::Rejected));
        assert!(h.mailbox.is_seen("1:4"));
    }

    #[tokio::test]
    async fn blank_body_is_skipped_and_acked() {
        let h = harness(Some("doc@clinic.com")).await;
        h.mailbox.deliver("1:5", email("doc@clinic.com", "\n   \n"));

        let report = h.poller.poll_once("board-1").await;

        assert_eq!(report.outcome("1:5"), Some(&MessageOutcome::NotActionable));
        assert!(h.store.records().is_empty());
        assert!(h.mailbox.is_seen("1:5"));
    }

    #[tokio::test]
    async fn redelivered_message_creates_once() {
        let h = harness(Some("doc@clinic.com")).await;
        h.mailbox.deliver("1:6", email("doc@clinic.com", BODY));

        h.poller.poll_once("board-1").await;
        h.mailbox.redeliver("1:6");
        let second = h.poller.poll_once("board-1").await;

        assert_eq!(second.outcome("1:6"), Some(&MessageOutcome::Duplicate));
        assert_eq!(h.store.records().len(), 1);
        assert_eq!(h.mailbox.seen_calls(), vec!["1:6".to_string()]);
    }

    #[tokio::test]
    async fn creation_failure_leaves_message_unacked_but_claimed() {
        let h = harness(Some("doc@clinic.com")).await;
        h.store.fail_records(true);
        h.mailbox.deliver("1:7", email("doc@clinic.com", BODY));

        let report = h.poller.poll_once("board-1").await;
        assert!(matches!(report.outcome("1:7"), Some(MessageOutcome::Failed(_))));
        assert!(!h.mailbox.is_seen("1:7"));
        assert!(h.ledger.contains("1:7"));

        h.store.fail_records(false);
        let retry = h.poller.poll_once("board-1").await;
        assert_eq!(retry.outcome("1:7"), Some(&MessageOutcome::Duplicate));
        assert!(h.store.records().is_empty());
    }

    #[tokio::test]
    async fn slow_store_times_out_without_stopping_cycle() {
        let h = harness(Some("doc@clinic.com")).await;
        h.store.delay_records(Duration::from_secs(5));
        h.mailbox.deliver("1:8", email("doc@clinic.com", BODY));
        h.mailbox.deliver("1:9", email("other@evil.com", BODY));

        let report = h.poller.poll_once("board-1").await;

        assert!(matches!(report.outcome("1:8"), Some(MessageOutcome::Failed(_))));
        assert_eq!(report.outcome("1:9"), Some(&MessageOutcome::Rejected));
    }

    #[tokio::test]
    async fn one_bad_message_does_not_abort_the_rest() {
        let h = harness(Some("doc@clinic.com")).await;
        h.mailbox.deliver("1:10", b"\xff\xfe not a message".to_vec());
        h.mailbox.deliver("1:11", email("doc@clinic.com", BODY));

        let report = h.poller.poll_once("board-1").await;

        assert_eq!(report.outcomes.len(), 2);
        assert!(matches!(report.outcome("1:11"), Some(MessageOutcome::Created(_))));
    }

    #[tokio::test]
    async fn mailbox_failure_ends_cycle_quietly() {
        let h = harness(Some("doc@clinic.com")).await;
        h.mailbox.fail_list(true);

        let report = h.poller.poll_once("board-1").await;

        assert!(report.outcomes.is_empty());
        assert!(!report.skipped);
    }

    #[tokio::test]
    async fn unknown_tenant_does_nothing() {
        let h = harness(Some("doc@clinic.com")).await;
        h.mailbox.deliver("1:12", email("doc@clinic.com", BODY));

        let report = h.poller.poll_once("board-404").await;

        assert!(report.outcomes.is_empty());
        assert!(!h.ledger.contains("1:12"));
    }

    #[tokio::test]
    async fn overlapping_cycle_is_skipped() {
        let h = harness(Some("doc@clinic.com")).await;
        h.store.delay_records(Duration::from_millis(100));
        h.mailbox.deliver("1:13", email("doc@clinic.com", BODY));

        let first = {
            let poller = Arc::clone(&h.poller);
            tokio::spawn(async move { poller.poll_once("board-1").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let second = h.poller.poll_once("board-1").await;
        let first = first.await.unwrap();

        assert!(second.skipped);
        assert!(!first.skipped);
        assert_eq!(h.store.records().len(), 1);
    }

    #[tokio::test]
    async fn spawned_loop_polls_and_stops() {
        let h = harness(Some("doc@clinic.com")).await;
        h.mailbox.deliver("1:14", email("doc@clinic.com", BODY));

        let handle = spawn_tenant_poller(Arc::clone(&h.poller), "board-1".into());
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.stop();
        tokio::time::timeout(Duration::from_secs(1), handle.handle)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(h.store.records().len(), 1);
        assert!(h.mailbox.is_seen("1:14"));
    }

    #[test]
    fn config_defaults() {
        let config = PollerConfig::default();
        assert_eq!(config.interval, Duration::from_secs(15));
    }
}
