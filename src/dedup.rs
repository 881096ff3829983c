//! Dedup ledger — remembers which mailbox messages have been claimed.
//!
//! A claim is taken before any record is created for a message, so a message
//! that shows up as unseen again (or in an overlapping cycle) is skipped.
//! Entries expire after a retention window and the ledger is capacity
//! bounded; an optional [`ClaimRepository`] makes claims survive restarts.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::error::DatabaseError;
use crate::store::ClaimRepository;

/// Default retention: roughly how long a message stays visible in the inbox.
pub const DEFAULT_RETENTION_SECS: i64 = 30 * 24 * 60 * 60;

/// Default maximum number of remembered claims.
pub const DEFAULT_CAPACITY: usize = 100_000;

#[derive(Default)]
struct LedgerState {
    claimed: HashMap<String, DateTime<Utc>>,
    /// Claim order, oldest first. May hold stale ids for evicted entries.
    order: VecDeque<(DateTime<Utc>, String)>,
}

impl LedgerState {
    fn evict_expired(&mut self, cutoff: DateTime<Utc>) {
        while let Some((at, _)) = self.order.front() {
            if *at >= cutoff {
                break;
            }
            if let Some((at, id)) = self.order.pop_front()
                && self.claimed.get(&id) == Some(&at)
            {
                self.claimed.remove(&id);
            }
        }
    }

    fn evict_oldest(&mut self) {
        while let Some((at, id)) = self.order.pop_front() {
            if self.claimed.get(&id) == Some(&at) {
                self.claimed.remove(&id);
                debug!(message_id = %id, "Evicted oldest claim (ledger full)");
                return;
            }
        }
    }
}

/// Bounded, time-windowed set of claimed message identifiers.
pub struct DedupLedger {
    state: Mutex<LedgerState>,
    retention: Duration,
    capacity: usize,
    repository: Option<Arc<dyn ClaimRepository>>,
}

impl DedupLedger {
    /// In-memory ledger with the default retention and capacity.
    pub fn new() -> Self {
        Self::with_limits(Duration::seconds(DEFAULT_RETENTION_SECS), DEFAULT_CAPACITY)
    }

    /// `retention` and `capacity` are validated by configuration loading; a
    /// capacity of 0 still keeps the most recent claim.
    pub fn with_limits(retention: Duration, capacity: usize) -> Self {
        Self {
            state: Mutex::new(LedgerState::default()),
            retention,
            capacity: capacity.max(1),
            repository: None,
        }
    }

    /// Write every claim through to `repository`.
    pub fn with_repository(mut self, repository: Arc<dyn ClaimRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    /// Restore claims from the repository that are still inside the window.
    /// Returns the number of claims loaded.
    pub async fn load(&self) -> Result<usize, DatabaseError> {
        let Some(repo) = &self.repository else {
            return Ok(0);
        };
        let cutoff = self.cutoff(Utc::now());
        let pruned = repo.prune_claims(cutoff).await?;
        let claims = repo.load_claims(cutoff).await?;
        let count = claims.len();

        let mut state = self.lock();
        for (id, at) in claims {
            if state.claimed.len() >= self.capacity {
                state.evict_oldest();
            }
            state.claimed.insert(id.clone(), at);
            state.order.push_back((at, id));
        }
        debug!(loaded = count, pruned, "Dedup ledger restored");
        Ok(count)
    }

    /// Claim `message_id`. Returns `true` exactly once per id within the
    /// retention window; repeat calls return `false` without side effects.
    pub async fn try_claim(&self, message_id: &str) -> bool {
        let now = Utc::now();
        if !self.claim_at(message_id, now) {
            return false;
        }

        if let Some(repo) = &self.repository
            && let Err(e) = repo.insert_claim(message_id, now).await
        {
            // The in-memory claim still guards this process.
            warn!(message_id = %message_id, error = %e, "Failed to persist claim");
        }
        true
    }

    /// Atomic check-and-set against an explicit clock.
    pub(crate) fn claim_at(&self, message_id: &str, now: DateTime<Utc>) -> bool {
        let mut state = self.lock();
        state.evict_expired(self.cutoff(now));

        if state.claimed.contains_key(message_id) {
            return false;
        }
        if state.claimed.len() >= self.capacity {
            state.evict_oldest();
        }
        state.claimed.insert(message_id.to_string(), now);
        state.order.push_back((now, message_id.to_string()));
        true
    }

    pub fn contains(&self, message_id: &str) -> bool {
        self.lock().claimed.contains_key(message_id)
    }

    pub fn len(&self) -> usize {
        self.lock().claimed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Claims older than this are expired. Saturates instead of overflowing.
    fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_signed(self.retention)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LedgerState> {
        // A poisoned ledger still holds valid claims.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for DedupLedger {
    fn default() -> Self {
        Self::new()
    }
}
