use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use horizon_core::{FixedIdentity, Identity};
use horizon_shared::BookingId;

use crate::coordinator::BookingCoordinator;
use crate::models::BookingDraft;

/// Explicit degraded-mode state for a booking that could not be committed.
/// A pending record is never presented as a committed booking; it only
/// becomes one by replaying through the normal atomic commit path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    PendingSync,
    Committed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct PendingRecord {
    pub seq: u64,
    pub draft: BookingDraft,
    pub owner: Identity,
    pub state: SyncState,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub booking_id: Option<BookingId>,
}

/// Holds drafts whose commit exhausted its retry budget, for background
/// replay into the store. Replays run through the coordinator's regular
/// commit, so analytics counters only ever move on a real commit.
pub struct RecoveryQueue {
    records: Mutex<Vec<PendingRecord>>,
    next_seq: AtomicU64,
    max_replay_attempts: u32,
}

impl RecoveryQueue {
    pub fn new(max_replay_attempts: u32) -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            next_seq: AtomicU64::new(1),
            max_replay_attempts: max_replay_attempts.max(1),
        }
    }

    pub fn enqueue(&self, draft: BookingDraft, owner: Identity) -> u64 {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let record = PendingRecord {
            seq,
            draft,
            owner: owner.clone(),
            state: SyncState::PendingSync,
            attempts: 0,
            last_error: None,
            booking_id: None,
        };
        if let Ok(mut records) = self.records.lock() {
            records.push(record);
        }
        warn!(seq, user_id = %owner.user_id, "booking deferred to recovery queue");
        seq
    }

    pub fn pending_count(&self) -> usize {
        self.records
            .lock()
            .map(|records| {
                records
                    .iter()
                    .filter(|r| r.state == SyncState::PendingSync)
                    .count()
            })
            .unwrap_or(0)
    }

    pub fn snapshot(&self) -> Vec<PendingRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    /// Replay every pending record once. Returns the number of records that
    /// reached `Committed` this pass.
    pub async fn reconcile_once(&self, coordinator: &BookingCoordinator) -> usize {
        let pending: Vec<(u64, BookingDraft, Identity)> = match self.records.lock() {
            Ok(records) => records
                .iter()
                .filter(|r| r.state == SyncState::PendingSync)
                .map(|r| (r.seq, r.draft.clone(), r.owner.clone()))
                .collect(),
            Err(_) => return 0,
        };

        let mut committed = 0;
        for (seq, draft, owner) in pending {
            let scoped = coordinator.with_identity(Arc::new(FixedIdentity::caller(owner)));
            let outcome = scoped.create_booking(draft).await;
            let Ok(mut records) = self.records.lock() else {
                return committed;
            };
            let Some(record) = records.iter_mut().find(|r| r.seq == seq) else {
                continue;
            };
            record.attempts += 1;
            match outcome {
                Ok(id) => {
                    info!(seq, booking_id = %id, "deferred booking replayed");
                    record.state = SyncState::Committed;
                    record.booking_id = Some(id);
                    record.last_error = None;
                    committed += 1;
                }
                Err(e) if e.is_retryable() && record.attempts < self.max_replay_attempts => {
                    record.last_error = Some(e.to_string());
                }
                Err(e) => {
                    warn!(seq, error = %e, "deferred booking abandoned");
                    record.state = SyncState::Failed;
                    record.last_error = Some(e.to_string());
                }
            }
        }
        committed
    }
}

/// Background reconciliation loop.
pub fn spawn_reconciler(
    queue: Arc<RecoveryQueue>,
    coordinator: BookingCoordinator,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if queue.pending_count() == 0 {
                continue;
            }
            let committed = queue.reconcile_once(&coordinator).await;
            if committed > 0 {
                info!(committed, "recovery queue replayed deferred bookings");
            }
        }
    })
}
