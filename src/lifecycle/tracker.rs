//! Transaction lifecycle state machine
//!
//! Tracks every dispatched transaction from creation to a terminal state.
//! Landings are derived from program account bitmaps: each program account
//! covers one partition of the tracking id space, and a set bit means the
//! transaction with that partition-local id executed.
//!
//! Commitment is two-tiered. A processed sighting is weak and can be
//! retracted by a fork; a confirmed sighting is strong and terminal. All
//! transitions are idempotent, so replayed notifications are harmless.

use crate::lifecycle::timers::ScheduledTask;
use crate::metrics::metrics;
use crate::types::{Commitment, Slot, TrackingId};
use solana_sdk::signature::Signature;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Confirmation samples kept for the rolling average
const RECENT_CONFIRMATION_WINDOW: usize = 75;

/// Timers owned by an in-flight transaction
pub struct PendingHandles {
    pub timeout: Arc<ScheduledTask>,
    pub retry: Option<Arc<ScheduledTask>>,
}

impl PendingHandles {
    fn cancel_all(&self) {
        self.timeout.cancel();
        if let Some(retry) = &self.retry {
            retry.cancel();
        }
    }

    fn cancel_retry(&mut self) {
        if let Some(retry) = self.retry.take() {
            retry.cancel();
        }
    }
}

/// Seconds from dispatch to each commitment sighting
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CommitmentTiming {
    pub processed: Option<Duration>,
    pub confirmed: Option<Duration>,
}

pub enum TransactionRecord {
    Pending {
        signature: Signature,
        sent_at: Instant,
        /// Slot of a raw signature sighting, when status polling saw the
        /// transaction before any commitment notification did
        received_slot: Option<Slot>,
        handles: PendingHandles,
    },
    Landed {
        signature: Signature,
        sent_at: Instant,
        slot: Option<Slot>,
        timing: CommitmentTiming,
        /// Kept while the landing is still retractable; dropped once strong
        handles: Option<PendingHandles>,
    },
    TimedOut {
        signature: Signature,
    },
}

impl TransactionRecord {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending { .. })
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(
            self,
            Self::Landed {
                timing: CommitmentTiming {
                    confirmed: Some(_),
                    ..
                },
                ..
            }
        )
    }
}

pub enum Action {
    /// A transaction was signed and dispatched
    New {
        tracking_id: TrackingId,
        signature: Signature,
        sent_at: Instant,
        handles: PendingHandles,
    },
    /// A raw signature sighting at a slot, before any commitment is
    /// claimed. Only refines the landing slot estimate.
    Received { tracking_id: TrackingId, slot: Slot },
    /// A program account notification: the full bitmap of executed ids for
    /// one partition, at one commitment level
    AccountUpdate {
        active_ids: HashSet<usize>,
        partition: usize,
        partition_count: usize,
        commitment: Commitment,
        estimated_slot: Slot,
        received_at: Instant,
    },
    /// An independently polled landing slot for an already-landed record
    Landed { tracking_id: TrackingId, slot: Slot },
    /// The per-transaction deadline elapsed
    Timeout { tracking_id: TrackingId },
    /// A new root slot was observed
    Root { slot: Slot },
    /// Drop all tracked state
    Reset,
}

/// Partition-local id for a tracking id, if it belongs to `partition`
pub fn partition_local_id(
    tracking_id: TrackingId,
    partition: usize,
    partition_count: usize,
) -> Option<usize> {
    if partition_count == 0 || tracking_id % partition_count != partition {
        return None;
    }
    Some(tracking_id / partition_count)
}

#[derive(Default)]
pub struct TransactionTracker {
    records: HashMap<TrackingId, TransactionRecord>,
    latest_root: Slot,
    recent_confirmations: VecDeque<Duration>,
    confirmed_count: usize,
    timed_out_count: usize,
    /// Stop the retransmission loop at the first weak sighting instead of
    /// waiting for strong commitment
    retry_until_processed: bool,
}

impl TransactionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retry_until_processed(mut self, value: bool) -> Self {
        self.retry_until_processed = value;
        self
    }

    pub fn apply(&mut self, action: Action) {
        match action {
            Action::New {
                tracking_id,
                signature,
                sent_at,
                handles,
            } => self.on_new(tracking_id, signature, sent_at, handles),
            Action::Received { tracking_id, slot } => self.on_received(tracking_id, slot),
            Action::AccountUpdate {
                active_ids,
                partition,
                partition_count,
                commitment,
                estimated_slot,
                received_at,
            } => self.on_account_update(
                &active_ids,
                partition,
                partition_count,
                commitment,
                estimated_slot,
                received_at,
            ),
            Action::Landed { tracking_id, slot } => self.on_landed_slot(tracking_id, slot),
            Action::Timeout { tracking_id } => self.on_timeout(tracking_id),
            Action::Root { slot } => self.on_root(slot),
            Action::Reset => self.reset(),
        }
    }

    fn on_new(
        &mut self,
        tracking_id: TrackingId,
        signature: Signature,
        sent_at: Instant,
        handles: PendingHandles,
    ) {
        if self.records.contains_key(&tracking_id) {
            warn!(tracking_id = tracking_id, "Duplicate tracking id, ignoring");
            handles.cancel_all();
            return;
        }
        metrics().tx_created.inc();
        self.records.insert(
            tracking_id,
            TransactionRecord::Pending {
                signature,
                sent_at,
                received_slot: None,
                handles,
            },
        );
    }

    fn on_received(&mut self, tracking_id: TrackingId, slot: Slot) {
        if let Some(TransactionRecord::Pending { received_slot, .. }) =
            self.records.get_mut(&tracking_id)
        {
            received_slot.get_or_insert(slot);
        }
    }

    fn on_landed_slot(&mut self, tracking_id: TrackingId, landed_slot: Slot) {
        if let Some(TransactionRecord::Landed { slot, .. }) =
            self.records.get_mut(&tracking_id)
        {
            *slot = Some(landed_slot);
        }
    }

    fn on_root(&mut self, root: Slot) {
        self.latest_root = self.latest_root.max(root);
        // A landing at or below the root can never be forked away; drop the
        // timer bookkeeping
        for record in self.records.values_mut() {
            if let TransactionRecord::Landed {
                slot: Some(slot),
                handles: handles @ Some(_),
                ..
            } = record
            {
                if *slot <= root {
                    if let Some(handles) = handles.take() {
                        handles.cancel_all();
                    }
                }
            }
        }
    }

    fn on_account_update(
        &mut self,
        active_ids: &HashSet<usize>,
        partition: usize,
        partition_count: usize,
        commitment: Commitment,
        estimated_slot: Slot,
        received_at: Instant,
    ) {
        let mut confirmations = Vec::new();
        let mut reverted = 0usize;

        for (tracking_id, record) in self.records.iter_mut() {
            let Some(id) = partition_local_id(*tracking_id, partition, partition_count) else {
                continue;
            };

            if active_ids.contains(&id) {
                if let Some(elapsed) = Self::land(
                    record,
                    commitment,
                    estimated_slot,
                    received_at,
                    self.retry_until_processed,
                ) {
                    confirmations.push(elapsed);
                }
            } else if commitment == Commitment::Processed {
                // The weak bitmap no longer shows a landing we saw earlier:
                // a fork dropped the transaction
                if Self::retract(record) {
                    reverted += 1;
                }
            }
        }

        for elapsed in confirmations {
            self.record_confirmation(elapsed);
        }
        if reverted > 0 {
            metrics().tx_reverted.inc_by(reverted as u64);
            debug!(count = reverted, "Transactions reverted by fork");
        }
    }

    /// Mark one record landed at `commitment`. First sighting per level
    /// wins; repeats are no-ops. Returns the elapsed time on the first
    /// strong sighting.
    fn land(
        record: &mut TransactionRecord,
        commitment: Commitment,
        estimated_slot: Slot,
        received_at: Instant,
        stop_retries_on_weak: bool,
    ) -> Option<Duration> {
        // Take ownership so the timer handles can move between states
        let signature = match record {
            TransactionRecord::Pending { signature, .. }
            | TransactionRecord::Landed { signature, .. }
            | TransactionRecord::TimedOut { signature } => *signature,
        };
        let current = std::mem::replace(record, TransactionRecord::TimedOut { signature });

        let (next, confirmed_in) = match current {
            TransactionRecord::Pending {
                signature,
                sent_at,
                received_slot,
                mut handles,
            } => {
                let elapsed = received_at.saturating_duration_since(sent_at);
                let mut timing = CommitmentTiming::default();
                let (handles, confirmed_in) = match commitment {
                    Commitment::Processed => {
                        timing.processed = Some(elapsed);
                        if stop_retries_on_weak {
                            handles.cancel_retry();
                        }
                        (Some(handles), None)
                    }
                    Commitment::Confirmed => {
                        timing.confirmed = Some(elapsed);
                        handles.cancel_all();
                        (None, Some(elapsed))
                    }
                };
                (
                    TransactionRecord::Landed {
                        signature,
                        sent_at,
                        slot: Some(received_slot.unwrap_or(estimated_slot)),
                        timing,
                        handles,
                    },
                    confirmed_in,
                )
            }
            TransactionRecord::Landed {
                signature,
                sent_at,
                slot,
                mut timing,
                mut handles,
            } => {
                let mut confirmed_in = None;
                match commitment {
                    Commitment::Processed => {
                        if timing.processed.is_none() {
                            timing.processed =
                                Some(received_at.saturating_duration_since(sent_at));
                        }
                    }
                    Commitment::Confirmed => {
                        if timing.confirmed.is_none() {
                            let elapsed = received_at.saturating_duration_since(sent_at);
                            timing.confirmed = Some(elapsed);
                            if let Some(handles) = handles.take() {
                                handles.cancel_all();
                            }
                            confirmed_in = Some(elapsed);
                        }
                    }
                }
                (
                    TransactionRecord::Landed {
                        signature,
                        sent_at,
                        slot,
                        timing,
                        handles,
                    },
                    confirmed_in,
                )
            }
            // Late sighting after the deadline already fired
            timed_out @ TransactionRecord::TimedOut { .. } => (timed_out, None),
        };

        *record = next;
        confirmed_in
    }

    /// Retract a weak-only landing. Returns true if the record went back to
    /// pending.
    fn retract(record: &mut TransactionRecord) -> bool {
        let TransactionRecord::Landed {
            signature,
            sent_at,
            timing,
            handles,
            ..
        } = record
        else {
            return false;
        };

        if timing.confirmed.is_some() {
            // Strong commitment survives forks; only the weak sighting is
            // stale
            timing.processed = None;
            return false;
        }

        let Some(handles) = handles.take() else {
            return false;
        };
        *record = TransactionRecord::Pending {
            signature: *signature,
            sent_at: *sent_at,
            received_slot: None,
            handles,
        };
        true
    }

    fn on_timeout(&mut self, tracking_id: TrackingId) {
        let Some(record) = self.records.get_mut(&tracking_id) else {
            return;
        };
        let TransactionRecord::Pending {
            signature, handles, ..
        } = record
        else {
            return;
        };
        handles.cancel_all();
        *record = TransactionRecord::TimedOut {
            signature: *signature,
        };
        self.timed_out_count += 1;
        metrics().tx_timed_out.inc();
    }

    fn record_confirmation(&mut self, elapsed: Duration) {
        self.confirmed_count += 1;
        metrics().tx_confirmed.inc();
        metrics().confirmation_time.observe(elapsed.as_secs_f64());
        self.recent_confirmations.push_back(elapsed);
        while self.recent_confirmations.len() > RECENT_CONFIRMATION_WINDOW {
            self.recent_confirmations.pop_front();
        }
    }

    fn reset(&mut self) {
        for record in self.records.values() {
            match record {
                TransactionRecord::Pending { handles, .. } => handles.cancel_all(),
                TransactionRecord::Landed {
                    handles: Some(handles),
                    ..
                } => handles.cancel_all(),
                _ => {}
            }
        }
        self.records.clear();
        self.recent_confirmations.clear();
    }

    pub fn record(&self, tracking_id: TrackingId) -> Option<&TransactionRecord> {
        self.records.get(&tracking_id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn latest_root(&self) -> Slot {
        self.latest_root
    }

    pub fn confirmed_count(&self) -> usize {
        self.confirmed_count
    }

    pub fn timed_out_count(&self) -> usize {
        self.timed_out_count
    }

    /// Mean time to strong commitment over the recent window
    pub fn average_confirmation_time(&self) -> Option<Duration> {
        if self.recent_confirmations.is_empty() {
            return None;
        }
        let total: Duration = self.recent_confirmations.iter().sum();
        Some(total / self.recent_confirmations.len() as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn handles() -> PendingHandles {
        PendingHandles {
            timeout: Arc::new(ScheduledTask::noop()),
            retry: Some(Arc::new(ScheduledTask::noop())),
        }
    }

    fn new_action(tracking_id: TrackingId, sent_at: Instant) -> Action {
        Action::New {
            tracking_id,
            signature: Signature::default(),
            sent_at,
            handles: handles(),
        }
    }

    fn update(
        ids: &[usize],
        partition: usize,
        partition_count: usize,
        commitment: Commitment,
        received_at: Instant,
    ) -> Action {
        Action::AccountUpdate {
            active_ids: ids.iter().copied().collect(),
            partition,
            partition_count,
            commitment,
            estimated_slot: 42,
            received_at,
        }
    }

    #[test]
    fn pending_lands_weak_then_strong() {
        let mut tracker = TransactionTracker::new();
        let sent = Instant::now();
        tracker.apply(new_action(0, sent));
        assert!(tracker.record(0).unwrap().is_pending());

        tracker.apply(update(
            &[0],
            0,
            1,
            Commitment::Processed,
            sent + Duration::from_millis(300),
        ));
        let record = tracker.record(0).unwrap();
        assert!(!record.is_pending());
        assert!(!record.is_confirmed());

        tracker.apply(update(
            &[0],
            0,
            1,
            Commitment::Confirmed,
            sent + Duration::from_millis(800),
        ));
        assert!(tracker.record(0).unwrap().is_confirmed());
        assert_eq!(tracker.confirmed_count(), 1);
        assert_eq!(
            tracker.average_confirmation_time(),
            Some(Duration::from_millis(800))
        );
    }

    #[test]
    fn repeated_updates_are_idempotent() {
        let mut tracker = TransactionTracker::new();
        let sent = Instant::now();
        tracker.apply(new_action(0, sent));

        let first = sent + Duration::from_millis(500);
        tracker.apply(update(&[0], 0, 1, Commitment::Confirmed, first));
        // a later replay must not overwrite the first timing or recount
        tracker.apply(update(
            &[0],
            0,
            1,
            Commitment::Confirmed,
            sent + Duration::from_secs(9),
        ));
        assert_eq!(tracker.confirmed_count(), 1);
        assert_eq!(
            tracker.average_confirmation_time(),
            Some(Duration::from_millis(500))
        );
    }

    #[test]
    fn weak_landing_reverts_when_bitmap_retracts() {
        let mut tracker = TransactionTracker::new();
        let sent = Instant::now();
        tracker.apply(new_action(0, sent));

        tracker.apply(update(
            &[0],
            0,
            1,
            Commitment::Processed,
            sent + Duration::from_millis(200),
        ));
        assert!(!tracker.record(0).unwrap().is_pending());

        // the bit disappears from the weak bitmap
        tracker.apply(update(
            &[],
            0,
            1,
            Commitment::Processed,
            sent + Duration::from_millis(400),
        ));
        assert!(tracker.record(0).unwrap().is_pending());
    }

    #[test]
    fn strong_landing_survives_weak_retraction() {
        let mut tracker = TransactionTracker::new();
        let sent = Instant::now();
        tracker.apply(new_action(0, sent));
        tracker.apply(update(
            &[0],
            0,
            1,
            Commitment::Confirmed,
            sent + Duration::from_millis(600),
        ));

        tracker.apply(update(
            &[],
            0,
            1,
            Commitment::Processed,
            sent + Duration::from_millis(700),
        ));
        assert!(tracker.record(0).unwrap().is_confirmed());
        assert_eq!(tracker.confirmed_count(), 1);
    }

    #[test]
    fn revert_then_strong_landing_cancels_timers() {
        let sent = Instant::now();
        let timeout = Arc::new(ScheduledTask::noop());
        let retry = Arc::new(ScheduledTask::noop());

        let mut tracker = TransactionTracker::new();
        tracker.apply(Action::New {
            tracking_id: 0,
            signature: Signature::default(),
            sent_at: sent,
            handles: PendingHandles {
                timeout: Arc::clone(&timeout),
                retry: Some(Arc::clone(&retry)),
            },
        });

        // weak landing, then the fork drops it
        tracker.apply(update(
            &[0],
            0,
            1,
            Commitment::Processed,
            sent + Duration::from_millis(100),
        ));
        tracker.apply(update(
            &[],
            0,
            1,
            Commitment::Processed,
            sent + Duration::from_millis(200),
        ));
        assert!(tracker.record(0).unwrap().is_pending());
        assert!(!timeout.is_cancelled());

        // the strong landing finishes the walk and stops all bookkeeping
        tracker.apply(update(
            &[0],
            0,
            1,
            Commitment::Confirmed,
            sent + Duration::from_millis(300),
        ));
        assert!(tracker.record(0).unwrap().is_confirmed());
        assert!(timeout.is_cancelled());
        assert!(retry.is_cancelled());
        assert_eq!(
            tracker.average_confirmation_time(),
            Some(Duration::from_millis(300))
        );
    }

    #[test]
    fn timeout_is_terminal() {
        let mut tracker = TransactionTracker::new();
        let sent = Instant::now();
        tracker.apply(new_action(0, sent));
        tracker.apply(Action::Timeout { tracking_id: 0 });
        assert_eq!(tracker.timed_out_count(), 1);

        // a late landing must not resurrect it
        tracker.apply(update(
            &[0],
            0,
            1,
            Commitment::Confirmed,
            sent + Duration::from_secs(60),
        ));
        assert!(!tracker.record(0).unwrap().is_confirmed());
        assert_eq!(tracker.confirmed_count(), 0);

        // and a repeat timeout doesn't double count
        tracker.apply(Action::Timeout { tracking_id: 0 });
        assert_eq!(tracker.timed_out_count(), 1);
    }

    #[test]
    fn timeout_after_landing_is_ignored() {
        let mut tracker = TransactionTracker::new();
        let sent = Instant::now();
        tracker.apply(new_action(0, sent));
        tracker.apply(update(
            &[0],
            0,
            1,
            Commitment::Confirmed,
            sent + Duration::from_millis(100),
        ));
        tracker.apply(Action::Timeout { tracking_id: 0 });
        assert!(tracker.record(0).unwrap().is_confirmed());
        assert_eq!(tracker.timed_out_count(), 0);
    }

    #[test]
    fn updates_only_touch_their_partition() {
        let mut tracker = TransactionTracker::new();
        let sent = Instant::now();
        // tracking ids 0 and 1 land in partitions 0 and 1 of 2
        tracker.apply(new_action(0, sent));
        tracker.apply(new_action(1, sent));

        tracker.apply(update(
            &[0],
            0,
            2,
            Commitment::Confirmed,
            sent + Duration::from_millis(100),
        ));
        assert!(tracker.record(0).unwrap().is_confirmed());
        assert!(tracker.record(1).unwrap().is_pending());
    }

    #[test]
    fn reset_clears_everything() {
        let mut tracker = TransactionTracker::new();
        let sent = Instant::now();
        tracker.apply(new_action(0, sent));
        tracker.apply(update(
            &[0],
            0,
            1,
            Commitment::Confirmed,
            sent + Duration::from_millis(100),
        ));
        tracker.apply(Action::Reset);
        assert!(tracker.is_empty());
        assert_eq!(tracker.average_confirmation_time(), None);
    }

    #[test]
    fn weak_landing_stops_retries_only_when_configured() {
        let sent = Instant::now();

        let retry = Arc::new(ScheduledTask::noop());
        let mut tracker = TransactionTracker::new().with_retry_until_processed(true);
        tracker.apply(Action::New {
            tracking_id: 0,
            signature: Signature::default(),
            sent_at: sent,
            handles: PendingHandles {
                timeout: Arc::new(ScheduledTask::noop()),
                retry: Some(Arc::clone(&retry)),
            },
        });
        tracker.apply(update(
            &[0],
            0,
            1,
            Commitment::Processed,
            sent + Duration::from_millis(100),
        ));
        assert!(retry.is_cancelled());

        // by default retries run until strong commitment
        let retry = Arc::new(ScheduledTask::noop());
        let mut tracker = TransactionTracker::new();
        tracker.apply(Action::New {
            tracking_id: 0,
            signature: Signature::default(),
            sent_at: sent,
            handles: PendingHandles {
                timeout: Arc::new(ScheduledTask::noop()),
                retry: Some(Arc::clone(&retry)),
            },
        });
        tracker.apply(update(
            &[0],
            0,
            1,
            Commitment::Processed,
            sent + Duration::from_millis(100),
        ));
        assert!(!retry.is_cancelled());
        tracker.apply(update(
            &[0],
            0,
            1,
            Commitment::Confirmed,
            sent + Duration::from_millis(200),
        ));
        assert!(retry.is_cancelled());
    }

    #[test]
    fn received_sighting_refines_landing_slot() {
        let mut tracker = TransactionTracker::new();
        let sent = Instant::now();
        tracker.apply(new_action(0, sent));
        tracker.apply(Action::Received {
            tracking_id: 0,
            slot: 7,
        });
        tracker.apply(update(
            &[0],
            0,
            1,
            Commitment::Confirmed,
            sent + Duration::from_millis(100),
        ));
        let Some(TransactionRecord::Landed { slot, .. }) = tracker.record(0) else {
            panic!("expected landed record");
        };
        assert_eq!(*slot, Some(7));
    }

    #[test]
    fn polled_landing_slot_overrides_estimate() {
        let mut tracker = TransactionTracker::new();
        let sent = Instant::now();
        tracker.apply(new_action(0, sent));
        tracker.apply(update(
            &[0],
            0,
            1,
            Commitment::Confirmed,
            sent + Duration::from_millis(100),
        ));
        tracker.apply(Action::Landed {
            tracking_id: 0,
            slot: 99,
        });
        let Some(TransactionRecord::Landed { slot, .. }) = tracker.record(0) else {
            panic!("expected landed record");
        };
        assert_eq!(*slot, Some(99));
    }

    #[test]
    fn rooted_landing_can_no_longer_revert() {
        let mut tracker = TransactionTracker::new();
        let sent = Instant::now();
        tracker.apply(new_action(0, sent));
        // weak landing at the default estimated slot 42
        tracker.apply(update(
            &[0],
            0,
            1,
            Commitment::Processed,
            sent + Duration::from_millis(100),
        ));
        tracker.apply(Action::Root { slot: 42 });

        // a weak retraction after rooting must not revert
        tracker.apply(update(
            &[],
            0,
            1,
            Commitment::Processed,
            sent + Duration::from_millis(200),
        ));
        assert!(!tracker.record(0).unwrap().is_pending());
    }

    #[test]
    fn root_is_monotonic() {
        let mut tracker = TransactionTracker::new();
        tracker.apply(Action::Root { slot: 10 });
        tracker.apply(Action::Root { slot: 8 });
        assert_eq!(tracker.latest_root(), 10);
    }

    proptest! {
        /// Every tracking id routes to exactly one partition, and the
        /// partition-local id reconstructs it
        #[test]
        fn partition_routing_is_a_bijection(
            tracking_id in 0usize..1_000_000,
            partition_count in 1usize..64,
        ) {
            let mut owners = 0;
            for partition in 0..partition_count {
                if let Some(id) = partition_local_id(tracking_id, partition, partition_count) {
                    owners += 1;
                    prop_assert_eq!(id * partition_count + partition, tracking_id);
                }
            }
            prop_assert_eq!(owners, 1);
        }

        /// Replaying one landing notification any number of times leaves
        /// the record and the counters exactly as the first delivery did
        #[test]
        fn replayed_landings_are_idempotent(
            replays in 1usize..6,
            strong in any::<bool>(),
        ) {
            let mut tracker = TransactionTracker::new();
            let sent = Instant::now();
            tracker.apply(new_action(0, sent));

            let commitment = if strong {
                Commitment::Confirmed
            } else {
                Commitment::Processed
            };
            tracker.apply(update(&[0], 0, 1, commitment, sent + Duration::from_millis(100)));
            for i in 0..replays {
                tracker.apply(update(
                    &[0],
                    0,
                    1,
                    commitment,
                    sent + Duration::from_millis(200 + i as u64 * 100),
                ));
            }

            prop_assert_eq!(tracker.confirmed_count(), if strong { 1 } else { 0 });
            prop_assert_eq!(tracker.record(0).unwrap().is_confirmed(), strong);
            if strong {
                prop_assert_eq!(
                    tracker.average_confirmation_time(),
                    Some(Duration::from_millis(100))
                );
            }
        }

        /// After strong commitment, no interleaving of weak sightings and
        /// retractions can regress the record
        #[test]
        fn strong_commitment_is_monotonic(
            weak_bitmaps in proptest::collection::vec(any::<bool>(), 1..12),
        ) {
            let mut tracker = TransactionTracker::new();
            let sent = Instant::now();
            tracker.apply(new_action(0, sent));
            tracker.apply(update(
                &[0],
                0,
                1,
                Commitment::Confirmed,
                sent + Duration::from_millis(100),
            ));

            for (i, present) in weak_bitmaps.into_iter().enumerate() {
                let ids: &[usize] = if present { &[0] } else { &[] };
                tracker.apply(update(
                    ids,
                    0,
                    1,
                    Commitment::Processed,
                    sent + Duration::from_millis(200 + i as u64 * 50),
                ));
            }

            prop_assert!(tracker.record(0).unwrap().is_confirmed());
            prop_assert_eq!(tracker.confirmed_count(), 1);
        }
    }
}
