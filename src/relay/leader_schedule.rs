//! Epoch leader schedule
//!
//! Caches the current epoch's leader schedule and answers "who produces
//! blocks near slot N". Producer lookups advance a per-identity cursor, so
//! repeated queries with monotonically increasing slots stay cheap across a
//! whole epoch.

use crate::types::Slot;
use parking_lot::Mutex;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::pubkey::Pubkey;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info};

struct ProducerSlots {
    /// Slot offsets within the epoch, ascending
    offsets: Vec<u64>,
    /// Index of the first offset not yet behind the query window
    cursor: usize,
}

struct Schedule {
    /// Absolute slot of the epoch's first slot
    first_slot: Slot,
    last_slot: Slot,
    producers: HashMap<Pubkey, ProducerSlots>,
}

pub struct LeaderScheduleTracker {
    rpc: Arc<RpcClient>,
    schedule: Mutex<Option<Schedule>>,
    fetching: AtomicBool,
    /// Slots ahead of the query slot considered "upcoming"
    lookahead_slots: u64,
}

impl LeaderScheduleTracker {
    pub fn new(rpc: Arc<RpcClient>, lookahead_slots: u64) -> Arc<Self> {
        Arc::new(Self {
            rpc,
            schedule: Mutex::new(None),
            fetching: AtomicBool::new(false),
            lookahead_slots,
        })
    }

    /// Fetch the current epoch's schedule, retrying until it lands
    pub async fn start(self: &Arc<Self>) {
        while !self.fetch().await {
            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        }
    }

    /// Identities scheduled to produce in `[slot, slot + lookahead]`.
    ///
    /// Queries must not move backwards: each producer's cursor only
    /// advances, so a lower slot than a previous call would miss leaders.
    pub fn upcoming_producers(&self, slot: Slot) -> HashSet<Pubkey> {
        let mut guard = self.schedule.lock();
        let Some(schedule) = guard.as_mut() else {
            return HashSet::new();
        };
        if slot < schedule.first_slot || slot > schedule.last_slot {
            return HashSet::new();
        }

        let window_start = slot - schedule.first_slot;
        let window_end = window_start + self.lookahead_slots;

        let mut upcoming = HashSet::new();
        for (identity, producer) in schedule.producers.iter_mut() {
            while producer.cursor < producer.offsets.len()
                && producer.offsets[producer.cursor] < window_start
            {
                producer.cursor += 1;
            }
            if let Some(&offset) = producer.offsets.get(producer.cursor) {
                if offset <= window_end {
                    upcoming.insert(*identity);
                }
            }
        }
        upcoming
    }

    /// Whether the cached schedule is exhausted near `slot` and a refetch is
    /// due. The schedule covers one epoch; refresh once the lookahead window
    /// crosses into the next.
    pub fn should_refresh(&self, slot: Slot) -> bool {
        let guard = self.schedule.lock();
        match guard.as_ref() {
            Some(schedule) => slot + self.lookahead_slots > schedule.last_slot,
            None => true,
        }
    }

    /// Kick off a background refetch if one isn't already running
    pub fn maybe_refresh(self: &Arc<Self>, slot: Slot) {
        if !self.should_refresh(slot) {
            return;
        }
        if self
            .fetching
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            tracker.fetch_locked().await;
            tracker.fetching.store(false, Ordering::Release);
        });
    }

    async fn fetch(&self) -> bool {
        if self
            .fetching
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return self.schedule.lock().is_some();
        }
        let ok = self.fetch_locked().await;
        self.fetching.store(false, Ordering::Release);
        ok
    }

    async fn fetch_locked(&self) -> bool {
        let result = async {
            let epoch_info = self.rpc.get_epoch_info().await?;
            let schedule = self.rpc.get_leader_schedule(None).await?;
            Ok::<_, solana_client::client_error::ClientError>((epoch_info, schedule))
        }
        .await;

        match result {
            Ok((epoch_info, Some(schedule))) => {
                let first_slot = epoch_info.absolute_slot - epoch_info.slot_index;
                let last_slot = first_slot + epoch_info.slots_in_epoch - 1;
                let producers = schedule
                    .into_iter()
                    .filter_map(|(identity, offsets)| {
                        let identity = Pubkey::from_str(&identity).ok()?;
                        let mut offsets: Vec<u64> =
                            offsets.into_iter().map(|o| o as u64).collect();
                        offsets.sort_unstable();
                        Some((identity, ProducerSlots { offsets, cursor: 0 }))
                    })
                    .collect::<HashMap<_, _>>();

                info!(
                    epoch = epoch_info.epoch,
                    first_slot = first_slot,
                    producers = producers.len(),
                    "Leader schedule fetched"
                );
                *self.schedule.lock() = Some(Schedule {
                    first_slot,
                    last_slot,
                    producers,
                });
                true
            }
            Ok((_, None)) => {
                error!("Cluster returned no leader schedule");
                false
            }
            Err(err) => {
                error!(error = %err, "Failed to fetch leader schedule");
                false
            }
        }
    }

    #[cfg(test)]
    pub fn from_parts(
        rpc: Arc<RpcClient>,
        first_slot: Slot,
        slots_in_epoch: u64,
        producers: Vec<(Pubkey, Vec<u64>)>,
        lookahead_slots: u64,
    ) -> Arc<Self> {
        let producers = producers
            .into_iter()
            .map(|(identity, mut offsets)| {
                offsets.sort_unstable();
                (identity, ProducerSlots { offsets, cursor: 0 })
            })
            .collect();
        Arc::new(Self {
            rpc,
            schedule: Mutex::new(Some(Schedule {
                first_slot,
                last_slot: first_slot + slots_in_epoch - 1,
                producers,
            })),
            fetching: AtomicBool::new(false),
            lookahead_slots,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rpc() -> Arc<RpcClient> {
        Arc::new(RpcClient::new("http://127.0.0.1:1".to_string()))
    }

    fn tracker() -> Arc<LeaderScheduleTracker> {
        let a = Pubkey::new_unique();
        let b = Pubkey::new_unique();
        let c = Pubkey::new_unique();
        LeaderScheduleTracker::from_parts(
            rpc(),
            1000,
            432,
            vec![(a, vec![0, 1, 2, 3]), (b, vec![50, 51]), (c, vec![400])],
            40,
        )
    }

    #[test]
    fn upcoming_covers_lookahead_window() {
        let tracker = tracker();
        // at the epoch start the first two producers fall in [0, 40]
        let upcoming = tracker.upcoming_producers(1000);
        assert_eq!(upcoming.len(), 1);

        let upcoming = tracker.upcoming_producers(1010);
        assert_eq!(upcoming.len(), 1);

        let upcoming = tracker.upcoming_producers(1040);
        assert_eq!(upcoming.len(), 1);
    }

    #[test]
    fn cursor_advances_monotonically() {
        let a = Pubkey::new_unique();
        let b = Pubkey::new_unique();
        let tracker = LeaderScheduleTracker::from_parts(
            rpc(),
            0,
            432,
            vec![(a, vec![5]), (b, vec![100])],
            40,
        );

        let upcoming = tracker.upcoming_producers(0);
        assert!(upcoming.contains(&a));
        assert!(!upcoming.contains(&b));

        // past a's only slot; cursor has moved off the end
        let upcoming = tracker.upcoming_producers(60);
        assert!(!upcoming.contains(&a));
        assert!(upcoming.contains(&b));

        let upcoming = tracker.upcoming_producers(110);
        assert!(!upcoming.contains(&b));
    }

    #[test]
    fn out_of_epoch_slots_return_empty() {
        let tracker = tracker();
        assert!(tracker.upcoming_producers(999).is_empty());
        assert!(tracker.upcoming_producers(1000 + 432).is_empty());
    }

    #[test]
    fn refresh_due_near_epoch_end() {
        let tracker = tracker();
        assert!(!tracker.should_refresh(1000));
        assert!(tracker.should_refresh(1000 + 431 - 10));
    }
}
