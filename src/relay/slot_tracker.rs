//! Slot progression tracking
//!
//! Derives the cluster's current slot from shred-level slot notifications.
//! Validators can broadcast invalid blocks far in the future, so raw slot
//! claims are filtered against the median of recent observations before
//! they are believed.

use crate::types::Slot;
use tokio::sync::mpsc;
use tracing::debug;

const MAX_RECENT_SLOTS: usize = 12;

// 48 chosen because it's unlikely that 12 leaders in a row will miss their
// slots
const MAX_SLOT_SKIP_DISTANCE: Slot = 48;

/// Slot notifications consumed by the tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotObservation {
    FirstShredReceived { slot: Slot },
    Completed { slot: Slot },
    CreatedBank { slot: Slot },
}

pub struct SlotTracker {
    recent_slots: Vec<Slot>,
    current_slot: Slot,
    received_shred: bool,
}

impl SlotTracker {
    pub fn new(current_slot: Slot) -> Self {
        Self {
            recent_slots: vec![current_slot],
            current_slot,
            received_shred: false,
        }
    }

    pub fn current_slot(&self) -> Slot {
        self.current_slot
    }

    /// Fold one observation in; returns the new current slot when it moved
    pub fn process(&mut self, observation: SlotObservation) -> Option<Slot> {
        let previous = self.current_slot;
        match observation {
            SlotObservation::FirstShredReceived { slot } => {
                self.received_shred = true;
                self.current_slot = self.update_recent_slots(slot);
            }
            SlotObservation::Completed { slot } => {
                self.received_shred = true;
                self.current_slot = self.update_recent_slots(slot + 1);
            }
            SlotObservation::CreatedBank { slot } => {
                // Fall back to bank-created updates only when no shred
                // notifications arrive (single node cluster leader)
                if !self.received_shred {
                    self.current_slot = self.update_recent_slots(slot);
                }
            }
        }

        if self.current_slot != previous {
            Some(self.current_slot)
        } else {
            None
        }
    }

    fn update_recent_slots(&mut self, slot: Slot) -> Slot {
        self.recent_slots.push(slot);
        while self.recent_slots.len() > MAX_RECENT_SLOTS {
            self.recent_slots.remove(0);
        }

        let mut sorted = self.recent_slots.clone();
        sorted.sort_unstable();

        // Check the claim against the recent progression: the median slot
        // plus its distance to the end of the window bounds what a
        // reasonable current slot can be.
        let max_index = sorted.len() - 1;
        let median_index = max_index / 2;
        let expected_current = sorted[median_index] + (max_index - median_index) as Slot;
        let max_reasonable = expected_current + MAX_SLOT_SKIP_DISTANCE;

        // Highest observed slot that doesn't exceed the reasonable bound
        for &candidate in sorted.iter().rev() {
            if candidate <= max_reasonable {
                return candidate;
            }
        }

        self.current_slot
    }
}

/// Drive a tracker from an observation stream, invoking `on_slot` for every
/// slot advance. Runs until the sender side closes.
pub fn spawn<F>(
    mut tracker: SlotTracker,
    mut rx: mpsc::UnboundedReceiver<SlotObservation>,
    on_slot: F,
) -> tokio::task::JoinHandle<()>
where
    F: Fn(Slot) + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(observation) = rx.recv().await {
            if let Some(slot) = tracker.process(observation) {
                debug!(slot = slot, "Slot advanced");
                on_slot(slot);
            }
        }
    })
}
