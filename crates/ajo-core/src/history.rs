use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::types::ParticipantId;

/// Who paid and who was excused in one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleRecord {
    pub paid: BTreeSet<ParticipantId>,
    pub excused: BTreeSet<ParticipantId>,
}

/// Contribution record keyed by member x cycle.
///
/// Append-only by default. With a retention window, cycles that fall out of the
/// window are dropped when the circle advances; queries for them report nothing
/// paid.
#[derive(Debug, Clone, Default)]
pub struct ContributionHistory {
    cycles: BTreeMap<u64, CycleRecord>,
    retention: Option<u64>,
}

impl ContributionHistory {
    pub fn new(retention: Option<u64>) -> Self {
        Self {
            cycles: BTreeMap::new(),
            retention,
        }
    }

    pub fn has_paid(&self, participant: &ParticipantId, cycle: u64) -> bool {
        self.cycles
            .get(&cycle)
            .is_some_and(|record| record.paid.contains(participant))
    }

    pub fn is_excused(&self, participant: &ParticipantId, cycle: u64) -> bool {
        self.cycles
            .get(&cycle)
            .is_some_and(|record| record.excused.contains(participant))
    }

    /// Returns false if the payment was already recorded.
    pub fn record_payment(&mut self, participant: ParticipantId, cycle: u64) -> bool {
        self.cycles.entry(cycle).or_default().paid.insert(participant)
    }

    /// Returns false if the member was already excused for this cycle.
    pub fn record_excuse(&mut self, participant: ParticipantId, cycle: u64) -> bool {
        self.cycles
            .entry(cycle)
            .or_default()
            .excused
            .insert(participant)
    }

    pub fn paid_count(&self, cycle: u64) -> usize {
        self.cycles.get(&cycle).map_or(0, |record| record.paid.len())
    }

    /// Drop cycles outside the retention window, relative to `current_cycle`.
    pub fn prune(&mut self, current_cycle: u64) -> usize {
        let Some(window) = self.retention else {
            return 0;
        };
        let oldest_kept = current_cycle.saturating_sub(window);
        let kept = self.cycles.split_off(&oldest_kept);
        let dropped = self.cycles.len();
        self.cycles = kept;
        dropped
    }

    pub fn oldest_cycle(&self) -> Option<u64> {
        self.cycles.keys().next().copied()
    }

    pub fn retained_cycles(&self) -> usize {
        self.cycles.len()
    }
}
