use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::reputation::ReputationChange;
use crate::types::{Amount, AttestationRef, CircleId, ParticipantId};

/// Audit record of a committed ledger transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircleEvent {
    Joined {
        participant: ParticipantId,
        slot: u32,
        cycle: u64,
        attestation: AttestationRef,
    },
    Contribution {
        participant: ParticipantId,
        cycle: u64,
        amount: Amount,
    },
    Excused {
        participant: ParticipantId,
        cycle: u64,
        admin: ParticipantId,
    },
    Payout {
        recipient: ParticipantId,
        cycle: u64,
        amount: Amount,
        contributors: u32,
    },
    Missed {
        participant: ParticipantId,
        cycle: u64,
    },
    ReputationUpdated {
        cycle: u64,
        changes: Vec<ReputationChange>,
    },
}

impl CircleEvent {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Joined { .. } => "joined",
            Self::Contribution { .. } => "contribution",
            Self::Excused { .. } => "excused",
            Self::Payout { .. } => "payout",
            Self::Missed { .. } => "missed",
            Self::ReputationUpdated { .. } => "reputation_updated",
        }
    }

    pub fn cycle(&self) -> u64 {
        match self {
            Self::Joined { cycle, .. }
            | Self::Contribution { cycle, .. }
            | Self::Excused { cycle, .. }
            | Self::Payout { cycle, .. }
            | Self::Missed { cycle, .. }
            | Self::ReputationUpdated { cycle, .. } => *cycle,
        }
    }
}

/// Hash-chained event log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub index: u64,
    pub event_id: String,
    pub circle: CircleId,
    pub recorded_at: DateTime<Utc>,
    pub event: CircleEvent,
    pub previous_hash: Option<String>,
    pub entry_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventLogError {
    #[error("event index gap at position {position} (found {found})")]
    IndexGap { position: u64, found: u64 },

    #[error("event {index} belongs to {found}, expected {expected}")]
    ForeignCircle {
        index: u64,
        expected: CircleId,
        found: CircleId,
    },

    #[error("event hash-chain verification failed")]
    BrokenChain,
}

/// Append-only event log with hash-chain proofs.
///
/// There is no in-place mutation API: each committed transition adds records
/// and earlier records are never rewritten.
#[derive(Debug, Clone)]
pub struct EventLog {
    circle: CircleId,
    records: Vec<EventRecord>,
}

impl EventLog {
    pub fn new(circle: CircleId) -> Self {
        Self {
            circle,
            records: Vec::new(),
        }
    }

    /// Rebuild a log from persisted records and verify its integrity.
    pub fn from_records(circle: CircleId, records: Vec<EventRecord>) -> Result<Self, EventLogError> {
        for (position, record) in records.iter().enumerate() {
            let position = position as u64;
            if record.index != position {
                return Err(EventLogError::IndexGap {
                    position,
                    found: record.index,
                });
            }
            if record.circle != circle {
                return Err(EventLogError::ForeignCircle {
                    index: record.index,
                    expected: circle,
                    found: record.circle,
                });
            }
        }

        let log = Self { circle, records };
        if !log.verify_chain() {
            return Err(EventLogError::BrokenChain);
        }
        Ok(log)
    }

    pub fn records(&self) -> &[EventRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records with `index >= from`.
    pub fn since(&self, from: u64) -> &[EventRecord] {
        let start = usize::try_from(from)
            .unwrap_or(usize::MAX)
            .min(self.records.len());
        &self.records[start..]
    }

    pub fn append(&mut self, event: CircleEvent) -> EventRecord {
        let index = self.records.len() as u64;
        let previous_hash = self.records.last().map(|r| r.entry_hash.clone());
        let event_id = Uuid::new_v4().to_string();
        let recorded_at = Utc::now();
        let entry_hash = compute_entry_hash(
            index,
            &event_id,
            self.circle,
            recorded_at,
            &event,
            previous_hash.as_deref(),
        );

        let record = EventRecord {
            index,
            event_id,
            circle: self.circle,
            recorded_at,
            event,
            previous_hash,
            entry_hash,
        };
        self.records.push(record.clone());
        record
    }

    pub fn verify_chain(&self) -> bool {
        let mut previous_hash: Option<&str> = None;
        for record in &self.records {
            if record.previous_hash.as_deref() != previous_hash {
                return false;
            }
            let expected = compute_entry_hash(
                record.index,
                &record.event_id,
                record.circle,
                record.recorded_at,
                &record.event,
                previous_hash,
            );
            if record.entry_hash != expected {
                return false;
            }
            previous_hash = Some(&record.entry_hash);
        }
        true
    }
}

#[derive(Serialize)]
struct HashMaterial<'a> {
    index: u64,
    event_id: &'a str,
    circle: CircleId,
    recorded_at: DateTime<Utc>,
    event: &'a CircleEvent,
    previous_hash: Option<&'a str>,
}

fn compute_entry_hash(
    index: u64,
    event_id: &str,
    circle: CircleId,
    recorded_at: DateTime<Utc>,
    event: &CircleEvent,
    previous_hash: Option<&str>,
) -> String {
    let material = HashMaterial {
        index,
        event_id,
        circle,
        recorded_at,
        event,
        previous_hash,
    };
    let bytes = serde_json::to_vec(&material).unwrap_or_default();
    blake3::hash(&bytes).to_hex().to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("event sink '{sink}' failed: {message}")]
pub struct SinkError {
    pub sink: String,
    pub message: String,
}

impl SinkError {
    pub fn new(sink: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            sink: sink.into(),
            message: message.into(),
        }
    }
}

/// Downstream consumer of committed event records (dashboards, archives).
pub trait EventSink: Send + Sync {
    fn name(&self) -> &'static str;

    fn publish(&self, record: &EventRecord) -> Result<(), SinkError>;
}
