//! Ajo rotating savings circle ledger.
//!
//! A circle admits a fixed number of attested participants, collects one fixed
//! contribution per member per cycle into pooled custody, and pays the whole pot
//! to one member per cycle in join order. Reputation rewards members who pay and
//! penalizes members who miss. Every transition either commits completely or
//! leaves no trace, including when the asset-transfer collaborator fails or calls
//! back into the ledger mid-transfer.

#![deny(unsafe_code)]

pub mod circle;
pub mod config;
pub mod error;
pub mod events;
mod guard;
pub mod history;
pub mod registry;
pub mod reputation;
pub mod transfer;
pub mod types;

pub use circle::{CircleLedger, PayoutSummary};
pub use config::CircleConfig;
pub use error::{CircleError, StateViolation, TransferError};
pub use events::{CircleEvent, EventLog, EventLogError, EventRecord, EventSink, SinkError};
pub use history::{ContributionHistory, CycleRecord};
pub use registry::CircleRegistry;
pub use reputation::{ReputationChange, Standing};
pub use transfer::AssetTransfer;
pub use types::{
    deserialize_amount, Amount, AssetId, AttestationRef, CircleId, CircleState, CircleStatus,
    ContributionRecord, CustodyAccount, Member, ParticipantId, TransferReceipt,
};
