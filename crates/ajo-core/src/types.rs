use chrono::{DateTime, Utc};
use serde::de::{self, Unexpected, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Asset amounts in minor units of the pooled currency.
pub type Amount = u128;

/// Read an [`Amount`] from any non-negative integer or a decimal string.
///
/// TOML only carries 64-bit integers; amounts above that range are written as
/// strings.
pub fn deserialize_amount<'de, D>(deserializer: D) -> Result<Amount, D::Error>
where
    D: Deserializer<'de>,
{
    struct AmountVisitor;

    impl<'de> Visitor<'de> for AmountVisitor {
        type Value = Amount;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a non-negative integer amount or a decimal string")
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<Amount, E> {
            Ok(Amount::from(value))
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<Amount, E> {
            u64::try_from(value)
                .map(Amount::from)
                .map_err(|_| E::invalid_value(Unexpected::Signed(value), &self))
        }

        fn visit_u128<E: de::Error>(self, value: u128) -> Result<Amount, E> {
            Ok(value)
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<Amount, E> {
            value
                .trim()
                .parse()
                .map_err(|_| E::invalid_value(Unexpected::Str(value), &self))
        }
    }

    deserializer.deserialize_any(AmountVisitor)
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Identity of a circle participant (or of the circle administrator).
    ParticipantId
);

string_id!(
    /// Pooled asset code, e.g. "cUSD".
    AssetId
);

string_id!(
    /// Account holding a circle's pooled contributions.
    CustodyAccount
);

/// Opaque proof reference handed over by the identity-attestation collaborator.
///
/// The ledger stores it for lookup and only checks that it is non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttestationRef(pub String);

impl AttestationRef {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for AttestationRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stable identifier of one circle instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CircleId(pub u64);

impl CircleId {
    /// Custody account that holds this circle's pooled contributions.
    pub fn custody_account(&self) -> CustodyAccount {
        CustodyAccount(format!("circle-{}/custody", self.0))
    }
}

impl fmt::Display for CircleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "circle-{}", self.0)
    }
}

/// Lifecycle state of a circle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircleState {
    /// Accepting members.
    Open,
    /// Full; contributions and payouts rotate indefinitely.
    Locked,
}

/// Per-participant membership record. Created on join, never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub participant: ParticipantId,
    pub active: bool,
    pub reputation: i64,
    /// Join ordinal; equals the member's payout queue slot.
    pub joined_at: u32,
    pub attestation: AttestationRef,
    pub payouts_received: u32,
    pub total_received: Amount,
}

/// Receipt returned by the asset-transfer collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReceipt {
    pub settlement_id: String,
    pub rail: String,
    pub settled_at: DateTime<Utc>,
}

/// Outcome of a committed contribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContributionRecord {
    pub participant: ParticipantId,
    pub cycle: u64,
    pub amount: Amount,
    pub receipt: TransferReceipt,
}

/// Snapshot of a circle for dashboards and operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircleStatus {
    pub circle: CircleId,
    pub state: CircleState,
    pub asset: AssetId,
    pub current_cycle: u64,
    pub next_payout_index: u32,
    pub contribution_amount: Amount,
    pub members_count: u32,
    pub max_members: u32,
    pub collected_this_cycle: Amount,
    pub custody_balance: Amount,
    pub current_recipient: Option<ParticipantId>,
    pub cycle_started_at: DateTime<Utc>,
    pub cycle_deadline: DateTime<Utc>,
}
