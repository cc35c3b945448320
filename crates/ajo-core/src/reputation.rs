//! Reputation rules applied once per member at every payout.
//!
//! A member who paid gains [`CONTRIBUTION_REWARD`], a member who neither paid nor
//! was excused takes [`MISSED_PENALTY`], and the cycle's recipient additionally
//! gains [`PAYOUT_BONUS`]. Scores are unbounded signed integers; a low score never
//! removes a member.

use serde::{Deserialize, Serialize};

use crate::types::ParticipantId;

pub const CONTRIBUTION_REWARD: i64 = 1;
pub const PAYOUT_BONUS: i64 = 3;
pub const MISSED_PENALTY: i64 = -1;

/// How a member ended a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Standing {
    Paid,
    Excused,
    Missed,
}

impl Standing {
    pub fn classify(paid: bool, excused: bool) -> Self {
        if paid {
            Self::Paid
        } else if excused {
            Self::Excused
        } else {
            Self::Missed
        }
    }
}

/// Reputation movement of one member for one cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReputationChange {
    pub participant: ParticipantId,
    pub standing: Standing,
    pub recipient: bool,
    pub delta: i64,
    /// Score after the delta is applied.
    pub reputation: i64,
}

pub fn delta_for(standing: Standing, is_recipient: bool) -> i64 {
    let base = match standing {
        Standing::Paid => CONTRIBUTION_REWARD,
        Standing::Excused => 0,
        Standing::Missed => MISSED_PENALTY,
    };
    if is_recipient {
        base + PAYOUT_BONUS
    } else {
        base
    }
}

/// Compute the change set for a cycle without touching any member record.
///
/// `members` yields `(participant, current score, standing)` in queue order.
pub fn plan_changes<'a, I>(members: I, recipient: &ParticipantId) -> Vec<ReputationChange>
where
    I: IntoIterator<Item = (&'a ParticipantId, i64, Standing)>,
{
    members
        .into_iter()
        .map(|(participant, current, standing)| {
            let is_recipient = participant == recipient;
            let delta = delta_for(standing, is_recipient);
            ReputationChange {
                participant: participant.clone(),
                standing,
                recipient: is_recipient,
                delta,
                reputation: current.saturating_add(delta),
            }
        })
        .collect()
}
