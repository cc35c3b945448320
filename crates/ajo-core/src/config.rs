use serde::{Deserialize, Serialize};

use crate::error::CircleError;
use crate::types::{Amount, AssetId, ParticipantId};

/// Immutable circle parameters, fixed at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircleConfig {
    /// Pooled asset every contribution and payout is denominated in.
    pub asset: AssetId,
    /// Fixed per-cycle contribution, in minor units.
    #[serde(deserialize_with = "crate::types::deserialize_amount")]
    pub contribution_amount: Amount,
    pub max_members: u32,
    pub cycle_duration_secs: u64,
    /// Identity allowed to excuse missed contributions.
    pub admin: ParticipantId,
    /// Cycles of contribution history to keep. `None` keeps everything.
    #[serde(default)]
    pub history_retention: Option<u64>,
}

impl CircleConfig {
    pub fn new(
        asset: impl Into<AssetId>,
        contribution_amount: Amount,
        max_members: u32,
        cycle_duration_secs: u64,
        admin: impl Into<ParticipantId>,
    ) -> Self {
        Self {
            asset: asset.into(),
            contribution_amount,
            max_members,
            cycle_duration_secs,
            admin: admin.into(),
            history_retention: None,
        }
    }

    pub fn with_history_retention(mut self, cycles: u64) -> Self {
        self.history_retention = Some(cycles);
        self
    }

    pub fn validate(&self) -> Result<(), CircleError> {
        if self.asset.as_str().trim().is_empty() {
            return Err(CircleError::invalid_params("asset id must not be empty"));
        }
        if self.contribution_amount == 0 {
            return Err(CircleError::invalid_params(
                "contribution amount must be positive",
            ));
        }
        if self.max_members == 0 {
            return Err(CircleError::invalid_params("max members must be positive"));
        }
        if self.cycle_duration_secs == 0 {
            return Err(CircleError::invalid_params(
                "cycle duration must be positive",
            ));
        }
        if self.admin.as_str().trim().is_empty() {
            return Err(CircleError::invalid_params(
                "admin identity must not be empty",
            ));
        }
        if self.max_pot().is_none() {
            return Err(CircleError::invalid_params(format!(
                "contribution {} x {} members overflows the amount range",
                self.contribution_amount, self.max_members
            )));
        }
        if self.history_retention == Some(0) {
            return Err(CircleError::invalid_params(
                "history retention must keep at least one cycle",
            ));
        }
        Ok(())
    }

    /// Largest pot a single cycle can collect.
    pub fn max_pot(&self) -> Option<Amount> {
        self.contribution_amount
            .checked_mul(Amount::from(self.max_members))
    }
}
