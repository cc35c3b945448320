use parking_lot::RwLock;
use std::sync::Arc;
use tracing::info;

use crate::circle::CircleLedger;
use crate::config::CircleConfig;
use crate::error::CircleError;
use crate::events::EventSink;
use crate::transfer::AssetTransfer;
use crate::types::{Amount, AssetId, CircleId, CircleStatus, ParticipantId};

/// Factory and index of circles over a single pooled asset.
///
/// Circles share the transfer collaborator and event sink, nothing else.
pub struct CircleRegistry {
    asset: AssetId,
    transfer: Arc<dyn AssetTransfer>,
    sink: Option<Arc<dyn EventSink>>,
    circles: RwLock<Vec<Arc<CircleLedger>>>,
}

impl CircleRegistry {
    pub fn new(asset: impl Into<AssetId>, transfer: Arc<dyn AssetTransfer>) -> Self {
        Self {
            asset: asset.into(),
            transfer,
            sink: None,
            circles: RwLock::new(Vec::new()),
        }
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn asset(&self) -> &AssetId {
        &self.asset
    }

    /// Create a circle administered by `admin`.
    pub fn create_circle(
        &self,
        admin: impl Into<ParticipantId>,
        contribution_amount: Amount,
        max_members: u32,
        cycle_duration_secs: u64,
    ) -> Result<Arc<CircleLedger>, CircleError> {
        let config = CircleConfig::new(
            self.asset.clone(),
            contribution_amount,
            max_members,
            cycle_duration_secs,
            admin,
        );
        self.create_with_config(config)
    }

    /// Create a circle from a full config. The config's asset must match the registry's.
    pub fn create_with_config(&self, config: CircleConfig) -> Result<Arc<CircleLedger>, CircleError> {
        if config.asset != self.asset {
            return Err(CircleError::invalid_params(format!(
                "registry pools '{}', circle requested '{}'",
                self.asset, config.asset
            )));
        }

        let mut circles = self.circles.write();
        let id = CircleId(circles.len() as u64);
        let mut ledger = CircleLedger::new(id, config, Arc::clone(&self.transfer))?;
        if let Some(sink) = &self.sink {
            ledger = ledger.with_event_sink(Arc::clone(sink));
        }

        let ledger = Arc::new(ledger);
        circles.push(Arc::clone(&ledger));
        info!(
            circle = %id,
            asset = %self.asset(),
            admin = %ledger.config().admin,
            "circle registered"
        );
        Ok(ledger)
    }

    pub fn get(&self, id: CircleId) -> Result<Arc<CircleLedger>, CircleError> {
        self.circles
            .read()
            .get(id.0 as usize)
            .cloned()
            .ok_or(CircleError::CircleNotFound(id))
    }

    pub fn total_circles(&self) -> usize {
        self.circles.read().len()
    }

    pub fn all_circles(&self) -> Vec<CircleId> {
        self.circles.read().iter().map(|circle| circle.id()).collect()
    }

    pub fn statuses(&self) -> Vec<CircleStatus> {
        let circles = self.circles.read().clone();
        circles.iter().map(|circle| circle.status()).collect()
    }
}
