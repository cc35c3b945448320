//! Asset-transfer and event-sink adapters for the Ajo circle ledger.

#![deny(unsafe_code)]

use ajo_core::{
    Amount, AssetId, AssetTransfer, CustodyAccount, EventRecord, EventSink, ParticipantId,
    SinkError, TransferError, TransferReceipt,
};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Default)]
struct FailureSwitches {
    next_pull: Option<String>,
    next_push: Option<String>,
    all_pushes: Option<String>,
}

/// In-memory bank for deterministic local settlement simulation.
///
/// Balances are keyed by asset and account name; participant and custody
/// accounts share one namespace. Failures can be armed for the next pull or push.
#[derive(Debug, Default)]
pub struct InMemoryAssetBank {
    balances: Mutex<HashMap<(AssetId, String), Amount>>,
    supported: Option<BTreeSet<AssetId>>,
    failures: Mutex<FailureSwitches>,
    transfers: AtomicU64,
}

impl InMemoryAssetBank {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse every asset outside `assets` with [`TransferError::UnsupportedAsset`].
    pub fn restricted_to<I, A>(assets: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<AssetId>,
    {
        Self {
            supported: Some(assets.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    /// Credit `amount` to `account` out of thin air.
    pub fn mint(&self, asset: impl Into<AssetId>, account: impl AsRef<str>, amount: Amount) {
        let key = (asset.into(), account.as_ref().to_string());
        let mut balances = self.balances.lock();
        let balance = balances.entry(key).or_default();
        *balance = balance.saturating_add(amount);
    }

    pub fn balance(&self, asset: &AssetId, account: impl AsRef<str>) -> Amount {
        self.balances
            .lock()
            .get(&(asset.clone(), account.as_ref().to_string()))
            .copied()
            .unwrap_or_default()
    }

    /// Sum of all balances held in `asset`.
    pub fn total_supply(&self, asset: &AssetId) -> Amount {
        self.balances
            .lock()
            .iter()
            .filter(|((held, _), _)| held == asset)
            .fold(0, |total, (_, amount)| total.saturating_add(*amount))
    }

    /// Number of transfers that settled.
    pub fn transfer_count(&self) -> u64 {
        self.transfers.load(Ordering::Acquire)
    }

    pub fn fail_next_pull(&self, reason: impl Into<String>) {
        self.failures.lock().next_pull = Some(reason.into());
    }

    pub fn fail_next_push(&self, reason: impl Into<String>) {
        self.failures.lock().next_push = Some(reason.into());
    }

    /// Reject every push until switched off again.
    pub fn set_fail_pushes(&self, reason: Option<String>) {
        self.failures.lock().all_pushes = reason;
    }

    fn check_asset(&self, asset: &AssetId) -> Result<(), TransferError> {
        match &self.supported {
            Some(supported) if !supported.contains(asset) => {
                Err(TransferError::UnsupportedAsset(asset.clone()))
            }
            _ => Ok(()),
        }
    }

    fn settle(
        &self,
        asset: &AssetId,
        from: &str,
        to: &str,
        amount: Amount,
    ) -> Result<TransferReceipt, TransferError> {
        self.check_asset(asset)?;

        let mut balances = self.balances.lock();
        let from_key = (asset.clone(), from.to_string());
        let available = balances.get(&from_key).copied().unwrap_or_default();
        if available < amount {
            return Err(TransferError::InsufficientFunds {
                account: from.to_string(),
                needed: amount,
                available,
            });
        }
        balances.insert(from_key, available - amount);
        let to_balance = balances.entry((asset.clone(), to.to_string())).or_default();
        *to_balance = to_balance.saturating_add(amount);
        drop(balances);

        self.transfers.fetch_add(1, Ordering::AcqRel);
        let short_id: String = Uuid::new_v4().simple().to_string().chars().take(12).collect();
        let receipt = TransferReceipt {
            settlement_id: format!("mem-{short_id}"),
            rail: self.rail().to_string(),
            settled_at: Utc::now(),
        };
        debug!(
            asset = %asset,
            from,
            to,
            amount = %amount,
            settlement = %receipt.settlement_id,
            "transfer settled"
        );
        Ok(receipt)
    }
}

impl AssetTransfer for InMemoryAssetBank {
    fn rail(&self) -> &'static str {
        "memory"
    }

    fn pull(
        &self,
        asset: &AssetId,
        from: &ParticipantId,
        custody: &CustodyAccount,
        amount: Amount,
    ) -> Result<TransferReceipt, TransferError> {
        if let Some(reason) = self.failures.lock().next_pull.take() {
            return Err(TransferError::rejected(self.rail(), reason));
        }
        self.settle(asset, from.as_str(), custody.as_str(), amount)
    }

    fn push(
        &self,
        asset: &AssetId,
        custody: &CustodyAccount,
        to: &ParticipantId,
        amount: Amount,
    ) -> Result<TransferReceipt, TransferError> {
        {
            let mut failures = self.failures.lock();
            if let Some(reason) = failures.next_push.take() {
                return Err(TransferError::rejected(self.rail(), reason));
            }
            if let Some(reason) = &failures.all_pushes {
                return Err(TransferError::rejected(self.rail(), reason.clone()));
            }
        }
        self.settle(asset, custody.as_str(), to.as_str(), amount)
    }
}

/// Deterministic failing transfer useful for chaos testing.
#[derive(Debug, Clone)]
pub struct AlwaysFailTransfer {
    rail_name: &'static str,
    reason: String,
}

impl AlwaysFailTransfer {
    pub fn new(rail_name: &'static str, reason: impl Into<String>) -> Self {
        Self {
            rail_name,
            reason: reason.into(),
        }
    }
}

impl AssetTransfer for AlwaysFailTransfer {
    fn rail(&self) -> &'static str {
        self.rail_name
    }

    fn pull(
        &self,
        _asset: &AssetId,
        _from: &ParticipantId,
        _custody: &CustodyAccount,
        _amount: Amount,
    ) -> Result<TransferReceipt, TransferError> {
        Err(TransferError::rejected(self.rail_name, self.reason.clone()))
    }

    fn push(
        &self,
        _asset: &AssetId,
        _custody: &CustodyAccount,
        _to: &ParticipantId,
        _amount: Amount,
    ) -> Result<TransferReceipt, TransferError> {
        Err(TransferError::rejected(self.rail_name, self.reason.clone()))
    }
}

/// Keeps every published record in memory.
#[derive(Debug, Default)]
pub struct MemoryEventSink {
    records: Mutex<Vec<EventRecord>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<EventRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl EventSink for MemoryEventSink {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn publish(&self, record: &EventRecord) -> Result<(), SinkError> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}

/// Writes each record as one JSON line.
pub struct JsonLinesEventSink<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonLinesEventSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl JsonLinesEventSink<BufWriter<File>> {
    /// Append to `path`, creating it if missing.
    pub fn append_to(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write + Send> EventSink for JsonLinesEventSink<W> {
    fn name(&self) -> &'static str {
        "jsonl"
    }

    fn publish(&self, record: &EventRecord) -> Result<(), SinkError> {
        let line = serde_json::to_string(record)
            .map_err(|err| SinkError::new(self.name(), err.to_string()))?;

        let mut writer = self.writer.lock();
        writeln!(writer, "{line}")
            .and_then(|()| writer.flush())
            .map_err(|err| {
                warn!(index = record.index, error = %err, "failed to write event line");
                SinkError::new(self.name(), err.to_string())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ajo_core::{CircleEvent, CircleId, EventLog};

    fn cusd() -> AssetId {
        AssetId::new("cUSD")
    }

    fn custody() -> CustodyAccount {
        CircleId(0).custody_account()
    }

    fn record() -> EventRecord {
        let mut log = EventLog::new(CircleId(0));
        log.append(CircleEvent::Contribution {
            participant: ParticipantId::new("ada"),
            cycle: 0,
            amount: 100,
        })
    }

    #[test]
    fn bank_moves_funds_and_counts_transfers() {
        let bank = InMemoryAssetBank::new();
        bank.mint("cUSD", "ada", 500);

        let receipt = bank
            .pull(&cusd(), &ParticipantId::new("ada"), &custody(), 200)
            .unwrap();
        assert_eq!(receipt.rail, "memory");
        assert!(receipt.settlement_id.starts_with("mem-"));
        assert_eq!(bank.balance(&cusd(), "ada"), 300);
        assert_eq!(bank.balance(&cusd(), custody().as_str()), 200);

        bank.push(&cusd(), &custody(), &ParticipantId::new("bayo"), 150)
            .unwrap();
        assert_eq!(bank.balance(&cusd(), "bayo"), 150);
        assert_eq!(bank.transfer_count(), 2);
        assert_eq!(bank.total_supply(&cusd()), 500);
    }

    #[test]
    fn bank_reports_shortfall_without_moving_funds() {
        let bank = InMemoryAssetBank::new();
        bank.mint("cUSD", "ada", 50);

        let err = bank
            .pull(&cusd(), &ParticipantId::new("ada"), &custody(), 100)
            .unwrap_err();
        assert_eq!(
            err,
            TransferError::InsufficientFunds {
                account: "ada".to_string(),
                needed: 100,
                available: 50,
            }
        );
        assert_eq!(bank.balance(&cusd(), "ada"), 50);
        assert_eq!(bank.transfer_count(), 0);
    }

    #[test]
    fn armed_failures_fire_once() {
        let bank = InMemoryAssetBank::new();
        bank.mint("cUSD", "ada", 500);
        let ada = ParticipantId::new("ada");

        bank.fail_next_pull("maintenance");
        let err = bank.pull(&cusd(), &ada, &custody(), 100).unwrap_err();
        assert!(matches!(err, TransferError::Rejected { ref reason, .. } if reason == "maintenance"));
        bank.pull(&cusd(), &ada, &custody(), 100).unwrap();

        bank.fail_next_push("offline");
        assert!(bank.push(&cusd(), &custody(), &ada, 100).is_err());
        bank.push(&cusd(), &custody(), &ada, 100).unwrap();

        bank.set_fail_pushes(Some("frozen".to_string()));
        bank.pull(&cusd(), &ada, &custody(), 100).unwrap();
        assert!(bank.push(&cusd(), &custody(), &ada, 100).is_err());
        assert!(bank.push(&cusd(), &custody(), &ada, 100).is_err());
        bank.set_fail_pushes(None);
        bank.push(&cusd(), &custody(), &ada, 100).unwrap();
        assert_eq!(bank.balance(&cusd(), "ada"), 500);
    }

    #[test]
    fn restricted_bank_rejects_other_assets() {
        let bank = InMemoryAssetBank::restricted_to(["cUSD"]);
        bank.mint("USDC", "ada", 500);
        let err = bank
            .pull(&AssetId::new("USDC"), &ParticipantId::new("ada"), &custody(), 100)
            .unwrap_err();
        assert_eq!(err, TransferError::UnsupportedAsset(AssetId::new("USDC")));
    }

    #[test]
    fn failing_transfer_returns_error() {
        let transfer = AlwaysFailTransfer::new("wire", "forced");
        let err = transfer
            .push(&cusd(), &custody(), &ParticipantId::new("ada"), 1)
            .unwrap_err();
        assert_eq!(err, TransferError::rejected("wire", "forced"));
        assert_eq!(transfer.rail(), "wire");
    }

    #[test]
    fn json_lines_sink_writes_one_line_per_record() {
        let sink = JsonLinesEventSink::new(Vec::new());
        let record = record();
        sink.publish(&record).unwrap();
        sink.publish(&record).unwrap();

        let output = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: EventRecord = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn memory_sink_keeps_records() {
        let sink = MemoryEventSink::new();
        assert!(sink.is_empty());
        sink.publish(&record()).unwrap();
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.records()[0].event.label(), "contribution");
    }
}
