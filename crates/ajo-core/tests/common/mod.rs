#![allow(dead_code)]

use ajo_core::{
    Amount, AssetId, AssetTransfer, AttestationRef, CircleConfig, CircleId, CircleLedger,
    CustodyAccount, ParticipantId, TransferError, TransferReceipt,
};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

pub const CONTRIBUTION: Amount = 100;

/// Balance-tracking transfer double with failure switches.
#[derive(Default)]
pub struct FakeBank {
    balances: Mutex<HashMap<String, Amount>>,
    fail_pulls: AtomicBool,
    fail_pushes: AtomicBool,
    settlements: AtomicU64,
}

impl FakeBank {
    pub fn fund(&self, account: &str, amount: Amount) {
        *self
            .balances
            .lock()
            .unwrap()
            .entry(account.to_string())
            .or_default() += amount;
    }

    pub fn balance(&self, account: &str) -> Amount {
        self.balances
            .lock()
            .unwrap()
            .get(account)
            .copied()
            .unwrap_or_default()
    }

    pub fn set_fail_pulls(&self, fail: bool) {
        self.fail_pulls.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_pushes(&self, fail: bool) {
        self.fail_pushes.store(fail, Ordering::SeqCst);
    }

    fn move_funds(&self, from: &str, to: &str, amount: Amount) -> Result<TransferReceipt, TransferError> {
        let mut balances = self.balances.lock().unwrap();
        let available = balances.get(from).copied().unwrap_or_default();
        if available < amount {
            return Err(TransferError::InsufficientFunds {
                account: from.to_string(),
                needed: amount,
                available,
            });
        }
        *balances.entry(from.to_string()).or_default() -= amount;
        *balances.entry(to.to_string()).or_default() += amount;

        let n = self.settlements.fetch_add(1, Ordering::SeqCst);
        Ok(TransferReceipt {
            settlement_id: format!("fake-{n}"),
            rail: "fake".to_string(),
            settled_at: Utc::now(),
        })
    }
}

impl AssetTransfer for FakeBank {
    fn rail(&self) -> &'static str {
        "fake"
    }

    fn pull(
        &self,
        _asset: &AssetId,
        from: &ParticipantId,
        custody: &CustodyAccount,
        amount: Amount,
    ) -> Result<TransferReceipt, TransferError> {
        if self.fail_pulls.load(Ordering::SeqCst) {
            return Err(TransferError::rejected("fake", "pull switched off"));
        }
        self.move_funds(from.as_str(), custody.as_str(), amount)
    }

    fn push(
        &self,
        _asset: &AssetId,
        custody: &CustodyAccount,
        to: &ParticipantId,
        amount: Amount,
    ) -> Result<TransferReceipt, TransferError> {
        if self.fail_pushes.load(Ordering::SeqCst) {
            return Err(TransferError::rejected("fake", "push switched off"));
        }
        self.move_funds(custody.as_str(), to.as_str(), amount)
    }
}

pub fn p(name: &str) -> ParticipantId {
    ParticipantId::new(name)
}

pub fn attestation(name: &str) -> AttestationRef {
    AttestationRef::new(format!("self-{name}"))
}

/// Circle with `max_members` slots over a bank that funds every named member.
pub fn circle(max_members: u32, funded: &[&str]) -> (CircleLedger, Arc<FakeBank>) {
    let bank = Arc::new(FakeBank::default());
    for name in funded {
        bank.fund(name, 10_000);
    }
    let config = CircleConfig::new("cUSD", CONTRIBUTION, max_members, 7 * 24 * 60 * 60, "coordinator");
    let ledger = CircleLedger::new(CircleId(1), config, bank.clone()).expect("valid circle");
    (ledger, bank)
}

pub fn join_all(ledger: &CircleLedger, names: &[&str]) {
    for name in names {
        ledger.join(p(name), attestation(name)).expect("join");
    }
}
