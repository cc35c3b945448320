use crate::error::TransferError;
use crate::types::{Amount, AssetId, CustodyAccount, ParticipantId, TransferReceipt};

/// Asset-transfer capability consumed by the circle ledger.
///
/// Implementations move the pooled asset between participant accounts and a
/// circle's custody account. Each call must either fully succeed or fail with no
/// effect; the ledger commits its own state only after a call succeeds.
///
/// A single implementation may be shared by many circles.
pub trait AssetTransfer: Send + Sync {
    fn rail(&self) -> &'static str;

    /// Move `amount` from a participant into custody.
    fn pull(
        &self,
        asset: &AssetId,
        from: &ParticipantId,
        custody: &CustodyAccount,
        amount: Amount,
    ) -> Result<TransferReceipt, TransferError>;

    /// Move `amount` out of custody to a participant.
    fn push(
        &self,
        asset: &AssetId,
        custody: &CustodyAccount,
        to: &ParticipantId,
        amount: Amount,
    ) -> Result<TransferReceipt, TransferError>;
}
