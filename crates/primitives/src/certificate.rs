//! Withdrawal certificate structure as consumed by the state engine.

use crate::transaction::{FieldElement, SidechainId, TxOut};
use zend_consensus::Hash256;

/// A withdrawal certificate for one sidechain epoch.
///
/// Outputs are ordered: change outputs first, then the backward transfers
/// starting at `first_bwt_index`. The zero-knowledge proof is verified upstream;
/// here only the quality/epoch/fee payload matters.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Certificate {
    pub hash: Hash256,
    pub sc_id: SidechainId,
    pub epoch_number: i32,
    pub quality: i64,
    /// Forward transfer fee the sidechain charges while this certificate's
    /// view is active.
    pub forward_transfer_fee: i64,
    /// Backward transfer request fee while this certificate's view is active.
    pub mbtr_fee: i64,
    /// Commitment to the certificate's custom data, used for csw proofs.
    pub cert_data_hash: FieldElement,
    pub vout: Vec<TxOut>,
    pub first_bwt_index: usize,
}

impl Certificate {
    pub fn backward_transfers(&self) -> &[TxOut] {
        &self.vout[self.first_bwt_index.min(self.vout.len())..]
    }

    /// Total amount paid out by the backward transfers.
    pub fn bwt_total(&self) -> Option<i64> {
        self.backward_transfers()
            .iter()
            .try_fold(0i64, |total, out| total.checked_add(out.value))
    }
}
