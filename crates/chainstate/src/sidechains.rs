//! The per-sidechain ledger record and its epoch arithmetic.

use std::collections::BTreeMap;

use zend_consensus::{submission_window_length, Hash256, EPOCH_NULL, QUALITY_NULL};
use zend_primitives::{DecodeError, Decoder, Encoder, FieldElement, SidechainFixedParams};

/// Lifecycle state of a sidechain at a given mainchain height.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SidechainState {
    /// No record for the id.
    NotApplicable,
    /// Record exists but the creating transaction is not chain-confirmed yet;
    /// only reachable through mempool-layered caches.
    Unconfirmed,
    Alive,
    Ceased,
}

/// Fee/commitment data published by a certificate, retained per epoch so that
/// fee checks keep a stable reference across the epoch boundary.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ActiveCertView {
    pub forward_transfer_fee: i64,
    pub mbtr_fee: i64,
    pub cert_data_hash: FieldElement,
}

impl ActiveCertView {
    pub(crate) fn encode_into(&self, encoder: &mut Encoder) {
        encoder.write_i64_le(self.forward_transfer_fee);
        encoder.write_i64_le(self.mbtr_fee);
        encoder.write_hash(&self.cert_data_hash);
    }

    pub(crate) fn decode_from(decoder: &mut Decoder<'_>) -> Result<Self, DecodeError> {
        let forward_transfer_fee = decoder.read_i64_le()?;
        let mbtr_fee = decoder.read_i64_le()?;
        let cert_data_hash = decoder.read_hash()?;
        Ok(Self {
            forward_transfer_fee,
            mbtr_fee,
            cert_data_hash,
        })
    }
}

/// Ledger record for one sidechain.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Sidechain {
    pub creation_height: i32,
    pub creation_tx_hash: Hash256,
    pub balance: i64,
    /// Set once at creation, never mutated afterwards.
    pub fixed_params: SidechainFixedParams,
    pub last_top_quality_cert_hash: Hash256,
    pub last_top_quality_cert_referenced_epoch: i32,
    pub last_top_quality_cert_quality: i64,
    pub last_top_quality_cert_bwt_amount: i64,
    pub last_top_quality_cert_view: ActiveCertView,
    /// View of the previous epoch's top certificate; stays authoritative during
    /// the next epoch's submission window and after ceasing.
    pub past_epoch_top_quality_cert_view: ActiveCertView,
    /// Amounts waiting to mature, keyed by maturity height.
    pub immature_amounts: BTreeMap<i32, i64>,
}

impl Sidechain {
    pub fn new(creation_height: i32, creation_tx_hash: Hash256, params: SidechainFixedParams) -> Self {
        Self {
            creation_height,
            creation_tx_hash,
            balance: 0,
            fixed_params: params,
            last_top_quality_cert_hash: [0u8; 32],
            last_top_quality_cert_referenced_epoch: EPOCH_NULL,
            last_top_quality_cert_quality: QUALITY_NULL,
            last_top_quality_cert_bwt_amount: 0,
            last_top_quality_cert_view: ActiveCertView::default(),
            past_epoch_top_quality_cert_view: ActiveCertView::default(),
            immature_amounts: BTreeMap::new(),
        }
    }

    pub fn epoch_length(&self) -> i32 {
        self.fixed_params.withdrawal_epoch_length
    }

    /// First height of withdrawal epoch `epoch`; epoch 0 starts at creation.
    pub fn start_height_for_epoch(&self, epoch: i32) -> i32 {
        self.creation_height + epoch * self.epoch_length()
    }

    /// Withdrawal epoch containing `height`. Heights below the creation
    /// height clamp to epoch 0; a degenerate epoch length stored by a
    /// corrupted record is treated as 1 rather than faulting.
    pub fn epoch_for(&self, height: i32) -> i32 {
        (height - self.creation_height).max(0) / self.epoch_length().max(1)
    }

    /// First height at which certificates for `epoch` are accepted: the start
    /// of the following epoch.
    pub fn submission_window_start(&self, epoch: i32) -> i32 {
        self.start_height_for_epoch(epoch + 1)
    }

    /// Last height at which certificates for `epoch` are accepted.
    pub fn submission_window_end(&self, epoch: i32) -> i32 {
        self.submission_window_start(epoch) + submission_window_length(self.epoch_length()) - 1
    }

    /// Whether `height` falls inside the submission window open at that height
    /// (the window accepting certificates for the previous epoch).
    pub fn is_in_submission_window(&self, height: i32) -> bool {
        if height < self.start_height_for_epoch(1) {
            // Epoch 0 has no preceding epoch to certify.
            return false;
        }
        let prev_epoch = self.epoch_for(height) - 1;
        height >= self.submission_window_start(prev_epoch)
            && height <= self.submission_window_end(prev_epoch)
    }

    /// Height at which the sidechain ceases unless a certificate for the epoch
    /// after the last referenced one arrives in time. Recomputed whenever the
    /// referenced epoch advances.
    pub fn scheduled_ceasing_height(&self) -> i32 {
        self.submission_window_end(self.last_top_quality_cert_referenced_epoch + 1) + 1
    }

    /// Certificate view governing fee checks and commitments at `height`.
    ///
    /// During the submission window of an epoch the previous epoch's view
    /// stays authoritative even if a newer certificate already arrived.
    /// Returns `None` when the offset between the last referenced epoch and
    /// the epoch being certified falls outside `{0, -1}`, which can only
    /// happen on a corrupted record.
    pub fn active_cert_view_at(&self, height: i32) -> Option<&ActiveCertView> {
        if self.state_at(height) == SidechainState::Ceased {
            return Some(&self.past_epoch_top_quality_cert_view);
        }
        let offset = self.last_top_quality_cert_referenced_epoch - (self.epoch_for(height) - 1);
        match offset {
            0 if self.is_in_submission_window(height) => {
                Some(&self.past_epoch_top_quality_cert_view)
            }
            0 | -1 => Some(&self.last_top_quality_cert_view),
            _ => None,
        }
    }

    pub fn state_at(&self, height: i32) -> SidechainState {
        if height < self.creation_height {
            SidechainState::Unconfirmed
        } else if height >= self.scheduled_ceasing_height() {
            SidechainState::Ceased
        } else {
            SidechainState::Alive
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.write_i32_le(self.creation_height);
        encoder.write_hash(&self.creation_tx_hash);
        encoder.write_i64_le(self.balance);
        self.fixed_params.encode_into(&mut encoder);
        encoder.write_hash(&self.last_top_quality_cert_hash);
        encoder.write_i32_le(self.last_top_quality_cert_referenced_epoch);
        encoder.write_i64_le(self.last_top_quality_cert_quality);
        encoder.write_i64_le(self.last_top_quality_cert_bwt_amount);
        self.last_top_quality_cert_view.encode_into(&mut encoder);
        self.past_epoch_top_quality_cert_view.encode_into(&mut encoder);
        encoder.write_varint(self.immature_amounts.len() as u64);
        for (height, amount) in &self.immature_amounts {
            encoder.write_i32_le(*height);
            encoder.write_i64_le(*amount);
        }
        encoder.into_inner()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let creation_height = decoder.read_i32_le()?;
        let creation_tx_hash = decoder.read_hash()?;
        let balance = decoder.read_i64_le()?;
        let fixed_params = SidechainFixedParams::decode_from(&mut decoder)?;
        let last_top_quality_cert_hash = decoder.read_hash()?;
        let last_top_quality_cert_referenced_epoch = decoder.read_i32_le()?;
        let last_top_quality_cert_quality = decoder.read_i64_le()?;
        let last_top_quality_cert_bwt_amount = decoder.read_i64_le()?;
        let last_top_quality_cert_view = ActiveCertView::decode_from(&mut decoder)?;
        let past_epoch_top_quality_cert_view = ActiveCertView::decode_from(&mut decoder)?;
        let count = decoder.read_varint()?;
        let mut immature_amounts = BTreeMap::new();
        for _ in 0..count {
            let height = decoder.read_i32_le()?;
            let amount = decoder.read_i64_le()?;
            immature_amounts.insert(height, amount);
        }
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(Self {
            creation_height,
            creation_tx_hash,
            balance,
            fixed_params,
            last_top_quality_cert_hash,
            last_top_quality_cert_referenced_epoch,
            last_top_quality_cert_quality,
            last_top_quality_cert_bwt_amount,
            last_top_quality_cert_view,
            past_epoch_top_quality_cert_view,
            immature_amounts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(epoch_length: i32) -> SidechainFixedParams {
        SidechainFixedParams {
            version: 0,
            withdrawal_epoch_length: epoch_length,
            cert_vk: vec![0xaa; 8],
            csw_vk: vec![0xbb; 8],
            mbtr_request_data_length: 1,
            custom_field_sizes: Vec::new(),
        }
    }

    fn sidechain() -> Sidechain {
        Sidechain::new(100, [9; 32], params(10))
    }

    #[test]
    fn epoch_boundaries() {
        let sc = sidechain();
        assert_eq!(sc.start_height_for_epoch(0), 100);
        assert_eq!(sc.start_height_for_epoch(1), 110);
        assert_eq!(sc.epoch_for(100), 0);
        assert_eq!(sc.epoch_for(109), 0);
        assert_eq!(sc.epoch_for(110), 1);
    }

    #[test]
    fn epoch_for_is_total_over_degenerate_inputs() {
        let sc = sidechain();
        assert_eq!(sc.epoch_for(99), 0);
        assert_eq!(sc.epoch_for(0), 0);
        let broken = Sidechain::new(100, [9; 32], params(0));
        assert_eq!(broken.epoch_for(150), 50);
    }

    #[test]
    fn submission_window_covers_epoch_start() {
        let sc = sidechain();
        // Certificates for epoch 0 are accepted at the first two blocks of epoch 1.
        assert_eq!(sc.submission_window_start(0), 110);
        assert_eq!(sc.submission_window_end(0), 111);
        assert!(!sc.is_in_submission_window(109));
        assert!(sc.is_in_submission_window(110));
        assert!(sc.is_in_submission_window(111));
        assert!(!sc.is_in_submission_window(112));
        assert!(!sc.is_in_submission_window(105));
    }

    #[test]
    fn initial_ceasing_height_follows_first_window() {
        let sc = sidechain();
        // No certificate yet: ceases right after epoch 0's window closes.
        assert_eq!(sc.scheduled_ceasing_height(), 112);
        assert_eq!(sc.state_at(99), SidechainState::Unconfirmed);
        assert_eq!(sc.state_at(100), SidechainState::Alive);
        assert_eq!(sc.state_at(111), SidechainState::Alive);
        assert_eq!(sc.state_at(112), SidechainState::Ceased);
    }

    #[test]
    fn ceasing_height_moves_with_referenced_epoch() {
        let mut sc = sidechain();
        sc.last_top_quality_cert_referenced_epoch = 0;
        assert_eq!(sc.scheduled_ceasing_height(), 122);
        sc.last_top_quality_cert_referenced_epoch = 1;
        assert_eq!(sc.scheduled_ceasing_height(), 132);
    }

    #[test]
    fn encode_roundtrip() {
        let mut sc = sidechain();
        sc.balance = 12_345;
        sc.last_top_quality_cert_hash = [7; 32];
        sc.last_top_quality_cert_referenced_epoch = 3;
        sc.last_top_quality_cert_quality = 42;
        sc.last_top_quality_cert_bwt_amount = 1_000;
        sc.last_top_quality_cert_view = ActiveCertView {
            forward_transfer_fee: 11,
            mbtr_fee: 13,
            cert_data_hash: [5; 32],
        };
        sc.immature_amounts.insert(120, 77);
        sc.immature_amounts.insert(130, 88);
        let decoded = Sidechain::decode(&sc.encode()).expect("decode");
        assert_eq!(decoded, sc);
    }
}
