//! Sidechain lifecycle operations over the overlay cache.
//!
//! Every apply validates the whole transaction or certificate before touching
//! cache state, so a rejection leaves the cache exactly as it was. Applies
//! that overwrite history return an undo record the caller persists with its
//! block-undo data.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use tracing::{debug, error};
use zend_consensus::{
    hash256_to_hex, money_range, ForkSchedule, SC_COIN_MATURITY,
    SC_MAX_WITHDRAWAL_EPOCH_LENGTH, SC_MIN_WITHDRAWAL_EPOCH_LENGTH,
};
use zend_primitives::{Certificate, SidechainId, Transaction};

use crate::cache::CoinsViewCache;
use crate::sidechains::{ActiveCertView, Sidechain, SidechainState};
use crate::undo::{CeasedSidechainUndo, CertificateUndo, SidechainEventsUndo};
use crate::view::{CoinsView, CswNullifierKey, ViewError};

const NULL_HASH: [u8; 32] = [0u8; 32];

#[derive(Debug, thiserror::Error)]
pub enum SidechainError {
    #[error("unknown sidechain {}", hash256_to_hex(.0))]
    UnknownSidechain(SidechainId),
    #[error("sidechain {} already exists", hash256_to_hex(.0))]
    SidechainAlreadyExists(SidechainId),
    #[error("certificate epoch {got} does not follow last referenced epoch {last}")]
    EpochMismatch { last: i32, got: i32 },
    #[error("certificate quality {got} does not beat incumbent quality {incumbent}")]
    InsufficientQuality { incumbent: i64, got: i64 },
    #[error("sidechain balance {available} cannot cover {needed}")]
    InsufficientBalance { available: i64, needed: i64 },
    #[error("sidechain {} is not ceased", hash256_to_hex(.0))]
    NotCeased(SidechainId),
    #[error("sidechain {} has ceased", hash256_to_hex(.0))]
    Ceased(SidechainId),
    #[error("sidechain {} does not support ceased withdrawals", hash256_to_hex(.0))]
    WithdrawalsNotSupported(SidechainId),
    #[error("withdrawal nullifier already spent")]
    NullifierAlreadySpent,
    #[error("backward transfer request carries {got} data fields, sidechain expects {expected}")]
    RequestDataMismatch { expected: usize, got: usize },
    #[error("sidechain features are not active at height {0}")]
    NotActive(i32),
    #[error("sidechain version {got} exceeds the maximum {max} accepted at this height")]
    UnsupportedVersion { max: u8, got: u8 },
    #[error("withdrawal epoch length {got} outside [{min}, {max}]")]
    InvalidEpochLength { min: i32, max: i32, got: i32 },
    #[error("amount outside the valid money range")]
    ValueOutOfRange,
    #[error("inconsistent chain state: {0}")]
    Inconsistent(&'static str),
    #[error(transparent)]
    View(#[from] ViewError),
}

/// Contextual admission check run before a transaction's sidechain sections
/// are applied: every section needs the sidechain fork active, withdrawals
/// additionally need theirs, and creations must not outrun the accepted
/// sidechain version.
pub fn check_tx_against_forks(
    schedule: &ForkSchedule,
    tx: &Transaction,
    height: i32,
) -> Result<(), SidechainError> {
    if !tx.has_sidechain_sections() {
        return Ok(());
    }
    let rules = schedule.rules_at(height);
    if !rules.sidechains_active {
        return Err(SidechainError::NotActive(height));
    }
    if !tx.csw_inputs.is_empty() && !rules.ceased_withdrawals_active {
        return Err(SidechainError::NotActive(height));
    }
    for creation in &tx.sidechain_creations {
        if creation.params.version > rules.max_sidechain_version {
            return Err(SidechainError::UnsupportedVersion {
                max: rules.max_sidechain_version,
                got: creation.params.version,
            });
        }
    }
    Ok(())
}

fn cert_view(cert: &Certificate) -> ActiveCertView {
    ActiveCertView {
        forward_transfer_fee: cert.forward_transfer_fee,
        mbtr_fee: cert.mbtr_fee,
        cert_data_hash: cert.cert_data_hash,
    }
}

impl<V: CoinsView> CoinsViewCache<V> {
    pub fn sidechain_state(
        &mut self,
        sc_id: &SidechainId,
        height: i32,
    ) -> Result<SidechainState, SidechainError> {
        match self.sidechain(sc_id)? {
            Some(record) => Ok(record.state_at(height)),
            None => Ok(SidechainState::NotApplicable),
        }
    }

    /// Certificate view governing fee checks and commitments at `height`.
    pub fn active_cert_view(
        &mut self,
        sc_id: &SidechainId,
        height: i32,
    ) -> Result<ActiveCertView, SidechainError> {
        let Some(record) = self.sidechain(sc_id)? else {
            return Err(SidechainError::UnknownSidechain(*sc_id));
        };
        match record.active_cert_view_at(height) {
            Some(view) => Ok(view.clone()),
            None => {
                error!(
                    sc_id = %hash256_to_hex(sc_id),
                    height,
                    "certificate epoch offset outside {{0, -1}}"
                );
                Err(SidechainError::Inconsistent(
                    "certificate epoch offset outside {0, -1}",
                ))
            }
        }
    }

    /// Forward transfer admissibility: the amount must exceed the active
    /// forward-transfer fee.
    pub fn ft_fee_admissible(
        &mut self,
        sc_id: &SidechainId,
        amount: i64,
        height: i32,
    ) -> Result<bool, SidechainError> {
        let view = self.active_cert_view(sc_id, height)?;
        Ok(amount > view.forward_transfer_fee)
    }

    /// Backward-transfer-request admissibility: the offered fee must reach
    /// the active request fee.
    pub fn mbtr_fee_admissible(
        &mut self,
        sc_id: &SidechainId,
        fee: i64,
        height: i32,
    ) -> Result<bool, SidechainError> {
        let view = self.active_cert_view(sc_id, height)?;
        Ok(fee >= view.mbtr_fee)
    }

    /// Weaker forward-transfer check for block assembly over a possibly stale
    /// mempool view: compares against the lower of the last and past epoch
    /// fees so an epoch rollover does not strand admissible transfers.
    pub fn ft_fee_admissible_for_template(
        &mut self,
        sc_id: &SidechainId,
        amount: i64,
    ) -> Result<bool, SidechainError> {
        let Some(record) = self.sidechain(sc_id)? else {
            return Err(SidechainError::UnknownSidechain(*sc_id));
        };
        let floor = record
            .last_top_quality_cert_view
            .forward_transfer_fee
            .min(record.past_epoch_top_quality_cert_view.forward_transfer_fee);
        Ok(amount > floor)
    }

    pub fn mbtr_fee_admissible_for_template(
        &mut self,
        sc_id: &SidechainId,
        fee: i64,
    ) -> Result<bool, SidechainError> {
        let Some(record) = self.sidechain(sc_id)? else {
            return Err(SidechainError::UnknownSidechain(*sc_id));
        };
        let floor = record
            .last_top_quality_cert_view
            .mbtr_fee
            .min(record.past_epoch_top_quality_cert_view.mbtr_fee);
        Ok(fee >= floor)
    }

    /// Applies the sidechain effects of one transaction at `height`.
    /// The transaction is validated as a whole before any state changes.
    pub fn update_sidechain(
        &mut self,
        tx: &Transaction,
        height: i32,
    ) -> Result<(), SidechainError> {
        self.validate_sidechain_tx(tx, height)?;

        for csw in &tx.csw_inputs {
            self.modify_sidechain(&csw.sc_id, |slot| {
                if let Some(record) = slot {
                    record.balance -= csw.amount;
                }
            })?;
            self.add_csw_nullifier(CswNullifierKey {
                sc_id: csw.sc_id,
                nullifier: csw.nullifier,
            })?;
        }

        let matured_height = height + SC_COIN_MATURITY;
        for creation in &tx.sidechain_creations {
            let mut record = Sidechain::new(height, tx.hash, creation.params.clone());
            record.immature_amounts.insert(matured_height, creation.amount);
            let ceasing_height = record.scheduled_ceasing_height();
            self.modify_sidechain(&creation.sc_id, |slot| *slot = Some(record))?;
            self.modify_sidechain_events(matured_height, |events| {
                events.maturing.insert(creation.sc_id);
            })?;
            self.modify_sidechain_events(ceasing_height, |events| {
                events.ceasing.insert(creation.sc_id);
            })?;
            debug!(
                sc_id = %hash256_to_hex(&creation.sc_id),
                height,
                ceasing_height,
                "sidechain created"
            );
        }

        for transfer in tx
            .forward_transfers
            .iter()
            .map(|ft| (ft.sc_id, ft.amount))
            .chain(
                tx.backward_transfer_requests
                    .iter()
                    .map(|mbtr| (mbtr.sc_id, mbtr.sc_fee)),
            )
        {
            let (sc_id, amount) = transfer;
            self.modify_sidechain(&sc_id, |slot| {
                let Some(record) = slot else {
                    return Err(SidechainError::Inconsistent(
                        "validated transfer targets a missing sidechain",
                    ));
                };
                let pending = record.immature_amounts.entry(matured_height).or_insert(0);
                *pending = pending
                    .checked_add(amount)
                    .ok_or(SidechainError::ValueOutOfRange)?;
                Ok(())
            })??;
            self.modify_sidechain_events(matured_height, |events| {
                events.maturing.insert(sc_id);
            })?;
        }
        Ok(())
    }

    fn validate_sidechain_tx(&mut self, tx: &Transaction, height: i32) -> Result<(), SidechainError> {
        let mut csw_totals: BTreeMap<SidechainId, i64> = BTreeMap::new();
        let mut seen_nullifiers = HashSet::new();
        for csw in &tx.csw_inputs {
            if !money_range(csw.amount) || csw.amount == 0 {
                return Err(SidechainError::ValueOutOfRange);
            }
            let Some(record) = self.sidechain(&csw.sc_id)?.cloned() else {
                return Err(SidechainError::UnknownSidechain(csw.sc_id));
            };
            if record.state_at(height) != SidechainState::Ceased {
                return Err(SidechainError::NotCeased(csw.sc_id));
            }
            if !record.fixed_params.supports_ceased_withdrawals() {
                return Err(SidechainError::WithdrawalsNotSupported(csw.sc_id));
            }
            let key = CswNullifierKey {
                sc_id: csw.sc_id,
                nullifier: csw.nullifier,
            };
            if !seen_nullifiers.insert(key) || self.have_csw_nullifier(&key)? {
                return Err(SidechainError::NullifierAlreadySpent);
            }
            let total = csw_totals.entry(csw.sc_id).or_insert(0);
            *total = total
                .checked_add(csw.amount)
                .ok_or(SidechainError::ValueOutOfRange)?;
            if *total > record.balance {
                return Err(SidechainError::InsufficientBalance {
                    available: record.balance,
                    needed: *total,
                });
            }
        }

        let mut created: BTreeSet<SidechainId> = BTreeSet::new();
        for creation in &tx.sidechain_creations {
            if !money_range(creation.amount) {
                return Err(SidechainError::ValueOutOfRange);
            }
            let epoch_length = creation.params.withdrawal_epoch_length;
            if !(SC_MIN_WITHDRAWAL_EPOCH_LENGTH..=SC_MAX_WITHDRAWAL_EPOCH_LENGTH)
                .contains(&epoch_length)
            {
                return Err(SidechainError::InvalidEpochLength {
                    min: SC_MIN_WITHDRAWAL_EPOCH_LENGTH,
                    max: SC_MAX_WITHDRAWAL_EPOCH_LENGTH,
                    got: epoch_length,
                });
            }
            if !created.insert(creation.sc_id) || self.have_sidechain(&creation.sc_id)? {
                return Err(SidechainError::SidechainAlreadyExists(creation.sc_id));
            }
        }

        for ft in &tx.forward_transfers {
            if !money_range(ft.amount) {
                return Err(SidechainError::ValueOutOfRange);
            }
            self.validate_transfer_target(&ft.sc_id, height, &created)?;
        }
        for mbtr in &tx.backward_transfer_requests {
            if !money_range(mbtr.sc_fee) {
                return Err(SidechainError::ValueOutOfRange);
            }
            self.validate_transfer_target(&mbtr.sc_id, height, &created)?;
            if created.contains(&mbtr.sc_id) {
                continue;
            }
            // The record exists; unwrap-free reread for the request shape.
            if let Some(record) = self.sidechain(&mbtr.sc_id)? {
                let expected = record.fixed_params.mbtr_request_data_length as usize;
                if expected == 0 || mbtr.request_data.len() != expected {
                    return Err(SidechainError::RequestDataMismatch {
                        expected,
                        got: mbtr.request_data.len(),
                    });
                }
            }
        }
        Ok(())
    }

    fn validate_transfer_target(
        &mut self,
        sc_id: &SidechainId,
        height: i32,
        created_in_tx: &BTreeSet<SidechainId>,
    ) -> Result<(), SidechainError> {
        if created_in_tx.contains(sc_id) {
            return Ok(());
        }
        let Some(record) = self.sidechain(sc_id)? else {
            return Err(SidechainError::UnknownSidechain(*sc_id));
        };
        if record.state_at(height) == SidechainState::Ceased {
            return Err(SidechainError::Ceased(*sc_id));
        }
        Ok(())
    }

    /// Reverses the output-side sidechain effects of `tx` connected at
    /// `height`. Creations may only be reverted while the record has never
    /// matured funds.
    pub fn revert_tx_outputs(&mut self, tx: &Transaction, height: i32) -> Result<(), SidechainError> {
        let matured_height = height + SC_COIN_MATURITY;

        for transfer in tx
            .backward_transfer_requests
            .iter()
            .rev()
            .map(|mbtr| (mbtr.sc_id, mbtr.sc_fee))
            .chain(tx.forward_transfers.iter().rev().map(|ft| (ft.sc_id, ft.amount)))
        {
            let (sc_id, amount) = transfer;
            let emptied = self.modify_sidechain(&sc_id, |slot| {
                let Some(record) = slot else {
                    return Err(SidechainError::Inconsistent(
                        "transfer undo targets a missing sidechain",
                    ));
                };
                let Some(pending) = record.immature_amounts.get_mut(&matured_height) else {
                    return Err(SidechainError::Inconsistent(
                        "transfer undo finds no immature amount at the maturity height",
                    ));
                };
                if *pending < amount {
                    return Err(SidechainError::Inconsistent(
                        "transfer undo exceeds the immature amount",
                    ));
                }
                *pending -= amount;
                if *pending == 0 {
                    record.immature_amounts.remove(&matured_height);
                    return Ok(true);
                }
                Ok(false)
            })??;
            if emptied {
                self.modify_sidechain_events(matured_height, |events| {
                    events.maturing.remove(&sc_id);
                })?;
            }
        }

        for creation in tx.sidechain_creations.iter().rev() {
            let Some(record) = self.sidechain(&creation.sc_id)?.cloned() else {
                return Err(SidechainError::Inconsistent(
                    "creation undo targets a missing sidechain",
                ));
            };
            if record.balance != 0 {
                error!(
                    sc_id = %hash256_to_hex(&creation.sc_id),
                    balance = record.balance,
                    "creation undo on a sidechain holding matured funds"
                );
                return Err(SidechainError::Inconsistent(
                    "creation undo on a sidechain holding matured funds",
                ));
            }
            let ceasing_height = record.scheduled_ceasing_height();
            self.modify_sidechain_events(matured_height, |events| {
                events.maturing.remove(&creation.sc_id);
            })?;
            self.modify_sidechain_events(ceasing_height, |events| {
                events.ceasing.remove(&creation.sc_id);
            })?;
            self.modify_sidechain(&creation.sc_id, |slot| *slot = None)?;
        }
        Ok(())
    }

    /// Reverses the ceased-withdrawal inputs of `tx`, restoring balances and
    /// releasing nullifiers.
    pub fn revert_csw_inputs(&mut self, tx: &Transaction) -> Result<(), SidechainError> {
        for csw in tx.csw_inputs.iter().rev() {
            self.modify_sidechain(&csw.sc_id, |slot| {
                let Some(record) = slot else {
                    return Err(SidechainError::Inconsistent(
                        "withdrawal undo targets a missing sidechain",
                    ));
                };
                record.balance = record
                    .balance
                    .checked_add(csw.amount)
                    .ok_or(SidechainError::ValueOutOfRange)?;
                Ok(())
            })??;
            self.remove_csw_nullifier(&CswNullifierKey {
                sc_id: csw.sc_id,
                nullifier: csw.nullifier,
            })?;
        }
        Ok(())
    }

    /// Non-mutating admission filter run ahead of the full certificate apply:
    /// a same-epoch certificate must strictly beat the incumbent's quality.
    pub fn check_certificate_quality(&mut self, cert: &Certificate) -> Result<(), SidechainError> {
        let Some(record) = self.sidechain(&cert.sc_id)? else {
            return Err(SidechainError::UnknownSidechain(cert.sc_id));
        };
        if cert.epoch_number == record.last_top_quality_cert_referenced_epoch
            && cert.quality <= record.last_top_quality_cert_quality
        {
            return Err(SidechainError::InsufficientQuality {
                incumbent: record.last_top_quality_cert_quality,
                got: cert.quality,
            });
        }
        Ok(())
    }

    /// Applies a certificate's effects: quality competition within the
    /// referenced epoch, or promotion to a new epoch with the ceasing
    /// schedule moved. Returns the undo record for the caller's block undo.
    pub fn update_sidechain_for_cert(
        &mut self,
        cert: &Certificate,
    ) -> Result<CertificateUndo, SidechainError> {
        let Some(record) = self.sidechain(&cert.sc_id)?.cloned() else {
            return Err(SidechainError::UnknownSidechain(cert.sc_id));
        };
        let bwt_total = cert.bwt_total().ok_or(SidechainError::ValueOutOfRange)?;
        let last_epoch = record.last_top_quality_cert_referenced_epoch;

        let same_epoch = if cert.epoch_number == last_epoch {
            true
        } else if cert.epoch_number == last_epoch + 1 {
            false
        } else {
            return Err(SidechainError::EpochMismatch {
                last: last_epoch,
                got: cert.epoch_number,
            });
        };

        if same_epoch && cert.quality <= record.last_top_quality_cert_quality {
            return Err(SidechainError::InsufficientQuality {
                incumbent: record.last_top_quality_cert_quality,
                got: cert.quality,
            });
        }
        // Within an epoch the incumbent's payout is credited back first, so
        // the highest-quality certificate never double-pays.
        let restored = if same_epoch {
            record
                .balance
                .checked_add(record.last_top_quality_cert_bwt_amount)
                .ok_or(SidechainError::ValueOutOfRange)?
        } else {
            record.balance
        };
        if restored < bwt_total {
            return Err(SidechainError::InsufficientBalance {
                available: restored,
                needed: bwt_total,
            });
        }

        let undo = CertificateUndo {
            prev_top_quality_cert_hash: record.last_top_quality_cert_hash,
            prev_epoch: last_epoch,
            prev_quality: record.last_top_quality_cert_quality,
            prev_bwt_amount: record.last_top_quality_cert_bwt_amount,
            prev_cert_view: record.last_top_quality_cert_view.clone(),
            prev_past_cert_view: (!same_epoch)
                .then(|| record.past_epoch_top_quality_cert_view.clone()),
        };

        let prev_ceasing_height = record.scheduled_ceasing_height();
        let new_ceasing_height = self.modify_sidechain(&cert.sc_id, |slot| {
            let Some(record) = slot else {
                return None;
            };
            record.balance = restored - bwt_total;
            if !same_epoch {
                record.past_epoch_top_quality_cert_view =
                    record.last_top_quality_cert_view.clone();
            }
            record.last_top_quality_cert_hash = cert.hash;
            record.last_top_quality_cert_referenced_epoch = cert.epoch_number;
            record.last_top_quality_cert_quality = cert.quality;
            record.last_top_quality_cert_bwt_amount = bwt_total;
            record.last_top_quality_cert_view = cert_view(cert);
            Some(record.scheduled_ceasing_height())
        })?;
        let Some(new_ceasing_height) = new_ceasing_height else {
            return Err(SidechainError::Inconsistent(
                "sidechain vanished during certificate apply",
            ));
        };

        if !same_epoch {
            self.modify_sidechain_events(prev_ceasing_height, |events| {
                events.ceasing.remove(&cert.sc_id);
            })?;
            self.modify_sidechain_events(new_ceasing_height, |events| {
                events.ceasing.insert(cert.sc_id);
            })?;
            debug!(
                sc_id = %hash256_to_hex(&cert.sc_id),
                epoch = cert.epoch_number,
                prev_ceasing_height,
                new_ceasing_height,
                "ceasing schedule moved"
            );
        }
        Ok(undo)
    }

    /// Exact inverse of `update_sidechain_for_cert`. The certificate being
    /// undone must be the recorded top-quality certificate and the undo must
    /// match one of the two valid epoch patterns.
    pub fn revert_certificate(
        &mut self,
        cert: &Certificate,
        undo: &CertificateUndo,
    ) -> Result<(), SidechainError> {
        let Some(record) = self.sidechain(&cert.sc_id)?.cloned() else {
            return Err(SidechainError::Inconsistent(
                "certificate undo targets a missing sidechain",
            ));
        };
        if record.last_top_quality_cert_hash != cert.hash
            || record.last_top_quality_cert_referenced_epoch != cert.epoch_number
            || record.last_top_quality_cert_quality != cert.quality
        {
            error!(
                sc_id = %hash256_to_hex(&cert.sc_id),
                "certificate undo does not match the recorded top-quality certificate"
            );
            return Err(SidechainError::Inconsistent(
                "certificate undo does not match the recorded top-quality certificate",
            ));
        }
        let same_epoch = undo.prev_epoch == cert.epoch_number;
        let cross_epoch = undo.prev_epoch == cert.epoch_number - 1;
        if !same_epoch && !cross_epoch {
            return Err(SidechainError::Inconsistent(
                "certificate undo epoch lineage is invalid",
            ));
        }
        if same_epoch != undo.prev_past_cert_view.is_none() {
            return Err(SidechainError::Inconsistent(
                "certificate undo promotion marker disagrees with its epochs",
            ));
        }

        let restored = record
            .balance
            .checked_add(record.last_top_quality_cert_bwt_amount)
            .ok_or(SidechainError::ValueOutOfRange)?;
        let balance = if same_epoch {
            let balance = restored - undo.prev_bwt_amount;
            if balance < 0 {
                return Err(SidechainError::Inconsistent(
                    "certificate undo would drive the balance negative",
                ));
            }
            balance
        } else {
            restored
        };

        let current_ceasing_height = record.scheduled_ceasing_height();
        let restored_ceasing_height = self.modify_sidechain(&cert.sc_id, |slot| {
            let Some(record) = slot else {
                return None;
            };
            record.balance = balance;
            record.last_top_quality_cert_hash = undo.prev_top_quality_cert_hash;
            record.last_top_quality_cert_referenced_epoch = undo.prev_epoch;
            record.last_top_quality_cert_quality = undo.prev_quality;
            record.last_top_quality_cert_bwt_amount = undo.prev_bwt_amount;
            record.last_top_quality_cert_view = undo.prev_cert_view.clone();
            if let Some(past_view) = &undo.prev_past_cert_view {
                record.past_epoch_top_quality_cert_view = past_view.clone();
            }
            Some(record.scheduled_ceasing_height())
        })?;
        let Some(restored_ceasing_height) = restored_ceasing_height else {
            return Err(SidechainError::Inconsistent(
                "sidechain vanished during certificate undo",
            ));
        };

        if cross_epoch {
            self.modify_sidechain_events(current_ceasing_height, |events| {
                events.ceasing.remove(&cert.sc_id);
            })?;
            self.modify_sidechain_events(restored_ceasing_height, |events| {
                events.ceasing.insert(cert.sc_id);
            })?;
        }
        Ok(())
    }

    /// Applies every maturation and ceasing event scheduled at `height` and
    /// deletes the event record. The returned undo recreates both exactly.
    pub fn handle_sidechain_events(
        &mut self,
        height: i32,
    ) -> Result<SidechainEventsUndo, SidechainError> {
        let Some(events) = self.sidechain_events(height)?.cloned() else {
            return Ok(SidechainEventsUndo::default());
        };
        let mut undo = SidechainEventsUndo::default();

        for sc_id in &events.maturing {
            let amount = self.modify_sidechain(sc_id, |slot| {
                let Some(record) = slot else {
                    return Err(SidechainError::Inconsistent(
                        "maturation event targets a missing sidechain",
                    ));
                };
                let Some(amount) = record.immature_amounts.remove(&height) else {
                    return Err(SidechainError::Inconsistent(
                        "maturation event finds no immature amount",
                    ));
                };
                record.balance = record
                    .balance
                    .checked_add(amount)
                    .ok_or(SidechainError::ValueOutOfRange)?;
                Ok(amount)
            })??;
            undo.matured.push((*sc_id, amount));
            debug!(sc_id = %hash256_to_hex(sc_id), height, amount, "sidechain amount matured");
        }

        for sc_id in &events.ceasing {
            let Some(record) = self.sidechain(sc_id)?.cloned() else {
                return Err(SidechainError::Inconsistent(
                    "ceasing event targets a missing sidechain",
                ));
            };
            let cert_hash = record.last_top_quality_cert_hash;
            let voided = if cert_hash != NULL_HASH {
                match self.access_coins(&cert_hash)?.cloned() {
                    Some(coin) => {
                        self.modify_coins(&cert_hash, |c| c.void_backward_transfers())?;
                        Some((cert_hash, coin))
                    }
                    None => None,
                }
            } else {
                None
            };
            undo.ceased.push(CeasedSidechainUndo {
                sc_id: *sc_id,
                voided,
            });
            debug!(sc_id = %hash256_to_hex(sc_id), height, "sidechain ceased");
        }

        self.modify_sidechain_events(height, |events| {
            events.maturing.clear();
            events.ceasing.clear();
        })?;
        Ok(undo)
    }

    /// Restores the state consumed by `handle_sidechain_events(height)`,
    /// recreating the event record if anything was scheduled.
    pub fn revert_sidechain_events(
        &mut self,
        height: i32,
        undo: &SidechainEventsUndo,
    ) -> Result<(), SidechainError> {
        for entry in undo.ceased.iter().rev() {
            if let Some((cert_hash, coin)) = &entry.voided {
                self.modify_coins(cert_hash, |c| *c = coin.clone())?;
            }
            self.modify_sidechain_events(height, |events| {
                events.ceasing.insert(entry.sc_id);
            })?;
        }
        for (sc_id, amount) in undo.matured.iter().rev() {
            self.modify_sidechain(sc_id, |slot| {
                let Some(record) = slot else {
                    return Err(SidechainError::Inconsistent(
                        "maturation undo targets a missing sidechain",
                    ));
                };
                if record.balance < *amount {
                    return Err(SidechainError::Inconsistent(
                        "maturation undo would drive the balance negative",
                    ));
                }
                record.balance -= amount;
                *record.immature_amounts.entry(height).or_insert(0) += amount;
                Ok(())
            })??;
            self.modify_sidechain_events(height, |events| {
                events.maturing.insert(*sc_id);
            })?;
        }
        Ok(())
    }
}

/// Read-only sidechain queries needed by inspection tooling, split from the
/// full engine so tools can run over any view implementation.
pub trait SidechainStateQuery {
    fn query_sidechain_state(
        &mut self,
        sc_id: &SidechainId,
        height: i32,
    ) -> Result<SidechainState, SidechainError>;
    fn query_active_cert_view(
        &mut self,
        sc_id: &SidechainId,
        height: i32,
    ) -> Result<ActiveCertView, SidechainError>;
}

impl<V: CoinsView> SidechainStateQuery for CoinsViewCache<V> {
    fn query_sidechain_state(
        &mut self,
        sc_id: &SidechainId,
        height: i32,
    ) -> Result<SidechainState, SidechainError> {
        self.sidechain_state(sc_id, height)
    }

    fn query_active_cert_view(
        &mut self,
        sc_id: &SidechainId,
        height: i32,
    ) -> Result<ActiveCertView, SidechainError> {
        self.active_cert_view(sc_id, height)
    }
}

/// Static read path over a bare view, for tools that never mutate state and
/// do not want cache bookkeeping.
pub struct SidechainInspector<V> {
    view: V,
}

impl<V: CoinsView> SidechainInspector<V> {
    pub fn new(view: V) -> Self {
        Self { view }
    }
}

impl<V: CoinsView> SidechainStateQuery for SidechainInspector<V> {
    fn query_sidechain_state(
        &mut self,
        sc_id: &SidechainId,
        height: i32,
    ) -> Result<SidechainState, SidechainError> {
        match self.view.get_sidechain(sc_id)? {
            Some(record) => Ok(record.state_at(height)),
            None => Ok(SidechainState::NotApplicable),
        }
    }

    fn query_active_cert_view(
        &mut self,
        sc_id: &SidechainId,
        height: i32,
    ) -> Result<ActiveCertView, SidechainError> {
        let Some(record) = self.view.get_sidechain(sc_id)? else {
            return Err(SidechainError::UnknownSidechain(*sc_id));
        };
        match record.active_cert_view_at(height) {
            Some(view) => Ok(view.clone()),
            None => Err(SidechainError::Inconsistent(
                "certificate epoch offset outside {0, -1}",
            )),
        }
    }
}
