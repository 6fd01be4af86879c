//! Undo records for reorg-reversible sidechain operations.
//!
//! Transaction effects invert from the transaction itself; certificates and
//! scheduled events overwrite state that cannot be recomputed, so their apply
//! operations capture these records for the caller's block-undo data.

use zend_consensus::Hash256;
use zend_primitives::{DecodeError, Decoder, Encoder, SidechainId};

use crate::coins::Coin;
use crate::sidechains::ActiveCertView;

/// Prior certificate-history fields of a sidechain, captured before a
/// certificate is applied. `prev_past_cert_view` is present exactly when the
/// apply advanced the referenced epoch.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CertificateUndo {
    pub prev_top_quality_cert_hash: Hash256,
    pub prev_epoch: i32,
    pub prev_quality: i64,
    pub prev_bwt_amount: i64,
    pub prev_cert_view: ActiveCertView,
    pub prev_past_cert_view: Option<ActiveCertView>,
}

impl CertificateUndo {
    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.write_hash(&self.prev_top_quality_cert_hash);
        encoder.write_i32_le(self.prev_epoch);
        encoder.write_i64_le(self.prev_quality);
        encoder.write_i64_le(self.prev_bwt_amount);
        self.prev_cert_view.encode_into(&mut encoder);
        match &self.prev_past_cert_view {
            Some(view) => {
                encoder.write_bool(true);
                view.encode_into(&mut encoder);
            }
            None => encoder.write_bool(false),
        }
        encoder.into_inner()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let prev_top_quality_cert_hash = decoder.read_hash()?;
        let prev_epoch = decoder.read_i32_le()?;
        let prev_quality = decoder.read_i64_le()?;
        let prev_bwt_amount = decoder.read_i64_le()?;
        let prev_cert_view = ActiveCertView::decode_from(&mut decoder)?;
        let prev_past_cert_view = if decoder.read_bool()? {
            Some(ActiveCertView::decode_from(&mut decoder)?)
        } else {
            None
        };
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(Self {
            prev_top_quality_cert_hash,
            prev_epoch,
            prev_quality,
            prev_bwt_amount,
            prev_cert_view,
            prev_past_cert_view,
        })
    }
}

/// One ceased sidechain at an event height. If a top-quality certificate
/// existed, its coin is captured as it was before its backward transfers were
/// voided.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CeasedSidechainUndo {
    pub sc_id: SidechainId,
    pub voided: Option<(Hash256, Coin)>,
}

/// Everything needed to reverse one height's scheduled-event application and
/// recreate the event record exactly.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SidechainEventsUndo {
    /// Sidechain ids whose immature amount matured, with the amount folded.
    pub matured: Vec<(SidechainId, i64)>,
    pub ceased: Vec<CeasedSidechainUndo>,
}

impl SidechainEventsUndo {
    pub fn is_empty(&self) -> bool {
        self.matured.is_empty() && self.ceased.is_empty()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.write_varint(self.matured.len() as u64);
        for (sc_id, amount) in &self.matured {
            encoder.write_hash(sc_id);
            encoder.write_i64_le(*amount);
        }
        encoder.write_varint(self.ceased.len() as u64);
        for entry in &self.ceased {
            encoder.write_hash(&entry.sc_id);
            match &entry.voided {
                Some((cert_hash, coin)) => {
                    encoder.write_bool(true);
                    encoder.write_hash(cert_hash);
                    encoder.write_var_bytes(&coin.encode());
                }
                None => encoder.write_bool(false),
            }
        }
        encoder.into_inner()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let matured_len = decoder.read_varint()?;
        let mut matured = Vec::new();
        for _ in 0..matured_len {
            let sc_id = decoder.read_hash()?;
            let amount = decoder.read_i64_le()?;
            matured.push((sc_id, amount));
        }
        let ceased_len = decoder.read_varint()?;
        let mut ceased = Vec::new();
        for _ in 0..ceased_len {
            let sc_id = decoder.read_hash()?;
            let voided = if decoder.read_bool()? {
                let cert_hash = decoder.read_hash()?;
                let coin = Coin::decode(&decoder.read_var_bytes()?)?;
                Some((cert_hash, coin))
            } else {
                None
            };
            ceased.push(CeasedSidechainUndo { sc_id, voided });
        }
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(Self { matured, ceased })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zend_primitives::TxOut;

    #[test]
    fn certificate_undo_roundtrip() {
        let undo = CertificateUndo {
            prev_top_quality_cert_hash: [7; 32],
            prev_epoch: 3,
            prev_quality: 55,
            prev_bwt_amount: 1200,
            prev_cert_view: ActiveCertView {
                forward_transfer_fee: 10,
                mbtr_fee: 20,
                cert_data_hash: [9; 32],
            },
            prev_past_cert_view: Some(ActiveCertView::default()),
        };
        assert_eq!(CertificateUndo::decode(&undo.encode()).expect("decode"), undo);

        let no_promotion = CertificateUndo {
            prev_past_cert_view: None,
            ..undo
        };
        assert_eq!(
            CertificateUndo::decode(&no_promotion.encode()).expect("decode"),
            no_promotion
        );
    }

    #[test]
    fn events_undo_roundtrip() {
        let undo = SidechainEventsUndo {
            matured: vec![([1; 32], 500), ([2; 32], 41)],
            ceased: vec![
                CeasedSidechainUndo {
                    sc_id: [3; 32],
                    voided: Some((
                        [4; 32],
                        Coin {
                            is_coin_base: false,
                            outputs: vec![Some(TxOut {
                                value: 9,
                                script_pubkey: vec![0x51],
                            })],
                            origin_height: 12,
                            source_version: -5,
                            first_bwt_index: Some(0),
                            bwt_maturity_height: 14,
                        },
                    )),
                },
                CeasedSidechainUndo {
                    sc_id: [5; 32],
                    voided: None,
                },
            ],
        };
        assert_eq!(
            SidechainEventsUndo::decode(&undo.encode()).expect("decode"),
            undo
        );
        assert!(SidechainEventsUndo::default().is_empty());
    }
}
