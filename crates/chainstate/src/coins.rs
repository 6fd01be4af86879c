//! The unspent-output bundle surviving from one transaction or certificate.

use zend_primitives::{Certificate, DecodeError, Decoder, Encoder, Transaction, TxOut};

/// Unspent outputs of a single transaction/certificate, keyed by its hash.
///
/// Output slots are nulled as they are spent; trailing nulls are trimmed so a
/// fully spent bundle collapses to the pruned (empty) form.
#[derive(Clone, Debug, Default)]
pub struct Coin {
    pub is_coin_base: bool,
    pub outputs: Vec<Option<TxOut>>,
    pub origin_height: i32,
    pub source_version: i32,
    /// Index of the first backward transfer output, for certificate coins.
    pub first_bwt_index: Option<u32>,
    /// Height at which the backward transfer outputs become spendable.
    pub bwt_maturity_height: i32,
}

impl PartialEq for Coin {
    fn eq(&self, other: &Self) -> bool {
        // Pruned coins are interchangeable whatever their metadata says.
        if self.is_pruned() && other.is_pruned() {
            return true;
        }
        self.is_coin_base == other.is_coin_base
            && self.outputs == other.outputs
            && self.origin_height == other.origin_height
            && self.source_version == other.source_version
            && self.first_bwt_index == other.first_bwt_index
            && self.bwt_maturity_height == other.bwt_maturity_height
    }
}

impl Eq for Coin {}

impl Coin {
    pub fn from_tx(tx: &Transaction, height: i32) -> Self {
        let mut coin = Self {
            is_coin_base: tx.is_coin_base,
            outputs: tx.vout.iter().cloned().map(Some).collect(),
            origin_height: height,
            source_version: tx.version,
            first_bwt_index: None,
            bwt_maturity_height: 0,
        };
        coin.cleanup();
        coin
    }

    /// Builds the coin left behind by an accepted certificate.
    ///
    /// For a certificate superseded within its epoch (`top_quality` false) the
    /// backward transfer slots are pre-spent: only the change outputs survive.
    pub fn from_certificate(
        cert: &Certificate,
        height: i32,
        bwt_maturity_height: i32,
        top_quality: bool,
    ) -> Self {
        let first_bwt = cert.first_bwt_index.min(cert.vout.len());
        let outputs = cert
            .vout
            .iter()
            .enumerate()
            .map(|(index, out)| {
                if index >= first_bwt && !top_quality {
                    None
                } else {
                    Some(out.clone())
                }
            })
            .collect();
        let mut coin = Self {
            is_coin_base: false,
            outputs,
            origin_height: height,
            source_version: cert_source_version(),
            first_bwt_index: Some(first_bwt as u32),
            bwt_maturity_height,
        };
        coin.cleanup();
        coin
    }

    pub fn is_pruned(&self) -> bool {
        self.outputs.iter().all(|out| out.is_none())
    }

    /// Trims trailing null output slots; a fully spent coin becomes empty.
    pub fn cleanup(&mut self) {
        while matches!(self.outputs.last(), Some(None)) {
            self.outputs.pop();
        }
        if self.outputs.is_empty() {
            self.outputs.shrink_to_fit();
        }
    }

    pub fn is_available(&self, index: usize) -> bool {
        self.outputs.get(index).is_some_and(|out| out.is_some())
    }

    /// Nulls one output slot, returning the spent output.
    pub fn spend(&mut self, index: usize) -> Option<TxOut> {
        let spent = self.outputs.get_mut(index)?.take();
        self.cleanup();
        spent
    }

    /// Nulls every backward-transfer output, used when the originating
    /// sidechain ceases before the transfers matured.
    pub fn void_backward_transfers(&mut self) {
        if let Some(first_bwt) = self.first_bwt_index {
            for out in self.outputs.iter_mut().skip(first_bwt as usize) {
                *out = None;
            }
            self.cleanup();
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.write_bool(self.is_coin_base);
        encoder.write_i32_le(self.origin_height);
        encoder.write_i32_le(self.source_version);
        encoder.write_varint(self.outputs.len() as u64);
        for output in &self.outputs {
            match output {
                Some(out) => {
                    encoder.write_bool(true);
                    out.encode_into(&mut encoder);
                }
                None => encoder.write_bool(false),
            }
        }
        // Certificate coins carry two extra trailing fields; their absence is
        // how ordinary coins are recognized on decode. Durable-format rule.
        if let Some(first_bwt) = self.first_bwt_index {
            encoder.write_u32_le(first_bwt);
            encoder.write_i32_le(self.bwt_maturity_height);
        }
        encoder.into_inner()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let is_coin_base = decoder.read_bool()?;
        let origin_height = decoder.read_i32_le()?;
        let source_version = decoder.read_i32_le()?;
        let count = decoder.read_varint()?;
        let count = usize::try_from(count).map_err(|_| DecodeError::InvalidLength)?;
        let mut outputs = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            if decoder.read_bool()? {
                outputs.push(Some(TxOut::decode_from(&mut decoder)?));
            } else {
                outputs.push(None);
            }
        }
        let (first_bwt_index, bwt_maturity_height) = if decoder.is_empty() {
            (None, 0)
        } else {
            let index = decoder.read_u32_le()?;
            let maturity = decoder.read_i32_le()?;
            (Some(index), maturity)
        };
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(Self {
            is_coin_base,
            outputs,
            origin_height,
            source_version,
            first_bwt_index,
            bwt_maturity_height,
        })
    }
}

fn cert_source_version() -> i32 {
    // Certificates share one fixed source version in the coin format.
    -5
}

#[cfg(test)]
mod tests {
    use super::*;

    fn out(value: i64) -> TxOut {
        TxOut {
            value,
            script_pubkey: vec![0x51],
        }
    }

    fn coin_with(outputs: Vec<Option<TxOut>>) -> Coin {
        Coin {
            is_coin_base: false,
            outputs,
            origin_height: 100,
            source_version: 1,
            first_bwt_index: None,
            bwt_maturity_height: 0,
        }
    }

    #[test]
    fn pruned_coins_compare_equal_regardless_of_metadata() {
        let a = Coin {
            is_coin_base: true,
            outputs: vec![],
            origin_height: 7,
            source_version: 1,
            first_bwt_index: None,
            bwt_maturity_height: 0,
        };
        let b = Coin {
            is_coin_base: false,
            outputs: vec![None, None],
            origin_height: 900,
            source_version: 4,
            first_bwt_index: Some(1),
            bwt_maturity_height: 950,
        };
        assert_eq!(a, b);
    }

    #[test]
    fn cleanup_trims_trailing_nulls_only() {
        let mut coin = coin_with(vec![None, Some(out(5)), None, None]);
        coin.cleanup();
        assert_eq!(coin.outputs.len(), 2);
        assert!(coin.outputs[0].is_none());
        assert!(coin.outputs[1].is_some());
    }

    #[test]
    fn spend_prunes_when_last_output_goes() {
        let mut coin = coin_with(vec![Some(out(5)), Some(out(7))]);
        assert_eq!(coin.spend(1).map(|o| o.value), Some(7));
        assert!(!coin.is_pruned());
        assert_eq!(coin.spend(0).map(|o| o.value), Some(5));
        assert!(coin.is_pruned());
        assert!(coin.outputs.is_empty());
        assert_eq!(coin.spend(0), None);
    }

    #[test]
    fn certificate_coin_pre_spends_bwts_when_superseded() {
        let cert = Certificate {
            hash: [1; 32],
            sc_id: [2; 32],
            epoch_number: 0,
            quality: 3,
            forward_transfer_fee: 0,
            mbtr_fee: 0,
            cert_data_hash: [0; 32],
            vout: vec![out(1), out(2), out(3)],
            first_bwt_index: 1,
        };
        let top = Coin::from_certificate(&cert, 200, 210, true);
        assert!(top.is_available(1) && top.is_available(2));
        assert_eq!(top.first_bwt_index, Some(1));

        let superseded = Coin::from_certificate(&cert, 200, 210, false);
        assert!(superseded.is_available(0));
        assert!(!superseded.is_available(1) && !superseded.is_available(2));
    }

    #[test]
    fn encode_roundtrip_plain_coin() {
        let coin = coin_with(vec![Some(out(5)), None, Some(out(9))]);
        let decoded = Coin::decode(&coin.encode()).expect("decode");
        assert_eq!(decoded, coin);
        assert_eq!(decoded.first_bwt_index, None);
    }

    #[test]
    fn encode_roundtrip_certificate_coin_tail() {
        let mut coin = coin_with(vec![Some(out(5)), Some(out(9))]);
        coin.first_bwt_index = Some(1);
        coin.bwt_maturity_height = 412;
        let bytes = coin.encode();
        let decoded = Coin::decode(&bytes).expect("decode");
        assert_eq!(decoded.first_bwt_index, Some(1));
        assert_eq!(decoded.bwt_maturity_height, 412);
        assert_eq!(decoded, coin);

        // The tail is exactly 8 bytes longer than the plain form.
        let mut plain = coin.clone();
        plain.first_bwt_index = None;
        plain.bwt_maturity_height = 0;
        assert_eq!(bytes.len(), plain.encode().len() + 8);
    }
}
