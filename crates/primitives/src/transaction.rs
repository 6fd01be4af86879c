//! Parsed transaction structures, reduced to the parts the state engine consumes.
//!
//! Wire parsing and script interpretation happen upstream; by the time a
//! transaction reaches chain state it is already split into plain outputs and
//! the four sidechain-bearing sections.

use crate::encoding::{DecodeError, Decoder, Encoder};
use zend_consensus::Hash256;

pub type SidechainId = Hash256;
pub type FieldElement = [u8; 32];

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TxOut {
    pub value: i64,
    pub script_pubkey: Vec<u8>,
}

impl TxOut {
    pub fn encode_into(&self, encoder: &mut Encoder) {
        encoder.write_i64_le(self.value);
        encoder.write_var_bytes(&self.script_pubkey);
    }

    pub fn decode_from(decoder: &mut Decoder<'_>) -> Result<Self, DecodeError> {
        let value = decoder.read_i64_le()?;
        let script_pubkey = decoder.read_var_bytes()?;
        Ok(Self {
            value,
            script_pubkey,
        })
    }
}

/// Parameters fixed at sidechain creation, immutable afterwards.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SidechainFixedParams {
    pub version: u8,
    pub withdrawal_epoch_length: i32,
    /// Certificate proof verification key, opaque to the state engine.
    pub cert_vk: Vec<u8>,
    /// Ceased-withdrawal proof verification key; empty means the sidechain does
    /// not support ceased withdrawals.
    pub csw_vk: Vec<u8>,
    /// Required number of field elements in a backward transfer request;
    /// 0 means requests are disabled.
    pub mbtr_request_data_length: u8,
    /// Declared sizes of the certificate custom fields, in bytes.
    pub custom_field_sizes: Vec<u8>,
}

impl SidechainFixedParams {
    pub fn supports_ceased_withdrawals(&self) -> bool {
        !self.csw_vk.is_empty()
    }

    pub fn encode_into(&self, encoder: &mut Encoder) {
        encoder.write_u8(self.version);
        encoder.write_i32_le(self.withdrawal_epoch_length);
        encoder.write_var_bytes(&self.cert_vk);
        encoder.write_var_bytes(&self.csw_vk);
        encoder.write_u8(self.mbtr_request_data_length);
        encoder.write_var_bytes(&self.custom_field_sizes);
    }

    pub fn decode_from(decoder: &mut Decoder<'_>) -> Result<Self, DecodeError> {
        let version = decoder.read_u8()?;
        let withdrawal_epoch_length = decoder.read_i32_le()?;
        let cert_vk = decoder.read_var_bytes()?;
        let csw_vk = decoder.read_var_bytes()?;
        let mbtr_request_data_length = decoder.read_u8()?;
        let custom_field_sizes = decoder.read_var_bytes()?;
        Ok(Self {
            version,
            withdrawal_epoch_length,
            cert_vk,
            csw_vk,
            mbtr_request_data_length,
            custom_field_sizes,
        })
    }
}

/// Output declaring a new sidechain and locking its creation amount.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SidechainCreationOutput {
    pub sc_id: SidechainId,
    pub amount: i64,
    pub params: SidechainFixedParams,
}

impl SidechainCreationOutput {
    /// Sidechain id for the creation at `output_index` of the transaction
    /// with `tx_hash`: the double-SHA256 of the pair, so ids are unique per
    /// creating output and fixed once the transaction is.
    pub fn derive_id(tx_hash: &Hash256, output_index: u32) -> SidechainId {
        let mut encoder = Encoder::new();
        encoder.write_hash(tx_hash);
        encoder.write_u32_le(output_index);
        crate::hash::sha256d(&encoder.into_inner())
    }
}

/// Output moving mainchain funds into an existing sidechain.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ForwardTransferOutput {
    pub sc_id: SidechainId,
    pub amount: i64,
}

/// Request for the sidechain to pay funds back to the mainchain; the request
/// fee matures into the sidechain balance like a forward transfer.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BackwardTransferRequestOutput {
    pub sc_id: SidechainId,
    pub sc_fee: i64,
    pub request_data: Vec<FieldElement>,
}

/// Input reclaiming funds from a ceased sidechain, guarded by a one-time
/// nullifier. Proof verification happens upstream.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CswInput {
    pub sc_id: SidechainId,
    pub amount: i64,
    pub nullifier: FieldElement,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Transaction {
    pub hash: Hash256,
    pub version: i32,
    pub is_coin_base: bool,
    pub vout: Vec<TxOut>,
    pub sidechain_creations: Vec<SidechainCreationOutput>,
    pub forward_transfers: Vec<ForwardTransferOutput>,
    pub backward_transfer_requests: Vec<BackwardTransferRequestOutput>,
    pub csw_inputs: Vec<CswInput>,
}

impl Transaction {
    pub fn has_sidechain_sections(&self) -> bool {
        !self.sidechain_creations.is_empty()
            || !self.forward_transfers.is_empty()
            || !self.backward_transfer_requests.is_empty()
            || !self.csw_inputs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_params_roundtrip() {
        let params = SidechainFixedParams {
            version: 2,
            withdrawal_epoch_length: 1008,
            cert_vk: vec![0x01; 48],
            csw_vk: Vec::new(),
            mbtr_request_data_length: 3,
            custom_field_sizes: vec![32, 32],
        };
        let mut encoder = Encoder::new();
        params.encode_into(&mut encoder);
        let bytes = encoder.into_inner();
        let mut decoder = Decoder::new(&bytes);
        let decoded = SidechainFixedParams::decode_from(&mut decoder).unwrap();
        assert!(decoder.is_empty());
        assert_eq!(decoded, params);
        assert!(!decoded.supports_ceased_withdrawals());
    }

    #[test]
    fn derived_sidechain_ids_are_unique_per_output() {
        let tx_hash = [0x42; 32];
        let first = SidechainCreationOutput::derive_id(&tx_hash, 0);
        let second = SidechainCreationOutput::derive_id(&tx_hash, 1);
        let other_tx = SidechainCreationOutput::derive_id(&[0x43; 32], 0);
        assert_ne!(first, second);
        assert_ne!(first, other_tx);
        assert_eq!(first, SidechainCreationOutput::derive_id(&tx_hash, 0));
    }
}
