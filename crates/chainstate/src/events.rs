//! Per-height scheduled sidechain events.

use std::collections::BTreeSet;

use zend_primitives::{DecodeError, Decoder, Encoder, SidechainId};

/// Sidechains with something scheduled at one block height: amounts maturing
/// into their balance, or the sidechain ceasing. A record with both sets empty
/// is equivalent to no record at all.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SidechainEvents {
    pub maturing: BTreeSet<SidechainId>,
    pub ceasing: BTreeSet<SidechainId>,
}

impl SidechainEvents {
    pub fn is_null(&self) -> bool {
        self.maturing.is_empty() && self.ceasing.is_empty()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.write_varint(self.maturing.len() as u64);
        for sc_id in &self.maturing {
            encoder.write_hash(sc_id);
        }
        encoder.write_varint(self.ceasing.len() as u64);
        for sc_id in &self.ceasing {
            encoder.write_hash(sc_id);
        }
        encoder.into_inner()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let events = Self::decode_from(&mut decoder)?;
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(events)
    }

    pub(crate) fn decode_from(decoder: &mut Decoder<'_>) -> Result<Self, DecodeError> {
        let mut maturing = BTreeSet::new();
        let count = decoder.read_varint()?;
        for _ in 0..count {
            maturing.insert(decoder.read_hash()?);
        }
        let mut ceasing = BTreeSet::new();
        let count = decoder.read_varint()?;
        for _ in 0..count {
            ceasing.insert(decoder.read_hash()?);
        }
        Ok(Self { maturing, ceasing })
    }
}
