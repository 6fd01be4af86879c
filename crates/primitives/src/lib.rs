//! Core transaction/certificate value types and consensus serialization.

pub mod certificate;
pub mod encoding;
pub mod hash;
pub mod transaction;

pub use certificate::Certificate;
pub use encoding::{DecodeError, Decoder, Encoder};
pub use hash::{sha256, sha256d};
pub use transaction::{
    BackwardTransferRequestOutput, CswInput, FieldElement, ForwardTransferOutput,
    SidechainCreationOutput, SidechainFixedParams, SidechainId, Transaction, TxOut,
};
