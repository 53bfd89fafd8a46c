use fvm_ipld_hamt::BytesKey;
use fvm_shared::clock::ChainEpoch;

pub mod address;
pub mod error;
pub mod subnet_id;

pub mod account {
    /// Public key account actor method.
    pub const PUBKEY_ADDRESS_METHOD: u64 = 2;
}

/// Key normalization for epoch-indexed HAMTs. Epochs are keyed by their
/// big-endian byte encoding; this encoding is part of the wire contract.
pub fn epoch_key(e: ChainEpoch) -> BytesKey {
    BytesKey::from(e.to_be_bytes().to_vec())
}
