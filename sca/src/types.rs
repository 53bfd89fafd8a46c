use fil_actors_runtime::Array;
use fvm_ipld_encoding::tuple::{Deserialize_tuple, Serialize_tuple};
use fvm_ipld_encoding::RawBytes;
use fvm_shared::address::Address;
use fvm_shared::clock::ChainEpoch;
use fvm_shared::econ::TokenAmount;
use lazy_static::lazy_static;

use crate::checkpoint::CrossMsgMeta;
use crate::cross::CrossMsg;

/// ID used in the builtin-actors bundle manifest.
pub const MANIFEST_ID: &str = "hc_sca";

/// Bitwidth of the AMTs holding cross messages and msg metas.
pub const CROSSMSG_AMT_BITWIDTH: u32 = 3;

/// Default checkpoint period assigned when the configured one falls
/// below [`MIN_CHECKPOINT_PERIOD`].
pub const DEFAULT_CHECKPOINT_PERIOD: ChainEpoch = 10;

/// Minimum number of epochs between committed checkpoints.
pub const MIN_CHECKPOINT_PERIOD: ChainEpoch = 10;

/// Minimum collateral that needs to be staked to register a subnet.
pub const MIN_COLLATERAL_AMOUNT: u64 = 10_u64.pow(18);

/// Maximum nonce supported in cross messages.
pub const MAX_NONCE: u64 = u64::MAX;

lazy_static! {
    /// The coordinator is a singleton deployed at a well-known ID
    /// address in genesis.
    pub static ref SCA_ACTOR_ADDR: Address = Address::new_id(64);
}

pub type CrossMsgArray<'bs, BS> = Array<'bs, CrossMsg, BS>;
pub type CrossMsgMetaArray<'bs, BS> = Array<'bs, CrossMsgMeta, BS>;

#[derive(Serialize_tuple, Deserialize_tuple)]
pub struct ConstructorParams {
    pub network_name: String,
    pub checkpoint_period: ChainEpoch,
}

#[derive(Serialize_tuple, Deserialize_tuple, Clone)]
pub struct FundParams {
    pub value: TokenAmount,
}

/// Checkpoints travel in their binary form so every level of the
/// hierarchy content-addresses exactly the bytes the subnet signed.
#[derive(Serialize_tuple, Deserialize_tuple, Clone)]
pub struct CheckpointParams {
    pub checkpoint: RawBytes,
}
