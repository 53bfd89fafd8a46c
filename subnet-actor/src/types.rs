use fvm_ipld_encoding::ipld_block::IpldBlock;
use fvm_ipld_encoding::serde_bytes;
use fvm_ipld_encoding::tuple::{Deserialize_tuple, Serialize_tuple};
use fvm_shared::address::Address;
use fvm_shared::clock::ChainEpoch;
use fvm_shared::econ::TokenAmount;
use fvm_shared::MethodNum;
use lazy_static::lazy_static;
use num::rational::Ratio;
use num::BigInt;
use serde::{Deserialize, Serialize};

lazy_static! {
    /// Fraction of the miner set that needs to have voted a window's
    /// checkpoint before it is committed to the parent.
    pub static ref SIGNATURE_THRESHOLD: Ratio<BigInt> =
        Ratio::new(BigInt::from(2), BigInt::from(3));

    /// Divisor applied to a miner's stake when leaving the subnet.
    /// Currently 1, the miner recovers its full stake. This may change
    /// once the cryptoeconomics are figured out.
    pub static ref LEAVING_COEFF: BigInt = BigInt::from(1);
}

/// Consensus algorithms supported by subnets.
#[derive(PartialEq, Eq, Clone, Copy, Debug, Deserialize, Serialize)]
#[repr(u64)]
pub enum ConsensusType {
    Delegated,
    PoW,
}

/// Lifecycle state of the subnet.
#[derive(PartialEq, Eq, Clone, Copy, Debug, Deserialize, Serialize)]
#[repr(i32)]
pub enum Status {
    /// Waiting to onboard the minimum stake to register in the parent.
    Instantiated,
    Active,
    /// Lost the minimum stake needed to operate.
    Inactive,
    /// Waiting for everyone to take their funds back before closing.
    Terminating,
    Killed,
}

#[derive(Serialize_tuple, Deserialize_tuple, Clone)]
pub struct ConstructParams {
    pub parent: hc_sdk::subnet_id::SubnetID,
    pub name: String,
    /// ID of the coordinator actor in the parent chain.
    pub sca_addr: u64,
    pub consensus: ConsensusType,
    pub min_miner_stake: TokenAmount,
    pub check_period: ChainEpoch,
    #[serde(with = "serde_bytes")]
    pub genesis: Vec<u8>,
}

/// Tally of the miners that have voted a window's checkpoint. The
/// checkpoint itself is not stored, its cid keys the tally.
#[derive(Serialize_tuple, Deserialize_tuple, PartialEq, Eq, Clone, Debug, Default)]
pub struct CheckVotes {
    pub miners: Vec<Address>,
}

/// Message prepared inside a transaction and sent once it commits.
pub(crate) struct CrossActorPayload {
    pub to: Address,
    pub method: MethodNum,
    pub params: Option<IpldBlock>,
    pub value: TokenAmount,
}

impl CrossActorPayload {
    pub fn new(
        to: Address,
        method: MethodNum,
        params: Option<IpldBlock>,
        value: TokenAmount,
    ) -> Self {
        Self {
            to,
            method,
            params,
            value,
        }
    }
}
