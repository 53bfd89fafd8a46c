use anyhow::anyhow;
use cid::Cid;
use fvm_ipld_blockstore::Blockstore;
use fvm_shared::econ::TokenAmount;
use hc_sdk::subnet_id::SubnetID;
use serde::{Deserialize, Serialize};

use crate::checkpoint::Checkpoint;
use crate::cross::CrossMsg;
use crate::state::State;
use crate::types::CrossMsgArray;

#[derive(PartialEq, Eq, Clone, Copy, Debug, Deserialize, Serialize)]
#[repr(i32)]
pub enum Status {
    Active,
    Inactive,
    Killed,
}

/// Registry entry for a child subnet anchored to this coordinator.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Subnet {
    pub id: SubnetID,
    pub stake: TokenAmount,
    /// AMT of top-down messages addressed into the subnet, indexed by
    /// nonce.
    pub top_down_msgs: Cid,
    /// Next top-down nonce to assign.
    pub nonce: u64,
    /// Funds injected into the subnet and not yet released back.
    pub circ_supply: TokenAmount,
    pub status: Status,
    /// Last checkpoint committed by the subnet; `None` until the first
    /// commitment.
    pub prev_checkpoint: Option<Checkpoint>,
}

impl Subnet {
    /// Adds stake to the subnet's collateral (negative values release
    /// it) and transitions the subnet between active and inactive as
    /// the collateral crosses the minimum stake.
    pub(crate) fn add_stake<BS: Blockstore>(
        &mut self,
        store: &BS,
        st: &mut State,
        value: &TokenAmount,
    ) -> anyhow::Result<()> {
        self.stake += value;
        if self.stake < st.min_stake {
            self.status = Status::Inactive;
        } else if self.status == Status::Inactive {
            self.status = Status::Active;
        }
        st.flush_subnet(store, self)?;
        Ok(())
    }

    /// Stores a top-down message for its execution in the subnet.
    pub(crate) fn store_topdown_msg<BS: Blockstore>(
        &mut self,
        store: &BS,
        cross_msg: &CrossMsg,
    ) -> anyhow::Result<()> {
        let mut crossmsgs = CrossMsgArray::load(&self.top_down_msgs, store)
            .map_err(|e| anyhow!("failed to load top-down msg array: {:?}", e))?;
        crossmsgs
            .set(cross_msg.msg.nonce, cross_msg.clone())
            .map_err(|e| anyhow!("failed to set msg in top-down array: {:?}", e))?;
        self.top_down_msgs = crossmsgs
            .flush()
            .map_err(|e| anyhow!("failed to flush top-down msg array: {:?}", e))?;
        Ok(())
    }

    pub(crate) fn release_supply(&mut self, value: &TokenAmount) -> anyhow::Result<()> {
        if &self.circ_supply < value {
            return Err(anyhow!(
                "can't release funds below the subnet's circulating supply"
            ));
        }
        self.circ_supply -= value;
        Ok(())
    }
}
