use std::path::Path;

use anyhow::anyhow;
use cid::multihash::Code;
use cid::multihash::MultihashDigest;
use cid::Cid;
use fil_actors_runtime::BURNT_FUNDS_ACTOR_ADDR;
use fvm_ipld_encoding::tuple::{Deserialize_tuple, Serialize_tuple};
use fvm_ipld_encoding::{to_vec, RawBytes, DAG_CBOR};
use fvm_shared::address::Address;
use fvm_shared::econ::TokenAmount;
use fvm_shared::MethodNum;
use fvm_shared::METHOD_SEND;
use hc_sdk::address::HcAddress;
use hc_sdk::subnet_id::SubnetID;

use crate::checkpoint::CrossMsgMeta;

/// Message to be executed in a subnet other than the one where it
/// originated, carried between chains inside checkpoints and top-down
/// message queues.
#[derive(PartialEq, Eq, Clone, Debug, Serialize_tuple, Deserialize_tuple)]
pub struct StorableMsg {
    pub from: HcAddress,
    pub to: HcAddress,
    pub method: MethodNum,
    pub params: RawBytes,
    pub value: TokenAmount,
    pub nonce: u64,
}

#[derive(PartialEq, Eq, Clone, Debug, Serialize_tuple, Deserialize_tuple)]
pub struct CrossMsg {
    pub msg: StorableMsg,
    pub wrapped: bool,
}

/// Direction of a cross-net message relative to the subnet inspecting
/// it.
#[derive(PartialEq, Eq, Debug)]
pub enum ApplyType {
    BottomUp,
    TopDown,
}

impl StorableMsg {
    /// Message injecting funds from an account of the parent into a
    /// subnet. The funded amount is addressed to the caller's key
    /// address inside the child.
    pub fn new_fund_msg(
        sub_id: &SubnetID,
        sig_addr: &Address,
        value: TokenAmount,
    ) -> anyhow::Result<Self> {
        let from = HcAddress::new(
            &sub_id
                .parent()
                .ok_or_else(|| anyhow!("error getting parent for subnet addr"))?,
            sig_addr,
        )?;
        let to = HcAddress::new(sub_id, sig_addr)?;
        Ok(Self {
            from,
            to,
            method: METHOD_SEND,
            params: RawBytes::default(),
            value,
            nonce: 0,
        })
    }

    /// Message releasing funds burnt in a subnet so they can be minted
    /// back for the caller in the parent.
    pub fn new_release_msg(
        sub_id: &SubnetID,
        sig_addr: &Address,
        value: TokenAmount,
        nonce: u64,
    ) -> anyhow::Result<Self> {
        let from = HcAddress::new(sub_id, &BURNT_FUNDS_ACTOR_ADDR)?;
        let to = HcAddress::new(
            &sub_id
                .parent()
                .ok_or_else(|| anyhow!("error getting parent for subnet addr"))?,
            sig_addr,
        )?;
        Ok(Self {
            from,
            to,
            method: METHOD_SEND,
            params: RawBytes::default(),
            value,
            nonce,
        })
    }

    pub fn apply_type(&self, curr: &SubnetID) -> anyhow::Result<ApplyType> {
        let sto = self.to.subnet()?;
        let sfrom = self.from.subnet()?;
        if is_bottomup(&sfrom, &sto)
            && sto
                .common_parent(&sfrom)
                .map_or(false, |(_, cp)| cp == *curr || sto == *curr)
        {
            return Ok(ApplyType::BottomUp);
        }
        Ok(ApplyType::TopDown)
    }
}

/// A message is bottom-up when its source is deeper in the hierarchy
/// than the common ancestor of source and destination, i.e. it needs to
/// travel up at least one level before it can be routed down.
pub fn is_bottomup(from: &SubnetID, to: &SubnetID) -> bool {
    let index = match from.common_parent(to) {
        Some((ind, _)) => ind,
        None => return false,
    };
    let a = from.to_string();
    Path::new(&a).components().count() - 1 > index
}

/// Bundle of cross messages and child msg metas propagated in a
/// checkpoint, held in the registry and addressed by its content.
#[derive(Default, PartialEq, Eq, Clone, Debug, Serialize_tuple, Deserialize_tuple)]
pub struct CrossMsgs {
    pub msgs: Vec<CrossMsg>,
    pub metas: Vec<CrossMsgMeta>,
}

impl CrossMsgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// The identity of a bundle is the hash of its content, under the
    /// same link prototype as checkpoints.
    pub fn cid(&self) -> Cid {
        Cid::new_v1(
            DAG_CBOR,
            Code::Sha2_256.digest(&to_vec(self).unwrap()).truncate(16),
        )
    }

    pub(crate) fn add_msg(&mut self, msg: CrossMsg) {
        self.msgs.push(msg);
    }

    pub(crate) fn add_metas(&mut self, metas: Vec<CrossMsgMeta>) {
        self.metas.extend(metas);
    }
}
