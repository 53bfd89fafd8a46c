use cid::multihash::Code;
use cid::multihash::MultihashDigest;
use cid::Cid;
use fvm_ipld_encoding::DAG_CBOR;
use fvm_ipld_encoding::{serde_bytes, to_vec};
use fvm_shared::clock::ChainEpoch;
use fvm_shared::econ::TokenAmount;
use hc_sdk::subnet_id::SubnetID;
use lazy_static::lazy_static;
use serde_tuple::{Deserialize_tuple, Serialize_tuple};

/// Number of bytes of the sha2-256 digest kept in checkpoint links.
const CHECKPOINT_HASH_LEN: u8 = 16;

lazy_static! {
    // Canonical cid used as the previous checkpoint of the first
    // checkpoint committed by a subnet. Using Cid::default() leads to
    // corrupting the datastore with the cid of an inaccessible block.
    pub static ref CHECKPOINT_GENESIS_CID: Cid = Cid::new_v1(
        DAG_CBOR,
        Code::Sha2_256
            .digest("genesis".as_bytes())
            .truncate(CHECKPOINT_HASH_LEN)
    );
}

#[derive(PartialEq, Eq, Clone, Debug, Serialize_tuple, Deserialize_tuple)]
pub struct Checkpoint {
    pub data: CheckData,
    #[serde(with = "serde_bytes")]
    pub sig: Vec<u8>,
}

impl Checkpoint {
    /// Returns an empty checkpoint template for the window of `epoch`.
    pub fn new(id: SubnetID, epoch: ChainEpoch) -> Self {
        Self {
            data: CheckData::new(id, epoch),
            sig: Vec::new(),
        }
    }

    /// Unique identifier of the checkpoint.
    ///
    /// Only the data contributes to the cid; the signature changes per
    /// signer and two checkpoints differing only in it are the same
    /// checkpoint.
    pub fn cid(&self) -> Cid {
        Cid::new_v1(
            DAG_CBOR,
            Code::Sha2_256
                .digest(&to_vec(&self.data).unwrap())
                .truncate(CHECKPOINT_HASH_LEN),
        )
    }

    /// Two checkpoints are the same checkpoint iff they carry the same
    /// data, whatever their signatures.
    pub fn equals(&self, other: &Checkpoint) -> bool {
        self.cid() == other.cid()
    }

    pub fn epoch(&self) -> ChainEpoch {
        self.data.epoch
    }

    pub fn source(&self) -> &SubnetID {
        &self.data.source
    }

    /// Cid of the previous checkpoint this checkpoint chains to.
    pub fn prev_check(&self) -> Cid {
        self.data.prev_check
    }

    pub fn signature(&self) -> &Vec<u8> {
        &self.sig
    }

    pub fn set_signature(&mut self, sig: Vec<u8>) {
        self.sig = sig;
    }

    /// Msg metas aggregated in the checkpoint, one per destination.
    pub fn cross_msgs(&self) -> &[CrossMsgMeta] {
        match &self.data.cross_msgs {
            Some(m) => m,
            None => &[],
        }
    }

    /// Looks up the meta aggregating messages for the `(from, to)` lane.
    pub fn crossmsg_meta(&self, from: &SubnetID, to: &SubnetID) -> Option<&CrossMsgMeta> {
        self.cross_msgs()
            .iter()
            .find(|m| &m.from == from && &m.to == to)
    }

    pub fn crossmsg_meta_index(&self, from: &SubnetID, to: &SubnetID) -> Option<usize> {
        self.cross_msgs()
            .iter()
            .position(|m| &m.from == from && &m.to == to)
    }

    pub(crate) fn crossmsg_meta_at_mut(&mut self, index: usize) -> &mut CrossMsgMeta {
        &mut self.data.cross_msgs.as_mut().unwrap()[index]
    }

    pub fn append_msgmeta(&mut self, meta: CrossMsgMeta) {
        match &mut self.data.cross_msgs {
            Some(msgs) => msgs.push(meta),
            None => self.data.cross_msgs = Some(vec![meta]),
        }
    }

    /// Aggregates the cid of a committed child checkpoint under its
    /// source for propagation to the upper layers of the hierarchy.
    ///
    /// Checks are appended as-is, duplicates are not detected here.
    /// Callers need to check before adding.
    pub fn add_child_check(&mut self, commit: &Checkpoint) {
        let cid = commit.cid();
        match self
            .data
            .children
            .iter_mut()
            .find(|c| &c.source == commit.source())
        {
            Some(ck) => ck.checks.push(cid),
            None => self.data.children.push(ChildCheck {
                source: commit.data.source.clone(),
                checks: vec![cid],
            }),
        };
    }
}

#[derive(PartialEq, Eq, Clone, Debug, Serialize_tuple, Deserialize_tuple)]
pub struct CheckData {
    pub source: SubnetID,
    // Subnet-specific proof propagated as part of the checkpoint; a
    // pointer to the tipset at the checkpointed epoch of the subnet.
    #[serde(with = "serde_bytes")]
    pub tipset: Vec<u8>,
    pub epoch: ChainEpoch,
    pub prev_check: Cid,
    pub children: Vec<ChildCheck>,
    pub cross_msgs: Option<Vec<CrossMsgMeta>>,
}

impl CheckData {
    pub fn new(id: SubnetID, epoch: ChainEpoch) -> Self {
        Self {
            source: id,
            tipset: Vec::new(),
            epoch,
            prev_check: *CHECKPOINT_GENESIS_CID,
            children: Vec::new(),
            cross_msgs: None,
        }
    }
}

/// Compact reference to a bundle of cross messages held in the sender's
/// registry, identified by the content of the bundle.
#[derive(PartialEq, Eq, Clone, Debug, Serialize_tuple, Deserialize_tuple)]
pub struct CrossMsgMeta {
    pub from: SubnetID,
    pub to: SubnetID,
    pub msgs_cid: Cid,
    pub nonce: u64,
    pub value: TokenAmount,
}

/// Child checkpoints aggregated under one child source since the last
/// commitment of this subnet's own checkpoint.
#[derive(PartialEq, Eq, Clone, Debug, Serialize_tuple, Deserialize_tuple)]
pub struct ChildCheck {
    pub source: SubnetID,
    pub checks: Vec<Cid>,
}

/// Epoch of the checkpoint window being populated for `epoch`.
///
/// New child checkpoints and cross-net messages are assigned to this
/// window until it closes.
pub fn window_epoch(epoch: ChainEpoch, period: ChainEpoch) -> ChainEpoch {
    (epoch / period) * period
}

/// Epoch of the most recently closed window.
///
/// The checkpoint of that window is frozen and is the one miners
/// populate and sign for commitment to the parent.
pub fn checkpoint_epoch(epoch: ChainEpoch, period: ChainEpoch) -> ChainEpoch {
    ((epoch / period) - 1) * period
}
