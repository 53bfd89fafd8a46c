// Copyright: ConsensusLab

use std::str::FromStr;

use anyhow::anyhow;
use cid::Cid;
use fil_actors_runtime::builtin::HAMT_BIT_WIDTH;
use fil_actors_runtime::runtime::Runtime;
use fil_actors_runtime::{make_empty_map, make_map_with_root_and_bitwidth, Array, Map};
use fvm_ipld_blockstore::Blockstore;
use fvm_ipld_hamt::BytesKey;
use fvm_shared::clock::ChainEpoch;
use fvm_shared::econ::TokenAmount;
use hc_sdk::epoch_key;
use hc_sdk::subnet_id::SubnetID;
use lazy_static::lazy_static;
use num_traits::Zero;
use serde_tuple::{Deserialize_tuple, Serialize_tuple};

use crate::checkpoint::{checkpoint_epoch, window_epoch, Checkpoint, CrossMsgMeta};
use crate::cross::{CrossMsg, CrossMsgs, StorableMsg};
use crate::subnet::{Status, Subnet};
use crate::types::*;

/// State of the subnet coordinator actor.
#[derive(Serialize_tuple, Deserialize_tuple)]
pub struct State {
    /// Id of the network this coordinator is deployed in.
    pub network_name: SubnetID,
    /// Number of child subnets registered so far.
    pub total_subnets: u64,
    /// Minimum collateral to keep a registered subnet active.
    pub min_stake: TokenAmount,
    pub subnets: Cid, // HAMT[SubnetID]Subnet
    /// Number of epochs between committed checkpoints.
    pub check_period: ChainEpoch,
    pub checkpoints: Cid, // HAMT[epoch]Checkpoint
    /// Registry of cross-message bundles referenced from checkpoint
    /// msg metas, addressed by the content of the bundle.
    pub check_msgs_registry: Cid, // HAMT[cid]CrossMsgs
    /// Latest nonce of a cross message sent from this subnet.
    pub nonce: u64,
    /// Nonce assigned to msg metas queued bottom-up from child
    /// checkpoints for local consumption.
    pub bottomup_nonce: u64,
    pub bottomup_msgs_meta: Cid, // AMT[CrossMsgMeta]
    /// Nonce of the next bottom-up msg meta to be applied, tracked so
    /// consumption can't skip ahead of production.
    pub applied_bottomup_nonce: u64,
    pub applied_topdown_nonce: u64,
}

lazy_static! {
    static ref MIN_SUBNET_COLLATERAL: TokenAmount = TokenAmount::from_atto(MIN_COLLATERAL_AMOUNT);
}

impl State {
    pub fn new<BS: Blockstore>(store: &BS, params: ConstructorParams) -> anyhow::Result<State> {
        let empty_subnets = make_empty_map::<_, Subnet>(store, HAMT_BIT_WIDTH).flush()?;
        let empty_checkpoints = make_empty_map::<_, Checkpoint>(store, HAMT_BIT_WIDTH).flush()?;
        let empty_registry = make_empty_map::<_, CrossMsgs>(store, HAMT_BIT_WIDTH).flush()?;
        let empty_meta_array =
            Array::<CrossMsgMeta, _>::new_with_bit_width(store, CROSSMSG_AMT_BITWIDTH)
                .flush()
                .map_err(|e| anyhow!("failed to create empty msg meta array: {:?}", e))?;

        Ok(State {
            network_name: SubnetID::from_str(&params.network_name)?,
            total_subnets: Default::default(),
            min_stake: MIN_SUBNET_COLLATERAL.clone(),
            subnets: empty_subnets,
            check_period: match params.checkpoint_period < MIN_CHECKPOINT_PERIOD {
                true => DEFAULT_CHECKPOINT_PERIOD,
                false => params.checkpoint_period,
            },
            checkpoints: empty_checkpoints,
            check_msgs_registry: empty_registry,
            nonce: Default::default(),
            bottomup_nonce: Default::default(),
            bottomup_msgs_meta: empty_meta_array,
            // The first successor of the applied nonce has to be 0, so
            // consumption starts at MAX_NONCE and wraps around.
            applied_bottomup_nonce: MAX_NONCE,
            applied_topdown_nonce: Default::default(),
        })
    }

    /// Get the entry for a child subnet.
    pub fn get_subnet<BS: Blockstore>(
        &self,
        store: &BS,
        id: &SubnetID,
    ) -> anyhow::Result<Option<Subnet>> {
        let subnets =
            make_map_with_root_and_bitwidth::<_, Subnet>(&self.subnets, store, HAMT_BIT_WIDTH)?;
        let subnet = subnets
            .get(&id.to_bytes())
            .map_err(|e| anyhow!("failed to get subnet for id {}: {:?}", id, e))?;
        Ok(subnet.cloned())
    }

    /// Registers a new subnet under the caller's actor address, staking
    /// the value sent with the call.
    pub(crate) fn register_subnet(&mut self, rt: &impl Runtime, id: &SubnetID) -> anyhow::Result<()> {
        let val = rt.message().value_received();
        if val <= self.min_stake {
            return Err(anyhow!("call to register doesn't include enough funds"));
        }

        let empty_topdown_msgs =
            Array::<CrossMsg, _>::new_with_bit_width(rt.store(), CROSSMSG_AMT_BITWIDTH)
                .flush()
                .map_err(|e| anyhow!("failed to create empty top-down msg array: {:?}", e))?;

        let subnet = Subnet {
            id: id.clone(),
            stake: val,
            top_down_msgs: empty_topdown_msgs,
            nonce: 0,
            circ_supply: TokenAmount::zero(),
            status: Status::Active,
            prev_checkpoint: None,
        };
        self.flush_subnet(rt.store(), &subnet)?;
        self.total_subnets += 1;
        Ok(())
    }

    /// Removes a subnet from the registry.
    pub(crate) fn rm_subnet<BS: Blockstore>(
        &mut self,
        store: &BS,
        id: &SubnetID,
    ) -> anyhow::Result<()> {
        let mut subnets =
            make_map_with_root_and_bitwidth::<_, Subnet>(&self.subnets, store, HAMT_BIT_WIDTH)?;
        let deleted = subnets
            .delete(&id.to_bytes())
            .map_err(|e| anyhow!("failed to delete subnet for id {}: {:?}", id, e))?
            .is_some();
        if deleted {
            self.subnets = subnets.flush()?;
            self.total_subnets -= 1;
        }
        Ok(())
    }

    pub(crate) fn flush_subnet<BS: Blockstore>(
        &mut self,
        store: &BS,
        sub: &Subnet,
    ) -> anyhow::Result<()> {
        let mut subnets =
            make_map_with_root_and_bitwidth::<_, Subnet>(&self.subnets, store, HAMT_BIT_WIDTH)?;
        subnets
            .set(sub.id.to_bytes().into(), sub.clone())
            .map_err(|e| anyhow!("failed to set subnet for id {}: {:?}", sub.id, e))?;
        self.subnets = subnets.flush()?;
        Ok(())
    }

    /// All subnets currently registered, in key order.
    pub fn list_subnets<BS: Blockstore>(&self, store: &BS) -> anyhow::Result<Vec<Subnet>> {
        let subnets =
            make_map_with_root_and_bitwidth::<_, Subnet>(&self.subnets, store, HAMT_BIT_WIDTH)?;
        let mut out = Vec::new();
        subnets.for_each(|_, sub| {
            out.push(sub.clone());
            Ok(())
        })?;
        Ok(out)
    }

    /// Gets the checkpoint being populated in the current window.
    ///
    /// If it hasn't been instantiated yet a template is created. From
    /// there on the template is populated with every cross-net message
    /// and child checkpoint until the window passes; then the template
    /// is frozen and ready for miners to sign.
    pub fn curr_window_checkpoint<BS: Blockstore>(
        &self,
        store: &BS,
        epoch: ChainEpoch,
    ) -> anyhow::Result<Checkpoint> {
        let ch_epoch = window_epoch(epoch, self.check_period);
        Ok(match self.get_checkpoint(store, ch_epoch)? {
            Some(ch) => ch,
            None => Checkpoint::new(self.network_name.clone(), ch_epoch),
        })
    }

    /// Gets the checkpoint template in the signing window for an epoch.
    ///
    /// The returned checkpoint is frozen and already includes all the
    /// child checkpoints and cross-net messages assigned to its window.
    /// Miners populate the tipset pointer and sign it. During the first
    /// period, when no window has closed yet, the genesis window
    /// template is returned.
    pub fn raw_checkpoint<BS: Blockstore>(
        &self,
        store: &BS,
        epoch: ChainEpoch,
    ) -> anyhow::Result<Checkpoint> {
        if epoch < 0 {
            return Err(anyhow!("epoch can't be negative"));
        }
        let ch_epoch = checkpoint_epoch(epoch, self.check_period).max(0);
        Ok(match self.get_checkpoint(store, ch_epoch)? {
            Some(ch) => ch,
            None => Checkpoint::new(self.network_name.clone(), ch_epoch),
        })
    }

    pub fn get_checkpoint<BS: Blockstore>(
        &self,
        store: &BS,
        epoch: ChainEpoch,
    ) -> anyhow::Result<Option<Checkpoint>> {
        let checkpoints = make_map_with_root_and_bitwidth::<_, Checkpoint>(
            &self.checkpoints,
            store,
            HAMT_BIT_WIDTH,
        )?;
        let ch = checkpoints
            .get(&epoch_key(epoch))
            .map_err(|e| anyhow!("failed to get checkpoint for epoch {}: {:?}", epoch, e))?;
        Ok(ch.cloned())
    }

    pub(crate) fn flush_checkpoint<BS: Blockstore>(
        &mut self,
        store: &BS,
        ch: &Checkpoint,
    ) -> anyhow::Result<()> {
        let mut checkpoints = make_map_with_root_and_bitwidth::<_, Checkpoint>(
            &self.checkpoints,
            store,
            HAMT_BIT_WIDTH,
        )?;
        checkpoints
            .set(epoch_key(ch.epoch()), ch.clone())
            .map_err(|e| anyhow!("failed to set checkpoint for epoch {}: {:?}", ch.epoch(), e))?;
        self.checkpoints = checkpoints.flush()?;
        Ok(())
    }

    /// Stores a bundle in the content-addressed registry, returning its
    /// cid. Storing a bundle that is already present is a no-op, the
    /// content determines the identity.
    pub(crate) fn store_cross_msgs<BS: Blockstore>(
        &mut self,
        store: &BS,
        msgs: &CrossMsgs,
    ) -> anyhow::Result<Cid> {
        let cid = msgs.cid();
        let mut registry = self.load_registry(store)?;
        if registry
            .get(&BytesKey::from(cid.to_bytes()))
            .map_err(|e| anyhow!("failed to get cross-msgs from registry: {:?}", e))?
            .is_none()
        {
            registry
                .set(cid.to_bytes().into(), msgs.clone())
                .map_err(|e| anyhow!("failed to set cross-msgs in registry: {:?}", e))?;
            self.check_msgs_registry = registry.flush()?;
        }
        Ok(cid)
    }

    pub fn get_cross_msgs<BS: Blockstore>(
        &self,
        store: &BS,
        cid: &Cid,
    ) -> anyhow::Result<Option<CrossMsgs>> {
        let registry = self.load_registry(store)?;
        let msgs = registry
            .get(&BytesKey::from(cid.to_bytes()))
            .map_err(|e| anyhow!("failed to get cross-msgs for cid {}: {:?}", cid, e))?;
        Ok(msgs.cloned())
    }

    /// Drops a superseded bundle from the registry.
    pub(crate) fn rm_cross_msgs<BS: Blockstore>(
        &mut self,
        store: &BS,
        cid: &Cid,
    ) -> anyhow::Result<()> {
        let mut registry = self.load_registry(store)?;
        registry
            .delete(&BytesKey::from(cid.to_bytes()))
            .map_err(|e| anyhow!("failed to delete cross-msgs for cid {}: {:?}", cid, e))?;
        self.check_msgs_registry = registry.flush()?;
        Ok(())
    }

    fn load_registry<'bs, BS: Blockstore>(
        &self,
        store: &'bs BS,
    ) -> anyhow::Result<Map<'bs, BS, CrossMsgs>> {
        Ok(make_map_with_root_and_bitwidth::<_, CrossMsgs>(
            &self.check_msgs_registry,
            store,
            HAMT_BIT_WIDTH,
        )?)
    }

    /// Commits a top-down message for its execution in the destination
    /// subnet: the next subnet down the route gets the message appended
    /// to its queue with the next nonce, and its circulating supply
    /// increased by the message's value.
    pub(crate) fn commit_topdown_msg<BS: Blockstore>(
        &mut self,
        store: &BS,
        cross_msg: &mut CrossMsg,
    ) -> anyhow::Result<()> {
        let sto = cross_msg.msg.to.subnet()?;
        let next = sto
            .down(&self.network_name)
            .ok_or_else(|| anyhow!("couldn't compute the next subnet in route"))?;
        let mut sub = self
            .get_subnet(store, &next)?
            .ok_or_else(|| anyhow!("can't direct top-down message to destination subnet"))?;
        if sub.status != Status::Active {
            return Err(anyhow!(
                "can't direct top-down message to a subnet that is not active"
            ));
        }
        if sub.nonce == MAX_NONCE {
            return Err(anyhow!("maximum top-down nonce reached for subnet"));
        }

        cross_msg.msg.nonce = sub.nonce;
        sub.store_topdown_msg(store, cross_msg)?;
        sub.nonce += 1;
        sub.circ_supply += &cross_msg.msg.value;
        self.flush_subnet(store, &sub)?;
        Ok(())
    }

    /// Queues a msg meta landing in this subnet from a child checkpoint
    /// for local consumption, numbering it with the next bottom-up
    /// nonce.
    pub(crate) fn store_bottomup_msg_meta<BS: Blockstore>(
        &mut self,
        store: &BS,
        mut meta: CrossMsgMeta,
    ) -> anyhow::Result<()> {
        if self.bottomup_nonce == MAX_NONCE {
            return Err(anyhow!("maximum bottom-up nonce reached"));
        }
        meta.nonce = self.bottomup_nonce;
        let mut metas = CrossMsgMetaArray::load(&self.bottomup_msgs_meta, store)
            .map_err(|e| anyhow!("failed to load bottom-up msg meta array: {:?}", e))?;
        metas
            .set(meta.nonce, meta)
            .map_err(|e| anyhow!("failed to set msg meta in array: {:?}", e))?;
        self.bottomup_msgs_meta = metas
            .flush()
            .map_err(|e| anyhow!("failed to flush bottom-up msg meta array: {:?}", e))?;
        self.bottomup_nonce += 1;
        Ok(())
    }

    /// Consumes a top-down message. Only the message holding the
    /// subsequent nonce may be applied; out-of-order application is
    /// rejected.
    pub fn apply_topdown_msg(&mut self, msg: &StorableMsg) -> anyhow::Result<()> {
        if self.applied_topdown_nonce != msg.nonce {
            return Err(anyhow!(
                "the top-down message being applied doesn't hold the subsequent nonce"
            ));
        }
        self.applied_topdown_nonce += 1;
        Ok(())
    }

    /// Consumes a bottom-up msg meta in strict nonce order. The counter
    /// starts at MAX_NONCE so the first expected nonce is 0.
    pub fn apply_bottomup_msg_meta(&mut self, meta: &CrossMsgMeta) -> anyhow::Result<()> {
        if self.applied_bottomup_nonce.wrapping_add(1) != meta.nonce {
            return Err(anyhow!(
                "the bottom-up msg meta being applied doesn't hold the subsequent nonce"
            ));
        }
        self.applied_bottomup_nonce = self.applied_bottomup_nonce.wrapping_add(1);
        Ok(())
    }

    /// Splits the msg metas of a committed child checkpoint by
    /// destination: metas directed to this subnet are queued bottom-up
    /// for local consumption, the rest are aggregated per destination
    /// into the current window checkpoint for further propagation.
    pub(crate) fn apply_check_msgs<BS: Blockstore>(
        &mut self,
        store: &BS,
        win: &mut Checkpoint,
        commit: &Checkpoint,
    ) -> anyhow::Result<()> {
        // grouped per destination, insertion-ordered to keep the
        // resulting state deterministic
        let mut aux: Vec<(SubnetID, Vec<CrossMsgMeta>)> = Vec::new();
        for mm in commit.cross_msgs() {
            if mm.to == self.network_name {
                self.store_bottomup_msg_meta(store, mm.clone())?;
            } else {
                match aux.iter_mut().find(|(to, _)| to == &mm.to) {
                    Some((_, metas)) => metas.push(mm.clone()),
                    None => aux.push((mm.to.clone(), vec![mm.clone()])),
                }
            }
        }
        self.agg_child_msg_meta(store, win, aux)?;
        Ok(())
    }

    /// Aggregates msg metas directed to other subnets into the window
    /// checkpoint, keeping at most one meta per destination. The
    /// aggregated bundle is re-stored in the registry under its new
    /// content and the superseded entry removed.
    fn agg_child_msg_meta<BS: Blockstore>(
        &mut self,
        store: &BS,
        ch: &mut Checkpoint,
        aux: Vec<(SubnetID, Vec<CrossMsgMeta>)>,
    ) -> anyhow::Result<()> {
        for (to, metas) in aux {
            let mut value = TokenAmount::zero();
            for m in &metas {
                value += &m.value;
            }
            match ch.crossmsg_meta_index(&self.network_name, &to) {
                Some(index) => {
                    let prev_cid = ch.cross_msgs()[index].msgs_cid;
                    let mut msgs = self.get_cross_msgs(store, &prev_cid)?.ok_or_else(|| {
                        anyhow!("no cross-msgs found in registry for cid {}", prev_cid)
                    })?;
                    msgs.add_metas(metas);
                    let new_cid = self.store_cross_msgs(store, &msgs)?;
                    self.rm_cross_msgs(store, &prev_cid)?;

                    let meta = ch.crossmsg_meta_at_mut(index);
                    meta.msgs_cid = new_cid;
                    meta.value += &value;
                }
                None => {
                    if self.nonce == MAX_NONCE {
                        return Err(anyhow!("maximum cross-message nonce reached"));
                    }
                    let mut msgs = CrossMsgs::new();
                    msgs.add_metas(metas);
                    let msgs_cid = self.store_cross_msgs(store, &msgs)?;
                    ch.append_msgmeta(CrossMsgMeta {
                        from: self.network_name.clone(),
                        to,
                        msgs_cid,
                        nonce: self.nonce,
                        value,
                    });
                    self.nonce += 1;
                }
            }
        }
        Ok(())
    }

    /// Records a bottom-up release message in the current window
    /// checkpoint, aggregating it into the bundle addressed to the
    /// parent.
    pub(crate) fn commit_release_msg<BS: Blockstore>(
        &mut self,
        store: &BS,
        msg: &StorableMsg,
        curr_epoch: ChainEpoch,
    ) -> anyhow::Result<()> {
        let parent = self
            .network_name
            .parent()
            .ok_or_else(|| anyhow!("the rootnet has no parent to release funds to"))?;
        let mut ch = self.curr_window_checkpoint(store, curr_epoch)?;
        let cross_msg = CrossMsg {
            msg: msg.clone(),
            wrapped: false,
        };

        match ch.crossmsg_meta_index(&self.network_name, &parent) {
            Some(index) => {
                let prev_cid = ch.cross_msgs()[index].msgs_cid;
                let mut msgs = self.get_cross_msgs(store, &prev_cid)?.ok_or_else(|| {
                    anyhow!("no cross-msgs found in registry for cid {}", prev_cid)
                })?;
                msgs.add_msg(cross_msg);
                let new_cid = self.store_cross_msgs(store, &msgs)?;
                self.rm_cross_msgs(store, &prev_cid)?;

                let meta = ch.crossmsg_meta_at_mut(index);
                meta.msgs_cid = new_cid;
                meta.value += &msg.value;
            }
            None => {
                let mut msgs = CrossMsgs::new();
                msgs.add_msg(cross_msg);
                let msgs_cid = self.store_cross_msgs(store, &msgs)?;
                ch.append_msgmeta(CrossMsgMeta {
                    from: self.network_name.clone(),
                    to: parent,
                    msgs_cid,
                    nonce: msg.nonce,
                    value: msg.value.clone(),
                });
            }
        }

        self.flush_checkpoint(store, &ch)?;
        Ok(())
    }
}

pub fn get_topdown_msg<'m, BS: Blockstore>(
    crossmsgs: &'m CrossMsgArray<BS>,
    nonce: u64,
) -> anyhow::Result<Option<&'m StorableMsg>> {
    let r = crossmsgs
        .get(nonce)
        .map_err(|e| anyhow!("failed to get msg by nonce: {:?}", e))?
        .map(|c| &c.msg);
    Ok(r)
}

pub fn get_bottomup_msg_meta<'m, BS: Blockstore>(
    metas: &'m CrossMsgMetaArray<BS>,
    nonce: u64,
) -> anyhow::Result<Option<&'m CrossMsgMeta>> {
    metas
        .get(nonce)
        .map_err(|e| anyhow!("failed to get msg meta by nonce: {:?}", e))
}
