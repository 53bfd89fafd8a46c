// Copyright: ConsensusLab

use anyhow::anyhow;
use cid::Cid;
use fil_actors_runtime::builtin::HAMT_BIT_WIDTH;
use fil_actors_runtime::runtime::Runtime;
use fil_actors_runtime::{make_empty_map, make_map_with_root_and_bitwidth};
use fvm_ipld_blockstore::Blockstore;
use fvm_ipld_encoding::serde_bytes;
use fvm_ipld_hamt::BytesKey;
use fvm_shared::address::Address;
use fvm_shared::clock::ChainEpoch;
use fvm_shared::econ::TokenAmount;
use hc_sca::checkpoint::checkpoint_epoch;
use hc_sca::{
    Checkpoint, SubnetID, CHECKPOINT_GENESIS_CID, DEFAULT_CHECKPOINT_PERIOD,
    MIN_CHECKPOINT_PERIOD, MIN_COLLATERAL_AMOUNT,
};
use hc_sdk::epoch_key;
use num::rational::Ratio;
use num::BigInt;
use num_traits::Zero;
use serde_tuple::{Deserialize_tuple, Serialize_tuple};

use crate::types::*;

/// State of the subnet actor: the miner set, their stake, and the vote
/// tally turning a window's checkpoint into a commitment to the parent.
#[derive(Serialize_tuple, Deserialize_tuple, Clone, Debug)]
pub struct State {
    pub name: String,
    /// Id of the parent this subnet is anchored to. It matches the
    /// coordinator's network name.
    pub parent_id: SubnetID,
    pub sca_addr: Address,
    pub consensus: ConsensusType,
    /// Minimum stake required from new joiners to be granted mining
    /// rights.
    pub min_miner_stake: TokenAmount,
    pub miners: Vec<Address>,
    pub total_stake: TokenAmount,
    pub stake: Cid, // HAMT[Address]TokenAmount
    pub status: Status,
    /// Genesis bootstrap of the subnet, created when the subnet is
    /// spawned.
    #[serde(with = "serde_bytes")]
    pub genesis: Vec<u8>,
    pub check_period: ChainEpoch,
    pub checkpoints: Cid, // HAMT[epoch]Checkpoint
    /// Vote tally for the checkpoints in the current signing window,
    /// keyed by checkpoint cid.
    pub window_checks: Cid, // HAMT[cid]CheckVotes
}

impl State {
    pub fn new<BS: Blockstore>(store: &BS, params: ConstructParams) -> anyhow::Result<State> {
        let min_stake = TokenAmount::from_atto(MIN_COLLATERAL_AMOUNT);

        Ok(State {
            name: params.name,
            parent_id: params.parent,
            sca_addr: Address::new_id(params.sca_addr),
            consensus: params.consensus,
            min_miner_stake: if params.min_miner_stake < min_stake {
                min_stake
            } else {
                params.min_miner_stake
            },
            miners: Vec::new(),
            total_stake: TokenAmount::zero(),
            stake: make_empty_map::<_, TokenAmount>(store, HAMT_BIT_WIDTH).flush()?,
            status: Status::Instantiated,
            genesis: params.genesis,
            check_period: if params.check_period < MIN_CHECKPOINT_PERIOD {
                DEFAULT_CHECKPOINT_PERIOD
            } else {
                params.check_period
            },
            checkpoints: make_empty_map::<_, Checkpoint>(store, HAMT_BIT_WIDTH).flush()?,
            window_checks: make_empty_map::<_, CheckVotes>(store, HAMT_BIT_WIDTH).flush()?,
        })
    }

    /// Get the stake of a miner.
    pub fn get_stake<BS: Blockstore>(
        &self,
        store: &BS,
        addr: &Address,
    ) -> anyhow::Result<Option<TokenAmount>> {
        let hamt =
            make_map_with_root_and_bitwidth::<_, TokenAmount>(&self.stake, store, HAMT_BIT_WIDTH)?;
        let amount = hamt.get(&BytesKey::from(addr.to_bytes()))?;
        Ok(amount.cloned())
    }

    /// Adds stake for an address, granting mining rights once its
    /// accumulated stake reaches the minimum.
    pub(crate) fn add_stake<BS: Blockstore>(
        &mut self,
        store: &BS,
        addr: &Address,
        amount: &TokenAmount,
    ) -> anyhow::Result<()> {
        let mut hamt =
            make_map_with_root_and_bitwidth::<_, TokenAmount>(&self.stake, store, HAMT_BIT_WIDTH)?;
        let key = BytesKey::from(addr.to_bytes());
        // first time adding stake gets the default amount of 0
        let stake = hamt.get(&key)?.cloned().unwrap_or_default();
        let updated_stake = stake + amount;
        hamt.set(key, updated_stake.clone())?;
        self.stake = hamt.flush()?;

        self.total_stake += amount;

        if updated_stake >= self.min_miner_stake
            && !self.miners.contains(addr)
            && (self.consensus != ConsensusType::Delegated || self.miners.is_empty())
        {
            self.miners.push(*addr);
        }

        Ok(())
    }

    /// Withdraws the stake of a miner, corrected by the leaving
    /// coefficient, and removes its mining rights.
    pub(crate) fn rm_stake<BS: Blockstore>(
        &mut self,
        store: &BS,
        addr: &Address,
        amount: &TokenAmount,
    ) -> anyhow::Result<TokenAmount> {
        let mut hamt =
            make_map_with_root_and_bitwidth::<_, TokenAmount>(&self.stake, store, HAMT_BIT_WIDTH)?;
        let key = BytesKey::from(addr.to_bytes());
        let stake = hamt.get(&key)?.cloned().unwrap_or_default();
        let ret_amount = amount.div_floor(&LEAVING_COEFF);
        if stake < ret_amount {
            return Err(anyhow!("address doesn't have enough stake to withdraw"));
        }

        hamt.set(key, stake - amount)?;
        self.stake = hamt.flush()?;
        self.total_stake -= &ret_amount;

        // NOTE: only full recovery of the collateral is supported, the
        // miner is removed from the set on leave.
        self.miners.retain(|a| a != addr);

        Ok(ret_amount)
    }

    pub fn is_miner(&self, addr: &Address) -> bool {
        self.miners.contains(addr)
    }

    /// A checkpoint has the majority needed for commitment once the
    /// fraction of miners that voted it reaches the signature
    /// threshold.
    pub fn has_majority_vote(&self, votes: &CheckVotes) -> bool {
        if self.miners.is_empty() {
            return false;
        }
        let voted = Ratio::new(
            BigInt::from(votes.miners.len()),
            BigInt::from(self.miners.len()),
        );
        voted >= *SIGNATURE_THRESHOLD
    }

    /// Drives the lifecycle of the subnet from the stake it currently
    /// holds.
    pub fn mutate_state(&mut self) {
        match self.status {
            Status::Instantiated | Status::Inactive => {
                if self.total_stake >= TokenAmount::from_atto(MIN_COLLATERAL_AMOUNT) {
                    self.status = Status::Active
                }
            }
            Status::Active => {
                if self.total_stake < TokenAmount::from_atto(MIN_COLLATERAL_AMOUNT) {
                    self.status = Status::Inactive
                }
            }
            Status::Terminating => {
                if self.total_stake == TokenAmount::zero() {
                    self.status = Status::Killed
                }
            }
            _ => {}
        }
    }

    /// Checks that a submitted checkpoint is votable: the subnet is
    /// active, the checkpoint names this subnet as source, belongs to
    /// the current signing window and chains to the previously
    /// committed one.
    ///
    /// Do not call this function inside a transaction.
    pub fn verify_checkpoint(&self, rt: &impl Runtime, ch: &Checkpoint) -> anyhow::Result<()> {
        if self.status != Status::Active {
            return Err(anyhow!(
                "submitting checkpoints is not allowed while subnet is not active"
            ));
        }

        if *ch.source() != SubnetID::new_from_parent(&self.parent_id, rt.message().receiver()) {
            return Err(anyhow!("submitting checkpoint with the wrong source"));
        }

        let signing_epoch = checkpoint_epoch(rt.curr_epoch(), self.check_period);
        if ch.epoch() != signing_epoch {
            return Err(anyhow!(
                "checkpoint being submitted doesn't belong to the signing window"
            ));
        }

        if ch.prev_check() != self.prev_check_cid(rt.store(), signing_epoch)? {
            return Err(anyhow!("checkpoint not chained"));
        }

        // NOTE: the miner submitting the vote signs the submission
        // message itself, so checkpoints carry no additional signature
        // to verify here.

        Ok(())
    }

    /// Cid of the checkpoint committed for the window before `epoch`,
    /// or the genesis cid when there is none.
    pub fn prev_check_cid<BS: Blockstore>(
        &self,
        store: &BS,
        epoch: ChainEpoch,
    ) -> anyhow::Result<Cid> {
        let prev = epoch - self.check_period;
        if prev < 0 {
            return Ok(*CHECKPOINT_GENESIS_CID);
        }
        Ok(match self.get_checkpoint(store, prev)? {
            Some(ch) => ch.cid(),
            None => *CHECKPOINT_GENESIS_CID,
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

    pub fn get_votes<BS: Blockstore>(
        &self,
        store: &BS,
        cid: &Cid,
    ) -> anyhow::Result<Option<CheckVotes>> {
        let checks = make_map_with_root_and_bitwidth::<_, CheckVotes>(
            &self.window_checks,
            store,
            HAMT_BIT_WIDTH,
        )?;
        let votes = checks
            .get(&BytesKey::from(cid.to_bytes()))
            .map_err(|e| anyhow!("failed to get votes for cid {}: {:?}", cid, e))?;
        Ok(votes.cloned())
    }

    pub(crate) fn set_votes<BS: Blockstore>(
        &mut self,
        store: &BS,
        cid: &Cid,
        votes: CheckVotes,
    ) -> anyhow::Result<()> {
        let mut checks = make_map_with_root_and_bitwidth::<_, CheckVotes>(
            &self.window_checks,
            store,
            HAMT_BIT_WIDTH,
        )?;
        checks
            .set(cid.to_bytes().into(), votes)
            .map_err(|e| anyhow!("failed to set votes for cid {}: {:?}", cid, e))?;
        self.window_checks = checks.flush()?;
        Ok(())
    }

    /// Clears the tally once its checkpoint has been committed.
    pub(crate) fn remove_votes<BS: Blockstore>(
        &mut self,
        store: &BS,
        cid: &Cid,
    ) -> anyhow::Result<()> {
        let mut checks = make_map_with_root_and_bitwidth::<_, CheckVotes>(
            &self.window_checks,
            store,
            HAMT_BIT_WIDTH,
        )?;
        checks
            .delete(&BytesKey::from(cid.to_bytes()))
            .map_err(|e| anyhow!("failed to delete votes for cid {}: {:?}", cid, e))?;
        self.window_checks = checks.flush()?;
        Ok(())
    }
}
