pub mod state;
pub mod types;

use fil_actors_runtime::runtime::{ActorCode, Runtime};
use fil_actors_runtime::{
    actor_dispatch, actor_error, restrict_internal_api, ActorDowncast, ActorError,
    CALLER_TYPES_SIGNABLE, INIT_ACTOR_ADDR,
};
use fvm_ipld_encoding::ipld_block::IpldBlock;
use fvm_ipld_encoding::{to_vec, RawBytes};
use fvm_shared::econ::TokenAmount;
use fvm_shared::error::ExitCode;
use fvm_shared::{MethodNum, METHOD_CONSTRUCTOR};
use hc_sca::{Checkpoint, CheckpointParams, FundParams, MIN_COLLATERAL_AMOUNT};
use num_derive::FromPrimitive;
use num_traits::{FromPrimitive, Zero};

pub use crate::state::State;
pub use crate::types::*;

#[cfg(feature = "hc-subnet-actor")]
fil_actors_runtime::wasm_trampoline!(Actor);

/// Subnet actor methods.
#[derive(FromPrimitive)]
#[repr(u64)]
pub enum Method {
    Constructor = METHOD_CONSTRUCTOR,
    Join = 2,
    Leave = 3,
    Kill = 4,
    SubmitCheckpoint = 5,
}

/// SubnetActor trait. Custom subnet actors need to implement this trait
/// in order to be used as part of hierarchical consensus.
///
/// Subnet actors are responsible for the governing policies of
/// subnets.
pub trait SubnetActor {
    /// Deploys the subnet actor with the corresponding parameters.
    fn constructor(rt: &mut impl Runtime, params: ConstructParams) -> Result<(), ActorError>;
    /// Logic for new peers to join a subnet.
    fn join(rt: &mut impl Runtime) -> Result<(), ActorError>;
    /// Called by peers to leave a subnet.
    fn leave(rt: &mut impl Runtime) -> Result<(), ActorError>;
    /// Sends a kill signal for the subnet to the coordinator.
    fn kill(rt: &mut impl Runtime) -> Result<(), ActorError>;
    /// Submits a vote for the checkpoint of the current signing window.
    fn submit_checkpoint(rt: &mut impl Runtime, ch: Checkpoint) -> Result<(), ActorError>;
}

pub struct Actor;

impl SubnetActor for Actor {
    /// The constructor populates the initial state.
    fn constructor(rt: &mut impl Runtime, params: ConstructParams) -> Result<(), ActorError> {
        rt.validate_immediate_caller_is(std::iter::once(&INIT_ACTOR_ADDR))?;

        let st = State::new(rt.store(), params).map_err(|e| {
            e.downcast_default(ExitCode::USR_ILLEGAL_STATE, "Failed to create actor state")
        })?;
        rt.create(&st)?;
        Ok(())
    }

    /// Called by peers looking to join the subnet. The stake put by the
    /// caller counts towards the subnet's collateral in the parent: the
    /// first time the subnet accumulates the minimum collateral it is
    /// registered with the coordinator, afterwards new stake is added
    /// on top.
    fn join(rt: &mut impl Runtime) -> Result<(), ActorError> {
        rt.validate_immediate_caller_type(CALLER_TYPES_SIGNABLE.iter())?;

        let caller = rt.message().caller();
        let amount = rt.message().value_received();
        if amount <= TokenAmount::zero() {
            return Err(actor_error!(
                illegal_argument,
                "a minimum collateral is required to join the subnet"
            ));
        }

        let mut msg = None;
        rt.transaction(|st: &mut State, rt| {
            st.add_stake(rt.store(), &caller, &amount).map_err(|e| {
                e.downcast_default(ExitCode::USR_ILLEGAL_STATE, "failed to add stake")
            })?;

            if st.status == Status::Instantiated {
                if st.total_stake >= TokenAmount::from_atto(MIN_COLLATERAL_AMOUNT) {
                    msg = Some(CrossActorPayload::new(
                        st.sca_addr,
                        hc_sca::Method::Register as MethodNum,
                        None,
                        st.total_stake.clone(),
                    ));
                }
            } else {
                msg = Some(CrossActorPayload::new(
                    st.sca_addr,
                    hc_sca::Method::AddStake as MethodNum,
                    None,
                    amount.clone(),
                ));
            }

            st.mutate_state();
            Ok(())
        })?;

        if let Some(p) = msg {
            rt.send(&p.to, p.method, p.params, p.value)?;
        }

        Ok(())
    }

    /// Called by peers looking to leave the subnet, recovering their
    /// stake from the collateral held by the coordinator.
    fn leave(rt: &mut impl Runtime) -> Result<(), ActorError> {
        rt.validate_immediate_caller_type(CALLER_TYPES_SIGNABLE.iter())?;

        let caller = rt.message().caller();
        let mut msg = None;
        rt.transaction(|st: &mut State, rt| {
            let stake = st.get_stake(rt.store(), &caller).map_err(|e| {
                e.downcast_default(ExitCode::USR_ILLEGAL_STATE, "failed to load stake")
            })?;

            let stake = match stake {
                Some(stake) if stake > TokenAmount::zero() => stake,
                _ => return Err(actor_error!(illegal_state, "caller has no stake in subnet")),
            };

            let ret_amount = st.rm_stake(rt.store(), &caller, &stake).map_err(|e| {
                e.downcast_default(ExitCode::USR_ILLEGAL_STATE, "cannot remove stake")
            })?;

            if st.status != Status::Terminating {
                msg = Some(CrossActorPayload::new(
                    st.sca_addr,
                    hc_sca::Method::ReleaseStake as MethodNum,
                    IpldBlock::serialize_cbor(&FundParams { value: ret_amount })
                        .map_err(|e| actor_error!(serialization, e.to_string()))?,
                    TokenAmount::zero(),
                ));
            }

            st.mutate_state();
            Ok(())
        })?;

        if let Some(p) = msg {
            rt.send(&p.to, p.method, p.params, p.value)?;
        }

        Ok(())
    }

    /// Propagates the kill signal to the coordinator once all miners
    /// have left and the subnet holds no funds.
    fn kill(rt: &mut impl Runtime) -> Result<(), ActorError> {
        rt.validate_immediate_caller_accept_any()?;

        // prevent the subnet from being killed until all its locked
        // balance has been withdrawn
        if rt.current_balance() != TokenAmount::zero() {
            return Err(actor_error!(
                illegal_state,
                format!("the subnet has non-zero balance: {}", rt.current_balance())
            ));
        }

        let mut msg = None;
        rt.transaction(|st: &mut State, _| {
            if st.status == Status::Terminating || st.status == Status::Killed {
                return Err(actor_error!(
                    illegal_state,
                    "the subnet is already in a killed or terminating state"
                ));
            }
            if !st.miners.is_empty() || st.total_stake != TokenAmount::zero() {
                return Err(actor_error!(
                    illegal_state,
                    "this subnet can only be killed when all miners have left"
                ));
            }

            st.status = Status::Terminating;
            st.mutate_state();

            msg = Some(CrossActorPayload::new(
                st.sca_addr,
                hc_sca::Method::Kill as MethodNum,
                None,
                TokenAmount::zero(),
            ));
            Ok(())
        })?;

        // unregister the subnet from the hierarchy
        if let Some(p) = msg {
            rt.send(&p.to, p.method, p.params, p.value)?;
        }

        Ok(())
    }

    /// SubmitCheckpoint records a miner's vote for a window checkpoint.
    ///
    /// Votes are deduplicated per checkpoint cid. Once the tally
    /// crosses the signature threshold the checkpoint is committed to
    /// the parent coordinator and the tally cleared.
    fn submit_checkpoint(rt: &mut impl Runtime, ch: Checkpoint) -> Result<(), ActorError> {
        // miners vote by signing the submission message itself
        rt.validate_immediate_caller_type(CALLER_TYPES_SIGNABLE.iter())?;

        let caller = rt.message().caller();
        let state: State = rt.state()?;
        if !state.is_miner(&caller) {
            return Err(actor_error!(forbidden, "caller is not a miner"));
        }
        state
            .verify_checkpoint(rt, &ch)
            .map_err(|e| actor_error!(illegal_argument, "checkpoint failed: {}", e))?;

        let mut msg = None;
        rt.transaction(|st: &mut State, rt| {
            let ch_cid = ch.cid();

            let mut found = true;
            let mut votes = match st.get_votes(rt.store(), &ch_cid).map_err(|e| {
                e.downcast_default(ExitCode::USR_ILLEGAL_STATE, "cannot load votes from state")
            })? {
                Some(v) => v,
                None => {
                    found = false;
                    CheckVotes::default()
                }
            };

            if votes.miners.contains(&caller) {
                return Err(actor_error!(
                    illegal_argument,
                    "miner has already voted the checkpoint"
                ));
            }
            votes.miners.push(caller);

            if st.has_majority_vote(&votes) {
                // commit checkpoint and propagate it to the coordinator
                st.flush_checkpoint(rt.store(), &ch).map_err(|e| {
                    e.downcast_default(ExitCode::USR_ILLEGAL_STATE, "cannot flush checkpoint")
                })?;

                let checkpoint = RawBytes::new(
                    to_vec(&ch).map_err(|e| actor_error!(serialization, e.to_string()))?,
                );
                msg = Some(CrossActorPayload::new(
                    st.sca_addr,
                    hc_sca::Method::CommitChildCheckpoint as MethodNum,
                    IpldBlock::serialize_cbor(&CheckpointParams { checkpoint })
                        .map_err(|e| actor_error!(serialization, e.to_string()))?,
                    TokenAmount::zero(),
                ));

                // votes were used for commitment, remove them from the
                // tally
                if found {
                    st.remove_votes(rt.store(), &ch_cid).map_err(|e| {
                        e.downcast_default(ExitCode::USR_ILLEGAL_STATE, "cannot remove votes")
                    })?;
                }
            } else {
                // no majority yet, store the vote
                st.set_votes(rt.store(), &ch_cid, votes).map_err(|e| {
                    e.downcast_default(ExitCode::USR_ILLEGAL_STATE, "cannot set votes")
                })?;
            }

            Ok(())
        })?;

        // propagate to the coordinator
        if let Some(p) = msg {
            rt.send(&p.to, p.method, p.params, p.value)?;
        }

        Ok(())
    }
}

impl ActorCode for Actor {
    type Methods = Method;

    actor_dispatch! {
        Constructor => constructor,
        Join => join,
        Leave => leave,
        Kill => kill,
        SubmitCheckpoint => submit_checkpoint,
    }
}
