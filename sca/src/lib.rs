pub use self::checkpoint::{
    checkpoint_epoch, window_epoch, CheckData, Checkpoint, ChildCheck, CrossMsgMeta,
    CHECKPOINT_GENESIS_CID,
};
pub use self::cross::{is_bottomup, ApplyType, CrossMsg, CrossMsgs, StorableMsg};
pub use self::state::*;
pub use self::subnet::*;
pub use self::types::*;
use fil_actors_runtime::runtime::{ActorCode, Runtime};
use fil_actors_runtime::{
    actor_dispatch, actor_error, deserialize_block, restrict_internal_api, ActorDowncast,
    ActorError, BURNT_FUNDS_ACTOR_ADDR, CALLER_TYPES_SIGNABLE, INIT_ACTOR_ADDR,
};
use fvm_shared::address::Address;
use fvm_shared::bigint::Zero;
use fvm_shared::econ::TokenAmount;
use fvm_shared::error::ExitCode;
use fvm_shared::METHOD_CONSTRUCTOR;
use fvm_shared::METHOD_SEND;
pub use hc_sdk::address::HcAddress;
pub use hc_sdk::subnet_id::SubnetID;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

#[cfg(feature = "hc-sca-actor")]
fil_actors_runtime::wasm_trampoline!(Actor);

pub mod checkpoint;
mod cross;
#[doc(hidden)]
pub mod ext;
mod state;
pub mod subnet;
mod types;

/// Subnet coordinator methods. The numbering is part of the wire
/// contract.
#[derive(FromPrimitive)]
#[repr(u64)]
pub enum Method {
    Constructor = METHOD_CONSTRUCTOR,
    Register = 2,
    AddStake = 3,
    ReleaseStake = 4,
    Kill = 5,
    CommitChildCheckpoint = 6,
    Fund = 7,
    Release = 8,
}

/// Subnet Coordinator Actor.
///
/// Singleton tracking the lifecycle of the child subnets anchored to
/// this chain, committing their checkpoints, and routing value across
/// the subnet hierarchy.
pub struct Actor;

impl Actor {
    fn constructor(rt: &mut impl Runtime, params: ConstructorParams) -> Result<(), ActorError> {
        rt.validate_immediate_caller_is(std::iter::once(&INIT_ACTOR_ADDR))?;

        let st = State::new(rt.store(), params).map_err(|e| {
            e.downcast_default(
                ExitCode::USR_ILLEGAL_STATE,
                "Failed to create coordinator actor state",
            )
        })?;
        rt.create(&st)?;
        Ok(())
    }

    /// Register is called by subnet actors to put the required
    /// collateral and register the subnet to the hierarchy.
    fn register(rt: &mut impl Runtime) -> Result<SubnetID, ActorError> {
        // Only subnet actors can register. There is no builtin type for
        // user-deployed subnet actors, so the subnet id derived from
        // the caller address stands in for caller-type validation.
        rt.validate_immediate_caller_accept_any()?;

        let subnet_addr = rt.message().caller();
        let mut shid = SubnetID::default();
        rt.transaction(|st: &mut State, rt| {
            shid = SubnetID::new_from_parent(&st.network_name, subnet_addr);
            let sub = st.get_subnet(rt.store(), &shid).map_err(|e| {
                e.downcast_default(ExitCode::USR_ILLEGAL_STATE, "failed to load subnet")
            })?;
            match sub {
                Some(_) => Err(actor_error!(
                    illegal_argument,
                    "subnet with id {} already registered",
                    shid
                )),
                None => {
                    st.register_subnet(rt, &shid).map_err(|e| {
                        e.downcast_default(
                            ExitCode::USR_ILLEGAL_ARGUMENT,
                            "Failed to register subnet",
                        )
                    })?;
                    Ok(())
                }
            }
        })?;

        log::debug!("registered new subnet: {}", shid);
        Ok(shid)
    }

    /// AddStake adds stake to the collateral of a subnet.
    fn add_stake(rt: &mut impl Runtime) -> Result<(), ActorError> {
        rt.validate_immediate_caller_accept_any()?;

        let subnet_addr = rt.message().caller();
        let val = rt.message().value_received();
        if val <= TokenAmount::zero() {
            return Err(actor_error!(illegal_argument, "no stake to add"));
        }

        rt.transaction(|st: &mut State, rt| {
            let shid = SubnetID::new_from_parent(&st.network_name, subnet_addr);
            let sub = st.get_subnet(rt.store(), &shid).map_err(|e| {
                e.downcast_default(ExitCode::USR_ILLEGAL_STATE, "failed to load subnet")
            })?;
            match sub {
                Some(mut sub) => {
                    sub.add_stake(rt.store(), st, &val).map_err(|e| {
                        e.downcast_default(
                            ExitCode::USR_ILLEGAL_STATE,
                            "Failed to add stake to subnet",
                        )
                    })?;
                    Ok(())
                }
                None => Err(actor_error!(
                    illegal_argument,
                    "subnet with id {} not registered",
                    shid
                )),
            }
        })?;

        Ok(())
    }

    /// ReleaseStake recovers part of the collateral of a subnet.
    fn release_stake(rt: &mut impl Runtime, params: FundParams) -> Result<(), ActorError> {
        rt.validate_immediate_caller_accept_any()?;

        let subnet_addr = rt.message().caller();
        let send_val = params.value;
        if send_val <= TokenAmount::zero() {
            return Err(actor_error!(
                illegal_argument,
                "no funds to release in params"
            ));
        }

        rt.transaction(|st: &mut State, rt| {
            let shid = SubnetID::new_from_parent(&st.network_name, subnet_addr);
            let sub = st.get_subnet(rt.store(), &shid).map_err(|e| {
                e.downcast_default(ExitCode::USR_ILLEGAL_STATE, "failed to load subnet")
            })?;
            match sub {
                Some(mut sub) => {
                    if sub.stake < send_val {
                        return Err(actor_error!(
                            illegal_state,
                            "subnet actor not allowed to release so many funds"
                        ));
                    }
                    // sanity-check: the actor itself needs to hold the
                    // funds it is about to send back.
                    if rt.current_balance() < send_val {
                        return Err(actor_error!(
                            illegal_state,
                            "something went really wrong! the actor doesn't have enough balance to release"
                        ));
                    }
                    sub.add_stake(rt.store(), st, &-send_val.clone()).map_err(|e| {
                        e.downcast_default(
                            ExitCode::USR_ILLEGAL_STATE,
                            "Failed to release stake from subnet",
                        )
                    })?;
                    Ok(())
                }
                None => Err(actor_error!(
                    illegal_argument,
                    "subnet with id {} not registered",
                    shid
                )),
            }
        })?;

        rt.send(&subnet_addr, METHOD_SEND, None, send_val)?;
        Ok(())
    }

    /// Kill unregisters a subnet from the hierarchy and returns its
    /// full collateral to the subnet actor.
    fn kill(rt: &mut impl Runtime) -> Result<(), ActorError> {
        rt.validate_immediate_caller_accept_any()?;

        let subnet_addr = rt.message().caller();
        let mut send_val = TokenAmount::zero();

        rt.transaction(|st: &mut State, rt| {
            let shid = SubnetID::new_from_parent(&st.network_name, subnet_addr);
            let sub = st.get_subnet(rt.store(), &shid).map_err(|e| {
                e.downcast_default(ExitCode::USR_ILLEGAL_STATE, "failed to load subnet")
            })?;
            match sub {
                Some(sub) => {
                    if rt.current_balance() < sub.stake {
                        return Err(actor_error!(
                            illegal_state,
                            "something went really wrong! the actor doesn't have enough balance to release"
                        ));
                    }
                    // Killing a subnet that still holds user funds
                    // would orphan them.
                    if sub.circ_supply > TokenAmount::zero() {
                        return Err(actor_error!(
                            forbidden,
                            "you can't kill a subnet where users haven't released their funds yet"
                        ));
                    }
                    send_val = sub.stake;
                    st.rm_subnet(rt.store(), &shid).map_err(|e| {
                        e.downcast_default(ExitCode::USR_ILLEGAL_STATE, "failed to remove subnet")
                    })?;
                    Ok(())
                }
                None => Err(actor_error!(
                    illegal_argument,
                    "subnet with id {} not registered",
                    shid
                )),
            }
        })?;

        rt.send(&subnet_addr, METHOD_SEND, None, send_val)?;
        Ok(())
    }

    /// CommitChildCheckpoint accepts a checkpoint committed by a child
    /// subnet, verifies that it chains to the previously committed one,
    /// and merges its cross-messages into the checkpoint of the current
    /// window.
    ///
    /// The child subnet is responsible for all the deep verifications
    /// of the checkpoint; the coordinator only enforces consistency.
    fn commit_child_check(
        rt: &mut impl Runtime,
        params: CheckpointParams,
    ) -> Result<(), ActorError> {
        // This must be called by a subnet actor; the ownership check on
        // the checkpoint source stands in for caller-type validation.
        rt.validate_immediate_caller_accept_any()?;

        let commit: Checkpoint = fvm_ipld_encoding::from_slice(&params.checkpoint)
            .map_err(|_| actor_error!(illegal_argument, "error decoding checkpoint in params"))?;

        let subnet_addr = rt.message().caller();
        if commit.source().subnet_actor() != subnet_addr {
            return Err(actor_error!(
                illegal_argument,
                "checkpoint committed doesn't belong to source subnet"
            ));
        }

        rt.transaction(|st: &mut State, rt| {
            let shid = SubnetID::new_from_parent(&st.network_name, subnet_addr);
            let sub = st.get_subnet(rt.store(), &shid).map_err(|e| {
                e.downcast_default(ExitCode::USR_ILLEGAL_STATE, "failed to load subnet")
            })?;
            let mut sub = match sub {
                Some(sub) => sub,
                None => {
                    return Err(actor_error!(
                        illegal_argument,
                        "subnet with id {} not registered",
                        shid
                    ))
                }
            };
            if sub.status != Status::Active {
                return Err(actor_error!(
                    illegal_state,
                    "can't commit checkpoint for an inactive subnet"
                ));
            }

            // window checkpoint being populated with child info
            let mut win = st
                .curr_window_checkpoint(rt.store(), rt.curr_epoch())
                .map_err(|e| {
                    e.downcast_default(
                        ExitCode::USR_ILLEGAL_STATE,
                        "failed to get current window checkpoint",
                    )
                })?;

            // if this is not the first checkpoint committed by the
            // child we need to verify that it chains to the last one.
            if let Some(ref prev) = sub.prev_checkpoint {
                if prev.epoch() > commit.epoch() {
                    return Err(actor_error!(
                        illegal_argument,
                        "checkpoint being committed belongs to the past"
                    ));
                }
                if commit.prev_check() != prev.cid() {
                    return Err(actor_error!(
                        illegal_argument,
                        "previous checkpoint not consistent with the last committed one"
                    ));
                }
            }

            // the value carried by the checkpoint's cross-messages
            // leaves the subnet and returns to the parent's custody
            let mut released = TokenAmount::zero();
            for m in commit.cross_msgs() {
                released += &m.value;
            }
            if !released.is_zero() {
                sub.release_supply(&released).map_err(|e| {
                    e.downcast_default(
                        ExitCode::USR_ILLEGAL_STATE,
                        "error releasing circulating supply",
                    )
                })?;
            }

            // route the cross-messages of the child checkpoint
            st.apply_check_msgs(rt.store(), &mut win, &commit)
                .map_err(|e| {
                    e.downcast_default(
                        ExitCode::USR_ILLEGAL_STATE,
                        "error applying child checkpoint cross-messages",
                    )
                })?;

            // append the new checkpoint to the list of children
            win.add_child_check(&commit);
            st.flush_checkpoint(rt.store(), &win).map_err(|e| {
                e.downcast_default(ExitCode::USR_ILLEGAL_STATE, "error flushing checkpoint")
            })?;

            sub.prev_checkpoint = Some(commit);
            st.flush_subnet(rt.store(), &sub).map_err(|e| {
                e.downcast_default(ExitCode::USR_ILLEGAL_STATE, "error flushing subnet")
            })?;
            Ok(())
        })?;

        Ok(())
    }

    /// Fund injects new funds from an account of the parent chain into
    /// a subnet.
    ///
    /// The funds received with the transaction are frozen in the
    /// coordinator and a fund cross-message addressed to the caller in
    /// the child is stored for miners to pick up, advancing the
    /// subnet's top-down nonce.
    fn fund(rt: &mut impl Runtime, params: SubnetID) -> Result<(), ActorError> {
        // funds can only be moved between subnets by signable addresses
        rt.validate_immediate_caller_type(CALLER_TYPES_SIGNABLE.iter())?;

        let value = rt.message().value_received();
        if value <= TokenAmount::zero() {
            return Err(actor_error!(
                illegal_argument,
                "no funds included in fund message"
            ));
        }

        let caller = rt.message().caller();
        let sig_addr = resolve_account_key(rt, &caller)?;

        rt.transaction(|st: &mut State, rt| {
            let mut f_msg = CrossMsg {
                msg: StorableMsg::new_fund_msg(&params, &sig_addr, value.clone()).map_err(|e| {
                    e.downcast_default(
                        ExitCode::USR_ILLEGAL_ARGUMENT,
                        "error creating fund cross-message",
                    )
                })?,
                wrapped: false,
            };

            log::debug!("fund cross msg is: {:?}", f_msg);

            st.commit_topdown_msg(rt.store(), &mut f_msg).map_err(|e| {
                e.downcast_default(
                    ExitCode::USR_ILLEGAL_ARGUMENT,
                    "error committing top-down message",
                )
            })?;
            Ok(())
        })?;

        Ok(())
    }

    /// Release burns the funds received with the transaction and
    /// records a bottom-up release message for the caller in the
    /// current window checkpoint, so the parent can mint the amount
    /// back on consumption.
    fn release(rt: &mut impl Runtime) -> Result<(), ActorError> {
        // funds can only be moved between subnets by signable addresses
        rt.validate_immediate_caller_type(CALLER_TYPES_SIGNABLE.iter())?;

        let value = rt.message().value_received();
        if value <= TokenAmount::zero() {
            return Err(actor_error!(
                illegal_argument,
                "no funds included in message"
            ));
        }

        let caller = rt.message().caller();
        let sig_addr = resolve_account_key(rt, &caller)?;

        rt.transaction(|st: &mut State, rt| {
            if st.nonce == MAX_NONCE {
                return Err(actor_error!(illegal_state, "maximum release nonce reached"));
            }
            let r_msg = StorableMsg::new_release_msg(
                &st.network_name,
                &sig_addr,
                value.clone(),
                st.nonce,
            )
            .map_err(|e| {
                e.downcast_default(
                    ExitCode::USR_ILLEGAL_STATE,
                    "error creating release cross-message",
                )
            })?;

            st.commit_release_msg(rt.store(), &r_msg, rt.curr_epoch())
                .map_err(|e| {
                    e.downcast_default(
                        ExitCode::USR_ILLEGAL_STATE,
                        "error committing release message",
                    )
                })?;
            st.nonce += 1;
            Ok(())
        })?;

        // burn the released funds, the parent mints them back on
        // consumption of the release message
        rt.send(&BURNT_FUNDS_ACTOR_ADDR, METHOD_SEND, None, value)?;
        Ok(())
    }
}

/// Resolves an address to the key address of its account actor, so
/// cross-net messages carry an address that stays meaningful outside
/// this subnet.
fn resolve_account_key(rt: &mut impl Runtime, addr: &Address) -> Result<Address, ActorError> {
    let ret = rt.send(
        addr,
        ext::account::PUBKEY_ADDRESS_METHOD,
        None,
        TokenAmount::zero(),
    )?;
    deserialize_block(ret)
}

impl ActorCode for Actor {
    type Methods = Method;

    actor_dispatch! {
        Constructor => constructor,
        Register => register,
        AddStake => add_stake,
        ReleaseStake => release_stake,
        Kill => kill,
        CommitChildCheckpoint => commit_child_check,
        Fund => fund,
        Release => release,
    }
}
