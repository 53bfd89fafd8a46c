use cid::Cid;
use fil_actors_runtime::builtin::HAMT_BIT_WIDTH;
use fil_actors_runtime::deserialize_block;
use fil_actors_runtime::runtime::builtins::Type;
use fil_actors_runtime::runtime::Runtime;
use fil_actors_runtime::test_utils::expect_abort;
use fil_actors_runtime::test_utils::{
    MockRuntime, ACCOUNT_ACTOR_CODE_ID, INIT_ACTOR_CODE_ID, MULTISIG_ACTOR_CODE_ID,
    SYSTEM_ACTOR_CODE_ID,
};
use fil_actors_runtime::{
    make_map_with_root_and_bitwidth, ActorError, Map, BURNT_FUNDS_ACTOR_ADDR, INIT_ACTOR_ADDR,
    SYSTEM_ACTOR_ADDR,
};
use fvm_ipld_encoding::ipld_block::IpldBlock;
use fvm_ipld_encoding::{to_vec, RawBytes};
use fvm_shared::address::Address;
use fvm_shared::bigint::Zero;
use fvm_shared::econ::TokenAmount;
use fvm_shared::error::ExitCode;
use fvm_shared::MethodNum;
use fvm_shared::METHOD_SEND;
use hc_sca::ext;
use hc_sca::{
    Actor, Checkpoint, CheckpointParams, ConstructorParams, FundParams, HcAddress, Method, State,
    Subnet, SubnetID, DEFAULT_CHECKPOINT_PERIOD,
};
use lazy_static::lazy_static;
use std::str::FromStr;

lazy_static! {
    pub static ref ROOTNET_ID: SubnetID = SubnetID::from_str("/root").unwrap();
    pub static ref SUBNET_ONE: Address = Address::new_id(101);
    pub static ref SUBNET_TWO: Address = Address::new_id(102);
    pub static ref TEST_BLS: Address =
        Address::new_bls(&[1; fvm_shared::address::BLS_PUB_LEN]).unwrap();
    pub static ref ACTOR: Address = Address::new_actor("actor".as_bytes());
    pub static ref SIG_TYPES: Vec<Type> = vec![Type::Account, Type::Multisig];
}

pub fn new_runtime() -> MockRuntime {
    MockRuntime {
        receiver: *ACTOR,
        caller: SYSTEM_ACTOR_ADDR,
        caller_type: *SYSTEM_ACTOR_CODE_ID,
        ..Default::default()
    }
}

pub fn new_harness(id: SubnetID) -> Harness {
    Harness { net_name: id }
}

pub fn setup_root() -> (Harness, MockRuntime) {
    setup(ROOTNET_ID.clone())
}

pub fn setup(id: SubnetID) -> (Harness, MockRuntime) {
    let mut rt = new_runtime();
    let h = new_harness(id);
    h.construct(&mut rt);
    (h, rt)
}

pub struct Harness {
    pub net_name: SubnetID,
}

impl Harness {
    pub fn construct(&self, rt: &mut MockRuntime) {
        rt.expect_validate_caller_addr(vec![INIT_ACTOR_ADDR]);
        let params = ConstructorParams {
            network_name: self.net_name.to_string(),
            checkpoint_period: 10,
        };
        rt.set_caller(*INIT_ACTOR_CODE_ID, INIT_ACTOR_ADDR);
        rt.call::<Actor>(
            Method::Constructor as MethodNum,
            IpldBlock::serialize_cbor(&params).unwrap(),
        )
        .unwrap();
        rt.verify();
    }

    pub fn construct_and_verify(&self, rt: &mut MockRuntime) {
        self.construct(rt);

        let st: State = rt.get_state();
        assert_eq!(st.network_name, self.net_name);
        assert_eq!(st.min_stake, TokenAmount::from_atto(hc_sca::MIN_COLLATERAL_AMOUNT));
        assert_eq!(st.check_period, DEFAULT_CHECKPOINT_PERIOD);
        assert_eq!(st.total_subnets, 0);
        assert_eq!(st.nonce, 0);
        assert_eq!(st.bottomup_nonce, 0);
        assert_eq!(st.applied_bottomup_nonce, hc_sca::MAX_NONCE);
        assert_eq!(st.applied_topdown_nonce, 0);
        verify_empty_map::<Subnet>(rt, st.subnets);
        verify_empty_map::<Checkpoint>(rt, st.checkpoints);
        verify_empty_map::<hc_sca::CrossMsgs>(rt, st.check_msgs_registry);
    }

    pub fn register(
        &self,
        rt: &mut MockRuntime,
        subnet_addr: &Address,
        value: &TokenAmount,
        code: ExitCode,
    ) -> Result<(), ActorError> {
        rt.set_caller(*MULTISIG_ACTOR_CODE_ID, *subnet_addr);
        rt.set_received(value.clone());
        rt.set_balance(value.clone());
        rt.expect_validate_caller_any();

        if code != ExitCode::OK {
            expect_abort(code, rt.call::<Actor>(Method::Register as MethodNum, None));
            rt.verify();
            return Ok(());
        }

        let register_ret = SubnetID::new_from_parent(&self.net_name, *subnet_addr);
        let ret = rt
            .call::<Actor>(Method::Register as MethodNum, None)
            .unwrap();
        rt.verify();
        let ret: SubnetID = deserialize_block(ret).unwrap();
        assert_eq!(ret, register_ret);
        Ok(())
    }

    pub fn add_stake(
        &self,
        rt: &mut MockRuntime,
        id: &SubnetID,
        value: &TokenAmount,
        code: ExitCode,
    ) -> Result<(), ActorError> {
        rt.set_caller(*MULTISIG_ACTOR_CODE_ID, id.subnet_actor());
        rt.set_received(value.clone());
        rt.expect_validate_caller_any();

        if code != ExitCode::OK {
            expect_abort(code, rt.call::<Actor>(Method::AddStake as MethodNum, None));
            rt.verify();
            return Ok(());
        }

        rt.call::<Actor>(Method::AddStake as MethodNum, None)
            .unwrap();
        rt.verify();

        Ok(())
    }

    pub fn release_stake(
        &self,
        rt: &mut MockRuntime,
        id: &SubnetID,
        value: &TokenAmount,
        code: ExitCode,
    ) -> Result<(), ActorError> {
        rt.set_caller(*MULTISIG_ACTOR_CODE_ID, id.subnet_actor());
        rt.set_received(TokenAmount::zero());
        rt.expect_validate_caller_any();

        let params = FundParams {
            value: value.clone(),
        };

        if code != ExitCode::OK {
            expect_abort(
                code,
                rt.call::<Actor>(
                    Method::ReleaseStake as MethodNum,
                    IpldBlock::serialize_cbor(&params).unwrap(),
                ),
            );
            rt.verify();
            return Ok(());
        }

        rt.expect_send(
            id.subnet_actor(),
            METHOD_SEND,
            None,
            value.clone(),
            None,
            ExitCode::OK,
        );
        rt.call::<Actor>(
            Method::ReleaseStake as MethodNum,
            IpldBlock::serialize_cbor(&params).unwrap(),
        )
        .unwrap();
        rt.verify();

        Ok(())
    }

    pub fn kill(
        &self,
        rt: &mut MockRuntime,
        id: &SubnetID,
        release_value: &TokenAmount,
        code: ExitCode,
    ) -> Result<(), ActorError> {
        rt.set_caller(*MULTISIG_ACTOR_CODE_ID, id.subnet_actor());
        rt.set_received(TokenAmount::zero());
        rt.expect_validate_caller_any();

        if code != ExitCode::OK {
            expect_abort(code, rt.call::<Actor>(Method::Kill as MethodNum, None));
            rt.verify();
            return Ok(());
        }

        rt.expect_send(
            id.subnet_actor(),
            METHOD_SEND,
            None,
            release_value.clone(),
            None,
            ExitCode::OK,
        );
        rt.call::<Actor>(Method::Kill as MethodNum, None).unwrap();
        rt.verify();

        Ok(())
    }

    pub fn commit_child_check(
        &self,
        rt: &mut MockRuntime,
        id: &SubnetID,
        ch: &Checkpoint,
        code: ExitCode,
    ) -> Result<(), ActorError> {
        rt.set_caller(*MULTISIG_ACTOR_CODE_ID, id.subnet_actor());
        rt.set_received(TokenAmount::zero());
        rt.expect_validate_caller_any();

        let params = CheckpointParams {
            checkpoint: RawBytes::new(to_vec(ch).unwrap()),
        };

        if code != ExitCode::OK {
            expect_abort(
                code,
                rt.call::<Actor>(
                    Method::CommitChildCheckpoint as MethodNum,
                    IpldBlock::serialize_cbor(&params).unwrap(),
                ),
            );
            rt.verify();
            return Ok(());
        }
        rt.call::<Actor>(
            Method::CommitChildCheckpoint as MethodNum,
            IpldBlock::serialize_cbor(&params).unwrap(),
        )
        .unwrap();
        rt.verify();

        Ok(())
    }

    pub fn fund(
        &self,
        rt: &mut MockRuntime,
        funder: &Address,
        id: &SubnetID,
        code: ExitCode,
        value: TokenAmount,
        expected_nonce: u64,
        expected_circ_sup: &TokenAmount,
    ) -> Result<(), ActorError> {
        rt.set_caller(*ACCOUNT_ACTOR_CODE_ID, *funder);
        rt.expect_validate_caller_type(SIG_TYPES.clone());
        rt.set_received(value.clone());

        if !value.is_zero() {
            // the caller is resolved to its key address before the
            // cross-message is built
            rt.expect_send(
                *funder,
                ext::account::PUBKEY_ADDRESS_METHOD,
                None,
                TokenAmount::zero(),
                IpldBlock::serialize_cbor(&*TEST_BLS).unwrap(),
                ExitCode::OK,
            );
        }

        if code != ExitCode::OK {
            expect_abort(
                code,
                rt.call::<Actor>(
                    Method::Fund as MethodNum,
                    IpldBlock::serialize_cbor(&id).unwrap(),
                ),
            );
            rt.verify();
            return Ok(());
        }

        rt.call::<Actor>(
            Method::Fund as MethodNum,
            IpldBlock::serialize_cbor(&id).unwrap(),
        )
        .unwrap();
        rt.verify();

        let sub = self.get_subnet(rt, id).unwrap();
        let crossmsgs = hc_sca::CrossMsgArray::load(&sub.top_down_msgs, rt.store()).unwrap();
        let msg = hc_sca::get_topdown_msg(&crossmsgs, expected_nonce - 1)
            .unwrap()
            .unwrap();
        assert_eq!(&sub.circ_supply, expected_circ_sup);
        assert_eq!(sub.nonce, expected_nonce);
        let from = HcAddress::new(&self.net_name, &TEST_BLS).unwrap();
        let to = HcAddress::new(id, &TEST_BLS).unwrap();
        assert_eq!(msg.from, from);
        assert_eq!(msg.to, to);
        assert_eq!(msg.nonce, expected_nonce - 1);
        assert_eq!(msg.value, value);

        Ok(())
    }

    pub fn release(
        &self,
        rt: &mut MockRuntime,
        releaser: &Address,
        code: ExitCode,
        value: TokenAmount,
        expected_nonce: u64,
        prev_meta: &Cid,
    ) -> Result<Cid, ActorError> {
        rt.set_caller(*ACCOUNT_ACTOR_CODE_ID, *releaser);
        rt.expect_validate_caller_type(SIG_TYPES.clone());
        rt.set_received(value.clone());

        if !value.is_zero() {
            rt.expect_send(
                *releaser,
                ext::account::PUBKEY_ADDRESS_METHOD,
                None,
                TokenAmount::zero(),
                IpldBlock::serialize_cbor(&*TEST_BLS).unwrap(),
                ExitCode::OK,
            );
        }

        if code != ExitCode::OK {
            expect_abort(code, rt.call::<Actor>(Method::Release as MethodNum, None));
            rt.verify();
            return Ok(Cid::default());
        }

        rt.expect_send(
            BURNT_FUNDS_ACTOR_ADDR,
            METHOD_SEND,
            None,
            value.clone(),
            None,
            ExitCode::OK,
        );
        rt.call::<Actor>(Method::Release as MethodNum, None)
            .unwrap();
        rt.verify();

        let st: State = rt.get_state();

        let parent = self.net_name.parent().unwrap();
        let from = HcAddress::new(&self.net_name, &BURNT_FUNDS_ACTOR_ADDR).unwrap();
        let to = HcAddress::new(&parent, &TEST_BLS).unwrap();
        let ch = st
            .curr_window_checkpoint(rt.store(), rt.curr_epoch())
            .unwrap();
        let chmeta = ch.crossmsg_meta(&self.net_name, &parent).unwrap();

        let meta = st
            .get_cross_msgs(rt.store(), &chmeta.msgs_cid)
            .unwrap()
            .unwrap();
        let msg = meta.msgs[expected_nonce as usize].clone();

        assert_eq!(meta.msgs.len(), (expected_nonce + 1) as usize);
        assert_eq!(msg.msg.from, from);
        assert_eq!(msg.msg.to, to);
        assert_eq!(msg.msg.nonce, expected_nonce);
        assert_eq!(msg.msg.value, value);

        if prev_meta != &Cid::default() {
            // the superseded bundle is dropped from the registry
            assert!(st.get_cross_msgs(rt.store(), prev_meta).unwrap().is_none());
        }

        Ok(chmeta.msgs_cid)
    }

    pub fn get_subnet(&self, rt: &MockRuntime, id: &SubnetID) -> Option<Subnet> {
        let st: State = rt.get_state();
        st.get_subnet(rt.store(), id).unwrap()
    }

    pub fn check_state(&self) {
        // TODO: https://github.com/filecoin-project/builtin-actors/issues/44
    }
}

pub fn verify_empty_map<V>(rt: &MockRuntime, key: Cid)
where
    V: serde::de::DeserializeOwned + serde::Serialize,
{
    let map: Map<_, V> =
        make_map_with_root_and_bitwidth(&key, rt.store(), HAMT_BIT_WIDTH).unwrap();
    map.for_each(|_key, _val| panic!("expected no keys"))
        .unwrap();
}
