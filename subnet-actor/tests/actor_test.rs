#[cfg(test)]
mod test {
    use fil_actors_runtime::runtime::builtins::Type;
    use fil_actors_runtime::runtime::Runtime;
    use fil_actors_runtime::test_utils::{
        expect_abort, MockRuntime, ACCOUNT_ACTOR_CODE_ID, INIT_ACTOR_CODE_ID,
    };
    use fil_actors_runtime::INIT_ACTOR_ADDR;
    use fvm_ipld_encoding::ipld_block::IpldBlock;
    use fvm_ipld_encoding::{to_vec, RawBytes};
    use fvm_shared::address::Address;
    use fvm_shared::econ::TokenAmount;
    use fvm_shared::error::ExitCode;
    use fvm_shared::MethodNum;
    use hc_sca::{Checkpoint, CheckpointParams, FundParams, SubnetID, MIN_COLLATERAL_AMOUNT};
    use hc_subnet_actor::{Actor, ConsensusType, ConstructParams, Method, State, Status};
    use lazy_static::lazy_static;
    use num_traits::Zero;
    use std::str::FromStr;

    // just a test address
    const SCA_ADDR: u64 = 1024;
    const NETWORK_NAME: &str = "test";

    lazy_static! {
        pub static ref SIG_TYPES: Vec<Type> = vec![Type::Account, Type::Multisig];
    }

    fn std_construct_param() -> ConstructParams {
        ConstructParams {
            parent: SubnetID::from_str("/root").unwrap(),
            name: NETWORK_NAME.to_string(),
            sca_addr: SCA_ADDR,
            consensus: ConsensusType::PoW,
            min_miner_stake: Default::default(),
            check_period: 10,
            genesis: vec![],
        }
    }

    pub fn new_runtime(receiver: Address) -> MockRuntime {
        MockRuntime {
            receiver,
            caller: INIT_ACTOR_ADDR,
            caller_type: *INIT_ACTOR_CODE_ID,
            ..Default::default()
        }
    }

    fn construct_runtime_with_receiver(receiver: Address) -> MockRuntime {
        let mut runtime = new_runtime(receiver);
        runtime.set_caller(*INIT_ACTOR_CODE_ID, INIT_ACTOR_ADDR);
        runtime.expect_validate_caller_addr(vec![INIT_ACTOR_ADDR]);

        let params = std_construct_param();
        runtime
            .call::<Actor>(
                Method::Constructor as MethodNum,
                IpldBlock::serialize_cbor(&params).unwrap(),
            )
            .unwrap();

        runtime
    }

    fn construct_runtime() -> MockRuntime {
        construct_runtime_with_receiver(Address::new_id(1))
    }

    fn min_stake() -> TokenAmount {
        TokenAmount::from_atto(MIN_COLLATERAL_AMOUNT)
    }

    /// Joins the subnet with the given caller, expecting the subnet
    /// actor to forward the stake to the coordinator.
    fn join(
        runtime: &mut MockRuntime,
        caller: &Address,
        value: TokenAmount,
        expected_method: MethodNum,
        expected_value: TokenAmount,
    ) {
        runtime.set_caller(*ACCOUNT_ACTOR_CODE_ID, *caller);
        runtime.expect_validate_caller_type(SIG_TYPES.clone());
        runtime.set_received(value.clone());
        runtime.set_balance(expected_value.clone());
        runtime.expect_send(
            Address::new_id(SCA_ADDR),
            expected_method,
            None,
            expected_value,
            None,
            ExitCode::OK,
        );
        runtime
            .call::<Actor>(Method::Join as MethodNum, None)
            .unwrap();
        runtime.verify();
    }

    #[test]
    fn test_constructor() {
        let runtime = construct_runtime();

        let state: State = runtime.get_state();
        assert_eq!(state.name, NETWORK_NAME);
        assert_eq!(state.sca_addr, Address::new_id(SCA_ADDR));
        assert_eq!(state.status, Status::Instantiated);
        assert_eq!(state.total_stake, TokenAmount::zero());
        assert_eq!(state.min_miner_stake, min_stake());
        assert!(state.miners.is_empty());
    }

    #[test]
    fn test_join_fail_no_collateral() {
        let mut runtime = construct_runtime();

        let miner = Address::new_id(100);
        runtime.set_caller(*ACCOUNT_ACTOR_CODE_ID, miner);
        runtime.expect_validate_caller_type(SIG_TYPES.clone());
        runtime.set_received(TokenAmount::zero());

        expect_abort(
            ExitCode::USR_ILLEGAL_ARGUMENT,
            runtime.call::<Actor>(Method::Join as MethodNum, None),
        );
        runtime.verify();
    }

    #[test]
    fn test_join_under_threshold_no_registration() {
        let mut runtime = construct_runtime();

        // join with half the collateral required to register
        let miner = Address::new_id(100);
        let value = TokenAmount::from_atto(5 * 10_u64.pow(17));
        runtime.set_caller(*ACCOUNT_ACTOR_CODE_ID, miner);
        runtime.expect_validate_caller_type(SIG_TYPES.clone());
        runtime.set_received(value.clone());
        runtime
            .call::<Actor>(Method::Join as MethodNum, None)
            .unwrap();
        runtime.verify();

        let state: State = runtime.get_state();
        assert_eq!(state.status, Status::Instantiated);
        assert_eq!(state.total_stake, value);
        assert_eq!(
            state.get_stake(runtime.store(), &miner).unwrap(),
            Some(value)
        );
        // stake below the mining minimum grants no mining rights
        assert!(state.miners.is_empty());
    }

    #[test]
    fn test_join_registers_and_adds_stake() {
        let mut runtime = construct_runtime();

        // first miner crossing the collateral threshold triggers the
        // registration of the subnet in the coordinator
        let miner1 = Address::new_id(100);
        join(
            &mut runtime,
            &miner1,
            min_stake(),
            hc_sca::Method::Register as MethodNum,
            min_stake(),
        );

        let state: State = runtime.get_state();
        assert_eq!(state.status, Status::Active);
        assert_eq!(state.total_stake, min_stake());
        assert_eq!(state.miners, vec![miner1]);

        // further joins add stake on top
        let miner2 = Address::new_id(101);
        join(
            &mut runtime,
            &miner2,
            min_stake(),
            hc_sca::Method::AddStake as MethodNum,
            min_stake(),
        );

        let state: State = runtime.get_state();
        assert_eq!(state.total_stake, min_stake() * 2);
        assert_eq!(state.miners, vec![miner1, miner2]);
    }

    #[test]
    fn test_leave_and_kill() {
        let mut runtime = construct_runtime();

        let miner1 = Address::new_id(100);
        let miner2 = Address::new_id(101);
        join(
            &mut runtime,
            &miner1,
            min_stake(),
            hc_sca::Method::Register as MethodNum,
            min_stake(),
        );
        join(
            &mut runtime,
            &miner2,
            min_stake(),
            hc_sca::Method::AddStake as MethodNum,
            min_stake(),
        );

        // killing with miners around is not allowed
        runtime.set_caller(*ACCOUNT_ACTOR_CODE_ID, miner1);
        runtime.expect_validate_caller_any();
        runtime.set_received(TokenAmount::zero());
        runtime.set_balance(TokenAmount::zero());
        expect_abort(
            ExitCode::USR_ILLEGAL_STATE,
            runtime.call::<Actor>(Method::Kill as MethodNum, None),
        );
        runtime.verify();

        // miner2 leaves and recovers its full stake
        runtime.set_caller(*ACCOUNT_ACTOR_CODE_ID, miner2);
        runtime.expect_validate_caller_type(SIG_TYPES.clone());
        runtime.set_received(TokenAmount::zero());
        runtime.expect_send(
            Address::new_id(SCA_ADDR),
            hc_sca::Method::ReleaseStake as MethodNum,
            IpldBlock::serialize_cbor(&FundParams { value: min_stake() }).unwrap(),
            TokenAmount::zero(),
            None,
            ExitCode::OK,
        );
        runtime
            .call::<Actor>(Method::Leave as MethodNum, None)
            .unwrap();
        runtime.verify();

        let state: State = runtime.get_state();
        assert_eq!(state.total_stake, min_stake());
        assert_eq!(state.miners, vec![miner1]);
        assert_eq!(
            state.get_stake(runtime.store(), &miner2).unwrap(),
            Some(TokenAmount::zero())
        );

        // leaving with no stake fails
        runtime.set_caller(*ACCOUNT_ACTOR_CODE_ID, miner2);
        runtime.expect_validate_caller_type(SIG_TYPES.clone());
        expect_abort(
            ExitCode::USR_ILLEGAL_STATE,
            runtime.call::<Actor>(Method::Leave as MethodNum, None),
        );
        runtime.verify();

        // last miner leaves, the subnet loses the minimum stake
        runtime.set_caller(*ACCOUNT_ACTOR_CODE_ID, miner1);
        runtime.expect_validate_caller_type(SIG_TYPES.clone());
        runtime.expect_send(
            Address::new_id(SCA_ADDR),
            hc_sca::Method::ReleaseStake as MethodNum,
            IpldBlock::serialize_cbor(&FundParams { value: min_stake() }).unwrap(),
            TokenAmount::zero(),
            None,
            ExitCode::OK,
        );
        runtime
            .call::<Actor>(Method::Leave as MethodNum, None)
            .unwrap();
        runtime.verify();

        let state: State = runtime.get_state();
        assert_eq!(state.status, Status::Inactive);
        assert_eq!(state.total_stake, TokenAmount::zero());

        // now the kill signal can be propagated
        runtime.set_caller(*ACCOUNT_ACTOR_CODE_ID, miner1);
        runtime.set_balance(TokenAmount::zero());
        runtime.expect_validate_caller_any();
        runtime.expect_send(
            Address::new_id(SCA_ADDR),
            hc_sca::Method::Kill as MethodNum,
            None,
            TokenAmount::zero(),
            None,
            ExitCode::OK,
        );
        runtime
            .call::<Actor>(Method::Kill as MethodNum, None)
            .unwrap();
        runtime.verify();

        let state: State = runtime.get_state();
        assert_eq!(state.status, Status::Killed);
    }

    #[test]
    fn test_submit_checkpoint_majority() {
        let receiver = Address::new_id(1);
        let mut runtime = construct_runtime_with_receiver(receiver);

        // three miners join the subnet
        let miners: Vec<Address> = (100..103).map(Address::new_id).collect();
        join(
            &mut runtime,
            &miners[0],
            min_stake(),
            hc_sca::Method::Register as MethodNum,
            min_stake(),
        );
        for m in &miners[1..] {
            join(
                &mut runtime,
                m,
                min_stake(),
                hc_sca::Method::AddStake as MethodNum,
                min_stake(),
            );
        }

        // checkpoint for the signing window at epoch 110
        runtime.set_epoch(110);
        let source = SubnetID::new_from_parent(&SubnetID::from_str("/root").unwrap(), receiver);
        let ch = Checkpoint::new(source.clone(), 100);

        // a non-miner can't vote
        let stranger = Address::new_id(999);
        runtime.set_caller(*ACCOUNT_ACTOR_CODE_ID, stranger);
        runtime.expect_validate_caller_type(SIG_TYPES.clone());
        expect_abort(
            ExitCode::USR_FORBIDDEN,
            runtime.call::<Actor>(
                Method::SubmitCheckpoint as MethodNum,
                IpldBlock::serialize_cbor(&ch).unwrap(),
            ),
        );
        runtime.verify();

        // first vote: 1/3 is below the threshold, nothing forwarded
        runtime.set_caller(*ACCOUNT_ACTOR_CODE_ID, miners[0]);
        runtime.expect_validate_caller_type(SIG_TYPES.clone());
        runtime
            .call::<Actor>(
                Method::SubmitCheckpoint as MethodNum,
                IpldBlock::serialize_cbor(&ch).unwrap(),
            )
            .unwrap();
        runtime.verify();

        let state: State = runtime.get_state();
        let votes = state
            .get_votes(runtime.store(), &ch.cid())
            .unwrap()
            .unwrap();
        assert_eq!(votes.miners, vec![miners[0]]);

        // voting twice is rejected
        runtime.set_caller(*ACCOUNT_ACTOR_CODE_ID, miners[0]);
        runtime.expect_validate_caller_type(SIG_TYPES.clone());
        expect_abort(
            ExitCode::USR_ILLEGAL_ARGUMENT,
            runtime.call::<Actor>(
                Method::SubmitCheckpoint as MethodNum,
                IpldBlock::serialize_cbor(&ch).unwrap(),
            ),
        );
        runtime.verify();

        // second vote reaches 2/3: the checkpoint is committed to the
        // coordinator exactly once and the tally cleared
        runtime.set_caller(*ACCOUNT_ACTOR_CODE_ID, miners[1]);
        runtime.expect_validate_caller_type(SIG_TYPES.clone());
        runtime.expect_send(
            Address::new_id(SCA_ADDR),
            hc_sca::Method::CommitChildCheckpoint as MethodNum,
            IpldBlock::serialize_cbor(&CheckpointParams {
                checkpoint: RawBytes::new(to_vec(&ch).unwrap()),
            })
            .unwrap(),
            TokenAmount::zero(),
            None,
            ExitCode::OK,
        );
        runtime
            .call::<Actor>(
                Method::SubmitCheckpoint as MethodNum,
                IpldBlock::serialize_cbor(&ch).unwrap(),
            )
            .unwrap();
        runtime.verify();

        let state: State = runtime.get_state();
        assert!(state
            .get_votes(runtime.store(), &ch.cid())
            .unwrap()
            .is_none());
        assert_eq!(
            state.get_checkpoint(runtime.store(), 100).unwrap(),
            Some(ch.clone())
        );

        // checkpoints outside the signing window are rejected
        let late = Checkpoint::new(source.clone(), 110);
        runtime.set_caller(*ACCOUNT_ACTOR_CODE_ID, miners[2]);
        runtime.expect_validate_caller_type(SIG_TYPES.clone());
        expect_abort(
            ExitCode::USR_ILLEGAL_ARGUMENT,
            runtime.call::<Actor>(
                Method::SubmitCheckpoint as MethodNum,
                IpldBlock::serialize_cbor(&late).unwrap(),
            ),
        );
        runtime.verify();

        // the next window's checkpoint has to chain to the committed
        // one
        runtime.set_epoch(120);
        let unchained = Checkpoint::new(source.clone(), 110);
        runtime.set_caller(*ACCOUNT_ACTOR_CODE_ID, miners[2]);
        runtime.expect_validate_caller_type(SIG_TYPES.clone());
        expect_abort(
            ExitCode::USR_ILLEGAL_ARGUMENT,
            runtime.call::<Actor>(
                Method::SubmitCheckpoint as MethodNum,
                IpldBlock::serialize_cbor(&unchained).unwrap(),
            ),
        );
        runtime.verify();

        let mut chained = Checkpoint::new(source, 110);
        chained.data.prev_check = ch.cid();
        runtime.set_caller(*ACCOUNT_ACTOR_CODE_ID, miners[2]);
        runtime.expect_validate_caller_type(SIG_TYPES.clone());
        runtime
            .call::<Actor>(
                Method::SubmitCheckpoint as MethodNum,
                IpldBlock::serialize_cbor(&chained).unwrap(),
            )
            .unwrap();
        runtime.verify();

        let state: State = runtime.get_state();
        let votes = state
            .get_votes(runtime.store(), &chained.cid())
            .unwrap()
            .unwrap();
        assert_eq!(votes.miners, vec![miners[2]]);
    }
}
