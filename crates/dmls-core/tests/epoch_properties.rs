//! Property tests for epoch determinism and state persistence.

mod common;

use common::{agent, authenticator, delivered, encrypt, epoch, process, run, three_member_group};
use dmls_core::{AgentState, Command, Outcome, SeededEnv};
use proptest::prelude::*;

#[derive(Debug, Clone, Copy)]
enum Step {
    Message,
    AliceUpdate,
    BobUpdate,
    EmptyCommit,
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![Just(Step::Message), Just(Step::AliceUpdate), Just(Step::BobUpdate), Just(Step::EmptyCommit),]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// PROPERTY: members applying the same commits stay on the same epoch
    /// with identical secrets, and each commit advances the epoch by one.
    #[test]
    fn members_converge(seed in any::<u64>(), steps in prop::collection::vec(step(), 1..6)) {
        let env = SeededEnv::with_seed(seed);
        let (mut alice, mut bob, mut charlie) = three_member_group(&env);

        for step in steps {
            let before = epoch(&alice);
            match step {
                Step::Message => {
                    let message = encrypt(&mut alice, b"ping");
                    let bob_events = process(&mut bob, &message);
                    prop_assert_eq!(delivered(&bob_events[0]), b"ping");
                    let charlie_events = process(&mut charlie, &message);
                    prop_assert_eq!(delivered(&charlie_events[0]), b"ping");
                    continue;
                },
                Step::AliceUpdate => {
                    let proposal = run(&mut alice, Command::Update);
                    process(&mut bob, &proposal);
                    process(&mut charlie, &proposal);
                },
                Step::BobUpdate => {
                    let proposal = run(&mut bob, Command::Update);
                    process(&mut alice, &proposal);
                    process(&mut charlie, &proposal);
                },
                Step::EmptyCommit => {},
            }

            let commit = run(&mut alice, Command::Commit);
            prop_assert_eq!(&process(&mut bob, &commit)[0], &Outcome::Applied { epoch: before + 1 });
            prop_assert_eq!(&process(&mut charlie, &commit)[0], &Outcome::Applied { epoch: before + 1 });

            prop_assert_eq!(epoch(&alice), before + 1);
            prop_assert_eq!(authenticator(&alice), authenticator(&bob));
            prop_assert_eq!(authenticator(&alice), authenticator(&charlie));
        }
    }

    /// PROPERTY: load(store(state)) == state at any point of a group's life.
    #[test]
    fn state_round_trips(seed in any::<u64>(), commits in 0usize..3, messages in 0usize..3) {
        let env = SeededEnv::with_seed(seed);
        let (mut alice, mut bob, _charlie) = three_member_group(&env);

        for _ in 0..commits {
            let commit = run(&mut alice, Command::Commit);
            process(&mut bob, &commit);
        }
        for _ in 0..messages {
            let message = encrypt(&mut alice, b"m");
            process(&mut bob, &message);
        }
        run(&mut bob, Command::Update);

        for state in [alice.state(), bob.state()] {
            let bytes = state.store().unwrap();
            prop_assert_eq!(&AgentState::load(&bytes).unwrap(), state);
        }
    }

    /// PROPERTY: arbitrary bytes never load as state or panic the agent.
    #[test]
    fn garbage_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
        let _ = AgentState::load(&bytes);

        let env = SeededEnv::with_seed(0);
        let mut alice = agent(&env);
        let _ = alice.execute(Command::Process { stream: bytes });
    }
}

#[test]
fn identical_seeds_replay_identically() {
    let run_once = || {
        let env = SeededEnv::with_seed(99);
        let (mut alice, _bob, _charlie) = three_member_group(&env);
        let message = encrypt(&mut alice, b"deterministic");
        (message, alice.state().store().unwrap())
    };

    assert_eq!(run_once(), run_once());
}
