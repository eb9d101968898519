//! Multi-participant scenarios driven through the agent.
//!
//! Each participant has its own state and the test plays the transport,
//! handing frame streams from one to another.

mod common;

use common::{
    agent, agent_with, authenticator, delivered, encrypt, epoch, error_code, key_package, process, run, split,
    three_member_group,
};
use dmls_core::{Agent, AgentConfig, Command, DmlsError, EntropyError, Environment, Outcome, SeededEnv};

#[test]
fn three_members_exchange_messages_across_a_commit() {
    let env = SeededEnv::with_seed(1);
    let (mut alice, mut bob, mut charlie) = three_member_group(&env);

    let hello = encrypt(&mut alice, b"hello");
    assert_eq!(delivered(&process(&mut bob, &hello)[0]), b"hello");
    assert_eq!(delivered(&process(&mut charlie, &hello)[0]), b"hello");

    // sent at epoch 0, delivered after the commit
    let late = encrypt(&mut alice, b"late");

    let proposal = run(&mut alice, Command::Update);
    let commit = run(&mut alice, Command::Commit);
    assert_eq!(epoch(&alice), 1);

    for member in [&mut bob, &mut charlie] {
        let outcomes = process(member, &[proposal.clone(), commit.clone()].concat());
        assert!(matches!(outcomes[0], Outcome::Queued { sender: 0, .. }));
        assert_eq!(outcomes[1], Outcome::Applied { epoch: 1 });
    }

    // PROPERTY: every member derived the same epoch secret
    assert_eq!(authenticator(&alice), authenticator(&bob));
    assert_eq!(authenticator(&alice), authenticator(&charlie));

    let mut forged = late.clone();
    let last = forged.len() - 1;
    forged[last] ^= 0x01;
    assert_eq!(error_code(&process(&mut bob, &forged)[0]), "authentication_failure");

    assert_eq!(delivered(&process(&mut bob, &late)[0]), b"late");

    let reply = encrypt(&mut bob, b"reply at epoch 1");
    assert_eq!(delivered(&process(&mut alice, &reply)[0]), b"reply at epoch 1");
    assert_eq!(delivered(&process(&mut charlie, &reply)[0]), b"reply at epoch 1");
}

#[test]
fn replayed_message_is_rejected() {
    let env = SeededEnv::with_seed(2);
    let (mut alice, mut bob, _charlie) = three_member_group(&env);

    let message = encrypt(&mut alice, b"once");
    assert_eq!(delivered(&process(&mut bob, &message)[0]), b"once");

    let outcomes = process(&mut bob, &message);
    assert_eq!(outcomes[0], Outcome::Failed(DmlsError::ReplayedCounter { sender_index: 0, counter: 0 }));
}

#[test]
fn out_of_order_messages_within_window_decrypt_once() {
    let env = SeededEnv::with_seed(3);
    let (mut alice, mut bob, _charlie) = three_member_group(&env);

    let first = encrypt(&mut alice, b"first");
    let second = encrypt(&mut alice, b"second");

    assert_eq!(delivered(&process(&mut bob, &second)[0]), b"second");

    // skipped keys are discarded, so the earlier counter is now a replay
    assert_eq!(error_code(&process(&mut bob, &first)[0]), "replayed_counter");
}

#[test]
fn message_two_epochs_old_is_too_old() {
    let env = SeededEnv::with_seed(4);
    let (mut alice, mut bob, mut charlie) = three_member_group(&env);

    let stale = encrypt(&mut alice, b"stale");

    for _ in 0..2 {
        let commit = run(&mut alice, Command::Commit);
        assert!(matches!(process(&mut bob, &commit)[0], Outcome::Applied { .. }));
        assert!(matches!(process(&mut charlie, &commit)[0], Outcome::Applied { .. }));
    }
    assert_eq!(epoch(&bob), 2);

    let outcomes = process(&mut bob, &stale);
    assert_eq!(outcomes[0], Outcome::Failed(DmlsError::EpochTooOld { epoch: 0, oldest: 1 }));
}

#[test]
fn retention_disabled_rejects_previous_epoch() {
    let env = SeededEnv::with_seed(5);
    let config = AgentConfig { retention_epochs: 0, ..AgentConfig::default() };
    let mut alice = agent(&env);
    let mut bob = agent_with(&env, config);

    let welcome = run(&mut alice, Command::CreateGroup { key_packages: key_package(&mut bob) });
    assert!(matches!(process(&mut bob, &welcome)[0], Outcome::Joined { .. }));

    let message = encrypt(&mut alice, b"before commit");
    let commit = run(&mut alice, Command::Commit);
    assert_eq!(process(&mut bob, &commit)[0], Outcome::Applied { epoch: 1 });

    assert_eq!(error_code(&process(&mut bob, &message)[0]), "epoch_too_old");
}

#[test]
fn commit_for_wrong_epoch_is_rejected() {
    let env = SeededEnv::with_seed(6);
    let (mut alice, mut bob, _charlie) = three_member_group(&env);

    let first = run(&mut alice, Command::Commit);
    let second = run(&mut alice, Command::Commit);

    // INVARIANT: commits are not buffered; a gap fails closed
    let outcomes = process(&mut bob, &second);
    assert_eq!(outcomes[0], Outcome::Failed(DmlsError::EpochMismatch { expected: 0, actual: 1 }));
    assert_eq!(epoch(&bob), 0);

    assert_eq!(process(&mut bob, &first)[0], Outcome::Applied { epoch: 1 });
    assert_eq!(process(&mut bob, &second)[0], Outcome::Applied { epoch: 2 });
}

#[test]
fn own_artifacts_are_ignored() {
    let env = SeededEnv::with_seed(7);
    let (mut alice, _bob, _charlie) = three_member_group(&env);

    let message = encrypt(&mut alice, b"mine");
    assert!(matches!(process(&mut alice, &message)[0], Outcome::Ignored { .. }));

    let commit = run(&mut alice, Command::Commit);
    assert!(matches!(process(&mut alice, &commit)[0], Outcome::Ignored { .. }));
    assert_eq!(epoch(&alice), 1);
}

#[test]
fn batch_keeps_successes_and_reports_failures() {
    let env = SeededEnv::with_seed(8);
    let (mut alice, mut bob, _charlie) = three_member_group(&env);

    let one = encrypt(&mut alice, b"one");
    let mut broken = encrypt(&mut alice, b"two");
    let last = broken.len() - 1;
    broken[last] ^= 0x01;
    let three = encrypt(&mut alice, b"three");

    let outcomes = process(&mut bob, &[one, broken, three].concat());
    assert_eq!(delivered(&outcomes[0]), b"one");
    assert_eq!(error_code(&outcomes[1]), "authentication_failure");
    assert_eq!(delivered(&outcomes[2]), b"three");
}

#[test]
fn truncated_stream_reports_malformed_and_stops() {
    let env = SeededEnv::with_seed(9);
    let (mut alice, mut bob, _charlie) = three_member_group(&env);

    let one = encrypt(&mut alice, b"one");
    let two = encrypt(&mut alice, b"two");
    let stream = [one.as_slice(), &two[..two.len() - 4]].concat();

    let outcomes = process(&mut bob, &stream);
    assert_eq!(outcomes.len(), 2);
    assert_eq!(delivered(&outcomes[0]), b"one");
    assert_eq!(error_code(&outcomes[1]), "malformed_message");
}

#[test]
fn welcome_cannot_be_consumed_twice() {
    let env = SeededEnv::with_seed(10);
    let mut alice = agent(&env);
    let mut bob = agent(&env);

    let welcome = run(&mut alice, Command::CreateGroup { key_packages: key_package(&mut bob) });
    assert!(matches!(process(&mut bob, &welcome)[0], Outcome::Joined { .. }));

    // same welcome on a state that no longer has the group
    let mut state = bob.state().clone();
    state.group = None;
    let mut rewound = dmls_core::Agent::new(state, env.clone());

    assert_eq!(error_code(&process(&mut rewound, &welcome)[0]), "protocol_violation");
}

#[test]
fn welcome_for_someone_else_is_unknown() {
    let env = SeededEnv::with_seed(11);
    let mut alice = agent(&env);
    let mut bob = agent(&env);
    let mut mallory = agent(&env);

    let welcome = run(&mut alice, Command::CreateGroup { key_packages: key_package(&mut bob) });

    assert_eq!(error_code(&process(&mut mallory, &welcome)[0]), "unknown_key_package");
    assert!(mallory.state().group.is_none());
}

#[test]
fn key_package_reused_for_second_group_is_rejected() {
    let env = SeededEnv::with_seed(12);
    let mut alice = agent(&env);
    let mut bob = agent(&env);

    let kp = key_package(&mut bob);
    run(&mut alice, Command::CreateGroup { key_packages: kp.clone() });

    let err = alice.execute(Command::Add { key_packages: kp }).unwrap_err();
    assert_eq!(err.code(), "protocol_violation");
}

#[test]
fn add_member_by_commit() {
    let env = SeededEnv::with_seed(13);
    let (mut alice, mut bob, mut charlie) = three_member_group(&env);
    let mut dave = agent(&env);

    let proposal = run(&mut alice, Command::Add { key_packages: key_package(&mut dave) });
    let output = split(&run(&mut alice, Command::Commit));
    assert_eq!(output.len(), 2, "commit plus one welcome");
    let (commit, welcome) = (&output[0], &output[1]);

    for member in [&mut bob, &mut charlie] {
        let outcomes = process(member, &[proposal.as_slice(), commit.as_slice()].concat());
        assert_eq!(outcomes[1], Outcome::Applied { epoch: 1 });
    }

    assert!(matches!(process(&mut dave, welcome)[0], Outcome::Joined { epoch: 1, .. }));
    assert_eq!(authenticator(&dave), authenticator(&alice));
    assert_eq!(authenticator(&dave), authenticator(&bob));

    let hi = encrypt(&mut dave, b"hi from dave");
    for member in [&mut alice, &mut bob, &mut charlie] {
        assert_eq!(delivered(&process(member, &hi)[0]), b"hi from dave");
    }
}

#[test]
fn removed_member_drops_group() {
    let env = SeededEnv::with_seed(14);
    let (mut alice, mut bob, mut charlie) = three_member_group(&env);

    let proposal = run(&mut alice, Command::Remove { leaf: 2 });
    let commit = run(&mut alice, Command::Commit);
    let stream = [proposal, commit].concat();

    assert_eq!(process(&mut bob, &stream)[1], Outcome::Applied { epoch: 1 });
    assert_eq!(process(&mut charlie, &stream)[1], Outcome::Removed);
    assert!(charlie.state().group.is_none());

    let after = encrypt(&mut alice, b"after removal");
    assert_eq!(delivered(&process(&mut bob, &after)[0]), b"after removal");
    assert_eq!(error_code(&process(&mut charlie, &after)[0]), "protocol_violation");
    assert_eq!(authenticator(&alice), authenticator(&bob));
}

#[test]
fn member_update_rotates_their_leaf_key() {
    let env = SeededEnv::with_seed(15);
    let (mut alice, mut bob, mut charlie) = three_member_group(&env);

    let update = run(&mut bob, Command::Update);
    assert!(matches!(process(&mut alice, &update)[0], Outcome::Queued { sender: 1, .. }));
    assert!(matches!(process(&mut charlie, &update)[0], Outcome::Queued { sender: 1, .. }));

    let before = alice.state().group.as_ref().unwrap().members()[1].encryption_key;
    let commit = run(&mut alice, Command::Commit);

    // bob opens the commit secret with the key from their own pending update
    assert_eq!(process(&mut bob, &commit)[0], Outcome::Applied { epoch: 1 });
    assert_eq!(process(&mut charlie, &commit)[0], Outcome::Applied { epoch: 1 });

    let after = alice.state().group.as_ref().unwrap().members()[1].encryption_key;
    assert_ne!(before, after);
    assert_eq!(authenticator(&alice), authenticator(&bob));
    assert_eq!(authenticator(&bob), authenticator(&charlie));
}

#[test]
fn stale_proposal_is_epoch_mismatch() {
    let env = SeededEnv::with_seed(16);
    let (mut alice, mut bob, _charlie) = three_member_group(&env);

    let update = run(&mut bob, Command::Update);
    let commit = run(&mut alice, Command::Commit);
    assert!(matches!(process(&mut alice, &update)[0], Outcome::Failed(DmlsError::EpochMismatch { .. })));

    // bob's pending update is cleared by the epoch change
    assert_eq!(process(&mut bob, &commit)[0], Outcome::Applied { epoch: 1 });
    assert!(bob.state().group.as_ref().unwrap().pending().is_empty());
}

#[test]
fn failed_command_leaves_state_untouched() {
    let env = SeededEnv::with_seed(17);
    let mut alice = agent(&env);
    let before = alice.state().clone();

    let err = alice.execute(Command::Encrypt { plaintexts: vec![b"x".to_vec()] }).unwrap_err();
    assert_eq!(err.code(), "protocol_violation");
    assert_eq!(alice.state(), &before);

    let err = alice.execute(Command::CreateGroup { key_packages: vec![1, 2, 3] }).unwrap_err();
    assert_eq!(err.code(), "malformed_message");
    assert_eq!(alice.state(), &before);
}

#[test]
fn tampered_welcome_fails_authentication() {
    let env = SeededEnv::with_seed(18);
    let mut alice = agent(&env);
    let mut bob = agent(&env);

    let mut welcome = run(&mut alice, Command::CreateGroup { key_packages: key_package(&mut bob) });
    let last = welcome.len() - 1;
    welcome[last] ^= 0x01;

    assert_eq!(error_code(&process(&mut bob, &welcome)[0]), "authentication_failure");
    assert!(bob.state().group.is_none());
    assert_eq!(bob.state().key_store.available(), 1, "key package not consumed by a failed join");
}

#[test]
fn joiner_handed_whole_commit_output_joins_cleanly() {
    let env = SeededEnv::with_seed(19);
    let (mut alice, mut bob, _charlie) = three_member_group(&env);
    let mut dave = agent(&env);

    let proposal = run(&mut alice, Command::Add { key_packages: key_package(&mut dave) });
    let output = run(&mut alice, Command::Commit);
    process(&mut bob, &[proposal.as_slice(), split(&output)[0].as_slice()].concat());

    let outcomes = process(&mut dave, &output);
    assert!(matches!(outcomes[0], Outcome::Ignored { .. }));
    assert!(matches!(outcomes[1], Outcome::Joined { epoch: 1, .. }));
    assert_eq!(authenticator(&dave), authenticator(&bob));
}

#[test]
fn commit_without_welcome_still_fails_for_outsider() {
    let env = SeededEnv::with_seed(20);
    let (mut alice, _bob, _charlie) = three_member_group(&env);
    let mut dave = agent(&env);

    let commit = run(&mut alice, Command::Commit);

    assert_eq!(error_code(&process(&mut dave, &commit)[0]), "protocol_violation");
}

#[test]
fn tampered_commit_leaves_epoch_unchanged() {
    let env = SeededEnv::with_seed(21);
    let (mut alice, mut bob, _charlie) = three_member_group(&env);

    run(&mut alice, Command::Update);
    let commit = run(&mut alice, Command::Commit);
    let before = bob.state().clone();

    let mut forged = commit.clone();
    let last = forged.len() - 1;
    forged[last] ^= 0x01;

    assert_eq!(error_code(&process(&mut bob, &forged)[0]), "authentication_failure");
    assert_eq!(bob.state(), &before);
    assert_eq!(epoch(&bob), 0);

    assert_eq!(process(&mut bob, &commit)[0], Outcome::Applied { epoch: 1 });
    assert_eq!(authenticator(&alice), authenticator(&bob));
}

/// Entropy source that always fails.
struct NoEntropy;

impl Environment for NoEntropy {
    fn try_random_bytes(&self, _buffer: &mut [u8]) -> Result<(), EntropyError> {
        Err(EntropyError { reason: "drained".to_string() })
    }

    fn unix_time_secs(&self) -> u64 {
        SeededEnv::DEFAULT_TIME
    }
}

#[test]
fn entropy_failure_is_key_exhaustion() {
    let env = SeededEnv::with_seed(22);
    let (alice, _bob, _charlie) = three_member_group(&env);
    let mut alice = Agent::new(alice.into_state(), NoEntropy);
    let before = alice.state().clone();

    for command in [
        Command::GenKeyPackages { count: 1 },
        Command::Encrypt { plaintexts: vec![b"hello".to_vec()] },
        Command::Update,
        Command::Commit,
    ] {
        let err = alice.execute(command).unwrap_err();
        assert_eq!(err.code(), "key_exhaustion");
        assert_eq!(alice.state(), &before);
    }
}
