//! Shared helpers for agent-level tests.

#![allow(dead_code)]

use dmls_core::{Agent, AgentConfig, AgentState, Command, Outcome, Output, SeededEnv};
use dmls_proto::FrameReader;

pub type TestAgent = Agent<SeededEnv>;

pub fn agent(env: &SeededEnv) -> TestAgent {
    agent_with(env, AgentConfig::default())
}

pub fn agent_with(env: &SeededEnv, config: AgentConfig) -> TestAgent {
    Agent::new(AgentState::create(config, env).expect("state creation should succeed"), env.clone())
}

/// Run a frame-producing command.
pub fn run(agent: &mut TestAgent, command: Command) -> Vec<u8> {
    match agent.execute(command).expect("command should succeed") {
        Output::Frames(bytes) => bytes,
        Output::Processed(reports) => panic!("expected frames, got {reports:?}"),
    }
}

/// Process a stream and return the per-item outcomes.
pub fn process(agent: &mut TestAgent, stream: &[u8]) -> Vec<Outcome> {
    match agent.execute(Command::Process { stream: stream.to_vec() }).expect("process never fails") {
        Output::Processed(reports) => reports.into_iter().map(|r| r.outcome).collect(),
        Output::Frames(_) => panic!("expected reports"),
    }
}

/// Split a stream into the encoded bytes of each frame.
pub fn split(stream: &[u8]) -> Vec<Vec<u8>> {
    FrameReader::new(stream).map(|frame| frame.unwrap().to_vec().unwrap()).collect()
}

pub fn encrypt(agent: &mut TestAgent, plaintext: &[u8]) -> Vec<u8> {
    run(agent, Command::Encrypt { plaintexts: vec![plaintext.to_vec()] })
}

pub fn key_package(agent: &mut TestAgent) -> Vec<u8> {
    run(agent, Command::GenKeyPackages { count: 1 })
}

pub fn error_code(outcome: &Outcome) -> &'static str {
    match outcome {
        Outcome::Failed(err) => err.code(),
        other => panic!("expected failure, got {other:?}"),
    }
}

pub fn delivered(outcome: &Outcome) -> &[u8] {
    match outcome {
        Outcome::Delivered { plaintext, .. } => plaintext,
        other => panic!("expected delivery, got {other:?}"),
    }
}

/// alice creates a group with bob and charlie; both join.
pub fn three_member_group(env: &SeededEnv) -> (TestAgent, TestAgent, TestAgent) {
    let mut alice = agent(env);
    let mut bob = agent(env);
    let mut charlie = agent(env);

    let mut kps = key_package(&mut bob);
    kps.extend(key_package(&mut charlie));

    let welcomes = run(&mut alice, Command::CreateGroup { key_packages: kps });
    let welcomes = split(&welcomes);
    assert_eq!(welcomes.len(), 2);

    assert!(matches!(process(&mut bob, &welcomes[0])[0], Outcome::Joined { epoch: 0, .. }));
    assert!(matches!(process(&mut charlie, &welcomes[1])[0], Outcome::Joined { epoch: 0, .. }));

    (alice, bob, charlie)
}

pub fn authenticator(agent: &TestAgent) -> [u8; 32] {
    agent.state().group.as_ref().expect("agent is in a group").epoch_authenticator()
}

pub fn epoch(agent: &TestAgent) -> u64 {
    agent.state().group.as_ref().expect("agent is in a group").epoch()
}
