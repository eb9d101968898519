//! Fuzz target for persisted state loading
//!
//! # Invariants
//!
//! - `AgentState::load` never panics on arbitrary bytes
//! - Anything that loads stores again and loads to the same state

#![no_main]

use dmls_core::AgentState;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(state) = AgentState::load(data) else {
        return;
    };

    let stored = state.store().expect("loaded state stores");
    assert_eq!(AgentState::load(&stored).expect("stored state loads"), state);
});
