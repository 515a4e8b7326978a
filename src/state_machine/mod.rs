// State machine module for the step-attempt lifecycle.
//
// The attempt state machine is deliberately data-first: `Status` is the full
// state set and `transitions.rs` encodes the legal moves as a plain match
// table. The orchestrator drives the machine; stores enforce its legality on
// every persisted update.

pub mod states;
pub mod transitions;

pub use states::{InvalidStatus, Status};
