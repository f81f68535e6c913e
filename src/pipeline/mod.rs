//! Case dispatch pipeline.
//!
//! Every candidate case flows through:
//! 1. `eligibility::filter_cases()`: pure filtering, no I/O
//! 2. `DedupGate::check()`: work queue first, case log as fallback
//! 3. `DispatchSequencer::dispatch()`: render, deliver, file, note
//! 4. `RunController`: queue bookkeeping and per-case failure isolation
//!
//! **No letter is sent without a gate pass.** The sequencer only accepts a
//! `GatePass`, and only the gate can create one.

pub mod controller;
pub mod dedup;
pub mod dispatch;
pub mod eligibility;
#[cfg(test)]
pub(crate) mod testing;
pub mod types;

pub use controller::{CaseFailure, CaseOutcome, RunController, RunReport};
pub use dedup::{DedupGate, GateDecision, GatePass};
pub use dispatch::{DispatchFailure, DispatchOutcome, DispatchSequencer};
