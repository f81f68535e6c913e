//! Case dispatch: idempotent letter dispatch for approved cases.

pub mod adapters;
pub mod config;
pub mod error;
pub mod letter;
pub mod pipeline;
pub mod store;
