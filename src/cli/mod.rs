//! Command-line interface
//!
//! Every command loads the JSON state file, runs against a fresh engine and
//! writes the state back.

pub mod commands;
pub mod state;

pub use state::Session;
