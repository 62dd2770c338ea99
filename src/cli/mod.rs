//! Command-line interface helpers

pub mod commands;

pub use commands::{cmd_proposals, cmd_sweep, cmd_wallet, has_state, AppState, CliResult};
