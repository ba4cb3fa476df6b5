//! SentientOS Codex - operator CLI over the amendment governance pipeline

pub mod commands;
pub mod logging;

pub use commands::{execute, Cli, Commands, GovernorAction};
