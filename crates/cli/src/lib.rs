//! CLI tool for running and calling RPC nodes.
//!
//! Provides commands for:
//! - Serving a small echo service
//! - Calling a node by id and address

pub mod commands;
pub mod config;

pub use commands::{Command, CommandResult};
pub use config::CliConfig;
