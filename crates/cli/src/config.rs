//! Command line configuration.

use crate::commands::{Command, CommandResult};
use clap::Parser;
use tracing::Level;

#[derive(Debug, Parser)]
#[command(name = "peer-rpc", about = "Node-to-node RPC over multiplexed sessions")]
pub struct CliConfig {
    /// Log debug output to stderr.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl CliConfig {
    pub fn log_level(&self) -> Level {
        if self.verbose {
            Level::DEBUG
        } else {
            Level::INFO
        }
    }

    /// Set up logging and a runtime, then execute the command.
    pub fn run(self) -> CommandResult {
        tracing_subscriber::fmt()
            .with_max_level(self.log_level())
            .with_writer(std::io::stderr)
            .init();

        let runtime = tokio::runtime::Runtime::new()?;
        runtime.block_on(self.command.execute())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_call() {
        let config = CliConfig::parse_from([
            "peer-rpc",
            "-v",
            "call",
            "--peer",
            "node-1",
            "--addr",
            "127.0.0.1:4444",
            "hello",
        ]);
        assert_eq!(config.log_level(), Level::DEBUG);
        match config.command {
            Command::Call {
                peer,
                addr,
                message,
                len,
            } => {
                assert_eq!(peer, "node-1");
                assert_eq!(addr, "127.0.0.1:4444");
                assert_eq!(message, "hello");
                assert!(!len);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_serve_default_listen() {
        let config = CliConfig::parse_from(["peer-rpc", "serve"]);
        assert_eq!(config.log_level(), Level::INFO);
        assert!(matches!(
            config.command,
            Command::Serve { ref listen } if listen == "127.0.0.1:4444"
        ));
    }
}
