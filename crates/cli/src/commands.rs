//! Subcommands.

use anyhow::Context;
use clap::Subcommand;
use corelib::{Node, NodeId, RouteTable};
use rpc::{Caller, Server, ServiceMap};
use serde::Serialize;
use tracing::info;

pub type CommandResult = anyhow::Result<()>;

pub const ECHO_SAY: &str = "Echo.Say";
pub const ECHO_LEN: &str = "Echo.Len";

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Serve the echo service until interrupted.
    Serve {
        /// Address to listen on.
        #[arg(long, default_value = "127.0.0.1:4444")]
        listen: String,
    },

    /// Call the echo service on a node.
    ///
    /// Example:
    ///   peer-rpc call --peer node-1 --addr 127.0.0.1:4444 hello
    Call {
        /// Id of the node to call.
        #[arg(long)]
        peer: String,
        /// Address the node listens on.
        #[arg(long)]
        addr: String,
        /// Message to send.
        message: String,
        /// Ask for the message length instead of an echo.
        #[arg(long)]
        len: bool,
    },
}

#[derive(Debug, Serialize)]
struct CallOutput<'a, T> {
    peer: &'a str,
    method: &'a str,
    reply: T,
}

/// Services exposed by `serve`.
pub fn echo_services() -> rpc::Result<ServiceMap> {
    let mut services = ServiceMap::new();
    services.register_fn(ECHO_SAY, |message: String| async move {
        Ok::<_, String>(message)
    })?;
    services.register_fn(ECHO_LEN, |message: String| async move {
        Ok::<_, String>(message.chars().count() as u64)
    })?;
    Ok(services)
}

impl Command {
    pub async fn execute(self) -> CommandResult {
        match self {
            Command::Serve { listen } => serve(&listen).await,
            Command::Call {
                peer,
                addr,
                message,
                len,
            } => call(&peer, &addr, &message, len).await,
        }
    }
}

async fn serve(listen: &str) -> CommandResult {
    let server = Server::new(echo_services()?)
        .spawn(listen)
        .await
        .with_context(|| format!("failed to listen on {listen}"))?;
    info!(addr = %server.local_addr(), "serving {} and {}", ECHO_SAY, ECHO_LEN);

    tokio::signal::ctrl_c().await?;
    info!("interrupted, shutting down");
    server.shutdown().await;
    Ok(())
}

async fn call(peer: &str, addr: &str, message: &str, len: bool) -> CommandResult {
    let id = NodeId::new(peer)?;
    RouteTable::global().set_node(Node::new(id.clone(), addr));

    let caller = Caller::new();
    let output = if len {
        let reply: u64 = caller.call_node(&id, ECHO_LEN, message).await?;
        serde_json::to_string_pretty(&CallOutput {
            peer,
            method: ECHO_LEN,
            reply,
        })?
    } else {
        let reply: String = caller.call_node(&id, ECHO_SAY, message).await?;
        serde_json::to_string_pretty(&CallOutput {
            peer,
            method: ECHO_SAY,
            reply,
        })?
    };
    println!("{output}");

    caller.pool().close();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_echo_services_registered() {
        let services = echo_services().unwrap();
        assert_eq!(services.methods(), vec![ECHO_LEN, ECHO_SAY]);
    }

    #[tokio::test]
    async fn test_call_against_served_echo() {
        let server = Server::new(echo_services().unwrap())
            .spawn("127.0.0.1:0")
            .await
            .unwrap();
        let addr = server.local_addr().to_string();

        call("cli-test-node", &addr, "hello", false).await.unwrap();
        call("cli-test-node", &addr, "hello", true).await.unwrap();

        server.shutdown().await;
    }
}
