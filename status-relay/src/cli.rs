use std::net::SocketAddr;

use clap::{Args, Parser, Subcommand};

use crate::server::ServerConfig;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the relay: accept status frames and fan summaries out to listeners.
    Server(ServerArgs),
    /// Connect to the broadcast endpoint and print every line received.
    Listen(ListenArgs),
    /// Report a source status to the ingestion endpoint.
    Send(SendArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// Address sources connect to. Use port 0 for an ephemeral port.
    #[arg(long, env = "STATUS_RELAY_INGEST", default_value = "127.0.0.1:8888")]
    pub ingest: SocketAddr,

    /// Address listeners connect to. Use port 0 for an ephemeral port.
    #[arg(long, env = "STATUS_RELAY_BROADCAST", default_value = "127.0.0.1:8889")]
    pub broadcast: SocketAddr,
}

impl From<&ServerArgs> for ServerConfig {
    fn from(args: &ServerArgs) -> Self {
        Self {
            ingestion: args.ingest,
            broadcast: args.broadcast,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ListenArgs {
    /// Broadcast endpoint of the relay.
    #[arg(long, env = "STATUS_RELAY_BROADCAST", default_value = "127.0.0.1:8889")]
    pub server: SocketAddr,
}

#[derive(Args, Debug, Clone)]
pub struct SendArgs {
    /// Ingestion endpoint of the relay.
    #[arg(long, env = "STATUS_RELAY_INGEST", default_value = "127.0.0.1:8888")]
    pub server: SocketAddr,

    /// Source identifier, at most 8 bytes.
    #[arg(long)]
    pub id: String,

    /// Status code: 1 idle, 2 active, 3 recharging.
    #[arg(long, default_value_t = 1)]
    pub status: u8,

    /// Named value to attach, as `name=value`. May be repeated.
    #[arg(long = "field", value_parser = parse_field)]
    pub fields: Vec<(String, u64)>,

    /// Number of messages to send, numbered from 0.
    #[arg(long, default_value_t = 1)]
    pub repeat: u16,
}

fn parse_field(raw: &str) -> Result<(String, u64), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got `{raw}`"))?;
    if name.is_empty() {
        return Err(format!("field name missing in `{raw}`"));
    }
    let value = value
        .parse::<u64>()
        .map_err(|err| format!("invalid value for `{name}`: {err}"))?;
    Ok((name.to_string(), value))
}
