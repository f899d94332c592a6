use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use status_relay::{
    cli::{Cli, Command, ListenArgs, SendArgs},
    client::{ListenerClient, SourceClient},
    codec::fields_from_wide,
    registry::Source,
    server::{RelayServer, ServerConfig},
    status::Status,
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Server(args) => {
            let server = RelayServer::bind(&ServerConfig::from(&args)).await?;
            info!("ingestion listening on {}", server.ingestion_addr()?);
            info!("broadcast listening on {}", server.broadcast_addr()?);
            if let Err(err) = server.run_until_ctrl_c().await {
                warn!("relay exited with error: {err:?}");
                return Err(err);
            }
        }
        Command::Listen(args) => listen(args).await?,
        Command::Send(args) => send(args).await?,
    }

    Ok(())
}

async fn listen(args: ListenArgs) -> Result<()> {
    let mut client = ListenerClient::connect(args.server).await?;
    while let Some(line) = client.next_line().await? {
        println!("{line}");
    }
    info!("server closed the connection");
    Ok(())
}

async fn send(args: SendArgs) -> Result<()> {
    let status = Status::try_from(args.status)?;
    let mut source = Source::new(args.id, status)?;
    let fields = fields_from_wide(args.fields)?;

    let mut client = SourceClient::connect(args.server).await?;
    for _ in 0..args.repeat {
        let message = source
            .new_message(fields.clone())
            .context("failed to build status message")?;
        let ack = client.send(&message).await?;
        println!("{} {}", message.sequence(), ack);
    }
    client.shutdown().await;
    Ok(())
}
