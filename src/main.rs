//! signalr-client - print messages from a SignalR endpoint and send stdin lines

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

use signalr_client::{init_tracing, Args, Connection};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    init_tracing(&args.log_level, args.log_json);

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    let trace_level = args.trace_level().map_err(anyhow::Error::msg)?;
    let config = args.client_config().map_err(anyhow::Error::msg)?;

    info!("Endpoint: {}", args.url);
    info!("Trace: {}", trace_level);

    let connection = Connection::builder(args.url.clone())
        .trace_level(trace_level)
        .client_config(config)
        .build()?;

    connection.set_message_received(|message| println!("{}", message))?;
    connection.set_disconnected(|| info!("Connection closed"))?;

    connection.start().await?;
    info!("Connected (id: {})", connection.connection_id());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
            line = lines.next_line() => match line? {
                Some(line) if line.trim().is_empty() => {}
                Some(line) => {
                    if let Err(e) = connection.send(&line).await {
                        warn!("Send failed: {}", e);
                    }
                }
                None => break,
            },
        }
    }

    connection.stop().await?;
    info!("Shutdown complete");
    Ok(())
}
