use anyhow::Context;
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Notify;

use guardlink::config::{Command, DeviceArgs, HandshakeRole, LinkConfig};
use guardlink::server::{Connection, DeviceServer};
use guardlink::utils::logging::{init_file_logging, init_logging};
use guardlink::utils::sanitize_log;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = DeviceArgs::parse();

    // Keep the guard alive so buffered file logs are flushed on exit
    let _log_guard = match &args.log_file {
        Some(path) => Some(init_file_logging(&args.log_level, Path::new(path))?),
        None => {
            init_logging(&args.log_level)?;
            None
        }
    };

    tracing::info!("Starting guardlink {}", env!("CARGO_PKG_VERSION"));

    let mut config = LinkConfig::from_args(&args).context("Invalid configuration")?;
    match args.command.clone() {
        Command::Serve { listen, echo } => serve(config, &listen, echo).await,
        Command::Connect {
            address,
            trigger_line,
        } => {
            if args.role.is_none() {
                config.role = HandshakeRole::Initiator;
            }
            connect(config, &address, &trigger_line).await
        }
    }
}

async fn serve(config: LinkConfig, listen: &str, echo: bool) -> anyhow::Result<()> {
    let server = DeviceServer::new(config, echo);
    let listener = DeviceServer::bind(listen).await?;
    let task = tokio::spawn(server.clone().run(listener));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received");
    server.shutdown();
    task.await.context("Server task panicked")??;
    Ok(())
}

async fn connect(config: LinkConfig, address: &str, trigger_line: &str) -> anyhow::Result<()> {
    let stream = std::net::TcpStream::connect(address)
        .with_context(|| format!("Failed to connect to {}", address))?;
    tracing::info!("Connected to {}", address);

    let connection = Arc::new(Connection::over_stream(stream, config)?);
    let closed = Arc::new(Notify::new());

    connection.set_line_callback(|line: &str| tracing::info!("Device: {}", sanitize_log(line)));
    connection.set_data_callback(|payload: Vec<u8>| {
        println!("{}", String::from_utf8_lossy(&payload));
    });
    connection.set_ready_callback(|| tracing::info!("Guarded channel ready, type to send"));
    {
        let closed = closed.clone();
        connection.set_close_callback(move || closed.notify_one());
    }

    connection.start()?;
    connection.request_upgrade(trigger_line)?;

    let mut input = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = closed.notified() => {
                tracing::info!("Device closed the connection");
                break;
            }
            line = input.next_line() => match line? {
                Some(line) => {
                    let conn = connection.clone();
                    // Blocks while the outbound queue is full
                    tokio::task::spawn_blocking(move || conn.enqueue_send(line.into_bytes()))
                        .await??;
                }
                None => break,
            },
        }
    }

    let conn = connection.clone();
    tokio::task::spawn_blocking(move || conn.stop()).await?;
    Ok(())
}
