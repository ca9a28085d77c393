//! FlowZone Remote: headless command-line remote for the FlowZone engine.
//!
//! Mirrors the engine state through `flowzone-sync`, prints a status line
//! whenever it changes and forwards commands typed on stdin.

mod input;
mod state;

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use log::{info, warn};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};

use flowzone_sync::connection::DEFAULT_URL;
use flowzone_sync::{ClientConfig, ConnectionConfig, Delivery, RemoteClient};
use input::{parse_line, Input, HELP};
use state::ViewSummary;

#[derive(Parser, Debug)]
#[command(name = "flowzone-remote", version, about = "Remote control for a FlowZone engine")]
struct Args {
    /// Engine WebSocket endpoint
    #[arg(long, default_value = DEFAULT_URL)]
    url: String,

    /// First reconnect delay in milliseconds
    #[arg(long, default_value_t = 1_000)]
    backoff_floor_ms: u64,

    /// Upper bound for the reconnect delay in milliseconds
    #[arg(long, default_value_t = 30_000)]
    backoff_ceiling_ms: u64,

    /// Directory the `export` command writes diagnostic logs into
    #[arg(long, default_value = ".")]
    log_dir: PathBuf,
}

impl Args {
    fn client_config(&self) -> ClientConfig {
        ClientConfig {
            connection: ConnectionConfig {
                backoff_floor: Duration::from_millis(self.backoff_floor_ms),
                backoff_ceiling: Duration::from_millis(self.backoff_ceiling_ms),
                ..ConnectionConfig::new(self.url.clone())
            },
            ..ClientConfig::default()
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> std::io::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args = Args::parse();
    info!("Starting FlowZone Remote against {}", args.url);

    let mut client = RemoteClient::new(args.client_config());
    client.start();

    let mut replica_rx = client.subscribe();
    let mut connection_rx = client.subscribe_connection();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut last_summary = None;

    loop {
        let summary = ViewSummary::new(client.connection_state(), client.replica().as_ref());
        if last_summary.as_ref() != Some(&summary) {
            println!("{summary}");
            last_summary = Some(summary);
        }

        tokio::select! {
            changed = replica_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            changed = connection_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                match parse_line(&line) {
                    Ok(Input::Quit) => break,
                    Ok(Input::Empty) => {}
                    Ok(Input::Help) => println!("{HELP}"),
                    Ok(Input::Send(command)) => forward(&client, &command),
                    Ok(Input::Raw(value)) => forward(&client, &value),
                    Ok(Input::Export) => match client.export_diagnostics(&args.log_dir) {
                        Ok(path) => println!("diagnostic log written to {}", path.display()),
                        Err(e) => log::error!("export to {} failed: {e}", args.log_dir.display()),
                    },
                    Err(e) => eprintln!("{e}"),
                }
            }
        }
    }

    info!("Shutting down after {} diagnostic entries", client.diagnostics().len());
    client.shutdown();
    Ok(())
}

fn forward<C>(client: &RemoteClient, command: &C)
where
    C: Serialize + std::fmt::Debug + ?Sized,
{
    match client.send(command) {
        Ok(Delivery::Sent) => log::debug!("sent {command:?}"),
        Ok(Delivery::Dropped) => warn!("not connected, {command:?} dropped"),
        Err(e) => log::error!("could not encode {command:?}: {e}"),
    }
}
