use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use emuflow_compiler::fingerprint;
use emuflow_link::{decode_hex, read_dump, ChannelTransport, Link, LinkConfig};
use emuflow_telemetry::{parse_frame, Telemetry};
use emuflow_types::wire::header_name;
use emuflow_types::Order;
use tokio::sync::mpsc;
use tracing::info;

/// emuflow dump and telemetry tool
#[derive(Parser)]
#[command(name = "emuflow")]
#[command(about = "Inspect emuflow dumps and decode device telemetry")]
struct Args {
    /// Log level
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the packets of a dump file with their header names
    Inspect {
        /// Dump file (one hex packet per line)
        dump: PathBuf,
    },
    /// Decode one telemetry frame given as hex and print it as JSON
    Decode {
        /// Frame bytes, e.g. `D0 03 00 B1 00 01 00 3D 0A D7 3F`
        #[arg(required = true, num_args = 1..)]
        hex: Vec<String>,
    },
    /// Upload a dump to an in-process device that ACKs every packet
    Loopback {
        dump: PathBuf,

        /// Milliseconds to wait for each ACK
        #[arg(long, default_value_t = 5000)]
        ack_timeout_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(&args.log_level)
        .init();

    match args.command {
        Command::Inspect { dump } => inspect(&dump),
        Command::Decode { hex } => decode(&hex.join("")),
        Command::Loopback {
            dump,
            ack_timeout_ms,
        } => {
            loopback(
                &dump,
                LinkConfig {
                    ack_timeout: Duration::from_millis(ack_timeout_ms),
                },
            )
            .await
        }
    }
}

fn load(path: &Path) -> Result<Vec<Vec<u8>>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    Ok(read_dump(&text)?)
}

fn packet_name(packet: &[u8]) -> String {
    if let [lo, hi] = packet {
        if let Some(order) = Order::from_code(u16::from_le_bytes([*lo, *hi])) {
            return order.to_string();
        }
    }
    packet
        .first()
        .and_then(|&h| header_name(h))
        .unwrap_or("unknown")
        .to_string()
}

fn inspect(path: &Path) -> Result<()> {
    let packets = load(path)?;
    for (n, packet) in packets.iter().enumerate() {
        let hex: String = packet.iter().map(|b| format!("{b:02X}")).collect();
        println!("{n:>5}  {:<24} {:>4}  {hex}", packet_name(packet), packet.len());
    }
    println!("{} packets", packets.len());
    println!("sha256 {}", fingerprint(packets.iter().map(Vec::as_slice)));
    Ok(())
}

fn decode(hex: &str) -> Result<()> {
    let bytes = decode_hex(hex).map_err(anyhow::Error::msg)?;
    let frame = parse_frame(&bytes)?;
    println!("{}", serde_json::to_string_pretty(&frame)?);
    Ok(())
}

async fn loopback(path: &Path, config: LinkConfig) -> Result<()> {
    let packets = load(path)?;
    let (transport, mut written) = ChannelTransport::pair();
    let (ack_tx, ack_rx) = mpsc::channel(16);

    let device = tokio::spawn(async move {
        while let Some(_packet) = written.recv().await {
            if ack_tx.send(vec![0x01]).await.is_err() {
                break;
            }
        }
    });

    let mut link = Link::new(transport, ack_rx, Telemetry::new(), config);
    let cancel = link.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, cancelling upload");
            cancel.cancel();
        }
    });

    let report = link.upload(packets.iter().map(Vec::as_slice)).await?;
    link.close().await?;
    device.await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
