use std::net::{SocketAddr, ToSocketAddrs};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cpal::traits::HostTrait;
use rand::Rng;
use tokio::net::UdpSocket;

use austream::config::{SessionConfig, DEFAULT_BUFFER_MS, DEFAULT_PORT_A};
use austream::pairing::{self, PairingInfo};
use austream::receiver::ReceiverSession;
use austream::sender::SenderSession;
use austream::{audio, net};

#[derive(Parser)]
#[command(name = "austream", about = "Synchronized LAN audio distribution")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture system audio and distribute it to authenticated receivers.
    Send {
        #[arg(long, default_value_t = DEFAULT_PORT_A)]
        port: u16,
        /// 6-digit PIN; a random one is generated if omitted.
        #[arg(long)]
        pin: Option<String>,
        #[arg(long, default_value_t = DEFAULT_BUFFER_MS)]
        buffer_ms: u32,
        /// Substring match against an input device's name; default device if omitted.
        #[arg(long)]
        device: Option<String>,
    },
    /// Authenticate against a sender and play the received stream.
    Recv {
        #[arg(long)]
        host: String,
        #[arg(long, default_value_t = DEFAULT_PORT_A)]
        port: u16,
        #[arg(long)]
        pin: String,
        /// Substring match against an output device's name; default device if omitted.
        #[arg(long)]
        output_device: Option<String>,
        /// Print final ingress stats as JSON instead of Debug on exit.
        #[arg(long)]
        json: bool,
    },
    /// Send `AUSTREAM_PROBE` and report the reply.
    Probe {
        #[arg(long)]
        host: String,
        #[arg(long, default_value_t = DEFAULT_PORT_A)]
        port: u16,
    },
}

fn random_pin() -> String {
    format!("{:06}", rand::thread_rng().gen_range(0..1_000_000u32))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Send { port, pin, buffer_ms, device } => run_send(port, pin, buffer_ms, device).await,
        Commands::Recv { host, port, pin, output_device, json } => run_recv(host, port, pin, output_device, json).await,
        Commands::Probe { host, port } => run_probe(host, port).await,
    }
}

async fn run_send(port: u16, pin: Option<String>, buffer_ms: u32, device_name: Option<String>) -> Result<()> {
    let pin = pin.unwrap_or_else(random_pin);
    let config = SessionConfig {
        port_a: port,
        port_t: port + 1,
        buffer_ms,
        ..SessionConfig::default()
    };
    let hostname = net::hostname();

    let session = SenderSession::bind(&pin, config, hostname.clone())
        .await
        .context("binding sender session")?;
    session.start_background_tasks();

    let host_devices = cpal::default_host();
    let input_devices: Vec<_> = host_devices.input_devices()?.collect();
    let chosen = match &device_name {
        Some(needle) => input_devices
            .iter()
            .find(|d| audio::device_name(d).to_lowercase().contains(&needle.to_lowercase()))
            .context("no input device matched --device")?,
        None => input_devices.first().context("no input devices available")?,
    };
    println!("[SEND] capturing from: {}", audio::device_name(chosen));
    let capture = audio::build_capture(chosen)?;

    let pairing = PairingInfo {
        ip: net::primary_ipv4(),
        port,
        pin: Some(pin.clone()),
        name: hostname,
    };
    println!("[SEND] pairing string: {}", pairing::format(&pairing));
    println!("[SEND] pin: {pin}  buffer_ms: {buffer_ms}");

    tokio::select! {
        _ = session.run_capture(capture) => {}
        _ = tokio::signal::ctrl_c() => {
            println!("[SEND] shutting down");
        }
    }
    session.stop();
    Ok(())
}

async fn run_recv(host: String, port: u16, pin: String, output_device: Option<String>, json: bool) -> Result<()> {
    let config = SessionConfig {
        port_a: port,
        port_t: port + 1,
        ..SessionConfig::default()
    };

    let host_devices = cpal::default_host();
    let output_devices: Vec<_> = host_devices.output_devices()?.collect();
    let chosen = match &output_device {
        Some(needle) => output_devices
            .iter()
            .find(|d| audio::device_name(d).to_lowercase().contains(&needle.to_lowercase()))
            .context("no output device matched --output-device")?,
        None => output_devices.first().context("no output devices available")?,
    };
    println!("[RECV] playing to: {}", audio::device_name(chosen));
    let sink = audio::build_sink(chosen)?;

    let session = ReceiverSession::connect(&host, &config, &pin, sink)
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    session.start();
    println!("[RECV] authenticated, streaming");

    tokio::signal::ctrl_c().await?;
    let stats = session.ingress_stats();
    if json {
        println!("{}", serde_json::to_string(&stats)?);
    } else {
        println!("[RECV] stats: {stats:?}");
    }
    session.stop();
    Ok(())
}

async fn run_probe(host: String, port: u16) -> Result<()> {
    let server_addr: SocketAddr = (host.as_str(), port)
        .to_socket_addrs()?
        .next()
        .context("could not resolve host")?;
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.send_to(b"AUSTREAM_PROBE", server_addr).await?;
    let mut buf = [0u8; 256];
    let (n, _) = tokio::time::timeout(std::time::Duration::from_secs(2), socket.recv_from(&mut buf)).await??;
    println!("{}", String::from_utf8_lossy(&buf[..n]));
    Ok(())
}
