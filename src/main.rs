use std::env;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use crossbeam_channel::unbounded;
use log::info;

use carlink::data::device_ids::{lookup_vendor, supported_dongles};
use carlink::protocol::describe_message_type;
use carlink::{CarlinkBridge, CarlinkDevice, CarlinkEvent, RingVideoSink, VideoSink};

#[derive(Parser)]
#[command(name = "carlink")]
#[command(about = "Bridge for Carlinkit-style CarPlay / Android Auto USB dongles")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List supported dongles currently on the bus
    List {
        /// Emit machine-readable JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Open a dongle and stream its messages until the loop dies
    Watch {
        /// Index into the discovered device list
        #[arg(long, default_value = "0")]
        index: usize,

        /// Per-transfer USB timeout (e.g. "500ms", "2s")
        #[arg(long, default_value = "1s", value_parser = humantime::parse_duration)]
        timeout: Duration,

        /// Negotiated video width, used to size the staging ring
        #[arg(long, default_value = "1280")]
        width: u32,

        /// Negotiated video height
        #[arg(long, default_value = "720")]
        height: u32,

        /// Emit events as JSON lines
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    // Default filter mirrors what the engine is chatty about; RUST_LOG
    // still wins when set.
    if env::var("RUST_LOG").is_err() {
        env::set_var("RUST_LOG", "info,carlink=debug,rusb=warn");
    }
    pretty_env_logger::init();

    info!("carlink v{}", env!("CARGO_PKG_VERSION"));

    let cli = Cli::parse();
    match cli.command {
        Commands::List { json } => list(json),
        Commands::Watch {
            index,
            timeout,
            width,
            height,
            json,
        } => watch(index, timeout, width, height, json),
    }
}

fn list(json: bool) -> Result<()> {
    let devices = CarlinkDevice::find_all().context("USB enumeration failed")?;

    if json {
        let entries: Vec<serde_json::Value> = devices
            .iter()
            .map(|d| {
                serde_json::json!({
                    "bus": d.bus_number(),
                    "address": d.address(),
                    "vendor_id": d.vendor_id,
                    "product_id": d.product_id,
                    "vendor": lookup_vendor(d.vendor_id),
                    "model": d.model(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if devices.is_empty() {
        println!("no supported dongles found");
        println!("supported models:");
        for (vid, pid, name) in supported_dongles() {
            println!("  {:04x}:{:04x}  {}", vid, pid, name);
        }
        return Ok(());
    }

    for device in &devices {
        println!(
            "bus {:03} device {:03}: {:04x}:{:04x}  {}",
            device.bus_number(),
            device.address(),
            device.vendor_id,
            device.product_id,
            device.model().unwrap_or("supported dongle"),
        );
    }
    Ok(())
}

fn watch(index: usize, timeout: Duration, width: u32, height: u32, json: bool) -> Result<()> {
    let devices = CarlinkDevice::find_all().context("USB enumeration failed")?;
    if devices.is_empty() {
        bail!("no supported dongles found");
    }
    let device = devices.get(index).with_context(|| {
        format!(
            "device index {} out of range ({} found)",
            index,
            devices.len()
        )
    })?;

    let (bridge, events) = CarlinkBridge::new();
    let handle = device.open().context("failed to open dongle")?;
    let info = handle.info();
    info!("opened {}", info.describe());
    bridge.attach_transport(Arc::new(handle));

    // The staging sink feeds a counting drain thread standing in for a
    // real decoder.
    let (frames_tx, frames_rx) = unbounded::<Vec<u8>>();
    let mut sink = RingVideoSink::new(frames_tx);
    sink.start(width, height).context("video sink start failed")?;
    bridge.set_video_sink(Box::new(sink));

    let drain = thread::spawn(move || {
        let mut packets = 0u64;
        let mut bytes = 0u64;
        for packet in frames_rx.iter() {
            packets += 1;
            bytes += packet.len() as u64;
            if packets % 300 == 0 {
                info!("video: {} packets, {} bytes staged", packets, bytes);
            }
        }
        info!("video feed closed after {} packets ({} bytes)", packets, bytes);
    });

    bridge
        .start_reading_loop(info.bulk_in, timeout)
        .context("could not start reading loop")?;

    for event in events.iter() {
        let terminal = matches!(event, CarlinkEvent::LoopError { .. });
        if json {
            println!("{}", serde_json::to_string(&event)?);
        } else {
            print_event(&event);
        }
        if terminal {
            break;
        }
    }

    bridge.join_reading_loop();
    // Dropping the sink closes the frame feed and lets the drain finish.
    bridge.clear_video_sink();
    let _ = drain.join();
    Ok(())
}

fn print_event(event: &CarlinkEvent) {
    match event {
        CarlinkEvent::Log { message } => println!("log      {}", message),
        CarlinkEvent::Message {
            msg_type,
            data: None,
        } => {
            println!("message  {}", describe_message_type(*msg_type));
        }
        CarlinkEvent::Message {
            msg_type,
            data: Some(data),
        } if data.is_empty() => {
            println!("message  {} (0 bytes)", describe_message_type(*msg_type));
        }
        CarlinkEvent::Message {
            msg_type,
            data: Some(data),
        } => {
            println!(
                "message  {} ({} bytes) {}",
                describe_message_type(*msg_type),
                data.len(),
                preview(data)
            );
        }
        CarlinkEvent::LoopError { kind, message } => {
            println!("error    [{:?}] {}", kind, message);
        }
        CarlinkEvent::EmergencyCleanup => println!("recovery emergency cleanup performed"),
    }
}

/// Leading bytes of a payload as hex, elided past 16.
fn preview(data: &[u8]) -> String {
    const PREVIEW_LEN: usize = 16;
    if data.len() <= PREVIEW_LEN {
        hex::encode(data)
    } else {
        format!("{}..", hex::encode(&data[..PREVIEW_LEN]))
    }
}
