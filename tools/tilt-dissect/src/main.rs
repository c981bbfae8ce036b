//! Offline dissector for raw tilt-station captures.
//!
//! Feeds a captured byte stream through the same line codec and frame
//! decoder the daemon uses, so the printed output is exactly what the
//! daemon would have decoded from that capture. Useful for confirming
//! header offsets against a new firmware revision before deployment.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use bytes::BytesMut;
use clap::Parser;
use colored::Colorize;
use tokio_util::codec::Decoder;

use tilt_collector::config::FrameLayout;
use tilt_collector::frame::{FrameDecoder, RawLineCodec};
use tilt_collector::reading::Reading;

#[derive(Parser)]
#[command(
    name = "tilt-dissect",
    about = "Dissect raw captures of tilt-station serial output"
)]
struct Args {
    /// Raw capture file, bytes exactly as read from the serial port
    capture: PathBuf,

    /// Print each raw line as hex alongside the decoded view
    #[arg(long)]
    hex: bool,

    /// JSON file with frame header offsets, same shape as the daemon's
    /// "frame" configuration section
    #[arg(long)]
    layout: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let layout = match &args.layout {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("cannot read {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("cannot parse {}", path.display()))?
        }
        None => FrameLayout::default(),
    };

    let raw = fs::read(&args.capture)
        .with_context(|| format!("cannot read {}", args.capture.display()))?;

    let decoder = FrameDecoder::new(layout);
    let mut codec = RawLineCodec::default();
    let mut buf = BytesMut::from(&raw[..]);

    let mut total = 0usize;
    let mut decoded = 0usize;
    while let Some(line) = codec.decode(&mut buf)? {
        total += 1;
        if args.hex {
            println!("{:>5} {}", total, hex::encode(&line).dimmed());
        }
        match decoder.decode(&line) {
            Ok(reading) => {
                decoded += 1;
                print_reading(total, &reading);
            }
            Err(e) => println!("{:>5} {} {e}", total, "ERR".red()),
        }
    }

    if !buf.is_empty() {
        println!(
            "{} {} trailing bytes without a line terminator",
            "!".yellow(),
            buf.len()
        );
    }
    println!("{decoded}/{total} lines decoded");
    Ok(())
}

fn print_reading(index: usize, reading: &Reading) {
    println!(
        "{:>5} {} {} type={} net={} incl[radial={} tangential={} temp={} vbat={}] pluvio[rain={} vbat={}]",
        index,
        "OK".green(),
        reading.station_name.bold(),
        reading.station_type,
        reading.network_id,
        reading.inclinometer.radial,
        reading.inclinometer.tangential,
        reading.inclinometer.temperature,
        reading.inclinometer.voltage,
        reading.pluviometer.rain_level,
        reading.pluviometer.voltage,
    );
}
