//! `ymtool`: send or receive one file over a serial port with YMODEM.

#[macro_use]
extern crate log;

use std::{
    fs::File,
    path::{Path, PathBuf},
};

use anyhow::{Context, anyhow, bail};
use byte_unit::{Byte, UnitType};
use clap::{Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use ymodem::{FinishReason, Receiver, Sender, SystemClock};

use crate::{config::ToolConfig, serial::SerialLink, sink::FileSink};

mod config;
mod serial;
mod sink;

/// Milliseconds slept between receiver polls with nothing to do.
const POLL_IDLE_MS: u64 = 1;

#[derive(Parser)]
#[command(name = "ymtool", version, about = "YMODEM file transfer over a serial port")]
struct Cli {
    /// Serial device, e.g. /dev/ttyUSB0
    #[arg(short, long, global = true)]
    port: Option<String>,
    /// Baud rate
    #[arg(short, long, global = true)]
    baud: Option<u32>,
    /// Config file (defaults to ./ymtool.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// Send 128 byte packets only
    #[arg(long, global = true)]
    no_1k: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Send a file to the device
    Send {
        /// File to send
        file: PathBuf,
    },
    /// Receive a file from the device
    Recv {
        /// Directory the file is written into
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let mut config = ToolConfig::load(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        config.port = Some(port);
    }
    if let Some(baud) = cli.baud {
        config.baud = baud;
    }
    if cli.no_1k {
        config.ymodem.use_1k = false;
    }

    let port = config
        .port
        .as_deref()
        .ok_or_else(|| anyhow!("no serial port, pass --port or set `port` in the config file"))?;
    let link = SerialLink::open(port, config.baud)?;

    match cli.command {
        Command::Send { file } => send(link, &file, config.ymodem),
        Command::Recv { output_dir } => recv(link, &output_dir, config.ymodem),
    }
}

fn progress_bar(len: u64) -> anyhow::Result<ProgressBar> {
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec})",
        )?
        .progress_chars("#>-"),
    );
    Ok(pb)
}

fn human(size: u64) -> String {
    format!(
        "{:.2}",
        Byte::from_u64(size).get_appropriate_unit(UnitType::Binary)
    )
}

fn send(link: SerialLink, path: &Path, config: ymodem::Config) -> anyhow::Result<()> {
    let mut file =
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let size = file.metadata()?.len();
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow!("{} has no usable file name", path.display()))?;

    println!(
        "{} {} ({}), waiting for receiver...",
        "Sending".green().bold(),
        name,
        human(size)
    );
    let pb = progress_bar(size)?;
    let mut sender = Sender::new(link, SystemClock::new(), config);
    let res = sender.send_file(&mut file, name, size, |sent, _| pb.set_position(sent));
    match res {
        Ok(()) => {
            pb.finish();
            println!("{} {}", "Sent".green().bold(), name);
            Ok(())
        }
        Err(e) => {
            pb.abandon();
            Err(e).context("send failed")
        }
    }
}

fn recv(link: SerialLink, dir: &Path, config: ymodem::Config) -> anyhow::Result<()> {
    if !dir.is_dir() {
        bail!("{} is not a directory", dir.display());
    }
    println!("{} into {}", "Receiving".green().bold(), dir.display());

    let sink = FileSink::new(dir, progress_bar(0)?);
    let mut receiver = Receiver::new(link, SystemClock::new(), sink, config);
    let reason = receiver.run(POLL_IDLE_MS)?;
    let path = receiver.handler().path().map(Path::to_path_buf);

    match (reason, path) {
        (FinishReason::Success, Some(path)) => {
            let size = std::fs::metadata(&path)?.len();
            println!(
                "{} {} ({})",
                "Received".green().bold(),
                path.display(),
                human(size)
            );
            Ok(())
        }
        (reason, _) => bail!("receive failed: {reason}"),
    }
}
