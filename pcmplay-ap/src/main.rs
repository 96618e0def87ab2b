//! pcmplay - Main entry point
//!
//! Plays a WAV file, dumps a WAV header, probes device parameters, or lists
//! output devices. Playback runs on a blocking thread; Ctrl+C or SIGTERM
//! stops it cooperatively so the device is always released.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{error, info};

use pcmplay_ap::audio::{AccessMode, AvailMinMode};
use pcmplay_ap::device::{CpalSink, MemorySink, MemorySinkOptions, PcmSink, MEMORY_DEVICE_NAME};
use pcmplay_ap::playback::{PlaybackReport, ProbeReport};
use pcmplay_ap::wav::WavHeader;
use pcmplay_ap::{CancelToken, Player, PlayerConfig};
use pcmplay_common::config::{resolve_config, ConfigSource};
use pcmplay_common::logging::init_tracing;

/// Command-line arguments for pcmplay
#[derive(Parser, Debug)]
#[command(name = "pcmplay")]
#[command(about = "Minimal PCM WAV player")]
#[command(version)]
struct Args {
    /// Config file (overrides PCMPLAY_CONFIG and the per-user file)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Play a WAV file
    Play {
        /// WAV file to play
        file: PathBuf,

        #[command(flatten)]
        device: DeviceArgs,

        /// Keep reading past the header's data size until end of file
        #[arg(long)]
        ignore_data_size: bool,

        /// Stop after this many seconds
        #[arg(long)]
        duration: Option<f64>,
    },

    /// Print the header fields of a WAV file
    Inspect {
        /// WAV file to inspect
        file: PathBuf,
    },

    /// Negotiate device parameters without playing
    Probe {
        /// Take channels/rate/format from this WAV file
        file: Option<PathBuf>,

        #[command(flatten)]
        device: DeviceArgs,
    },

    /// List output devices
    Devices,
}

#[derive(clap::Args, Debug)]
struct DeviceArgs {
    /// Output device name ("memory" for a dry run)
    #[arg(short, long, env = "PCMPLAY_DEVICE")]
    device: Option<String>,

    /// avail_min mode: period or buffer
    #[arg(long)]
    avail_min: Option<AvailMinMode>,

    /// Access mode: rw_interleaved or mmap_interleaved
    #[arg(long)]
    access: Option<AccessMode>,

    /// Report "try again" from the device instead of blocking
    #[arg(long)]
    nonblocking: bool,
}

impl DeviceArgs {
    fn apply(&self, config: &mut PlayerConfig) {
        if let Some(device) = &self.device {
            config.device_name = Some(device.clone());
        }
        if let Some(mode) = self.avail_min {
            config.avail_min = mode;
        }
        if let Some(access) = self.access {
            config.access_mode = access;
        }
        if self.nonblocking {
            config.nonblocking = true;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let resolved = resolve_config(args.config.as_deref()).context("Failed to load configuration")?;
    let level = args
        .log_level
        .clone()
        .unwrap_or_else(|| resolved.config.logging.level.clone());
    init_tracing(&level).context("Failed to initialize logging")?;

    match &resolved.source {
        ConfigSource::Defaults => info!("Using built-in configuration defaults"),
        other => info!("Configuration loaded from {:?}", other),
    }

    let mut config =
        PlayerConfig::from_toml(&resolved.config).context("Invalid configuration")?;

    match args.command {
        Command::Play {
            file,
            device,
            ignore_data_size,
            duration,
        } => {
            device.apply(&mut config);
            if ignore_data_size {
                config.stop_at_data_size = false;
            }
            config.duration_secs = duration;
            config.validate().context("Invalid playback options")?;

            let report = play(config, file).await?;
            print_report(&report);
        }
        Command::Inspect { file } => inspect(&file)?,
        Command::Probe { file, device } => {
            device.apply(&mut config);
            let report = probe(config, file)?;
            print_probe(&report);
        }
        Command::Devices => list_devices()?,
    }

    Ok(())
}

/// Open the configured output device
fn open_sink(config: &PlayerConfig) -> Result<Box<dyn PcmSink>> {
    match config.device_name.as_deref() {
        Some(MEMORY_DEVICE_NAME) => Ok(Box::new(MemorySink::new(MemorySinkOptions {
            capture: false,
            ..Default::default()
        }))),
        name => {
            let sink = CpalSink::open(name, config.nonblocking)
                .context("Failed to open audio device")?;
            Ok(Box::new(sink))
        }
    }
}

async fn play(config: PlayerConfig, file: PathBuf) -> Result<PlaybackReport> {
    info!("Playing {}", file.display());
    let cancel = CancelToken::new();

    // cpal streams are not Send everywhere, so the device lives on the
    // blocking thread
    let mut task = tokio::task::spawn_blocking({
        let cancel = cancel.clone();
        move || -> Result<PlaybackReport> {
            let mut sink = open_sink(&config)?;
            let player = Player::new(config);
            Ok(player.play_file(&file, &mut sink, &cancel)?)
        }
    });

    let joined = tokio::select! {
        joined = &mut task => joined,
        _ = shutdown_signal() => {
            cancel.cancel();
            task.await
        }
    };
    joined.context("Playback task failed")?
}

fn probe(config: PlayerConfig, file: Option<PathBuf>) -> Result<ProbeReport> {
    let header = match &file {
        Some(path) => {
            let mut f = std::fs::File::open(path)
                .with_context(|| format!("Failed to open {}", path.display()))?;
            Some(WavHeader::read_from(&mut f)?)
        }
        None => None,
    };
    let mut sink = open_sink(&config)?;
    let player = Player::new(config);
    Ok(player.probe(header.as_ref(), &mut sink)?)
}

fn inspect(path: &Path) -> Result<()> {
    let mut file =
        std::fs::File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let filesize = file.metadata()?.len();
    let header = WavHeader::read_from(&mut file)?;

    println!("file:            {}", path.display());
    println!("filesize:        {} bytes", filesize);
    println!("riff:            {}", header.riff_tag.escape_ascii());
    println!("file_size:       {}", header.file_size);
    println!("format:          {}", header.format_tag.escape_ascii());
    println!("fmt chunk:       {}", header.fmt_chunk_id.escape_ascii());
    println!("fmt_chunk_size:  {}", header.fmt_chunk_size);
    println!("audio_format:    {}", header.audio_format);
    println!("channels:        {}", header.channel_count);
    println!("sample_rate:     {}", header.sample_rate);
    println!(
        "byte_rate:       {} (computed {})",
        header.byte_rate,
        header.computed_byte_rate()
    );
    println!(
        "block_align:     {} (computed {})",
        header.block_align,
        header.computed_block_align()
    );
    println!("bits_per_sample: {}", header.bits_per_sample);
    if let Some(bits) = header.bits_from_byte_rate() {
        println!("  from byte_rate:   {}", bits);
    }
    if let Some(bits) = header.bits_from_block_align() {
        println!("  from block_align: {}", bits);
    }
    println!("data chunk:      {}", header.data_chunk_id.escape_ascii());
    println!("data_size:       {}", header.data_size);
    println!("duration:        {:.3} s", header.duration_secs());
    if !header.derived_fields_consistent() {
        println!("warning: declared byte_rate/block_align disagree with the format");
    }
    if let Err(e) = header.validate_pcm() {
        println!("warning: {}", e);
    }
    Ok(())
}

fn list_devices() -> Result<()> {
    let devices = CpalSink::list_devices().context("Failed to list devices")?;
    if devices.is_empty() {
        println!("No output devices found");
    }
    for device in devices {
        let marker = if device.is_default { " (default)" } else { "" };
        println!("{}{}", device.name, marker);
        if let Some(caps) = device.capabilities {
            let formats: Vec<String> = caps.formats.iter().map(|f| f.to_string()).collect();
            println!("  formats:  {}", formats.join(", "));
            println!("  channels: {}-{}", caps.channels.start(), caps.channels.end());
            println!("  rates:    {}-{} Hz", caps.rates.start(), caps.rates.end());
            if let Some(period) = caps.period_frames {
                println!("  period:   {}-{} frames", period.start(), period.end());
            }
        }
    }
    println!("{}  (in-memory dry run)", MEMORY_DEVICE_NAME);
    Ok(())
}

fn print_report(report: &PlaybackReport) {
    let hw = &report.hardware;
    println!(
        "{} frames written ({:.2} s) in {} write calls",
        report.stats.frames_written,
        report.stats.frames_written as f64 / f64::from(hw.actual_rate),
        report.stats.write_calls
    );
    println!(
        "partial writes: {}, busy retries: {}, end: {:?}, state: {}",
        report.stats.partial_writes, report.stats.busy_retries, report.end, report.final_state
    );
}

fn print_probe(report: &ProbeReport) {
    let hw = &report.hardware;
    println!("device:          {}", report.device);
    println!("access:          {}", hw.access_mode);
    println!("format:          {} ({} bits physical)", hw.sample_format, hw.physical_width());
    println!("channels:        {}", hw.channel_count);
    println!("rate:            {} Hz", hw.actual_rate);
    println!(
        "buffer:          {} frames, {} us (requested {} us)",
        hw.actual_buffer_frames, hw.actual_buffer_time_us, hw.buffer_time_us
    );
    println!(
        "period:          {} frames, {} us (requested {} us)",
        hw.actual_period_frames, hw.actual_period_time_us, hw.period_time_us
    );
    println!("start_threshold: {} frames", report.software.start_threshold_frames);
    println!("avail_min:       {} frames", report.software.avail_min_frames);
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping playback");
        },
        _ = terminate => {
            info!("Received terminate signal, stopping playback");
        },
    }
}
