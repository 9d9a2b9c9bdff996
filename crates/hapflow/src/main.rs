//! HapFlow - HAP movie inspection and playback
//!
//! ## Usage
//!
//! ```bash
//! # Stream metadata and the texture format frames would be uploaded in
//! hapflow probe clip.mov
//!
//! # Decode ten seconds at 60 Hz, uploading to the GPU
//! hapflow play clip.mov --seconds 10 --fps 60 --gpu
//!
//! # Write the frame at 2.5s as PNG
//! hapflow dump clip.mov --time 2.5 --out frame.png
//! ```

#![warn(missing_docs)]

mod logging_setup;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use hapflow_core::{EventSeverity, PlayerConfig, PlayerEvent};
use hapflow_media::{
    FrameSink, PlatformCapabilities, PlaybackScheduler, PlaybackState, TextureFrame,
};
use hapflow_render::{FramePresenter, HeadlessGpu, TextureSink};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

#[derive(Parser, Debug)]
#[command(name = "hapflow")]
#[command(version)]
#[command(about = "Decode and play HAP, HAP Alpha and HAP Q movies", long_about = None)]
struct Args {
    /// Player configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print stream metadata and the selected texture format
    Probe {
        /// Movie to inspect
        path: PathBuf,

        /// Query the GPU for supported formats instead of the config file
        #[arg(long)]
        gpu: bool,
    },

    /// Play a movie headless on a simulated display clock
    Play {
        /// Movie to play
        path: PathBuf,

        /// Speed factor; negative plays backwards
        #[arg(long)]
        speed: Option<f64>,

        /// Wrap at the ends instead of stopping
        #[arg(long = "loop", overrides_with = "no_loop")]
        looping: bool,

        /// Stop at the ends even if the config loops
        #[arg(long = "no-loop", overrides_with = "looping")]
        no_loop: bool,

        /// Seconds of display time to simulate
        #[arg(long, default_value = "5")]
        seconds: f64,

        /// Display refresh rate to tick at
        #[arg(long, default_value = "60")]
        fps: f64,

        /// Upload frames to the GPU
        #[arg(long)]
        gpu: bool,
    },

    /// Decode the frame shown at a time and save it as PNG
    Dump {
        /// Movie to read
        path: PathBuf,

        /// Time in seconds
        #[arg(short, long, default_value = "0")]
        time: f64,

        /// Output image
        #[arg(short, long)]
        out: PathBuf,
    },

    /// Write the default configuration to a file
    InitConfig {
        /// Destination
        path: PathBuf,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => PlayerConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => PlayerConfig::default(),
    };
    if let Some(level) = &args.log_level {
        config.log.level = level.clone();
    }
    let _log_guard = logging_setup::init(&config.log)?;

    match args.command {
        Command::Probe { path, gpu } => probe(&config, &path, gpu),
        Command::Play {
            path,
            speed,
            looping,
            no_loop,
            seconds,
            fps,
            gpu,
        } => {
            apply_play_overrides(&mut config, speed, looping, no_loop);
            play(&config, &path, seconds, fps, gpu)
        }
        Command::Dump { path, time, out } => dump(&config, &path, time, &out),
        Command::InitConfig { path } => {
            config
                .save(&path)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Wrote default configuration to {}", path.display());
            Ok(())
        }
    }
}

/// Flags given on the command line win over the config file
fn apply_play_overrides(config: &mut PlayerConfig, speed: Option<f64>, looping: bool, no_loop: bool) {
    if let Some(speed) = speed {
        config.speed = speed;
    }
    if looping {
        config.looping = true;
    } else if no_loop {
        config.looping = false;
    }
}

fn config_capabilities(config: &PlayerConfig) -> PlatformCapabilities {
    PlatformCapabilities::from_config(&config.platform)
}

fn open(config: &PlayerConfig, caps: PlatformCapabilities, path: &Path) -> Result<PlaybackScheduler> {
    let mut player = PlaybackScheduler::new(config, caps);
    player
        .open_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    Ok(player)
}

fn probe(config: &PlayerConfig, path: &Path, gpu: bool) -> Result<()> {
    let caps = if gpu {
        let gpu = HeadlessGpu::new()?;
        println!("GPU:        {} ({:?})", gpu.adapter_info.name, gpu.adapter_info.backend);
        gpu.capabilities()
            .with_device_model(config.platform.device_model.clone())
    } else {
        config_capabilities(config)
    };

    let player = open(config, caps, path)?;
    let meta = player.metadata()?;
    let selection = player.selection()?;

    println!("File:       {}", path.display());
    println!("Codec:      {} ({})", meta.codec, meta.fourcc);
    println!("Size:       {}x{}", meta.width, meta.height);
    println!("Frames:     {}", meta.frame_count);
    println!("Frame rate: {:.3} fps", meta.frame_rate);
    println!("Duration:   {:.3}s", meta.duration);
    println!("Upload as:  {}", selection);
    println!("Shader:     {}", player.blit_shader()?);
    Ok(())
}

/// Counts frames when no GPU is in use
#[derive(Default)]
struct CountingSink {
    presented: u64,
    last_index: Option<usize>,
}

impl FrameSink for CountingSink {
    fn present(&mut self, frame: &TextureFrame) {
        if self.last_index != Some(frame.index) {
            self.last_index = Some(frame.index);
            self.presented += 1;
        }
    }
}

/// Where played frames go
enum Output {
    /// Upload to a texture and draw it into an offscreen target
    Gpu {
        gpu: HeadlessGpu,
        sink: TextureSink,
        presenter: Option<FramePresenter>,
    },
    Count(CountingSink),
}

impl Output {
    /// Build the blit for the opened stream
    fn prepare(&mut self, player: &PlaybackScheduler) -> Result<()> {
        if let Self::Gpu { gpu, presenter, .. } = self {
            let meta = player.metadata()?;
            let shader = player.blit_shader()?;
            *presenter = Some(FramePresenter::new(
                &gpu.device,
                shader,
                meta.width,
                meta.height,
            )?);
            debug!("Presenting through the '{}' blit", shader);
        }
        Ok(())
    }

    fn present(&mut self, player: &PlaybackScheduler) -> Result<()> {
        match self {
            Self::Gpu {
                gpu,
                sink,
                presenter,
            } => {
                let uploaded = sink.uploads();
                player.present_to(sink)?;
                if sink.uploads() > uploaded {
                    if let (Some(presenter), Some(texture)) = (presenter.as_mut(), sink.texture()) {
                        presenter.present(&gpu.device, &gpu.queue, &texture.view);
                    }
                }
            }
            Self::Count(sink) => player.present_to(sink)?,
        }
        Ok(())
    }

    fn presented(&self) -> u64 {
        match self {
            Self::Gpu { presenter, .. } => presenter.as_ref().map_or(0, FramePresenter::presented),
            Self::Count(sink) => sink.presented,
        }
    }
}

fn play(config: &PlayerConfig, path: &Path, seconds: f64, fps: f64, gpu: bool) -> Result<()> {
    if !(fps.is_finite() && fps > 0.0) {
        bail!("--fps must be positive, got {}", fps);
    }

    let (caps, mut output) = if gpu {
        let gpu = HeadlessGpu::new()?;
        let caps = gpu
            .capabilities()
            .with_device_model(config.platform.device_model.clone());
        let sink = TextureSink::new(gpu.device.clone(), gpu.queue.clone());
        (
            caps,
            Output::Gpu {
                gpu,
                sink,
                presenter: None,
            },
        )
    } else {
        (config_capabilities(config), Output::Count(CountingSink::default()))
    };

    let mut player = open(config, caps, path)?;
    output.prepare(&player)?;
    let events = player.events();
    player.play()?;

    let delta = 1.0 / fps;
    let ticks = (seconds.max(0.0) * fps).ceil() as u64;
    let started = Instant::now();

    for tick in 0..ticks {
        player.tick(delta)?;
        if player.current_frame().is_ok() {
            output.present(&player)?;
        }

        for event in events.try_iter() {
            match event.severity() {
                EventSeverity::Warning => warn!("{}", event),
                EventSeverity::Info => debug!("{}", event),
            }
            if event == PlayerEvent::PlaybackFinished {
                info!("Reached the end after {} ticks", tick + 1);
            }
        }
        if player.state() == PlaybackState::Paused {
            break;
        }
    }

    let elapsed = started.elapsed().as_secs_f64();
    let stats = player.stats();
    println!(
        "Decoded {} frames ({} failed, {} presented) in {:.3}s, {:.1} frames/s",
        stats.decoded_frames,
        stats.failed_decodes,
        output.presented(),
        elapsed,
        stats.decoded_frames as f64 / elapsed.max(f64::EPSILON)
    );
    if stats.dropped_events > 0 {
        println!("{} events dropped", stats.dropped_events);
    }
    Ok(())
}

fn dump(config: &PlayerConfig, path: &Path, time: f64, out: &Path) -> Result<()> {
    // CPU conversion gives plain RGBA whatever the codec
    let mut player = open(config, PlatformCapabilities::rgba_only(), path)?;
    player.set_time(time)?;
    player.update_now()?;

    let frame = match player.current_frame() {
        Ok(frame) => frame,
        Err(e) => {
            let reason = player
                .events()
                .try_iter()
                .find_map(|event| match event {
                    PlayerEvent::DecodeFailed { message, .. } => Some(message),
                    _ => None,
                })
                .unwrap_or_else(|| e.to_string());
            bail!("No frame at {:.3}s: {}", time, reason);
        }
    };

    let image = image::RgbaImage::from_raw(frame.width, frame.height, frame.data.clone())
        .context("Decoded frame does not match its dimensions")?;
    image
        .save(out)
        .with_context(|| format!("Failed to write {}", out.display()))?;
    println!(
        "Wrote frame {} ({}x{}) to {}",
        frame.index,
        frame.width,
        frame.height,
        out.display()
    );
    Ok(())
}
