//! screen-recorder
//!
//! Records a monitor, a screen region or a window together with microphone
//! audio, then merges both into a single video file with ffmpeg.

mod audio;
mod backend;
mod capture;
mod config;
mod crash;
mod error;
mod logging;
mod mux;
mod session;
mod ui;
mod video;

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use capture::{CaptureTarget, Region, WindowLocator};
use config::Config;
use session::{create_engine_channels, EngineCommand, RecorderEngine, SessionController, SessionState, StartRequest};
use video::{Container, FrameRate};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Listing {
    Monitors,
    Windows,
    Devices,
}

/// Command line options; each one overrides the config file for this run
#[derive(Debug, Default)]
struct Cli {
    help: bool,
    listing: Option<Listing>,
    json: bool,
    monitor: Option<usize>,
    region: Option<Region>,
    window: Option<u64>,
    fps: Option<FrameRate>,
    container: Option<Container>,
    audio_device: Option<String>,
    no_audio: bool,
    output: Option<PathBuf>,
    duration_secs: Option<u64>,
    ffmpeg: Option<String>,
}

impl Cli {
    fn parse(args: &[String]) -> Result<Self> {
        let mut cli = Cli::default();
        let mut iter = args.iter();

        while let Some(arg) = iter.next() {
            let mut value = |name: &str| {
                iter.next()
                    .cloned()
                    .with_context(|| format!("{} requires a value", name))
            };

            match arg.as_str() {
                "-h" | "--help" => cli.help = true,
                "--list-monitors" => cli.listing = Some(Listing::Monitors),
                "--list-windows" => cli.listing = Some(Listing::Windows),
                "--list-devices" => cli.listing = Some(Listing::Devices),
                "--json" => cli.json = true,
                "--monitor" => {
                    let v = value("--monitor")?;
                    cli.monitor = Some(v.parse().with_context(|| format!("invalid monitor index '{}'", v))?);
                }
                "--region" => cli.region = Some(parse_region(&value("--region")?)?),
                "--window" => cli.window = Some(parse_handle(&value("--window")?)?),
                "--fps" => {
                    let v = value("--fps")?;
                    let fps: u32 = v.parse().with_context(|| format!("invalid frame rate '{}'", v))?;
                    cli.fps = Some(FrameRate::try_from(fps)?);
                }
                "--format" => {
                    let v = value("--format")?;
                    cli.container = Some(v.parse().map_err(anyhow::Error::msg)?);
                }
                "--audio-device" => cli.audio_device = Some(value("--audio-device")?),
                "--no-audio" => cli.no_audio = true,
                "--output" => cli.output = Some(PathBuf::from(value("--output")?)),
                "--duration" => {
                    let v = value("--duration")?;
                    cli.duration_secs = Some(v.parse().with_context(|| format!("invalid duration '{}'", v))?);
                }
                "--ffmpeg" => cli.ffmpeg = Some(value("--ffmpeg")?),
                other => bail!("unknown option '{}'", other),
            }
        }

        if cli.window.is_some() && cli.region.is_some() {
            bail!("--window and --region cannot be combined");
        }
        Ok(cli)
    }

    fn apply_to(&self, config: &mut Config) {
        if let Some(fps) = self.fps {
            config.capture.fps = fps;
        }
        if let Some(container) = self.container {
            config.capture.container = container;
        }
        if self.monitor.is_some() {
            config.capture.monitor = self.monitor;
            config.capture.region = None;
        }
        if self.region.is_some() {
            config.capture.region = self.region;
        }
        if let Some(device) = &self.audio_device {
            config.audio.enabled = true;
            config.audio.device = Some(device.clone());
        }
        if self.no_audio {
            config.audio.enabled = false;
        }
        if let Some(output) = &self.output {
            config.recording.output_directory = Some(output.clone());
        }
        if let Some(secs) = self.duration_secs {
            config.recording.max_duration_secs = Some(secs);
        }
        if let Some(ffmpeg) = &self.ffmpeg {
            config.recording.ffmpeg_path = ffmpeg.clone();
        }
    }
}

/// `LEFT,TOP,WIDTH,HEIGHT`
fn parse_region(value: &str) -> Result<Region> {
    let parts: Vec<i32> = value
        .split(',')
        .map(|p| p.trim().parse::<i32>())
        .collect::<std::result::Result<_, _>>()
        .with_context(|| format!("invalid region '{}'", value))?;
    match parts.as_slice() {
        [left, top, width, height] => Ok(Region::new(*top, *left, *width, *height)),
        _ => bail!("region must be LEFT,TOP,WIDTH,HEIGHT, got '{}'", value),
    }
}

/// Decimal or `0x` hexadecimal window handle
fn parse_handle(value: &str) -> Result<u64> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.with_context(|| format!("invalid window handle '{}'", value))
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let cli = match Cli::parse(&args) {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("error: {:#}", e);
            eprintln!("Run with --help for usage.");
            std::process::exit(2);
        }
    };

    if cli.help {
        print_help();
        return Ok(());
    }

    let _log_guard = logging::init_logging()?;
    match logging::get_log_dir() {
        Ok(log_dir) => {
            if let Err(e) = crash::init_crash_handler(&log_dir) {
                warn!("Crash handler not installed: {}", e);
            }
        }
        Err(e) => warn!("Log directory unavailable: {}", e),
    }

    if let Some(listing) = cli.listing {
        return print_listing(listing, cli.json);
    }

    let mut config = Config::load()?;
    info!("Configuration loaded from {:?}", config.config_path()?);
    cli.apply_to(&mut config);

    let request = build_start_request(&cli, &config)?;
    let backend = backend::create_backend(PathBuf::from(&config.recording.ffmpeg_path));
    let muxer = mux::Muxer::ffmpeg(config.recording.ffmpeg_path.clone());
    let controller = SessionController::new(backend, muxer, config.controller_options());

    // block_in_place in the engine needs worker threads
    let runtime = Arc::new(
        tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("Failed to create tokio runtime")?,
    );

    let (cmd_tx, cmd_rx, status_tx, _status_rx) = create_engine_channels();
    let console = ui::ConsoleApp::new(cmd_tx.clone(), status_tx.subscribe());
    let mut engine = RecorderEngine::new(controller, cmd_rx, status_tx, config.max_duration());

    let engine_runtime = runtime.clone();
    let engine_handle = std::thread::Builder::new()
        .name("recorder-engine".into())
        .spawn(move || {
            engine_runtime.block_on(async move {
                if let Err(e) = engine.run().await {
                    error!("Recorder engine error: {}", e);
                }
            });
        })?;

    let ctrl_c_tx = cmd_tx.clone();
    ctrlc::set_handler(move || {
        info!("Ctrl+C received, finishing the recording...");
        let _ = ctrl_c_tx.try_send(EngineCommand::Stop);
        let _ = ctrl_c_tx.try_send(EngineCommand::Shutdown);
    })?;

    info!(
        "Recording {:?} {} at {} into {:?}",
        request.target.kind,
        request.target.region,
        request.fps,
        config.output_directory()
    );
    runtime.block_on(cmd_tx.send(EngineCommand::Start(request)))?;

    let report = console.run()?;

    runtime.block_on(async {
        let _ = cmd_tx.send(EngineCommand::Shutdown).await;
    });
    let _ = engine_handle.join();

    info!("Shutdown complete");
    match report {
        Some(report) if report.state == SessionState::Failed => std::process::exit(1),
        Some(_) => Ok(()),
        None => std::process::exit(1),
    }
}

fn build_start_request(cli: &Cli, config: &Config) -> Result<StartRequest> {
    let target = if let Some(handle) = cli.window {
        let region = capture::SystemWindowLocator
            .window_rect(handle)
            .with_context(|| format!("window {:#x} not found (see --list-windows)", handle))?;
        CaptureTarget::window(handle, region)
    } else if let Some(region) = config.capture.region {
        CaptureTarget::monitor(config.capture.monitor.unwrap_or(0), region)
    } else {
        let monitor = capture::select_monitor(config.capture.monitor)
            .context("No monitor to record (see --list-monitors)")?;
        info!("Recording monitor {} ({})", monitor.index, monitor.name);
        CaptureTarget::monitor(monitor.index, monitor.region)
    };

    Ok(StartRequest {
        target,
        fps: config.capture.fps,
        container: config.capture.container,
        audio_device: config.audio_device(),
    })
}

fn print_listing(listing: Listing, json: bool) -> Result<()> {
    match listing {
        Listing::Monitors => {
            let monitors = capture::list_monitors()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&monitors)?);
                return Ok(());
            }
            for monitor in monitors {
                println!(
                    "[{}] {}  {}{}",
                    monitor.index,
                    monitor.name,
                    monitor.region,
                    if monitor.primary { "  (primary)" } else { "" }
                );
            }
        }
        Listing::Windows => {
            let windows = capture::list_windows();
            if json {
                println!("{}", serde_json::to_string_pretty(&windows)?);
                return Ok(());
            }
            if windows.is_empty() {
                println!("No recordable windows found (window capture is supported on Windows).");
            }
            for window in windows {
                println!("{:#010x}  {:<20}  {}", window.handle, window.region.to_string(), window.title);
            }
        }
        Listing::Devices => {
            let devices = audio::list_input_devices();
            if json {
                println!("{}", serde_json::to_string_pretty(&devices)?);
                return Ok(());
            }
            if devices.is_empty() {
                println!("No audio input devices found.");
            }
            for device in devices {
                println!("{} {}", if device.default { "*" } else { " " }, device.name);
            }
        }
    }
    Ok(())
}

fn print_help() {
    println!("screen-recorder - Record the screen and microphone");
    println!();
    println!("USAGE:");
    println!("    screen-recorder [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    --list-monitors             List monitors and exit");
    println!("    --list-windows              List recordable windows and exit");
    println!("    --list-devices              List audio input devices and exit");
    println!("    --json                      Print listings as JSON");
    println!("    --monitor N                 Record monitor N (default: primary)");
    println!("    --region L,T,W,H            Record a fixed screen region");
    println!("    --window HANDLE             Record a window, following it as it moves");
    println!("    --fps N                     Frame rate: 30, 60, 100 or 120");
    println!("    --format FMT                Container: mp4, avi or mkv");
    println!("    --audio-device NAME         Record from this input device");
    println!("    --no-audio                  Record video only");
    println!("    --output DIR                Output directory");
    println!("    --duration SECS             Stop automatically after SECS seconds");
    println!("    --ffmpeg PATH               ffmpeg binary used to encode and merge");
    println!("    -h, --help                  Print this help message");
    println!();
    println!("While recording: p = pause/resume, s = stop, q = quit");
    println!();
    println!("ENVIRONMENT:");
    println!("    RUST_LOG                    Set log level (e.g., debug, info, warn)");
    println!("    SCREEN_RECORDER_LOG_PATH    Override the log directory");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_recording_options() {
        let cli = Cli::parse(&args(&[
            "--region", "100,50,1280,720", "--fps", "60", "--format", "mkv", "--no-audio",
            "--duration", "90",
        ]))
        .unwrap();

        assert_eq!(cli.region, Some(Region::new(50, 100, 1280, 720)));
        assert_eq!(cli.fps.unwrap().get(), 60);
        assert_eq!(cli.container, Some(Container::Mkv));
        assert!(cli.no_audio);

        let mut config = Config::default();
        cli.apply_to(&mut config);
        assert_eq!(config.capture.region, Some(Region::new(50, 100, 1280, 720)));
        assert_eq!(config.audio_device(), None);
        assert_eq!(config.max_duration(), Some(std::time::Duration::from_secs(90)));
    }

    #[test]
    fn test_parse_rejects_bad_values() {
        assert!(Cli::parse(&args(&["--fps", "25"])).is_err());
        assert!(Cli::parse(&args(&["--region", "1,2,3"])).is_err());
        assert!(Cli::parse(&args(&["--format", "webm"])).is_err());
        assert!(Cli::parse(&args(&["--monitor"])).is_err());
        assert!(Cli::parse(&args(&["--record"])).is_err());
        assert!(Cli::parse(&args(&["--window", "0x10", "--region", "0,0,10,10"])).is_err());
    }

    #[test]
    fn test_parse_window_handles() {
        assert_eq!(parse_handle("0x1A2B").unwrap(), 0x1a2b);
        assert_eq!(parse_handle("4242").unwrap(), 4242);
        assert!(parse_handle("window").is_err());
    }

    #[test]
    fn test_explicit_region_becomes_fixed_target() {
        let mut config = Config::default();
        config.capture.region = Some(Region::new(0, 0, 1920, 1080));
        config.audio.device = Some("USB Mic".to_string());

        let request = build_start_request(&Cli::default(), &config).unwrap();
        assert_eq!(request.target.kind, capture::TargetKind::Monitor);
        assert_eq!(request.target.region, Region::new(0, 0, 1920, 1080));
        assert_eq!(request.audio_device.as_deref(), Some("USB Mic"));
    }
}
