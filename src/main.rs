use std::path::PathBuf;
use std::sync::mpsc;

use anyhow::Result;
use clap::Parser;
use log::info;

use paneld::config::{Config, Theme};
use paneld::led;
use paneld::render::RenderEngine;
use paneld::state::SharedState;
use paneld::worker::{self, WorkerTiming};

/// Status panel daemon for USB-HID mini displays.
#[derive(Parser, Debug)]
#[command(name = "paneld", version)]
struct Args {
    /// Path to the daemon configuration file.
    #[arg(long, default_value = "config.json")]
    config: PathBuf,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = Config::load(&args.config)?;
    let theme_path = match args.config.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.join(&config.theme),
        _ => config.theme.clone(),
    };
    let theme = Theme::load(&theme_path)?;
    info!(
        "loaded {} with {} screens from {}",
        args.config.display(),
        theme.screens.len(),
        theme_path.display()
    );

    let (job_tx, job_rx) = mpsc::channel();
    let (done_tx, done_rx) = mpsc::channel();
    worker::spawn(
        config.vendor_id,
        config.product_id,
        WorkerTiming::new(config.refresh_ms, config.heartbeat_ms),
        job_rx,
        done_tx,
    );

    let (led_tx, led_rx) = mpsc::channel();
    led::spawn(config.led.device.clone(), led_rx);

    // an external API layer would hold a clone of this handle for previews
    // and control signals
    let shared = SharedState::new(config.canvas.width, config.canvas.height);

    RenderEngine::new(config, theme, job_tx, done_rx, led_tx, shared).run()
}
