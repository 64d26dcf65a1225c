//! Organ Player - headless pipe organ played from a MIDI keyboard
//!
//! This is the main entry point. It:
//! 1. Opens the cpal output and learns its sample rate
//! 2. Starts the organ threads at that rate
//! 3. Hands the render bridge to the audio callback and starts playback
//! 4. Connects the configured MIDI input port
//!
//! ## Command line flags
//!
//! - `--list-ports`: Print the available audio devices and MIDI inputs, then exit
//! - `--self-test`: Sound two Great ranks and a C major chord once the organ is ready

mod config;

use std::io::BufRead;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use config::PlayerConfig;
use organ_core::audio::{list_output_devices, CpalOutput};
use organ_core::config::{default_config_path, load_config};
use organ_core::{ModelState, Organ, Transport};

/// How long to wait for the wavetables before playing anyway
const READY_TIMEOUT: Duration = Duration::from_secs(30);

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    // Initialize logger - set RUST_LOG=debug for verbose output
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    if args.iter().any(|arg| arg == "--list-ports") {
        return list_ports();
    }

    log::info!("organ-player starting up");

    let config_path = default_config_path();
    let (mut config, source): (PlayerConfig, _) = load_config(&config_path);
    log::debug!("Config from {:?} ({:?})", config_path, source);
    config.self_test |= args.iter().any(|arg| arg == "--self-test");

    if let Some(root) = &config.organ.storage_root {
        std::fs::create_dir_all(root)
            .with_context(|| format!("Failed to create storage root {:?}", root))?;
    }

    let output = CpalOutput::open(&config.organ.audio).context("Failed to open audio output")?;
    let sample_rate = output.sample_rate();
    log::info!(
        "Audio output: {} Hz, {} channels, buffer {:?}",
        sample_rate,
        output.channels(),
        output.buffer_size()
    );

    let (mut organ, bridge) =
        Organ::start(&config.organ, sample_rate).context("Failed to start organ")?;
    let stats = bridge.stats();
    let transport = Transport::new(output.start(bridge).context("Failed to build audio stream")?);

    wait_until_ready(&organ);
    transport.play().context("Failed to start playback")?;

    let _midi = match organ_midi::connect(&config.midi, &organ) {
        Ok(handler) => {
            println!("MIDI input: {}", handler.port_name());
            Some(handler)
        }
        Err(e) => {
            log::warn!("MIDI input unavailable: {}", e);
            None
        }
    };

    if config.self_test {
        organ.self_test(true);
    }

    println!("Playing '{}'. Press Enter to quit.", organ_name(&organ));
    let mut line = String::new();
    let _ = std::io::stdin().lock().read_line(&mut line);

    organ.self_test(false);
    organ.panic_off();
    if let Err(e) = transport.stop() {
        log::warn!("Failed to pause audio stream: {}", e);
    }
    organ.shutdown();

    log::info!(
        "Rendered {} periods, {} overruns",
        stats.callbacks(),
        stats.overruns()
    );
    println!("Organ Player stopped.");
    Ok(())
}

fn wait_until_ready(organ: &Organ) {
    let started = Instant::now();
    while started.elapsed() < READY_TIMEOUT {
        match organ.model_state() {
            ModelState::Ready => {
                log::info!("Organ ready after {:?}", started.elapsed());
                return;
            }
            ModelState::Degraded => {
                log::error!("Organ failed to initialize, check the storage root");
                return;
            }
            _ => std::thread::sleep(Duration::from_millis(20)),
        }
    }
    log::warn!("Organ still initializing after {:?}", READY_TIMEOUT);
}

fn organ_name(organ: &Organ) -> String {
    (0..organ.n_divisions())
        .filter_map(|division| organ.division_label(division))
        .collect::<Vec<_>>()
        .join(" / ")
}

fn list_ports() -> Result<()> {
    println!("Audio outputs:");
    for device in list_output_devices().context("Failed to enumerate audio devices")? {
        println!("  {}", device.name);
    }
    println!("MIDI inputs:");
    match organ_midi::list_input_ports() {
        Ok(ports) => ports.iter().for_each(|port| println!("  {}", port)),
        Err(e) => println!("  ({})", e),
    }
    Ok(())
}
