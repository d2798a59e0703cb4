//! # Lockstep Player
//!
//! Headless host for the reference machine.
//!
//! ## Usage
//! ```bash
//! # Run 600 frames with a fixed seed
//! lockstep --frames 600 --seed 42
//!
//! # Save the final state, then continue from it later
//! lockstep --frames 100 --seed 42 --save state.bst
//! lockstep --frames 100 --load state.bst
//!
//! # Run twice and compare every snapshot
//! lockstep --frames 300 --seed 7 --verify
//!
//! # Per-frame digests
//! RUST_LOG=lockstep=debug lockstep --frames 10
//! ```

use anyhow::{bail, Context, Result};
use lockstep_core::config::default_config_path;
use lockstep_core::frontend::Session;
use lockstep_core::machine::bus::ButtonState;
use lockstep_core::machine::{Machine, MachineConfig};
use lockstep_core::presentation::{FrameQueue, Presenter};
use lockstep_core::CoreConfig;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

// ============================================================================
// Options
// ============================================================================

#[derive(Debug)]
struct PlayerOptions {
    frames: u64,
    seed: Option<u64>,
    run_ahead: bool,
    config: Option<PathBuf>,
    save: Option<PathBuf>,
    load: Option<PathBuf>,
    verify: bool,
}

impl Default for PlayerOptions {
    fn default() -> Self {
        Self {
            frames: 120,
            seed: None,
            run_ahead: false,
            config: None,
            save: None,
            load: None,
            verify: false,
        }
    }
}

fn parse_args(args: &[String]) -> Result<PlayerOptions> {
    let mut options = PlayerOptions::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--frames" | "-n" => {
                let value = flag_value(args, i, "--frames")?;
                options.frames = value
                    .parse()
                    .with_context(|| format!("Invalid frame count: {}", value))?;
                i += 2;
            }
            "--seed" | "-s" => {
                let value = flag_value(args, i, "--seed")?;
                let seed = match value.strip_prefix("0x") {
                    Some(hex) => u64::from_str_radix(hex, 16),
                    None => value.parse(),
                }
                .with_context(|| format!("Invalid seed: {}", value))?;
                options.seed = Some(seed);
                i += 2;
            }
            "--config" | "-c" => {
                options.config = Some(PathBuf::from(flag_value(args, i, "--config")?));
                i += 2;
            }
            "--save" => {
                options.save = Some(PathBuf::from(flag_value(args, i, "--save")?));
                i += 2;
            }
            "--load" => {
                options.load = Some(PathBuf::from(flag_value(args, i, "--load")?));
                i += 2;
            }
            "--run-ahead" => {
                options.run_ahead = true;
                i += 1;
            }
            "--verify" => {
                options.verify = true;
                i += 1;
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            other => bail!("Unknown argument: {}", other),
        }
    }

    Ok(options)
}

fn flag_value<'a>(args: &'a [String], i: usize, flag: &str) -> Result<&'a str> {
    args.get(i + 1)
        .map(String::as_str)
        .with_context(|| format!("Missing value for {}", flag))
}

fn print_usage() {
    println!("lockstep {}", lockstep_core::VERSION);
    println!();
    println!("USAGE: lockstep [OPTIONS]");
    println!();
    println!("  -n, --frames N     frames to run (default 120)");
    println!("  -s, --seed S       power-on seed, decimal or 0x-prefixed hex");
    println!("      --run-ahead    hide one frame of latency");
    println!("  -c, --config PATH  configuration file");
    println!("      --save PATH    write a snapshot after the last frame");
    println!("      --load PATH    resume from a snapshot before the first frame");
    println!("      --verify       run twice and compare snapshots frame by frame");
}

// ============================================================================
// Helpers
// ============================================================================

fn digest<T: Hash + ?Sized>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

/// Scripted input: a slow walk through every button combination
fn scripted_input(frame: u64) -> ButtonState {
    ButtonState::from_byte((frame / 8 % 256) as u8)
}

fn load_config(options: &PlayerOptions) -> Result<CoreConfig> {
    let path = options.config.clone().unwrap_or_else(default_config_path);
    let mut config = CoreConfig::load(&path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;

    if options.seed.is_some() {
        config.seed = options.seed;
    }
    if options.run_ahead {
        config.run_ahead = true;
    }
    // Pin the seed so both verify passes and saved states agree
    config.seed = Some(config.resolve_seed());
    if config.description.is_empty() {
        config.description = format!("lockstep {}", lockstep_core::VERSION);
    }
    Ok(config)
}

fn load_snapshot(session: &mut Session, path: &Path) -> Result<()> {
    let blob = std::fs::read(path)
        .with_context(|| format!("Failed to read snapshot {}", path.display()))?;
    session
        .system_mut()
        .unserialize(&blob)
        .with_context(|| format!("Failed to load snapshot {}", path.display()))?;
    tracing::info!("Resumed from {} at frame {}", path.display(), session.frame_count());
    Ok(())
}

// ============================================================================
// Runs
// ============================================================================

struct RunStats {
    frames: u64,
    presented: u64,
    samples: usize,
    digests: Vec<u64>,
}

/// Run `options.frames` frames and record a state digest after each one.
fn run(config: &CoreConfig, options: &PlayerOptions, save: Option<&Path>) -> Result<RunStats> {
    let (system, machine) =
        Machine::boot(config.clone(), MachineConfig::default()).context("Failed to boot machine")?;

    let queue = Arc::new(FrameQueue::new(config.presentation_depth));
    machine.screen().attach(Arc::clone(&queue));
    let presenter = Presenter::spawn(queue, |frame| {
        tracing::trace!(frame = frame.number, pixels = %format!("{:016x}", digest(&frame.pixels)), "presented");
    })
    .context("Failed to start presenter")?;

    let mut session = Session::new(system);
    if let Some(path) = &options.load {
        load_snapshot(&mut session, path)?;
    }

    let mut digests = Vec::with_capacity(options.frames as usize);
    let mut samples = 0;
    for _ in 0..options.frames {
        machine.set_input(scripted_input(session.frame_count()));
        session.run_frame().context("Frame failed")?;
        samples += machine.stream().drain().len();

        let state = session
            .system_mut()
            .serialize(true)
            .context("Failed to snapshot")?;
        let state_digest = digest(&state);
        tracing::debug!(
            frame = session.frame_count(),
            state = %format!("{:016x}", state_digest),
            "frame complete"
        );
        digests.push(state_digest);
    }

    if let Some(path) = save {
        let blob = session.system_mut().serialize(true).context("Failed to snapshot")?;
        std::fs::write(path, &blob)
            .with_context(|| format!("Failed to write snapshot {}", path.display()))?;
        tracing::info!("Saved {} bytes to {}", blob.len(), path.display());
    }

    machine.screen().detach();
    let presented = presenter.finish();

    Ok(RunStats {
        frames: session.frame_count(),
        presented,
        samples,
        digests,
    })
}

fn verify(config: &CoreConfig, options: &PlayerOptions) -> Result<()> {
    let first = run(config, options, None)?;
    let second = run(config, options, options.save.as_deref())?;

    if let Some(frame) = first
        .digests
        .iter()
        .zip(&second.digests)
        .position(|(a, b)| a != b)
    {
        bail!("Runs diverged after frame {}", frame + 1);
    }

    tracing::info!(
        "Verified {} frames: final state {:016x}",
        first.digests.len(),
        first.digests.last().copied().unwrap_or(0)
    );
    Ok(())
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let options = parse_args(&args)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("lockstep=info")),
        )
        .init();

    tracing::info!("Lockstep Player v{}", lockstep_core::VERSION);

    let config = load_config(&options)?;
    tracing::info!(
        "Seed {:#x}, run-ahead {}, {} frames",
        config.seed.unwrap_or(0),
        config.run_ahead,
        options.frames
    );

    if options.verify {
        return verify(&config, &options);
    }

    let started = Instant::now();
    let stats = run(&config, &options, options.save.as_deref())?;
    let elapsed = started.elapsed();

    tracing::info!(
        "Ran to frame {} in {:.2?} ({:.1} fps): presented={}, samples={}, final state {:016x}",
        stats.frames,
        elapsed,
        stats.digests.len() as f64 / elapsed.as_secs_f64().max(f64::EPSILON),
        stats.presented,
        stats.samples,
        stats.digests.last().copied().unwrap_or(0)
    );

    Ok(())
}
