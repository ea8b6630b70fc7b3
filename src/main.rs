// src/main.rs - Command line entry point: play a song on a GRBL machine or the simulator
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use cnc_melody::config::{load_config, Config};
use cnc_melody::machine::{check_axes, plan_song, GrblMachine, Machine, SimulatedMachine};
use cnc_melody::motion::MotionPlanner;
use cnc_melody::scheduler::IntervalScheduler;
use cnc_melody::song::{load_song, scale_tempo};
use cnc_melody::SerialPortOpener;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Parser)]
#[command(name = "cnc-melody", version, about = "Play songs on a CNC machine by moving its steppers")]
struct Cli {
    /// More output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Play a song
    Play {
        /// Machine configuration (TOML); built-in defaults when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Song file (JSON list of notes)
        #[arg(short, long)]
        song: PathBuf,
        /// Run against the in-process simulator instead of the serial port
        #[arg(long)]
        simulate: bool,
        /// Tempo multiplier; 2.0 plays twice as fast
        #[arg(long, default_value_t = 1.0)]
        speed: f64,
        /// Serial port, overrides the configuration
        #[arg(short, long)]
        port: Option<String>,
    },
    /// List serial ports
    Ports,
    /// Validate a configuration and, optionally, a song against it
    Check {
        #[arg(short, long)]
        config: Option<PathBuf>,
        #[arg(short, long)]
        song: Option<PathBuf>,
    },
}

fn read_config(path: Option<&Path>) -> Result<Config, BoxError> {
    match path {
        Some(path) => {
            tracing::info!("Loading configuration from: {}", path.display());
            Ok(load_config(path)?)
        }
        None => {
            tracing::info!("No configuration given, using defaults");
            Ok(Config::default())
        }
    }
}

async fn play(machine: &mut dyn Machine, config: &Config, notes: &[cnc_melody::NoteInterval]) -> Result<(), BoxError> {
    let cancel = machine.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, stopping playback");
            cancel.cancel();
        }
    });

    let result = async {
        machine.connect().await?;
        machine.initialize(&config.init).await?;
        machine.play_notes(notes).await
    }
    .await;
    machine.disconnect().await;

    let report = result?;
    if report.cancelled {
        tracing::warn!("Playback cancelled after {} slices", report.slices_played);
    }
    tracing::info!(
        "{}: {} slices, {} commands, {} clamped notes, {} controller errors",
        machine.name(),
        report.slices_played,
        report.commands_emitted,
        report.clamped_notes,
        report.transport.errors
    );
    for (axis, position) in &report.final_positions {
        tracing::info!("Axis {} ended at {:.3} mm", axis, position);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    match cli.command {
        Command::Play {
            config,
            song,
            simulate,
            speed,
            port,
        } => {
            let mut config = read_config(config.as_deref())?;
            if let Some(port) = port {
                config.serial.port = port;
            }
            let mut notes = load_song(&song)?;
            scale_tempo(&mut notes, speed)?;
            tracing::info!("Loaded {} notes from {}", notes.len(), song.display());

            if simulate {
                let mut machine = SimulatedMachine::new(config.clone());
                play(&mut machine, &config, &notes).await
            } else {
                let mut machine = GrblMachine::new(config.clone());
                play(&mut machine, &config, &notes).await
            }
        }
        Command::Ports => {
            let ports = SerialPortOpener.available_ports()?;
            if ports.is_empty() {
                tracing::warn!("No serial ports found");
            }
            for port in ports {
                println!("{}", port);
            }
            Ok(())
        }
        Command::Check { config, song } => {
            let config = read_config(config.as_deref())?;
            tracing::info!(
                "Configuration OK: {} axes, max feed rate {} mm/min",
                config.axes.len(),
                config.motion.max_feed_rate
            );
            if let Some(song) = song {
                let notes = load_song(&song)?;
                check_axes(&notes, &config.axes)?;
                let scheduler = IntervalScheduler::new(notes);
                let planner = MotionPlanner::new(
                    config.motion.mm_per_step,
                    config.motion.max_feed_rate,
                    config.planning_acceleration(),
                );
                let mut axes = config.axis_states();
                let plans = plan_song(&scheduler, &planner, &mut axes);
                let commands = plans.iter().filter(|(_, plan)| plan.command().is_some()).count();
                let clamped: usize = plans.iter().map(|(_, plan)| plan.clamped_notes).sum();
                tracing::info!(
                    "Song OK: {} notes, {} slices, {} commands, {} clamped notes, {:.2}s",
                    scheduler.notes().len(),
                    plans.len(),
                    commands,
                    clamped,
                    scheduler.song_length()
                );
            }
            Ok(())
        }
    }
}
