//! pfnn-runtime: phase-functioned locomotion runtime and annotation tool.
//!
//! `run` drives a character from scripted controls at a fixed tick rate,
//! `annotate` fits phase keys to a captured clip and writes an annotation,
//! `benchmark` measures network latency.
//!
//! Usage:
//!   pfnn-runtime run --model ./weights [OPTIONS]
//!   pfnn-runtime annotate --clip walk.json --joints LeftFoot,RightFoot [OPTIONS]
//!   pfnn-runtime benchmark --model policy.onnx

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use nalgebra::{Point3, Vector2, Vector3};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use pfnn_runtime::annotation::PhaseAnnotation;
use pfnn_runtime::bridge::{InferenceBridge, Pose, SkeletonBinder};
use pfnn_runtime::clip::Clip;
use pfnn_runtime::controls::ScriptedControls;
use pfnn_runtime::evolution::worker::OptimizerWorker;
use pfnn_runtime::evolution::PhaseEvolution;
use pfnn_runtime::inference::{self, OnnxNetwork};
use pfnn_runtime::network::{MotionNetwork, NetworkLayout};
use pfnn_runtime::pfnn::PhaseFunctionedNetwork;
use pfnn_runtime::phase::{PhasePair, Side};
use pfnn_runtime::style::StyleFunction;
use pfnn_runtime::world::FlatGround;
use pfnn_runtime::MotionConfig;

/// Phase-functioned locomotion runtime.
#[derive(Parser, Debug)]
#[command(name = "pfnn-runtime")]
#[command(about = "Phase-functioned locomotion runtime and phase annotation tool")]
struct Args {
    /// Path to the motion configuration JSON file.
    #[arg(long, global = true, default_value = "~/pfnn_config.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Drive the character with scripted controls.
    Run {
        /// Weight directory (native network) or `.onnx` file.
        #[arg(long)]
        model: PathBuf,

        /// Hidden layer width of the native network.
        #[arg(long, default_value_t = 512)]
        hidden: usize,

        /// JSON control script; walks forward when not set.
        #[arg(long)]
        controls: Option<PathBuf>,

        /// Tick frequency in Hz.
        #[arg(short = 'f', long, default_value_t = 60)]
        frequency: u32,

        /// Stop after this many ticks (runs until the script ends otherwise).
        #[arg(long)]
        ticks: Option<usize>,
    },

    /// Fit phase keys to a clip and save the annotation.
    Annotate {
        /// Clip JSON file.
        #[arg(long)]
        clip: PathBuf,

        /// Joints whose motion drives the phase (regular side).
        #[arg(long, value_delimiter = ',', required = true)]
        joints: Vec<String>,

        /// Output path; defaults to `<clip>.annotation.json`.
        #[arg(long)]
        output: Option<PathBuf>,

        /// Generations per side.
        #[arg(short = 'g', long, default_value_t = 1000)]
        generations: usize,

        /// Evolve on a background worker for this many seconds per side instead.
        #[arg(long)]
        seconds: Option<f64>,
    },

    /// Measure network inference latency.
    Benchmark {
        #[arg(long)]
        model: PathBuf,

        #[arg(long, default_value_t = 512)]
        hidden: usize,

        #[arg(short = 'n', long, default_value_t = 1000)]
        iterations: usize,
    },
}

fn main() -> Result<()> {
    // Initialize structured JSON logging
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    // Expand ~ in config path
    let config_path = expand_home(&args.config);
    tracing::info!("Config: {}", config_path.display());
    let config = MotionConfig::load(&config_path).context("Failed to load motion config")?;

    match args.command {
        Command::Run {
            model,
            hidden,
            controls,
            frequency,
            ticks,
        } => run(&config, &expand_home(&model), hidden, controls.as_deref(), frequency, ticks),
        Command::Annotate {
            clip,
            joints,
            output,
            generations,
            seconds,
        } => {
            let clip_path = expand_home(&clip);
            let output = output
                .map(|p| expand_home(&p))
                .unwrap_or_else(|| clip_path.with_extension("annotation.json"));
            annotate(&config, &clip_path, &joints, &output, generations, seconds)
        }
        Command::Benchmark {
            model,
            hidden,
            iterations,
        } => {
            let layout = NetworkLayout::new(&config.trajectory, &config.network);
            let mut network = load_network(&expand_home(&model), &layout, hidden)?;
            inference::benchmark(network.as_mut(), iterations)?;
            Ok(())
        }
    }
}

/// Load a native network from a weight directory or an ONNX model file.
fn load_network(
    path: &Path,
    layout: &NetworkLayout,
    hidden: usize,
) -> Result<Box<dyn MotionNetwork + Send>> {
    if path.is_dir() {
        let network = PhaseFunctionedNetwork::load(path, layout.input_size(), layout.output_size(), hidden)
            .context("Failed to load phase-functioned network")?;
        Ok(Box::new(network))
    } else if path.extension().is_some_and(|e| e == "onnx") {
        let network = OnnxNetwork::load(path, layout.input_size(), layout.output_size())
            .context("Failed to load ONNX network")?;
        Ok(Box::new(network))
    } else {
        bail!(
            "{} is neither a weight directory nor an .onnx model",
            path.display()
        )
    }
}

/// Logs the pose once per second of simulated time.
struct LogBinder {
    ticks: usize,
    every: usize,
}

impl SkeletonBinder for LogBinder {
    fn apply(&mut self, pose: &Pose) {
        self.ticks += 1;
        if self.ticks % self.every == 0 {
            let root = pose.root.translation.vector;
            tracing::info!(
                "Tick {}: root ({:.3}, {:.3}, {:.3}), phase {:.3}, contacts {:?}",
                self.ticks,
                root.x,
                root.y,
                root.z,
                pose.phase,
                pose.contacts
            );
        }
    }
}

fn run(
    config: &MotionConfig,
    model: &Path,
    hidden: usize,
    controls_path: Option<&Path>,
    frequency: u32,
    ticks: Option<usize>,
) -> Result<()> {
    let world = FlatGround::default();
    let mut bridge = InferenceBridge::new(config, Point3::origin(), Vector3::z(), &world)
        .context("Failed to set up the inference bridge")?;
    let network = load_network(model, bridge.layout(), hidden)?;
    bridge.attach(network).context("Network does not match the configured layout")?;

    let mut controls = match controls_path {
        Some(path) => ScriptedControls::load(&expand_home(&path.to_path_buf()))?,
        None => {
            let mut styles = vec![0.0; config.trajectory.style_count()];
            if let Some(walk) = styles.get_mut(1) {
                *walk = 1.0;
            }
            ScriptedControls::constant(0.0, Vector2::new(0.0, 1.0), styles)
        }
    };

    let frequency = frequency.max(1);
    let period = Duration::from_secs_f64(1.0 / frequency as f64);
    let mut binder = LogBinder {
        ticks: 0,
        every: frequency as usize,
    };

    tracing::info!("Entering tick loop at {} Hz", frequency);

    // ── Main tick loop ──

    let mut tick = 0usize;
    loop {
        if ticks.is_some_and(|limit| tick >= limit) || (ticks.is_none() && controls.finished()) {
            break;
        }
        let tick_start = Instant::now();

        if let Err(e) = bridge.tick(&controls, &world, &mut binder) {
            tracing::error!("Tick failed: {:#}", e);
        }
        controls.advance(period.as_secs_f64());
        tick += 1;

        // ── Timing ──

        let took = tick_start.elapsed();
        if took > period {
            tracing::warn!(
                "Tick budget exceeded by {:.1}ms",
                (took - period).as_secs_f64() * 1000.0
            );
        } else {
            spin_sleep::sleep(period - took);
        }
    }

    tracing::info!("Stopped after {} ticks", tick);
    Ok(())
}

fn annotate(
    config: &MotionConfig,
    clip_path: &Path,
    joints: &[String],
    output: &Path,
    generations: usize,
    seconds: Option<f64>,
) -> Result<()> {
    let clip = Clip::load(clip_path)?;
    let mut pair = PhasePair::new(&clip, &config.annotation);
    for name in joints {
        let joint = clip
            .joint_index(name)
            .with_context(|| format!("Clip has no joint named {name}"))?;
        pair.toggle_variable(Side::Regular, joint)?;
    }
    pair.compute_values(&clip, &FlatGround::default())?;

    let mut windows = Vec::new();
    for side in [Side::Regular, Side::Mirrored] {
        let mut evolution = PhaseEvolution::for_pair(&pair, side, &config.evolution)?;
        match seconds {
            Some(seconds) => {
                let mut worker = OptimizerWorker::spawn(evolution, Duration::ZERO);
                let deadline = Instant::now() + Duration::from_secs_f64(seconds.max(0.0));
                while Instant::now() < deadline {
                    std::thread::sleep(Duration::from_millis(500));
                    if let Some(snapshot) = worker.latest() {
                        tracing::info!(
                            "{:?}: generation {}, fitness {:.6}",
                            side,
                            snapshot.generation,
                            snapshot.fitness
                        );
                    }
                }
                evolution = worker.finish()?;
            }
            None => {
                for _ in 0..generations {
                    evolution.step();
                }
            }
        }
        tracing::info!(
            "{:?}: {} generations, fitness {:.6}",
            side,
            evolution.generation(),
            evolution.fitness()
        );
        evolution.assign(&mut pair, side)?;
        windows = evolution.intervals();
    }

    let styles = StyleFunction::new(
        &config.trajectory.styles,
        clip.frame_count(),
        clip.frame_time(),
        config.annotation.style_transition,
    );
    let name = clip_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    PhaseAnnotation::capture(&name, &pair, &styles, windows).save(output)
}

/// Expand `~` at the start of a path to the user's home directory.
fn expand_home(path: &PathBuf) -> PathBuf {
    if let Some(s) = path.to_str() {
        if s.starts_with("~/") {
            if let Ok(home) = std::env::var("HOME") {
                return PathBuf::from(format!("{}{}", home, &s[1..]));
            }
        }
    }
    path.clone()
}
