//! hackview: record and browse random-agent NetHack trajectories.
//!
//! Provides subcommands:
//!
//! - `serve`    -- Run the web viewer and its JSON API
//! - `generate` -- Generate one trajectory and save it to a JSON file
//! - `inspect`  -- Summarise a saved trajectory file
//! - `probe`    -- Check which NetHack environments can be created

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing_subscriber::EnvFilter;

use hackview::config::HackviewConfig;
use hackview::env::{EnvRegistry, Environment, KNOWN_ENV_IDS};
use hackview::server::{self, AppState};
use hackview::store::{self, TrajectoryStore};
use hackview::trajectory::{Trajectory, TrajectoryGenerator};

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

/// hackview: record and browse random-agent NetHack trajectories
#[derive(Parser)]
#[command(name = "hackview", version, about)]
struct Cli {
    /// Path to a JSON configuration file (uses defaults if not provided).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Use the scripted mock dungeon instead of the NLE bridge.
    #[arg(long, global = true)]
    mock: bool,

    /// Environment id to use when a request does not name one.
    #[arg(long, global = true)]
    env: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the trajectory viewer.
    Serve {
        #[arg(long)]
        host: Option<String>,

        #[arg(long)]
        port: Option<u16>,
    },

    /// Generate a trajectory and save it as JSON.
    Generate {
        #[arg(long, default_value_t = 50)]
        steps: usize,

        #[arg(long, default_value_t = 42)]
        seed: u64,

        /// Path to save the trajectory.
        #[arg(long, default_value = "game_trajectory.json")]
        output: PathBuf,
    },

    /// Inspect a saved trajectory file.
    Inspect {
        #[arg(default_value = "game_trajectory.json")]
        path: PathBuf,
    },

    /// Try every known environment id: create, reset, take one random step.
    Probe,
}

// ---------------------------------------------------------------------------
// Entrypoint
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise tracing (reads RUST_LOG env var, defaults to info).
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            serde_json::from_str::<HackviewConfig>(&text)
                .with_context(|| format!("Failed to parse config from {}", path.display()))?
        }
        None => HackviewConfig::default(),
    };

    if let Ok(url) = std::env::var("HACKVIEW_BRIDGE_URL") {
        config.env.bridge_url = url;
    }
    if cli.mock {
        config.env.mock = true;
    }
    if let Some(env_id) = cli.env {
        config.env.default_env_id = env_id;
    }

    match cli.command {
        Commands::Serve { host, port } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            cmd_serve(config).await
        }
        Commands::Generate {
            steps,
            seed,
            output,
        } => cmd_generate(&config, steps, seed, &output).await,
        Commands::Inspect { path } => cmd_inspect(&path),
        Commands::Probe => cmd_probe(&config).await,
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

fn build_generator(config: &HackviewConfig) -> TrajectoryGenerator {
    if config.env.mock {
        tracing::info!("Using mock NetHack environments");
    } else {
        tracing::info!(bridge = %config.env.bridge_url, "Using NLE bridge environments");
    }
    TrajectoryGenerator::new(EnvRegistry::from_settings(&config.env))
        .strict_replay(config.generation.strict_replay)
}

async fn cmd_serve(config: HackviewConfig) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server host/port")?;

    let generator = build_generator(&config);
    let store = TrajectoryStore::new();

    if let Err(err) = store::bootstrap_default(
        &store,
        &generator,
        &config.storage.default_trajectory_path,
        &config.env.default_env_id,
        config.storage.bootstrap_steps,
        config.storage.bootstrap_seed,
    )
    .await
    {
        tracing::warn!(error = %format!("{err:#}"), "Starting without a default trajectory");
    }
    tracing::info!(trajectories = ?store.ids().await, "Available trajectories");

    let state = AppState::new(store, generator, config);
    server::serve(addr, state).await
}

async fn cmd_generate(
    config: &HackviewConfig,
    steps: usize,
    seed: u64,
    output: &PathBuf,
) -> Result<()> {
    tracing::info!(steps, seed, "Generating NetHack trajectory");

    let generator = build_generator(config);
    let trajectory = generator
        .generate(&config.env.default_env_id, steps, Some(seed))
        .await?;

    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    trajectory.save_to_file(output)?;

    println!("Generated {} steps", trajectory.len());
    println!("Trajectory saved to: {}", output.display());
    println!();
    println!("First few steps:");
    for record in trajectory.steps().iter().take(3) {
        println!();
        println!("Step {}:", record.step);
        println!("  Action: {}", record.action);
        println!("  Reward: {}", record.reward);
        println!("  Message: {}", store::preview(&record.observation.message));
        println!("  Screen (first 3 lines):");
        for line in record.observation.screen_text.iter().take(3) {
            println!("    {}", store::preview(line));
        }
    }

    Ok(())
}

fn cmd_inspect(path: &PathBuf) -> Result<()> {
    let trajectory = Trajectory::load_from_file(path)?;

    println!("Trajectory: {}", path.display());
    println!("  Steps: {}", trajectory.len());
    println!("  Total reward: {}", trajectory.total_reward());
    println!("  Episode ended: {}", trajectory.ended());

    if let (Some(first), Some(last)) = (trajectory.steps().first(), trajectory.last()) {
        println!("  Turns: {} -> {}", first.observation.turn, last.observation.turn);
    }
    if let Some(branch) = trajectory.steps().iter().find_map(|s| s.branch_from_step) {
        println!("  Branched from step: {branch}");
    }
    println!();

    let messages: Vec<_> = trajectory
        .steps()
        .iter()
        .filter(|s| !s.observation.message.is_empty())
        .collect();
    println!("Messages ({}):", messages.len());
    for record in messages.iter().take(10) {
        println!("  [{}] {}", record.step, record.observation.message);
    }
    if messages.len() > 10 {
        println!("  ... and {} more", messages.len() - 10);
    }

    Ok(())
}

async fn cmd_probe(config: &HackviewConfig) -> Result<()> {
    let registry = EnvRegistry::from_settings(&config.env);
    let mut rng = StdRng::from_entropy();
    let mut working = Vec::new();

    println!("Known NetHack environments:");
    for &env_id in KNOWN_ENV_IDS {
        let outcome = async {
            let mut env = registry.make(env_id).await?;
            let result = async {
                env.reset(None).await?;
                let action = env.sample_action(&mut rng);
                let step = env.step(action).await?;
                Ok::<_, anyhow::Error>((env.action_space().n, step.reward))
            }
            .await;
            env.close().await?;
            result
        }
        .await;

        match outcome {
            Ok((actions, reward)) => {
                println!("  ok   {env_id} ({actions} actions, first reward {reward})");
                working.push(env_id);
            }
            Err(err) => println!("  fail {env_id}: {err:#}"),
        }
    }

    println!();
    println!("{} of {} environments work", working.len(), KNOWN_ENV_IDS.len());
    Ok(())
}
