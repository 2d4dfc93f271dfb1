use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::{signal, sync::broadcast::error::RecvError};
use tracing::info;
use tracing_subscriber::EnvFilter;

use popclock::{
    clock::SystemClock,
    engine::{Engine, EngineEvent},
    records::RecordSource,
    scenario::ScenarioLoader,
    scheduler,
};

#[derive(Debug, Parser)]
#[command(author, version, about = "Live stochastic population clock")]
struct Cli {
    /// Path to the scenario YAML file
    #[arg(long, default_value = "scenarios/world_sample.yaml")]
    scenario: PathBuf,

    /// Override the RNG seed (uses the scenario seed when omitted)
    #[arg(long)]
    seed: Option<u64>,

    /// Override the tick cadence in milliseconds
    #[arg(long)]
    cadence_ms: Option<u64>,

    /// Stop after this many ticks (runs until ctrl-c when omitted)
    #[arg(long)]
    ticks: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let cli = Cli::parse();
    let loader = ScenarioLoader::new(".");
    let scenario = loader.load(&cli.scenario)?;
    let seed = cli.seed.unwrap_or(scenario.seed);
    let cadence = Duration::from_millis(cli.cadence_ms.unwrap_or(scenario.tick_cadence_ms));

    let mut engine = Engine::new(seed, SystemClock);
    engine.reset(&scenario.ordered_records())?;
    let mut events = engine.subscribe();
    info!(
        scenario = %scenario.name,
        population = engine.total_population(),
        countries = engine.countries().len(),
        "simulation started"
    );

    let handle = scheduler::spawn(engine, cadence);

    let mut completed = 0u64;
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(EngineEvent::Step(outcome)) => {
                    completed += 1;
                    info!(
                        tick = completed,
                        births = outcome.births.len(),
                        deaths = outcome.deaths.len(),
                        "tick"
                    );
                    if Some(completed) == cli.ticks {
                        break;
                    }
                }
                Ok(EngineEvent::Reset) => info!("engine reset"),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            },
            _ = signal::ctrl_c() => break,
        }
    }

    let engine = handle.shutdown().await?;
    println!(
        "Scenario '{}' finished after {} ticks. Population: {}",
        scenario.name,
        completed,
        engine.total_population()
    );
    Ok(())
}
