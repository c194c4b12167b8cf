use clap::{Parser, Subcommand};
use engine::{
    Connector, ConnectorClient, EngineConfig, MemoryCatalog, MemoryRunStore, Persona, Run,
    RunProcessor, RunStatus, ScenarioRunner,
};
use model::{ChatProvider, CriteriaJudge, OpenAiCompatProvider};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "parley")]
#[command(about = "Simulate and evaluate conversations against AI agents")]
struct Cli {
    /// Path to a TOML config file (defaults + env overrides when omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enqueue runs for a scenario and process them to completion
    Run {
        /// Scenario definition file (JSON)
        #[arg(long)]
        scenario: PathBuf,
        /// Connector definition file (JSON)
        #[arg(long)]
        connector: PathBuf,
        /// Persona definition file (JSON)
        #[arg(long)]
        persona: Option<PathBuf>,
        /// Number of runs to enqueue
        #[arg(long, default_value = "1")]
        count: usize,
    },
    /// Poll for queued runs continuously until Ctrl-C
    Watch {
        #[arg(long)]
        scenario: PathBuf,
        #[arg(long)]
        connector: PathBuf,
        #[arg(long)]
        persona: Option<PathBuf>,
    },
    /// Probe a connector's endpoint
    TestConnector {
        #[arg(long)]
        connector: PathBuf,
    },
    /// Check that the configured LLM endpoint is reachable
    Health,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => EngineConfig::from_toml_file(path)?,
        None => EngineConfig::from_env(),
    };
    config.validate()?;

    match cli.command {
        Commands::Run {
            scenario,
            connector,
            persona,
            count,
        } => {
            run_batch(&config, &scenario, &connector, persona.as_deref(), count).await?;
        }
        Commands::Watch {
            scenario,
            connector,
            persona,
        } => {
            watch(&config, &scenario, &connector, persona.as_deref()).await?;
        }
        Commands::TestConnector { connector } => {
            test_connector(&connector).await?;
        }
        Commands::Health => {
            health_check(&config).await?;
        }
    }

    Ok(())
}

fn load_json<T: serde::de::DeserializeOwned>(
    path: &Path,
) -> Result<T, Box<dyn std::error::Error>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    let value = serde_json::from_str(&text)
        .map_err(|e| format!("failed to parse {}: {}", path.display(), e))?;
    Ok(value)
}

struct LoadedDefinitions {
    scenario_id: String,
    persona_id: Option<String>,
    connector_id: String,
    catalog: Arc<MemoryCatalog>,
}

async fn load_definitions(
    scenario_path: &Path,
    connector_path: &Path,
    persona_path: Option<&Path>,
) -> Result<LoadedDefinitions, Box<dyn std::error::Error>> {
    let scenario: engine::Scenario = load_json(scenario_path)?;
    let connector: Connector = load_json(connector_path)?;
    let persona: Option<Persona> = persona_path.map(load_json).transpose()?;

    let catalog = Arc::new(MemoryCatalog::new());
    let scenario_id = scenario.id.clone();
    let connector_id = connector.id.clone();
    let persona_id = persona.as_ref().map(|p| p.id.clone());

    catalog.add_scenario(scenario).await;
    catalog.add_connector(connector).await;
    if let Some(persona) = persona {
        catalog.add_persona(persona).await;
    }

    Ok(LoadedDefinitions {
        scenario_id,
        persona_id,
        connector_id,
        catalog,
    })
}

fn build_runner(config: &EngineConfig) -> Result<ScenarioRunner, Box<dyn std::error::Error>> {
    let provider: Arc<dyn ChatProvider> =
        Arc::new(OpenAiCompatProvider::new(config.llm.clone())?);
    let backend = Arc::new(ConnectorClient::with_default_timeout()?);
    let simulator = engine::PersonaSimulator::new(provider.clone(), &config.llm.model);
    let judge = CriteriaJudge::new(provider, &config.llm.model);
    Ok(ScenarioRunner::new(backend, simulator, judge))
}

fn build_processor(
    config: &EngineConfig,
    store: Arc<MemoryRunStore>,
    defs: &LoadedDefinitions,
) -> Result<RunProcessor, Box<dyn std::error::Error>> {
    let runner = Arc::new(build_runner(config)?);
    Ok(RunProcessor::builder(store, defs.catalog.clone(), runner)
        .max_concurrent(config.processor.max_concurrent)
        .poll_interval(config.processor.poll_interval())
        .build())
}

async fn enqueue_runs(
    store: &MemoryRunStore,
    defs: &LoadedDefinitions,
    count: usize,
) -> Result<Vec<Uuid>, Box<dyn std::error::Error>> {
    use engine::RunStore;

    let execution_id = Uuid::new_v4().to_string();
    let mut ids = Vec::with_capacity(count);
    for _ in 0..count {
        let run = Run::new(
            defs.scenario_id.clone(),
            defs.persona_id.clone(),
            Some(defs.connector_id.clone()),
        )
        .with_execution_id(execution_id.clone());
        ids.push(store.enqueue(run).await?);
    }
    info!(execution_id = %execution_id, count, "Runs enqueued");
    Ok(ids)
}

async fn run_batch(
    config: &EngineConfig,
    scenario_path: &Path,
    connector_path: &Path,
    persona_path: Option<&Path>,
    count: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    use engine::RunStore;

    let defs = load_definitions(scenario_path, connector_path, persona_path).await?;
    let store = Arc::new(MemoryRunStore::new());
    let processor = build_processor(config, store.clone(), &defs)?;

    let ids = enqueue_runs(&store, &defs, count).await?;

    // Keep claiming until the queue drains; each pass is bounded by
    // max_concurrent.
    loop {
        let executed = processor.process_once().await?;
        if executed == 0 {
            break;
        }
    }

    let mut passed = 0usize;
    let mut failed = 0usize;
    let mut errored = 0usize;
    for id in &ids {
        if let Some(run) = store.get(*id).await? {
            print_run(&run);
            match run.status {
                RunStatus::Completed if run.result.as_ref().is_some_and(|r| r.success) => {
                    passed += 1
                }
                RunStatus::Completed => failed += 1,
                _ => errored += 1,
            }
        }
    }
    println!(
        "\n{} passed, {} failed, {} errored ({} total)",
        passed,
        failed,
        errored,
        ids.len()
    );

    Ok(())
}

fn print_run(run: &Run) {
    println!("run {} [{}]", run.id, run.status);
    println!(
        "  messages: {}, avg latency: {:.0}ms",
        run.output.message_count, run.output.avg_latency_ms
    );
    if let Some(result) = &run.result {
        println!(
            "  result: {}{}",
            if result.success { "success" } else { "failure" },
            result
                .reason
                .as_deref()
                .map(|r| format!(" ({})", r))
                .unwrap_or_default()
        );
    }
    if let Some(error) = &run.error {
        println!("  error: {}", error);
    }
    for entry in &run.output.evaluator_results {
        let detail = match (entry.success, entry.value) {
            (Some(success), _) => format!("{}", if success { "pass" } else { "fail" }),
            (None, Some(value)) => format!("{}", value),
            (None, None) => "-".to_string(),
        };
        println!("  {}: {}", entry.label, detail);
    }
}

async fn watch(
    config: &EngineConfig,
    scenario_path: &Path,
    connector_path: &Path,
    persona_path: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let defs = load_definitions(scenario_path, connector_path, persona_path).await?;
    let store = Arc::new(MemoryRunStore::new());
    let processor = build_processor(config, store.clone(), &defs)?;

    enqueue_runs(&store, &defs, 1).await?;

    processor.start().await;
    info!("Watching for queued runs; press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    info!("Stopping (in-flight runs will finish)");
    processor.stop().await;

    use engine::RunStore;
    for run in store.list().await? {
        print_run(&run);
    }

    Ok(())
}

async fn test_connector(connector_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    use engine::AgentBackend;

    let connector: Connector = load_json(connector_path)?;
    let client = ConnectorClient::with_default_timeout()?;

    match client.test(&connector).await {
        Ok(()) => {
            println!("connector {} is reachable", connector.id);
            Ok(())
        }
        Err(e) => {
            error!("Connector test failed: {}", e);
            Err(e.into())
        }
    }
}

async fn health_check(config: &EngineConfig) -> Result<(), Box<dyn std::error::Error>> {
    let provider = OpenAiCompatProvider::new(config.llm.clone())?;
    match provider.health_check().await {
        Ok(()) => {
            println!("LLM endpoint {} is healthy", config.llm.base_url);
            Ok(())
        }
        Err(e) => {
            error!("Health check failed: {}", e);
            Err(e.into())
        }
    }
}
