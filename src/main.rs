//! Tutor router service - main entry point

use clap::{Parser, Subcommand};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tutor_router::config::TutorConfig;
use tutor_router::handlers::{
    ChatModel, ChunkSink, HandlerRegistry, ImageHandler, RagHandler, SimpleAnswerHandler,
    TurnEvent, WebSearchHandler,
};
use tutor_router::imaging::HttpImageGenerator;
use tutor_router::llm::provider::LlmProvider;
use tutor_router::llm::providers::{OpenAiConfig, OpenAiProvider};
use tutor_router::llm::{OpenAiEmbedder, OpenAiEmbedderConfig};
use tutor_router::observability::{init_default_logging, metrics, HealthServer};
use tutor_router::orchestrator::Orchestrator;
use tutor_router::retrieval::{QdrantConfig, QdrantStore, Retriever, TtlSweeper, VectorStore};
use tutor_router::routing::LlmPlanner;
use tutor_router::search::{SerperConfig, SerperSearch};
use tutor_router::session::{HistoryCompactor, LearnerProfile, TurnInput, TurnState};

type AppResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Turn routing service for teacher and student AI tutors
#[derive(Parser)]
#[command(name = "tutor-router")]
#[command(about = "Turn routing core for AI tutors")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve health endpoints and run the TTL sweep until SIGINT/SIGTERM
    Run,
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Run a single TTL sweep pass
    Sweep,
    /// Process one turn and stream the answer to stdout
    Ask {
        #[arg(long)]
        session: String,
        #[arg(long)]
        message: String,
        /// JSON file holding the session state between invocations
        #[arg(long, value_name = "FILE")]
        state: Option<PathBuf>,
        #[arg(long)]
        websearch: bool,
        #[arg(long, default_value = "")]
        grade: String,
        #[arg(long, default_value = "")]
        subject: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_default_logging();

    let config = match load_configuration(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_service(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
        Commands::Sweep => run_single_sweep(&config).await,
        Commands::Ask {
            session,
            message,
            state,
            websearch,
            grade,
            subject,
        } => {
            let profile = LearnerProfile {
                persona: config.service.persona,
                grade,
                subject,
                ..Default::default()
            };
            let input = TurnInput::message(message).with_websearch(websearch);
            ask(&config, session, profile, input, state.as_deref()).await
        }
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }
}

fn load_configuration(config_path: Option<&Path>) -> AppResult<TutorConfig> {
    let path = match config_path {
        Some(path) => path.to_path_buf(),
        None => TutorConfig::find_default()?,
    };
    info!("Loading configuration from: {}", path.display());
    Ok(TutorConfig::load_from_file(&path)?)
}

fn handle_config_command(config: &TutorConfig, show: bool) -> AppResult<()> {
    if show {
        println!("{}", toml::to_string_pretty(config)?);
    }
    info!("Configuration validation complete");
    Ok(())
}

fn build_vector_store(config: &TutorConfig) -> AppResult<Arc<dyn VectorStore>> {
    let store = QdrantStore::new(QdrantConfig {
        url: config.vector_store.url.clone(),
        api_key: config.get_vector_store_api_key(),
        ..Default::default()
    })?;
    Ok(Arc::new(store))
}

async fn run_service(config: TutorConfig) -> AppResult<()> {
    info!(service_id = %config.service.id, "Tutor router starting");
    let store = build_vector_store(&config)?;
    let sweep = config.sweep_config();

    let health_server = Arc::new(
        HealthServer::new(config.service.id.clone(), config.service.health_port)
            .with_vector_store(store.clone())
            .with_sweep_interval(sweep.interval.as_secs()),
    );
    tokio::spawn(health_server.start());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = tokio::spawn(TtlSweeper::new(store, sweep).run(shutdown_rx));

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
    tokio::select! {
        _ = sigint.recv() => info!("Received SIGINT, shutting down gracefully..."),
        _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully..."),
    }

    let _ = shutdown_tx.send(true);
    if let Err(e) = sweeper.await {
        warn!(error = %e, "Sweeper task ended abnormally");
    }
    info!("Application shutdown complete");
    Ok(())
}

async fn run_single_sweep(config: &TutorConfig) -> AppResult<()> {
    let sweeper = TtlSweeper::new(build_vector_store(config)?, config.sweep_config());
    let report = sweeper.sweep_once(chrono::Utc::now()).await?;
    println!(
        "Scanned {} session collections, deleted {}, skipped {}",
        report.scanned,
        report.deleted.len(),
        report.skipped.len()
    );
    for name in &report.deleted {
        println!("  deleted {name}");
    }
    Ok(())
}

/// Wire every collaborator from configuration
fn build_orchestrator(config: &TutorConfig) -> AppResult<Orchestrator> {
    let provider: Arc<dyn LlmProvider> = Arc::new(OpenAiProvider::new(OpenAiConfig {
        api_key: config.get_llm_api_key()?,
        base_url: config
            .llm
            .base_url
            .clone()
            .unwrap_or_else(|| OpenAiConfig::default().base_url),
        ..Default::default()
    })?);

    let embedder = OpenAiEmbedder::new(OpenAiEmbedderConfig {
        api_key: config.get_embedding_api_key()?,
        base_url: config
            .embedding
            .base_url
            .clone()
            .unwrap_or_else(|| OpenAiEmbedderConfig::default().base_url),
        model: config.embedding.model.clone(),
        dimensions: config.embedding.dimensions,
        ..Default::default()
    })?;
    let retriever = Arc::new(
        Retriever::new(build_vector_store(config)?, Arc::new(embedder))
            .with_batching(config.embedding_batching()),
    );

    let mut model = ChatModel::new(provider.clone(), config.llm.model.clone());
    model.temperature = config.llm.temperature;
    model.max_tokens = config.llm.max_tokens;

    let planner = LlmPlanner::new(provider, config.router_model().to_string())
        .with_temperature(config.router.temperature);

    let mut registry = HandlerRegistry::new()
        .register(Arc::new(SimpleAnswerHandler::new(model.clone())))
        .register(Arc::new(
            RagHandler::new(model.clone(), retriever.clone())
                .with_top_k(config.retrieval.top_k)
                .with_score_threshold(config.retrieval.score_threshold),
        ));

    match config.get_web_search_api_key() {
        Some(api_key) => {
            let search = SerperSearch::new(SerperConfig {
                api_key,
                max_results: config.web_search.max_results,
                base_url: config
                    .web_search
                    .base_url
                    .clone()
                    .unwrap_or_else(|| SerperConfig::default().base_url),
                ..Default::default()
            })?;
            registry = registry.register(Arc::new(
                WebSearchHandler::new(model.clone(), Arc::new(search), retriever.clone())
                    .with_max_results(config.web_search.max_results)
                    .with_top_k(config.retrieval.top_k)
                    .with_score_threshold(config.retrieval.score_threshold),
            ));
        }
        None => warn!("Web search key not set, WebSearch handler disabled"),
    }

    let image_key = config.get_image_api_key().unwrap_or_default();
    if let Some(image_config) = config.image_client_config(image_key) {
        let generator = HttpImageGenerator::new(image_config)?;
        let enhance = config.image.as_ref().map_or(true, |i| i.enhance_prompts);
        registry = registry.register(Arc::new(
            ImageHandler::new(model.clone(), Arc::new(generator)).with_prompt_enhancement(enhance),
        ));
    }

    Ok(Orchestrator::new(
        Arc::new(planner),
        registry,
        HistoryCompactor::new(model, config.history_settings()),
    )
    .with_ingestion(retriever, config.ingestion_settings()))
}

async fn ask(
    config: &TutorConfig,
    session: String,
    profile: LearnerProfile,
    input: TurnInput,
    state_path: Option<&Path>,
) -> AppResult<()> {
    let orchestrator = build_orchestrator(config)?;

    let mut state = match state_path.filter(|p| p.is_file()) {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        None => TurnState::new(session, profile),
    };

    let (sink, mut events) = ChunkSink::channel();
    let printer = tokio::spawn(async move {
        let mut stdout = std::io::stdout();
        while let Some(event) = events.recv().await {
            match event {
                TurnEvent::HandlerStarted(kind) => eprintln!("[{}]", kind.display_name()),
                TurnEvent::Delta { text, .. } => {
                    let _ = write!(stdout, "{text}");
                    let _ = stdout.flush();
                }
                TurnEvent::HandlerFinished { handler, failed } if failed => {
                    eprintln!("\n[{} failed]", handler.display_name());
                }
                TurnEvent::HandlerFinished { .. } => println!(),
                TurnEvent::Final(answer) => println!("\n---\n{answer}"),
            }
        }
    });

    let report = orchestrator.run_turn(&mut state, input, &sink).await;
    drop(sink);
    let _ = printer.await;

    eprintln!(
        "steps={:?} tokens={} elapsed={:?}",
        report.executed, report.usage.total_tokens, report.elapsed
    );
    info!(
        total_tokens = metrics().get_metrics().tokens.total_tokens,
        "Turn finished"
    );

    if let Some(path) = state_path {
        std::fs::write(path, serde_json::to_string_pretty(&state)?)?;
    }
    Ok(())
}
