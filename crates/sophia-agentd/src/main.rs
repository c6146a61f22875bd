//! sophia-agentd: the event-driven entry point.
//!
//! Wires the memory systems, the chat pipeline, the event bus and the
//! configured adapters together, then runs the processor loop until
//! shutdown. Channels: stdin/stdout always; Telegram, the interval
//! scheduler and the goal engine when enabled in config.

use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use sophia_core::SophiaConfig;
use sophia_episodes::EpisodicMemory;
use sophia_events::{
    EventBus, EventProcessor, EventSource, GoalAdapter, GoalAdapterConfig, SchedulerAdapter,
};
use sophia_extract::TripleExtractor;
use sophia_graph::{SqliteStore, VectorKnowledgeGraph};
use sophia_llm::{ChatApi, Embedder, HashEmbedder, HttpEmbedder, LlmClient};
use sophia_memory::AssociativeSemanticMemory;
use sophia_monitor::{MonitorSettings, StreamMonitor};
use sophia_telegram::{TelegramAdapter, TelegramResponder};

mod agent;
mod cli;

use agent::Agent;

#[derive(Parser)]
#[command(name = "sophia-agentd", about = "Associative semantic memory agent daemon")]
struct Args {
    /// Path to sophia.toml (default: ~/.sophia/sophia.toml).
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sophia_agentd=info,sophia_events=info,sophia_memory=info".into()),
        )
        .init();

    let args = Args::parse();
    let config = SophiaConfig::load(args.config.as_deref()).unwrap_or_else(|e| {
        warn!("config load failed ({e}), using defaults");
        SophiaConfig::default()
    });

    std::fs::create_dir_all(&config.storage.path)?;

    // --- memory systems ---------------------------------------------------
    let embedder: Arc<dyn Embedder> = match &config.embedding.base_url {
        Some(base_url) => Arc::new(HttpEmbedder::new(
            base_url.clone(),
            config.embedding.api_key.clone().unwrap_or_default(),
            config
                .embedding
                .model
                .clone()
                .unwrap_or_else(|| "all-MiniLM-L6-v2".to_string()),
            config.embedding.dim,
        )),
        None => {
            warn!("no embedding endpoint configured, using deterministic hashing embedder");
            Arc::new(HashEmbedder::new(config.embedding.dim))
        }
    };

    let store_path = format!("{}/knowledge_graph.db", config.storage.path);
    let store = SqliteStore::open(&store_path, config.embedding.dim)?;
    let kgraph = Arc::new(VectorKnowledgeGraph::new(Box::new(store), embedder));

    let llm: Arc<dyn ChatApi> = Arc::new(LlmClient::new(
        config.llm.base_url.clone(),
        config.llm.api_key.clone(),
    ));
    let extractor = TripleExtractor::new(
        llm.clone(),
        config
            .llm
            .extraction_model
            .clone()
            .unwrap_or_else(|| config.llm.model.clone()),
        config.llm.extraction_max_tokens,
    );
    let memory = Arc::new(AssociativeSemanticMemory::new(
        kgraph,
        extractor,
        llm.clone(),
        config
            .llm
            .summarization_model
            .clone()
            .unwrap_or_else(|| config.llm.model.clone()),
        config.llm.summary_max_tokens,
    ));

    let episodes_path = format!("{}/episodes.db", config.storage.path);
    let episodic = Arc::new(EpisodicMemory::open(&episodes_path, config.agent.name.clone())?);
    info!("memory systems initialized (semantic + episodic)");

    // --- chat pipeline ----------------------------------------------------
    let monitor = Arc::new(StreamMonitor::new(
        memory.clone(),
        episodic,
        MonitorSettings {
            auto_recall_limit: config.monitor.auto_recall_limit,
            idle_seconds: config.monitor.idle_seconds,
            episode_rotate_threshold: config.monitor.episode_rotate_threshold,
            agent_name: config.agent.name.clone(),
            user_name: config.agent.user_name.clone(),
        },
        tokio::runtime::Handle::current(),
    ));
    let agent = Arc::new(Agent::new(
        llm,
        monitor.clone(),
        config.llm.model.clone(),
        config.llm.chat_max_tokens,
        config.agent.name.clone(),
    ));

    // --- event bus + processor --------------------------------------------
    let bus = Arc::new(EventBus::new());
    let processor = Arc::new(EventProcessor::new(
        bus.clone(),
        agent,
        Some(memory.clone()),
        config.agent.rate_limit_per_hour,
    ));

    // --- adapters ----------------------------------------------------------
    let mut sources: Vec<Arc<dyn EventSource>> = Vec::new();

    let goal_cfg = &config.event_sources.goal_engine;
    if goal_cfg.enabled {
        let adapter = Arc::new(GoalAdapter::new(
            memory.clone(),
            GoalAdapterConfig {
                agent_name: config.agent.name.clone(),
                cooldown_seconds: goal_cfg.cooldown_seconds,
                max_consecutive_goals: goal_cfg.max_consecutive_goals,
                rest_seconds: goal_cfg.rest_seconds,
            },
        ));
        processor.set_goal_feed(adapter.clone());
        monitor.set_workspace_view(adapter);
        info!("goal engine enabled");
    }

    let sched_cfg = &config.event_sources.scheduler;
    if sched_cfg.enabled && !sched_cfg.jobs.is_empty() {
        let scheduler = Arc::new(SchedulerAdapter::new(bus.clone(), sched_cfg.jobs.clone()));
        scheduler.start().await?;
        sources.push(scheduler);
    }

    if let Some(tg_cfg) = &config.event_sources.telegram {
        if tg_cfg.enabled && !tg_cfg.token.is_empty() && !tg_cfg.token.starts_with("${") {
            let adapter = TelegramAdapter::new(tg_cfg, bus.clone());
            processor
                .register_response_handler("telegram", Arc::new(TelegramResponder::new(adapter.bot())));
            tokio::spawn(adapter.run());
            info!("telegram adapter started");
        } else if tg_cfg.enabled {
            warn!("telegram enabled but token not set, skipping");
        }
    }

    processor.register_response_handler("cli", Arc::new(cli::CliResponder));
    let stdin_task = cli::spawn_stdin_channel(bus.clone());

    // --- run ----------------------------------------------------------------
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    {
        let bus = bus.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("ctrl-c received, shutting down");
                bus.put(sophia_events::Event::shutdown()).await;
                let _ = shutdown_tx.send(true);
            }
        });
    }

    info!(
        agent = %config.agent.name,
        llm = %config.llm.base_url,
        model = %config.llm.model,
        "sophia-agentd starting"
    );
    processor.run(shutdown_rx).await;

    // --- graceful shutdown -------------------------------------------------
    stdin_task.abort();
    for source in sources.iter().rev() {
        if let Err(e) = source.stop().await {
            warn!("error stopping adapter {}: {e}", source.name());
        }
    }
    let monitor_for_flush = monitor.clone();
    tokio::task::spawn_blocking(move || monitor_for_flush.flush_all()).await?;
    info!("shutdown complete");
    Ok(())
}
