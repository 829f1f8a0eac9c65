// src/app.rs
//! Production wiring: settings in, router plus background loops out.

use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::ai_bootstrap::AiRuntime;
use crate::api::{create_router, AppState};
use crate::config::{load_seed_default, Settings};
use crate::delivery::{Delivery, DiscordRest, LogOnlyDelivery, MessageFeed};
use crate::forwarding::{ForwardLimits, Forwarder};
use crate::history::CycleHistory;
use crate::ingest::discovery::{AiExtraction, DiscoveryChain};
use crate::ingest::http::{HttpFetch, ReqwestFetcher};
use crate::ingest::providers::AdapterSet;
use crate::ingest::scheduler::{spawn_loops, SchedulerCfg};
use crate::metrics::Metrics;
use crate::notify::NotifierMux;
use crate::pipeline::{Pipeline, PipelineDeps};
use crate::repository::{MemoryRepository, Repository, SqliteRepository};
use crate::sources::SourceService;

pub struct App {
    pub router: Router,
    pub pipeline: Arc<Pipeline>,
    pub history: Arc<CycleHistory>,
    pub shutdown: watch::Sender<bool>,
    pub tasks: Vec<JoinHandle<()>>,
}

impl App {
    /// Signal every loop to stop after its current unit of work.
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }
}

fn chat_transport(settings: &Settings) -> anyhow::Result<(Arc<dyn Delivery>, Arc<dyn MessageFeed>)> {
    match &settings.discord_bot_token {
        Some(token) => {
            let rest = Arc::new(DiscordRest::new(token.clone(), settings.http_timeout)?);
            Ok((rest.clone(), rest))
        }
        None => {
            warn!("DISCORD_BOT_TOKEN not set; items stay queued until a token is set");
            let dry = Arc::new(LogOnlyDelivery);
            Ok((dry.clone(), dry))
        }
    }
}

pub async fn build(settings: Settings) -> anyhow::Result<App> {
    let metrics = Metrics::install().context("installing metrics recorder")?;

    let ai = AiRuntime::load(settings.summary_max_tokens).context("loading AI config")?;
    if std::env::var("AI_QUICK_PROBE").is_ok_and(|v| v == "1") {
        ai.quick_probe().await;
    }
    let summarizer = ai.summarizer.clone();

    let http: Arc<dyn HttpFetch> = Arc::new(ReqwestFetcher::new(settings.http_timeout)?);
    let repo: Arc<dyn Repository> = match &settings.state_path {
        Some(path) => Arc::new(SqliteRepository::open(path).context("opening state database")?),
        None => Arc::new(MemoryRepository::new()),
    };

    let discovery = Arc::new(DiscoveryChain::standard(
        http.clone(),
        summarizer.clone(),
        settings.max_html_length,
        settings.discovery_cache_ttl,
    ));
    let adapters = AdapterSet::standard(http.clone(), summarizer.clone(), discovery.clone(), &settings);
    info!(types = ?adapters.enabled_types(), "source adapters enabled");

    let (delivery, feed) = chat_transport(&settings)?;
    let notifier = Arc::new(NotifierMux::from_env(settings.alert_cooldown)?);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let pipeline = Arc::new(
        Pipeline::new(
            PipelineDeps {
                repo: repo.clone(),
                adapters: adapters.clone(),
                summarizer: summarizer.clone(),
                delivery: delivery.clone(),
                notifier,
            },
            &settings,
        )
        .with_shutdown(shutdown_rx.clone()),
    );
    let forwarder = Arc::new(Forwarder::new(
        repo.clone(),
        feed,
        delivery,
        ForwardLimits::from_settings(&settings),
        settings.max_concurrent_forwards,
    ));

    let mut sources = SourceService::new(repo.clone(), adapters).with_discovery(discovery);
    if summarizer.is_enabled() {
        sources = sources.with_analyzer(Arc::new(AiExtraction::new(
            http.clone(),
            summarizer.clone(),
            settings.max_html_length,
        )));
    }
    let sources = Arc::new(sources);

    let seed = load_seed_default().context("loading sources seed")?;
    let seeded = sources.apply_seed(seed).await?;
    info!(?seeded, "seed applied");

    let history = Arc::new(CycleHistory::with_capacity(200));
    let router = create_router(AppState {
        sources,
        pipeline: pipeline.clone(),
        history: history.clone(),
    })
    .merge(metrics.router());

    let tasks = spawn_loops(
        pipeline.clone(),
        forwarder,
        history.clone(),
        SchedulerCfg::from_settings(&settings),
        shutdown_rx,
    );

    Ok(App {
        router,
        pipeline,
        history,
        shutdown: shutdown_tx,
        tasks,
    })
}
