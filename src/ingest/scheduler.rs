// src/ingest/scheduler.rs
//! Background loops: content cycle, repository cycle and forwarding.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::Settings;
use crate::forwarding::Forwarder;
use crate::history::CycleHistory;
use crate::pipeline::{CycleScope, Pipeline};

pub const MAX_BACKOFF_MULTIPLIER: u32 = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SchedulerCfg {
    pub content_interval: Duration,
    pub repository_interval: Duration,
    pub forward_interval: Duration,
}

impl SchedulerCfg {
    pub fn from_settings(s: &Settings) -> Self {
        Self {
            content_interval: s.content_poll_interval,
            repository_interval: s.github_poll_interval,
            forward_interval: s.forward_poll_interval,
        }
    }
}

/// Wait multiplier after a tick: doubles on error up to the cap, resets on success.
pub fn next_multiplier(current: u32, ok: bool) -> u32 {
    if ok {
        1
    } else {
        (current.max(1) * 2).min(MAX_BACKOFF_MULTIPLIER)
    }
}

/// Run `tick` immediately and then every `interval` until shutdown is signalled.
pub async fn run_loop<F, Fut>(
    name: &'static str,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut tick: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    let mut multiplier = 1u32;
    info!(target: "scheduler", task = name, interval_secs = interval.as_secs(), "loop started");
    loop {
        if *shutdown.borrow() {
            break;
        }
        let res = tick().await;
        if let Err(e) = &res {
            warn!(target: "scheduler", task = name, error = %format!("{e:#}"), "tick failed");
        }
        multiplier = next_multiplier(multiplier, res.is_ok());

        tokio::select! {
            _ = tokio::time::sleep(interval * multiplier) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    info!(target: "scheduler", task = name, "loop stopped");
}

pub fn spawn_loops(
    pipeline: Arc<Pipeline>,
    forwarder: Arc<Forwarder>,
    history: Arc<CycleHistory>,
    cfg: SchedulerCfg,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::with_capacity(3);

    for (name, scope, interval) in [
        ("content", CycleScope::Content, cfg.content_interval),
        ("repositories", CycleScope::Repositories, cfg.repository_interval),
    ] {
        let pipeline = pipeline.clone();
        let history = history.clone();
        let rx = shutdown.clone();
        handles.push(tokio::spawn(run_loop(name, interval, rx, move || {
            let pipeline = pipeline.clone();
            let history = history.clone();
            async move {
                let report = pipeline.run_cycle(scope).await?;
                history.push(report);
                Ok(())
            }
        })));
    }

    let rx = shutdown.clone();
    handles.push(tokio::spawn(run_loop("forwarding", cfg.forward_interval, rx, move || {
        let forwarder = forwarder.clone();
        async move {
            forwarder.run().await?;
            Ok(())
        }
    })));
    handles
}
