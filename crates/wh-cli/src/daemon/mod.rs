//! The tracking daemon.
//!
//! Startup: take the instance lock, open the store (fatal on failure), adopt
//! persisted sessions, finalize orphaned blocks, start the writer thread, the
//! engine, the producers and the HTTP ingress (fatal if it cannot bind).
//!
//! Shutdown: stop producers and the ingress, let the engine drain its closed
//! channels, flush the registry, then stop the writer. Each wait is bounded
//! by `shutdown_grace_secs`.

pub mod engine;
pub mod gateway;
pub mod producers;
pub mod server;

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration as StdDuration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use fs2::FileExt;
use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use wh_core::{ActivityStore, Correlator, StateRegistry};

use crate::Config;
use engine::Engine;
use gateway::{Gateway, GatewayWorker};
use producers::{ProcessWatcher, Producer};
use server::AppState;

/// A started daemon. Dropping it without [`RunningDaemon::shutdown`] skips
/// the final flush.
#[derive(Debug)]
pub struct RunningDaemon {
    addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    server: JoinHandle<std::io::Result<()>>,
    engine: JoinHandle<()>,
    producers: Vec<JoinHandle<()>>,
    registry: Arc<RwLock<StateRegistry>>,
    gateway: Gateway,
    worker: GatewayWorker,
    grace: StdDuration,
    _lock: File,
}

/// Run in the foreground until SIGINT or SIGTERM.
pub async fn run(config: &Config) -> Result<()> {
    let daemon = start(config).await?;
    tracing::info!(addr = %daemon.local_addr(), "daemon running");
    wait_for_signal().await;
    tracing::info!("shutdown requested");
    daemon.shutdown().await
}

pub async fn start(config: &Config) -> Result<RunningDaemon> {
    config.validate().context("invalid configuration")?;
    let user = config.user()?;
    let window = config.tracking.window();

    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent).context("failed to create database directory")?;
    }
    let lock = acquire_instance_lock(&config.database_path.with_extension("lock"))?;
    let db = wh_db::Database::open(&config.database_path).context("failed to open database")?;

    let now = Utc::now();
    let mut registry = StateRegistry::new(window);
    match db.finalize_orphaned_work_blocks(now, &window) {
        Ok(0) => {}
        Ok(finalized) => tracing::info!(finalized, "finalized work blocks left open by a previous run"),
        Err(e) => tracing::warn!(error = %e, "failed to finalize orphaned work blocks"),
    }
    let restored = match db.load_active_sessions(&user) {
        Ok(sessions) => registry.restore_sessions(sessions, now),
        Err(e) => {
            tracing::warn!(error = %e, "failed to load active sessions, starting empty");
            wh_core::ChangeSet::default()
        }
    };

    let (gateway, worker) = gateway::spawn(Box::new(db), config.write_queue_capacity)
        .context("failed to start writer thread")?;
    gateway.persist(restored);

    let registry = Arc::new(RwLock::new(registry));
    let correlator = Correlator::new(
        user.clone(),
        Box::new(config.producers.allow_list.clone()),
        config.tracking.quiescence(),
    );
    let (engine, stats) = Engine::new(
        Arc::clone(&registry),
        correlator,
        gateway.clone(),
        StdDuration::from_secs(config.tracking.cleanup_interval_secs),
    );
    let (senders, inputs) = engine::channels(config.producers.channel_capacity);
    let (shutdown, shutdown_rx) = watch::channel(false);

    let listener = server::bind(&config.listen_addr)
        .await
        .with_context(|| format!("failed to bind HTTP ingress on {}", config.listen_addr))?;
    let addr = listener
        .local_addr()
        .context("failed to read bound address")?;

    let engine = tokio::spawn(engine.run(inputs));

    let mut configured: Vec<Box<dyn Producer>> = Vec::new();
    if config.producers.process_watcher {
        configured.push(Box::new(ProcessWatcher::new(StdDuration::from_secs(
            config.producers.process_poll_secs,
        ))));
    }
    let producers = producers::start_all(configured, &senders, &shutdown_rx);

    let state = AppState {
        registry: Arc::clone(&registry),
        gateway: gateway.clone(),
        hook: senders.hook.clone(),
        stats,
        user_id: user,
        started: Instant::now(),
    };
    let server = tokio::spawn(server::serve(listener, state, shutdown_rx));
    // Producers and the ingress now hold the only senders; the engine stops
    // once they are gone.
    drop(senders);

    Ok(RunningDaemon {
        addr,
        shutdown,
        server,
        engine,
        producers,
        registry,
        gateway,
        worker,
        grace: config.shutdown_grace(),
        _lock: lock,
    })
}

impl RunningDaemon {
    pub const fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn shutdown(self) -> Result<()> {
        self.shutdown.send_replace(true);

        match tokio::time::timeout(self.grace, self.server).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => tracing::warn!(error = %e, "HTTP ingress stopped with an error"),
            Ok(Err(e)) => tracing::warn!(error = %e, "HTTP ingress task failed"),
            Err(_) => tracing::warn!("HTTP ingress did not stop in time"),
        }
        for producer in self.producers {
            if tokio::time::timeout(self.grace, producer).await.is_err() {
                tracing::warn!("producer did not stop in time");
            }
        }
        let mut engine = self.engine;
        if tokio::time::timeout(self.grace, &mut engine).await.is_err() {
            tracing::warn!("engine did not drain in time, aborting");
            engine.abort();
        }

        let snapshot = self.registry.read().await.snapshot();
        let sessions = snapshot.sessions.len();
        let work_blocks = snapshot.work_blocks.len();
        if let Err(e) = self.gateway.flush(snapshot).await {
            tracing::warn!(error = %e, "failed to queue final flush");
        }
        self.gateway.shutdown().await;
        if self.worker.join(self.grace).await {
            tracing::info!(sessions, work_blocks, "state flushed, daemon stopped");
        }
        Ok(())
    }
}

/// Hold an exclusive lock for the daemon's lifetime so two instances never
/// share a database.
fn acquire_instance_lock(path: &Path) -> Result<File> {
    let mut file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)
        .with_context(|| format!("failed to open lock file {}", path.display()))?;
    file.try_lock_exclusive()
        .with_context(|| format!("another daemon holds {}", path.display()))?;
    file.set_len(0)?;
    writeln!(file, "{}", std::process::id())?;
    Ok(file)
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "cannot listen for SIGTERM");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_lock_is_exclusive() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("wh.lock");
        let held = acquire_instance_lock(&path).unwrap();
        assert!(acquire_instance_lock(&path).is_err());
        drop(held);
        assert!(acquire_instance_lock(&path).is_ok());
    }
}
