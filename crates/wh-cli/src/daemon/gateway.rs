//! Persistence gateway: a dedicated writer thread fed by a bounded queue.
//!
//! The engine never blocks on storage. Change sets are offered with
//! `try_send`; when the queue is full they are folded into a backlog that
//! rides along with the next offer, so closes and counter increments are
//! delayed rather than lost. The registry stays authoritative meanwhile.
//! Queries and the bulk close wait for their reply over a oneshot channel.

use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use wh_core::{
    ActivityStore, ChangeSet, CloseAllSummary, SessionId, StoreError, WindowConfig, WorkBlock,
    WorkSummary,
};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("persistence gateway has shut down")]
    Closed,
    #[error(transparent)]
    Store(#[from] StoreError),
}

enum Command {
    Persist(ChangeSet),
    /// Write `live` first, then close whatever storage still holds active.
    CloseAll {
        live: ChangeSet,
        now: DateTime<Utc>,
        config: WindowConfig,
        respond: oneshot::Sender<Result<CloseAllSummary, StoreError>>,
    },
    WorkBlocks {
        session_id: SessionId,
        respond: oneshot::Sender<Result<Vec<WorkBlock>, StoreError>>,
    },
    Summary {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        respond: oneshot::Sender<Result<WorkSummary, StoreError>>,
    },
    Shutdown {
        respond: oneshot::Sender<()>,
    },
}

/// Cloneable handle used by the engine and the HTTP handlers.
#[derive(Debug, Clone)]
pub struct Gateway {
    tx: mpsc::Sender<Command>,
    backlog: Arc<Mutex<ChangeSet>>,
}

/// Owns the writer thread until shutdown.
#[derive(Debug)]
pub struct GatewayWorker {
    handle: JoinHandle<()>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Persist(_) => "Persist",
            Self::CloseAll { .. } => "CloseAll",
            Self::WorkBlocks { .. } => "WorkBlocks",
            Self::Summary { .. } => "Summary",
            Self::Shutdown { .. } => "Shutdown",
        };
        f.write_str(name)
    }
}

/// Move `store` onto a writer thread.
pub fn spawn(
    store: Box<dyn ActivityStore + Send>,
    capacity: usize,
) -> std::io::Result<(Gateway, GatewayWorker)> {
    let (tx, rx) = mpsc::channel(capacity);
    let handle = thread::Builder::new()
        .name("wh-writer".to_string())
        .spawn(move || writer_loop(store.as_ref(), rx))?;
    let gateway = Gateway {
        tx,
        backlog: Arc::default(),
    };
    Ok((gateway, GatewayWorker { handle }))
}

impl Gateway {
    /// Queue a change set without waiting.
    ///
    /// Returns false if the queue was full or gone. On a full queue the set
    /// is kept in the backlog and resent with the next call.
    pub fn persist(&self, changes: ChangeSet) -> bool {
        let mut backlog = self.backlog.lock().unwrap_or_else(PoisonError::into_inner);
        backlog.merge(changes);
        if backlog.is_empty() {
            return true;
        }
        let pending = std::mem::take(&mut *backlog);
        match self.tx.try_send(Command::Persist(pending)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(command)) => {
                if let Command::Persist(pending) = command {
                    tracing::warn!(
                        sessions = pending.sessions.len(),
                        work_blocks = pending.work_blocks.len(),
                        counters = pending.counters.len(),
                        "write queue full, holding change set for retry"
                    );
                    *backlog = pending;
                }
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::warn!("writer thread gone, dropping change set");
                false
            }
        }
    }

    /// Queue a change set behind the backlog, waiting for room. Used for the
    /// shutdown flush.
    pub async fn flush(&self, changes: ChangeSet) -> Result<(), GatewayError> {
        let pending = self.take_backlog(changes);
        if pending.is_empty() {
            return Ok(());
        }
        self.tx
            .send(Command::Persist(pending))
            .await
            .map_err(|_| GatewayError::Closed)
    }

    /// Write the live registry's `changes`, then close everything storage
    /// still holds active as of `now`.
    ///
    /// Returns once the close is queued; await the receiver for the counts.
    /// Queued writes that follow this call land after the storage pass.
    pub async fn close_all(
        &self,
        changes: ChangeSet,
        now: DateTime<Utc>,
        config: WindowConfig,
    ) -> Result<oneshot::Receiver<Result<CloseAllSummary, StoreError>>, GatewayError> {
        let live = self.take_backlog(changes);
        let (respond, reply) = oneshot::channel();
        self.tx
            .send(Command::CloseAll {
                live,
                now,
                config,
                respond,
            })
            .await
            .map_err(|_| GatewayError::Closed)?;
        Ok(reply)
    }

    fn take_backlog(&self, changes: ChangeSet) -> ChangeSet {
        let mut pending = {
            let mut backlog = self.backlog.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *backlog)
        };
        pending.merge(changes);
        pending
    }

    pub async fn work_blocks(&self, session_id: SessionId) -> Result<Vec<WorkBlock>, GatewayError> {
        self.request(|respond| Command::WorkBlocks {
            session_id,
            respond,
        })
        .await
    }

    pub async fn summary(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<WorkSummary, GatewayError> {
        self.request(|respond| Command::Summary {
            start,
            end,
            respond,
        })
        .await
    }

    /// Ask the writer to stop once everything queued before this is written.
    pub async fn shutdown(&self) {
        let (respond, done) = oneshot::channel();
        if self.tx.send(Command::Shutdown { respond }).await.is_ok() {
            let _ = done.await;
        }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, StoreError>>) -> Command,
    ) -> Result<T, GatewayError> {
        let (respond, reply) = oneshot::channel();
        self.tx
            .send(build(respond))
            .await
            .map_err(|_| GatewayError::Closed)?;
        let result = reply.await.map_err(|_| GatewayError::Closed)?;
        Ok(result?)
    }
}

impl GatewayWorker {
    /// Wait for the writer thread, giving up after `grace`.
    pub async fn join(self, grace: StdDuration) -> bool {
        let handle = self.handle;
        let joined = tokio::task::spawn_blocking(move || handle.join());
        match tokio::time::timeout(grace, joined).await {
            Ok(Ok(Ok(()))) => true,
            Ok(Ok(Err(_)) | Err(_)) => {
                tracing::error!("writer thread panicked");
                false
            }
            Err(_) => {
                tracing::warn!(?grace, "writer thread did not finish in time");
                false
            }
        }
    }
}

fn writer_loop(store: &dyn ActivityStore, mut rx: mpsc::Receiver<Command>) {
    while let Some(command) = rx.blocking_recv() {
        match command {
            Command::Persist(changes) => apply(store, &changes),
            Command::CloseAll {
                live,
                now,
                config,
                respond,
            } => {
                apply(store, &live);
                let _ = respond.send(store.close_all_active(now, &config));
            }
            Command::WorkBlocks {
                session_id,
                respond,
            } => {
                let _ = respond.send(store.work_blocks_for_session(&session_id));
            }
            Command::Summary {
                start,
                end,
                respond,
            } => {
                let _ = respond.send(store.work_summary(start, end));
            }
            Command::Shutdown { respond } => {
                let _ = respond.send(());
                break;
            }
        }
    }
    tracing::debug!("writer thread exiting");
}

/// Write one change set. Failures are logged per record and the rest still
/// go through.
fn apply(store: &dyn ActivityStore, changes: &ChangeSet) {
    for session in &changes.sessions {
        if let Err(e) = store.save_session(session) {
            tracing::warn!(session_id = %session.id, error = %e, "failed to save session");
        }
    }
    for block in &changes.work_blocks {
        if let Err(e) = store.save_work_block(block) {
            tracing::warn!(work_block_id = %block.id, error = %e, "failed to save work block");
        }
    }
    for (block_id, activity_type) in &changes.counters {
        if let Err(e) = store.increment_activity_counter(block_id, activity_type) {
            tracing::warn!(
                work_block_id = %block_id,
                activity_type = %activity_type,
                error = %e,
                "failed to increment activity counter"
            );
        }
    }
}
