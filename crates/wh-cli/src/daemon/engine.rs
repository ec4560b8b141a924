//! The engine loop: drains the producer channels, correlates each signal,
//! applies it to the registry and hands the resulting changes to persistence.
//!
//! One task owns the correlator, so signals are processed strictly in arrival
//! order. The periodic sweep runs on the same task.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Utc;
use tokio::sync::{RwLock, mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;
use wh_core::{
    ActivitySource, Correlator, CorrelatorStats, Dropped, RawSignal, SessionId, StateRegistry,
    WorkBlockId,
};

use super::gateway::Gateway;

/// A raw signal plus an optional reply slot for callers that wait (the HTTP
/// ingress). Producers leave `reply` empty.
#[derive(Debug)]
pub struct Signal {
    pub raw: RawSignal,
    pub reply: Option<oneshot::Sender<SignalOutcome>>,
}

impl Signal {
    pub const fn new(raw: RawSignal) -> Self {
        Self { raw, reply: None }
    }
}

/// What the engine did with one signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalOutcome {
    Recorded {
        session_id: SessionId,
        work_block_id: WorkBlockId,
    },
    Dropped(Dropped),
    Rejected(String),
}

/// Sending halves handed to producers and the HTTP ingress.
#[derive(Debug, Clone)]
pub struct SignalSenders {
    pub process: mpsc::Sender<Signal>,
    pub network: mpsc::Sender<Signal>,
    pub file: mpsc::Sender<Signal>,
    pub hook: mpsc::Sender<Signal>,
}

impl SignalSenders {
    pub const fn for_source(&self, source: ActivitySource) -> &mpsc::Sender<Signal> {
        match source {
            ActivitySource::Process => &self.process,
            ActivitySource::Network => &self.network,
            ActivitySource::File => &self.file,
            ActivitySource::Hook => &self.hook,
        }
    }
}

/// Receiving halves, one bounded channel per source.
#[derive(Debug)]
pub struct SignalInputs {
    process: mpsc::Receiver<Signal>,
    network: mpsc::Receiver<Signal>,
    file: mpsc::Receiver<Signal>,
    hook: mpsc::Receiver<Signal>,
}

pub fn channels(capacity: usize) -> (SignalSenders, SignalInputs) {
    let (process_tx, process) = mpsc::channel(capacity);
    let (network_tx, network) = mpsc::channel(capacity);
    let (file_tx, file) = mpsc::channel(capacity);
    let (hook_tx, hook) = mpsc::channel(capacity);
    (
        SignalSenders {
            process: process_tx,
            network: network_tx,
            file: file_tx,
            hook: hook_tx,
        },
        SignalInputs {
            process,
            network,
            file,
            hook,
        },
    )
}

#[derive(Debug)]
pub struct Engine {
    registry: Arc<RwLock<StateRegistry>>,
    correlator: Correlator,
    gateway: Gateway,
    stats: watch::Sender<CorrelatorStats>,
    sweep_interval: StdDuration,
}

impl Engine {
    pub fn new(
        registry: Arc<RwLock<StateRegistry>>,
        correlator: Correlator,
        gateway: Gateway,
        sweep_interval: StdDuration,
    ) -> (Self, watch::Receiver<CorrelatorStats>) {
        let (stats, stats_rx) = watch::channel(correlator.stats());
        (
            Self {
                registry,
                correlator,
                gateway,
                stats,
                sweep_interval,
            },
            stats_rx,
        )
    }

    /// Run until every input channel is closed and drained.
    pub async fn run(mut self, mut inputs: SignalInputs) {
        let mut sweep = tokio::time::interval(self.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        sweep.tick().await;

        let mut open = [true; 4];
        while open.iter().any(|o| *o) {
            tokio::select! {
                signal = inputs.process.recv(), if open[0] => match signal {
                    Some(signal) => self.handle(signal).await,
                    None => open[0] = false,
                },
                signal = inputs.network.recv(), if open[1] => match signal {
                    Some(signal) => self.handle(signal).await,
                    None => open[1] = false,
                },
                signal = inputs.file.recv(), if open[2] => match signal {
                    Some(signal) => self.handle(signal).await,
                    None => open[2] = false,
                },
                signal = inputs.hook.recv(), if open[3] => match signal {
                    Some(signal) => self.handle(signal).await,
                    None => open[3] = false,
                },
                _ = sweep.tick() => self.sweep().await,
            }
        }
        tracing::debug!("all signal channels closed, engine stopping");
    }

    async fn handle(&mut self, signal: Signal) {
        let source = signal.raw.source();
        let correlated = self.correlator.correlate(signal.raw);
        self.stats.send_replace(self.correlator.stats());

        let outcome = match correlated {
            Err(reason) => {
                tracing::trace!(%source, ?reason, "signal dropped");
                SignalOutcome::Dropped(reason)
            }
            Ok(event) => {
                let now = Utc::now();
                let applied = {
                    // Queue while still holding the lock so writes reach the
                    // store in the order the registry applied them.
                    let mut registry = self.registry.write().await;
                    registry.process_activity_at(&event, now).map(|mut outcome| {
                        self.gateway.persist(std::mem::take(&mut outcome.changes));
                        outcome
                    })
                };
                match applied {
                    Ok(outcome) => {
                        tracing::debug!(
                            %source,
                            project = %event.project_name,
                            activity_type = %event.activity_type,
                            session_id = %outcome.session_id,
                            work_block_id = %outcome.work_block_id,
                            "activity recorded"
                        );
                        SignalOutcome::Recorded {
                            session_id: outcome.session_id,
                            work_block_id: outcome.work_block_id,
                        }
                    }
                    Err(e) => {
                        tracing::warn!(%source, event_id = %event.id, error = %e, "activity rejected");
                        SignalOutcome::Rejected(e.to_string())
                    }
                }
            }
        };

        if let Some(reply) = signal.reply {
            let _ = reply.send(outcome);
        }
    }

    async fn sweep(&mut self) {
        let now = Utc::now();
        // Held until the changes are queued.
        let mut registry = self.registry.write().await;
        let changes = registry.sweep_at(now);
        let pruned = self.correlator.prune(now);
        if !changes.is_empty() {
            tracing::info!(
                sessions = changes.sessions.len(),
                work_blocks = changes.work_blocks.len(),
                "sweep closed stale state"
            );
        }
        tracing::trace!(pruned, "correlator pruned");
        self.gateway.persist(changes);
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use wh_core::{ActivitySubmission, AllowListPolicy, UserId};
    use wh_db::Database;

    use super::super::gateway;
    use super::*;

    fn submission(project: &str) -> RawSignal {
        let user = UserId::new("u").unwrap();
        let event = ActivitySubmission {
            project_name: project.to_string(),
            project_path: format!("/src/{project}"),
            activity_type: "edit".to_string(),
            ..ActivitySubmission::default()
        }
        .into_event(&user, Utc::now())
        .unwrap();
        RawSignal::Submission(event)
    }

    async fn send(senders: &SignalSenders, raw: RawSignal) -> SignalOutcome {
        let (tx, rx) = oneshot::channel();
        senders
            .hook
            .send(Signal {
                raw,
                reply: Some(tx),
            })
            .await
            .unwrap();
        rx.await.unwrap()
    }

    #[tokio::test]
    async fn test_engine_records_and_suppresses_hook_submissions() {
        let db = Database::open_in_memory().unwrap();
        let (gateway, worker) = gateway::spawn(Box::new(db), 16).unwrap();
        let registry = Arc::new(RwLock::new(StateRegistry::default()));
        let correlator = Correlator::new(
            UserId::new("u").unwrap(),
            Box::new(AllowListPolicy::default()),
            Duration::seconds(5),
        );
        let (engine, stats) = Engine::new(
            Arc::clone(&registry),
            correlator,
            gateway.clone(),
            StdDuration::from_secs(60),
        );
        let (senders, inputs) = channels(8);
        let task = tokio::spawn(engine.run(inputs));

        let first = send(&senders, submission("api")).await;
        let SignalOutcome::Recorded { session_id, .. } = first else {
            panic!("expected recorded, got {first:?}");
        };
        let second = send(&senders, submission("api")).await;
        assert_eq!(second, SignalOutcome::Dropped(Dropped::Suppressed));
        let other = send(&senders, submission("web")).await;
        assert!(matches!(other, SignalOutcome::Recorded { .. }));

        assert_eq!(registry.read().await.active_work_blocks(&session_id).len(), 2);
        let snapshot = *stats.borrow();
        assert_eq!(snapshot.received, 3);
        assert_eq!(snapshot.suppressed, 1);

        drop(senders);
        task.await.unwrap();
        gateway.shutdown().await;
        assert!(worker.join(StdDuration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn test_engine_stops_when_all_senders_drop() {
        let db = Database::open_in_memory().unwrap();
        let (gateway, worker) = gateway::spawn(Box::new(db), 4).unwrap();
        let correlator = Correlator::new(
            UserId::new("u").unwrap(),
            Box::new(AllowListPolicy::default()),
            Duration::seconds(5),
        );
        let (engine, _stats) = Engine::new(
            Arc::new(RwLock::new(StateRegistry::default())),
            correlator,
            gateway.clone(),
            StdDuration::from_millis(10),
        );
        let (senders, inputs) = channels(1);
        drop(senders);
        tokio::time::timeout(StdDuration::from_secs(5), engine.run(inputs))
            .await
            .unwrap();
        gateway.shutdown().await;
        assert!(worker.join(StdDuration::from_secs(5)).await);
    }

    #[test]
    fn test_senders_route_by_source() {
        let (senders, _inputs) = channels(1);
        assert!(senders.for_source(ActivitySource::Hook).same_channel(&senders.hook));
        assert!(senders.for_source(ActivitySource::File).same_channel(&senders.file));
    }
}
