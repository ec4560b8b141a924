//! Signal producers.
//!
//! A producer is an independent task that feeds one engine channel. The
//! daemon starts whichever producers are configured; one that fails to start
//! is logged and skipped.

use std::collections::HashMap;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use sysinfo::{ProcessRefreshKind, System, UpdateKind};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use wh_core::{ActivitySource, RawSignal};

use super::engine::{Signal, SignalSenders};

const TRACERS: [&str; 2] = ["strace", "ltrace"];

#[derive(Debug, Error)]
pub enum ProducerError {
    #[error("{producer} is not supported on this platform")]
    Unsupported { producer: &'static str },
    #[error("failed to start {producer}: {message}")]
    Start {
        producer: &'static str,
        message: String,
    },
}

/// A source of raw signals.
pub trait Producer: Send {
    fn name(&self) -> &'static str;

    fn source(&self) -> ActivitySource;

    /// Whether this producer inspects other processes.
    fn uses_process_introspection(&self) -> bool {
        false
    }

    /// Spawn the producer. It must stop when `shutdown` flips to true,
    /// dropping `tx` on the way out.
    fn start(
        self: Box<Self>,
        tx: mpsc::Sender<Signal>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<JoinHandle<()>, ProducerError>;
}

/// Start every producer, skipping those that fail.
pub fn start_all(
    producers: Vec<Box<dyn Producer>>,
    senders: &SignalSenders,
    shutdown: &watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::with_capacity(producers.len());
    for producer in producers {
        let name = producer.name();
        if producer.uses_process_introspection() {
            warn_if_tracers_attached();
        }
        let tx = senders.for_source(producer.source()).clone();
        match producer.start(tx, shutdown.clone()) {
            Ok(handle) => {
                tracing::info!(producer = name, "producer started");
                handles.push(handle);
            }
            Err(e) => {
                tracing::warn!(producer = name, error = %e, "producer failed to start, continuing with reduced coverage");
            }
        }
    }
    handles
}

/// Log a warning if `strace` or `ltrace` is running. Advisory only.
pub fn warn_if_tracers_attached() {
    let mut sys = System::new();
    sys.refresh_processes_specifics(ProcessRefreshKind::new());
    let found = tracer_processes(
        sys.processes()
            .iter()
            .map(|(pid, process)| (pid.as_u32(), process.name())),
    );
    for (pid, name) in found {
        tracing::warn!(pid, tracer = %name, "tracer process detected while starting process introspection");
    }
}

fn tracer_processes<'a>(processes: impl Iterator<Item = (u32, &'a str)>) -> Vec<(u32, String)> {
    let mut found: Vec<(u32, String)> = processes
        .filter(|(_, name)| TRACERS.contains(name))
        .map(|(pid, name)| (pid, name.to_string()))
        .collect();
    found.sort_unstable();
    found
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ProcessInfo {
    command: String,
    cwd: Option<String>,
}

type ProcessSnapshot = HashMap<u32, ProcessInfo>;

/// Polls the process table and reports starts and stops.
///
/// The first poll only records a baseline; processes already running when
/// the daemon starts are not reported.
#[derive(Debug, Clone)]
pub struct ProcessWatcher {
    poll_interval: StdDuration,
}

impl ProcessWatcher {
    pub const fn new(poll_interval: StdDuration) -> Self {
        Self { poll_interval }
    }
}

impl Producer for ProcessWatcher {
    fn name(&self) -> &'static str {
        "process-watcher"
    }

    fn source(&self) -> ActivitySource {
        ActivitySource::Process
    }

    fn uses_process_introspection(&self) -> bool {
        true
    }

    fn start(
        self: Box<Self>,
        tx: mpsc::Sender<Signal>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<JoinHandle<()>, ProducerError> {
        if !sysinfo::IS_SUPPORTED_SYSTEM {
            return Err(ProducerError::Unsupported {
                producer: self.name(),
            });
        }
        let poll_interval = self.poll_interval;
        Ok(tokio::spawn(async move {
            let mut interval = tokio::time::interval(poll_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut sys = System::new();
            let mut previous: Option<ProcessSnapshot> = None;
            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = shutdown.changed() => break,
                }
                if *shutdown.borrow() {
                    break;
                }

                let polled = tokio::task::spawn_blocking(move || {
                    let snapshot = poll(&mut sys);
                    (sys, snapshot)
                })
                .await;
                let next = match polled {
                    Ok((returned, snapshot)) => {
                        sys = returned;
                        snapshot
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "process poll panicked, stopping watcher");
                        break;
                    }
                };

                if let Some(prev) = &previous {
                    for raw in diff_snapshots(prev, &next, Utc::now()) {
                        if tx.send(Signal::new(raw)).await.is_err() {
                            return;
                        }
                    }
                }
                previous = Some(next);
            }
            tracing::debug!("process watcher stopped");
        }))
    }
}

fn poll(sys: &mut System) -> ProcessSnapshot {
    sys.refresh_processes_specifics(
        ProcessRefreshKind::new()
            .with_cmd(UpdateKind::OnlyIfNotSet)
            .with_cwd(UpdateKind::OnlyIfNotSet),
    );
    sys.processes()
        .iter()
        .map(|(pid, process)| {
            let command = if process.cmd().is_empty() {
                process.name().to_string()
            } else {
                process.cmd().join(" ")
            };
            let cwd = process.cwd().map(|p| p.to_string_lossy().into_owned());
            (pid.as_u32(), ProcessInfo { command, cwd })
        })
        .collect()
}

/// Starts and stops between two polls, in pid order.
fn diff_snapshots(
    previous: &ProcessSnapshot,
    next: &ProcessSnapshot,
    timestamp: DateTime<Utc>,
) -> Vec<RawSignal> {
    let mut started: Vec<_> = next
        .iter()
        .filter(|(pid, _)| !previous.contains_key(pid))
        .collect();
    started.sort_unstable_by_key(|(pid, _)| **pid);
    let mut stopped: Vec<_> = previous
        .iter()
        .filter(|(pid, _)| !next.contains_key(pid))
        .collect();
    stopped.sort_unstable_by_key(|(pid, _)| **pid);

    let starts = started.into_iter().map(|(pid, info)| RawSignal::ProcessStarted {
        pid: *pid,
        command: info.command.clone(),
        cwd: info.cwd.clone(),
        timestamp,
    });
    let stops = stopped.into_iter().map(|(pid, info)| RawSignal::ProcessStopped {
        pid: *pid,
        command: info.command.clone(),
        cwd: info.cwd.clone(),
        timestamp,
    });
    starts.chain(stops).collect()
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn info(command: &str) -> ProcessInfo {
        ProcessInfo {
            command: command.to_string(),
            cwd: Some("/src/api".to_string()),
        }
    }

    #[test]
    fn test_diff_reports_starts_then_stops() {
        let ts = Utc.with_ymd_and_hms(2025, 6, 2, 9, 0, 0).unwrap();
        let previous = ProcessSnapshot::from([(1, info("init")), (40, info("vim main.rs"))]);
        let next = ProcessSnapshot::from([(1, info("init")), (52, info("cargo test"))]);

        let signals = diff_snapshots(&previous, &next, ts);
        assert_eq!(
            signals,
            vec![
                RawSignal::ProcessStarted {
                    pid: 52,
                    command: "cargo test".to_string(),
                    cwd: Some("/src/api".to_string()),
                    timestamp: ts,
                },
                RawSignal::ProcessStopped {
                    pid: 40,
                    command: "vim main.rs".to_string(),
                    cwd: Some("/src/api".to_string()),
                    timestamp: ts,
                },
            ]
        );
    }

    #[test]
    fn test_diff_of_identical_snapshots_is_empty() {
        let ts = Utc.with_ymd_and_hms(2025, 6, 2, 9, 0, 0).unwrap();
        let snapshot = ProcessSnapshot::from([(1, info("init"))]);
        assert!(diff_snapshots(&snapshot, &snapshot, ts).is_empty());
    }

    #[test]
    fn test_tracer_processes_matches_exact_names() {
        let found = tracer_processes(
            [(9, "strace"), (3, "ltrace"), (4, "strace-helper"), (5, "bash")].into_iter(),
        );
        assert_eq!(found, vec![(3, "ltrace".to_string()), (9, "strace".to_string())]);
    }

    struct Failing;

    impl Producer for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn source(&self) -> ActivitySource {
            ActivitySource::File
        }

        fn start(
            self: Box<Self>,
            _tx: mpsc::Sender<Signal>,
            _shutdown: watch::Receiver<bool>,
        ) -> Result<JoinHandle<()>, ProducerError> {
            Err(ProducerError::Start {
                producer: "failing",
                message: "no inotify".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_start_all_skips_failed_producers() {
        let (senders, _inputs) = super::super::engine::channels(1);
        let (shutdown_tx, shutdown) = watch::channel(false);
        let watcher = ProcessWatcher::new(StdDuration::from_secs(60));
        let handles = start_all(vec![Box::new(Failing), Box::new(watcher)], &senders, &shutdown);
        assert_eq!(handles.len(), usize::from(sysinfo::IS_SUPPORTED_SYSTEM));

        shutdown_tx.send_replace(true);
        for handle in handles {
            tokio::time::timeout(StdDuration::from_secs(5), handle)
                .await
                .unwrap()
                .unwrap();
        }
    }
}
