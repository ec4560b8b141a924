//! Turns raw producer signals into normalized activity events.
//!
//! The correlator filters signals through a [`SignalPolicy`], attributes each
//! one to a project, and applies a quiescence window so a burst of low-level
//! signals (a save touching many files, a chatty HTTP client) counts once. It
//! never touches session or work-block state.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::activity_type::{ActivitySource, ActivityType};
use crate::event::ActivityEvent;
use crate::project::ProjectIdentity;
use crate::types::{EventId, UserId};

/// Default quiescence window.
pub const DEFAULT_QUIESCENCE_SECS: i64 = 5;

/// Direction of a file access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOp {
    Read,
    Write,
}

/// A signal as delivered by a producer, before any filtering.
#[derive(Debug, Clone, PartialEq)]
pub enum RawSignal {
    ProcessStarted {
        pid: u32,
        command: String,
        cwd: Option<String>,
        timestamp: DateTime<Utc>,
    },
    ProcessStopped {
        pid: u32,
        command: String,
        cwd: Option<String>,
        timestamp: DateTime<Utc>,
    },
    NetworkCall {
        pid: Option<u32>,
        host: String,
        path: String,
        method: String,
        /// Working directory of the owning process, when known.
        cwd: Option<String>,
        timestamp: DateTime<Utc>,
    },
    FileAccess {
        path: String,
        op: FileOp,
        process_name: Option<String>,
        project_root: Option<String>,
        timestamp: DateTime<Utc>,
    },
    /// An explicit submission, already validated.
    Submission(ActivityEvent),
}

impl RawSignal {
    pub const fn source(&self) -> ActivitySource {
        match self {
            Self::ProcessStarted { .. } | Self::ProcessStopped { .. } => ActivitySource::Process,
            Self::NetworkCall { .. } => ActivitySource::Network,
            Self::FileAccess { .. } => ActivitySource::File,
            Self::Submission(event) => event.activity_source,
        }
    }

    pub const fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::ProcessStarted { timestamp, .. }
            | Self::ProcessStopped { timestamp, .. }
            | Self::NetworkCall { timestamp, .. }
            | Self::FileAccess { timestamp, .. } => *timestamp,
            Self::Submission(event) => event.timestamp,
        }
    }
}

/// Decides which processes, hosts and files count as work.
pub trait SignalPolicy: Send + Sync {
    fn allows_process(&self, command: &str) -> bool;
    fn allows_network(&self, host: &str, path: &str) -> bool;
    fn allows_file(&self, path: &str) -> bool;
}

/// Allow-list policy loaded from configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllowListPolicy {
    /// Executable names. `python` also matches `python3` and `python3.12`.
    pub processes: Vec<String>,
    /// Hosts; a listed host also matches its subdomains.
    pub hosts: Vec<String>,
    /// URL path fragments that mark a request as work on any host.
    pub paths: Vec<String>,
    /// File extensions, with the leading dot.
    pub file_extensions: Vec<String>,
    /// File name fragments for extensionless work files.
    pub file_names: Vec<String>,
    /// Directory names whose contents are never work.
    pub ignored_dirs: Vec<String>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

impl Default for AllowListPolicy {
    fn default() -> Self {
        Self {
            processes: strings(&[
                "claude", "node", "npm", "git", "python", "go", "code", "vim", "nvim", "emacs",
                "cargo",
            ]),
            hosts: strings(&[
                "api.anthropic.com",
                "claude.ai",
                "github.com",
                "api.github.com",
                "gitlab.com",
                "bitbucket.org",
                "stackoverflow.com",
                "npmjs.org",
                "pypi.org",
                "golang.org",
                "pkg.go.dev",
                "crates.io",
                "localhost",
                "127.0.0.1",
            ]),
            paths: strings(&["/api/", "/v1/", "/v2/", "/graphql", "/webhook", "/auth", "/oauth"]),
            file_extensions: strings(&[
                ".go", ".js", ".ts", ".jsx", ".tsx", ".vue", ".py", ".java", ".cpp", ".c", ".h",
                ".hpp", ".rs", ".rb", ".php", ".cs", ".swift", ".kt", ".scala", ".hs", ".dart",
                ".sh", ".bash", ".zsh", ".md", ".txt", ".json", ".yaml", ".yml", ".toml", ".ini",
                ".cfg", ".xml", ".html", ".css", ".scss", ".sql", ".graphql", ".proto",
            ]),
            file_names: strings(&[
                "makefile",
                "dockerfile",
                "docker-compose",
                "go.mod",
                "requirements.txt",
                "gemfile",
                ".gitignore",
                "readme",
                "license",
                "changelog",
            ]),
            ignored_dirs: strings(&[".git", "node_modules", "target", ".cache", "__pycache__"]),
        }
    }
}

/// Executable name from a command line: basename of the first token.
fn executable_name(command: &str) -> Option<String> {
    let first = command.split_whitespace().next()?;
    let name = Path::new(first).file_name()?.to_str()?;
    Some(name.to_ascii_lowercase())
}

impl SignalPolicy for AllowListPolicy {
    fn allows_process(&self, command: &str) -> bool {
        let Some(exe) = executable_name(command) else {
            return false;
        };
        self.processes.iter().any(|allowed| {
            exe.strip_prefix(allowed.as_str()).is_some_and(|rest| {
                rest.chars().all(|c| c.is_ascii_digit() || c == '.')
            })
        })
    }

    fn allows_network(&self, host: &str, path: &str) -> bool {
        let host = host.to_ascii_lowercase();
        let host = host.split(':').next().unwrap_or_default();
        let host_ok = self.hosts.iter().any(|allowed| {
            host == allowed
                || host
                    .strip_suffix(allowed.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.'))
        });
        host_ok || self.paths.iter().any(|fragment| path.contains(fragment.as_str()))
    }

    fn allows_file(&self, path: &str) -> bool {
        let file = Path::new(path);
        let in_ignored_dir = file.components().any(|c| {
            c.as_os_str()
                .to_str()
                .is_some_and(|seg| self.ignored_dirs.iter().any(|d| d == seg))
        });
        if in_ignored_dir {
            return false;
        }

        let name = file
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        if name.is_empty() {
            return false;
        }
        let ext_ok = file
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| {
                let dotted = format!(".{}", ext.to_ascii_lowercase());
                self.file_extensions.iter().any(|allowed| *allowed == dotted)
            });
        ext_ok || self.file_names.iter().any(|frag| name.contains(frag.as_str()))
    }
}

/// Counters reported on the health endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelatorStats {
    pub received: u64,
    pub emitted: u64,
    /// Rejected by the policy.
    pub filtered: u64,
    /// Swallowed by the quiescence window.
    pub suppressed: u64,
    /// Dropped as malformed or unattributable.
    pub malformed: u64,
}

/// Why a signal produced no event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dropped {
    Filtered,
    Suppressed,
    Malformed,
}

/// Project name, normalized project path and source.
type QuiescenceKey = (String, String, ActivitySource);

/// Stateful signal normalizer.
pub struct Correlator {
    user_id: UserId,
    policy: Box<dyn SignalPolicy>,
    quiescence: Duration,
    last_emitted: HashMap<QuiescenceKey, DateTime<Utc>>,
    stats: CorrelatorStats,
}

impl std::fmt::Debug for Correlator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Correlator")
            .field("user_id", &self.user_id)
            .field("quiescence", &self.quiescence)
            .field("tracked_keys", &self.last_emitted.len())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

struct Attributed {
    project: ProjectIdentity,
    activity_type: ActivityType,
    command: Option<String>,
    description: Option<String>,
}

impl Correlator {
    pub fn new(user_id: UserId, policy: Box<dyn SignalPolicy>, quiescence: Duration) -> Self {
        Self {
            user_id,
            policy,
            quiescence,
            last_emitted: HashMap::new(),
            stats: CorrelatorStats::default(),
        }
    }

    pub const fn stats(&self) -> CorrelatorStats {
        self.stats
    }

    /// Normalize one raw signal. Emits at most one event.
    pub fn correlate(&mut self, signal: RawSignal) -> Result<ActivityEvent, Dropped> {
        self.stats.received += 1;
        let source = signal.source();
        let timestamp = signal.timestamp();

        let event = match signal {
            RawSignal::Submission(event) => event,
            other => {
                let attributed = self.attribute(other).inspect_err(|reason| match reason {
                    Dropped::Filtered => self.stats.filtered += 1,
                    Dropped::Malformed => self.stats.malformed += 1,
                    Dropped::Suppressed => {}
                })?;
                ActivityEvent {
                    id: EventId::generate(),
                    user_id: self.user_id.clone(),
                    project_name: attributed.project.name,
                    project_path: attributed.project.path,
                    activity_type: attributed.activity_type,
                    activity_source: source,
                    timestamp,
                    command: attributed.command,
                    description: attributed.description,
                }
            }
        };

        let key = (event.project_name.clone(), event.project_path.clone(), source);
        if let Some(last) = self.last_emitted.get(&key) {
            if (timestamp - *last).abs() < self.quiescence {
                self.stats.suppressed += 1;
                tracing::trace!(project = %event.project_name, %source, "signal suppressed by quiescence window");
                return Err(Dropped::Suppressed);
            }
        }
        self.last_emitted.insert(key, timestamp);
        self.stats.emitted += 1;
        Ok(event)
    }

    fn attribute(&self, signal: RawSignal) -> Result<Attributed, Dropped> {
        match signal {
            RawSignal::ProcessStarted { pid, command, cwd, .. }
            | RawSignal::ProcessStopped { pid, command, cwd, .. }
                if command.trim().is_empty() =>
            {
                tracing::debug!(pid, ?cwd, "dropping process signal without command");
                Err(Dropped::Malformed)
            }
            RawSignal::ProcessStarted { pid, command, cwd, .. } => {
                self.attribute_process(pid, command, cwd, ActivityType::ProcessStart)
            }
            RawSignal::ProcessStopped { pid, command, cwd, .. } => {
                self.attribute_process(pid, command, cwd, ActivityType::ProcessStop)
            }
            RawSignal::NetworkCall {
                pid,
                host,
                path,
                method,
                cwd,
                ..
            } => {
                let method = method.trim().to_ascii_uppercase();
                if !matches!(method.as_str(), "POST" | "PUT" | "PATCH" | "DELETE") {
                    return Err(Dropped::Filtered);
                }
                if !self.policy.allows_network(&host, &path) {
                    return Err(Dropped::Filtered);
                }
                let project = cwd
                    .as_deref()
                    .map(ProjectIdentity::from_path)
                    .filter(|p| !p.is_unknown())
                    .or_else(|| ProjectIdentity::from_host(&host))
                    .ok_or_else(|| {
                        tracing::debug!(?pid, "dropping network signal without host");
                        Dropped::Malformed
                    })?;
                Ok(Attributed {
                    project,
                    activity_type: ActivityType::NetworkCall,
                    command: None,
                    description: Some(format!("{method} {host}{path}")),
                })
            }
            RawSignal::FileAccess {
                path,
                op,
                process_name,
                project_root,
                ..
            } => {
                if !self.policy.allows_file(&path) {
                    return Err(Dropped::Filtered);
                }
                let root = project_root.or_else(|| {
                    Path::new(&path)
                        .parent()
                        .and_then(|p| p.to_str())
                        .map(String::from)
                });
                let project = root
                    .as_deref()
                    .map(ProjectIdentity::from_path)
                    .filter(|p| !p.is_unknown())
                    .ok_or_else(|| {
                        tracing::debug!(path, "dropping file signal outside any project");
                        Dropped::Malformed
                    })?;
                let activity_type = match op {
                    FileOp::Read => ActivityType::FileRead,
                    FileOp::Write => ActivityType::FileWrite,
                };
                Ok(Attributed {
                    project,
                    activity_type,
                    command: process_name,
                    description: Some(path),
                })
            }
            RawSignal::Submission(_) => Err(Dropped::Malformed),
        }
    }

    fn attribute_process(
        &self,
        pid: u32,
        command: String,
        cwd: Option<String>,
        activity_type: ActivityType,
    ) -> Result<Attributed, Dropped> {
        if !self.policy.allows_process(&command) {
            return Err(Dropped::Filtered);
        }
        let project = cwd
            .as_deref()
            .map(ProjectIdentity::from_path)
            .filter(|p| !p.is_unknown())
            .ok_or_else(|| {
                tracing::debug!(pid, command, "dropping process signal without working directory");
                Dropped::Malformed
            })?;
        Ok(Attributed {
            project,
            activity_type,
            command: Some(command),
            description: None,
        })
    }

    /// Forget quiescence entries older than twice the window.
    pub fn prune(&mut self, now: DateTime<Utc>) -> usize {
        let horizon = self.quiescence * 2;
        let before = self.last_emitted.len();
        self.last_emitted.retain(|_, last| now - *last <= horizon);
        before - self.last_emitted.len()
    }
}
