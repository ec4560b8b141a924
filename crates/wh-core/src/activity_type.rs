//! Activity type and source vocabularies.
//!
//! Both enums round-trip through their string form, which is what lands in
//! storage and in the per-block activity histogram.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::types::ValidationError;

/// What kind of work an activity represents.
///
/// Producers and hook clients may send any non-empty label; unrecognized
/// labels are kept verbatim as [`ActivityType::Other`] so reporting can still
/// bucket them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ActivityType {
    Command,
    Edit,
    Query,
    FileRead,
    FileWrite,
    NetworkCall,
    ProcessStart,
    ProcessStop,
    Other(String),
}

impl ActivityType {
    /// String representation used for storage and histogram keys.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Command => "command",
            Self::Edit => "edit",
            Self::Query => "query",
            Self::FileRead => "file_read",
            Self::FileWrite => "file_write",
            Self::NetworkCall => "network_call",
            Self::ProcessStart => "process_start",
            Self::ProcessStop => "process_stop",
            Self::Other(label) => label,
        }
    }
}

impl fmt::Display for ActivityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivityType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let label = s.trim().to_ascii_lowercase();
        let parsed = match label.as_str() {
            "" => {
                return Err(ValidationError::Empty {
                    field: "activity type",
                });
            }
            "command" | "bash" => Self::Command,
            "edit" | "write" => Self::Edit,
            "query" | "read" | "search" => Self::Query,
            "file_read" => Self::FileRead,
            "file_write" => Self::FileWrite,
            "network_call" | "claude_post_work" => Self::NetworkCall,
            "process_start" | "claude_process_started" => Self::ProcessStart,
            "process_stop" | "claude_process_stopped" => Self::ProcessStop,
            _ => Self::Other(label),
        };
        Ok(parsed)
    }
}

impl Serialize for ActivityType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ActivityType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Which producer a signal came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ActivitySource {
    /// Tool process lifecycle watcher.
    Process,
    /// Outbound network traffic watcher.
    Network,
    /// File activity watcher.
    File,
    /// Explicit submission over the hook channel.
    Hook,
}

impl ActivitySource {
    /// All sources, in the order the engine polls their channels.
    pub const ALL: [Self; 4] = [Self::Process, Self::Network, Self::File, Self::Hook];

    /// String representation for storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Process => "process",
            Self::Network => "network",
            Self::File => "file",
            Self::Hook => "hook",
        }
    }
}

impl fmt::Display for ActivitySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivitySource {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "process" | "process_monitor" | "enhanced_process_monitor" => Ok(Self::Process),
            "network" | "http_monitor" | "http_post_monitor" => Ok(Self::Network),
            "file" | "file_monitor" | "enhanced_file_monitor" => Ok(Self::File),
            "hook" | "claude_hook" | "cli" => Ok(Self::Hook),
            other => Err(ValidationError::InvalidActivitySource {
                value: other.to_string(),
            }),
        }
    }
}

impl Serialize for ActivitySource {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ActivitySource {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
