//! Project identity derived from paths and hosts.

use std::path::Path;

/// Name used when nothing about the signal identifies a project.
pub const UNKNOWN_PROJECT: &str = "unknown";

/// Project identity attached to work blocks.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProjectIdentity {
    pub name: String,
    pub path: String,
}

/// Normalize a filesystem path for use as a project key.
///
/// Collapses repeated separators and `.` segments and strips trailing
/// slashes. `..` is left alone since resolving it needs the filesystem.
pub fn normalize_path(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    let absolute = trimmed.starts_with('/');
    let parts: Vec<&str> = trimmed
        .split('/')
        .filter(|seg| !seg.is_empty() && *seg != ".")
        .collect();

    let joined = parts.join("/");
    match (absolute, joined.is_empty()) {
        (true, true) => "/".to_string(),
        (true, false) => format!("/{joined}"),
        (false, _) => joined,
    }
}

/// Last non-empty component of a path, or [`UNKNOWN_PROJECT`].
pub fn project_name_from_path(path: &str) -> String {
    Path::new(&normalize_path(path))
        .file_name()
        .and_then(|n| n.to_str())
        .map_or_else(|| UNKNOWN_PROJECT.to_string(), String::from)
}

impl ProjectIdentity {
    /// Identity rooted at a directory, named after its last component.
    pub fn from_path(path: &str) -> Self {
        Self {
            name: project_name_from_path(path),
            path: normalize_path(path),
        }
    }

    /// Identity for network traffic with no known working directory.
    ///
    /// The host becomes both the name and a pseudo-path so blocks for
    /// different hosts never merge.
    pub fn from_host(host: &str) -> Option<Self> {
        let host = host.trim().trim_end_matches('.').to_ascii_lowercase();
        let host = host.split(':').next().unwrap_or_default();
        if host.is_empty() {
            return None;
        }
        Some(Self {
            name: host.to_string(),
            path: format!("host://{host}"),
        })
    }

    pub fn is_unknown(&self) -> bool {
        self.name == UNKNOWN_PROJECT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/home/dev/api/"), "/home/dev/api");
        assert_eq!(normalize_path("/home//dev/./api"), "/home/dev/api");
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path("  "), "");
        assert_eq!(normalize_path("rel/dir/"), "rel/dir");
    }

    #[test]
    fn test_project_name_from_path() {
        assert_eq!(project_name_from_path("/home/dev/time-tracker"), "time-tracker");
        assert_eq!(project_name_from_path("/home/dev/api///"), "api");
        assert_eq!(project_name_from_path("/"), UNKNOWN_PROJECT);
        assert_eq!(project_name_from_path(""), UNKNOWN_PROJECT);
    }

    #[test]
    fn test_identity_from_host() {
        let identity = ProjectIdentity::from_host("API.GitHub.com:443").unwrap();
        assert_eq!(identity.name, "api.github.com");
        assert_eq!(identity.path, "host://api.github.com");
        assert!(ProjectIdentity::from_host("").is_none());
    }

    #[test]
    fn test_identity_from_root_is_unknown() {
        assert!(ProjectIdentity::from_path("/").is_unknown());
        assert!(!ProjectIdentity::from_path("/srv/app").is_unknown());
    }
}
