//! Normalized activity events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::activity_type::{ActivitySource, ActivityType};
use crate::project::normalize_path;
use crate::types::{EventId, UserId, ValidationError};

/// The canonical, source-agnostic unit the engine folds into sessions and
/// work blocks.
///
/// Events are ephemeral: only the counters and histograms they increment are
/// ever persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub id: EventId,
    pub user_id: UserId,
    pub project_name: String,
    pub project_path: String,
    pub activity_type: ActivityType,
    pub activity_source: ActivitySource,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Wire shape of an explicit submission, as accepted on the hook channel.
///
/// Everything arrives as loosely-typed strings; [`ActivitySubmission::into_event`]
/// validates and normalizes it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivitySubmission {
    #[serde(default)]
    pub user_id: Option<String>,
    pub project_name: String,
    #[serde(default)]
    pub project_path: String,
    pub activity_type: String,
    #[serde(default)]
    pub activity_source: Option<String>,
    /// Defaults to the receive time when absent.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl ActivitySubmission {
    /// Converts the submission into a normalized event.
    ///
    /// `default_user` fills in a missing user, `received_at` a missing
    /// timestamp. The source defaults to [`ActivitySource::Hook`].
    pub fn into_event(
        self,
        default_user: &UserId,
        received_at: DateTime<Utc>,
    ) -> Result<ActivityEvent, ValidationError> {
        let user_id = match self.user_id {
            Some(raw) => UserId::new(raw)?,
            None => default_user.clone(),
        };

        let project_name = self.project_name.trim().to_string();
        if project_name.is_empty() {
            return Err(ValidationError::Empty {
                field: "project name",
            });
        }

        let activity_source = match self.activity_source {
            Some(raw) => raw.parse()?,
            None => ActivitySource::Hook,
        };

        Ok(ActivityEvent {
            id: EventId::generate(),
            user_id,
            project_name,
            project_path: normalize_path(&self.project_path),
            activity_type: self.activity_type.parse()?,
            activity_source,
            timestamp: self.timestamp.unwrap_or(received_at),
            command: self.command.filter(|c| !c.trim().is_empty()),
            description: self.description.filter(|d| !d.trim().is_empty()),
        })
    }
}
