//! Submit command: the hook client.

use anyhow::{Context, Result};
use wh_core::ActivitySubmission;

use crate::api::{SubmitResponse, SubmitStatus};
use crate::client::DaemonClient;

/// Fields accepted on the command line.
#[derive(Debug, Clone, Default)]
pub struct SubmitArgs {
    pub project: String,
    pub path: Option<String>,
    pub activity_type: String,
    pub source: Option<String>,
    pub command: Option<String>,
    pub description: Option<String>,
}

impl SubmitArgs {
    /// Builds the submission, defaulting the project path to the current
    /// directory.
    pub fn into_submission(self) -> Result<ActivitySubmission> {
        let project_path = match self.path {
            Some(path) => path,
            None => std::env::current_dir()
                .context("failed to read current directory")?
                .to_string_lossy()
                .into_owned(),
        };
        Ok(ActivitySubmission {
            user_id: None,
            project_name: self.project,
            project_path,
            activity_type: self.activity_type,
            activity_source: self.source,
            timestamp: None,
            command: self.command,
            description: self.description,
        })
    }
}

pub fn describe(response: &SubmitResponse) -> String {
    match (response.status, &response.session_id, &response.work_block_id) {
        (SubmitStatus::Recorded, Some(session), Some(block)) => {
            format!("recorded in {session} / {block}")
        }
        (SubmitStatus::Recorded, _, _) => "recorded".to_string(),
        (SubmitStatus::Suppressed, _, _) => {
            "suppressed: same project and source seen moments ago".to_string()
        }
        (SubmitStatus::Filtered, _, _) => "filtered by the allow-list".to_string(),
    }
}

pub async fn run(client: &DaemonClient, args: SubmitArgs) -> Result<()> {
    let submission = args.into_submission()?;
    let response = client.submit(&submission).await?;
    tracing::debug!(?response, "activity submitted");
    println!("{}", describe(&response));
    Ok(())
}

#[cfg(test)]
mod tests {
    use wh_core::{SessionId, WorkBlockId};

    use super::*;

    #[test]
    fn submission_keeps_explicit_path() {
        let submission = SubmitArgs {
            project: "api".to_string(),
            path: Some("/src/api".to_string()),
            activity_type: "edit".to_string(),
            ..SubmitArgs::default()
        }
        .into_submission()
        .unwrap();
        assert_eq!(submission.project_path, "/src/api");
        assert_eq!(submission.activity_source, None);
        assert_eq!(submission.timestamp, None);
    }

    #[test]
    fn submission_defaults_path_to_cwd() {
        let submission = SubmitArgs {
            project: "api".to_string(),
            activity_type: "edit".to_string(),
            ..SubmitArgs::default()
        }
        .into_submission()
        .unwrap();
        assert!(!submission.project_path.is_empty());
    }

    #[test]
    fn describe_each_status() {
        let recorded = SubmitResponse {
            status: SubmitStatus::Recorded,
            session_id: Some(SessionId::new("session-1").unwrap()),
            work_block_id: Some(WorkBlockId::new("block-1").unwrap()),
        };
        assert_eq!(describe(&recorded), "recorded in session-1 / block-1");

        let suppressed = SubmitResponse {
            status: SubmitStatus::Suppressed,
            session_id: None,
            work_block_id: None,
        };
        assert!(describe(&suppressed).starts_with("suppressed"));
    }
}
