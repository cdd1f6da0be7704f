use std::io;
use std::path::PathBuf;

use crate::models::Submission;

/// Writes a non-authoritative JSON copy of each submission to
/// `<root>/<YYYY-MM-DD>/<form_id>_<id>.json`. Nothing reads these back.
#[derive(Debug, Clone)]
pub struct BackupWriter {
    root: PathBuf,
}

impl BackupWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, submission: &Submission) -> PathBuf {
        self.root
            .join(submission.submitted_at.format("%Y-%m-%d").to_string())
            .join(format!("{}_{}.json", submission.form_id, submission.id))
    }

    pub async fn write(&self, submission: &Submission) -> io::Result<PathBuf> {
        let path = self.path_for(submission);
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let body = serde_json::to_vec_pretty(submission).map_err(io::Error::other)?;
        tokio::fs::write(&path, body).await?;
        Ok(path)
    }
}
