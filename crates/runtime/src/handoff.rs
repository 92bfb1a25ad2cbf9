//! Per-request hand-off files.
//!
//! Each request gets `request-{id}.json` (written by the front end) and
//! `result-{id}.json` (written by the worker) in the hand-off directory. Both
//! are removed when [`HandoffFiles`] is dropped, whatever the outcome.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use lantern_core::handoff::{WorkerInput, WorkerOutput};
use tracing::warn;
use uuid::Uuid;

use crate::error::WorkerError;

#[derive(Debug)]
pub struct HandoffFiles {
    request_id: String,
    input: PathBuf,
    output: PathBuf,
}

impl HandoffFiles {
    /// Reserve file names under a fresh request id. Nothing is written yet.
    pub fn new(dir: &Path) -> Self {
        let request_id = Uuid::new_v4().to_string();
        Self {
            input: dir.join(format!("request-{request_id}.json")),
            output: dir.join(format!("result-{request_id}.json")),
            request_id,
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn input_path(&self) -> &Path {
        &self.input
    }

    pub fn output_path(&self) -> &Path {
        &self.output
    }

    pub async fn write_input(&self, input: &WorkerInput) -> Result<(), WorkerError> {
        if let Some(parent) = self.input.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| WorkerError::Handoff(format!("{}: {e}", parent.display())))?;
        }
        let json = serde_json::to_vec(input).map_err(|e| WorkerError::Handoff(e.to_string()))?;
        tokio::fs::write(&self.input, json)
            .await
            .map_err(|e| WorkerError::Handoff(format!("{}: {e}", self.input.display())))
    }

    /// The worker's result, or `None` if it never wrote one.
    pub async fn read_output(&self) -> Result<Option<WorkerOutput>, WorkerError> {
        let raw = match tokio::fs::read(&self.output).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(WorkerError::Handoff(format!("{}: {e}", self.output.display())));
            }
        };
        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|e| WorkerError::InvalidOutput(e.to_string()))
    }
}

impl Drop for HandoffFiles {
    fn drop(&mut self) {
        let partial = self.output.with_extension("json.tmp");
        for path in [&self.input, &self.output, &partial] {
            if let Err(e) = std::fs::remove_file(path) {
                if e.kind() != ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "Failed to remove hand-off file");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lantern_core::message::{Conversation, Message};

    #[tokio::test]
    async fn files_are_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let files = HandoffFiles::new(dir.path());
        files
            .write_input(&WorkerInput {
                request_id: files.request_id().to_string(),
                conversation: Conversation::new(vec![Message::user("hi")]),
                max_output_tokens: 16,
            })
            .await
            .unwrap();
        std::fs::write(files.output_path(), br#"{"status":"failure","error":"x"}"#).unwrap();

        let (input, output) = (files.input_path().to_path_buf(), files.output_path().to_path_buf());
        assert!(input.exists() && output.exists());
        drop(files);
        assert!(!input.exists());
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn names_are_unique_per_request() {
        let dir = tempfile::tempdir().unwrap();
        let a = HandoffFiles::new(dir.path());
        let b = HandoffFiles::new(dir.path());
        assert_ne!(a.request_id(), b.request_id());
        assert_ne!(a.input_path(), b.input_path());
        assert!(a.input_path().file_name().unwrap().to_str().unwrap().starts_with("request-"));
    }

    #[tokio::test]
    async fn missing_output_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let files = HandoffFiles::new(dir.path());
        assert!(files.read_output().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn garbage_output_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let files = HandoffFiles::new(dir.path());
        std::fs::write(files.output_path(), "{not json").unwrap();
        assert!(matches!(
            files.read_output().await,
            Err(WorkerError::InvalidOutput(_))
        ));
    }
}
