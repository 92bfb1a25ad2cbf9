//! Worker-side hand-off: read the request file, run the engine, write the
//! result file.

use std::path::Path;

use lantern_core::engine::InferenceEngine;
use lantern_core::error::{Error, Result};
use lantern_core::handoff::{WorkerInput, WorkerOutput};
use tracing::{error, info};

async fn read_input(path: &Path) -> Result<WorkerInput> {
    let raw = tokio::fs::read(path)
        .await
        .map_err(|e| Error::Internal(format!("Failed to read {}: {e}", path.display())))?;
    Ok(serde_json::from_slice(&raw)?)
}

/// Write `output` next to `path` and rename it into place, so the parent never
/// sees a partial file.
async fn write_output(path: &Path, output: &WorkerOutput) -> Result<()> {
    let json = serde_json::to_vec(output)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json)
        .await
        .map_err(|e| Error::Internal(format!("Failed to write {}: {e}", tmp.display())))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| Error::Internal(format!("Failed to move result into {}: {e}", path.display())))
}

/// Run one hand-off. Engine and input failures become a failure payload; only
/// an unwritable output file is returned as an error.
pub async fn run_handoff(
    input_path: &Path,
    output_path: &Path,
    engine: &dyn InferenceEngine,
) -> Result<WorkerOutput> {
    let output = match read_input(input_path).await {
        Ok(input) => {
            info!(
                request_id = %input.request_id,
                engine = engine.name(),
                messages = input.conversation.len(),
                max_output_tokens = input.max_output_tokens,
                "Generating"
            );
            match engine
                .generate(&input.conversation, input.max_output_tokens)
                .await
            {
                Ok(generation) => {
                    info!(
                        request_id = %input.request_id,
                        duration_ms = generation.metadata.duration_ms,
                        "Generation complete"
                    );
                    WorkerOutput::from(generation)
                }
                Err(e) => {
                    error!(request_id = %input.request_id, error = %e, "Generation failed");
                    WorkerOutput::Failure {
                        error: e.to_string(),
                    }
                }
            }
        }
        Err(e) => {
            error!(path = %input_path.display(), error = %e, "Invalid hand-off input");
            WorkerOutput::Failure {
                error: format!("Invalid hand-off input: {e}"),
            }
        }
    };

    write_output(output_path, &output).await?;
    Ok(output)
}

/// Record a failure that happened before any engine could run, such as a
/// bad config or a model that would not load.
pub async fn report_failure(
    output_path: &Path,
    error: impl std::fmt::Display,
) -> Result<WorkerOutput> {
    error!(error = %error, "Worker could not start the engine");
    let output = WorkerOutput::Failure {
        error: error.to_string(),
    };
    write_output(output_path, &output).await?;
    Ok(output)
}
