//! `lantern worker` — One generation in a child process.
//!
//! Spawned by the scheduler with `--input`/`--output`. Exits 1 after writing a
//! failure payload, so the parent sees both the status and the reason.

use std::path::PathBuf;

use lantern_config::AppConfig;
use lantern_core::handoff::WorkerOutput;
use tracing::{debug, warn};

pub async fn run(input: PathBuf, output: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    debug!(input = %input.display(), output = %output.display(), "Worker starting");
    let result = match AppConfig::load() {
        Ok(config) => match lantern_engine::build_engine(&config.engine) {
            Ok(engine) => lantern_engine::run_handoff(&input, &output, engine.as_ref()).await?,
            Err(e) => lantern_engine::report_failure(&output, e).await?,
        },
        Err(e) => {
            lantern_engine::report_failure(&output, format!("Failed to load config: {e}")).await?
        }
    };

    if let WorkerOutput::Failure { error } = &result {
        warn!(error = %error, "Worker finished without a reply");
        std::process::exit(1);
    }
    Ok(())
}
