//! JSON output of a run report.
//!
//! Files are organized by run date, named by run time:
//! ```text
//! output_dir/
//! └── 2025-05-06/
//!     └── 073000.json
//! ```

use crate::models::PipelineReport;
use std::error::Error;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{error, info, instrument};

/// Path the report is written to: `{output_dir}/{local_date}/{HHMMSS}.json`.
pub fn report_path(report: &PipelineReport, output_dir: impl AsRef<Path>) -> PathBuf {
    let stamp: String = report.local_time.chars().filter(char::is_ascii_digit).collect();
    output_dir
        .as_ref()
        .join(&report.local_date)
        .join(format!("{stamp}.json"))
}

/// Serialize `report` and write it under `output_dir`, creating the dated directory.
#[instrument(level = "info", skip_all, fields(output_dir = %output_dir.as_ref().display()))]
pub async fn write_report(
    report: &PipelineReport,
    output_dir: impl AsRef<Path>,
) -> Result<PathBuf, Box<dyn Error>> {
    let json = serde_json::to_string_pretty(report)?;
    let path = report_path(report, &output_dir);

    if let Some(dir) = path.parent() {
        info!(dir = %dir.display(), "Ensuring report directory exists");
        if let Err(e) = fs::create_dir_all(dir).await {
            error!(dir = %dir.display(), error = %e, "Failed to create report dir");
            return Err(e.into());
        }
    }

    fs::write(&path, json).await?;
    info!(path = %path.display(), entries = report.entries.len(), "Wrote report");
    Ok(path)
}
