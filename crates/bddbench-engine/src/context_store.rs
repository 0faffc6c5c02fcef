//! Durable run contexts shared between a write phase and its dependent
//! query or delete phases.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use bddbench_core::{BenchResult, ContextError, RunContext};
use tracing::info;

/// Writes `context` as pretty JSON, creating parent directories.
///
/// # Errors
///
/// Returns `BenchError::Io` or `BenchError::Serialization`.
pub async fn save(context: &RunContext, path: impl AsRef<Path>) -> BenchResult<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_vec_pretty(context)?;
    tokio::fs::write(path, json).await?;

    info!(
        path = %path.display(),
        run_id = %context.run_id,
        measurement = %context.measurement,
        target = %context.target.identity(),
        "Saved run context"
    );
    Ok(())
}

/// Reads and checks a context file.
///
/// # Errors
///
/// Returns `ContextError::Missing` when the file does not exist,
/// `ContextError::Unreadable` for other I/O failures and
/// `ContextError::Invalid` when the content does not describe a usable run.
pub async fn load(path: impl AsRef<Path>) -> Result<RunContext, ContextError> {
    let path = path.as_ref();
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(ContextError::Missing {
                path: path.to_path_buf(),
            })
        }
        Err(source) => {
            return Err(ContextError::Unreadable {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let invalid = |reason: String| ContextError::Invalid {
        path: path.to_path_buf(),
        reason,
    };
    let context: RunContext = serde_json::from_slice(&bytes).map_err(|e| invalid(e.to_string()))?;
    context.check().map_err(invalid)?;
    Ok(context)
}

/// [`load`], then require the context to describe `measurement`.
///
/// # Errors
///
/// As [`load`], plus `ContextError::MeasurementMismatch`.
pub async fn load_expecting(
    path: impl AsRef<Path>,
    measurement: &str,
) -> Result<RunContext, ContextError> {
    let context = load(path).await?;
    if context.measurement != measurement {
        return Err(ContextError::MeasurementMismatch {
            expected: measurement.to_string(),
            found: context.measurement,
        });
    }
    Ok(context)
}

/// Default context location for a scenario: `<report_dir>/<scenario_id>_context.json`.
#[must_use]
pub fn default_path(report_dir: &Path, scenario_id: &str) -> PathBuf {
    report_dir.join(format!("{scenario_id}_context.json"))
}
