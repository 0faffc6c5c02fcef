//! Operation clients: one HTTP interaction in, one [`Sample`] out.
//!
//! Nothing here returns an error. Connectivity failures and non-2xx answers
//! become failed samples so a pool can keep going.

mod delete;
mod probe;
mod query;
mod user;
mod write;

use std::time::Instant;

use bddbench_core::{OperationKind, Sample};
use tracing::debug;

use crate::api::ApiResponse;
use crate::error::TransportResult;

pub use delete::DeleteClient;
pub use probe::ProbeClient;
pub use query::QueryClient;
pub use user::UserClient;
pub use write::WriteClient;

/// Converts a finished call into a sample timed from `started`.
pub(crate) fn sample_from(
    kind: OperationKind,
    started: Instant,
    result: &TransportResult<ApiResponse>,
) -> Sample {
    let duration = started.elapsed();
    match result {
        Ok(response) => Sample::from_status(kind, duration, response.status, &response.body),
        Err(err) => {
            debug!(kind = %kind, error = %err, "Call failed without response");
            Sample::failure(kind, duration, None, err.to_string())
        }
    }
}
