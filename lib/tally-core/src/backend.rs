//! Backend capability.

use async_trait::async_trait;
use tally_error::GenericError;
use tokio::time::Instant;

/// Outcome of a successful submit.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SubmitSummary {
    /// Number of records transmitted.
    pub records_sent: usize,
}

/// A flush target.
///
/// Each call to [`submit`](Backend::submit) performs one complete flush cycle: the shared store is drained into records,
/// which are then serialized and transmitted before `deadline`. Draining happens before any I/O is attempted and is not
/// undone if transmission fails, so every sample is delivered at most once.
///
/// Draining an empty store results in no I/O at all and a summary with zero records sent.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Returns the name of this backend, for logging.
    fn name(&self) -> &'static str;

    /// Runs one flush cycle.
    ///
    /// # Errors
    ///
    /// If serialization fails, the transport cannot be reached, the deadline passes, or the remote end rejects the
    /// payload, an error is returned. The drained records are not retained.
    async fn submit(&self, deadline: Instant) -> Result<SubmitSummary, GenericError>;
}
