// src/stage.rs - Common request interface of the pipeline stages
use crate::error::Result;
use crate::value::{deliver, PendingValue, ValueCallback};

/// A stage that can be asked for the current value of one of its identifiers
///
/// Resolution happens synchronously in [`request`](ValueSource::request): an
/// unknown identifier is reported as an error there and never reaches the
/// callback. The value itself always arrives later.
pub trait ValueSource: Send + Sync {
    /// Stage name for logs
    fn stage_name(&self) -> &'static str;

    /// Whether `id` is registered in this stage
    fn contains(&self, id: &str) -> bool;

    /// Resolve `id` and return its pending value
    fn request(&self, id: &str) -> Result<PendingValue>;

    /// Resolve `id` and deliver its outcome to `callback` from a runtime task
    ///
    /// Must be called from within a tokio runtime; otherwise it fails with
    /// [`VigilError::Config`](crate::error::VigilError::Config) and the
    /// callback never runs.
    fn get_value(&self, id: &str, callback: ValueCallback) -> Result<()> {
        deliver(self.request(id)?, callback)
    }
}
