use super::model::BandwidthAccumulator;
use crate::error::Result;
use common::{LockMode, LockedFile, RetryPolicy};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const ACCUMULATOR_FILE: &str = "accumulator.json";

/// Durable home of the [`BandwidthAccumulator`].
///
/// Reads take a shared `flock` and writes an exclusive one, so other
/// processes that honour the lock never see a half-written document.
#[derive(Debug, Clone)]
pub struct AccumulatorStore {
    path: PathBuf,
    retry: RetryPolicy,
}

impl AccumulatorStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            path: dir.as_ref().join(ACCUMULATOR_FILE),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the persisted accumulator.
    ///
    /// A missing or undecodable document is `Ok(None)`: the caller starts
    /// from a fresh accumulator. Failing to open or lock the file is an
    /// error.
    pub fn load(&self) -> Result<Option<BandwidthAccumulator>> {
        let mut file = match LockedFile::acquire(&self.path, LockMode::Shared, &self.retry) {
            Ok(file) => file,
            Err(e) if e.is_not_found() => {
                debug!(path = %self.path.display(), "no persisted accumulator");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let content = file.read_to_string()?;
        match serde_json::from_str::<BandwidthAccumulator>(&content) {
            Ok(accumulator) => Ok(Some(accumulator)),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "discarding undecodable accumulator");
                Ok(None)
            }
        }
    }

    /// Replaces the persisted document with `accumulator` and syncs it.
    pub fn save(&self, accumulator: &BandwidthAccumulator) -> Result<()> {
        let mut content = serde_json::to_vec_pretty(accumulator)?;
        content.push(b'\n');

        let mut file = LockedFile::acquire(&self.path, LockMode::Exclusive, &self.retry)?;
        file.replace_contents(&content)?;
        Ok(())
    }
}
