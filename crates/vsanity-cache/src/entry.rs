//! Cache entries and imperative patches.

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use crate::error::FetchError;
use crate::status::FetchStatus;

/// State tracked per cache key.
///
/// `status == Error` always comes with an `error`; every other status
/// has none.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    /// Last successful (or initial) value.
    pub value: T,
    /// Current status.
    pub status: FetchStatus,
    /// Wall-clock time of the last state transition.
    pub updated_at: DateTime<Utc>,
    /// Error from the last failed fetch.
    pub error: Option<FetchError>,
    /// Monotonic time of the last state transition, for windowed
    /// de-duplication. `None` when the transition predates the clock.
    pub(crate) touched: Option<Instant>,
}

impl<T> CacheEntry<T> {
    /// Create a fresh entry holding an initial value.
    pub fn initial(value: T) -> Self {
        Self {
            value,
            status: FetchStatus::Initialised,
            updated_at: Utc::now(),
            error: None,
            touched: Some(Instant::now()),
        }
    }

    /// Create an entry restored from a snapshot taken elsewhere.
    ///
    /// A `Loading` status cannot be restored without its request, so it
    /// falls back to `Initialised`.
    pub fn restored(
        value: T,
        status: FetchStatus,
        updated_at: DateTime<Utc>,
        error: Option<FetchError>,
    ) -> Self {
        let status = match status {
            FetchStatus::Loading => FetchStatus::Initialised,
            other => other,
        };
        let error = match status {
            FetchStatus::Error => Some(error.unwrap_or(FetchError::Unknown)),
            _ => None,
        };
        let age = (Utc::now() - updated_at).to_std().unwrap_or_default();

        Self {
            value,
            status,
            updated_at,
            error,
            touched: Instant::now().checked_sub(age),
        }
    }

    pub(crate) fn begin_loading(&mut self) {
        self.status = FetchStatus::Loading;
        self.error = None;
        self.touch();
    }

    pub(crate) fn resolve(&mut self, value: T, status: FetchStatus) {
        self.value = value;
        self.status = status;
        self.error = None;
        self.touch();
    }

    pub(crate) fn reject(&mut self, error: FetchError) {
        self.status = FetchStatus::Error;
        self.error = Some(error);
        self.touch();
    }

    pub(crate) fn apply(&mut self, patch: EntryPatch<T>) {
        let status = patch.status.unwrap_or(if patch.error.is_some() {
            FetchStatus::Error
        } else {
            self.status
        });

        if let Some(value) = patch.value {
            self.value = value;
        }
        self.error = match status {
            FetchStatus::Error => Some(
                patch
                    .error
                    .or_else(|| self.error.take())
                    .unwrap_or(FetchError::Unknown),
            ),
            _ => None,
        };
        self.status = status;
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
        self.touched = Some(Instant::now());
    }
}

/// Partial overwrite of an entry, applied without running the fetcher.
///
/// Fields left as `None` keep their current value, except `error`, which
/// is cleared unless the resulting status is `Error`.
#[derive(Debug, Clone)]
pub struct EntryPatch<T> {
    /// New value.
    pub value: Option<T>,
    /// New status.
    pub status: Option<FetchStatus>,
    /// New error; implies `Error` status when no status is given.
    pub error: Option<FetchError>,
}

impl<T> Default for EntryPatch<T> {
    fn default() -> Self {
        Self {
            value: None,
            status: None,
            error: None,
        }
    }
}

impl<T> EntryPatch<T> {
    /// Create an empty patch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Patch that replaces only the value.
    pub fn value(value: T) -> Self {
        Self {
            value: Some(value),
            ..Self::default()
        }
    }

    /// Set the value.
    pub fn with_value(mut self, value: T) -> Self {
        self.value = Some(value);
        self
    }

    /// Set the status.
    pub fn with_status(mut self, status: FetchStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Set the error.
    pub fn with_error(mut self, error: FetchError) -> Self {
        self.error = Some(error);
        self
    }
}
