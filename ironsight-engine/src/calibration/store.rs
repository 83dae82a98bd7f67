//! Active calibration model
//!
//! Readers take an `Arc` snapshot and keep using it; a swap replaces the
//! pointer, so nobody ever observes a half-written transform.

use ironsight_common::events::CalibrationModel;
use std::sync::{Arc, RwLock};
use tracing::info;

use super::CalibrationError;

#[derive(Debug)]
pub struct ActiveModel {
    current: RwLock<Arc<CalibrationModel>>,
}

impl ActiveModel {
    /// Starts at the identity transform, version 0
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(CalibrationModel::identity(0))),
        }
    }

    pub fn current(&self) -> Arc<CalibrationModel> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    pub fn version(&self) -> u64 {
        self.current().version
    }

    /// Version a newly fitted model should carry
    pub fn next_version(&self) -> u64 {
        self.version() + 1
    }

    /// Atomically replace the active model
    ///
    /// Fails if `model.version` does not exceed the active version.
    pub fn install(&self, model: CalibrationModel) -> Result<Arc<CalibrationModel>, CalibrationError> {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        if model.version <= guard.version {
            return Err(CalibrationError::StaleVersion {
                active: guard.version,
                offered: model.version,
            });
        }
        info!(
            "Calibration model v{} active (n={}, mean {:.2} cm, max {:.2} cm)",
            model.version, model.n, model.mean_error_cm, model.max_error_cm
        );
        let model = Arc::new(model);
        *guard = Arc::clone(&model);
        Ok(model)
    }
}

impl Default for ActiveModel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_versions_only_move_forward() {
        let store = ActiveModel::new();
        assert_eq!(store.version(), 0);
        assert_eq!(store.next_version(), 1);

        store.install(CalibrationModel::identity(3)).unwrap();
        assert_eq!(store.version(), 3);

        assert_eq!(
            store.install(CalibrationModel::identity(3)).unwrap_err(),
            CalibrationError::StaleVersion {
                active: 3,
                offered: 3
            }
        );
        assert_eq!(store.version(), 3);
    }

    #[test]
    fn test_snapshot_survives_swap() {
        let store = ActiveModel::new();
        let before = store.current();
        store.install(CalibrationModel::identity(1)).unwrap();
        assert_eq!(before.version, 0);
        assert_eq!(store.current().version, 1);
    }
}
