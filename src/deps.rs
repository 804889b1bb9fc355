//! Build-dependency registration.
//!
//! Every source file a render pass touches (content JSON, component templates,
//! referenced partials, model scripts) is recorded here so an outer build tool
//! can watch exactly the inputs that influenced the output.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// Append-only, thread-safe set of touched source files.
///
/// Recording the same file twice is a no-op, so concurrent compilers and
/// content readers can register freely.
#[derive(Debug, Default)]
pub struct DependencyTracker {
    files: Mutex<BTreeSet<PathBuf>>,
}

impl DependencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, path: &Path) {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_path_buf());
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(path)
    }

    pub fn len(&self) -> usize {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of all recorded files, sorted.
    pub fn files(&self) -> Vec<PathBuf> {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}
