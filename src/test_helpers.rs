//! Shared test utilities for the repo-pages test suite.
//!
//! Provides fixture setup, renderer construction, and content-repository
//! builders for tests that need a tree on disk.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let tmp = setup_fixtures();
//! let output = fixture_renderer(tmp.path()).render().unwrap();
//! assert_html_contains(&output, "/content/site.html", "<title>Home</title>");
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use crate::site::{SiteOutput, SiteRenderer};

// =========================================================================
// Fixture setup
// =========================================================================

/// Copy `fixtures/` to a temp directory and return it.
///
/// The sample repository lands at `<tmp>/repository`. Tests get an isolated
/// copy they can mutate without affecting other tests or the source fixtures.
pub fn setup_fixtures() -> TempDir {
    let tmp = TempDir::new().unwrap();
    let fixtures = Path::new(env!("CARGO_MANIFEST_DIR")).join("fixtures");
    copy_dir_recursive(&fixtures, tmp.path()).unwrap();
    tmp
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> std::io::Result<()> {
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());

        if src_path.is_dir() {
            fs::create_dir_all(&dst_path)?;
            copy_dir_recursive(&src_path, &dst_path)?;
        } else {
            fs::copy(&src_path, &dst_path)?;
        }
    }
    Ok(())
}

/// Renderer for the fixture repository copied by [`setup_fixtures`].
pub fn fixture_renderer(root: &Path) -> SiteRenderer {
    SiteRenderer::from_repo(root.join("repository")).unwrap()
}

// =========================================================================
// In-code repositories
// =========================================================================

/// Write `body` to `root/rel`, creating parent directories.
pub fn write_file(root: &Path, rel: &str, body: &str) -> PathBuf {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, body).unwrap();
    path
}

/// Write a component template at `apps/<resource_type>/<file>`.
pub fn write_component(root: &Path, resource_type: &str, file: &str, body: &str) -> PathBuf {
    write_file(root, &format!("apps/{resource_type}/{file}"), body)
}

// =========================================================================
// Output assertions
// =========================================================================

/// Assert an output exists and contains `needle`. Panics with the HTML on miss.
pub fn assert_html_contains(output: &SiteOutput, path: &str, needle: &str) {
    let html = output.get(path).unwrap_or_else(|| {
        let available: Vec<&String> = output.files.keys().collect();
        panic!("output '{path}' not rendered. Available: {available:?}")
    });
    assert!(
        html.contains(needle),
        "output '{path}' does not contain {needle:?}:\n{html}"
    );
}
