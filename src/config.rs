//! Repository configuration module.
//!
//! Handles loading, validating, and merging `pages.toml`. Stock defaults are
//! serialized to a TOML table and the user's file is merged on top, so a
//! config file only needs the keys it changes.
//!
//! ## Config File Location
//!
//! Place `pages.toml` at the repository root:
//!
//! ```text
//! repository/
//! ├── pages.toml               # Overrides stock defaults
//! ├── apps/site/...            # Components
//! ├── content/site/...         # Content
//! └── models/...               # Shared model modules
//! ```
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! project = "site"              # Names apps/<project> and content/<project>
//! content_dir = "content"
//! apps_dir = "apps"
//! models_dir = "models"
//! page_type = "cq/Page"         # Resource type rendered as a page
//! page_content = "jcr:content"  # Page child the entry template renders
//! model_file = "model.json"     # Model script inside a component directory
//! strict_models = false         # Missing component model is a node failure
//! max_content_depth = 64        # Nesting limit while flattening content
//! max_render_depth = 32         # Nesting limit for resource/file inclusion
//!
//! [components]
//! pattern = "^site/components/(teaser|card)$"  # Render matching resources standalone
//! selector = "loader"                          # Template variant used for them
//!
//! [bindings]
//! site_name = "Example"         # Static values visible to every component
//!
//! [processing]
//! max_processes = 4             # Max parallel workers (omit for auto = CPU cores)
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::bindings::MODEL_BINDING;
use crate::globals::STRUCTURAL_VARS;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Config file name looked up at the repository root.
pub const CONFIG_FILE: &str = "pages.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid components.pattern: {0}")]
    Pattern(#[from] regex::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Repository configuration loaded from `pages.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SiteConfig {
    /// Project name: the directory below both the apps and content dirs.
    pub project: String,
    pub content_dir: String,
    pub apps_dir: String,
    /// Directory searched for model modules imported by templates.
    pub models_dir: String,
    /// Resources of this type are rendered as pages.
    pub page_type: String,
    /// Child of a page holding its content.
    pub page_content: String,
    /// Reserved model script name inside a component directory.
    pub model_file: String,
    /// Treat a component without a model as a failure instead of a null model.
    pub strict_models: bool,
    pub max_content_depth: usize,
    pub max_render_depth: usize,
    /// Standalone component rendering.
    pub components: ComponentsConfig,
    /// Static custom bindings visible to every component render.
    pub bindings: BTreeMap<String, Value>,
    /// Parallel processing settings.
    pub processing: ProcessingConfig,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            project: "site".to_string(),
            content_dir: "content".to_string(),
            apps_dir: "apps".to_string(),
            models_dir: "models".to_string(),
            page_type: "cq/Page".to_string(),
            page_content: "jcr:content".to_string(),
            model_file: "model.json".to_string(),
            strict_models: false,
            max_content_depth: 64,
            max_render_depth: 32,
            components: ComponentsConfig::default(),
            bindings: BTreeMap::new(),
            processing: ProcessingConfig::default(),
        }
    }
}

impl SiteConfig {
    /// Validate config values are usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("project", &self.project),
            ("content_dir", &self.content_dir),
            ("apps_dir", &self.apps_dir),
            ("page_type", &self.page_type),
            ("page_content", &self.page_content),
            ("model_file", &self.model_file),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::Validation(format!("{name} must not be empty")));
            }
        }
        if self.page_content.contains('/') {
            return Err(ConfigError::Validation(
                "page_content must be a single child name".into(),
            ));
        }
        if self.max_content_depth == 0 || self.max_render_depth == 0 {
            return Err(ConfigError::Validation(
                "max_content_depth and max_render_depth must be non-zero".into(),
            ));
        }
        if self.components.selector.trim().is_empty() {
            return Err(ConfigError::Validation(
                "components.selector must not be empty".into(),
            ));
        }
        for name in self.bindings.keys() {
            if name == MODEL_BINDING || STRUCTURAL_VARS.contains(&name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "bindings.{name} uses a reserved name"
                )));
            }
        }
        self.components.matcher()?;
        Ok(())
    }

    /// Resolve the directory layout against a repository root.
    pub fn layout(&self, repo_dir: &Path) -> RepoLayout {
        let source_root = repo_dir.join(&self.apps_dir);
        RepoLayout {
            repo_dir: repo_dir.to_path_buf(),
            shared_root: source_root.join(&self.project),
            source_root,
            content_root: Path::new(&self.content_dir).join(&self.project),
            models_dir: repo_dir.join(&self.models_dir),
        }
    }
}

/// Standalone component rendering settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ComponentsConfig {
    /// Regex over resource types. When absent, no components are rendered on their own.
    pub pattern: Option<String>,
    /// Selector naming the template variant used for standalone renders.
    pub selector: String,
}

impl Default for ComponentsConfig {
    fn default() -> Self {
        Self {
            pattern: None,
            selector: "loader".to_string(),
        }
    }
}

impl ComponentsConfig {
    /// Compiled pattern, `None` when standalone rendering is off.
    pub fn matcher(&self) -> Result<Option<Regex>, ConfigError> {
        self.pattern
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(ConfigError::from)
    }
}

/// Parallel processing settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of parallel render workers.
    /// When absent or null, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    pub max_processes: Option<usize>,
}

/// Resolve the effective thread count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config.max_processes.map(|n| n.min(cores)).unwrap_or(cores)
}

/// Absolute directories a render pass works with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoLayout {
    pub repo_dir: PathBuf,
    /// `<repo>/<apps_dir>`: resource types are relative to this.
    pub source_root: PathBuf,
    /// `<repo>/<apps_dir>/<project>`: components and shared includes.
    pub shared_root: PathBuf,
    /// `<content_dir>/<project>`, relative to the repository.
    pub content_root: PathBuf,
    pub models_dir: PathBuf,
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the canonical representation of all default values, used as the
/// base layer for merging user overrides on top.
pub fn stock_defaults_value() -> toml::Value {
    toml::Value::try_from(SiteConfig::default()).expect("default config must serialize")
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load `pages.toml` from a directory as a raw TOML value.
///
/// Returns `Ok(None)` if no config file exists in the directory.
pub fn load_raw_config(root: &Path) -> Result<Option<toml::Value>, ConfigError> {
    let config_path = root.join(CONFIG_FILE);
    if !config_path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&config_path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto the stock defaults, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<SiteConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: SiteConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from `pages.toml` in the repository root.
pub fn load_config(root: &Path) -> Result<SiteConfig, ConfigError> {
    let base = stock_defaults_value();
    let overlay = load_raw_config(root)?;
    resolve_config(base, overlay)
}

/// Returns a fully-commented stock `pages.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# Repository Pages Configuration
# ==============================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
# Unknown keys will cause an error.

# Project name. Components live in <apps_dir>/<project>,
# content in <content_dir>/<project>.
project = "site"

# Directory layout, relative to the repository root.
content_dir = "content"
apps_dir = "apps"
models_dir = "models"

# Resources with this resource type are rendered as pages.
page_type = "cq/Page"

# Child of each page that the page render starts from.
page_content = "jcr:content"

# Model script looked up inside each component directory.
model_file = "model.json"

# When true, rendering a component without a model is a node failure.
# When false, the component sees a null `model`.
strict_models = false

# Maximum nesting of objects inside content files.
max_content_depth = 64

# Maximum nesting of resource and file inclusion while rendering.
max_render_depth = 32

# ---------------------------------------------------------------------------
# Standalone component rendering
# ---------------------------------------------------------------------------
[components]
# Resources whose type matches this regex are rendered on their own,
# using the template variant named by `selector`. Resources whose
# component has no such variant are skipped.
# pattern = "^site/components/teaser$"
selector = "loader"

# ---------------------------------------------------------------------------
# Custom bindings
# ---------------------------------------------------------------------------
[bindings]
# Static values visible to every component template by name.
# `model` and the structural variables are reserved.
# site_name = "Example"

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum parallel render workers.
# Omit or comment out to auto-detect (= number of CPU cores).
# max_processes = 4
"##
}

/// Static custom bindings in the form the bindings provider takes.
pub fn static_bindings(config: &SiteConfig) -> Vec<(String, crate::bindings::Binding)> {
    config
        .bindings
        .iter()
        .map(|(name, value)| (name.clone(), value.clone().into()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn default_config_layout_names() {
        let config = SiteConfig::default();
        assert_eq!(config.project, "site");
        assert_eq!(config.page_type, "cq/Page");
        assert_eq!(config.page_content, "jcr:content");
        assert_eq!(config.components.selector, "loader");
        assert!(config.components.pattern.is_none());
    }

    #[test]
    fn parse_partial_config() {
        let toml = r#"
project = "shop"

[components]
pattern = "^shop/components/card$"
"#;
        let config: SiteConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.project, "shop");
        assert_eq!(config.components.pattern.as_deref(), Some("^shop/components/card$"));
        // Defaults preserved
        assert_eq!(config.components.selector, "loader");
        assert_eq!(config.max_render_depth, 32);
    }

    #[test]
    fn layout_resolves_directories() {
        let config = SiteConfig::default();
        let layout = config.layout(Path::new("/repo"));
        assert_eq!(layout.source_root, PathBuf::from("/repo/apps"));
        assert_eq!(layout.shared_root, PathBuf::from("/repo/apps/site"));
        assert_eq!(layout.content_root, PathBuf::from("content/site"));
        assert_eq!(layout.models_dir, PathBuf::from("/repo/models"));
    }

    // =========================================================================
    // load_config tests
    // =========================================================================

    #[test]
    fn load_config_returns_default_when_no_file() {
        let tmp = TempDir::new().unwrap();
        let config = load_config(tmp.path()).unwrap();
        assert_eq!(config.project, "site");
    }

    #[test]
    fn load_config_reads_bindings() {
        let tmp = TempDir::new().unwrap();
        fs::write(
            tmp.path().join(CONFIG_FILE),
            r#"
[bindings]
site_name = "Demo"
year = 2024
"#,
        )
        .unwrap();
        let config = load_config(tmp.path()).unwrap();
        assert_eq!(config.bindings["site_name"], json!("Demo"));
        assert_eq!(config.bindings["year"], json!(2024));
        assert_eq!(static_bindings(&config).len(), 2);
    }

    #[test]
    fn load_config_rejects_unknown_keys() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(CONFIG_FILE), "projcet = \"typo\"\n").unwrap();
        assert!(matches!(load_config(tmp.path()), Err(ConfigError::Toml(_))));
    }

    #[test]
    fn load_config_rejects_invalid_toml() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(CONFIG_FILE), "project = ").unwrap();
        assert!(matches!(load_config(tmp.path()), Err(ConfigError::Toml(_))));
    }

    #[test]
    fn reserved_binding_name_is_rejected() {
        let mut config = SiteConfig::default();
        config.bindings.insert("model".into(), json!(1));
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));

        let mut config = SiteConfig::default();
        config.bindings.insert("page_properties".into(), json!(1));
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        let mut config = SiteConfig::default();
        config.components.pattern = Some("(unclosed".into());
        assert!(matches!(config.validate(), Err(ConfigError::Pattern(_))));
    }

    #[test]
    fn zero_depth_is_rejected() {
        let mut config = SiteConfig::default();
        config.max_render_depth = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn merge_keeps_unrelated_defaults() {
        let base = stock_defaults_value();
        let overlay: toml::Value = toml::from_str("[components]\nselector = \"card\"\n").unwrap();
        let config = resolve_config(base, Some(overlay)).unwrap();
        assert_eq!(config.components.selector, "card");
        assert_eq!(config.page_type, "cq/Page");
    }

    #[test]
    fn stock_config_parses_to_defaults() {
        let config: SiteConfig = toml::from_str(stock_config_toml()).unwrap();
        let defaults = SiteConfig::default();
        assert_eq!(config.project, defaults.project);
        assert_eq!(config.max_content_depth, defaults.max_content_depth);
        assert_eq!(config.components.selector, defaults.components.selector);
        config.validate().unwrap();
    }

    #[test]
    fn effective_threads_clamps_to_cores() {
        let cores = effective_threads(&ProcessingConfig::default());
        assert!(cores >= 1);
        let one = effective_threads(&ProcessingConfig {
            max_processes: Some(1),
        });
        assert_eq!(one, 1);
    }
}
