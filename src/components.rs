//! Component lookup and template compilation.
//!
//! A resource type names a component directory below the source root:
//!
//! ```text
//! apps/                               (source root)
//! └── site/                           (shared component root)
//!     ├── components/teaser/
//!     │   ├── teaser.html             default template for site/components/teaser
//!     │   ├── compact.html            selector variant: "hero.compact"
//!     │   └── model.json              component model
//!     └── partials/footer.html        shared include target
//! ```
//!
//! ## Compilation
//!
//! Compiling a template file produces one Tera instance holding the file and
//! every template it pulls in through `{% include %}`, `{% import %}` or
//! `{% extends %}`, found recursively. Reference targets are located with the
//! script resolver chain; an unresolvable reference compiles to an empty
//! template so optional includes degrade to nothing. `use_model(name="...")`
//! calls with literal names are resolved at compile time as well; a missing
//! module is logged and compilation continues.
//!
//! Compiled templates are cached by absolute file path for the lifetime of the
//! registry, which is one render pass. Once a file's result is stored it is
//! never compiled again, and a failed compilation is cached too, so a broken
//! component is reported once.

use crate::deps::DependencyTracker;
use crate::models::{ModelLoader, ModelSource};
use dashmap::DashMap;
use rayon::prelude::*;
use regex::Regex;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use tera::Tera;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

/// Template file extension.
pub const TEMPLATE_EXT: &str = "html";

static TEMPLATE_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\{%-?\s*(?:include|import|extends)\s+["']([^"']+)["']"#).expect("valid regex")
});

static MODULE_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"use_model\(\s*name\s*=\s*["']([^"']+)["']"#).expect("valid regex")
});

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("Template not found: {0}")]
    Missing(PathBuf),
    #[error("Cannot read template {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Cannot compile template {name}: {message}")]
    Compile { name: String, message: String },
    #[error("Cannot execute template {name}: {message}")]
    Render { name: String, message: String },
}

/// Directory of the component implementing `resource_type`.
pub fn component_dir(source_root: &Path, resource_type: &str) -> PathBuf {
    source_root.join(resource_type.trim_start_matches('/'))
}

/// Template file for a resource type, optionally narrowed by selectors.
///
/// - `site/components/teaser`, no selectors → `.../teaser/teaser.html`
/// - `site/components/teaser`, `compact` → `.../teaser/compact.html`
/// - `site/components/teaser`, `a.b` → `.../teaser/a.b.html`
pub fn template_file(source_root: &Path, resource_type: &str, selectors: Option<&str>) -> PathBuf {
    let dir = component_dir(source_root, resource_type);
    let stem = match selectors.filter(|s| !s.is_empty()) {
        Some(selectors) => selectors.to_string(),
        None => dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default(),
    };
    dir.join(format!("{stem}.{TEMPLATE_EXT}"))
}

/// Render a Tera error with its whole source chain on one line.
pub fn describe_tera_error(error: &tera::Error) -> String {
    use std::error::Error;

    let mut messages = vec![error.to_string()];
    let mut current: Option<&dyn Error> = error.source();
    while let Some(err) = current {
        messages.push(err.to_string());
        current = err.source();
    }
    messages.join(": ")
}

// ============================================================================
// Script resolution
// ============================================================================

/// Locates include targets referenced from templates.
#[derive(Debug, Clone)]
pub struct ScriptResolver {
    repo_dir: PathBuf,
    source_root: PathBuf,
    shared_root: PathBuf,
}

impl ScriptResolver {
    pub fn new(
        repo_dir: impl Into<PathBuf>,
        source_root: impl Into<PathBuf>,
        shared_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            repo_dir: repo_dir.into(),
            source_root: source_root.into(),
            shared_root: shared_root.into(),
        }
    }

    pub fn source_root(&self) -> &Path {
        &self.source_root
    }

    pub fn shared_root(&self) -> &Path {
        &self.shared_root
    }

    /// First existing file for `uri`, or `None`.
    ///
    /// Absolute URIs are repository-relative. Relative URIs are tried against
    /// the component directory of `resource_type`, the calling template's
    /// directory, the shared component root, then the source root.
    pub fn resolve(
        &self,
        uri: &str,
        caller_dir: &Path,
        resource_type: Option<&str>,
    ) -> Option<PathBuf> {
        if let Some(stripped) = uri.strip_prefix('/') {
            let path = self.repo_dir.join(stripped);
            return path.is_file().then_some(path);
        }

        let candidates: [&dyn Fn() -> Option<PathBuf>; 4] = [
            &|| resource_type.map(|t| component_dir(&self.source_root, t).join(uri)),
            &|| Some(caller_dir.join(uri)),
            &|| Some(self.shared_root.join(uri)),
            &|| Some(self.source_root.join(uri)),
        ];
        candidates
            .iter()
            .filter_map(|candidate| candidate())
            .find(|path| path.is_file())
    }
}

// ============================================================================
// Compiled templates
// ============================================================================

/// A template file with everything it references, ready to render.
#[derive(Debug, Clone)]
pub struct CompiledTemplate {
    /// Name of the entry template inside `tera`.
    pub name: String,
    /// Source file, `None` for inline templates.
    pub file: Option<PathBuf>,
    /// Resource type of the component directory the file lives in.
    pub resource_type: Option<String>,
    /// Directory relative references are resolved from.
    pub base_dir: PathBuf,
    pub tera: Tera,
    /// Template references and the file each resolved to.
    pub includes: BTreeMap<String, Option<PathBuf>>,
    /// Literal `use_model` names and where each resolved.
    pub modules: BTreeMap<String, Option<ModelSource>>,
}

impl CompiledTemplate {
    /// Directories of the files this template pulled in, by reference name.
    pub fn include_dirs(&self) -> impl Iterator<Item = &Path> {
        let mut seen = HashSet::new();
        self.includes
            .values()
            .flatten()
            .filter_map(|file| file.parent())
            .filter(move |dir| seen.insert(*dir))
    }
}

/// Per-pass cache of compiled component templates.
#[derive(Debug)]
pub struct ComponentRegistry {
    scripts: ScriptResolver,
    loader: Arc<ModelLoader>,
    deps: Arc<DependencyTracker>,
    cache: DashMap<PathBuf, Result<Arc<CompiledTemplate>, Arc<TemplateError>>>,
}

impl ComponentRegistry {
    pub fn new(
        scripts: ScriptResolver,
        loader: Arc<ModelLoader>,
        deps: Arc<DependencyTracker>,
    ) -> Self {
        Self {
            scripts,
            loader,
            deps,
            cache: DashMap::new(),
        }
    }

    pub fn scripts(&self) -> &ScriptResolver {
        &self.scripts
    }

    pub fn source_root(&self) -> &Path {
        self.scripts.source_root()
    }

    /// Number of cached entries, failures included.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Pre-compile every template below the shared component root in parallel.
    ///
    /// Returns `(compiled, failed)`. Failures are logged, not propagated.
    pub fn load_components(&self) -> (usize, usize) {
        let files: Vec<PathBuf> = WalkDir::new(self.scripts.shared_root())
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| path.extension().is_some_and(|e| e == TEMPLATE_EXT))
            .collect();

        let failed = files
            .par_iter()
            .filter(|file| match self.template(file) {
                Ok(_) => false,
                Err(e) => {
                    error!(file = %file.display(), error = %e, "Cannot compile component");
                    true
                }
            })
            .count();

        info!(
            compiled = files.len() - failed,
            failed,
            "Loaded component templates"
        );
        (files.len() - failed, failed)
    }

    /// Compiled template for `file`, compiling on first request.
    pub fn template(&self, file: &Path) -> Result<Arc<CompiledTemplate>, Arc<TemplateError>> {
        if let Some(hit) = self.cache.get(file) {
            return hit.value().clone();
        }
        // Compile without holding a shard lock; a concurrent compile of the
        // same file yields the same result and the first one stored is kept.
        let compiled = self.compile_file(file).map(Arc::new).map_err(Arc::new);
        self.cache
            .entry(file.to_path_buf())
            .or_insert(compiled)
            .value()
            .clone()
    }

    /// Compile template source that has no backing file.
    ///
    /// References resolve from the shared component root.
    pub fn compile_inline(&self, name: &str, source: &str) -> Result<CompiledTemplate, TemplateError> {
        let base_dir = self.scripts.shared_root().to_path_buf();
        self.compile_source(name, source.to_string(), None, base_dir, None)
    }

    /// Resource type implied by a template's location (`apps/site/components/x/x.html` → `site/components/x`).
    pub fn resource_type_of_file(&self, file: &Path) -> Option<String> {
        let dir = file.parent()?.strip_prefix(self.scripts.source_root()).ok()?;
        let segments: Vec<String> = dir
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .collect();
        (!segments.is_empty()).then(|| segments.join("/"))
    }

    fn compile_file(&self, file: &Path) -> Result<CompiledTemplate, TemplateError> {
        if !file.is_file() {
            return Err(TemplateError::Missing(file.to_path_buf()));
        }
        let source = read_template(file)?;
        self.deps.record(file);
        let base_dir = file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.scripts.source_root().to_path_buf());
        let resource_type = self.resource_type_of_file(file);
        let compiled = self.compile_source(
            &file.display().to_string(),
            source,
            Some(file.to_path_buf()),
            base_dir,
            resource_type,
        )?;
        debug!(file = %file.display(), includes = compiled.includes.len(), "Compiled template");
        Ok(compiled)
    }

    fn compile_source(
        &self,
        name: &str,
        source: String,
        file: Option<PathBuf>,
        base_dir: PathBuf,
        resource_type: Option<String>,
    ) -> Result<CompiledTemplate, TemplateError> {
        let mut templates = vec![(name.to_string(), source.clone())];
        let mut includes = BTreeMap::new();
        let mut modules = BTreeMap::new();
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([(source, base_dir.clone())]);

        while let Some((text, dir)) = queue.pop_front() {
            for module in captures(&MODULE_REF, &text) {
                if modules.contains_key(&module) {
                    continue;
                }
                let located = self.loader.locate_module(&module, &dir);
                match &located {
                    Some(ModelSource::Script(path)) => self.deps.record(path),
                    Some(ModelSource::Registered { .. }) => {}
                    None => warn!(module, template = name, "Cannot find model module"),
                }
                modules.insert(module, located);
            }

            for reference in captures(&TEMPLATE_REF, &text) {
                // First resolution of a reference name wins
                if !seen.insert(reference.clone()) {
                    continue;
                }
                match self.scripts.resolve(&reference, &dir, resource_type.as_deref()) {
                    Some(path) => {
                        let included = read_template(&path)?;
                        self.deps.record(&path);
                        let included_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
                        templates.push((reference.clone(), included.clone()));
                        queue.push_back((included, included_dir));
                        includes.insert(reference, Some(path));
                    }
                    None => {
                        debug!(reference, template = name, "Unresolved template reference, using empty template");
                        templates.push((reference.clone(), String::new()));
                        includes.insert(reference, None);
                    }
                }
            }
        }

        let mut tera = Tera::default();
        tera.add_raw_templates(templates)
            .map_err(|e| TemplateError::Compile {
                name: name.to_string(),
                message: describe_tera_error(&e),
            })?;

        Ok(CompiledTemplate {
            name: name.to_string(),
            file,
            resource_type,
            base_dir,
            tera,
            includes,
            modules,
        })
    }
}

fn read_template(path: &Path) -> Result<String, TemplateError> {
    fs::read_to_string(path).map_err(|source| TemplateError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn captures(re: &Regex, text: &str) -> Vec<String> {
    re.captures_iter(text).map(|c| c[1].to_string()).collect()
}
