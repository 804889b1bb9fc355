//! Full render pass over a repository.
//!
//! Ties the stages together:
//!
//! ```text
//! pages.toml ──► SiteConfig
//! content/<project>/**/*.json ──► ContentTree ──► ResourceResolver
//! apps/<project>/**/*.html ──► ComponentRegistry (pre-compiled in parallel)
//!                                   │
//!          pages (page_type) ───────┤ RenderPipeline, in parallel
//!          components (pattern) ────┘
//!                                   ▼
//!                     SiteOutput: "<resourcePath>.html" → HTML
//! ```
//!
//! Outputs are collected in tree order (pages first, then standalone
//! components) regardless of which worker finished first, so two passes over
//! the same repository produce identical output. The first render of an
//! output path wins; later ones are logged and dropped.

use crate::bindings::{Binding, BindingError, BindingsProvider};
use crate::components::{ComponentRegistry, ScriptResolver};
use crate::config::{ConfigError, RepoLayout, SiteConfig, static_bindings};
use crate::deps::DependencyTracker;
use crate::models::{Model, ModelLoader, ModelRegistry};
use crate::render::{RenderError, RenderPipeline, RenderSettings};
use crate::resolver::ResourceResolver;
use crate::tree::{ContentTree, ContentTreeBuilder, TreeError};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Error, Debug)]
pub enum SiteError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Tree(#[from] TreeError),
    #[error(transparent)]
    Bindings(#[from] BindingError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Output file name for a rendered resource.
pub fn output_path(resource_path: &str) -> String {
    format!("{resource_path}.html")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    Page,
    Component,
}

#[derive(Debug, Clone, Serialize)]
pub struct RenderedFile {
    pub resource_path: String,
    pub kind: OutputKind,
    pub html: String,
}

/// Everything a pass produced.
#[derive(Debug, Default, Serialize)]
pub struct SiteOutput {
    /// Output path → rendered file, in path order.
    pub files: BTreeMap<String, RenderedFile>,
    pub pages: usize,
    pub components: usize,
    /// Node and page failures that were logged and skipped.
    pub failures: usize,
    /// Outputs dropped because an earlier render claimed the same path.
    pub duplicates: usize,
    /// Every source file the pass read.
    pub dependencies: Vec<PathBuf>,
}

impl SiteOutput {
    /// Record a rendered file. Returns `false` if the path was already taken.
    pub fn emit(&mut self, resource_path: &str, kind: OutputKind, html: String) -> bool {
        let key = output_path(resource_path);
        if self.files.contains_key(&key) {
            warn!(output = %key, "Output already rendered, dropping duplicate");
            self.duplicates += 1;
            return false;
        }
        match kind {
            OutputKind::Page => self.pages += 1,
            OutputKind::Component => self.components += 1,
        }
        self.files.insert(
            key,
            RenderedFile {
                resource_path: resource_path.to_string(),
                kind,
                html,
            },
        );
        true
    }

    pub fn get(&self, output: &str) -> Option<&str> {
        self.files.get(output).map(|f| f.html.as_str())
    }

    /// Write every file below `dir`. Returns the number of files written.
    pub fn write_to(&self, dir: &Path) -> Result<usize, SiteError> {
        for (key, file) in &self.files {
            let target = dir.join(key.trim_start_matches('/'));
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&target, &file.html)?;
        }
        Ok(self.files.len())
    }
}

/// Result of validating a repository without rendering.
#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    pub nodes: usize,
    pub pages: Vec<String>,
    pub components: Vec<String>,
    pub templates_compiled: usize,
    pub templates_failed: usize,
}

/// A ready-to-render pass: built tree, warmed registry, pipeline.
pub struct Pass {
    pub pipeline: Arc<RenderPipeline>,
    pub deps: Arc<DependencyTracker>,
    pub templates_compiled: usize,
    pub templates_failed: usize,
}

/// Renders a repository according to its configuration.
pub struct SiteRenderer {
    repo_dir: PathBuf,
    config: SiteConfig,
    models: ModelRegistry,
    bindings: Vec<(String, Binding)>,
}

impl SiteRenderer {
    pub fn new(repo_dir: impl Into<PathBuf>, config: SiteConfig) -> Self {
        let bindings = static_bindings(&config);
        Self {
            repo_dir: repo_dir.into(),
            config,
            models: ModelRegistry::new(),
            bindings,
        }
    }

    /// Load `pages.toml` from the repository and build a renderer for it.
    pub fn from_repo(repo_dir: impl Into<PathBuf>) -> Result<Self, SiteError> {
        let repo_dir = repo_dir.into();
        let config = crate::config::load_config(&repo_dir)?;
        Ok(Self::new(repo_dir, config))
    }

    pub fn config(&self) -> &SiteConfig {
        &self.config
    }

    pub fn layout(&self) -> RepoLayout {
        self.config.layout(&self.repo_dir)
    }

    /// Register a host model for a resource type or module name.
    pub fn with_model(mut self, name: impl Into<String>, model: impl Model + 'static) -> Self {
        self.models.register(name, model);
        self
    }

    /// Add a custom binding on top of the configured static ones.
    pub fn with_binding(mut self, name: impl Into<String>, binding: Binding) -> Self {
        self.bindings.push((name.into(), binding));
        self
    }

    /// Flatten the content files into a tree.
    pub fn build_tree(&self, deps: &DependencyTracker) -> Result<ContentTree, SiteError> {
        let layout = self.layout();
        let tree = ContentTreeBuilder::new(&layout.repo_dir, &layout.content_root)
            .max_depth(self.config.max_content_depth)
            .build(deps)?;
        Ok(tree)
    }

    /// Build the tree, pre-compile components, and set up the pipeline.
    pub fn prepare(&self) -> Result<Pass, SiteError> {
        let layout = self.layout();
        let deps = Arc::new(DependencyTracker::new());

        let tree = self.build_tree(&deps)?;
        let resolver = Arc::new(ResourceResolver::new(tree));

        let loader = Arc::new(ModelLoader::new(
            self.models.clone(),
            &layout.models_dir,
            &self.config.model_file,
            Arc::clone(&deps),
        ));
        let bindings = Arc::new(
            BindingsProvider::new(self.bindings.iter().cloned(), Arc::clone(&loader))?
                .strict_models(self.config.strict_models),
        );
        let scripts = ScriptResolver::new(
            &layout.repo_dir,
            &layout.source_root,
            &layout.shared_root,
        );
        let registry = Arc::new(ComponentRegistry::new(scripts, loader, Arc::clone(&deps)));
        let (templates_compiled, templates_failed) = registry.load_components();

        let settings = RenderSettings {
            page_content: self.config.page_content.clone(),
            max_render_depth: self.config.max_render_depth,
        };
        let pipeline = RenderPipeline::new(resolver, registry, bindings, settings)?;

        Ok(Pass {
            pipeline,
            deps,
            templates_compiled,
            templates_failed,
        })
    }

    /// Validate the repository: tree, configuration, and component compilation.
    pub fn check(&self) -> Result<CheckReport, SiteError> {
        let pass = self.prepare()?;
        let resolver = pass.pipeline.resolver();
        let pages = resolver
            .find_resources(self.config.page_type.as_str())
            .iter()
            .map(|p| p.path().to_string())
            .collect();
        let components = match self.config.components.matcher()? {
            Some(re) => resolver
                .find_resources(re)
                .iter()
                .map(|c| c.path().to_string())
                .collect(),
            None => Vec::new(),
        };
        Ok(CheckReport {
            nodes: resolver.tree().len(),
            pages,
            components,
            templates_compiled: pass.templates_compiled,
            templates_failed: pass.templates_failed,
        })
    }

    /// Run the whole pass.
    pub fn render(&self) -> Result<SiteOutput, SiteError> {
        let pass = self.prepare()?;
        let pipeline = &pass.pipeline;
        let resolver = pipeline.resolver();
        let mut output = SiteOutput::default();
        let mut page_failures = 0;

        let pages = resolver.find_resources(self.config.page_type.as_str());
        info!(count = pages.len(), "Rendering pages");
        let rendered: Vec<_> = pages
            .par_iter()
            .map(|page| (page.path(), pipeline.render_page(page)))
            .collect();
        for (path, result) in rendered {
            match result {
                Ok(html) => {
                    output.emit(path, OutputKind::Page, html);
                }
                Err(e) => {
                    error!(page = path, error = %e, "Page failed");
                    page_failures += 1;
                }
            }
        }

        if let Some(pattern) = self.config.components.matcher()? {
            let selector = self.config.components.selector.as_str();
            let components = resolver.find_resources(pattern);
            info!(count = components.len(), selector, "Rendering components");
            let rendered: Vec<_> = components
                .par_iter()
                .map(|c| (c.path(), pipeline.render_component(c, Some(selector))))
                .collect();
            for (path, html) in rendered {
                if let Some(html) = html {
                    output.emit(path, OutputKind::Component, html);
                }
            }
        }

        output.failures = pipeline.failures() + page_failures;
        output.dependencies = pass.deps.files();
        info!(
            pages = output.pages,
            components = output.components,
            failures = output.failures,
            "Render pass complete"
        );
        Ok(output)
    }
}
