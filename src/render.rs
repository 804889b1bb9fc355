//! Recursive render orchestration.
//!
//! One [`RenderPipeline`] serves a whole pass. Rendering a target builds its
//! globals, fetches the compiled template, and executes it with the pipeline
//! capabilities registered as template functions. Those capabilities re-enter
//! the pipeline:
//!
//! ```text
//! render_page(/content/site)
//!   entry: {{ resource(name="jcr:content") }}
//!     load_resource("jcr:content")   → site/components/page/page.html
//!       load_resource("root")        → site/components/container/container.html
//!         load_resource("hero.compact") → site/components/teaser/compact.html
//!         include_file("partials/footer.html")  (same globals)
//! ```
//!
//! ## Failure Isolation
//!
//! Only the entry template can fail a page. Everything below it is a node:
//! a node that fails to compile, bind, or execute is logged, counted, and
//! contributes an empty string, so its siblings and the rest of the page
//! still render. A resource whose type has no default template is such a
//! failure. Absent children, selector variants, include targets, and modules
//! are not failures at all; they render as nothing.

use crate::bindings::{BindingError, BindingsProvider};
use crate::components::{
    CompiledTemplate, ComponentRegistry, TemplateError, describe_tera_error, template_file,
};
use crate::content::{join_path, parent_path, path_name};
use crate::functions;
use crate::globals::Globals;
use crate::models::ModelError;
use crate::resolver::ResourceResolver;
use crate::resource::Resource;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;
use tracing::{debug, error, info};

/// Name of the inline template every page render starts from.
pub const ENTRY_TEMPLATE_NAME: &str = "__page_entry.html";

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Cannot compile entry template: {0}")]
    EntryTemplate(#[source] TemplateError),
    #[error("Cannot render page {path}: {source}")]
    Page {
        path: String,
        source: TemplateError,
    },
    #[error("Component {file} is unusable: {source}")]
    Component {
        file: PathBuf,
        source: Arc<TemplateError>,
    },
    #[error("Cannot compute bindings for {path}: {source}")]
    Bindings { path: String, source: BindingError },
    #[error("Model {module} failed: {source}")]
    Model { module: String, source: ModelError },
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error("Render depth exceeded {limit} at {path}")]
    TooDeep { path: String, limit: usize },
}

#[derive(Debug, Clone)]
pub struct RenderSettings {
    /// Child holding a page's content, rendered by the entry template.
    pub page_content: String,
    pub max_render_depth: usize,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            page_content: "jcr:content".to_string(),
            max_render_depth: 32,
        }
    }
}

#[derive(Debug)]
pub struct RenderPipeline {
    resolver: Arc<ResourceResolver>,
    registry: Arc<ComponentRegistry>,
    bindings: Arc<BindingsProvider>,
    entry: Arc<CompiledTemplate>,
    declared: Vec<String>,
    settings: RenderSettings,
    failures: AtomicUsize,
}

impl RenderPipeline {
    /// Compiles the page entry template; failure here aborts the pass.
    pub fn new(
        resolver: Arc<ResourceResolver>,
        registry: Arc<ComponentRegistry>,
        bindings: Arc<BindingsProvider>,
        settings: RenderSettings,
    ) -> Result<Arc<Self>, RenderError> {
        let source = format!(
            "{{{{ resource(name={:?}) }}}}",
            settings.page_content.as_str()
        );
        let entry = registry
            .compile_inline(ENTRY_TEMPLATE_NAME, &source)
            .map_err(RenderError::EntryTemplate)?;
        let declared = bindings.names();
        Ok(Arc::new(Self {
            resolver,
            registry,
            bindings,
            entry: Arc::new(entry),
            declared,
            settings,
            failures: AtomicUsize::new(0),
        }))
    }

    pub fn resolver(&self) -> &ResourceResolver {
        &self.resolver
    }

    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    /// Node failures recorded so far in this pass.
    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::Relaxed)
    }

    /// Render a page through the entry template.
    pub fn render_page(self: &Arc<Self>, page: &Resource<'_>) -> Result<String, RenderError> {
        let globals = Globals::for_page(page, &self.settings.page_content);
        let html = self
            .invoke(&self.entry, Arc::new(globals))
            .map_err(|e| match e {
                RenderError::Template(source) => RenderError::Page {
                    path: page.path().to_string(),
                    source,
                },
                other => other,
            })?;
        info!(page = page.path(), "Rendered page");
        Ok(html)
    }

    /// Render a resource on its own with the given selector variant.
    ///
    /// `None` when the variant file does not exist or the render failed.
    pub fn render_component(
        self: &Arc<Self>,
        resource: &Resource<'_>,
        selectors: Option<&str>,
    ) -> Option<String> {
        let file = template_file(
            self.registry.source_root(),
            resource.resource_type(),
            selectors,
        );
        if !file.is_file() {
            debug!(resource = resource.path(), file = %file.display(), "No template for component");
            return None;
        }

        let result = self
            .bind(resource, Globals::for_resource(resource))
            .and_then(|globals| self.render_file(&file, globals, TemplateUse::Variant));
        match result {
            Ok(html) => {
                info!(resource = resource.path(), selectors, "Rendered component");
                Some(html)
            }
            Err(e) => {
                self.record_failure(resource.path(), &e);
                None
            }
        }
    }

    // ========================================================================
    // Capabilities invoked from templates
    // ========================================================================

    /// Render another resource inline.
    ///
    /// `name` is `child`, `child.sel1.sel2`, or an absolute `/path/to/node.sel`.
    /// When nothing exists at the resolved path and `type_override` is given,
    /// a content-less resource of that type is rendered instead.
    pub fn load_resource(
        self: &Arc<Self>,
        name: &str,
        type_override: Option<&str>,
        parent: &Globals,
    ) -> String {
        match self.try_load_resource(name, type_override, parent) {
            Ok(html) => html,
            Err(e) => {
                self.record_failure(&parent.resource.path, &e);
                String::new()
            }
        }
    }

    /// Render another template file with the caller's globals.
    ///
    /// Tera does not report which template of a compiled set is executing, so
    /// after the usual chain the directories of the caller's own includes are
    /// tried, letting a partial reach its siblings.
    pub fn include_file(
        self: &Arc<Self>,
        path: &str,
        caller: &CompiledTemplate,
        globals: &Globals,
    ) -> String {
        let result = self.check_depth(globals, path).and_then(|()| {
            let resolved = self
                .registry
                .scripts()
                .resolve(
                    path,
                    &caller.base_dir,
                    Some(globals.resource.resource_type.as_str()),
                )
                .or_else(|| {
                    caller
                        .include_dirs()
                        .map(|dir| dir.join(path))
                        .find(|candidate| candidate.is_file())
                });
            match resolved {
                Some(file) => self.render_file(&file, globals.nested(), TemplateUse::Required),
                None => {
                    debug!(path, "Include target not found");
                    Ok(String::new())
                }
            }
        });
        result.unwrap_or_else(|e| {
            self.record_failure(&globals.resource.path, &e);
            String::new()
        })
    }

    /// Evaluate a model module for the caller; null when absent or failed.
    pub fn use_model(&self, module: &str, caller: &CompiledTemplate, globals: &Globals) -> Value {
        let loader = self.bindings.loader();
        let source = match caller.modules.get(module) {
            Some(located) => located.clone(),
            None => loader.locate_module(module, &caller.base_dir),
        };
        let Some(source) = source else {
            debug!(module, "Model module not found");
            return Value::Null;
        };
        match loader.run(&source, globals) {
            Ok(value) => value,
            Err(source) => {
                let e = RenderError::Model {
                    module: module.to_string(),
                    source,
                };
                self.record_failure(&globals.resource.path, &e);
                Value::Null
            }
        }
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn try_load_resource(
        self: &Arc<Self>,
        name: &str,
        type_override: Option<&str>,
        parent: &Globals,
    ) -> Result<String, RenderError> {
        let target = ResourceName::parse(name, &parent.resource.path);
        self.check_depth(parent, &target.path)?;

        let resource = self.resolver.get_resource(&target.path).or_else(|| {
            type_override.map(|t| self.resolver.make_synthetic_resource(&target.path, t))
        });
        let Some(resource) = resource else {
            debug!(path = %target.path, "Resource not found");
            return Ok(String::new());
        };

        let globals = self.bind(&resource, parent.child(&resource))?;
        let file = template_file(
            self.registry.source_root(),
            resource.resource_type(),
            target.selectors.as_deref(),
        );
        let usage = match target.selectors {
            Some(_) => TemplateUse::Variant,
            None => TemplateUse::Required,
        };
        self.render_file(&file, globals, usage)
    }

    fn bind(&self, resource: &Resource<'_>, globals: Globals) -> Result<Globals, RenderError> {
        let bindings = self
            .bindings
            .provide(self.registry.source_root(), resource.resource_type(), &globals)
            .map_err(|source| RenderError::Bindings {
                path: resource.path().to_string(),
                source,
            })?;
        Ok(globals.with_bindings(bindings))
    }

    fn render_file(
        self: &Arc<Self>,
        file: &Path,
        globals: Globals,
        usage: TemplateUse,
    ) -> Result<String, RenderError> {
        match self.registry.template(file) {
            Ok(template) => self.invoke(&template, Arc::new(globals)),
            Err(e) if usage == TemplateUse::Variant && matches!(*e, TemplateError::Missing(_)) => {
                debug!(file = %file.display(), "Template variant not found");
                Ok(String::new())
            }
            Err(source) => Err(RenderError::Component {
                file: file.to_path_buf(),
                source,
            }),
        }
    }

    fn invoke(
        self: &Arc<Self>,
        template: &Arc<CompiledTemplate>,
        globals: Arc<Globals>,
    ) -> Result<String, RenderError> {
        let mut tera = template.tera.clone();
        functions::register(&mut tera, self, template, &globals);
        let context = globals.to_context(&self.declared);
        tera.render(&template.name, &context).map_err(|e| {
            RenderError::Template(TemplateError::Render {
                name: template.name.clone(),
                message: describe_tera_error(&e),
            })
        })
    }

    fn check_depth(&self, globals: &Globals, path: &str) -> Result<(), RenderError> {
        if globals.depth >= self.settings.max_render_depth {
            return Err(RenderError::TooDeep {
                path: path.to_string(),
                limit: self.settings.max_render_depth,
            });
        }
        Ok(())
    }

    fn record_failure(&self, path: &str, e: &RenderError) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        error!(resource = path, error = %e, "Render step failed");
    }
}

/// Whether a template file may be absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TemplateUse {
    /// Default template of a resource type: absence is a failure.
    Required,
    /// Selector variant: absence renders nothing.
    Variant,
}

/// A resource-loader request split into lookup path and selectors.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ResourceName {
    path: String,
    selectors: Option<String>,
}

impl ResourceName {
    fn parse(name: &str, parent: &str) -> Self {
        let absolute = name.starts_with('/');
        let base = if absolute { path_name(name) } else { name };
        let (resource_name, selectors) = match base.split_once('.') {
            Some((n, s)) => (n, Some(s.to_string()).filter(|s| !s.is_empty())),
            None => (base, None),
        };
        let dir = if absolute {
            parent_path(name).unwrap_or("/")
        } else {
            parent
        };
        Self {
            path: join_path(dir, resource_name),
            selectors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::ScriptResolver;
    use crate::deps::DependencyTracker;
    use crate::models::{DEFAULT_MODEL_FILE, ModelLoader, ModelRegistry};
    use crate::test_helpers::{write_component, write_file};
    use crate::tree::ContentTree;
    use serde_json::json;
    use tempfile::TempDir;

    fn pipeline(tmp: &TempDir, content: Value, max_render_depth: usize) -> Arc<RenderPipeline> {
        let deps = Arc::new(DependencyTracker::new());
        let tree = ContentTree::from_value("/content/site", content).unwrap();
        let loader = Arc::new(ModelLoader::new(
            ModelRegistry::new(),
            tmp.path().join("models"),
            DEFAULT_MODEL_FILE,
            Arc::clone(&deps),
        ));
        let bindings =
            Arc::new(BindingsProvider::new(Vec::new(), Arc::clone(&loader)).unwrap());
        let scripts = ScriptResolver::new(
            tmp.path(),
            tmp.path().join("apps"),
            tmp.path().join("apps/site"),
        );
        let registry = Arc::new(ComponentRegistry::new(scripts, loader, deps));
        let settings = RenderSettings {
            max_render_depth,
            ..RenderSettings::default()
        };
        RenderPipeline::new(
            Arc::new(ResourceResolver::new(tree)),
            registry,
            bindings,
            settings,
        )
        .unwrap()
    }

    fn page(body: Value) -> Value {
        json!({
            "jcr:primaryType": "cq:Page",
            "jcr:content": body,
        })
    }

    fn render(p: &Arc<RenderPipeline>) -> Result<String, RenderError> {
        let root = p.resolver().get_resource("/content/site").unwrap();
        p.render_page(&root)
    }

    #[test]
    fn page_renders_content_child_and_descendants() {
        let tmp = TempDir::new().unwrap();
        write_component(
            tmp.path(),
            "site/page",
            "page.html",
            r#"<h1>{{ properties.title }}</h1>{{ resource(name="body") }}"#,
        );
        write_component(tmp.path(), "site/text", "text.html", "<p>{{ properties.text }}</p>");
        let p = pipeline(
            &tmp,
            page(json!({
                "sling:resourceType": "site/page",
                "title": "T",
                "body": { "sling:resourceType": "site/text", "text": "hi" }
            })),
            32,
        );
        assert_eq!(render(&p).unwrap(), "<h1>T</h1><p>hi</p>");
        assert_eq!(p.failures(), 0);
    }

    #[test]
    fn failing_node_leaves_siblings_intact() {
        let tmp = TempDir::new().unwrap();
        write_component(
            tmp.path(),
            "site/page",
            "page.html",
            r#"[{{ resource(name="a") }}][{{ resource(name="b") }}]"#,
        );
        write_component(tmp.path(), "site/bad", "bad.html", "{{ not_declared }}");
        write_component(tmp.path(), "site/text", "text.html", "<p>{{ properties.text }}</p>");
        let p = pipeline(
            &tmp,
            page(json!({
                "sling:resourceType": "site/page",
                "a": { "sling:resourceType": "site/bad" },
                "b": { "sling:resourceType": "site/text", "text": "hi" }
            })),
            32,
        );
        assert_eq!(render(&p).unwrap(), "[][<p>hi</p>]");
        assert_eq!(p.failures(), 1);
    }

    #[test]
    fn absent_child_is_empty_and_override_type_synthesizes() {
        let tmp = TempDir::new().unwrap();
        write_component(
            tmp.path(),
            "site/page",
            "page.html",
            r#"[{{ resource(name="nope") }}][{{ resource(name="nope", resource_type="site/text") }}]"#,
        );
        write_component(
            tmp.path(),
            "site/text",
            "text.html",
            r#"<p>{{ properties.text | default(value="none") }}</p>"#,
        );
        let p = pipeline(&tmp, page(json!({ "sling:resourceType": "site/page" })), 32);
        assert_eq!(render(&p).unwrap(), "[][<p>none</p>]");
        assert_eq!(p.failures(), 0);
    }

    #[test]
    fn type_without_template_is_a_failure_but_missing_variant_is_not() {
        let tmp = TempDir::new().unwrap();
        write_component(
            tmp.path(),
            "site/page",
            "page.html",
            r#"[{{ resource(name="a") }}][{{ resource(name="b.nope") }}]"#,
        );
        write_component(tmp.path(), "site/text", "text.html", "t");
        let p = pipeline(
            &tmp,
            page(json!({
                "sling:resourceType": "site/page",
                "a": { "sling:resourceType": "site/nocomponent" },
                "b": { "sling:resourceType": "site/text" }
            })),
            32,
        );
        assert_eq!(render(&p).unwrap(), "[][]");
        assert_eq!(p.failures(), 1);
    }

    #[test]
    fn included_partial_reaches_its_siblings() {
        let tmp = TempDir::new().unwrap();
        write_component(
            tmp.path(),
            "site/page",
            "page.html",
            r#"<{% include "/apps/lib/outer.html" %}>"#,
        );
        write_file(
            tmp.path(),
            "apps/lib/outer.html",
            r#"{{ include_file(path="sibling.html") }}"#,
        );
        write_file(tmp.path(), "apps/lib/sibling.html", "S");
        let p = pipeline(&tmp, page(json!({ "sling:resourceType": "site/page" })), 32);
        assert_eq!(render(&p).unwrap(), "<S>");
        assert_eq!(p.failures(), 0);
    }

    #[test]
    fn self_inclusion_stops_at_depth_limit() {
        let tmp = TempDir::new().unwrap();
        write_component(
            tmp.path(),
            "site/loop",
            "loop.html",
            r#"x{{ resource(name="/content/site/jcr:content") }}"#,
        );
        let p = pipeline(&tmp, page(json!({ "sling:resourceType": "site/loop" })), 4);
        assert_eq!(render(&p).unwrap(), "xxxx");
        assert_eq!(p.failures(), 1);
    }

    #[test]
    fn included_file_shares_caller_globals() {
        let tmp = TempDir::new().unwrap();
        write_component(
            tmp.path(),
            "site/page",
            "page.html",
            r#"{{ include_file(path="part.html") }}|{{ include_file(path="gone.html") }}"#,
        );
        write_component(tmp.path(), "site/page", "part.html", "<i>{{ resource.name }}</i>");
        let p = pipeline(&tmp, page(json!({ "sling:resourceType": "site/page" })), 32);
        assert_eq!(render(&p).unwrap(), "<i>jcr:content</i>|");
    }

    #[test]
    fn missing_selector_variant_skips_component() {
        let tmp = TempDir::new().unwrap();
        write_component(tmp.path(), "site/text", "text.html", "t");
        write_component(tmp.path(), "site/text", "loader.html", "L:{{ resource.name }}");
        let p = pipeline(
            &tmp,
            json!({ "a": { "sling:resourceType": "site/text" } }),
            32,
        );
        let a = p.resolver().get_resource("/content/site/a").unwrap();
        assert_eq!(p.render_component(&a, Some("loader")).as_deref(), Some("L:a"));
        assert_eq!(p.render_component(&a, Some("missing")), None);
        assert_eq!(p.failures(), 0);
    }

    #[test]
    fn bare_name_is_child_of_parent() {
        let n = ResourceName::parse("hero", "/content/site/jcr:content");
        assert_eq!(n.path, "/content/site/jcr:content/hero");
        assert_eq!(n.selectors, None);
    }

    #[test]
    fn selectors_are_split_off() {
        let n = ResourceName::parse("child.teaser", "/content/x");
        assert_eq!(n.path, "/content/x/child");
        assert_eq!(n.selectors.as_deref(), Some("teaser"));

        let n = ResourceName::parse("child.a.b", "/content/x");
        assert_eq!(n.selectors.as_deref(), Some("a.b"));
    }

    #[test]
    fn absolute_name_ignores_parent() {
        let n = ResourceName::parse("/content/x/child.compact", "/content/elsewhere");
        assert_eq!(n.path, "/content/x/child");
        assert_eq!(n.selectors.as_deref(), Some("compact"));
    }

    #[test]
    fn namespaced_child_name_keeps_colon() {
        let n = ResourceName::parse("jcr:content", "/content/site");
        assert_eq!(n.path, "/content/site/jcr:content");
    }

    #[test]
    fn trailing_dot_means_no_selectors() {
        let n = ResourceName::parse("child.", "/content/x");
        assert_eq!(n.path, "/content/x/child");
        assert_eq!(n.selectors, None);
    }
}
