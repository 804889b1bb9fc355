//! Model loading: computed per-component data without running arbitrary code.
//!
//! A model is found through an ordered chain of candidate sources, evaluated
//! lazily, first hit wins:
//!
//! ```text
//! component model (for a resource type)      imported module (use_model)
//! ─────────────────────────────────────      ───────────────────────────
//! 1. registry entry for the resource type    1. file relative to the caller
//! 2. <component dir>/model.json              2. <repo>/models/<module>
//!                                            3. registry entry for the name
//! ```
//!
//! ## Model Scripts
//!
//! A model script is a JSON document. Leaves are copied through unchanged,
//! except strings holding template syntax, which are evaluated against the
//! current globals only:
//!
//! ```json
//! {
//!   "heading": "{{ properties.title | default(value='Untitled') | upper }}",
//!   "items": "{{ properties.tags }}",
//!   "static": [1, 2, 3]
//! }
//! ```
//!
//! A string that is exactly one `{{ expression }}` keeps the expression's JSON
//! type (`items` above stays a list); any other templated string renders to a
//! string. Evaluation happens in a one-off engine with no pipeline functions
//! registered, so a model can read globals but cannot render resources or
//! touch files.

use crate::components::describe_tera_error;
use crate::deps::DependencyTracker;
use crate::globals::Globals;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use thiserror::Error;
use tracing::debug;

/// Reserved model file name inside a component directory.
pub const DEFAULT_MODEL_FILE: &str = "model.json";

static WHOLE_EXPRESSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\{\{(.*)\}\}\s*$").expect("valid regex"));

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Cannot read model {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Malformed model {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("Model {path} failed to evaluate {expression:?}: {message}")]
    Eval {
        path: PathBuf,
        expression: String,
        message: String,
    },
    #[error("Model {name} failed: {message}")]
    Failed { name: String, message: String },
}

/// A host-provided model: computes a value from the current globals.
pub trait Model: Send + Sync {
    fn use_with(&self, globals: &Globals) -> Result<Value, String>;
}

impl<F> Model for F
where
    F: Fn(&Globals) -> Result<Value, String> + Send + Sync,
{
    fn use_with(&self, globals: &Globals) -> Result<Value, String> {
        self(globals)
    }
}

/// Named table of host-provided models.
#[derive(Clone, Default)]
pub struct ModelRegistry {
    models: BTreeMap<String, Arc<dyn Model>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a model under a resource type or module name.
    pub fn register(&mut self, name: impl Into<String>, model: impl Model + 'static) {
        self.models.insert(name.into(), Arc::new(model));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Model>> {
        self.models.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

impl fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.models.keys()).finish()
    }
}

/// Where a located model comes from.
#[derive(Clone)]
pub enum ModelSource {
    Registered { name: String, model: Arc<dyn Model> },
    Script(PathBuf),
}

impl fmt::Debug for ModelSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelSource::Registered { name, .. } => write!(f, "Registered({name})"),
            ModelSource::Script(path) => write!(f, "Script({})", path.display()),
        }
    }
}

#[derive(Debug)]
pub struct ModelLoader {
    registry: ModelRegistry,
    models_dir: PathBuf,
    model_file: String,
    deps: Arc<DependencyTracker>,
}

impl ModelLoader {
    pub fn new(
        registry: ModelRegistry,
        models_dir: impl Into<PathBuf>,
        model_file: impl Into<String>,
        deps: Arc<DependencyTracker>,
    ) -> Self {
        Self {
            registry,
            models_dir: models_dir.into(),
            model_file: model_file.into(),
            deps,
        }
    }

    /// Model for a resource type whose component lives in `component_dir`.
    pub fn locate_component_model(
        &self,
        resource_type: &str,
        component_dir: &Path,
    ) -> Option<ModelSource> {
        let candidates: [&dyn Fn() -> Option<ModelSource>; 2] = [
            &|| self.registered(resource_type),
            &|| script(component_dir.join(&self.model_file)),
        ];
        candidates.iter().find_map(|candidate| candidate())
    }

    /// Model module imported by a template in `caller_dir`.
    pub fn locate_module(&self, module: &str, caller_dir: &Path) -> Option<ModelSource> {
        let candidates: [&dyn Fn() -> Option<ModelSource>; 3] = [
            &|| script(caller_dir.join(module)),
            &|| script(self.models_dir.join(module)),
            &|| self.registered(module),
        ];
        candidates.iter().find_map(|candidate| candidate())
    }

    /// Evaluate a located model against `globals`.
    pub fn run(&self, source: &ModelSource, globals: &Globals) -> Result<Value, ModelError> {
        match source {
            ModelSource::Registered { name, model } => {
                model
                    .use_with(globals)
                    .map_err(|message| ModelError::Failed {
                        name: name.clone(),
                        message,
                    })
            }
            ModelSource::Script(path) => {
                self.deps.record(path);
                let text = fs::read_to_string(path).map_err(|source| ModelError::Io {
                    path: path.clone(),
                    source,
                })?;
                let script: Value =
                    serde_json::from_str(&text).map_err(|source| ModelError::Parse {
                        path: path.clone(),
                        source,
                    })?;
                let context = tera::Context::from_value(globals.to_value()).map_err(|e| {
                    ModelError::Failed {
                        name: path.display().to_string(),
                        message: describe_tera_error(&e),
                    }
                })?;
                debug!(model = %path.display(), "Evaluating model script");
                evaluate(&script, &context, path)
            }
        }
    }

    fn registered(&self, name: &str) -> Option<ModelSource> {
        self.registry.get(name).map(|model| ModelSource::Registered {
            name: name.to_string(),
            model,
        })
    }
}

fn script(path: PathBuf) -> Option<ModelSource> {
    path.is_file().then_some(ModelSource::Script(path))
}

fn evaluate(value: &Value, context: &tera::Context, path: &Path) -> Result<Value, ModelError> {
    match value {
        Value::String(s) if is_templated(s) => evaluate_string(s, context, path),
        Value::Array(items) => items
            .iter()
            .map(|item| evaluate(item, context, path))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(fields) => fields
            .iter()
            .map(|(k, v)| Ok((k.clone(), evaluate(v, context, path)?)))
            .collect::<Result<serde_json::Map<_, _>, ModelError>>()
            .map(Value::Object),
        other => Ok(other.clone()),
    }
}

fn is_templated(s: &str) -> bool {
    s.contains("{{") || s.contains("{%")
}

fn evaluate_string(s: &str, context: &tera::Context, path: &Path) -> Result<Value, ModelError> {
    let eval_error = |e: tera::Error| ModelError::Eval {
        path: path.to_path_buf(),
        expression: s.to_string(),
        message: describe_tera_error(&e),
    };

    if let Some(caps) = WHOLE_EXPRESSION.captures(s) {
        let expression = caps[1].trim();
        // A single expression with nested braces is not a lone expression
        if !expression.contains("{{") && !expression.contains("}}") {
            let encoded = tera::Tera::one_off(
                &format!("{{{{ {expression} | json_encode() }}}}"),
                context,
                false,
            )
            .map_err(eval_error)?;
            return serde_json::from_str(&encoded).map_err(|source| ModelError::Parse {
                path: path.to_path_buf(),
                source,
            });
        }
    }

    tera::Tera::one_off(s, context, false)
        .map(Value::String)
        .map_err(eval_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::ResourceResolver;
    use crate::tree::ContentTree;
    use serde_json::json;
    use tempfile::TempDir;

    fn globals() -> Globals {
        let resolver = ResourceResolver::new(
            ContentTree::from_value(
                "/content/site",
                json!({ "title": "hello", "tags": ["a", "b"], "count": 2 }),
            )
            .unwrap(),
        );
        let resource = resolver.get_resource("/content/site").unwrap();
        Globals::for_resource(&resource)
    }

    fn loader(tmp: &TempDir, registry: ModelRegistry) -> ModelLoader {
        ModelLoader::new(
            registry,
            tmp.path().join("models"),
            DEFAULT_MODEL_FILE,
            Arc::new(DependencyTracker::new()),
        )
    }

    #[test]
    fn script_strings_are_evaluated_against_globals() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("comp");
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("model.json"),
            r#"{
                "heading": "{{ properties.title | upper }}!",
                "tags": "{{ properties.tags }}",
                "double": "{{ properties.count * 2 }}",
                "literal": [1, "plain", null]
            }"#,
        )
        .unwrap();

        let loader = loader(&tmp, ModelRegistry::new());
        let source = loader.locate_component_model("app/comp", &dir).unwrap();
        let value = loader.run(&source, &globals()).unwrap();
        assert_eq!(value["heading"], "HELLO!");
        assert_eq!(value["tags"], json!(["a", "b"]));
        assert_eq!(value["double"], json!(4));
        assert_eq!(value["literal"], json!([1, "plain", null]));
    }

    #[test]
    fn registry_precedes_script_for_components() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("comp");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("model.json"), r#"{"from":"script"}"#).unwrap();

        let mut registry = ModelRegistry::new();
        registry.register("app/comp", |g: &Globals| -> Result<Value, String> {
            Ok(json!({ "from": "registry", "path": g.resource.path }))
        });
        let loader = loader(&tmp, registry);
        let source = loader.locate_component_model("app/comp", &dir).unwrap();
        let value = loader.run(&source, &globals()).unwrap();
        assert_eq!(value["from"], "registry");
        assert_eq!(value["path"], "/content/site");
    }

    #[test]
    fn missing_component_model_is_none() {
        let tmp = TempDir::new().unwrap();
        let loader = loader(&tmp, ModelRegistry::new());
        assert!(
            loader
                .locate_component_model("app/none", &tmp.path().join("none"))
                .is_none()
        );
    }

    #[test]
    fn module_lookup_order() {
        let tmp = TempDir::new().unwrap();
        let caller = tmp.path().join("caller");
        fs::create_dir_all(&caller).unwrap();
        fs::create_dir_all(tmp.path().join("models")).unwrap();
        fs::write(tmp.path().join("models/nav.json"), r#"{"from":"models"}"#).unwrap();

        let loader = loader(&tmp, ModelRegistry::new());
        let found = loader.locate_module("nav.json", &caller).unwrap();
        assert!(matches!(found, ModelSource::Script(ref p) if p.ends_with("models/nav.json")));

        fs::write(caller.join("nav.json"), r#"{"from":"caller"}"#).unwrap();
        let found = loader.locate_module("nav.json", &caller).unwrap();
        assert!(matches!(found, ModelSource::Script(ref p) if p.ends_with("caller/nav.json")));

        assert!(loader.locate_module("absent.json", &caller).is_none());
    }

    #[test]
    fn registered_module_is_last_resort() {
        let tmp = TempDir::new().unwrap();
        let mut registry = ModelRegistry::new();
        registry.register("clock", |_: &Globals| -> Result<Value, String> {
            Ok(json!("noon"))
        });
        let loader = loader(&tmp, registry);
        let source = loader.locate_module("clock", tmp.path()).unwrap();
        assert_eq!(loader.run(&source, &globals()).unwrap(), json!("noon"));
    }

    #[test]
    fn failing_model_reports_name() {
        let tmp = TempDir::new().unwrap();
        let mut registry = ModelRegistry::new();
        registry.register("broken", |_: &Globals| -> Result<Value, String> {
            Err("boom".to_string())
        });
        let loader = loader(&tmp, registry);
        let source = loader.locate_module("broken", tmp.path()).unwrap();
        let err = loader.run(&source, &globals()).unwrap_err();
        assert!(matches!(err, ModelError::Failed { ref name, .. } if name == "broken"));
    }

    #[test]
    fn undefined_variable_in_script_is_eval_error() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("bad.json"), r#"{"x":"{{ nope.field }}"}"#).unwrap();
        let loader = loader(&tmp, ModelRegistry::new());
        let source = ModelSource::Script(tmp.path().join("bad.json"));
        assert!(matches!(
            loader.run(&source, &globals()),
            Err(ModelError::Eval { .. })
        ));
    }

    #[test]
    fn script_is_registered_as_dependency() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("m.json"), r#"{"a":1}"#).unwrap();
        let deps = Arc::new(DependencyTracker::new());
        let loader = ModelLoader::new(
            ModelRegistry::new(),
            tmp.path(),
            DEFAULT_MODEL_FILE,
            Arc::clone(&deps),
        );
        loader
            .run(&ModelSource::Script(tmp.path().join("m.json")), &globals())
            .unwrap();
        assert!(deps.contains(&tmp.path().join("m.json")));
    }
}
