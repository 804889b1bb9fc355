//! Per-resource binding computation.
//!
//! Every resource render step gets a fresh set of bindings: the reserved
//! `model` binding (the component's model, or null) followed by the custom
//! bindings configured for the pass. Custom names are fixed at construction
//! so the set of variables templates may reference never changes mid-pass.

use crate::components::component_dir;
use crate::globals::{Bindings, Globals, STRUCTURAL_VARS};
use crate::models::{ModelError, ModelLoader};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Name of the binding that carries a component's model.
pub const MODEL_BINDING: &str = "model";

#[derive(Error, Debug)]
pub enum BindingError {
    #[error("Binding name '{0}' is reserved")]
    ReservedName(String),
    #[error("No model found for resource type {0}")]
    MissingModel(String),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("Binding '{name}' failed: {message}")]
    Dynamic { name: String, message: String },
}

type BindingFn = dyn Fn(&Globals) -> Result<Value, String> + Send + Sync;

/// A custom binding: a fixed value or a function of the current globals.
#[derive(Clone)]
pub enum Binding {
    Static(Value),
    Dynamic(Arc<BindingFn>),
}

impl Binding {
    pub fn dynamic<F>(f: F) -> Self
    where
        F: Fn(&Globals) -> Result<Value, String> + Send + Sync + 'static,
    {
        Binding::Dynamic(Arc::new(f))
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Binding::Static(value) => write!(f, "Static({value})"),
            Binding::Dynamic(_) => write!(f, "Dynamic(..)"),
        }
    }
}

impl From<Value> for Binding {
    fn from(value: Value) -> Self {
        Binding::Static(value)
    }
}

#[derive(Debug)]
pub struct BindingsProvider {
    custom: BTreeMap<String, Binding>,
    loader: Arc<ModelLoader>,
    strict_models: bool,
}

impl BindingsProvider {
    /// Fails when a custom binding would shadow `model` or a structural variable.
    pub fn new(
        custom: impl IntoIterator<Item = (String, Binding)>,
        loader: Arc<ModelLoader>,
    ) -> Result<Self, BindingError> {
        let mut bindings = BTreeMap::new();
        for (name, binding) in custom {
            if is_reserved(&name) {
                return Err(BindingError::ReservedName(name));
            }
            bindings.insert(name, binding);
        }
        Ok(Self {
            custom: bindings,
            loader,
            strict_models: false,
        })
    }

    /// Treat a component without a model as a node failure instead of null.
    pub fn strict_models(mut self, strict: bool) -> Self {
        self.strict_models = strict;
        self
    }

    pub fn loader(&self) -> &Arc<ModelLoader> {
        &self.loader
    }

    /// Declared binding names: `model` first, then custom names in order.
    pub fn names(&self) -> Vec<String> {
        std::iter::once(MODEL_BINDING.to_string())
            .chain(self.custom.keys().cloned())
            .collect()
    }

    /// Compute bindings for a resource of `resource_type` rendered with `globals`.
    pub fn provide(
        &self,
        source_root: &Path,
        resource_type: &str,
        globals: &Globals,
    ) -> Result<Bindings, BindingError> {
        let mut result = Bindings::new();

        let dir = component_dir(source_root, resource_type);
        let model = match self.loader.locate_component_model(resource_type, &dir) {
            Some(source) => self.loader.run(&source, globals)?,
            None if self.strict_models => {
                return Err(BindingError::MissingModel(resource_type.to_string()));
            }
            None => {
                debug!(resource_type, "No model for component");
                Value::Null
            }
        };
        result.insert(MODEL_BINDING.to_string(), model);

        for (name, binding) in &self.custom {
            let value = match binding {
                Binding::Static(value) => value.clone(),
                Binding::Dynamic(f) => f(globals).map_err(|message| BindingError::Dynamic {
                    name: name.clone(),
                    message,
                })?,
            };
            result.insert(name.clone(), value);
        }

        Ok(result)
    }
}

fn is_reserved(name: &str) -> bool {
    name == MODEL_BINDING || STRUCTURAL_VARS.contains(&name)
}
