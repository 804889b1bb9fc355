//! Template functions bound to one render invocation.
//!
//! Every invocation gets its own copy of the compiled template with these
//! registered, each holding the pipeline and the invocation's globals:
//!
//! | Function | Arguments | Returns |
//! |---|---|---|
//! | `resource` | `name`, optional `resource_type` | rendered HTML (not escaped) |
//! | `include_file` | `path` | rendered HTML (not escaped) |
//! | `use_model` | `name` | model value, null when absent |
//! | `get_resource` | `path` | resource object or null |
//! | `child` | `path`, `name` | resource object or null |
//! | `children` | `path` | list of resource objects |
//! | `parent` | `path` | resource object or null |
//! | `value_map` | `path` | properties object or null |
//! | `find_resources` | `resource_type` or `pattern` | list of resource objects |
//!
//! A resource object is `{path, name, resource_type, properties}`.

use crate::components::CompiledTemplate;
use crate::globals::Globals;
use crate::render::RenderPipeline;
use crate::resolver::TypeMatcher;
use crate::resource::Resource;
use regex::Regex;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use tera::{Function, Tera};

/// Register every pipeline function on `tera` for one invocation.
pub fn register(
    tera: &mut Tera,
    pipeline: &Arc<RenderPipeline>,
    template: &Arc<CompiledTemplate>,
    globals: &Arc<Globals>,
) {
    tera.register_function(
        "resource",
        ResourceFunction {
            pipeline: Arc::clone(pipeline),
            globals: Arc::clone(globals),
        },
    );
    tera.register_function(
        "include_file",
        IncludeFunction {
            pipeline: Arc::clone(pipeline),
            template: Arc::clone(template),
            globals: Arc::clone(globals),
        },
    );
    tera.register_function(
        "use_model",
        UseModelFunction {
            pipeline: Arc::clone(pipeline),
            template: Arc::clone(template),
            globals: Arc::clone(globals),
        },
    );
    register_queries(tera, pipeline);
}

struct ResourceFunction {
    pipeline: Arc<RenderPipeline>,
    globals: Arc<Globals>,
}

impl Function for ResourceFunction {
    fn call(&self, args: &HashMap<String, Value>) -> tera::Result<Value> {
        let name = str_arg(args, "resource", "name")?;
        let resource_type = args.get("resource_type").and_then(Value::as_str);
        Ok(Value::String(self.pipeline.load_resource(
            name,
            resource_type,
            &self.globals,
        )))
    }

    fn is_safe(&self) -> bool {
        true
    }
}

struct IncludeFunction {
    pipeline: Arc<RenderPipeline>,
    template: Arc<CompiledTemplate>,
    globals: Arc<Globals>,
}

impl Function for IncludeFunction {
    fn call(&self, args: &HashMap<String, Value>) -> tera::Result<Value> {
        let path = str_arg(args, "include_file", "path")?;
        Ok(Value::String(self.pipeline.include_file(
            path,
            &self.template,
            &self.globals,
        )))
    }

    fn is_safe(&self) -> bool {
        true
    }
}

struct UseModelFunction {
    pipeline: Arc<RenderPipeline>,
    template: Arc<CompiledTemplate>,
    globals: Arc<Globals>,
}

impl Function for UseModelFunction {
    fn call(&self, args: &HashMap<String, Value>) -> tera::Result<Value> {
        let name = str_arg(args, "use_model", "name")?;
        Ok(self.pipeline.use_model(name, &self.template, &self.globals))
    }
}

// ============================================================================
// Resolver queries
// ============================================================================

fn register_queries(tera: &mut Tera, pipeline: &Arc<RenderPipeline>) {
    let p = Arc::clone(pipeline);
    tera.register_function(
        "get_resource",
        move |args: &HashMap<String, Value>| -> tera::Result<Value> {
            let path = str_arg(args, "get_resource", "path")?;
            Ok(optional(p.resolver().get_resource(path)))
        },
    );

    let p = Arc::clone(pipeline);
    tera.register_function(
        "child",
        move |args: &HashMap<String, Value>| -> tera::Result<Value> {
            let path = str_arg(args, "child", "path")?;
            let name = str_arg(args, "child", "name")?;
            let resolver = p.resolver();
            Ok(optional(
                resolver
                    .get_resource(path)
                    .and_then(|r| resolver.get_child(&r, name)),
            ))
        },
    );

    let p = Arc::clone(pipeline);
    tera.register_function(
        "children",
        move |args: &HashMap<String, Value>| -> tera::Result<Value> {
            let path = str_arg(args, "children", "path")?;
            let resolver = p.resolver();
            let children = resolver
                .get_resource(path)
                .map(|r| resolver.get_children(&r))
                .unwrap_or_default();
            Ok(Value::Array(children.iter().map(resource_value).collect()))
        },
    );

    let p = Arc::clone(pipeline);
    tera.register_function(
        "parent",
        move |args: &HashMap<String, Value>| -> tera::Result<Value> {
            let path = str_arg(args, "parent", "path")?;
            let resolver = p.resolver();
            Ok(optional(
                resolver
                    .get_resource(path)
                    .and_then(|r| resolver.get_parent(&r)),
            ))
        },
    );

    let p = Arc::clone(pipeline);
    tera.register_function(
        "value_map",
        move |args: &HashMap<String, Value>| -> tera::Result<Value> {
            let path = str_arg(args, "value_map", "path")?;
            Ok(p.resolver()
                .value_map(path)
                .map(|node| node.to_value())
                .unwrap_or(Value::Null))
        },
    );

    let p = Arc::clone(pipeline);
    tera.register_function(
        "find_resources",
        move |args: &HashMap<String, Value>| -> tera::Result<Value> {
            let matcher = match (
                args.get("resource_type").and_then(Value::as_str),
                args.get("pattern").and_then(Value::as_str),
            ) {
                (Some(exact), _) => TypeMatcher::from(exact),
                (None, Some(pattern)) => TypeMatcher::from(Regex::new(pattern).map_err(|e| {
                    tera::Error::msg(format!("find_resources: invalid pattern: {e}"))
                })?),
                (None, None) => {
                    return Err(tera::Error::msg(
                        "find_resources requires `resource_type` or `pattern`",
                    ));
                }
            };
            let found = p.resolver().find_resources(matcher);
            Ok(Value::Array(found.iter().map(resource_value).collect()))
        },
    );
}

fn str_arg<'a>(args: &'a HashMap<String, Value>, function: &str, key: &str) -> tera::Result<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| tera::Error::msg(format!("{function}() requires a string `{key}` argument")))
}

fn resource_value(resource: &Resource<'_>) -> Value {
    json!({
        "path": resource.path(),
        "name": resource.name(),
        "resource_type": resource.resource_type(),
        "properties": resource.value_map().to_value(),
    })
}

fn optional(resource: Option<Resource<'_>>) -> Value {
    resource.as_ref().map(resource_value).unwrap_or(Value::Null)
}
