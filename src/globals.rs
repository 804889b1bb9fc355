//! Per-invocation global state handed to templates and models.
//!
//! Globals are created fresh for every recursive render step. A resource
//! inclusion derives new globals for the included resource (inheriting the
//! page-wide values); a file inclusion reuses the caller's globals unchanged.

use crate::resource::{Resource, ResourceView};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;

/// Variables every template can reference regardless of configured bindings.
pub const STRUCTURAL_VARS: [&str; 5] = [
    "resource",
    "properties",
    "wcmmode",
    "page_properties",
    "resource_resolver",
];

/// Named binding values computed for one render step.
pub type Bindings = BTreeMap<String, Value>;

#[derive(Debug, Clone)]
pub struct Globals {
    pub resource: ResourceView,
    pub properties: Value,
    pub wcmmode: Value,
    pub page_properties: Value,
    pub resource_resolver: Value,
    pub bindings: Bindings,
    /// Recursion depth of the render step these globals belong to.
    pub depth: usize,
}

impl Globals {
    /// Top-level globals for a resource rendered outside any page.
    pub fn for_resource(resource: &Resource<'_>) -> Self {
        Self {
            resource: resource.view(),
            properties: resource.value_map().to_value(),
            wcmmode: disabled_wcmmode(),
            page_properties: Value::Null,
            resource_resolver: resource.resolver().handle(),
            bindings: Bindings::new(),
            depth: 0,
        }
    }

    /// Top-level globals for a page: page properties come from its content child.
    pub fn for_page(page: &Resource<'_>, content_child: &str) -> Self {
        let page_properties = page
            .get_child(content_child)
            .map(|c| c.value_map().to_value())
            .unwrap_or(Value::Null);
        Self {
            page_properties,
            ..Self::for_resource(page)
        }
    }

    /// Globals for a resource included from within this render step.
    pub fn child(&self, resource: &Resource<'_>) -> Self {
        Self {
            resource: resource.view(),
            properties: resource.value_map().to_value(),
            wcmmode: self.wcmmode.clone(),
            page_properties: self.page_properties.clone(),
            resource_resolver: self.resource_resolver.clone(),
            bindings: Bindings::new(),
            depth: self.depth + 1,
        }
    }

    /// Same globals one level deeper, for file inclusion.
    pub fn nested(&self) -> Self {
        Self {
            depth: self.depth + 1,
            ..self.clone()
        }
    }

    pub fn with_bindings(mut self, bindings: Bindings) -> Self {
        self.bindings.extend(bindings);
        self
    }

    /// Structural values plus bindings as one JSON object.
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("resource".into(), json!(self.resource));
        map.insert("properties".into(), self.properties.clone());
        map.insert("wcmmode".into(), self.wcmmode.clone());
        map.insert("page_properties".into(), self.page_properties.clone());
        map.insert("resource_resolver".into(), self.resource_resolver.clone());
        for (name, value) in &self.bindings {
            map.insert(name.clone(), value.clone());
        }
        Value::Object(map)
    }

    /// Template context with every declared variable present.
    ///
    /// Declared names without a value are inserted as null so templates can
    /// test them; names outside `declared` are left out entirely.
    pub fn to_context(&self, declared: &[String]) -> tera::Context {
        let mut context = tera::Context::new();
        context.insert("resource", &self.resource);
        context.insert("properties", &self.properties);
        context.insert("wcmmode", &self.wcmmode);
        context.insert("page_properties", &self.page_properties);
        context.insert("resource_resolver", &self.resource_resolver);
        for name in declared {
            let value = self.bindings.get(name).unwrap_or(&Value::Null);
            context.insert(name.as_str(), value);
        }
        context
    }
}

fn disabled_wcmmode() -> Value {
    json!({ "disabled": true })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::ResourceResolver;
    use crate::tree::ContentTree;

    fn resolver() -> ResourceResolver {
        ResourceResolver::new(
            ContentTree::from_value(
                "/content/site",
                json!({
                    "jcr:primaryType": "cq:Page",
                    "jcr:content": { "title": "Home", "hero": { "heading": "Hi" } }
                }),
            )
            .unwrap(),
        )
    }

    #[test]
    fn page_globals_read_content_child() {
        let r = resolver();
        let page = r.get_resource("/content/site").unwrap();
        let globals = Globals::for_page(&page, "jcr:content");
        assert_eq!(globals.page_properties["title"], "Home");
        assert_eq!(globals.wcmmode, json!({ "disabled": true }));
        assert_eq!(globals.resource.path, "/content/site");
    }

    #[test]
    fn page_without_content_child_has_null_page_properties() {
        let r = ResourceResolver::new(
            ContentTree::from_value("/content/site", json!({ "jcr:primaryType": "cq:Page" }))
                .unwrap(),
        );
        let page = r.get_resource("/content/site").unwrap();
        assert!(Globals::for_page(&page, "jcr:content").page_properties.is_null());
    }

    #[test]
    fn child_inherits_page_values_but_not_bindings() {
        let r = resolver();
        let page = r.get_resource("/content/site").unwrap();
        let mut bindings = Bindings::new();
        bindings.insert("model".into(), json!({ "x": 1 }));
        let parent = Globals::for_page(&page, "jcr:content").with_bindings(bindings);

        let hero = r.get_resource("/content/site/jcr:content/hero").unwrap();
        let child = parent.child(&hero);
        assert_eq!(child.page_properties, parent.page_properties);
        assert_eq!(child.properties["heading"], "Hi");
        assert!(child.bindings.is_empty());
        assert_eq!(child.depth, 1);
    }

    #[test]
    fn context_declares_missing_bindings_as_null() {
        let r = resolver();
        let page = r.get_resource("/content/site").unwrap();
        let globals = Globals::for_resource(&page);
        let context = globals.to_context(&["model".to_string(), "site_name".to_string()]);
        let json = context.into_json();
        assert!(json["model"].is_null());
        assert!(json.get("site_name").is_some());
        assert!(json.get("undeclared").is_none());
    }

    #[test]
    fn value_form_merges_bindings() {
        let r = resolver();
        let page = r.get_resource("/content/site").unwrap();
        let mut bindings = Bindings::new();
        bindings.insert("site_name".into(), json!("Demo"));
        let value = Globals::for_resource(&page).with_bindings(bindings).to_value();
        assert_eq!(value["site_name"], "Demo");
        assert_eq!(value["resource"]["name"], "site");
        assert!(value["page_properties"].is_null());
    }
}
