//! Path-based queries over a built [`ContentTree`].
//!
//! The resolver owns the tree for the duration of a render pass and hands out
//! [`Resource`] views that borrow it. Lookups of absent paths return `None`;
//! templates probe optional structure constantly, so absence is never an error.

use crate::content::{ContentNode, join_path, parent_path};
use crate::resource::Resource;
use crate::tree::ContentTree;
use regex::Regex;
use serde_json::{Value, json};

/// Selects resources by derived resource type.
#[derive(Debug, Clone)]
pub enum TypeMatcher {
    Exact(String),
    Pattern(Regex),
}

impl TypeMatcher {
    pub fn is_match(&self, resource_type: &str) -> bool {
        match self {
            TypeMatcher::Exact(t) => t == resource_type,
            TypeMatcher::Pattern(re) => re.is_match(resource_type),
        }
    }
}

impl From<&str> for TypeMatcher {
    fn from(value: &str) -> Self {
        TypeMatcher::Exact(value.to_string())
    }
}

impl From<String> for TypeMatcher {
    fn from(value: String) -> Self {
        TypeMatcher::Exact(value)
    }
}

impl From<Regex> for TypeMatcher {
    fn from(value: Regex) -> Self {
        TypeMatcher::Pattern(value)
    }
}

#[derive(Debug, Clone)]
pub struct ResourceResolver {
    tree: ContentTree,
}

impl ResourceResolver {
    pub fn new(tree: ContentTree) -> Self {
        Self { tree }
    }

    pub fn tree(&self) -> &ContentTree {
        &self.tree
    }

    /// Exact-path lookup.
    pub fn get_resource(&self, path: &str) -> Option<Resource<'_>> {
        self.tree
            .get(path)
            .map(|node| Resource::new(path, node.resource_type(), self))
    }

    pub fn get_child(&self, resource: &Resource<'_>, name: &str) -> Option<Resource<'_>> {
        self.get_resource(&join_path(resource.path(), name))
    }

    /// Resources exactly one segment below `resource`, in path order.
    pub fn get_children(&self, resource: &Resource<'_>) -> Vec<Resource<'_>> {
        self.tree
            .children_of(resource.path())
            .map(|(path, node)| Resource::new(path, node.resource_type(), self))
            .collect()
    }

    /// Immediate parent, `None` at the top of the tree.
    pub fn get_parent(&self, resource: &Resource<'_>) -> Option<Resource<'_>> {
        parent_path(resource.path()).and_then(|p| self.get_resource(p))
    }

    /// Stored node at `path`. `None` for synthetic or unknown paths.
    pub fn value_map(&self, path: &str) -> Option<&ContentNode> {
        self.tree.get(path)
    }

    /// Every resource whose derived type matches, in tree order.
    pub fn find_resources(&self, matcher: impl Into<TypeMatcher>) -> Vec<Resource<'_>> {
        let matcher = matcher.into();
        self.tree
            .iter()
            .filter_map(|(path, node)| {
                let resource_type = node.resource_type();
                matcher
                    .is_match(&resource_type)
                    .then(|| Resource::new(path, resource_type, self))
            })
            .collect()
    }

    /// A content-less resource at `path` with an explicit type.
    pub fn make_synthetic_resource(&self, path: &str, resource_type: &str) -> Resource<'_> {
        Resource::new(path, resource_type.to_string(), self)
    }

    /// Serializable handle exposed to templates as `resource_resolver`.
    ///
    /// Queries go through the resolver functions registered on the template
    /// runtime; the handle only identifies the tree being rendered.
    pub fn handle(&self) -> Value {
        json!({ "root": self.tree.root() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn resolver() -> ResourceResolver {
        let tree = ContentTree::from_value(
            "/content/site",
            json!({
                "jcr:primaryType": "cq:Page",
                "jcr:content": {
                    "sling:resourceType": "site/components/page",
                    "root": {
                        "sling:resourceType": "site/components/container",
                        "hero": { "sling:resourceType": "site/components/teaser" },
                        "teaser2": { "sling:resourceType": "site/components/teaser" },
                    }
                },
                "about": { "jcr:primaryType": "cq:Page" },
            }),
        )
        .unwrap();
        ResourceResolver::new(tree)
    }

    #[test]
    fn lookup_absent_path_is_none() {
        let r = resolver();
        assert!(r.get_resource("/content/site/missing").is_none());
        assert!(r.get_resource("/content/site").is_some());
    }

    #[test]
    fn child_lookup_probes_optional_structure() {
        let r = resolver();
        let page = r.get_resource("/content/site").unwrap();
        let content = r.get_child(&page, "jcr:content").unwrap();
        assert_eq!(content.resource_type(), "site/components/page");
        assert!(r.get_child(&page, "nope").is_none());
    }

    #[test]
    fn children_are_one_level_deep_and_stable() {
        let r = resolver();
        let root = r.get_resource("/content/site/jcr:content/root").unwrap();
        let first: Vec<String> = r
            .get_children(&root)
            .iter()
            .map(|c| c.path().to_string())
            .collect();
        let second: Vec<String> = r
            .get_children(&root)
            .iter()
            .map(|c| c.path().to_string())
            .collect();
        assert_eq!(
            first,
            vec![
                "/content/site/jcr:content/root/hero",
                "/content/site/jcr:content/root/teaser2"
            ]
        );
        assert_eq!(first, second);

        let page = r.get_resource("/content/site").unwrap();
        assert!(
            r.get_children(&page)
                .iter()
                .all(|c| c.path().matches('/').count() == 3)
        );
    }

    #[test]
    fn leaf_has_no_children() {
        let r = resolver();
        let hero = r.get_resource("/content/site/jcr:content/root/hero").unwrap();
        assert!(r.get_children(&hero).is_empty());
    }

    #[test]
    fn parent_of_tree_root_is_none() {
        let r = resolver();
        let page = r.get_resource("/content/site").unwrap();
        assert!(r.get_parent(&page).is_none());

        let content = r.get_resource("/content/site/jcr:content").unwrap();
        assert_eq!(r.get_parent(&content).unwrap().path(), "/content/site");
    }

    #[test]
    fn find_by_exact_type() {
        let r = resolver();
        let pages: Vec<String> = r
            .find_resources("cq/Page")
            .iter()
            .map(|p| p.path().to_string())
            .collect();
        assert_eq!(pages, vec!["/content/site", "/content/site/about"]);
    }

    #[test]
    fn find_by_pattern() {
        let r = resolver();
        let found = r.find_resources(Regex::new("^site/components/(teaser|container)$").unwrap());
        assert_eq!(found.len(), 3);
        assert!(found.iter().all(|f| f.resource_type() != "site/components/page"));
    }

    #[test]
    fn synthetic_resource_has_no_properties() {
        let r = resolver();
        let synthetic = r.make_synthetic_resource("/content/site/ghost", "site/components/text");
        assert_eq!(synthetic.resource_type(), "site/components/text");
        assert!(synthetic.value_map().is_empty());
        assert!(r.value_map("/content/site/ghost").is_none());
    }
}
