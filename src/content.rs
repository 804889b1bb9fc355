//! Content nodes, resource-type derivation, and repository path helpers.
//!
//! A content node is the parsed form of one JSON object from the content
//! repository. Nodes have arbitrary shape; field access is explicit and returns
//! `None` for missing keys instead of assuming any particular schema.
//!
//! ## Resource Types
//!
//! Every node classifies itself with a resource type, derived by precedence:
//!
//! ```text
//! { "sling:resourceType": "site/components/teaser" }  →  site/components/teaser
//! { "jcr:primaryType": "cq:Page" }                     →  cq/Page
//! { "title": "no type fields" }                        →  nt/unstructured
//! ```
//!
//! [`ContentNode::resource_type`] is the only place this derivation happens.
//! The resolver, the render pipeline, and bindings all call it, so a node can
//! never be classified two different ways.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::LazyLock;

/// Field holding an explicit resource type.
pub const TYPE_HINT_FIELD: &str = "sling:resourceType";
/// Fallback field holding a namespace-qualified primary type (`cq:Page`).
pub const PRIMARY_TYPE_FIELD: &str = "jcr:primaryType";
/// Resource type of nodes carrying neither type field.
pub const DEFAULT_RESOURCE_TYPE: &str = "nt/unstructured";

static EMPTY_NODE: LazyLock<ContentNode> = LazyLock::new(ContentNode::default);

/// One node of the content repository: a mapping from field name to value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentNode(Map<String, Value>);

impl ContentNode {
    /// A shared node with no fields, used for content-less (synthetic) resources.
    pub fn empty() -> &'static ContentNode {
        &EMPTY_NODE
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// String value of a field, `None` when missing or not a string.
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(Value::as_str)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Clone into a JSON object value, the form templates receive.
    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }

    /// Derive the resource type: type hint, then primary type, then the default.
    pub fn resource_type(&self) -> String {
        if let Some(hint) = self.get_str(TYPE_HINT_FIELD).filter(|t| !t.is_empty()) {
            return hint.to_string();
        }
        if let Some(primary) = self.get_str(PRIMARY_TYPE_FIELD).filter(|t| !t.is_empty()) {
            return primary.replace(':', "/");
        }
        DEFAULT_RESOURCE_TYPE.to_string()
    }
}

impl From<Map<String, Value>> for ContentNode {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

// ============================================================================
// Repository paths
// ============================================================================

/// Normalize a repository path: leading slash, no empty segments, no trailing slash.
///
/// - `content//site/` → `/content/site`
/// - `` → `/`
pub fn normalize_path(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    format!("/{}", segments.join("/"))
}

/// Append a child name to a repository path.
pub fn join_path(parent: &str, name: &str) -> String {
    if parent.ends_with('/') {
        format!("{parent}{name}")
    } else {
        format!("{parent}/{name}")
    }
}

/// Immediate parent of a path. The root `/` has no parent.
pub fn parent_path(path: &str) -> Option<&str> {
    if path == "/" || path.is_empty() {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Last segment of a path (`/content/site/en` → `en`).
pub fn path_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}
