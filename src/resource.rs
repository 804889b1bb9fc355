//! Lightweight resource views.
//!
//! A [`Resource`] is a path, a resource type, and a borrow of the resolver.
//! It owns no content: every query goes back through the resolver, so two
//! views of the same path always agree. Equality is by path.

use crate::content::{ContentNode, path_name};
use crate::resolver::ResourceResolver;
use serde::Serialize;

#[derive(Debug, Clone)]
pub struct Resource<'r> {
    path: String,
    resource_type: String,
    resolver: &'r ResourceResolver,
}

impl<'r> Resource<'r> {
    pub(crate) fn new(path: &str, resource_type: String, resolver: &'r ResourceResolver) -> Self {
        Self {
            path: path.to_string(),
            resource_type,
            resolver,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn name(&self) -> &str {
        path_name(&self.path)
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    /// Stored properties. Synthetic resources have none.
    pub fn value_map(&self) -> &'r ContentNode {
        self.resolver
            .value_map(&self.path)
            .unwrap_or_else(|| ContentNode::empty())
    }

    pub fn children(&self) -> Vec<Resource<'r>> {
        self.resolver.get_children(self)
    }

    pub fn parent(&self) -> Option<Resource<'r>> {
        self.resolver.get_parent(self)
    }

    pub fn get_child(&self, name: &str) -> Option<Resource<'r>> {
        self.resolver.get_child(self, name)
    }

    pub fn resolver(&self) -> &'r ResourceResolver {
        self.resolver
    }

    /// The form templates see as `resource`.
    pub fn view(&self) -> ResourceView {
        ResourceView {
            path: self.path.clone(),
            name: self.name().to_string(),
            resource_type: self.resource_type.clone(),
        }
    }
}

impl PartialEq for Resource<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl Eq for Resource<'_> {}

/// Owned, serializable snapshot of a resource's identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceView {
    pub path: String,
    pub name: String,
    pub resource_type: String,
}
