//! # Repo Pages
//!
//! Renders a content repository into static HTML. Content is a tree of JSON
//! nodes, presentation is a set of components addressed by resource type, and
//! a page is rendered by dispatching each node to its component, which in turn
//! pulls in its children.
//!
//! # Architecture
//!
//! ```text
//! content/<project>/**/*.json ─► tree ─► ContentTree (flat path → node map)
//!                                              │
//!                                              ▼
//!                                   resolver: ResourceResolver ─► resource: Resource
//!                                              │
//! apps/<project>/**/*.html ─► components ──────┤
//!   model.json / models/ ───► models ─► bindings (static, dynamic, `model`)
//!                                              │
//!                                              ▼
//!                      render: RenderPipeline ─► "<resourcePath>.html"
//! ```
//!
//! A render pass is one synchronous, deterministic run: the tree and the
//! compiled components are built once and shared read-only, pages are rendered
//! in parallel, and results are collected in tree order.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`content`] | Content nodes, resource type derivation, repository path helpers |
//! | [`tree`] | Flattens content files into a [`tree::ContentTree`] |
//! | [`resolver`] | Path lookup, navigation, type queries, synthetic resources |
//! | [`resource`] | Lightweight handle to one resolved node |
//! | [`globals`] | Structural variables every component invocation receives |
//! | [`models`] | Component models and importable model modules |
//! | [`bindings`] | Merges static, dynamic, and model bindings per invocation |
//! | [`components`] | Script resolution and the compile-once template registry |
//! | [`render`] | The recursive render pipeline and its recoverable failures |
//! | [`functions`] | Template functions bound to one invocation |
//! | [`site`] | A full pass: pages, standalone components, output collection |
//! | [`config`] | `pages.toml` loading, merging, and validation |
//! | [`deps`] | Records every file a pass reads |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Flat Tree, Borrowed Resources
//!
//! The tree is a `BTreeMap` keyed by absolute path rather than a linked node
//! graph. Children are a range scan, ordering is stable, and a
//! [`resource::Resource`] is just a path plus a borrow of the resolver. Nothing
//! points back up the tree, so there is nothing to keep alive.
//!
//! ## Tera For Components
//!
//! Component templates are [Tera](https://keats.github.io/tera/) files. Each
//! component is compiled once per pass together with everything it includes,
//! and cached by file. Rendering clones the compiled set and registers
//! functions (`resource`, `include_file`, `use_model`, resolver queries) bound
//! to that invocation, so templates see no shared mutable state.
//!
//! ## Failures Degrade Locally
//!
//! A component that fails to compile or render contributes empty output and is
//! logged; the rest of the page still renders. Content that cannot be parsed
//! fails the whole pass, because a partial tree would silently drop pages.

pub mod bindings;
pub mod components;
pub mod config;
pub mod content;
pub mod deps;
pub mod functions;
pub mod globals;
pub mod models;
pub mod output;
pub mod render;
pub mod resolver;
pub mod resource;
pub mod site;
pub mod tree;

#[cfg(test)]
pub(crate) mod test_helpers;
