//! Content tree building: JSON files → flattened, path-keyed node map.
//!
//! Stage 1 of a render pass. Reads every content file below the project's
//! content root and "explodes" each one into the tree: the file's object lands
//! at the file's path, and every object-valued field, at any depth, lands at
//! `<parentPath>/<fieldName>`.
//!
//! ## Path Derivation
//!
//! ```text
//! repository/
//! └── content/site/
//!     ├── index.json          → /content/site            (index names its directory)
//!     ├── about.json          → /content/site/about
//!     └── en/
//!         └── news.json       → /content/site/en/news
//!             { "jcr:content": { "hero": {..} } }
//!                             → /content/site/en/news/jcr:content
//!                             → /content/site/en/news/jcr:content/hero
//! ```
//!
//! Arrays are leaf values: neither scalar lists nor objects inside lists get
//! their own paths.
//!
//! ## Failure Policy
//!
//! A malformed file fails the whole build; partial trees are never returned.
//! Two sources mapping to the same path are also fatal, so every node in the
//! tree has exactly one origin.

use crate::content::{ContentNode, join_path, normalize_path};
use crate::deps::DependencyTracker;
use rayon::prelude::*;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::ops::Bound;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};
use walkdir::WalkDir;

/// File stem that names its containing directory instead of itself.
pub const ROOT_MARKER: &str = "index";
/// Nesting limit applied when no explicit one is configured.
pub const DEFAULT_MAX_DEPTH: usize = 64;

#[derive(Error, Debug)]
pub enum TreeError {
    #[error("Content root not found: {0}")]
    MissingRoot(PathBuf),
    #[error("Cannot read content file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Cannot walk content directory: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("Malformed content file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("Content file must contain a JSON object: {0}")]
    NotAnObject(PathBuf),
    #[error("Content path {path} is defined by both {first} and {second}")]
    PathCollision {
        path: String,
        first: PathBuf,
        second: PathBuf,
    },
    #[error("Content nested deeper than {limit} levels at {path}")]
    TooDeep { path: String, limit: usize },
}

/// Flattened content repository: absolute path → node.
///
/// Iteration is in path order, which makes every query over the tree
/// deterministic across runs.
#[derive(Debug, Clone, Default)]
pub struct ContentTree {
    root: String,
    nodes: BTreeMap<String, ContentNode>,
}

impl ContentTree {
    /// An empty tree whose content root is `root`.
    pub fn new(root: &str) -> Self {
        Self {
            root: normalize_path(root),
            nodes: BTreeMap::new(),
        }
    }

    /// Build a tree from a single JSON object exploded at `path`.
    ///
    /// Handy for tests and for hosts that assemble content in memory.
    pub fn from_value(path: &str, value: Value) -> Result<Self, TreeError> {
        let Value::Object(map) = value else {
            return Err(TreeError::NotAnObject(PathBuf::from(path)));
        };
        let mut tree = Self::new(path);
        let mut origins = HashMap::new();
        let root = tree.root.clone();
        explode(
            &mut tree,
            &mut origins,
            &root,
            map,
            Path::new(path),
            0,
            DEFAULT_MAX_DEPTH,
        )?;
        Ok(tree)
    }

    /// Path of the project's content root (e.g. `/content/site`).
    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn get(&self, path: &str) -> Option<&ContentNode> {
        self.nodes.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.nodes.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ContentNode)> {
        self.nodes.iter().map(|(p, n)| (p.as_str(), n))
    }

    /// Entries exactly one segment below `path`.
    pub fn children_of<'a>(
        &'a self,
        path: &str,
    ) -> impl Iterator<Item = (&'a str, &'a ContentNode)> + 'a {
        let prefix = if path.ends_with('/') {
            path.to_string()
        } else {
            format!("{path}/")
        };
        let start = prefix.clone();
        let prefix_len = prefix.len();
        self.nodes
            .range::<String, _>((Bound::Excluded(start), Bound::Unbounded))
            .take_while(move |(p, _)| p.starts_with(&prefix))
            .filter(move |(p, _)| !p[prefix_len..].contains('/'))
            .map(|(p, n)| (p.as_str(), n))
    }

    fn insert(&mut self, path: String, node: ContentNode) {
        self.nodes.insert(path, node);
    }
}

/// Reads content files below `<repo>/<content_root>` into a [`ContentTree`].
#[derive(Debug, Clone)]
pub struct ContentTreeBuilder {
    repo_dir: PathBuf,
    content_root: PathBuf,
    max_depth: usize,
}

impl ContentTreeBuilder {
    /// `content_root` is relative to `repo_dir` (e.g. `content/site`).
    pub fn new(repo_dir: impl Into<PathBuf>, content_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
            content_root: content_root.into(),
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Repository path of the content root (`content/site` → `/content/site`).
    pub fn root_path(&self) -> String {
        normalize_path(&to_repo_path(&self.content_root))
    }

    pub fn build(&self, deps: &DependencyTracker) -> Result<ContentTree, TreeError> {
        let root_dir = self.repo_dir.join(&self.content_root);
        if !root_dir.is_dir() {
            return Err(TreeError::MissingRoot(root_dir));
        }

        let files = collect_content_files(&root_dir)?;
        debug!(count = files.len(), root = %root_dir.display(), "Found content files");

        // Parse in parallel, insert sequentially so collisions are reported
        // against a stable first owner.
        let parsed = files
            .par_iter()
            .map(|file| self.read_content(file))
            .collect::<Result<Vec<_>, _>>()?;

        let mut tree = ContentTree::new(&self.root_path());
        let mut origins = HashMap::new();
        for (file, content_path, object) in parsed {
            deps.record(&file);
            explode(
                &mut tree,
                &mut origins,
                &content_path,
                object,
                &file,
                0,
                self.max_depth,
            )?;
        }

        info!(nodes = tree.len(), root = tree.root(), "Built content tree");
        Ok(tree)
    }

    fn read_content(&self, file: &Path) -> Result<(PathBuf, String, Map<String, Value>), TreeError> {
        let source = fs::read_to_string(file).map_err(|source| TreeError::Io {
            path: file.to_path_buf(),
            source,
        })?;
        let value: Value = serde_json::from_str(&source).map_err(|source| TreeError::Parse {
            path: file.to_path_buf(),
            source,
        })?;
        let Value::Object(object) = value else {
            return Err(TreeError::NotAnObject(file.to_path_buf()));
        };
        Ok((file.to_path_buf(), self.content_path(file), object))
    }

    /// Repository path for a content file: its directory relative to the
    /// repository, plus its stem unless the stem is [`ROOT_MARKER`].
    pub fn content_path(&self, file: &Path) -> String {
        let relative = file.strip_prefix(&self.repo_dir).unwrap_or(file);
        let dir = relative.parent().map(to_repo_path).unwrap_or_default();
        let stem = file
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        if stem == ROOT_MARKER {
            normalize_path(&dir)
        } else {
            normalize_path(&format!("{dir}/{stem}"))
        }
    }
}

fn to_repo_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .filter(|c| c != "/" && c != ".")
        .collect::<Vec<_>>()
        .join("/")
}

fn collect_content_files(root: &Path) -> Result<Vec<PathBuf>, TreeError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy();
        if name.starts_with('.') || !entry.file_type().is_file() {
            continue;
        }
        let is_json = entry
            .path()
            .extension()
            .map(|e| e.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        if is_json {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// Insert `object` at `path`, then recurse into every object-valued field.
fn explode(
    tree: &mut ContentTree,
    origins: &mut HashMap<String, PathBuf>,
    path: &str,
    object: Map<String, Value>,
    source: &Path,
    depth: usize,
    max_depth: usize,
) -> Result<(), TreeError> {
    if depth > max_depth {
        return Err(TreeError::TooDeep {
            path: path.to_string(),
            limit: max_depth,
        });
    }
    if let Some(first) = origins.get(path) {
        return Err(TreeError::PathCollision {
            path: path.to_string(),
            first: first.clone(),
            second: source.to_path_buf(),
        });
    }
    origins.insert(path.to_string(), source.to_path_buf());

    for (field, value) in &object {
        let Value::Object(child) = value else {
            continue;
        };
        if field.is_empty() || field.contains('/') {
            debug!(path, field, "Skipping field that cannot form a path segment");
            continue;
        }
        explode(
            tree,
            origins,
            &join_path(path, field),
            child.clone(),
            source,
            depth + 1,
            max_depth,
        )?;
    }

    tree.insert(path.to_string(), ContentNode::from(object));
    Ok(())
}
