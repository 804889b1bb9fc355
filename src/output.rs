//! CLI output formatting for the render commands.
//!
//! # Information-First Display
//!
//! Every entity (content node, page, component) leads with its positional
//! index and identity; secondary context such as the resource type or output
//! file follows on the same line or indented below.
//!
//! # Output Format
//!
//! ## Tree
//!
//! ```text
//! Content
//! 001 site (cq/Page)
//!     001 about (cq/Page)
//!         001 jcr:content (site/components/page)
//!     002 jcr:content (site/components/page)
//!         001 root (site/components/container)
//!
//! 5 nodes
//! ```
//!
//! ## Check
//!
//! ```text
//! Pages
//! 001 /content/site
//! 002 /content/site/about
//!
//! Components
//! 001 /content/site/jcr:content/root/hero
//!
//! Templates
//!     9 compiled, 1 failed
//! ```
//!
//! ## Render
//!
//! ```text
//! Pages
//! 001 /content/site → content/site.html
//!
//! Components
//! 001 /content/site/jcr:content/root/hero → content/site/jcr:content/root/hero.html
//!
//! Rendered 1 page, 1 component (0 failures, 14 dependencies)
//! ```
//!
//! # Architecture
//!
//! Each command has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format functions
//! are pure: no I/O, no side effects.

use crate::content::path_name;
use crate::site::{CheckReport, OutputKind, SiteOutput};
use crate::tree::ContentTree;

// ============================================================================
// Shared display helpers
// ============================================================================

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// `1 page`, `2 pages`: count followed by the matching noun form.
fn plural(count: usize, one: &str, many: &str) -> String {
    let word = if count == 1 { one } else { many };
    format!("{count} {word}")
}

fn numbered_section(title: &str, items: &[String]) -> Vec<String> {
    let mut lines = vec![title.to_string()];
    if items.is_empty() {
        lines.push(format!("{}(none)", indent(1)));
    }
    for (i, item) in items.iter().enumerate() {
        lines.push(format!("{} {}", format_index(i + 1), item));
    }
    lines
}

// ============================================================================
// Tree output
// ============================================================================

/// Format the content tree, one node per line, children indented.
pub fn format_tree_output(tree: &ContentTree) -> Vec<String> {
    let mut lines = vec!["Content".to_string()];
    if let Some(root) = tree.get(tree.root()) {
        lines.push(format!(
            "{} {} ({})",
            format_index(1),
            path_name(tree.root()),
            root.resource_type()
        ));
        walk_tree(tree, tree.root(), 1, &mut lines);
    }
    lines.push(String::new());
    lines.push(plural(tree.len(), "node", "nodes"));
    lines
}

fn walk_tree(tree: &ContentTree, path: &str, depth: usize, lines: &mut Vec<String>) {
    for (i, (child_path, node)) in tree.children_of(path).enumerate() {
        lines.push(format!(
            "{}{} {} ({})",
            indent(depth),
            format_index(i + 1),
            path_name(child_path),
            node.resource_type()
        ));
        walk_tree(tree, child_path, depth + 1, lines);
    }
}

pub fn print_tree_output(tree: &ContentTree) {
    for line in format_tree_output(tree) {
        println!("{}", line);
    }
}

// ============================================================================
// Check output
// ============================================================================

/// Format the result of validating a repository.
pub fn format_check_output(report: &CheckReport) -> Vec<String> {
    let mut lines = numbered_section("Pages", &report.pages);
    lines.push(String::new());
    lines.extend(numbered_section("Components", &report.components));
    lines.push(String::new());
    lines.push("Templates".to_string());
    lines.push(format!(
        "{}{} compiled, {} failed",
        indent(1),
        report.templates_compiled,
        report.templates_failed
    ));
    lines.push(String::new());
    lines.push(plural(report.nodes, "content node", "content nodes"));
    lines
}

pub fn print_check_output(report: &CheckReport) {
    for line in format_check_output(report) {
        println!("{}", line);
    }
}

// ============================================================================
// Render output
// ============================================================================

/// Format rendered outputs grouped by kind, then a summary line.
pub fn format_render_output(output: &SiteOutput) -> Vec<String> {
    let entries = |kind: OutputKind| -> Vec<String> {
        output
            .files
            .iter()
            .filter(|(_, f)| f.kind == kind)
            .map(|(key, f)| format!("{} → {}", f.resource_path, key.trim_start_matches('/')))
            .collect()
    };

    let mut lines = numbered_section("Pages", &entries(OutputKind::Page));
    let components = entries(OutputKind::Component);
    if !components.is_empty() {
        lines.push(String::new());
        lines.extend(numbered_section("Components", &components));
    }
    lines.push(String::new());
    lines.push(format!(
        "Rendered {}, {} ({}, {})",
        plural(output.pages, "page", "pages"),
        plural(output.components, "component", "components"),
        plural(output.failures, "failure", "failures"),
        plural(output.dependencies.len(), "dependency", "dependencies"),
    ));
    if output.duplicates > 0 {
        lines.push(format!(
            "{}{} dropped (output path already rendered)",
            indent(1),
            plural(output.duplicates, "duplicate", "duplicates")
        ));
    }
    lines
}

pub fn print_render_output(output: &SiteOutput) {
    for line in format_render_output(output) {
        println!("{}", line);
    }
}
