//! Hierarchical diagnostic tree
//!
//! Accumulates nested findings with severity, deduplicates by path, and
//! renders a compact markdown report. Knows nothing about schemas: callers
//! build paths out of labels and values, then describe the nodes that matter.

use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Severity
// =============================================================================

/// Severity of a diagnostic finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warn,
    Danger,
}

impl Severity {
    /// Glyph used when rendering bullet lines
    pub fn glyph(&self) -> &'static str {
        match self {
            Severity::Info => "🔵",
            Severity::Warn => "🟡",
            Severity::Danger => "🔴",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warn => write!(f, "warning"),
            Severity::Danger => write!(f, "danger"),
        }
    }
}

// =============================================================================
// Tree
// =============================================================================

/// Handle to a node in a [`DiagTree`] arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

#[derive(Debug, Clone)]
struct DiagNode {
    title: String,
    parent: Option<NodeId>,
    /// Insertion-ordered, uniquely titled. First write wins on collision.
    children: Vec<NodeId>,
    description: Option<String>,
    severity: Option<Severity>,
    visible: bool,
}

/// A node visited by [`DiagTree::walk_displayed`]
#[derive(Debug, Clone, Serialize)]
pub struct DisplayedNode {
    /// Root-to-node titles, collapsed chains included
    pub path: Vec<String>,
    /// Display depth after chain collapsing
    pub depth: usize,
    pub severity: Option<Severity>,
    pub description: Option<String>,
}

/// Arena-backed diagnostic tree.
///
/// The parent link is a plain index into the arena, giving the mutable
/// visibility bubbling of `set_description` without shared ownership.
#[derive(Debug, Clone)]
pub struct DiagTree {
    nodes: Vec<DiagNode>,
}

impl Default for DiagTree {
    fn default() -> Self {
        Self::new()
    }
}

impl DiagTree {
    pub fn new() -> Self {
        Self {
            nodes: vec![DiagNode {
                title: String::new(),
                parent: None,
                children: Vec::new(),
                description: None,
                severity: None,
                visible: false,
            }],
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Create-or-fetch a uniquely titled child
    pub fn label(&mut self, parent: NodeId, name: &str) -> NodeId {
        self.child_with_title(parent, name.to_string())
    }

    /// Create-or-fetch a child titled with a backquoted literal
    pub fn value(&mut self, parent: NodeId, literal: &str) -> NodeId {
        self.child_with_title(parent, format!("`{}`", literal))
    }

    fn child_with_title(&mut self, parent: NodeId, title: String) -> NodeId {
        if let Some(existing) = self.nodes[parent.0]
            .children
            .iter()
            .find(|c| self.nodes[c.0].title == title)
        {
            return *existing;
        }
        let id = NodeId(self.nodes.len());
        self.nodes.push(DiagNode {
            title,
            parent: Some(parent),
            children: Vec::new(),
            description: None,
            severity: None,
            visible: false,
        });
        self.nodes[parent.0].children.push(id);
        id
    }

    /// Mark a node as a finding. The message and severity land on this node
    /// only; visibility bubbles up the whole ancestor chain.
    pub fn set_description(&mut self, node: NodeId, severity: Severity, message: impl Into<String>) {
        self.nodes[node.0].description = Some(message.into());
        self.nodes[node.0].severity = Some(severity);
        let mut cursor = Some(node);
        while let Some(id) = cursor {
            self.nodes[id.0].visible = true;
            cursor = self.nodes[id.0].parent;
        }
    }

    /// Root-to-node titles (root itself is untitled and excluded)
    pub fn path_titles(&self, node: NodeId) -> Vec<String> {
        let mut titles = Vec::new();
        let mut cursor = Some(node);
        while let Some(id) = cursor {
            if self.nodes[id.0].parent.is_some() {
                titles.push(self.nodes[id.0].title.clone());
            }
            cursor = self.nodes[id.0].parent;
        }
        titles.reverse();
        titles
    }

    /// Highest severity among all findings
    pub fn max_severity(&self) -> Option<Severity> {
        self.nodes.iter().filter_map(|n| n.severity).max()
    }

    /// Number of described nodes in the tree
    pub fn described_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.description.is_some()).count()
    }

    /// Drop invisible subtrees. Idempotent; rendering already skips invisible
    /// nodes, so this only detaches them from their parents.
    pub fn prune(&mut self) {
        for idx in 0..self.nodes.len() {
            let kept: Vec<NodeId> = self.nodes[idx]
                .children
                .iter()
                .copied()
                .filter(|c| self.nodes[c.0].visible)
                .collect();
            self.nodes[idx].children = kept;
        }
    }

    fn visible_children_sorted(&self, node: NodeId) -> Vec<NodeId> {
        let mut kids: Vec<NodeId> = self.nodes[node.0]
            .children
            .iter()
            .copied()
            .filter(|c| self.nodes[c.0].visible)
            .collect();
        kids.sort_by(|a, b| self.nodes[a.0].title.cmp(&self.nodes[b.0].title));
        kids
    }

    /// Collapse a chain of description-less nodes with a unique visible
    /// child. Returns the joined titles and the terminal node.
    fn collapse_chain(&self, start: NodeId) -> (Vec<String>, NodeId) {
        let mut titles = vec![self.nodes[start.0].title.clone()];
        let mut current = start;
        loop {
            if self.nodes[current.0].description.is_some() {
                break;
            }
            let kids = self.visible_children_sorted(current);
            if kids.len() != 1 {
                break;
            }
            current = kids[0];
            titles.push(self.nodes[current.0].title.clone());
        }
        (titles, current)
    }

    /// Render the tree depth-first, alphabetically among siblings, writing at
    /// most `max_items` described nodes (`-1` = unlimited). Returns the count
    /// of described nodes actually written.
    pub fn display<W: fmt::Write>(&self, w: &mut W, max_items: i64) -> Result<usize, fmt::Error> {
        let mut written = 0usize;
        for child in self.visible_children_sorted(self.root()) {
            if !self.display_node(w, child, 0, max_items, &mut written)? {
                break;
            }
        }
        Ok(written)
    }

    fn display_node<W: fmt::Write>(
        &self,
        w: &mut W,
        node: NodeId,
        depth: usize,
        max_items: i64,
        written: &mut usize,
    ) -> Result<bool, fmt::Error> {
        let (titles, terminal) = self.collapse_chain(node);
        let term = &self.nodes[terminal.0];

        if term.description.is_some() && max_items >= 0 && *written as i64 >= max_items {
            return Ok(false);
        }

        let mut text = titles.join(": ");
        if let Some(desc) = &term.description {
            text.push_str(": ");
            text.push_str(desc);
        }
        let glyph = term.severity.map(|s| s.glyph());

        match depth {
            0 => match glyph {
                Some(g) if term.description.is_some() => writeln!(w, "### {} {}", g, text)?,
                _ => writeln!(w, "### {}", text)?,
            },
            1 => match glyph {
                Some(g) if term.description.is_some() => writeln!(w, "#### {} {}", g, text)?,
                _ => writeln!(w, "#### {}", text)?,
            },
            _ => {
                let indent = "    ".repeat(depth - 2);
                match glyph {
                    Some(g) => writeln!(w, "{}- {} {}", indent, g, text)?,
                    None => writeln!(w, "{}- {}", indent, text)?,
                }
            }
        }
        if term.description.is_some() {
            *written += 1;
        }

        for child in self.visible_children_sorted(terminal) {
            if !self.display_node(w, child, depth + 1, max_items, written)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Walk exactly what `display` would render, without formatting. Gives
    /// the render layer read-only access to visibility and collapsing.
    pub fn walk_displayed<F: FnMut(&DisplayedNode)>(&self, mut visit: F) {
        for child in self.visible_children_sorted(self.root()) {
            self.walk_node(child, 0, &Vec::new(), &mut visit);
        }
    }

    fn walk_node<F: FnMut(&DisplayedNode)>(
        &self,
        node: NodeId,
        depth: usize,
        prefix: &[String],
        visit: &mut F,
    ) {
        let (titles, terminal) = self.collapse_chain(node);
        let term = &self.nodes[terminal.0];
        let mut path = prefix.to_vec();
        path.extend(titles);
        let entry = DisplayedNode {
            path: path.clone(),
            depth,
            severity: term.severity,
            description: term.description.clone(),
        };
        visit(&entry);
        for child in self.visible_children_sorted(terminal) {
            self.walk_node(child, depth + 1, &path, visit);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn described(tree: &DiagTree) -> Vec<(Vec<String>, Severity, String)> {
        let mut out = Vec::new();
        tree.walk_displayed(|n| {
            if let (Some(sev), Some(desc)) = (n.severity, n.description.clone()) {
                out.push((n.path.clone(), sev, desc));
            }
        });
        out
    }

    #[test]
    fn test_label_is_create_or_fetch() {
        let mut tree = DiagTree::new();
        let root = tree.root();
        let a = tree.label(root, "Resources");
        let b = tree.label(root, "Resources");
        assert_eq!(a, b);
    }

    #[test]
    fn test_visibility_bubbles_to_root() {
        let mut tree = DiagTree::new();
        let root = tree.root();
        let res = tree.label(root, "Resources");
        let tok = tree.value(res, "pkg:index:Widget");
        let inputs = tree.label(tok, "inputs");
        let prop = tree.value(inputs, "name");
        tree.set_description(prop, Severity::Warn, "missing");

        let items = described(&tree);
        assert_eq!(items.len(), 1);
        assert_eq!(
            items[0].0,
            vec!["Resources", "`pkg:index:Widget`", "inputs", "`name`"]
        );
    }

    #[test]
    fn test_invisible_siblings_not_displayed() {
        let mut tree = DiagTree::new();
        let root = tree.root();
        let res = tree.label(root, "Resources");
        let good = tree.value(res, "pkg:index:Ok");
        let bad = tree.value(res, "pkg:index:Bad");
        tree.label(good, "inputs");
        tree.set_description(bad, Severity::Danger, "missing");
        tree.prune();

        let mut out = String::new();
        let count = tree.display(&mut out, -1).unwrap();
        assert_eq!(count, 1);
        assert!(out.contains("pkg:index:Bad"));
        assert!(!out.contains("pkg:index:Ok"));
    }

    #[test]
    fn test_chain_collapses_to_one_line() {
        let mut tree = DiagTree::new();
        let root = tree.root();
        let res = tree.label(root, "Resources");
        let tok = tree.value(res, "pkg:index:Widget");
        let inputs = tree.label(tok, "inputs");
        let prop = tree.value(inputs, "name");
        tree.set_description(prop, Severity::Warn, "missing");

        let mut out = String::new();
        tree.display(&mut out, -1).unwrap();
        // Resources has one visible child so the whole chain joins.
        assert_eq!(
            out,
            "### 🟡 Resources: `pkg:index:Widget`: inputs: `name`: missing\n"
        );
    }

    #[test]
    fn test_display_respects_max_items() {
        let mut tree = DiagTree::new();
        let root = tree.root();
        let res = tree.label(root, "Resources");
        for tok in ["pkg:a:A", "pkg:b:B", "pkg:c:C"] {
            let node = tree.value(res, tok);
            tree.set_description(node, Severity::Danger, "missing");
        }
        let mut out = String::new();
        let count = tree.display(&mut out, 2).unwrap();
        assert_eq!(count, 2);
        assert!(out.contains("pkg:a:A"));
        assert!(out.contains("pkg:b:B"));
        assert!(!out.contains("pkg:c:C"));
    }

    #[test]
    fn test_siblings_render_alphabetically() {
        let mut tree = DiagTree::new();
        let root = tree.root();
        let res = tree.label(root, "Resources");
        for tok in ["pkg:z:Z", "pkg:a:A"] {
            let node = tree.value(res, tok);
            tree.set_description(node, Severity::Warn, "missing");
        }
        let mut out = String::new();
        tree.display(&mut out, -1).unwrap();
        let a = out.find("pkg:a:A").unwrap();
        let z = out.find("pkg:z:Z").unwrap();
        assert!(a < z);
    }

    #[test]
    fn test_prune_is_idempotent() {
        let mut tree = DiagTree::new();
        let root = tree.root();
        let res = tree.label(root, "Resources");
        let bad = tree.value(res, "pkg:a:A");
        tree.value(res, "pkg:b:B");
        tree.set_description(bad, Severity::Warn, "missing");

        tree.prune();
        let once = described(&tree);
        tree.prune();
        let twice = described(&tree);
        assert_eq!(once.len(), twice.len());
    }
}
