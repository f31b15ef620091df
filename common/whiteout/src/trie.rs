// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::collections::BTreeMap;

/// In-memory prefix trie over path components tracking which paths have
/// been explicitly recorded as whited-out. A path is considered whited-out
/// if itself or any ancestor carries the `recorded` flag.
#[derive(Default)]
pub struct Trie {
    root: Node,
}

#[derive(Default)]
struct Node {
    recorded: bool,
    children: BTreeMap<String, Node>,
}

impl Trie {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, path: &str) {
        let mut node = &mut self.root;
        for (component, _) in pathutil::split_components(path) {
            node = node.children.entry(component.to_string()).or_default();
        }
        node.recorded = true;
    }

    pub fn remove(&mut self, path: &str) {
        let mut node = &mut self.root;
        for (component, _) in pathutil::split_components(path) {
            match node.children.get_mut(component) {
                Some(child) => node = child,
                None => return,
            }
        }
        node.recorded = false;
    }

    pub fn query(&self, path: &str) -> bool {
        let mut node = &self.root;
        for (component, _) in pathutil::split_components(path) {
            match node.children.get(component) {
                Some(child) => {
                    if child.recorded {
                        return true;
                    }
                    node = child;
                }
                None => return false,
            }
        }
        false
    }

    /// Lists every recorded path in sorted order.
    pub fn recorded_paths(&self) -> Vec<String> {
        let mut out = Vec::new();
        Self::collect(&self.root, &mut Vec::new(), &mut out);
        out
    }

    fn collect(node: &Node, prefix: &mut Vec<String>, out: &mut Vec<String>) {
        if node.recorded {
            out.push(prefix.join("/"));
        }
        for (name, child) in &node.children {
            prefix.push(name.clone());
            Self::collect(child, prefix, out);
            prefix.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_and_query() {
        let mut t = Trie::new();
        t.record("a/b");
        assert!(t.query("a/b"));
        assert!(t.query("a/b/c"));
        assert!(!t.query("a"));
        assert!(!t.query("a/c"));
    }

    #[test]
    fn remove_clears_direct_record_only() {
        let mut t = Trie::new();
        t.record("a/b");
        t.record("a/b/c");
        t.remove("a/b");
        assert!(!t.query("a/b"));
        assert!(t.query("a/b/c"));
    }

    #[test]
    fn recorded_paths_sorted() {
        let mut t = Trie::new();
        t.record("b");
        t.record("a");
        assert_eq!(t.recorded_paths(), vec!["a".to_string(), "b".to_string()]);
    }
}
