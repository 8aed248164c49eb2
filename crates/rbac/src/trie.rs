//! Permission trie (§4.5): dotted-segment paths with `*` (single-segment)
//! and `**` (multi-segment-suffix) wildcards legal only in a *query*
//! pattern, never in a stored path.

use std::collections::HashMap;

#[derive(Debug, Default, Clone)]
struct TrieNode {
    children: HashMap<String, TrieNode>,
}

#[derive(Debug, Clone)]
pub struct Trie {
    case_sensitive: bool,
    root: TrieNode,
}

impl Default for Trie {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Trie {
    #[must_use]
    pub fn new(case_sensitive: bool) -> Self {
        Self {
            case_sensitive,
            root: TrieNode::default(),
        }
    }

    fn format_path(&self, path: &str) -> String {
        if self.case_sensitive {
            path.to_string()
        } else {
            path.to_lowercase()
        }
    }

    /// Insert a literal path. Rejects `*`/`**` segments — wildcards are
    /// legal only in a `check_path` query pattern, never in a stored path
    /// (§4.5).
    pub fn add_path(&mut self, path: &str) -> ncatbot_common::Result<()> {
        let formatted = self.format_path(path);
        let segments: Vec<&str> = formatted.split('.').collect();
        if segments.iter().any(|s| *s == "*" || *s == "**") {
            return Err(ncatbot_common::Error::InvalidPermissionPath(path.to_string()));
        }

        let mut node = &mut self.root;
        for segment in segments {
            node = node.children.entry(segment.to_string()).or_default();
        }
        Ok(())
    }

    /// Query the trie. `complete` requires the matched node to be a leaf
    /// (no children); otherwise any ancestor/prefix node along the matched
    /// path counts as a hit too (§4.5).
    #[must_use]
    pub fn check_path(&self, pattern: &str, complete: bool) -> bool {
        let formatted = self.format_path(pattern);
        let segments: Vec<&str> = formatted.split('.').collect();
        Self::check_rec(&self.root, &segments, complete)
    }

    fn check_rec(node: &TrieNode, segments: &[&str], complete: bool) -> bool {
        let Some((head, tail)) = segments.split_first() else {
            return if complete { node.children.is_empty() } else { true };
        };

        match *head {
            "**" => !node.children.is_empty(),
            "*" => node.children.values().any(|child| Self::check_rec(child, tail, complete)),
            literal => node
                .children
                .get(literal)
                .is_some_and(|child| Self::check_rec(child, tail, complete)),
        }
    }

    /// Delete a path (which may itself contain wildcards). `max_mod` also
    /// prunes now-empty ancestor nodes up to the root (§4.5).
    pub fn del_path(&mut self, path: &str, max_mod: bool) {
        let formatted = self.format_path(path);
        let segments: Vec<&str> = formatted.split('.').collect();
        Self::del_rec(&mut self.root, &segments, max_mod);
    }

    /// Returns whether `node` is now empty, so the caller can decide
    /// whether to prune it from its own parent.
    fn del_rec(node: &mut TrieNode, segments: &[&str], max_mod: bool) -> bool {
        let Some((head, tail)) = segments.split_first() else {
            return node.children.is_empty();
        };

        if *head == "**" {
            node.children.clear();
            return true;
        }

        if *head == "*" {
            let keys: Vec<String> = node.children.keys().cloned().collect();
            for key in keys {
                if tail.is_empty() {
                    node.children.remove(&key);
                    continue;
                }
                if let Some(child) = node.children.get_mut(&key) {
                    let empty = Self::del_rec(child, tail, max_mod);
                    if empty && max_mod {
                        node.children.remove(&key);
                    }
                }
            }
            return node.children.is_empty();
        }

        if tail.is_empty() {
            node.children.remove(*head);
            return node.children.is_empty();
        }

        if let Some(child) = node.children.get_mut(*head) {
            let empty = Self::del_rec(child, tail, max_mod);
            if empty && max_mod {
                node.children.remove(*head);
            }
        }
        node.children.is_empty()
    }

    /// Every full dotted path terminating at a leaf, used for persistence
    /// (§4.5 "restoration rebuilds the tries from leaf-path lists").
    #[must_use]
    pub fn leaves(&self) -> Vec<String> {
        let mut out = Vec::new();
        Self::collect_leaves(&self.root, &mut Vec::new(), &mut out);
        out
    }

    fn collect_leaves(node: &TrieNode, prefix: &mut Vec<String>, out: &mut Vec<String>) {
        if node.children.is_empty() {
            if !prefix.is_empty() {
                out.push(prefix.join("."));
            }
            return;
        }
        for (segment, child) in &node.children {
            prefix.push(segment.clone());
            Self::collect_leaves(child, prefix, out);
            prefix.pop();
        }
    }

    /// Rebuild from a flat list of leaf paths (inverse of [`Trie::leaves`]).
    #[must_use]
    pub fn from_leaves(case_sensitive: bool, leaves: &[String]) -> Self {
        let mut trie = Self::new(case_sensitive);
        for leaf in leaves {
            let _ = trie.add_path(leaf);
        }
        trie
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_check_literal_paths() {
        let mut trie = Trie::default();
        trie.add_path("a.b.c").unwrap();
        assert!(trie.check_path("a.b.c", false));
        assert!(trie.check_path("a.b", false));
        assert!(trie.check_path("a", false));
        assert!(!trie.check_path("a.b.d", false));
    }

    #[test]
    fn add_path_rejects_wildcards() {
        let mut trie = Trie::default();
        assert!(trie.add_path("a.*.c").is_err());
        assert!(trie.add_path("a.**").is_err());
    }

    #[test]
    fn complete_mode_requires_leaf() {
        let mut trie = Trie::default();
        trie.add_path("a.b.c").unwrap();
        assert!(trie.check_path("a.b.c", true));
        assert!(!trie.check_path("a.b", true));
    }

    #[test]
    fn single_wildcard_matches_any_child() {
        let mut trie = Trie::default();
        trie.add_path("a.b.c").unwrap();
        trie.add_path("a.d.e").unwrap();
        assert!(trie.check_path("a.*.c", false));
        assert!(trie.check_path("a.*.e", false));
        assert!(!trie.check_path("a.*.x", false));
    }

    #[test]
    fn double_wildcard_matches_any_descendant() {
        let mut trie = Trie::default();
        trie.add_path("a.b.c.d").unwrap();
        assert!(trie.check_path("a.**", false));
        assert!(trie.check_path("a.b.**", false));
        assert!(!trie.check_path("x.**", false));
    }

    #[test]
    fn del_path_preserves_siblings() {
        let mut trie = Trie::default();
        trie.add_path("a.b.c").unwrap();
        trie.add_path("a.b.d").unwrap();
        trie.del_path("a.b.c", false);
        assert!(!trie.check_path("a.b.c", true));
        assert!(trie.check_path("a.b.d", true));
    }

    #[test]
    fn del_path_with_max_mod_prunes_empty_ancestors() {
        let mut trie = Trie::default();
        trie.add_path("a.b.c").unwrap();
        trie.del_path("a.b.c", true);
        assert_eq!(trie.leaves(), Vec::<String>::new());
    }

    #[test]
    fn del_path_with_double_wildcard_clears_subtree() {
        let mut trie = Trie::default();
        trie.add_path("a.b.c").unwrap();
        trie.add_path("a.b.d.e").unwrap();
        trie.add_path("a.b.f").unwrap();
        trie.del_path("a.b.**", false);
        assert!(!trie.check_path("a.b.c", true));
        assert!(!trie.check_path("a.b.d.e", true));
        assert!(!trie.check_path("a.b.f", true));
    }

    #[test]
    fn case_insensitive_trie_folds_case() {
        let mut trie = Trie::new(false);
        trie.add_path("Plugin.Command").unwrap();
        assert!(trie.check_path("plugin.command", true));
    }

    #[test]
    fn leaves_round_trip_through_from_leaves() {
        let mut trie = Trie::default();
        trie.add_path("a.b.c").unwrap();
        trie.add_path("a.d").unwrap();
        let mut leaves = trie.leaves();
        leaves.sort();
        assert_eq!(leaves, vec!["a.b.c".to_string(), "a.d".to_string()]);

        let rebuilt = Trie::from_leaves(true, &leaves);
        assert!(rebuilt.check_path("a.b.c", true));
        assert!(rebuilt.check_path("a.d", true));
    }
}
