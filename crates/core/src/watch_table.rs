//! Bidirectional watch token ↔ directory path table
//!
//! Both directions are updated by every mutation, so a lookup in one map
//! always agrees with the other. Callers hold the monitor's mutex around
//! the table, which keeps each mutation inside one critical section.

use std::collections::HashMap;
use std::hash::Hash;
use std::path::{Path, PathBuf};

/// Strip trailing separators and `.` components
pub fn normalize_path(path: &Path) -> PathBuf {
    path.components().collect()
}

/// Watched directories keyed by native token and by path
#[derive(Debug)]
pub struct WatchTable<T> {
    by_token: HashMap<T, PathBuf>,
    by_path: HashMap<PathBuf, T>,
}

impl<T: Hash + Eq + Clone> WatchTable<T> {
    pub fn new() -> Self {
        Self {
            by_token: HashMap::new(),
            by_path: HashMap::new(),
        }
    }

    /// Associate `token` with `path`
    ///
    /// Any stale association of either side is dropped first.
    pub fn insert(&mut self, token: T, path: &Path) {
        let path = normalize_path(path);

        if let Some(old_path) = self.by_token.remove(&token) {
            self.by_path.remove(&old_path);
        }
        if let Some(old_token) = self.by_path.remove(&path) {
            self.by_token.remove(&old_token);
        }

        self.by_token.insert(token.clone(), path.clone());
        self.by_path.insert(path, token);
    }

    pub fn path_of(&self, token: &T) -> Option<&Path> {
        self.by_token.get(token).map(PathBuf::as_path)
    }

    pub fn token_of(&self, path: &Path) -> Option<&T> {
        self.by_path.get(&normalize_path(path))
    }

    pub fn contains_path(&self, path: &Path) -> bool {
        self.by_path.contains_key(&normalize_path(path))
    }

    /// Forget the entry for `token`, returning its path
    pub fn remove_token(&mut self, token: &T) -> Option<PathBuf> {
        let path = self.by_token.remove(token)?;
        self.by_path.remove(&path);
        Some(path)
    }

    /// Take `prefix` and every directory below it out of the table
    ///
    /// The native watches stay alive; the returned subtree can be put back
    /// under a new path with [`WatchTable::reattach`] or released by its
    /// tokens. A directory later registered at `prefix` does not collide
    /// with the detached entries.
    pub fn detach_prefix(&mut self, prefix: &Path) -> DetachedSubtree<T> {
        let prefix = normalize_path(prefix);
        let doomed: Vec<PathBuf> = self
            .by_path
            .keys()
            .filter(|p| p.starts_with(&prefix))
            .cloned()
            .collect();

        let mut entries = Vec::with_capacity(doomed.len());
        for path in doomed {
            if let Some(token) = self.by_path.remove(&path) {
                self.by_token.remove(&token);
                entries.push((token, path));
            }
        }
        DetachedSubtree { prefix, entries }
    }

    /// Put a detached subtree back with its root at `to`
    ///
    /// Returns the number of reattached entries.
    pub fn reattach(&mut self, subtree: DetachedSubtree<T>, to: &Path) -> usize {
        let to = normalize_path(to);
        let mut count = 0;
        for (token, old_path) in subtree.entries {
            let new_path = match old_path.strip_prefix(&subtree.prefix) {
                Ok(rest) if rest.as_os_str().is_empty() => to.clone(),
                Ok(rest) => to.join(rest),
                Err(_) => continue,
            };
            self.insert(token, &new_path);
            count += 1;
        }
        count
    }

    /// Rewrite every path under `from` to live under `to`
    ///
    /// Tokens are kept; only their paths change. Returns the number of
    /// rewritten entries.
    pub fn rename_prefix(&mut self, from: &Path, to: &Path) -> usize {
        let subtree = self.detach_prefix(from);
        self.reattach(subtree, to)
    }

    pub fn len(&self) -> usize {
        self.by_token.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_token.is_empty()
    }

    /// Remove everything, returning all tokens
    pub fn drain_tokens(&mut self) -> Vec<T> {
        self.by_path.clear();
        self.by_token.drain().map(|(t, _)| t).collect()
    }

    /// True if both directions hold exactly the same pairs
    pub fn is_consistent(&self) -> bool {
        self.by_token.len() == self.by_path.len()
            && self
                .by_token
                .iter()
                .all(|(t, p)| self.by_path.get(p) == Some(t))
    }
}

/// Watch entries taken out of a table, keyed by their old paths
#[derive(Debug)]
pub struct DetachedSubtree<T> {
    prefix: PathBuf,
    entries: Vec<(T, PathBuf)>,
}

impl<T: PartialEq> DetachedSubtree<T> {
    /// Path the subtree was detached from
    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop `token` if the native side already released it
    pub fn forget_token(&mut self, token: &T) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(t, _)| t != token);
        self.entries.len() != before
    }

    pub fn into_tokens(self) -> Vec<T> {
        self.entries.into_iter().map(|(t, _)| t).collect()
    }
}

impl<T: Hash + Eq + Clone> Default for WatchTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> WatchTable<i32> {
        let mut t = WatchTable::new();
        t.insert(1, Path::new("/w"));
        t.insert(2, Path::new("/w/d1"));
        t.insert(3, Path::new("/w/d1/d2"));
        t.insert(4, Path::new("/w/d10"));
        t
    }

    #[test]
    fn test_insert_normalizes_trailing_separator() {
        let mut t = WatchTable::new();
        t.insert(9, Path::new("/w/sub/"));
        assert_eq!(t.path_of(&9), Some(Path::new("/w/sub")));
        assert_eq!(t.token_of(Path::new("/w/sub")), Some(&9));
        assert_eq!(t.token_of(Path::new("/w/sub/")), Some(&9));
    }

    #[test]
    fn test_rename_prefix_rewrites_nested_entries() {
        let mut t = table();
        assert_eq!(t.rename_prefix(Path::new("/w/d1"), Path::new("/w/moved")), 2);

        assert_eq!(t.path_of(&2), Some(Path::new("/w/moved")));
        assert_eq!(t.path_of(&3), Some(Path::new("/w/moved/d2")));
        assert!(!t.contains_path(Path::new("/w/d1")));
        assert!(t.is_consistent());
    }

    #[test]
    fn test_rename_prefix_respects_component_boundaries() {
        let mut t = table();
        t.rename_prefix(Path::new("/w/d1"), Path::new("/w/x"));
        // d10 shares a string prefix with d1 but is a different directory
        assert_eq!(t.path_of(&4), Some(Path::new("/w/d10")));
    }

    #[test]
    fn test_detach_prefix_returns_tokens() {
        let mut t = table();
        let subtree = t.detach_prefix(Path::new("/w/d1/"));
        assert_eq!(subtree.prefix(), Path::new("/w/d1"));
        assert_eq!(subtree.len(), 2);

        let mut tokens = subtree.into_tokens();
        tokens.sort();
        assert_eq!(tokens, vec![2, 3]);
        assert_eq!(t.len(), 2);
        assert!(t.is_consistent());
    }

    #[test]
    fn test_detached_subtree_survives_new_entry_at_prefix() {
        let mut t = table();
        let subtree = t.detach_prefix(Path::new("/w/d1"));

        // A new directory appears where the old one was
        t.insert(7, Path::new("/w/d1"));
        let mut tokens = subtree.into_tokens();
        tokens.sort();
        assert_eq!(tokens, vec![2, 3]);
        assert_eq!(t.token_of(Path::new("/w/d1")), Some(&7));
        assert!(t.is_consistent());
    }

    #[test]
    fn test_reattach_moves_nested_entries() {
        let mut t = table();
        let mut subtree = t.detach_prefix(Path::new("/w/d1"));
        t.insert(7, Path::new("/w/d1"));
        assert!(!subtree.forget_token(&9));

        assert_eq!(t.reattach(subtree, Path::new("/w/away")), 2);
        assert_eq!(t.path_of(&2), Some(Path::new("/w/away")));
        assert_eq!(t.path_of(&3), Some(Path::new("/w/away/d2")));
        assert_eq!(t.token_of(Path::new("/w/d1")), Some(&7));
        assert!(t.is_consistent());
    }

    #[test]
    fn test_forget_token_shrinks_subtree() {
        let mut t = table();
        let mut subtree = t.detach_prefix(Path::new("/w/d1"));
        assert!(subtree.forget_token(&3));
        assert_eq!(subtree.into_tokens(), vec![2]);
    }

    #[test]
    fn test_reinsert_token_drops_stale_path() {
        let mut t = table();
        t.insert(2, Path::new("/w/elsewhere"));
        assert!(!t.contains_path(Path::new("/w/d1")));
        assert_eq!(t.token_of(Path::new("/w/elsewhere")), Some(&2));
        assert!(t.is_consistent());
    }

    #[test]
    fn test_remove_token() {
        let mut t = table();
        assert_eq!(t.remove_token(&3), Some(PathBuf::from("/w/d1/d2")));
        assert!(t.remove_token(&3).is_none());
        assert!(t.is_consistent());
    }

    #[test]
    fn test_drain_tokens_empties_both_maps() {
        let mut t = table();
        assert_eq!(t.drain_tokens().len(), 4);
        assert!(t.is_empty());
        assert!(t.is_consistent());
    }
}
