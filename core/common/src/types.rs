//! Common types used throughout Coffer.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Separator between id segments in a materialized path.
pub const PATH_SEPARATOR: char = '/';

/// Upper-bound sentinel for descendant range queries.
///
/// Must sort after every character that can appear in an encoded item id
/// (lowercase hex and '-') and after the separator itself.
pub const RANGE_SENTINEL: char = '~';

/// Identifier of the owner a vault item belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerId(String);

impl OwnerId {
    /// Create a new OwnerId from a string.
    ///
    /// # Errors
    /// - Returns error if the id is empty
    pub fn new(id: impl Into<String>) -> crate::Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(crate::Error::InvalidInput(
                "OwnerId cannot be empty".to_string(),
            ));
        }
        Ok(Self(id))
    }

    /// Actor id used for background jobs that act across owners.
    pub fn system() -> Self {
        Self("system".to_string())
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a vault item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(Uuid);

impl ItemId {
    /// Generate a fresh random id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse an id from its hyphenated string form.
    pub fn parse(s: &str) -> crate::Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| crate::Error::InvalidInput(format!("Invalid item id: {}", e)))
    }

    /// Get the inner UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier tagging the cohort of items soft-deleted by one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(Uuid);

impl BatchId {
    /// Generate a fresh random batch id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a batch id from its hyphenated string form.
    pub fn parse(s: &str) -> crate::Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| crate::Error::InvalidInput(format!("Invalid batch id: {}", e)))
    }

    /// Get the inner UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Materialized path of a vault item: its ancestor id chain joined by
/// [`PATH_SEPARATOR`], terminating in the item's own id.
///
/// Tree nesting is flattened into a sortable string key, so retrieving a
/// subtree at any depth becomes a single ordered range query over
/// [`descendant_range`](Self::descendant_range) instead of a recursive
/// per-level traversal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MaterializedPath {
    encoded: String,
}

impl MaterializedPath {
    /// Path of a root item: just the item's own id.
    pub fn root(id: ItemId) -> Self {
        Self {
            encoded: id.to_string(),
        }
    }

    /// Path of a child item under this path.
    pub fn child(&self, id: ItemId) -> Self {
        Self {
            encoded: format!("{}{}{}", self.encoded, PATH_SEPARATOR, id),
        }
    }

    /// Path of a child item, rejecting encoded lengths beyond `max_len`.
    ///
    /// Bounds index key size against pathological nesting.
    ///
    /// # Errors
    /// - `InvalidInput` if the resulting encoded path would exceed `max_len`
    pub fn child_checked(&self, id: ItemId, max_len: usize) -> crate::Result<Self> {
        let child = self.child(id);
        if child.encoded.len() > max_len {
            return Err(crate::Error::InvalidInput(format!(
                "Materialized path exceeds maximum length {} (depth {})",
                max_len,
                child.depth()
            )));
        }
        Ok(child)
    }

    /// Parse a path from its encoded form, validating every id segment.
    pub fn parse(encoded: &str) -> crate::Result<Self> {
        if encoded.is_empty() {
            return Err(crate::Error::InvalidInput(
                "Materialized path cannot be empty".to_string(),
            ));
        }
        for segment in encoded.split(PATH_SEPARATOR) {
            ItemId::parse(segment)?;
        }
        Ok(Self {
            encoded: encoded.to_string(),
        })
    }

    /// The encoded sortable key.
    pub fn encoded(&self) -> &str {
        &self.encoded
    }

    /// Number of id segments (1 for a root item).
    pub fn depth(&self) -> usize {
        self.encoded.split(PATH_SEPARATOR).count()
    }

    /// The final id segment (the item's own id).
    pub fn leaf_id(&self) -> crate::Result<ItemId> {
        let last = self
            .encoded
            .rsplit(PATH_SEPARATOR)
            .next()
            .unwrap_or(&self.encoded);
        ItemId::parse(last)
    }

    /// Half-open key range `[lower, upper)` covering every descendant of
    /// this path, at any depth, and nothing else.
    ///
    /// `lower` is the path followed by the separator; `upper` additionally
    /// appends [`RANGE_SENTINEL`], which sorts after any valid id character.
    pub fn descendant_range(&self) -> (String, String) {
        let lower = format!("{}{}", self.encoded, PATH_SEPARATOR);
        let upper = format!("{}{}", lower, RANGE_SENTINEL);
        (lower, upper)
    }

    /// Whether this path lies strictly inside `ancestor`'s subtree.
    pub fn is_descendant_of(&self, ancestor: &MaterializedPath) -> bool {
        self.encoded.len() > ancestor.encoded.len()
            && self.encoded.starts_with(&ancestor.encoded)
            && self.encoded[ancestor.encoded.len()..].starts_with(PATH_SEPARATOR)
    }

    /// Rewrite this path for a move: the `old_prefix` ancestor chain is
    /// replaced by `new_prefix`, preserving everything below it.
    ///
    /// # Errors
    /// - `InvalidInput` if this path is not `old_prefix` or inside its subtree
    pub fn rebase(
        &self,
        old_prefix: &MaterializedPath,
        new_prefix: &MaterializedPath,
    ) -> crate::Result<Self> {
        if self == old_prefix {
            return Ok(new_prefix.clone());
        }
        if !self.is_descendant_of(old_prefix) {
            return Err(crate::Error::InvalidInput(format!(
                "Path {} is not within subtree of {}",
                self.encoded, old_prefix.encoded
            )));
        }
        Ok(Self {
            encoded: format!(
                "{}{}",
                new_prefix.encoded,
                &self.encoded[old_prefix.encoded.len()..]
            ),
        })
    }
}

impl fmt::Display for MaterializedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_owner_id_creation() {
        let id = OwnerId::new("owner-1").unwrap();
        assert_eq!(id.as_str(), "owner-1");
    }

    #[test]
    fn test_owner_id_empty_fails() {
        assert!(OwnerId::new("").is_err());
    }

    #[test]
    fn test_root_path_is_own_id() {
        let id = ItemId::generate();
        let path = MaterializedPath::root(id);
        assert_eq!(path.encoded(), id.to_string());
        assert_eq!(path.depth(), 1);
        assert_eq!(path.leaf_id().unwrap(), id);
    }

    #[test]
    fn test_child_path_appends_separator_and_id() {
        let parent_id = ItemId::generate();
        let child_id = ItemId::generate();
        let parent = MaterializedPath::root(parent_id);
        let child = parent.child(child_id);

        assert_eq!(
            child.encoded(),
            format!("{}{}{}", parent_id, PATH_SEPARATOR, child_id)
        );
        assert_eq!(child.depth(), 2);
        assert!(child.is_descendant_of(&parent));
        assert!(!parent.is_descendant_of(&child));
    }

    #[test]
    fn test_child_checked_rejects_long_paths() {
        let mut path = MaterializedPath::root(ItemId::generate());
        // 36-char ids: three levels fit in 200 bytes, the fourth does not.
        for _ in 0..2 {
            path = path.child_checked(ItemId::generate(), 200).unwrap();
        }
        assert!(path.child_checked(ItemId::generate(), 110).is_err());
    }

    #[test]
    fn test_parse_round_trip() {
        let path = MaterializedPath::root(ItemId::generate()).child(ItemId::generate());
        let parsed = MaterializedPath::parse(path.encoded()).unwrap();
        assert_eq!(parsed, path);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(MaterializedPath::parse("").is_err());
        assert!(MaterializedPath::parse("not-a-uuid").is_err());
    }

    #[test]
    fn test_descendant_range_covers_deep_descendant() {
        let folder = MaterializedPath::root(ItemId::generate());
        let (lower, upper) = folder.descendant_range();

        let mut deep = folder.clone();
        for _ in 0..5 {
            deep = deep.child(ItemId::generate());
        }

        assert!(deep.encoded() >= lower.as_str());
        assert!(deep.encoded() < upper.as_str());
    }

    #[test]
    fn test_descendant_range_excludes_siblings_and_self() {
        let folder = MaterializedPath::root(ItemId::generate());
        let sibling = MaterializedPath::root(ItemId::generate());
        let (lower, upper) = folder.descendant_range();

        let in_range = |p: &MaterializedPath| {
            p.encoded() >= lower.as_str() && p.encoded() < upper.as_str()
        };

        assert!(!in_range(&folder));
        assert!(!in_range(&sibling));
        assert!(!in_range(&sibling.child(ItemId::generate())));
    }

    #[test]
    fn test_rebase_rewrites_prefix() {
        let a = MaterializedPath::root(ItemId::generate());
        let b = a.child(ItemId::generate());
        let leaf_id = ItemId::generate();
        let c = b.child(leaf_id);

        let new_home = MaterializedPath::root(ItemId::generate());
        let moved_b = b.rebase(&b, &new_home.child(b.leaf_id().unwrap())).unwrap();
        let moved_c = c.rebase(&b, &moved_b).unwrap();

        assert!(moved_c.is_descendant_of(&moved_b));
        assert_eq!(moved_c.leaf_id().unwrap(), leaf_id);
    }

    #[test]
    fn test_rebase_rejects_unrelated_path() {
        let a = MaterializedPath::root(ItemId::generate());
        let other = MaterializedPath::root(ItemId::generate());
        assert!(other.rebase(&a, &a).is_err());
    }

    proptest! {
        /// Any descendant chain of any depth falls inside the ancestor's
        /// range; any path outside the subtree falls outside it.
        #[test]
        fn prop_descendant_range_is_exact(depth in 1usize..8, sibling_depth in 1usize..8) {
            let folder = MaterializedPath::root(ItemId::generate());
            let (lower, upper) = folder.descendant_range();

            let mut descendant = folder.clone();
            for _ in 0..depth {
                descendant = descendant.child(ItemId::generate());
            }
            prop_assert!(descendant.encoded() >= lower.as_str());
            prop_assert!(descendant.encoded() < upper.as_str());

            let mut outsider = MaterializedPath::root(ItemId::generate());
            for _ in 1..sibling_depth {
                outsider = outsider.child(ItemId::generate());
            }
            let inside = outsider.encoded() >= lower.as_str()
                && outsider.encoded() < upper.as_str();
            prop_assert!(!inside);
        }
    }
}
