//! Persistent label paths attached to groups.
//!
//! A [`GroupKey`] records the chain of labels (terms, bucket names) that led to
//! a group. Keys are immutable and share structure: `add` is O(1), and
//! `head`/`tail` are amortized O(1) thanks to a two-list layout where `front`
//! holds an already ordered prefix and `back` holds the remaining labels
//! newest first. `back` is only reversed into a new `front` when `front` runs
//! out.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::error::{EngineError, Result};
use crate::field::Term;

/// Group id to label path, for the groups produced by a regroup.
pub type GroupKeys = FxHashMap<usize, GroupKey<Term>>;

/// Keys for a fresh session: group 1 with no labels.
pub fn new_group_keys() -> GroupKeys {
    let mut keys = GroupKeys::default();
    keys.insert(1, GroupKey::empty());
    keys
}

struct Link<E> {
    head: Arc<E>,
    tail: Option<Arc<Link<E>>>,
    last: Arc<E>,
}

impl<E> Link<E> {
    fn cons(head: Arc<E>, tail: Option<Arc<Link<E>>>) -> Arc<Self> {
        let last = match &tail {
            Some(rest) => rest.last.clone(),
            None => head.clone(),
        };
        Arc::new(Self { head, tail, last })
    }
}

impl<E> Drop for Link<E> {
    // Unlinks uniquely owned successors one by one instead of recursing.
    fn drop(&mut self) {
        let mut next = self.tail.take();
        while let Some(link) = next {
            match Arc::try_unwrap(link) {
                Ok(mut owned) => next = owned.tail.take(),
                Err(_) => break,
            }
        }
    }
}

/// Immutable, structurally shared sequence of labels.
pub struct GroupKey<E> {
    front: Option<Arc<Link<E>>>,
    back: Option<Arc<Link<E>>>,
    len: usize,
}

impl<E> GroupKey<E> {
    /// The key with no labels.
    pub const fn empty() -> Self {
        Self {
            front: None,
            back: None,
            len: 0,
        }
    }

    /// A key holding exactly `label`.
    pub fn singleton(label: E) -> Self {
        Self::empty().add(label)
    }

    /// Returns a new key with `label` appended; `self` is unchanged.
    pub fn add(&self, label: E) -> Self {
        Self {
            front: self.front.clone(),
            back: Some(Link::cons(Arc::new(label), self.back.clone())),
            len: self.len + 1,
        }
    }

    /// Oldest label.
    pub fn head(&self) -> Result<&E> {
        match (&self.front, &self.back) {
            (Some(front), _) => Ok(&front.head),
            (None, Some(back)) => Ok(&back.last),
            (None, None) => Err(EngineError::EmptyGroupKey("head")),
        }
    }

    /// Newest label.
    pub fn last_inserted(&self) -> Result<&E> {
        match (&self.back, &self.front) {
            (Some(back), _) => Ok(&back.head),
            (None, Some(front)) => Ok(&front.last),
            (None, None) => Err(EngineError::EmptyGroupKey("last label")),
        }
    }

    /// All labels but the oldest.
    pub fn tail(&self) -> Result<Self> {
        match (&self.front, &self.back) {
            (Some(front), back) => Ok(Self {
                front: front.tail.clone(),
                back: back.clone(),
                len: self.len - 1,
            }),
            (None, Some(back)) => {
                // Everything but back.last, which is the head being dropped.
                let mut reversed = None;
                let mut current = back;
                while let Some(next) = &current.tail {
                    reversed = Some(Link::cons(current.head.clone(), reversed));
                    current = next;
                }
                Ok(Self {
                    front: reversed,
                    back: None,
                    len: self.len - 1,
                })
            }
            (None, None) => Err(EngineError::EmptyGroupKey("tail")),
        }
    }

    /// Number of labels.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the key has no labels.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Labels from oldest to newest.
    pub fn iter(&self) -> Iter<'_, E> {
        let mut back = Vec::with_capacity(self.len);
        let mut cursor = self.back.as_deref();
        while let Some(link) = cursor {
            back.push(&*link.head);
            cursor = link.tail.as_deref();
        }
        Iter {
            front: self.front.as_deref(),
            back,
        }
    }
}

/// Iterator over the labels of a [`GroupKey`], oldest first.
pub struct Iter<'a, E> {
    front: Option<&'a Link<E>>,
    back: Vec<&'a E>,
}

impl<'a, E> Iterator for Iter<'a, E> {
    type Item = &'a E;

    fn next(&mut self) -> Option<Self::Item> {
        match self.front {
            Some(link) => {
                self.front = link.tail.as_deref();
                Some(&*link.head)
            }
            None => self.back.pop(),
        }
    }
}

impl<'a, E> IntoIterator for &'a GroupKey<E> {
    type Item = &'a E;
    type IntoIter = Iter<'a, E>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<E> Clone for GroupKey<E> {
    fn clone(&self) -> Self {
        Self {
            front: self.front.clone(),
            back: self.back.clone(),
            len: self.len,
        }
    }
}

impl<E> Default for GroupKey<E> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<E: PartialEq> PartialEq for GroupKey<E> {
    fn eq(&self, other: &Self) -> bool {
        self.len == other.len && self.iter().eq(other.iter())
    }
}

impl<E: Eq> Eq for GroupKey<E> {}

impl<E: Hash> Hash for GroupKey<E> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_usize(self.len);
        for label in self {
            label.hash(state);
        }
    }
}

impl<E: fmt::Debug> fmt::Debug for GroupKey<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl<E: fmt::Display> fmt::Display for GroupKey<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (idx, label) in self.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{label}")?;
        }
        f.write_str("]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(labels: &[&'static str]) -> GroupKey<&'static str> {
        labels.iter().fold(GroupKey::empty(), |key, label| key.add(*label))
    }

    #[test]
    fn head_and_tail_walk_in_insertion_order() -> Result<()> {
        let k = key(&["a", "b", "c"]);
        assert_eq!(*k.head()?, "a");
        assert_eq!(*k.last_inserted()?, "c");
        let rest = k.tail()?;
        assert_eq!(*rest.head()?, "b");
        let rest = rest.add("d");
        assert_eq!(rest.to_string(), "[b, c, d]");
        let rest = rest.tail()?.tail()?;
        assert_eq!(*rest.head()?, "d");
        assert!(rest.tail()?.is_empty());
        Ok(())
    }

    #[test]
    fn empty_key_has_no_head_or_tail() {
        let k: GroupKey<i64> = GroupKey::empty();
        assert!(matches!(k.head(), Err(EngineError::EmptyGroupKey("head"))));
        assert!(matches!(k.tail(), Err(EngineError::EmptyGroupKey("tail"))));
        assert!(k.last_inserted().is_err());
        assert_eq!(k.to_string(), "[]");
    }

    #[test]
    fn equality_ignores_split_point() -> Result<()> {
        let split = key(&["x", "a", "b"]).tail()?.add("c");
        let flat = key(&["a", "b", "c"]);
        assert_eq!(split, flat);

        use std::collections::hash_map::DefaultHasher;
        let digest = |k: &GroupKey<&str>| {
            let mut h = DefaultHasher::new();
            k.hash(&mut h);
            h.finish()
        };
        assert_eq!(digest(&split), digest(&flat));
        assert_ne!(flat, key(&["a", "b"]));
        Ok(())
    }

    #[test]
    fn long_keys_drop_without_deep_recursion() -> Result<()> {
        let long = (0..500_000u32).fold(GroupKey::empty(), |key, label| key.add(label));
        let shared = long.add(7);
        let shifted = long.tail()?;
        drop(long);
        assert_eq!(shared.len(), 500_001);
        assert_eq!(*shifted.head()?, 1);
        drop(shared);
        drop(shifted);
        Ok(())
    }

    #[test]
    fn add_does_not_disturb_shared_prefix() -> Result<()> {
        let parent = key(&["us"]);
        let left = parent.add("1");
        let right = parent.add("2");
        assert_eq!(parent.len(), 1);
        assert_eq!(left.iter().copied().collect::<Vec<_>>(), vec!["us", "1"]);
        assert_eq!(*right.last_inserted()?, "2");
        Ok(())
    }
}
