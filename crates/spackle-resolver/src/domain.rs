//! Finite value sets over small integer domains.

use smallvec::SmallVec;
use std::fmt;

/// A set of values `0..size`, stored as a bit set.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Domain {
    words: SmallVec<[u64; 1]>,
}

impl Domain {
    fn words_for(size: usize) -> usize {
        size.div_ceil(64).max(1)
    }

    /// The empty set over a domain of `size` values.
    #[must_use]
    pub fn empty(size: usize) -> Self {
        Self {
            words: SmallVec::from_elem(0, Self::words_for(size)),
        }
    }

    /// Every value in `0..size`.
    #[must_use]
    pub fn full(size: usize) -> Self {
        let mut domain = Self::empty(size);
        for value in 0..size {
            domain.insert(value);
        }
        domain
    }

    /// `{value}`.
    #[must_use]
    pub fn singleton(size: usize, value: usize) -> Self {
        let mut domain = Self::empty(size);
        domain.insert(value);
        domain
    }

    /// The given values.
    #[must_use]
    pub fn from_values(size: usize, values: impl IntoIterator<Item = usize>) -> Self {
        let mut domain = Self::empty(size);
        for value in values {
            domain.insert(value);
        }
        domain
    }

    /// Add a value.
    pub fn insert(&mut self, value: usize) {
        self.words[value / 64] |= 1 << (value % 64);
    }

    /// Whether `value` is a member.
    #[must_use]
    pub fn contains(&self, value: usize) -> bool {
        self.words
            .get(value / 64)
            .is_some_and(|word| word & (1 << (value % 64)) != 0)
    }

    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    /// The only member, if there is exactly one.
    #[must_use]
    pub fn single(&self) -> Option<usize> {
        if self.len() == 1 { self.iter().next() } else { None }
    }

    /// `self ∩ other`.
    #[must_use]
    pub fn intersect(&self, other: &Self) -> Self {
        Self {
            words: self
                .words
                .iter()
                .zip(other.words.iter())
                .map(|(a, b)| a & b)
                .collect(),
        }
    }

    /// `self \ other`.
    #[must_use]
    pub fn difference(&self, other: &Self) -> Self {
        Self {
            words: self
                .words
                .iter()
                .zip(other.words.iter())
                .map(|(a, b)| a & !b)
                .collect(),
        }
    }

    /// Whether every member of `self` is in `other`.
    #[must_use]
    pub fn is_subset(&self, other: &Self) -> bool {
        self.words
            .iter()
            .zip(other.words.iter())
            .all(|(a, b)| a & !b == 0)
    }

    /// Whether the sets share no member.
    #[must_use]
    pub fn is_disjoint(&self, other: &Self) -> bool {
        self.words
            .iter()
            .zip(other.words.iter())
            .all(|(a, b)| a & b == 0)
    }

    /// Members in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(i, word)| {
            (0..64)
                .filter(move |bit| word & (1 << bit) != 0)
                .map(move |bit| i * 64 + bit)
        })
    }
}

impl fmt::Debug for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_operations() {
        let a = Domain::from_values(100, [1, 3, 70]);
        let b = Domain::from_values(100, [3, 70, 99]);
        assert_eq!(a.intersect(&b).iter().collect::<Vec<_>>(), [3, 70]);
        assert_eq!(a.difference(&b).iter().collect::<Vec<_>>(), [1]);
        assert!(Domain::singleton(100, 3).is_subset(&a));
        assert!(Domain::singleton(100, 2).is_disjoint(&a));
        assert_eq!(a.len(), 3);
        assert_eq!(Domain::singleton(100, 99).single(), Some(99));
        assert_eq!(a.single(), None);
    }

    #[test]
    fn full_and_empty() {
        assert_eq!(Domain::full(3).iter().collect::<Vec<_>>(), [0, 1, 2]);
        assert!(Domain::empty(0).is_empty());
        assert!(!Domain::full(65).contains(65));
        assert!(Domain::full(65).contains(64));
    }
}
