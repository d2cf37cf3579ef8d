//! Trie index and level iterators — the leapfrog primitives (§3.5, §4.7.1).
//!
//! A `Trie` of arity `k` materializes, for each level `i`, a mapping from
//! every distinct prefix `<x_0 .. x_{i-1}>` to the sorted set of values
//! occurring at position `i` among tuples extending that prefix, each
//! carrying a reference count equal to the number of source tuples sharing
//! that prefix-value (I-T1). An empty per-prefix set is never stored
//! (I-T2).

use crate::value::{Atom, Tuple};
use std::collections::BTreeMap;
use std::collections::HashMap;

/// Sorted, ref-counted set of values occurring at one level under one
/// prefix. Kept as a `BTreeMap` so `seek_ge` is a single `range` query.
type LevelBucket = BTreeMap<Atom, u64>;

/// A multi-level index over a relation's tuples, one `LevelBucket` map per
/// (level, prefix).
#[derive(Debug, Clone)]
pub struct Trie {
    arity: usize,
    /// `levels[i]` maps an encoded prefix of length `i` to the bucket of
    /// distinct values occurring at position `i` under that prefix.
    levels: Vec<HashMap<Vec<u8>, LevelBucket>>,
    /// Exact tuple count, so callers can tell an empty trie from a freshly
    /// built one without walking level 0.
    tuple_count: u64,
}

fn encode_prefix(tuple: &Tuple, len: usize) -> Vec<u8> {
    let mut out = Vec::new();
    for i in 0..len {
        out.extend_from_slice(&tuple.atom_at(i).to_bytes());
    }
    out
}

impl Trie {
    pub fn new(arity: usize) -> Self {
        Trie {
            arity,
            levels: (0..arity).map(|_| HashMap::new()).collect(),
            tuple_count: 0,
        }
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn tuple_count(&self) -> u64 {
        self.tuple_count
    }

    pub fn is_empty(&self) -> bool {
        self.tuple_count == 0
    }

    /// Insert a tuple, incrementing the ref count of its value at every
    /// level under its own prefix.
    pub fn insert(&mut self, tuple: &Tuple) {
        assert_eq!(tuple.arity(), self.arity, "tuple arity does not match trie arity");
        for level in 0..self.arity {
            let prefix = encode_prefix(tuple, level);
            let value = tuple.atom_at(level).clone();
            *self.levels[level]
                .entry(prefix)
                .or_default()
                .entry(value)
                .or_insert(0) += 1;
        }
        self.tuple_count += 1;
    }

    /// Remove a tuple, decrementing ref counts; a count crossing 1→0 drops
    /// the value from the bucket, and an emptied bucket is dropped entirely
    /// (I-T2). Removing a tuple not present is a caller bug (internal
    /// invariant) and panics rather than silently going negative.
    pub fn remove(&mut self, tuple: &Tuple) {
        assert_eq!(tuple.arity(), self.arity, "tuple arity does not match trie arity");
        for level in 0..self.arity {
            let prefix = encode_prefix(tuple, level);
            let value = tuple.atom_at(level).clone();
            let bucket = self
                .levels[level]
                .get_mut(&prefix)
                .unwrap_or_else(|| panic!("trie invariant violated: remove of untracked prefix at level {level}"));
            let count = bucket
                .get_mut(&value)
                .unwrap_or_else(|| panic!("trie invariant violated: remove of untracked value at level {level}"));
            *count -= 1;
            if *count == 0 {
                bucket.remove(&value);
                if bucket.is_empty() {
                    self.levels[level].remove(&prefix);
                }
            }
        }
        self.tuple_count -= 1;
    }

    /// A level iterator over the values at `level` under the given bound
    /// prefix (the first `level` atoms of the tuples it should range over).
    /// Returns an iterator that is immediately `at_end()` if the prefix is
    /// absent (I-T2 means that is the only way to represent "no values").
    pub fn level_iter(&self, level: usize, prefix: &[Atom]) -> LevelIterator<'_> {
        debug_assert_eq!(prefix.len(), level);
        let mut key = Vec::new();
        for atom in prefix {
            key.extend_from_slice(&atom.to_bytes());
        }
        match self.levels[level].get(&key) {
            Some(bucket) => LevelIterator::new(bucket),
            None => LevelIterator::empty(),
        }
    }

    /// The sorted set of distinct values at `level` under `prefix`, for
    /// testing and for `spec.md` invariant 4 (trie correctness).
    pub fn values_at(&self, level: usize, prefix: &[Atom]) -> Vec<Atom> {
        self.level_iter(level, prefix).collect()
    }
}

/// A cursor over one level's sorted value set, supporting the four LFTJ
/// primitives: `seek_ge`, `key`, `next`, `at_end`.
pub struct LevelIterator<'a> {
    bucket: Option<&'a LevelBucket>,
    /// Current position, expressed as "the smallest key >= cursor" via a
    /// stored current key once positioned; `None` before the first seek.
    current: Option<&'a Atom>,
}

impl<'a> LevelIterator<'a> {
    fn new(bucket: &'a LevelBucket) -> Self {
        let current = bucket.keys().next();
        LevelIterator {
            bucket: Some(bucket),
            current,
        }
    }

    fn empty() -> Self {
        LevelIterator {
            bucket: None,
            current: None,
        }
    }

    /// Advance the cursor to the least key `>= target`; becomes `at_end` if
    /// none exists.
    pub fn seek_ge(&mut self, target: &Atom) {
        let Some(bucket) = self.bucket else {
            return;
        };
        self.current = bucket.range(target.clone()..).map(|(k, _)| k).next();
    }

    /// The current key, or `None` if `at_end()`.
    pub fn key(&self) -> Option<&'a Atom> {
        self.current
    }

    /// Advance to the next key in sorted order past the current one.
    pub fn next(&mut self) {
        let Some(bucket) = self.bucket else {
            return;
        };
        let Some(cur) = self.current else {
            return;
        };
        self.current = bucket
            .range((std::ops::Bound::Excluded(cur.clone()), std::ops::Bound::Unbounded))
            .map(|(k, _)| k)
            .next();
    }

    pub fn at_end(&self) -> bool {
        self.current.is_none()
    }
}

impl<'a> Iterator for LevelIterator<'a> {
    type Item = Atom;

    fn next(&mut self) -> Option<Atom> {
        let cur = self.current.cloned();
        if cur.is_some() {
            LevelIterator::next(self);
        }
        cur
    }
}
