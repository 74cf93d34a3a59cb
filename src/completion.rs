//! Prefix-match completion over sorted key sets.
//!
//! [`SortedMatches`] is the building block for every kind of tab completion in
//! the crate: command names, aliases, session variables. It walks a sorted
//! sequence from the partial string onwards and stops at the first key that
//! no longer starts with it.

use crate::range::RangeView;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

/// Lazy sequence of completion candidates, as returned by
/// [`Command::complete`](crate::Command::complete).
pub type Candidates<'a> = Box<dyn Iterator<Item = String> + 'a>;

/// Prefix enumerator over a sorted key sequence.
///
/// The inner iterator must already be positioned at the first key that is
/// not less than the partial string (the `from_*` constructors take care of
/// that). Empty keys are skipped; every yielded key can be decorated with a
/// fixed prefix and suffix, and an exclusion predicate can hide candidates
/// the caller already consumed elsewhere on the line.
pub struct SortedMatches<'a, I> {
    inner: I,
    partial: String,
    prefix: Option<String>,
    suffix: Option<String>,
    exclude: Option<Box<dyn Fn(&str) -> bool + 'a>>,
    done: bool,
}

impl<'a, I> SortedMatches<'a, I>
where
    I: Iterator<Item = &'a str>,
{
    /// Wrap an iterator that is already positioned at `partial`.
    pub fn new(partial: impl Into<String>, inner: I) -> Self {
        Self {
            inner,
            partial: partial.into(),
            prefix: None,
            suffix: None,
            exclude: None,
            done: false,
        }
    }

    /// Prepend `prefix` to every yielded candidate.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Append `suffix` to every yielded candidate.
    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = Some(suffix.into());
        self
    }

    /// Skip candidates for which `exclude` returns true.
    pub fn excluding(mut self, exclude: impl Fn(&str) -> bool + 'a) -> Self {
        self.exclude = Some(Box::new(exclude));
        self
    }

    pub fn partial(&self) -> &str {
        &self.partial
    }

    fn decorate(&self, key: &str) -> String {
        let prefix = self.prefix.as_deref().unwrap_or_default();
        let suffix = self.suffix.as_deref().unwrap_or_default();
        format!("{prefix}{key}{suffix}")
    }
}

impl<'a> SortedMatches<'a, RangeView<'a, std::vec::IntoIter<&'a str>, str>> {
    /// Matches within any sorted sequence, positioned with a linear scan.
    pub fn from_sorted(
        partial: &'a str,
        keys: impl IntoIterator<Item = &'a str>,
    ) -> SortedMatches<'a, RangeView<'a, std::vec::IntoIter<&'a str>, str>> {
        let keys: Vec<&'a str> = keys.into_iter().collect();
        SortedMatches::new(partial, RangeView::tail(keys.into_iter(), partial))
    }
}

/// Matches among the keys of a sorted map.
pub fn map_matches<'a, V>(
    partial: &str,
    map: &'a BTreeMap<String, V>,
) -> SortedMatches<'a, impl Iterator<Item = &'a str> + use<'a, V>> {
    let keys = map
        .range::<str, _>((Bound::Included(partial), Bound::Unbounded))
        .map(|(key, _)| key.as_str());
    SortedMatches::new(partial, keys)
}

/// Matches within a sorted set.
pub fn set_matches<'a>(
    partial: &str,
    set: &'a BTreeSet<String>,
) -> SortedMatches<'a, impl Iterator<Item = &'a str> + use<'a>> {
    let keys = set
        .range::<str, _>((Bound::Included(partial), Bound::Unbounded))
        .map(String::as_str);
    SortedMatches::new(partial, keys)
}

impl<'a, I> Iterator for SortedMatches<'a, I>
where
    I: Iterator<Item = &'a str>,
{
    type Item = String;

    fn next(&mut self) -> Option<String> {
        if self.done {
            return None;
        }
        while let Some(current) = self.inner.next() {
            if current.is_empty() {
                continue;
            }
            if !current.starts_with(self.partial.as_str()) {
                // sorted input: no match can follow
                break;
            }
            if self.exclude.as_ref().is_some_and(|exclude| exclude(current)) {
                continue;
            }
            return Some(self.decorate(current));
        }
        self.done = true;
        None
    }
}

/// Words of `partial_line` before the one being completed.
///
/// `last_word` is the word under the cursor; when it is empty the cursor sits
/// after whitespace and every word on the line is complete.
pub fn completed_words<'l>(partial_line: &'l str, last_word: &str) -> Vec<&'l str> {
    let mut words: Vec<&str> = partial_line.split_whitespace().collect();
    if !last_word.is_empty() && words.last().is_some_and(|w| w.ends_with(last_word)) {
        words.pop();
    }
    words
}

/// Result of a completion request, split by how many candidates were found.
///
/// Callers must treat the three cases differently; an ambiguous result must
/// never be collapsed to one of its members silently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Alternatives {
    NoMatch,
    Unique(String),
    Ambiguous(Vec<String>),
}

impl Alternatives {
    pub fn len(&self) -> usize {
        match self {
            Alternatives::NoMatch => 0,
            Alternatives::Unique(_) => 1,
            Alternatives::Ambiguous(all) => all.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Alternatives::NoMatch)
    }

    pub fn is_ambiguous(&self) -> bool {
        matches!(self, Alternatives::Ambiguous(_))
    }

    pub fn into_vec(self) -> Vec<String> {
        match self {
            Alternatives::NoMatch => Vec::new(),
            Alternatives::Unique(one) => vec![one],
            Alternatives::Ambiguous(all) => all,
        }
    }
}

impl FromIterator<String> for Alternatives {
    fn from_iter<T: IntoIterator<Item = String>>(iter: T) -> Self {
        let mut all: Vec<String> = iter.into_iter().collect();
        match all.len() {
            0 => Alternatives::NoMatch,
            1 => Alternatives::Unique(all.remove(0)),
            _ => Alternatives::Ambiguous(all),
        }
    }
}
